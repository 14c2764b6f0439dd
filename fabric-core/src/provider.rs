//! Provider traits (spec.md §4.B): a compile-time capability table keyed by
//! a zero-sized provider tag, so generic code (the atomic router in
//! [`crate::endpoint`], the MR cache alignment policy in [`crate::memory`])
//! picks its code path at compile time instead of branching at runtime on a
//! string or enum.
//!
//! Grounded on the teacher corpus's `Sealed`-gated extension points
//! (`kernel::sealed`): `ProviderTag` is closed to providers known here, but
//! the trait itself stays public so a downstream crate can still implement
//! `ProviderTraits` for its own tag under the `provider-catalog-extra`
//! feature without forking this crate.

use crate::primitives::ProgressMode;

/// Marker trait implemented by zero-sized provider tags.
pub trait ProviderTag: Send + Sync + 'static {}

/// Compile-time capability table. One `impl ProviderTraits for <Tag>` per
/// known provider; see the concrete tag types below for the catalog.
pub trait ProviderTraits: ProviderTag {
    /// Whether the provider implements `FI_ATOMIC` natively, or whether the
    /// staged-atomic path (spec.md §4.H) must be used.
    const SUPPORTS_NATIVE_ATOMICS: bool;

    const SUPPORTS_INJECT: bool;
    const MAX_INJECT_SIZE: usize;

    const DEFAULT_CONTROL_PROGRESS: ProgressMode;
    const DEFAULT_DATA_PROGRESS: ProgressMode;

    /// Whether local MR keys carry meaning for this provider. Providers
    /// that don't require them (e.g. some shared-memory paths) still
    /// accept registration but ignore the returned key locally.
    const REQUIRES_LOCAL_KEY: bool;

    /// Registration alignment granularity, in bytes.
    const PAGE_SIZE: usize;

    fn uses_staged_atomics() -> bool {
        !Self::SUPPORTS_NATIVE_ATOMICS
    }

    fn align_down(x: usize) -> usize {
        x & !(Self::PAGE_SIZE - 1)
    }

    fn align_up(x: usize) -> usize {
        Self::align_down(x + Self::PAGE_SIZE - 1)
    }

    fn aligned_length(base: usize, len: usize) -> usize {
        let aligned_base = Self::align_down(base);
        let end = Self::align_up(base + len);
        end - aligned_base
    }

    /// Some providers key remote addresses by offset from the registered
    /// region's base, others by absolute virtual address. `base` is the
    /// remote MR's registered `addr`; `offset` is the caller's logical
    /// offset into it.
    fn compute_remote_addr(base: u64, offset: u64) -> u64;

    fn provider_name() -> &'static str;
}

/// InfiniBand/RoCE verbs.
#[derive(Debug, Clone, Copy, Default)]
pub struct Verbs;
impl ProviderTag for Verbs {}
impl ProviderTraits for Verbs {
    const SUPPORTS_NATIVE_ATOMICS: bool = true;
    const SUPPORTS_INJECT: bool = true;
    const MAX_INJECT_SIZE: usize = 256;
    const DEFAULT_CONTROL_PROGRESS: ProgressMode = ProgressMode::Auto;
    const DEFAULT_DATA_PROGRESS: ProgressMode = ProgressMode::Auto;
    const REQUIRES_LOCAL_KEY: bool = true;
    const PAGE_SIZE: usize = 4096;

    fn compute_remote_addr(base: u64, offset: u64) -> u64 {
        base + offset
    }

    fn provider_name() -> &'static str {
        "verbs"
    }
}

/// AWS Elastic Fabric Adapter.
#[derive(Debug, Clone, Copy, Default)]
pub struct Efa;
impl ProviderTag for Efa {}
impl ProviderTraits for Efa {
    const SUPPORTS_NATIVE_ATOMICS: bool = false;
    const SUPPORTS_INJECT: bool = true;
    const MAX_INJECT_SIZE: usize = 192;
    const DEFAULT_CONTROL_PROGRESS: ProgressMode = ProgressMode::Manual;
    const DEFAULT_DATA_PROGRESS: ProgressMode = ProgressMode::Manual;
    const REQUIRES_LOCAL_KEY: bool = true;
    const PAGE_SIZE: usize = 4096;

    fn compute_remote_addr(base: u64, offset: u64) -> u64 {
        base + offset
    }

    fn provider_name() -> &'static str {
        "efa"
    }
}

/// HPE Slingshot / Cray CXI.
#[derive(Debug, Clone, Copy, Default)]
pub struct Cxi;
impl ProviderTag for Cxi {}
impl ProviderTraits for Cxi {
    const SUPPORTS_NATIVE_ATOMICS: bool = true;
    const SUPPORTS_INJECT: bool = true;
    const MAX_INJECT_SIZE: usize = 224;
    const DEFAULT_CONTROL_PROGRESS: ProgressMode = ProgressMode::Auto;
    const DEFAULT_DATA_PROGRESS: ProgressMode = ProgressMode::Auto;
    const REQUIRES_LOCAL_KEY: bool = false;
    const PAGE_SIZE: usize = 4096;

    fn compute_remote_addr(_base: u64, offset: u64) -> u64 {
        // CXI keys by offset from the registration, not absolute VA.
        offset
    }

    fn provider_name() -> &'static str {
        "cxi"
    }
}

/// Shared-memory loopback provider.
#[derive(Debug, Clone, Copy, Default)]
pub struct Shm;
impl ProviderTag for Shm {}
impl ProviderTraits for Shm {
    const SUPPORTS_NATIVE_ATOMICS: bool = true;
    const SUPPORTS_INJECT: bool = true;
    const MAX_INJECT_SIZE: usize = 4096;
    const DEFAULT_CONTROL_PROGRESS: ProgressMode = ProgressMode::Auto;
    const DEFAULT_DATA_PROGRESS: ProgressMode = ProgressMode::Auto;
    const REQUIRES_LOCAL_KEY: bool = false;
    const PAGE_SIZE: usize = 4096;

    fn compute_remote_addr(base: u64, offset: u64) -> u64 {
        base + offset
    }

    fn provider_name() -> &'static str {
        "shm"
    }
}

/// TCP (sockets) provider; also the backing tag for [`crate::testing::MockBackend`]
/// since its semantics (no native atomics, byte-stream ordering) most
/// closely resemble this provider's defaults.
#[derive(Debug, Clone, Copy, Default)]
pub struct Tcp;
impl ProviderTag for Tcp {}
impl ProviderTraits for Tcp {
    const SUPPORTS_NATIVE_ATOMICS: bool = false;
    const SUPPORTS_INJECT: bool = false;
    const MAX_INJECT_SIZE: usize = 0;
    const DEFAULT_CONTROL_PROGRESS: ProgressMode = ProgressMode::Manual;
    const DEFAULT_DATA_PROGRESS: ProgressMode = ProgressMode::Manual;
    const REQUIRES_LOCAL_KEY: bool = false;
    const PAGE_SIZE: usize = 4096;

    fn compute_remote_addr(base: u64, offset: u64) -> u64 {
        base + offset
    }

    fn provider_name() -> &'static str {
        "tcp"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alignment_laws_hold_for_all_known_providers() {
        fn check<P: ProviderTraits>() {
            for base in [0usize, 1, 4095, 4096, 4097, 8192, 123_456] {
                let down = P::align_down(base);
                let up = P::align_up(base);
                assert_eq!(down % P::PAGE_SIZE, 0);
                assert!(down <= base);
                assert!(base <= up);
                assert!(up < down + 2 * P::PAGE_SIZE);
            }
            for (base, len) in [(0usize, 1usize), (10, 4090), (4096, 1), (1, 8191)] {
                assert!(P::aligned_length(base, len) >= len);
            }
        }
        check::<Verbs>();
        check::<Efa>();
        check::<Cxi>();
        check::<Shm>();
        check::<Tcp>();
    }

    #[test]
    fn staged_atomics_flag_is_consistent_with_native_support() {
        assert!(!Efa::uses_staged_atomics() == Efa::SUPPORTS_NATIVE_ATOMICS);
        assert!(Verbs::SUPPORTS_NATIVE_ATOMICS);
        assert!(!Verbs::uses_staged_atomics());
        assert!(Efa::uses_staged_atomics());
    }
}
