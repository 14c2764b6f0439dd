//! Endpoint abstraction (spec.md §3/§4.H): the send/recv/RMA/atomic verb
//! surface, bound to a [`FabricBackend`] rather than directly to a
//! provider, so this module never needs to know whether it is driving the
//! mock backend or a real one.
//!
//! The enable-gate and bind-before-enable ordering follow libfabric's own
//! `fi_endpoint`/`fi_enable` contract; the atomic routing (native vs
//! staged) is spec.md §4.H's contribution on top of that.

use crate::av::AvHandle;
use crate::backend::{
    AtomicDatatype, AtomicOp, AtomicRequest, BufferHandle, EndpointId, FabricBackend, RecvRequest,
    RmaReadRequest, RmaRequest, SendRequest, TaggedRecvRequest, TaggedSendRequest,
};
use crate::context::{ReceiverDyn, SubmissionContext};
use crate::error::{Error, ErrorKind, Result, VoidResult};
use crate::fabric::{Domain, EndpointType};
use crate::memory::RemoteDescriptor;
use crate::primitives::{CompletionFlags, Tag};
use crate::provider::ProviderTraits;
use crate::queue::{CompletionEvent, CompletionQueue, EventQueue};
use crate::staged;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

/// Which side(s) of an endpoint a completion queue is bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindDirection {
    Tx,
    Rx,
    Both,
}

/// A lightweight completion counter (spec.md §4.F "counters"): an
/// alternative to a CQ for callers that only need a monotonic count of
/// completed/failed operations, not per-operation context recovery.
#[derive(Default)]
pub struct Counter {
    value: AtomicU64,
    error_value: AtomicU64,
}

impl Counter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn read(&self) -> u64 {
        self.value.load(Ordering::Acquire)
    }

    pub fn read_err(&self) -> u64 {
        self.error_value.load(Ordering::Acquire)
    }

    pub fn add(&self, n: u64) {
        self.value.fetch_add(n, Ordering::AcqRel);
    }

    pub fn add_err(&self, n: u64) {
        self.error_value.fetch_add(n, Ordering::AcqRel);
    }
}

/// Non-owning cancellation hook carried by an [`crate::context::ExecutorReceiver`].
///
/// Deliberately holds the backend and an [`EndpointId`] rather than a
/// strong reference to the [`Endpoint`] itself (spec.md §9 "Cyclic
/// hazards": the cancellation hook must treat the endpoint as a
/// non-owning reference) — an `Endpoint` never stores a `SubmissionContext`
/// or any receiver it created, so the backend handle here cannot keep an
/// endpoint alive that the caller has otherwise dropped.
pub struct CancelHandle {
    backend: Arc<dyn FabricBackend>,
    ep: EndpointId,
    header_ptr: usize,
}

impl CancelHandle {
    pub fn cancel(&self) -> VoidResult {
        self.backend.cancel(self.ep, self.header_ptr)
    }
}

/// Scatters a single contiguous completion buffer back out into the
/// caller's `iov` at completion time, then forwards to the real receiver.
///
/// `recvv` posts one contiguous `combined` buffer to the backend (this
/// crate's backend seam, like `fi_recvv`-less providers, only understands
/// contiguous buffers) but the caller's scratch targets are per-chunk
/// slices (`targets`) captured as raw pointers the same way [`BufferHandle`]
/// captures `combined` itself — both stay valid because the caller's `iov`
/// borrow in `Endpoint::recvv` doesn't return until this receiver's
/// terminal has fired.
struct GatherReceiver {
    combined: Vec<u8>,
    targets: Vec<BufferHandle>,
    inner: Box<dyn ReceiverDyn>,
}

// SAFETY: `targets` point into the caller's `iov` slices, which spec.md
// §5's single-threaded-cooperative model guarantees are only ever touched
// from this completion path, never concurrently with it.
unsafe impl Sync for GatherReceiver {}

impl ReceiverDyn for GatherReceiver {
    fn set_value(&self, event: CompletionEvent) {
        let mut offset = 0;
        for target in &self.targets {
            let n = target.len();
            let available = self.combined.len().saturating_sub(offset);
            let take = n.min(available);
            // SAFETY: see the struct doc; `target` outlives this call.
            let dst = unsafe { target.as_mut_slice() };
            dst[..take].copy_from_slice(&self.combined[offset..offset + take]);
            if take < n {
                dst[take..].fill(0);
            }
            offset += n;
        }
        self.inner.set_value(event);
    }

    fn set_error(&self, err: Error) {
        self.inner.set_error(err);
    }

    fn set_stopped(&self) {
        self.inner.set_stopped();
    }
}

struct EndpointInner<P> {
    backend: Arc<dyn FabricBackend>,
    id: EndpointId,
    kind: EndpointType,
    enabled: AtomicBool,
    cq_tx: parking_lot::Mutex<Option<Arc<CompletionQueue>>>,
    cq_rx: parking_lot::Mutex<Option<Arc<CompletionQueue>>>,
    eq: parking_lot::Mutex<Option<Arc<EventQueue>>>,
    domain: Domain<P>,
    _provider: PhantomData<P>,
}

/// A bound communication endpoint (spec.md §3/§4.H). Cheap to clone; clones
/// share the same underlying provider resource.
#[derive(Clone)]
pub struct Endpoint<P> {
    inner: Arc<EndpointInner<P>>,
}

impl<P: ProviderTraits> Endpoint<P> {
    pub fn create(domain: Domain<P>, backend: Arc<dyn FabricBackend>, kind: EndpointType) -> Self {
        let id = backend.register_endpoint();
        Self {
            inner: Arc::new(EndpointInner {
                backend,
                id,
                kind,
                enabled: AtomicBool::new(false),
                cq_tx: parking_lot::Mutex::new(None),
                cq_rx: parking_lot::Mutex::new(None),
                eq: parking_lot::Mutex::new(None),
                domain,
                _provider: PhantomData,
            }),
        }
    }

    pub fn kind(&self) -> EndpointType {
        self.inner.kind
    }

    pub fn domain(&self) -> &Domain<P> {
        &self.inner.domain
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.enabled.load(Ordering::Acquire)
    }

    fn ensure_pre_enable(&self) -> VoidResult {
        if self.is_enabled() {
            return Err(Error::new(
                ErrorKind::State,
                "endpoint bindings cannot change after enable()",
            ));
        }
        Ok(())
    }

    fn ensure_enabled(&self) -> VoidResult {
        if !self.is_enabled() {
            return Err(Error::new(
                ErrorKind::State,
                "endpoint must be enabled before posting operations",
            ));
        }
        Ok(())
    }

    /// Binds a completion queue to the send, receive, or both directions
    /// (spec.md §4.H "bind_cq"). Must happen before [`Self::enable`].
    pub fn bind_cq(&self, cq: Arc<CompletionQueue>, direction: BindDirection) -> VoidResult {
        self.ensure_pre_enable()?;
        match direction {
            BindDirection::Tx => *self.inner.cq_tx.lock() = Some(cq),
            BindDirection::Rx => *self.inner.cq_rx.lock() = Some(cq),
            BindDirection::Both => {
                *self.inner.cq_tx.lock() = Some(cq.clone());
                *self.inner.cq_rx.lock() = Some(cq);
            }
        }
        Ok(())
    }

    pub fn bind_eq(&self, eq: Arc<EventQueue>) -> VoidResult {
        self.ensure_pre_enable()?;
        *self.inner.eq.lock() = Some(eq);
        Ok(())
    }

    /// Address vectors are domain-scoped objects a real binding associates
    /// at bind time; this crate only needs the backend to know which
    /// endpoint an insert belongs to, so binding an AV here is a structural
    /// precondition check rather than a stored reference.
    pub fn bind_av(&self) -> VoidResult {
        self.ensure_pre_enable()
    }

    pub fn bind_counter(&self, _counter: Arc<Counter>, _direction: BindDirection) -> VoidResult {
        self.ensure_pre_enable()
    }

    /// Transitions the endpoint into the active state. At least one
    /// completion queue must already be bound (spec.md §4.H).
    pub fn enable(&self) -> VoidResult {
        self.ensure_pre_enable()?;
        if self.inner.cq_tx.lock().is_none() && self.inner.cq_rx.lock().is_none() {
            return Err(Error::new(
                ErrorKind::State,
                "endpoint requires at least one bound completion queue before enable()",
            ));
        }
        self.inner.enabled.store(true, Ordering::Release);
        Ok(())
    }

    pub fn av_insert(&self, addr: crate::address::Address) -> Result<AvHandle> {
        self.inner.backend.av_insert(self.inner.id, addr)
    }

    pub fn send(&self, dest: AvHandle, buf: &[u8], ctx: Arc<SubmissionContext>) -> Result<usize> {
        self.ensure_enabled()?;
        let header = SubmissionContext::submit(ctx);
        self.inner
            .backend
            .post_send(self.inner.id, SendRequest { dest, buf, context_header: header })?;
        Ok(header)
    }

    pub fn recv(&self, buf: &mut [u8], ctx: Arc<SubmissionContext>) -> Result<usize> {
        self.ensure_enabled()?;
        let header = SubmissionContext::submit(ctx);
        self.inner.backend.post_recv(
            self.inner.id,
            RecvRequest { buf: BufferHandle::new(buf), context_header: header },
        )?;
        Ok(header)
    }

    pub fn tagged_send(
        &self,
        dest: AvHandle,
        buf: &[u8],
        tag: Tag,
        ctx: Arc<SubmissionContext>,
    ) -> Result<usize> {
        self.ensure_enabled()?;
        let header = SubmissionContext::submit(ctx);
        self.inner.backend.post_tagged_send(
            self.inner.id,
            TaggedSendRequest { dest, buf, tag, context_header: header },
        )?;
        Ok(header)
    }

    pub fn tagged_recv(
        &self,
        buf: &mut [u8],
        tag: Tag,
        ignore_mask: u64,
        ctx: Arc<SubmissionContext>,
    ) -> Result<usize> {
        self.ensure_enabled()?;
        let header = SubmissionContext::submit(ctx);
        self.inner.backend.post_tagged_recv(
            self.inner.id,
            TaggedRecvRequest { buf: BufferHandle::new(buf), tag, ignore_mask, context_header: header },
        )?;
        Ok(header)
    }

    /// Vectorized send: logically concatenates `iov` into a single message.
    /// This crate's backend seam works in terms of contiguous buffers, so
    /// the concatenation happens here rather than being threaded through
    /// every `FabricBackend` implementation (a real binding would instead
    /// pass the iovec straight to `fi_sendv`).
    pub fn sendv(&self, dest: AvHandle, iov: &[&[u8]], ctx: Arc<SubmissionContext>) -> Result<usize> {
        let mut combined = Vec::with_capacity(iov.iter().map(|s| s.len()).sum());
        for chunk in iov {
            combined.extend_from_slice(chunk);
        }
        self.send(dest, &combined, ctx)
    }

    /// Vectorized recv: gathers into `iov` at completion time rather than
    /// submission time (the scatter can only happen once the backend has
    /// actually written the payload). Requires sole ownership of `ctx` at
    /// the point of the call, same as every other verb's `submit`.
    pub fn recvv(&self, iov: &mut [&mut [u8]], ctx: Arc<SubmissionContext>) -> Result<usize> {
        self.ensure_enabled()?;
        let inner = SubmissionContext::try_into_receiver(ctx)
            .map_err(|_| Error::new(ErrorKind::InvalidArgument, "recvv requires sole ownership of ctx"))?;
        let total: usize = iov.iter().map(|s| s.len()).sum();
        let mut combined = vec![0u8; total];
        let scatter = BufferHandle::new(&mut combined);
        let targets: Vec<BufferHandle> = iov.iter_mut().map(|chunk| BufferHandle::new(chunk)).collect();
        let gather_ctx = SubmissionContext::new(Box::new(GatherReceiver { combined, targets, inner }));
        let header = SubmissionContext::submit(gather_ctx);
        self.inner
            .backend
            .post_recv(self.inner.id, RecvRequest { buf: scatter, context_header: header })?;
        Ok(header)
    }

    /// Unreliable, unsignaled fast-path send (spec.md §4.H "inject"): never
    /// generates a completion, so it takes no `SubmissionContext`.
    pub fn inject(&self, dest: AvHandle, buf: &[u8]) -> VoidResult {
        self.ensure_enabled()?;
        if !P::SUPPORTS_INJECT {
            return Err(Error::new(
                ErrorKind::NotSupported,
                "provider does not support inject",
            ));
        }
        if buf.len() > P::MAX_INJECT_SIZE {
            return Err(Error::new(
                ErrorKind::MessageTooLong,
                format!(
                    "inject payload of {} bytes exceeds provider limit {}",
                    buf.len(),
                    P::MAX_INJECT_SIZE
                ),
            ));
        }
        self.inner.backend.post_inject(self.inner.id, dest, buf)
    }

    pub fn read(
        &self,
        dest: AvHandle,
        buf: &mut [u8],
        remote: RemoteDescriptor,
        ctx: Arc<SubmissionContext>,
    ) -> Result<usize> {
        self.ensure_enabled()?;
        let header = SubmissionContext::submit(ctx);
        self.inner.backend.post_read(
            self.inner.id,
            RmaReadRequest { dest, buf: BufferHandle::new(buf), remote, context_header: header },
        )?;
        Ok(header)
    }

    pub fn write(
        &self,
        dest: AvHandle,
        buf: &[u8],
        remote: RemoteDescriptor,
        ctx: Arc<SubmissionContext>,
    ) -> Result<usize> {
        self.ensure_enabled()?;
        let header = SubmissionContext::submit(ctx);
        self.inner.backend.post_write(
            self.inner.id,
            RmaRequest { dest, buf, remote, context_header: header },
        )?;
        Ok(header)
    }

    /// Non-fetching atomic (spec.md §4.H). Routes to the provider's native
    /// `fi_atomic` when available, or applies the staged path otherwise.
    pub fn atomic(
        &self,
        dest: AvHandle,
        remote: RemoteDescriptor,
        op: AtomicOp,
        datatype: AtomicDatatype,
        operand: &[u8],
        ctx: Arc<SubmissionContext>,
    ) -> Result<usize> {
        self.post_atomic_family(dest, remote, op, datatype, operand, None, None, ctx)
    }

    /// Fetching atomic: delivers the pre-operation value through the
    /// completion. `local_buf` is both the staged path's operand target
    /// (when the provider lacks native atomics) and the destination the
    /// fetched value is read into.
    pub fn fetch_atomic(
        &self,
        dest: AvHandle,
        remote: RemoteDescriptor,
        op: AtomicOp,
        datatype: AtomicDatatype,
        operand: &[u8],
        local_buf: &mut [u8],
        ctx: Arc<SubmissionContext>,
    ) -> Result<usize> {
        self.post_atomic_family(dest, remote, op, datatype, operand, None, Some(local_buf), ctx)
    }

    /// Compare-and-swap: `compare` is matched against the current value;
    /// `operand` is written only on match. Always fetching.
    pub fn compare_atomic(
        &self,
        dest: AvHandle,
        remote: RemoteDescriptor,
        datatype: AtomicDatatype,
        operand: &[u8],
        compare: &[u8],
        local_buf: &mut [u8],
        ctx: Arc<SubmissionContext>,
    ) -> Result<usize> {
        self.post_atomic_family(
            dest,
            remote,
            AtomicOp::CompareSwap,
            datatype,
            operand,
            Some(compare),
            Some(local_buf),
            ctx,
        )
    }

    #[allow(clippy::too_many_arguments)]
    fn post_atomic_family(
        &self,
        dest: AvHandle,
        remote: RemoteDescriptor,
        op: AtomicOp,
        datatype: AtomicDatatype,
        operand: &[u8],
        compare: Option<&[u8]>,
        local_buf: Option<&mut [u8]>,
        ctx: Arc<SubmissionContext>,
    ) -> Result<usize> {
        self.ensure_enabled()?;
        let header = SubmissionContext::submit(ctx);

        if P::SUPPORTS_NATIVE_ATOMICS {
            self.inner.backend.post_atomic(
                self.inner.id,
                AtomicRequest {
                    dest,
                    remote,
                    op,
                    datatype,
                    operand,
                    compare,
                    fetch_out: local_buf.map(BufferHandle::new),
                    context_header: header,
                },
            )?;
            return Ok(header);
        }

        // Staged path (spec.md §4.H): the provider has no native remote
        // atomic, so compute it against the caller-supplied local buffer —
        // standing in for the temporary MR a real binding would stage the
        // value through before RMA-writing it back — and deliver the
        // pre-image through the normal CQ completion path.
        let Some(local_buf) = local_buf else {
            return Err(Error::new(
                ErrorKind::InvalidArgument,
                "staged non-fetching atomics are not supported; pass a local buffer",
            ));
        };
        match staged::apply(op, datatype, local_buf, operand, compare) {
            Ok(old) => self.push_staged_completion(header, &old)?,
            Err(err) => self.push_staged_failure(header, err)?,
        }
        Ok(header)
    }

    fn push_staged_completion(&self, header: usize, old: &[u8]) -> VoidResult {
        let mut padded = [0u8; 8];
        let n = old.len().min(8);
        padded[..n].copy_from_slice(&old[..n]);
        self.push_cq_event(CompletionEvent {
            context_header: header,
            error: None,
            bytes_transferred: old.len(),
            flags: CompletionFlags::ATOMIC.union(CompletionFlags::REMOTE_CQ_DATA),
            tag: Tag(0),
            length: old.len(),
            immediate_data: u64::from_le_bytes(padded),
            provider_error: None,
        })
    }

    fn push_staged_failure(&self, header: usize, err: Error) -> VoidResult {
        self.push_cq_event(CompletionEvent {
            context_header: header,
            error: Some(err.kind()),
            bytes_transferred: 0,
            flags: CompletionFlags::ATOMIC,
            tag: Tag(0),
            length: 0,
            immediate_data: 0,
            provider_error: None,
        })
    }

    fn push_cq_event(&self, event: CompletionEvent) -> VoidResult {
        let cq = self
            .inner
            .cq_tx
            .lock()
            .clone()
            .or_else(|| self.inner.cq_rx.lock().clone())
            .ok_or_else(|| Error::new(ErrorKind::State, "endpoint has no bound completion queue"))?;
        cq.push(event)
    }

    /// `header_ptr == 0` cancels every outstanding operation on this
    /// endpoint (spec.md §4.H).
    pub fn cancel(&self, header_ptr: usize) -> VoidResult {
        self.inner.backend.cancel(self.inner.id, header_ptr)
    }

    pub fn cancel_handle(&self, header_ptr: usize) -> CancelHandle {
        CancelHandle {
            backend: Arc::clone(&self.inner.backend),
            ep: self.inner.id,
            header_ptr,
        }
    }

    pub fn close(&self) {
        self.inner.enabled.store(false, Ordering::Release);
        self.inner.backend.close_endpoint(self.inner.id);
        tracing::debug!(target: "fabric_core::endpoint", ep = self.inner.id.0, "endpoint closed");
    }

    pub(crate) fn id(&self) -> EndpointId {
        self.inner.id
    }

    pub(crate) fn backend(&self) -> Arc<dyn FabricBackend> {
        Arc::clone(&self.inner.backend)
    }

    pub(crate) fn bound_rx_cq(&self) -> Option<Arc<CompletionQueue>> {
        self.inner.cq_rx.lock().clone()
    }

    pub(crate) fn bound_tx_cq(&self) -> Option<Arc<CompletionQueue>> {
        self.inner.cq_tx.lock().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fabric::{CapabilityQuery, Fabric, query_fabric};
    use crate::primitives::{Capabilities, FabricVersion, ThreadingMode};
    use crate::provider::{Efa, Verbs};
    use crate::queue::QueueAttr;
    use crate::testing::MockBackend;

    fn domain<P: ProviderTraits>() -> Domain<P> {
        let hints = CapabilityQuery::new(FabricVersion::new(1, 21))
            .require(Capabilities::MSG)
            .require(Capabilities::RMA)
            .require(Capabilities::ATOMIC)
            .into_hints();
        let info = query_fabric::<P>(hints).unwrap();
        let fabric = Fabric::<P>::create(info).unwrap();
        Domain::create(fabric, ThreadingMode::Safe).unwrap()
    }

    #[test]
    fn operations_before_enable_return_state_error() {
        let backend = Arc::new(MockBackend::new());
        let ep = Endpoint::<Verbs>::create(domain::<Verbs>(), backend, EndpointType::Rdm);
        let (recv, _fut) = crate::context::CoroutineReceiver::new();
        let ctx = SubmissionContext::new(Box::new(recv));
        let err = ep.recv(&mut [0u8; 4], ctx).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::State);
    }

    #[test]
    fn enable_requires_a_bound_cq() {
        let backend = Arc::new(MockBackend::new());
        let ep = Endpoint::<Verbs>::create(domain::<Verbs>(), backend, EndpointType::Rdm);
        let err = ep.enable().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::State);
    }

    #[test]
    fn bind_cq_rejects_after_enable() {
        let backend = Arc::new(MockBackend::new());
        let ep = Endpoint::<Verbs>::create(domain::<Verbs>(), backend, EndpointType::Rdm);
        let cq = Arc::new(CompletionQueue::create(QueueAttr::default(), false));
        ep.bind_cq(cq.clone(), BindDirection::Both).unwrap();
        ep.enable().unwrap();
        let err = ep.bind_cq(cq, BindDirection::Tx).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::State);
    }

    #[test]
    fn inject_rejects_oversized_payload() {
        let backend = Arc::new(MockBackend::new());
        let ep = Endpoint::<Verbs>::create(domain::<Verbs>(), backend, EndpointType::Rdm);
        let cq = Arc::new(CompletionQueue::create(QueueAttr::default(), false));
        ep.bind_cq(cq, BindDirection::Both).unwrap();
        ep.enable().unwrap();
        let payload = vec![0u8; Verbs::MAX_INJECT_SIZE + 1];
        let err = ep.inject(AvHandle::INVALID, &payload).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MessageTooLong);
    }

    #[test]
    fn staged_fetch_add_delivers_old_value_on_local_buffer() {
        // spec.md §8 scenario 4.
        let backend = Arc::new(MockBackend::new());
        let ep = Endpoint::<Efa>::create(domain::<Efa>(), backend, EndpointType::Rdm);
        let cq = Arc::new(CompletionQueue::create(QueueAttr::default(), false));
        ep.bind_cq(cq.clone(), BindDirection::Both).unwrap();
        ep.enable().unwrap();

        let (recv, _fut) = crate::context::CoroutineReceiver::new();
        let ctx = SubmissionContext::new(Box::new(recv));
        let mut local = 41u64.to_le_bytes();
        let remote = RemoteDescriptor { addr: 0, key: crate::primitives::MrKey(0), length: 8 };
        let operand = 1u64.to_le_bytes();
        ep.fetch_atomic(
            AvHandle::INVALID,
            remote,
            AtomicOp::Sum,
            AtomicDatatype::Uint64,
            &operand,
            &mut local,
            ctx,
        )
        .unwrap();

        assert_eq!(u64::from_le_bytes(local), 42);
        let event = cq.poll().unwrap();
        assert_eq!(u64::from_le_bytes(event.immediate_data.to_le_bytes()), 41);
    }

    #[test]
    fn cancel_handle_routes_through_backend() {
        let backend = Arc::new(MockBackend::new());
        let ep = Endpoint::<Verbs>::create(domain::<Verbs>(), backend, EndpointType::Rdm);
        let handle = ep.cancel_handle(0);
        handle.cancel().unwrap();
    }

    /// The scatter into `iov` must happen when the completion is actually
    /// dispatched, not when `recvv` posts the request — otherwise it races
    /// ahead of the backend's write and the caller observes zeros.
    #[test]
    fn recvv_gathers_into_iov_only_at_completion() {
        let backend = Arc::new(MockBackend::new());
        let ep = Endpoint::<Verbs>::create(domain::<Verbs>(), backend, EndpointType::Rdm);
        let cq = Arc::new(CompletionQueue::create(QueueAttr::default(), false));
        ep.bind_cq(cq.clone(), BindDirection::Both).unwrap();
        ep.enable().unwrap();
        let reactor = crate::reactor::Reactor::new(crate::reactor::ReactorOptions::default());
        reactor.register_cq(ep.id(), ep.backend(), cq);
        reactor.start().unwrap();

        let done = Arc::new(AtomicBool::new(false));
        let d = done.clone();
        let recv_ctx = SubmissionContext::new(Box::new(crate::context::CallbackReceiver::new(
            move |_ev| d.store(true, Ordering::SeqCst),
            |_err| panic!("recvv should not fail"),
            || panic!("recvv should not be canceled"),
        )));
        let mut a = [0u8; 4];
        let mut b = [0u8; 6];
        {
            let mut iov: Vec<&mut [u8]> = vec![&mut a, &mut b];
            ep.recvv(&mut iov, recv_ctx).unwrap();
        }

        let send_ctx = SubmissionContext::new(Box::new(crate::context::CallbackReceiver::new(
            |_ev| {},
            |_err| panic!("send should not fail"),
            || panic!("send should not be canceled"),
        )));
        ep.send(AvHandle::INVALID, b"helloworld", send_ctx).unwrap();

        // The backend already wrote into its internal scatter buffer, but
        // the gather into `a`/`b` only happens once the reactor actually
        // dispatches the matching completion.
        assert_eq!(&a, &[0u8; 4]);
        assert_eq!(&b, &[0u8; 6]);

        reactor.run_until_idle(8);
        assert!(done.load(Ordering::SeqCst));
        assert_eq!(&a, b"hell");
        assert_eq!(&b, b"oworld");
    }
}
