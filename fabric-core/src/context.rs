//! Submission context (spec.md §3/§4.G): the linchpin that bridges a raw
//! fabric completion back to one of several receiver styles.
//!
//! Grounded on the teacher corpus's task-handle plumbing
//! (`runtime::task::{TaskHandle, JoinHandle}`): a small object-safe trait
//! (here, [`ReceiverDyn`]) lets the poller "recover some context" without
//! knowing which concrete receiver variant it holds, while the
//! receiver-specific structs (`CallbackReceiver`, `CoroutineReceiver`,
//! `PromiseReceiver`, `ExecutorReceiver`) stay closed, non-virtual variants
//! — matching spec.md §9's "tagged-variant receivers... use a single erased
//! base only for the poller's recover step".

use crate::endpoint::CancelHandle;
use crate::error::{Error, ErrorKind};
use crate::queue::CompletionEvent;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context as TaskCx, Poll, Waker};

/// The provider-compatible context header every submission carries as its
/// first member. The first slot is reserved for the self-back-pointer
/// written at construction and never mutated afterwards (spec.md §4.G
/// invariant 1). Shaped like libfabric's two-pointer `fi_context2`.
#[repr(C)]
pub struct ProviderContextHeader {
    self_ptr: AtomicUsize,
    _reserved: usize,
}

impl ProviderContextHeader {
    fn new() -> Self {
        Self {
            self_ptr: AtomicUsize::new(0),
            _reserved: 0,
        }
    }

    pub fn as_usize(&self) -> usize {
        self as *const Self as usize
    }
}

/// Object-safe terminal sink so the poller can drive any receiver variant
/// without matching on it (spec.md §9 "single erased base").
pub trait ReceiverDyn: Send + Sync {
    fn set_value(&self, event: CompletionEvent);
    fn set_error(&self, err: Error);
    fn set_stopped(&self);
}

/// Callback receiver: stores user-provided closures for each terminal.
pub struct CallbackReceiver {
    on_value: Mutex<Option<Box<dyn FnOnce(CompletionEvent) + Send>>>,
    on_error: Mutex<Option<Box<dyn FnOnce(Error) + Send>>>,
    on_stopped: Mutex<Option<Box<dyn FnOnce() + Send>>>,
}

impl CallbackReceiver {
    pub fn new(
        on_value: impl FnOnce(CompletionEvent) + Send + 'static,
        on_error: impl FnOnce(Error) + Send + 'static,
        on_stopped: impl FnOnce() + Send + 'static,
    ) -> Self {
        Self {
            on_value: Mutex::new(Some(Box::new(on_value))),
            on_error: Mutex::new(Some(Box::new(on_error))),
            on_stopped: Mutex::new(Some(Box::new(on_stopped))),
        }
    }
}

impl ReceiverDyn for CallbackReceiver {
    fn set_value(&self, event: CompletionEvent) {
        if let Some(f) = self.on_value.lock().unwrap().take() {
            f(event);
        }
    }

    fn set_error(&self, err: Error) {
        if let Some(f) = self.on_error.lock().unwrap().take() {
            f(err);
        }
    }

    fn set_stopped(&self) {
        if let Some(f) = self.on_stopped.lock().unwrap().take() {
            f();
        }
    }
}

/// Result slot shared between a [`CoroutineReceiver`] and the `Future` that
/// polls it — the coroutine-as-future bridge most Rust executors actually
/// want, since bare "resume handles" are an `std::future::Future` waker
/// under the hood.
struct CoroutineSlot {
    result: Mutex<Option<std::result::Result<CompletionEvent, CoroutineOutcome>>>,
    waker: Mutex<Option<Waker>>,
}

#[derive(Debug, Clone)]
pub enum CoroutineOutcome {
    Error(ErrorSnapshot),
    Stopped,
}

/// `Error` isn't `Clone` (it can box an arbitrary cause); the snapshot kept
/// in the coroutine slot captures just the reconstructible parts.
#[derive(Debug, Clone)]
pub struct ErrorSnapshot {
    pub kind: ErrorKind,
    pub message: String,
}

impl From<&Error> for ErrorSnapshot {
    fn from(e: &Error) -> Self {
        Self {
            kind: e.kind(),
            message: e.message().to_string(),
        }
    }
}

/// Coroutine receiver: stores a resume point (a [`Waker`]) and a result
/// slot; terminals write the result and wake the suspended future.
pub struct CoroutineReceiver {
    slot: Arc<CoroutineSlot>,
}

impl CoroutineReceiver {
    pub fn new() -> (Self, CompletionFuture) {
        let slot = Arc::new(CoroutineSlot {
            result: Mutex::new(None),
            waker: Mutex::new(None),
        });
        (
            Self { slot: slot.clone() },
            CompletionFuture { slot },
        )
    }
}

impl ReceiverDyn for CoroutineReceiver {
    fn set_value(&self, event: CompletionEvent) {
        *self.slot.result.lock().unwrap() = Some(Ok(event));
        if let Some(w) = self.slot.waker.lock().unwrap().take() {
            w.wake();
        }
    }

    fn set_error(&self, err: Error) {
        *self.slot.result.lock().unwrap() = Some(Err(CoroutineOutcome::Error((&err).into())));
        if let Some(w) = self.slot.waker.lock().unwrap().take() {
            w.wake();
        }
    }

    fn set_stopped(&self) {
        *self.slot.result.lock().unwrap() = Some(Err(CoroutineOutcome::Stopped));
        if let Some(w) = self.slot.waker.lock().unwrap().take() {
            w.wake();
        }
    }
}

/// The `Future` a caller actually `.await`s; resumed from
/// [`CoroutineReceiver`]'s terminal calls.
pub struct CompletionFuture {
    slot: Arc<CoroutineSlot>,
}

impl std::future::Future for CompletionFuture {
    type Output = std::result::Result<CompletionEvent, CoroutineOutcome>;

    fn poll(self: Pin<&mut Self>, cx: &mut TaskCx<'_>) -> Poll<Self::Output> {
        let mut result = self.slot.result.lock().unwrap();
        if let Some(outcome) = result.take() {
            return Poll::Ready(outcome);
        }
        *self.slot.waker.lock().unwrap() = Some(cx.waker().clone());
        Poll::Pending
    }
}

/// Promise receiver: fulfills a oneshot-style future. `set_error` maps to
/// the canonical error; `set_stopped` maps to [`ErrorKind::Canceled`]
/// (spec.md §4.G.3 "operation_canceled").
///
/// Gated on `runtime-tokio` like [`TokioExecutor`]: the oneshot channel it
/// wraps comes from `tokio::sync`, which is only pulled in by that feature.
#[cfg(feature = "runtime-tokio")]
pub struct PromiseReceiver {
    tx: Mutex<Option<tokio::sync::oneshot::Sender<crate::error::Result<CompletionEvent>>>>,
}

#[cfg(feature = "runtime-tokio")]
impl PromiseReceiver {
    pub fn new() -> (Self, tokio::sync::oneshot::Receiver<crate::error::Result<CompletionEvent>>) {
        let (tx, rx) = tokio::sync::oneshot::channel();
        (
            Self {
                tx: Mutex::new(Some(tx)),
            },
            rx,
        )
    }
}

#[cfg(feature = "runtime-tokio")]
impl ReceiverDyn for PromiseReceiver {
    fn set_value(&self, event: CompletionEvent) {
        if let Some(tx) = self.tx.lock().unwrap().take() {
            let _ = tx.send(Ok(event));
        }
    }

    fn set_error(&self, err: Error) {
        if let Some(tx) = self.tx.lock().unwrap().take() {
            let _ = tx.send(Err(err));
        }
    }

    fn set_stopped(&self) {
        if let Some(tx) = self.tx.lock().unwrap().take() {
            let _ = tx.send(Err(Error::canceled()));
        }
    }
}

/// An object with a `dispatch` primitive — the Asio-style executor
/// abstraction spec.md §4.G.3 asks for. Grounded on the teacher corpus's
/// `TaskExecutor` contract (`runtime::executor::TaskExecutor`), narrowed
/// from "spawn a future" to "dispatch a completed closure", which is all
/// the executor-dispatching receiver needs.
pub trait Executor: Send + Sync {
    fn dispatch(&self, f: Box<dyn FnOnce() + Send>);
}

#[cfg(feature = "runtime-tokio")]
pub struct TokioExecutor {
    handle: tokio::runtime::Handle,
}

#[cfg(feature = "runtime-tokio")]
impl TokioExecutor {
    pub fn current() -> Self {
        Self {
            handle: tokio::runtime::Handle::current(),
        }
    }
}

#[cfg(feature = "runtime-tokio")]
impl Executor for TokioExecutor {
    fn dispatch(&self, f: Box<dyn FnOnce() + Send>) {
        self.handle.spawn_blocking(f);
    }
}

/// Executor-dispatching receiver: captures a handler, an executor, and a
/// cancellation slot (spec.md §4.G.3/4).
///
/// Per spec.md §4.G.3, self-destruction must happen *before*
/// `executor.dispatch` runs the handler, so re-entrancy inside the handler
/// can never observe the context alive. This receiver doesn't need to do
/// anything special to get that: [`SubmissionContext::dispatch`] itself
/// unwraps and drops the owning `Arc<SubmissionContext>` before calling
/// into any receiver's terminal, for every receiver variant, not just this
/// one.
pub struct ExecutorReceiver<H>
where
    H: FnOnce(crate::error::Result<CompletionEvent>) + Send + 'static,
{
    handler: Mutex<Option<H>>,
    executor: Arc<dyn Executor>,
    cancel_handle: Mutex<Option<CancelHandle>>,
}

impl<H> ExecutorReceiver<H>
where
    H: FnOnce(crate::error::Result<CompletionEvent>) + Send + 'static,
{
    /// Builds the receiver and a paired [`ExecutorCancelToken`] (spec.md
    /// §4.G.4 "installs on the handler's cancellation slot a closure").
    /// The receiver is `Arc`-owned rather than boxed directly so the token
    /// can keep a handle to it after it's been handed to
    /// [`SubmissionContext::new`] — mirrors [`CoroutineReceiver::new`]'s
    /// receiver/handle pairing.
    pub fn new(
        handler: H,
        executor: Arc<dyn Executor>,
        cancel_handle: Option<CancelHandle>,
    ) -> (Arc<Self>, ExecutorCancelToken<H>) {
        let receiver = Arc::new(Self {
            handler: Mutex::new(Some(handler)),
            executor,
            cancel_handle: Mutex::new(cancel_handle),
        });
        let token = ExecutorCancelToken { receiver: Arc::clone(&receiver) };
        (receiver, token)
    }

    /// Installs the cancellation hook. Firing it calls `endpoint.cancel`
    /// against the stored header; errors from `cancel` are swallowed
    /// because the completion path delivers the canonical outcome
    /// (spec.md §4.G.4).
    fn fire_cancellation(&self) {
        if let Some(handle) = self.cancel_handle.lock().unwrap().take() {
            let _ = handle.cancel();
        }
    }

    fn dispatch_terminal(&self, outcome: crate::error::Result<CompletionEvent>) {
        let handler = self.handler.lock().unwrap().take();
        if let Some(handler) = handler {
            self.executor.dispatch(Box::new(move || handler(outcome)));
        }
    }
}

impl<H> ReceiverDyn for ExecutorReceiver<H>
where
    H: FnOnce(crate::error::Result<CompletionEvent>) + Send + 'static,
{
    fn set_value(&self, event: CompletionEvent) {
        self.dispatch_terminal(Ok(event));
    }

    fn set_error(&self, err: Error) {
        self.dispatch_terminal(Err(err));
    }

    fn set_stopped(&self) {
        self.dispatch_terminal(Err(Error::canceled()));
    }
}

/// `Arc<ExecutorReceiver<H>>` is itself a valid [`ReceiverDyn`], forwarding
/// to the inner receiver's terminals — this is what lets
/// [`ExecutorReceiver::new`] hand one strong reference to
/// [`SubmissionContext::new`] while [`ExecutorCancelToken`] keeps another.
impl<H> ReceiverDyn for Arc<ExecutorReceiver<H>>
where
    H: FnOnce(crate::error::Result<CompletionEvent>) + Send + 'static,
{
    fn set_value(&self, event: CompletionEvent) {
        ExecutorReceiver::set_value(self, event);
    }

    fn set_error(&self, err: Error) {
        ExecutorReceiver::set_error(self, err);
    }

    fn set_stopped(&self) {
        ExecutorReceiver::set_stopped(self);
    }
}

/// Handle returned alongside an [`ExecutorReceiver`] for firing its
/// cancellation slot from outside the completion path (spec.md §4.G.4).
pub struct ExecutorCancelToken<H>
where
    H: FnOnce(crate::error::Result<CompletionEvent>) + Send + 'static,
{
    receiver: Arc<ExecutorReceiver<H>>,
}

impl<H> ExecutorCancelToken<H>
where
    H: FnOnce(crate::error::Result<CompletionEvent>) + Send + 'static,
{
    pub fn cancel(&self) {
        self.receiver.fire_cancellation();
    }
}

/// Lifecycle guard: exactly one of the three terminals fires, exactly once
/// (spec.md §8 "Terminal exclusivity").
struct TerminalGuard {
    fired: AtomicBool,
}

impl TerminalGuard {
    fn new() -> Self {
        Self {
            fired: AtomicBool::new(false),
        }
    }

    /// Returns `true` the first time it's called; `false` on every
    /// subsequent call, regardless of which terminal invoked it.
    fn claim(&self) -> bool {
        self.fired
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

/// The pinned per-operation object (spec.md §4.G). Heap-allocated behind an
/// `Arc` and never moved after construction — the header's self-pointer is
/// computed from the heap address at construction and is therefore stable
/// for the object's lifetime, satisfying "never stack-allocated"
/// (spec.md §9 "Ownership across the fabric boundary").
pub struct SubmissionContext {
    pub header: ProviderContextHeader,
    receiver: Box<dyn ReceiverDyn>,
    guard: TerminalGuard,
}

impl SubmissionContext {
    /// Allocates a pinned context on the heap. The header's self-pointer
    /// slot is left unset until [`Self::submit`] hands the context off to
    /// the fabric (spec.md §4.G invariant 1).
    pub fn new(receiver: Box<dyn ReceiverDyn>) -> Arc<Self> {
        Arc::new(Self {
            header: ProviderContextHeader::new(),
            receiver,
            guard: TerminalGuard::new(),
        })
    }

    pub fn header_ptr(&self) -> usize {
        &self.header as *const ProviderContextHeader as usize
    }

    /// Hands the context off to the fabric: writes the self-back-pointer
    /// into the header and converts the `Arc` into a raw pointer the
    /// fabric call's context argument carries. Ownership is now held by
    /// that raw pointer alone — conceptually "owned by the fabric" per
    /// spec.md §4.G — until [`Self::dispatch`] reclaims it.
    ///
    /// Returns the `context_header` pointer value the provider call should
    /// be given, and which will come back unchanged in the completion.
    pub fn submit(ctx: Arc<Self>) -> usize {
        let raw = Arc::into_raw(ctx);
        let self_ptr = raw as usize;
        // SAFETY: `raw` was just produced by `Arc::into_raw` and nothing
        // else has observed or freed it yet.
        unsafe {
            (*raw).header.self_ptr.store(self_ptr, Ordering::Release);
            (*raw).header_ptr()
        }
    }

    /// Recovers the owning `SubmissionContext` from a completion's
    /// `context_header` pointer (spec.md §8 "Context round-trip"),
    /// reclaiming the single strong reference [`Self::submit`] leaked into
    /// the raw pointer.
    ///
    /// # Safety contract
    /// `header_ptr` must be a value previously returned by
    /// [`Self::submit`] (via the header it wrote into), and this function
    /// must be called at most once per `submit` call — exactly the
    /// contract a well-behaved provider's completion delivery satisfies.
    pub unsafe fn recover_from_header(header_ptr: usize) -> Option<Arc<Self>> {
        if header_ptr == 0 {
            return None;
        }
        let header = &*(header_ptr as *const ProviderContextHeader);
        let self_ptr = header.self_ptr.load(Ordering::Acquire);
        if self_ptr == 0 {
            return None;
        }
        Some(Arc::from_raw(self_ptr as *const Self))
    }

    /// `dispatch(header_ptr, event)` (spec.md §4.G.5): recovers the context,
    /// drops it, then invokes exactly one terminal on the receiver it held
    /// — in that order, so a handler that re-enters the fabric (posts a new
    /// operation, inspects the endpoint) never observes its own
    /// now-completed `SubmissionContext` still alive (spec.md §4.G.3).
    /// `Self::recover_from_header` hands back the sole strong reference
    /// [`Self::submit`] leaked into the raw pointer, so `Arc::try_unwrap`
    /// here always succeeds unless a caller broke the single-owner
    /// contract by cloning the `Arc` before submission; in that
    /// (unsupported) case we fall back to dispatching through the shared
    /// reference rather than panicking.
    ///
    /// The internal [`TerminalGuard`] defends against a single provider
    /// completion being observed twice within the same dispatch call (e.g.
    /// a defensive re-poll); it cannot make a *second, independent*
    /// `dispatch` call over an already-reclaimed pointer safe, since the
    /// context is freed the moment the first call returns. Spec.md §5's
    /// single-threaded-cooperative scheduling model is what actually
    /// guarantees a well-behaved provider never does that.
    ///
    /// # Safety
    /// Same contract as [`Self::recover_from_header`].
    pub unsafe fn dispatch(header_ptr: usize, event: CompletionEvent) {
        let Some(ctx) = Self::recover_from_header(header_ptr) else {
            return;
        };
        if !ctx.guard.claim() {
            return;
        }
        match Arc::try_unwrap(ctx) {
            Ok(inner) => fire_terminal(&*inner.receiver, event),
            Err(ctx) => fire_terminal(&*ctx.receiver, event),
        }
    }

    /// Decomposes a solely-owned context into its receiver, for callers
    /// that need to rewrap it (e.g. `Endpoint::recvv`'s gather-at-completion
    /// receiver) before submission. Returns the `Arc` back unchanged if
    /// another strong reference exists.
    pub(crate) fn try_into_receiver(ctx: Arc<Self>) -> std::result::Result<Box<dyn ReceiverDyn>, Arc<Self>> {
        Arc::try_unwrap(ctx).map(|inner| inner.receiver)
    }
}

fn fire_terminal(receiver: &dyn ReceiverDyn, event: CompletionEvent) {
    match event.error {
        Some(ErrorKind::Canceled) => receiver.set_stopped(),
        Some(kind) => receiver.set_error(Error::new(kind, "completion reported error")),
        None => receiver.set_value(event),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::primitives::{CompletionFlags, Tag};
    use std::sync::atomic::AtomicU32;

    fn sample_event(ctx: usize) -> CompletionEvent {
        CompletionEvent {
            context_header: ctx,
            error: None,
            bytes_transferred: 4,
            flags: CompletionFlags::SEND,
            tag: Tag(0),
            length: 4,
            immediate_data: 0,
            provider_error: None,
        }
    }

    #[test]
    fn context_round_trip() {
        let receiver = CallbackReceiver::new(|_ev| {}, |_err| {}, || {});
        let ctx = SubmissionContext::new(Box::new(receiver));
        let original_addr = Arc::as_ptr(&ctx) as usize;
        let header_ptr = SubmissionContext::submit(ctx);

        let recovered = unsafe { SubmissionContext::recover_from_header(header_ptr) }.unwrap();
        assert_eq!(Arc::as_ptr(&recovered) as usize, original_addr);
    }

    #[test]
    fn terminal_guard_claims_exactly_once() {
        let guard = TerminalGuard::new();
        assert!(guard.claim());
        assert!(!guard.claim());
        assert!(!guard.claim());
    }

    #[test]
    fn dispatch_invokes_exactly_one_terminal() {
        let count = Arc::new(AtomicU32::new(0));
        let c1 = count.clone();
        let c2 = count.clone();
        let c3 = count.clone();
        let receiver = CallbackReceiver::new(
            move |_| {
                c1.fetch_add(1, Ordering::SeqCst);
            },
            move |_| {
                c2.fetch_add(1, Ordering::SeqCst);
            },
            move || {
                c3.fetch_add(1, Ordering::SeqCst);
            },
        );
        let ctx = SubmissionContext::new(Box::new(receiver));
        let header_ptr = SubmissionContext::submit(ctx);

        unsafe {
            SubmissionContext::dispatch(header_ptr, sample_event(header_ptr));
        }
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    struct InlineExecutor;

    impl Executor for InlineExecutor {
        fn dispatch(&self, f: Box<dyn FnOnce() + Send>) {
            f();
        }
    }

    /// spec.md §4.G.3: re-entrancy inside the handler must never observe
    /// the `SubmissionContext` still alive. An inline (synchronous)
    /// executor is exactly the case the default `TokioExecutor` hides,
    /// since `spawn_blocking` always runs the handler later.
    #[test]
    fn dispatch_releases_context_before_invoking_handler() {
        let weak_slot: Arc<Mutex<Option<std::sync::Weak<SubmissionContext>>>> = Arc::new(Mutex::new(None));
        let slot_for_handler = weak_slot.clone();
        let context_still_alive = Arc::new(AtomicBool::new(true));
        let observed = context_still_alive.clone();

        let (receiver, _token) = ExecutorReceiver::new(
            move |_outcome: crate::error::Result<CompletionEvent>| {
                let weak = slot_for_handler.lock().unwrap().clone().unwrap();
                observed.store(weak.upgrade().is_some(), Ordering::SeqCst);
            },
            Arc::new(InlineExecutor) as Arc<dyn Executor>,
            None,
        );
        let ctx = SubmissionContext::new(Box::new(receiver));
        *weak_slot.lock().unwrap() = Some(Arc::downgrade(&ctx));
        let header_ptr = SubmissionContext::submit(ctx);

        unsafe {
            SubmissionContext::dispatch(header_ptr, sample_event(header_ptr));
        }
        assert!(!context_still_alive.load(Ordering::SeqCst));
    }

    #[test]
    fn executor_cancel_token_is_reachable() {
        let (_receiver, token) = ExecutorReceiver::new(
            |_outcome: crate::error::Result<CompletionEvent>| {},
            Arc::new(InlineExecutor) as Arc<dyn Executor>,
            None,
        );
        // No cancel handle was installed; firing the token is a no-op
        // rather than a panic, and can be called more than once.
        token.cancel();
        token.cancel();
    }

    #[tokio::test]
    async fn coroutine_receiver_resumes_future() {
        let (receiver, fut) = CoroutineReceiver::new();
        let ctx = SubmissionContext::new(Box::new(receiver));
        let header_ptr = SubmissionContext::submit(ctx);
        let join = tokio::spawn(async move { fut.await });
        tokio::task::yield_now().await;
        unsafe {
            SubmissionContext::dispatch(header_ptr, sample_event(header_ptr));
        }
        let outcome = join.await.unwrap();
        assert!(outcome.is_ok());
    }

    #[cfg(feature = "runtime-tokio")]
    #[tokio::test]
    async fn promise_receiver_resolves_future() {
        let (receiver, rx) = PromiseReceiver::new();
        let ctx = SubmissionContext::new(Box::new(receiver));
        let header_ptr = SubmissionContext::submit(ctx);
        unsafe {
            SubmissionContext::dispatch(
                header_ptr,
                CompletionEvent {
                    error: Some(ErrorKind::Timeout),
                    ..sample_event(header_ptr)
                },
            );
        }
        let result = rx.await.unwrap();
        assert_eq!(result.unwrap_err().kind(), ErrorKind::Timeout);
    }
}
