//! Reactor / CQ-polling service (spec.md §3/§4.I): the progress engine that
//! drains registered completion queues and dispatches each event back to
//! its [`SubmissionContext`].
//!
//! Grounded on the teacher corpus's reactor tick loop (`runtime::reactor`):
//! a short-held registration-list lock guards membership changes, but the
//! lock is never held while dispatching — a dispatch can itself register or
//! deregister a CQ without deadlocking.

use crate::backend::{EndpointId, FabricBackend};
use crate::context::SubmissionContext;
use crate::error::VoidResult;
use crate::queue::{CompletionEvent, CompletionQueue};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, Copy)]
pub struct ReactorOptions {
    pub poll_interval: Duration,
    pub max_completions_per_poll: usize,
    pub use_fd_polling: bool,
}

impl Default for ReactorOptions {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_micros(100),
            max_completions_per_poll: 16,
            use_fd_polling: false,
        }
    }
}

struct Registration {
    ep: EndpointId,
    backend: Arc<dyn FabricBackend>,
    cq: Arc<CompletionQueue>,
}

/// Polls every registered completion queue and dispatches its events.
/// Single-threaded-cooperative by design (spec.md §5): callers drive
/// [`Self::poll_once`] themselves, or hand the reactor to an executor that
/// calls it on a timer.
pub struct Reactor {
    options: ReactorOptions,
    registrations: parking_lot::Mutex<Vec<Registration>>,
    running: AtomicBool,
}

impl Reactor {
    pub fn new(options: ReactorOptions) -> Self {
        Self {
            options,
            registrations: parking_lot::Mutex::new(Vec::new()),
            running: AtomicBool::new(false),
        }
    }

    pub fn register_cq(&self, ep: EndpointId, backend: Arc<dyn FabricBackend>, cq: Arc<CompletionQueue>) {
        self.registrations.lock().push(Registration { ep, backend, cq });
    }

    pub fn deregister_cq(&self, cq: &Arc<CompletionQueue>) {
        self.registrations.lock().retain(|r| !Arc::ptr_eq(&r.cq, cq));
    }

    pub fn registration_count(&self) -> usize {
        self.registrations.lock().len()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Idempotent: starting an already-running reactor is a no-op.
    pub fn start(&self) -> VoidResult {
        self.running.store(true, Ordering::Release);
        Ok(())
    }

    /// Idempotent: stopping an already-stopped reactor is a no-op.
    pub fn stop(&self) -> VoidResult {
        self.running.store(false, Ordering::Release);
        Ok(())
    }

    /// One tick: for each registered CQ, pulls the backend's ready
    /// completions into it (bounded by `max_completions_per_poll`), then
    /// drains and dispatches what actually landed. Returns the number of
    /// completions dispatched this tick.
    ///
    /// The registration list is copied out under a short lock and the lock
    /// is dropped before any dispatch runs, so a dispatch that registers or
    /// deregisters a CQ (e.g. closing an endpoint from a completion
    /// callback) cannot deadlock against this call.
    pub fn poll_once(&self) -> usize {
        if !self.is_running() {
            return 0;
        }
        let regs: Vec<(EndpointId, Arc<dyn FabricBackend>, Arc<CompletionQueue>)> = {
            let guard = self.registrations.lock();
            guard
                .iter()
                .map(|r| (r.ep, Arc::clone(&r.backend), Arc::clone(&r.cq)))
                .collect()
        };

        let mut dispatched = 0;
        for (ep, backend, cq) in regs {
            backend.drive_progress(ep, &cq, self.options.max_completions_per_poll);
            let mut batch: Vec<Option<CompletionEvent>> =
                (0..self.options.max_completions_per_poll).map(|_| None).collect();
            let n = cq.poll_batch(&mut batch);
            for event in batch.into_iter().take(n).flatten() {
                if event.error.is_some() {
                    tracing::debug!(
                        target: "fabric_core::reactor",
                        ep = ep.0,
                        error = ?event.error,
                        "dispatching failed completion"
                    );
                }
                // SAFETY: `context_header` originated from a prior
                // `SubmissionContext::submit` call on an operation posted
                // against this same CQ; the reactor is the sole consumer
                // of completions drained from it.
                unsafe { SubmissionContext::dispatch(event.context_header, event) };
                dispatched += 1;
            }
        }
        dispatched
    }

    /// Repeatedly ticks until a round dispatches nothing, or `max_rounds`
    /// is reached. Useful in tests and for a caller that wants to drain a
    /// burst without wiring up a timer.
    pub fn run_until_idle(&self, max_rounds: usize) -> usize {
        let mut total = 0;
        for _ in 0..max_rounds {
            let n = self.poll_once();
            total += n;
            if n == 0 {
                break;
            }
        }
        total
    }

    /// Fork-support hook (spec.md §4.I): stop polling before `fork()` so no
    /// thread is mid-dispatch when the child's address space is copied.
    pub fn prepare_fork(&self) -> VoidResult {
        self.stop()
    }

    /// Resumes polling after `fork()` returns in either the parent or a
    /// child that intends to keep using this reactor.
    pub fn resume_after_fork(&self) -> VoidResult {
        self.start()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::av::AvHandle;
    use crate::backend::SendRequest;
    use crate::context::CallbackReceiver;
    use crate::queue::QueueAttr;
    use crate::testing::MockBackend;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn start_stop_are_idempotent() {
        let reactor = Reactor::new(ReactorOptions::default());
        reactor.start().unwrap();
        reactor.start().unwrap();
        assert!(reactor.is_running());
        reactor.stop().unwrap();
        reactor.stop().unwrap();
        assert!(!reactor.is_running());
    }

    #[test]
    fn poll_once_does_nothing_while_stopped() {
        let reactor = Reactor::new(ReactorOptions::default());
        assert_eq!(reactor.poll_once(), 0);
    }

    #[test]
    fn drains_under_backpressure_in_capped_batches() {
        // spec.md §8 scenario 5: 10 ready completions, cap 4 -> 4, 4, 2.
        let backend = Arc::new(MockBackend::new());
        let ep = backend.register_endpoint();
        let cq = Arc::new(CompletionQueue::create(QueueAttr { capacity: 64, ..Default::default() }, false));
        let reactor = Reactor::new(ReactorOptions { max_completions_per_poll: 4, ..Default::default() });
        reactor.register_cq(ep, backend.clone(), cq.clone());
        reactor.start().unwrap();

        let counter = Arc::new(AtomicUsize::new(0));
        let mut headers = Vec::new();
        for _ in 0..10 {
            let c = counter.clone();
            let receiver = CallbackReceiver::new(
                move |_| {
                    c.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                },
                |_| {},
                || {},
            );
            let ctx = SubmissionContext::new(Box::new(receiver));
            let header = SubmissionContext::submit(ctx);
            headers.push(header);
            backend
                .post_send(ep, SendRequest { dest: AvHandle::INVALID, buf: b"x", context_header: header })
                .unwrap();
        }

        assert_eq!(reactor.poll_once(), 4);
        assert_eq!(reactor.poll_once(), 4);
        assert_eq!(reactor.poll_once(), 2);
        assert_eq!(reactor.poll_once(), 0);
        assert_eq!(counter.load(std::sync::atomic::Ordering::SeqCst), 10);
    }
}
