//! Completion queue & event queue (spec.md §3/§4.F).
//!
//! Both are bounded FIFOs created from a domain (CQ) or fabric (EQ) with an
//! attribute record. The queue itself is backend-agnostic: it holds
//! whatever [`CompletionEvent`]/[`ControlEvent`] the [`crate::testing`]
//! mock (or, eventually, a real libfabric binding) pushes into it.

use crate::error::{Error, ErrorKind, Result};
use crate::primitives::{CompletionFlags, Tag};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// Raw provider-error block attached to a failed completion (spec.md §3/§6).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProviderErrorBlock {
    pub prov_errno: i32,
    pub err_data: Vec<u8>,
}

/// A completion event, the CQ's unit of delivery.
#[derive(Debug, Clone)]
pub struct CompletionEvent {
    /// Back-reference to the submitting context, recovered by the reactor
    /// via [`crate::context::recover_from_header`].
    pub context_header: usize,
    pub error: Option<ErrorKind>,
    pub bytes_transferred: usize,
    pub flags: CompletionFlags,
    pub tag: Tag,
    pub length: usize,
    pub immediate_data: u64,
    pub provider_error: Option<ProviderErrorBlock>,
}

impl CompletionEvent {
    pub fn has_immediate_data(&self) -> bool {
        self.flags.has_any(CompletionFlags::REMOTE_CQ_DATA)
    }

    pub fn error_info(&self) -> Option<&ProviderErrorBlock> {
        self.provider_error.as_ref()
    }
}

/// Control-plane events delivered by an [`EventQueue`].
#[derive(Debug, Clone)]
pub enum ControlEvent {
    Connected { context_header: usize },
    ShutdownRequested { context_header: usize },
    JoinComplete { context_header: usize },
    MrComplete { context_header: usize, key: u64 },
}

#[derive(Debug, Clone, Copy)]
pub struct QueueAttr {
    pub capacity: usize,
    pub wait_object: bool,
    pub signaling_vector: i32,
}

impl Default for QueueAttr {
    fn default() -> Self {
        Self {
            capacity: 1024,
            wait_object: false,
            signaling_vector: 0,
        }
    }
}

/// Completion queue: ordered FIFO bounded by creation capacity.
pub struct CompletionQueue {
    attr: QueueAttr,
    events: parking_lot::Mutex<VecDeque<CompletionEvent>>,
    closed: AtomicBool,
    requires_manual_progress: bool,
}

impl CompletionQueue {
    pub fn create(attr: QueueAttr, requires_manual_progress: bool) -> Self {
        Self {
            attr,
            events: parking_lot::Mutex::new(VecDeque::with_capacity(attr.capacity.min(4096))),
            closed: AtomicBool::new(false),
            requires_manual_progress,
        }
    }

    pub fn capacity(&self) -> usize {
        self.attr.capacity
    }

    pub fn pending(&self) -> usize {
        self.events.lock().len()
    }

    pub fn supports_blocking_wait(&self) -> bool {
        self.attr.wait_object
    }

    pub fn requires_manual_progress(&self) -> bool {
        self.requires_manual_progress
    }

    /// Used only by the backend (real or mock) that produces completions.
    pub fn push(&self, event: CompletionEvent) -> Result<()> {
        let mut guard = self.events.lock();
        if guard.len() >= self.attr.capacity {
            return Err(Error::new(ErrorKind::NoMemory, "completion queue full"));
        }
        guard.push_back(event);
        Ok(())
    }

    pub fn poll(&self) -> Option<CompletionEvent> {
        self.events.lock().pop_front()
    }

    /// Alias for [`Self::poll`] with a `NotSupported`-flavored
    /// not-ready error, per spec.md §4.F.
    pub fn read(&self) -> Result<CompletionEvent> {
        self.poll()
            .ok_or_else(|| Error::new(ErrorKind::Again, "completion queue not ready"))
    }

    pub fn poll_batch(&self, out: &mut [Option<CompletionEvent>]) -> usize {
        let mut guard = self.events.lock();
        let mut n = 0;
        while n < out.len() {
            match guard.pop_front() {
                Some(ev) => {
                    out[n] = Some(ev);
                    n += 1;
                }
                None => break,
            }
        }
        n
    }

    /// Blocks up to `timeout` for an event. Only meaningful when the queue
    /// has a wait object; otherwise returns `NotSupported` immediately
    /// (spec.md §4.F). The blocking itself is a spin-with-backoff loop
    /// since this crate has no real provider FD to select on — a real
    /// binding would park on the provider's wait-fd instead.
    pub fn wait(&self, timeout: Option<Duration>) -> Result<CompletionEvent> {
        if !self.attr.wait_object {
            return Err(Error::new(
                ErrorKind::NotSupported,
                "completion queue has no wait object",
            ));
        }
        let deadline = timeout.map(|t| std::time::Instant::now() + t);
        loop {
            if let Some(ev) = self.poll() {
                return Ok(ev);
            }
            if let Some(deadline) = deadline {
                if std::time::Instant::now() >= deadline {
                    return Err(Error::new(ErrorKind::Timeout, "cq wait timed out"));
                }
            }
            std::thread::sleep(Duration::from_micros(50));
        }
    }

    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

/// Event queue: delivers connection/shutdown/join/MR-complete events.
pub struct EventQueue {
    attr: QueueAttr,
    events: parking_lot::Mutex<VecDeque<ControlEvent>>,
    unacked: parking_lot::Mutex<VecDeque<usize>>,
}

impl EventQueue {
    pub fn create(attr: QueueAttr) -> Self {
        Self {
            attr,
            events: parking_lot::Mutex::new(VecDeque::new()),
            unacked: parking_lot::Mutex::new(VecDeque::new()),
        }
    }

    pub fn capacity(&self) -> usize {
        self.attr.capacity
    }

    pub fn pending(&self) -> usize {
        self.events.lock().len()
    }

    pub fn push(&self, event: ControlEvent) -> Result<()> {
        let mut guard = self.events.lock();
        if guard.len() >= self.attr.capacity {
            return Err(Error::new(ErrorKind::NoMemory, "event queue full"));
        }
        guard.push_back(event);
        Ok(())
    }

    pub fn poll(&self) -> Option<ControlEvent> {
        self.events.lock().pop_front()
    }

    pub fn read(&self) -> Result<ControlEvent> {
        self.poll()
            .ok_or_else(|| Error::new(ErrorKind::Again, "event queue not ready"))
    }

    pub fn wait(&self, timeout: Option<Duration>) -> Result<ControlEvent> {
        if !self.attr.wait_object {
            return Err(Error::new(
                ErrorKind::NotSupported,
                "event queue has no wait object",
            ));
        }
        let deadline = timeout.map(|t| std::time::Instant::now() + t);
        loop {
            if let Some(ev) = self.poll() {
                return Ok(ev);
            }
            if let Some(deadline) = deadline {
                if std::time::Instant::now() >= deadline {
                    return Err(Error::new(ErrorKind::Timeout, "eq wait timed out"));
                }
            }
            std::thread::sleep(Duration::from_micros(50));
        }
    }

    /// Completes credit accounting for events that require it (e.g.
    /// multi-recv buffer replenishment notices).
    pub fn ack(&self, context_header: usize) -> Result<()> {
        self.unacked.lock().retain(|h| *h != context_header);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_event(ctx: usize, err: Option<ErrorKind>) -> CompletionEvent {
        CompletionEvent {
            context_header: ctx,
            error: err,
            bytes_transferred: 4,
            flags: CompletionFlags::SEND,
            tag: Tag(0),
            length: 4,
            immediate_data: 0,
            provider_error: None,
        }
    }

    #[test]
    fn poll_returns_none_when_empty() {
        let cq = CompletionQueue::create(QueueAttr::default(), false);
        assert!(cq.poll().is_none());
        assert!(matches!(cq.read().unwrap_err().kind(), ErrorKind::Again));
    }

    #[test]
    fn wait_without_wait_object_is_not_supported() {
        let cq = CompletionQueue::create(QueueAttr { wait_object: false, ..Default::default() }, false);
        let err = cq.wait(Some(Duration::from_millis(1))).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotSupported);
    }

    #[test]
    fn poll_batch_caps_at_out_slice_len() {
        let cq = CompletionQueue::create(QueueAttr::default(), false);
        for i in 0..10 {
            cq.push(sample_event(i, None)).unwrap();
        }
        let mut out: [Option<CompletionEvent>; 4] = Default::default();
        let n = cq.poll_batch(&mut out);
        assert_eq!(n, 4);
        assert_eq!(cq.pending(), 6);
    }

    #[test]
    fn immediate_data_flag_matches_bit_four() {
        let mut ev = sample_event(1, None);
        assert!(!ev.has_immediate_data());
        ev.flags = ev.flags.union(CompletionFlags::REMOTE_CQ_DATA);
        assert!(ev.has_immediate_data());
        assert_eq!(ev.flags.bits() & (1 << 4), 1 << 4);
    }

    #[test]
    fn full_queue_rejects_push() {
        let cq = CompletionQueue::create(QueueAttr { capacity: 1, ..Default::default() }, false);
        cq.push(sample_event(1, None)).unwrap();
        let err = cq.push(sample_event(2, None)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NoMemory);
    }
}
