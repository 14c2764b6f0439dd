//! Triggered / deferred work (spec.md §3/§4.J): an operation staged now but
//! held until a threshold condition is met, instead of being posted
//! immediately — libfabric's `fi_control(FI_QUEUE_WORK)` mechanism.

use crate::av::AvHandle;
use crate::backend::{AtomicDatatype, AtomicOp};
use crate::memory::RemoteDescriptor;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

/// What a deferred operation waits on before it may run.
#[derive(Clone)]
pub struct ThresholdCondition {
    counter: Arc<AtomicU64>,
    threshold: u64,
}

impl ThresholdCondition {
    pub fn new(counter: Arc<AtomicU64>, threshold: u64) -> Self {
        Self { counter, threshold }
    }

    pub fn is_met(&self) -> bool {
        self.counter.load(Ordering::Acquire) >= self.threshold
    }
}

/// The operation a [`DeferredWork`] runs once its condition is met. A
/// closed set mirroring this crate's own verb surface, since a real binding
/// would carry the provider's native `fi_op_*` descriptor union instead.
pub enum OpDescriptor {
    Send { dest: AvHandle, payload: Vec<u8> },
    Write { dest: AvHandle, payload: Vec<u8>, remote: RemoteDescriptor },
    Atomic {
        dest: AvHandle,
        remote: RemoteDescriptor,
        op: AtomicOp,
        datatype: AtomicDatatype,
        operand: Vec<u8>,
    },
}

/// A posted-but-held operation. Valid until its condition is met and it is
/// taken for execution, or it is explicitly canceled (spec.md §4.J).
pub struct DeferredWork {
    condition: ThresholdCondition,
    op: parking_lot::Mutex<Option<OpDescriptor>>,
    canceled: AtomicBool,
}

impl DeferredWork {
    pub fn new(condition: ThresholdCondition, op: OpDescriptor) -> Arc<Self> {
        Arc::new(Self {
            condition,
            op: parking_lot::Mutex::new(Some(op)),
            canceled: AtomicBool::new(false),
        })
    }

    pub fn cancel(&self) {
        self.canceled.store(true, Ordering::Release);
    }

    pub fn is_canceled(&self) -> bool {
        self.canceled.load(Ordering::Acquire)
    }

    pub fn is_ready(&self) -> bool {
        !self.is_canceled() && self.condition.is_met()
    }

    /// Takes the operation for execution. Returns `None` if the condition
    /// isn't met, the work was canceled, or it was already taken once.
    pub fn take_if_ready(&self) -> Option<OpDescriptor> {
        if !self.is_ready() {
            return None;
        }
        self.op.lock().take()
    }
}

/// A set of deferred operations; the counterpart a reactor tick or an
/// explicit caller drains for entries whose condition has newly become
/// true (spec.md §4.J).
#[derive(Default)]
pub struct TriggeredQueue {
    entries: parking_lot::Mutex<Vec<Arc<DeferredWork>>>,
}

impl TriggeredQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, work: Arc<DeferredWork>) {
        self.entries.lock().push(work);
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Removes every entry that is canceled or ready, returning the ready
    /// ones (with their operation, if not already taken) in insertion
    /// order. Not-yet-ready entries are left in the queue.
    pub fn drain_ready(&self) -> Vec<(Arc<DeferredWork>, Option<OpDescriptor>)> {
        let mut guard = self.entries.lock();
        let mut ready = Vec::new();
        guard.retain(|entry| {
            if entry.is_canceled() {
                return false;
            }
            if entry.is_ready() {
                let taken = entry.take_if_ready();
                ready.push((Arc::clone(entry), taken));
                false
            } else {
                true
            }
        });
        ready
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_ready_until_threshold_met() {
        let counter = Arc::new(AtomicU64::new(0));
        let cond = ThresholdCondition::new(counter.clone(), 3);
        let work = DeferredWork::new(cond, OpDescriptor::Send { dest: AvHandle::INVALID, payload: vec![1] });
        assert!(!work.is_ready());
        assert!(work.take_if_ready().is_none());

        counter.store(3, Ordering::Release);
        assert!(work.is_ready());
        assert!(work.take_if_ready().is_some());
        // Already taken: a second take returns nothing even though the
        // condition is still met.
        assert!(work.take_if_ready().is_none());
    }

    #[test]
    fn canceled_work_never_becomes_ready() {
        let counter = Arc::new(AtomicU64::new(5));
        let cond = ThresholdCondition::new(counter, 1);
        let work = DeferredWork::new(cond, OpDescriptor::Send { dest: AvHandle::INVALID, payload: vec![] });
        work.cancel();
        assert!(!work.is_ready());
    }

    #[test]
    fn queue_drains_only_ready_entries() {
        let counter = Arc::new(AtomicU64::new(0));
        let queue = TriggeredQueue::new();
        let ready_now = DeferredWork::new(
            ThresholdCondition::new(counter.clone(), 0),
            OpDescriptor::Send { dest: AvHandle::INVALID, payload: vec![9] },
        );
        let not_yet = DeferredWork::new(
            ThresholdCondition::new(counter.clone(), 10),
            OpDescriptor::Send { dest: AvHandle::INVALID, payload: vec![8] },
        );
        queue.push(ready_now);
        queue.push(not_yet);

        let drained = queue.drain_ready();
        assert_eq!(drained.len(), 1);
        assert_eq!(queue.len(), 1);
    }
}
