//! In-process mock fabric (SPEC_FULL.md §4.N). Every test and doctest in
//! this crate runs against [`MockBackend`] rather than a real libfabric
//! provider (spec.md §1 scope: libfabric itself is an external
//! collaborator this crate does not link).
//!
//! `MockBackend` is a pure loopback: a send/write/atomic posted on an
//! endpoint is always delivered back to that *same* endpoint, regardless of
//! `dest`. Multi-peer address routing is out of scope for a single-process
//! mock — every scenario in spec.md §8 is expressible as one endpoint
//! talking to itself.

use crate::address::Address;
use crate::av::AvHandle;
use crate::backend::{
    success_event, AtomicDatatype, AtomicRequest, BufferHandle, EndpointId, FabricBackend,
    RecvRequest, RmaReadRequest, RmaRequest, SendRequest, TaggedRecvRequest, TaggedSendRequest,
};
use crate::error::{Error, ErrorKind, Result, VoidResult};
use crate::primitives::{CompletionFlags, Tag};
use crate::queue::{CompletionEvent, CompletionQueue};
use crate::staged;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};

struct PendingRecv {
    buf: BufferHandle,
    context_header: usize,
}

struct PendingTaggedRecv {
    buf: BufferHandle,
    tag: Tag,
    ignore_mask: u64,
    context_header: usize,
}

struct UnexpectedMsg {
    data: Vec<u8>,
}

struct UnexpectedTagged {
    data: Vec<u8>,
    tag: Tag,
}

#[derive(Default)]
struct EndpointState {
    pending_recvs: VecDeque<PendingRecv>,
    pending_tagged: VecDeque<PendingTaggedRecv>,
    unexpected: VecDeque<UnexpectedMsg>,
    unexpected_tagged: VecDeque<UnexpectedTagged>,
    ready: VecDeque<CompletionEvent>,
}

fn tag_matches(have: Tag, want: Tag, ignore_mask: u64) -> bool {
    (have.0 & !ignore_mask) == (want.0 & !ignore_mask)
}

/// Loopback mock implementing [`FabricBackend`]; see the module doc.
pub struct MockBackend {
    next_id: AtomicU64,
    states: DashMap<EndpointId, Mutex<EndpointState>>,
    /// Shared "remote memory" address space RMA/atomics operate against,
    /// keyed by [`crate::memory::RemoteDescriptor::addr`].
    remote_store: DashMap<u64, Vec<u8>>,
}

impl Default for MockBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MockBackend {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            states: DashMap::new(),
            remote_store: DashMap::new(),
        }
    }

    fn state(&self, ep: EndpointId) -> Result<dashmap::mapref::one::Ref<'_, EndpointId, Mutex<EndpointState>>> {
        self.states
            .get(&ep)
            .ok_or_else(|| Error::new(ErrorKind::InvalidArgument, "unknown endpoint"))
    }

    fn atomic_width(datatype: AtomicDatatype) -> usize {
        match datatype {
            AtomicDatatype::Int32 | AtomicDatatype::Uint32 | AtomicDatatype::Float => 4,
            AtomicDatatype::Int64 | AtomicDatatype::Uint64 | AtomicDatatype::Double => 8,
        }
    }
}

impl FabricBackend for MockBackend {
    fn register_endpoint(&self) -> EndpointId {
        let id = EndpointId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.states.insert(id, Mutex::new(EndpointState::default()));
        id
    }

    fn av_insert(&self, _ep: EndpointId, _addr: Address) -> Result<AvHandle> {
        static NEXT: AtomicU64 = AtomicU64::new(0);
        Ok(AvHandle::from_raw(NEXT.fetch_add(1, Ordering::Relaxed)))
    }

    fn post_send(&self, ep: EndpointId, req: SendRequest<'_>) -> Result<()> {
        let state = self.state(ep)?;
        let mut guard = state.lock();
        if let Some(pending) = guard.pending_recvs.pop_front() {
            // SAFETY: `pending.buf` was captured from a live `&mut [u8]` in
            // a still-outstanding `post_recv` call on this same endpoint;
            // the caller's contract (buffer stays exclusively borrowed
            // until completion or cancel) guarantees it is still valid.
            let dst = unsafe { pending.buf.as_mut_slice() };
            let n = dst.len().min(req.buf.len());
            dst[..n].copy_from_slice(&req.buf[..n]);
            guard.ready.push_back(recv_completion(pending.context_header, n));
        } else {
            guard.unexpected.push_back(UnexpectedMsg { data: req.buf.to_vec() });
        }
        guard.ready.push_back(success_event(req.context_header, req.buf.len()));
        Ok(())
    }

    fn post_recv(&self, ep: EndpointId, req: RecvRequest) -> Result<()> {
        let state = self.state(ep)?;
        let mut guard = state.lock();
        if let Some(msg) = guard.unexpected.pop_front() {
            // SAFETY: see `post_send`; the buffer is live for the duration
            // of this call, which is all that's needed on the matched path.
            let dst = unsafe { req.buf.as_mut_slice() };
            let n = dst.len().min(msg.data.len());
            dst[..n].copy_from_slice(&msg.data[..n]);
            guard.ready.push_back(recv_completion(req.context_header, n));
        } else {
            guard
                .pending_recvs
                .push_back(PendingRecv { buf: req.buf, context_header: req.context_header });
        }
        Ok(())
    }

    fn post_tagged_send(&self, ep: EndpointId, req: TaggedSendRequest<'_>) -> Result<()> {
        let state = self.state(ep)?;
        let mut guard = state.lock();
        let slot = guard
            .pending_tagged
            .iter()
            .position(|p| tag_matches(req.tag, p.tag, p.ignore_mask));
        if let Some(idx) = slot {
            let pending = guard.pending_tagged.remove(idx).unwrap();
            let dst = unsafe { pending.buf.as_mut_slice() };
            let n = dst.len().min(req.buf.len());
            dst[..n].copy_from_slice(&req.buf[..n]);
            guard
                .ready
                .push_back(tagged_completion(pending.context_header, n, req.tag));
        } else {
            guard
                .unexpected_tagged
                .push_back(UnexpectedTagged { data: req.buf.to_vec(), tag: req.tag });
        }
        guard.ready.push_back(success_event(req.context_header, req.buf.len()));
        Ok(())
    }

    fn post_tagged_recv(&self, ep: EndpointId, req: TaggedRecvRequest) -> Result<()> {
        let state = self.state(ep)?;
        let mut guard = state.lock();
        let slot = guard
            .unexpected_tagged
            .iter()
            .position(|m| tag_matches(m.tag, req.tag, req.ignore_mask));
        if let Some(idx) = slot {
            let msg = guard.unexpected_tagged.remove(idx).unwrap();
            let dst = unsafe { req.buf.as_mut_slice() };
            let n = dst.len().min(msg.data.len());
            dst[..n].copy_from_slice(&msg.data[..n]);
            guard
                .ready
                .push_back(tagged_completion(req.context_header, n, msg.tag));
        } else {
            guard.pending_tagged.push_back(PendingTaggedRecv {
                buf: req.buf,
                tag: req.tag,
                ignore_mask: req.ignore_mask,
                context_header: req.context_header,
            });
        }
        Ok(())
    }

    fn post_inject(&self, ep: EndpointId, _dest: AvHandle, buf: &[u8]) -> Result<()> {
        let state = self.state(ep)?;
        let mut guard = state.lock();
        if let Some(pending) = guard.pending_recvs.pop_front() {
            let dst = unsafe { pending.buf.as_mut_slice() };
            let n = dst.len().min(buf.len());
            dst[..n].copy_from_slice(&buf[..n]);
            guard.ready.push_back(recv_completion(pending.context_header, n));
        } else {
            guard.unexpected.push_back(UnexpectedMsg { data: buf.to_vec() });
        }
        Ok(())
    }

    fn post_read(&self, ep: EndpointId, req: RmaReadRequest) -> Result<()> {
        let state = self.state(ep)?;
        let dst = unsafe { req.buf.as_mut_slice() };
        let source = self.remote_store.get(&req.remote.addr);
        match source {
            Some(bytes) => {
                let n = dst.len().min(bytes.len());
                dst[..n].copy_from_slice(&bytes[..n]);
                if n < dst.len() {
                    dst[n..].fill(0);
                }
            }
            None => dst.fill(0),
        }
        state
            .lock()
            .ready
            .push_back(rma_completion(req.context_header, dst.len()));
        Ok(())
    }

    fn post_write(&self, ep: EndpointId, req: RmaRequest<'_>) -> Result<()> {
        let state = self.state(ep)?;
        self.remote_store.insert(req.remote.addr, req.buf.to_vec());
        state
            .lock()
            .ready
            .push_back(rma_completion(req.context_header, req.buf.len()));
        Ok(())
    }

    fn post_atomic(&self, ep: EndpointId, req: AtomicRequest<'_>) -> Result<()> {
        let state = self.state(ep)?;
        let width = Self::atomic_width(req.datatype);
        let mut target = self
            .remote_store
            .entry(req.remote.addr)
            .or_insert_with(|| vec![0u8; width]);
        if target.len() < width {
            target.resize(width, 0);
        }
        let old = staged::apply(req.op, req.datatype, &mut target, req.operand, req.compare)?;
        drop(target);
        if let Some(fetch_out) = &req.fetch_out {
            let dst = unsafe { fetch_out.as_mut_slice() };
            let n = dst.len().min(old.len());
            dst[..n].copy_from_slice(&old[..n]);
        }
        let mut padded = [0u8; 8];
        let n = old.len().min(8);
        padded[..n].copy_from_slice(&old[..n]);
        state.lock().ready.push_back(CompletionEvent {
            context_header: req.context_header,
            error: None,
            bytes_transferred: width,
            flags: CompletionFlags::ATOMIC.union(CompletionFlags::REMOTE_CQ_DATA),
            tag: Tag(0),
            length: width,
            immediate_data: u64::from_le_bytes(padded),
            provider_error: None,
        });
        Ok(())
    }

    fn cancel(&self, ep: EndpointId, header_ptr: usize) -> VoidResult {
        let state = self.state(ep)?;
        let mut guard = state.lock();
        if header_ptr == 0 {
            let mut canceled: Vec<usize> =
                guard.pending_recvs.drain(..).map(|p| p.context_header).collect();
            canceled.extend(guard.pending_tagged.drain(..).map(|p| p.context_header));
            for header in canceled {
                guard.ready.push_back(canceled_completion(header));
            }
            return Ok(());
        }
        if let Some(idx) = guard.pending_recvs.iter().position(|p| p.context_header == header_ptr) {
            guard.pending_recvs.remove(idx);
            guard.ready.push_back(canceled_completion(header_ptr));
        } else if let Some(idx) = guard
            .pending_tagged
            .iter()
            .position(|p| p.context_header == header_ptr)
        {
            guard.pending_tagged.remove(idx);
            guard.ready.push_back(canceled_completion(header_ptr));
        }
        Ok(())
    }

    fn drive_progress(&self, ep: EndpointId, cq: &CompletionQueue, max: usize) -> usize {
        let Ok(state) = self.state(ep) else { return 0 };
        let mut guard = state.lock();
        let mut moved = 0;
        while moved < max {
            let Some(event) = guard.ready.pop_front() else { break };
            if cq.push(event.clone()).is_err() {
                guard.ready.push_front(event);
                break;
            }
            moved += 1;
        }
        moved
    }

    fn close_endpoint(&self, ep: EndpointId) {
        self.states.remove(&ep);
    }
}

fn recv_completion(context_header: usize, bytes: usize) -> CompletionEvent {
    CompletionEvent {
        context_header,
        error: None,
        bytes_transferred: bytes,
        flags: CompletionFlags::RECV,
        tag: Tag(0),
        length: bytes,
        immediate_data: 0,
        provider_error: None,
    }
}

fn tagged_completion(context_header: usize, bytes: usize, tag: Tag) -> CompletionEvent {
    CompletionEvent {
        context_header,
        error: None,
        bytes_transferred: bytes,
        flags: CompletionFlags::RECV,
        tag,
        length: bytes,
        immediate_data: 0,
        provider_error: None,
    }
}

fn rma_completion(context_header: usize, bytes: usize) -> CompletionEvent {
    CompletionEvent {
        context_header,
        error: None,
        bytes_transferred: bytes,
        flags: CompletionFlags::RMA,
        tag: Tag(0),
        length: bytes,
        immediate_data: 0,
        provider_error: None,
    }
}

fn canceled_completion(context_header: usize) -> CompletionEvent {
    CompletionEvent {
        context_header,
        error: Some(ErrorKind::Canceled),
        bytes_transferred: 0,
        flags: CompletionFlags::EMPTY,
        tag: Tag(0),
        length: 0,
        immediate_data: 0,
        provider_error: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::av::AvHandle;

    #[test]
    fn send_then_matching_recv_delivers_payload() {
        let backend = MockBackend::new();
        let ep = backend.register_endpoint();
        backend
            .post_send(ep, SendRequest { dest: AvHandle::INVALID, buf: b"hello", context_header: 11 })
            .unwrap();
        let mut buf = [0u8; 5];
        backend
            .post_recv(ep, RecvRequest { buf: BufferHandle::new(&mut buf), context_header: 22 })
            .unwrap();
        assert_eq!(&buf, b"hello");

        let cq = CompletionQueue::create(crate::queue::QueueAttr::default(), false);
        let moved = backend.drive_progress(ep, &cq, 10);
        assert_eq!(moved, 2);
    }

    #[test]
    fn recv_posted_before_send_still_matches() {
        let backend = MockBackend::new();
        let ep = backend.register_endpoint();
        let mut buf = [0u8; 5];
        backend
            .post_recv(ep, RecvRequest { buf: BufferHandle::new(&mut buf), context_header: 1 })
            .unwrap();
        backend
            .post_send(ep, SendRequest { dest: AvHandle::INVALID, buf: b"world", context_header: 2 })
            .unwrap();
        assert_eq!(&buf, b"world");
    }

    #[test]
    fn cancel_with_null_header_drops_all_pending_recvs() {
        let backend = MockBackend::new();
        let ep = backend.register_endpoint();
        let mut a = [0u8; 4];
        let mut b = [0u8; 4];
        backend
            .post_recv(ep, RecvRequest { buf: BufferHandle::new(&mut a), context_header: 1 })
            .unwrap();
        backend
            .post_recv(ep, RecvRequest { buf: BufferHandle::new(&mut b), context_header: 2 })
            .unwrap();
        backend.cancel(ep, 0).unwrap();

        let cq = CompletionQueue::create(crate::queue::QueueAttr::default(), false);
        backend.drive_progress(ep, &cq, 10);
        assert_eq!(cq.pending(), 2);
        assert_eq!(cq.poll().unwrap().error, Some(ErrorKind::Canceled));
    }

    #[test]
    fn rma_write_then_read_round_trips() {
        let backend = MockBackend::new();
        let ep = backend.register_endpoint();
        let remote = crate::memory::RemoteDescriptor { addr: 0x9000, key: crate::primitives::MrKey(1), length: 4 };
        backend
            .post_write(ep, RmaRequest { dest: AvHandle::INVALID, buf: b"data", remote, context_header: 1 })
            .unwrap();
        let mut out = [0u8; 4];
        backend
            .post_read(
                ep,
                RmaReadRequest { dest: AvHandle::INVALID, buf: BufferHandle::new(&mut out), remote, context_header: 2 },
            )
            .unwrap();
        assert_eq!(&out, b"data");
    }
}
