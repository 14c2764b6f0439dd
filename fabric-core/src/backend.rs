//! The `FabricBackend` seam (SPEC_FULL.md §4.N): everything the endpoint
//! and reactor need from "the actual fabric", kept as a trait so the
//! plumbing in [`crate::endpoint`]/[`crate::reactor`] is backend-agnostic.
//!
//! This crate does not link libfabric (spec.md §1 scope: "the underlying
//! libfabric library itself... we consume its ABI"); [`crate::testing::MockBackend`]
//! is the only implementation shipped here, and is what every test in this
//! crate runs against. A real binding would implement this trait over
//! `fi_*` calls with the same signatures.

use crate::address::Address;
use crate::av::AvHandle;
use crate::error::Result;
use crate::memory::RemoteDescriptor;
use crate::primitives::Tag;
use crate::queue::CompletionEvent;

/// An atomic operator, matching the `fi_op` mappings in spec.md §6.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AtomicOp {
    Min,
    Max,
    Sum,
    Prod,
    Band,
    Bor,
    Bxor,
    Lor,
    Land,
    Lxor,
    AtomicRead,
    AtomicWrite,
    CompareSwap,
}

/// The subset of `fi_datatype` this crate's staged-atomic path (spec.md
/// §4.H) actually operates on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AtomicDatatype {
    Int32,
    Uint32,
    Int64,
    Uint64,
    Float,
    Double,
}

/// An endpoint-scoped identifier the backend uses to route posts/cancels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EndpointId(pub u64);

/// A registered receive/fetch target, captured as a raw pointer rather than
/// a borrowed slice.
///
/// A real NIC writes into pinned physical memory well after the posting
/// call returns — the borrow-checker has no way to express "valid until
/// the matching completion fires" across that gap, so this crate models it
/// the same way [`crate::context::SubmissionContext`] models the fabric's
/// hold on a context: an explicit pointer/length pair with a documented
/// lifetime contract instead of a borrow.
pub struct BufferHandle {
    ptr: *mut u8,
    len: usize,
}

// SAFETY: `BufferHandle` is a plain pointer/length pair; sending it across
// threads is sound because the safety contract (exclusive access until
// completion) is enforced by the caller, not by this type.
unsafe impl Send for BufferHandle {}

impl BufferHandle {
    pub fn new(buf: &mut [u8]) -> Self {
        Self { ptr: buf.as_mut_ptr(), len: buf.len() }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Reconstructs the original mutable slice.
    ///
    /// # Safety
    /// The memory `self` was built from must still be alive and must not be
    /// aliased elsewhere for the duration of the returned borrow — the same
    /// contract a provider's registered receive buffer carries until its
    /// completion is delivered.
    pub unsafe fn as_mut_slice(&self) -> &mut [u8] {
        std::slice::from_raw_parts_mut(self.ptr, self.len)
    }
}

/// Everything a posted verb needs to describe itself to the backend.
pub struct SendRequest<'a> {
    pub dest: AvHandle,
    pub buf: &'a [u8],
    pub context_header: usize,
}

pub struct RecvRequest {
    pub buf: BufferHandle,
    pub context_header: usize,
}

pub struct TaggedSendRequest<'a> {
    pub dest: AvHandle,
    pub buf: &'a [u8],
    pub tag: Tag,
    pub context_header: usize,
}

pub struct TaggedRecvRequest {
    pub buf: BufferHandle,
    pub tag: Tag,
    pub ignore_mask: u64,
    pub context_header: usize,
}

pub struct RmaRequest<'a> {
    pub dest: AvHandle,
    pub buf: &'a [u8],
    pub remote: RemoteDescriptor,
    pub context_header: usize,
}

pub struct RmaReadRequest {
    pub dest: AvHandle,
    pub buf: BufferHandle,
    pub remote: RemoteDescriptor,
    pub context_header: usize,
}

pub struct AtomicRequest<'a> {
    pub dest: AvHandle,
    pub remote: RemoteDescriptor,
    pub op: AtomicOp,
    pub datatype: AtomicDatatype,
    pub operand: &'a [u8],
    pub compare: Option<&'a [u8]>,
    pub fetch_out: Option<BufferHandle>,
    pub context_header: usize,
}

/// Backend interface; see the module doc for why this exists.
pub trait FabricBackend: Send + Sync {
    fn register_endpoint(&self) -> EndpointId;
    fn av_insert(&self, ep: EndpointId, addr: Address) -> Result<AvHandle>;

    fn post_send(&self, ep: EndpointId, req: SendRequest<'_>) -> Result<()>;
    fn post_recv(&self, ep: EndpointId, req: RecvRequest) -> Result<()>;
    fn post_tagged_send(&self, ep: EndpointId, req: TaggedSendRequest<'_>) -> Result<()>;
    fn post_tagged_recv(&self, ep: EndpointId, req: TaggedRecvRequest) -> Result<()>;
    fn post_inject(&self, ep: EndpointId, dest: AvHandle, buf: &[u8]) -> Result<()>;
    fn post_read(&self, ep: EndpointId, req: RmaReadRequest) -> Result<()>;
    fn post_write(&self, ep: EndpointId, req: RmaRequest<'_>) -> Result<()>;
    fn post_atomic(&self, ep: EndpointId, req: AtomicRequest<'_>) -> Result<()>;

    /// `header_ptr == 0` cancels every outstanding operation on `ep`
    /// (spec.md §4.H "cancel with a null header").
    fn cancel(&self, ep: EndpointId, header_ptr: usize) -> Result<()>;

    /// Drains up to `max` completions for `ep`'s bound CQ into `cq`.
    /// Returns the number of completions moved.
    fn drive_progress(&self, ep: EndpointId, cq: &crate::queue::CompletionQueue, max: usize) -> usize;

    fn close_endpoint(&self, ep: EndpointId);
}

pub(crate) fn success_event(context_header: usize, bytes: usize) -> CompletionEvent {
    use crate::primitives::{CompletionFlags, Tag};
    CompletionEvent {
        context_header,
        error: None,
        bytes_transferred: bytes,
        flags: CompletionFlags::SEND,
        tag: Tag(0),
        length: bytes,
        immediate_data: 0,
        provider_error: None,
    }
}
