//! Memory region & registration (spec.md §3/§4.E).
//!
//! `MemoryRegion` owns a pinned `[addr, addr+len)` range with access rights;
//! `RemoteDescriptor` is the `{addr, key, length}` triple peers actually use
//! for RMA; `MrCache` is the optional registration-coalescing extension
//! with LRU eviction gated on a live reference count.

use crate::error::{Error, ErrorKind, Result};
use crate::primitives::{AccessFlags, MrKey};
use crate::provider::ProviderTraits;
use dashmap::DashMap;
use std::collections::VecDeque;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

/// Device-memory provenance for a registration, when the pinned range lives
/// off the host (spec.md §3 "Optional device memory variants").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceInterface {
    Cuda,
    Rocm,
    LevelZero,
    Neuron,
    SynapseAi,
}

#[derive(Debug, Clone, Copy)]
pub struct DeviceMemory {
    pub interface: DeviceInterface,
    pub device_id: i32,
    pub driver_data: u64,
}

/// How a registration's backing memory is sourced.
#[derive(Debug, Clone, Copy)]
pub enum RegistrationFlavor {
    Host,
    Device(DeviceMemory),
    DmaBuf { fd: i32, offset: u64 },
}

#[derive(Debug)]
struct MrInner {
    addr: u64,
    len: usize,
    access: AccessFlags,
    key: MrKey,
    flavor: RegistrationFlavor,
    /// Live handles referencing this MR; gates cache eviction.
    refcount: AtomicUsize,
}

/// A registered, pinned memory range. Cheap to clone — clones share the
/// same underlying registration and bump the reference count used by
/// [`MrCache`] eviction.
#[derive(Debug, Clone)]
pub struct MemoryRegion {
    inner: Arc<MrInner>,
}

impl MemoryRegion {
    /// Registers `[addr, addr+len)`. Fails if `access` is empty, or if the
    /// range is unaligned for a provider that demands alignment (spec.md
    /// §4.E).
    pub fn register<P: ProviderTraits>(
        addr: u64,
        len: usize,
        access: AccessFlags,
        flavor: RegistrationFlavor,
    ) -> Result<Self> {
        if access.is_empty() {
            return Err(Error::new(
                ErrorKind::InvalidArgument,
                "memory region access flags must not be empty",
            ));
        }
        if P::REQUIRES_LOCAL_KEY {
            let aligned_base = P::align_down(addr as usize) as u64;
            if aligned_base != addr {
                return Err(Error::new(
                    ErrorKind::InvalidArgument,
                    format!(
                        "registration base {addr:#x} is not aligned to provider page size {}",
                        P::PAGE_SIZE
                    ),
                ));
            }
        }
        static NEXT_KEY: AtomicU64 = AtomicU64::new(1);
        let key = MrKey(NEXT_KEY.fetch_add(1, Ordering::Relaxed));
        Ok(Self {
            inner: Arc::new(MrInner {
                addr,
                len,
                access,
                key,
                flavor,
                refcount: AtomicUsize::new(1),
            }),
        })
    }

    pub fn addr(&self) -> u64 {
        self.inner.addr
    }

    pub fn len(&self) -> usize {
        self.inner.len
    }

    pub fn is_empty(&self) -> bool {
        self.inner.len == 0
    }

    pub fn access(&self) -> AccessFlags {
        self.inner.access
    }

    pub fn key(&self) -> MrKey {
        self.inner.key
    }

    pub fn flavor(&self) -> RegistrationFlavor {
        self.inner.flavor
    }

    /// Opaque provider descriptor handed to local verbs; modeled here as
    /// the MR's key reinterpreted, since this crate does not link a real
    /// provider (§1 scope) and the descriptor's only contractual property
    /// is "stable for the life of the MR".
    pub fn local_descriptor(&self) -> u64 {
        self.inner.key.0
    }

    pub fn remote_descriptor(&self) -> RemoteDescriptor {
        RemoteDescriptor {
            addr: self.inner.addr,
            key: self.inner.key,
            length: self.inner.len,
        }
    }

    /// Revalidate after a page-table change (e.g. a `madvise`/`mremap` on
    /// the backing range). This crate has no real page-table to consult, so
    /// `refresh` is a structural hook callers/providers can implement
    /// against; it never fails here.
    pub fn refresh(&self) -> Result<()> {
        Ok(())
    }

    fn bump_ref(&self) {
        self.inner.refcount.fetch_add(1, Ordering::AcqRel);
    }

    fn drop_ref(&self) -> usize {
        self.inner.refcount.fetch_sub(1, Ordering::AcqRel) - 1
    }

    fn refcount(&self) -> usize {
        self.inner.refcount.load(Ordering::Acquire)
    }
}

/// `{addr, key, length}` plus derived views, the shape peers actually need
/// to target an RMA operation (spec.md §3 "Remote memory descriptor").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RemoteDescriptor {
    pub addr: u64,
    pub key: MrKey,
    pub length: usize,
}

impl RemoteDescriptor {
    pub fn offset_by(&self, n: u64) -> RemoteDescriptor {
        RemoteDescriptor {
            addr: self.addr + n,
            key: self.key,
            length: self.length.saturating_sub(n as usize),
        }
    }

    pub fn subregion(&self, off: usize, len: usize) -> Result<RemoteDescriptor> {
        if !self.contains(off, len) {
            return Err(Error::new(
                ErrorKind::InvalidArgument,
                "subregion out of bounds",
            ));
        }
        Ok(RemoteDescriptor {
            addr: self.addr + off as u64,
            key: self.key,
            length: len,
        })
    }

    pub fn contains(&self, off: usize, len: usize) -> bool {
        off.checked_add(len).is_some_and(|end| end <= self.length)
    }

    /// Provider-aware effective address at `offset`, following §4.B's
    /// `compute_remote_addr` convention (offset- vs VA-keyed providers).
    pub fn effective_addr_at<P: ProviderTraits>(&self, offset: u64) -> u64 {
        P::compute_remote_addr(self.addr, offset)
    }
}

/// A handle into [`MrCache`]; dropping it releases the cache's reference on
/// the underlying [`MemoryRegion`].
pub struct CachedMr {
    region: MemoryRegion,
    cache: Arc<MrCacheInner>,
    cache_key: (u64, usize, u64),
}

impl CachedMr {
    pub fn region(&self) -> &MemoryRegion {
        &self.region
    }
}

impl Drop for CachedMr {
    fn drop(&mut self) {
        self.region.drop_ref();
        self.cache.touch_lru(self.cache_key);
    }
}

struct MrCacheInner {
    entries: DashMap<(u64, usize, u64), MemoryRegion>,
    lru: parking_lot::Mutex<VecDeque<(u64, usize, u64)>>,
    high_water_mark: usize,
}

impl MrCacheInner {
    fn touch_lru(&self, key: (u64, usize, u64)) {
        let mut lru = self.lru.lock();
        lru.retain(|k| *k != key);
        lru.push_back(key);
    }
}

/// Optional registration-coalescing cache (spec.md §4.E). Keys on
/// `(aligned_base, aligned_length, access_bits)`; hits bump a refcount,
/// misses extend the requested range to page boundaries and register a new
/// MR. Eviction is LRU gated on `refcount == 0`.
pub struct MrCache<P> {
    inner: Arc<MrCacheInner>,
    _provider: PhantomData<P>,
}

impl<P: ProviderTraits> MrCache<P> {
    pub fn new(high_water_mark: usize) -> Self {
        Self {
            inner: Arc::new(MrCacheInner {
                entries: DashMap::new(),
                lru: parking_lot::Mutex::new(VecDeque::new()),
                high_water_mark,
            }),
            _provider: PhantomData,
        }
    }

    pub fn len(&self) -> usize {
        self.inner.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get_or_register(
        &self,
        addr: u64,
        len: usize,
        access: AccessFlags,
    ) -> Result<CachedMr> {
        let aligned_base = P::align_down(addr as usize) as u64;
        let aligned_len = P::aligned_length(addr as usize, len) as u64;
        let key = (aligned_base, aligned_len as usize, access.bits());

        if let Some(existing) = self.inner.entries.get(&key) {
            existing.bump_ref();
            let region = existing.clone();
            drop(existing);
            self.inner.touch_lru(key);
            return Ok(CachedMr {
                region,
                cache: Arc::clone(&self.inner),
                cache_key: key,
            });
        }

        let region = MemoryRegion::register::<P>(
            aligned_base,
            aligned_len as usize,
            access,
            RegistrationFlavor::Host,
        )?;
        self.maybe_evict();
        region.bump_ref();
        self.inner.entries.insert(key, region.clone());
        self.inner.touch_lru(key);
        Ok(CachedMr {
            region,
            cache: Arc::clone(&self.inner),
            cache_key: key,
        })
    }

    /// Explicit eviction attempt for `key`; fails if the MR is still
    /// referenced (refcount != 0 beyond the cache's own holding reference).
    pub fn try_evict(&self, addr: u64, len: usize, access: AccessFlags) -> Result<()> {
        let aligned_base = P::align_down(addr as usize) as u64;
        let aligned_len = P::aligned_length(addr as usize, len) as u64;
        let key = (aligned_base, aligned_len as usize, access.bits());
        self.evict_key(key)
    }

    fn evict_key(&self, key: (u64, usize, u64)) -> Result<()> {
        let Some(entry) = self.inner.entries.get(&key) else {
            return Err(Error::new(ErrorKind::InvalidArgument, "no such cache entry"));
        };
        // The cache itself holds one reference (from insertion); anything
        // beyond that means a live `CachedMr` handle is outstanding.
        if entry.refcount() > 1 {
            return Err(Error::new(
                ErrorKind::Busy,
                "memory region still referenced by in-flight operations",
            ));
        }
        drop(entry);
        self.inner.entries.remove(&key);
        self.inner.lru.lock().retain(|k| *k != key);
        Ok(())
    }

    fn maybe_evict(&self) {
        while self.inner.entries.len() >= self.inner.high_water_mark {
            let candidate = { self.inner.lru.lock().front().copied() };
            let Some(key) = candidate else { break };
            if self.evict_key(key).is_err() {
                // Oldest entry is pinned; stop trying rather than thrash
                // through the whole LRU on every insert.
                tracing::trace!(target: "fabric_core::memory", "mr cache eviction skipped pinned entry");
                break;
            }
        }
    }
}

/// A single buffer inside a [`BufferRegistration`] group, carrying a stable
/// densely-numbered `id` and a back-pointer to its MR (spec.md §4.E).
#[derive(Clone)]
pub struct RegisteredBuffer {
    id: u64,
    offset: usize,
    len: usize,
    mr: MemoryRegion,
}

impl RegisteredBuffer {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn mr(&self) -> &MemoryRegion {
        &self.mr
    }

    /// `buffer(b, n)`: the first `n` bytes of this view. Slicing preserves
    /// `id` and the MR back-pointer (spec.md §4.E).
    pub fn buffer(&self, n: usize) -> RegisteredBuffer {
        RegisteredBuffer {
            id: self.id,
            offset: self.offset,
            len: self.len.min(n),
            mr: self.mr.clone(),
        }
    }
}

impl std::ops::Add<usize> for RegisteredBuffer {
    type Output = RegisteredBuffer;
    fn add(self, offset: usize) -> RegisteredBuffer {
        let advance = offset.min(self.len);
        RegisteredBuffer {
            id: self.id,
            offset: self.offset + advance,
            len: self.len - advance,
            mr: self.mr,
        }
    }
}

/// Groups a sequence of buffers, registering each and exposing
/// [`RegisteredBuffer`] views (spec.md §4.E "buffer_registration").
pub struct BufferRegistration {
    buffers: Vec<RegisteredBuffer>,
}

impl BufferRegistration {
    pub fn register<P: ProviderTraits>(
        ranges: &[(u64, usize)],
        access: AccessFlags,
    ) -> Result<Self> {
        let mut buffers = Vec::with_capacity(ranges.len());
        for (id, &(addr, len)) in ranges.iter().enumerate() {
            let mr = MemoryRegion::register::<P>(addr, len, access, RegistrationFlavor::Host)?;
            buffers.push(RegisteredBuffer {
                id: id as u64,
                offset: 0,
                len,
                mr,
            });
        }
        Ok(Self { buffers })
    }

    pub fn buffers(&self) -> &[RegisteredBuffer] {
        &self.buffers
    }

    pub fn get(&self, id: u64) -> Option<&RegisteredBuffer> {
        self.buffers.iter().find(|b| b.id == id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{Shm, Verbs};

    #[test]
    fn register_rejects_empty_access() {
        let err =
            MemoryRegion::register::<Shm>(0x1000, 4096, AccessFlags::EMPTY, RegistrationFlavor::Host)
                .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    }

    #[test]
    fn register_rejects_misaligned_base_for_verbs() {
        let err = MemoryRegion::register::<Verbs>(
            0x1001,
            4096,
            AccessFlags::READ,
            RegistrationFlavor::Host,
        )
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    }

    #[test]
    fn remote_descriptor_subregion_and_contains() {
        let mr =
            MemoryRegion::register::<Shm>(0x2000, 4096, AccessFlags::REMOTE_READ, RegistrationFlavor::Host)
                .unwrap();
        let rd = mr.remote_descriptor();
        assert!(rd.contains(0, 4096));
        assert!(!rd.contains(4000, 200));
        let sub = rd.subregion(100, 200).unwrap();
        assert_eq!(sub.addr, 0x2000 + 100);
        assert_eq!(sub.length, 200);
    }

    #[test]
    fn mr_cache_hit_then_evict_scenario() {
        // spec.md §8 scenario 6.
        let cache = MrCache::<Shm>::new(16);
        let view1 = cache
            .get_or_register(0x3000, 4096, AccessFlags::REMOTE_WRITE)
            .unwrap();
        let view2 = cache
            .get_or_register(0x3000, 4096, AccessFlags::REMOTE_WRITE)
            .unwrap();
        assert_eq!(view1.region().key(), view2.region().key());
        assert_eq!(view1.region().refcount(), 3); // cache + 2 views

        drop(view1);
        assert!(cache
            .try_evict(0x3000, 4096, AccessFlags::REMOTE_WRITE)
            .is_err());

        drop(view2);
        cache
            .try_evict(0x3000, 4096, AccessFlags::REMOTE_WRITE)
            .unwrap();
        assert!(cache.is_empty());
    }

    #[test]
    fn buffer_registration_slicing_preserves_id_and_mr() {
        let group =
            BufferRegistration::register::<Shm>(&[(0x4000, 256), (0x5000, 512)], AccessFlags::SEND)
                .unwrap();
        let b0 = group.get(0).unwrap();
        let sliced = b0.buffer(64);
        assert_eq!(sliced.id(), 0);
        assert_eq!(sliced.len(), 64);
        assert_eq!(sliced.mr().key(), b0.mr().key());
        let advanced = sliced.clone() + 10;
        assert_eq!(advanced.id(), 0);
        assert_eq!(advanced.len(), 54);
    }
}
