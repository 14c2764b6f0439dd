//! Address vector (spec.md §3/§4.D): a dense, handle-based peer directory.
//!
//! Handles are stable for the life of the AV unless explicitly removed —
//! implemented as a generation-free dense `Vec<Option<Address>>` with a
//! free-list, which is the simplest structure that satisfies "stable until
//! removed" without pulling in a slotmap dependency the rest of the corpus
//! doesn't use.

use crate::address::Address;
use crate::error::{Error, ErrorKind, Result};
use std::collections::HashMap;

/// Opaque AV handle. `u64::MAX` is reserved as the "invalid" sentinel,
/// matching spec.md §4.D ("-1 meaning invalid").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AvHandle(u64);

impl AvHandle {
    pub const INVALID: Self = Self(u64::MAX);

    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub fn is_valid(self) -> bool {
        self.0 != u64::MAX
    }

    pub fn raw(self) -> u64 {
        self.0
    }
}

/// Organization hint passed to the provider; purely advisory at this layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AvType {
    #[default]
    Map,
    Table,
}

struct Slot {
    address: Address,
    user_context: Option<u64>,
}

#[derive(Default)]
pub struct AddressVector {
    av_type: AvType,
    slots: Vec<Option<Slot>>,
    free_list: Vec<u64>,
    by_address: HashMap<Address, AvHandle>,
}

impl AddressVector {
    pub fn new(av_type: AvType) -> Self {
        Self {
            av_type,
            slots: Vec::new(),
            free_list: Vec::new(),
            by_address: HashMap::new(),
        }
    }

    pub fn av_type(&self) -> AvType {
        self.av_type
    }

    pub fn insert(&mut self, addr: Address, ctx: Option<u64>) -> AvHandle {
        if let Some(&existing) = self.by_address.get(&addr) {
            return existing;
        }
        let slot = Slot {
            address: addr,
            user_context: ctx,
        };
        let handle = if let Some(idx) = self.free_list.pop() {
            self.slots[idx as usize] = Some(slot);
            AvHandle(idx)
        } else {
            self.slots.push(Some(slot));
            AvHandle((self.slots.len() - 1) as u64)
        };
        self.by_address.insert(addr, handle);
        handle
    }

    /// Batch-insert parallel spans of addresses and optional per-entry
    /// contexts; returns the count successfully inserted (spec.md §4.D).
    pub fn insert_batch(
        &mut self,
        addrs: &[Address],
        contexts: Option<&[Option<u64>]>,
        out_handles: &mut [AvHandle],
    ) -> usize {
        let n = addrs.len().min(out_handles.len());
        for i in 0..n {
            let ctx = contexts.and_then(|c| c.get(i).copied()).flatten();
            out_handles[i] = self.insert(addrs[i], ctx);
        }
        n
    }

    pub fn remove(&mut self, handle: AvHandle) -> Result<()> {
        let idx = handle.0 as usize;
        let slot = self
            .slots
            .get_mut(idx)
            .ok_or_else(|| invalid_handle(handle))?;
        if let Some(removed) = slot.take() {
            self.by_address.remove(&removed.address);
            self.free_list.push(handle.0);
            Ok(())
        } else {
            Err(invalid_handle(handle))
        }
    }

    pub fn lookup(&self, handle: AvHandle) -> Result<Address> {
        self.slots
            .get(handle.0 as usize)
            .and_then(|s| s.as_ref())
            .map(|s| s.address)
            .ok_or_else(|| invalid_handle(handle))
    }

    pub fn user_context(&self, handle: AvHandle) -> Option<u64> {
        self.slots
            .get(handle.0 as usize)
            .and_then(|s| s.as_ref())
            .and_then(|s| s.user_context)
    }

    pub fn address_to_string(&self, handle: AvHandle) -> Result<String> {
        let addr = self.lookup(handle)?;
        Ok(format!("{addr:?}"))
    }

    pub fn len(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn invalid_handle(handle: AvHandle) -> Error {
    Error::new(
        ErrorKind::InvalidArgument,
        format!("address vector handle {} is not valid", handle.0),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ip(o: u8, port: u16) -> Address {
        Address::Ipv4 {
            octets: [10, 0, 0, o],
            port,
        }
    }

    #[test]
    fn insert_then_lookup_roundtrips() {
        let mut av = AddressVector::new(AvType::Map);
        let h = av.insert(ip(1, 9228), None);
        assert!(h.is_valid());
        assert_eq!(av.lookup(h).unwrap(), ip(1, 9228));
    }

    #[test]
    fn remove_then_lookup_fails() {
        let mut av = AddressVector::new(AvType::Map);
        let h = av.insert(ip(2, 9228), None);
        av.remove(h).unwrap();
        assert!(av.lookup(h).is_err());
    }

    #[test]
    fn handles_are_stable_across_inserts() {
        let mut av = AddressVector::new(AvType::Map);
        let h1 = av.insert(ip(1, 1), None);
        let h2 = av.insert(ip(2, 1), None);
        assert_ne!(h1, h2);
        assert_eq!(av.lookup(h1).unwrap(), ip(1, 1));
    }

    #[test]
    fn insert_batch_returns_count() {
        let mut av = AddressVector::new(AvType::Table);
        let addrs = [ip(1, 1), ip(2, 2), ip(3, 3)];
        let mut handles = [AvHandle::INVALID; 3];
        let n = av.insert_batch(&addrs, None, &mut handles);
        assert_eq!(n, 3);
        assert!(handles.iter().all(|h| h.is_valid()));
    }

    #[test]
    fn repeated_insert_of_same_address_returns_same_handle() {
        let mut av = AddressVector::new(AvType::Map);
        let h1 = av.insert(ip(9, 1), None);
        let h2 = av.insert(ip(9, 1), None);
        assert_eq!(h1, h2);
    }
}
