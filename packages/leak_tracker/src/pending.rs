use crate::OwnerId;
use crate::bounded_map::{BoundedMap, CapacityExhausted};

/// Bridges the two halves of an allocator call: the size seen when the call is entered
/// and the address seen when it returns.
///
/// One entry per owner. A second request from the same owner before the first one
/// completes replaces it (last request wins).
#[derive(Debug)]
pub(crate) struct PendingSizes {
    sizes: BoundedMap<OwnerId, u64>,
}

impl PendingSizes {
    pub(crate) fn new(max_owners: usize) -> Self {
        Self {
            sizes: BoundedMap::new(max_owners),
        }
    }

    /// Remembers that `owner` has requested `size` bytes.
    ///
    /// Fails only if `owner` has no pending request and the table is full, in which case
    /// the request is dropped and its completion will be unmatched.
    pub(crate) fn record_request(&self, owner: OwnerId, size: u64) -> Result<(), CapacityExhausted> {
        self.sizes.upsert(owner, size).map(|_| ())
    }

    /// Consumes the pending request of `owner`, if there is one.
    pub(crate) fn take_request(&self, owner: OwnerId) -> Option<u64> {
        self.sizes.take(&owner)
    }

    pub(crate) fn len(&self) -> usize {
        self.sizes.len()
    }
}

/// Remembers, per owner, where an allocator will write the address it produces.
///
/// Some allocator entry points (`posix_memalign` and friends) do not return the address but
/// write it through a caller-supplied out-pointer. The out-pointer is only visible when the
/// call is entered, so we hold on to it until the call returns.
#[derive(Debug)]
pub(crate) struct PendingOutPointers {
    pointers: BoundedMap<OwnerId, u64>,
}

impl PendingOutPointers {
    pub(crate) fn new(max_owners: usize) -> Self {
        Self {
            pointers: BoundedMap::new(max_owners),
        }
    }

    pub(crate) fn record(&self, owner: OwnerId, out_pointer: u64) -> Result<(), CapacityExhausted> {
        self.pointers.upsert(owner, out_pointer).map(|_| ())
    }

    pub(crate) fn take(&self, owner: OwnerId) -> Option<u64> {
        self.pointers.take(&owner)
    }
}
