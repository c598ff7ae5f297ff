use crate::bounded_map::{BoundedMap, CapacityExhausted};
use crate::{Address, StackId, Timestamp};

/// An allocation for which no matching free has been observed yet.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct AllocationRecord {
    address: Address,
    size: u64,
    stack: StackId,
    timestamp: Timestamp,
}

impl AllocationRecord {
    pub(crate) const fn new(address: Address, size: u64, stack: StackId, timestamp: Timestamp) -> Self {
        Self {
            address,
            size,
            stack,
            timestamp,
        }
    }

    /// The address returned by the allocator.
    #[must_use]
    pub const fn address(&self) -> Address {
        self.address
    }

    /// The size requested when the allocator was entered.
    ///
    /// Frees never carry a size, so this is the size that is subtracted again on free.
    #[must_use]
    pub const fn size(&self) -> u64 {
        self.size
    }

    /// The call stack the allocation is attributed to.
    #[must_use]
    pub const fn stack(&self) -> StackId {
        self.stack
    }

    /// When the allocation completed.
    #[must_use]
    pub const fn timestamp(&self) -> Timestamp {
        self.timestamp
    }

    /// How long the allocation has been outstanding as of `now`.
    ///
    /// Zero if `now` precedes the allocation (e.g. timestamps from different clocks).
    #[must_use]
    pub const fn age(&self, now: Timestamp) -> u64 {
        now.saturating_sub(self.timestamp)
    }
}

/// Memory currently believed to be live, keyed by address.
#[derive(Debug)]
pub(crate) struct OutstandingAllocations {
    records: BoundedMap<Address, AllocationRecord>,
}

impl OutstandingAllocations {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            records: BoundedMap::new(capacity),
        }
    }

    /// Records a new outstanding allocation.
    ///
    /// If a record already exists at the same address, the allocator has reused the address
    /// without us observing the free. The stale record is replaced and returned, but its
    /// contribution to the stack statistics is left alone.
    pub(crate) fn insert(
        &self,
        record: AllocationRecord,
    ) -> Result<Option<AllocationRecord>, CapacityExhausted> {
        self.records.upsert(record.address(), record)
    }

    pub(crate) fn take(&self, address: Address) -> Option<AllocationRecord> {
        self.records.take(&address)
    }

    pub(crate) fn get(&self, address: Address) -> Option<AllocationRecord> {
        self.records.get(&address)
    }

    pub(crate) fn snapshot(&self) -> Vec<AllocationRecord> {
        self.records
            .snapshot()
            .into_iter()
            .map(|(_, record)| record)
            .collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.records.len()
    }

    pub(crate) fn capacity(&self) -> usize {
        self.records.capacity()
    }
}
