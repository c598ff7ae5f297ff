use std::sync::OnceLock;
use std::sync::atomic::{self, AtomicU64, AtomicUsize};

use derive_more::{Display, From, Into};

use crate::{Error, Result};

/// Default number of slots in a [`SnapshotTable`].
pub const DEFAULT_SNAPSHOT_SLOTS: usize = 1024;

/// Default number of stack bytes copied into each snapshot.
pub const DEFAULT_STACK_COPY_LEN: usize = 256;

/// Identifies a filled slot of a [`SnapshotTable`].
#[derive(Clone, Copy, Debug, Display, Eq, From, Hash, Into, Ord, PartialEq, PartialOrd)]
pub struct SlotId(usize);

impl SlotId {
    /// The position of the slot in the table.
    #[must_use]
    pub const fn index(self) -> usize {
        self.0
    }
}

/// The register values and the top of the stack of a thread at the moment of capture,
/// kept for offline stack unwinding.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Snapshot {
    registers: Box<[u64]>,
    stack: Box<[u8]>,
}

impl Snapshot {
    /// The captured register values, in the order they were given.
    #[must_use]
    pub fn registers(&self) -> &[u64] {
        &self.registers
    }

    /// The captured stack bytes, starting at the stack pointer. At most the table's
    /// stack copy length.
    #[must_use]
    pub fn stack(&self) -> &[u8] {
        &self.stack
    }
}

/// A fixed number of write-once slots for register and stack snapshots.
///
/// Slots are handed out in order by a single atomic counter. A slot is never reused, and
/// once every slot has been handed out all further captures are refused. Captures from any
/// number of threads proceed without locking.
///
/// # Examples
///
/// ```
/// use leak_tracker::SnapshotTable;
///
/// let table = SnapshotTable::new(2, 4).unwrap();
///
/// let slot = table.capture(&[0x1000, 0x7ff0], &[1, 2, 3, 4, 5, 6]).unwrap();
/// let snapshot = table.get(slot).unwrap();
///
/// assert_eq!(snapshot.registers(), &[0x1000, 0x7ff0]);
/// assert_eq!(snapshot.stack(), &[1, 2, 3, 4]);
/// ```
#[derive(Debug)]
pub struct SnapshotTable {
    slots: Box<[OnceLock<Snapshot>]>,
    stack_copy_len: usize,

    // Index of the next slot to hand out. Never exceeds `slots.len()`.
    next: AtomicUsize,
    rejected: AtomicU64,
}

impl SnapshotTable {
    /// Creates a table of `slots` slots, each copying up to `stack_copy_len` bytes of stack.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfiguration`] if either value is zero and
    /// [`Error::TableAllocation`] if the slots cannot be allocated.
    pub fn new(slots: usize, stack_copy_len: usize) -> Result<Self> {
        if slots == 0 {
            return Err(Error::InvalidConfiguration {
                setting: "slots",
                problem: "must not be zero".to_string(),
            });
        }

        if stack_copy_len == 0 {
            return Err(Error::InvalidConfiguration {
                setting: "stack_copy_len",
                problem: "must not be zero".to_string(),
            });
        }

        let mut storage: Vec<OnceLock<Snapshot>> = Vec::new();
        storage
            .try_reserve_exact(slots)
            .map_err(|source| Error::TableAllocation {
                table: "snapshot",
                capacity: slots,
                source,
            })?;
        storage.resize_with(slots, OnceLock::new);

        Ok(Self {
            slots: storage.into_boxed_slice(),
            stack_copy_len,
            next: AtomicUsize::new(0),
            rejected: AtomicU64::new(0),
        })
    }

    /// Stores `registers` and the first bytes of `stack` in the next free slot.
    ///
    /// Returns `None` if every slot has already been handed out.
    pub fn capture(&self, registers: &[u64], stack: &[u8]) -> Option<SlotId> {
        let capacity = self.slots.len();

        let Ok(index) = self
            .next
            .fetch_update(atomic::Ordering::Relaxed, atomic::Ordering::Relaxed, |next| {
                next.checked_add(1).filter(|claimed| *claimed <= capacity)
            })
        else {
            self.rejected.fetch_add(1, atomic::Ordering::Relaxed);
            return None;
        };

        let copy_len = self.stack_copy_len.min(stack.len());
        let snapshot = Snapshot {
            registers: registers.into(),
            stack: stack.get(..copy_len).unwrap_or_default().into(),
        };

        // The index was claimed exclusively, so the slot exists and is still empty.
        let slot = self.slots.get(index)?;
        _ = slot.set(snapshot);

        Some(SlotId(index))
    }

    /// The snapshot stored in `slot`.
    ///
    /// Returns `None` for a slot that does not exist or whose capture is still in progress
    /// on another thread.
    #[must_use]
    pub fn get(&self, slot: SlotId) -> Option<&Snapshot> {
        self.slots.get(slot.index())?.get()
    }

    /// Iterates over the filled slots in the order they were handed out.
    pub fn snapshots(&self) -> impl Iterator<Item = (SlotId, &Snapshot)> {
        self.slots
            .iter()
            .take(self.len())
            .enumerate()
            .filter_map(|(index, slot)| slot.get().map(|snapshot| (SlotId(index), snapshot)))
    }

    /// Number of slots handed out so far.
    #[must_use]
    pub fn len(&self) -> usize {
        self.next.load(atomic::Ordering::Relaxed)
    }

    /// Whether no slot has been handed out yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total number of slots.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Maximum number of stack bytes kept per snapshot.
    #[must_use]
    pub fn stack_copy_len(&self) -> usize {
        self.stack_copy_len
    }

    /// Number of captures refused because the table was full.
    #[must_use]
    pub fn rejected(&self) -> u64 {
        self.rejected.load(atomic::Ordering::Relaxed)
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use std::collections::HashSet;
    use std::sync::Arc;
    use std::thread;

    use static_assertions::assert_impl_all;

    use super::*;

    assert_impl_all!(SnapshotTable: Send, Sync);
    assert_impl_all!(Snapshot: Send, Sync);

    #[test]
    fn zero_slots_is_rejected() {
        let error = SnapshotTable::new(0, DEFAULT_STACK_COPY_LEN).unwrap_err();

        assert!(matches!(
            error,
            Error::InvalidConfiguration {
                setting: "slots",
                ..
            }
        ));
    }

    #[test]
    fn zero_stack_copy_len_is_rejected() {
        let error = SnapshotTable::new(DEFAULT_SNAPSHOT_SLOTS, 0).unwrap_err();

        assert!(matches!(
            error,
            Error::InvalidConfiguration {
                setting: "stack_copy_len",
                ..
            }
        ));
    }

    #[test]
    fn unreservable_table_is_reported() {
        let error = SnapshotTable::new(usize::MAX, 1).unwrap_err();

        assert!(matches!(
            error,
            Error::TableAllocation {
                table: "snapshot",
                capacity: usize::MAX,
                ..
            }
        ));
    }

    #[test]
    fn slots_are_handed_out_in_order() {
        let table = SnapshotTable::new(3, 8).unwrap();

        assert!(table.is_empty());
        assert_eq!(table.capture(&[1], &[]), Some(SlotId(0)));
        assert_eq!(table.capture(&[2], &[]), Some(SlotId(1)));
        assert_eq!(table.len(), 2);

        assert_eq!(table.get(SlotId(1)).unwrap().registers(), &[2]);
        assert_eq!(table.get(SlotId(2)), None);
    }

    #[test]
    fn short_stack_is_copied_whole() {
        let table = SnapshotTable::new(1, 256).unwrap();

        let slot = table.capture(&[], &[9, 8, 7]).unwrap();

        assert_eq!(table.get(slot).unwrap().stack(), &[9, 8, 7]);
    }

    #[test]
    fn long_stack_is_truncated() {
        let table = SnapshotTable::new(1, 4).unwrap();
        let stack: Vec<u8> = (0..100).collect();

        let slot = table.capture(&[], &stack).unwrap();

        assert_eq!(table.get(slot).unwrap().stack(), &[0, 1, 2, 3]);
        assert_eq!(table.stack_copy_len(), 4);
    }

    #[test]
    fn full_table_refuses_captures() {
        let table = SnapshotTable::new(2, 8).unwrap();

        table.capture(&[1], &[]).unwrap();
        table.capture(&[2], &[]).unwrap();

        assert_eq!(table.capture(&[3], &[]), None);
        assert_eq!(table.capture(&[4], &[]), None);

        assert_eq!(table.len(), 2);
        assert_eq!(table.rejected(), 2);

        // Earlier snapshots are untouched.
        assert_eq!(table.get(SlotId(1)).unwrap().registers(), &[2]);
    }

    #[test]
    fn snapshots_visits_filled_slots() {
        let table = SnapshotTable::new(4, 8).unwrap();

        table.capture(&[10], &[]).unwrap();
        table.capture(&[20], &[]).unwrap();

        let registers: Vec<_> = table
            .snapshots()
            .map(|(slot, snapshot)| (slot.index(), snapshot.registers().to_vec()))
            .collect();

        assert_eq!(registers, vec![(0, vec![10]), (1, vec![20])]);
    }

    #[test]
    fn concurrent_captures_never_exceed_capacity() {
        const SLOTS: usize = 100;
        const THREADS: usize = 8;
        const CAPTURES_PER_THREAD: usize = 50;

        let table = Arc::new(SnapshotTable::new(SLOTS, 16).unwrap());

        let handles: Vec<_> = (0..THREADS)
            .map(|_| {
                let table = Arc::clone(&table);
                thread::spawn(move || {
                    (0..CAPTURES_PER_THREAD)
                        .filter_map(|_| table.capture(&[1, 2, 3], &[0; 64]))
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let slots: Vec<SlotId> = handles
            .into_iter()
            .flat_map(|handle| handle.join().unwrap())
            .collect();

        let distinct: HashSet<_> = slots.iter().copied().collect();
        assert_eq!(slots.len(), SLOTS);
        assert_eq!(distinct.len(), SLOTS);
        assert_eq!(table.len(), SLOTS);
        assert_eq!(
            table.rejected(),
            u64::try_from(THREADS * CAPTURES_PER_THREAD - SLOTS).unwrap()
        );
        assert!(table.snapshots().all(|(_, snapshot)| snapshot.stack().len() == 16));
    }
}
