use std::hash::Hash;
use std::sync::atomic::{self, AtomicUsize};

use foldhash::fast::RandomState;
use scc::hash_map::Entry;

/// Returned when a table refuses to accept a new key because it is full.
///
/// This is not an error in the usual sense: the caller drops the event and carries on.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) struct CapacityExhausted;

/// Result of [`BoundedMap::compare_exchange`].
#[derive(Debug, Eq, PartialEq)]
pub(crate) enum Exchange<V> {
    /// The stored value matched the expected value and was replaced.
    Exchanged,

    /// The stored value did not match. Carries the value that is actually stored
    /// (`None` if the key is absent) so the caller can retry against it.
    Stale(Option<V>),

    /// The key was absent as expected but the table has no room for it.
    Full,
}

/// A concurrent hash map with a fixed upper bound on the number of keys.
///
/// Individual operations are atomic with respect to a single key. There is no lock
/// spanning the whole map, so operations on different keys proceed in parallel.
///
/// Inserting a new key when the map is full fails closed: the insert is refused and the
/// caller is told so. Replacing the value of an existing key always succeeds.
#[derive(Debug)]
pub(crate) struct BoundedMap<K, V>
where
    K: Eq + Hash,
{
    entries: scc::HashMap<K, V, RandomState>,

    // Number of keys admitted into `entries`. Claimed before a vacant key is filled and
    // released after a key is removed, so it never exceeds `capacity`.
    len: AtomicUsize,
    capacity: usize,
}

impl<K, V> BoundedMap<K, V>
where
    K: Eq + Hash,
{
    /// Creates an empty map that will hold at most `capacity` keys.
    ///
    /// Storage is pre-sized for a fraction of the capacity, so large bounds do not
    /// translate into large up-front allocations.
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            entries: scc::HashMap::with_capacity_and_hasher(
                capacity.min(INITIAL_CAPACITY_CEILING),
                RandomState::default(),
            ),
            len: AtomicUsize::new(0),
            capacity,
        }
    }

    pub(crate) fn capacity(&self) -> usize {
        self.capacity
    }

    pub(crate) fn len(&self) -> usize {
        self.len.load(atomic::Ordering::Relaxed)
    }

    /// Inserts `value` under `key`, replacing and returning any previous value.
    ///
    /// Fails with [`CapacityExhausted`] if `key` is not yet present and the map is full.
    pub(crate) fn upsert(&self, key: K, value: V) -> Result<Option<V>, CapacityExhausted> {
        match self.entries.entry(key) {
            Entry::Occupied(mut occupied) => Ok(Some(occupied.insert(value))),
            Entry::Vacant(vacant) => {
                if !self.try_claim_slot() {
                    return Err(CapacityExhausted);
                }

                vacant.insert_entry(value);
                Ok(None)
            }
        }
    }

    /// Removes `key` from the map, returning its value if it was present.
    pub(crate) fn take(&self, key: &K) -> Option<V> {
        let (_, value) = self.entries.remove(key)?;
        self.release_slot();
        Some(value)
    }

    /// Replaces the value under `key` with `new` only if the stored value equals `expected`,
    /// where `None` means "the key is absent".
    pub(crate) fn compare_exchange(&self, key: K, expected: Option<&V>, new: V) -> Exchange<V>
    where
        V: Clone + PartialEq,
    {
        match self.entries.entry(key) {
            Entry::Occupied(mut occupied) => {
                if expected == Some(occupied.get()) {
                    occupied.insert(new);
                    Exchange::Exchanged
                } else {
                    Exchange::Stale(Some(occupied.get().clone()))
                }
            }
            Entry::Vacant(vacant) => {
                if expected.is_some() {
                    return Exchange::Stale(None);
                }

                if !self.try_claim_slot() {
                    return Exchange::Full;
                }

                vacant.insert_entry(new);
                Exchange::Exchanged
            }
        }
    }

    pub(crate) fn get(&self, key: &K) -> Option<V>
    where
        V: Clone,
    {
        self.entries.read(key, |_, value| value.clone())
    }

    /// Copies out every entry present at the time each bucket is visited.
    ///
    /// Entries inserted or removed concurrently may or may not be observed.
    pub(crate) fn snapshot(&self) -> Vec<(K, V)>
    where
        K: Clone,
        V: Clone,
    {
        let mut entries = Vec::with_capacity(self.len());
        self.entries.scan(|key, value| entries.push((key.clone(), value.clone())));
        entries
    }

    fn try_claim_slot(&self) -> bool {
        self.len
            .fetch_update(atomic::Ordering::Relaxed, atomic::Ordering::Relaxed, |len| {
                len.checked_add(1).filter(|next| *next <= self.capacity)
            })
            .is_ok()
    }

    fn release_slot(&self) {
        // Only called after a successful removal, which implies a prior successful claim.
        self.len.fetch_sub(1, atomic::Ordering::Relaxed);
    }
}

/// Upper bound on how many entries we pre-size a table for.
const INITIAL_CAPACITY_CEILING: usize = 4096;
