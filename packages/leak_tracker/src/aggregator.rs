use crate::StackId;
use crate::bounded_map::{BoundedMap, CapacityExhausted, Exchange};

/// Live memory attributed to one call stack.
///
/// Absent lost events, `total_size` is the sum of the sizes of all outstanding allocations
/// attributed to the stack and `count` is how many of them there are.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
pub struct StackStats {
    total_size: u64,
    count: u64,
}

impl StackStats {
    /// Creates statistics with the given totals.
    #[must_use]
    pub const fn new(total_size: u64, count: u64) -> Self {
        Self { total_size, count }
    }

    /// Bytes currently outstanding from this stack.
    #[must_use]
    pub const fn total_size(&self) -> u64 {
        self.total_size
    }

    /// Number of allocations currently outstanding from this stack.
    #[must_use]
    pub const fn count(&self) -> u64 {
        self.count
    }

    /// Whether nothing is outstanding from this stack.
    ///
    /// A stack whose allocations have all been freed stays in the table with zero totals.
    #[must_use]
    pub const fn is_zero(&self) -> bool {
        self.total_size == 0 && self.count == 0
    }

    const fn with_allocation(self, size: u64) -> Self {
        Self {
            total_size: self.total_size.saturating_add(size),
            count: self.count.saturating_add(1),
        }
    }

    // A free may arrive for an allocation whose add was lost to a full table. Floor at zero
    // instead of wrapping around to a huge value.
    const fn without_allocation(self, size: u64) -> (Self, Subtraction) {
        let clamped = size > self.total_size || self.count == 0;

        let updated = Self {
            total_size: self.total_size.saturating_sub(size),
            count: self.count.saturating_sub(1),
        };

        let outcome = if clamped {
            Subtraction::Clamped
        } else {
            Subtraction::Exact
        };

        (updated, outcome)
    }
}

/// How the per-stack totals are updated when several threads touch the same stack at once.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
#[non_exhaustive]
pub enum AggregateUpdate {
    /// Read the totals, adjust them and write them back as separate steps.
    ///
    /// Two concurrent updates of the same stack can overwrite each other, losing one of them.
    /// This adds no coordination between event handlers beyond what the table itself does.
    #[default]
    ReadModifyWrite,

    /// Write back only if the totals are still the ones that were read, retrying otherwise.
    ///
    /// Exact under contention, at the cost of retries when the same stack is hot.
    CompareExchange,
}

/// Whether a subtraction had to be clamped at zero.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum Subtraction {
    Exact,
    Clamped,
}

/// Running totals of live memory per call stack.
#[derive(Debug)]
pub(crate) struct StackAggregator {
    stats: BoundedMap<StackId, StackStats>,
    mode: AggregateUpdate,
}

impl StackAggregator {
    pub(crate) fn new(max_stacks: usize, mode: AggregateUpdate) -> Self {
        Self {
            stats: BoundedMap::new(max_stacks),
            mode,
        }
    }

    /// Accounts for a new outstanding allocation of `size` bytes from `stack`.
    pub(crate) fn add(&self, stack: StackId, size: u64) -> Result<(), CapacityExhausted> {
        self.update(stack, |stats| (stats.with_allocation(size), ()))
    }

    /// Accounts for the release of an outstanding allocation of `size` bytes from `stack`.
    pub(crate) fn sub(&self, stack: StackId, size: u64) -> Result<Subtraction, CapacityExhausted> {
        self.update(stack, |stats| stats.without_allocation(size))
    }

    pub(crate) fn get(&self, stack: StackId) -> Option<StackStats> {
        self.stats.get(&stack)
    }

    pub(crate) fn snapshot(&self) -> Vec<(StackId, StackStats)> {
        self.stats.snapshot()
    }

    pub(crate) fn len(&self) -> usize {
        self.stats.len()
    }

    fn update<T>(
        &self,
        stack: StackId,
        apply: impl Fn(StackStats) -> (StackStats, T),
    ) -> Result<T, CapacityExhausted> {
        match self.mode {
            AggregateUpdate::ReadModifyWrite => {
                let current = self.stats.get(&stack).unwrap_or_default();
                let (updated, outcome) = apply(current);
                self.stats.upsert(stack, updated)?;
                Ok(outcome)
            }
            AggregateUpdate::CompareExchange => {
                let mut expected = self.stats.get(&stack);

                loop {
                    let (updated, outcome) = apply(expected.unwrap_or_default());

                    match self.stats.compare_exchange(stack, expected.as_ref(), updated) {
                        Exchange::Exchanged => return Ok(outcome),
                        Exchange::Stale(actual) => expected = actual,
                        Exchange::Full => return Err(CapacityExhausted),
                    }
                }
            }
        }
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use std::sync::Arc;
    use std::thread;

    use static_assertions::assert_impl_all;

    use super::*;

    assert_impl_all!(StackStats: Send, Sync, Copy);
    assert_impl_all!(StackAggregator: Send, Sync);

    const STACK: StackId = StackId::new(1);

    fn both_modes() -> [StackAggregator; 2] {
        [
            StackAggregator::new(16, AggregateUpdate::ReadModifyWrite),
            StackAggregator::new(16, AggregateUpdate::CompareExchange),
        ]
    }

    #[test]
    fn add_creates_stats_lazily() {
        for aggregator in both_modes() {
            assert_eq!(aggregator.get(STACK), None);

            aggregator.add(STACK, 64).unwrap();

            assert_eq!(aggregator.get(STACK), Some(StackStats::new(64, 1)));
        }
    }

    #[test]
    fn add_then_sub_returns_to_zero() {
        for aggregator in both_modes() {
            aggregator.add(STACK, 100).unwrap();
            aggregator.add(STACK, 200).unwrap();
            assert_eq!(aggregator.get(STACK), Some(StackStats::new(300, 2)));

            assert_eq!(aggregator.sub(STACK, 100), Ok(Subtraction::Exact));
            assert_eq!(aggregator.get(STACK), Some(StackStats::new(200, 1)));

            assert_eq!(aggregator.sub(STACK, 200), Ok(Subtraction::Exact));

            // Tombstone by zero - the stack is still there.
            let stats = aggregator.get(STACK).unwrap();
            assert!(stats.is_zero());
        }
    }

    #[test]
    fn sub_clamps_at_zero() {
        for aggregator in both_modes() {
            aggregator.add(STACK, 10).unwrap();

            assert_eq!(aggregator.sub(STACK, 50), Ok(Subtraction::Clamped));
            assert_eq!(aggregator.get(STACK), Some(StackStats::new(0, 0)));

            assert_eq!(aggregator.sub(STACK, 1), Ok(Subtraction::Clamped));
            assert_eq!(aggregator.get(STACK), Some(StackStats::new(0, 0)));
        }
    }

    #[test]
    fn sub_on_unknown_stack_leaves_zero_entry() {
        for aggregator in both_modes() {
            assert_eq!(aggregator.sub(STACK, 8), Ok(Subtraction::Clamped));
            assert_eq!(aggregator.get(STACK), Some(StackStats::default()));
        }
    }

    #[test]
    fn add_saturates() {
        for aggregator in both_modes() {
            aggregator.add(STACK, u64::MAX).unwrap();
            aggregator.add(STACK, 1).unwrap();

            assert_eq!(aggregator.get(STACK).unwrap().total_size(), u64::MAX);
        }
    }

    #[test]
    fn full_aggregator_rejects_new_stacks() {
        let aggregator = StackAggregator::new(1, AggregateUpdate::CompareExchange);

        aggregator.add(StackId::new(1), 8).unwrap();

        assert_eq!(aggregator.add(StackId::new(2), 8), Err(CapacityExhausted));
        assert_eq!(aggregator.get(StackId::new(2)), None);
        assert_eq!(aggregator.len(), 1);

        // Existing stacks keep working.
        aggregator.add(StackId::new(1), 8).unwrap();
        assert_eq!(aggregator.get(StackId::new(1)), Some(StackStats::new(16, 2)));
    }

    #[test]
    fn compare_exchange_is_exact_under_contention() {
        const THREADS: u64 = 4;
        const ADDS_PER_THREAD: u64 = 2_000;

        let aggregator = Arc::new(StackAggregator::new(4, AggregateUpdate::CompareExchange));

        let handles: Vec<_> = (0..THREADS)
            .map(|_| {
                let aggregator = Arc::clone(&aggregator);
                thread::spawn(move || {
                    for _ in 0..ADDS_PER_THREAD {
                        aggregator.add(STACK, 3).unwrap();
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        let expected_count = THREADS * ADDS_PER_THREAD;
        assert_eq!(
            aggregator.get(STACK),
            Some(StackStats::new(expected_count * 3, expected_count))
        );
    }

    #[test]
    fn read_modify_write_never_overcounts() {
        const THREADS: u64 = 4;
        const ADDS_PER_THREAD: u64 = 2_000;

        let aggregator = Arc::new(StackAggregator::new(4, AggregateUpdate::ReadModifyWrite));

        let handles: Vec<_> = (0..THREADS)
            .map(|_| {
                let aggregator = Arc::clone(&aggregator);
                thread::spawn(move || {
                    for _ in 0..ADDS_PER_THREAD {
                        aggregator.add(STACK, 1).unwrap();
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        // Lost updates are allowed, invented ones are not.
        let stats = aggregator.get(STACK).unwrap();
        assert!(stats.count() <= THREADS * ADDS_PER_THREAD);
        assert!(stats.count() > 0);
        assert_eq!(stats.total_size(), stats.count());
    }
}
