//! Point-in-time views of the tracked allocations.

use std::cmp::Reverse;

use crate::{AllocationRecord, StackId, StackStats, Timestamp};

/// The outstanding allocations and per-stack statistics of a [`Tracker`][crate::Tracker],
/// captured at one point in time.
///
/// A `Report` owns its data and can be sent to other threads for analysis while the tracker
/// keeps processing events. The two tables are visited one after the other without stopping
/// event processing, so under concurrent activity they may not agree exactly.
///
/// # Examples
///
/// ```
/// use leak_tracker::{
///     Address, AddressSpace, OwnerId, StackId, StackResolver, TrackerBuilder, Unresolvable,
/// };
///
/// #[derive(Debug)]
/// struct CallSiteResolver;
///
/// impl StackResolver for CallSiteResolver {
///     type Context = u64;
///
///     fn resolve_stack(&self, call_site: &u64, _: AddressSpace) -> Result<StackId, Unresolvable> {
///         Ok(StackId::new(*call_site))
///     }
/// }
///
/// let tracker = TrackerBuilder::new().build(CallSiteResolver).unwrap();
///
/// for (call_site, size, address) in [(1, 100, 0x1000), (2, 500, 0x2000), (1, 100, 0x3000)] {
///     let owner = OwnerId::new(9);
///     tracker.on_allocation_request(owner, size, tracker.now());
///     tracker.on_allocation_complete(&call_site, owner, Address::new(address));
/// }
///
/// let report = tracker.to_report();
///
/// assert_eq!(report.total_outstanding_bytes(), 700);
///
/// let (largest, stats) = report.top_stacks(1)[0];
/// assert_eq!(largest, StackId::new(2));
/// assert_eq!(stats.total_size(), 500);
/// ```
#[derive(Clone, Debug)]
pub struct Report {
    outstanding: Vec<AllocationRecord>,
    stacks: Vec<(StackId, StackStats)>,
    captured_at: Timestamp,
}

impl Report {
    pub(crate) fn new(
        mut outstanding: Vec<AllocationRecord>,
        mut stacks: Vec<(StackId, StackStats)>,
        captured_at: Timestamp,
    ) -> Self {
        outstanding.sort_unstable_by_key(|record| (record.timestamp(), record.address()));
        stacks.sort_unstable_by_key(|(stack, _)| *stack);

        Self {
            outstanding,
            stacks,
            captured_at,
        }
    }

    /// The tracker clock's time when the report was created.
    #[must_use]
    pub fn captured_at(&self) -> Timestamp {
        self.captured_at
    }

    /// The outstanding allocations, oldest first.
    #[must_use]
    pub fn outstanding(&self) -> &[AllocationRecord] {
        &self.outstanding
    }

    /// The statistics of every stack that has had an allocation attributed to it,
    /// ordered by stack.
    #[must_use]
    pub fn stack_stats(&self) -> &[(StackId, StackStats)] {
        &self.stacks
    }

    /// Up to `n` stacks with the most outstanding bytes, largest first.
    ///
    /// Stacks with equal totals are ordered by stack. Stacks that are back to zero are
    /// never included.
    #[must_use]
    pub fn top_stacks(&self, n: usize) -> Vec<(StackId, StackStats)> {
        let mut top: Vec<_> = self
            .stacks
            .iter()
            .filter(|(_, stats)| !stats.is_zero())
            .copied()
            .collect();

        top.sort_by_key(|(stack, stats)| (Reverse(stats.total_size()), *stack));
        top.truncate(n);
        top
    }

    /// The outstanding allocations that were at least `min_age` old at time `now`,
    /// oldest first.
    pub fn older_than(
        &self,
        now: Timestamp,
        min_age: u64,
    ) -> impl Iterator<Item = &AllocationRecord> {
        self.outstanding
            .iter()
            .filter(move |record| record.age(now) >= min_age)
    }

    /// The sum of the sizes of all outstanding allocations.
    #[must_use]
    pub fn total_outstanding_bytes(&self) -> u64 {
        self.outstanding
            .iter()
            .fold(0_u64, |total, record| total.saturating_add(record.size()))
    }

    /// Whether there is nothing outstanding in this report.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.outstanding.is_empty() && self.stacks.iter().all(|(_, stats)| stats.is_zero())
    }
}
