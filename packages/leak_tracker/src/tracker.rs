//! The correlation engine: pairs allocation requests with completions, records outstanding
//! allocations and keeps the per-stack statistics in step with them.

mod entry_points;

use std::fmt;

use tracing::{debug, info, trace};

use crate::aggregator::{StackAggregator, Subtraction};
use crate::builder::TrackerConfig;
use crate::diagnostics::Counters;
use crate::filter::Filter;
use crate::outstanding::OutstandingAllocations;
use crate::pending::{PendingOutPointers, PendingSizes};
use crate::{
    Address, AddressSpace, AllocationRecord, Clock, Diagnostics, OwnerId, Report, StackId,
    StackResolver, StackStats, Timestamp,
};

/// What happened to an allocation request.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[non_exhaustive]
pub enum RequestOutcome {
    /// The request is waiting for the matching completion from the same owner.
    Pending,

    /// The request was ignored by the owner filter, the size bounds or sampling.
    FilteredOut,

    /// The request was dropped because a table was full.
    CapacityExhausted,
}

/// What happened to an allocation completion.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[non_exhaustive]
pub enum CompletionOutcome {
    /// The allocation is now outstanding, attributed to `stack`.
    Tracked {
        /// The stack the allocation is attributed to. This is [`StackId::UNRESOLVED`]
        /// if the resolver could not identify the call stack.
        stack: StackId,
    },

    /// There was no pending request from the same owner. Either the request was filtered
    /// out or dropped, or the completion belongs to a call we never saw enter.
    Unmatched,

    /// The allocator returned the null address, so there is no live memory to track.
    Failed,

    /// The allocation could not be recorded because a table was full.
    CapacityExhausted,

    /// The allocation was ignored by the owner filter, the size bounds or sampling.
    ///
    /// Only returned by entry points that observe the request and the completion as a
    /// single event, such as [`on_kernel_alloc()`][Tracker::on_kernel_alloc].
    FilteredOut,
}

/// What happened to a free.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[non_exhaustive]
pub enum FreeOutcome {
    /// The outstanding allocation was released and subtracted from its stack.
    Released(AllocationRecord),

    /// The address was not outstanding: it was never tracked or has already been freed.
    Unmatched,
}

/// Correlates allocation and free events to track outstanding memory per call stack.
///
/// An allocation is observed in two halves. [`on_allocation_request()`][Self::on_allocation_request]
/// sees the requested size when the allocator is entered and
/// [`on_allocation_complete()`][Self::on_allocation_complete] sees the returned address.
/// The two are paired by the owner (thread or process) that made the call.
/// [`on_free()`][Self::on_free] releases the allocation again.
///
/// All event handlers take `&self` and may be called concurrently from any number of threads.
/// There is no lock spanning the whole tracker. Handlers never block on each other and never
/// fail: events that cannot be attributed are dropped and counted in the [`Diagnostics`].
///
/// # Examples
///
/// ```
/// use leak_tracker::{
///     Address, AddressSpace, OwnerId, StackId, StackResolver, StackStats, TrackerBuilder,
///     Unresolvable,
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
/// let owner = OwnerId::new(1);
///
/// tracker.on_allocation_request(owner, 64, tracker.now());
/// tracker.on_allocation_complete(&7, owner, Address::new(0x1000));
///
/// assert_eq!(tracker.stack_stats(StackId::new(7)), Some(StackStats::new(64, 1)));
///
/// tracker.on_free(Address::new(0x1000));
///
/// assert_eq!(tracker.stack_stats(StackId::new(7)), Some(StackStats::new(0, 0)));
/// ```
pub struct Tracker<R>
where
    R: StackResolver,
{
    filter: Filter,
    pending: PendingSizes,
    out_pointers: PendingOutPointers,
    outstanding: OutstandingAllocations,
    stacks: StackAggregator,

    resolver: R,
    clock: Box<dyn Clock>,

    address_space: AddressSpace,
    compensate_missing_free: bool,
    page_size: u64,
    trace_all: bool,

    counters: Counters,
}

impl<R> Tracker<R>
where
    R: StackResolver,
{
    pub(crate) fn new(config: TrackerConfig, resolver: R, clock: Box<dyn Clock>) -> Self {
        let address_space = if config.track_kernel_allocations {
            AddressSpace::Kernel
        } else {
            AddressSpace::User
        };

        info!(
            ?address_space,
            min_size = config.min_size,
            max_size = config.max_size,
            sample_stride = config.sample_stride,
            compensate_missing_free = config.compensate_missing_free,
            max_outstanding_allocations = config.max_outstanding_allocations,
            max_stacks = config.max_stacks,
            aggregate_update = ?config.aggregate_update,
            "allocation tracker created"
        );

        Self {
            filter: Filter::new(
                config.owner_filter,
                config.min_size,
                config.max_size,
                config.sample_stride,
            ),
            pending: PendingSizes::new(config.max_pending_requests),
            out_pointers: PendingOutPointers::new(config.max_pending_pointers),
            outstanding: OutstandingAllocations::new(config.max_outstanding_allocations),
            stacks: StackAggregator::new(config.max_stacks, config.aggregate_update),
            resolver,
            clock,
            address_space,
            compensate_missing_free: config.compensate_missing_free,
            page_size: config.page_size,
            trace_all: config.trace_all,
            counters: Counters::default(),
        }
    }

    /// The current time on the tracker's clock.
    ///
    /// Event sources without their own timestamps can use this for
    /// [`on_allocation_request()`][Self::on_allocation_request].
    #[must_use]
    pub fn now(&self) -> Timestamp {
        self.clock.now()
    }

    /// Handles the entry into an allocator: `owner` is requesting `size` bytes at time `now`.
    ///
    /// If the request passes the filter, the size is held until the matching
    /// [`on_allocation_complete()`][Self::on_allocation_complete] from the same owner.
    /// A pending request from the same owner that never completed is replaced.
    pub fn on_allocation_request(&self, owner: OwnerId, size: u64, now: Timestamp) -> RequestOutcome {
        if !self.filter.admit_owner(owner) || !self.filter.admit(size, now) {
            self.counters.requests_filtered.increment();
            return RequestOutcome::FilteredOut;
        }

        if self.pending.record_request(owner, size).is_err() {
            debug!(
                %owner,
                size,
                pending = self.pending.len(),
                "pending request table is full, allocation will not be tracked"
            );
            self.counters.requests_rejected.increment();
            return RequestOutcome::CapacityExhausted;
        }

        if self.trace_all {
            trace!(%owner, size, "allocation requested");
        }

        self.counters.requests_admitted.increment();
        RequestOutcome::Pending
    }

    /// Handles the return from an allocator: the call made by `owner` produced `address`.
    ///
    /// `context` identifies the call site and is passed on to the [`StackResolver`].
    pub fn on_allocation_complete(
        &self,
        context: &R::Context,
        owner: OwnerId,
        address: Address,
    ) -> CompletionOutcome {
        let Some(size) = self.pending.take_request(owner) else {
            self.counters.completions_unmatched.increment();
            return CompletionOutcome::Unmatched;
        };

        if address.is_null() {
            if self.trace_all {
                trace!(%owner, size, "allocation failed");
            }

            self.counters.completions_failed.increment();
            return CompletionOutcome::Failed;
        }

        let stack = self.resolve_stack(context);
        let record = AllocationRecord::new(address, size, stack, self.clock.now());

        match self.outstanding.insert(record) {
            Ok(None) => {}
            Ok(Some(stale)) => {
                // The allocator reused the address without us seeing a free. The stale
                // contribution to its stack stays in the statistics.
                debug!(
                    %address,
                    stale_stack = %stale.stack(),
                    stale_size = stale.size(),
                    "replaced outstanding allocation at reused address"
                );
                self.counters.records_replaced.increment();
            }
            Err(_) => {
                debug!(
                    %address,
                    size,
                    outstanding = self.outstanding.len(),
                    "outstanding allocation table is full, allocation will not be tracked"
                );
                self.counters.completions_rejected.increment();
                return CompletionOutcome::CapacityExhausted;
            }
        }

        if self.stacks.add(stack, size).is_err() {
            debug!(%stack, size, "stack table is full, allocation is not attributed");
            self.counters.stacks_rejected.increment();
        }

        if self.trace_all {
            trace!(%owner, %address, size, %stack, "allocation tracked");
        }

        self.counters.completions_tracked.increment();
        CompletionOutcome::Tracked { stack }
    }

    /// Handles a free of `address`.
    ///
    /// Freeing an address that is not outstanding is harmless, so repeated frees of the
    /// same address have the same effect as a single one.
    pub fn on_free(&self, address: Address) -> FreeOutcome {
        let Some(record) = self.outstanding.take(address) else {
            self.counters.frees_unmatched.increment();
            return FreeOutcome::Unmatched;
        };

        match self.stacks.sub(record.stack(), record.size()) {
            Ok(Subtraction::Exact) => {}
            Ok(Subtraction::Clamped) => self.counters.frees_clamped.increment(),
            Err(_) => {
                debug!(stack = %record.stack(), "stack table is full, free is not attributed");
                self.counters.stacks_rejected.increment();
            }
        }

        if self.trace_all {
            trace!(%address, size = record.size(), stack = %record.stack(), "allocation freed");
        }

        self.counters.frees_matched.increment();
        FreeOutcome::Released(record)
    }

    /// Releases whatever is outstanding at `address` before an allocator that is known to
    /// skip some frees hands out `address` again.
    ///
    /// Does nothing and returns `None` unless
    /// [`compensate_missing_free`][crate::TrackerBuilder::compensate_missing_free] is enabled.
    /// Otherwise behaves exactly like [`on_free()`][Self::on_free]; finding nothing to release
    /// is the common case and not a problem.
    pub fn on_missing_free_workaround(&self, address: Address) -> Option<FreeOutcome> {
        if !self.compensate_missing_free {
            return None;
        }

        Some(self.on_free(address))
    }

    /// The outstanding allocation at `address`, if any.
    #[must_use]
    pub fn outstanding(&self, address: Address) -> Option<AllocationRecord> {
        self.outstanding.get(address)
    }

    /// The statistics of `stack`, if any allocation has ever been attributed to it.
    #[must_use]
    pub fn stack_stats(&self, stack: StackId) -> Option<StackStats> {
        self.stacks.get(stack)
    }

    /// Enumerates the outstanding allocations.
    ///
    /// The enumeration is finite and reflects the table as it is visited; allocations made or
    /// freed concurrently may or may not be included. Call again to start over.
    pub fn list_outstanding(&self) -> impl Iterator<Item = AllocationRecord> + use<R> {
        self.outstanding.snapshot().into_iter()
    }

    /// Enumerates the per-stack statistics, including stacks that are back to zero.
    pub fn list_stack_stats(&self) -> impl Iterator<Item = (StackId, StackStats)> + use<R> {
        self.stacks.snapshot().into_iter()
    }

    /// Captures the current state of both tables for analysis.
    #[must_use]
    pub fn to_report(&self) -> Report {
        Report::new(
            self.outstanding.snapshot(),
            self.stacks.snapshot(),
            self.clock.now(),
        )
    }

    /// Counts of how events have been handled so far.
    #[must_use]
    pub fn diagnostics(&self) -> Diagnostics {
        self.counters.to_diagnostics()
    }

    /// Number of allocations currently outstanding.
    #[must_use]
    pub fn outstanding_count(&self) -> usize {
        self.outstanding.len()
    }

    /// Maximum number of allocations that can be outstanding at once.
    #[must_use]
    pub fn outstanding_capacity(&self) -> usize {
        self.outstanding.capacity()
    }

    /// Number of allocation requests waiting for their completion.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Number of distinct stacks with statistics.
    #[must_use]
    pub fn stack_count(&self) -> usize {
        self.stacks.len()
    }

    fn resolve_stack(&self, context: &R::Context) -> StackId {
        self.resolver
            .resolve_stack(context, self.address_space)
            .unwrap_or_else(|_| {
                self.counters.stacks_unresolved.increment();
                StackId::UNRESOLVED
            })
    }
}

impl<R> fmt::Debug for Tracker<R>
where
    R: StackResolver,
{
    #[cfg_attr(test, mutants::skip)] // Diagnostic output only.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tracker")
            .field("filter", &self.filter)
            .field("pending", &self.pending.len())
            .field("outstanding", &self.outstanding.len())
            .field("stacks", &self.stacks.len())
            .field("resolver", &self.resolver)
            .field("clock", &self.clock)
            .field("address_space", &self.address_space)
            .field("compensate_missing_free", &self.compensate_missing_free)
            .field("page_size", &self.page_size)
            .field("trace_all", &self.trace_all)
            .finish_non_exhaustive()
    }
}
