use std::cell::Cell;
use std::marker::PhantomData;

use crate::{AggregateUpdate, Clock, Error, MonotonicClock, OwnerId, StackResolver, Tracker};

/// Default bound on concurrent allocation requests awaiting completion.
pub const DEFAULT_MAX_PENDING_REQUESTS: usize = 10_240;

/// Default bound on outstanding allocations.
pub const DEFAULT_MAX_OUTSTANDING_ALLOCATIONS: usize = 1_000_000;

/// Default bound on distinct call stacks with statistics.
pub const DEFAULT_MAX_STACKS: usize = 10_240;

/// Default page size used to size page-granularity allocations.
pub const DEFAULT_PAGE_SIZE: u64 = 4096;

/// Builder for creating an instance of [`Tracker`].
///
/// All settings are optional. The defaults track every allocation of every owner, without
/// sampling, in the user address space.
///
/// The configuration is fixed once the tracker is built.
///
/// # Examples
///
/// ```
/// use leak_tracker::{AddressSpace, StackId, StackResolver, TrackerBuilder, Unresolvable};
///
/// #[derive(Debug)]
/// struct ReturnAddressResolver;
///
/// impl StackResolver for ReturnAddressResolver {
///     type Context = u64;
///
///     fn resolve_stack(&self, context: &u64, _: AddressSpace) -> Result<StackId, Unresolvable> {
///         Ok(StackId::new(*context))
///     }
/// }
///
/// let tracker = TrackerBuilder::new()
///     .min_size(64)
///     .sample_stride(10)
///     .build(ReturnAddressResolver)
///     .unwrap();
///
/// assert_eq!(tracker.outstanding_count(), 0);
/// ```
///
/// # Thread safety
///
/// The builder is thread-mobile ([`Send`]) but not thread-safe ([`Sync`]).
#[derive(Debug)]
#[must_use]
pub struct TrackerBuilder {
    owner_filter: Option<OwnerId>,
    min_size: u64,
    max_size: u64,
    sample_stride: u64,
    trace_all: bool,
    track_kernel_allocations: bool,
    compensate_missing_free: bool,
    page_size: u64,
    max_pending_requests: usize,
    max_outstanding_allocations: usize,
    max_stacks: usize,
    max_pending_pointers: usize,
    aggregate_update: AggregateUpdate,
    clock: Option<Box<dyn Clock>>,

    _not_sync: PhantomData<Cell<()>>,
}

impl TrackerBuilder {
    /// Creates a builder with the default configuration.
    pub fn new() -> Self {
        Self {
            owner_filter: None,
            min_size: 0,
            max_size: u64::MAX,
            sample_stride: 1,
            trace_all: false,
            track_kernel_allocations: false,
            compensate_missing_free: false,
            page_size: DEFAULT_PAGE_SIZE,
            max_pending_requests: DEFAULT_MAX_PENDING_REQUESTS,
            max_outstanding_allocations: DEFAULT_MAX_OUTSTANDING_ALLOCATIONS,
            max_stacks: DEFAULT_MAX_STACKS,
            max_pending_pointers: DEFAULT_MAX_PENDING_REQUESTS,
            aggregate_update: AggregateUpdate::default(),
            clock: None,
            _not_sync: PhantomData,
        }
    }

    /// Only tracks allocations requested by `owner`, ignoring every other owner.
    pub fn owner_filter(mut self, owner: OwnerId) -> Self {
        self.owner_filter = Some(owner);
        self
    }

    /// Ignores allocation requests smaller than `bytes`.
    pub fn min_size(mut self, bytes: u64) -> Self {
        self.min_size = bytes;
        self
    }

    /// Ignores allocation requests larger than `bytes`.
    pub fn max_size(mut self, bytes: u64) -> Self {
        self.max_size = bytes;
        self
    }

    /// Tracks only the allocation requests observed in every `stride`-th time bucket of the
    /// tracker's clock. A stride of 1 (the default) tracks everything.
    ///
    /// This trades accuracy for overhead. The sampled fraction is approximate: it depends on
    /// when events arrive, not on how many there are.
    pub fn sample_stride(mut self, stride: u64) -> Self {
        self.sample_stride = stride;
        self
    }

    /// Emits a `trace`-level log record for every processed event.
    pub fn trace_all(mut self, enabled: bool) -> Self {
        self.trace_all = enabled;
        self
    }

    /// Resolves call stacks in the kernel address space instead of the user address space.
    pub fn track_kernel_allocations(mut self, enabled: bool) -> Self {
        self.track_kernel_allocations = enabled;
        self
    }

    /// Releases any outstanding record at an address before a kernel allocation at that
    /// address is tracked.
    ///
    /// Some kernel allocation paths hand out addresses whose previous free was never
    /// reported. Without compensation, the stale record is silently replaced and its
    /// contribution to the stack statistics is never removed.
    ///
    /// If the allocator does report such a free after all, it arrives for an address the
    /// tracker has already released and is treated as unmatched.
    pub fn compensate_missing_free(mut self, enabled: bool) -> Self {
        self.compensate_missing_free = enabled;
        self
    }

    /// The size of one page, used to convert page-order allocations into bytes.
    pub fn page_size(mut self, bytes: u64) -> Self {
        self.page_size = bytes;
        self
    }

    /// Maximum number of owners that can have an allocation request in flight at once.
    pub fn max_pending_requests(mut self, count: usize) -> Self {
        self.max_pending_requests = count;
        self
    }

    /// Maximum number of outstanding allocations that can be tracked.
    pub fn max_outstanding_allocations(mut self, count: usize) -> Self {
        self.max_outstanding_allocations = count;
        self
    }

    /// Maximum number of distinct call stacks for which statistics are kept.
    pub fn max_stacks(mut self, count: usize) -> Self {
        self.max_stacks = count;
        self
    }

    /// Maximum number of owners that can have an out-pointer allocation
    /// (`posix_memalign`) in flight at once.
    pub fn max_pending_pointers(mut self, count: usize) -> Self {
        self.max_pending_pointers = count;
        self
    }

    /// How per-stack statistics are updated under contention.
    pub fn aggregate_update(mut self, mode: AggregateUpdate) -> Self {
        self.aggregate_update = mode;
        self
    }

    /// Uses `clock` for allocation timestamps instead of a [`MonotonicClock`].
    pub fn clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Some(Box::new(clock));
        self
    }

    /// Builds the tracker, attributing allocations to stacks via `resolver`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfiguration`] if the size bounds are inverted, if the sample
    /// stride or page size is zero, or if any table has zero capacity.
    pub fn build<R>(self, resolver: R) -> crate::Result<Tracker<R>>
    where
        R: StackResolver,
    {
        if self.min_size > self.max_size {
            return Err(Error::InvalidConfiguration {
                setting: "min_size",
                problem: format!(
                    "must not exceed max_size ({} > {})",
                    self.min_size, self.max_size
                ),
            });
        }

        require_non_zero("sample_stride", self.sample_stride)?;
        require_non_zero("page_size", self.page_size)?;
        require_non_zero("max_pending_requests", self.max_pending_requests)?;
        require_non_zero(
            "max_outstanding_allocations",
            self.max_outstanding_allocations,
        )?;
        require_non_zero("max_stacks", self.max_stacks)?;
        require_non_zero("max_pending_pointers", self.max_pending_pointers)?;

        let clock = self
            .clock
            .unwrap_or_else(|| Box::new(MonotonicClock::new()));

        Ok(Tracker::new(
            TrackerConfig {
                owner_filter: self.owner_filter,
                min_size: self.min_size,
                max_size: self.max_size,
                sample_stride: self.sample_stride,
                trace_all: self.trace_all,
                track_kernel_allocations: self.track_kernel_allocations,
                compensate_missing_free: self.compensate_missing_free,
                page_size: self.page_size,
                max_pending_requests: self.max_pending_requests,
                max_outstanding_allocations: self.max_outstanding_allocations,
                max_stacks: self.max_stacks,
                max_pending_pointers: self.max_pending_pointers,
                aggregate_update: self.aggregate_update,
            },
            resolver,
            clock,
        ))
    }
}

impl Default for TrackerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Validated configuration handed from the builder to the tracker.
#[derive(Clone, Copy, Debug)]
pub(crate) struct TrackerConfig {
    pub(crate) owner_filter: Option<OwnerId>,
    pub(crate) min_size: u64,
    pub(crate) max_size: u64,
    pub(crate) sample_stride: u64,
    pub(crate) trace_all: bool,
    pub(crate) track_kernel_allocations: bool,
    pub(crate) compensate_missing_free: bool,
    pub(crate) page_size: u64,
    pub(crate) max_pending_requests: usize,
    pub(crate) max_outstanding_allocations: usize,
    pub(crate) max_stacks: usize,
    pub(crate) max_pending_pointers: usize,
    pub(crate) aggregate_update: AggregateUpdate,
}

fn require_non_zero<T>(setting: &'static str, value: T) -> crate::Result<()>
where
    T: Default + PartialEq,
{
    if value == T::default() {
        return Err(Error::InvalidConfiguration {
            setting,
            problem: "must not be zero".to_string(),
        });
    }

    Ok(())
}
