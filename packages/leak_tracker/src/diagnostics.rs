use std::sync::atomic::{self, AtomicU64};

/// Counts of how events were handled, for judging how complete the tracked data is.
///
/// None of these are errors. A non-zero `*_rejected` count means a table was full and the
/// statistics undercount; a large `unmatched_*` count usually means events were lost or
/// tracking started while allocations were already live.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct Diagnostics {
    requests_admitted: u64,
    requests_filtered: u64,
    requests_rejected: u64,
    completions_tracked: u64,
    completions_unmatched: u64,
    completions_failed: u64,
    completions_rejected: u64,
    stacks_unresolved: u64,
    stacks_rejected: u64,
    records_replaced: u64,
    frees_matched: u64,
    frees_unmatched: u64,
    frees_clamped: u64,
}

impl Diagnostics {
    /// Allocation requests that passed the filter and are waiting for completion.
    #[must_use]
    pub fn requests_admitted(&self) -> u64 {
        self.requests_admitted
    }

    /// Allocation requests ignored because of the owner filter, size bounds or sampling.
    #[must_use]
    pub fn requests_filtered(&self) -> u64 {
        self.requests_filtered
    }

    /// Allocation requests dropped because the pending-request table was full.
    #[must_use]
    pub fn requests_rejected(&self) -> u64 {
        self.requests_rejected
    }

    /// Completions that resulted in a new outstanding allocation record.
    #[must_use]
    pub fn completions_tracked(&self) -> u64 {
        self.completions_tracked
    }

    /// Completions for which there was no pending request from the same owner.
    #[must_use]
    pub fn completions_unmatched(&self) -> u64 {
        self.completions_unmatched
    }

    /// Completions that returned the null address, i.e. the allocation failed.
    #[must_use]
    pub fn completions_failed(&self) -> u64 {
        self.completions_failed
    }

    /// Completions dropped because the outstanding-allocation table was full.
    #[must_use]
    pub fn completions_rejected(&self) -> u64 {
        self.completions_rejected
    }

    /// Allocations attributed to [`StackId::UNRESOLVED`][crate::StackId::UNRESOLVED].
    #[must_use]
    pub fn stacks_unresolved(&self) -> u64 {
        self.stacks_unresolved
    }

    /// Statistics updates dropped because the per-stack table was full.
    #[must_use]
    pub fn stacks_rejected(&self) -> u64 {
        self.stacks_rejected
    }

    /// Outstanding records replaced because their address was reused without an observed free.
    #[must_use]
    pub fn records_replaced(&self) -> u64 {
        self.records_replaced
    }

    /// Frees that released an outstanding allocation.
    #[must_use]
    pub fn frees_matched(&self) -> u64 {
        self.frees_matched
    }

    /// Frees of addresses that were not outstanding.
    #[must_use]
    pub fn frees_unmatched(&self) -> u64 {
        self.frees_unmatched
    }

    /// Frees whose subtraction from the stack statistics had to be clamped at zero.
    #[must_use]
    pub fn frees_clamped(&self) -> u64 {
        self.frees_clamped
    }

    /// Total number of events dropped because some table was full.
    #[must_use]
    pub fn capacity_exhausted(&self) -> u64 {
        self.requests_rejected
            .saturating_add(self.completions_rejected)
            .saturating_add(self.stacks_rejected)
    }
}

/// The live counters behind [`Diagnostics`], shared by all event handlers.
#[derive(Debug, Default)]
pub(crate) struct Counters {
    pub(crate) requests_admitted: Counter,
    pub(crate) requests_filtered: Counter,
    pub(crate) requests_rejected: Counter,
    pub(crate) completions_tracked: Counter,
    pub(crate) completions_unmatched: Counter,
    pub(crate) completions_failed: Counter,
    pub(crate) completions_rejected: Counter,
    pub(crate) stacks_unresolved: Counter,
    pub(crate) stacks_rejected: Counter,
    pub(crate) records_replaced: Counter,
    pub(crate) frees_matched: Counter,
    pub(crate) frees_unmatched: Counter,
    pub(crate) frees_clamped: Counter,
}

impl Counters {
    pub(crate) fn to_diagnostics(&self) -> Diagnostics {
        Diagnostics {
            requests_admitted: self.requests_admitted.get(),
            requests_filtered: self.requests_filtered.get(),
            requests_rejected: self.requests_rejected.get(),
            completions_tracked: self.completions_tracked.get(),
            completions_unmatched: self.completions_unmatched.get(),
            completions_failed: self.completions_failed.get(),
            completions_rejected: self.completions_rejected.get(),
            stacks_unresolved: self.stacks_unresolved.get(),
            stacks_rejected: self.stacks_rejected.get(),
            records_replaced: self.records_replaced.get(),
            frees_matched: self.frees_matched.get(),
            frees_unmatched: self.frees_unmatched.get(),
            frees_clamped: self.frees_clamped.get(),
        }
    }
}

#[derive(Debug, Default)]
pub(crate) struct Counter(AtomicU64);

impl Counter {
    #[inline]
    pub(crate) fn increment(&self) {
        // Relaxed is sufficient: we only need atomicity, not ordering w.r.t. other memory ops.
        self.0.fetch_add(1, atomic::Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn get(&self) -> u64 {
        self.0.load(atomic::Ordering::Relaxed)
    }
}
