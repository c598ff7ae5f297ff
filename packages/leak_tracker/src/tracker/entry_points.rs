//! Adapters from the events of specific allocator families to the generic
//! request/complete/free handlers of the [`Tracker`].
//!
//! Kernel allocators report the requested size and the returned address in one event, so
//! their adapters perform the request and the completion in one step. User-space allocators
//! are observed on entry and on exit, with the exit of every family handled by
//! [`Tracker::on_allocation_exit()`].

use tracing::debug;

use crate::{
    Address, CompletionOutcome, FreeOutcome, OwnerId, RequestOutcome, StackResolver, Timestamp,
    Tracker,
};

impl<R> Tracker<R>
where
    R: StackResolver,
{
    /// A kernel object allocation (`kmalloc`, `kmem_cache_alloc` and their NUMA node variants)
    /// of `bytes` at `address`.
    ///
    /// With [`compensate_missing_free`][crate::TrackerBuilder::compensate_missing_free]
    /// enabled, anything still outstanding at `address` is released first.
    pub fn on_kernel_alloc(
        &self,
        context: &R::Context,
        owner: OwnerId,
        address: Address,
        bytes: u64,
    ) -> CompletionOutcome {
        _ = self.on_missing_free_workaround(address);

        self.allocate(context, owner, address, bytes)
    }

    /// A kernel object free (`kfree`, `kmem_cache_free`).
    pub fn on_kernel_free(&self, address: Address) -> FreeOutcome {
        self.on_free(address)
    }

    /// A page allocation of `2^order` pages, identified by the frame number of its first page.
    pub fn on_page_alloc(
        &self,
        context: &R::Context,
        owner: OwnerId,
        page_frame: u64,
        order: u32,
    ) -> CompletionOutcome {
        let bytes = 1_u64
            .checked_shl(order)
            .and_then(|pages| pages.checked_mul(self.page_size))
            .unwrap_or(u64::MAX);

        self.allocate(context, owner, Address::new(page_frame), bytes)
    }

    /// A page free, identified by the frame number of the first page.
    pub fn on_page_free(&self, page_frame: u64) -> FreeOutcome {
        self.on_free(Address::new(page_frame))
    }

    /// A per-CPU allocation of `bytes` at `address`.
    pub fn on_percpu_alloc(
        &self,
        context: &R::Context,
        owner: OwnerId,
        address: Address,
        bytes: u64,
    ) -> CompletionOutcome {
        self.allocate(context, owner, address, bytes)
    }

    /// A per-CPU free.
    pub fn on_percpu_free(&self, address: Address) -> FreeOutcome {
        self.on_free(address)
    }

    /// Entry into `malloc(size)`.
    pub fn on_malloc_enter(&self, owner: OwnerId, size: u64, now: Timestamp) -> RequestOutcome {
        self.on_allocation_request(owner, size, now)
    }

    /// Entry into `calloc(nmemb, size)`.
    ///
    /// A request whose total size does not fit in 64 bits is filtered out; the allocator will
    /// fail it anyway.
    pub fn on_calloc_enter(
        &self,
        owner: OwnerId,
        nmemb: u64,
        size: u64,
        now: Timestamp,
    ) -> RequestOutcome {
        let Some(total) = nmemb.checked_mul(size) else {
            self.counters.requests_filtered.increment();
            return RequestOutcome::FilteredOut;
        };

        self.on_allocation_request(owner, total, now)
    }

    /// Entry into `realloc(address, size)`.
    ///
    /// The old block is considered freed right away; the new block is tracked on exit like
    /// any other allocation.
    pub fn on_realloc_enter(
        &self,
        owner: OwnerId,
        address: Address,
        size: u64,
        now: Timestamp,
    ) -> RequestOutcome {
        if !address.is_null() {
            _ = self.on_free(address);
        }

        self.on_allocation_request(owner, size, now)
    }

    /// Entry into `mmap()` for a mapping of `length` bytes.
    pub fn on_mmap_enter(&self, owner: OwnerId, length: u64, now: Timestamp) -> RequestOutcome {
        self.on_allocation_request(owner, length, now)
    }

    /// Entry into `munmap()` of the mapping at `address`.
    pub fn on_munmap_enter(&self, address: Address) -> FreeOutcome {
        self.on_free(address)
    }

    /// Entry into `aligned_alloc(alignment, size)`. The alignment does not affect tracking.
    pub fn on_aligned_alloc_enter(
        &self,
        owner: OwnerId,
        _alignment: u64,
        size: u64,
        now: Timestamp,
    ) -> RequestOutcome {
        self.on_allocation_request(owner, size, now)
    }

    /// Entry into `memalign(alignment, size)`. The alignment does not affect tracking.
    pub fn on_memalign_enter(
        &self,
        owner: OwnerId,
        _alignment: u64,
        size: u64,
        now: Timestamp,
    ) -> RequestOutcome {
        self.on_allocation_request(owner, size, now)
    }

    /// Entry into `valloc(size)`.
    pub fn on_valloc_enter(&self, owner: OwnerId, size: u64, now: Timestamp) -> RequestOutcome {
        self.on_allocation_request(owner, size, now)
    }

    /// Entry into `pvalloc(size)`.
    pub fn on_pvalloc_enter(&self, owner: OwnerId, size: u64, now: Timestamp) -> RequestOutcome {
        self.on_allocation_request(owner, size, now)
    }

    /// Entry into `posix_memalign(out_pointer, alignment, size)`.
    ///
    /// The allocator does not return the new address but writes it to `out_pointer`, so the
    /// out-pointer is held until [`on_posix_memalign_exit()`][Self::on_posix_memalign_exit]
    /// can read it.
    pub fn on_posix_memalign_enter(
        &self,
        owner: OwnerId,
        out_pointer: u64,
        size: u64,
        now: Timestamp,
    ) -> RequestOutcome {
        if self.out_pointers.record(owner, out_pointer).is_err() {
            debug!(
                %owner,
                size,
                "pending out-pointer table is full, allocation will not be tracked"
            );
            self.counters.requests_rejected.increment();
            return RequestOutcome::CapacityExhausted;
        }

        let outcome = self.on_allocation_request(owner, size, now);

        if outcome != RequestOutcome::Pending {
            _ = self.out_pointers.take(owner);
        }

        outcome
    }

    /// Return from `posix_memalign()`.
    ///
    /// `read_pointer` is given the out-pointer recorded on entry and returns the address the
    /// allocator stored there, or `None` if that memory could not be read.
    pub fn on_posix_memalign_exit(
        &self,
        context: &R::Context,
        owner: OwnerId,
        read_pointer: impl FnOnce(u64) -> Option<u64>,
    ) -> CompletionOutcome {
        let Some(out_pointer) = self.out_pointers.take(owner) else {
            self.counters.completions_unmatched.increment();
            return CompletionOutcome::Unmatched;
        };

        let Some(address) = read_pointer(out_pointer) else {
            debug!(%owner, out_pointer, "could not read allocated address from out-pointer");
            self.counters.completions_unmatched.increment();
            return CompletionOutcome::Unmatched;
        };

        self.on_allocation_complete(context, owner, Address::new(address))
    }

    /// Return from any user-space allocator that returns the new address.
    pub fn on_allocation_exit(
        &self,
        context: &R::Context,
        owner: OwnerId,
        address: Address,
    ) -> CompletionOutcome {
        self.on_allocation_complete(context, owner, address)
    }

    fn allocate(
        &self,
        context: &R::Context,
        owner: OwnerId,
        address: Address,
        bytes: u64,
    ) -> CompletionOutcome {
        match self.on_allocation_request(owner, bytes, self.now()) {
            RequestOutcome::Pending => self.on_allocation_complete(context, owner, address),
            RequestOutcome::FilteredOut => CompletionOutcome::FilteredOut,
            RequestOutcome::CapacityExhausted => CompletionOutcome::CapacityExhausted,
        }
    }
}
