#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

//! Correlates memory allocation and free events to find leaks.
//!
//! An event source (allocator hooks, kernel tracepoints, a replayed trace) feeds the
//! [`Tracker`] with three kinds of events:
//!
//! * an allocation request, when an allocator is entered with a size;
//! * an allocation completion, when the allocator returns an address;
//! * a free of an address.
//!
//! The tracker pairs each request with the completion from the same owner (thread or
//! process), remembers every allocation that has not been freed yet and keeps running
//! totals of outstanding bytes and allocation counts per call stack. Allocations that stay
//! outstanding for a long time, or stacks whose totals keep growing, are leak candidates.
//!
//! The core types are:
//! - [`TrackerBuilder`] - Configures filtering, sampling and table capacities
//! - [`Tracker`] - Processes events from any number of threads at once
//! - [`StackResolver`] - Turns the call context of an allocation into a [`StackId`]
//! - [`Report`] - A point-in-time view of outstanding allocations and stack statistics
//! - [`SnapshotTable`] - Write-once storage for register and stack snapshots
//!
//! # Example
//!
//! ```
//! use leak_tracker::{
//!     Address, AddressSpace, OwnerId, StackId, StackResolver, TrackerBuilder, Unresolvable,
//! };
//!
//! /// The event source reports the return address of the allocator call,
//! /// which is good enough to tell call sites apart.
//! #[derive(Debug)]
//! struct ReturnAddressResolver;
//!
//! impl StackResolver for ReturnAddressResolver {
//!     type Context = u64;
//!
//!     fn resolve_stack(&self, return_address: &u64, _: AddressSpace) -> Result<StackId, Unresolvable> {
//!         Ok(StackId::new(*return_address))
//!     }
//! }
//!
//! let tracker = TrackerBuilder::new()
//!     .min_size(16)
//!     .build(ReturnAddressResolver)
//!     .unwrap();
//!
//! let owner = OwnerId::new(1234);
//!
//! // malloc(100) from 0x4005d0 returned 0x7000 and was later freed.
//! tracker.on_malloc_enter(owner, 100, tracker.now());
//! tracker.on_allocation_exit(&0x4005d0, owner, Address::new(0x7000));
//! tracker.on_free(Address::new(0x7000));
//!
//! // malloc(200) from 0x4006f0 returned 0x8000 and was never freed.
//! tracker.on_malloc_enter(owner, 200, tracker.now());
//! tracker.on_allocation_exit(&0x4006f0, owner, Address::new(0x8000));
//!
//! let report = tracker.to_report();
//! let leaks = report.top_stacks(10);
//!
//! assert_eq!(leaks.len(), 1);
//! assert_eq!(leaks[0].0, StackId::new(0x4006f0));
//! assert_eq!(leaks[0].1.total_size(), 200);
//! ```
//!
//! # Lost events
//!
//! Event processing never fails and never blocks. Events that cannot be attributed (filtered
//! out, unmatched, or dropped because a table is full) are reported through the outcome of
//! each handler and counted in [`Tracker::diagnostics()`]. The statistics are as good as the
//! event stream: a lost free leaves an allocation outstanding forever, and a lost
//! allocation makes its free unmatched.
//!
//! # Logging
//!
//! The crate logs through [`tracing`]. It does not install a subscriber.

mod aggregator;
mod bounded_map;
mod builder;
mod clock;
mod diagnostics;
mod error;
mod filter;
mod outstanding;
mod pending;
mod primitive_types;
mod report;
mod resolver;
mod snapshot;
mod tracker;

pub use aggregator::{AggregateUpdate, StackStats};
pub use builder::*;
pub use clock::*;
pub use diagnostics::Diagnostics;
pub use error::Error;
pub(crate) use error::Result;
pub use outstanding::AllocationRecord;
pub use primitive_types::*;
pub use report::*;
pub use resolver::*;
pub use snapshot::*;
pub use tracker::*;
