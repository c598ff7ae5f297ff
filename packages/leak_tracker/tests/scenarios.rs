//! End-to-end scenarios driving the public event handlers of `leak_tracker`.

#![allow(clippy::indexing_slicing, reason = "panic is fine in tests")]

use leak_tracker::{
    Address, AddressSpace, CompletionOutcome, FreeOutcome, OwnerId, RequestOutcome, StackId,
    StackResolver, StackStats, Tracker, TrackerBuilder, Unresolvable,
};

/// Uses the call context as the stack identity, except for `u64::MAX` which cannot be resolved.
#[derive(Debug)]
struct CallSiteResolver;

impl StackResolver for CallSiteResolver {
    type Context = u64;

    fn resolve_stack(&self, call_site: &u64, _: AddressSpace) -> Result<StackId, Unresolvable> {
        if *call_site == u64::MAX {
            return Err(Unresolvable);
        }

        Ok(StackId::new(*call_site))
    }
}

const STACK: StackId = StackId::new(0xabc);

fn tracker() -> Tracker<CallSiteResolver> {
    TrackerBuilder::new().build(CallSiteResolver).unwrap()
}

fn allocate(tracker: &Tracker<CallSiteResolver>, owner: u64, size: u64, address: u64, stack: StackId) {
    let owner = OwnerId::new(owner);

    assert_eq!(
        tracker.on_allocation_request(owner, size, tracker.now()),
        RequestOutcome::Pending
    );
    assert_eq!(
        tracker.on_allocation_complete(&stack.get(), owner, Address::new(address)),
        CompletionOutcome::Tracked { stack }
    );
}

#[test]
fn allocation_then_free_returns_stack_to_zero() {
    let tracker = tracker();

    allocate(&tracker, 1, 64, 0x1000, STACK);
    assert_eq!(tracker.stack_stats(STACK), Some(StackStats::new(64, 1)));

    assert!(matches!(
        tracker.on_free(Address::new(0x1000)),
        FreeOutcome::Released(record) if record.size() == 64 && record.stack() == STACK
    ));
    assert_eq!(tracker.stack_stats(STACK), Some(StackStats::new(0, 0)));
}

#[test]
fn completion_without_request_changes_nothing() {
    let tracker = tracker();

    assert_eq!(
        tracker.on_allocation_complete(&STACK.get(), OwnerId::new(2), Address::new(0x2000)),
        CompletionOutcome::Unmatched
    );

    assert_eq!(tracker.outstanding(Address::new(0x2000)), None);
    assert_eq!(tracker.stack_stats(STACK), None);
    assert_eq!(tracker.list_stack_stats().count(), 0);
}

#[test]
fn size_filtered_request_never_becomes_outstanding() {
    let tracker = TrackerBuilder::new()
        .min_size(128)
        .build(CallSiteResolver)
        .unwrap();

    let owner = OwnerId::new(3);

    assert_eq!(
        tracker.on_allocation_request(owner, 64, tracker.now()),
        RequestOutcome::FilteredOut
    );
    assert_eq!(
        tracker.on_allocation_complete(&STACK.get(), owner, Address::new(0x3000)),
        CompletionOutcome::Unmatched
    );

    assert!(
        tracker
            .list_outstanding()
            .all(|record| record.address() != Address::new(0x3000))
    );
}

#[test]
fn owners_sharing_a_stack_are_summed() {
    let tracker = tracker();

    allocate(&tracker, 4, 100, 0x4000, STACK);
    allocate(&tracker, 5, 200, 0x5000, STACK);
    assert_eq!(tracker.stack_stats(STACK), Some(StackStats::new(300, 2)));

    tracker.on_free(Address::new(0x5000));
    assert_eq!(tracker.stack_stats(STACK), Some(StackStats::new(100, 1)));

    tracker.on_free(Address::new(0x4000));
    assert_eq!(tracker.stack_stats(STACK), Some(StackStats::new(0, 0)));
}

#[test]
fn freeing_the_other_allocation_leaves_the_larger_one() {
    let tracker = tracker();

    allocate(&tracker, 4, 100, 0x4000, STACK);
    allocate(&tracker, 5, 200, 0x5000, STACK);

    tracker.on_free(Address::new(0x4000));
    assert_eq!(tracker.stack_stats(STACK), Some(StackStats::new(200, 1)));
}

#[test]
fn unresolvable_allocations_are_grouped_under_sentinel() {
    let tracker = tracker();
    let owner = OwnerId::new(6);

    tracker.on_allocation_request(owner, 10, tracker.now());
    assert_eq!(
        tracker.on_allocation_complete(&u64::MAX, owner, Address::new(0x6000)),
        CompletionOutcome::Tracked {
            stack: StackId::UNRESOLVED
        }
    );

    let record = tracker.outstanding(Address::new(0x6000)).unwrap();
    assert!(record.stack().is_unresolved());
    assert_eq!(tracker.diagnostics().stacks_unresolved(), 1);
}

#[test]
fn report_finds_long_lived_allocations() {
    let tracker = tracker();

    allocate(&tracker, 1, 10, 0x1000, StackId::new(1));
    allocate(&tracker, 1, 20, 0x2000, StackId::new(2));
    allocate(&tracker, 1, 30, 0x3000, StackId::new(2));
    tracker.on_free(Address::new(0x1000));

    let report = tracker.to_report();

    assert_eq!(report.outstanding().len(), 2);
    assert_eq!(report.total_outstanding_bytes(), 50);
    assert_eq!(report.older_than(report.captured_at(), 0).count(), 2);

    let top = report.top_stacks(5);
    assert_eq!(top.len(), 1);
    assert_eq!(top[0], (StackId::new(2), StackStats::new(50, 2)));

    // The zeroed stack is still listed, just not among the top stacks.
    assert_eq!(report.stack_stats().len(), 2);
}

#[test]
fn diagnostics_count_each_outcome() {
    let tracker = TrackerBuilder::new()
        .max_size(1000)
        .build(CallSiteResolver)
        .unwrap();

    let owner = OwnerId::new(1);

    tracker.on_allocation_request(owner, 5000, tracker.now());
    tracker.on_allocation_complete(&1, owner, Address::new(0x1000));

    tracker.on_allocation_request(owner, 50, tracker.now());
    tracker.on_allocation_complete(&1, owner, Address::NULL);

    allocate(&tracker, 1, 50, 0x2000, StackId::new(1));
    tracker.on_free(Address::new(0x2000));
    tracker.on_free(Address::new(0x2000));

    let diagnostics = tracker.diagnostics();
    assert_eq!(diagnostics.requests_filtered(), 1);
    assert_eq!(diagnostics.requests_admitted(), 2);
    assert_eq!(diagnostics.completions_unmatched(), 1);
    assert_eq!(diagnostics.completions_failed(), 1);
    assert_eq!(diagnostics.completions_tracked(), 1);
    assert_eq!(diagnostics.frees_matched(), 1);
    assert_eq!(diagnostics.frees_unmatched(), 1);
    assert_eq!(diagnostics.capacity_exhausted(), 0);
}
