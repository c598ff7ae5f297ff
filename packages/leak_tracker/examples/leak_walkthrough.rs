//! Replays a short allocation trace through a tracker and prints the leak candidates.
//!
//! Run with: `cargo run --example leak_walkthrough`

use std::time::Duration;

use leak_tracker::{
    Address, AddressSpace, OwnerId, StackId, StackResolver, TrackerBuilder, Unresolvable,
};
use tracing_subscriber::filter::LevelFilter;

/// The trace records a call site per allocation, so the call site is the stack identity.
#[derive(Debug)]
struct CallSiteResolver;

impl StackResolver for CallSiteResolver {
    type Context = &'static str;

    fn resolve_stack(
        &self,
        call_site: &&'static str,
        _: AddressSpace,
    ) -> Result<StackId, Unresolvable> {
        match *call_site {
            "parse_config" => Ok(StackId::new(1)),
            "load_cache" => Ok(StackId::new(2)),
            "handle_request" => Ok(StackId::new(3)),
            _ => Err(Unresolvable),
        }
    }
}

fn main() {
    tracing_subscriber::fmt()
        .with_max_level(LevelFilter::TRACE)
        .init();

    let tracker = TrackerBuilder::new()
        .min_size(16)
        .trace_all(true)
        .build(CallSiteResolver)
        .expect("the configuration is valid");

    let main_thread = OwnerId::new(100);
    let worker = OwnerId::new(101);

    // The configuration is parsed once and kept for the lifetime of the process.
    tracker.on_malloc_enter(main_thread, 512, tracker.now());
    tracker.on_allocation_exit(&"parse_config", main_thread, Address::new(0x1000));

    // Every request allocates a buffer and frees it again, except that one of them leaks.
    for i in 0..10_u64 {
        let address = Address::new(0x10_0000 + i * 0x100);

        tracker.on_calloc_enter(worker, 4, 64, tracker.now());
        tracker.on_allocation_exit(&"handle_request", worker, address);

        if i != 7 {
            tracker.on_free(address);
        }
    }

    // The cache grows through realloc; the old block is released by the call itself.
    tracker.on_malloc_enter(worker, 1024, tracker.now());
    tracker.on_allocation_exit(&"load_cache", worker, Address::new(0x2000));
    tracker.on_realloc_enter(worker, Address::new(0x2000), 4096, tracker.now());
    tracker.on_allocation_exit(&"load_cache", worker, Address::new(0x3000));

    // Too small to be tracked.
    tracker.on_malloc_enter(worker, 8, tracker.now());
    tracker.on_allocation_exit(&"handle_request", worker, Address::new(0x4000));

    // Nobody knows where this one came from.
    tracker.on_malloc_enter(worker, 48, tracker.now());
    tracker.on_allocation_exit(&"unknown", worker, Address::new(0x5000));

    std::thread::sleep(Duration::from_millis(10));

    let report = tracker.to_report();

    println!();
    println!(
        "{} bytes outstanding in {} allocations",
        report.total_outstanding_bytes(),
        report.outstanding().len()
    );

    println!("Top stacks:");
    for (stack, stats) in report.top_stacks(5) {
        let label = if stack.is_unresolved() {
            "[unresolved]".to_string()
        } else {
            stack.to_string()
        };

        println!(
            "  stack {label}: {} bytes in {} allocations",
            stats.total_size(),
            stats.count()
        );
    }

    let min_age = Duration::from_millis(5);
    let min_age_nanos = u64::try_from(min_age.as_nanos()).unwrap_or(u64::MAX);

    println!("Outstanding for at least {min_age:?}:");
    for record in report.older_than(report.captured_at(), min_age_nanos) {
        println!(
            "  {} ({} bytes) from stack {}",
            record.address(),
            record.size(),
            record.stack()
        );
    }

    println!("{:#?}", tracker.diagnostics());
}
