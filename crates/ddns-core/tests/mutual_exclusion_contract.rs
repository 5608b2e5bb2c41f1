//! Behavioural Contract Test: Per-Domain Mutual Exclusion
//!
//! Constraints verified:
//! - Two concurrent runs for one domain never reach the provider concurrently
//! - The waiting run observes the first run's outcome instead of redoing it
//! - Runs for different domains proceed in parallel (no global lock)

mod common;

use common::*;
use std::time::Duration;

#[tokio::test(start_paused = true)]
async fn concurrent_runs_for_one_domain_serialize() {
    let h = harness("203.0.113.5").await;
    h.provider.set_latency(Duration::from_millis(200));
    let domain = h.service.add_domain(a_record("home", 300)).await.unwrap();
    let orchestrator = h.service.orchestrator();

    let (first, second) = tokio::join!(
        orchestrator.run_id(&domain.id, false),
        orchestrator.run_id(&domain.id, false)
    );

    assert_eq!(h.provider.max_in_flight(), 1);
    assert_eq!(h.provider.upserts(), 1, "the second run must not redo the work");
    assert_eq!(first, second, "the waiter observes the completed outcome");
    assert!(first.changed);
}

#[tokio::test(start_paused = true)]
async fn tick_overlapping_force_serializes() {
    let h = harness("203.0.113.5").await;
    h.provider.set_latency(Duration::from_millis(200));
    let domain = h.service.add_domain(a_record("home", 300)).await.unwrap();

    let tick = h.service.orchestrator().run_id(&domain.id, false);
    let force = h.service.force_update_domain(&domain.id);
    let (tick, force) = tokio::join!(tick, force);

    assert_eq!(h.provider.max_in_flight(), 1);
    assert_eq!(h.provider.upserts(), 1);
    assert!(tick.changed);
    assert_eq!(force.unwrap(), tick.summary());
}

#[tokio::test(start_paused = true)]
async fn different_domains_update_in_parallel() {
    let h = harness("203.0.113.5").await;
    h.provider.set_latency(Duration::from_secs(1));
    let a = h.service.add_domain(a_record("a", 300)).await.unwrap();
    let b = h.service.add_domain(a_record("b", 300)).await.unwrap();

    let started = tokio::time::Instant::now();
    let (ra, rb) = tokio::join!(
        h.service.orchestrator().run_id(&a.id, false),
        h.service.orchestrator().run_id(&b.id, false)
    );

    assert!(ra.changed && rb.changed);
    assert_eq!(h.provider.max_in_flight(), 2);
    assert!(started.elapsed() < Duration::from_millis(1500));
}
