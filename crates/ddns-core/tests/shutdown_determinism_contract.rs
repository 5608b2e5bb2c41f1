//! Behavioural Contract Test: Scheduler Lifecycle & Drain
//!
//! Constraints verified:
//! - `active_tasks` equals the number of enabled domains right after start
//! - start/stop are idempotent
//! - stop waits for an in-flight run before reporting `running == false`
//! - stop cancels every timer: no further ticks afterwards
//!
//! If this test fails, someone has added:
//! - Abrupt cancellation of a run already applying a record change
//! - Detached timer tasks that survive stop

mod common;

use common::*;
use ddns_core::DomainPatch;
use std::time::Duration;

#[tokio::test(start_paused = true)]
async fn active_tasks_counts_enabled_domains() {
    let h = harness("203.0.113.5").await;
    h.service.add_domain(a_record("a", 300)).await.unwrap();
    h.service.add_domain(a_record("b", 600)).await.unwrap();
    let mut disabled = a_record("c", 300);
    disabled.enabled = false;
    h.service.add_domain(disabled).await.unwrap();

    let status = h.service.start_scheduler().await.unwrap();

    assert!(status.running);
    assert_eq!(status.active_tasks, 2);
    assert_eq!(h.service.get_scheduler_status().await.unwrap().active_tasks, 2);

    h.service.stop_scheduler().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn start_and_stop_are_idempotent() {
    let h = harness("203.0.113.5").await;
    h.service.add_domain(a_record("a", 300)).await.unwrap();

    let stopped = h.service.stop_scheduler().await.unwrap();
    assert!(!stopped.running);

    h.service.start_scheduler().await.unwrap();
    let again = h.service.start_scheduler().await.unwrap();
    assert!(again.running);
    assert_eq!(again.active_tasks, 1, "second start must not duplicate timers");

    h.service.stop_scheduler().await.unwrap();
    let again = h.service.stop_scheduler().await.unwrap();
    assert!(!again.running);
    assert_eq!(again.active_tasks, 0);
}

#[tokio::test(start_paused = true)]
async fn stop_waits_for_in_flight_run() {
    let h = harness("203.0.113.5").await;
    h.provider.set_latency(Duration::from_secs(5));
    let domain = h.service.add_domain(a_record("home", 300)).await.unwrap();

    h.service.start_scheduler().await.unwrap();
    let provider = h.provider.clone();
    wait_until(move || provider.in_flight() == 1, Duration::from_secs(1)).await;

    let status = h.service.stop_scheduler().await.unwrap();

    assert!(!status.running);
    assert_eq!(h.provider.in_flight(), 0, "the run was drained, not aborted");
    assert_eq!(h.provider.completed(), 1);
    let stored = h.service.get_domain(&domain.id).await.unwrap();
    assert_eq!(stored.current_ip.as_deref(), Some("203.0.113.5"), "drained run was recorded");
}

#[tokio::test(start_paused = true)]
async fn no_ticks_after_stop() {
    let h = harness("203.0.113.5").await;
    let domain = h.service.add_domain(a_record("home", 30)).await.unwrap();
    h.service.start_scheduler().await.unwrap();
    let provider = h.provider.clone();
    wait_until(move || provider.upserts() == 1, Duration::from_secs(1)).await;

    h.service.stop_scheduler().await.unwrap();

    // Make every further tick a publish if one happened
    h.ip.set_v4(Some("203.0.113.99"));
    h.service.clear_ip_cache();
    tokio::time::sleep(Duration::from_secs(3600)).await;

    assert_eq!(h.provider.upserts(), 1);
    let stored = h.service.get_domain(&domain.id).await.unwrap();
    assert_eq!(stored.current_ip.as_deref(), Some("203.0.113.5"));
}

#[tokio::test(start_paused = true)]
async fn shutdown_stops_scheduler() {
    let h = harness("203.0.113.5").await;
    h.service.add_domain(a_record("home", 300)).await.unwrap();
    h.service.start_scheduler().await.unwrap();

    h.service.shutdown().await.unwrap();

    let status = h.service.get_scheduler_status().await.unwrap();
    assert!(!status.running);
    assert_eq!(status.active_tasks, 0);
}

#[tokio::test(start_paused = true)]
async fn disabled_domain_timer_exits() {
    let h = harness("203.0.113.5").await;
    let domain = h.service.add_domain(a_record("home", 300)).await.unwrap();
    h.service.start_scheduler().await.unwrap();

    let patch = DomainPatch {
        enabled: Some(false),
        ..Default::default()
    };
    h.service.update_domain(&domain.id, patch).await.unwrap();

    let status = h.service.get_scheduler_status().await.unwrap();
    assert!(status.running);
    assert_eq!(status.active_tasks, 0);
}
