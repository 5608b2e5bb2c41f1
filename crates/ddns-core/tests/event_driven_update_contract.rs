//! Behavioural Contract Test: Scheduled Updates & Reschedule on Edit
//!
//! Constraints verified:
//! - A started scheduler ticks each enabled domain immediately, then every
//!   `update_interval`
//! - Editing `update_interval` or `enabled` takes effect at once, without
//!   waiting for the running period to elapse
//! - Deleting a domain cancels its timer and any run queued behind the lock
//! - Moving a record while its update is in flight publishes the new record
//!   on the next pass
//! - Adding an enabled domain while running schedules it

mod common;

use common::*;
use ddns_core::model::RecordType;
use ddns_core::{DomainPatch, EngineEvent, ErrorKind, LogLevel, SettingsPatch};
use std::time::Duration;

#[tokio::test(start_paused = true)]
async fn first_tick_is_immediate_then_periodic() {
    let h = harness("203.0.113.5").await;
    let domain = h.service.add_domain(a_record("home", 300)).await.unwrap();

    h.service.start_scheduler().await.unwrap();
    let provider = h.provider.clone();
    wait_until(move || provider.completed() == 1, Duration::from_secs(1)).await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    let stored = h.service.get_domain(&domain.id).await.unwrap();
    assert_eq!(stored.current_ip.as_deref(), Some("203.0.113.5"));

    h.ip.set_v4(Some("203.0.113.6"));
    tokio::time::sleep(Duration::from_secs(301)).await;

    let stored = h.service.get_domain(&domain.id).await.unwrap();
    assert_eq!(stored.current_ip.as_deref(), Some("203.0.113.6"));
    assert_eq!(h.provider.upserts(), 2);

    h.service.stop_scheduler().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn interval_edit_reschedules_immediately() {
    let h = harness("203.0.113.5").await;
    let domain = h.service.add_domain(a_record("home", 3600)).await.unwrap();
    h.service.start_scheduler().await.unwrap();
    let provider = h.provider.clone();
    wait_until(move || provider.upserts() == 1, Duration::from_secs(1)).await;

    h.ip.set_v4(Some("203.0.113.50"));
    h.service.clear_ip_cache();

    let started = tokio::time::Instant::now();
    let patch = DomainPatch {
        update_interval: Some(60),
        ..Default::default()
    };
    h.service.update_domain(&domain.id, patch).await.unwrap();

    let provider = h.provider.clone();
    wait_until(move || provider.upserts() == 2, Duration::from_secs(5)).await;
    assert!(
        started.elapsed() < Duration::from_secs(60),
        "new timer must not wait for the old 3600s period"
    );
    assert_eq!(h.service.get_scheduler_status().await.unwrap().active_tasks, 1);

    h.service.stop_scheduler().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn enable_toggle_cancels_and_recreates_timer() {
    let h = harness("203.0.113.5").await;
    let domain = h.service.add_domain(a_record("home", 300)).await.unwrap();
    h.service.start_scheduler().await.unwrap();

    let off = DomainPatch {
        enabled: Some(false),
        ..Default::default()
    };
    h.service.update_domain(&domain.id, off).await.unwrap();
    assert_eq!(h.service.get_scheduler_status().await.unwrap().active_tasks, 0);

    let on = DomainPatch {
        enabled: Some(true),
        ..Default::default()
    };
    h.service.update_domain(&domain.id, on).await.unwrap();
    assert_eq!(h.service.get_scheduler_status().await.unwrap().active_tasks, 1);

    h.service.stop_scheduler().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn delete_cancels_timer_and_forgets_history() {
    let h = harness("203.0.113.5").await;
    let domain = h.service.add_domain(a_record("home", 30)).await.unwrap();
    h.service.start_scheduler().await.unwrap();
    let provider = h.provider.clone();
    wait_until(move || provider.completed() == 1, Duration::from_secs(1)).await;

    h.service.delete_domain(&domain.id).await.unwrap();

    assert_eq!(h.service.get_scheduler_status().await.unwrap().active_tasks, 0);
    assert!(h.service.get_update_history(&domain.id, 10).is_empty());

    tokio::time::sleep(Duration::from_secs(120)).await;
    assert_eq!(h.provider.upserts(), 1, "deleted domain is never ticked again");

    h.service.stop_scheduler().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn delete_cancels_run_queued_behind_in_flight_update() {
    let h = harness("203.0.113.5").await;
    h.provider.set_latency(Duration::from_secs(5));
    let domain = h.service.add_domain(a_record("home", 300)).await.unwrap();
    let orchestrator = h.service.orchestrator();

    let in_flight = orchestrator.run_id(&domain.id, false);
    let queued_then_deleted = async {
        let provider = h.provider.clone();
        wait_until(move || provider.in_flight() == 1, Duration::from_secs(1)).await;

        let queued = orchestrator.run_id(&domain.id, true);
        let delete = async {
            tokio::task::yield_now().await;
            h.service.delete_domain(&domain.id).await
        };
        tokio::join!(queued, delete)
    };
    let (first, (queued, deleted)) = tokio::join!(in_flight, queued_then_deleted);

    deleted.unwrap();
    assert!(first.changed, "the update already applying is drained, not aborted");
    assert_eq!(queued.error, Some(ErrorKind::Cancelled));

    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(h.provider.upserts(), 1, "no provider call after the delete");
    assert!(h.service.get_domain(&domain.id).await.is_err());
}

#[tokio::test(start_paused = true)]
async fn record_moved_during_update_is_published_next() {
    let h = harness("203.0.113.5").await;
    h.provider.set_latency(Duration::from_secs(5));
    let domain = h.service.add_domain(a_record("home", 300)).await.unwrap();
    let orchestrator = h.service.orchestrator();

    let in_flight = orchestrator.run_id(&domain.id, false);
    let edit_then_tick = async {
        let provider = h.provider.clone();
        wait_until(move || provider.in_flight() == 1, Duration::from_secs(1)).await;

        let moved = h
            .service
            .update_domain(
                &domain.id,
                DomainPatch {
                    subdomain: Some("office".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(moved.current_ip, None);

        // Queues behind the in-flight run, like the rescheduled timer's first tick
        orchestrator.run_id(&domain.id, false).await
    };
    let (first, next) = tokio::join!(in_flight, edit_then_tick);

    assert_eq!(first.fqdn, "home.example.com");
    assert_eq!(next.fqdn, "office.example.com", "outcome from before the edit is not reused");
    assert!(next.changed);
    assert_eq!(
        h.provider.record("office.example.com", RecordType::A).as_deref(),
        Some("203.0.113.5")
    );

    let stored = h.service.get_domain(&domain.id).await.unwrap();
    assert_eq!(stored.fqdn(), "office.example.com");
    assert_eq!(stored.current_ip.as_deref(), Some("203.0.113.5"));

    let tick = orchestrator.run_id(&domain.id, false).await;
    assert!(!tick.changed);
    assert_eq!(h.provider.upserts(), 2);
}

#[tokio::test(start_paused = true)]
async fn domain_added_while_running_is_scheduled() {
    let h = harness("203.0.113.5").await;
    h.service.start_scheduler().await.unwrap();
    assert_eq!(h.service.get_scheduler_status().await.unwrap().active_tasks, 0);

    h.service.add_domain(a_record("late", 300)).await.unwrap();

    assert_eq!(h.service.get_scheduler_status().await.unwrap().active_tasks, 1);
    let provider = h.provider.clone();
    wait_until(move || provider.upserts() == 1, Duration::from_secs(1)).await;

    h.service.stop_scheduler().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn scheduler_transitions_are_logged() {
    let h = harness("203.0.113.5").await;
    h.service
        .update_settings(SettingsPatch {
            log_level: Some(LogLevel::Debug),
            ..Default::default()
        })
        .await
        .unwrap();
    let domain = h.service.add_domain(a_record("home", 300)).await.unwrap();

    h.service.start_scheduler().await.unwrap();
    h.service.stop_scheduler().await.unwrap();

    let events: Vec<EngineEvent> = h
        .service
        .get_logs(100, None)
        .into_iter()
        .filter_map(|e| serde_json::from_value(e.context?).ok())
        .collect();

    assert!(events.contains(&EngineEvent::SchedulerStarted { active_tasks: 1 }));
    assert!(events.iter().any(|e| matches!(
        e,
        EngineEvent::DomainScheduled { domain_id, interval_secs: 300, .. } if *domain_id == domain.id
    )));
    assert!(events.iter().any(|e| matches!(e, EngineEvent::SchedulerStopped { .. })));
}
