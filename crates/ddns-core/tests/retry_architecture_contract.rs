//! Behavioural Contract Test: Retry Architecture
//!
//! Retries belong to the schedule, not to the orchestrator or the provider.
//!
//! Constraints verified:
//! - A failed publish leaves `current_ip` untouched
//! - Each failure produces exactly one error-level log event
//! - The orchestrator never busy-retries; the next tick is the retry
//! - One domain's failures do not disturb other domains' timers

mod common;

use common::*;
use ddns_core::model::ProviderKind;
use ddns_core::{Credential, ErrorKind, LogLevel};
use std::time::Duration;

#[tokio::test]
async fn scenario_c_auth_error_preserves_baseline() {
    let h = harness("203.0.113.5").await;
    let domain = h.service.add_domain(a_record("home", 300)).await.unwrap();
    h.provider.fail_with(Some(FailMode::Auth));

    let outcome = h.service.orchestrator().run(&domain, false).await;

    assert_eq!(outcome.error, Some(ErrorKind::AuthError));
    assert!(!outcome.changed);
    let stored = h.service.get_domain(&domain.id).await.unwrap();
    assert_eq!(stored.current_ip, None, "registry untouched on failure");
    assert_eq!(stored.last_updated, None);

    let errors: Vec<_> = h
        .service
        .get_logs(100, None)
        .into_iter()
        .filter(|e| e.level == LogLevel::Error)
        .collect();
    assert_eq!(errors.len(), 1, "exactly one error-level event: {:?}", errors);

    // Next tick retries against the same baseline
    let retry = h.service.orchestrator().run(&domain, false).await;
    assert_eq!(retry.error, Some(ErrorKind::AuthError));
    assert_eq!(retry.previous_ip, outcome.previous_ip);
    assert_eq!(h.provider.upserts(), 2);

    h.provider.fail_with(None);
    let recovered = h.service.orchestrator().run(&domain, false).await;
    assert!(recovered.changed);
    assert_eq!(h.service.get_update_history(&domain.id, 10).len(), 3);
}

#[tokio::test(start_paused = true)]
async fn rate_limited_waits_for_next_tick() {
    let h = harness("203.0.113.5").await;
    h.provider.fail_with(Some(FailMode::RateLimited));
    h.service.add_domain(a_record("home", 30)).await.unwrap();

    h.service.start_scheduler().await.unwrap();
    let provider = h.provider.clone();
    wait_until(move || provider.upserts() == 1, Duration::from_secs(1)).await;

    tokio::time::sleep(Duration::from_secs(25)).await;
    assert_eq!(h.provider.upserts(), 1, "no busy retry inside the period");

    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(h.provider.upserts(), 2, "the next tick is the retry");

    h.service.stop_scheduler().await.unwrap();
}

#[tokio::test]
async fn missing_adapter_is_a_failed_outcome_not_a_panic() {
    let h = harness("203.0.113.5").await;
    let mut input = a_record("home", 300);
    input.provider = ProviderKind::Aliyun;
    input.credential = Credential::Aliyun {
        access_key_id: "LTAI".into(),
        access_key_secret: "secret".into(),
    };
    let domain = h.service.add_domain(input).await.unwrap();

    let outcome = h.service.orchestrator().run(&domain, false).await;

    assert_eq!(outcome.error, Some(ErrorKind::ValidationError));
    assert!(
        h.service.get_update_history(&domain.id, 10).is_empty(),
        "history only records runs that reached a provider"
    );
}

#[tokio::test(start_paused = true)]
async fn failing_domain_does_not_block_others() {
    let h = harness("203.0.113.5").await;
    let ok = h.service.add_domain(a_record("ok", 60)).await.unwrap();

    // Different provider with no registered adapter: every tick fails
    let mut broken = a_record("broken", 30);
    broken.provider = ProviderKind::Tencent;
    broken.credential = Credential::Tencent {
        secret_id: "AKID".into(),
        secret_key: "secret".into(),
    };
    h.service.add_domain(broken).await.unwrap();

    h.service.start_scheduler().await.unwrap();
    let provider = h.provider.clone();
    wait_until(move || provider.completed() == 1, Duration::from_secs(1)).await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    let stored = h.service.get_domain(&ok.id).await.unwrap();
    assert_eq!(stored.current_ip.as_deref(), Some("203.0.113.5"));
    assert_eq!(h.service.get_scheduler_status().await.unwrap().active_tasks, 2);

    h.service.stop_scheduler().await.unwrap();
}
