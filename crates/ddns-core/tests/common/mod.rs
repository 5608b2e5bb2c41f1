//! Test doubles and common utilities for behavioural contract tests
//!
//! The doubles are controllable from the test body while the engine holds
//! them: every counter and knob sits behind an `Arc`, so clones observe and
//! steer the same state.

#![allow(dead_code)]

use async_trait::async_trait;
use ddns_core::error::{Error, Result};
use ddns_core::model::{DetectionMethod, IpFamily, ProviderKind, RecordType};
use ddns_core::traits::{DnsProvider, ExistingRecord, IpSource, RecordRef};
use ddns_core::{Credential, DdnsService, DomainInput, ProviderRegistry};
use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// An IpSource whose answers can be changed mid-test
#[derive(Clone)]
pub struct FakeIpSource {
    method: DetectionMethod,
    v4: Arc<Mutex<Option<Ipv4Addr>>>,
    v6: Arc<Mutex<Option<Ipv6Addr>>>,
    latency: Arc<Mutex<Duration>>,
    calls: Arc<AtomicUsize>,
}

impl FakeIpSource {
    pub fn new(method: DetectionMethod) -> Self {
        Self {
            method,
            v4: Arc::new(Mutex::new(None)),
            v6: Arc::new(Mutex::new(None)),
            latency: Arc::new(Mutex::new(Duration::ZERO)),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Api source answering `ip` for IPv4
    pub fn v4(ip: &str) -> Self {
        let source = Self::new(DetectionMethod::Api);
        source.set_v4(Some(ip));
        source
    }

    pub fn set_v4(&self, ip: Option<&str>) {
        *self.v4.lock().unwrap() = ip.map(|s| s.parse().unwrap());
    }

    pub fn set_v6(&self, ip: Option<&str>) {
        *self.v6.lock().unwrap() = ip.map(|s| s.parse().unwrap());
    }

    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock().unwrap() = latency;
    }

    /// Number of detect() calls, across both families
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl IpSource for FakeIpSource {
    async fn detect(&self, family: IpFamily) -> Result<IpAddr> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let latency = *self.latency.lock().unwrap();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        let answer = match family {
            IpFamily::V4 => self.v4.lock().unwrap().map(IpAddr::V4),
            IpFamily::V6 => self.v6.lock().unwrap().map(IpAddr::V6),
        };
        answer.ok_or_else(|| Error::ip_source(format!("fake has no {} answer", family)))
    }

    fn method(&self) -> DetectionMethod {
        self.method
    }
}

/// Failure the fake provider should report
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailMode {
    Auth,
    RateLimited,
    Unavailable,
}

/// A DnsProvider keeping records in memory and counting every call
#[derive(Clone)]
pub struct FakeProvider {
    kind: ProviderKind,
    records: Arc<Mutex<HashMap<String, String>>>,
    failure: Arc<Mutex<Option<FailMode>>>,
    latency: Arc<Mutex<Duration>>,
    resolve_calls: Arc<AtomicUsize>,
    upsert_calls: Arc<AtomicUsize>,
    writes: Arc<AtomicUsize>,
    in_flight: Arc<AtomicUsize>,
    max_in_flight: Arc<AtomicUsize>,
    completed: Arc<AtomicUsize>,
}

impl FakeProvider {
    pub fn new(kind: ProviderKind) -> Self {
        Self {
            kind,
            records: Arc::new(Mutex::new(HashMap::new())),
            failure: Arc::new(Mutex::new(None)),
            latency: Arc::new(Mutex::new(Duration::ZERO)),
            resolve_calls: Arc::new(AtomicUsize::new(0)),
            upsert_calls: Arc::new(AtomicUsize::new(0)),
            writes: Arc::new(AtomicUsize::new(0)),
            in_flight: Arc::new(AtomicUsize::new(0)),
            max_in_flight: Arc::new(AtomicUsize::new(0)),
            completed: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn fail_with(&self, mode: Option<FailMode>) {
        *self.failure.lock().unwrap() = mode;
    }

    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock().unwrap() = latency;
    }

    /// upsert_record() invocations
    pub fn upserts(&self) -> usize {
        self.upsert_calls.load(Ordering::SeqCst)
    }

    /// Every call into the provider
    pub fn total_calls(&self) -> usize {
        self.upserts() + self.resolve_calls.load(Ordering::SeqCst)
    }

    /// Upserts that actually changed a stored record
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// Upserts that returned (successfully or not)
    pub fn completed(&self) -> usize {
        self.completed.load(Ordering::SeqCst)
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Highest number of upserts observed running at once
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn record(&self, fqdn: &str, record_type: RecordType) -> Option<String> {
        self.records.lock().unwrap().get(&key(fqdn, record_type)).cloned()
    }

    fn fail(&self) -> Result<()> {
        match *self.failure.lock().unwrap() {
            None => Ok(()),
            Some(FailMode::Auth) => Err(Error::auth("fake rejects credentials")),
            Some(FailMode::RateLimited) => Err(Error::rate_limited("fake is throttling")),
            Some(FailMode::Unavailable) => Err(Error::unavailable("fake returned 503")),
        }
    }
}

fn key(fqdn: &str, record_type: RecordType) -> String {
    format!("{}/{}", fqdn, record_type)
}

struct InFlight<'a>(&'a FakeProvider);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.0.completed.fetch_add(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl DnsProvider for FakeProvider {
    async fn resolve_record(&self, _credential: &Credential, record: &RecordRef<'_>) -> Result<ExistingRecord> {
        self.resolve_calls.fetch_add(1, Ordering::SeqCst);
        self.fail()?;
        self.records
            .lock()
            .unwrap()
            .get(&key(&record.fqdn(), record.record_type))
            .map(|value| ExistingRecord {
                value: value.clone(),
                record_id: Some(record.fqdn()),
                ttl: None,
            })
            .ok_or_else(|| Error::not_found(record.fqdn()))
    }

    async fn upsert_record(
        &self,
        _credential: &Credential,
        record: &RecordRef<'_>,
        value: &str,
        _ttl: Option<u32>,
    ) -> Result<String> {
        self.upsert_calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        let _guard = InFlight(self);

        let latency = *self.latency.lock().unwrap();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        self.fail()?;

        let mut records = self.records.lock().unwrap();
        let k = key(&record.fqdn(), record.record_type);
        if records.get(&k).map(String::as_str) != Some(value) {
            records.insert(k, value.to_string());
            self.writes.fetch_add(1, Ordering::SeqCst);
        }
        Ok(record.fqdn())
    }

    async fn verify_credentials(&self, _credential: &Credential) -> Result<()> {
        self.fail()
    }

    fn kind(&self) -> ProviderKind {
        self.kind
    }
}

pub fn cloudflare_credential() -> Credential {
    Credential::Cloudflare {
        api_token: "test-token".to_string(),
        account_email: None,
    }
}

/// Enabled Cloudflare A record `{sub}.example.com` checked every `interval` seconds
pub fn a_record(sub: &str, interval: u64) -> DomainInput {
    DomainInput {
        name: "example.com".to_string(),
        subdomain: sub.to_string(),
        provider: ProviderKind::Cloudflare,
        record_type: RecordType::A,
        target: None,
        ttl: None,
        update_interval: Some(interval),
        enabled: true,
        credential: cloudflare_credential(),
    }
}

/// Service wired to one fake IP source and a fake Cloudflare adapter
pub struct Harness {
    pub service: DdnsService,
    pub ip: FakeIpSource,
    pub provider: FakeProvider,
}

pub async fn harness(ip: &str) -> Harness {
    let ip = FakeIpSource::v4(ip);
    let provider = FakeProvider::new(ProviderKind::Cloudflare);

    let providers = ProviderRegistry::new();
    providers.register(Arc::new(provider.clone()));

    let service = DdnsService::builder()
        .providers(providers)
        .ip_source(Arc::new(ip.clone()))
        .build()
        .await
        .expect("service builds");

    Harness { service, ip, provider }
}

/// Poll `cond` every 10ms (virtual time when paused) until it holds
pub async fn wait_until<F: Fn() -> bool>(cond: F, limit: Duration) {
    let deadline = tokio::time::Instant::now() + limit;
    while !cond() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not reached within {:?}",
            limit
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
