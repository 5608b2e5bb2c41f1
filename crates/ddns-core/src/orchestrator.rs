//! Update orchestrator
//!
//! Runs one update pass for one domain: detect, compare, publish, record.
//!
//! ## Flow
//!
//! ```text
//! run(id, forced)
//!      │
//!      ▼
//! ┌───────────────┐   waited while another run completed
//! │ per-domain    │──────────────────────────────────────► that run's outcome
//! │ lock          │
//! └───────────────┘
//!      │
//!      ▼
//! re-read Domain ── gone ──► Cancelled
//!      │
//!      ▼
//! desired value (IpDetector for A/AAAA, configured target for CNAME)
//!      │
//!      ├── !forced && value == current_ip ──► changed=false, no provider call
//!      ▼
//! Vault::get ─► DnsProvider::upsert_record ─► DomainRegistry::record_published
//! ```
//!
//! ## Failure policy
//!
//! `run` never returns an error. Failures are carried in the returned
//! [`UpdateOutcome`] and leave the registry untouched, so the next tick retries
//! against the same baseline. There is no retry loop here.
//!
//! Every outcome produces exactly one [`EngineEvent`].

use chrono::{DateTime, Utc};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::config::EngineConfig;
use crate::detector::IpDetector;
use crate::error::{Error, ErrorKind, Result};
use crate::logs::EngineEvent;
use crate::model::{Domain, RecordType, UpdateHistoryEntry, UpdateOutcome};
use crate::registry::{DomainRegistry, ProviderRegistry};
use crate::traits::{DnsProvider, LogSink, RecordRef};
use crate::vault::{Credential, CredentialVault};

/// Outcome of the last pass and the configuration it ran against
struct Completed {
    outcome: UpdateOutcome,
    /// `updated_at` of the domain when the pass started; `None` if it was gone
    config_at: Option<DateTime<Utc>>,
}

/// Lock and last outcome for one domain
#[derive(Default)]
struct DomainSlot {
    lock: tokio::sync::Mutex<Option<Completed>>,
    /// Number of runs completed under `lock`
    completed: AtomicU64,
}

/// Executes update passes under a per-domain lock
pub struct UpdateOrchestrator {
    registry: Arc<DomainRegistry>,
    vault: Arc<CredentialVault>,
    providers: Arc<ProviderRegistry>,
    detector: Arc<IpDetector>,
    sink: Arc<dyn LogSink>,
    provider_timeout: Duration,
    default_ttl: u32,
    history_limit: usize,
    slots: Mutex<HashMap<String, Arc<DomainSlot>>>,
    history: Mutex<HashMap<String, VecDeque<UpdateHistoryEntry>>>,
}

impl UpdateOrchestrator {
    pub fn new(
        registry: Arc<DomainRegistry>,
        vault: Arc<CredentialVault>,
        providers: Arc<ProviderRegistry>,
        detector: Arc<IpDetector>,
        sink: Arc<dyn LogSink>,
        config: &EngineConfig,
    ) -> Self {
        Self {
            registry,
            vault,
            providers,
            detector,
            sink,
            provider_timeout: config.provider_timeout(),
            default_ttl: config.default_record_ttl,
            history_limit: config.history_per_domain.max(1),
            slots: Mutex::new(HashMap::new()),
            history: Mutex::new(HashMap::new()),
        }
    }

    /// Run one update pass for `domain`
    ///
    /// The passed value only identifies the domain; the pass re-reads the
    /// current configuration once it holds the domain's lock.
    pub async fn run(&self, domain: &Domain, forced: bool) -> UpdateOutcome {
        self.run_id(&domain.id, forced).await
    }

    /// Run one update pass for the domain with id `domain_id`
    ///
    /// # Serialization
    ///
    /// Concurrent calls for the same domain serialize on its lock. A caller
    /// that had to wait while another pass completed returns that pass's
    /// outcome instead of running again, unless the domain was edited after
    /// that pass started, or the caller is forced and the completed pass was
    /// an unforced one that never reached the provider.
    pub async fn run_id(&self, domain_id: &str, forced: bool) -> UpdateOutcome {
        let slot = self.slot(domain_id);
        let seen = slot.completed.load(Ordering::Acquire);

        let mut last = slot.lock.lock().await;
        let domain = self.registry.get(domain_id).await;
        let config_at = domain.as_ref().map(|d| d.updated_at);

        if slot.completed.load(Ordering::Acquire) != seen {
            if let Some(previous) = last.as_ref() {
                let same_config = config_at.is_some() && previous.config_at == config_at;
                let covers = !forced || previous.outcome.forced || previous.outcome.changed;
                if same_config && covers {
                    debug!(domain_id, "Returning outcome of the run completed while waiting");
                    return previous.outcome.clone();
                }
            }
        }

        let outcome = self.execute(domain_id, domain, forced).await;
        self.emit(&outcome);

        *last = Some(Completed {
            outcome: outcome.clone(),
            config_at,
        });
        slot.completed.fetch_add(1, Ordering::Release);
        outcome
    }

    /// Drop the lock slot and history of a deleted domain
    pub fn forget(&self, domain_id: &str) {
        self.slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(domain_id);
        self.history
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(domain_id);
    }

    /// Newest-first provider write attempts for `domain_id`
    pub fn history(&self, domain_id: &str, limit: usize) -> Vec<UpdateHistoryEntry> {
        self.history
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(domain_id)
            .map(|h| h.iter().rev().take(limit).cloned().collect())
            .unwrap_or_default()
    }

    /// Check the stored credential of `domain_id` against its provider
    pub async fn verify_credentials(&self, domain_id: &str) -> Result<()> {
        let domain = self
            .registry
            .get(domain_id)
            .await
            .ok_or_else(|| Error::domain_not_found(domain_id))?;
        let provider = self.providers.get(domain.provider)?;
        let credential = self.vault.get(domain_id).await?;

        match tokio::time::timeout(self.provider_timeout, provider.verify_credentials(&credential)).await {
            Ok(result) => result,
            Err(_) => Err(Error::unavailable(format!(
                "{} did not answer within {:?}",
                domain.provider, self.provider_timeout
            ))),
        }
    }

    fn slot(&self, domain_id: &str) -> Arc<DomainSlot> {
        self.slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(domain_id.to_string())
            .or_default()
            .clone()
    }

    async fn execute(&self, domain_id: &str, domain: Option<Domain>, forced: bool) -> UpdateOutcome {
        let Some(domain) = domain else {
            debug!(domain_id, "Domain vanished before its run started");
            return UpdateOutcome::failed(
                domain_id,
                domain_id,
                None,
                None,
                forced,
                &Error::cancelled(format!("domain {} no longer exists", domain_id)),
            );
        };
        let fqdn = domain.fqdn();

        if !domain.enabled && !forced {
            debug!(domain_id, %fqdn, "Domain disabled, skipping");
            return UpdateOutcome::unchanged(domain_id, &fqdn, domain.current_ip.clone(), forced);
        }

        let desired = match self.desired_value(&domain, forced).await {
            Ok(Some(value)) => value,
            Ok(None) => {
                return UpdateOutcome::unchanged(domain_id, &fqdn, domain.current_ip.clone(), forced);
            }
            Err(e) => {
                warn!(domain_id, %fqdn, "Could not determine record value: {}", e);
                return UpdateOutcome::failed(domain_id, &fqdn, domain.current_ip.clone(), None, forced, &e);
            }
        };

        if !forced && domain.current_ip.as_deref() == Some(desired.as_str()) {
            debug!(domain_id, %fqdn, value = %desired, "Record already current");
            return UpdateOutcome::unchanged(domain_id, &fqdn, domain.current_ip.clone(), forced);
        }

        let (provider, credential) = match self.prepare(&domain).await {
            Ok(parts) => parts,
            Err(e) => {
                warn!(domain_id, %fqdn, "Cannot reach provider: {}", e);
                return UpdateOutcome::failed(
                    domain_id,
                    &fqdn,
                    domain.current_ip.clone(),
                    Some(desired),
                    forced,
                    &e,
                );
            }
        };

        let outcome = match self.publish(provider.as_ref(), credential, &domain, &desired).await {
            Ok(record_id) => {
                info!(domain_id, %fqdn, %record_id, value = %desired, forced, "Record published");
                let now = Utc::now();
                match self.registry.record_published(&domain, &desired, now).await {
                    Ok(Some(_)) => {}
                    Ok(None) => {
                        info!(domain_id, %fqdn, "Domain moved during publish; new record left for the next pass");
                    }
                    Err(e) if e.kind() == ErrorKind::DomainNotFound => {
                        info!(domain_id, %fqdn, "Domain deleted during publish");
                    }
                    // The provider already holds the value; the next pass re-publishes idempotently
                    Err(e) => error!(domain_id, %fqdn, "Failed to record published value: {}", e),
                }
                UpdateOutcome {
                    domain_id: domain_id.to_string(),
                    fqdn: fqdn.clone(),
                    previous_ip: domain.current_ip.clone(),
                    new_ip: Some(desired),
                    changed: true,
                    forced,
                    error: None,
                    message: None,
                    finished_at: now,
                }
            }
            Err(e) => {
                warn!(domain_id, %fqdn, kind = %e.kind(), "Publish failed: {}", e);
                UpdateOutcome::failed(
                    domain_id,
                    &fqdn,
                    domain.current_ip.clone(),
                    Some(desired),
                    forced,
                    &e,
                )
            }
        };

        self.record_history(&outcome);
        outcome
    }

    /// Value the record should hold, or `None` when this pass has nothing to publish
    async fn desired_value(&self, domain: &Domain, forced: bool) -> Result<Option<String>> {
        match domain.record_type {
            RecordType::CNAME => {
                if !forced {
                    // CNAME targets change only through configuration edits
                    return Ok(None);
                }
                domain
                    .target
                    .clone()
                    .map(Some)
                    .ok_or_else(|| Error::invalid_input("CNAME domain has no target"))
            }
            RecordType::A | RecordType::AAAA => {
                let family = domain
                    .family()
                    .ok_or_else(|| Error::Other(format!("{} has no address family", domain.record_type)))?;
                let snapshot = self.detector.detect_family(family).await?;
                let ip = snapshot
                    .address(family)
                    .ok_or_else(|| Error::detection_exhausted(format!("no {} address detected", family)))?;
                if snapshot.is_low_confidence() {
                    warn!(domain_id = %domain.id, %ip, "Publishing interface-derived address");
                }
                Ok(Some(ip.to_string()))
            }
        }
    }

    /// Adapter and decrypted credential for `domain`
    async fn prepare(&self, domain: &Domain) -> Result<(Arc<dyn DnsProvider>, Credential)> {
        let provider = self.providers.get(domain.provider)?;
        let credential = self.vault.get(&domain.id).await?;
        if credential.provider() != domain.provider {
            return Err(credential.mismatch(domain.provider));
        }
        Ok((provider, credential))
    }

    /// Upsert, consuming the plaintext credential
    async fn publish(
        &self,
        provider: &dyn DnsProvider,
        credential: Credential,
        domain: &Domain,
        value: &str,
    ) -> Result<String> {
        let record = RecordRef::new(&domain.name, &domain.subdomain, domain.record_type);
        let ttl = Some(domain.ttl.unwrap_or(self.default_ttl));

        let result = tokio::time::timeout(
            self.provider_timeout,
            provider.upsert_record(&credential, &record, value, ttl),
        )
        .await;
        drop(credential);

        match result {
            Ok(r) => r,
            Err(_) => Err(Error::unavailable(format!(
                "{} did not answer within {:?}",
                domain.provider, self.provider_timeout
            ))),
        }
    }

    fn record_history(&self, outcome: &UpdateOutcome) {
        let mut history = self.history.lock().unwrap_or_else(PoisonError::into_inner);
        let entries = history.entry(outcome.domain_id.clone()).or_default();
        if entries.len() == self.history_limit {
            entries.pop_front();
        }
        entries.push_back(UpdateHistoryEntry::from(outcome));
    }

    fn emit(&self, outcome: &UpdateOutcome) {
        let event = match (&outcome.error, outcome.changed) {
            (Some(kind), _) => EngineEvent::UpdateFailed {
                domain_id: outcome.domain_id.clone(),
                fqdn: outcome.fqdn.clone(),
                kind: *kind,
                error: outcome.message.clone().unwrap_or_default(),
            },
            (None, true) => EngineEvent::UpdateSucceeded {
                domain_id: outcome.domain_id.clone(),
                fqdn: outcome.fqdn.clone(),
                previous_ip: outcome.previous_ip.clone(),
                new_ip: outcome.new_ip.clone().unwrap_or_default(),
                forced: outcome.forced,
            },
            (None, false) => EngineEvent::UpdateSkipped {
                domain_id: outcome.domain_id.clone(),
                fqdn: outcome.fqdn.clone(),
                current_ip: outcome.new_ip.clone(),
            },
        };
        self.sink.emit(event);
    }
}

impl std::fmt::Debug for UpdateOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpdateOrchestrator")
            .field("provider_timeout", &self.provider_timeout)
            .field("default_ttl", &self.default_ttl)
            .finish_non_exhaustive()
    }
}
