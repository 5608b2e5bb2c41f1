use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::error::{Error, Result};
use crate::model::domain::{validate_domain_name, validate_interval, validate_subdomain, validate_target};
use crate::model::{Domain, DomainInput, DomainPatch, RecordType};
use crate::traits::DomainStore;

/// Before/after view of a configuration edit
#[derive(Debug, Clone)]
pub struct DomainChange {
    pub before: Domain,
    pub after: Domain,
}

impl DomainChange {
    /// Interval, enabled flag or record type changed
    pub fn schedule_changed(&self) -> bool {
        self.before.update_interval != self.after.update_interval
            || self.before.enabled != self.after.enabled
            || self.before.record_type != self.after.record_type
    }

    /// The published record itself moved (zone, host or type)
    pub fn record_moved(&self) -> bool {
        !self.before.same_record(&self.after)
    }

    pub fn target_changed(&self) -> bool {
        self.before.target != self.after.target
    }
}

/// Authoritative set of configured domains
///
/// All reads and writes go through these methods. Writes hold the registry
/// lock across persistence so validation and uniqueness checks are atomic
/// with the write.
pub struct DomainRegistry {
    store: Arc<dyn DomainStore>,
    domains: RwLock<HashMap<String, Domain>>,
}

impl DomainRegistry {
    /// Load every domain from `store`
    pub async fn load(store: Arc<dyn DomainStore>) -> Result<Self> {
        let domains = store
            .load_all()
            .await?
            .into_iter()
            .map(|d| (d.id.clone(), d))
            .collect::<HashMap<_, _>>();
        tracing::debug!("Domain registry loaded {} domains", domains.len());
        Ok(Self {
            store,
            domains: RwLock::new(domains),
        })
    }

    /// All domains, oldest first
    pub async fn list(&self) -> Vec<Domain> {
        let mut all: Vec<Domain> = self.domains.read().await.values().cloned().collect();
        all.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        all
    }

    /// Enabled domains, oldest first
    pub async fn enabled(&self) -> Vec<Domain> {
        self.list().await.into_iter().filter(|d| d.enabled).collect()
    }

    pub async fn get(&self, id: &str) -> Option<Domain> {
        self.domains.read().await.get(id).cloned()
    }

    pub async fn len(&self) -> usize {
        self.domains.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.domains.read().await.is_empty()
    }

    /// Validate and insert a new domain
    ///
    /// The credential itself is not stored here; only its account
    /// fingerprint is kept for the uniqueness invariant.
    pub async fn add(&self, input: &DomainInput, default_interval: u64) -> Result<Domain> {
        if input.credential.provider() != input.provider {
            return Err(Error::invalid_input(format!(
                "Credential is for {}, domain uses {}",
                input.credential.provider(),
                input.provider
            )));
        }
        input.credential.validate()?;

        let now = Utc::now();
        let domain = Domain {
            id: uuid::Uuid::new_v4().to_string(),
            name: input.name.trim().trim_end_matches('.').to_ascii_lowercase(),
            subdomain: normalize_subdomain(&input.subdomain),
            provider: input.provider,
            record_type: input.record_type,
            target: input.target.as_ref().map(|t| t.trim().to_string()),
            ttl: input.ttl,
            current_ip: None,
            last_updated: None,
            update_interval: input.update_interval.unwrap_or(default_interval),
            enabled: input.enabled,
            account: input.credential.account_fingerprint(),
            created_at: now,
            updated_at: now,
        };
        validate(&domain)?;

        let mut guard = self.domains.write().await;
        check_unique(&guard, &domain)?;
        self.store.put(&domain).await?;
        guard.insert(domain.id.clone(), domain.clone());

        tracing::info!(domain_id = %domain.id, fqdn = %domain.fqdn(), "Domain added");
        Ok(domain)
    }

    /// Apply a configuration edit
    pub async fn update(&self, id: &str, patch: &DomainPatch) -> Result<DomainChange> {
        let mut guard = self.domains.write().await;
        let before = guard.get(id).cloned().ok_or_else(|| Error::domain_not_found(id))?;

        let mut after = before.clone();
        if let Some(name) = &patch.name {
            after.name = name.trim().trim_end_matches('.').to_ascii_lowercase();
        }
        if let Some(sub) = &patch.subdomain {
            after.subdomain = normalize_subdomain(sub);
        }
        if let Some(rt) = patch.record_type {
            after.record_type = rt;
            if rt != RecordType::CNAME && patch.target.is_none() {
                after.target = None;
            }
        }
        if let Some(target) = &patch.target {
            after.target = Some(target.trim().to_string());
        }
        if let Some(ttl) = patch.ttl {
            after.ttl = Some(ttl);
        }
        if let Some(interval) = patch.update_interval {
            after.update_interval = interval;
        }
        if let Some(enabled) = patch.enabled {
            after.enabled = enabled;
        }
        if let Some(cred) = &patch.credential {
            if cred.provider() != after.provider {
                return Err(Error::invalid_input(format!(
                    "Credential is for {}, domain uses {}",
                    cred.provider(),
                    after.provider
                )));
            }
            cred.validate()?;
            after.account = cred.account_fingerprint();
        }

        validate(&after)?;

        if !before.same_record(&after) {
            // Nothing has been published at the new location yet
            tracing::debug!(
                domain_id = %after.id,
                from = %before.fqdn(),
                to = %after.fqdn(),
                "Record location changed, resetting published state"
            );
            after.current_ip = None;
            after.last_updated = None;
        }
        after.updated_at = Utc::now();

        check_unique(&guard, &after)?;
        self.store.put(&after).await?;
        guard.insert(after.id.clone(), after.clone());

        tracing::info!(domain_id = %after.id, fqdn = %after.fqdn(), "Domain updated");
        Ok(DomainChange { before, after })
    }

    /// Undo `change` unless a later edit already replaced it
    ///
    /// A publish recorded since the edit is kept when the reverted domain
    /// still points at the same record.
    pub async fn revert(&self, change: &DomainChange) -> Result<()> {
        let mut guard = self.domains.write().await;
        let Some(current) = guard.get(&change.after.id).cloned() else {
            return Ok(());
        };
        if current.updated_at != change.after.updated_at {
            tracing::debug!(domain_id = %current.id, "Domain edited again, not reverting");
            return Ok(());
        }

        let mut restored = change.before.clone();
        if current.same_record(&restored) {
            restored.current_ip = current.current_ip.clone();
            restored.last_updated = current.last_updated;
        }
        self.store.put(&restored).await?;
        guard.insert(restored.id.clone(), restored);
        tracing::info!(domain_id = %change.after.id, "Domain edit reverted");
        Ok(())
    }

    /// Record a successful publish made from the `published` configuration
    ///
    /// Only `current_ip` and `last_updated` change. Returns `None` without
    /// writing when the domain was moved to another record since `published`
    /// was read; the value belongs to the old location.
    pub async fn record_published(
        &self,
        published: &Domain,
        value: &str,
        at: DateTime<Utc>,
    ) -> Result<Option<Domain>> {
        let mut guard = self.domains.write().await;
        let mut domain = guard
            .get(&published.id)
            .cloned()
            .ok_or_else(|| Error::domain_not_found(&published.id))?;
        if !domain.same_record(published) {
            tracing::debug!(
                domain_id = %domain.id,
                published = %published.fqdn(),
                now = %domain.fqdn(),
                "Record moved during publish, keeping reset state"
            );
            return Ok(None);
        }
        domain.current_ip = Some(value.to_string());
        domain.last_updated = Some(at);
        self.store.put(&domain).await?;
        guard.insert(domain.id.clone(), domain.clone());
        Ok(Some(domain))
    }

    /// Delete a domain
    pub async fn remove(&self, id: &str) -> Result<Domain> {
        let mut guard = self.domains.write().await;
        let domain = guard.get(id).cloned().ok_or_else(|| Error::domain_not_found(id))?;
        self.store.remove(id).await?;
        guard.remove(id);
        tracing::info!(domain_id = %id, fqdn = %domain.fqdn(), "Domain removed");
        Ok(domain)
    }

    /// Flush the backing store
    pub async fn flush(&self) -> Result<()> {
        self.store.flush().await
    }
}

impl std::fmt::Debug for DomainRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DomainRegistry").finish_non_exhaustive()
    }
}

fn normalize_subdomain(sub: &str) -> String {
    let sub = sub.trim().to_ascii_lowercase();
    if sub == "@" { String::new() } else { sub }
}

fn validate(domain: &Domain) -> Result<()> {
    validate_domain_name(&domain.name)?;
    validate_subdomain(&domain.subdomain)?;
    validate_interval(domain.update_interval)?;
    validate_target(domain.record_type, domain.target.as_deref())?;
    if domain.fqdn().len() > 253 {
        return Err(Error::invalid_input("FQDN exceeds 253 characters"));
    }
    Ok(())
}

/// Enforce FQDN uniqueness among enabled domains sharing a provider account
fn check_unique(domains: &HashMap<String, Domain>, candidate: &Domain) -> Result<()> {
    if !candidate.enabled {
        return Ok(());
    }
    let key = candidate.record_key();
    let clash = domains
        .values()
        .filter(|d| d.enabled && d.id != candidate.id)
        .find(|d| d.record_key() == key);
    match clash {
        Some(other) => Err(Error::invalid_input(format!(
            "{} is already managed by enabled domain {} on the same {} account",
            candidate.fqdn(),
            other.id,
            candidate.provider
        ))),
        None => Ok(()),
    }
}
