//! Service facade
//!
//! [`DdnsService`] wires the engine together and exposes the remote-call
//! surface used by front ends: domain CRUD, IP detection, logs, settings and
//! scheduler control.
//!
//! ## Usage
//!
//! ```rust,ignore
//! let service = DdnsServiceBuilder::new()
//!     .domain_store(Arc::new(FileDomainStore::open("data/domains.json").await?))
//!     .vault(CredentialVault::open("data/vault.json", &secret).await?)
//!     .settings(SettingsStore::open("data/settings.json").await?)
//!     .providers(providers)
//!     .ip_sources(sources)
//!     .build()
//!     .await?;
//!
//! service.start_scheduler().await?;
//! let summary = service.force_update_domain(&id).await?;
//! ```

use std::sync::Arc;
use tokio_stream::wrappers::BroadcastStream;
use tracing::{debug, info, warn};

use crate::config::{EngineConfig, Settings, SettingsPatch};
use crate::detector::IpDetector;
use crate::error::{Error, Result};
use crate::logs::{EngineEvent, LogEntry, MemoryLogSink};
use crate::model::{
    Domain, DomainInput, DomainPatch, IpRequest, IpSnapshot, RecordType, SchedulerStatus,
    UpdateHistoryEntry,
};
use crate::orchestrator::UpdateOrchestrator;
use crate::registry::{DomainRegistry, ProviderRegistry};
use crate::scheduler::Scheduler;
use crate::settings::SettingsStore;
use crate::store::MemoryDomainStore;
use crate::traits::{DomainStore, IpSource, LogSink};
use crate::vault::CredentialVault;

/// Default page size for `get_logs` when the caller passes 0
const DEFAULT_LOG_PAGE: usize = 100;

/// Builder for [`DdnsService`]
///
/// Every collaborator has an in-memory default, so tests only supply what
/// they exercise.
pub struct DdnsServiceBuilder {
    config: EngineConfig,
    settings: Option<SettingsStore>,
    store: Option<Arc<dyn DomainStore>>,
    vault: Option<CredentialVault>,
    providers: Option<ProviderRegistry>,
    sources: Vec<Arc<dyn IpSource>>,
}

impl Default for DdnsServiceBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl DdnsServiceBuilder {
    pub fn new() -> Self {
        Self {
            config: EngineConfig::default(),
            settings: None,
            store: None,
            vault: None,
            providers: None,
            sources: Vec::new(),
        }
    }

    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn settings(mut self, settings: SettingsStore) -> Self {
        self.settings = Some(settings);
        self
    }

    pub fn domain_store(mut self, store: Arc<dyn DomainStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn vault(mut self, vault: CredentialVault) -> Self {
        self.vault = Some(vault);
        self
    }

    pub fn providers(mut self, providers: ProviderRegistry) -> Self {
        self.providers = Some(providers);
        self
    }

    /// Append one detection strategy to the chain
    pub fn ip_source(mut self, source: Arc<dyn IpSource>) -> Self {
        self.sources.push(source);
        self
    }

    /// Append detection strategies to the chain, in order
    pub fn ip_sources(mut self, sources: impl IntoIterator<Item = Arc<dyn IpSource>>) -> Self {
        self.sources.extend(sources);
        self
    }

    /// Load the registry, apply settings and spawn the scheduler actor
    ///
    /// Must be called within a tokio runtime.
    pub async fn build(self) -> Result<DdnsService> {
        self.config.validate()?;

        let store = self
            .store
            .unwrap_or_else(|| Arc::new(MemoryDomainStore::new()));
        let registry = Arc::new(DomainRegistry::load(store).await?);
        let settings = Arc::new(
            self.settings
                .unwrap_or_else(|| SettingsStore::in_memory(Settings::default())),
        );
        let vault = Arc::new(self.vault.unwrap_or_else(CredentialVault::ephemeral));
        let providers = Arc::new(self.providers.unwrap_or_default());

        let current = settings.get().await;
        let logs = Arc::new(MemoryLogSink::new(self.config.log_capacity));
        logs.set_level(current.log_level);
        let sink: Arc<dyn LogSink> = logs.clone();

        if self.sources.is_empty() {
            warn!("No IP detection strategies configured; A/AAAA updates will fail");
        }
        let detector = Arc::new(IpDetector::new(self.sources, &self.config));
        detector.set_preference(current.ip_detection_method);

        let orchestrator = Arc::new(UpdateOrchestrator::new(
            registry.clone(),
            vault.clone(),
            providers.clone(),
            detector.clone(),
            sink.clone(),
            &self.config,
        ));
        let scheduler = Scheduler::spawn(
            registry.clone(),
            orchestrator.clone(),
            sink.clone(),
            self.config.command_channel_capacity,
        );

        info!(
            domains = registry.len().await,
            providers = providers.kinds().len(),
            "DDNS service ready"
        );

        Ok(DdnsService {
            settings,
            registry,
            vault,
            providers,
            detector,
            orchestrator,
            scheduler,
            logs,
        })
    }
}

/// The engine's remote-call surface
pub struct DdnsService {
    settings: Arc<SettingsStore>,
    registry: Arc<DomainRegistry>,
    vault: Arc<CredentialVault>,
    providers: Arc<ProviderRegistry>,
    detector: Arc<IpDetector>,
    orchestrator: Arc<UpdateOrchestrator>,
    scheduler: Scheduler,
    logs: Arc<MemoryLogSink>,
}

impl DdnsService {
    pub fn builder() -> DdnsServiceBuilder {
        DdnsServiceBuilder::new()
    }

    // Domains

    pub async fn get_domains(&self) -> Vec<Domain> {
        self.registry.list().await
    }

    pub async fn get_domain(&self, id: &str) -> Result<Domain> {
        self.registry
            .get(id)
            .await
            .ok_or_else(|| Error::domain_not_found(id))
    }

    /// Validate, persist and (when enabled) schedule a new domain
    pub async fn add_domain(&self, input: DomainInput) -> Result<Domain> {
        let default_interval = self.settings.get().await.default_update_interval;
        let domain = self.registry.add(&input, default_interval).await?;

        if let Err(e) = self.vault.put(&domain.id, &input.credential).await {
            warn!(domain_id = %domain.id, "Storing credential failed, rolling back: {}", e);
            if let Err(rollback) = self.registry.remove(&domain.id).await {
                warn!(domain_id = %domain.id, "Rollback failed: {}", rollback);
            }
            return Err(e);
        }

        self.sink().emit(EngineEvent::DomainAdded {
            domain_id: domain.id.clone(),
            fqdn: domain.fqdn(),
        });
        if domain.enabled {
            self.scheduler.reschedule(&domain.id).await?;
        }
        Ok(domain)
    }

    /// Apply a configuration edit
    ///
    /// Reschedules the domain when its interval, enabled flag or record
    /// location changed. Editing the target of an enabled CNAME domain
    /// publishes the new target right away.
    pub async fn update_domain(&self, id: &str, patch: DomainPatch) -> Result<Domain> {
        let change = self.registry.update(id, &patch).await?;
        if let Some(credential) = &patch.credential {
            if let Err(e) = self.vault.put(id, credential).await {
                warn!(domain_id = id, "Storing credential failed, reverting edit: {}", e);
                if let Err(rollback) = self.registry.revert(&change).await {
                    warn!(domain_id = id, "Rollback failed: {}", rollback);
                }
                return Err(e);
            }
        }

        self.sink().emit(EngineEvent::DomainUpdated {
            domain_id: id.to_string(),
            fqdn: change.after.fqdn(),
        });

        if change.schedule_changed() || change.record_moved() {
            self.scheduler.reschedule(id).await?;
        }

        let after = &change.after;
        if after.enabled
            && after.record_type == RecordType::CNAME
            && (change.target_changed() || change.record_moved())
        {
            let outcome = self.orchestrator.run_id(id, true).await;
            debug!(domain_id = id, "CNAME edit published: {}", outcome.summary());
        }

        self.get_domain(id).await
    }

    /// Unschedule and delete a domain with its credential and history
    pub async fn delete_domain(&self, id: &str) -> Result<()> {
        if self.registry.get(id).await.is_none() {
            return Err(Error::domain_not_found(id));
        }

        self.scheduler.remove(id).await?;
        let domain = self.registry.remove(id).await?;
        self.vault.delete(id).await?;
        self.orchestrator.forget(id);

        self.sink().emit(EngineEvent::DomainDeleted {
            domain_id: id.to_string(),
            fqdn: domain.fqdn(),
        });
        Ok(())
    }

    /// Cheap authenticated read against the domain's provider
    pub async fn verify_domain_credentials(&self, id: &str) -> Result<()> {
        self.orchestrator.verify_credentials(id).await
    }

    // IP detection

    pub async fn detect_ip(&self, request: IpRequest) -> Result<IpSnapshot> {
        self.detector.detect(request).await
    }

    /// Last detected addresses without triggering detection
    pub fn get_current_ip(&self) -> Option<IpSnapshot> {
        self.detector.current()
    }

    pub fn clear_ip_cache(&self) {
        self.detector.clear_cache();
        self.sink().emit(EngineEvent::IpCacheCleared);
    }

    // Logs

    /// Newest-first page of log entries
    pub fn get_logs(&self, limit: usize, offset: Option<usize>) -> Vec<LogEntry> {
        let limit = if limit == 0 { DEFAULT_LOG_PAGE } else { limit };
        self.logs.entries(limit, offset.unwrap_or(0))
    }

    pub fn clear_logs(&self) {
        self.logs.clear();
    }

    /// Live stream of log entries stored from now on
    pub fn subscribe_logs(&self) -> BroadcastStream<LogEntry> {
        self.logs.subscribe()
    }

    pub fn get_update_history(&self, id: &str, limit: usize) -> Vec<UpdateHistoryEntry> {
        self.orchestrator.history(id, limit)
    }

    // Settings

    pub async fn get_settings(&self) -> Settings {
        self.settings.get().await
    }

    /// Validate, persist and apply a partial settings update
    pub async fn update_settings(&self, patch: SettingsPatch) -> Result<Settings> {
        let (previous, current) = self.settings.update(&patch).await?;

        if previous.log_level != current.log_level {
            self.logs.set_level(current.log_level);
        }
        if previous.ip_detection_method != current.ip_detection_method {
            self.detector.set_preference(current.ip_detection_method);
        }

        self.sink().emit(EngineEvent::SettingsChanged);
        Ok(current)
    }

    // Scheduler

    pub async fn start_scheduler(&self) -> Result<SchedulerStatus> {
        self.scheduler.start().await
    }

    /// Stop every timer, returning after in-flight runs finished
    pub async fn stop_scheduler(&self) -> Result<SchedulerStatus> {
        self.scheduler.stop().await
    }

    pub async fn get_scheduler_status(&self) -> Result<SchedulerStatus> {
        self.scheduler.status().await
    }

    /// Start the scheduler if `auto_start` is set
    ///
    /// `overridden` takes precedence over the persisted setting.
    pub async fn start_if_auto_start(&self, overridden: Option<bool>) -> Result<Option<SchedulerStatus>> {
        let auto_start = match overridden {
            Some(flag) => flag,
            None => self.settings.get().await.auto_start,
        };
        if auto_start {
            info!("Auto start enabled, starting scheduler");
            self.start_scheduler().await.map(Some)
        } else {
            Ok(None)
        }
    }

    /// Run one forced update outside the periodic cadence
    ///
    /// Works whether or not the scheduler is running and never creates a
    /// timer. Returns the human-readable outcome summary; update failures
    /// are part of the summary, not an `Err`.
    pub async fn force_update_domain(&self, id: &str) -> Result<String> {
        if self.registry.get(id).await.is_none() {
            return Err(Error::domain_not_found(id));
        }
        let outcome = self.orchestrator.run_id(id, true).await;
        Ok(outcome.summary())
    }

    /// Stop the scheduler and flush the domain store
    pub async fn shutdown(&self) -> Result<()> {
        self.scheduler.stop().await?;
        self.registry.flush().await
    }

    // Accessors

    pub fn providers(&self) -> &ProviderRegistry {
        &self.providers
    }

    pub fn detector(&self) -> &IpDetector {
        &self.detector
    }

    pub fn orchestrator(&self) -> &UpdateOrchestrator {
        &self.orchestrator
    }

    fn sink(&self) -> &MemoryLogSink {
        &self.logs
    }
}

impl std::fmt::Debug for DdnsService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DdnsService")
            .field("providers", &self.providers)
            .field("detector", &self.detector)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ProviderKind;
    use crate::vault::Credential;

    fn input() -> DomainInput {
        DomainInput {
            name: "example.com".into(),
            subdomain: "home".into(),
            provider: ProviderKind::Cloudflare,
            record_type: RecordType::A,
            target: None,
            ttl: None,
            update_interval: None,
            enabled: false,
            credential: Credential::Cloudflare {
                api_token: "tok".into(),
                account_email: None,
            },
        }
    }

    #[tokio::test]
    async fn test_add_applies_default_interval_and_stores_credential() {
        let service = DdnsService::builder().build().await.unwrap();
        let domain = service.add_domain(input()).await.unwrap();
        assert_eq!(domain.update_interval, 300);
        assert!(service.vault.contains(&domain.id).await);
        assert_eq!(service.get_domains().await.len(), 1);
    }

    #[tokio::test]
    async fn test_delete_removes_credential() {
        let service = DdnsService::builder().build().await.unwrap();
        let domain = service.add_domain(input()).await.unwrap();
        service.delete_domain(&domain.id).await.unwrap();
        assert!(!service.vault.contains(&domain.id).await);
        assert!(service.get_domain(&domain.id).await.is_err());
        assert!(service.delete_domain(&domain.id).await.is_err());
    }

    #[tokio::test]
    async fn test_settings_update_applies_log_level() {
        let service = DdnsService::builder().build().await.unwrap();
        let patch = SettingsPatch {
            log_level: Some(crate::logs::LogLevel::Error),
            ..Default::default()
        };
        service.update_settings(patch).await.unwrap();
        assert_eq!(service.logs.level(), crate::logs::LogLevel::Error);
    }

    #[tokio::test]
    async fn test_failed_credential_write_reverts_edit() {
        let dir = tempfile::tempdir().unwrap();
        let data = dir.path().join("data");
        let vault = CredentialVault::open_with_iterations(data.join("vault.json"), "s3cret", 1_000)
            .await
            .unwrap();
        let service = DdnsService::builder().vault(vault).build().await.unwrap();
        let before = service.add_domain(input()).await.unwrap();

        std::fs::remove_dir_all(&data).unwrap();

        let patch = DomainPatch {
            subdomain: Some("office".into()),
            credential: Some(Credential::Cloudflare {
                api_token: "other-tok".into(),
                account_email: None,
            }),
            ..Default::default()
        };
        assert!(service.update_domain(&before.id, patch).await.is_err());

        assert_eq!(service.get_domain(&before.id).await.unwrap(), before);
        assert_eq!(service.vault.get(&before.id).await.unwrap(), input().credential);
    }

    #[tokio::test]
    async fn test_force_update_unknown_domain() {
        let service = DdnsService::builder().build().await.unwrap();
        let err = service.force_update_domain("missing").await.unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::DomainNotFound);
    }
}
