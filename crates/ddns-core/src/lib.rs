// # ddns-core
//
// Core library of the DDNS synchronization engine.
//
// ## Architecture Overview
//
// - **IpDetector**: ordered chain of `IpSource` strategies with a per-family
//   cache and request coalescing
// - **DnsProvider**: one capability interface over the supported provider APIs
// - **CredentialVault**: provider credentials encrypted at rest
// - **DomainRegistry**: the authoritative set of managed domains
// - **UpdateOrchestrator**: one detect/compare/publish pass per domain, under a
//   per-domain lock
// - **Scheduler**: one cancellable timer per enabled domain, driven by commands
// - **DdnsService**: the remote-call surface consumed by front ends
//
// ## Design Principles
//
// 1. **Library-First**: the daemon is a thin shell around `DdnsService`
// 2. **No ambient state**: the scheduler's timers live inside one actor task
// 3. **Failures are values**: an update pass always yields an `UpdateOutcome`
// 4. **Idempotency**: no provider call when the published value is current

pub mod config;
pub mod detector;
pub mod error;
pub mod logs;
pub mod model;
pub mod orchestrator;
pub mod registry;
pub mod scheduler;
pub mod service;
pub mod settings;
pub mod store;
pub mod traits;
pub mod vault;

mod persist;

// Re-export core types for convenience
pub use config::{DetectionPreference, EngineConfig, Settings, SettingsPatch, Theme};
pub use detector::IpDetector;
pub use error::{Error, ErrorKind, Result};
pub use logs::{EngineEvent, LogEntry, LogLevel, MemoryLogSink};
pub use model::{
    Domain, DomainInput, DomainPatch, IpFamily, IpRequest, IpSnapshot, ProviderKind, RecordType,
    SchedulerStatus, UpdateOutcome,
};
pub use orchestrator::UpdateOrchestrator;
pub use registry::{DomainRegistry, ProviderRegistry};
pub use scheduler::Scheduler;
pub use service::{DdnsService, DdnsServiceBuilder};
pub use settings::SettingsStore;
pub use store::{FileDomainStore, MemoryDomainStore};
pub use traits::{DnsProvider, DomainStore, IpSource, LogSink};
pub use vault::{Credential, CredentialVault, VaultKey};
