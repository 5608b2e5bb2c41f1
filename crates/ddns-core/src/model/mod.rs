//! Data model shared by every component of the engine
//!
//! - [`Domain`]: a managed DNS target and its desired state
//! - [`IpSnapshot`]: an immutable detection result
//! - [`UpdateOutcome`]: the result of one orchestration pass
//! - [`SchedulerStatus`]: derived scheduler state

pub mod domain;
pub mod outcome;
pub mod snapshot;

pub use domain::{
    Domain, DomainInput, DomainPatch, ProviderKind, RecordType, MAX_UPDATE_INTERVAL,
    MIN_UPDATE_INTERVAL,
};
pub use outcome::{HistoryStatus, SchedulerStatus, UpdateHistoryEntry, UpdateOutcome};
pub use snapshot::{DetectionMethod, IpFamily, IpRequest, IpSnapshot};
