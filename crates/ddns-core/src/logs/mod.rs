//! Structured engine events and the in-process log store
//!
//! Every component reports through [`EngineEvent`]. A [`LogSink`](crate::traits::LogSink)
//! receives them; [`MemoryLogSink`] turns them into [`LogEntry`] rows for the
//! `get_logs` / `clear_logs` calls.

mod memory;

pub use memory::MemoryLogSink;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ErrorKind;

/// Log verbosity, ordered from least to most verbose
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Debug,
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Error => "error",
            Self::Warn => "warn",
            Self::Info => "info",
            Self::Debug => "debug",
        })
    }
}

impl std::str::FromStr for LogLevel {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "error" => Ok(Self::Error),
            "warn" | "warning" => Ok(Self::Warn),
            "info" => Ok(Self::Info),
            "debug" | "trace" => Ok(Self::Debug),
            other => Err(crate::Error::invalid_input(format!("Unknown log level: {}", other))),
        }
    }
}

/// A stored log row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub id: u64,
    pub level: LogLevel,
    pub message: String,
    /// The originating event, serialized
    pub context: Option<serde_json::Value>,
    pub timestamp: DateTime<Utc>,
}

/// Events emitted by the engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum EngineEvent {
    /// A record was written at the provider
    UpdateSucceeded {
        domain_id: String,
        fqdn: String,
        previous_ip: Option<String>,
        new_ip: String,
        forced: bool,
    },

    /// No provider call was needed
    UpdateSkipped {
        domain_id: String,
        fqdn: String,
        current_ip: Option<String>,
    },

    /// The pass failed; the registry was left untouched
    UpdateFailed {
        domain_id: String,
        fqdn: String,
        kind: ErrorKind,
        error: String,
    },

    SchedulerStarted {
        active_tasks: usize,
    },

    SchedulerStopped {
        drained: usize,
    },

    /// A per-domain timer was (re)created
    DomainScheduled {
        domain_id: String,
        fqdn: String,
        interval_secs: u64,
    },

    /// A per-domain timer was cancelled
    DomainUnscheduled {
        domain_id: String,
        reason: String,
    },

    IpCacheCleared,

    DomainAdded {
        domain_id: String,
        fqdn: String,
    },

    DomainUpdated {
        domain_id: String,
        fqdn: String,
    },

    DomainDeleted {
        domain_id: String,
        fqdn: String,
    },

    SettingsChanged,
}

impl EngineEvent {
    /// Severity of this event
    pub fn level(&self) -> LogLevel {
        match self {
            Self::UpdateFailed { .. } => LogLevel::Error,
            Self::UpdateSkipped { .. } | Self::DomainScheduled { .. } | Self::DomainUnscheduled { .. } => {
                LogLevel::Debug
            }
            _ => LogLevel::Info,
        }
    }

    /// Human-readable one-liner
    pub fn message(&self) -> String {
        match self {
            Self::UpdateSucceeded {
                fqdn,
                previous_ip,
                new_ip,
                forced,
                ..
            } => format!(
                "{}updated {}: {} -> {}",
                if *forced { "force-" } else { "" },
                fqdn,
                previous_ip.as_deref().unwrap_or("(none)"),
                new_ip
            ),
            Self::UpdateSkipped { fqdn, current_ip, .. } => format!(
                "{} unchanged ({})",
                fqdn,
                current_ip.as_deref().unwrap_or("no value")
            ),
            Self::UpdateFailed { fqdn, kind, error, .. } => {
                format!("update of {} failed [{}]: {}", fqdn, kind, error)
            }
            Self::SchedulerStarted { active_tasks } => {
                format!("scheduler started with {} active tasks", active_tasks)
            }
            Self::SchedulerStopped { drained } => {
                format!("scheduler stopped ({} timers drained)", drained)
            }
            Self::DomainScheduled {
                fqdn, interval_secs, ..
            } => format!("scheduled {} every {}s", fqdn, interval_secs),
            Self::DomainUnscheduled { domain_id, reason } => {
                format!("unscheduled {} ({})", domain_id, reason)
            }
            Self::IpCacheCleared => "IP cache cleared".to_string(),
            Self::DomainAdded { fqdn, .. } => format!("added domain {}", fqdn),
            Self::DomainUpdated { fqdn, .. } => format!("updated domain {}", fqdn),
            Self::DomainDeleted { fqdn, .. } => format!("deleted domain {}", fqdn),
            Self::SettingsChanged => "settings updated".to_string(),
        }
    }
}
