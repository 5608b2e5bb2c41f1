use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ErrorKind;

/// Result of one orchestration pass for one domain
///
/// Consumed to produce exactly one log event and, on success, one registry
/// write. Never raised as an error: failures travel in `error`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateOutcome {
    pub domain_id: String,
    pub fqdn: String,
    pub previous_ip: Option<String>,
    pub new_ip: Option<String>,
    pub changed: bool,
    pub forced: bool,
    pub error: Option<ErrorKind>,
    /// Human-readable error detail (never contains credentials)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub finished_at: DateTime<Utc>,
}

impl UpdateOutcome {
    pub(crate) fn unchanged(
        domain_id: &str,
        fqdn: &str,
        current: Option<String>,
        forced: bool,
    ) -> Self {
        Self {
            domain_id: domain_id.to_string(),
            fqdn: fqdn.to_string(),
            new_ip: current.clone(),
            previous_ip: current,
            changed: false,
            forced,
            error: None,
            message: None,
            finished_at: Utc::now(),
        }
    }

    pub(crate) fn failed(
        domain_id: &str,
        fqdn: &str,
        previous: Option<String>,
        attempted: Option<String>,
        forced: bool,
        err: &crate::Error,
    ) -> Self {
        Self {
            domain_id: domain_id.to_string(),
            fqdn: fqdn.to_string(),
            previous_ip: previous,
            new_ip: attempted,
            changed: false,
            forced,
            error: Some(err.kind()),
            message: Some(err.to_string()),
            finished_at: Utc::now(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    /// One-line summary returned to `force_update_domain` callers
    pub fn summary(&self) -> String {
        match (&self.error, self.changed) {
            (Some(kind), _) => format!(
                "{}: update failed ({}): {}",
                self.fqdn,
                kind,
                self.message.as_deref().unwrap_or("no detail")
            ),
            (None, true) => format!(
                "{}: updated {} -> {}",
                self.fqdn,
                self.previous_ip.as_deref().unwrap_or("(none)"),
                self.new_ip.as_deref().unwrap_or("(none)")
            ),
            (None, false) => format!(
                "{}: unchanged ({})",
                self.fqdn,
                self.new_ip.as_deref().unwrap_or("no value")
            ),
        }
    }
}

/// Derived scheduler state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SchedulerStatus {
    pub running: bool,
    /// Domains with a live timer; 0 while stopped
    pub active_tasks: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HistoryStatus {
    Success,
    Failed,
}

/// One provider write attempt, kept for the history view
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateHistoryEntry {
    pub domain_id: String,
    pub old_ip: Option<String>,
    pub new_ip: Option<String>,
    pub status: HistoryStatus,
    pub error_message: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl From<&UpdateOutcome> for UpdateHistoryEntry {
    fn from(o: &UpdateOutcome) -> Self {
        Self {
            domain_id: o.domain_id.clone(),
            old_ip: o.previous_ip.clone(),
            new_ip: o.new_ip.clone(),
            status: if o.is_success() {
                HistoryStatus::Success
            } else {
                HistoryStatus::Failed
            },
            error_message: o.message.clone(),
            timestamp: o.finished_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_summary_variants() {
        let mut o = UpdateOutcome::unchanged("d1", "home.example.com", Some("203.0.113.5".into()), false);
        assert_eq!(o.summary(), "home.example.com: unchanged (203.0.113.5)");

        o.changed = true;
        o.previous_ip = None;
        assert_eq!(o.summary(), "home.example.com: updated (none) -> 203.0.113.5");

        let err = crate::Error::auth("token rejected");
        let f = UpdateOutcome::failed("d1", "home.example.com", None, Some("203.0.113.5".into()), true, &err);
        assert!(f.summary().contains("AuthError"));
        assert_eq!(UpdateHistoryEntry::from(&f).status, HistoryStatus::Failed);
    }
}
