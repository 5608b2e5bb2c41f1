// # Domain model
//
// A `Domain` is one managed DNS record: which zone, which host label, which
// provider account, and what the engine last published there.
//
// ## Ownership
//
// - `current_ip` / `last_updated` are written only by the update orchestrator
// - every other field is written only through configuration edits
//
// Both paths go through `DomainRegistry`; nothing mutates a stored `Domain`
// directly.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::snapshot::IpFamily;
use crate::vault::Credential;
use crate::{Error, Result};

/// Lower bound for `update_interval`, in seconds
pub const MIN_UPDATE_INTERVAL: u64 = 30;

/// Upper bound for `update_interval`, in seconds
pub const MAX_UPDATE_INTERVAL: u64 = 86_400;

/// The fixed set of supported DNS providers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Cloudflare,
    Aliyun,
    Tencent,
    Aws,
    Huawei,
    Baidu,
    Jdcloud,
}

impl ProviderKind {
    /// All providers, in display order
    pub const ALL: [ProviderKind; 7] = [
        Self::Cloudflare,
        Self::Aliyun,
        Self::Tencent,
        Self::Aws,
        Self::Huawei,
        Self::Baidu,
        Self::Jdcloud,
    ];

    /// Stable lowercase identifier
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Cloudflare => "cloudflare",
            Self::Aliyun => "aliyun",
            Self::Tencent => "tencent",
            Self::Aws => "aws",
            Self::Huawei => "huawei",
            Self::Baidu => "baidu",
            Self::Jdcloud => "jdcloud",
        }
    }
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ProviderKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|p| p.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| Error::invalid_input(format!("Unknown provider: {}", s)))
    }
}

/// Record types the engine manages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[allow(clippy::upper_case_acronyms)]
pub enum RecordType {
    A,
    AAAA,
    CNAME,
}

impl RecordType {
    /// Address family implied by this record type (`None` for CNAME)
    pub fn family(self) -> Option<IpFamily> {
        match self {
            Self::A => Some(IpFamily::V4),
            Self::AAAA => Some(IpFamily::V6),
            Self::CNAME => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::A => "A",
            Self::AAAA => "AAAA",
            Self::CNAME => "CNAME",
        }
    }
}

impl std::fmt::Display for RecordType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A managed DNS target
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Domain {
    /// Opaque stable identifier (UUID v4)
    pub id: String,
    /// Registrable domain, e.g. `example.com`
    pub name: String,
    /// Host label, `@` or empty for the apex
    pub subdomain: String,
    pub provider: ProviderKind,
    pub record_type: RecordType,
    /// Configured CNAME target; only set for CNAME records
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    /// Record TTL override in seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl: Option<u32>,
    /// Last value successfully published
    pub current_ip: Option<String>,
    pub last_updated: Option<DateTime<Utc>>,
    /// Seconds between scheduled checks
    pub update_interval: u64,
    pub enabled: bool,
    /// Non-secret fingerprint of the provider account
    pub account: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Domain {
    /// Effective fully-qualified name
    pub fn fqdn(&self) -> String {
        fqdn_of(&self.subdomain, &self.name)
    }

    /// Host label as providers expect it (`@` for the apex)
    pub fn host(&self) -> &str {
        if self.subdomain.is_empty() {
            "@"
        } else {
            &self.subdomain
        }
    }

    /// Address family to detect for this domain
    pub fn family(&self) -> Option<IpFamily> {
        self.record_type.family()
    }

    /// Whether periodic address changes should trigger updates
    pub fn tracks_address(&self) -> bool {
        self.family().is_some()
    }

    /// Whether `other` publishes to the same record (name and type)
    pub fn same_record(&self, other: &Domain) -> bool {
        self.fqdn() == other.fqdn() && self.record_type == other.record_type
    }

    /// Key used for the uniqueness invariant among enabled domains
    pub(crate) fn record_key(&self) -> (ProviderKind, &str, String) {
        (self.provider, self.account.as_str(), self.fqdn().to_ascii_lowercase())
    }
}

/// Join a host label and a zone into an FQDN
pub fn fqdn_of(subdomain: &str, name: &str) -> String {
    if subdomain.is_empty() || subdomain == "@" {
        name.to_string()
    } else {
        format!("{}.{}", subdomain, name)
    }
}

fn default_enabled() -> bool {
    true
}

/// Payload for `add_domain`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DomainInput {
    pub name: String,
    #[serde(default)]
    pub subdomain: String,
    pub provider: ProviderKind,
    pub record_type: RecordType,
    #[serde(default)]
    pub target: Option<String>,
    #[serde(default)]
    pub ttl: Option<u32>,
    /// Falls back to the `default_update_interval` setting
    #[serde(default)]
    pub update_interval: Option<u64>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    pub credential: Credential,
}

/// Partial update for `update_domain`
///
/// `None` leaves a field untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DomainPatch {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub subdomain: Option<String>,
    #[serde(default)]
    pub record_type: Option<RecordType>,
    #[serde(default)]
    pub target: Option<String>,
    #[serde(default)]
    pub ttl: Option<u32>,
    #[serde(default)]
    pub update_interval: Option<u64>,
    #[serde(default)]
    pub enabled: Option<bool>,
    /// Replacement credential; must match the domain's provider
    #[serde(default)]
    pub credential: Option<Credential>,
}

impl DomainPatch {
    /// Whether applying this patch changes anything the scheduler cares about
    pub fn affects_schedule(&self) -> bool {
        self.update_interval.is_some() || self.enabled.is_some() || self.record_type.is_some()
    }
}

/// Validate a registrable domain name
///
/// RFC 1035 limits: 253 chars total, 63 per label; labels are alphanumeric
/// or hyphen and may not start or end with a hyphen.
pub fn validate_domain_name(domain: &str) -> Result<()> {
    if domain.is_empty() {
        return Err(Error::invalid_input("Domain name cannot be empty"));
    }

    if domain.len() > 253 {
        return Err(Error::invalid_input(format!(
            "Domain name too long: {} chars (max 253). Got: {}",
            domain.len(),
            domain
        )));
    }

    if !domain.contains('.') {
        return Err(Error::invalid_input(format!(
            "Domain name must have at least two labels: '{}'",
            domain
        )));
    }

    for label in domain.split('.') {
        validate_label(label, domain)?;
    }

    Ok(())
}

/// Validate a host label (`""`, `@`, or dot-separated labels, first may be `*`)
pub fn validate_subdomain(subdomain: &str) -> Result<()> {
    if subdomain.is_empty() || subdomain == "@" {
        return Ok(());
    }

    for (i, label) in subdomain.split('.').enumerate() {
        if i == 0 && label == "*" {
            continue;
        }
        validate_label(label, subdomain)?;
    }

    Ok(())
}

fn validate_label(label: &str, whole: &str) -> Result<()> {
    if label.is_empty() {
        return Err(Error::invalid_input(format!("Name has empty label: '{}'", whole)));
    }

    if label.len() > 63 {
        return Err(Error::invalid_input(format!(
            "Label too long: {} chars (max 63). Label: '{}'",
            label.len(),
            label
        )));
    }

    if !label.chars().all(|c| c.is_alphanumeric() || c == '-' || c == '_') {
        return Err(Error::invalid_input(format!(
            "Label contains invalid characters. Label: '{}'. \
            Valid: alphanumeric, hyphen and underscore only.",
            label
        )));
    }

    if label.starts_with('-') || label.ends_with('-') {
        return Err(Error::invalid_input(format!(
            "Label cannot start or end with hyphen. Label: '{}'",
            label
        )));
    }

    Ok(())
}

/// Validate an update interval in seconds
pub fn validate_interval(secs: u64) -> Result<()> {
    if !(MIN_UPDATE_INTERVAL..=MAX_UPDATE_INTERVAL).contains(&secs) {
        return Err(Error::invalid_input(format!(
            "Update interval must be between {} and {} seconds, got {}",
            MIN_UPDATE_INTERVAL, MAX_UPDATE_INTERVAL, secs
        )));
    }
    Ok(())
}

/// Validate record type / target pairing
pub fn validate_target(record_type: RecordType, target: Option<&str>) -> Result<()> {
    match (record_type, target) {
        (RecordType::CNAME, Some(t)) => {
            let t = t.trim_end_matches('.');
            validate_domain_name(t)
                .map_err(|e| Error::invalid_input(format!("Invalid CNAME target: {}", e)))
        }
        (RecordType::CNAME, None) => Err(Error::invalid_input("CNAME records require a target")),
        (_, Some(_)) => Err(Error::invalid_input(format!(
            "{} records are published from detection and take no target",
            record_type
        ))),
        (_, None) => Ok(()),
    }
}
