// # DNS Provider Trait
//
// Normalizes record lookup and create-or-update across provider APIs.
//
// ## Implementations
//
// `ddns-providers` crate: Cloudflare, Aliyun, Tencent Cloud, AWS Route53,
// Huawei Cloud, Baidu Cloud, JD Cloud.
//
// ## Usage
//
// ```rust,ignore
// use ddns_core::traits::{DnsProvider, RecordRef};
// use ddns_core::model::RecordType;
//
// let record = RecordRef::new("example.com", "home", RecordType::A);
// let id = provider.upsert_record(&credential, &record, "203.0.113.5", Some(600)).await?;
// ```

use async_trait::async_trait;

use crate::model::{ProviderKind, RecordType};
use crate::model::domain::fqdn_of;
use crate::vault::Credential;

/// Identifies one record at a provider
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordRef<'a> {
    /// Zone (registrable domain), e.g. `example.com`
    pub zone: &'a str,
    /// Host label, `@` for the apex
    pub name: &'a str,
    pub record_type: RecordType,
}

impl<'a> RecordRef<'a> {
    pub fn new(zone: &'a str, name: &'a str, record_type: RecordType) -> Self {
        Self {
            zone,
            name,
            record_type,
        }
    }

    /// Fully-qualified record name without trailing dot
    pub fn fqdn(&self) -> String {
        fqdn_of(self.name, self.zone)
    }

    /// Host label, normalized so the apex is always `@`
    pub fn host(&self) -> &'a str {
        if self.name.is_empty() { "@" } else { self.name }
    }
}

/// A record as the provider currently holds it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExistingRecord {
    pub value: String,
    /// Provider-side id, when the provider has one
    pub record_id: Option<String>,
    pub ttl: Option<u32>,
}

/// Trait for DNS provider implementations
///
/// # Error mapping
///
/// Every implementation maps its provider's failures onto the shared taxonomy:
///
/// - rejected credentials → [`Error::Authentication`](crate::Error::Authentication)
/// - throttling → [`Error::RateLimited`](crate::Error::RateLimited)
/// - transport errors, timeouts, 5xx → [`Error::ProviderUnavailable`](crate::Error::ProviderUnavailable)
/// - missing record → [`Error::NotFound`](crate::Error::NotFound)
///
/// # Forbidden
///
/// - Retrying or sleeping (retries are the next scheduled tick)
/// - Logging or retaining credential material
#[async_trait]
pub trait DnsProvider: Send + Sync {
    /// Look up the current value of a record
    ///
    /// # Returns
    ///
    /// - `Ok(ExistingRecord)`: The record exists
    /// - `Err(Error::NotFound)`: No such record (callers treat this as "create")
    async fn resolve_record(
        &self,
        credential: &Credential,
        record: &RecordRef<'_>,
    ) -> Result<ExistingRecord, crate::Error>;

    /// Create the record if absent, else update it in place
    ///
    /// # Idempotency
    ///
    /// Calling this twice with the same value must leave exactly one record
    /// with that value; the second call performs no write.
    ///
    /// # Returns
    ///
    /// The provider-side record id (or a stable synthetic id for providers
    /// without record ids).
    async fn upsert_record(
        &self,
        credential: &Credential,
        record: &RecordRef<'_>,
        value: &str,
        ttl: Option<u32>,
    ) -> Result<String, crate::Error>;

    /// Cheap authenticated read that fails with `Authentication` on bad credentials
    async fn verify_credentials(&self, credential: &Credential) -> Result<(), crate::Error>;

    /// Which provider this adapter talks to
    fn kind(&self) -> ProviderKind;
}
