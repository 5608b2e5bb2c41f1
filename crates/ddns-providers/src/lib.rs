// # DNS Provider Adapters
//
// The seven provider backends behind one tagged [`Provider`] enum. Each
// variant implements the same `DnsProvider` contract from `ddns-core`:
//
// - `resolve_record`: look up the current value of one record
// - `upsert_record`: create if absent, update in place if different, no-op if equal
// - `verify_credentials`: cheap authenticated read
//
// Signing schemes and zone-id discovery are private to each adapter.
//
// ## Usage
//
// ```rust,ignore
// use ddns_core::{EngineConfig, ProviderRegistry};
//
// let providers = ProviderRegistry::new();
// ddns_providers::register_all(&providers, &EngineConfig::default())?;
// ```
//
// ## Constraints
//
// Adapters are single-shot: no retries, no sleeps, no background tasks and
// no state beyond the HTTP client. Credentials are borrowed per call and
// never logged.

pub mod aliyun;
pub mod baidu;
pub mod cloudflare;
mod common;
pub mod huawei;
pub mod jdcloud;
pub mod route53;
pub mod tencent;

pub use aliyun::AliyunProvider;
pub use baidu::BaiduProvider;
pub use cloudflare::CloudflareProvider;
pub use huawei::HuaweiProvider;
pub use jdcloud::JdcloudProvider;
pub use route53::Route53Provider;
pub use tencent::TencentProvider;

use async_trait::async_trait;
use ddns_core::model::ProviderKind;
use ddns_core::traits::{DnsProvider, ExistingRecord, RecordRef};
use ddns_core::{Credential, EngineConfig, ProviderRegistry, Result};
use std::sync::Arc;
use std::time::Duration;

/// Default HTTP timeout for provider requests
pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Construction options shared by every adapter
#[derive(Debug, Clone)]
pub struct ProviderOptions {
    /// Per-request HTTP timeout
    pub timeout: Duration,
    /// Replaces the provider's public endpoint (tests point this at a mock server)
    pub base_url: Option<String>,
}

impl Default for ProviderOptions {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_HTTP_TIMEOUT,
            base_url: None,
        }
    }
}

impl ProviderOptions {
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            timeout: config.provider_timeout(),
            base_url: None,
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into().trim_end_matches('/').to_string());
        self
    }

    pub(crate) fn base_url_or(&self, default: &str) -> String {
        self.base_url.clone().unwrap_or_else(|| default.to_string())
    }
}

/// One of the seven built-in adapters, selected by [`ProviderKind`]
#[derive(Debug)]
pub enum Provider {
    Cloudflare(CloudflareProvider),
    Aliyun(AliyunProvider),
    Tencent(TencentProvider),
    Aws(Route53Provider),
    Huawei(HuaweiProvider),
    Baidu(BaiduProvider),
    Jdcloud(JdcloudProvider),
}

impl Provider {
    /// Build the adapter for `kind`
    pub fn new(kind: ProviderKind, options: &ProviderOptions) -> Result<Self> {
        Ok(match kind {
            ProviderKind::Cloudflare => Self::Cloudflare(CloudflareProvider::new(options)?),
            ProviderKind::Aliyun => Self::Aliyun(AliyunProvider::new(options)?),
            ProviderKind::Tencent => Self::Tencent(TencentProvider::new(options)?),
            ProviderKind::Aws => Self::Aws(Route53Provider::new(options)?),
            ProviderKind::Huawei => Self::Huawei(HuaweiProvider::new(options)?),
            ProviderKind::Baidu => Self::Baidu(BaiduProvider::new(options)?),
            ProviderKind::Jdcloud => Self::Jdcloud(JdcloudProvider::new(options)?),
        })
    }
}

macro_rules! dispatch {
    ($self:ident, $p:ident => $call:expr) => {
        match $self {
            Provider::Cloudflare($p) => $call,
            Provider::Aliyun($p) => $call,
            Provider::Tencent($p) => $call,
            Provider::Aws($p) => $call,
            Provider::Huawei($p) => $call,
            Provider::Baidu($p) => $call,
            Provider::Jdcloud($p) => $call,
        }
    };
}

#[async_trait]
impl DnsProvider for Provider {
    async fn resolve_record(
        &self,
        credential: &Credential,
        record: &RecordRef<'_>,
    ) -> Result<ExistingRecord> {
        dispatch!(self, p => p.resolve_record(credential, record).await)
    }

    async fn upsert_record(
        &self,
        credential: &Credential,
        record: &RecordRef<'_>,
        value: &str,
        ttl: Option<u32>,
    ) -> Result<String> {
        dispatch!(self, p => p.upsert_record(credential, record, value, ttl).await)
    }

    async fn verify_credentials(&self, credential: &Credential) -> Result<()> {
        dispatch!(self, p => p.verify_credentials(credential).await)
    }

    fn kind(&self) -> ProviderKind {
        dispatch!(self, p => p.kind())
    }
}

/// Register all seven built-in adapters
///
/// This function should be called during initialization, before the
/// scheduler is started.
pub fn register_all(registry: &ProviderRegistry, config: &EngineConfig) -> Result<()> {
    let options = ProviderOptions::from_config(config);
    for kind in ProviderKind::ALL {
        registry.register(Arc::new(Provider::new(kind, &options)?));
    }
    tracing::debug!(count = ProviderKind::ALL.len(), "Registered provider adapters");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_kind_builds_matching_adapter() {
        let options = ProviderOptions::default();
        for kind in ProviderKind::ALL {
            let provider = Provider::new(kind, &options).unwrap();
            assert_eq!(provider.kind(), kind);
        }
    }

    #[test]
    fn test_register_all_covers_every_kind() {
        let registry = ProviderRegistry::new();
        register_all(&registry, &EngineConfig::default()).unwrap();
        assert_eq!(registry.kinds(), ProviderKind::ALL.to_vec());
    }

    #[test]
    fn test_base_url_trailing_slash_is_trimmed() {
        let options = ProviderOptions::default().with_base_url("http://127.0.0.1:9000/");
        assert_eq!(options.base_url.as_deref(), Some("http://127.0.0.1:9000"));
    }
}
