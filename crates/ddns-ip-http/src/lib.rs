// # HTTP IP Source
//
// Asks external "what is my IP" services for the public address.
//
// ## Behaviour
//
// Endpoints are tried in order until one answers with a plain-text address
// of the requested family. One `detect` call walks the list once; caching,
// timeouts around the whole strategy and fallback to other strategies are
// owned by the IP detector in `ddns-core`.
//
// ## Usage
//
// ```rust,ignore
// use ddns_core::model::IpFamily;
// use ddns_core::IpSource;
// use ddns_ip_http::HttpIpSource;
//
// let source = HttpIpSource::new()?;
// let v4 = source.detect(IpFamily::V4).await?;
// ```

use async_trait::async_trait;
use ddns_core::model::{DetectionMethod, IpFamily};
use ddns_core::{Error, IpSource, Result};
use std::net::IpAddr;
use std::time::Duration;

/// IPv4 echo services, in order of preference
pub const DEFAULT_V4_SERVICES: &[&str] = &[
    "https://api.ipify.org",
    "https://checkip.amazonaws.com",
    "https://icanhazip.com",
    "https://ifconfig.me/ip",
];

/// IPv6 echo services, in order of preference
pub const DEFAULT_V6_SERVICES: &[&str] = &["https://api64.ipify.org", "https://ifconfig.me/ip"];

const USER_AGENT: &str = "DDNS-Tool/1.0";

/// Per-endpoint request timeout
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// HTTP echo-service IP source
#[derive(Debug, Clone)]
pub struct HttpIpSource {
    v4: Vec<String>,
    v6: Vec<String>,
    client: reqwest::Client,
}

impl HttpIpSource {
    /// Source using the built-in service lists
    pub fn new() -> Result<Self> {
        Self::with_endpoints(
            DEFAULT_V4_SERVICES.iter().map(|s| s.to_string()).collect(),
            DEFAULT_V6_SERVICES.iter().map(|s| s.to_string()).collect(),
        )
    }

    /// Source using explicit service lists
    ///
    /// An empty list disables that family for this source.
    pub fn with_endpoints(v4: Vec<String>, v6: Vec<String>) -> Result<Self> {
        Self::with_timeout(v4, v6, DEFAULT_REQUEST_TIMEOUT)
    }

    pub fn with_timeout(v4: Vec<String>, v6: Vec<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| Error::config(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self { v4, v6, client })
    }

    fn endpoints(&self, family: IpFamily) -> &[String] {
        match family {
            IpFamily::V4 => &self.v4,
            IpFamily::V6 => &self.v6,
        }
    }

    /// Fetch and parse one endpoint
    async fn fetch(&self, url: &str, family: IpFamily) -> Result<IpAddr> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| Error::ip_source(format!("{}: request failed: {}", url, e)))?;

        if !response.status().is_success() {
            return Err(Error::ip_source(format!(
                "{}: HTTP error: {}",
                url,
                response.status()
            )));
        }

        let ip_text = response
            .text()
            .await
            .map_err(|e| Error::ip_source(format!("{}: failed to read response: {}", url, e)))?;
        let ip_text = ip_text.trim();

        let ip: IpAddr = ip_text
            .parse()
            .map_err(|_| Error::ip_source(format!("{}: invalid IP address: {:?}", url, ip_text)))?;

        if !family.matches(&ip) {
            return Err(Error::ip_source(format!(
                "{}: expected {}, got {}",
                url, family, ip
            )));
        }
        Ok(ip)
    }
}

#[async_trait]
impl IpSource for HttpIpSource {
    async fn detect(&self, family: IpFamily) -> Result<IpAddr> {
        let mut failures = Vec::new();

        for url in self.endpoints(family) {
            match self.fetch(url, family).await {
                Ok(ip) => {
                    tracing::debug!(%family, %ip, url = %url, "HTTP IP detection succeeded");
                    return Ok(ip);
                }
                Err(e) => {
                    tracing::debug!(%family, url = %url, error = %e, "HTTP IP endpoint failed");
                    failures.push(e.to_string());
                }
            }
        }

        if failures.is_empty() {
            return Err(Error::ip_source(format!("no HTTP endpoints configured for {}", family)));
        }
        Err(Error::ip_source(failures.join("; ")))
    }

    fn method(&self) -> DetectionMethod {
        DetectionMethod::Api
    }

    fn supports(&self, family: IpFamily) -> bool {
        !self.endpoints(family).is_empty()
    }
}
