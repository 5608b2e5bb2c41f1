// # DNS IP Source
//
// Detects the public address through a resolver that echoes the querying
// address back: `myip.opendns.com` asked of `resolver1.opendns.com`.
//
// IPv4 is asked over IPv4 (208.67.222.222) with an A query, IPv6 over IPv6
// (2620:119:35::35) with an AAAA query; the answer is the address the
// resolver saw the query arrive from.

use async_trait::async_trait;
use ddns_core::model::{DetectionMethod, IpFamily};
use ddns_core::{Error, IpSource, Result};
use hickory_resolver::TokioResolver;
use hickory_resolver::config::{NameServerConfigGroup, ResolverConfig, ResolverOpts};
use hickory_resolver::name_server::TokioConnectionProvider;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::time::Duration;

/// Name the echo resolver answers with the client address
pub const ECHO_NAME: &str = "myip.opendns.com.";

/// resolver1.opendns.com
pub const OPENDNS_V4: IpAddr = IpAddr::V4(Ipv4Addr::new(208, 67, 222, 222));
pub const OPENDNS_V6: IpAddr = IpAddr::V6(Ipv6Addr::new(0x2620, 0x119, 0x35, 0, 0, 0, 0, 0x35));

const DEFAULT_QUERY_TIMEOUT: Duration = Duration::from_secs(5);

/// DNS echo IP source
pub struct DnsIpSource {
    name: String,
    v4: TokioResolver,
    v6: TokioResolver,
}

impl std::fmt::Debug for DnsIpSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DnsIpSource")
            .field("name", &self.name)
            .finish()
    }
}

fn resolver(server: IpAddr, timeout: Duration) -> TokioResolver {
    let config = ResolverConfig::from_parts(
        None,
        vec![],
        NameServerConfigGroup::from_ips_clear(&[server], 53, true),
    );
    let mut opts = ResolverOpts::default();
    opts.timeout = timeout;
    opts.attempts = 1;

    TokioResolver::builder_with_config(config, TokioConnectionProvider::default())
        .with_options(opts)
        .build()
}

impl DnsIpSource {
    /// Source asking OpenDNS
    pub fn new() -> Self {
        Self::with_servers(ECHO_NAME, OPENDNS_V4, OPENDNS_V6, DEFAULT_QUERY_TIMEOUT)
    }

    /// Source asking a specific echo name and resolver pair
    pub fn with_servers(name: &str, v4_server: IpAddr, v6_server: IpAddr, timeout: Duration) -> Self {
        Self {
            name: name.to_string(),
            v4: resolver(v4_server, timeout),
            v6: resolver(v6_server, timeout),
        }
    }
}

impl Default for DnsIpSource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl IpSource for DnsIpSource {
    async fn detect(&self, family: IpFamily) -> Result<IpAddr> {
        let ip = match family {
            IpFamily::V4 => {
                let lookup = self
                    .v4
                    .ipv4_lookup(self.name.as_str())
                    .await
                    .map_err(|e| Error::ip_source(format!("dns: A lookup failed: {}", e)))?;
                lookup.iter().next().map(|a| IpAddr::V4(a.0))
            }
            IpFamily::V6 => {
                let lookup = self
                    .v6
                    .ipv6_lookup(self.name.as_str())
                    .await
                    .map_err(|e| Error::ip_source(format!("dns: AAAA lookup failed: {}", e)))?;
                lookup.iter().next().map(|aaaa| IpAddr::V6(aaaa.0))
            }
        };

        let ip = ip.ok_or_else(|| Error::ip_source(format!("dns: empty answer for {}", self.name)))?;
        tracing::debug!(%family, %ip, "DNS IP detection succeeded");
        Ok(ip)
    }

    fn method(&self) -> DetectionMethod {
        DetectionMethod::Dns
    }
}
