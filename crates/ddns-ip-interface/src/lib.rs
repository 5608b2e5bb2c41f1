// # Interface IP Source
//
// Reads addresses assigned to local network interfaces and returns the
// first globally routable one of the requested family.
//
// Results are low-confidence: behind NAT no interface holds the public
// IPv4 address, so this source usually succeeds only for IPv6 or on hosts
// with a public address bound directly.

use async_trait::async_trait;
use ddns_core::model::{DetectionMethod, IpFamily};
use ddns_core::{Error, IpSource, Result};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

/// Lists `(interface name, address)` pairs
pub type InterfaceLister = fn() -> std::result::Result<Vec<(String, IpAddr)>, String>;

fn system_interfaces() -> std::result::Result<Vec<(String, IpAddr)>, String> {
    local_ip_address::list_afinet_netifas().map_err(|e| e.to_string())
}

/// Local interface IP source
#[derive(Debug, Clone)]
pub struct InterfaceIpSource {
    lister: InterfaceLister,
}

impl InterfaceIpSource {
    pub fn new() -> Self {
        Self {
            lister: system_interfaces,
        }
    }

    /// Source reading interfaces from `lister` instead of the OS
    pub fn with_lister(lister: InterfaceLister) -> Self {
        Self { lister }
    }
}

impl Default for InterfaceIpSource {
    fn default() -> Self {
        Self::new()
    }
}

/// Whether `ip` is publicly routable
///
/// Rejects loopback, private, link-local, CGNAT (100.64/10), unique-local
/// (fc00::/7), documentation, benchmarking, multicast and unspecified ranges.
pub fn is_global(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => is_global_v4(v4),
        IpAddr::V6(v6) => is_global_v6(v6),
    }
}

fn is_global_v4(ip: &Ipv4Addr) -> bool {
    let [a, b, _, _] = ip.octets();
    !(ip.is_unspecified()
        || ip.is_loopback()
        || ip.is_private()
        || ip.is_link_local()
        || ip.is_broadcast()
        || ip.is_documentation()
        || ip.is_multicast()
        || a == 0
        // Shared address space (CGNAT)
        || (a == 100 && (b & 0xc0) == 64)
        // Benchmarking
        || (a == 198 && (b & 0xfe) == 18)
        // Reserved
        || a >= 240)
}

fn is_global_v6(ip: &Ipv6Addr) -> bool {
    let segments = ip.segments();
    !(ip.is_unspecified()
        || ip.is_loopback()
        || ip.is_multicast()
        // Unique local fc00::/7
        || (segments[0] & 0xfe00) == 0xfc00
        // Link local fe80::/10
        || (segments[0] & 0xffc0) == 0xfe80
        // Documentation 2001:db8::/32
        || (segments[0] == 0x2001 && segments[1] == 0x0db8)
        // IPv4-mapped
        || ip.to_ipv4_mapped().is_some())
}

#[async_trait]
impl IpSource for InterfaceIpSource {
    async fn detect(&self, family: IpFamily) -> Result<IpAddr> {
        let interfaces = (self.lister)()
            .map_err(|e| Error::ip_source(format!("interface: listing failed: {}", e)))?;

        let found = interfaces
            .into_iter()
            .find(|(_, ip)| family.matches(ip) && is_global(ip));

        match found {
            Some((name, ip)) => {
                tracing::debug!(%family, %ip, interface = %name, "Interface IP detection succeeded");
                Ok(ip)
            }
            None => Err(Error::ip_source(format!(
                "interface: no globally routable {} address",
                family
            ))),
        }
    }

    fn method(&self) -> DetectionMethod {
        DetectionMethod::Interface
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    #[test]
    fn test_non_global_ranges_rejected() {
        for s in [
            "127.0.0.1",
            "10.1.2.3",
            "172.16.0.1",
            "192.168.1.10",
            "169.254.1.1",
            "100.64.0.1",
            "100.127.255.254",
            "192.0.2.1",
            "198.18.0.1",
            "0.0.0.0",
            "255.255.255.255",
            "::1",
            "::",
            "fd12:3456::1",
            "fe80::1",
            "2001:db8::1",
            "::ffff:8.8.8.8",
        ] {
            assert!(!is_global(&ip(s)), "{} must not be global", s);
        }
    }

    #[test]
    fn test_global_ranges_accepted() {
        for s in ["8.8.8.8", "100.128.0.1", "203.0.114.1", "2606:4700::1111", "2400:cb00::1"] {
            assert!(is_global(&ip(s)), "{} must be global", s);
        }
    }

    fn lan_only() -> std::result::Result<Vec<(String, IpAddr)>, String> {
        Ok(vec![
            ("lo".into(), "127.0.0.1".parse().unwrap()),
            ("eth0".into(), "192.168.1.10".parse().unwrap()),
            ("eth0".into(), "fe80::1".parse().unwrap()),
        ])
    }

    fn dual_stack() -> std::result::Result<Vec<(String, IpAddr)>, String> {
        Ok(vec![
            ("eth0".into(), "192.168.1.10".parse().unwrap()),
            ("eth0".into(), "fd00::5".parse().unwrap()),
            ("eth0".into(), "2606:4700::1111".parse().unwrap()),
            ("wan0".into(), "8.8.4.4".parse().unwrap()),
        ])
    }

    fn broken() -> std::result::Result<Vec<(String, IpAddr)>, String> {
        Err("permission denied".into())
    }

    #[tokio::test]
    async fn test_picks_first_global_of_family() {
        let source = InterfaceIpSource::with_lister(dual_stack);
        assert_eq!(source.detect(IpFamily::V4).await.unwrap(), ip("8.8.4.4"));
        assert_eq!(source.detect(IpFamily::V6).await.unwrap(), ip("2606:4700::1111"));
    }

    #[tokio::test]
    async fn test_lan_only_host_fails() {
        let source = InterfaceIpSource::with_lister(lan_only);
        assert!(source.detect(IpFamily::V4).await.is_err());
        assert!(source.detect(IpFamily::V6).await.is_err());
    }

    #[tokio::test]
    async fn test_listing_failure_is_source_error() {
        let source = InterfaceIpSource::with_lister(broken);
        let err = source.detect(IpFamily::V4).await.unwrap_err();
        assert_eq!(err.kind(), ddns_core::ErrorKind::DetectionExhausted);
    }
}
