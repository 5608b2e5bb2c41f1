use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

/// IP address family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IpFamily {
    V4,
    V6,
}

impl IpFamily {
    /// Whether `ip` belongs to this family
    pub fn matches(self, ip: &IpAddr) -> bool {
        matches!(
            (self, ip),
            (IpFamily::V4, IpAddr::V4(_)) | (IpFamily::V6, IpAddr::V6(_))
        )
    }

    pub fn of(ip: &IpAddr) -> Self {
        match ip {
            IpAddr::V4(_) => Self::V4,
            IpAddr::V6(_) => Self::V6,
        }
    }
}

impl std::fmt::Display for IpFamily {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::V4 => "ipv4",
            Self::V6 => "ipv6",
        })
    }
}

/// What `detect` should resolve
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IpRequest {
    #[serde(alias = "v4")]
    Ipv4,
    #[serde(alias = "v6")]
    Ipv6,
    #[serde(alias = "both")]
    All,
}

impl From<IpFamily> for IpRequest {
    fn from(f: IpFamily) -> Self {
        match f {
            IpFamily::V4 => Self::Ipv4,
            IpFamily::V6 => Self::Ipv6,
        }
    }
}

impl std::str::FromStr for IpRequest {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "ipv4" | "v4" => Ok(Self::Ipv4),
            "ipv6" | "v6" => Ok(Self::Ipv6),
            "all" | "both" => Ok(Self::All),
            other => Err(crate::Error::invalid_input(format!(
                "Unknown detection request '{}', expected ipv4, ipv6 or all",
                other
            ))),
        }
    }
}

/// How an address was obtained
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DetectionMethod {
    /// External "what is my IP" HTTP endpoint
    Api,
    /// DNS resolver that echoes the querying address
    Dns,
    /// Local network interface enumeration
    Interface,
    /// Families came from different methods
    Combined,
}

impl std::fmt::Display for DetectionMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Api => "api",
            Self::Dns => "dns",
            Self::Interface => "interface",
            Self::Combined => "combined",
        })
    }
}

/// Immutable detection result
///
/// A snapshot is never mutated; a newer detection produces a new snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IpSnapshot {
    pub ipv4: Option<Ipv4Addr>,
    pub ipv6: Option<Ipv6Addr>,
    pub detection_method: DetectionMethod,
    pub timestamp: DateTime<Utc>,
    /// Set when at least one family came from interface enumeration
    #[serde(default)]
    pub low_confidence: bool,
}

impl IpSnapshot {
    /// Snapshot holding a single detected address
    pub fn single(ip: IpAddr, method: DetectionMethod) -> Self {
        let (ipv4, ipv6) = match ip {
            IpAddr::V4(v4) => (Some(v4), None),
            IpAddr::V6(v6) => (None, Some(v6)),
        };
        Self {
            ipv4,
            ipv6,
            detection_method: method,
            timestamp: Utc::now(),
            low_confidence: method == DetectionMethod::Interface,
        }
    }

    /// Compose per-family snapshots into one
    ///
    /// Returns `None` when neither side is present.
    pub fn compose(v4: Option<&IpSnapshot>, v6: Option<&IpSnapshot>) -> Option<Self> {
        match (v4, v6) {
            (None, None) => None,
            (Some(a), None) => Some(a.clone()),
            (None, Some(b)) => Some(b.clone()),
            (Some(a), Some(b)) => Some(Self {
                ipv4: a.ipv4,
                ipv6: b.ipv6,
                detection_method: if a.detection_method == b.detection_method {
                    a.detection_method
                } else {
                    DetectionMethod::Combined
                },
                timestamp: a.timestamp.max(b.timestamp),
                low_confidence: a.low_confidence || b.low_confidence,
            }),
        }
    }

    /// Address for `family`, if present
    pub fn address(&self, family: IpFamily) -> Option<IpAddr> {
        match family {
            IpFamily::V4 => self.ipv4.map(IpAddr::V4),
            IpFamily::V6 => self.ipv6.map(IpAddr::V6),
        }
    }

    pub fn is_low_confidence(&self) -> bool {
        self.low_confidence
    }
}

/// Whether an address is publicly routable
///
/// Rejects loopback, private, link-local, CGNAT, unique-local,
/// documentation and unspecified ranges.
pub fn is_global(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            let o = v4.octets();
            !(v4.is_private()
                || v4.is_loopback()
                || v4.is_link_local()
                || v4.is_unspecified()
                || v4.is_broadcast()
                || v4.is_documentation()
                || v4.is_multicast()
                || (o[0] == 100 && (o[1] & 0xc0) == 64)
                || o[0] == 0
                || o[0] >= 240)
        }
        IpAddr::V6(v6) => {
            let s = v6.segments();
            // 2000::/3 global unicast, minus 2001:db8::/32 documentation
            (s[0] & 0xe000) == 0x2000 && !(s[0] == 0x2001 && s[1] == 0x0db8)
        }
    }
}
