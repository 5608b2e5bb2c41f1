// Shared plumbing for the provider adapters: HTTP client construction,
// request-signing primitives and the mapping of provider failures onto the
// engine's error taxonomy.

use ddns_core::model::ProviderKind;
use ddns_core::{Error, Result};
use hmac::{Hmac, Mac};
use reqwest::StatusCode;
use sha2::{Digest, Sha256};
use std::net::IpAddr;
use std::time::Duration;

type HmacSha256 = Hmac<Sha256>;

/// User agent sent with every provider request
pub(crate) const USER_AGENT: &str = "DDNS-Tool/1.0";

/// Build the HTTP client an adapter keeps for its lifetime
pub(crate) fn http_client(timeout: Duration) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .user_agent(USER_AGENT)
        .build()
        .map_err(|e| Error::config(format!("Failed to build HTTP client: {}", e)))
}

pub(crate) fn hmac_sha256(key: &[u8], data: &[u8]) -> Result<Vec<u8>> {
    let mut mac = HmacSha256::new_from_slice(key)
        .map_err(|e| Error::Other(format!("HMAC key rejected: {}", e)))?;
    mac.update(data);
    Ok(mac.finalize().into_bytes().to_vec())
}

pub(crate) fn hmac_sha256_hex(key: &[u8], data: &[u8]) -> Result<String> {
    hmac_sha256(key, data).map(hex::encode)
}

pub(crate) fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// RFC 3986 percent-encoding (unreserved characters pass through)
pub(crate) fn encode(s: &str) -> String {
    urlencoding::encode(s).into_owned()
}

/// Sorted `k=v&k=v` query string with both halves RFC 3986 encoded
pub(crate) fn canonical_query(params: &[(&str, String)]) -> String {
    let mut pairs: Vec<(String, String)> = params
        .iter()
        .map(|(k, v)| (encode(k), encode(v)))
        .collect();
    pairs.sort();
    pairs
        .into_iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join("&")
}

/// `host[:port]` of a base URL, as it appears in the `Host` header
pub(crate) fn host_of(base_url: &str) -> Result<String> {
    let url = reqwest::Url::parse(base_url)
        .map_err(|e| Error::config(format!("Invalid provider base URL '{}': {}", base_url, e)))?;
    let host = url
        .host_str()
        .ok_or_else(|| Error::config(format!("Provider base URL '{}' has no host", base_url)))?;
    Ok(match url.port() {
        Some(port) => format!("{}:{}", host, port),
        None => host.to_string(),
    })
}

/// Whether a provider-held value already equals the desired one
///
/// Addresses compare by value (so `2001:db8::1` equals `2001:0db8::1`),
/// hostnames case-insensitively and without a trailing dot.
pub(crate) fn same_value(existing: &str, desired: &str) -> bool {
    let existing = existing.trim();
    let desired = desired.trim();
    match (existing.parse::<IpAddr>(), desired.parse::<IpAddr>()) {
        (Ok(a), Ok(b)) => a == b,
        _ => existing
            .trim_end_matches('.')
            .eq_ignore_ascii_case(desired.trim_end_matches('.')),
    }
}

/// Failure classes every adapter funnels into
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Fault {
    Auth,
    Throttled,
    Unavailable,
    NotFound,
    Rejected,
}

impl Fault {
    pub(crate) fn from_status(status: StatusCode) -> Self {
        match status.as_u16() {
            401 | 403 => Self::Auth,
            404 => Self::NotFound,
            429 => Self::Throttled,
            408 | 500..=599 => Self::Unavailable,
            _ => Self::Rejected,
        }
    }

    pub(crate) fn into_error(self, provider: ProviderKind, detail: impl std::fmt::Display) -> Error {
        match self {
            Self::Auth => Error::auth(format!("{}: {}", provider, detail)),
            Self::Throttled => Error::rate_limited(format!("{}: {}", provider, detail)),
            Self::Unavailable => Error::unavailable(format!("{}: {}", provider, detail)),
            Self::NotFound => Error::not_found(format!("{}: {}", provider, detail)),
            Self::Rejected => Error::provider(provider.as_str(), detail.to_string()),
        }
    }
}

/// Transport-level failure (connect, timeout, broken body)
pub(crate) fn transport_error(provider: ProviderKind, err: reqwest::Error) -> Error {
    if err.is_timeout() {
        Error::unavailable(format!("{}: request timed out", provider))
    } else {
        Error::unavailable(format!("{}: HTTP request failed: {}", provider, err))
    }
}

/// Malformed or unexpected payload from the provider
pub(crate) fn malformed(provider: ProviderKind, what: impl std::fmt::Display) -> Error {
    Error::provider(provider.as_str(), format!("Invalid response format: {}", what))
}

/// Read a response as JSON, classifying non-2xx statuses
///
/// `code_fault` inspects the error body first; throttling and auth codes
/// some providers return under a plain 400 are only visible there.
pub(crate) async fn read_json(
    provider: ProviderKind,
    response: reqwest::Response,
    code_fault: impl Fn(&serde_json::Value) -> Option<(Fault, String)>,
) -> Result<serde_json::Value> {
    let status = response.status();
    let text = response
        .text()
        .await
        .map_err(|e| transport_error(provider, e))?;

    if status.is_success() {
        if text.trim().is_empty() {
            return Ok(serde_json::Value::Null);
        }
        return serde_json::from_str(&text)
            .map_err(|e| malformed(provider, format!("{} (status {})", e, status)));
    }

    let body: serde_json::Value = serde_json::from_str(&text).unwrap_or(serde_json::Value::Null);
    if let Some((fault, detail)) = code_fault(&body) {
        return Err(fault.into_error(provider, format!("{} (status {})", detail, status)));
    }
    Err(Fault::from_status(status).into_error(provider, format!("status {}: {}", status, truncate(&text))))
}

fn truncate(text: &str) -> &str {
    const LIMIT: usize = 256;
    if text.len() <= LIMIT {
        return text;
    }
    let mut end = LIMIT;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}
