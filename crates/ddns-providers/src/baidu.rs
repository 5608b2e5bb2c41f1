// # Baidu Cloud DNS Provider
//
// REST API at `dns.baidubce.com`, signed with bce-auth-v1. Records are
// addressed by zone name, so no zone-id lookup is needed.
//
// ```http
// GET  /v1/dns/zone/:zone/record?rr=home
// POST /v1/dns/zone/:zone/record?clientToken=:uuid
// PUT  /v1/dns/zone/:zone/record/:id?clientToken=:uuid
// GET  /v1/dns/zone?maxKeys=1                 (credential check)
// ```

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ddns_core::model::ProviderKind;
use ddns_core::traits::{DnsProvider, ExistingRecord, RecordRef};
use ddns_core::{Credential, Error, Result};
use serde_json::{Value, json};

use crate::ProviderOptions;
use crate::common::{self, Fault};

const BAIDU_API_BASE: &str = "https://dns.baidubce.com";
const SIGNATURE_EXPIRY_SECS: u32 = 1800;

const KIND: ProviderKind = ProviderKind::Baidu;

pub struct BaiduProvider {
    base_url: String,
    host: String,
    client: reqwest::Client,
}

impl std::fmt::Debug for BaiduProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BaiduProvider")
            .field("base_url", &self.base_url)
            .finish()
    }
}

struct Keys<'a> {
    id: &'a str,
    secret: &'a str,
}

impl<'a> Keys<'a> {
    fn from_credential(credential: &'a Credential) -> Result<Self> {
        match credential {
            Credential::Baidu {
                access_key_id,
                access_key_secret,
            } => Ok(Self {
                id: access_key_id,
                secret: access_key_secret,
            }),
            other => Err(other.mismatch(KIND)),
        }
    }
}

/// Percent-encode each path segment, keeping the separators
fn canonical_uri(path: &str) -> String {
    path.split('/')
        .map(common::encode)
        .collect::<Vec<_>>()
        .join("/")
}

/// Returns the `x-bce-date` value and the `Authorization` header
///
/// ```text
/// AuthPrefix = bce-auth-v1/{ak}/{timestamp}/{expiry}
/// SigningKey = hex(hmac_sha256(sk, AuthPrefix))
/// Signature  = hex(hmac_sha256(SigningKey, CanonicalRequest))
/// ```
fn sign(
    keys: &Keys<'_>,
    method: &str,
    path: &str,
    query: &str,
    host: &str,
    now: DateTime<Utc>,
) -> Result<(String, String)> {
    let timestamp = now.format("%Y-%m-%dT%H:%M:%SZ").to_string();
    let prefix = format!("bce-auth-v1/{}/{}/{}", keys.id, timestamp, SIGNATURE_EXPIRY_SECS);
    let signing_key = common::hmac_sha256_hex(keys.secret.as_bytes(), prefix.as_bytes())?;

    let signed_headers = "host;x-bce-date";
    let canonical_headers = format!(
        "host:{}\nx-bce-date:{}",
        common::encode(host),
        common::encode(&timestamp)
    );
    let canonical_request = format!(
        "{}\n{}\n{}\n{}",
        method,
        canonical_uri(path),
        query,
        canonical_headers
    );
    let signature = common::hmac_sha256_hex(signing_key.as_bytes(), canonical_request.as_bytes())?;

    Ok((timestamp, format!("{}/{}/{}", prefix, signed_headers, signature)))
}

fn error_code_fault(body: &Value) -> Option<(Fault, String)> {
    let code = body["code"].as_str()?;
    let message = body["message"].as_str().unwrap_or_default();
    let fault = match code {
        "AccessDenied" | "InvalidAccessKeyId" | "SignatureDoesNotMatch" | "RequestExpired" => Fault::Auth,
        "RequestRateLimitExceeded" | "TooManyRequests" => Fault::Throttled,
        "InternalError" | "ServiceUnavailable" => Fault::Unavailable,
        _ => return None,
    };
    Some((fault, format!("{}: {}", code, message)))
}

impl BaiduProvider {
    pub fn new(options: &ProviderOptions) -> Result<Self> {
        let base_url = options.base_url_or(BAIDU_API_BASE);
        Ok(Self {
            host: common::host_of(&base_url)?,
            base_url,
            client: common::http_client(options.timeout)?,
        })
    }

    async fn call(
        &self,
        keys: &Keys<'_>,
        method: reqwest::Method,
        path: &str,
        params: &[(&str, String)],
        body: Option<Value>,
    ) -> Result<Value> {
        let query = common::canonical_query(params);
        let (date, authorization) = sign(keys, method.as_str(), path, &query, &self.host, Utc::now())?;

        let url = if query.is_empty() {
            format!("{}{}", self.base_url, path)
        } else {
            format!("{}{}?{}", self.base_url, path, query)
        };
        let mut request = self
            .client
            .request(method, &url)
            .header("x-bce-date", date)
            .header("Authorization", authorization);
        if let Some(body) = body {
            request = request.json(&body);
        }

        let response = request
            .send()
            .await
            .map_err(|e| common::transport_error(KIND, e))?;
        common::read_json(KIND, response, error_code_fault).await
    }

    async fn find_record(&self, keys: &Keys<'_>, record: &RecordRef<'_>) -> Result<Option<ExistingRecord>> {
        let path = format!("/v1/dns/zone/{}/record", record.zone);
        let body = self
            .call(keys, reqwest::Method::GET, &path, &[("rr", record.host().to_string())], None)
            .await?;

        let found = body["records"]
            .as_array()
            .ok_or_else(|| common::malformed(KIND, "records is not an array"))?
            .iter()
            .find(|r| {
                r["rr"].as_str() == Some(record.host())
                    && r["type"].as_str() == Some(record.record_type.as_str())
            });
        let Some(found) = found else {
            return Ok(None);
        };

        // Ids are numeric in some API revisions and strings in others
        let record_id = match &found["id"] {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        };
        Ok(Some(ExistingRecord {
            value: found["value"].as_str().unwrap_or_default().to_string(),
            record_id,
            ttl: found["ttl"].as_u64().map(|t| t as u32),
        }))
    }
}

/// Create responses carry no id; this one is stable per zone, host and type
fn synthetic_id(record: &RecordRef<'_>) -> String {
    format!("{}/{}/{}", record.zone, record.host(), record.record_type)
}

#[async_trait]
impl DnsProvider for BaiduProvider {
    async fn resolve_record(&self, credential: &Credential, record: &RecordRef<'_>) -> Result<ExistingRecord> {
        let keys = Keys::from_credential(credential)?;
        self.find_record(&keys, record)
            .await?
            .ok_or_else(|| Error::not_found(format!("{} {} not found", record.record_type, record.fqdn())))
    }

    async fn upsert_record(
        &self,
        credential: &Credential,
        record: &RecordRef<'_>,
        value: &str,
        ttl: Option<u32>,
    ) -> Result<String> {
        let keys = Keys::from_credential(credential)?;
        let fqdn = record.fqdn();

        let mut payload = json!({
            "rr": record.host(),
            "type": record.record_type.as_str(),
            "value": value,
        });
        if let Some(ttl) = ttl {
            payload["ttl"] = json!(ttl);
        }
        let client_token = [("clientToken", uuid::Uuid::new_v4().to_string())];

        match self.find_record(&keys, record).await? {
            Some(existing) if common::same_value(&existing.value, value) => {
                tracing::info!(fqdn = %fqdn, value, "DNS record already has correct value");
                Ok(existing.record_id.unwrap_or_else(|| synthetic_id(record)))
            }
            Some(existing) => {
                let record_id = existing
                    .record_id
                    .ok_or_else(|| common::malformed(KIND, "record without id"))?;
                tracing::info!(fqdn = %fqdn, from = %existing.value, to = value, "Updating DNS record");
                let path = format!("/v1/dns/zone/{}/record/{}", record.zone, record_id);
                self.call(&keys, reqwest::Method::PUT, &path, &client_token, Some(payload))
                    .await?;
                Ok(record_id)
            }
            None => {
                tracing::info!(fqdn = %fqdn, value, "Creating DNS record");
                let path = format!("/v1/dns/zone/{}/record", record.zone);
                self.call(&keys, reqwest::Method::POST, &path, &client_token, Some(payload))
                    .await?;
                Ok(synthetic_id(record))
            }
        }
    }

    async fn verify_credentials(&self, credential: &Credential) -> Result<()> {
        let keys = Keys::from_credential(credential)?;
        self.call(
            &keys,
            reqwest::Method::GET,
            "/v1/dns/zone",
            &[("maxKeys", "1".to_string())],
            None,
        )
        .await?;
        Ok(())
    }

    fn kind(&self) -> ProviderKind {
        KIND
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_authorization_layout() {
        let keys = Keys {
            id: "bceak",
            secret: "secret",
        };
        let now = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        let (date, auth) = sign(&keys, "GET", "/v1/dns/zone", "maxKeys=1", "dns.baidubce.com", now).unwrap();
        assert_eq!(date, "2024-03-01T12:00:00Z");
        assert!(auth.starts_with("bce-auth-v1/bceak/2024-03-01T12:00:00Z/1800/host;x-bce-date/"));
        assert_eq!(auth.rsplit('/').next().unwrap().len(), 64);
    }

    #[test]
    fn test_canonical_uri_keeps_separators() {
        assert_eq!(canonical_uri("/v1/dns/zone/example.com/record"), "/v1/dns/zone/example.com/record");
        assert_eq!(canonical_uri("/v1/a b"), "/v1/a%20b");
    }

    #[test]
    fn test_error_codes() {
        let body = json!({"code": "AccessDenied", "message": "x", "requestId": "r"});
        assert_eq!(error_code_fault(&body).map(|(f, _)| f), Some(Fault::Auth));
        let body = json!({"code": "DuplicateRecord", "message": "x"});
        assert!(error_code_fault(&body).is_none());
    }
}
