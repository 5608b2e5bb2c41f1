// # Aliyun (Alibaba Cloud) DNS Provider
//
// RPC-style API at `alidns.cn-hangzhou.aliyuncs.com`, version 2015-01-09,
// signed with ACS3-HMAC-SHA256. Parameters travel in the query string.
//
// Actions used: `DescribeSubDomainRecords`, `AddDomainRecord`,
// `UpdateDomainRecord`, `DescribeDomains` (credential check).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ddns_core::model::ProviderKind;
use ddns_core::traits::{DnsProvider, ExistingRecord, RecordRef};
use ddns_core::{Credential, Error, Result};
use serde_json::Value;

use crate::ProviderOptions;
use crate::common::{self, Fault};

const ALIYUN_API_BASE: &str = "https://alidns.cn-hangzhou.aliyuncs.com";
const API_VERSION: &str = "2015-01-09";
const ALGORITHM: &str = "ACS3-HMAC-SHA256";

const KIND: ProviderKind = ProviderKind::Aliyun;

pub struct AliyunProvider {
    base_url: String,
    host: String,
    client: reqwest::Client,
}

impl std::fmt::Debug for AliyunProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AliyunProvider")
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
            Credential::Aliyun {
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

/// Headers of one signed request
#[derive(Debug)]
struct Signed {
    headers: Vec<(&'static str, String)>,
    authorization: String,
}

/// Sign an RPC call
///
/// ```text
/// CanonicalRequest = GET \n / \n CanonicalQuery \n CanonicalHeaders \n SignedHeaders \n hex(sha256(body))
/// StringToSign     = ACS3-HMAC-SHA256 \n hex(sha256(CanonicalRequest))
/// Signature        = hex(hmac_sha256(secret, StringToSign))
/// ```
fn sign(
    keys: &Keys<'_>,
    host: &str,
    action: &str,
    query: &str,
    now: DateTime<Utc>,
    nonce: &str,
) -> Result<Signed> {
    let payload_hash = common::sha256_hex(b"");
    // Sorted by lowercase name
    let headers: Vec<(&'static str, String)> = vec![
        ("host", host.to_string()),
        ("x-acs-action", action.to_string()),
        ("x-acs-content-sha256", payload_hash.clone()),
        ("x-acs-date", now.format("%Y-%m-%dT%H:%M:%SZ").to_string()),
        ("x-acs-signature-nonce", nonce.to_string()),
        ("x-acs-version", API_VERSION.to_string()),
    ];

    let canonical_headers: String = headers
        .iter()
        .map(|(name, value)| format!("{}:{}\n", name, value.trim()))
        .collect();
    let signed_headers = headers
        .iter()
        .map(|(name, _)| *name)
        .collect::<Vec<_>>()
        .join(";");

    let canonical_request = format!(
        "GET\n/\n{}\n{}\n{}\n{}",
        query, canonical_headers, signed_headers, payload_hash
    );
    let string_to_sign = format!(
        "{}\n{}",
        ALGORITHM,
        common::sha256_hex(canonical_request.as_bytes())
    );
    let signature = common::hmac_sha256_hex(keys.secret.as_bytes(), string_to_sign.as_bytes())?;

    Ok(Signed {
        authorization: format!(
            "{} Credential={},SignedHeaders={},Signature={}",
            ALGORITHM, keys.id, signed_headers, signature
        ),
        headers,
    })
}

impl AliyunProvider {
    pub fn new(options: &ProviderOptions) -> Result<Self> {
        let base_url = options.base_url_or(ALIYUN_API_BASE);
        Ok(Self {
            host: common::host_of(&base_url)?,
            base_url,
            client: common::http_client(options.timeout)?,
        })
    }

    async fn call(&self, keys: &Keys<'_>, action: &str, params: &[(&str, String)]) -> Result<Value> {
        let query = common::canonical_query(params);
        let nonce = uuid::Uuid::new_v4().to_string();
        let signed = sign(keys, &self.host, action, &query, Utc::now(), &nonce)?;

        let url = if query.is_empty() {
            format!("{}/", self.base_url)
        } else {
            format!("{}/?{}", self.base_url, query)
        };
        let mut request = self.client.get(&url);
        for (name, value) in &signed.headers {
            if *name != "host" {
                request = request.header(*name, value);
            }
        }

        let response = request
            .header("Authorization", signed.authorization)
            .send()
            .await
            .map_err(|e| common::transport_error(KIND, e))?;
        common::read_json(KIND, response, error_code_fault).await
    }

    async fn find_record(&self, keys: &Keys<'_>, record: &RecordRef<'_>) -> Result<Option<ExistingRecord>> {
        let params = [
            ("SubDomain", record.fqdn()),
            ("Type", record.record_type.to_string()),
            ("PageSize", "100".to_string()),
        ];
        let body = self.call(keys, "DescribeSubDomainRecords", &params).await?;

        let records = body["DomainRecords"]["Record"]
            .as_array()
            .ok_or_else(|| common::malformed(KIND, "DomainRecords.Record is not an array"))?;

        let found = records.iter().find(|r| {
            r["Type"].as_str() == Some(record.record_type.as_str())
                && r["RR"].as_str() == Some(record.host())
        });
        let Some(found) = found else {
            return Ok(None);
        };

        Ok(Some(ExistingRecord {
            value: found["Value"].as_str().unwrap_or_default().to_string(),
            record_id: found["RecordId"].as_str().map(str::to_string),
            ttl: found["TTL"].as_u64().map(|t| t as u32),
        }))
    }
}

fn error_code_fault(body: &Value) -> Option<(Fault, String)> {
    let code = body["Code"].as_str()?;
    let message = body["Message"].as_str().unwrap_or_default();
    let fault = if code.starts_with("InvalidAccessKeyId")
        || code.starts_with("SignatureDoesNotMatch")
        || code.starts_with("IncompleteSignature")
        || code.starts_with("Forbidden")
    {
        Fault::Auth
    } else if code.starts_with("Throttling") {
        Fault::Throttled
    } else if code.starts_with("ServiceUnavailable") || code.starts_with("InternalError") {
        Fault::Unavailable
    } else {
        return None;
    };
    Some((fault, format!("{}: {}", code, message)))
}

#[async_trait]
impl DnsProvider for AliyunProvider {
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

        let mut params = vec![
            ("RR", record.host().to_string()),
            ("Type", record.record_type.to_string()),
            ("Value", value.to_string()),
        ];
        if let Some(ttl) = ttl {
            params.push(("TTL", ttl.to_string()));
        }

        let (action, body) = match self.find_record(&keys, record).await? {
            Some(existing) if common::same_value(&existing.value, value) => {
                tracing::info!(fqdn = %fqdn, value, "DNS record already has correct value");
                return existing
                    .record_id
                    .ok_or_else(|| common::malformed(KIND, "record without RecordId"));
            }
            Some(existing) => {
                let record_id = existing
                    .record_id
                    .ok_or_else(|| common::malformed(KIND, "record without RecordId"))?;
                tracing::info!(fqdn = %fqdn, from = %existing.value, to = value, "Updating DNS record");
                params.push(("RecordId", record_id));
                ("UpdateDomainRecord", self.call(&keys, "UpdateDomainRecord", &params).await?)
            }
            None => {
                tracing::info!(fqdn = %fqdn, value, "Creating DNS record");
                params.push(("DomainName", record.zone.to_string()));
                ("AddDomainRecord", self.call(&keys, "AddDomainRecord", &params).await?)
            }
        };

        body["RecordId"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| common::malformed(KIND, format!("{} response has no RecordId", action)))
    }

    async fn verify_credentials(&self, credential: &Credential) -> Result<()> {
        let keys = Keys::from_credential(credential)?;
        self.call(&keys, "DescribeDomains", &[("PageSize", "1".to_string())])
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

    fn keys() -> Keys<'static> {
        Keys {
            id: "LTAIexample",
            secret: "secret",
        }
    }

    #[test]
    fn test_signature_is_deterministic() {
        let now = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        let a = sign(&keys(), "alidns.cn-hangzhou.aliyuncs.com", "DescribeDomains", "PageSize=1", now, "n1").unwrap();
        let b = sign(&keys(), "alidns.cn-hangzhou.aliyuncs.com", "DescribeDomains", "PageSize=1", now, "n1").unwrap();
        assert_eq!(a.authorization, b.authorization);

        let c = sign(&keys(), "alidns.cn-hangzhou.aliyuncs.com", "DescribeDomains", "PageSize=2", now, "n1").unwrap();
        assert_ne!(a.authorization, c.authorization);
    }

    #[test]
    fn test_authorization_layout() {
        let now = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        let signed = sign(&keys(), "alidns.cn-hangzhou.aliyuncs.com", "DescribeDomains", "", now, "n1").unwrap();
        assert!(signed.authorization.starts_with(
            "ACS3-HMAC-SHA256 Credential=LTAIexample,SignedHeaders=host;x-acs-action;x-acs-content-sha256;x-acs-date;x-acs-signature-nonce;x-acs-version,Signature="
        ));
        assert!(!signed.authorization.contains("secret"));
        assert!(signed.headers.contains(&("x-acs-date", "2024-03-01T12:00:00Z".to_string())));
    }

    #[test]
    fn test_error_codes() {
        let body = serde_json::json!({"Code": "InvalidAccessKeyId.NotFound", "Message": "x"});
        assert_eq!(error_code_fault(&body).map(|(f, _)| f), Some(Fault::Auth));
        let body = serde_json::json!({"Code": "Throttling.User", "Message": "x"});
        assert_eq!(error_code_fault(&body).map(|(f, _)| f), Some(Fault::Throttled));
        let body = serde_json::json!({"Code": "DomainRecordDuplicate", "Message": "x"});
        assert!(error_code_fault(&body).is_none(), "unknown codes fall back to the HTTP status");
    }
}
