// # Tencent Cloud (DNSPod) DNS Provider
//
// JSON-over-POST API at `dnspod.tencentcloudapi.com`, version 2021-03-23,
// signed with TC3-HMAC-SHA256. Errors arrive with HTTP 200 inside
// `Response.Error`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ddns_core::model::ProviderKind;
use ddns_core::traits::{DnsProvider, ExistingRecord, RecordRef};
use ddns_core::{Credential, Error, Result};
use serde_json::{Value, json};

use crate::ProviderOptions;
use crate::common::{self, Fault};

const TENCENT_API_BASE: &str = "https://dnspod.tencentcloudapi.com";
const API_VERSION: &str = "2021-03-23";
const SERVICE: &str = "dnspod";
const ALGORITHM: &str = "TC3-HMAC-SHA256";
const CONTENT_TYPE: &str = "application/json; charset=utf-8";

/// Default resolution line
const DEFAULT_LINE: &str = "默认";

const KIND: ProviderKind = ProviderKind::Tencent;

pub struct TencentProvider {
    base_url: String,
    host: String,
    client: reqwest::Client,
}

impl std::fmt::Debug for TencentProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TencentProvider")
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
            Credential::Tencent {
                secret_id,
                secret_key,
            } => Ok(Self {
                id: secret_id,
                secret: secret_key,
            }),
            other => Err(other.mismatch(KIND)),
        }
    }
}

/// Build the TC3 `Authorization` header for one request body
fn authorization(keys: &Keys<'_>, host: &str, payload: &str, now: DateTime<Utc>) -> Result<String> {
    let date = now.format("%Y-%m-%d").to_string();
    let scope = format!("{}/{}/tc3_request", date, SERVICE);
    let signed_headers = "content-type;host";

    let canonical_request = format!(
        "POST\n/\n\ncontent-type:{}\nhost:{}\n\n{}\n{}",
        CONTENT_TYPE,
        host,
        signed_headers,
        common::sha256_hex(payload.as_bytes())
    );
    let string_to_sign = format!(
        "{}\n{}\n{}\n{}",
        ALGORITHM,
        now.timestamp(),
        scope,
        common::sha256_hex(canonical_request.as_bytes())
    );

    let secret_date = common::hmac_sha256(format!("TC3{}", keys.secret).as_bytes(), date.as_bytes())?;
    let secret_service = common::hmac_sha256(&secret_date, SERVICE.as_bytes())?;
    let secret_signing = common::hmac_sha256(&secret_service, b"tc3_request")?;
    let signature = common::hmac_sha256_hex(&secret_signing, string_to_sign.as_bytes())?;

    Ok(format!(
        "{} Credential={}/{}, SignedHeaders={}, Signature={}",
        ALGORITHM, keys.id, scope, signed_headers, signature
    ))
}

impl TencentProvider {
    pub fn new(options: &ProviderOptions) -> Result<Self> {
        let base_url = options.base_url_or(TENCENT_API_BASE);
        Ok(Self {
            host: common::host_of(&base_url)?,
            base_url,
            client: common::http_client(options.timeout)?,
        })
    }

    /// Call one action and return the `Response` object
    async fn call(&self, keys: &Keys<'_>, action: &str, body: Value) -> Result<Value> {
        let payload = body.to_string();
        let now = Utc::now();
        let auth = authorization(keys, &self.host, &payload, now)?;

        let response = self
            .client
            .post(format!("{}/", self.base_url))
            .header("Content-Type", CONTENT_TYPE)
            .header("X-TC-Action", action)
            .header("X-TC-Version", API_VERSION)
            .header("X-TC-Timestamp", now.timestamp().to_string())
            .header("Authorization", auth)
            .body(payload)
            .send()
            .await
            .map_err(|e| common::transport_error(KIND, e))?;

        let envelope = common::read_json(KIND, response, |_| None).await?;
        let inner = envelope["Response"].clone();
        if let Some((fault, detail)) = error_code_fault(&inner) {
            return Err(fault.into_error(KIND, detail));
        }
        Ok(inner)
    }

    async fn find_record(&self, keys: &Keys<'_>, record: &RecordRef<'_>) -> Result<Option<ExistingRecord>> {
        let body = json!({
            "Domain": record.zone,
            "Subdomain": record.host(),
            "RecordType": record.record_type.as_str(),
        });

        let response = match self.call(keys, "DescribeRecordList", body).await {
            Ok(response) => response,
            // An empty list is reported as an error
            Err(Error::NotFound(_)) => return Ok(None),
            Err(e) => return Err(e),
        };

        let records = response["RecordList"]
            .as_array()
            .ok_or_else(|| common::malformed(KIND, "RecordList is not an array"))?;
        let found = records.iter().find(|r| {
            r["Name"].as_str() == Some(record.host())
                && r["Type"].as_str() == Some(record.record_type.as_str())
        });
        let Some(found) = found else {
            return Ok(None);
        };

        Ok(Some(ExistingRecord {
            value: found["Value"].as_str().unwrap_or_default().to_string(),
            record_id: found["RecordId"].as_u64().map(|id| id.to_string()),
            ttl: found["TTL"].as_u64().map(|t| t as u32),
        }))
    }
}

fn error_code_fault(response: &Value) -> Option<(Fault, String)> {
    let error = response.get("Error")?;
    let code = error["Code"].as_str().unwrap_or("Unknown");
    let message = error["Message"].as_str().unwrap_or_default();
    let fault = if code.starts_with("AuthFailure") || code.starts_with("UnauthorizedOperation") {
        Fault::Auth
    } else if code.starts_with("RequestLimitExceeded") {
        Fault::Throttled
    } else if code.starts_with("InternalError") || code == "ServiceUnavailable" {
        Fault::Unavailable
    } else if code == "ResourceNotFound.NoDataOfRecord" {
        Fault::NotFound
    } else {
        Fault::Rejected
    };
    Some((fault, format!("{}: {}", code, message)))
}

#[async_trait]
impl DnsProvider for TencentProvider {
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

        let mut body = json!({
            "Domain": record.zone,
            "SubDomain": record.host(),
            "RecordType": record.record_type.as_str(),
            "RecordLine": DEFAULT_LINE,
            "Value": value,
        });
        if let Some(ttl) = ttl {
            body["TTL"] = json!(ttl);
        }

        match self.find_record(&keys, record).await? {
            Some(existing) if common::same_value(&existing.value, value) => {
                tracing::info!(fqdn = %fqdn, value, "DNS record already has correct value");
                existing
                    .record_id
                    .ok_or_else(|| common::malformed(KIND, "record without RecordId"))
            }
            Some(existing) => {
                let record_id = existing
                    .record_id
                    .ok_or_else(|| common::malformed(KIND, "record without RecordId"))?;
                tracing::info!(fqdn = %fqdn, from = %existing.value, to = value, "Updating DNS record");

                let numeric: u64 = record_id
                    .parse()
                    .map_err(|_| common::malformed(KIND, "RecordId is not numeric"))?;
                body["RecordId"] = json!(numeric);
                self.call(&keys, "ModifyRecord", body).await?;
                Ok(record_id)
            }
            None => {
                tracing::info!(fqdn = %fqdn, value, "Creating DNS record");
                let created = self.call(&keys, "CreateRecord", body).await?;
                created["RecordId"]
                    .as_u64()
                    .map(|id| id.to_string())
                    .ok_or_else(|| common::malformed(KIND, "CreateRecord response has no RecordId"))
            }
        }
    }

    async fn verify_credentials(&self, credential: &Credential) -> Result<()> {
        let keys = Keys::from_credential(credential)?;
        self.call(&keys, "DescribeDomainList", json!({ "Limit": 1 }))
            .await?;
        Ok(())
    }

    fn kind(&self) -> ProviderKind {
        KIND
    }
}
