// # JD Cloud DNS Provider
//
// REST API at `domainservice.jdcloud-api.com`, region `cn-north-1`, signed
// with JDCLOUD2-HMAC-SHA256 (a SigV4 derivative).
//
// ```http
// GET  /v2/regions/:region/domain?domainName=example.com
// GET  /v2/regions/:region/domain/:domain_id/ResourceRecord?search=home
// POST /v2/regions/:region/domain/:domain_id/ResourceRecord
// PUT  /v2/regions/:region/domain/:domain_id/ResourceRecord/:id
// ```

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ddns_core::model::ProviderKind;
use ddns_core::traits::{DnsProvider, ExistingRecord, RecordRef};
use ddns_core::{Credential, Error, Result};
use serde_json::{Value, json};

use crate::ProviderOptions;
use crate::common::{self, Fault};

const JDCLOUD_API_BASE: &str = "https://domainservice.jdcloud-api.com";
const REGION: &str = "cn-north-1";
const SERVICE: &str = "domainservice";
const ALGORITHM: &str = "JDCLOUD2-HMAC-SHA256";
const CONTENT_TYPE: &str = "application/json";

/// `viewValue` for the default resolution line
const DEFAULT_VIEW: i64 = -1;

const KIND: ProviderKind = ProviderKind::Jdcloud;

pub struct JdcloudProvider {
    base_url: String,
    host: String,
    client: reqwest::Client,
}

impl std::fmt::Debug for JdcloudProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JdcloudProvider")
            .field("base_url", &self.base_url)
            .finish()
    }
}

struct Keys<'a> {
    access: &'a str,
    secret: &'a str,
}

impl<'a> Keys<'a> {
    fn from_credential(credential: &'a Credential) -> Result<Self> {
        match credential {
            Credential::Jdcloud {
                access_key,
                secret_key,
            } => Ok(Self {
                access: access_key,
                secret: secret_key,
            }),
            other => Err(other.mismatch(KIND)),
        }
    }
}

struct Signed {
    date: String,
    nonce: String,
    authorization: String,
}

#[allow(clippy::too_many_arguments)]
fn sign(
    keys: &Keys<'_>,
    method: &str,
    path: &str,
    query: &str,
    host: &str,
    payload: &str,
    now: DateTime<Utc>,
    nonce: &str,
) -> Result<Signed> {
    let date_time = now.format("%Y%m%dT%H%M%SZ").to_string();
    let date = now.format("%Y%m%d").to_string();
    let scope = format!("{}/{}/{}/jdcloud2_request", date, REGION, SERVICE);
    let signed_headers = "content-type;host;x-jdcloud-date;x-jdcloud-nonce";

    let canonical_request = format!(
        "{}\n{}\n{}\ncontent-type:{}\nhost:{}\nx-jdcloud-date:{}\nx-jdcloud-nonce:{}\n\n{}\n{}",
        method,
        path,
        query,
        CONTENT_TYPE,
        host,
        date_time,
        nonce,
        signed_headers,
        common::sha256_hex(payload.as_bytes())
    );
    let string_to_sign = format!(
        "{}\n{}\n{}\n{}",
        ALGORITHM,
        date_time,
        scope,
        common::sha256_hex(canonical_request.as_bytes())
    );

    let k_date = common::hmac_sha256(format!("JDCLOUD2{}", keys.secret).as_bytes(), date.as_bytes())?;
    let k_region = common::hmac_sha256(&k_date, REGION.as_bytes())?;
    let k_service = common::hmac_sha256(&k_region, SERVICE.as_bytes())?;
    let k_signing = common::hmac_sha256(&k_service, b"jdcloud2_request")?;
    let signature = common::hmac_sha256_hex(&k_signing, string_to_sign.as_bytes())?;

    Ok(Signed {
        authorization: format!(
            "{} Credential={}/{}, SignedHeaders={}, Signature={}",
            ALGORITHM, keys.access, scope, signed_headers, signature
        ),
        date: date_time,
        nonce: nonce.to_string(),
    })
}

fn error_code_fault(body: &Value) -> Option<(Fault, String)> {
    let error = body.get("error").filter(|e| !e.is_null())?;
    let status = error["status"].as_str().unwrap_or_default();
    let message = error["message"].as_str().unwrap_or_default();
    let fault = match status {
        "UNAUTHENTICATED" | "PERMISSION_DENIED" | "HTTP_REQUEST_SIGNATURE_ERROR" => Fault::Auth,
        "RESOURCE_EXHAUSTED" | "TOO_MANY_REQUESTS" => Fault::Throttled,
        "INTERNAL" | "UNAVAILABLE" => Fault::Unavailable,
        _ => return None,
    };
    Some((fault, format!("{}: {}", status, message)))
}

fn id_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

impl JdcloudProvider {
    pub fn new(options: &ProviderOptions) -> Result<Self> {
        let base_url = options.base_url_or(JDCLOUD_API_BASE);
        Ok(Self {
            host: common::host_of(&base_url)?,
            base_url,
            client: common::http_client(options.timeout)?,
        })
    }

    /// Send a signed request and return the `result` member
    async fn call(
        &self,
        keys: &Keys<'_>,
        method: reqwest::Method,
        path: &str,
        params: &[(&str, String)],
        body: Option<Value>,
    ) -> Result<Value> {
        let query = common::canonical_query(params);
        let payload = body.map(|b| b.to_string()).unwrap_or_default();
        let nonce = uuid::Uuid::new_v4().to_string();
        let signed = sign(
            keys,
            method.as_str(),
            path,
            &query,
            &self.host,
            &payload,
            Utc::now(),
            &nonce,
        )?;

        let url = if query.is_empty() {
            format!("{}{}", self.base_url, path)
        } else {
            format!("{}{}?{}", self.base_url, path, query)
        };
        let response = self
            .client
            .request(method, &url)
            .header("Content-Type", CONTENT_TYPE)
            .header("x-jdcloud-date", signed.date)
            .header("x-jdcloud-nonce", signed.nonce)
            .header("Authorization", signed.authorization)
            .body(payload)
            .send()
            .await
            .map_err(|e| common::transport_error(KIND, e))?;

        let envelope = common::read_json(KIND, response, error_code_fault).await?;
        if envelope.get("error").is_some_and(|e| !e.is_null()) {
            return Err(error_code_fault(&envelope)
                .map(|(fault, detail)| fault.into_error(KIND, detail))
                .unwrap_or_else(|| {
                    Error::provider(KIND.as_str(), format!("request rejected: {}", envelope["error"]))
                }));
        }
        Ok(envelope["result"].clone())
    }

    async fn domain_id(&self, keys: &Keys<'_>, zone: &str) -> Result<String> {
        let path = format!("/v2/regions/{}/domain", REGION);
        let result = self
            .call(
                keys,
                reqwest::Method::GET,
                &path,
                &[
                    ("domainName", zone.to_string()),
                    ("pageNumber", "1".to_string()),
                    ("pageSize", "10".to_string()),
                ],
                None,
            )
            .await?;

        result["dataList"]
            .as_array()
            .ok_or_else(|| common::malformed(KIND, "dataList is not an array"))?
            .iter()
            .find(|d| d["domainName"].as_str().is_some_and(|n| n.eq_ignore_ascii_case(zone)))
            .and_then(|d| id_string(&d["id"]))
            .ok_or_else(|| Error::provider(KIND.as_str(), format!("Domain not found: {}", zone)))
    }

    async fn find_record(
        &self,
        keys: &Keys<'_>,
        domain_id: &str,
        record: &RecordRef<'_>,
    ) -> Result<Option<ExistingRecord>> {
        let path = format!("/v2/regions/{}/domain/{}/ResourceRecord", REGION, domain_id);
        let result = self
            .call(
                keys,
                reqwest::Method::GET,
                &path,
                &[
                    ("search", record.host().to_string()),
                    ("pageNumber", "1".to_string()),
                    ("pageSize", "100".to_string()),
                ],
                None,
            )
            .await?;

        let Some(list) = result["dataList"].as_array() else {
            return Ok(None);
        };
        let found = list.iter().find(|r| {
            r["hostRecord"].as_str() == Some(record.host())
                && r["type"].as_str() == Some(record.record_type.as_str())
        });
        let Some(found) = found else {
            return Ok(None);
        };

        Ok(Some(ExistingRecord {
            value: found["hostValue"].as_str().unwrap_or_default().to_string(),
            record_id: id_string(&found["id"]),
            ttl: found["ttl"].as_u64().map(|t| t as u32),
        }))
    }
}

#[async_trait]
impl DnsProvider for JdcloudProvider {
    async fn resolve_record(&self, credential: &Credential, record: &RecordRef<'_>) -> Result<ExistingRecord> {
        let keys = Keys::from_credential(credential)?;
        let domain_id = self.domain_id(&keys, record.zone).await?;
        self.find_record(&keys, &domain_id, record)
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
        let domain_id = self.domain_id(&keys, record.zone).await?;
        let fqdn = record.fqdn();

        let mut req = json!({
            "domainName": record.zone,
            "hostRecord": record.host(),
            "hostValue": value,
            "type": record.record_type.as_str(),
            "viewValue": DEFAULT_VIEW,
        });
        if let Some(ttl) = ttl {
            req["ttl"] = json!(ttl);
        }
        let base = format!("/v2/regions/{}/domain/{}/ResourceRecord", REGION, domain_id);

        match self.find_record(&keys, &domain_id, record).await? {
            Some(existing) if common::same_value(&existing.value, value) => {
                tracing::info!(fqdn = %fqdn, value, "DNS record already has correct value");
                existing
                    .record_id
                    .ok_or_else(|| common::malformed(KIND, "record without id"))
            }
            Some(existing) => {
                let record_id = existing
                    .record_id
                    .ok_or_else(|| common::malformed(KIND, "record without id"))?;
                tracing::info!(fqdn = %fqdn, from = %existing.value, to = value, "Updating DNS record");
                let path = format!("{}/{}", base, record_id);
                self.call(&keys, reqwest::Method::PUT, &path, &[], Some(json!({ "req": req })))
                    .await?;
                Ok(record_id)
            }
            None => {
                tracing::info!(fqdn = %fqdn, value, "Creating DNS record");
                let result = self
                    .call(&keys, reqwest::Method::POST, &base, &[], Some(json!({ "req": req })))
                    .await?;
                id_string(&result["dataList"]["id"])
                    .ok_or_else(|| common::malformed(KIND, "created record has no id"))
            }
        }
    }

    async fn verify_credentials(&self, credential: &Credential) -> Result<()> {
        let keys = Keys::from_credential(credential)?;
        let path = format!("/v2/regions/{}/domain", REGION);
        self.call(
            &keys,
            reqwest::Method::GET,
            &path,
            &[("pageNumber", "1".to_string()), ("pageSize", "1".to_string())],
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
            access: "JDAK",
            secret: "secret",
        };
        let now = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        let signed = sign(&keys, "GET", "/v2/regions/cn-north-1/domain", "", "domainservice.jdcloud-api.com", "", now, "nonce-1").unwrap();
        assert_eq!(signed.date, "20240301T120000Z");
        assert!(signed.authorization.starts_with(
            "JDCLOUD2-HMAC-SHA256 Credential=JDAK/20240301/cn-north-1/domainservice/jdcloud2_request, SignedHeaders=content-type;host;x-jdcloud-date;x-jdcloud-nonce, Signature="
        ));
    }

    #[test]
    fn test_nonce_is_signed() {
        let keys = Keys {
            access: "JDAK",
            secret: "secret",
        };
        let now = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        let a = sign(&keys, "GET", "/v2", "", "h", "", now, "n1").unwrap();
        let b = sign(&keys, "GET", "/v2", "", "h", "", now, "n2").unwrap();
        assert_ne!(a.authorization, b.authorization);
    }

    #[test]
    fn test_error_status() {
        let body = json!({"requestId": "r", "error": {"code": 401, "status": "UNAUTHENTICATED", "message": "x"}});
        assert_eq!(error_code_fault(&body).map(|(f, _)| f), Some(Fault::Auth));
        let body = json!({"requestId": "r", "error": {"status": "INVALID_ARGUMENT", "message": "x"}});
        assert!(error_code_fault(&body).is_none());
        let body = json!({"requestId": "r", "result": {}});
        assert!(error_code_fault(&body).is_none());
        let body = json!({"requestId": "r", "error": null, "result": {}});
        assert!(error_code_fault(&body).is_none());
    }
}
