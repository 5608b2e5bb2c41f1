// # Huawei Cloud DNS Provider
//
// REST API at `dns.myhuaweicloud.com`, signed with SDK-HMAC-SHA256 (the
// APIG signer). Record sets carry fully-qualified names with a trailing dot.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ddns_core::model::ProviderKind;
use ddns_core::traits::{DnsProvider, ExistingRecord, RecordRef};
use ddns_core::{Credential, Error, Result};
use serde_json::{Value, json};

use crate::ProviderOptions;
use crate::common::{self, Fault};

const HUAWEI_API_BASE: &str = "https://dns.myhuaweicloud.com";
const ALGORITHM: &str = "SDK-HMAC-SHA256";
const CONTENT_TYPE: &str = "application/json";

const KIND: ProviderKind = ProviderKind::Huawei;

pub struct HuaweiProvider {
    base_url: String,
    host: String,
    client: reqwest::Client,
}

impl std::fmt::Debug for HuaweiProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HuaweiProvider")
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
            Credential::Huawei {
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

/// Returns the `X-Sdk-Date` value and the `Authorization` header
///
/// The canonical URI always ends with `/`, even when the request path does not.
fn sign(
    keys: &Keys<'_>,
    method: &str,
    path: &str,
    query: &str,
    host: &str,
    payload: &str,
    now: DateTime<Utc>,
) -> Result<(String, String)> {
    let sdk_date = now.format("%Y%m%dT%H%M%SZ").to_string();
    let canonical_uri = if path.ends_with('/') {
        path.to_string()
    } else {
        format!("{}/", path)
    };
    let signed_headers = "content-type;host;x-sdk-date";

    let canonical_request = format!(
        "{}\n{}\n{}\ncontent-type:{}\nhost:{}\nx-sdk-date:{}\n\n{}\n{}",
        method,
        canonical_uri,
        query,
        CONTENT_TYPE,
        host,
        sdk_date,
        signed_headers,
        common::sha256_hex(payload.as_bytes())
    );
    let string_to_sign = format!(
        "{}\n{}\n{}",
        ALGORITHM,
        sdk_date,
        common::sha256_hex(canonical_request.as_bytes())
    );
    let signature = common::hmac_sha256_hex(keys.secret.as_bytes(), string_to_sign.as_bytes())?;

    Ok((
        sdk_date,
        format!(
            "{} Access={}, SignedHeaders={}, Signature={}",
            ALGORITHM, keys.access, signed_headers, signature
        ),
    ))
}

fn error_code_fault(body: &Value) -> Option<(Fault, String)> {
    let code = body["code"]
        .as_str()
        .or_else(|| body["error_code"].as_str())?;
    let message = body["message"]
        .as_str()
        .or_else(|| body["error_msg"].as_str())
        .unwrap_or_default();
    let fault = match code {
        // Incorrect IAM authentication, signature expired, invalid AK
        "APIGW.0101" | "APIGW.0301" | "APIGW.0303" | "APIGW.0305" => Fault::Auth,
        "APIGW.0308" => Fault::Throttled,
        _ => return None,
    };
    Some((fault, format!("{}: {}", code, message)))
}

impl HuaweiProvider {
    pub fn new(options: &ProviderOptions) -> Result<Self> {
        let base_url = options.base_url_or(HUAWEI_API_BASE);
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
        let payload = body.map(|b| b.to_string()).unwrap_or_default();
        let (sdk_date, authorization) = sign(
            keys,
            method.as_str(),
            path,
            &query,
            &self.host,
            &payload,
            Utc::now(),
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
            .header("X-Sdk-Date", sdk_date)
            .header("Authorization", authorization)
            .body(payload)
            .send()
            .await
            .map_err(|e| common::transport_error(KIND, e))?;
        common::read_json(KIND, response, error_code_fault).await
    }

    async fn zone_id(&self, keys: &Keys<'_>, zone: &str) -> Result<String> {
        let body = self
            .call(
                keys,
                reqwest::Method::GET,
                "/v2/zones",
                &[("type", "public".to_string()), ("name", zone.to_string())],
                None,
            )
            .await?;

        let wanted = format!("{}.", zone);
        body["zones"]
            .as_array()
            .ok_or_else(|| common::malformed(KIND, "zones is not an array"))?
            .iter()
            .find(|z| z["name"].as_str().is_some_and(|n| n.eq_ignore_ascii_case(&wanted)))
            .and_then(|z| z["id"].as_str())
            .map(str::to_string)
            .ok_or_else(|| Error::provider(KIND.as_str(), format!("Zone not found: {}", zone)))
    }

    async fn find_record(
        &self,
        keys: &Keys<'_>,
        zone_id: &str,
        record: &RecordRef<'_>,
    ) -> Result<Option<ExistingRecord>> {
        let name = format!("{}.", record.fqdn());
        let path = format!("/v2/zones/{}/recordsets", zone_id);
        let body = self
            .call(
                keys,
                reqwest::Method::GET,
                &path,
                &[("name", name.clone()), ("type", record.record_type.to_string())],
                None,
            )
            .await?;

        // `name` is a fuzzy filter
        let found = body["recordsets"]
            .as_array()
            .ok_or_else(|| common::malformed(KIND, "recordsets is not an array"))?
            .iter()
            .find(|r| {
                r["name"].as_str().is_some_and(|n| n.eq_ignore_ascii_case(&name))
                    && r["type"].as_str() == Some(record.record_type.as_str())
            });
        let Some(found) = found else {
            return Ok(None);
        };

        Ok(Some(ExistingRecord {
            value: found["records"][0].as_str().unwrap_or_default().to_string(),
            record_id: found["id"].as_str().map(str::to_string),
            ttl: found["ttl"].as_u64().map(|t| t as u32),
        }))
    }
}

#[async_trait]
impl DnsProvider for HuaweiProvider {
    async fn resolve_record(&self, credential: &Credential, record: &RecordRef<'_>) -> Result<ExistingRecord> {
        let keys = Keys::from_credential(credential)?;
        let zone_id = self.zone_id(&keys, record.zone).await?;
        self.find_record(&keys, &zone_id, record)
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
        let zone_id = self.zone_id(&keys, record.zone).await?;
        let fqdn = record.fqdn();

        let mut payload = json!({
            "name": format!("{}.", fqdn),
            "type": record.record_type.as_str(),
            "records": [value],
        });
        if let Some(ttl) = ttl {
            payload["ttl"] = json!(ttl);
        }

        let (body, record_id) = match self.find_record(&keys, &zone_id, record).await? {
            Some(existing) if common::same_value(&existing.value, value) => {
                tracing::info!(fqdn = %fqdn, value, "DNS record already has correct value");
                return existing
                    .record_id
                    .ok_or_else(|| common::malformed(KIND, "recordset without id"));
            }
            Some(existing) => {
                let record_id = existing
                    .record_id
                    .ok_or_else(|| common::malformed(KIND, "recordset without id"))?;
                tracing::info!(fqdn = %fqdn, from = %existing.value, to = value, "Updating DNS record");
                let path = format!("/v2/zones/{}/recordsets/{}", zone_id, record_id);
                let body = self
                    .call(&keys, reqwest::Method::PUT, &path, &[], Some(payload))
                    .await?;
                (body, Some(record_id))
            }
            None => {
                tracing::info!(fqdn = %fqdn, value, "Creating DNS record");
                let path = format!("/v2/zones/{}/recordsets", zone_id);
                let body = self
                    .call(&keys, reqwest::Method::POST, &path, &[], Some(payload))
                    .await?;
                (body, None)
            }
        };

        body["id"]
            .as_str()
            .map(str::to_string)
            .or(record_id)
            .ok_or_else(|| common::malformed(KIND, "recordset response has no id"))
    }

    async fn verify_credentials(&self, credential: &Credential) -> Result<()> {
        let keys = Keys::from_credential(credential)?;
        self.call(
            &keys,
            reqwest::Method::GET,
            "/v2/zones",
            &[("type", "public".to_string()), ("limit", "1".to_string())],
            None,
        )
        .await?;
        Ok(())
    }

    fn kind(&self) -> ProviderKind {
        KIND
    }
}
