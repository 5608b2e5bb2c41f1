// # Cloudflare DNS Provider
//
// Talks to the Cloudflare v4 REST API.
//
// ## Authentication
//
// - API token: `Authorization: Bearer <token>`
// - Global API key: `X-Auth-Email` + `X-Auth-Key`, selected when the
//   credential carries `account_email`
//
// ## API Calls
//
// ```http
// GET  /zones?name=example.com
// GET  /zones/:zone_id/dns_records?type=A&name=home.example.com
// POST /zones/:zone_id/dns_records
// PUT  /zones/:zone_id/dns_records/:record_id
// GET  /user/tokens/verify          (token credentials)
// GET  /user                        (global key credentials)
// ```

use async_trait::async_trait;
use ddns_core::model::ProviderKind;
use ddns_core::traits::{DnsProvider, ExistingRecord, RecordRef};
use ddns_core::{Credential, Error, Result};
use serde_json::{Value, json};

use crate::ProviderOptions;
use crate::common::{self, Fault};

/// Cloudflare API base URL
const CLOUDFLARE_API_BASE: &str = "https://api.cloudflare.com/client/v4";

const KIND: ProviderKind = ProviderKind::Cloudflare;

/// Cloudflare DNS provider
///
/// Stateless apart from its HTTP client; the credential is supplied per call.
pub struct CloudflareProvider {
    base_url: String,
    client: reqwest::Client,
}

impl std::fmt::Debug for CloudflareProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CloudflareProvider")
            .field("base_url", &self.base_url)
            .finish()
    }
}

/// Borrowed view of a Cloudflare credential
enum Auth<'a> {
    Token(&'a str),
    GlobalKey { email: &'a str, key: &'a str },
}

impl<'a> Auth<'a> {
    fn from_credential(credential: &'a Credential) -> Result<Self> {
        match credential {
            Credential::Cloudflare {
                api_token,
                account_email: Some(email),
            } => Ok(Self::GlobalKey {
                email,
                key: api_token,
            }),
            Credential::Cloudflare { api_token, .. } => Ok(Self::Token(api_token)),
            other => Err(other.mismatch(KIND)),
        }
    }

    fn apply(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self {
            Self::Token(token) => request.bearer_auth(token),
            Self::GlobalKey { email, key } => request
                .header("X-Auth-Email", *email)
                .header("X-Auth-Key", *key),
        }
    }
}

impl CloudflareProvider {
    /// Create a new Cloudflare provider
    pub fn new(options: &ProviderOptions) -> Result<Self> {
        Ok(Self {
            base_url: options.base_url_or(CLOUDFLARE_API_BASE),
            client: common::http_client(options.timeout)?,
        })
    }

    /// Send one request and unwrap the `result` member of the envelope
    async fn call(
        &self,
        auth: &Auth<'_>,
        method: reqwest::Method,
        path: &str,
        body: Option<Value>,
    ) -> Result<Value> {
        let url = format!("{}{}", self.base_url, path);
        let mut request = auth.apply(self.client.request(method, &url));
        if let Some(body) = body {
            request = request.json(&body);
        }

        let response = request
            .send()
            .await
            .map_err(|e| common::transport_error(KIND, e))?;
        let envelope = common::read_json(KIND, response, error_code_fault).await?;

        // A 200 with `success: false` still carries an API error
        if envelope["success"].as_bool() == Some(false) {
            return Err(error_code_fault(&envelope)
                .map(|(fault, detail)| fault.into_error(KIND, detail))
                .unwrap_or_else(|| Error::provider(KIND.as_str(), "request was not successful")));
        }
        Ok(envelope["result"].clone())
    }

    /// Look up the zone id for a registrable domain
    async fn zone_id(&self, auth: &Auth<'_>, zone: &str) -> Result<String> {
        tracing::debug!(zone, "Looking up Cloudflare zone ID");

        let path = format!("/zones?name={}", common::encode(zone));
        let result = self.call(auth, reqwest::Method::GET, &path, None).await?;

        let zones = result
            .as_array()
            .ok_or_else(|| common::malformed(KIND, "result is not an array"))?;
        let zone_id = zones
            .first()
            .and_then(|z| z["id"].as_str())
            .ok_or_else(|| Error::provider(KIND.as_str(), format!("Zone not found: {}", zone)))?;

        Ok(zone_id.to_string())
    }

    async fn find_record(
        &self,
        auth: &Auth<'_>,
        zone_id: &str,
        record: &RecordRef<'_>,
    ) -> Result<Option<ExistingRecord>> {
        let path = format!(
            "/zones/{}/dns_records?type={}&name={}",
            zone_id,
            record.record_type,
            common::encode(&record.fqdn())
        );
        let result = self.call(auth, reqwest::Method::GET, &path, None).await?;

        let records = result
            .as_array()
            .ok_or_else(|| common::malformed(KIND, "result is not an array"))?;
        let Some(found) = records.first() else {
            return Ok(None);
        };

        let value = found["content"]
            .as_str()
            .ok_or_else(|| common::malformed(KIND, "record.content is not a string"))?;
        let record_id = found["id"]
            .as_str()
            .ok_or_else(|| common::malformed(KIND, "record.id is not a string"))?;

        Ok(Some(ExistingRecord {
            value: value.to_string(),
            record_id: Some(record_id.to_string()),
            ttl: found["ttl"].as_u64().map(|t| t as u32),
        }))
    }
}

/// Classify Cloudflare's `errors[].code` values
fn error_code_fault(body: &Value) -> Option<(Fault, String)> {
    let first = body["errors"].as_array()?.first()?;
    let code = first["code"].as_u64()?;
    let message = first["message"].as_str().unwrap_or_default();
    let fault = match code {
        // Authentication error, invalid token, malformed auth headers
        6003 | 6103 | 6111 | 9103 | 9106 | 9109 | 10000 | 10001 => Fault::Auth,
        971 | 10429 => Fault::Throttled,
        _ => return None,
    };
    Some((fault, format!("error {}: {}", code, message)))
}

#[async_trait]
impl DnsProvider for CloudflareProvider {
    async fn resolve_record(
        &self,
        credential: &Credential,
        record: &RecordRef<'_>,
    ) -> Result<ExistingRecord> {
        let auth = Auth::from_credential(credential)?;
        let zone_id = self.zone_id(&auth, record.zone).await?;
        self.find_record(&auth, &zone_id, record)
            .await?
            .ok_or_else(|| Error::not_found(format!("{} {} not found", record.record_type, record.fqdn())))
    }

    /// Create or update a record
    ///
    /// ```http
    /// # Create when absent
    /// POST /zones/:zone_id/dns_records
    /// { "type": "A", "name": "home.example.com", "content": "203.0.113.5", "ttl": 600, "proxied": false }
    ///
    /// # Update when the content differs
    /// PUT /zones/:zone_id/dns_records/:record_id
    /// ```
    async fn upsert_record(
        &self,
        credential: &Credential,
        record: &RecordRef<'_>,
        value: &str,
        ttl: Option<u32>,
    ) -> Result<String> {
        let auth = Auth::from_credential(credential)?;
        let zone_id = self.zone_id(&auth, record.zone).await?;
        let fqdn = record.fqdn();
        // TTL 1 means "automatic" on Cloudflare
        let ttl = ttl.unwrap_or(1);

        let payload = json!({
            "type": record.record_type.as_str(),
            "name": fqdn,
            "content": value,
            "ttl": ttl,
            "proxied": false,
        });

        match self.find_record(&auth, &zone_id, record).await? {
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

                let path = format!("/zones/{}/dns_records/{}", zone_id, record_id);
                self.call(&auth, reqwest::Method::PUT, &path, Some(payload))
                    .await?;
                Ok(record_id)
            }
            None => {
                tracing::info!(fqdn = %fqdn, value, "Creating DNS record");

                let path = format!("/zones/{}/dns_records", zone_id);
                let created = self
                    .call(&auth, reqwest::Method::POST, &path, Some(payload))
                    .await?;
                created["id"]
                    .as_str()
                    .map(str::to_string)
                    .ok_or_else(|| common::malformed(KIND, "created record has no id"))
            }
        }
    }

    async fn verify_credentials(&self, credential: &Credential) -> Result<()> {
        let auth = Auth::from_credential(credential)?;
        let path = match auth {
            Auth::Token(_) => "/user/tokens/verify",
            Auth::GlobalKey { .. } => "/user",
        };
        self.call(&auth, reqwest::Method::GET, path, None).await?;
        Ok(())
    }

    fn kind(&self) -> ProviderKind {
        KIND
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider() -> CloudflareProvider {
        CloudflareProvider::new(&ProviderOptions::default()).unwrap()
    }

    #[test]
    fn test_default_endpoint() {
        assert_eq!(provider().base_url, CLOUDFLARE_API_BASE);
        assert_eq!(provider().kind(), ProviderKind::Cloudflare);
    }

    #[test]
    fn test_auth_selection() {
        let token = Credential::Cloudflare {
            api_token: "tok".into(),
            account_email: None,
        };
        assert!(matches!(Auth::from_credential(&token), Ok(Auth::Token("tok"))));

        let global = Credential::Cloudflare {
            api_token: "key".into(),
            account_email: Some("ops@example.com".into()),
        };
        assert!(matches!(
            Auth::from_credential(&global),
            Ok(Auth::GlobalKey { email: "ops@example.com", key: "key" })
        ));
    }

    #[test]
    fn test_foreign_credential_is_rejected() {
        let aliyun = Credential::Aliyun {
            access_key_id: "id".into(),
            access_key_secret: "secret".into(),
        };
        assert!(matches!(Auth::from_credential(&aliyun), Err(Error::Credential(_))));
    }

    #[test]
    fn test_error_codes() {
        let body = json!({"success": false, "errors": [{"code": 10000, "message": "Authentication error"}]});
        assert_eq!(error_code_fault(&body).map(|(f, _)| f), Some(Fault::Auth));

        let body = json!({"success": false, "errors": [{"code": 81057, "message": "record exists"}]});
        assert!(error_code_fault(&body).is_none());
    }

    #[test]
    fn test_debug_has_no_secrets() {
        let printed = format!("{:?}", provider());
        assert!(printed.contains("CloudflareProvider"));
        assert!(!printed.contains("token"));
    }
}
