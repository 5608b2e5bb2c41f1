// # AWS Route53 DNS Provider
//
// REST/XML API version 2013-04-01, signed with SigV4 (service `route53`).
// Route53 is a global service signed for `us-east-1`; credentials whose
// region starts with `cn-` use the China partition endpoint instead.
//
// ## API Calls
//
// ```http
// GET  /2013-04-01/hostedzonesbyname?dnsname=example.com&maxitems=1
// GET  /2013-04-01/hostedzone/:id/rrset?name=home.example.com&type=A&maxitems=1
// POST /2013-04-01/hostedzone/:id/rrset/      (ChangeResourceRecordSets, UPSERT)
// GET  /2013-04-01/hostedzonecount            (credential check)
// ```

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ddns_core::model::ProviderKind;
use ddns_core::traits::{DnsProvider, ExistingRecord, RecordRef};
use ddns_core::{Credential, Error, Result};

use crate::ProviderOptions;
use crate::common::{self, Fault};

const ROUTE53_API_BASE: &str = "https://route53.amazonaws.com";
const ROUTE53_CN_API_BASE: &str = "https://route53.amazonaws.com.cn";
const API_VERSION: &str = "2013-04-01";
const SERVICE: &str = "route53";
const GLOBAL_REGION: &str = "us-east-1";
const CN_REGION: &str = "cn-northwest-1";
const ALGORITHM: &str = "AWS4-HMAC-SHA256";

/// UPSERT requires a TTL
const FALLBACK_TTL: u32 = 300;

const KIND: ProviderKind = ProviderKind::Aws;

pub struct Route53Provider {
    /// Explicit endpoint; when unset it is chosen per credential region
    base_url: Option<String>,
    client: reqwest::Client,
}

impl std::fmt::Debug for Route53Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Route53Provider")
            .field("base_url", &self.base_url)
            .finish()
    }
}

struct Keys<'a> {
    id: &'a str,
    secret: &'a str,
    region: &'a str,
}

impl<'a> Keys<'a> {
    fn from_credential(credential: &'a Credential) -> Result<Self> {
        match credential {
            Credential::Aws {
                access_key_id,
                secret_access_key,
                region,
            } => Ok(Self {
                id: access_key_id,
                secret: secret_access_key,
                region,
            }),
            other => Err(other.mismatch(KIND)),
        }
    }

    fn is_china(&self) -> bool {
        self.region.starts_with("cn-")
    }

    fn signing_region(&self) -> &'static str {
        if self.is_china() { CN_REGION } else { GLOBAL_REGION }
    }
}

/// One request to be signed
struct Request<'a> {
    method: &'a str,
    path: &'a str,
    query: &'a str,
    host: &'a str,
    payload: &'a str,
}

/// SigV4 signing key: HMAC chain over date, region, service, `aws4_request`
fn signing_key(secret: &str, date: &str, region: &str, service: &str) -> Result<Vec<u8>> {
    let k_date = common::hmac_sha256(format!("AWS4{}", secret).as_bytes(), date.as_bytes())?;
    let k_region = common::hmac_sha256(&k_date, region.as_bytes())?;
    let k_service = common::hmac_sha256(&k_region, service.as_bytes())?;
    common::hmac_sha256(&k_service, b"aws4_request")
}

/// Returns the `x-amz-date` value and the `Authorization` header
fn sign(keys: &Keys<'_>, request: &Request<'_>, now: DateTime<Utc>) -> Result<(String, String)> {
    let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();
    let date = now.format("%Y%m%d").to_string();
    let region = keys.signing_region();
    let scope = format!("{}/{}/{}/aws4_request", date, region, SERVICE);
    let signed_headers = "host;x-amz-date";

    let canonical_request = format!(
        "{}\n{}\n{}\nhost:{}\nx-amz-date:{}\n\n{}\n{}",
        request.method,
        request.path,
        request.query,
        request.host,
        amz_date,
        signed_headers,
        common::sha256_hex(request.payload.as_bytes())
    );
    let string_to_sign = format!(
        "{}\n{}\n{}\n{}",
        ALGORITHM,
        amz_date,
        scope,
        common::sha256_hex(canonical_request.as_bytes())
    );

    let key = signing_key(keys.secret, &date, region, SERVICE)?;
    let signature = common::hmac_sha256_hex(&key, string_to_sign.as_bytes())?;

    let authorization = format!(
        "{} Credential={}/{}, SignedHeaders={}, Signature={}",
        ALGORITHM, keys.id, scope, signed_headers, signature
    );
    Ok((amz_date, authorization))
}

/// Text of the first `<tag>...</tag>` element
fn xml_text<'a>(doc: &'a str, tag: &str) -> Option<&'a str> {
    let open = format!("<{}>", tag);
    let close = format!("</{}>", tag);
    let start = doc.find(&open)? + open.len();
    let end = doc[start..].find(&close)? + start;
    Some(&doc[start..end])
}

fn xml_escape(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

fn xml_unescape(value: &str) -> String {
    value
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

/// Decodes the `\NNN` octal escapes Route 53 uses in names (`\052` is `*`)
fn decode_octal(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut rest = name;
    while let Some(pos) = rest.find('\\') {
        out.push_str(&rest[..pos]);
        let digits = rest.get(pos + 1..pos + 4).unwrap_or_default();
        match u8::from_str_radix(digits, 8) {
            Ok(byte) if digits.len() == 3 && digits.bytes().all(|d| d.is_ascii_digit()) => {
                out.push(char::from(byte));
                rest = &rest[pos + 4..];
            }
            _ => {
                out.push('\\');
                rest = &rest[pos + 1..];
            }
        }
    }
    out.push_str(rest);
    out
}

/// Name as returned in a response, entities and octal escapes decoded
fn response_name(raw: &str) -> String {
    decode_octal(&xml_unescape(raw))
}

/// Zone and record names compare without the trailing dot, case-insensitively
fn same_name(a: &str, b: &str) -> bool {
    let (a, b) = (response_name(a), response_name(b));
    a.trim_end_matches('.').eq_ignore_ascii_case(b.trim_end_matches('.'))
}

fn error_fault(status: reqwest::StatusCode, body: &str) -> Error {
    let code = xml_text(body, "Code").unwrap_or_default();
    let message = xml_text(body, "Message").unwrap_or_default();
    let fault = match code {
        "InvalidClientTokenId" | "SignatureDoesNotMatch" | "AccessDenied" | "IncompleteSignature"
        | "UnrecognizedClientException" | "InvalidSignatureException" => Fault::Auth,
        "Throttling" | "ThrottlingException" | "PriorRequestNotComplete" => Fault::Throttled,
        "ServiceUnavailable" | "InternalFailure" => Fault::Unavailable,
        _ => Fault::from_status(status),
    };
    fault.into_error(KIND, format!("{} {}: {}", status, code, message))
}

impl Route53Provider {
    pub fn new(options: &ProviderOptions) -> Result<Self> {
        Ok(Self {
            base_url: options.base_url.clone(),
            client: common::http_client(options.timeout)?,
        })
    }

    fn endpoint(&self, keys: &Keys<'_>) -> String {
        match &self.base_url {
            Some(url) => url.clone(),
            None if keys.is_china() => ROUTE53_CN_API_BASE.to_string(),
            None => ROUTE53_API_BASE.to_string(),
        }
    }

    /// Send a signed request and return the XML body
    async fn call(
        &self,
        keys: &Keys<'_>,
        method: reqwest::Method,
        path: &str,
        params: &[(&str, String)],
        payload: &str,
    ) -> Result<String> {
        let base = self.endpoint(keys);
        let host = common::host_of(&base)?;
        let query = common::canonical_query(params);
        let (amz_date, authorization) = sign(
            keys,
            &Request {
                method: method.as_str(),
                path,
                query: &query,
                host: &host,
                payload,
            },
            Utc::now(),
        )?;

        let url = if query.is_empty() {
            format!("{}{}", base, path)
        } else {
            format!("{}{}?{}", base, path, query)
        };
        let mut request = self
            .client
            .request(method, &url)
            .header("x-amz-date", amz_date)
            .header("Authorization", authorization);
        if !payload.is_empty() {
            request = request
                .header("Content-Type", "text/xml")
                .body(payload.to_string());
        }

        let response = request
            .send()
            .await
            .map_err(|e| common::transport_error(KIND, e))?;
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| common::transport_error(KIND, e))?;
        if !status.is_success() {
            return Err(error_fault(status, &body));
        }
        Ok(body)
    }

    /// Hosted zone id without the `/hostedzone/` prefix
    async fn zone_id(&self, keys: &Keys<'_>, zone: &str) -> Result<String> {
        let path = format!("/{}/hostedzonesbyname", API_VERSION);
        let body = self
            .call(
                keys,
                reqwest::Method::GET,
                &path,
                &[("dnsname", zone.to_string()), ("maxitems", "1".to_string())],
                "",
            )
            .await?;

        let hosted = xml_text(&body, "HostedZone")
            .filter(|z| xml_text(z, "Name").is_some_and(|name| same_name(name, zone)))
            .ok_or_else(|| Error::provider(KIND.as_str(), format!("Hosted zone not found: {}", zone)))?;
        let id = xml_text(hosted, "Id").ok_or_else(|| common::malformed(KIND, "HostedZone without Id"))?;
        Ok(id.trim_start_matches("/hostedzone/").to_string())
    }

    async fn find_record(
        &self,
        keys: &Keys<'_>,
        zone_id: &str,
        record: &RecordRef<'_>,
    ) -> Result<Option<ExistingRecord>> {
        let fqdn = record.fqdn();
        let path = format!("/{}/hostedzone/{}/rrset", API_VERSION, zone_id);
        let body = self
            .call(
                keys,
                reqwest::Method::GET,
                &path,
                &[
                    ("name", fqdn.clone()),
                    ("type", record.record_type.to_string()),
                    ("maxitems", "1".to_string()),
                ],
                "",
            )
            .await?;

        // Listing starts at the requested name; the first set may belong to another record
        let Some(set) = xml_text(&body, "ResourceRecordSet") else {
            return Ok(None);
        };
        let matches = xml_text(set, "Name").is_some_and(|name| same_name(name, &fqdn))
            && xml_text(set, "Type") == Some(record.record_type.as_str());
        if !matches {
            return Ok(None);
        }

        Ok(Some(ExistingRecord {
            value: xml_unescape(xml_text(set, "Value").unwrap_or_default()),
            record_id: Some(record_id(zone_id, &fqdn, record)),
            ttl: xml_text(set, "TTL").and_then(|t| t.parse().ok()),
        }))
    }
}

/// Route53 has no record ids; this one is stable per zone, name and type
fn record_id(zone_id: &str, fqdn: &str, record: &RecordRef<'_>) -> String {
    format!("{}/{}/{}", zone_id, fqdn, record.record_type)
}

fn change_batch(fqdn: &str, record: &RecordRef<'_>, value: &str, ttl: u32) -> String {
    format!(
        concat!(
            r#"<?xml version="1.0" encoding="UTF-8"?>"#,
            r#"<ChangeResourceRecordSetsRequest xmlns="https://route53.amazonaws.com/doc/2013-04-01/">"#,
            "<ChangeBatch><Comment>DDNS update</Comment><Changes><Change>",
            "<Action>UPSERT</Action><ResourceRecordSet>",
            "<Name>{}</Name><Type>{}</Type><TTL>{}</TTL>",
            "<ResourceRecords><ResourceRecord><Value>{}</Value></ResourceRecord></ResourceRecords>",
            "</ResourceRecordSet></Change></Changes></ChangeBatch>",
            "</ChangeResourceRecordSetsRequest>"
        ),
        xml_escape(fqdn),
        record.record_type,
        ttl,
        xml_escape(value)
    )
}

#[async_trait]
impl DnsProvider for Route53Provider {
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

        let existing = self.find_record(&keys, &zone_id, record).await?;
        if existing.is_some_and(|e| common::same_value(&e.value, value)) {
            tracing::info!(fqdn = %fqdn, value, "DNS record already has correct value");
            return Ok(record_id(&zone_id, &fqdn, record));
        }

        tracing::info!(fqdn = %fqdn, value, "Upserting DNS record");
        let path = format!("/{}/hostedzone/{}/rrset/", API_VERSION, zone_id);
        let batch = change_batch(&fqdn, record, value, ttl.unwrap_or(FALLBACK_TTL));
        let body = self
            .call(&keys, reqwest::Method::POST, &path, &[], &batch)
            .await?;
        if let Some(change) = xml_text(&body, "Id") {
            tracing::debug!(change, "Route53 change submitted");
        }

        Ok(record_id(&zone_id, &fqdn, record))
    }

    async fn verify_credentials(&self, credential: &Credential) -> Result<()> {
        let keys = Keys::from_credential(credential)?;
        let path = format!("/{}/hostedzonecount", API_VERSION);
        self.call(&keys, reqwest::Method::GET, &path, &[], "")
            .await?;
        Ok(())
    }

    fn kind(&self) -> ProviderKind {
        KIND
    }
}
