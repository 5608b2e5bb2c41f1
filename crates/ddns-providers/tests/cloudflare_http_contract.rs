//! HTTP Contract Test: Cloudflare Adapter
//!
//! Constraints verified:
//! - An upsert whose value is already published performs no write
//! - Absent records are created, differing records updated in place
//! - HTTP failures map onto the shared taxonomy (401 → AuthError,
//!   429 → RateLimited, 5xx → ProviderUnavailable)
//! - Token and global-key credentials use their own auth headers
//!
//! If this test fails, someone has broken provider-side idempotence or the
//! error mapping the orchestrator branches on.

use ddns_core::model::RecordType;
use ddns_core::traits::{DnsProvider, RecordRef};
use ddns_core::{Credential, ErrorKind};
use ddns_providers::{CloudflareProvider, ProviderOptions};
use serde_json::json;
use wiremock::matchers::{body_partial_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn token() -> Credential {
    Credential::Cloudflare {
        api_token: "cf-token".into(),
        account_email: None,
    }
}

fn provider(server: &MockServer) -> CloudflareProvider {
    CloudflareProvider::new(&ProviderOptions::default().with_base_url(server.uri())).unwrap()
}

async fn mount_zone(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/zones"))
        .and(query_param("name", "example.com"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": true,
            "errors": [],
            "result": [{"id": "zone-1", "name": "example.com"}]
        })))
        .mount(server)
        .await;
}

async fn mount_records(server: &MockServer, records: serde_json::Value) {
    Mock::given(method("GET"))
        .and(path("/zones/zone-1/dns_records"))
        .and(query_param("type", "A"))
        .and(query_param("name", "home.example.com"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": true,
            "errors": [],
            "result": records
        })))
        .mount(server)
        .await;
}

#[tokio::test]
async fn unchanged_value_performs_no_write() {
    let server = MockServer::start().await;
    mount_zone(&server).await;
    mount_records(
        &server,
        json!([{"id": "rec-1", "type": "A", "name": "home.example.com", "content": "203.0.113.5", "ttl": 600}]),
    )
    .await;
    Mock::given(method("PUT"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let record = RecordRef::new("example.com", "home", RecordType::A);
    let id = provider(&server)
        .upsert_record(&token(), &record, "203.0.113.5", Some(600))
        .await
        .unwrap();

    assert_eq!(id, "rec-1");
}

#[tokio::test]
async fn absent_record_is_created() {
    let server = MockServer::start().await;
    mount_zone(&server).await;
    mount_records(&server, json!([])).await;
    Mock::given(method("POST"))
        .and(path("/zones/zone-1/dns_records"))
        .and(header("authorization", "Bearer cf-token"))
        .and(body_partial_json(json!({"type": "A", "name": "home.example.com", "content": "203.0.113.5"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": true,
            "errors": [],
            "result": {"id": "rec-new"}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let record = RecordRef::new("example.com", "home", RecordType::A);
    let adapter = provider(&server);

    let missing = adapter.resolve_record(&token(), &record).await.unwrap_err();
    assert_eq!(missing.kind(), ErrorKind::RecordNotFound);

    let id = adapter
        .upsert_record(&token(), &record, "203.0.113.5", Some(600))
        .await
        .unwrap();
    assert_eq!(id, "rec-new");
}

#[tokio::test]
async fn differing_record_is_updated_in_place() {
    let server = MockServer::start().await;
    mount_zone(&server).await;
    mount_records(
        &server,
        json!([{"id": "rec-1", "type": "A", "name": "home.example.com", "content": "198.51.100.1", "ttl": 600}]),
    )
    .await;
    Mock::given(method("PUT"))
        .and(path("/zones/zone-1/dns_records/rec-1"))
        .and(body_partial_json(json!({"content": "203.0.113.5"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": true,
            "errors": [],
            "result": {"id": "rec-1"}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let record = RecordRef::new("example.com", "home", RecordType::A);
    let id = provider(&server)
        .upsert_record(&token(), &record, "203.0.113.5", None)
        .await
        .unwrap();

    assert_eq!(id, "rec-1");
}

async fn failing_zone_lookup(status: u16) -> ErrorKind {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/zones"))
        .respond_with(ResponseTemplate::new(status).set_body_string("nope"))
        .mount(&server)
        .await;

    let record = RecordRef::new("example.com", "home", RecordType::A);
    provider(&server)
        .upsert_record(&token(), &record, "203.0.113.5", None)
        .await
        .unwrap_err()
        .kind()
}

#[tokio::test]
async fn http_status_maps_onto_taxonomy() {
    assert_eq!(failing_zone_lookup(401).await, ErrorKind::AuthError);
    assert_eq!(failing_zone_lookup(403).await, ErrorKind::AuthError);
    assert_eq!(failing_zone_lookup(429).await, ErrorKind::RateLimited);
    assert_eq!(failing_zone_lookup(503).await, ErrorKind::ProviderUnavailable);
    assert_eq!(failing_zone_lookup(400).await, ErrorKind::ProviderRejected);
}

#[tokio::test]
async fn api_error_code_under_400_is_auth_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/user/tokens/verify"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "success": false,
            "errors": [{"code": 6003, "message": "Invalid request headers"}],
            "result": null
        })))
        .mount(&server)
        .await;

    let err = provider(&server).verify_credentials(&token()).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::AuthError);
}

#[tokio::test]
async fn global_key_uses_email_headers() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/user"))
        .and(header("x-auth-email", "ops@example.com"))
        .and(header("x-auth-key", "global-key"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": true,
            "errors": [],
            "result": {"id": "user-1"}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let credential = Credential::Cloudflare {
        api_token: "global-key".into(),
        account_email: Some("ops@example.com".into()),
    };
    provider(&server).verify_credentials(&credential).await.unwrap();
}

#[tokio::test]
async fn unreachable_endpoint_is_provider_unavailable() {
    // Nothing listens on the discard port
    let options = ProviderOptions::default().with_base_url("http://127.0.0.1:9");
    let adapter = CloudflareProvider::new(&options).unwrap();

    let err = adapter.verify_credentials(&token()).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ProviderUnavailable);
}
