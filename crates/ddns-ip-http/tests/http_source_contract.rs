//! Behavioural Contract Test: HTTP IP Source
//!
//! Constraints verified:
//! - Endpoints are tried in order; the first valid answer wins
//! - Answers of the wrong family are rejected, not returned
//! - Every request identifies itself with the DDNS user agent

use ddns_core::model::IpFamily;
use ddns_core::{ErrorKind, IpSource};
use ddns_ip_http::HttpIpSource;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[tokio::test]
async fn falls_through_to_next_endpoint() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/broken"))
        .respond_with(ResponseTemplate::new(503))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/ip"))
        .and(header("user-agent", "DDNS-Tool/1.0"))
        .respond_with(ResponseTemplate::new(200).set_body_string("203.0.113.5\n"))
        .expect(1)
        .mount(&server)
        .await;

    let source = HttpIpSource::with_endpoints(
        vec![format!("{}/broken", server.uri()), format!("{}/ip", server.uri())],
        vec![],
    )
    .unwrap();

    let ip = source.detect(IpFamily::V4).await.unwrap();
    assert_eq!(ip.to_string(), "203.0.113.5");
}

#[tokio::test]
async fn wrong_family_is_rejected() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string("203.0.113.5"))
        .mount(&server)
        .await;

    let source = HttpIpSource::with_endpoints(vec![], vec![server.uri()]).unwrap();

    let err = source.detect(IpFamily::V6).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::DetectionExhausted);
    assert!(err.to_string().contains("expected ipv6"), "{}", err);
}

#[tokio::test]
async fn garbage_body_is_an_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>rate limited</html>"))
        .mount(&server)
        .await;

    let source = HttpIpSource::with_endpoints(vec![server.uri()], vec![]).unwrap();

    assert!(source.detect(IpFamily::V4).await.is_err());
}

#[tokio::test]
async fn ipv6_answer_is_returned() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string("2001:db8::42"))
        .mount(&server)
        .await;

    let source = HttpIpSource::with_endpoints(vec![], vec![server.uri()]).unwrap();

    let ip = source.detect(IpFamily::V6).await.unwrap();
    assert_eq!(ip.to_string(), "2001:db8::42");
}
