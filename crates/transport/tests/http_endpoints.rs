//! Loopback and base-URL endpoints, served by wiremock.

use std::io::IsTerminal;

use futures::StreamExt;
use serde_json::json;
use tracing_subscriber::EnvFilter;
use transport::{Configuration, Credential, Endpoint, Request, TransportError};
use wiremock::matchers::{body_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

// test suite "constructor"
#[ctor::ctor]
fn init() {
    let in_ci = std::env::var("CI")
        .map(|val| val == "true")
        .unwrap_or(false);

    if std::io::stderr().is_terminal() || in_ci {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .try_init();
    } else {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .json()
            .try_init();
    }

    // error traces
    let _ = color_eyre::install();
}

fn loopback(server: &MockServer) -> Endpoint {
    let address = server.address();
    Endpoint::loopback(address.ip().to_string(), address.port())
}

#[tokio::test]
async fn loopback_request_carries_local_api_headers() -> eyre::Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/localapi/v0/status"))
        .and(query_param("peers", "false"))
        .and(header("Tailscale-Cap", "115"))
        .and(header("Authorization", "Basic OnNlY3JldA=="))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"BackendState": "Running"})),
        )
        .expect(1)
        .mount(&server)
        .await;

    let config = Configuration::new(loopback(&server)).with_credential(Credential::new("secret"));
    let response = config
        .send(&Request::get("/localapi/v0/status").query("peers", "false"))
        .await?;

    assert_eq!(response.status(), 200);
    assert_eq!(response.headers().get("content-type"), Some("application/json"));
    let body: serde_json::Value = serde_json::from_slice(response.body())?;
    assert_eq!(body["BackendState"], "Running");
    Ok(())
}

#[tokio::test]
async fn base_url_keeps_its_path_prefix() -> eyre::Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("PATCH"))
        .and(path("/proxy/localapi/v0/prefs"))
        .and(header("content-type", "application/json"))
        .and(body_json(json!({"ShieldsUp": true})))
        .respond_with(ResponseTemplate::new(200).set_body_string("{}"))
        .expect(1)
        .mount(&server)
        .await;

    let config = Configuration::new(Endpoint::base_url(format!("{}/proxy", server.uri())))
        .with_capability_version(7);
    let request = Request::patch("/localapi/v0/prefs").json_body(&json!({"ShieldsUp": true}))?;
    let response = config.send(&request).await?;

    assert_eq!(response.body().as_ref(), b"{}");
    Ok(())
}

#[tokio::test]
async fn status_codes_are_passed_through() -> eyre::Result<()> {
    let server = MockServer::start().await;
    Mock::given(path("/localapi/v0/whois"))
        .respond_with(ResponseTemplate::new(404).set_body_string("no match for IP:port"))
        .mount(&server)
        .await;

    let response = Configuration::new(loopback(&server))
        .send(&Request::get("/localapi/v0/whois").query("addr", "100.64.0.9:22"))
        .await?;

    assert_eq!(response.status(), 404);
    assert_eq!(response.body().as_ref(), b"no match for IP:port");
    Ok(())
}

#[tokio::test]
async fn streaming_over_loopback() -> eyre::Result<()> {
    let server = MockServer::start().await;
    Mock::given(path("/localapi/v0/watch-ipn-bus"))
        .respond_with(ResponseTemplate::new(200).set_body_string("{\"a\":1}\n\n{\"b\":2}\n"))
        .mount(&server)
        .await;

    let events: Vec<_> = Configuration::new(loopback(&server))
        .send_streaming(&Request::get("/localapi/v0/watch-ipn-bus"))
        .await?
        .collect()
        .await;

    let lines: Vec<_> = events.into_iter().collect::<Result<_, _>>()?;
    assert_eq!(lines, vec![r#"{"a":1}"#, r#"{"b":2}"#]);
    Ok(())
}

#[tokio::test]
async fn streaming_error_status() -> eyre::Result<()> {
    let server = MockServer::start().await;
    Mock::given(path("/localapi/v0/watch-ipn-bus"))
        .respond_with(ResponseTemplate::new(403))
        .mount(&server)
        .await;

    let result = Configuration::new(loopback(&server))
        .send_streaming(&Request::get("/localapi/v0/watch-ipn-bus"))
        .await;

    assert!(matches!(result, Err(TransportError::MalformedResponse(msg)) if msg.contains("403")));
    Ok(())
}

#[tokio::test]
async fn closed_port_is_a_network_failure() -> eyre::Result<()> {
    let port = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0")?;
        listener.local_addr()?.port()
    };

    let err = Configuration::new(Endpoint::loopback("127.0.0.1", port))
        .send(&Request::get("/localapi/v0/status"))
        .await
        .unwrap_err();

    match err {
        TransportError::NetworkFailure { endpoint, .. } => {
            assert_eq!(endpoint, format!("http://127.0.0.1:{port}"));
        }
        other => panic!("expected NetworkFailure, got {other:?}"),
    }
    Ok(())
}

#[tokio::test]
async fn unusable_base_url() {
    let err = Configuration::new(Endpoint::base_url("mailto:someone@example.com"))
        .send(&Request::get("/localapi/v0/status"))
        .await
        .unwrap_err();

    assert!(matches!(err, TransportError::InvalidEndpoint(_)), "{err:?}");
}
