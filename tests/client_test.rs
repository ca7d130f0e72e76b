//! Integration tests for negotiate, event-stream opening, and `connect`.

use hub_sse::client::{self, ClientError};
use hub_sse::protocol::HubMessage;
use hub_sse::{Config, HubSession, JsonHubProtocol};
use tokio::io::AsyncReadExt;
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const NEGOTIATE_BODY: &str = r#"{
    "connectionId": "neg-1",
    "availableTransports": [
        {"transport": "ServerSentEvents", "transferFormats": ["Text"]}
    ]
}"#;

fn event_stream(body: &'static [u8]) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_raw(body, "text/event-stream")
}

fn config_for(server: &MockServer) -> Config {
    Config {
        server_url: format!("{}/hub", server.uri()),
        ..Config::default()
    }
}

#[tokio::test]
async fn test_negotiate_returns_connection_id() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/hub/negotiate"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(NEGOTIATE_BODY, "application/json"))
        .expect(1)
        .mount(&server)
        .await;

    let http = reqwest::Client::new();
    let response = client::negotiate(&http, &format!("{}/hub", server.uri()))
        .await
        .unwrap();
    assert_eq!(response.connection_id, "neg-1");
    assert!(response.supports_sse());
}

#[tokio::test]
async fn test_negotiate_without_sse_transport() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/hub/negotiate"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(
            r#"{"connectionId":"x","availableTransports":[{"transport":"WebSockets"}]}"#,
            "application/json",
        ))
        .mount(&server)
        .await;

    let http = reqwest::Client::new();
    let err = client::negotiate(&http, &format!("{}/hub", server.uri()))
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::TransportUnavailable));
}

#[tokio::test]
async fn test_negotiate_bad_status() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let http = reqwest::Client::new();
    let err = client::negotiate(&http, &format!("{}/hub", server.uri()))
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::UnexpectedStatus { .. }));
    assert!(err.to_string().contains("401"));
}

#[tokio::test]
async fn test_open_event_stream_sends_accept_and_id() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/hub"))
        .and(query_param("id", "c-9"))
        .and(header("accept", "text/event-stream"))
        .respond_with(event_stream(b"data: hi\n\n"))
        .expect(1)
        .mount(&server)
        .await;

    let http = reqwest::Client::new();
    let mut events = client::open_event_stream(&http, &format!("{}/hub", server.uri()), "c-9")
        .await
        .unwrap();

    let mut body = Vec::new();
    events.read_to_end(&mut body).await.unwrap();
    assert_eq!(body, b"data: hi\n\n");
}

#[tokio::test]
async fn test_open_event_stream_rejects_bad_address() {
    let http = reqwest::Client::new();
    let err = client::open_event_stream(&http, "ftp://example.com/hub", "c")
        .await
        .err()
        .unwrap();
    assert!(matches!(err, ClientError::Address(_)));
}

#[tokio::test]
async fn test_connect_negotiates_then_streams() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/hub/negotiate"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(NEGOTIATE_BODY, "application/json"))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/hub"))
        .and(query_param("id", "neg-1"))
        .respond_with(event_stream(
            b": hello\n\ndata: {}\x1e\n\ndata: {\"type\":6}\x1e\n\ndata: {\"type\":7}\x1e\n\n",
        ))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/hub"))
        .and(query_param("id", "neg-1"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let conn = client::connect(&config_for(&server)).await.unwrap();
    assert_eq!(conn.connection_id(), "neg-1");

    let mut session = HubSession::new(conn, JsonHubProtocol::new());
    session.handshake().await.unwrap();
    assert_eq!(session.next_message().await.unwrap(), Some(HubMessage::Ping));
    assert!(matches!(
        session.next_message().await.unwrap(),
        Some(HubMessage::Close(_))
    ));
    assert_eq!(session.next_message().await.unwrap(), None);
}

#[tokio::test]
async fn test_connect_with_fixed_id_skips_negotiate() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/hub/negotiate"))
        .respond_with(ResponseTemplate::new(500))
        .expect(0)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(query_param("id", "fixed"))
        .respond_with(event_stream(b"data: ok\n"))
        .mount(&server)
        .await;

    let config = Config {
        connection_id: Some("fixed".to_string()),
        ..config_for(&server)
    };
    let mut conn = client::connect(&config).await.unwrap();

    let mut body = Vec::new();
    conn.read_to_end(&mut body).await.unwrap();
    assert_eq!(body, b"ok");
}
