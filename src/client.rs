//! HTTP client helpers for opening an SSE hub connection.
//!
//! ```text
//! POST <hub>/negotiate           -> {"connectionId": "...", "availableTransports": [...]}
//! GET  <hub>?id=<connection id>  -> text/event-stream body
//! POST <hub>?id=<connection id>  -> one per outbound write (SseConnection)
//! ```
//!
//! [`connect`] runs the whole sequence from a [`Config`].

use bytes::Bytes;
use futures_util::stream::BoxStream;
use futures_util::{StreamExt, TryStreamExt};
use reqwest::header::ACCEPT;
use serde::Deserialize;
use thiserror::Error;
use tokio_util::io::StreamReader;
use url::Url;

use crate::config::Config;
use crate::connection::{
    parse_address, write_target_url, ConnectionError, ConnectionOptions, SseConnection,
};
use crate::constants::SSE_TRANSPORT;

/// Event-stream response body as an `AsyncRead`.
pub type EventStream = StreamReader<BoxStream<'static, std::io::Result<Bytes>>, Bytes>;

/// Errors while negotiating or opening the event stream.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The hub URL is unusable.
    #[error(transparent)]
    Address(#[from] ConnectionError),
    /// The hub URL cannot carry a path segment.
    #[error("cannot derive negotiate URL from {0}")]
    NegotiateUrl(String),
    /// HTTP request failed.
    #[error("{method} {url} failed: {source}")]
    Request {
        /// HTTP method.
        method: &'static str,
        /// Request URL.
        url: String,
        /// Transport failure.
        #[source]
        source: reqwest::Error,
    },
    /// Server returned an unexpected status code.
    #[error("{method} {url} -> {status}")]
    UnexpectedStatus {
        /// HTTP method.
        method: &'static str,
        /// Request URL.
        url: String,
        /// Response status.
        status: reqwest::StatusCode,
    },
    /// The server does not offer Server-Sent Events.
    #[error("server does not offer the ServerSentEvents transport")]
    TransportUnavailable,
}

/// Response to a negotiate request.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct NegotiateResponse {
    /// Server-assigned connection id.
    pub connection_id: String,
    /// Transports the server is willing to use.
    #[serde(default)]
    pub available_transports: Vec<AvailableTransport>,
}

impl NegotiateResponse {
    /// Returns true if the server offers Server-Sent Events.
    pub fn supports_sse(&self) -> bool {
        self.available_transports
            .iter()
            .any(|t| t.transport == SSE_TRANSPORT)
    }
}

/// One transport entry of a negotiate response.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AvailableTransport {
    /// Transport name, e.g. `"ServerSentEvents"`.
    pub transport: String,
    /// Supported transfer formats, e.g. `["Text"]`.
    #[serde(default)]
    pub transfer_formats: Vec<String>,
}

/// Build an HTTP client with the configured request timeout.
pub fn build_client(config: &Config) -> Result<reqwest::Client, ConnectionError> {
    reqwest::Client::builder()
        .timeout(config.request_timeout())
        .build()
        .map_err(ConnectionError::Client)
}

/// `<hub>/negotiate`, keeping the hub URL's query string.
pub fn negotiate_url(address: &str) -> Result<Url, ClientError> {
    let mut url = parse_address(address)?;
    url.path_segments_mut()
        .map_err(|()| ClientError::NegotiateUrl(address.to_string()))?
        .pop_if_empty()
        .push("negotiate");
    Ok(url)
}

/// Ask the hub for a connection id.
///
/// # Errors
///
/// Fails on transport errors, non-success status, an unparseable body, or
/// if the server does not list the `ServerSentEvents` transport.
pub async fn negotiate(
    client: &reqwest::Client,
    address: &str,
) -> Result<NegotiateResponse, ClientError> {
    let url = negotiate_url(address)?;
    log::debug!("[Client] Negotiating with {}", url);

    let request_error = |source| ClientError::Request {
        method: "POST",
        url: url.to_string(),
        source,
    };

    let response = client
        .post(url.clone())
        .send()
        .await
        .map_err(request_error)?;

    if !response.status().is_success() {
        return Err(ClientError::UnexpectedStatus {
            method: "POST",
            url: url.to_string(),
            status: response.status(),
        });
    }

    let negotiated: NegotiateResponse = response.json().await.map_err(request_error)?;
    if !negotiated.supports_sse() {
        return Err(ClientError::TransportUnavailable);
    }

    log::info!("[Client] Negotiated connection {}", negotiated.connection_id);
    Ok(negotiated)
}

/// Open the event stream for `connection_id`.
///
/// The returned reader yields the raw `text/event-stream` body; hand it to
/// [`SseConnection`] to extract payloads.
pub async fn open_event_stream(
    client: &reqwest::Client,
    address: &str,
    connection_id: &str,
) -> Result<EventStream, ClientError> {
    let url = write_target_url(address, connection_id)?;
    log::debug!("[Client] Opening event stream {}", url);

    let response = client
        .get(url.clone())
        .header(ACCEPT, "text/event-stream")
        .send()
        .await
        .map_err(|source| ClientError::Request {
            method: "GET",
            url: url.to_string(),
            source,
        })?;

    if !response.status().is_success() {
        return Err(ClientError::UnexpectedStatus {
            method: "GET",
            url: url.to_string(),
            status: response.status(),
        });
    }

    let body = response.bytes_stream().map_err(std::io::Error::other).boxed();
    Ok(StreamReader::new(body))
}

/// Negotiate (unless `config` fixes a connection id), open the event stream,
/// and build the connection.
pub async fn connect(config: &Config) -> Result<SseConnection, ClientError> {
    let client = build_client(config)?;

    let connection_id = match &config.connection_id {
        Some(id) => id.clone(),
        None => negotiate(&client, &config.server_url).await?.connection_id,
    };

    let events = open_event_stream(&client, &config.server_url, &connection_id).await?;
    let options = ConnectionOptions {
        pipe_capacity: config.pipe_capacity,
        ..ConnectionOptions::default()
    };
    Ok(SseConnection::with_client(
        client,
        &config.server_url,
        &connection_id,
        events,
        options,
    )?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_negotiate_url() {
        let url = negotiate_url("http://localhost:5000/chat").unwrap();
        assert_eq!(url.as_str(), "http://localhost:5000/chat/negotiate");
    }

    #[test]
    fn test_negotiate_url_trailing_slash_and_query() {
        let url = negotiate_url("http://localhost:5000/chat/?tenant=blue").unwrap();
        assert_eq!(url.as_str(), "http://localhost:5000/chat/negotiate?tenant=blue");
    }

    #[test]
    fn test_negotiate_response_transports() {
        let response: NegotiateResponse = serde_json::from_str(
            r#"{
                "connectionId": "abc",
                "availableTransports": [
                    {"transport": "WebSockets", "transferFormats": ["Text", "Binary"]},
                    {"transport": "ServerSentEvents", "transferFormats": ["Text"]}
                ]
            }"#,
        )
        .unwrap();
        assert_eq!(response.connection_id, "abc");
        assert!(response.supports_sse());

        let response: NegotiateResponse =
            serde_json::from_str(r#"{"connectionId": "abc"}"#).unwrap();
        assert!(!response.supports_sse());
    }
}
