//! Duplex connection over Server-Sent Events plus HTTP POST.
//!
//! An event stream only carries data server → client. `SseConnection`
//! pairs it with one POST per outbound write so that higher layers see a
//! single read/write byte stream.
//!
//! # Architecture
//!
//! ```text
//! SseConnection
//!   ├── read side:  pipe reader  <── pump task <── event stream (data: lines)
//!   └── write side: POST <address>?id=<connection id>  (one request per write)
//! ```
//!
//! The pump task is the only producer into the pipe and exclusively owns
//! the event stream. Reads and writes share nothing, so a write may run
//! concurrently with a pending read. Concurrent writes are not ordered
//! relative to each other.
//!
//! # Lifecycle
//!
//! Created once per session. The pump stops when the event stream ends,
//! when [`SseConnection::close`] is called, or when the connection is
//! dropped. Readers then see end-of-stream.

// Rust guideline compliant 2026-01

use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use reqwest::StatusCode;
use thiserror::Error;
use tokio::io::{AsyncRead, DuplexStream, ReadBuf};
use tokio::task::JoinHandle;
use tokio_util::sync::{CancellationToken, DropGuard};
use url::Url;

use crate::constants::{CONNECTION_ID_PARAM, HTTP_REQUEST_TIMEOUT, PIPE_CAPACITY};
use crate::sse::{self, PumpExit};

/// Errors raised while constructing a connection.
#[derive(Debug, Error)]
pub enum ConnectionError {
    /// The base address could not be parsed as a URL.
    #[error("invalid address {address:?}: {source}")]
    InvalidAddress {
        /// The address as given.
        address: String,
        /// Parser error.
        #[source]
        source: url::ParseError,
    },
    /// The address parsed but is not an http(s) URL.
    #[error("unsupported address {0:?}: expected an http or https URL")]
    UnsupportedScheme(String),
    /// The default HTTP client could not be built.
    #[error("failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),
}

/// Errors raised by [`SseConnection::write`].
///
/// Both variants carry the byte count the caller asked to write, which is
/// what [`WriteError::len`] reports.
#[derive(Debug, Error)]
pub enum WriteError {
    /// The server answered with a status other than 200.
    #[error("POST {url} -> {status}")]
    Status {
        /// Write-target URL.
        url: String,
        /// Response status.
        status: StatusCode,
        /// Length of the rejected body.
        len: usize,
    },
    /// The request could not be issued or no response arrived.
    #[error("POST {url} -> {source}")]
    Request {
        /// Write-target URL.
        url: String,
        /// Length of the body that failed to send.
        len: usize,
        /// Transport failure.
        #[source]
        source: reqwest::Error,
    },
}

impl WriteError {
    /// Number of bytes the failed write attempted to send.
    pub fn len(&self) -> usize {
        match self {
            Self::Status { len, .. } | Self::Request { len, .. } => *len,
        }
    }

    /// Returns true if the failed write carried an empty body.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Tuning knobs for [`SseConnection::with_client`].
#[derive(Debug, Clone)]
pub struct ConnectionOptions {
    /// Bytes the pipe buffers before the pump stalls.
    pub pipe_capacity: usize,
    /// Parent cancellation scope. The connection runs under a child token,
    /// so cancelling the parent closes every connection created from it.
    pub cancel: Option<CancellationToken>,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            pipe_capacity: PIPE_CAPACITY,
            cancel: None,
        }
    }
}

/// Parse a hub address, accepting only http(s) URLs.
pub fn parse_address(address: &str) -> Result<Url, ConnectionError> {
    let url = Url::parse(address).map_err(|source| ConnectionError::InvalidAddress {
        address: address.to_string(),
        source,
    })?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(ConnectionError::UnsupportedScheme(address.to_string()));
    }
    Ok(url)
}

/// Build the write-target URL for a connection.
///
/// `id=<connection_id>` goes first, followed by the address's other query
/// pairs in their original order. An `id` already present in the address
/// is replaced.
pub fn write_target_url(address: &str, connection_id: &str) -> Result<Url, ConnectionError> {
    let mut url = parse_address(address)?;

    let existing: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(key, _)| key != CONNECTION_ID_PARAM)
        .map(|(key, value)| (key.into_owned(), value.into_owned()))
        .collect();

    {
        let mut pairs = url.query_pairs_mut();
        pairs.clear().append_pair(CONNECTION_ID_PARAM, connection_id);
        for (key, value) in &existing {
            pairs.append_pair(key, value);
        }
    }

    Ok(url)
}

/// Bidirectional byte stream over an event stream and HTTP POSTs.
///
/// Reading goes through [`AsyncRead`]: the bytes are the payloads of the
/// event stream's `data:` lines, in arrival order. Writing goes through
/// [`SseConnection::write`], one POST per call.
pub struct SseConnection {
    /// Caller-supplied connection id.
    connection_id: String,
    /// Base address as given at construction.
    address: String,
    /// Write-target URL, fixed at construction.
    url: Url,
    /// Shared HTTP client for outbound writes.
    client: reqwest::Client,
    /// Consumer end of the pipe fed by the pump.
    reader: DuplexStream,
    /// Session cancellation scope.
    cancel: CancellationToken,
    /// Cancels the pump when the connection is dropped.
    _cancel_on_drop: DropGuard,
    /// Pump task handle.
    pump: JoinHandle<PumpExit>,
}

impl std::fmt::Debug for SseConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SseConnection")
            .field("connection_id", &self.connection_id)
            .field("url", &self.url.as_str())
            .finish_non_exhaustive()
    }
}

impl SseConnection {
    /// Create a connection over an already-open event stream.
    ///
    /// Builds its own HTTP client with [`HTTP_REQUEST_TIMEOUT`] and spawns
    /// the pump on the current tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectionError::InvalidAddress`] if `address` is not a
    /// valid URL.
    ///
    /// # Panics
    ///
    /// Panics if called outside a tokio runtime.
    pub fn new<R>(address: &str, connection_id: &str, source: R) -> Result<Self, ConnectionError>
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        let client = reqwest::Client::builder()
            .timeout(HTTP_REQUEST_TIMEOUT)
            .build()
            .map_err(ConnectionError::Client)?;
        Self::with_client(
            client,
            address,
            connection_id,
            source,
            ConnectionOptions::default(),
        )
    }

    /// Create a connection that writes through a shared HTTP client.
    ///
    /// Use this to pool outbound connections across sessions or to apply
    /// custom timeouts.
    ///
    /// # Panics
    ///
    /// Panics if called outside a tokio runtime.
    pub fn with_client<R>(
        client: reqwest::Client,
        address: &str,
        connection_id: &str,
        source: R,
        options: ConnectionOptions,
    ) -> Result<Self, ConnectionError>
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        let url = write_target_url(address, connection_id)?;
        let cancel = options
            .cancel
            .map_or_else(CancellationToken::new, |parent| parent.child_token());

        let (sink, reader) = tokio::io::duplex(options.pipe_capacity);
        let pump = tokio::spawn(sse::pump(source, sink, cancel.clone()));

        log::info!(
            "[Connection] Opened {} (writes to {})",
            connection_id,
            url
        );

        Ok(Self {
            connection_id: connection_id.to_string(),
            address: address.to_string(),
            url,
            client,
            reader,
            _cancel_on_drop: cancel.clone().drop_guard(),
            cancel,
            pump,
        })
    }

    /// Connection id this connection was created with.
    pub fn connection_id(&self) -> &str {
        &self.connection_id
    }

    /// Base address as given at construction.
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Write-target URL (`address` with the `id` parameter).
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Returns true once the pump has stopped forwarding.
    ///
    /// Bytes already in the pipe can still be read.
    pub fn is_finished(&self) -> bool {
        self.pump.is_finished()
    }

    /// Cancellation token scoping this connection.
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Stop the pump and release the event stream.
    ///
    /// Pending and future reads return end-of-stream once buffered bytes
    /// are drained. Writes keep working; the server decides what a POST on
    /// a closed session means.
    pub fn close(&self) {
        log::debug!("[Connection] Closing {}", self.connection_id);
        self.cancel.cancel();
    }

    /// Send `buf` to the server as the body of one POST request.
    ///
    /// Returns `buf.len()` on HTTP 200.
    ///
    /// # Errors
    ///
    /// Returns [`WriteError::Status`] for any other status and
    /// [`WriteError::Request`] if the request could not be completed.
    pub async fn write(&self, buf: &[u8]) -> Result<usize, WriteError> {
        let len = buf.len();
        let response = self
            .client
            .post(self.url.clone())
            .body(Bytes::copy_from_slice(buf))
            .send()
            .await
            .map_err(|source| WriteError::Request {
                url: self.url.to_string(),
                len,
                source,
            })?;

        let status = response.status();
        if status != StatusCode::OK {
            log::warn!("[Connection] POST {} -> {}", self.url, status);
            return Err(WriteError::Status {
                url: self.url.to_string(),
                status,
                len,
            });
        }

        log::trace!("[Connection] Wrote {} bytes for {}", len, self.connection_id);
        Ok(len)
    }
}

impl AsyncRead for SseConnection {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.get_mut().reader).poll_read(cx, buf)
    }
}
