//! Message-level session over an [`SseConnection`].
//!
//! The connection moves bytes; the session turns them into hub messages.
//! It owns the accumulation buffer that the codec's incomplete/retry
//! contract needs: read a chunk, try to parse, read more if incomplete.
//!
//! ```text
//! HubSession
//!   ├── handshake()      {"protocol":"json","version":1}\x1e  ->  {}\x1e
//!   ├── send(msg)        encode -> one POST
//!   └── next_message()   read chunks into buffer -> parse_message
//! ```

// Rust guideline compliant 2026-01

use bytes::BytesMut;
use thiserror::Error;
use tokio::io::AsyncReadExt;

use crate::connection::{SseConnection, WriteError};
use crate::constants::SSE_READ_CHUNK;
use crate::protocol::handshake::{parse_handshake_response, write_handshake_request};
use crate::protocol::{
    HandshakeRequest, HubMessage, HubProtocol, InvocationIds, InvocationMessage, ParseOutcome,
    ProtocolError, RawPayload, StreamInvocationMessage,
};

/// Errors raised by a [`HubSession`].
#[derive(Debug, Error)]
pub enum SessionError {
    /// Reading from the connection failed.
    #[error("read failed: {0}")]
    Read(#[from] std::io::Error),
    /// Writing to the connection failed.
    #[error(transparent)]
    Write(#[from] WriteError),
    /// Encoding or decoding failed. Fatal for the session.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    /// The server refused the handshake.
    #[error("handshake rejected: {0}")]
    HandshakeRejected(String),
    /// The stream ended before the handshake response arrived.
    #[error("connection closed during handshake")]
    HandshakeIncomplete,
    /// The stream ended in the middle of a message.
    #[error("connection closed with {0} bytes of a partial message buffered")]
    Truncated(usize),
}

/// Hub message session bound to one connection and one codec.
#[derive(Debug)]
pub struct HubSession<P> {
    connection: SseConnection,
    protocol: P,
    buffer: BytesMut,
    ids: InvocationIds,
}

impl<P: HubProtocol> HubSession<P> {
    /// Wrap a connection. No bytes are exchanged until [`handshake`](Self::handshake).
    pub fn new(connection: SseConnection, protocol: P) -> Self {
        Self {
            connection,
            protocol,
            buffer: BytesMut::with_capacity(SSE_READ_CHUNK),
            ids: InvocationIds::new(),
        }
    }

    /// Codec this session encodes with.
    pub fn protocol(&self) -> &P {
        &self.protocol
    }

    /// Underlying connection.
    pub fn connection(&self) -> &SseConnection {
        &self.connection
    }

    /// Propose this session's protocol and wait for the server's answer.
    ///
    /// Bytes that arrive after the handshake response stay buffered and are
    /// returned by [`next_message`](Self::next_message).
    pub async fn handshake(&mut self) -> Result<(), SessionError> {
        let request = HandshakeRequest::for_protocol(&self.protocol);
        let mut out = BytesMut::new();
        write_handshake_request(&request, &mut out)?;
        self.connection.write(&out).await?;
        log::debug!(
            "[Session] Sent handshake {} v{} on {}",
            request.protocol,
            request.version,
            self.connection.connection_id()
        );

        loop {
            if let Some(response) = parse_handshake_response(&mut self.buffer)? {
                if response.is_accepted() {
                    log::info!("[Session] Handshake accepted on {}", self.connection.connection_id());
                    return Ok(());
                }
                let reason = response.error.unwrap_or_default();
                log::warn!("[Session] Handshake rejected: {}", reason);
                return Err(SessionError::HandshakeRejected(reason));
            }
            if !self.fill().await? {
                return Err(SessionError::HandshakeIncomplete);
            }
        }
    }

    /// Encode and send one message.
    pub async fn send(&self, message: &HubMessage) -> Result<(), SessionError> {
        let mut out = BytesMut::new();
        self.protocol.write_message(message, &mut out)?;
        self.connection.write(&out).await?;
        Ok(())
    }

    /// Invoke `target` and expect a completion. Returns the invocation id.
    pub async fn invoke(
        &self,
        target: &str,
        arguments: Vec<RawPayload>,
    ) -> Result<String, SessionError> {
        let id = self.ids.next_id();
        let message = InvocationMessage::new(target, arguments).with_invocation_id(id.clone());
        self.send(&HubMessage::Invocation(message)).await?;
        Ok(id)
    }

    /// Invoke `target` without expecting a completion.
    pub async fn notify(&self, target: &str, arguments: Vec<RawPayload>) -> Result<(), SessionError> {
        self.send(&HubMessage::Invocation(InvocationMessage::new(target, arguments)))
            .await
    }

    /// Start a streaming invocation. Returns the invocation id its stream
    /// items and completion will carry.
    pub async fn stream(
        &self,
        target: &str,
        arguments: Vec<RawPayload>,
    ) -> Result<String, SessionError> {
        let id = self.ids.next_id();
        let message = StreamInvocationMessage {
            invocation_id: id.clone(),
            target: target.to_string(),
            arguments,
            stream_ids: Vec::new(),
        };
        self.send(&HubMessage::StreamInvocation(message)).await?;
        Ok(id)
    }

    /// Next message from the server.
    ///
    /// Returns `Ok(None)` once the stream has ended cleanly.
    pub async fn next_message(&mut self) -> Result<Option<HubMessage>, SessionError> {
        loop {
            match self.protocol.parse_message(&mut self.buffer)? {
                ParseOutcome::Message(message) => return Ok(Some(message)),
                ParseOutcome::Incomplete => {}
            }
            if !self.fill().await? {
                if self.buffer.is_empty() {
                    log::debug!("[Session] Stream ended on {}", self.connection.connection_id());
                    return Ok(None);
                }
                return Err(SessionError::Truncated(self.buffer.len()));
            }
        }
    }

    /// Close the underlying connection.
    pub fn close(&self) {
        self.connection.close();
    }

    /// Read one chunk into the buffer. Returns false at end of stream.
    async fn fill(&mut self) -> Result<bool, SessionError> {
        self.buffer.reserve(SSE_READ_CHUNK);
        let n = self.connection.read_buf(&mut self.buffer).await?;
        Ok(n > 0)
    }
}
