//! Hub protocol codecs.
//!
//! A [`HubProtocol`] turns bytes read from a connection into
//! [`HubMessage`]s and back. Layers above the transport are written
//! against the trait, never against a concrete encoding.
//!
//! # Decoding contract
//!
//! ```text
//! parse_message(buf)
//!     ├── Ok(Message(msg))  one message decoded, its bytes removed from buf
//!     ├── Ok(Incomplete)    buf holds no complete message yet; read more, retry
//!     └── Err(e)            malformed input; the session cannot continue
//! ```
//!
//! Decoding is two-phase: the `type` envelope first, then the shape it
//! names.
//!
//! # Modules
//!
//! - [`messages`] - Message model
//! - [`json`] - JSON encoding (`0x1E`-terminated records)
//! - [`handshake`] - One-time protocol negotiation frames

pub mod handshake;
pub mod json;
pub mod messages;

use bytes::BytesMut;
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

pub use handshake::{HandshakeRequest, HandshakeResponse};
pub use json::JsonHubProtocol;
pub use messages::{
    CancelInvocationMessage, CloseMessage, Completion, CompletionMessage, HubMessage,
    InvocationIds, InvocationMessage, RawPayload, StreamInvocationMessage, StreamItemMessage,
};

/// Result of trying to decode one message.
#[derive(Debug, PartialEq)]
#[must_use]
pub enum ParseOutcome {
    /// A complete message was decoded and consumed.
    Message(HubMessage),
    /// More bytes are needed. Nothing was consumed.
    Incomplete,
}

/// Errors produced by hub protocol codecs.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// The bytes are not valid for the encoding.
    #[error("malformed message: {0}")]
    Malformed(#[from] serde_json::Error),
    /// The `type` discriminant names no known message.
    #[error("unknown message type {0}")]
    UnknownType(i64),
    /// An invocation named no target.
    #[error("invocation target must not be empty")]
    EmptyTarget,
    /// A completion carried both a result and an error.
    #[error("completion {invocation_id} carries both a result and an error")]
    ConflictingCompletion {
        /// Invocation the completion belongs to.
        invocation_id: String,
    },
    /// A payload is not encoded in this protocol's format.
    #[error("payload is not valid {protocol}")]
    ForeignPayload {
        /// Name of the protocol that rejected it.
        protocol: &'static str,
    },
}

/// Encoding-specific codec for hub messages.
///
/// Implementations are stateless with respect to the stream: all buffering
/// lives in the `BytesMut` the caller passes in.
pub trait HubProtocol: Send + Sync {
    /// Protocol name sent in the handshake (e.g. `"json"`).
    fn name(&self) -> &'static str;

    /// Protocol version sent in the handshake.
    fn version(&self) -> u32;

    /// Decode one message from the front of `buf`.
    ///
    /// On [`ParseOutcome::Message`] the message's bytes, framing included,
    /// are removed from `buf`. On [`ParseOutcome::Incomplete`] `buf` is left
    /// untouched.
    fn parse_message(&self, buf: &mut BytesMut) -> Result<ParseOutcome, ProtocolError>;

    /// Append one encoded message, framing included, to `sink`.
    fn write_message(&self, message: &HubMessage, sink: &mut BytesMut)
        -> Result<(), ProtocolError>;

    /// Decode a deferred value into the type a handler parameter expects.
    fn unmarshal_argument<T: DeserializeOwned>(
        &self,
        raw: &RawPayload,
    ) -> Result<T, ProtocolError>;

    /// Encode a value as a deferred payload.
    fn marshal_argument<T: Serialize + ?Sized>(&self, value: &T)
        -> Result<RawPayload, ProtocolError>;
}
