//! Handshake frames.
//!
//! Sent once per connection before any hub message. Both frames are JSON
//! records terminated by `0x1E`, whatever protocol is being negotiated.
//!
//! ```text
//! client: {"protocol":"json","version":1}\x1e
//! server: {}\x1e                       accepted
//! server: {"error":"..."}\x1e          rejected
//! ```

use bytes::BytesMut;
use serde::{Deserialize, Serialize};

use super::json::{take_record, write_record};
use super::{HubProtocol, ProtocolError};

/// Client's protocol proposal.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandshakeRequest {
    /// Protocol name, e.g. `"json"`.
    pub protocol: String,
    /// Protocol version.
    pub version: u32,
}

impl HandshakeRequest {
    /// Request for the given codec.
    pub fn for_protocol<P: HubProtocol>(protocol: &P) -> Self {
        Self {
            protocol: protocol.name().to_string(),
            version: protocol.version(),
        }
    }
}

/// Server's answer to a [`HandshakeRequest`].
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandshakeResponse {
    /// Rejection reason; absent when accepted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl HandshakeResponse {
    /// Response rejecting the handshake.
    pub fn rejected(error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
        }
    }

    /// Returns true if the server accepted the proposed protocol.
    pub fn is_accepted(&self) -> bool {
        self.error.as_deref().map_or(true, str::is_empty)
    }
}

/// Append an encoded handshake request to `sink`.
pub fn write_handshake_request(
    request: &HandshakeRequest,
    sink: &mut BytesMut,
) -> Result<(), ProtocolError> {
    write_record(request, sink)
}

/// Decode a handshake request from the front of `buf`.
///
/// Returns `Ok(None)` if the frame is not complete yet.
#[cfg(test)]
fn parse_handshake_request(
    buf: &mut BytesMut,
) -> Result<Option<HandshakeRequest>, ProtocolError> {
    take_record(buf)
        .map(|record| serde_json::from_slice(&record).map_err(ProtocolError::from))
        .transpose()
}

/// Append an encoded handshake response to `sink`.
#[cfg(test)]
fn write_handshake_response(
    response: &HandshakeResponse,
    sink: &mut BytesMut,
) -> Result<(), ProtocolError> {
    write_record(response, sink)
}

/// Decode a handshake response from the front of `buf`.
///
/// Returns `Ok(None)` if the frame is not complete yet. Bytes after the
/// frame stay in `buf`.
pub fn parse_handshake_response(
    buf: &mut BytesMut,
) -> Result<Option<HandshakeResponse>, ProtocolError> {
    take_record(buf)
        .map(|record| serde_json::from_slice(&record).map_err(ProtocolError::from))
        .transpose()
}
