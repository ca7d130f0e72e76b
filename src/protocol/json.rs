//! JSON hub protocol.
//!
//! Each message is one JSON object followed by the ASCII record separator:
//!
//! ```text
//! {"type":1,"target":"Send","arguments":["hi"]}\x1e{"type":6}\x1e
//! ```
//!
//! JSON strings cannot contain a raw `0x1E`, so the separator is an
//! unambiguous frame boundary. Arguments, results, and stream items are
//! kept as raw JSON text and only decoded on request.

use bytes::{BufMut, Bytes, BytesMut};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;

use super::messages::{
    message_type, CancelInvocationMessage, CloseMessage, Completion, CompletionMessage,
    HubMessage, InvocationMessage, RawPayload, StreamInvocationMessage, StreamItemMessage,
};
use super::{HubProtocol, ParseOutcome, ProtocolError};
use crate::constants::RECORD_SEPARATOR;

/// Protocol name announced in the handshake.
const PROTOCOL_NAME: &str = "json";

/// Protocol version announced in the handshake.
const PROTOCOL_VERSION: u32 = 1;

/// JSON encoding of the hub protocol.
#[derive(Clone, Copy, Debug, Default)]
pub struct JsonHubProtocol;

impl JsonHubProtocol {
    /// Create the codec.
    pub fn new() -> Self {
        Self
    }
}

impl HubProtocol for JsonHubProtocol {
    fn name(&self) -> &'static str {
        PROTOCOL_NAME
    }

    fn version(&self) -> u32 {
        PROTOCOL_VERSION
    }

    fn parse_message(&self, buf: &mut BytesMut) -> Result<ParseOutcome, ProtocolError> {
        let Some(record) = take_record(buf) else {
            return Ok(ParseOutcome::Incomplete);
        };
        decode_message(&record).map(ParseOutcome::Message)
    }

    fn write_message(
        &self,
        message: &HubMessage,
        sink: &mut BytesMut,
    ) -> Result<(), ProtocolError> {
        match message {
            HubMessage::Invocation(m) => write_record(
                &InvocationOut {
                    kind: message_type::INVOCATION,
                    invocation_id: m.invocation_id.as_deref(),
                    target: &m.target,
                    arguments: raw_all(&m.arguments)?,
                    stream_ids: non_empty(&m.stream_ids),
                },
                sink,
            ),
            HubMessage::StreamInvocation(m) => write_record(
                &InvocationOut {
                    kind: message_type::STREAM_INVOCATION,
                    invocation_id: Some(&m.invocation_id),
                    target: &m.target,
                    arguments: raw_all(&m.arguments)?,
                    stream_ids: non_empty(&m.stream_ids),
                },
                sink,
            ),
            HubMessage::StreamItem(m) => write_record(
                &StreamItemOut {
                    kind: message_type::STREAM_ITEM,
                    invocation_id: &m.invocation_id,
                    item: raw(&m.item)?,
                },
                sink,
            ),
            HubMessage::Completion(m) => {
                let (result, error) = match &m.completion {
                    Completion::Void => (None, None),
                    Completion::Result(value) => (Some(raw(value)?), None),
                    Completion::Error(error) => (None, Some(error.as_str())),
                };
                write_record(
                    &CompletionOut {
                        kind: message_type::COMPLETION,
                        invocation_id: &m.invocation_id,
                        result,
                        error,
                    },
                    sink,
                )
            }
            HubMessage::CancelInvocation(m) => write_record(
                &CancelOut {
                    kind: message_type::CANCEL_INVOCATION,
                    invocation_id: &m.invocation_id,
                },
                sink,
            ),
            HubMessage::Ping => write_record(
                &PingOut {
                    kind: message_type::PING,
                },
                sink,
            ),
            HubMessage::Close(m) => write_record(
                &CloseOut {
                    kind: message_type::CLOSE,
                    error: m.error.as_deref(),
                    allow_reconnect: m.allow_reconnect,
                },
                sink,
            ),
        }
    }

    fn unmarshal_argument<T: DeserializeOwned>(
        &self,
        raw: &RawPayload,
    ) -> Result<T, ProtocolError> {
        Ok(serde_json::from_slice(raw.as_bytes())?)
    }

    fn marshal_argument<T: Serialize + ?Sized>(
        &self,
        value: &T,
    ) -> Result<RawPayload, ProtocolError> {
        Ok(RawPayload::new(serde_json::to_vec(value)?))
    }
}

/// Split one `0x1E`-terminated record off the front of `buf`.
///
/// Returns the record without its terminator, or `None` (leaving `buf`
/// untouched) if no terminator is buffered yet.
pub(crate) fn take_record(buf: &mut BytesMut) -> Option<BytesMut> {
    let end = buf.iter().position(|b| *b == RECORD_SEPARATOR)?;
    let mut record = buf.split_to(end + 1);
    record.truncate(end);
    Some(record)
}

/// Append `value` as a JSON record followed by `0x1E`.
pub(crate) fn write_record<T: Serialize>(
    value: &T,
    sink: &mut BytesMut,
) -> Result<(), ProtocolError> {
    let encoded = serde_json::to_vec(value)?;
    sink.reserve(encoded.len() + 1);
    sink.extend_from_slice(&encoded);
    sink.put_u8(RECORD_SEPARATOR);
    Ok(())
}

fn decode_message(record: &[u8]) -> Result<HubMessage, ProtocolError> {
    let envelope: Envelope = serde_json::from_slice(record)?;

    let message = match envelope.kind {
        message_type::INVOCATION => {
            let m: InvocationIn = serde_json::from_slice(record)?;
            if m.target.is_empty() {
                return Err(ProtocolError::EmptyTarget);
            }
            HubMessage::Invocation(InvocationMessage {
                target: m.target,
                invocation_id: m.invocation_id.filter(|id| !id.is_empty()),
                arguments: m.arguments.iter().map(|a| payload(a)).collect(),
                stream_ids: m.stream_ids.unwrap_or_default(),
            })
        }
        message_type::STREAM_INVOCATION => {
            let m: StreamInvocationIn = serde_json::from_slice(record)?;
            if m.target.is_empty() {
                return Err(ProtocolError::EmptyTarget);
            }
            HubMessage::StreamInvocation(StreamInvocationMessage {
                invocation_id: m.invocation_id,
                target: m.target,
                arguments: m.arguments.iter().map(|a| payload(a)).collect(),
                stream_ids: m.stream_ids.unwrap_or_default(),
            })
        }
        message_type::STREAM_ITEM => {
            let m: StreamItemIn = serde_json::from_slice(record)?;
            HubMessage::StreamItem(StreamItemMessage {
                invocation_id: m.invocation_id,
                item: payload(&m.item),
            })
        }
        message_type::COMPLETION => {
            let m: CompletionIn = serde_json::from_slice(record)?;
            let error = m.error.filter(|e| !e.is_empty());
            let completion = match (m.result, error) {
                (Some(_), Some(_)) => {
                    return Err(ProtocolError::ConflictingCompletion {
                        invocation_id: m.invocation_id,
                    })
                }
                (Some(result), None) => Completion::Result(payload(&result)),
                (None, Some(error)) => Completion::Error(error),
                (None, None) => Completion::Void,
            };
            HubMessage::Completion(CompletionMessage {
                invocation_id: m.invocation_id,
                completion,
            })
        }
        message_type::CANCEL_INVOCATION => {
            let m: CancelIn = serde_json::from_slice(record)?;
            HubMessage::CancelInvocation(CancelInvocationMessage {
                invocation_id: m.invocation_id,
            })
        }
        message_type::PING => HubMessage::Ping,
        message_type::CLOSE => {
            let m: CloseIn = serde_json::from_slice(record)?;
            HubMessage::Close(CloseMessage {
                error: m.error.filter(|e| !e.is_empty()),
                allow_reconnect: m.allow_reconnect,
            })
        }
        other => return Err(ProtocolError::UnknownType(other)),
    };

    Ok(message)
}

fn payload(raw: &RawValue) -> RawPayload {
    RawPayload::new(Bytes::copy_from_slice(raw.get().as_bytes()))
}

fn raw(payload: &RawPayload) -> Result<&RawValue, ProtocolError> {
    serde_json::from_slice(payload.as_bytes()).map_err(|source| {
        log::debug!("[Protocol] Rejecting non-JSON payload: {source}");
        ProtocolError::ForeignPayload {
            protocol: PROTOCOL_NAME,
        }
    })
}

fn raw_all(payloads: &[RawPayload]) -> Result<Vec<&RawValue>, ProtocolError> {
    payloads.iter().map(raw).collect()
}

fn non_empty(ids: &[String]) -> Option<&[String]> {
    (!ids.is_empty()).then_some(ids)
}

// ----------------------------------------------------------------------------
// Wire shapes
// ----------------------------------------------------------------------------

#[derive(Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: i64,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct InvocationIn {
    target: String,
    invocation_id: Option<String>,
    #[serde(default)]
    arguments: Vec<Box<RawValue>>,
    stream_ids: Option<Vec<String>>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct StreamInvocationIn {
    invocation_id: String,
    target: String,
    #[serde(default)]
    arguments: Vec<Box<RawValue>>,
    stream_ids: Option<Vec<String>>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct StreamItemIn {
    invocation_id: String,
    item: Box<RawValue>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CompletionIn {
    invocation_id: String,
    result: Option<Box<RawValue>>,
    error: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CancelIn {
    invocation_id: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CloseIn {
    error: Option<String>,
    #[serde(default)]
    allow_reconnect: bool,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct InvocationOut<'a> {
    #[serde(rename = "type")]
    kind: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    invocation_id: Option<&'a str>,
    target: &'a str,
    arguments: Vec<&'a RawValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream_ids: Option<&'a [String]>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct StreamItemOut<'a> {
    #[serde(rename = "type")]
    kind: i64,
    invocation_id: &'a str,
    item: &'a RawValue,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CompletionOut<'a> {
    #[serde(rename = "type")]
    kind: i64,
    invocation_id: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<&'a RawValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<&'a str>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CancelOut<'a> {
    #[serde(rename = "type")]
    kind: i64,
    invocation_id: &'a str,
}

#[derive(Serialize)]
struct PingOut {
    #[serde(rename = "type")]
    kind: i64,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CloseOut<'a> {
    #[serde(rename = "type")]
    kind: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<&'a str>,
    allow_reconnect: bool,
}
