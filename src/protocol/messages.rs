//! Hub message model.
//!
//! Every message except the handshake carries an integer `type`
//! discriminant on the wire. [`HubMessage`] is the decoded sum of all
//! shapes; codecs translate between it and bytes.
//!
//! Argument, result, and stream item values stay encoded as
//! [`RawPayload`] until the caller knows the concrete type to decode into.

use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;

/// Wire discriminants.
pub mod message_type {
    /// Invocation of a hub method.
    pub const INVOCATION: i64 = 1;
    /// One item of a streaming result or argument.
    pub const STREAM_ITEM: i64 = 2;
    /// Result or error of an invocation.
    pub const COMPLETION: i64 = 3;
    /// Invocation whose result is a stream.
    pub const STREAM_INVOCATION: i64 = 4;
    /// Abort a streaming invocation.
    pub const CANCEL_INVOCATION: i64 = 5;
    /// Keep-alive.
    pub const PING: i64 = 6;
    /// Connection close notice.
    pub const CLOSE: i64 = 7;
}

/// One encoded value whose decoding is deferred.
///
/// The bytes are in the encoding of the protocol that produced them. Turn
/// them into a concrete type with
/// [`HubProtocol::unmarshal_argument`](super::HubProtocol::unmarshal_argument).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RawPayload(Bytes);

impl RawPayload {
    /// Wrap already-encoded bytes.
    pub fn new(bytes: impl Into<Bytes>) -> Self {
        Self(bytes.into())
    }

    /// Encoded bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Consume into the encoded bytes.
    pub fn into_bytes(self) -> Bytes {
        self.0
    }
}

/// A decoded hub message.
#[derive(Clone, Debug, PartialEq)]
pub enum HubMessage {
    /// Method call, optionally expecting a completion.
    Invocation(InvocationMessage),
    /// Item of an in-progress stream.
    StreamItem(StreamItemMessage),
    /// Terminal result of an invocation.
    Completion(CompletionMessage),
    /// Method call whose results arrive as stream items.
    StreamInvocation(StreamInvocationMessage),
    /// Request to abort a streaming invocation.
    CancelInvocation(CancelInvocationMessage),
    /// Keep-alive.
    Ping,
    /// The peer is closing the connection.
    Close(CloseMessage),
}

impl HubMessage {
    /// Wire discriminant of this message.
    pub fn message_type(&self) -> i64 {
        match self {
            Self::Invocation(_) => message_type::INVOCATION,
            Self::StreamItem(_) => message_type::STREAM_ITEM,
            Self::Completion(_) => message_type::COMPLETION,
            Self::StreamInvocation(_) => message_type::STREAM_INVOCATION,
            Self::CancelInvocation(_) => message_type::CANCEL_INVOCATION,
            Self::Ping => message_type::PING,
            Self::Close(_) => message_type::CLOSE,
        }
    }

    /// Invocation id this message correlates with, if any.
    pub fn invocation_id(&self) -> Option<&str> {
        match self {
            Self::Invocation(m) => m.invocation_id.as_deref(),
            Self::StreamItem(m) => Some(&m.invocation_id),
            Self::Completion(m) => Some(&m.invocation_id),
            Self::StreamInvocation(m) => Some(&m.invocation_id),
            Self::CancelInvocation(m) => Some(&m.invocation_id),
            Self::Ping | Self::Close(_) => None,
        }
    }
}

/// Call of a hub method.
///
/// Without an invocation id the call is fire-and-forget and no completion
/// follows.
#[derive(Clone, Debug, PartialEq)]
pub struct InvocationMessage {
    /// Method name (never empty).
    pub target: String,
    /// Correlation id; `None` for fire-and-forget calls.
    pub invocation_id: Option<String>,
    /// Encoded arguments in parameter order.
    pub arguments: Vec<RawPayload>,
    /// Ids of argument streams the caller will feed with stream items.
    pub stream_ids: Vec<String>,
}

impl InvocationMessage {
    /// Fire-and-forget invocation.
    pub fn new(target: impl Into<String>, arguments: Vec<RawPayload>) -> Self {
        Self {
            target: target.into(),
            invocation_id: None,
            arguments,
            stream_ids: Vec::new(),
        }
    }

    /// Expect a completion correlated by `id`.
    pub fn with_invocation_id(mut self, id: impl Into<String>) -> Self {
        self.invocation_id = Some(id.into());
        self
    }

    /// Attach argument stream ids.
    pub fn with_stream_ids(mut self, stream_ids: Vec<String>) -> Self {
        self.stream_ids = stream_ids;
        self
    }
}

/// Call of a hub method whose result is a stream.
#[derive(Clone, Debug, PartialEq)]
pub struct StreamInvocationMessage {
    /// Correlation id for the resulting stream items and completion.
    pub invocation_id: String,
    /// Method name (never empty).
    pub target: String,
    /// Encoded arguments in parameter order.
    pub arguments: Vec<RawPayload>,
    /// Ids of argument streams.
    pub stream_ids: Vec<String>,
}

/// One item of a stream.
///
/// Zero or more precede exactly one [`CompletionMessage`] with the same id.
#[derive(Clone, Debug, PartialEq)]
pub struct StreamItemMessage {
    /// Stream this item belongs to.
    pub invocation_id: String,
    /// Encoded item.
    pub item: RawPayload,
}

/// How an invocation ended.
#[derive(Clone, Debug, PartialEq)]
pub enum Completion {
    /// Completed without a value.
    Void,
    /// Completed with a value.
    Result(RawPayload),
    /// Failed with an error text.
    Error(String),
}

/// Terminal message of an invocation.
#[derive(Clone, Debug, PartialEq)]
pub struct CompletionMessage {
    /// Invocation being completed.
    pub invocation_id: String,
    /// Result or error.
    pub completion: Completion,
}

impl CompletionMessage {
    /// Completion without a value.
    pub fn void(invocation_id: impl Into<String>) -> Self {
        Self {
            invocation_id: invocation_id.into(),
            completion: Completion::Void,
        }
    }

    /// Completion carrying a result.
    pub fn result(invocation_id: impl Into<String>, result: RawPayload) -> Self {
        Self {
            invocation_id: invocation_id.into(),
            completion: Completion::Result(result),
        }
    }

    /// Completion carrying an error.
    pub fn error(invocation_id: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            invocation_id: invocation_id.into(),
            completion: Completion::Error(error.into()),
        }
    }
}

/// Abort a streaming invocation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CancelInvocationMessage {
    /// Invocation to abort.
    pub invocation_id: String,
}

/// Close notice.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CloseMessage {
    /// Why the connection is closing, if abnormal.
    pub error: Option<String>,
    /// Whether the client may reconnect.
    pub allow_reconnect: bool,
}

/// Generator of invocation ids unique within one session.
#[derive(Debug, Default)]
pub struct InvocationIds {
    next: AtomicU64,
}

impl InvocationIds {
    /// Start at id `"0"`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the next id.
    pub fn next_id(&self) -> String {
        self.next.fetch_add(1, Ordering::Relaxed).to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;

    #[test]
    fn test_message_type_matches_variant() {
        assert_eq!(HubMessage::Ping.message_type(), message_type::PING);
        let close = HubMessage::Close(CloseMessage::default());
        assert_eq!(close.message_type(), message_type::CLOSE);
        let completion = HubMessage::Completion(CompletionMessage::void("1"));
        assert_eq!(completion.message_type(), message_type::COMPLETION);
    }

    #[test]
    fn test_invocation_id_accessor() {
        let fire_and_forget = HubMessage::Invocation(InvocationMessage::new("Send", vec![]));
        assert_eq!(fire_and_forget.invocation_id(), None);

        let call = HubMessage::Invocation(InvocationMessage::new("Send", vec![]).with_invocation_id("7"));
        assert_eq!(call.invocation_id(), Some("7"));

        let cancel = HubMessage::CancelInvocation(CancelInvocationMessage {
            invocation_id: "9".to_string(),
        });
        assert_eq!(cancel.invocation_id(), Some("9"));
    }

    #[tokio::test]
    async fn test_invocation_ids_unique_across_tasks() {
        let ids = Arc::new(InvocationIds::new());
        let mut tasks = Vec::new();
        for _ in 0..8 {
            let ids = Arc::clone(&ids);
            tasks.push(tokio::spawn(async move {
                (0..100).map(|_| ids.next_id()).collect::<Vec<_>>()
            }));
        }

        let mut seen = HashSet::new();
        for task in tasks {
            for id in task.await.unwrap() {
                assert!(seen.insert(id), "duplicate invocation id");
            }
        }
        assert_eq!(seen.len(), 800);
    }
}
