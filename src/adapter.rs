//! Hub adapter boundary.
//!
//! A dispatcher that has decoded a [`HubMessage`](crate::protocol::HubMessage)
//! hands invocations and stream items to a [`HubAdapter`], which knows the
//! application's methods and their parameter types. The crate defines the
//! contract only; the dispatcher and the hub implementations live above it.
//!
//! # Streams
//!
//! Stream channels carry type-erased items ([`StreamItem`]) because the
//! dispatcher never knows the element type. The adapter boxes what it
//! decodes and downcasts what handlers emit.
//!
//! ```text
//! client ─ StreamItem(id) ─> dispatcher ─ into_chan(target, index, tx, item) ─> handler
//! handler ─ tx registered by from_chan(target, tx) ─> dispatcher ─ StreamItem(id) ─> client
//! ```
//!
//! Invocation ids are the only correlation between a request and its
//! completion or stream items; see [`InvocationIds`](crate::protocol::InvocationIds).

use std::any::Any;

use thiserror::Error;
use tokio::sync::mpsc::UnboundedSender;

use crate::protocol::{HubProtocol, ProtocolError, RawPayload};

/// A stream element whose concrete type only the adapter knows.
pub type StreamItem = Box<dyn Any + Send>;

/// Sending half of a stream channel.
pub type StreamSender = UnboundedSender<StreamItem>;

/// Errors an adapter reports back to the dispatcher.
#[derive(Debug, Error)]
pub enum HubError {
    /// No method with this name is registered.
    #[error("unknown hub method {0:?}")]
    UnknownTarget(String),
    /// The call carried the wrong number of arguments.
    #[error("method {target:?} expects {expected} arguments, got {actual}")]
    ArgumentCount {
        /// Method name.
        target: String,
        /// Parameters the method declares.
        expected: usize,
        /// Arguments received.
        actual: usize,
    },
    /// An argument or stream item did not decode into the parameter type.
    #[error("invalid argument for {target:?}: {source}")]
    InvalidArgument {
        /// Method name.
        target: String,
        /// Decode failure.
        #[source]
        source: ProtocolError,
    },
    /// The method has no stream parameter at this index.
    #[error("method {target:?} has no stream parameter {index}")]
    NoSuchStream {
        /// Method name.
        target: String,
        /// Requested stream parameter index.
        index: usize,
    },
    /// The handler side of a stream went away.
    #[error("stream for {0:?} is closed")]
    StreamClosed(String),
    /// The handler itself failed; the text goes into the completion.
    #[error("{0}")]
    Handler(String),
}

/// Application side of hub dispatch.
///
/// `P` is the codec the dispatcher decoded the message with; adapters use it
/// to decode deferred arguments and to encode results.
pub trait HubAdapter<P: HubProtocol>: Send + Sync {
    /// Run one invocation.
    ///
    /// `arguments` are still encoded; decode each with
    /// [`HubProtocol::unmarshal_argument`] against the parameter type.
    /// Returns the encoded result, or `None` for methods without one.
    fn invoke(
        &self,
        target: &str,
        arguments: &[RawPayload],
        stream_ids: &[String],
        protocol: &P,
    ) -> Result<Option<RawPayload>, HubError>;

    /// Decode one client-sent stream item and push it into the channel
    /// backing stream parameter `stream_index` of `target`.
    fn into_chan(
        &self,
        target: &str,
        stream_index: usize,
        inbound: &StreamSender,
        item: &RawPayload,
        protocol: &P,
    ) -> Result<(), HubError>;

    /// Register the channel a streaming `target` emits its results into.
    ///
    /// The dispatcher drains the matching receiver and encodes each item as
    /// a stream item message.
    fn from_chan(&self, target: &str, outbound: StreamSender) -> Result<(), HubError>;
}
