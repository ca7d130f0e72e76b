//! hub-sse - Server-Sent Events transport for SignalR-style hubs.
//!
//! This crate turns a one-directional event stream plus per-write HTTP
//! POSTs into a duplex byte stream, and defines the hub message model and
//! codec contract that interpret the bytes flowing through it.
//!
//! # Architecture
//!
//! ```text
//! event stream ──> sse::pump ──> pipe ──┐
//!                                       ├── SseConnection ──> HubSession ──> HubMessage
//! POST ?id=<connection id>  <───────────┘        (bytes)      (HubProtocol)
//! ```
//!
//! # Modules
//!
//! - [`sse`] - `data:` line extraction and the background pump
//! - [`connection`] - Duplex connection (read: event stream, write: POST)
//! - [`protocol`] - Message model, codec trait, JSON codec, handshake
//! - [`adapter`] - Contract for dispatching decoded invocations
//! - [`session`] - Handshake and message-level reads/writes
//! - [`client`] - Negotiate and event-stream helpers
//! - [`config`] - Configuration loading

pub mod adapter;
pub mod client;
pub mod config;
pub mod connection;
pub mod constants;
pub mod protocol;
pub mod session;
pub mod sse;

// Re-export commonly used types
pub use adapter::{HubAdapter, HubError};
pub use config::Config;
pub use connection::{ConnectionError, ConnectionOptions, SseConnection, WriteError};
pub use protocol::{HubMessage, HubProtocol, JsonHubProtocol, ParseOutcome, ProtocolError, RawPayload};
pub use session::{HubSession, SessionError};
