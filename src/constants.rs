//! Crate-wide constants for hub-sse.
//!
//! Centralizes buffer sizes, timeouts, and wire constants so the transport,
//! codec, and CLI agree on them.
//!
//! # Categories
//!
//! - **Timeouts**: outbound request deadlines
//! - **Buffers**: event-stream read chunk and pipe capacity
//! - **Wire**: framing bytes and protocol identifiers

use std::time::Duration;

// ============================================================================
// Timeouts
// ============================================================================

/// Request timeout for outbound POSTs and negotiate calls.
///
/// Only applied to clients the crate builds itself. An injected
/// `reqwest::Client` keeps whatever policy the caller configured.
pub const HTTP_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

// ============================================================================
// Buffers
// ============================================================================

/// Size of each read from the event stream (32 KiB).
pub const SSE_READ_CHUNK: usize = 1 << 15;

/// Capacity of the in-memory pipe between the pump and the reader (64 KiB).
///
/// When the reader falls behind by this much, the pump stops reading from
/// the event stream until space frees up.
pub const PIPE_CAPACITY: usize = 64 * 1024;

/// Longest event-stream line the pump accepts (1 MiB).
///
/// A longer line ends the pump; the reader sees end-of-stream.
pub const MAX_PENDING_LINE: usize = 1024 * 1024;

// ============================================================================
// Wire
// ============================================================================

/// Field prefix of event-stream lines carrying payload.
pub const DATA_FIELD: &[u8] = b"data:";

/// ASCII record separator terminating every JSON hub message.
pub const RECORD_SEPARATOR: u8 = 0x1e;

/// Query parameter carrying the connection id on outbound requests.
pub const CONNECTION_ID_PARAM: &str = "id";

/// Transport name a server must offer during negotiate.
pub const SSE_TRANSPORT: &str = "ServerSentEvents";
