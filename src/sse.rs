//! Event-stream frame extraction.
//!
//! Turns a raw Server-Sent Events byte stream into the concatenated payload
//! of its `data:` lines. Every other field (`event:`, `id:`, `retry:`) and
//! comment lines are ignored.
//!
//! ```text
//! event: message\n            -> (dropped)
//! data: {"type":6}\x1e\r\n    -> {"type":6}\x1e
//! data:{"a":1}\n              -> {"a":1}
//! ```
//!
//! Each `data:` line is forwarded as its own write. Consecutive `data:`
//! lines of one event are concatenated without a separator.
//!
//! # Pump
//!
//! [`pump`] is the background loop behind [`SseConnection`]: it owns the
//! event stream, extracts payloads, and writes them into the connection's
//! pipe until the stream ends, the pipe's reader goes away, or the
//! cancellation token fires.
//!
//! [`SseConnection`]: crate::connection::SseConnection

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;

use crate::constants::{DATA_FIELD, MAX_PENDING_LINE, SSE_READ_CHUNK};

/// Characters trimmed from both ends of every line.
const TRIMMED: &[u8] = b"\r\t ";

/// Extract the payload of a single event-stream line.
///
/// Returns `None` unless the trimmed line starts with `data:`. Exactly one
/// space after the field name is removed; further spaces are payload.
pub fn extract_data(line: &[u8]) -> Option<&[u8]> {
    let line = trim(line);
    let payload = line.strip_prefix(DATA_FIELD)?;
    Some(payload.strip_prefix(b" ").unwrap_or(payload))
}

fn trim(mut line: &[u8]) -> &[u8] {
    while let [first, rest @ ..] = line {
        if !TRIMMED.contains(first) {
            break;
        }
        line = rest;
    }
    while let [rest @ .., last] = line {
        if !TRIMMED.contains(last) {
            break;
        }
        line = rest;
    }
    line
}

/// An event-stream line grew past the extractor's limit.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("event-stream line of at least {len} bytes exceeds the {limit} byte limit")]
pub struct LineTooLong {
    /// Bytes of the line seen so far.
    pub len: usize,
    /// Largest accepted line.
    pub limit: usize,
}

/// Incremental `data:` line extractor that handles partial reads.
///
/// Feed raw chunks via [`DataLines::feed`]; a line cut by a chunk boundary
/// is held back until its terminating `\n` arrives, so the extracted
/// payloads do not depend on how the stream was chunked.
///
/// Lines longer than [`MAX_PENDING_LINE`] are an error, whether they arrive
/// whole or in pieces.
#[derive(Debug)]
pub struct DataLines {
    pending: Vec<u8>,
    limit: usize,
}

impl Default for DataLines {
    fn default() -> Self {
        Self {
            pending: Vec::new(),
            limit: MAX_PENDING_LINE,
        }
    }
}

impl DataLines {
    /// Create an extractor with an empty carry-over buffer.
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    fn with_limit(limit: usize) -> Self {
        Self {
            pending: Vec::new(),
            limit,
        }
    }

    /// Feed a chunk and return the payload of every completed `data:` line.
    ///
    /// # Errors
    ///
    /// Returns [`LineTooLong`] once any line, complete or still pending,
    /// exceeds the limit. The extractor should not be fed afterwards.
    pub fn feed(&mut self, chunk: &[u8]) -> Result<Vec<Vec<u8>>, LineTooLong> {
        self.pending.extend_from_slice(chunk);

        let Some(last_newline) = self.pending.iter().rposition(|b| *b == b'\n') else {
            self.check_limit(self.pending.len())?;
            return Ok(Vec::new());
        };

        let mut payloads = Vec::new();
        for line in self.pending[..last_newline].split(|b| *b == b'\n') {
            self.check_limit(line.len())?;
            if let Some(payload) = extract_data(line) {
                payloads.push(payload.to_vec());
            }
        }

        self.pending.drain(..=last_newline);
        self.check_limit(self.pending.len())?;
        Ok(payloads)
    }

    /// Flush the trailing unterminated line, if any, once the stream ended.
    pub fn finish(&mut self) -> Option<Vec<u8>> {
        let line = std::mem::take(&mut self.pending);
        extract_data(&line).map(<[u8]>::to_vec)
    }

    fn check_limit(&self, len: usize) -> Result<(), LineTooLong> {
        if len > self.limit {
            return Err(LineTooLong {
                len,
                limit: self.limit,
            });
        }
        Ok(())
    }
}

/// Why the pump stopped.
#[derive(Debug)]
pub enum PumpExit {
    /// The event stream reached end-of-stream.
    EndOfStream,
    /// Reading the event stream failed.
    ReadFailed(std::io::Error),
    /// Writing into the pipe failed (usually: the reader was dropped).
    ForwardFailed(std::io::Error),
    /// The cancellation token fired.
    Cancelled,
    /// A line exceeded the length limit. The rest of the stream is
    /// discarded rather than misread.
    LineTooLong(LineTooLong),
}

/// Pump payloads from an event stream into a sink until one side stops.
///
/// Takes exclusive ownership of `source` and releases it exactly once on
/// every exit path. The sink is dropped on return, which signals
/// end-of-stream to whoever reads the other side of the pipe.
pub async fn pump<R, W>(source: R, mut sink: W, cancel: CancellationToken) -> PumpExit
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut source = scopeguard::guard(source, |_| {
        log::debug!("[Sse] Event stream released");
    });
    let mut lines = DataLines::new();
    let mut buf = vec![0u8; SSE_READ_CHUNK];

    let exit = loop {
        let read = tokio::select! {
            biased;
            () = cancel.cancelled() => break PumpExit::Cancelled,
            read = source.read(&mut buf) => read,
        };

        let n = match read {
            Ok(0) => {
                if let Some(payload) = lines.finish() {
                    if let Err(exit) = forward(&mut sink, &payload, &cancel).await {
                        break exit;
                    }
                }
                break PumpExit::EndOfStream;
            }
            Ok(n) => n,
            Err(e) => break PumpExit::ReadFailed(e),
        };

        let payloads = match lines.feed(&buf[..n]) {
            Ok(payloads) => payloads,
            Err(e) => break PumpExit::LineTooLong(e),
        };

        let mut failed = None;
        for payload in payloads {
            if let Err(exit) = forward(&mut sink, &payload, &cancel).await {
                failed = Some(exit);
                break;
            }
        }
        if let Some(exit) = failed {
            break exit;
        }
    };

    match &exit {
        PumpExit::EndOfStream => log::debug!("[Sse] Event stream ended"),
        PumpExit::ReadFailed(e) => log::debug!("[Sse] Event stream read failed: {e}"),
        PumpExit::ForwardFailed(e) => log::debug!("[Sse] Pipe closed: {e}"),
        PumpExit::Cancelled => log::debug!("[Sse] Pump cancelled"),
        PumpExit::LineTooLong(e) => log::warn!("[Sse] Abandoning event stream: {e}"),
    }

    if let Err(e) = sink.shutdown().await {
        log::debug!("[Sse] Pipe shutdown failed: {e}");
    }
    exit
}

/// Write one payload into the sink, giving up if cancelled while blocked.
async fn forward<W>(sink: &mut W, payload: &[u8], cancel: &CancellationToken) -> Result<(), PumpExit>
where
    W: AsyncWrite + Unpin,
{
    if payload.is_empty() {
        return Ok(());
    }
    tokio::select! {
        biased;
        () = cancel.cancelled() => Err(PumpExit::Cancelled),
        written = sink.write_all(payload) => written.map_err(PumpExit::ForwardFailed),
    }
}
