//! DAP wire framing: `Content-Length` headers over a raw byte stream.

use serde::Serialize;
use tracing::error;

use crate::error::DapError;

/// Name of the only header field the protocol requires.
pub const CONTENT_LENGTH: &str = "Content-Length";

/// Largest buffer tolerated while no header terminator has been seen.
pub const MAX_HEADER_SIZE: usize = 1 << 16;

const SEPARATOR: &[u8] = b"\r\n\r\n";

/// Encode a message into a DAP wire-format frame.
pub fn encode_message<T: Serialize + ?Sized>(message: &T) -> Result<Vec<u8>, DapError> {
    let body = serde_json::to_vec(message)?;
    let header = format!("{CONTENT_LENGTH}: {}\r\n\r\n", body.len());
    let mut buf = Vec::with_capacity(header.len() + body.len());
    buf.extend_from_slice(header.as_bytes());
    buf.extend_from_slice(&body);
    Ok(buf)
}

/// Result of scanning the front of a buffer for one frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameScan {
    /// More bytes are needed. Nothing may be consumed.
    Incomplete,
    /// No header terminator within [`MAX_HEADER_SIZE`] bytes; drop everything.
    Overflow,
    /// The leading header block is unusable; drop `skip` bytes and rescan.
    Malformed {
        /// Length of the header block including its terminator.
        skip: usize,
        /// What was wrong with it.
        reason: &'static str,
    },
    /// A whole frame is buffered.
    Complete {
        /// Offset of the first payload byte.
        payload_start: usize,
        /// Declared payload length.
        payload_len: usize,
    },
}

/// Scan `buffer` for a complete frame without touching it.
pub fn scan_frame(buffer: &[u8]) -> FrameScan {
    let Some(sep) = find_separator(buffer) else {
        if buffer.len() > MAX_HEADER_SIZE {
            return FrameScan::Overflow;
        }
        return FrameScan::Incomplete;
    };

    let payload_start = sep + SEPARATOR.len();
    let payload_len = match parse_header_block(&buffer[..sep]) {
        Ok(len) => len,
        Err(reason) => {
            return FrameScan::Malformed {
                skip: payload_start,
                reason,
            }
        }
    };

    if buffer.len() - payload_start < payload_len {
        return FrameScan::Incomplete;
    }
    FrameScan::Complete {
        payload_start,
        payload_len,
    }
}

fn find_separator(buffer: &[u8]) -> Option<usize> {
    buffer
        .windows(SEPARATOR.len())
        .position(|window| window == SEPARATOR)
}

/// Parse the `Content-Length` out of a header block (without terminator).
fn parse_header_block(block: &[u8]) -> Result<usize, &'static str> {
    let text = std::str::from_utf8(block).map_err(|_| "header is not valid UTF-8")?;
    let mut length = None;
    for line in text.split("\r\n") {
        let (name, value) = line.split_once(':').ok_or("header field without ':'")?;
        if name.trim().eq_ignore_ascii_case(CONTENT_LENGTH) {
            let parsed = value
                .trim()
                .parse::<usize>()
                .map_err(|_| "invalid Content-Length value")?;
            length = Some(parsed);
        }
    }
    length.ok_or("missing Content-Length header")
}

/// Decode a single frame from the front of `data`.
///
/// Returns `Ok(None)` when more bytes are needed, otherwise the parsed
/// JSON value and the number of bytes the frame occupied.
pub fn decode_message(data: &[u8]) -> Result<Option<(serde_json::Value, usize)>, DapError> {
    match scan_frame(data) {
        FrameScan::Incomplete => Ok(None),
        FrameScan::Overflow => Err(DapError::Transport(format!(
            "no header terminator within {MAX_HEADER_SIZE} bytes"
        ))),
        FrameScan::Malformed { reason, .. } => Err(DapError::Transport(reason.into())),
        FrameScan::Complete {
            payload_start,
            payload_len,
        } => {
            let end = payload_start + payload_len;
            let value = serde_json::from_slice(&data[payload_start..end])?;
            Ok(Some((value, end)))
        }
    }
}

/// Accumulates transport bytes and yields complete frame payloads.
#[derive(Debug, Default)]
pub struct FrameBuffer {
    buf: Vec<u8>,
}

impl FrameBuffer {
    /// Create an empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append freshly received bytes.
    pub fn push(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Number of buffered, not yet consumed bytes.
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// Whether the buffer holds no bytes.
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Pop the next complete payload, discarding malformed headers and
    /// oversized garbage on the way. Call until it returns `None`.
    pub fn next_frame(&mut self) -> Option<Vec<u8>> {
        loop {
            match scan_frame(&self.buf) {
                FrameScan::Incomplete => return None,
                FrameScan::Overflow => {
                    error!(
                        size = self.buf.len(),
                        "no DAP header terminator within {MAX_HEADER_SIZE} bytes; clearing buffer"
                    );
                    self.buf.clear();
                    return None;
                }
                FrameScan::Malformed { skip, reason } => {
                    error!(reason, skip, "discarding malformed DAP header block");
                    self.buf.drain(..skip);
                }
                FrameScan::Complete {
                    payload_start,
                    payload_len,
                } => {
                    let end = payload_start + payload_len;
                    let payload = self.buf[payload_start..end].to_vec();
                    self.buf.drain(..end);
                    return Some(payload);
                }
            }
        }
    }
}
