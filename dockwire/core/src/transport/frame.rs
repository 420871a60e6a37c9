//! Multiplexed Stream Frame Protocol
//!
//! Wire format the daemon uses to carry stdout and stderr over one
//! connection for logs, attach and exec sessions without a TTY.
//!
//! # Frame Format
//!
//! ```text
//! +--------+----------------+----------------+------------------------------+
//! | Type   | Reserved (3)   | Length (4)     | Payload (variable)           |
//! | u8     | zero           | big-endian u32 | raw bytes, passed verbatim   |
//! +--------+----------------+----------------+------------------------------+
//! ```
//!
//! Type is 0 (stdin), 1 (stdout) or 2 (stderr). The payload is caller data:
//! no line splitting, no trimming.
//!
//! When the container runs with a TTY the daemon sends raw bytes with no
//! frames at all. The caller selects that mode; it is never guessed from
//! content.

use std::fmt;

use super::TransportError;

/// Default cap on a decoded payload (64 MiB)
///
/// The wire format allows any u32 length. The decoder caps it so a
/// corrupted header cannot force a 4 GiB allocation; raise the cap with
/// [`FrameDecoder::with_max_frame_size`].
pub const MAX_FRAME_SIZE: usize = 64 * 1024 * 1024;

/// Minimum buffer capacity for decoder
const MIN_BUFFER_CAPACITY: usize = 4096;

/// Frame header size: 1 byte type + 3 reserved + 4 bytes length
pub const HEADER_SIZE: usize = 8;

/// Which standard stream a frame belongs to
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StreamType {
    /// Stream 0
    Stdin,
    /// Stream 1
    Stdout,
    /// Stream 2
    Stderr,
}

impl StreamType {
    /// Header byte for this stream
    #[must_use]
    pub fn as_byte(self) -> u8 {
        match self {
            Self::Stdin => 0,
            Self::Stdout => 1,
            Self::Stderr => 2,
        }
    }

    /// Parse a header byte
    pub fn from_byte(b: u8) -> Result<Self, TransportError> {
        match b {
            0 => Ok(Self::Stdin),
            1 => Ok(Self::Stdout),
            2 => Ok(Self::Stderr),
            other => Err(TransportError::Framing(format!(
                "Unknown stream type byte {other:#04x}"
            ))),
        }
    }
}

impl fmt::Display for StreamType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stdin => write!(f, "stdin"),
            Self::Stdout => write!(f, "stdout"),
            Self::Stderr => write!(f, "stderr"),
        }
    }
}

/// One decoded frame
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StreamFrame {
    /// Source stream
    pub stream: StreamType,
    /// Payload bytes, exactly as sent
    pub payload: Vec<u8>,
}

impl StreamFrame {
    /// Create a frame
    pub fn new(stream: StreamType, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            stream,
            payload: payload.into(),
        }
    }

    /// Payload interpreted as UTF-8, lossily
    #[must_use]
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.payload).into_owned()
    }
}

/// Encode a frame to its wire form
///
/// # Errors
///
/// Returns `TransportError::Framing` if the payload length does not fit
/// the u32 length field.
pub fn encode(frame: &StreamFrame) -> Result<Vec<u8>, TransportError> {
    let len = u32::try_from(frame.payload.len()).map_err(|_| {
        TransportError::Framing(format!(
            "Frame too large: {} bytes (max: {})",
            frame.payload.len(),
            u32::MAX
        ))
    })?;

    let mut buf = Vec::with_capacity(HEADER_SIZE + frame.payload.len());
    buf.push(frame.stream.as_byte());
    buf.extend_from_slice(&[0, 0, 0]);
    buf.extend_from_slice(&len.to_be_bytes());
    buf.extend_from_slice(&frame.payload);
    Ok(buf)
}

/// Incremental decoder for multiplexed output
///
/// Bytes go in as they arrive off the wire; whole frames come out in order.
#[derive(Debug)]
pub struct FrameDecoder {
    buffer: Vec<u8>,
    /// Start of the first undecoded byte
    read_pos: usize,
    max_frame_size: usize,
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameDecoder {
    /// Empty decoder
    #[must_use]
    pub fn new() -> Self {
        Self {
            buffer: Vec::with_capacity(MIN_BUFFER_CAPACITY),
            read_pos: 0,
            max_frame_size: MAX_FRAME_SIZE,
        }
    }

    /// Accept payloads up to `limit` bytes instead of [`MAX_FRAME_SIZE`]
    ///
    /// `u32::MAX as usize` accepts every length the header can carry.
    #[must_use]
    pub fn with_max_frame_size(mut self, limit: usize) -> Self {
        self.max_frame_size = limit;
        self
    }

    /// Largest payload this decoder accepts
    #[must_use]
    pub fn max_frame_size(&self) -> usize {
        self.max_frame_size
    }

    /// Feed bytes read from the connection
    pub fn push(&mut self, data: &[u8]) {
        if self.read_pos > MIN_BUFFER_CAPACITY && self.read_pos * 2 > self.buffer.len() {
            self.buffer.drain(..self.read_pos);
            self.read_pos = 0;
        }
        self.buffer.extend_from_slice(data);
    }

    /// Bytes buffered but not yet decoded
    #[must_use]
    pub fn available(&self) -> usize {
        self.buffer.len() - self.read_pos
    }

    /// Stream byte and payload length of the next header, if buffered
    fn peek_header(&self) -> Option<(u8, usize)> {
        let header = self.buffer.get(self.read_pos..self.read_pos + HEADER_SIZE)?;
        let len = u32::from_be_bytes([header[4], header[5], header[6], header[7]]) as usize;
        Some((header[0], len))
    }

    /// Next complete frame, or `None` until more bytes arrive
    ///
    /// # Errors
    ///
    /// `TransportError::Framing` for an unknown stream byte or an
    /// oversized length.
    pub fn decode(&mut self) -> Result<Option<StreamFrame>, TransportError> {
        let Some((stream_byte, len)) = self.peek_header() else {
            return Ok(None);
        };
        let stream = StreamType::from_byte(stream_byte)?;

        if len > self.max_frame_size {
            return Err(TransportError::Framing(format!(
                "Frame size {len} exceeds maximum {}",
                self.max_frame_size
            )));
        }

        let start = self.read_pos + HEADER_SIZE;
        let Some(payload) = self.buffer.get(start..start + len) else {
            return Ok(None);
        };
        let frame = StreamFrame::new(stream, payload);
        self.read_pos = start + len;
        Ok(Some(frame))
    }

    /// Check the buffer at clean end of stream
    ///
    /// # Errors
    ///
    /// Returns `TransportError::Framing` if a partial header or payload is
    /// still buffered: a truncated frame is never surfaced as a short payload.
    pub fn finish(&self) -> Result<(), TransportError> {
        let available = self.available();
        if available == 0 {
            return Ok(());
        }

        match self.peek_header() {
            None => Err(TransportError::Framing(format!(
                "Truncated frame header: {available} of {HEADER_SIZE} bytes before close"
            ))),
            Some((_, len)) => Err(TransportError::Framing(format!(
                "Truncated frame payload: {} of {len} bytes before close",
                available - HEADER_SIZE
            ))),
        }
    }

    /// Drop everything buffered
    pub fn clear(&mut self) {
        self.buffer.clear();
        self.read_pos = 0;
    }
}
