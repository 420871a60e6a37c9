//! Incremental JSON Value Decoder
//!
//! Streaming endpoints (events, pull/push progress, stats) send a sequence
//! of independent JSON values inside the HTTP body. Values are not wrapped
//! in an array and are not guaranteed to be newline separated; one value may
//! be followed directly by the first byte of the next, and a value's bytes
//! may arrive split across many reads.
//!
//! The decoder is push based, like [`FrameDecoder`](super::frame::FrameDecoder):
//! `push` bytes as they arrive, call `decode` until it returns `Ok(None)`,
//! and call `finish` once the body ends.

use serde_json::Value;

use super::TransportError;

/// Minimum buffer capacity for decoder
const MIN_BUFFER_CAPACITY: usize = 4096;

/// Buffers body bytes and yields each complete JSON value
///
/// Objects, arrays and strings are scanned once as bytes arrive and parsed
/// only after their closing byte is buffered, so a large value split over
/// many reads costs time linear in its size.
#[derive(Debug)]
pub struct JsonStreamDecoder {
    buffer: Vec<u8>,
    read_pos: usize,
    scan: ScanState,
}

/// Progress through the value starting at `read_pos`
#[derive(Debug, Default)]
struct ScanState {
    /// Bytes past `read_pos` already scanned
    scanned: usize,
    depth: usize,
    in_string: bool,
    escaped: bool,
}

impl Default for JsonStreamDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl JsonStreamDecoder {
    /// Create an empty decoder
    #[must_use]
    pub fn new() -> Self {
        Self {
            buffer: Vec::with_capacity(MIN_BUFFER_CAPACITY),
            read_pos: 0,
            scan: ScanState::default(),
        }
    }

    /// Append bytes to the buffer
    pub fn push(&mut self, data: &[u8]) {
        if self.read_pos > self.buffer.len() / 2 && self.read_pos > MIN_BUFFER_CAPACITY {
            self.buffer.drain(..self.read_pos);
            self.read_pos = 0;
        }
        self.buffer.extend_from_slice(data);
    }

    /// Number of undecoded bytes, including whitespace
    #[must_use]
    pub fn available(&self) -> usize {
        self.buffer.len() - self.read_pos
    }

    /// Try to decode the next value
    ///
    /// Returns `Ok(None)` when the buffered prefix is not yet a complete
    /// value. A bare number that runs to the end of the buffer is held back,
    /// since more digits may still arrive.
    pub fn decode(&mut self) -> Result<Option<Value>, TransportError> {
        self.decode_inner(false)
    }

    /// Decode whatever remains once the body has ended
    ///
    /// Returns every remaining value; fails with `TransportError::Decode` if
    /// trailing bytes do not form a complete value.
    pub fn finish(&mut self) -> Result<Vec<Value>, TransportError> {
        let mut values = Vec::new();
        while let Some(value) = self.decode_inner(true)? {
            values.push(value);
        }

        self.skip_whitespace();
        if self.available() > 0 {
            return Err(TransportError::Decode(format!(
                "Incomplete JSON value at end of stream ({} trailing bytes)",
                self.available()
            )));
        }
        Ok(values)
    }

    fn skip_whitespace(&mut self) {
        while self.read_pos < self.buffer.len() && self.buffer[self.read_pos].is_ascii_whitespace()
        {
            self.read_pos += 1;
        }
    }

    fn decode_inner(&mut self, at_eof: bool) -> Result<Option<Value>, TransportError> {
        if self.scan.scanned == 0 {
            self.skip_whitespace();
        }
        if self.available() == 0 {
            return Ok(None);
        }

        match self.buffer[self.read_pos] {
            b'{' | b'[' | b'"' | b'}' | b']' => self.decode_delimited(),
            _ => self.decode_scalar(at_eof),
        }
    }

    /// Objects, arrays and strings: parse once the closing byte is buffered
    fn decode_delimited(&mut self) -> Result<Option<Value>, TransportError> {
        let Some(end) = self.scan_to_close() else {
            return Ok(None);
        };

        let value = serde_json::from_slice(&self.buffer[self.read_pos..end])
            .map_err(|e| TransportError::Decode(e.to_string()))?;
        self.read_pos = end;
        self.scan = ScanState::default();
        Ok(Some(value))
    }

    /// Resume scanning; returns the end offset once the value closes
    fn scan_to_close(&mut self) -> Option<usize> {
        let start = self.read_pos + self.scan.scanned;
        let scan = &mut self.scan;

        for (i, &byte) in self.buffer[start..].iter().enumerate() {
            if scan.in_string {
                if scan.escaped {
                    scan.escaped = false;
                } else if byte == b'\\' {
                    scan.escaped = true;
                } else if byte == b'"' {
                    scan.in_string = false;
                    if scan.depth == 0 {
                        return Some(start + i + 1);
                    }
                }
                continue;
            }

            match byte {
                b'"' => scan.in_string = true,
                b'{' | b'[' => scan.depth += 1,
                b'}' | b']' => {
                    // A stray closer at depth 0 is handed to serde to reject
                    scan.depth = scan.depth.saturating_sub(1);
                    if scan.depth == 0 {
                        return Some(start + i + 1);
                    }
                }
                _ => {}
            }
        }

        scan.scanned = self.buffer.len() - self.read_pos;
        None
    }

    /// Numbers and literals are short; serde reads just the one token
    fn decode_scalar(&mut self, at_eof: bool) -> Result<Option<Value>, TransportError> {
        let rest = &self.buffer[self.read_pos..];
        let mut values = serde_json::Deserializer::from_slice(rest).into_iter::<Value>();

        match values.next() {
            Some(Ok(value)) => {
                let consumed = values.byte_offset();
                if !at_eof && value.is_number() && consumed == rest.len() {
                    return Ok(None);
                }
                self.read_pos += consumed;
                Ok(Some(value))
            }
            // Incomplete literal; `finish` reports leftovers
            Some(Err(e)) if e.is_eof() => Ok(None),
            Some(Err(e)) => Err(TransportError::Decode(e.to_string())),
            None => Ok(None),
        }
    }
}

/// Decode a complete body buffer into its sequence of values
///
/// # Errors
///
/// Returns `TransportError::Decode` on malformed or truncated JSON.
pub fn decode_all(body: &[u8]) -> Result<Vec<Value>, TransportError> {
    let mut decoder = JsonStreamDecoder::new();
    decoder.push(body);
    let mut values = Vec::new();
    while let Some(value) = decoder.decode()? {
        values.push(value);
    }
    values.extend(decoder.finish()?);
    Ok(values)
}
