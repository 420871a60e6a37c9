//! HTTP/1.1 Exchange
//!
//! One request per channel. The request is written in full, then the
//! response head is parsed and the body is read according to its framing:
//!
//! | Response                      | Body framing                 |
//! |-------------------------------|------------------------------|
//! | `101 Switching Protocols`     | raw bytes until EOF          |
//! | `204`, `304`, reply to `HEAD` | empty                        |
//! | `Transfer-Encoding: chunked`  | chunked                      |
//! | `Content-Length: n`           | exactly `n` bytes            |
//! | otherwise                     | until EOF                    |
//!
//! Every read from the channel is bounded by the read deadline. When it
//! expires the exchange fails with `OperationTimeout` and the channel is
//! dropped.

use std::collections::BTreeMap;
use std::fmt::Write as _;

use tokio::io::{AsyncReadExt, AsyncWriteExt};

use super::traits::{Channel, TransportError};
use crate::timeout::ResolvedTimeout;

/// Upper bound on the status line plus headers
pub const MAX_HEAD_SIZE: usize = 64 * 1024;

/// Upper bound on a chunk-size or trailer line
const MAX_LINE_SIZE: usize = 8 * 1024;

/// Read buffer size
const READ_CHUNK: usize = 8 * 1024;

/// Request line, headers and body, ready to write
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RequestHead {
    /// `GET`, `POST`, ...
    pub method: String,
    /// Path plus encoded query, starting with `/`
    pub target: String,
    /// Header name/value pairs, in order
    pub headers: Vec<(String, String)>,
}

impl RequestHead {
    /// Serialize with `Content-Length` for `body_len` (omitted for bodiless GET/HEAD)
    #[must_use]
    pub fn encode(&self, body_len: usize) -> Vec<u8> {
        let mut out = String::with_capacity(256);
        let _ = write!(out, "{} {} HTTP/1.1\r\n", self.method, self.target);
        for (name, value) in &self.headers {
            let _ = write!(out, "{name}: {value}\r\n");
        }
        let bodiless = matches!(self.method.as_str(), "GET" | "HEAD");
        if body_len > 0 || !bodiless {
            let _ = write!(out, "Content-Length: {body_len}\r\n");
        }
        out.push_str("\r\n");
        out.into_bytes()
    }
}

/// Parsed status line and headers
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResponseHead {
    /// Status code
    pub status: u16,
    /// Reason phrase
    pub reason: String,
    /// Headers with lower-cased names
    pub headers: Vec<(String, String)>,
}

impl ResponseHead {
    /// First value of header `name` (case-insensitive)
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Whether the status is 2xx
    #[must_use]
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Whether the connection was switched to a raw stream
    #[must_use]
    pub fn is_upgrade(&self) -> bool {
        self.status == 101
    }

    /// Parse `head` (without the terminating blank line)
    ///
    /// # Errors
    ///
    /// `Framing` for a malformed status line or header.
    pub fn parse(head: &[u8]) -> Result<Self, TransportError> {
        let text = std::str::from_utf8(head)
            .map_err(|_| TransportError::Framing("Response head is not UTF-8".to_string()))?;
        let mut lines = text.split("\r\n");

        let status_line = lines.next().unwrap_or_default();
        let mut parts = status_line.splitn(3, ' ');
        let version = parts.next().unwrap_or_default();
        if !version.starts_with("HTTP/1.") {
            return Err(TransportError::Framing(format!(
                "Invalid status line: {status_line:?}"
            )));
        }
        let status = parts
            .next()
            .and_then(|s| s.parse::<u16>().ok())
            .ok_or_else(|| TransportError::Framing(format!("Invalid status line: {status_line:?}")))?;
        let reason = parts.next().unwrap_or_default().to_string();

        let mut headers = Vec::new();
        for line in lines.filter(|l| !l.is_empty()) {
            let (name, value) = line
                .split_once(':')
                .ok_or_else(|| TransportError::Framing(format!("Invalid header line: {line:?}")))?;
            headers.push((name.trim().to_ascii_lowercase(), value.trim().to_string()));
        }

        Ok(Self {
            status,
            reason,
            headers,
        })
    }

    /// How the body that follows is delimited
    ///
    /// # Errors
    ///
    /// `Framing` for an unparseable `Content-Length`.
    pub fn framing(&self, method: &str) -> Result<BodyFraming, TransportError> {
        if self.is_upgrade() {
            return Ok(BodyFraming::UntilEof);
        }
        if method.eq_ignore_ascii_case("HEAD")
            || self.status == 204
            || self.status == 304
            || (100..200).contains(&self.status)
        {
            return Ok(BodyFraming::Empty);
        }
        if self
            .header("transfer-encoding")
            .is_some_and(|te| te.to_ascii_lowercase().contains("chunked"))
        {
            return Ok(BodyFraming::Chunked);
        }
        match self.header("content-length") {
            Some(len) => len
                .parse::<u64>()
                .map(BodyFraming::Length)
                .map_err(|_| TransportError::Framing(format!("Invalid Content-Length: {len:?}"))),
            None => Ok(BodyFraming::UntilEof),
        }
    }
}

/// Body delimitation
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BodyFraming {
    /// No body
    Empty,
    /// Exactly this many bytes
    Length(u64),
    /// Chunked transfer coding
    Chunked,
    /// Everything until the peer closes
    UntilEof,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ChunkState {
    /// Expecting a chunk-size line
    Size,
    /// Inside a chunk with this many bytes left
    Data(u64),
    /// Finished
    Done,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum BodyState {
    Length(u64),
    Chunked(ChunkState),
    UntilEof,
    Done,
}

/// A channel carrying one HTTP exchange
pub struct HttpConnection {
    channel: Box<dyn Channel>,
    buf: Vec<u8>,
    pos: usize,
    read_timeout: ResolvedTimeout,
    body: BodyState,
}

impl HttpConnection {
    /// Wrap an open channel
    pub fn new(channel: Box<dyn Channel>, read_timeout: ResolvedTimeout) -> Self {
        Self {
            channel,
            buf: Vec::with_capacity(READ_CHUNK),
            pos: 0,
            read_timeout,
            body: BodyState::Done,
        }
    }

    /// Underlying channel
    #[must_use]
    pub fn channel(&self) -> &dyn Channel {
        self.channel.as_ref()
    }

    /// Write the request head and body
    ///
    /// # Errors
    ///
    /// `OperationTimeout` if the write stalls past the read deadline, `Io`
    /// for write failures.
    pub async fn send_request(&mut self, head: &RequestHead, body: &[u8]) -> Result<(), TransportError> {
        let encoded = head.encode(body.len());
        let deadline = self.read_timeout;
        let channel = &mut self.channel;
        let written = deadline
            .run(async {
                channel.write_all(&encoded).await?;
                if !body.is_empty() {
                    channel.write_all(body).await?;
                }
                channel.flush().await
            })
            .await
            .ok_or_else(|| timeout_error(deadline))?;
        written?;

        tracing::debug!(
            conn_id = %self.channel.id(),
            method = %head.method,
            target = %head.target,
            body_len = body.len(),
            "Request sent"
        );
        Ok(())
    }

    /// Read the response head and prepare body reading
    ///
    /// `100 Continue` interim responses are skipped.
    ///
    /// # Errors
    ///
    /// `Framing` for malformed or oversized heads or early EOF,
    /// `OperationTimeout` when the deadline passes.
    pub async fn read_response_head(&mut self, method: &str) -> Result<ResponseHead, TransportError> {
        loop {
            let head = self.read_head_bytes().await?;
            let parsed = ResponseHead::parse(&head)?;
            if parsed.status == 100 {
                continue;
            }

            self.body = match parsed.framing(method)? {
                BodyFraming::Empty => BodyState::Done,
                BodyFraming::Length(0) => BodyState::Done,
                BodyFraming::Length(n) => BodyState::Length(n),
                BodyFraming::Chunked => BodyState::Chunked(ChunkState::Size),
                BodyFraming::UntilEof => BodyState::UntilEof,
            };

            tracing::debug!(
                conn_id = %self.channel.id(),
                status = parsed.status,
                framing = ?self.body,
                "Response head received"
            );
            return Ok(parsed);
        }
    }

    /// Next piece of body, `None` at the end
    ///
    /// # Errors
    ///
    /// `Framing` for truncated or malformed bodies, `OperationTimeout`.
    pub async fn read_body_chunk(&mut self) -> Result<Option<Vec<u8>>, TransportError> {
        loop {
            match self.body {
                BodyState::Done => return Ok(None),

                BodyState::UntilEof => {
                    if self.buffered() == 0 && self.fill().await? == 0 {
                        self.body = BodyState::Done;
                        return Ok(None);
                    }
                    return Ok(Some(self.take_buffered(usize::MAX)));
                }

                BodyState::Length(remaining) => {
                    if self.buffered() == 0 && self.fill().await? == 0 {
                        return Err(TransportError::Framing(format!(
                            "Body ended with {remaining} bytes missing"
                        )));
                    }
                    let piece = self.take_buffered(clamp(remaining));
                    let left = remaining - piece.len() as u64;
                    self.body = if left == 0 {
                        BodyState::Done
                    } else {
                        BodyState::Length(left)
                    };
                    return Ok(Some(piece));
                }

                BodyState::Chunked(ChunkState::Size) => {
                    let line = self.read_line().await?;
                    let size_text = line.split(';').next().unwrap_or_default().trim();
                    let size = u64::from_str_radix(size_text, 16).map_err(|_| {
                        TransportError::Framing(format!("Invalid chunk size: {size_text:?}"))
                    })?;
                    if size == 0 {
                        // trailers, terminated by an empty line
                        while !self.read_line().await?.is_empty() {}
                        self.body = BodyState::Chunked(ChunkState::Done);
                    } else {
                        self.body = BodyState::Chunked(ChunkState::Data(size));
                    }
                }

                BodyState::Chunked(ChunkState::Data(remaining)) => {
                    if self.buffered() == 0 && self.fill().await? == 0 {
                        return Err(TransportError::Framing(format!(
                            "Chunk truncated with {remaining} bytes missing"
                        )));
                    }
                    let piece = self.take_buffered(clamp(remaining));
                    let left = remaining - piece.len() as u64;
                    if left == 0 {
                        let terminator = self.read_line().await?;
                        if !terminator.is_empty() {
                            return Err(TransportError::Framing(
                                "Missing CRLF after chunk data".to_string(),
                            ));
                        }
                        self.body = BodyState::Chunked(ChunkState::Size);
                    } else {
                        self.body = BodyState::Chunked(ChunkState::Data(left));
                    }
                    return Ok(Some(piece));
                }

                BodyState::Chunked(ChunkState::Done) => {
                    self.body = BodyState::Done;
                    return Ok(None);
                }
            }
        }
    }

    /// Read the whole remaining body
    ///
    /// # Errors
    ///
    /// As [`read_body_chunk`](Self::read_body_chunk).
    pub async fn read_body_to_end(&mut self) -> Result<Vec<u8>, TransportError> {
        let mut body = Vec::new();
        while let Some(chunk) = self.read_body_chunk().await? {
            body.extend_from_slice(&chunk);
        }
        Ok(body)
    }

    /// Hand over the raw channel after an upgrade, with bytes already buffered
    #[must_use]
    pub fn into_upgraded(mut self) -> (Box<dyn Channel>, Vec<u8>) {
        let leftover = self.take_buffered(usize::MAX);
        (self.channel, leftover)
    }

    /// Current read deadline
    #[must_use]
    pub fn read_timeout(&self) -> ResolvedTimeout {
        self.read_timeout
    }

    fn buffered(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn take_buffered(&mut self, max: usize) -> Vec<u8> {
        let end = self.pos + self.buffered().min(max);
        let piece = self.buf[self.pos..end].to_vec();
        self.pos = end;
        if self.pos == self.buf.len() {
            self.buf.clear();
            self.pos = 0;
        }
        piece
    }

    /// Read more bytes into the buffer; `0` means EOF
    async fn fill(&mut self) -> Result<usize, TransportError> {
        if self.pos > 0 {
            self.buf.drain(..self.pos);
            self.pos = 0;
        }

        let mut chunk = [0u8; READ_CHUNK];
        let deadline = self.read_timeout;
        let n = deadline
            .run(self.channel.read(&mut chunk))
            .await
            .ok_or_else(|| timeout_error(deadline))??;
        self.buf.extend_from_slice(&chunk[..n]);
        Ok(n)
    }

    async fn read_head_bytes(&mut self) -> Result<Vec<u8>, TransportError> {
        loop {
            if let Some(end) = find(&self.buf[self.pos..], b"\r\n\r\n") {
                let head = self.buf[self.pos..self.pos + end].to_vec();
                self.pos += end + 4;
                return Ok(head);
            }
            if self.buffered() > MAX_HEAD_SIZE {
                return Err(TransportError::Framing(format!(
                    "Response head exceeds {MAX_HEAD_SIZE} bytes"
                )));
            }
            if self.fill().await? == 0 {
                return Err(if self.buffered() == 0 {
                    TransportError::ConnectionClosed
                } else {
                    TransportError::Framing("Connection closed inside response head".to_string())
                });
            }
        }
    }

    async fn read_line(&mut self) -> Result<String, TransportError> {
        loop {
            if let Some(end) = find(&self.buf[self.pos..], b"\r\n") {
                let line = String::from_utf8_lossy(&self.buf[self.pos..self.pos + end]).into_owned();
                self.pos += end + 2;
                return Ok(line);
            }
            if self.buffered() > MAX_LINE_SIZE {
                return Err(TransportError::Framing("Chunk line too long".to_string()));
            }
            if self.fill().await? == 0 {
                return Err(TransportError::Framing(
                    "Connection closed inside chunked body".to_string(),
                ));
            }
        }
    }
}

fn clamp(remaining: u64) -> usize {
    usize::try_from(remaining).unwrap_or(usize::MAX)
}

pub(crate) fn timeout_error(deadline: ResolvedTimeout) -> TransportError {
    TransportError::OperationTimeout {
        after: deadline.duration().unwrap_or_default(),
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

/// Decomposed `Content-Type` value, lower-cased
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ContentType {
    /// `application` in `application/json`
    pub main: String,
    /// `json` in `application/json`
    pub sub: String,
    /// `charset=utf-8` and friends
    pub options: BTreeMap<String, String>,
}

impl ContentType {
    /// Whether the subtype is JSON (`application/json`, `*/...+json`)
    #[must_use]
    pub fn is_json(&self) -> bool {
        self.sub == "json" || self.sub.ends_with("+json")
    }
}

/// Parse a `Content-Type` header value
///
/// # Errors
///
/// `Decode` when the type lacks a `/` or an option lacks `=`.
pub fn parse_content_type(value: &str) -> Result<ContentType, TransportError> {
    let mut pieces = value.split(';');
    let mime = pieces.next().unwrap_or_default();
    let (main, sub) = mime
        .split_once('/')
        .filter(|(_, sub)| !sub.contains('/'))
        .ok_or_else(|| TransportError::Decode(format!("Invalid mime-type component: {mime:?}")))?;

    let mut options = BTreeMap::new();
    for option in pieces.map(str::trim).filter(|o| !o.is_empty()) {
        let (key, val) = option
            .split_once('=')
            .ok_or_else(|| TransportError::Decode(format!("Invalid option component: {option:?}")))?;
        options.insert(key.to_ascii_lowercase(), val.to_ascii_lowercase());
    }

    Ok(ContentType {
        main: main.trim().to_ascii_lowercase(),
        sub: sub.trim().to_ascii_lowercase(),
        options,
    })
}

/// Percent-encode a query component (RFC 3986 unreserved characters pass)
#[must_use]
pub fn percent_encode(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for byte in value.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'.' | b'_' | b'~' => {
                out.push(byte as char);
            }
            other => {
                let _ = write!(out, "%{other:02X}");
            }
        }
    }
    out
}

/// Encode `params` as a query string, without the leading `?`
#[must_use]
pub fn encode_query(params: &[(String, String)]) -> String {
    params
        .iter()
        .map(|(k, v)| format!("{}={}", percent_encode(k), percent_encode(v)))
        .collect::<Vec<_>>()
        .join("&")
}
