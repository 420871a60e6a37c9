//! Query Executor
//!
//! [`DockerClient`] turns a [`Request`] into one HTTP/1.1 exchange on a
//! freshly opened channel and hands the response back in the shape the
//! caller asked for:
//!
//! | [`StreamMode`]              | [`QueryResult`]                          |
//! |-----------------------------|------------------------------------------|
//! | `Single`                    | `Value` (whole body, empty body = null)  |
//! | `JsonStream`                | `JsonStream` of concatenated values      |
//! | `Multiplexed { tty: false }`| `Multiplexed` stream of [`StreamFrame`]s |
//! | `Multiplexed { tty: true }` | `Raw`                                    |
//! | `Raw`                       | `Raw` (tar archives, hijacked sessions)  |
//!
//! One operation per channel. Streams own their channel; `close()` or drop
//! releases it (and, over SSH, the tunnel).

use std::collections::VecDeque;
use std::fmt;
use std::io;
use std::sync::Arc;

use futures::Stream;
use serde_json::Value;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::auth::{compose_auth_header, REGISTRY_AUTH_HEADER};
use crate::timeout::{ResolvedTimeout, Timeouts};
use crate::transport::frame::{FrameDecoder, StreamFrame};
use crate::transport::http::{
    encode_query, parse_content_type, timeout_error, BodyFraming, HttpConnection, RequestHead,
    ResponseHead,
};
use crate::transport::json_stream::JsonStreamDecoder;
use crate::transport::target::{join_host_port, ConnectionTarget};
use crate::transport::{Channel, Connector, TransportError};

/// API version used when none is configured
pub const DEFAULT_API_VERSION: &str = "v1.45";

/// `User-Agent` sent with every request
pub const USER_AGENT: &str = concat!("dockwire/", env!("CARGO_PKG_VERSION"));

const RAW_READ_CHUNK: usize = 16 * 1024;

/// How the response body is consumed
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum StreamMode {
    /// Whole body as one JSON value
    #[default]
    Single,
    /// Lazily decoded sequence of JSON values
    JsonStream,
    /// Stdout/stderr frames; raw bytes when the session has a TTY
    Multiplexed {
        /// Container allocated a TTY (no frame headers on the wire)
        tty: bool,
    },
    /// Bytes as they arrive
    Raw,
}

/// Per-call options
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CallOptions {
    /// Overrides for the client's connect/read timeouts
    pub timeouts: Timeouts,
}

/// Convert a query parameter value to its wire form
///
/// Booleans become `1`/`0`, strings pass verbatim, anything else is sent as
/// JSON text.
#[must_use]
pub fn httpize(value: &Value) -> String {
    match value {
        Value::Bool(true) => "1".to_string(),
        Value::Bool(false) => "0".to_string(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// A request to the daemon
#[derive(Clone, Debug, PartialEq)]
pub struct Request {
    method: String,
    path: String,
    params: Vec<(String, String)>,
    headers: Vec<(String, String)>,
    body: Vec<u8>,
    registry_auth: Option<(Value, Option<String>)>,
    upgrade: bool,
    versioned: bool,
}

impl Request {
    /// Request with an arbitrary method; `path` is relative to the API version
    pub fn new(method: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            method: method.into().to_ascii_uppercase(),
            path: path.into(),
            params: Vec::new(),
            headers: Vec::new(),
            body: Vec::new(),
            registry_auth: None,
            upgrade: false,
            versioned: true,
        }
    }

    /// `GET path`
    pub fn get(path: impl Into<String>) -> Self {
        Self::new("GET", path)
    }

    /// `POST path`
    pub fn post(path: impl Into<String>) -> Self {
        Self::new("POST", path)
    }

    /// `PUT path`
    pub fn put(path: impl Into<String>) -> Self {
        Self::new("PUT", path)
    }

    /// `DELETE path`
    pub fn delete(path: impl Into<String>) -> Self {
        Self::new("DELETE", path)
    }

    /// `HEAD path`
    pub fn head(path: impl Into<String>) -> Self {
        Self::new("HEAD", path)
    }

    /// Add a query parameter, converted with [`httpize`]
    ///
    /// `null` values are skipped.
    #[must_use]
    pub fn param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        let value = value.into();
        if !value.is_null() {
            self.params.push((key.into(), httpize(&value)));
        }
        self
    }

    /// Add every entry of a JSON object as a query parameter
    #[must_use]
    pub fn params(mut self, params: &serde_json::Map<String, Value>) -> Self {
        for (key, value) in params {
            self = self.param(key.clone(), value.clone());
        }
        self
    }

    /// Add a header
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// JSON request body
    #[must_use]
    pub fn json(self, body: &Value) -> Self {
        self.body(body.to_string().into_bytes(), "application/json")
    }

    /// Raw request body (tar archives, stdin payloads)
    #[must_use]
    pub fn body(mut self, body: Vec<u8>, content_type: &str) -> Self {
        self.body = body;
        self.header("Content-Type", content_type)
    }

    /// Send registry credentials in `X-Registry-Auth`
    #[must_use]
    pub fn registry_auth(mut self, auth: Value, registry: Option<&str>) -> Self {
        self.registry_auth = Some((auth, registry.map(str::to_string)));
        self
    }

    /// Ask the daemon to hijack the connection (attach, exec start)
    #[must_use]
    pub fn upgrade(mut self) -> Self {
        self.upgrade = true;
        self
    }

    /// Send `path` without the API version prefix (`/_ping`)
    #[must_use]
    pub fn unversioned(mut self) -> Self {
        self.versioned = false;
        self
    }

    /// HTTP method
    #[must_use]
    pub fn method(&self) -> &str {
        &self.method
    }

    /// Path relative to the API root
    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Encoded query parameters
    #[must_use]
    pub fn query(&self) -> &[(String, String)] {
        &self.params
    }
}

/// Client for one daemon endpoint
///
/// Cheap to clone; clones share the connector (and its SSH session).
#[derive(Clone)]
pub struct DockerClient {
    connector: Arc<Connector>,
    api_version: String,
    timeouts: Timeouts,
    host_header: String,
}

impl DockerClient {
    /// Client over `connector`
    ///
    /// # Errors
    ///
    /// `InvalidTarget` when `api_version` is not `v<major>.<minor>`.
    pub fn new(connector: Connector, api_version: &str, timeouts: Timeouts) -> Result<Self, TransportError> {
        if !is_valid_api_version(api_version) {
            return Err(TransportError::InvalidTarget(format!(
                "Invalid API version {api_version:?}, expected v<major>.<minor>"
            )));
        }

        let host_header = match &connector {
            Connector::Tcp { host, port } | Connector::Tls { host, port, .. } => {
                join_host_port(host, *port)
            }
            _ => "localhost".to_string(),
        };

        tracing::debug!(endpoint = %connector, api_version, "Docker client created");
        Ok(Self {
            connector: Arc::new(connector),
            api_version: api_version.to_string(),
            timeouts,
            host_header,
        })
    }

    /// Client for a parsed target
    ///
    /// # Errors
    ///
    /// As [`Connector::new`] and [`DockerClient::new`].
    pub fn from_target(
        target: ConnectionTarget,
        api_version: &str,
        timeouts: Timeouts,
    ) -> Result<Self, TransportError> {
        Self::new(Connector::new(target)?, api_version, timeouts)
    }

    /// API version prefix (`v1.45`)
    #[must_use]
    pub fn api_version(&self) -> &str {
        &self.api_version
    }

    /// Client-wide timeouts
    #[must_use]
    pub fn timeouts(&self) -> Timeouts {
        self.timeouts
    }

    /// The connector requests go through
    #[must_use]
    pub fn connector(&self) -> &Connector {
        &self.connector
    }

    /// Perform `request` and return its response in `mode`
    ///
    /// # Errors
    ///
    /// `ConnectTimeout` or the transport's error when the channel cannot be
    /// opened, `OperationTimeout` when a read stalls, `Daemon` for non-2xx
    /// replies, `Framing`/`Decode` for malformed responses.
    pub async fn execute(
        &self,
        request: Request,
        options: &CallOptions,
        mode: StreamMode,
    ) -> Result<QueryResult, TransportError> {
        let (connect_timeout, read_timeout) = self.timeouts.resolve_with(&options.timeouts);
        let (head, body) = self.encode_request(&request)?;

        let channel = self.connector.open(connect_timeout).await?;
        let mut conn = HttpConnection::new(channel, read_timeout);
        conn.send_request(&head, &body).await?;
        let response = conn.read_response_head(&head.method).await?;

        if !response.is_success() && !response.is_upgrade() {
            return Err(daemon_error(&mut conn, &response).await);
        }

        let hijacked = response.is_upgrade()
            || (request.upgrade && response.framing(&head.method)? == BodyFraming::UntilEof);

        let raw = match mode {
            StreamMode::Single => {
                let bytes = conn.read_body_to_end().await?;
                return Ok(QueryResult::Value(decode_single(&response, &bytes)?));
            }
            StreamMode::JsonStream
                if !hijacked
                    && matches!(response.framing(&head.method)?, BodyFraming::Length(_)) =>
            {
                let bytes = conn.read_body_to_end().await?;
                let value = if bytes.iter().all(u8::is_ascii_whitespace) {
                    None
                } else {
                    Some(serde_json::from_slice(&bytes)?)
                };
                return Ok(QueryResult::JsonStream(JsonStream::buffered(value)));
            }
            _ if hijacked => RawStream::hijacked(conn, read_timeout),
            _ => RawStream::body(conn),
        };

        Ok(match mode {
            StreamMode::JsonStream => QueryResult::JsonStream(JsonStream::new(raw)),
            StreamMode::Multiplexed { tty: false } => {
                QueryResult::Multiplexed(MultiplexedStream::new(raw))
            }
            StreamMode::Single | StreamMode::Multiplexed { tty: true } | StreamMode::Raw => {
                QueryResult::Raw(raw)
            }
        })
    }

    /// `GET /_ping`, returning the body text (`OK`)
    ///
    /// # Errors
    ///
    /// As [`execute`](Self::execute).
    pub async fn ping(&self) -> Result<String, TransportError> {
        let result = self
            .execute(Request::get("_ping").unversioned(), &CallOptions::default(), StreamMode::Single)
            .await?;
        Ok(match result.into_value()? {
            Value::String(text) => text,
            Value::Null => String::new(),
            other => other.to_string(),
        })
    }

    /// `GET /version`
    ///
    /// # Errors
    ///
    /// As [`execute`](Self::execute).
    pub async fn version(&self) -> Result<Value, TransportError> {
        self.execute(Request::get("version"), &CallOptions::default(), StreamMode::Single)
            .await?
            .into_value()
    }

    /// Collect every value of a JSON stream response
    ///
    /// # Errors
    ///
    /// As [`execute`](Self::execute), plus any error while streaming.
    pub async fn json_stream_list(
        &self,
        request: Request,
        options: &CallOptions,
    ) -> Result<Vec<Value>, TransportError> {
        let mut stream = self
            .execute(request, options, StreamMode::JsonStream)
            .await?
            .into_json_stream()?;
        let mut values = Vec::new();
        while let Some(value) = stream.next().await? {
            values.push(value);
        }
        Ok(values)
    }

    /// Release long-lived resources (the SSH session, if any)
    ///
    /// # Errors
    ///
    /// `Ssh` if the session cannot be closed cleanly.
    pub async fn release(&self) -> Result<(), TransportError> {
        self.connector.release().await
    }

    fn encode_request(&self, request: &Request) -> Result<(RequestHead, Vec<u8>), TransportError> {
        let path = request.path.trim_start_matches('/');
        let mut target = if request.versioned {
            format!("/{}/{}", self.api_version, path)
        } else {
            format!("/{path}")
        };
        if !request.params.is_empty() {
            target.push('?');
            target.push_str(&encode_query(&request.params));
        }

        let mut headers = vec![
            ("Host".to_string(), self.host_header.clone()),
            ("User-Agent".to_string(), USER_AGENT.to_string()),
        ];
        if let Some((auth, registry)) = &request.registry_auth {
            headers.push((
                REGISTRY_AUTH_HEADER.to_string(),
                compose_auth_header(auth, registry.as_deref())?,
            ));
        }
        if request.upgrade {
            headers.push(("Connection".to_string(), "Upgrade".to_string()));
            headers.push(("Upgrade".to_string(), "tcp".to_string()));
        }
        headers.extend(request.headers.iter().cloned());

        Ok((
            RequestHead {
                method: request.method.clone(),
                target,
                headers,
            },
            request.body.clone(),
        ))
    }
}

impl fmt::Debug for DockerClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DockerClient")
            .field("endpoint", &self.connector.to_string())
            .field("api_version", &self.api_version)
            .field("timeouts", &self.timeouts)
            .finish()
    }
}

pub(crate) fn is_valid_api_version(version: &str) -> bool {
    let Some(rest) = version.strip_prefix('v') else {
        return false;
    };
    let Some((major, minor)) = rest.split_once('.') else {
        return false;
    };
    let numeric = |s: &str| !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit());
    numeric(major) && numeric(minor)
}

async fn daemon_error(conn: &mut HttpConnection, response: &ResponseHead) -> TransportError {
    let body = match conn.read_body_to_end().await {
        Ok(body) => body,
        Err(e) => return e,
    };
    let text = String::from_utf8_lossy(&body).trim().to_string();

    let is_json = response
        .header("content-type")
        .and_then(|ct| parse_content_type(ct).ok())
        .is_some_and(|ct| ct.is_json());
    let message = is_json
        .then(|| serde_json::from_slice::<Value>(&body).ok())
        .flatten()
        .and_then(|v| v.get("message").and_then(Value::as_str).map(str::to_string))
        .unwrap_or(text);

    tracing::debug!(status = response.status, message = %message, "Daemon returned an error");
    TransportError::Daemon {
        status: response.status,
        message,
    }
}

fn decode_single(response: &ResponseHead, body: &[u8]) -> Result<Value, TransportError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(Value::Null);
    }

    let content_type = response
        .header("content-type")
        .and_then(|ct| parse_content_type(ct).ok());
    match content_type {
        Some(ct) if ct.is_json() => Ok(serde_json::from_slice(body)?),
        Some(ct) if ct.main == "text" => Ok(Value::String(String::from_utf8_lossy(body).into_owned())),
        _ => Ok(serde_json::from_slice(body)
            .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(body).into_owned()))),
    }
}

/// Response in the shape requested by [`StreamMode`]
pub enum QueryResult {
    /// Whole body decoded
    Value(Value),
    /// Sequence of JSON values
    JsonStream(JsonStream),
    /// Demultiplexed stdout/stderr frames
    Multiplexed(MultiplexedStream),
    /// Raw bytes
    Raw(RawStream),
}

impl QueryResult {
    fn shape(&self) -> &'static str {
        match self {
            Self::Value(_) => "value",
            Self::JsonStream(_) => "JSON stream",
            Self::Multiplexed(_) => "multiplexed stream",
            Self::Raw(_) => "raw stream",
        }
    }

    fn mismatch(&self, wanted: &str) -> TransportError {
        TransportError::Decode(format!("Expected a {wanted} result, got a {}", self.shape()))
    }

    /// The decoded value
    ///
    /// # Errors
    ///
    /// `Decode` if the result is a stream.
    pub fn into_value(self) -> Result<Value, TransportError> {
        match self {
            Self::Value(v) => Ok(v),
            other => Err(other.mismatch("value")),
        }
    }

    /// The JSON stream
    ///
    /// # Errors
    ///
    /// `Decode` for any other shape.
    pub fn into_json_stream(self) -> Result<JsonStream, TransportError> {
        match self {
            Self::JsonStream(s) => Ok(s),
            other => Err(other.mismatch("JSON stream")),
        }
    }

    /// The frame stream
    ///
    /// # Errors
    ///
    /// `Decode` for any other shape.
    pub fn into_multiplexed(self) -> Result<MultiplexedStream, TransportError> {
        match self {
            Self::Multiplexed(s) => Ok(s),
            other => Err(other.mismatch("multiplexed stream")),
        }
    }

    /// The raw stream
    ///
    /// # Errors
    ///
    /// `Decode` for any other shape.
    pub fn into_raw(self) -> Result<RawStream, TransportError> {
        match self {
            Self::Raw(s) => Ok(s),
            other => Err(other.mismatch("raw stream")),
        }
    }
}

impl fmt::Debug for QueryResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Value(v) => f.debug_tuple("Value").field(v).finish(),
            other => f.write_str(other.shape()),
        }
    }
}

enum RawSource {
    /// Response body, delimited by HTTP framing
    Body(HttpConnection),
    /// Connection taken over by the daemon; readable and writable
    Hijacked {
        channel: Box<dyn Channel>,
        leftover: Vec<u8>,
        read_timeout: ResolvedTimeout,
    },
}

/// Bytes of a response body or a hijacked connection
pub struct RawStream {
    source: Option<RawSource>,
}

impl RawStream {
    fn body(conn: HttpConnection) -> Self {
        Self {
            source: Some(RawSource::Body(conn)),
        }
    }

    fn closed() -> Self {
        Self { source: None }
    }

    fn hijacked(conn: HttpConnection, read_timeout: ResolvedTimeout) -> Self {
        let (channel, leftover) = conn.into_upgraded();
        tracing::debug!(conn_id = %channel.id(), leftover = leftover.len(), "Connection hijacked");
        Self {
            source: Some(RawSource::Hijacked {
                channel,
                leftover,
                read_timeout,
            }),
        }
    }

    /// Whether the connection accepts writes
    #[must_use]
    pub fn is_hijacked(&self) -> bool {
        matches!(self.source, Some(RawSource::Hijacked { .. }))
    }

    /// Whether the stream has been closed or exhausted
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.source.is_none()
    }

    /// Next chunk of bytes, `None` at the end
    ///
    /// # Errors
    ///
    /// `OperationTimeout` when a read stalls, `Framing` for a truncated
    /// body. The stream is closed after any error.
    pub async fn next(&mut self) -> Result<Option<Vec<u8>>, TransportError> {
        let result = match self.source.as_mut() {
            None => return Ok(None),
            Some(RawSource::Body(conn)) => conn.read_body_chunk().await,
            Some(RawSource::Hijacked {
                channel,
                leftover,
                read_timeout,
            }) => {
                if !leftover.is_empty() {
                    return Ok(Some(std::mem::take(leftover)));
                }
                read_hijacked(channel, *read_timeout).await
            }
        };

        match result {
            Ok(Some(chunk)) => Ok(Some(chunk)),
            Ok(None) => {
                self.close();
                Ok(None)
            }
            Err(e) => {
                self.close();
                Err(e)
            }
        }
    }

    /// Read everything that remains
    ///
    /// # Errors
    ///
    /// As [`next`](Self::next).
    pub async fn read_to_end(&mut self) -> Result<Vec<u8>, TransportError> {
        let mut out = Vec::new();
        while let Some(chunk) = self.next().await? {
            out.extend_from_slice(&chunk);
        }
        Ok(out)
    }

    /// Write to a hijacked connection (container stdin)
    ///
    /// # Errors
    ///
    /// `ConnectionClosed` after close, `Io` (unsupported) when the
    /// connection was not hijacked, `OperationTimeout` if the write stalls.
    pub async fn write(&mut self, data: &[u8]) -> Result<(), TransportError> {
        let (channel, deadline) = self.hijacked_channel()?;
        deadline
            .run(async {
                channel.write_all(data).await?;
                channel.flush().await
            })
            .await
            .ok_or_else(|| timeout_error(deadline))??;
        Ok(())
    }

    /// Half-close: signal end of input while still reading output
    ///
    /// # Errors
    ///
    /// As [`write`](Self::write).
    pub async fn close_write(&mut self) -> Result<(), TransportError> {
        let (channel, deadline) = self.hijacked_channel()?;
        deadline
            .run(channel.shutdown())
            .await
            .ok_or_else(|| timeout_error(deadline))??;
        tracing::debug!(conn_id = %channel.id(), "Write side closed");
        Ok(())
    }

    /// Release the channel now
    pub fn close(&mut self) {
        if self.source.take().is_some() {
            tracing::debug!("Raw stream closed");
        }
    }

    /// Adapt into a [`Stream`] of chunks
    pub fn into_stream(self) -> impl Stream<Item = Result<Vec<u8>, TransportError>> {
        futures::stream::unfold(self, |mut stream| async move {
            match stream.next().await {
                Ok(Some(chunk)) => Some((Ok(chunk), stream)),
                Ok(None) => None,
                Err(e) => Some((Err(e), stream)),
            }
        })
    }

    fn hijacked_channel(&mut self) -> Result<(&mut Box<dyn Channel>, ResolvedTimeout), TransportError> {
        match self.source.as_mut() {
            Some(RawSource::Hijacked {
                channel,
                read_timeout,
                ..
            }) => Ok((channel, *read_timeout)),
            Some(RawSource::Body(_)) => Err(TransportError::Io(io::Error::new(
                io::ErrorKind::Unsupported,
                "Connection was not hijacked; request an upgrade to write",
            ))),
            None => Err(TransportError::ConnectionClosed),
        }
    }
}

async fn read_hijacked(
    channel: &mut Box<dyn Channel>,
    deadline: ResolvedTimeout,
) -> Result<Option<Vec<u8>>, TransportError> {
    let mut buf = vec![0u8; RAW_READ_CHUNK];
    let n = deadline
        .run(channel.read(&mut buf))
        .await
        .ok_or_else(|| timeout_error(deadline))??;
    if n == 0 {
        return Ok(None);
    }
    buf.truncate(n);
    Ok(Some(buf))
}

/// Stdout/stderr frames of a non-TTY attach, exec or log stream
pub struct MultiplexedStream {
    raw: RawStream,
    decoder: FrameDecoder,
}

impl MultiplexedStream {
    fn new(raw: RawStream) -> Self {
        Self {
            raw,
            decoder: FrameDecoder::new(),
        }
    }

    /// Accept frames larger than the default 64 MiB cap
    #[must_use]
    pub fn with_max_frame_size(mut self, limit: usize) -> Self {
        self.decoder = std::mem::take(&mut self.decoder).with_max_frame_size(limit);
        self
    }

    /// Next frame, `None` after a clean end of stream
    ///
    /// # Errors
    ///
    /// `Framing` for a malformed or truncated frame, plus any read error.
    pub async fn next(&mut self) -> Result<Option<StreamFrame>, TransportError> {
        loop {
            match self.decoder.decode() {
                Ok(Some(frame)) => return Ok(Some(frame)),
                Ok(None) => {}
                Err(e) => {
                    self.close();
                    return Err(e);
                }
            }

            match self.raw.next().await {
                Ok(Some(chunk)) => self.decoder.push(&chunk),
                Ok(None) => {
                    let outcome = self.decoder.finish();
                    self.decoder.clear();
                    return outcome.map(|()| None);
                }
                Err(e) => {
                    self.decoder.clear();
                    return Err(e);
                }
            }
        }
    }

    /// Write to the container's stdin (hijacked attach/exec only)
    ///
    /// # Errors
    ///
    /// As [`RawStream::write`].
    pub async fn write(&mut self, data: &[u8]) -> Result<(), TransportError> {
        self.raw.write(data).await
    }

    /// Signal end of stdin
    ///
    /// # Errors
    ///
    /// As [`RawStream::close_write`].
    pub async fn close_write(&mut self) -> Result<(), TransportError> {
        self.raw.close_write().await
    }

    /// Release the channel now
    pub fn close(&mut self) {
        self.decoder.clear();
        self.raw.close();
    }

    /// Adapt into a [`Stream`] of frames
    pub fn into_stream(self) -> impl Stream<Item = Result<StreamFrame, TransportError>> {
        futures::stream::unfold(self, |mut stream| async move {
            match stream.next().await {
                Ok(Some(frame)) => Some((Ok(frame), stream)),
                Ok(None) => None,
                Err(e) => {
                    stream.close();
                    Some((Err(e), stream))
                }
            }
        })
    }
}

/// Values of a JSON stream response (pull progress, events, build output)
pub struct JsonStream {
    raw: RawStream,
    decoder: JsonStreamDecoder,
    pending: VecDeque<Value>,
}

impl JsonStream {
    fn new(raw: RawStream) -> Self {
        Self {
            raw,
            decoder: JsonStreamDecoder::new(),
            pending: VecDeque::new(),
        }
    }

    fn buffered(value: Option<Value>) -> Self {
        Self {
            raw: RawStream::closed(),
            decoder: JsonStreamDecoder::new(),
            pending: value.into_iter().collect(),
        }
    }

    /// Next value, `None` after the body ends
    ///
    /// Values are yielded as soon as they are complete, regardless of how
    /// the body was chunked.
    ///
    /// # Errors
    ///
    /// `Decode` for malformed JSON or a value cut off by end of stream,
    /// plus any read error. The stream is closed after any error.
    pub async fn next(&mut self) -> Result<Option<Value>, TransportError> {
        loop {
            if let Some(value) = self.pending.pop_front() {
                return Ok(Some(value));
            }

            match self.decoder.decode() {
                Ok(Some(value)) => return Ok(Some(value)),
                Ok(None) => {}
                Err(e) => {
                    self.close();
                    return Err(e);
                }
            }

            match self.raw.next().await {
                Ok(Some(chunk)) => self.decoder.push(&chunk),
                Ok(None) => match self.decoder.finish() {
                    Ok(rest) if rest.is_empty() => return Ok(None),
                    Ok(rest) => self.pending.extend(rest),
                    Err(e) => {
                        self.close();
                        return Err(e);
                    }
                },
                Err(e) => {
                    self.close();
                    return Err(e);
                }
            }
        }
    }

    /// Release the channel now; later calls to `next` return `None`
    pub fn close(&mut self) {
        self.pending.clear();
        self.decoder = JsonStreamDecoder::new();
        self.raw.close();
    }

    /// Adapt into a [`Stream`] of values
    pub fn into_stream(self) -> impl Stream<Item = Result<Value, TransportError>> {
        futures::stream::unfold(self, |mut stream| async move {
            match stream.next().await {
                Ok(Some(value)) => Some((Ok(value), stream)),
                Ok(None) => None,
                Err(e) => Some((Err(e), stream)),
            }
        })
    }
}
