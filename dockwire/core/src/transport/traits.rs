//! Transport Traits
//!
//! Core definitions shared by every transport:
//! - `Channel`: one open, exclusively owned byte channel to the daemon
//! - `ConnectionId`: log correlation id for a channel
//! - `TransportError`: every failure the transport surfaces, by kind

use std::fmt;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

/// Unique identifier for an open channel
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ConnectionId(pub String);

impl ConnectionId {
    /// Generate a new unique connection ID using cryptographically random 128-bit value
    #[must_use]
    pub fn new() -> Self {
        use rand::Rng;
        let bytes: [u8; 16] = rand::thread_rng().gen();
        Self(format!("conn_{}", hex::encode(bytes)))
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Which transport backs a channel
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChannelKind {
    /// Local Unix domain socket
    Unix,
    /// Plain TCP
    Tcp,
    /// TCP wrapped in TLS
    Tls,
    /// Local socket bridged over an SSH exec channel
    SshTunnel,
}

impl fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unix => write!(f, "unix"),
            Self::Tcp => write!(f, "tcp"),
            Self::Tls => write!(f, "tls"),
            Self::SshTunnel => write!(f, "ssh"),
        }
    }
}

/// A raw bidirectional byte channel to the daemon
///
/// All variants support partial reads and half-close: calling
/// `AsyncWriteExt::shutdown` closes the write side while reads continue,
/// which hijacked attach sessions rely on. Dropping the channel closes it
/// and releases whatever the transport holds (sockets, SSH tunnels).
pub trait Channel: AsyncRead + AsyncWrite + Send + Unpin {
    /// Transport variant
    fn kind(&self) -> ChannelKind;

    /// Log correlation id
    fn id(&self) -> &ConnectionId;
}

/// A `Channel` over any owned tokio stream (unix, tcp, tls)
pub struct StreamChannel<S> {
    stream: S,
    kind: ChannelKind,
    id: ConnectionId,
}

impl<S> StreamChannel<S>
where
    S: AsyncRead + AsyncWrite + Send + Unpin,
{
    /// Wrap a connected stream, assigning a fresh connection id
    pub fn new(stream: S, kind: ChannelKind) -> Self {
        Self {
            stream,
            kind,
            id: ConnectionId::new(),
        }
    }

    /// Underlying stream
    pub fn get_ref(&self) -> &S {
        &self.stream
    }
}

impl<S> Channel for StreamChannel<S>
where
    S: AsyncRead + AsyncWrite + Send + Unpin,
{
    fn kind(&self) -> ChannelKind {
        self.kind
    }

    fn id(&self) -> &ConnectionId {
        &self.id
    }
}

impl<S: AsyncRead + Unpin> AsyncRead for StreamChannel<S> {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.stream).poll_read(cx, buf)
    }
}

impl<S: AsyncWrite + Unpin> AsyncWrite for StreamChannel<S> {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.stream).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.stream).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.stream).poll_shutdown(cx)
    }
}

/// Fieldless discriminant of [`TransportError`] for callers that branch on kind
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    /// URL scheme not recognised
    UnsupportedScheme,
    /// URL or target malformed
    InvalidTarget,
    /// Channel could not be opened in time
    ConnectTimeout,
    /// A read or write exceeded the per-call deadline
    OperationTimeout,
    /// Peer certificate rejected
    TlsVerification,
    /// TLS material or setup problem
    Tls,
    /// SSH host key unknown, changed or revoked
    HostKeyVerification,
    /// Truncated or malformed stream frame / HTTP framing
    Framing,
    /// Malformed JSON
    Decode,
    /// Daemon answered with a non-success status
    Daemon,
    /// SSH authentication failed
    Authentication,
    /// SSH protocol or channel failure
    Ssh,
    /// Docker context missing or malformed
    InvalidContext,
    /// Connection refused or otherwise failed to open
    ConnectionFailed,
    /// Peer closed the channel unexpectedly
    ConnectionClosed,
    /// Other I/O failure
    Io,
}

/// Errors that can occur during transport operations
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// URL scheme is not one of unix/tcp/http/https/ssh
    #[error("Unsupported URL scheme: {0}")]
    UnsupportedScheme(String),

    /// URL or connection parameters malformed
    #[error("Invalid target: {0}")]
    InvalidTarget(String),

    /// Opening the channel exceeded the connect deadline
    #[error("Connect timed out after {after:?}")]
    ConnectTimeout {
        /// Resolved connect deadline
        after: Duration,
    },

    /// A read/write exceeded the per-call deadline; the channel was closed
    #[error("Operation timed out after {after:?}")]
    OperationTimeout {
        /// Resolved read deadline
        after: Duration,
    },

    /// Server certificate failed verification
    #[error("TLS verification failed: {0}")]
    TlsVerification(String),

    /// TLS material could not be loaded or the handshake failed
    #[error("TLS error: {0}")]
    Tls(String),

    /// SSH host key not trusted
    #[error("Host key verification failed for {host}: expected {}, got {actual}", .expected.as_deref().unwrap_or("a known_hosts entry"))]
    HostKeyVerification {
        /// Host (and non-default port) being verified
        host: String,
        /// Fingerprint recorded in the trust store, if any
        expected: Option<String>,
        /// Fingerprint presented by the server
        actual: String,
    },

    /// Truncated or malformed frame
    #[error("Framing error: {0}")]
    Framing(String),

    /// Malformed JSON
    #[error("Decode error: {0}")]
    Decode(String),

    /// Non-2xx daemon response
    #[error("Daemon error {status}: {message}")]
    Daemon {
        /// HTTP status code
        status: u16,
        /// `message` from the JSON error body, or the raw body text
        message: String,
    },

    /// SSH authentication rejected (credentials redacted)
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// SSH protocol or channel failure (credentials redacted)
    #[error("SSH error: {0}")]
    Ssh(String),

    /// Docker context missing or malformed
    #[error("Invalid Docker context {context:?}: {message}")]
    InvalidContext {
        /// Context name
        context: String,
        /// What was wrong
        message: String,
    },

    /// Connection to peer failed
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Connection was closed
    #[error("Connection closed")]
    ConnectionClosed,

    /// IO error from underlying transport
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl TransportError {
    /// Kind of this error
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::UnsupportedScheme(_) => ErrorKind::UnsupportedScheme,
            Self::InvalidTarget(_) => ErrorKind::InvalidTarget,
            Self::ConnectTimeout { .. } => ErrorKind::ConnectTimeout,
            Self::OperationTimeout { .. } => ErrorKind::OperationTimeout,
            Self::TlsVerification(_) => ErrorKind::TlsVerification,
            Self::Tls(_) => ErrorKind::Tls,
            Self::HostKeyVerification { .. } => ErrorKind::HostKeyVerification,
            Self::Framing(_) => ErrorKind::Framing,
            Self::Decode(_) => ErrorKind::Decode,
            Self::Daemon { .. } => ErrorKind::Daemon,
            Self::Authentication(_) => ErrorKind::Authentication,
            Self::Ssh(_) => ErrorKind::Ssh,
            Self::InvalidContext { .. } => ErrorKind::InvalidContext,
            Self::ConnectionFailed(_) => ErrorKind::ConnectionFailed,
            Self::ConnectionClosed => ErrorKind::ConnectionClosed,
            Self::Io(_) => ErrorKind::Io,
        }
    }

    /// HTTP status for daemon errors
    #[must_use]
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Daemon { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for TransportError {
    fn from(err: serde_json::Error) -> Self {
        Self::Decode(err.to_string())
    }
}

impl From<russh::Error> for TransportError {
    fn from(err: russh::Error) -> Self {
        Self::Ssh(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_id_unique() {
        let id1 = ConnectionId::new();
        let id2 = ConnectionId::new();
        assert_ne!(id1, id2);
        assert!(id1.0.starts_with("conn_"));
    }

    #[test]
    fn test_connection_id_display() {
        let id = ConnectionId("test_conn".to_string());
        assert_eq!(format!("{}", id), "test_conn");
    }

    #[test]
    fn test_transport_error_display() {
        let err = TransportError::ConnectionFailed("test".to_string());
        assert!(err.to_string().contains("Connection failed"));

        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "not found");
        let err = TransportError::Io(io_err);
        assert!(err.to_string().contains("IO error"));
        assert_eq!(err.kind(), ErrorKind::Io);
    }

    #[test]
    fn test_host_key_error_names_both_fingerprints() {
        let err = TransportError::HostKeyVerification {
            host: "build-box".into(),
            expected: Some("SHA256:aaa".into()),
            actual: "SHA256:bbb".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("build-box"));
        assert!(msg.contains("SHA256:aaa"));
        assert!(msg.contains("SHA256:bbb"));

        let unknown = TransportError::HostKeyVerification {
            host: "new-box".into(),
            expected: None,
            actual: "SHA256:ccc".into(),
        };
        assert!(unknown.to_string().contains("known_hosts"));
    }

    #[tokio::test]
    async fn test_stream_channel_half_close() {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let (a, mut b) = tokio::io::duplex(64);
        let mut channel = StreamChannel::new(a, ChannelKind::Unix);
        assert_eq!(channel.kind(), ChannelKind::Unix);
        assert!(channel.id().0.starts_with("conn_"));

        channel.write_all(b"ping").await.unwrap();
        channel.shutdown().await.unwrap();

        let mut received = Vec::new();
        b.read_to_end(&mut received).await.unwrap();
        assert_eq!(received, b"ping");

        b.write_all(b"pong").await.unwrap();
        drop(b);
        let mut reply = Vec::new();
        channel.read_to_end(&mut reply).await.unwrap();
        assert_eq!(reply, b"pong");
    }

    #[test]
    fn test_daemon_error_status() {
        let err = TransportError::Daemon {
            status: 404,
            message: "No such container: x".into(),
        };
        assert_eq!(err.kind(), ErrorKind::Daemon);
        assert_eq!(err.status(), Some(404));
        assert_eq!(TransportError::ConnectionClosed.status(), None);
    }
}
