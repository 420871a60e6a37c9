//! SSH Tunnel Bridge
//!
//! One tunnel per logical connection. Setup:
//!
//! 1. owner-only temp directory (0700) holding `docker.sock` (0600)
//! 2. remote `docker system dial-stdio` via the [`StdioDialer`]
//! 3. connect locally, accept exactly that one connection
//! 4. copy bytes both ways until both sides finish
//!
//! The temp directory, socket file and bridge task are owned by
//! [`SshTunnel`]; dropping it tears all of them down, whichever path
//! (success, error, cancellation) leads there.

use std::io;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::task::{Context, Poll};

use tempfile::TempDir;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::UnixStream;
use tokio::task::JoinHandle;

use super::{RemoteStdio, StdioDialer};
use crate::timeout::ResolvedTimeout;
use crate::transport::traits::{Channel, ChannelKind, ConnectionId, TransportError};
use crate::transport::unix_socket::OwnerOnlyListener;

/// Socket file name inside the tunnel directory
pub const SOCKET_NAME: &str = "docker.sock";

const TEMP_DIR_PREFIX: &str = "dockwire-ssh-";

/// Resources backing one open tunnel
pub struct SshTunnel {
    bridge: JoinHandle<()>,
    socket_path: PathBuf,
    // Removes the socket file on drop
    _listener: OwnerOnlyListener,
    // Dropped last: removes the directory and anything left in it
    dir: TempDir,
}

impl SshTunnel {
    /// Open a tunnel with its socket under the system temp directory
    ///
    /// # Errors
    ///
    /// Any setup failure, after the socket directory has been removed.
    pub async fn open(
        dialer: &dyn StdioDialer,
        accept_timeout: ResolvedTimeout,
    ) -> Result<SshChannel, TransportError> {
        Self::open_in(&std::env::temp_dir(), dialer, accept_timeout).await
    }

    /// Open a tunnel with its socket directory created under `root`
    ///
    /// # Errors
    ///
    /// Any setup failure, after the socket directory has been removed.
    pub async fn open_in(
        root: &Path,
        dialer: &dyn StdioDialer,
        accept_timeout: ResolvedTimeout,
    ) -> Result<SshChannel, TransportError> {
        let dir = tempfile::Builder::new()
            .prefix(TEMP_DIR_PREFIX)
            .tempdir_in(root)?;
        std::fs::set_permissions(dir.path(), std::fs::Permissions::from_mode(0o700))?;

        let socket_path = dir.path().join(SOCKET_NAME);
        let listener = OwnerOnlyListener::bind(&socket_path)?;

        let remote = dialer.dial_stdio().await.map_err(|e| {
            tracing::debug!(error = %e, "Remote dial failed, removing tunnel socket");
            e
        })?;

        let stream = UnixStream::connect(&socket_path).await?;
        let local = listener.accept_one(accept_timeout).await?;

        let id = ConnectionId::new();
        let bridge = tokio::spawn(run_bridge(local, remote, id.clone()));

        tracing::debug!(conn_id = %id, path = ?socket_path, "SSH tunnel established");

        Ok(SshChannel {
            stream,
            id,
            tunnel: Some(SshTunnel {
                bridge,
                socket_path,
                _listener: listener,
                dir,
            }),
        })
    }

    /// Directory holding the tunnel socket
    #[must_use]
    pub fn dir(&self) -> &Path {
        self.dir.path()
    }

    /// Tunnel socket path
    #[must_use]
    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }
}

impl Drop for SshTunnel {
    fn drop(&mut self) {
        // Dropping the remote stream inside the task closes the SSH channel
        self.bridge.abort();
        tracing::debug!(path = ?self.socket_path, "SSH tunnel closed");
    }
}

async fn run_bridge(mut local: UnixStream, mut remote: RemoteStdio, id: ConnectionId) {
    match tokio::io::copy_bidirectional(&mut local, &mut remote).await {
        Ok((to_remote, to_local)) => {
            tracing::debug!(conn_id = %id, to_remote, to_local, "SSH bridge finished");
        }
        Err(e) => {
            tracing::debug!(conn_id = %id, error = %e, "SSH bridge ended with error");
        }
    }
}

/// Caller's end of an SSH tunnel
pub struct SshChannel {
    stream: UnixStream,
    id: ConnectionId,
    tunnel: Option<SshTunnel>,
}

impl SshChannel {
    /// Tunnel resources, until closed
    #[must_use]
    pub fn tunnel(&self) -> Option<&SshTunnel> {
        self.tunnel.as_ref()
    }

    /// Tear down the tunnel now
    ///
    /// Equivalent to dropping the channel; later reads and writes fail.
    pub fn close(&mut self) {
        self.tunnel.take();
    }
}

impl Channel for SshChannel {
    fn kind(&self) -> ChannelKind {
        ChannelKind::SshTunnel
    }

    fn id(&self) -> &ConnectionId {
        &self.id
    }
}

impl AsyncRead for SshChannel {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.stream).poll_read(cx, buf)
    }
}

impl AsyncWrite for SshChannel {
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

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};

    const ACCEPT: ResolvedTimeout = ResolvedTimeout::After(Duration::from_secs(2));

    struct FailingDialer;

    #[async_trait]
    impl StdioDialer for FailingDialer {
        async fn dial_stdio(&self) -> Result<RemoteStdio, TransportError> {
            Err(TransportError::Ssh("dial-stdio refused".into()))
        }
    }

    /// Hands out one end of a duplex pipe; the test keeps the other
    struct PipeDialer(parking_lot::Mutex<Option<DuplexStream>>);

    #[async_trait]
    impl StdioDialer for PipeDialer {
        async fn dial_stdio(&self) -> Result<RemoteStdio, TransportError> {
            let end = self.0.lock().take().ok_or(TransportError::ConnectionClosed)?;
            Ok(Box::new(end))
        }
    }

    fn entries(dir: &Path) -> usize {
        std::fs::read_dir(dir).unwrap().count()
    }

    #[tokio::test]
    async fn test_dial_failure_removes_socket_dir() {
        let root = tempfile::TempDir::new().unwrap();

        let result = SshTunnel::open_in(root.path(), &FailingDialer, ACCEPT).await;

        assert!(matches!(result, Err(TransportError::Ssh(_))));
        assert_eq!(entries(root.path()), 0);
    }

    #[tokio::test]
    async fn test_bridge_carries_bytes_and_half_close() {
        let root = tempfile::TempDir::new().unwrap();
        let (ours, mut daemon) = tokio::io::duplex(1024);
        let dialer = PipeDialer(parking_lot::Mutex::new(Some(ours)));

        let mut channel = SshTunnel::open_in(root.path(), &dialer, ACCEPT).await.unwrap();
        assert_eq!(channel.kind(), ChannelKind::SshTunnel);

        let tunnel_dir = channel.tunnel().unwrap().dir().to_path_buf();
        let mode = std::fs::metadata(&tunnel_dir).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o700);
        let socket_mode = std::fs::metadata(channel.tunnel().unwrap().socket_path())
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(socket_mode & 0o777, 0o600);

        channel.write_all(b"GET /_ping HTTP/1.1\r\n\r\n").await.unwrap();
        channel.shutdown().await.unwrap();

        let mut request = Vec::new();
        daemon.read_to_end(&mut request).await.unwrap();
        assert_eq!(request, b"GET /_ping HTTP/1.1\r\n\r\n");

        daemon.write_all(b"OK").await.unwrap();
        drop(daemon);

        let mut reply = Vec::new();
        channel.read_to_end(&mut reply).await.unwrap();
        assert_eq!(reply, b"OK");

        drop(channel);
        assert!(!tunnel_dir.exists());
        assert_eq!(entries(root.path()), 0);
    }

    #[tokio::test]
    async fn test_close_removes_socket_dir() {
        let root = tempfile::TempDir::new().unwrap();
        let (ours, _daemon) = tokio::io::duplex(64);
        let dialer = PipeDialer(parking_lot::Mutex::new(Some(ours)));

        let mut channel = SshTunnel::open_in(root.path(), &dialer, ACCEPT).await.unwrap();
        assert_eq!(entries(root.path()), 1);

        channel.close();
        assert!(channel.tunnel().is_none());
        assert_eq!(entries(root.path()), 0);
    }
}
