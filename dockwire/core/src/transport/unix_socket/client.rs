//! Unix Socket Client Channel
//!
//! Connects to the daemon's local socket.

use std::path::Path;

use tokio::net::UnixStream;

use crate::transport::traits::{Channel, ChannelKind, StreamChannel, TransportError};

/// Channel over a connected Unix stream
pub type UnixChannel = StreamChannel<UnixStream>;

/// Connect to the daemon socket at `socket_path`
///
/// # Errors
///
/// `ConnectionFailed` naming the path when the socket is missing or refuses.
pub async fn connect(socket_path: &Path) -> Result<UnixChannel, TransportError> {
    let stream = UnixStream::connect(socket_path).await.map_err(|e| {
        TransportError::ConnectionFailed(format!(
            "Failed to connect to {:?}: {}",
            socket_path, e
        ))
    })?;

    let channel = StreamChannel::new(stream, ChannelKind::Unix);
    tracing::debug!(conn_id = %channel.id(), path = ?socket_path, "Connected to daemon socket");
    Ok(channel)
}
