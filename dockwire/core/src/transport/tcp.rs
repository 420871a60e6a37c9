//! TCP and TLS Channels

use std::sync::Arc;

use rustls::pki_types::ServerName;
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;
use tokio_rustls::TlsConnector;

use super::target::join_host_port;
use super::tls::handshake_error;
use super::traits::{Channel, ChannelKind, StreamChannel, TransportError};

/// Plain TCP channel
pub type TcpChannel = StreamChannel<TcpStream>;

/// TLS-over-TCP channel
pub type TlsChannel = StreamChannel<TlsStream<TcpStream>>;

/// Connect a plain TCP channel
///
/// # Errors
///
/// `ConnectionFailed` naming the address.
pub async fn connect_tcp(host: &str, port: u16) -> Result<TcpChannel, TransportError> {
    let stream = dial(host, port).await?;
    let channel = StreamChannel::new(stream, ChannelKind::Tcp);
    tracing::debug!(conn_id = %channel.id(), host = %host, port, "TCP connected");
    Ok(channel)
}

/// Connect and complete a TLS handshake
///
/// # Errors
///
/// `ConnectionFailed` if TCP fails, `TlsVerification` if the server
/// certificate is rejected, `Tls` for any other handshake failure.
pub async fn connect_tls(
    host: &str,
    port: u16,
    server_name: ServerName<'static>,
    config: Arc<rustls::ClientConfig>,
) -> Result<TlsChannel, TransportError> {
    let stream = dial(host, port).await?;
    let tls = TlsConnector::from(config)
        .connect(server_name, stream)
        .await
        .map_err(handshake_error)?;

    let channel = StreamChannel::new(tls, ChannelKind::Tls);
    tracing::debug!(conn_id = %channel.id(), host = %host, port, "TLS connected");
    Ok(channel)
}

async fn dial(host: &str, port: u16) -> Result<TcpStream, TransportError> {
    let stream = TcpStream::connect((host, port)).await.map_err(|e| {
        TransportError::ConnectionFailed(format!(
            "Failed to connect to {}: {}",
            join_host_port(host, port),
            e
        ))
    })?;
    // Request/response traffic; do not batch small writes
    stream.set_nodelay(true)?;
    Ok(stream)
}
