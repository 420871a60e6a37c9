//! Connector
//!
//! Turns a validated [`ConnectionTarget`] into open [`Channel`]s. All
//! per-target preparation (TLS configuration, server name) happens once in
//! [`Connector::new`]; [`Connector::open`] only dials.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use rustls::pki_types::ServerName;
use tokio::sync::Mutex;

use super::ssh::{SshEndpoint, SshSession, SshTunnel, StdioDialer};
use super::target::{join_host_port, ConnectionTarget};
use super::traits::{Channel, ChannelKind, TransportError};
use super::{tcp, tls, unix_socket};
use crate::timeout::ResolvedTimeout;

/// Opens channels to one daemon endpoint
pub enum Connector {
    /// Local socket
    Unix {
        /// Socket path
        path: PathBuf,
    },
    /// Plain TCP
    Tcp {
        /// Host
        host: String,
        /// Port
        port: u16,
    },
    /// TCP with TLS
    Tls {
        /// Host
        host: String,
        /// Port
        port: u16,
        /// SNI / verification name
        server_name: ServerName<'static>,
        /// Prepared rustls configuration
        config: Arc<rustls::ClientConfig>,
    },
    /// SSH tunnel, session established on first use and reused
    Ssh(SshConnector),
    /// Tunnel over a caller-supplied remote stdio dialer
    Tunnel {
        /// Source of remote stdio streams
        dialer: Arc<dyn StdioDialer>,
    },
}

impl Connector {
    /// Prepare a connector for `target`
    ///
    /// # Errors
    ///
    /// `Tls` when TLS material cannot be loaded, `InvalidTarget` when the
    /// host is not a valid TLS server name.
    pub fn new(target: ConnectionTarget) -> Result<Self, TransportError> {
        let connector = match target {
            ConnectionTarget::Unix { path } => Self::Unix { path },
            ConnectionTarget::Tcp {
                host,
                port,
                tls: None,
            } => Self::Tcp { host, port },
            ConnectionTarget::Tcp {
                host,
                port,
                tls: Some(tls_config),
            } => Self::Tls {
                server_name: tls::server_name(&host)?,
                config: tls_config.build()?,
                host,
                port,
            },
            ConnectionTarget::Ssh(endpoint) => Self::Ssh(SshConnector::new(endpoint)),
        };

        tracing::debug!(endpoint = %connector, "Connector ready");
        Ok(connector)
    }

    /// Connector that tunnels through `dialer` instead of an SSH session
    pub fn with_stdio_dialer(dialer: Arc<dyn StdioDialer>) -> Self {
        Self::Tunnel { dialer }
    }

    /// Kind of channel this connector opens
    #[must_use]
    pub fn kind(&self) -> ChannelKind {
        match self {
            Self::Unix { .. } => ChannelKind::Unix,
            Self::Tcp { .. } => ChannelKind::Tcp,
            Self::Tls { .. } => ChannelKind::Tls,
            Self::Ssh(_) | Self::Tunnel { .. } => ChannelKind::SshTunnel,
        }
    }

    /// Open a fresh channel within `connect_timeout`
    ///
    /// # Errors
    ///
    /// `ConnectTimeout` when the deadline passes first; otherwise whatever
    /// the transport reports.
    pub async fn open(
        &self,
        connect_timeout: ResolvedTimeout,
    ) -> Result<Box<dyn Channel>, TransportError> {
        let after = connect_timeout.duration().unwrap_or_default();
        let channel = connect_timeout
            .run(self.open_inner(connect_timeout))
            .await
            .ok_or(TransportError::ConnectTimeout { after })??;

        tracing::debug!(conn_id = %channel.id(), kind = %channel.kind(), "Channel opened");
        Ok(channel)
    }

    async fn open_inner(
        &self,
        connect_timeout: ResolvedTimeout,
    ) -> Result<Box<dyn Channel>, TransportError> {
        match self {
            Self::Unix { path } => Ok(Box::new(unix_socket::connect(path).await?)),
            Self::Tcp { host, port } => Ok(Box::new(tcp::connect_tcp(host, *port).await?)),
            Self::Tls {
                host,
                port,
                server_name,
                config,
            } => Ok(Box::new(
                tcp::connect_tls(host, *port, server_name.clone(), Arc::clone(config)).await?,
            )),
            Self::Ssh(ssh) => {
                let session = ssh.session().await?;
                Ok(Box::new(SshTunnel::open(session.as_ref(), connect_timeout).await?))
            }
            Self::Tunnel { dialer } => {
                Ok(Box::new(SshTunnel::open(dialer.as_ref(), connect_timeout).await?))
            }
        }
    }

    /// Release long-lived resources (the SSH session, if any)
    ///
    /// # Errors
    ///
    /// `Ssh` if the disconnect message cannot be sent.
    pub async fn release(&self) -> Result<(), TransportError> {
        match self {
            Self::Ssh(ssh) => ssh.release().await,
            _ => Ok(()),
        }
    }
}

impl fmt::Display for Connector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unix { path } => write!(f, "unix://{}", path.display()),
            Self::Tcp { host, port } => write!(f, "tcp://{}", join_host_port(host, *port)),
            Self::Tls { host, port, .. } => write!(f, "https://{}", join_host_port(host, *port)),
            Self::Ssh(ssh) => write!(f, "{}", ssh.endpoint),
            Self::Tunnel { .. } => write!(f, "stdio-tunnel"),
        }
    }
}

impl fmt::Debug for Connector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Connector").field(&self.to_string()).finish()
    }
}

/// SSH connector state
pub struct SshConnector {
    endpoint: SshEndpoint,
    session: Mutex<Option<Arc<SshSession>>>,
}

impl SshConnector {
    fn new(endpoint: SshEndpoint) -> Self {
        Self {
            endpoint,
            session: Mutex::new(None),
        }
    }

    /// The endpoint this connector reaches
    #[must_use]
    pub fn endpoint(&self) -> &SshEndpoint {
        &self.endpoint
    }

    /// Current session, connecting if there is none or it has closed
    async fn session(&self) -> Result<Arc<SshSession>, TransportError> {
        let mut slot = self.session.lock().await;
        if let Some(existing) = slot.as_ref().filter(|s| !s.is_closed()) {
            return Ok(Arc::clone(existing));
        }

        let session = SshSession::connect(&self.endpoint).await?;
        *slot = Some(Arc::clone(&session));
        Ok(session)
    }

    async fn release(&self) -> Result<(), TransportError> {
        let session = self.session.lock().await.take();
        match session {
            Some(session) => session.release().await,
            None => Ok(()),
        }
    }
}
