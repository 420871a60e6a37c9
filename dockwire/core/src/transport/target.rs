//! Connection Targets
//!
//! Classifies a daemon URL into one of the supported transports:
//!
//! | Scheme     | Target                                   |
//! |------------|------------------------------------------|
//! | `unix://`  | local socket path                        |
//! | `tcp://`   | TCP, TLS when TLS material is supplied   |
//! | `http://`  | TCP, TLS when TLS material is supplied   |
//! | `https://` | TCP with TLS (public roots by default)   |
//! | `ssh://`   | SSH tunnel to the remote daemon socket   |
//!
//! Anything else is `TransportError::UnsupportedScheme`.

use std::fmt;
use std::path::PathBuf;

use super::ssh::{SshEndpoint, SshPassword};
use super::tls::TlsConfig;
use super::TransportError;

/// Default plain TCP port
pub const DEFAULT_TCP_PORT: u16 = 2375;

/// Default TLS port
pub const DEFAULT_TLS_PORT: u16 = 2376;

/// Where and how to reach the daemon
#[derive(Clone, Debug)]
pub enum ConnectionTarget {
    /// Local Unix domain socket
    Unix {
        /// Socket path
        path: PathBuf,
    },
    /// TCP, optionally TLS-secured
    Tcp {
        /// Host name or address
        host: String,
        /// Port
        port: u16,
        /// TLS material; `None` means plain TCP
        tls: Option<TlsConfig>,
    },
    /// Tunnel over an SSH session
    Ssh(SshEndpoint),
}

impl ConnectionTarget {
    /// Parse a daemon URL
    ///
    /// `tls` applies to `tcp://` and `http://` URLs (for example material
    /// from `DOCKER_CERT_PATH` or a context). `https://` always uses TLS,
    /// falling back to default verification when `tls` is `None`.
    ///
    /// # Errors
    ///
    /// `UnsupportedScheme` for an unknown scheme, `InvalidTarget` for a
    /// malformed URL.
    pub fn parse(url: &str, tls: Option<TlsConfig>) -> Result<Self, TransportError> {
        let (scheme, rest) = url
            .split_once("://")
            .ok_or_else(|| TransportError::InvalidTarget(format!("Missing URL scheme in {url:?}")))?;

        match scheme.to_ascii_lowercase().as_str() {
            "unix" => {
                if rest.is_empty() {
                    return Err(TransportError::InvalidTarget(
                        "unix:// URL without a socket path".to_string(),
                    ));
                }
                // unix:///path keeps the leading slash; unix://relative is taken verbatim
                Ok(Self::Unix {
                    path: PathBuf::from(rest),
                })
            }
            "tcp" | "http" => {
                let authority = Authority::parse(rest)?;
                reject_userinfo(&authority, scheme)?;
                let default_port = if tls.is_some() {
                    DEFAULT_TLS_PORT
                } else {
                    DEFAULT_TCP_PORT
                };
                Ok(Self::Tcp {
                    host: authority.host,
                    port: authority.port.unwrap_or(default_port),
                    tls,
                })
            }
            "https" => {
                let authority = Authority::parse(rest)?;
                reject_userinfo(&authority, scheme)?;
                Ok(Self::Tcp {
                    host: authority.host,
                    port: authority.port.unwrap_or(DEFAULT_TLS_PORT),
                    tls: Some(tls.unwrap_or_default()),
                })
            }
            "ssh" => {
                let authority = Authority::parse(rest)?;
                Ok(Self::Ssh(SshEndpoint::new(
                    authority.user,
                    authority.password.map(SshPassword::new),
                    authority.host,
                    authority.port,
                )))
            }
            other => Err(TransportError::UnsupportedScheme(other.to_string())),
        }
    }

    /// Whether this target uses TLS
    #[must_use]
    pub fn is_tls(&self) -> bool {
        matches!(self, Self::Tcp { tls: Some(_), .. })
    }
}

impl fmt::Display for ConnectionTarget {
    /// Loggable form; never includes a password
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unix { path } => write!(f, "unix://{}", path.display()),
            Self::Tcp {
                host,
                port,
                tls: Some(_),
            } => write!(f, "https://{}", join_host_port(host, *port)),
            Self::Tcp {
                host,
                port,
                tls: None,
            } => write!(f, "tcp://{}", join_host_port(host, *port)),
            Self::Ssh(endpoint) => write!(f, "{endpoint}"),
        }
    }
}

/// `host:port`, bracketing IPv6 literals
pub(crate) fn join_host_port(host: &str, port: u16) -> String {
    if host.contains(':') {
        format!("[{host}]:{port}")
    } else {
        format!("{host}:{port}")
    }
}

fn reject_userinfo(authority: &Authority, scheme: &str) -> Result<(), TransportError> {
    if authority.user.is_some() {
        return Err(TransportError::InvalidTarget(format!(
            "{scheme}:// URLs do not take credentials"
        )));
    }
    Ok(())
}

/// `[user[:password]@]host[:port][/path]`
#[derive(Debug, PartialEq, Eq)]
struct Authority {
    user: Option<String>,
    password: Option<String>,
    host: String,
    port: Option<u16>,
}

impl Authority {
    fn parse(rest: &str) -> Result<Self, TransportError> {
        // Userinfo first: a password may itself contain '/', '?' or '#'
        let (userinfo, after) = match rest.rsplit_once('@') {
            Some((userinfo, after)) => (Some(userinfo), after),
            None => (None, rest),
        };
        let hostport = after.split(['/', '?', '#']).next().unwrap_or_default();

        let (user, password) = match userinfo {
            Some(info) => match info.split_once(':') {
                Some((user, password)) => (Some(user.to_string()), Some(password.to_string())),
                None => (Some(info.to_string()), None),
            },
            None => (None, None),
        };

        if user.as_deref() == Some("") {
            return Err(TransportError::InvalidTarget(
                "Empty user name in URL".to_string(),
            ));
        }

        let (host, port) = if let Some(bracketed) = hostport.strip_prefix('[') {
            let (host, after) = bracketed.split_once(']').ok_or_else(|| {
                TransportError::InvalidTarget(format!("Unterminated IPv6 literal in {hostport:?}"))
            })?;
            let port = match after {
                "" => None,
                p => Some(p.strip_prefix(':').ok_or_else(|| {
                    TransportError::InvalidTarget(format!("Invalid port in {hostport:?}"))
                })?),
            };
            (host, port)
        } else {
            match hostport.rsplit_once(':') {
                Some((host, port)) => (host, Some(port)),
                None => (hostport, None),
            }
        };

        if host.is_empty() {
            return Err(TransportError::InvalidTarget(
                "URL without a host".to_string(),
            ));
        }

        let port = port
            .map(|p| {
                p.parse::<u16>()
                    .map_err(|_| TransportError::InvalidTarget(format!("Invalid port {p:?}")))
            })
            .transpose()?;

        Ok(Self {
            user,
            password,
            host: host.to_string(),
            port,
        })
    }
}
