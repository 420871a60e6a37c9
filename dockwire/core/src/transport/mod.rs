//! Transport Layer for Daemon Connections
//!
//! Normalizes every way of reaching a daemon into one bidirectional
//! [`Channel`]:
//! - `unix://`: local socket
//! - `tcp://`, `http://`: plain TCP, TLS when material is supplied
//! - `https://`: TCP with TLS
//! - `ssh://`: `docker system dial-stdio` over SSH, bridged through an
//!   owner-only local socket
//!
//! On top of a channel sit the HTTP/1.1 exchange ([`http`]) and the two
//! streaming codecs: multiplexed stdout/stderr frames ([`frame`]) and
//! concatenated JSON values ([`json_stream`]).
//!
//! # Security
//!
//! - Tunnel sockets live in a 0700 directory and are created 0600
//! - Tunnel peers are validated via `SO_PEERCRED` (Linux)
//! - SSH host keys are checked against known_hosts unless explicitly disabled
//! - Passwords never appear in logs or error messages

pub mod factory;
pub mod frame;
pub mod http;
pub mod json_stream;
pub mod ssh;
pub mod target;
pub mod tcp;
pub mod tls;
pub mod traits;
pub mod unix_socket;

// Re-exports for convenience
pub use factory::Connector;
pub use frame::{FrameDecoder, StreamFrame, StreamType};
pub use json_stream::JsonStreamDecoder;
pub use target::ConnectionTarget;
pub use tls::TlsConfig;
pub use traits::{Channel, ChannelKind, ConnectionId, ErrorKind, StreamChannel, TransportError};
