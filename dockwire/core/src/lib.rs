//! dockwire core - Client Transport for the Docker Engine API
//!
//! This crate moves requests and streams between a process and a Docker
//! daemon, whichever way the daemon is reached: a local Unix socket, TCP
//! (optionally TLS), or an SSH tunnel. It does not wrap individual API
//! resources; callers build [`Request`]s against API paths directly.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │  ClientConfig (defaults < TOML < env < overrides) + ContextStore │
//! └────────────────────────────────┬─────────────────────────────────┘
//!                                  │ resolve_target
//! ┌────────────────────────────────┴─────────────────────────────────┐
//! │                        DockerClient                              │
//! │   Request ──► HTTP/1.1 ──► Single │ JsonStream │ Multiplexed │ Raw│
//! └────────────────────────────────┬─────────────────────────────────┘
//!                                  │ Connector::open
//! ┌──────────────┬─────────────────┼───────────────┬─────────────────┐
//! │  unix://     │  tcp:// http:// │  https://     │  ssh://         │
//! │  UnixStream  │  TcpStream      │  rustls       │  russh + bridge │
//! └──────────────┴─────────────────┴───────────────┴─────────────────┘
//! ```
//!
//! # Quick Start
//!
//! ```ignore
//! use dockwire_core::{load_config, CallOptions, Request, StreamMode};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = load_config()?.build_client(None)?;
//!
//!     let version = client.version().await?;
//!     println!("daemon {}", version["Version"]);
//!
//!     let mut pull = client
//!         .execute(
//!             Request::post("images/create").param("fromImage", "alpine:latest"),
//!             &CallOptions::default(),
//!             StreamMode::JsonStream,
//!         )
//!         .await?
//!         .into_json_stream()?;
//!     while let Some(progress) = pull.next().await? {
//!         println!("{progress}");
//!     }
//!
//!     client.release().await?;
//!     Ok(())
//! }
//! ```
//!
//! # Module Overview
//!
//! - [`config`]: layered client configuration and endpoint resolution
//! - [`context`]: Docker CLI context store lookup
//! - [`auth`]: `X-Registry-Auth` header composition
//! - [`executor`]: [`DockerClient`], requests and result streams
//! - [`timeout`]: connect/read deadline composition
//! - [`transport`]: channels, connectors, HTTP framing and stream codecs

#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod auth;
pub mod config;
pub mod context;
pub mod executor;
pub mod timeout;
pub mod transport;

// Re-exports for convenience
pub use auth::{compose_auth_header, password_auth, REGISTRY_AUTH_HEADER};
pub use context::{context_dir_name, ContextEndpoint, ContextStore};
pub use executor::{
    httpize, CallOptions, DockerClient, JsonStream, MultiplexedStream, QueryResult, RawStream,
    Request, StreamMode, DEFAULT_API_VERSION,
};
pub use timeout::{ResolvedTimeout, TimeoutSpec, Timeouts};
pub use transport::{
    Channel, ChannelKind, ConnectionId, ConnectionTarget, Connector, ErrorKind, StreamFrame,
    StreamType, TlsConfig, TransportError,
};

// Config exports
pub use config::{
    default_config_path, load_config, load_config_from_path, load_config_with_env, ClientConfig,
    ClientToml, ConfigError, ConfigOverrides, ConfigSource,
};
