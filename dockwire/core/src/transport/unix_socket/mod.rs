//! Unix Socket Transport
//!
//! Default transport for a local daemon.
//!
//! # Socket Location
//!
//! Searched in order when nothing else names an endpoint:
//! `/run/docker.sock`, then `/var/run/docker.sock`.
//!
//! # Security
//!
//! - Listener sockets created with mode 0600 (owner-only access)
//! - Listener peers validated via `SO_PEERCRED` (Linux)

mod client;
mod server;

pub use client::{connect, UnixChannel};
pub use server::{validate_peer, OwnerOnlyListener};

use std::path::{Path, PathBuf};

/// Well-known daemon socket locations, in search order
pub const DEFAULT_SOCKET_PATHS: &[&str] = &["/run/docker.sock", "/var/run/docker.sock"];

/// First of `candidates` that exists
#[must_use]
pub fn find_socket<P: AsRef<Path>>(candidates: &[P]) -> Option<PathBuf> {
    candidates
        .iter()
        .map(|p| p.as_ref())
        .find(|p| p.exists())
        .map(Path::to_path_buf)
}

/// First existing well-known daemon socket
#[must_use]
pub fn default_socket_path() -> Option<PathBuf> {
    find_socket(DEFAULT_SOCKET_PATHS)
}
