//! Owner-Only Unix Socket Listener
//!
//! Binds a socket readable and writable only by the current user and
//! accepts connections from processes running as that same user. The SSH
//! bridge uses it for its private `docker.sock`.

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use tokio::net::{UnixListener, UnixStream};

use crate::timeout::ResolvedTimeout;
use crate::transport::traits::TransportError;

/// A bound listener whose socket file is removed on drop
pub struct OwnerOnlyListener {
    listener: UnixListener,
    socket_path: PathBuf,
}

impl OwnerOnlyListener {
    /// Bind `socket_path` with mode 0600
    ///
    /// # Errors
    ///
    /// Fails if the path is already taken or permissions cannot be set.
    pub fn bind(socket_path: &Path) -> Result<Self, TransportError> {
        let listener = UnixListener::bind(socket_path).map_err(|e| {
            TransportError::Io(std::io::Error::new(
                e.kind(),
                format!("Failed to bind {:?}: {}", socket_path, e),
            ))
        })?;

        // Construct first so a failed chmod still removes the file
        let bound = Self {
            listener,
            socket_path: socket_path.to_path_buf(),
        };
        bound.set_socket_permissions()?;

        tracing::debug!(path = ?socket_path, "Listening on owner-only socket");
        Ok(bound)
    }

    /// Socket file path
    #[must_use]
    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Set socket permissions to 0600 (owner-only)
    fn set_socket_permissions(&self) -> Result<(), TransportError> {
        let perms = std::fs::Permissions::from_mode(0o600);
        std::fs::set_permissions(&self.socket_path, perms)?;
        Ok(())
    }

    /// Accept one connection within `deadline` and validate its peer
    ///
    /// # Errors
    ///
    /// `ConnectTimeout` if nobody connects in time, `ConnectionFailed` if the
    /// peer runs as a different user.
    pub async fn accept_one(&self, deadline: ResolvedTimeout) -> Result<UnixStream, TransportError> {
        let (stream, _addr) = deadline
            .run(self.listener.accept())
            .await
            .ok_or(TransportError::ConnectTimeout {
                after: deadline.duration().unwrap_or_default(),
            })??;

        validate_peer(&stream)?;
        Ok(stream)
    }
}

impl Drop for OwnerOnlyListener {
    fn drop(&mut self) {
        if self.socket_path.exists() {
            std::fs::remove_file(&self.socket_path).ok();
        }
    }
}

/// Validate peer credentials
///
/// On Linux, uses SO_PEERCRED to verify the connecting process runs as the
/// same user as this process.
#[cfg(target_os = "linux")]
pub fn validate_peer(stream: &UnixStream) -> Result<(), TransportError> {
    use std::os::unix::io::AsRawFd;

    let fd = stream.as_raw_fd();

    let cred = unsafe {
        let mut cred: libc::ucred = std::mem::zeroed();
        let mut len = std::mem::size_of::<libc::ucred>() as libc::socklen_t;

        let result = libc::getsockopt(
            fd,
            libc::SOL_SOCKET,
            libc::SO_PEERCRED,
            &mut cred as *mut _ as *mut libc::c_void,
            &mut len,
        );

        if result < 0 {
            return Err(TransportError::ConnectionFailed(
                "Failed to get peer credentials".to_string(),
            ));
        }
        cred
    };

    let my_uid = unsafe { libc::getuid() };

    if cred.uid != my_uid {
        tracing::warn!(
            peer_uid = cred.uid,
            my_uid = my_uid,
            "Rejecting connection from different user"
        );
        return Err(TransportError::ConnectionFailed(format!(
            "Peer UID {} does not match UID {}",
            cred.uid, my_uid
        )));
    }

    tracing::debug!(peer_uid = cred.uid, peer_pid = cred.pid, "Peer validated");
    Ok(())
}

/// Validate peer credentials (non-Linux fallback)
#[cfg(not(target_os = "linux"))]
pub fn validate_peer(_stream: &UnixStream) -> Result<(), TransportError> {
    // SO_PEERCRED is Linux-specific; the 0600 socket mode still applies
    tracing::debug!("Peer validation skipped (non-Linux platform)");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_bind_sets_owner_only_mode() {
        let temp_dir = TempDir::new().unwrap();
        let socket_path = temp_dir.path().join("test.sock");

        let listener = OwnerOnlyListener::bind(&socket_path).unwrap();
        assert!(socket_path.exists());

        let perms = std::fs::metadata(&socket_path).unwrap().permissions();
        assert_eq!(perms.mode() & 0o777, 0o600);

        drop(listener);
        assert!(!socket_path.exists());
    }

    #[tokio::test]
    async fn test_accept_one_same_user() {
        let temp_dir = TempDir::new().unwrap();
        let socket_path = temp_dir.path().join("test.sock");
        let listener = OwnerOnlyListener::bind(&socket_path).unwrap();

        let _client = UnixStream::connect(&socket_path).await.unwrap();
        let accepted = listener
            .accept_one(ResolvedTimeout::After(Duration::from_secs(1)))
            .await;
        assert!(accepted.is_ok());
    }

    #[tokio::test]
    async fn test_accept_one_times_out() {
        let temp_dir = TempDir::new().unwrap();
        let listener = OwnerOnlyListener::bind(&temp_dir.path().join("idle.sock")).unwrap();

        let result = listener
            .accept_one(ResolvedTimeout::After(Duration::from_millis(20)))
            .await;
        assert!(matches!(result, Err(TransportError::ConnectTimeout { .. })));
    }

    #[tokio::test]
    async fn test_bind_taken_path_fails() {
        let temp_dir = TempDir::new().unwrap();
        let socket_path = temp_dir.path().join("taken.sock");
        std::fs::write(&socket_path, b"").unwrap();

        assert!(matches!(
            OwnerOnlyListener::bind(&socket_path),
            Err(TransportError::Io(_))
        ));
    }
}
