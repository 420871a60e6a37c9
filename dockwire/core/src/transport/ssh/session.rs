//! Authenticated SSH Session

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use russh::client::{self, Config, Handle};
use russh::keys::agent::client::AgentClient;
use russh::keys::{HashAlg, PrivateKeyWithHashAlg, PublicKey};
use russh::Disconnect;

use super::env::sanitize;
use super::known_hosts::{verify_host_key, HostKeyPolicy, KnownHosts};
use super::{
    redact, RemoteStdio, ResolvedEndpoint, SshConfigSnapshot, SshEndpoint, StdioDialer,
    DIAL_STDIO_COMMAND,
};
use crate::transport::TransportError;

/// Close the session after this long without traffic
const SSH_INACTIVITY_TIMEOUT: Duration = Duration::from_secs(300);

/// Keepalive probe interval
const SSH_KEEPALIVE_INTERVAL: Duration = Duration::from_secs(30);

/// Unanswered keepalives before the session is dropped
const SSH_KEEPALIVE_MAX: usize = 3;

/// russh handler that enforces the host key policy during the handshake
struct HostKeyCheck {
    known_hosts: KnownHosts,
    policy: HostKeyPolicy,
    host: String,
    port: u16,
}

impl client::Handler for HostKeyCheck {
    type Error = TransportError;

    async fn check_server_key(
        &mut self,
        server_public_key: &PublicKey,
    ) -> Result<bool, Self::Error> {
        verify_host_key(
            &self.known_hosts,
            self.policy,
            &self.host,
            self.port,
            server_public_key,
        )?;
        Ok(true)
    }
}

/// One authenticated SSH connection
///
/// Shared by `Arc`; each tunnel opens its own exec channel on it.
pub struct SshSession {
    handle: Handle<HostKeyCheck>,
    label: String,
    env: Vec<(String, String)>,
}

impl SshSession {
    /// Connect, verify the host key, and authenticate
    ///
    /// # Errors
    ///
    /// - `HostKeyVerification` when the key fails the policy
    /// - `Authentication` when no credential is accepted
    /// - `ConnectionFailed` / `Ssh` for network and protocol failures
    pub async fn connect(endpoint: &SshEndpoint) -> Result<Arc<Self>, TransportError> {
        let ssh_config = match &endpoint.options.ssh_config {
            Some(snapshot) => Arc::clone(snapshot),
            None => Arc::new(SshConfigSnapshot::load_default()),
        };
        let resolved = endpoint.resolve(&ssh_config);
        let label = format!("{}@{}:{}", resolved.user, resolved.host, resolved.port);

        let known_hosts = KnownHosts::load(&resolved.known_hosts_files)?;
        if known_hosts.is_empty() && endpoint.options.host_key_policy == HostKeyPolicy::Strict {
            tracing::debug!(host = %resolved.host, "No known_hosts entries loaded");
        }

        let config = Config {
            inactivity_timeout: Some(SSH_INACTIVITY_TIMEOUT),
            keepalive_interval: Some(SSH_KEEPALIVE_INTERVAL),
            keepalive_max: SSH_KEEPALIVE_MAX,
            ..<_>::default()
        };

        let handler = HostKeyCheck {
            known_hosts,
            policy: endpoint.options.host_key_policy,
            host: resolved.host.clone(),
            port: resolved.port,
        };

        let addr = (resolved.host.as_str(), resolved.port);
        let mut handle = client::connect(Arc::new(config), addr, handler)
            .await
            .map_err(|e| match e {
                TransportError::HostKeyVerification { .. } => e,
                other => TransportError::ConnectionFailed(redact(
                    &format!("SSH connection to {label} failed: {other}"),
                    None,
                )),
            })?;

        tracing::info!(session = %label, "SSH connected, authenticating");

        if let Err(e) = authenticate(&mut handle, &resolved, endpoint).await {
            let outcome = handle
                .disconnect(Disconnect::ByApplication, "authentication failed", "en")
                .await;
            if let Some(error) = disconnect_failure(outcome) {
                tracing::debug!(
                    session = %label,
                    error = %error,
                    "Disconnect after failed authentication did not complete"
                );
            }
            return Err(e);
        }

        tracing::info!(session = %label, "SSH session authenticated");

        Ok(Arc::new(Self {
            handle,
            label,
            env: sanitize(endpoint.options.env.clone()),
        }))
    }

    /// `user@host:port`
    #[must_use]
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Whether the underlying connection is gone
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.handle.is_closed()
    }

    /// Disconnect the session
    ///
    /// Tunnels already open on it fail on their next read.
    pub async fn release(&self) -> Result<(), TransportError> {
        tracing::debug!(session = %self.label, "Releasing SSH session");
        self.handle
            .disconnect(Disconnect::ByApplication, "client released session", "en")
            .await
            .map_err(|e| TransportError::Ssh(redact(&e.to_string(), None)))
    }
}

#[async_trait]
impl StdioDialer for SshSession {
    async fn dial_stdio(&self) -> Result<RemoteStdio, TransportError> {
        let mut channel = self.handle.channel_open_session().await.map_err(|e| {
            TransportError::Ssh(redact(&format!("Failed to open channel: {e}"), None))
        })?;

        for (name, value) in &self.env {
            channel.set_env(false, name.as_str(), value.as_str()).await?;
        }

        channel.exec(true, DIAL_STDIO_COMMAND).await.map_err(|e| {
            TransportError::Ssh(redact(
                &format!("Failed to run {DIAL_STDIO_COMMAND:?} on {}: {e}", self.label),
                None,
            ))
        })?;

        tracing::debug!(session = %self.label, "Remote dial-stdio started");
        Ok(Box::new(channel.into_stream()))
    }
}

/// Try URL password, then identity files, then the agent
async fn authenticate(
    handle: &mut Handle<HostKeyCheck>,
    resolved: &ResolvedEndpoint,
    endpoint: &SshEndpoint,
) -> Result<(), TransportError> {
    let user = resolved.user.as_str();

    if let Some(secret) = endpoint.password.as_ref().and_then(|p| p.take()) {
        let result = handle
            .authenticate_password(user, secret.as_str())
            .await
            .map_err(|e| TransportError::Authentication(redact(&e.to_string(), Some(secret.as_str()))))?;
        if result.success() {
            return Ok(());
        }
        tracing::debug!(user = %user, "Password rejected");
    }

    for path in &resolved.identity_files {
        let key = match russh::keys::load_secret_key(path, None) {
            Ok(key) => key,
            Err(e) => {
                tracing::debug!(path = ?path, error = %e, "Skipping identity file");
                continue;
            }
        };

        let hash_alg = handle
            .best_supported_rsa_hash()
            .await
            .ok()
            .flatten()
            .flatten();

        let result = handle
            .authenticate_publickey(user, PrivateKeyWithHashAlg::new(Arc::new(key), hash_alg))
            .await?;
        if result.success() {
            tracing::debug!(path = ?path, "Authenticated with identity file");
            return Ok(());
        }
    }

    if endpoint.options.use_agent {
        match AgentClient::connect_env().await {
            Ok(mut agent) => {
                let keys = agent
                    .request_identities()
                    .await
                    .map_err(|e| TransportError::Authentication(format!("SSH agent: {e}")))?;

                for key in keys {
                    let hash_alg = handle
                        .best_supported_rsa_hash()
                        .await
                        .ok()
                        .flatten()
                        .flatten();

                    match handle
                        .authenticate_publickey_with(user, key.clone(), hash_alg, &mut agent)
                        .await
                    {
                        Ok(result) if result.success() => {
                            tracing::debug!(
                                key = %key.fingerprint(HashAlg::Sha256),
                                "Authenticated with agent key"
                            );
                            return Ok(());
                        }
                        Ok(_) => tracing::debug!("Agent key rejected, trying next"),
                        Err(e) => tracing::warn!(error = %e, "Agent authentication error"),
                    }
                }
            }
            Err(e) => tracing::debug!(error = %e, "No SSH agent available"),
        }
    }

    Err(TransportError::Authentication(format!(
        "No credentials accepted for {user}@{}",
        resolved.host
    )))
}

/// Redacted error text when a disconnect did not complete
fn disconnect_failure(outcome: Result<(), russh::Error>) -> Option<String> {
    outcome.err().map(|e| redact(&e.to_string(), None))
}
