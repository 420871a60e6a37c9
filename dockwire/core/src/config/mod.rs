//! Client Configuration
//!
//! Layered configuration for [`DockerClient`]: defaults, then the TOML file
//! at `$XDG_CONFIG_HOME/dockwire/client.toml`, then environment variables,
//! then caller overrides.
//!
//! # Environment
//!
//! | Variable                        | Effect                                   |
//! |---------------------------------|------------------------------------------|
//! | `DOCKER_HOST`                   | daemon URL                               |
//! | `DOCKER_CONTEXT`                | context name (`default` = none)          |
//! | `DOCKER_TLS_VERIFY`             | secure `tcp://` with TLS when non-empty  |
//! | `DOCKER_CERT_PATH`              | directory with `ca.pem`, `cert.pem`, ... |
//! | `DOCKWIRE_API_VERSION`          | `v<major>.<minor>`                       |
//! | `DOCKWIRE_CONNECT_TIMEOUT_MS`   | connect deadline, `0` = none             |
//! | `DOCKWIRE_READ_TIMEOUT_MS`      | read deadline, `0` = none                |
//! | `DOCKWIRE_SSH_STRICT_HOST_KEYS` | `0`/`false` accepts unknown host keys    |
//!
//! # Example Configuration
//!
//! ```toml
//! [daemon]
//! host = "ssh://deploy@build-box"
//! api_version = "v1.45"
//!
//! [tls]
//! verify = true
//! cert_path = "/etc/docker/certs"
//!
//! [timeouts]
//! connect_ms = 5000
//! read_ms = 0
//!
//! [ssh]
//! strict_host_keys = true
//! known_hosts = ["~/.ssh/known_hosts"]
//! identity_files = ["~/.ssh/id_ed25519"]
//! use_agent = true
//! ```
//!
//! # Endpoint Resolution
//!
//! explicit URL > `host` (env or file) > active Docker context > first
//! existing socket in the search path.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::context::{ContextEndpoint, ContextStore};
use crate::executor::{is_valid_api_version, DockerClient, DEFAULT_API_VERSION};
use crate::timeout::{TimeoutSpec, Timeouts};
use crate::transport::ssh::config::expand_tilde;
use crate::transport::ssh::HostKeyPolicy;
use crate::transport::tls::TlsConfig;
use crate::transport::unix_socket::{find_socket, DEFAULT_SOCKET_PATHS};
use crate::transport::{ConnectionTarget, TransportError};

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur when loading configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read config file
    #[error("Failed to read config file at {path}: {source}")]
    ReadError {
        /// The path that was attempted
        path: PathBuf,
        /// The underlying IO error
        source: std::io::Error,
    },

    /// Failed to parse TOML
    #[error("Failed to parse TOML config: {0}")]
    ParseError(#[from] toml::de::Error),

    /// Invalid configuration value
    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

// =============================================================================
// Configuration Source Tracking
// =============================================================================

/// Tracks where a configuration value came from
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConfigSource {
    /// Value supplied by the caller
    Explicit,
    /// Value from environment variable
    Env,
    /// Value from TOML configuration file
    File,
    /// Default value
    Default,
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Explicit => write!(f, "caller"),
            Self::Env => write!(f, "environment"),
            Self::File => write!(f, "config file"),
            Self::Default => write!(f, "default"),
        }
    }
}

// =============================================================================
// TOML Configuration Structures
// =============================================================================

/// `[daemon]` section
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonToml {
    /// Daemon URL
    pub host: Option<String>,
    /// Docker context name
    pub context: Option<String>,
    /// API version prefix
    pub api_version: Option<String>,
    /// Docker CLI configuration directory (`~/.docker`)
    pub docker_config_dir: Option<String>,
    /// Sockets tried when nothing names an endpoint
    pub socket_paths: Option<Vec<String>>,
}

/// `[tls]` section
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TlsToml {
    /// Secure `tcp://` endpoints with TLS
    pub verify: Option<bool>,
    /// Directory holding `ca.pem`, `cert.pem`, `key.pem`
    pub cert_path: Option<String>,
}

/// `[timeouts]` section
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutsToml {
    /// Connect deadline in milliseconds (0 = no timeout)
    pub connect_ms: Option<u64>,
    /// Read deadline in milliseconds (0 = no timeout)
    pub read_ms: Option<u64>,
}

/// `[ssh]` section
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SshToml {
    /// Reject unknown host keys
    pub strict_host_keys: Option<bool>,
    /// known_hosts files
    pub known_hosts: Option<Vec<String>>,
    /// Private keys to offer
    pub identity_files: Option<Vec<String>>,
    /// Try the SSH agent
    pub use_agent: Option<bool>,
}

/// Top-level TOML configuration structure
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientToml {
    /// Endpoint section
    pub daemon: DaemonToml,
    /// TLS section
    pub tls: TlsToml,
    /// Timeout section
    pub timeouts: TimeoutsToml,
    /// SSH section
    pub ssh: SshToml,
}

// =============================================================================
// Main Configuration Struct
// =============================================================================

/// Settings a [`DockerClient`] is built from
#[derive(Clone, Debug)]
pub struct ClientConfig {
    /// Daemon URL
    pub host: Option<String>,
    /// Docker context name; `None` defers to `config.json`
    pub context: Option<String>,
    /// Secure `tcp://` endpoints with TLS from `cert_path`
    pub tls_verify: bool,
    /// Certificate directory; `~/.docker` when unset
    pub cert_path: Option<PathBuf>,
    /// API version prefix
    pub api_version: String,
    /// Client-wide timeouts
    pub timeouts: Timeouts,
    /// Reject unknown SSH host keys
    pub ssh_strict_host_keys: bool,
    /// known_hosts files; OpenSSH defaults when empty
    pub ssh_known_hosts: Vec<PathBuf>,
    /// Private keys to offer; OpenSSH defaults when empty
    pub ssh_identity_files: Vec<PathBuf>,
    /// Try the SSH agent
    pub ssh_use_agent: bool,
    /// Docker CLI configuration directory; `~/.docker` when unset
    pub docker_config_dir: Option<PathBuf>,
    /// Sockets tried when nothing names an endpoint
    pub socket_paths: Vec<PathBuf>,
    /// Path to the config file that was loaded (if any)
    pub config_file_path: Option<PathBuf>,

    host_source: ConfigSource,
    source: ConfigSource,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: None,
            context: None,
            tls_verify: false,
            cert_path: None,
            api_version: DEFAULT_API_VERSION.to_string(),
            timeouts: Timeouts::default(),
            ssh_strict_host_keys: true,
            ssh_known_hosts: Vec::new(),
            ssh_identity_files: Vec::new(),
            ssh_use_agent: true,
            docker_config_dir: None,
            socket_paths: DEFAULT_SOCKET_PATHS.iter().map(PathBuf::from).collect(),
            config_file_path: None,
            host_source: ConfigSource::Default,
            source: ConfigSource::Default,
        }
    }
}

impl ClientConfig {
    /// Create a new configuration with default values
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the primary source of this configuration
    #[must_use]
    pub fn source(&self) -> ConfigSource {
        self.source
    }

    /// Where `host` came from
    #[must_use]
    pub fn host_source(&self) -> ConfigSource {
        self.host_source
    }

    /// Check values that can be wrong
    ///
    /// # Errors
    ///
    /// `ValidationError` for a malformed API version.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !is_valid_api_version(&self.api_version) {
            return Err(ConfigError::ValidationError(format!(
                "api_version {:?} is not of the form v<major>.<minor>",
                self.api_version
            )));
        }
        Ok(())
    }

    /// Pick the daemon endpoint
    ///
    /// `explicit` (a URL given by the caller) wins, then `host`, then the
    /// active Docker context, then the first existing socket in
    /// `socket_paths`.
    ///
    /// # Errors
    ///
    /// URL errors from [`ConnectionTarget::parse`], `InvalidContext` for a
    /// broken context, `InvalidTarget` when nothing names a daemon.
    pub fn resolve_target(&self, explicit: Option<&str>) -> Result<ConnectionTarget, TransportError> {
        let target = if let Some(url) = explicit {
            tracing::debug!(url = %url, "Using explicit daemon URL");
            ConnectionTarget::parse(url, self.env_tls())?
        } else if let Some(url) = self.host.as_deref() {
            tracing::debug!(url = %url, source = %self.host_source, "Using configured daemon URL");
            ConnectionTarget::parse(url, self.env_tls())?
        } else if let Some(endpoint) = self.current_context()? {
            tracing::debug!(context = %endpoint.name, url = %endpoint.host, "Using Docker context");
            ConnectionTarget::parse(&endpoint.host, endpoint.tls_config())?
        } else if let Some(path) = find_socket(&self.socket_paths) {
            tracing::debug!(path = ?path, "Using local daemon socket");
            ConnectionTarget::Unix { path }
        } else {
            return Err(TransportError::InvalidTarget(
                "No daemon endpoint: set DOCKER_HOST, select a context, or start a local daemon"
                    .to_string(),
            ));
        };

        Ok(self.apply_ssh_options(target))
    }

    /// Resolve the endpoint and build a client for it
    ///
    /// # Errors
    ///
    /// As [`resolve_target`](Self::resolve_target) and [`DockerClient::new`].
    pub fn build_client(&self, explicit: Option<&str>) -> Result<DockerClient, TransportError> {
        DockerClient::from_target(self.resolve_target(explicit)?, &self.api_version, self.timeouts)
    }

    fn current_context(&self) -> Result<Option<ContextEndpoint>, TransportError> {
        match self.context_store() {
            Some(store) => store.current(self.context.as_deref()),
            None => Ok(None),
        }
    }

    fn context_store(&self) -> Option<ContextStore> {
        match &self.docker_config_dir {
            Some(dir) => Some(ContextStore::new(dir.clone())),
            None => ContextStore::default_location(),
        }
    }

    /// TLS material implied by `DOCKER_TLS_VERIFY` / `DOCKER_CERT_PATH`
    fn env_tls(&self) -> Option<TlsConfig> {
        if !self.tls_verify {
            return None;
        }
        let dir = self
            .cert_path
            .clone()
            .or_else(|| self.context_store().map(|s| s.root().to_path_buf()))?;
        Some(TlsConfig::from_cert_dir(&dir))
    }

    fn apply_ssh_options(&self, target: ConnectionTarget) -> ConnectionTarget {
        match target {
            ConnectionTarget::Ssh(mut endpoint) => {
                let options = &mut endpoint.options;
                options.host_key_policy = if self.ssh_strict_host_keys {
                    HostKeyPolicy::Strict
                } else {
                    HostKeyPolicy::InsecureAcceptAny
                };
                if !self.ssh_known_hosts.is_empty() {
                    options.known_hosts_files.clone_from(&self.ssh_known_hosts);
                }
                if !self.ssh_identity_files.is_empty() {
                    options.identity_files.clone_from(&self.ssh_identity_files);
                }
                options.use_agent = self.ssh_use_agent;
                ConnectionTarget::Ssh(endpoint)
            }
            other => other,
        }
    }
}

// =============================================================================
// Configuration Loading
// =============================================================================

/// Get the default configuration file path
///
/// Returns `$XDG_CONFIG_HOME/dockwire/client.toml` or
/// `~/.config/dockwire/client.toml` if `XDG_CONFIG_HOME` is not set.
#[must_use]
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("dockwire").join("client.toml"))
}

/// Load configuration from all sources with proper priority
///
/// # Errors
///
/// Returns an error if the config file exists but cannot be parsed, or a
/// value fails validation. A missing config file is not an error.
pub fn load_config() -> Result<ClientConfig, ConfigError> {
    load_config_from_path(default_config_path())
}

/// Load configuration from a specific file plus the process environment
///
/// # Errors
///
/// As [`load_config`].
pub fn load_config_from_path(path: Option<PathBuf>) -> Result<ClientConfig, ConfigError> {
    load_config_with_env(path, |name| std::env::var(name).ok())
}

/// Load configuration with environment lookups served by `env`
///
/// # Errors
///
/// As [`load_config`].
pub fn load_config_with_env<F>(path: Option<PathBuf>, env: F) -> Result<ClientConfig, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let mut config = ClientConfig::default();

    if let Some(ref config_path) = path {
        if config_path.exists() {
            let toml_content =
                std::fs::read_to_string(config_path).map_err(|e| ConfigError::ReadError {
                    path: config_path.clone(),
                    source: e,
                })?;

            let toml_config: ClientToml = toml::from_str(&toml_content)?;
            apply_toml_config(&mut config, &toml_config);
            config.config_file_path = Some(config_path.clone());
            config.source = ConfigSource::File;

            tracing::info!(
                path = %config_path.display(),
                "Loaded configuration from file"
            );
        } else {
            tracing::debug!(
                path = %config_path.display(),
                "Config file not found, using defaults"
            );
        }
    }

    apply_env_config(&mut config, &env)?;
    config.validate()?;
    Ok(config)
}

fn paths(values: &[String]) -> Vec<PathBuf> {
    values.iter().map(|v| expand_tilde(v)).collect()
}

/// Apply TOML configuration values to the config struct
fn apply_toml_config(config: &mut ClientConfig, toml: &ClientToml) {
    if let Some(ref host) = toml.daemon.host {
        config.host = Some(host.clone());
        config.host_source = ConfigSource::File;
    }
    if toml.daemon.context.is_some() {
        config.context.clone_from(&toml.daemon.context);
    }
    if let Some(ref version) = toml.daemon.api_version {
        config.api_version = version.clone();
    }
    if let Some(ref dir) = toml.daemon.docker_config_dir {
        config.docker_config_dir = Some(expand_tilde(dir));
    }
    if let Some(ref sockets) = toml.daemon.socket_paths {
        config.socket_paths = paths(sockets);
    }

    if let Some(verify) = toml.tls.verify {
        config.tls_verify = verify;
    }
    if let Some(ref dir) = toml.tls.cert_path {
        config.cert_path = Some(expand_tilde(dir));
    }

    if toml.timeouts.connect_ms.is_some() {
        config.timeouts.connect = TimeoutSpec::from_millis_setting(toml.timeouts.connect_ms);
    }
    if toml.timeouts.read_ms.is_some() {
        config.timeouts.read = TimeoutSpec::from_millis_setting(toml.timeouts.read_ms);
    }

    if let Some(strict) = toml.ssh.strict_host_keys {
        config.ssh_strict_host_keys = strict;
    }
    if let Some(ref files) = toml.ssh.known_hosts {
        config.ssh_known_hosts = paths(files);
    }
    if let Some(ref files) = toml.ssh.identity_files {
        config.ssh_identity_files = paths(files);
    }
    if let Some(agent) = toml.ssh.use_agent {
        config.ssh_use_agent = agent;
    }
}

fn parse_millis(name: &str, value: &str) -> Result<u64, ConfigError> {
    value.trim().parse::<u64>().map_err(|_| {
        ConfigError::ValidationError(format!("{name} must be a number of milliseconds, got {value:?}"))
    })
}

fn is_truthy(value: &str) -> bool {
    let value = value.trim();
    !value.is_empty() && value != "0" && !value.eq_ignore_ascii_case("false")
}

/// Apply environment variable overrides to the config
fn apply_env_config<F>(config: &mut ClientConfig, env: &F) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(host) = env("DOCKER_HOST").filter(|h| !h.is_empty()) {
        config.host = Some(host);
        config.host_source = ConfigSource::Env;
        config.source = ConfigSource::Env;
    }
    if let Some(context) = env("DOCKER_CONTEXT").filter(|c| !c.is_empty()) {
        config.context = Some(context);
        config.source = ConfigSource::Env;
    }
    if let Some(verify) = env("DOCKER_TLS_VERIFY") {
        config.tls_verify = is_truthy(&verify);
        config.source = ConfigSource::Env;
    }
    if let Some(dir) = env("DOCKER_CERT_PATH").filter(|d| !d.is_empty()) {
        config.cert_path = Some(expand_tilde(&dir));
        config.source = ConfigSource::Env;
    }
    if let Some(version) = env("DOCKWIRE_API_VERSION") {
        config.api_version = version;
        config.source = ConfigSource::Env;
    }
    if let Some(ms) = env("DOCKWIRE_CONNECT_TIMEOUT_MS") {
        let ms = parse_millis("DOCKWIRE_CONNECT_TIMEOUT_MS", &ms)?;
        config.timeouts.connect = TimeoutSpec::from_millis_setting(Some(ms));
        config.source = ConfigSource::Env;
    }
    if let Some(ms) = env("DOCKWIRE_READ_TIMEOUT_MS") {
        let ms = parse_millis("DOCKWIRE_READ_TIMEOUT_MS", &ms)?;
        config.timeouts.read = TimeoutSpec::from_millis_setting(Some(ms));
        config.source = ConfigSource::Env;
    }
    if let Some(strict) = env("DOCKWIRE_SSH_STRICT_HOST_KEYS") {
        config.ssh_strict_host_keys = is_truthy(&strict);
        config.source = ConfigSource::Env;
    }
    Ok(())
}

// =============================================================================
// Caller Override Support
// =============================================================================

/// Overrides applied after [`load_config`]
#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    /// Daemon URL override
    pub host: Option<String>,
    /// Context override
    pub context: Option<String>,
    /// API version override
    pub api_version: Option<String>,
    /// Timeout overrides; `Unset` fields leave the loaded value alone
    pub timeouts: Timeouts,
}

impl ConfigOverrides {
    /// Create a new empty set of overrides
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set daemon URL override
    #[must_use]
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    /// Set context override
    #[must_use]
    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    /// Set API version override
    #[must_use]
    pub fn with_api_version(mut self, version: impl Into<String>) -> Self {
        self.api_version = Some(version.into());
        self
    }

    /// Set timeout overrides
    #[must_use]
    pub fn with_timeouts(mut self, timeouts: Timeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// Apply overrides to a configuration
    ///
    /// # Errors
    ///
    /// `ValidationError` if the result is invalid.
    pub fn apply(&self, config: &mut ClientConfig) -> Result<(), ConfigError> {
        if self.host.is_some()
            || self.context.is_some()
            || self.api_version.is_some()
            || self.timeouts.connect.is_set()
            || self.timeouts.read.is_set()
        {
            config.source = ConfigSource::Explicit;
        }

        if let Some(ref host) = self.host {
            config.host = Some(host.clone());
            config.host_source = ConfigSource::Explicit;
        }
        if self.context.is_some() {
            config.context.clone_from(&self.context);
        }
        if let Some(ref version) = self.api_version {
            config.api_version = version.clone();
        }
        if self.timeouts.connect.is_set() {
            config.timeouts.connect = self.timeouts.connect;
        }
        if self.timeouts.read.is_set() {
            config.timeouts.read = self.timeouts.read;
        }

        config.validate()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;
    use std::io::Write;
    use std::time::Duration;
    use tempfile::{NamedTempFile, TempDir};

    fn env_of(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    fn no_env() -> impl Fn(&str) -> Option<String> {
        env_of(&[])
    }

    fn toml_file(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    /// Config that never looks at the real home directory or sockets
    fn isolated(dir: &TempDir) -> ClientConfig {
        ClientConfig {
            docker_config_dir: Some(dir.path().join("docker")),
            socket_paths: vec![dir.path().join("docker.sock")],
            ..ClientConfig::default()
        }
    }

    #[test]
    fn test_default_config() {
        let config = ClientConfig::default();
        assert_eq!(config.api_version, "v1.45");
        assert_eq!(config.host, None);
        assert!(config.ssh_strict_host_keys);
        assert!(config.ssh_use_agent);
        assert_eq!(config.timeouts, Timeouts::default());
        assert_eq!(config.source(), ConfigSource::Default);
    }

    #[test]
    fn test_default_config_path() {
        if let Some(p) = default_config_path() {
            assert!(p.ends_with("dockwire/client.toml"));
        }
    }

    #[test]
    fn test_parse_valid_toml() {
        let file = toml_file(
            r#"
[daemon]
host = "tcp://10.0.0.5:2376"
api_version = "v1.41"

[tls]
verify = true
cert_path = "/etc/docker/certs"

[timeouts]
connect_ms = 2500
read_ms = 0

[ssh]
strict_host_keys = false
use_agent = false
"#,
        );

        let config = load_config_with_env(Some(file.path().to_path_buf()), no_env()).unwrap();

        assert_eq!(config.host.as_deref(), Some("tcp://10.0.0.5:2376"));
        assert_eq!(config.host_source(), ConfigSource::File);
        assert_eq!(config.api_version, "v1.41");
        assert!(config.tls_verify);
        assert_eq!(config.cert_path, Some(PathBuf::from("/etc/docker/certs")));
        assert_eq!(config.timeouts.connect, TimeoutSpec::After(Duration::from_millis(2500)));
        assert_eq!(config.timeouts.read, TimeoutSpec::Infinite);
        assert!(!config.ssh_strict_host_keys);
        assert!(!config.ssh_use_agent);
        assert_eq!(config.source(), ConfigSource::File);
    }

    #[test]
    fn test_env_overrides_file() {
        let file = toml_file("[daemon]\nhost = \"tcp://from-file:2375\"\n[timeouts]\nread_ms = 1000\n");
        let env = env_of(&[
            ("DOCKER_HOST", "unix:///tmp/env.sock"),
            ("DOCKWIRE_READ_TIMEOUT_MS", "0"),
            ("DOCKWIRE_SSH_STRICT_HOST_KEYS", "false"),
        ]);

        let config = load_config_with_env(Some(file.path().to_path_buf()), env).unwrap();
        assert_eq!(config.host.as_deref(), Some("unix:///tmp/env.sock"));
        assert_eq!(config.host_source(), ConfigSource::Env);
        assert_eq!(config.timeouts.read, TimeoutSpec::Infinite);
        assert!(!config.ssh_strict_host_keys);
        assert_eq!(config.source(), ConfigSource::Env);
    }

    #[test]
    fn test_missing_file_graceful() {
        let path = PathBuf::from("/nonexistent/path/client.toml");
        let config = load_config_with_env(Some(path), no_env()).unwrap();
        assert_eq!(config.source(), ConfigSource::Default);
        assert_eq!(config.config_file_path, None);
    }

    #[test]
    fn test_invalid_values_rejected() {
        let file = toml_file("[daemon\nhost = ");
        assert!(matches!(
            load_config_with_env(Some(file.path().to_path_buf()), no_env()),
            Err(ConfigError::ParseError(_))
        ));

        let bad_version = env_of(&[("DOCKWIRE_API_VERSION", "1.45")]);
        assert!(matches!(
            load_config_with_env(None, bad_version),
            Err(ConfigError::ValidationError(_))
        ));

        let bad_timeout = env_of(&[("DOCKWIRE_CONNECT_TIMEOUT_MS", "soon")]);
        assert!(matches!(
            load_config_with_env(None, bad_timeout),
            Err(ConfigError::ValidationError(_))
        ));
    }

    #[test]
    fn test_overrides() {
        let mut config = ClientConfig::default();
        ConfigOverrides::new()
            .with_host("ssh://me@box")
            .with_timeouts(Timeouts {
                connect: TimeoutSpec::After(Duration::from_secs(1)),
                read: TimeoutSpec::Unset,
            })
            .apply(&mut config)
            .unwrap();

        assert_eq!(config.host.as_deref(), Some("ssh://me@box"));
        assert_eq!(config.host_source(), ConfigSource::Explicit);
        assert_eq!(config.timeouts.connect, TimeoutSpec::After(Duration::from_secs(1)));
        assert_eq!(config.timeouts.read, TimeoutSpec::Unset);

        let err = ConfigOverrides::new()
            .with_api_version("latest")
            .apply(&mut config)
            .unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError(_)));
    }

    #[test]
    fn test_resolution_order() {
        let dir = TempDir::new().unwrap();
        let mut config = isolated(&dir);

        // nothing configured, no socket
        assert!(matches!(
            config.resolve_target(None),
            Err(TransportError::InvalidTarget(_))
        ));

        // socket search
        let socket = dir.path().join("docker.sock");
        std::fs::write(&socket, b"").unwrap();
        assert!(matches!(
            config.resolve_target(None).unwrap(),
            ConnectionTarget::Unix { path } if path == socket
        ));

        // context beats socket search
        let store = ContextStore::new(dir.path().join("docker"));
        let meta = store.meta_path("remote");
        std::fs::create_dir_all(meta.parent().unwrap()).unwrap();
        std::fs::write(&meta, r#"{"Endpoints":{"docker":{"Host":"tcp://ctx-host:2375"}}}"#).unwrap();
        config.context = Some("remote".into());
        assert_eq!(config.resolve_target(None).unwrap().to_string(), "tcp://ctx-host:2375");

        // host beats context
        config.host = Some("tcp://env-host:2375".into());
        assert_eq!(config.resolve_target(None).unwrap().to_string(), "tcp://env-host:2375");

        // explicit beats everything
        assert!(matches!(
            config.resolve_target(Some("unix:///tmp/explicit.sock")).unwrap(),
            ConnectionTarget::Unix { path } if path == PathBuf::from("/tmp/explicit.sock")
        ));
    }

    #[test]
    fn test_tls_verify_secures_tcp() {
        let dir = TempDir::new().unwrap();
        let certs = dir.path().join("certs");
        std::fs::create_dir_all(&certs).unwrap();
        std::fs::write(certs.join("ca.pem"), "CA").unwrap();

        let mut config = isolated(&dir);
        config.host = Some("tcp://secure:2376".into());
        assert!(!config.resolve_target(None).unwrap().is_tls());

        config.tls_verify = true;
        config.cert_path = Some(certs.clone());
        match config.resolve_target(None).unwrap() {
            ConnectionTarget::Tcp { tls: Some(tls), .. } => {
                assert_eq!(tls.ca_cert, Some(certs.join("ca.pem")));
                assert_eq!(tls.client_cert, None);
            }
            other => panic!("expected TLS target, got {other}"),
        }
    }

    #[test]
    fn test_ssh_options_applied() {
        let dir = TempDir::new().unwrap();
        let mut config = isolated(&dir);
        config.ssh_strict_host_keys = false;
        config.ssh_known_hosts = vec![PathBuf::from("/etc/ssh/ssh_known_hosts")];
        config.ssh_use_agent = false;

        match config.resolve_target(Some("ssh://deploy@box:2222")).unwrap() {
            ConnectionTarget::Ssh(endpoint) => {
                assert_eq!(endpoint.options.host_key_policy, HostKeyPolicy::InsecureAcceptAny);
                assert_eq!(
                    endpoint.options.known_hosts_files,
                    vec![PathBuf::from("/etc/ssh/ssh_known_hosts")]
                );
                assert!(!endpoint.options.use_agent);
                assert_eq!(endpoint.port, Some(2222));
            }
            other => panic!("expected SSH target, got {other}"),
        }
    }
}
