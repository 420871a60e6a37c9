//! Docker Context Store
//!
//! Reads the named endpoints the Docker CLI keeps under `~/.docker`:
//!
//! ```text
//! ~/.docker/config.json                                {"currentContext": "<name>"}
//! ~/.docker/contexts/meta/<sha256(name)>/meta.json     Endpoints.docker.{Host,SkipTLSVerify}
//! ~/.docker/contexts/tls/<sha256(name)>/docker/        ca.pem, cert.pem, key.pem
//! ```
//!
//! The context named `default` stands for "no context".

use std::fs::File;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use sha2::{Digest, Sha256};

use crate::transport::tls::{TlsConfig, CA_FILE, CERT_FILE, KEY_FILE};
use crate::transport::TransportError;

/// Context name meaning "use the ordinary endpoint resolution"
pub const DEFAULT_CONTEXT: &str = "default";

/// Directory name of a context inside the store
#[must_use]
pub fn context_dir_name(name: &str) -> String {
    hex::encode(Sha256::digest(name.as_bytes()))
}

/// A resolved context endpoint
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ContextEndpoint {
    /// Context name
    pub name: String,
    /// Daemon URL (`tcp://...`, `unix://...`, `ssh://...`)
    pub host: String,
    /// Accept any server certificate
    pub skip_tls_verify: bool,
    /// CA bundle stored with the context
    pub tls_ca: Option<PathBuf>,
    /// Client certificate stored with the context
    pub tls_cert: Option<PathBuf>,
    /// Client key stored with the context
    pub tls_key: Option<PathBuf>,
}

impl ContextEndpoint {
    /// Whether the context carries any TLS material
    #[must_use]
    pub fn has_tls(&self) -> bool {
        self.tls_ca.is_some() || self.tls_cert.is_some() || self.tls_key.is_some()
    }

    /// TLS settings for this endpoint, if it is to be secured
    #[must_use]
    pub fn tls_config(&self) -> Option<TlsConfig> {
        (self.has_tls() || self.skip_tls_verify).then(|| TlsConfig {
            ca_cert: self.tls_ca.clone(),
            client_cert: self.tls_cert.clone(),
            client_key: self.tls_key.clone(),
            skip_verify: self.skip_tls_verify,
        })
    }
}

#[derive(Deserialize)]
struct CliConfig {
    #[serde(rename = "currentContext", default)]
    current_context: Option<String>,
}

/// Docker CLI configuration directory
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ContextStore {
    root: PathBuf,
}

impl ContextStore {
    /// Store rooted at `root` (normally `~/.docker`)
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// `~/.docker`, when a home directory is known
    #[must_use]
    pub fn default_location() -> Option<Self> {
        dirs::home_dir().map(|home| Self::new(home.join(".docker")))
    }

    /// Store root
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Metadata file of context `name`
    #[must_use]
    pub fn meta_path(&self, name: &str) -> PathBuf {
        self.root
            .join("contexts")
            .join("meta")
            .join(context_dir_name(name))
            .join("meta.json")
    }

    /// TLS directory of context `name`
    #[must_use]
    pub fn tls_dir(&self, name: &str) -> PathBuf {
        self.root
            .join("contexts")
            .join("tls")
            .join(context_dir_name(name))
            .join("docker")
    }

    /// Name of the active context
    ///
    /// `env_context` (the value of `DOCKER_CONTEXT`) wins over
    /// `currentContext` in `config.json`. `default`, an empty name or a
    /// missing `config.json` all yield `None`.
    ///
    /// # Errors
    ///
    /// `InvalidContext` when `config.json` exists but cannot be read or parsed.
    pub fn current_name(&self, env_context: Option<&str>) -> Result<Option<String>, TransportError> {
        let name = match env_context {
            Some(name) => Some(name.to_string()),
            None => self.configured_name()?,
        };
        Ok(name.filter(|n| !n.is_empty() && n != DEFAULT_CONTEXT))
    }

    fn configured_name(&self) -> Result<Option<String>, TransportError> {
        let path = self.root.join("config.json");
        if !path.exists() {
            return Ok(None);
        }

        let invalid = |message: String| TransportError::InvalidContext {
            context: "currentContext".to_string(),
            message,
        };
        let text = std::fs::read_to_string(&path)
            .map_err(|e| invalid(format!("Failed to read Docker config file {}: {e}", path.display())))?;
        let config: CliConfig = serde_json::from_str(&text)
            .map_err(|e| invalid(format!("Invalid JSON in Docker config file {}: {e}", path.display())))?;
        Ok(config.current_context)
    }

    /// Load context `name`
    ///
    /// # Errors
    ///
    /// `InvalidContext` when the context does not exist, its metadata is
    /// malformed or lacks `Endpoints.docker.Host`, or one of its TLS files
    /// cannot be read.
    pub fn load(&self, name: &str) -> Result<ContextEndpoint, TransportError> {
        let invalid = |message: String| TransportError::InvalidContext {
            context: name.to_string(),
            message,
        };

        let meta_path = self.meta_path(name);
        if !meta_path.is_file() {
            return Err(invalid(format!(
                "Context not found (no metadata at {})",
                meta_path.display()
            )));
        }

        let text = std::fs::read_to_string(&meta_path)
            .map_err(|e| invalid(format!("Failed to read context metadata file: {e}")))?;
        let meta: serde_json::Value = serde_json::from_str(&text)
            .map_err(|e| invalid(format!("Invalid JSON in context metadata file: {e}")))?;

        let docker = meta
            .get("Endpoints")
            .and_then(|e| e.get("docker"))
            .ok_or_else(|| invalid("Missing required field 'Endpoints.docker'".to_string()))?;
        let host = docker
            .get("Host")
            .and_then(serde_json::Value::as_str)
            .ok_or_else(|| invalid("Missing required field 'Endpoints.docker.Host'".to_string()))?;
        let skip_tls_verify = docker
            .get("SkipTLSVerify")
            .and_then(serde_json::Value::as_bool)
            .unwrap_or(false);

        let tls_dir = self.tls_dir(name);
        let readable = |file: &str, what: &str| -> Result<Option<PathBuf>, TransportError> {
            let path = tls_dir.join(file);
            if !path.exists() {
                return Ok(None);
            }
            File::open(&path)
                .map(|_| Some(path.clone()))
                .map_err(|e| invalid(format!("Failed to read {what} {}: {e}", path.display())))
        };

        let endpoint = ContextEndpoint {
            name: name.to_string(),
            host: host.to_string(),
            skip_tls_verify,
            tls_ca: readable(CA_FILE, "CA certificate")?,
            tls_cert: readable(CERT_FILE, "client certificate")?,
            tls_key: readable(KEY_FILE, "private key")?,
        };

        tracing::debug!(
            context = %name,
            host = %endpoint.host,
            tls = endpoint.has_tls(),
            "Loaded Docker context"
        );
        Ok(endpoint)
    }

    /// The active context, if any
    ///
    /// # Errors
    ///
    /// As [`current_name`](Self::current_name) and [`load`](Self::load).
    pub fn current(&self, env_context: Option<&str>) -> Result<Option<ContextEndpoint>, TransportError> {
        self.current_name(env_context)?
            .map(|name| self.load(&name))
            .transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use tempfile::TempDir;

    fn write_meta(store: &ContextStore, name: &str, meta: &str) {
        let path = store.meta_path(name);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, meta).unwrap();
    }

    fn endpoint_meta(name: &str, docker: serde_json::Value) -> String {
        json!({ "Name": name, "Endpoints": { "docker": docker } }).to_string()
    }

    fn message(err: TransportError) -> (String, String) {
        match err {
            TransportError::InvalidContext { context, message } => (context, message),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_context_dir_name() {
        assert_eq!(
            context_dir_name("production"),
            "ab8e18ef4ebebeddc0b3152ce9c9006e14fc05242e3fc9ce32246ea6a9543074"
        );
        assert_eq!(
            context_dir_name(""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn test_no_context_cases() {
        let dir = TempDir::new().unwrap();
        let store = ContextStore::new(dir.path());

        // no config.json
        assert_eq!(store.current(None).unwrap(), None);

        std::fs::write(dir.path().join("config.json"), r#"{"currentContext":"default"}"#).unwrap();
        assert_eq!(store.current(None).unwrap(), None);

        std::fs::write(dir.path().join("config.json"), "{}").unwrap();
        assert_eq!(store.current(None).unwrap(), None);

        assert_eq!(store.current(Some("default")).unwrap(), None);
    }

    #[test]
    fn test_reads_context_from_config_file() {
        let dir = TempDir::new().unwrap();
        let store = ContextStore::new(dir.path());
        std::fs::write(dir.path().join("config.json"), r#"{"currentContext":"mycontext"}"#).unwrap();
        write_meta(
            &store,
            "mycontext",
            &endpoint_meta("mycontext", json!({ "Host": "tcp://192.168.1.100:2375" })),
        );

        let endpoint = store.current(None).unwrap().unwrap();
        assert_eq!(endpoint.host, "tcp://192.168.1.100:2375");
        assert!(!endpoint.skip_tls_verify);
        assert!(!endpoint.has_tls());
        assert_eq!(endpoint.tls_config(), None);
    }

    #[test]
    fn test_env_context_wins() {
        let dir = TempDir::new().unwrap();
        let store = ContextStore::new(dir.path());
        std::fs::write(dir.path().join("config.json"), r#"{"currentContext":"configctx"}"#).unwrap();
        write_meta(&store, "envctx", &endpoint_meta("envctx", json!({ "Host": "unix:///custom/docker.sock" })));
        write_meta(&store, "configctx", &endpoint_meta("configctx", json!({ "Host": "tcp://wrong:2375" })));

        let endpoint = store.current(Some("envctx")).unwrap().unwrap();
        assert_eq!(endpoint.host, "unix:///custom/docker.sock");
    }

    #[test]
    fn test_invalid_contexts() {
        let dir = TempDir::new().unwrap();
        let store = ContextStore::new(dir.path());

        let (context, msg) = message(store.load("nonexistent").unwrap_err());
        assert_eq!(context, "nonexistent");
        assert!(msg.contains("not found"));

        write_meta(&store, "badmeta", "invalid json");
        let (_, msg) = message(store.load("badmeta").unwrap_err());
        assert!(msg.contains("Invalid JSON in context metadata file"));

        write_meta(&store, "noendpoints", r#"{"Name":"noendpoints"}"#);
        let (_, msg) = message(store.load("noendpoints").unwrap_err());
        assert!(msg.contains("Missing required field"));

        write_meta(&store, "nohost", &endpoint_meta("nohost", json!({ "SkipTLSVerify": true })));
        let (context, msg) = message(store.load("nohost").unwrap_err());
        assert_eq!(context, "nohost");
        assert!(msg.contains("Missing required field") && msg.contains("Host"));

        std::fs::write(dir.path().join("config.json"), "not valid json {{{").unwrap();
        let (_, msg) = message(store.current(None).unwrap_err());
        assert!(msg.contains("Invalid JSON in Docker config file"));
    }

    #[test]
    fn test_tls_material() {
        let dir = TempDir::new().unwrap();
        let store = ContextStore::new(dir.path());
        write_meta(
            &store,
            "securectx",
            &endpoint_meta("securectx", json!({ "Host": "tcp://secure:2376", "SkipTLSVerify": true })),
        );
        let tls_dir = store.tls_dir("securectx");
        std::fs::create_dir_all(&tls_dir).unwrap();
        std::fs::write(tls_dir.join("ca.pem"), "CA").unwrap();
        std::fs::write(tls_dir.join("cert.pem"), "CERT").unwrap();
        std::fs::write(tls_dir.join("key.pem"), "KEY").unwrap();

        let endpoint = store.load("securectx").unwrap();
        assert!(endpoint.has_tls());
        assert!(endpoint.skip_tls_verify);

        let tls = endpoint.tls_config().unwrap();
        assert_eq!(tls.ca_cert, Some(tls_dir.join("ca.pem")));
        assert_eq!(tls.client_cert, Some(tls_dir.join("cert.pem")));
        assert_eq!(tls.client_key, Some(tls_dir.join("key.pem")));
        assert!(tls.skip_verify);
    }

    #[test]
    fn test_skip_verify_without_material_still_uses_tls() {
        let dir = TempDir::new().unwrap();
        let store = ContextStore::new(dir.path());
        write_meta(
            &store,
            "insecure",
            &endpoint_meta("insecure", json!({ "Host": "tcp://h:2376", "SkipTLSVerify": true })),
        );

        let tls = store.load("insecure").unwrap().tls_config().unwrap();
        assert!(tls.skip_verify);
        assert_eq!(tls.ca_cert, None);
    }
}
