//! Remote Environment Sanitizing
//!
//! Variables forwarded to `docker system dial-stdio` on the remote host are
//! filtered against a fixed deny-list of loader and interpreter search-path
//! variables.

/// Variables never forwarded to the remote command
pub const DENIED_ENV_VARS: &[&str] = &[
    "LD_LIBRARY_PATH",
    "LD_PRELOAD",
    "DYLD_LIBRARY_PATH",
    "DYLD_INSERT_LIBRARIES",
    "SSL_CERT_FILE",
    "SSL_CERT_DIR",
    "PYTHONPATH",
    "PYTHONHOME",
    "PERL5LIB",
    "RUBYLIB",
    "NODE_PATH",
];

/// Whether `name` may be forwarded
#[must_use]
pub fn is_allowed(name: &str) -> bool {
    !DENIED_ENV_VARS
        .iter()
        .any(|denied| denied.eq_ignore_ascii_case(name))
}

/// Drop denied variables, keeping order
pub fn sanitize<I, K, V>(vars: I) -> Vec<(String, String)>
where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: Into<String>,
{
    vars.into_iter()
        .map(|(k, v)| (k.into(), v.into()))
        .filter(|(name, _)| {
            let allowed = is_allowed(name);
            if !allowed {
                tracing::debug!(name = %name, "Dropping denied environment variable");
            }
            allowed
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_denied_variables_removed() {
        let vars = sanitize([
            ("DOCKER_CONFIG", "/home/u/.docker"),
            ("LD_PRELOAD", "/tmp/evil.so"),
            ("LANG", "C.UTF-8"),
            ("PYTHONPATH", "/tmp"),
            ("ld_library_path", "/tmp"),
            ("SSL_CERT_FILE", "/tmp/ca.pem"),
        ]);

        assert_eq!(
            vars,
            vec![
                ("DOCKER_CONFIG".to_string(), "/home/u/.docker".to_string()),
                ("LANG".to_string(), "C.UTF-8".to_string()),
            ]
        );
    }

    #[test]
    fn test_every_denied_name_rejected() {
        for name in DENIED_ENV_VARS {
            assert!(!is_allowed(name), "{name}");
        }
        assert!(is_allowed("PATH"));
    }
}
