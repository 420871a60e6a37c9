//! OpenSSH `known_hosts` Snapshot
//!
//! Supported line forms:
//!
//! ```text
//! host1,host2 ssh-ed25519 AAAA...                 plain names
//! [host]:2222 ssh-ed25519 AAAA...                 non-default port
//! *.internal,!bad.internal ssh-ed25519 AAAA...    wildcards and negation
//! |1|<salt b64>|<hmac-sha1 b64> ssh-ed25519 ...   hashed names
//! @revoked * ssh-ed25519 AAAA...                  revoked key
//! ```
//!
//! `@cert-authority` lines are skipped: certificate host keys are not
//! accepted.

use std::path::Path;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use hmac::{Hmac, Mac};
use russh::keys::{HashAlg, PublicKey};
use sha1::Sha1;

use crate::transport::TransportError;

/// Host key policy for SSH targets
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum HostKeyPolicy {
    /// Require a matching, non-revoked `known_hosts` entry
    #[default]
    Strict,
    /// Accept any host key; for tests against throwaway servers only
    InsecureAcceptAny,
}

#[derive(Clone, Debug)]
enum HostPattern {
    Hashed { salt: Vec<u8>, hash: Vec<u8> },
    Patterns(Vec<String>),
}

#[derive(Clone, Debug)]
struct KnownHostEntry {
    revoked: bool,
    hosts: HostPattern,
    key: PublicKey,
}

/// Parsed trust store
#[derive(Clone, Debug, Default)]
pub struct KnownHosts {
    entries: Vec<KnownHostEntry>,
}

/// Outcome of checking one presented key
#[derive(Debug, PartialEq, Eq)]
pub enum HostKeyMatch {
    /// Key recorded for this host
    Trusted,
    /// Key marked `@revoked`
    Revoked,
    /// Host known with different keys (their fingerprints)
    Mismatch(Vec<String>),
    /// Host not present
    Unknown,
}

impl KnownHosts {
    /// Parse file contents; unparseable lines are skipped with a debug log
    #[must_use]
    pub fn parse(contents: &str) -> Self {
        let entries = contents
            .lines()
            .enumerate()
            .filter_map(|(idx, line)| {
                let entry = parse_line(line);
                if entry.is_none() && !is_blank_or_comment(line) {
                    tracing::debug!(line = idx + 1, "Skipping unsupported known_hosts line");
                }
                entry
            })
            .collect();
        Self { entries }
    }

    /// Load and merge several files; missing files are ignored
    ///
    /// # Errors
    ///
    /// Returns `TransportError::Io` when a file exists but cannot be read.
    pub fn load<P: AsRef<Path>>(paths: &[P]) -> Result<Self, TransportError> {
        let mut merged = Self::default();
        for path in paths {
            let path = path.as_ref();
            match std::fs::read_to_string(path) {
                Ok(contents) => merged.entries.extend(Self::parse(&contents).entries),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    tracing::debug!(path = ?path, "known_hosts file not present");
                }
                Err(e) => return Err(TransportError::Io(e)),
            }
        }
        Ok(merged)
    }

    /// Number of usable entries
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no entries were loaded
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Check `key` for `host` on `port`
    #[must_use]
    pub fn check(&self, host: &str, port: u16, key: &PublicKey) -> HostKeyMatch {
        let lookup = host_lookup_name(host, port);
        let presented = fingerprint(key);

        let matching: Vec<&KnownHostEntry> = self
            .entries
            .iter()
            .filter(|entry| entry.hosts.matches(&lookup))
            .collect();

        if matching
            .iter()
            .any(|entry| entry.revoked && fingerprint(&entry.key) == presented)
        {
            return HostKeyMatch::Revoked;
        }

        let recorded: Vec<String> = matching
            .iter()
            .filter(|entry| !entry.revoked)
            .map(|entry| fingerprint(&entry.key))
            .collect();

        if recorded.is_empty() {
            HostKeyMatch::Unknown
        } else if recorded.contains(&presented) {
            HostKeyMatch::Trusted
        } else {
            HostKeyMatch::Mismatch(recorded)
        }
    }
}

/// SHA256 fingerprint in OpenSSH display form (`SHA256:...`)
#[must_use]
pub fn fingerprint(key: &PublicKey) -> String {
    key.fingerprint(HashAlg::Sha256).to_string()
}

/// Apply `policy` to a presented host key
///
/// # Errors
///
/// Returns `TransportError::HostKeyVerification` under `Strict` when the
/// host is unknown, the key differs from the recorded ones, or the key is
/// revoked.
pub fn verify_host_key(
    known: &KnownHosts,
    policy: HostKeyPolicy,
    host: &str,
    port: u16,
    key: &PublicKey,
) -> Result<(), TransportError> {
    let actual = fingerprint(key);

    if policy == HostKeyPolicy::InsecureAcceptAny {
        tracing::warn!(
            host = %host,
            fingerprint = %actual,
            "Accepting SSH host key without verification"
        );
        return Ok(());
    }

    let host_label = host_lookup_name(host, port);
    match known.check(host, port, key) {
        HostKeyMatch::Trusted => {
            tracing::debug!(host = %host_label, fingerprint = %actual, "Host key verified");
            Ok(())
        }
        HostKeyMatch::Revoked => Err(TransportError::HostKeyVerification {
            host: host_label,
            expected: Some("a non-revoked key".to_string()),
            actual,
        }),
        HostKeyMatch::Mismatch(recorded) => Err(TransportError::HostKeyVerification {
            host: host_label,
            expected: Some(recorded.join(", ")),
            actual,
        }),
        HostKeyMatch::Unknown => Err(TransportError::HostKeyVerification {
            host: host_label,
            expected: None,
            actual,
        }),
    }
}

/// Name under which a host is recorded: `host` for port 22, else `[host]:port`
fn host_lookup_name(host: &str, port: u16) -> String {
    if port == 22 {
        host.to_string()
    } else {
        format!("[{host}]:{port}")
    }
}

fn is_blank_or_comment(line: &str) -> bool {
    let trimmed = line.trim();
    trimmed.is_empty() || trimmed.starts_with('#')
}

fn parse_line(line: &str) -> Option<KnownHostEntry> {
    if is_blank_or_comment(line) {
        return None;
    }

    let mut fields = line.split_whitespace();
    let mut first = fields.next()?;

    let revoked = match first {
        "@revoked" => {
            first = fields.next()?;
            true
        }
        // certificate authorities and any other marker
        marker if marker.starts_with('@') => return None,
        _ => false,
    };

    let _key_type = fields.next()?;
    let key = russh::keys::parse_public_key_base64(fields.next()?).ok()?;

    let hosts = if let Some(hashed) = first.strip_prefix("|1|") {
        let (salt, hash) = hashed.split_once('|')?;
        HostPattern::Hashed {
            salt: STANDARD.decode(salt).ok()?,
            hash: STANDARD.decode(hash).ok()?,
        }
    } else {
        HostPattern::Patterns(first.split(',').map(str::to_ascii_lowercase).collect())
    };

    Some(KnownHostEntry {
        revoked,
        hosts,
        key,
    })
}

impl HostPattern {
    fn matches(&self, lookup: &str) -> bool {
        match self {
            Self::Hashed { salt, hash } => {
                let Ok(mut mac) = Hmac::<Sha1>::new_from_slice(salt) else {
                    return false;
                };
                mac.update(lookup.as_bytes());
                mac.verify_slice(hash).is_ok()
            }
            Self::Patterns(patterns) => {
                let lookup = lookup.to_ascii_lowercase();
                let mut positive = false;
                for pattern in patterns {
                    if let Some(negated) = pattern.strip_prefix('!') {
                        if wildcard_match(negated, &lookup) {
                            return false;
                        }
                    } else if wildcard_match(pattern, &lookup) {
                        positive = true;
                    }
                }
                positive
            }
        }
    }
}

/// Glob match supporting `*` and `?`
pub(crate) fn wildcard_match(pattern: &str, text: &str) -> bool {
    let p: Vec<char> = pattern.chars().collect();
    let t: Vec<char> = text.chars().collect();
    let (mut pi, mut ti) = (0, 0);
    let mut star: Option<(usize, usize)> = None;

    while ti < t.len() {
        if pi < p.len() && (p[pi] == '?' || p[pi] == t[ti]) {
            pi += 1;
            ti += 1;
        } else if pi < p.len() && p[pi] == '*' {
            star = Some((pi, ti));
            pi += 1;
        } else if let Some((star_pi, star_ti)) = star {
            pi = star_pi + 1;
            ti = star_ti + 1;
            star = Some((star_pi, star_ti + 1));
        } else {
            return false;
        }
    }

    p[pi..].iter().all(|&c| c == '*')
}
