//! `~/.ssh/config` Snapshot
//!
//! Only the keywords that affect how the tunnel connects are read:
//! `HostName`, `Port`, `User`, `IdentityFile`, `UserKnownHostsFile`.
//! As in OpenSSH, the first value obtained for a keyword wins, so earlier
//! `Host` blocks take precedence over later ones.

use std::path::{Path, PathBuf};

use super::known_hosts::wildcard_match;

/// Settings resolved for one host alias
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SshHostConfig {
    /// Real host name to connect to
    pub host_name: Option<String>,
    /// Port
    pub port: Option<u16>,
    /// Login user
    pub user: Option<String>,
    /// Private keys to try, in order
    pub identity_files: Vec<PathBuf>,
    /// Extra `known_hosts` files
    pub known_hosts_files: Vec<PathBuf>,
}

#[derive(Clone, Debug)]
struct HostBlock {
    patterns: Vec<String>,
    options: Vec<(String, String)>,
}

/// Parsed config file, captured once
#[derive(Clone, Debug, Default)]
pub struct SshConfigSnapshot {
    blocks: Vec<HostBlock>,
}

impl SshConfigSnapshot {
    /// Parse config text
    #[must_use]
    pub fn parse(contents: &str) -> Self {
        // options before the first Host line apply to every host
        let mut blocks = vec![HostBlock {
            patterns: vec!["*".to_string()],
            options: Vec::new(),
        }];

        for line in contents.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let Some((keyword, value)) = split_keyword(line) else {
                continue;
            };
            let keyword = keyword.to_ascii_lowercase();

            match keyword.as_str() {
                "host" => blocks.push(HostBlock {
                    patterns: value.split_whitespace().map(str::to_string).collect(),
                    options: Vec::new(),
                }),
                // Match blocks are not evaluated; their options are ignored
                "match" => blocks.push(HostBlock {
                    patterns: Vec::new(),
                    options: Vec::new(),
                }),
                _ => {
                    if let Some(block) = blocks.last_mut() {
                        block.options.push((keyword, unquote(value).to_string()));
                    }
                }
            }
        }

        Self { blocks }
    }

    /// Load `path`; a missing file yields an empty snapshot
    #[must_use]
    pub fn load(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(contents) => Self::parse(&contents),
            Err(e) => {
                tracing::debug!(path = ?path, error = %e, "No ssh config loaded");
                Self::default()
            }
        }
    }

    /// Load `~/.ssh/config`
    #[must_use]
    pub fn load_default() -> Self {
        match dirs::home_dir() {
            Some(home) => Self::load(&home.join(".ssh").join("config")),
            None => Self::default(),
        }
    }

    /// Resolve settings for `alias`
    #[must_use]
    pub fn lookup(&self, alias: &str) -> SshHostConfig {
        let mut resolved = SshHostConfig::default();

        for block in self.blocks.iter().filter(|b| host_matches(&b.patterns, alias)) {
            for (keyword, value) in &block.options {
                match keyword.as_str() {
                    "hostname" if resolved.host_name.is_none() => {
                        resolved.host_name = Some(value.replace("%h", alias));
                    }
                    "port" if resolved.port.is_none() => {
                        resolved.port = value.parse().ok();
                    }
                    "user" if resolved.user.is_none() => {
                        resolved.user = Some(value.clone());
                    }
                    "identityfile" => resolved.identity_files.push(expand_tilde(value)),
                    "userknownhostsfile" => resolved
                        .known_hosts_files
                        .extend(value.split_whitespace().map(expand_tilde)),
                    _ => {}
                }
            }
        }

        resolved
    }
}

fn split_keyword(line: &str) -> Option<(&str, &str)> {
    let idx = line.find(|c: char| c.is_whitespace() || c == '=')?;
    let (keyword, rest) = line.split_at(idx);
    let value = rest.trim_start_matches(|c: char| c.is_whitespace() || c == '=');
    Some((keyword, value.trim()))
}

fn unquote(value: &str) -> &str {
    value
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
        .unwrap_or(value)
}

fn host_matches(patterns: &[String], alias: &str) -> bool {
    let alias = alias.to_ascii_lowercase();
    let mut positive = false;
    for pattern in patterns {
        let pattern = pattern.to_ascii_lowercase();
        if let Some(negated) = pattern.strip_prefix('!') {
            if wildcard_match(negated, &alias) {
                return false;
            }
        } else if wildcard_match(&pattern, &alias) {
            positive = true;
        }
    }
    positive
}

/// Expand a leading `~/` to the home directory
pub(crate) fn expand_tilde(path: &str) -> PathBuf {
    match (path.strip_prefix("~/"), dirs::home_dir()) {
        (Some(rest), Some(home)) => home.join(rest),
        _ => PathBuf::from(path),
    }
}
