// Copyright 2025 Lablup Inc. and Jeongkyu Shin
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! SSH configuration file handling.
//!
//! Two concerns live here: resolving a host alias into connection
//! parameters (the read side, OpenSSH `Host` blocks with `*`/`?` patterns
//! and first-obtained-wins option semantics), and upserting the templated
//! compute-node block the editor resolves through a `ProxyJump` (the write
//! side). The upsert is a read-modify-write on the whole file without
//! locking; concurrent writers are not supported.

use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// Alias under which the granted compute node is published to the editor.
pub const COMPUTE_NODE_ALIAS: &str = "vsc_compute_node";

/// Resolved connection parameters for one alias.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostProfile {
    pub alias: String,
    pub hostname: String,
    pub port: u16,
    pub user: String,
    pub identity_file: Option<PathBuf>,
}

/// One parsed `Host` block.
#[derive(Debug, Clone, Default)]
struct HostEntry {
    patterns: Vec<String>,
    hostname: Option<String>,
    user: Option<String>,
    port: Option<u16>,
    identity_file: Option<PathBuf>,
}

impl HostEntry {
    fn matches(&self, alias: &str) -> bool {
        self.patterns.iter().any(|p| pattern_matches(p, alias))
    }
}

/// Parsed SSH configuration, in file order.
#[derive(Debug, Clone, Default)]
pub struct SshConfig {
    entries: Vec<HostEntry>,
}

impl SshConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Ok(Self::parse(&content))
    }

    pub fn parse(content: &str) -> Self {
        let mut entries = Vec::new();
        let mut current: Option<HostEntry> = None;

        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let Some((keyword, value)) = split_keyword(line) else {
                continue;
            };

            if keyword == "host" {
                if let Some(entry) = current.take() {
                    entries.push(entry);
                }
                current = Some(HostEntry {
                    patterns: value.split_whitespace().map(str::to_string).collect(),
                    ..Default::default()
                });
                continue;
            }

            let Some(entry) = current.as_mut() else {
                // Options before the first Host block apply globally in
                // OpenSSH; none of the ones this tool reads appear there.
                continue;
            };
            match keyword.as_str() {
                "hostname" => {
                    if entry.hostname.is_none() {
                        entry.hostname = Some(value.to_string());
                    }
                }
                "user" => {
                    if entry.user.is_none() {
                        entry.user = Some(value.to_string());
                    }
                }
                "port" => {
                    if entry.port.is_none() {
                        entry.port = value.parse().ok();
                    }
                }
                "identityfile" => {
                    if entry.identity_file.is_none() {
                        entry.identity_file = Some(expand_tilde(value));
                    }
                }
                other => {
                    tracing::trace!(keyword = other, "ignoring ssh config option");
                }
            }
        }
        if let Some(entry) = current.take() {
            entries.push(entry);
        }

        Self { entries }
    }

    /// Resolve `alias` into connection parameters.
    ///
    /// Options are merged across all matching blocks in file order with
    /// first-obtained-wins semantics, like OpenSSH. An alias no block
    /// matches is a fatal [`Error::UnknownHost`].
    pub fn resolve(&self, alias: &str) -> Result<HostProfile> {
        let mut hostname = None;
        let mut user = None;
        let mut port = None;
        let mut identity_file = None;
        let mut matched = false;

        for entry in self.entries.iter().filter(|e| e.matches(alias)) {
            matched = true;
            if hostname.is_none() {
                hostname = entry.hostname.clone();
            }
            if user.is_none() {
                user = entry.user.clone();
            }
            if port.is_none() {
                port = entry.port;
            }
            if identity_file.is_none() {
                identity_file = entry.identity_file.clone();
            }
        }

        if !matched {
            return Err(Error::UnknownHost(alias.to_string()));
        }

        Ok(HostProfile {
            alias: alias.to_string(),
            hostname: hostname.unwrap_or_else(|| alias.to_string()),
            port: port.unwrap_or(22),
            user: user.unwrap_or_else(default_user),
            identity_file,
        })
    }
}

/// Fields of the compute-node block written for [`COMPUTE_NODE_ALIAS`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComputeHostEntry {
    /// Login-node alias the editor's connection jumps through.
    pub proxy_jump: String,
    /// Address of the granted compute node.
    pub hostname: String,
    pub user: String,
    pub identity_file: String,
}

impl ComputeHostEntry {
    fn render(&self) -> Vec<String> {
        vec![
            format!("Host {COMPUTE_NODE_ALIAS}"),
            format!("    ProxyJump {}", self.proxy_jump),
            format!("    HostName {}", self.hostname),
            format!("    User {}", self.user),
            format!("    IdentityFile {}", self.identity_file),
        ]
    }
}

/// Insert or replace the compute-node block in the config file at `path`.
///
/// Replacement removes exactly the lines from the matched `Host` line up to
/// (not including) the next `Host ` line or end of file. Untouched content
/// keeps its original bytes, including CRLF line endings and a missing final
/// newline; the written block adopts the file's line ending. Applying the
/// same entry twice yields a byte-identical file.
pub fn upsert_compute_host(path: &Path, entry: &ComputeHostEntry) -> Result<()> {
    let content = std::fs::read_to_string(path)?;
    let updated = upsert_in_content(&content, entry);
    std::fs::write(path, updated)?;
    Ok(())
}

pub fn upsert_in_content(content: &str, entry: &ComputeHostEntry) -> String {
    let eol = if content.contains("\r\n") { "\r\n" } else { "\n" };
    let header = format!("Host {COMPUTE_NODE_ALIAS}");

    let mut block = entry.render().join(eol);
    block.push_str(eol);

    // Raw line slices with their terminators intact, so untouched content
    // is copied byte for byte.
    let lines: Vec<&str> = content.split_inclusive('\n').collect();

    if let Some(start) = lines.iter().position(|l| stripped(l) == header) {
        let end = lines[start + 1..]
            .iter()
            .position(|l| stripped(l).starts_with("Host "))
            .map(|offset| start + 1 + offset)
            .unwrap_or(lines.len());

        let mut out = String::with_capacity(content.len() + block.len());
        out.extend(lines[..start].iter().copied());
        out.push_str(&block);
        out.extend(lines[end..].iter().copied());
        return out;
    }

    let mut out = String::with_capacity(content.len() + block.len() + eol.len() * 2);
    out.push_str(content);
    if !out.is_empty() && !out.ends_with('\n') {
        out.push_str(eol);
    }
    if content.chars().any(|c| !c.is_whitespace()) {
        out.push_str(eol);
    }
    out.push_str(&block);
    out
}

fn stripped(line: &str) -> &str {
    line.trim_end_matches(['\r', '\n']).trim()
}

fn split_keyword(line: &str) -> Option<(String, &str)> {
    let (keyword, value) = line.split_once(['=', ' ', '\t'])?;
    Some((keyword.to_ascii_lowercase(), value.trim()))
}

/// OpenSSH-style pattern match supporting `*` and `?`.
fn pattern_matches(pattern: &str, candidate: &str) -> bool {
    let p: Vec<char> = pattern.chars().collect();
    let c: Vec<char> = candidate.chars().collect();
    matches_at(&p, &c)
}

fn matches_at(pattern: &[char], candidate: &[char]) -> bool {
    match pattern.first() {
        None => candidate.is_empty(),
        Some('*') => {
            (0..=candidate.len()).any(|skip| matches_at(&pattern[1..], &candidate[skip..]))
        }
        Some('?') => !candidate.is_empty() && matches_at(&pattern[1..], &candidate[1..]),
        Some(ch) => candidate.first() == Some(ch) && matches_at(&pattern[1..], &candidate[1..]),
    }
}

/// The user's own SSH configuration file.
pub fn default_config_path() -> PathBuf {
    expand_tilde("~/.ssh/config")
}

fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Ok(home) = std::env::var("HOME") {
            return Path::new(&home).join(rest);
        }
    }
    PathBuf::from(path)
}

fn default_user() -> String {
    std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .or_else(|_| std::env::var("LOGNAME"))
        .unwrap_or_else(|_| "root".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\
Host VSC
    HostName login.example.edu
    User alice
    IdentityFile /keys/id_ed25519

Host other
    HostName other.example.edu
    User bob
    Port 2222
";

    #[test]
    fn resolve_known_alias() {
        let config = SshConfig::parse(SAMPLE);
        let profile = config.resolve("VSC").unwrap();
        assert_eq!(profile.hostname, "login.example.edu");
        assert_eq!(profile.user, "alice");
        assert_eq!(profile.port, 22);
        assert_eq!(
            profile.identity_file.as_deref(),
            Some(Path::new("/keys/id_ed25519"))
        );
    }

    #[test]
    fn missing_alias_is_fatal() {
        let config = SshConfig::parse(SAMPLE);
        assert!(matches!(config.resolve("nope"), Err(Error::UnknownHost(_))));
    }

    #[test]
    fn first_obtained_option_wins() {
        let config = SshConfig::parse(
            "Host login\n    User early\nHost log*\n    User late\n    HostName real.example.edu\n",
        );
        let profile = config.resolve("login").unwrap();
        assert_eq!(profile.user, "early");
        assert_eq!(profile.hostname, "real.example.edu");
    }

    #[test]
    fn wildcard_patterns() {
        assert!(pattern_matches("*", "anything"));
        assert!(pattern_matches("login?", "login1"));
        assert!(pattern_matches("*.example.edu", "a.example.edu"));
        assert!(!pattern_matches("login?", "login"));
        assert!(!pattern_matches("VSC", "vsc"));
    }

    #[test]
    fn upsert_appends_when_absent() {
        let entry = ComputeHostEntry {
            proxy_jump: "VSC".into(),
            hostname: "node123".into(),
            user: "alice".into(),
            identity_file: "/keys/id_ed25519".into(),
        };
        let updated = upsert_in_content(SAMPLE, &entry);
        assert!(updated.contains("Host vsc_compute_node"));
        assert!(updated.contains("    ProxyJump VSC"));
        // Existing entries untouched.
        assert!(updated.contains("Host VSC"));
        assert!(updated.contains("Host other"));
    }

    #[test]
    fn upsert_is_idempotent() {
        let entry = ComputeHostEntry {
            proxy_jump: "VSC".into(),
            hostname: "node123".into(),
            user: "alice".into(),
            identity_file: "/keys/id_ed25519".into(),
        };
        let once = upsert_in_content(SAMPLE, &entry);
        let twice = upsert_in_content(&once, &entry);
        assert_eq!(once, twice);
    }

    #[test]
    fn upsert_replaces_only_the_prior_block() {
        let entry_a = ComputeHostEntry {
            proxy_jump: "VSC".into(),
            hostname: "node123".into(),
            user: "alice".into(),
            identity_file: "/keys/id_ed25519".into(),
        };
        let entry_b = ComputeHostEntry {
            hostname: "node456".into(),
            ..entry_a.clone()
        };

        let with_a = upsert_in_content(SAMPLE, &entry_a);
        let with_b = upsert_in_content(&with_a, &entry_b);

        assert!(!with_b.contains("node123"));
        assert!(with_b.contains("    HostName node456"));
        assert!(with_b.contains("Host VSC"));
        assert!(with_b.contains("Host other"));
        // Direct write of B must agree with the replace path.
        assert_eq!(with_b, upsert_in_content(SAMPLE, &entry_b));
    }
}
