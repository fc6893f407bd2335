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

//! Host-key pinning against an OpenSSH `known_hosts`-format file.
//!
//! Keys are trusted on first use: an unknown host (or an unknown key type
//! for a known host) is appended to the file and accepted; a key that
//! conflicts with the pinned hash is rejected. One manager is shared by
//! every host pointing at the same file.

use std::collections::HashMap;
use std::io::Write;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use russh::keys::{PublicKey, PublicKeyBase64};
use tracing::warn;

use crate::error::Error;

#[derive(Debug, Clone)]
struct KeyRecord {
    hash: String,
    line: usize,
}

#[derive(Debug, Default)]
struct KnownHostsState {
    /// normalized hostname → key type → pinned hash and line number.
    keys: HashMap<String, HashMap<String, KeyRecord>>,
    lines: usize,
}

/// Parsed `known_hosts` file plus the append-on-first-trust policy.
#[derive(Debug)]
pub struct KnownHostsManager {
    path: Option<PathBuf>,
    state: Mutex<KnownHostsState>,
}

impl KnownHostsManager {
    /// Parse a `known_hosts` file. Returns the manager plus informational
    /// notes (duplicate identical entries). Conflicting entries for the
    /// same host and key type reject the whole file.
    pub fn parse(path: &Path) -> crate::error::Result<(Self, Vec<String>)> {
        let content = std::fs::read_to_string(path).map_err(|err| match err.kind() {
            std::io::ErrorKind::NotFound => Error::FileNotFound {
                path: path.to_path_buf(),
            },
            std::io::ErrorKind::PermissionDenied => Error::PermissionDenied {
                path: path.to_path_buf(),
            },
            _ => Error::ParseError {
                what: path.display().to_string(),
                reason: err.to_string(),
            },
        })?;

        let mut state = KnownHostsState::default();
        let mut notes = Vec::new();
        for (index, raw_line) in content.lines().enumerate() {
            let line = index + 1;
            state.lines = line;
            let trimmed = raw_line.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }
            let mut fields = trimmed.split_whitespace();
            let (Some(hosts), Some(key_type), Some(hash)) =
                (fields.next(), fields.next(), fields.next())
            else {
                return Err(Error::ParseError {
                    what: path.display().to_string(),
                    reason: format!("malformed entry on line {line}"),
                });
            };
            for host in hosts.split(',') {
                let types = state.keys.entry(host.to_string()).or_default();
                match types.get(key_type) {
                    None => {
                        types.insert(
                            key_type.to_string(),
                            KeyRecord {
                                hash: hash.to_string(),
                                line,
                            },
                        );
                    }
                    Some(known) if known.hash == hash => {
                        notes.push(format!(
                            "known_hosts ({}) duplicate entries on lines {} and {line}",
                            path.display(),
                            known.line,
                        ));
                    }
                    Some(known) => {
                        return Err(Error::ParseError {
                            what: path.display().to_string(),
                            reason: format!(
                                "inconsistent entries on lines {} and {line}",
                                known.line
                            ),
                        });
                    }
                }
            }
        }

        Ok((
            Self {
                path: Some(path.to_path_buf()),
                state: Mutex::new(state),
            },
            notes,
        ))
    }

    /// A manager that accepts every key without recording anything. Used
    /// for hosts without a `known_hosts` file and for hosts riding inside
    /// a jump tunnel, where pinning happens at the jump layer.
    pub fn insecure() -> Self {
        Self {
            path: None,
            state: Mutex::new(KnownHostsState::default()),
        }
    }

    /// Authorize a server key presented for `hostname`.
    ///
    /// Unknown hosts and unknown key types are trusted on first use and
    /// appended to the file; a hash conflict is a hard failure.
    pub fn authorize(
        &self,
        hostname: &str,
        remote_addr: SocketAddr,
        key: &PublicKey,
    ) -> crate::error::Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let mut state = self.state.lock().unwrap();
        let host = normalize(hostname);
        let key_type = key.algorithm().to_string();
        let hash = key.public_key_base64();

        if let Some(known) = state.keys.get(&host).and_then(|types| types.get(&key_type)) {
            if known.hash == hash {
                return Ok(());
            }
            return Err(Error::HostKeyMismatch { host });
        }

        append_host_key(path, &host, &key_type, &hash)?;
        warn!(
            "permanently added '{host}' ({key_type}) from {remote_addr} to the list of known hosts"
        );
        state.lines += 1;
        let line = state.lines;
        state
            .keys
            .entry(host)
            .or_default()
            .insert(key_type, KeyRecord { hash, line });
        Ok(())
    }

    #[cfg(test)]
    fn records(&self) -> usize {
        let state = self.state.lock().unwrap();
        state.keys.values().map(HashMap::len).sum()
    }
}

fn append_host_key(
    path: &Path,
    host: &str,
    key_type: &str,
    hash: &str,
) -> crate::error::Result<()> {
    let mut file = std::fs::OpenOptions::new()
        .append(true)
        .open(path)
        .map_err(|err| match err.kind() {
            std::io::ErrorKind::PermissionDenied => Error::PermissionDenied {
                path: path.to_path_buf(),
            },
            _ => Error::FileNotFound {
                path: path.to_path_buf(),
            },
        })?;
    writeln!(file, "{host} {key_type} {hash}").map_err(|err| Error::ParseError {
        what: path.display().to_string(),
        reason: err.to_string(),
    })
}

/// Apply OpenSSH hostname bracketing: a host on the default SSH port is
/// recorded bare, any other port as `[host]:port`.
fn normalize(hostname: &str) -> String {
    let (host, port) = split_host_port(hostname);
    match port {
        Some(port) if port != 22 => format!("[{host}]:{port}"),
        _ => host.to_string(),
    }
}

fn split_host_port(hostname: &str) -> (&str, Option<u16>) {
    if let Some(stripped) = hostname.strip_prefix('[') {
        if let Some((host, rest)) = stripped.split_once(']') {
            let port = rest.strip_prefix(':').and_then(|p| p.parse().ok());
            return (host, port);
        }
    }
    match hostname.rsplit_once(':') {
        Some((host, port)) => match port.parse() {
            Ok(port) => (host, Some(port)),
            Err(_) => (hostname, None),
        },
        None => (hostname, None),
    }
}
