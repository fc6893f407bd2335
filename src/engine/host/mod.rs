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

//! Host registry: owns the host records, their shared identity material,
//! and jump-host expansion.

mod entry;

pub use entry::HostEntry;

use std::collections::HashMap;
use std::sync::Arc;

use russh::keys::PrivateKey;

use crate::config::{Address, HostConfig, Validations};
use crate::error::Error;
use crate::ssh::KnownHostsManager;

use super::tunnel::{TunnelEngine, TunnelEntry};

pub struct HostEngine {
    hosts: HashMap<String, Arc<HostEntry>>,
    /// Parsed signers, shared across hosts by identity path.
    identities: HashMap<String, Arc<PrivateKey>>,
    /// Known-hosts managers, shared across hosts by file path.
    host_keys: HashMap<String, Arc<KnownHostsManager>>,
}

impl HostEngine {
    /// Build and validate the host set. Duplicate names are reported and
    /// skipped; invalid hosts are kept so tunnels referencing them can be
    /// flagged.
    pub fn new(configs: &[HostConfig], validations: &mut Validations) -> Self {
        let mut engine = Self {
            hosts: HashMap::new(),
            identities: HashMap::new(),
            host_keys: HashMap::new(),
        };
        let default_username = default_username();
        let mut seen = std::collections::HashSet::new();
        for config in configs {
            let name = config.name.trim().to_string();
            if !seen.insert(name.clone()) {
                validations.error(
                    Error::DuplicateName {
                        kind: "host",
                        name,
                    }
                    .to_string(),
                );
                continue;
            }
            let mut host = HostEntry::from_config(config);
            host.validate(
                &default_username,
                &mut engine.identities,
                &mut engine.host_keys,
                validations,
            );
            let id = host.id().to_string();
            if engine.hosts.contains_key(&id) {
                validations.error(format!("host id ({id}) redefined"));
                continue;
            }
            engine.hosts.insert(id, Arc::new(host));
        }
        engine
    }

    pub fn hosts(&self) -> Vec<Arc<HostEntry>> {
        let mut hosts: Vec<_> = self.hosts.values().cloned().collect();
        hosts.sort_by(|a, b| a.id().cmp(b.id()));
        hosts
    }

    pub fn host(&self, id: &str) -> Option<Arc<HostEntry>> {
        self.hosts.get(id).cloned()
    }

    /// Distinct known-hosts file paths in use.
    pub fn known_hosts(&self) -> Vec<String> {
        let mut paths: Vec<String> = self
            .hosts
            .values()
            .map(|host| host.known_hosts_path().to_string())
            .filter(|path| !path.is_empty())
            .collect();
        paths.sort();
        paths.dedup();
        paths
    }

    /// Finalize jump hosts after tunnel validation has marked references.
    ///
    /// Every referenced host with a jump host gets a synthetic loopback
    /// tunnel whose remote is the host's original remote and whose SSH
    /// hop is the jump host; the host's effective remote is rewritten to
    /// the tunnel's entrance. Unreferenced hosts are dropped from the
    /// active set.
    pub fn expand_jump_hosts(&mut self, tunnels: &mut TunnelEngine, validations: &mut Validations) {
        let candidates: Vec<Arc<HostEntry>> = self
            .hosts
            .values()
            .filter(|host| host.is_referenced() && !host.jump_host().is_empty())
            .cloned()
            .collect();
        for host in candidates {
            let Some(jump) = self.hosts.get(host.jump_host()) else {
                validations.error(format!(
                    "host ({}) jump_host ({}) is not defined",
                    host.name(),
                    host.jump_host()
                ));
                host.invalidate();
                continue;
            };
            if !jump.jump_host().is_empty() {
                validations.error(
                    Error::MultiHopJump {
                        host: host.name().to_string(),
                    }
                    .to_string(),
                );
                host.invalidate();
                continue;
            }
            if !jump.valid() {
                validations.error(format!(
                    "host ({}) jump_host ({}) is invalid",
                    host.name(),
                    jump.name()
                ));
                host.invalidate();
                continue;
            }
            // Hold the reservation until the synthetic tunnel takes the
            // listener over at start.
            let (listener, port) = match reserve_ephemeral_port() {
                Ok(reserved) => reserved,
                Err(err) => {
                    validations.error(format!(
                        "host ({}) cannot reserve a local port for its jump tunnel: {err}",
                        host.name()
                    ));
                    host.invalidate();
                    continue;
                }
            };
            let entrance = Address::loopback(port);
            let tunnel = TunnelEntry::synthetic_jump(
                format!("{}-jumphost", host.id()),
                format!("{} jumphost", jump.name()),
                entrance.clone(),
                host.remote(),
                Arc::clone(jump),
                listener,
            );
            jump.referenced();
            host.set_remote(entrance);
            validations.info(format!(
                "host ({}) rides jump tunnel ({}) at {}",
                host.name(),
                tunnel.name(),
                tunnel.local()
            ));
            tunnels.insert_synthetic(tunnel, validations);
        }

        let unused: Vec<String> = self
            .hosts
            .values()
            .filter(|host| !host.is_referenced())
            .map(|host| host.id().to_string())
            .collect();
        for id in unused {
            if let Some(host) = self.hosts.remove(&id) {
                validations.info(format!("host ({}) is unused", host.name()));
            }
        }
    }
}

/// Bind an ephemeral loopback port and keep the listener so nothing else
/// can claim it before the jump tunnel starts.
fn reserve_ephemeral_port() -> std::io::Result<(std::net::TcpListener, u16)> {
    let listener = std::net::TcpListener::bind("127.0.0.1:0")?;
    listener.set_nonblocking(true)?;
    let port = listener.local_addr()?.port();
    Ok((listener, port))
}

fn default_username() -> String {
    std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .unwrap_or_default()
}
