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

//! Tunnel engine: builds and validates the tunnel set, hosts the
//! synthetic jump tunnels, and drives start/stop for all of them.

mod connection;
mod entry;

pub use entry::{Status, TunnelEntry};

use std::collections::HashMap;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::error;

use crate::config::{TunnelConfig, Validations};
use crate::engine::host::HostEngine;
use crate::engine::stats::StatsEngine;

pub struct TunnelEngine {
    tunnels: HashMap<String, Arc<TunnelEntry>>,
    order: Vec<String>,
}

impl TunnelEngine {
    /// Build and validate the tunnel set. Duplicate names are reported
    /// and skipped; invalid tunnels are kept (visible but never started).
    pub fn new(
        configs: &[TunnelConfig],
        hosts: &HostEngine,
        validations: &mut Validations,
    ) -> Self {
        let mut engine = Self {
            tunnels: HashMap::new(),
            order: Vec::new(),
        };
        let mut seen = std::collections::HashSet::new();
        for config in configs {
            let name = config.name.trim().to_string();
            if !seen.insert(name.clone()) {
                validations.error(
                    crate::error::Error::DuplicateName {
                        kind: "tunnel",
                        name,
                    }
                    .to_string(),
                );
                continue;
            }
            let mut tunnel = TunnelEntry::from_config(config);
            tunnel.validate(hosts, validations);
            let id = tunnel.id().to_string();
            if engine.tunnels.contains_key(&id) {
                validations.error(format!("tunnel id ({id}) redefined"));
                continue;
            }
            engine.order.push(id.clone());
            engine.tunnels.insert(id, Arc::new(tunnel));
        }
        engine
    }

    /// Insert a tunnel synthesized during jump-host expansion.
    pub(crate) fn insert_synthetic(&mut self, tunnel: TunnelEntry, validations: &mut Validations) {
        let id = tunnel.id().to_string();
        if self.tunnels.contains_key(&id) {
            validations.error(format!("tunnel id ({id}) redefined"));
            return;
        }
        self.order.push(id.clone());
        self.tunnels.insert(id, Arc::new(tunnel));
    }

    /// Tunnels in configuration order, synthetic jump tunnels last.
    pub fn tunnels(&self) -> Vec<Arc<TunnelEntry>> {
        self.order
            .iter()
            .filter_map(|id| self.tunnels.get(id).cloned())
            .collect()
    }

    pub fn tunnel(&self, id: &str) -> Option<Arc<TunnelEntry>> {
        self.tunnels.get(id).cloned()
    }

    /// Give every tunnel a stats entry and start the valid ones. A
    /// watcher tied to `cancel` stops all tunnels when the daemon shuts
    /// down.
    pub async fn start_tunnels(self: Arc<Self>, cancel: CancellationToken, stats: &StatsEngine) {
        let engine = Arc::clone(&self);
        let token = cancel.clone();
        tokio::spawn(async move {
            token.cancelled().await;
            engine.stop_all().await;
        });

        for tunnel in self.tunnels() {
            tunnel.init(cancel.clone(), stats.new_entry());
            if !tunnel.valid() {
                continue;
            }
            if let Err(err) = Arc::clone(&tunnel).start().await {
                error!("tunnel ({}) failed to start: {err}", tunnel.name());
            }
        }
    }

    /// Stop every tunnel and wait for their accept loops to exit.
    pub async fn stop_all(&self) {
        for tunnel in self.tunnels() {
            tunnel.stop().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Address, TunnelConfig};
    use crate::engine::stats::StatsEngine;

    fn empty_hosts() -> HostEngine {
        HostEngine::new(&[], &mut Validations::default())
    }

    fn direct(name: &str, local: &str, remote: &str) -> TunnelConfig {
        TunnelConfig {
            id: String::new(),
            name: name.to_string(),
            local: Address::new(local),
            remote: Address::new(remote),
            host: String::new(),
            metadata: None,
        }
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let mut validations = Validations::default();
        let engine = TunnelEngine::new(
            &[
                direct("web", "127.0.0.1:8080", "127.0.0.1:80"),
                direct("web", "127.0.0.1:8081", "127.0.0.1:81"),
            ],
            &empty_hosts(),
            &mut validations,
        );
        assert!(validations.has_errors());
        assert_eq!(engine.tunnels().len(), 1);
    }

    #[test]
    fn test_blank_name_invalid() {
        let mut validations = Validations::default();
        let engine = TunnelEngine::new(
            &[direct("", "127.0.0.1:8080", "127.0.0.1:80")],
            &empty_hosts(),
            &mut validations,
        );
        assert!(validations.has_errors());
        let tunnel = &engine.tunnels()[0];
        assert!(!tunnel.valid());
    }

    #[test]
    fn test_missing_remote_invalid() {
        let mut validations = Validations::default();
        let engine = TunnelEngine::new(
            &[direct("web", "127.0.0.1:8080", "")],
            &empty_hosts(),
            &mut validations,
        );
        assert!(validations.has_errors());
        assert!(!engine.tunnels()[0].valid());
    }

    #[test]
    fn test_blank_local_defaults_to_remote_port() {
        let mut validations = Validations::default();
        let engine = TunnelEngine::new(
            &[direct("web", "", "127.0.0.1:8080")],
            &empty_hosts(),
            &mut validations,
        );
        assert!(!validations.has_errors());
        let tunnel = &engine.tunnels()[0];
        assert!(tunnel.valid());
        assert_eq!(tunnel.local().to_string(), "127.0.0.1:8080");
        // The defaulting produced a warning.
        assert!(validations.has_entries());
    }

    #[test]
    fn test_unknown_host_invalid() {
        let mut validations = Validations::default();
        let mut config = direct("db", "127.0.0.1:5432", "127.0.0.1:5432");
        config.host = "missing".to_string();
        let engine = TunnelEngine::new(&[config], &empty_hosts(), &mut validations);
        assert!(validations.has_errors());
        assert!(!engine.tunnels()[0].valid());
    }

    #[tokio::test]
    async fn test_lifecycle_start_stop_start() {
        let mut validations = Validations::default();
        let engine = Arc::new(TunnelEngine::new(
            &[direct("loop", "127.0.0.1:0", "127.0.0.1:9")],
            &empty_hosts(),
            &mut validations,
        ));
        // Port zero fails address validation, so build by hand instead.
        assert!(validations.has_errors());

        // Reserve a real port for the lifecycle run.
        let probe = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = probe.local_addr().unwrap().port();
        drop(probe);
        drop(engine);

        let mut validations = Validations::default();
        let engine = Arc::new(TunnelEngine::new(
            &[direct(
                "loop",
                &format!("127.0.0.1:{port}"),
                "127.0.0.1:9",
            )],
            &empty_hosts(),
            &mut validations,
        ));
        assert!(!validations.has_errors());

        let stats = StatsEngine::new();
        let cancel = CancellationToken::new();
        let tunnel = engine.tunnel("loop").unwrap();
        tunnel.init(cancel.clone(), stats.new_entry());

        assert_eq!(tunnel.running(), Status::Stopped);
        Arc::clone(&tunnel).start().await.unwrap();
        assert_eq!(tunnel.running(), Status::Started);

        // Idempotent while not stopped.
        Arc::clone(&tunnel).start().await.unwrap();
        assert_eq!(tunnel.running(), Status::Started);

        tunnel.stop().await;
        assert_eq!(tunnel.running(), Status::Stopped);

        // A clean stop permits a fresh start.
        Arc::clone(&tunnel).start().await.unwrap();
        assert_eq!(tunnel.running(), Status::Started);
        tunnel.stop().await;
        assert_eq!(tunnel.running(), Status::Stopped);
    }

    #[tokio::test]
    async fn test_listen_failure_returns_to_stopped() {
        let occupied = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = occupied.local_addr().unwrap().port();

        let mut validations = Validations::default();
        let engine = Arc::new(TunnelEngine::new(
            &[direct(
                "clash",
                &format!("127.0.0.1:{port}"),
                "127.0.0.1:9",
            )],
            &empty_hosts(),
            &mut validations,
        ));
        let stats = StatsEngine::new();
        let tunnel = engine.tunnel("clash").unwrap();
        tunnel.init(CancellationToken::new(), stats.new_entry());

        assert!(Arc::clone(&tunnel).start().await.is_err());
        assert_eq!(tunnel.running(), Status::Stopped);
    }
}
