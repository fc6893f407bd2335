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

//! Application wiring: registries, engines, stats, and shutdown.

use std::sync::Arc;

use anyhow::Result;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::config::{Configuration, Validations};
use crate::engine::{HostEngine, StatsEngine, TunnelEngine};
use crate::managers::{HostManager, Managers, TunnelManager};

pub struct Application {
    pub hosts: Arc<HostEngine>,
    pub tunnels: Arc<TunnelEngine>,
    pub stats: Arc<StatsEngine>,
    stats_port: i32,
}

impl Application {
    /// Build the registries from configuration. Validation findings land
    /// in `validations`; the caller decides whether errors are fatal.
    ///
    /// Order matters: hosts validate first, tunnels validate against them
    /// and mark references, then jump-host expansion synthesizes the
    /// loopback tunnels and rewrites dependent remotes.
    pub fn build(
        config: &Configuration,
        stats_port_override: Option<i32>,
        validations: &mut Validations,
    ) -> Self {
        let mut hosts = HostEngine::new(&config.hosts, validations);
        let mut tunnels = TunnelEngine::new(&config.tunnels, &hosts, validations);
        hosts.expand_jump_hosts(&mut tunnels, validations);
        Self {
            hosts: Arc::new(hosts),
            tunnels: Arc::new(tunnels),
            stats: Arc::new(StatsEngine::new()),
            stats_port: stats_port_override.unwrap_or(config.monitor.stats_port),
        }
    }

    /// Build the management surface the REST adapter drives: paginated
    /// list operations plus per-tunnel start/stop. Continuation state
    /// lives in TTL caches tied to `cancel`, so this must run inside the
    /// runtime.
    pub fn managers(&self, cancel: CancellationToken) -> Managers {
        Managers {
            hosts: HostManager::new(Arc::clone(&self.hosts), cancel.clone()),
            tunnels: TunnelManager::new(Arc::clone(&self.tunnels), cancel),
        }
    }

    /// Start the stats fanout and every valid tunnel, then run until the
    /// cancellation root fires and the tunnels have drained.
    pub async fn run(&self, cancel: CancellationToken) -> Result<()> {
        if let Err(err) = Arc::clone(&self.stats)
            .start(cancel.clone(), self.stats_port)
            .await
        {
            // The daemon is still useful without its monitor surface.
            warn!("stats monitor unavailable: {err}");
        }
        Arc::clone(&self.tunnels)
            .start_tunnels(cancel.clone(), &self.stats)
            .await;

        cancel.cancelled().await;
        self.tunnels.stop_all().await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Address;

    fn direct_tunnel_config(name: &str, local: &str, remote: &str) -> crate::config::TunnelConfig {
        crate::config::TunnelConfig {
            id: String::new(),
            name: name.to_string(),
            local: Address::new(local),
            remote: Address::new(remote),
            host: String::new(),
            metadata: None,
        }
    }

    #[test]
    fn test_build_empty_configuration() {
        let mut validations = Validations::default();
        let app = Application::build(&Configuration::default(), None, &mut validations);
        assert!(!validations.has_errors());
        assert!(app.tunnels.tunnels().is_empty());
        assert!(app.hosts.hosts().is_empty());
    }

    #[test]
    fn test_build_collects_all_errors() {
        let config = Configuration {
            tunnels: vec![
                direct_tunnel_config("", "127.0.0.1:1", "127.0.0.1:2"),
                direct_tunnel_config("bad-remote", "127.0.0.1:1", "a:b:c"),
            ],
            ..Configuration::default()
        };
        let mut validations = Validations::default();
        Application::build(&config, None, &mut validations);
        assert!(validations.has_errors());
        // Both problems surfaced in one pass.
        let errors = validations
            .entries()
            .iter()
            .filter(|entry| entry.is_error())
            .count();
        assert!(errors >= 2);
    }

    #[test]
    fn test_stats_port_override() {
        let mut validations = Validations::default();
        let app = Application::build(&Configuration::default(), Some(-1), &mut validations);
        assert_eq!(app.stats_port, -1);
        let app = Application::build(&Configuration::default(), None, &mut validations);
        assert_eq!(app.stats_port, crate::config::DEFAULT_STATS_PORT);
    }
}
