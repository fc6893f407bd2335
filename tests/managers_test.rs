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

//! The management surface over a built application: paginated listing
//! with continuation tokens, lookups, and per-tunnel start/stop.

use std::path::Path;

use russh::keys::{Algorithm, PrivateKey};
use ssh_key::LineEnding;
use tokio_util::sync::CancellationToken;

use assh::config::{Address, Configuration, HostConfig, TunnelConfig, Validations};
use assh::engine::Status;
use assh::managers::PaginationInput;
use assh::{Application, Error};

fn write_identity(dir: &Path) -> String {
    let key = PrivateKey::random(&mut rand::thread_rng(), Algorithm::Ed25519).unwrap();
    let path = dir.join("id_ed25519");
    std::fs::write(&path, key.to_openssh(LineEnding::LF).unwrap().as_bytes()).unwrap();
    path.to_str().unwrap().to_string()
}

fn free_port() -> u16 {
    let probe = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    probe.local_addr().unwrap().port()
}

fn host(name: &str, identity: &str, known_hosts: &str) -> HostConfig {
    HostConfig {
        name: name.to_string(),
        remote_address: Address::new("127.0.0.1:22"),
        username: "ops".to_string(),
        identity: identity.to_string(),
        known_hosts: known_hosts.to_string(),
        ..HostConfig::default()
    }
}

fn tunnel(name: &str, host: &str) -> TunnelConfig {
    TunnelConfig {
        id: String::new(),
        name: name.to_string(),
        local: Address::new(format!("127.0.0.1:{}", free_port())),
        remote: Address::new("127.0.0.1:9"),
        host: host.to_string(),
        metadata: None,
    }
}

fn input(max_results: i64, more: Option<String>) -> PaginationInput {
    PaginationInput { more, max_results }
}

/// Three referenced hosts and five tunnels behind the adapter surface.
fn build() -> (Application, Validations, String) {
    let dir = tempfile::tempdir().unwrap();
    let identity = write_identity(dir.path());
    let known_hosts = dir.path().join("known_hosts");
    std::fs::write(&known_hosts, "").unwrap();
    let known_hosts = known_hosts.to_str().unwrap().to_string();

    let config = Configuration {
        hosts: vec![
            host("h1", &identity, ""),
            host("h2", &identity, &known_hosts),
            host("h3", &identity, ""),
        ],
        tunnels: vec![
            tunnel("a", "h1"),
            tunnel("b", "h2"),
            tunnel("c", "h3"),
            tunnel("d", ""),
            tunnel("e", ""),
        ],
        ..Configuration::default()
    };

    let mut validations = Validations::default();
    let app = Application::build(&config, Some(-1), &mut validations);
    // The tempdir must outlive validation only; identities are parsed
    // eagerly.
    drop(dir);
    (app, validations, known_hosts)
}

#[tokio::test]
async fn test_host_listing_continues_through_more_token() {
    let (app, validations, known_hosts) = build();
    assert!(!validations.has_errors(), "{validations:?}");
    let cancel = CancellationToken::new();
    let managers = app.managers(cancel.clone());

    let first = managers.hosts.list(&input(2, None));
    assert_eq!(first.items.len(), 2);
    assert_eq!(first.items[0].name(), "h1");
    assert_eq!(first.items[1].name(), "h2");
    let token = first.more.clone().expect("third host parked");
    assert_eq!(token.len(), 16);

    let rest = managers.hosts.list(&input(2, Some(token.clone())));
    assert_eq!(rest.items.len(), 1);
    assert_eq!(rest.items[0].name(), "h3");
    assert!(rest.more.is_none());

    // The continuation consumed the parked tail.
    let replayed = managers.hosts.list(&input(2, Some(token)));
    assert!(replayed.items.is_empty());
    assert!(replayed.more.is_none());

    assert_eq!(managers.hosts.host("h2").unwrap().known_hosts_path(), known_hosts);
    assert!(matches!(
        managers.hosts.host("nope"),
        Err(Error::NotFound { what: "host", .. })
    ));
    assert_eq!(managers.hosts.known_hosts(), vec![known_hosts]);

    managers.close().await;
    cancel.cancel();
}

#[tokio::test]
async fn test_tunnel_listing_continues_through_more_token() {
    let (app, validations, _) = build();
    assert!(!validations.has_errors(), "{validations:?}");
    let cancel = CancellationToken::new();
    let managers = app.managers(cancel.clone());

    let first = managers.tunnels.list(&input(3, None));
    assert_eq!(first.items.len(), 3);
    let names: Vec<&str> = first.items.iter().map(|t| t.name()).collect();
    assert_eq!(names, vec!["a", "b", "c"]);
    let token = first.more.expect("two tunnels parked");

    let rest = managers.tunnels.list(&input(3, Some(token)));
    let names: Vec<&str> = rest.items.iter().map(|t| t.name()).collect();
    assert_eq!(names, vec!["d", "e"]);
    assert!(rest.more.is_none());

    // A short listing fits in one page and parks nothing.
    let whole = managers.tunnels.list(&input(100, None));
    assert_eq!(whole.items.len(), 5);
    assert!(whole.more.is_none());

    managers.close().await;
    cancel.cancel();
}

#[tokio::test]
async fn test_tunnel_start_stop_through_managers() {
    let (app, validations, _) = build();
    assert!(!validations.has_errors(), "{validations:?}");
    let cancel = CancellationToken::new();
    let managers = app.managers(cancel.clone());

    // The direct tunnel is initialized the way the engine does before
    // start.
    let tunnel = managers.tunnels.tunnel("d").unwrap();
    tunnel.init(cancel.clone(), app.stats.new_entry());
    assert_eq!(tunnel.running(), Status::Stopped);

    managers.tunnels.start_tunnel("d").await.unwrap();
    assert_eq!(tunnel.running(), Status::Started);

    managers.tunnels.stop_tunnel("d").await.unwrap();
    assert_eq!(tunnel.running(), Status::Stopped);

    // A clean stop permits a fresh start through the same surface.
    managers.tunnels.start_tunnel("d").await.unwrap();
    assert_eq!(tunnel.running(), Status::Started);
    managers.tunnels.stop_tunnel("d").await.unwrap();

    assert!(matches!(
        managers.tunnels.start_tunnel("missing").await,
        Err(Error::NotFound { what: "tunnel", .. })
    ));

    managers.close().await;
    cancel.cancel();
}
