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

//! End-to-end direct forwarding: a tunnel with no host dials the remote
//! over plain TCP.

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;

use assh::config::{Address, Configuration, TunnelConfig, Validations};
use assh::Application;

/// Echo server that answers one connection at a time until cancelled.
async fn spawn_echo_server() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        loop {
            let Ok((mut conn, _)) = listener.accept().await else {
                return;
            };
            tokio::spawn(async move {
                let mut buffer = [0u8; 1024];
                loop {
                    match conn.read(&mut buffer).await {
                        Ok(0) | Err(_) => return,
                        Ok(n) => {
                            if conn.write_all(&buffer[..n]).await.is_err() {
                                return;
                            }
                        }
                    }
                }
            });
        }
    });
    port
}

fn free_port() -> u16 {
    let probe = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    probe.local_addr().unwrap().port()
}

#[tokio::test]
async fn test_direct_forward_round_trip() {
    let echo_port = spawn_echo_server().await;
    let local_port = free_port();

    let config = Configuration {
        tunnels: vec![TunnelConfig {
            id: String::new(),
            name: "echo".to_string(),
            local: Address::new(format!("127.0.0.1:{local_port}")),
            remote: Address::new(format!("127.0.0.1:{echo_port}")),
            host: String::new(),
            metadata: None,
        }],
        ..Configuration::default()
    };

    let mut validations = Validations::default();
    let app = Application::build(&config, Some(-1), &mut validations);
    assert!(!validations.has_errors(), "{validations:?}");

    let cancel = CancellationToken::new();
    Arc::clone(&app.tunnels).start_tunnels(cancel.clone(), &app.stats).await;

    let tunnel = app.tunnels.tunnel("echo").unwrap();
    assert_eq!(tunnel.running(), assh::engine::Status::Started);

    // Round-trip through the tunnel entrance.
    let mut client = TcpStream::connect(("127.0.0.1", local_port)).await.unwrap();
    client.write_all(b"ping").await.unwrap();
    let mut reply = [0u8; 4];
    client.read_exact(&mut reply).await.unwrap();
    assert_eq!(&reply, b"ping");
    drop(client);

    // The pump deregisters once both sides close.
    let stats = tunnel.stats().unwrap();
    for _ in 0..100 {
        if stats.open_connections() == 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    assert_eq!(stats.bytes_in(), 4);
    assert_eq!(stats.bytes_out(), 4);
    assert_eq!(stats.open_connections(), 0);
    assert_eq!(stats.total_connections(), 1);
    assert_eq!(tunnel.open_connections(), 0);

    cancel.cancel();
    app.tunnels.stop_all().await;
    assert_eq!(tunnel.running(), assh::engine::Status::Stopped);
}

#[tokio::test]
async fn test_concurrent_connections_tracked() {
    let echo_port = spawn_echo_server().await;
    let local_port = free_port();

    let config = Configuration {
        tunnels: vec![TunnelConfig {
            id: String::new(),
            name: "burst".to_string(),
            local: Address::new(format!("127.0.0.1:{local_port}")),
            remote: Address::new(format!("127.0.0.1:{echo_port}")),
            host: String::new(),
            metadata: None,
        }],
        ..Configuration::default()
    };

    let mut validations = Validations::default();
    let app = Application::build(&config, Some(-1), &mut validations);
    let cancel = CancellationToken::new();
    Arc::clone(&app.tunnels).start_tunnels(cancel.clone(), &app.stats).await;

    let tunnel = app.tunnels.tunnel("burst").unwrap();
    let stats = tunnel.stats().unwrap();

    let mut clients = Vec::new();
    for i in 0..5u8 {
        let mut client = TcpStream::connect(("127.0.0.1", local_port)).await.unwrap();
        client.write_all(&[i]).await.unwrap();
        let mut reply = [0u8; 1];
        client.read_exact(&mut reply).await.unwrap();
        assert_eq!(reply[0], i);
        clients.push(client);
    }

    // All five are registered and open.
    assert_eq!(stats.open_connections(), 5);
    assert_eq!(stats.total_connections(), 5);
    assert_eq!(tunnel.open_connections(), 5);

    drop(clients);
    for _ in 0..100 {
        if stats.open_connections() == 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(stats.open_connections(), 0);
    // Total is monotone.
    assert_eq!(stats.total_connections(), 5);

    cancel.cancel();
    app.tunnels.stop_all().await;
}
