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

//! SSH client built on russh.
//!
//! One client per host, reused by every tunnel referencing it. The
//! daemon's only channel shape is `direct-tcpip`: each forwarded
//! connection becomes one channel, exposed as an async byte stream.

use std::io;
use std::net::{SocketAddr, ToSocketAddrs};
use std::sync::Arc;

use russh::client::{Config, Handle, Handler, Msg};
use russh::keys::{PrivateKey, PrivateKeyWithHashAlg, PublicKey};
use tracing::debug;

use super::known_hosts::KnownHostsManager;

/// Byte stream over a `direct-tcpip` channel.
pub type SshStream = russh::ChannelStream<Msg>;

/// SSH transport errors.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid address: {0}")]
    AddressInvalid(#[source] io::Error),

    #[error(transparent)]
    Ssh(#[from] russh::Error),

    #[error("public key authentication rejected for user {username}")]
    AuthFailed { username: String },

    #[error(transparent)]
    ServerCheck(#[from] crate::error::Error),
}

/// An authenticated SSH session to one remote host.
pub struct Client {
    handle: Handle<ClientHandler>,
    address: SocketAddr,
}

impl Client {
    /// Dial TCP and SSH to `address` (`host:port`), authenticating with
    /// the given signer and pinning the server key through `known_hosts`.
    ///
    /// When the address resolves to several socket addresses each is
    /// attempted until one connects; authentication runs once on the
    /// first successful connection.
    pub async fn connect(
        address: &str,
        username: &str,
        key: Arc<PrivateKey>,
        known_hosts: Arc<KnownHostsManager>,
    ) -> Result<Self, Error> {
        let config = Arc::new(Config::default());
        let socket_addrs: Vec<SocketAddr> = address
            .to_socket_addrs()
            .map_err(Error::AddressInvalid)?
            .collect();
        let mut connect_res = Err(Error::AddressInvalid(io::Error::new(
            io::ErrorKind::InvalidInput,
            "could not resolve to any addresses",
        )));
        for socket_addr in socket_addrs {
            let handler = ClientHandler {
                hostname: address.to_string(),
                remote: socket_addr,
                known_hosts: Arc::clone(&known_hosts),
            };
            match russh::client::connect(Arc::clone(&config), socket_addr, handler).await {
                Ok(handle) => {
                    connect_res = Ok((socket_addr, handle));
                    break;
                }
                Err(err) => connect_res = Err(err.into()),
            }
        }
        let (socket_addr, mut handle) = connect_res?;

        let authenticated = handle
            .authenticate_publickey(
                username,
                PrivateKeyWithHashAlg::new(key, handle.best_supported_rsa_hash().await?.flatten()),
            )
            .await?;
        if !authenticated.success() {
            return Err(Error::AuthFailed {
                username: username.to_string(),
            });
        }
        debug!("ssh session established with {address} as {username}");

        Ok(Self {
            handle,
            address: socket_addr,
        })
    }

    /// Open a `direct-tcpip` channel to `target` (`host:port`) and expose
    /// it as a byte stream.
    pub async fn open_direct_tcpip(&self, target: &str) -> Result<SshStream, Error> {
        let (host, port) = target.rsplit_once(':').ok_or_else(|| {
            Error::AddressInvalid(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("target ({target}) missing a port"),
            ))
        })?;
        let port: u16 = port.parse().map_err(|_| {
            Error::AddressInvalid(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("target ({target}) port is not numeric"),
            ))
        })?;
        let channel = self
            .handle
            .channel_open_direct_tcpip(host, u32::from(port), "127.0.0.1", 0)
            .await?;
        Ok(channel.into_stream())
    }

    pub fn is_closed(&self) -> bool {
        self.handle.is_closed()
    }

    pub fn address(&self) -> SocketAddr {
        self.address
    }

    pub async fn disconnect(&self) -> Result<(), Error> {
        self.handle
            .disconnect(russh::Disconnect::ByApplication, "", "")
            .await
            .map_err(Error::from)
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("address", &self.address)
            .finish_non_exhaustive()
    }
}

/// Client-side handler; its only job is server key verification through
/// the shared known-hosts manager.
#[derive(Debug, Clone)]
pub struct ClientHandler {
    hostname: String,
    remote: SocketAddr,
    known_hosts: Arc<KnownHostsManager>,
}

impl Handler for ClientHandler {
    type Error = Error;

    async fn check_server_key(
        &mut self,
        server_public_key: &PublicKey,
    ) -> Result<bool, Self::Error> {
        self.known_hosts
            .authorize(&self.hostname, self.remote, server_public_key)?;
        Ok(true)
    }
}
