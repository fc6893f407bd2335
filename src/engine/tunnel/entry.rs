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

//! One tunnel: a local listener plus its forwarding policy.
//!
//! Lifecycle is monotone within a cycle:
//! `Stopped → Starting → Started → Stopping → Stopped`. A failed listen
//! drops straight back to `Stopped`. Stop cancels the tunnel token, which
//! closes the listener, unblocks the accept loop, and tears down the
//! per-connection pumps through their child tokens.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::{Address, Metadata, TunnelConfig, Validations};
use crate::engine::host::{HostEngine, HostEntry};
use crate::engine::stats::StatsEntry;
use crate::error::Error;

use super::connection;

/// Process-wide forwarded-connection sequence.
static CONNECTION_SEQ: AtomicU64 = AtomicU64::new(0);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Status {
    Stopped = 0,
    Starting = 1,
    Started = 2,
    Stopping = 3,
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            Status::Stopped => "Stopped",
            Status::Starting => "Starting",
            Status::Started => "Started",
            Status::Stopping => "Stopping",
        };
        write!(f, "{text}")
    }
}

#[derive(Debug)]
struct StatusCell(AtomicU8);

impl StatusCell {
    fn new(status: Status) -> Self {
        Self(AtomicU8::new(status as u8))
    }

    fn load(&self) -> Status {
        match self.0.load(Ordering::SeqCst) {
            1 => Status::Starting,
            2 => Status::Started,
            3 => Status::Stopping,
            _ => Status::Stopped,
        }
    }

    fn store(&self, status: Status) {
        self.0.store(status as u8, Ordering::SeqCst);
    }

    fn transition(&self, from: Status, to: Status) -> bool {
        self.0
            .compare_exchange(from as u8, to as u8, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }
}

pub struct TunnelEntry {
    id: String,
    name: String,
    local: Address,
    remote: Address,
    host_id: String,
    host: Option<Arc<HostEntry>>,
    metadata: Option<Metadata>,
    is_jump: bool,
    valid: AtomicBool,
    status: StatusCell,
    app_cancel: OnceLock<CancellationToken>,
    stats: OnceLock<Arc<StatsEntry>>,
    cancel: Mutex<Option<CancellationToken>>,
    accept_task: Mutex<Option<JoinHandle<()>>>,
    connections: Mutex<HashSet<u64>>,
    /// Listener reserved ahead of start; jump tunnels hold their
    /// ephemeral port this way so nothing else can claim it.
    prebound: Mutex<Option<std::net::TcpListener>>,
}

impl TunnelEntry {
    pub(super) fn from_config(config: &TunnelConfig) -> Self {
        Self {
            id: config.effective_id(),
            name: config.name.trim().to_string(),
            local: config.local.clone(),
            remote: config.remote.clone(),
            host_id: config.host.trim().to_string(),
            host: None,
            metadata: config.metadata.clone(),
            is_jump: false,
            valid: AtomicBool::new(true),
            status: StatusCell::new(Status::Stopped),
            app_cancel: OnceLock::new(),
            stats: OnceLock::new(),
            cancel: Mutex::new(None),
            accept_task: Mutex::new(None),
            connections: Mutex::new(HashSet::new()),
            prebound: Mutex::new(None),
        }
    }

    /// A loopback tunnel synthesized for a jump host. `local` is the
    /// reserved ephemeral entrance, `remote` the dependent host's
    /// original remote, and `host` the jump host carrying the hop.
    pub(crate) fn synthetic_jump(
        id: String,
        name: String,
        local: Address,
        remote: Address,
        host: Arc<HostEntry>,
        listener: std::net::TcpListener,
    ) -> Self {
        Self {
            id,
            name,
            local,
            remote,
            host_id: host.id().to_string(),
            host: Some(host),
            metadata: None,
            is_jump: true,
            valid: AtomicBool::new(true),
            status: StatusCell::new(Status::Stopped),
            app_cancel: OnceLock::new(),
            stats: OnceLock::new(),
            cancel: Mutex::new(None),
            accept_task: Mutex::new(None),
            connections: Mutex::new(HashSet::new()),
            prebound: Mutex::new(Some(listener)),
        }
    }

    pub(super) fn validate(&mut self, hosts: &HostEngine, validations: &mut Validations) -> bool {
        if self.name.is_empty() {
            validations.error("tunnel name cannot be blank");
            self.valid.store(false, Ordering::Relaxed);
        }
        let name = self.name.clone();

        if self.remote.is_blank() {
            validations.error(format!("tunnel ({name}) requires a forward address"));
            self.valid.store(false, Ordering::Relaxed);
        } else if !self
            .remote
            .validate("tunnel", &name, "forward address", true, false, validations)
        {
            self.valid.store(false, Ordering::Relaxed);
        }

        if self.local.is_blank() && self.remote.is_valid() {
            validations.warn(format!(
                "tunnel ({name}) local entrance undefined, defaulting to 127.0.0.1:{}",
                self.remote.port()
            ));
            self.local = Address::loopback(self.remote.port());
        }
        if self.local.is_blank() {
            validations.error(format!(
                "tunnel ({name}) missing a local address that cannot be derived"
            ));
            self.valid.store(false, Ordering::Relaxed);
        } else if !self.local.is_valid()
            && !self
                .local
                .validate("tunnel", &name, "local address", false, false, validations)
        {
            self.valid.store(false, Ordering::Relaxed);
        }

        if self.host_id.is_empty() {
            validations.info(format!("tunnel ({name}) exits on the local host"));
        } else {
            match hosts.host(&self.host_id) {
                None => {
                    validations.error(format!(
                        "tunnel ({name}) remote host ({}) undefined",
                        self.host_id
                    ));
                    self.valid.store(false, Ordering::Relaxed);
                }
                Some(host) if !host.valid() => {
                    validations.error(format!(
                        "tunnel ({name}) remote host ({}) is invalid",
                        self.host_id
                    ));
                    self.valid.store(false, Ordering::Relaxed);
                }
                Some(host) => {
                    host.referenced();
                    self.host = Some(host);
                }
            }
        }

        let valid = self.valid.load(Ordering::Relaxed);
        if valid {
            validations.info(format!("tunnel ({name}) validated"));
        }
        valid
    }

    /// Attach the daemon-wide cancellation root and this tunnel's stats
    /// entry; called once before start.
    pub fn init(&self, app_cancel: CancellationToken, stats: Arc<StatsEntry>) {
        stats.describe(&self.name, self.local.port(), self.is_jump);
        let _ = self.app_cancel.set(app_cancel);
        let _ = self.stats.set(stats);
    }

    /// Open the listener and spawn the accept loop. Idempotent while not
    /// `Stopped`.
    pub async fn start(self: Arc<Self>) -> crate::error::Result<()> {
        if !self.status.transition(Status::Stopped, Status::Starting) {
            return Ok(());
        }

        let prebound = self.prebound.lock().unwrap().take();
        let bind = match prebound {
            Some(listener) => TcpListener::from_std(listener),
            None => TcpListener::bind(self.local.to_string()).await,
        };
        let listener = match bind {
            Ok(listener) => listener,
            Err(err) => {
                error!(
                    "tunnel ({}) entrance ({}) cannot be created: {err}",
                    self.name, self.local
                );
                self.status.store(Status::Stopped);
                return Err(Error::ListenFailed {
                    address: self.local.to_string(),
                    source: err,
                });
            }
        };

        let token = self
            .app_cancel
            .get()
            .cloned()
            .unwrap_or_default()
            .child_token();
        *self.cancel.lock().unwrap() = Some(token.clone());

        info!("tunnel ({}) entrance opened at {}", self.name, self.local);
        let tunnel = Arc::clone(&self);
        let task = tokio::spawn(async move { tunnel.accept_loop(listener, token).await });
        *self.accept_task.lock().unwrap() = Some(task);
        self.status.store(Status::Started);
        Ok(())
    }

    /// Cancel the tunnel and wait for the accept loop to wind down.
    pub async fn stop(&self) {
        let token = self.cancel.lock().unwrap().clone();
        let Some(token) = token else {
            return;
        };
        self.status.store(Status::Stopping);
        token.cancel();
        let task = self.accept_task.lock().unwrap().take();
        if let Some(task) = task {
            let _ = task.await;
        }
    }

    async fn accept_loop(self: Arc<Self>, listener: TcpListener, token: CancellationToken) {
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        debug!("tunnel ({}) accepted connection from {peer}", self.name);
                        if let Some(stats) = self.stats.get() {
                            stats.updated();
                        }
                        let tunnel = Arc::clone(&self);
                        let connection_token = token.child_token();
                        tokio::spawn(async move {
                            tunnel.forward(stream, connection_token).await;
                        });
                    }
                    Err(err) => {
                        error!("tunnel ({}) listener accept failed: {err}", self.name);
                        // Avoid a tight loop on persistent accept errors.
                        tokio::time::sleep(Duration::from_millis(100)).await;
                    }
                },
            }
        }
        drop(listener);
        info!("tunnel ({}) stopped listening on {}", self.name, self.local);
        *self.cancel.lock().unwrap() = None;
        self.status.store(Status::Stopped);
    }

    /// Forward one accepted connection to the remote, through the host's
    /// SSH session when one is attached and directly over TCP otherwise.
    async fn forward(self: Arc<Self>, local: TcpStream, cancel: CancellationToken) {
        let id = CONNECTION_SEQ.fetch_add(1, Ordering::Relaxed) + 1;
        let remote = self.remote.to_string();
        debug!(
            "tunnel ({}) id:{id} connecting to forward server {remote}",
            self.name
        );
        match &self.host {
            Some(host) => {
                if let Err(err) = host.open().await {
                    warn!("tunnel ({}) id:{id} host session failed: {err}", self.name);
                    return;
                }
                match host.dial(&remote).await {
                    Ok(far) => self.pump(id, local, far, cancel).await,
                    Err(err) => {
                        warn!(
                            "tunnel ({}) id:{id} unable to forward to server {remote}: {err}",
                            self.name
                        );
                    }
                }
            }
            None => match TcpStream::connect(&remote).await {
                Ok(far) => self.pump(id, local, far, cancel).await,
                Err(err) => {
                    warn!(
                        "tunnel ({}) id:{id} unable to forward to server {remote}: {err}",
                        self.name
                    );
                }
            },
        }
    }

    async fn pump<F>(&self, id: u64, local: TcpStream, far: F, cancel: CancellationToken)
    where
        F: AsyncRead + AsyncWrite + Send + 'static,
    {
        let Some(stats) = self.stats.get() else {
            return;
        };
        self.connections.lock().unwrap().insert(id);
        let open = stats.connected();
        stats.updated();
        debug!("connected tunnel ({}), {open} open", self.name);

        connection::run(&self.name, id, local, far, Arc::clone(stats), cancel).await;

        self.connections.lock().unwrap().remove(&id);
        stats.disconnected();
        stats.updated();
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn local(&self) -> &Address {
        &self.local
    }

    pub fn remote(&self) -> &Address {
        &self.remote
    }

    pub fn host(&self) -> &str {
        &self.host_id
    }

    /// Invalid when the tunnel itself failed validation, or when its host
    /// has since been invalidated (a bad jump chain, for example).
    pub fn valid(&self) -> bool {
        self.valid.load(Ordering::Relaxed)
            && self.host.as_ref().map(|host| host.valid()).unwrap_or(true)
    }

    pub fn running(&self) -> Status {
        self.status.load()
    }

    pub fn metadata(&self) -> Option<&Metadata> {
        self.metadata.as_ref()
    }

    pub fn is_jump(&self) -> bool {
        self.is_jump
    }

    /// Size of the live connection set; equals the stats entry's open
    /// counter at observation points.
    pub fn open_connections(&self) -> usize {
        self.connections.lock().unwrap().len()
    }

    pub fn stats(&self) -> Option<&Arc<StatsEntry>> {
        self.stats.get()
    }
}

impl std::fmt::Debug for TunnelEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TunnelEntry")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("local", &self.local.to_string())
            .field("remote", &self.remote.to_string())
            .field("host", &self.host_id)
            .field("status", &self.status.load())
            .finish_non_exhaustive()
    }
}
