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

//! The inbound contract the REST adapter drives: paginated list
//! operations over the registries plus per-tunnel start/stop.

pub mod paging;

pub use paging::{page, rand_token, PaginationInput};

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::cache::Cache;
use crate::engine::{HostEngine, HostEntry, TunnelEngine, TunnelEntry};
use crate::error::Error;

/// A page of results plus the continuation token, if any.
pub struct ListOutput<T> {
    pub items: Vec<T>,
    pub more: Option<String>,
}

pub struct HostManager {
    engine: Arc<HostEngine>,
    list_cache: Cache<String, Vec<Arc<HostEntry>>>,
}

impl HostManager {
    pub fn new(engine: Arc<HostEngine>, cancel: CancellationToken) -> Self {
        Self {
            engine,
            list_cache: Cache::new(cancel, Vec::new()),
        }
    }

    /// List hosts; a `more` token continues a previous oversized listing.
    pub fn list(&self, input: &PaginationInput) -> ListOutput<Arc<HostEntry>> {
        let items = match &input.more {
            Some(token) => self.list_cache.remove(token).unwrap_or_default(),
            None => self.engine.hosts(),
        };
        let (items, more) = page(items, input.effective_max(), &self.list_cache);
        ListOutput { items, more }
    }

    pub fn host(&self, id: &str) -> crate::error::Result<Arc<HostEntry>> {
        self.engine.host(id).ok_or_else(|| Error::NotFound {
            what: "host",
            id: id.to_string(),
        })
    }

    pub fn known_hosts(&self) -> Vec<String> {
        self.engine.known_hosts()
    }

    pub async fn close(&self) {
        self.list_cache.close().await;
    }
}

/// Both managers as a unit, handed to the adapter by
/// [`crate::Application::managers`]. Continuation state lives in TTL
/// caches tied to the token the pair was built with.
pub struct Managers {
    pub hosts: HostManager,
    pub tunnels: TunnelManager,
}

impl Managers {
    pub async fn close(&self) {
        self.hosts.close().await;
        self.tunnels.close().await;
    }
}

pub struct TunnelManager {
    engine: Arc<TunnelEngine>,
    list_cache: Cache<String, Vec<Arc<TunnelEntry>>>,
}

impl TunnelManager {
    pub fn new(engine: Arc<TunnelEngine>, cancel: CancellationToken) -> Self {
        Self {
            engine,
            list_cache: Cache::new(cancel, Vec::new()),
        }
    }

    pub fn list(&self, input: &PaginationInput) -> ListOutput<Arc<TunnelEntry>> {
        let items = match &input.more {
            Some(token) => self.list_cache.remove(token).unwrap_or_default(),
            None => self.engine.tunnels(),
        };
        let (items, more) = page(items, input.effective_max(), &self.list_cache);
        ListOutput { items, more }
    }

    pub fn tunnel(&self, id: &str) -> crate::error::Result<Arc<TunnelEntry>> {
        self.engine.tunnel(id).ok_or_else(|| Error::NotFound {
            what: "tunnel",
            id: id.to_string(),
        })
    }

    pub async fn start_tunnel(&self, id: &str) -> crate::error::Result<()> {
        let tunnel = self.tunnel(id)?;
        if !tunnel.valid() {
            return Err(Error::HostInvalid {
                host: tunnel.host().to_string(),
            });
        }
        tunnel.start().await
    }

    pub async fn stop_tunnel(&self, id: &str) -> crate::error::Result<()> {
        let tunnel = self.tunnel(id)?;
        tunnel.stop().await;
        Ok(())
    }

    pub async fn close(&self) {
        self.list_cache.close().await;
    }
}
