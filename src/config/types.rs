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

//! Configuration type definitions.

use serde::{Deserialize, Serialize};

use super::address::Address;

/// Stats monitor port used when the configuration does not name one. Any
/// non-positive value disables the stats listener.
pub const DEFAULT_STATS_PORT: i32 = 2663;

/// Root of the configuration record tree.
#[derive(Debug, Serialize, Deserialize, Default, Clone)]
pub struct Configuration {
    #[serde(default)]
    pub hosts: Vec<HostConfig>,

    #[serde(default)]
    pub tunnels: Vec<TunnelConfig>,

    #[serde(default)]
    pub monitor: Monitor,

    #[serde(default)]
    pub web: Web,
}

/// A remote SSH endpoint with identity material and host-key policy.
#[derive(Debug, Serialize, Deserialize, Default, Clone)]
pub struct HostConfig {
    /// Stable identifier; defaults to the name when blank.
    #[serde(default)]
    pub id: String,

    pub name: String,

    /// `host[:port]`; port defaults to 22.
    pub remote_address: Address,

    #[serde(default)]
    pub username: String,

    /// Path to the private key used for public-key authentication.
    #[serde(default)]
    pub identity: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub passphrase: Option<String>,

    /// Path to a `known_hosts`-format file for host-key pinning. Blank
    /// disables pinning for this host.
    #[serde(default)]
    pub known_hosts: String,

    /// Id of the host whose SSH session carries this host's traffic.
    #[serde(default)]
    pub jump_host: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Metadata>,
}

/// A local listener plus its forwarding policy.
#[derive(Debug, Serialize, Deserialize, Default, Clone)]
pub struct TunnelConfig {
    /// Stable identifier; defaults to the name when blank.
    #[serde(default)]
    pub id: String,

    pub name: String,

    /// Address bound for listening. Defaults to `127.0.0.1:<remote port>`
    /// when blank and the remote is valid.
    #[serde(default)]
    pub local: Address,

    /// Where bytes flow after the SSH hop.
    #[serde(default)]
    pub remote: Address,

    /// Id of the host carrying the forward; blank forwards directly over
    /// TCP.
    #[serde(default)]
    pub host: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Metadata>,
}

/// Operator-facing decoration carried through to the monitor clients.
#[derive(Debug, Serialize, Deserialize, Default, Clone)]
pub struct Metadata {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,

    #[serde(default)]
    pub highlight: bool,
}

/// Stats monitor settings. Only `stats_port` matters to the daemon; the
/// display fields ride along for the monitor client.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Monitor {
    #[serde(default = "default_stats_port")]
    pub stats_port: i32,

    #[serde(default)]
    pub compressed: bool,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub metrics: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sort_order: Vec<SortOrder>,
}

impl Default for Monitor {
    fn default() -> Self {
        Self {
            stats_port: DEFAULT_STATS_PORT,
            compressed: false,
            metrics: Vec::new(),
            sort_order: Vec::new(),
        }
    }
}

fn default_stats_port() -> i32 {
    DEFAULT_STATS_PORT
}

#[derive(Debug, Serialize, Deserialize, Default, Clone)]
pub struct SortOrder {
    pub metric: String,

    #[serde(default)]
    pub ascending: bool,
}

/// REST/web surface settings, consumed by the external adapter.
#[derive(Debug, Serialize, Deserialize, Default, Clone)]
pub struct Web {
    #[serde(default)]
    pub address: String,

    #[serde(default)]
    pub port: u16,

    #[serde(default)]
    pub certificate_file: String,

    #[serde(default)]
    pub certificate_key: String,

    #[serde(default)]
    pub passphrase: String,
}

impl HostConfig {
    /// The registry key: the configured id, or the name when no id was
    /// given.
    pub fn effective_id(&self) -> String {
        let id = self.id.trim();
        if id.is_empty() {
            self.name.trim().to_string()
        } else {
            id.to_string()
        }
    }
}

impl TunnelConfig {
    pub fn effective_id(&self) -> String {
        let id = self.id.trim();
        if id.is_empty() {
            self.name.trim().to_string()
        } else {
            id.to_string()
        }
    }
}
