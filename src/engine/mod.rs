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

//! The tunnel-forwarding engine: host registry, tunnel lifecycle, and
//! stats fanout.
//!
//! Consumers outside the engine see the read-only [`Host`] and
//! [`Tunnel`] faces; the engines themselves hold the internal faces
//! (open/dial, start/stop, reference marking).

pub mod host;
pub mod stats;
pub mod tunnel;

pub use host::{HostEngine, HostEntry};
pub use stats::{StatsEngine, StatsEntry, StatsSnapshot};
pub use tunnel::{Status, TunnelEngine, TunnelEntry};

use crate::config::{Address, Metadata};

/// Read-only view of a host, for adapters and list operations.
pub trait Host: Send + Sync {
    fn id(&self) -> &str;
    fn name(&self) -> &str;
    fn remote(&self) -> Address;
    fn username(&self) -> &str;
    fn identity(&self) -> &str;
    fn known_hosts(&self) -> &str;
    fn jump_host(&self) -> &str;
    fn valid(&self) -> bool;
    fn metadata(&self) -> Option<&Metadata>;
}

impl Host for HostEntry {
    fn id(&self) -> &str {
        HostEntry::id(self)
    }

    fn name(&self) -> &str {
        HostEntry::name(self)
    }

    fn remote(&self) -> Address {
        HostEntry::remote(self)
    }

    fn username(&self) -> &str {
        HostEntry::username(self)
    }

    fn identity(&self) -> &str {
        HostEntry::identity(self)
    }

    fn known_hosts(&self) -> &str {
        HostEntry::known_hosts_path(self)
    }

    fn jump_host(&self) -> &str {
        HostEntry::jump_host(self)
    }

    fn valid(&self) -> bool {
        HostEntry::valid(self)
    }

    fn metadata(&self) -> Option<&Metadata> {
        HostEntry::metadata(self)
    }
}

/// Read-only view of a tunnel, for adapters and list operations.
pub trait Tunnel: Send + Sync {
    fn id(&self) -> &str;
    fn name(&self) -> &str;
    fn local(&self) -> &Address;
    fn remote(&self) -> &Address;
    fn host(&self) -> &str;
    fn valid(&self) -> bool;
    fn running(&self) -> Status;
    fn metadata(&self) -> Option<&Metadata>;
}

impl Tunnel for TunnelEntry {
    fn id(&self) -> &str {
        TunnelEntry::id(self)
    }

    fn name(&self) -> &str {
        TunnelEntry::name(self)
    }

    fn local(&self) -> &Address {
        TunnelEntry::local(self)
    }

    fn remote(&self) -> &Address {
        TunnelEntry::remote(self)
    }

    fn host(&self) -> &str {
        TunnelEntry::host(self)
    }

    fn valid(&self) -> bool {
        TunnelEntry::valid(self)
    }

    fn running(&self) -> Status {
        TunnelEntry::running(self)
    }

    fn metadata(&self) -> Option<&Metadata> {
        TunnelEntry::metadata(self)
    }
}
