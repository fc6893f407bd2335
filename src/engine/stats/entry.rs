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

//! Per-tunnel counters and the process-wide connection gauges.
//!
//! Counter mutations nudge the broadcaster over a shared signal channel
//! with a non-blocking send; a full channel means a broadcast is already
//! pending and the update folds into it.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::OnceLock;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// Process-wide gauges; the per-entry counters are advisory.
static CURRENT_CONNECTIONS: AtomicI64 = AtomicI64::new(0);
static TOTAL_CONNECTIONS: AtomicU64 = AtomicU64::new(0);

/// Currently open forwarded connections across all tunnels.
pub fn current_connections() -> i64 {
    CURRENT_CONNECTIONS.load(Ordering::Relaxed)
}

/// Connections accepted across all tunnels since startup.
pub fn total_connections() -> u64 {
    TOTAL_CONNECTIONS.load(Ordering::Relaxed)
}

#[derive(Debug)]
struct Descriptor {
    name: String,
    port: u16,
    jump_tunnel: bool,
}

/// Counters for one tunnel, shared between its connections and the
/// broadcaster.
#[derive(Debug)]
pub struct StatsEntry {
    id: u64,
    descriptor: OnceLock<Descriptor>,
    bytes_in: AtomicU64,
    bytes_out: AtomicU64,
    open: AtomicI64,
    total: AtomicU64,
    last_update_ms: AtomicI64,
    signal: mpsc::Sender<()>,
}

impl StatsEntry {
    pub(crate) fn new(id: u64, signal: mpsc::Sender<()>) -> Self {
        Self {
            id,
            descriptor: OnceLock::new(),
            bytes_in: AtomicU64::new(0),
            bytes_out: AtomicU64::new(0),
            open: AtomicI64::new(0),
            total: AtomicU64::new(0),
            last_update_ms: AtomicI64::new(0),
            signal,
        }
    }

    /// Attach the owning tunnel's identity; called once at tunnel init.
    pub fn describe(&self, name: &str, port: u16, jump_tunnel: bool) {
        let _ = self.descriptor.set(Descriptor {
            name: name.to_string(),
            port,
            jump_tunnel,
        });
    }

    /// Record an accepted connection. Returns the process-wide gauge of
    /// currently open connections.
    pub fn connected(&self) -> i64 {
        self.open.fetch_add(1, Ordering::Relaxed);
        self.total.fetch_add(1, Ordering::Relaxed);
        TOTAL_CONNECTIONS.fetch_add(1, Ordering::Relaxed);
        CURRENT_CONNECTIONS.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn disconnected(&self) {
        self.open.fetch_sub(1, Ordering::Relaxed);
        CURRENT_CONNECTIONS.fetch_sub(1, Ordering::Relaxed);
    }

    /// Bytes carried local → remote.
    pub fn received(&self, n: u64) {
        self.bytes_in.fetch_add(n, Ordering::Relaxed);
    }

    /// Bytes carried remote → local.
    pub fn transmitted(&self, n: u64) {
        self.bytes_out.fetch_add(n, Ordering::Relaxed);
    }

    /// Refresh the last-update stamp and nudge the broadcaster.
    pub fn updated(&self) {
        self.last_update_ms
            .store(Utc::now().timestamp_millis(), Ordering::Relaxed);
        let _ = self.signal.try_send(());
    }

    pub fn bytes_in(&self) -> u64 {
        self.bytes_in.load(Ordering::Relaxed)
    }

    pub fn bytes_out(&self) -> u64 {
        self.bytes_out.load(Ordering::Relaxed)
    }

    pub fn open_connections(&self) -> i64 {
        self.open.load(Ordering::Relaxed)
    }

    pub fn total_connections(&self) -> u64 {
        self.total.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let descriptor = self.descriptor.get();
        StatsSnapshot {
            id: self.id,
            name: descriptor.map(|d| d.name.clone()).unwrap_or_default(),
            port: descriptor.map(|d| d.port).unwrap_or_default(),
            bytes_in: self.bytes_in(),
            bytes_out: self.bytes_out(),
            open: self.open_connections(),
            total: self.total_connections(),
            jump_tunnel: descriptor.map(|d| d.jump_tunnel).unwrap_or_default(),
            last_update: DateTime::from_timestamp_millis(
                self.last_update_ms.load(Ordering::Relaxed),
            )
            .unwrap_or(DateTime::<Utc>::UNIX_EPOCH),
        }
    }
}

/// One tunnel's counters as they appear on the stats wire: a JSON object
/// with short keys.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatsSnapshot {
    #[serde(rename = "i")]
    pub id: u64,
    #[serde(rename = "n")]
    pub name: String,
    #[serde(rename = "p")]
    pub port: u16,
    #[serde(rename = "r")]
    pub bytes_in: u64,
    #[serde(rename = "t")]
    pub bytes_out: u64,
    #[serde(rename = "o")]
    pub open: i64,
    #[serde(rename = "c")]
    pub total: u64,
    #[serde(rename = "j")]
    pub jump_tunnel: bool,
    #[serde(rename = "u")]
    pub last_update: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry() -> StatsEntry {
        let (tx, _rx) = mpsc::channel(1);
        StatsEntry::new(7, tx)
    }

    #[test]
    fn test_counters_accumulate() {
        let entry = entry();
        entry.describe("postgres", 5432, false);
        entry.received(100);
        entry.received(28);
        entry.transmitted(512);
        entry.updated();

        let snapshot = entry.snapshot();
        assert_eq!(snapshot.id, 7);
        assert_eq!(snapshot.name, "postgres");
        assert_eq!(snapshot.port, 5432);
        assert_eq!(snapshot.bytes_in, 128);
        assert_eq!(snapshot.bytes_out, 512);
        assert!(!snapshot.jump_tunnel);
    }

    #[test]
    fn test_connection_gauges() {
        let entry = entry();
        let before_current = current_connections();
        let before_total = total_connections();

        let current = entry.connected();
        assert!(current > before_current);
        assert_eq!(entry.open_connections(), 1);
        assert_eq!(entry.total_connections(), 1);
        assert_eq!(total_connections(), before_total + 1);

        entry.disconnected();
        assert_eq!(entry.open_connections(), 0);
        assert_eq!(entry.total_connections(), 1);
        assert_eq!(current_connections(), before_current);
    }

    #[test]
    fn test_snapshot_wire_keys() {
        let entry = entry();
        entry.describe("web", 8080, true);
        entry.received(4);
        let json = serde_json::to_value(entry.snapshot()).unwrap();
        assert_eq!(json["n"], "web");
        assert_eq!(json["p"], 8080);
        assert_eq!(json["r"], 4);
        assert_eq!(json["j"], true);
        assert!(json.get("u").is_some());
    }

    #[test]
    fn test_describe_is_write_once() {
        let entry = entry();
        entry.describe("first", 1, false);
        entry.describe("second", 2, true);
        let snapshot = entry.snapshot();
        assert_eq!(snapshot.name, "first");
        assert_eq!(snapshot.port, 1);
    }
}
