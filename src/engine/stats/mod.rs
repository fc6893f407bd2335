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

//! Stats fanout: collects per-tunnel counters and pushes coalesced JSON
//! frames to any number of monitor clients over TCP.
//!
//! Producers signal the broadcaster through a depth-one channel; a full
//! channel means a broadcast is already pending, so fast-arriving updates
//! fold into one frame. Broadcasts are spaced at least one second apart
//! and no closer than five seconds to the previous frame. Each frame is
//! zero-padded to a 256-byte boundary so fixed-frame clients can read
//! without scanning for a delimiter.

mod entry;

pub use entry::{current_connections, total_connections, StatsEntry, StatsSnapshot};

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Mutex};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

const BROADCAST_INTERVAL: Duration = Duration::from_secs(5);
const BROADCAST_MIN_DELAY: Duration = Duration::from_secs(1);
const FRAME_ALIGNMENT: usize = 256;

#[derive(Default)]
struct ClientPool {
    connections: Vec<TcpStream>,
    last_update: Vec<u8>,
}

/// Collects stats entries and serves push clients on
/// `127.0.0.1:<stats_port>`.
pub struct StatsEngine {
    signal_tx: mpsc::Sender<()>,
    signal_rx: StdMutex<Option<mpsc::Receiver<()>>>,
    entries: StdMutex<Vec<Arc<StatsEntry>>>,
    next_id: AtomicU64,
    pool: Arc<Mutex<ClientPool>>,
}

impl Default for StatsEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl StatsEngine {
    pub fn new() -> Self {
        // Depth one: a pending signal already guarantees a broadcast.
        let (signal_tx, signal_rx) = mpsc::channel(1);
        Self {
            signal_tx,
            signal_rx: StdMutex::new(Some(signal_rx)),
            entries: StdMutex::new(Vec::new()),
            next_id: AtomicU64::new(0),
            pool: Arc::new(Mutex::new(ClientPool::default())),
        }
    }

    /// Register a new update source. Entries are numbered in registration
    /// order.
    pub fn new_entry(&self) -> Arc<StatsEntry> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let entry = Arc::new(StatsEntry::new(id, self.signal_tx.clone()));
        self.entries.lock().unwrap().push(Arc::clone(&entry));
        entry
    }

    /// Bind the stats listener and spawn the transmitter and broadcaster
    /// tasks. A non-positive port disables the fanout entirely.
    pub async fn start(self: Arc<Self>, cancel: CancellationToken, port: i32) -> anyhow::Result<()> {
        if port <= 0 {
            debug!("stats monitor disabled (stats_port = {port})");
            return Ok(());
        }
        let address = format!("127.0.0.1:{port}");
        let listener = TcpListener::bind(&address).await.map_err(|err| {
            warn!("failed to initialize stats monitor on {address}: {err}");
            anyhow::Error::from(err).context(format!("stats listener bind on {address}"))
        })?;
        info!("stats monitor listening on {address}");

        let engine = Arc::clone(&self);
        let accept_cancel = cancel.clone();
        tokio::spawn(async move { engine.transmitter(listener, accept_cancel).await });

        let receiver = self.signal_rx.lock().unwrap().take();
        let Some(receiver) = receiver else {
            warn!("stats broadcaster already running");
            return Ok(());
        };
        tokio::spawn(async move { self.broadcaster(receiver, cancel).await });
        Ok(())
    }

    /// Snapshot every registered entry, in registration order.
    pub fn snapshots(&self) -> Vec<StatsSnapshot> {
        self.entries
            .lock()
            .unwrap()
            .iter()
            .map(|entry| entry.snapshot())
            .collect()
    }

    async fn transmitter(&self, listener: TcpListener, cancel: CancellationToken) {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                accepted = listener.accept() => match accepted {
                    Ok((conn, peer)) => {
                        info!("connected stats client {peer}");
                        self.add_client(conn).await;
                    }
                    Err(err) => {
                        error!("stats listener accept failed: {err}");
                        return;
                    }
                },
            }
        }
    }

    /// New clients immediately receive the most recent frame.
    async fn add_client(&self, mut conn: TcpStream) {
        let mut pool = self.pool.lock().await;
        if !pool.last_update.is_empty() {
            if let Err(err) = conn.write_all(&pool.last_update).await {
                warn!("unable to send current update to new stats client: {err}");
            }
        }
        pool.connections.push(conn);
    }

    async fn broadcaster(&self, mut signal_rx: mpsc::Receiver<()>, cancel: CancellationToken) {
        let mut last_broadcast = Instant::now()
            .checked_sub(BROADCAST_INTERVAL)
            .unwrap_or_else(Instant::now);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("stats monitor closed");
                    self.close_all().await;
                    return;
                }
                signal = signal_rx.recv() => {
                    if signal.is_none() {
                        return;
                    }
                    // Never repeat within five seconds of the previous
                    // frame, and always give pending updates at least one
                    // second to accumulate. Signals arriving while we
                    // wait fold into this frame; at most one more sits in
                    // the channel and schedules the next one.
                    let elapsed = last_broadcast.elapsed();
                    let delay = BROADCAST_INTERVAL
                        .saturating_sub(elapsed)
                        .max(BROADCAST_MIN_DELAY);
                    tokio::select! {
                        _ = cancel.cancelled() => {
                            info!("stats monitor closed");
                            self.close_all().await;
                            return;
                        }
                        _ = tokio::time::sleep(delay) => {}
                    }
                    let frame = self.frame();
                    last_broadcast = Instant::now();
                    self.write_update(frame).await;
                }
            }
        }
    }

    /// Serialize the stats array and zero-pad to the next 256-byte
    /// boundary (a frame already on the boundary gains one full block).
    fn frame(&self) -> Vec<u8> {
        let mut frame = serde_json::to_vec(&self.snapshots()).unwrap_or_default();
        let padding = FRAME_ALIGNMENT - (frame.len() % FRAME_ALIGNMENT);
        frame.resize(frame.len() + padding, 0);
        frame
    }

    /// Push a frame to every client, dropping the ones whose write
    /// fails. Skips the round entirely when another writer holds the
    /// pool; the next broadcast carries the newer counters anyway.
    async fn write_update(&self, frame: Vec<u8>) {
        let Ok(mut pool) = self.pool.try_lock() else {
            return;
        };
        pool.last_update = frame;
        let mut connections = std::mem::take(&mut pool.connections);
        let mut alive = Vec::with_capacity(connections.len());
        for mut conn in connections.drain(..) {
            if conn.write_all(&pool.last_update).await.is_ok() {
                alive.push(conn);
            } else {
                info!("disconnected stats client");
            }
        }
        pool.connections = alive;
    }

    async fn close_all(&self) {
        let mut pool = self.pool.lock().await;
        for mut conn in pool.connections.drain(..) {
            let _ = conn.shutdown().await;
        }
    }
}
