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

//! Bidirectional byte pump for one forwarded connection.
//!
//! Two cooperating tasks carry bytes between the local socket and the
//! far side (an SSH channel stream or a direct TCP stream). When one
//! direction finishes the other may still be flushing (an HTTP response
//! after the request side closed), so a 30-second quiescence timer keeps
//! the pair alive before both streams are forcibly closed. Cancellation
//! of the owning tunnel short-circuits the timer.

use std::sync::Arc;

use anyhow::Result;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::engine::stats::StatsEntry;
use crate::error::Error;

const BUFFER_SIZE: usize = 32 * 1024;
const QUIESCENCE: std::time::Duration = std::time::Duration::from_secs(30);

/// Pump bytes both ways until the connection winds down.
///
/// Counter policy: every successful write adds the bytes actually
/// written (local → far to `bytes-in`, far → local to `bytes-out`) and
/// refreshes the last-update stamp.
pub async fn run<L, F>(
    name: &str,
    id: u64,
    local: L,
    far: F,
    stats: Arc<StatsEntry>,
    cancel: CancellationToken,
) where
    L: AsyncRead + AsyncWrite + Send + 'static,
    F: AsyncRead + AsyncWrite + Send + 'static,
{
    let (local_read, local_write) = tokio::io::split(local);
    let (far_read, far_write) = tokio::io::split(far);

    let up_stats = Arc::clone(&stats);
    let mut upstream = tokio::spawn(copy_bytes(local_read, far_write, move |n| {
        up_stats.received(n);
        up_stats.updated();
    }));
    let down_stats = Arc::clone(&stats);
    let mut downstream = tokio::spawn(copy_bytes(far_read, local_write, move |n| {
        down_stats.transmitted(n);
        down_stats.updated();
    }));

    trace!("tunnel ({name}) id:{id} pumps started");
    tokio::select! {
        finished = &mut upstream => {
            log_direction(name, id, "local => remote", finished);
            linger(name, id, &mut downstream, &cancel).await;
        }
        finished = &mut downstream => {
            log_direction(name, id, "remote => local", finished);
            linger(name, id, &mut upstream, &cancel).await;
        }
        _ = cancel.cancelled() => {
            upstream.abort();
            downstream.abort();
            let _ = upstream.await;
            let _ = downstream.await;
        }
    }
    trace!("tunnel ({name}) id:{id} closed");
}

/// One direction finished; give the other a bounded window to drain.
async fn linger(
    name: &str,
    id: u64,
    other: &mut JoinHandle<Result<()>>,
    cancel: &CancellationToken,
) {
    trace!("tunnel ({name}) id:{id} auto-closer initiated");
    tokio::select! {
        finished = &mut *other => {
            // Both directions done; nothing left to close.
            log_direction(name, id, "remaining", finished);
            return;
        }
        _ = tokio::time::sleep(QUIESCENCE) => {
            trace!("tunnel ({name}) id:{id} auto-closer triggered");
        }
        _ = cancel.cancelled() => {
            trace!("tunnel ({name}) id:{id} auto-closer terminated");
        }
    }
    // Dropping the task's halves closes the underlying streams.
    other.abort();
    let _ = other.await;
}

fn log_direction(name: &str, id: u64, direction: &str, finished: Result<Result<()>, tokio::task::JoinError>) {
    match finished {
        Ok(Ok(())) => trace!("tunnel ({name}) id:{id} stopped {direction}"),
        Ok(Err(err)) => debug!("tunnel ({name}) id:{id} {direction} terminated: {err}"),
        Err(err) if err.is_cancelled() => {}
        Err(err) => debug!("tunnel ({name}) id:{id} {direction} panicked: {err}"),
    }
}

/// Copy one direction. A zero-length read is a clean close; a write that
/// consumes less than was read is a `ShortWrite`; more is an
/// `InvalidWrite`. Bytes are counted as written, before any error is
/// raised.
async fn copy_bytes<R, W, F>(mut src: R, mut dst: W, mut on_write: F) -> Result<()>
where
    R: AsyncRead + Send + Unpin,
    W: AsyncWrite + Send + Unpin,
    F: FnMut(u64) + Send,
{
    let mut buffer = vec![0u8; BUFFER_SIZE];
    loop {
        let read = src.read(&mut buffer).await?;
        if read == 0 {
            return Ok(());
        }
        let written = dst.write(&buffer[..read]).await?;
        if written > read {
            return Err(Error::InvalidWrite.into());
        }
        on_write(written as u64);
        if written < read {
            return Err(Error::ShortWrite.into());
        }
    }
}
