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

//! Pagination over list operations.
//!
//! Oversized results are split: the head is returned, the tail parked in
//! a TTL cache under a random 16-character token the caller hands back
//! as `more=<token>` to continue.

use serde::{Deserialize, Serialize};

use crate::cache::Cache;

const TOKEN_LENGTH: usize = 16;
const LETTERS: &[u8] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ";
const LETTER_INDEX_BITS: u32 = 6;
const LETTER_INDEX_MASK: u64 = (1 << LETTER_INDEX_BITS) - 1;
const LETTER_INDICES_PER_DRAW: u32 = 64 / LETTER_INDEX_BITS;

const DEFAULT_MAX_RESULTS: usize = 100;
const CEILING_MAX_RESULTS: usize = 1000;

/// Pagination parameters as they arrive from the adapter.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct PaginationInput {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub more: Option<String>,

    #[serde(default, rename = "maxResults")]
    pub max_results: i64,
}

impl PaginationInput {
    /// `max_results` with the boundary rules applied: anything below 1
    /// means 100, anything above 1000 clamps to 1000.
    pub fn effective_max(&self) -> usize {
        if self.max_results < 1 {
            DEFAULT_MAX_RESULTS
        } else {
            (self.max_results as usize).min(CEILING_MAX_RESULTS)
        }
    }
}

/// Split `items` at `max_results`, parking the tail in `cache` under a
/// fresh token when anything is left over.
pub fn page<S>(
    mut items: Vec<S>,
    max_results: usize,
    cache: &Cache<String, Vec<S>>,
) -> (Vec<S>, Option<String>)
where
    S: Clone + Send + Sync + 'static,
{
    if items.len() <= max_results {
        return (items, None);
    }
    let tail = items.split_off(max_results);
    let token = rand_token(TOKEN_LENGTH);
    // A token collision would orphan the previous tail; with 52^16
    // tokens the add only fails if the caller replays astronomically
    // fast, and the continuation simply ends there.
    let _ = cache.add(token.clone(), tail);
    (items, Some(token))
}

/// A random `[A-Za-z]` string built by slicing 6-bit indices out of
/// 64-bit draws; indices beyond the alphabet are discarded.
pub fn rand_token(length: usize) -> String {
    let mut out = vec![0u8; length];
    let mut position = length;
    let mut draw = fastrand::u64(..);
    let mut remaining = LETTER_INDICES_PER_DRAW;
    while position > 0 {
        if remaining == 0 {
            draw = fastrand::u64(..);
            remaining = LETTER_INDICES_PER_DRAW;
        }
        let index = (draw & LETTER_INDEX_MASK) as usize;
        if index < LETTERS.len() {
            position -= 1;
            out[position] = LETTERS[index];
        }
        draw >>= LETTER_INDEX_BITS;
        remaining -= 1;
    }
    // Every byte came from the ASCII alphabet above.
    String::from_utf8_lossy(&out).into_owned()
}
