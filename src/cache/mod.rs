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

//! Bounded containers: the insertion-ordered queue and the TTL cache
//! built on top of it.

pub mod queue;
pub mod ttl;

pub use queue::{option_capacity, option_compact_on_remove, Queue};
pub use ttl::{
    option_allow_eviction, option_allow_replace, option_default_ttl, option_max_entries,
    option_reaper_buffer_size, option_reaper_interval, option_touch_on_hit, Cache, CacheOption,
    EvictFn,
};
