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

//! Insertion-ordered bounded queue over a ring buffer.
//!
//! Supports removal-by-value either lazily (the slot is tombstoned and
//! `pop` skips it) or compacting (the hole is closed immediately). The TTL
//! cache uses it to keep keys in insertion order for eviction.

use std::sync::Mutex;

const MIN_CAPACITY: usize = 10;
const EXPAND_INCREMENT: usize = 100;

#[derive(Debug, Clone, Copy)]
struct QueueConfig {
    capacity: usize,
    expandable: bool,
    compact_on_remove: bool,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            capacity: 100,
            expandable: true,
            compact_on_remove: false,
        }
    }
}

struct QueueState<T> {
    items: Vec<Option<T>>,
    count: usize,
    head: usize,
    tail: usize,
    removed: usize,
}

/// A FIFO queue with interior locking. `None` slots are tombstones left
/// behind by lazy removal.
pub struct Queue<T> {
    state: Mutex<QueueState<T>>,
    config: QueueConfig,
}

/// Builder-style queue options, mirroring the cache option set.
pub type QueueOption = Box<dyn FnOnce(&mut QueueConfig)>;

/// Fixed capacity: the queue refuses pushes once full. Clamped up to the
/// minimum capacity of 10.
pub fn option_capacity(capacity: usize) -> QueueOption {
    Box::new(move |c: &mut QueueConfig| {
        c.capacity = capacity.max(MIN_CAPACITY);
        c.expandable = false;
    })
}

/// Close removal holes immediately instead of tombstoning them.
pub fn option_compact_on_remove(compact: bool) -> QueueOption {
    Box::new(move |c: &mut QueueConfig| {
        c.compact_on_remove = compact;
    })
}

impl<T: PartialEq + Clone> Default for Queue<T> {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

impl<T: PartialEq + Clone> Queue<T> {
    pub fn new(options: Vec<QueueOption>) -> Self {
        let mut config = QueueConfig::default();
        for option in options {
            option(&mut config);
        }
        let mut items = Vec::with_capacity(config.capacity);
        items.resize_with(config.capacity, || None);
        Self {
            state: Mutex::new(QueueState {
                items,
                count: 0,
                head: 0,
                tail: 0,
                removed: 0,
            }),
            config,
        }
    }

    pub fn len(&self) -> usize {
        let state = self.state.lock().unwrap();
        state.count - state.removed
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.state.lock().unwrap().items.len()
    }

    /// Append at the head. Returns false when the queue is full and not
    /// expandable.
    pub fn push(&self, item: T) -> bool {
        let mut state = self.state.lock().unwrap();
        if state.count == state.items.len() {
            if !self.config.expandable {
                return false;
            }
            state.expand();
        }
        let head = state.head;
        state.items[head] = Some(item);
        state.head = state.next(head);
        state.count += 1;
        true
    }

    /// Remove from the tail, skipping tombstones. Returns `None` when the
    /// queue holds no live elements.
    pub fn pop(&self) -> Option<T> {
        let mut state = self.state.lock().unwrap();
        while state.count > 0 {
            let tail = state.tail;
            let item = state.items[tail].take();
            state.tail = state.next(tail);
            state.count -= 1;
            match item {
                Some(item) => return Some(item),
                None => {
                    state.removed = state.removed.saturating_sub(1);
                }
            }
        }
        None
    }

    /// Remove every occurrence of `item`. In lazy mode the slots become
    /// tombstones; in compacting mode the holes are closed. A fully
    /// drained queue resets its indices. Returns the number removed.
    pub fn remove(&self, item: &T) -> usize {
        let mut state = self.state.lock().unwrap();
        let mut removed = 0;
        let mut index = state.tail;
        for _ in 0..state.count {
            if state.items[index].as_ref() == Some(item) {
                state.items[index] = None;
                removed += 1;
            }
            index = state.next(index);
        }
        state.removed += removed;
        if self.config.compact_on_remove {
            state.compact();
        } else if state.count == state.removed {
            state.reset();
        }
        removed
    }

    /// Snapshot of live elements in FIFO order.
    pub fn items(&self) -> Vec<T> {
        let state = self.state.lock().unwrap();
        state.live().cloned().collect()
    }
}

impl<T: PartialEq + Clone> QueueState<T> {
    fn next(&self, position: usize) -> usize {
        let position = position + 1;
        if position == self.items.len() {
            0
        } else {
            position
        }
    }

    fn live(&self) -> impl Iterator<Item = &T> {
        let mut ordered = Vec::with_capacity(self.count);
        let mut index = self.tail;
        for _ in 0..self.count {
            if let Some(item) = self.items[index].as_ref() {
                ordered.push(item);
            }
            index = self.next(index);
        }
        ordered.into_iter()
    }

    fn expand(&mut self) {
        let mut items = Vec::with_capacity(self.count + EXPAND_INCREMENT);
        let mut index = self.tail;
        for _ in 0..self.count {
            items.push(self.items[index].take());
            index = self.next(index);
        }
        items.resize_with(self.count + EXPAND_INCREMENT, || None);
        self.items = items;
        self.tail = 0;
        self.head = self.count;
    }

    fn compact(&mut self) {
        let capacity = self.items.len();
        let mut items: Vec<Option<T>> = self.live().cloned().map(Some).collect();
        let count = items.len();
        items.resize_with(capacity.max(count), || None);
        self.items = items;
        self.tail = 0;
        self.head = if count == capacity { 0 } else { count };
        self.count = count;
        self.removed = 0;
    }

    fn reset(&mut self) {
        for slot in &mut self.items {
            *slot = None;
        }
        self.head = 0;
        self.tail = 0;
        self.count = 0;
        self.removed = 0;
    }
}
