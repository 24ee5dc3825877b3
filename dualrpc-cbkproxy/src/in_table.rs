// Copyright 2024 The dualrpc Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     https://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! The caller-side half of the callback proxy (§4.4 "Inbound"): an
//! append-only map from raw pointer identity to a small wire index.
//!
//! The original keys this on a binary search tree over the pointer value.
//! Per the Design Notes (§9, "Replacing the append-only binary search
//! tree"), the tree shape is incidental — any concurrent ordered map with
//! insertion-only semantics satisfies P6. This keeps an append-only `Vec`
//! for `get(index)` plus a `HashMap` for `set(ptr)` so both directions are
//! O(1) instead of O(log n), and protects both behind the single mutex the
//! spec calls for (§5 "Callback-proxy in-table: protected by a single
//! mutex; append-only").

use std::collections::HashMap;
use std::sync::Mutex;

#[derive(Default)]
struct Inner {
    by_ptr: HashMap<usize, usize>,
    by_index: Vec<usize>,
}

/// Caller-side table mapping a callback's raw pointer value to a stable
/// wire index. Never shrinks.
pub struct InTable {
    inner: Mutex<Inner>,
}

impl InTable {
    pub fn new() -> Self { Self { inner: Mutex::new(Inner::default()) } }

    /// Idempotent: repeated calls with the same pointer return the same
    /// index (P6). Appends a new entry only the first time `ptr` is seen.
    pub fn set(&self, ptr: usize) -> usize {
        let mut inner = self.inner.lock().expect("in-table mutex poisoned");
        if let Some(&index) = inner.by_ptr.get(&ptr) {
            return index;
        }
        let index = inner.by_index.len();
        inner.by_index.push(ptr);
        inner.by_ptr.insert(ptr, index);
        log::debug!("dualrpc: callback in-table bound index {index} to pointer {ptr:#x}");
        index
    }

    /// Returns the pointer value previously bound to `index`, satisfying
    /// `in_get(in_set(p)) == p` (P6).
    pub fn get(&self, index: usize) -> Option<usize> {
        self.inner.lock().expect("in-table mutex poisoned").by_index.get(index).copied()
    }

    pub fn len(&self) -> usize { self.inner.lock().expect("in-table mutex poisoned").by_index.len() }

    pub fn is_empty(&self) -> bool { self.len() == 0 }
}

impl Default for InTable {
    fn default() -> Self { Self::new() }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn set_is_idempotent_and_get_round_trips() {
        let table = InTable::new();
        let a = table.set(0x1000);
        let b = table.set(0x2000);
        let a_again = table.set(0x1000);
        assert_eq!(a, a_again);
        assert_ne!(a, b);
        assert_eq!(table.get(a), Some(0x1000));
        assert_eq!(table.get(b), Some(0x2000));
    }

    #[test]
    fn concurrent_set_of_same_pointer_yields_one_index() {
        let table = Arc::new(InTable::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let table = Arc::clone(&table);
                thread::spawn(move || table.set(0xDEAD))
            })
            .collect();
        let indices: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert!(indices.windows(2).all(|w| w[0] == w[1]));
        assert_eq!(table.len(), 1);
    }
}
