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

//! The callee-side half of the callback proxy (§4.4 "Outbound"): a
//! fixed-size table of trampoline slots.
//!
//! The original generates one Cortex-M assembly stub per slot, each baking
//! its own index into an immediate so that invoking the stub recovers which
//! slot fired. Per the Design Notes (§9, "Replacing the trampoline
//! assembly"), a portable implementation indexes a table of closures
//! instead — there is no code to generate, so the "trampoline address" this
//! table hands back is just the stable slot index, and invoking it means
//! calling the stored closure directly.

use std::sync::Mutex;

/// A handler bound into an outbound slot: the user-supplied serializer that
/// packages a callback's arguments and performs the outbound RPC (§4.4
/// "outbound" handler).
pub trait OutHandler: Send + Sync {
    fn invoke(&self, args: &[u8]) -> Vec<u8>;
    /// Identity used to detect a slot rebinding to a *different* handler
    /// (P7). Two handlers that should be considered "the same" for a given
    /// `(index, handler)` pair must return equal ids.
    fn id(&self) -> usize;
}

struct Slot {
    handler: Option<Box<dyn OutHandler>>,
}

/// Fixed-size array of outbound trampoline slots (§3 "CallbackProxy
/// out-table", §5 "Memory: all other structures are statically sized").
pub struct OutTable {
    slots: Vec<Mutex<Slot>>,
}

impl OutTable {
    pub fn new(capacity: usize) -> Self {
        let slots = (0..capacity).map(|_| Mutex::new(Slot { handler: None })).collect();
        Self { slots }
    }

    pub fn capacity(&self) -> usize { self.slots.len() }

    /// Binds `handler` into slot `index` on first use; returns the stable
    /// trampoline index (here, `index` itself — there is no separate
    /// address to allocate) on success (P7: "returns the same trampoline
    /// address for the same `(i, h)`"). Returns `None` if `index` is
    /// already bound to a handler with a different identity.
    pub fn out_get(&self, index: usize, handler: Box<dyn OutHandler>) -> Option<usize> {
        let slot = self.slots.get(index)?;
        let mut slot = slot.lock().expect("out-table slot mutex poisoned");
        match &slot.handler {
            None => {
                log::debug!("dualrpc: callback out-table bound slot {index}");
                slot.handler = Some(handler);
                Some(index)
            }
            Some(existing) if existing.id() == handler.id() => Some(index),
            Some(_) => {
                log::warn!("dualrpc: callback out-table slot {index} already bound to a different handler");
                None
            }
        }
    }

    /// Invokes the handler bound to `index`, mirroring the trampoline stub
    /// tail-calling `out_callbacks[index]`.
    pub fn invoke(&self, index: usize, args: &[u8]) -> Option<Vec<u8>> {
        let slot = self.slots.get(index)?;
        let slot = slot.lock().expect("out-table slot mutex poisoned");
        slot.handler.as_ref().map(|h| h.invoke(args))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Echo(usize);

    impl OutHandler for Echo {
        fn invoke(&self, args: &[u8]) -> Vec<u8> { args.to_vec() }
        fn id(&self) -> usize { self.0 }
    }

    #[test]
    fn binding_the_same_handler_twice_returns_the_same_slot() {
        let table = OutTable::new(4);
        let first = table.out_get(1, Box::new(Echo(42)));
        let second = table.out_get(1, Box::new(Echo(42)));
        assert_eq!(first, Some(1));
        assert_eq!(second, Some(1));
    }

    #[test]
    fn binding_a_different_handler_to_a_taken_slot_fails() {
        let table = OutTable::new(4);
        assert_eq!(table.out_get(0, Box::new(Echo(1))), Some(0));
        assert_eq!(table.out_get(0, Box::new(Echo(2))), None);
    }

    #[test]
    fn invoke_calls_the_bound_handler() {
        let table = OutTable::new(2);
        table.out_get(0, Box::new(Echo(7))).unwrap();
        assert_eq!(table.invoke(0, &[1, 2, 3]), Some(vec![1, 2, 3]));
        assert_eq!(table.invoke(1, &[]), None);
    }

    #[test]
    fn out_of_range_index_yields_none() {
        let table = OutTable::new(1);
        assert_eq!(table.out_get(5, Box::new(Echo(1))), None);
    }
}
