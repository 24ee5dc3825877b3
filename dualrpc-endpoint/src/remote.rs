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

//! `RemoteEndpoint` (§3) and the backpressure pool that hands them out.

use dualrpc_os::Semaphore;
use std::collections::VecDeque;
use std::sync::Mutex;

/// An opaque handle to a slot owned by the peer (§3 "RemoteEndpoint").
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct RemoteEndpoint {
    pub addr: u8,
}

/// The pool of remote endpoints, counted by a semaphore so the number of
/// simultaneously outstanding outbound commands from this side never
/// exceeds the peer's local-endpoint capacity (§3 invariant; §4.5 "pool
/// sizing must match peer worker count").
pub struct RemotePool {
    free: Mutex<VecDeque<u8>>,
    sem: Semaphore,
    size: usize,
}

impl RemotePool {
    pub fn new(size: usize) -> Self {
        let free = (0..size as u8).collect::<VecDeque<_>>();
        Self { free: Mutex::new(free), sem: Semaphore::new(size), size }
    }

    pub fn size(&self) -> usize { self.size }

    /// Blocks on the remote-pool semaphore, then pops the head of the free
    /// list (§4.1 "reserve_remote").
    pub fn reserve(&self) -> RemoteEndpoint {
        self.sem.wait();
        let addr = self
            .free
            .lock()
            .expect("remote pool mutex poisoned")
            .pop_front()
            .expect("remote pool semaphore/free-list out of sync");
        RemoteEndpoint { addr }
    }

    /// Returns a reserved endpoint to the free list and wakes one waiter.
    pub fn release(&self, ep: RemoteEndpoint) {
        self.free.lock().expect("remote pool mutex poisoned").push_back(ep.addr);
        self.sem.post();
    }

    /// Looks up a remote endpoint by wire address, e.g. the `src` field of
    /// an arriving frame (§4.1 "filter"). Any address within range is a
    /// valid handle regardless of whether it is currently reserved by us —
    /// the peer addresses *their* endpoint, not an entry in our free list.
    pub fn endpoint(&self, addr: u8) -> Option<RemoteEndpoint> {
        if (addr as usize) < self.size {
            Some(RemoteEndpoint { addr })
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn backpressure_blocks_the_nth_plus_one_reservation() {
        let pool = Arc::new(RemotePool::new(2));
        let a = pool.reserve();
        let b = pool.reserve();

        let pool2 = Arc::clone(&pool);
        let in_flight = Arc::new(AtomicUsize::new(2));
        let in_flight2 = Arc::clone(&in_flight);
        let handle = thread::spawn(move || {
            let c = pool2.reserve();
            // By the time this unblocks, one of the first two must have
            // been released (P4: never more than `size` in flight).
            assert_eq!(in_flight2.load(Ordering::SeqCst), 1);
            c
        });

        thread::sleep(Duration::from_millis(20));
        pool.release(a);
        in_flight.store(1, Ordering::SeqCst);
        let c = handle.join().unwrap();
        pool.release(b);
        pool.release(c);
    }
}
