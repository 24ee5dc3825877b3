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

//! Per-local-endpoint event-ack/nested-call state (§4.2 "State machine per
//! local endpoint"). `IDLE` is represented by `Expect::None`; `WAIT_RSP`
//! and `WAIT_ACK` by `Expect::Rsp`/`Expect::Ack`. The filter installed on
//! `EndpointLayer` reads and clears this on every `RSP`/`ACK` arrival; the
//! dispatcher sets it before transmitting a `CMD`/`EVT`.

use std::sync::Mutex;

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum Expect {
    None,
    Rsp,
    Ack,
}

pub struct EndpointState {
    expect: Mutex<Expect>,
    pending_rsp: Mutex<Option<Vec<u8>>>,
}

impl EndpointState {
    pub fn new() -> Self { Self { expect: Mutex::new(Expect::None), pending_rsp: Mutex::new(None) } }

    pub fn get(&self) -> Expect { *self.expect.lock().expect("endpoint state mutex poisoned") }

    pub fn set(&self, value: Expect) { *self.expect.lock().expect("endpoint state mutex poisoned") = value; }

    /// Atomically transitions out of `from` into `Expect::None`, returning
    /// whether the transition applied. Used by the filter to consume a
    /// matching `RSP`/`ACK` exactly once.
    pub fn take_if(&self, from: Expect) -> bool {
        let mut expect = self.expect.lock().expect("endpoint state mutex poisoned");
        if *expect == from {
            *expect = Expect::None;
            true
        } else {
            false
        }
    }

    pub fn stash_rsp(&self, bytes: Vec<u8>) {
        *self.pending_rsp.lock().expect("endpoint state mutex poisoned") = Some(bytes);
    }

    pub fn take_rsp(&self) -> Option<Vec<u8>> {
        self.pending_rsp.lock().expect("endpoint state mutex poisoned").take()
    }
}

impl Default for EndpointState {
    fn default() -> Self { Self::new() }
}
