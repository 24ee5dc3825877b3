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

//! Runtime configuration (§10.3), replacing the teacher's Kconfig
//! constants (`CONFIG_NRF_RPC_LOCAL_THREAD_POOL_SIZE`, `_EXTRA_EP_COUNT`,
//! `_REMOTE_THREAD_POOL_SIZE`, ...) with a plain struct since this crate
//! targets a general OS rather than a fixed firmware image.

/// Sizing and feature toggles for one side's dispatcher.
#[derive(Debug, Clone, Copy)]
pub struct DispatcherConfig {
    /// `P`: permanently-bound pool workers (§4.3).
    pub pool_size: usize,
    /// `E`: lazily-assigned extra local endpoints for foreign threads (§4.3).
    pub extra_endpoints: usize,
    /// Remote-endpoint pool size; must match the peer's `pool_size` (§4.5).
    pub remote_pool_size: usize,
    /// Runtime mirror of the `event-ack` compile feature (§9 Open
    /// Question), so a single test binary can exercise both state
    /// machines. When the `event-ack` feature is compiled out this field
    /// is ignored and the ack-wait steps never run regardless of its value.
    pub event_ack_enabled: bool,
    /// Fixed capacity of the outbound callback-proxy trampoline table
    /// (§4.4, §5 "statically sized").
    pub callback_slots: usize,
}

impl DispatcherConfig {
    pub fn new(pool_size: usize, remote_pool_size: usize) -> Self {
        Self {
            pool_size,
            extra_endpoints: 4,
            remote_pool_size,
            event_ack_enabled: cfg!(feature = "event-ack"),
            callback_slots: 16,
        }
    }

    pub fn with_extra_endpoints(mut self, n: usize) -> Self {
        self.extra_endpoints = n;
        self
    }

    pub fn with_event_ack(mut self, enabled: bool) -> Self {
        self.event_ack_enabled = enabled && cfg!(feature = "event-ack");
        self
    }

    pub fn with_callback_slots(mut self, n: usize) -> Self {
        self.callback_slots = n;
        self
    }
}
