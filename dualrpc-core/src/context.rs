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

//! The object-safe handle a decoder receives (§6 "send_rsp(payload) /
//! send_ack() from inside a decoder", "decoding_done()"). Kept as a trait
//! rather than a concrete `Dispatcher<T>` reference so `Group`'s decoder
//! tables do not need to name the transport type.

/// Passed to a registered command/event handler while it runs.
pub trait RpcContext {
    /// The numeric id of the group the current command/event belongs to.
    fn group_id(&self) -> u8;

    /// The raw source address the inbound frame arrived from (useful for
    /// logging only; replies are always routed back to that same source by
    /// the dispatcher).
    fn source_addr(&self) -> u8;

    /// Emits the mandatory `RSP` for the command currently being handled.
    /// Calling this more than once, or from an event handler, is a
    /// protocol violation (§4.5).
    fn send_rsp(&self, body: &[u8]);

    /// Emits the mandatory `ACK` for the event currently being handled
    /// (only meaningful when event-ack is enabled; §4.2 "Inbound
    /// handling").
    fn send_ack(&self);

    /// Releases the inbound receive buffer (§6 "decoding_done()", §4.2
    /// "The decoder is expected to call `release_buffer` as soon as it has
    /// copied out the inputs").
    fn decoding_done(&self);
}
