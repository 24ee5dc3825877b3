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

//! The transport contract consumed by the endpoint layer (§6 "Transport
//! contract consumed"). The shared-memory ring itself is out of scope for
//! this crate family (§1); `dualrpc-transport` is a reference
//! implementation built against this trait.

use num_enum::{FromPrimitive, IntoPrimitive};
use std::fmt;

/// Errors a transport can surface back through `send`. A deliberately small
/// set — just enough for the endpoint layer to translate into the core's
/// `RpcError` (§7); the transport is not expected to invent new kinds.
#[repr(usize)]
#[derive(Debug, Default, Clone, Copy, Eq, PartialEq, FromPrimitive, IntoPrimitive)]
pub enum TransportError {
    NoMem = 0,
    InvalidParam = 1,
    InvalidState = 2,
    #[default]
    Internal = 3,
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TransportError::NoMem => "transport out of memory",
            TransportError::InvalidParam => "invalid transport parameter",
            TransportError::InvalidState => "transport in invalid state",
            TransportError::Internal => "internal transport error",
        };
        f.write_str(s)
    }
}

impl std::error::Error for TransportError {}

/// A length-prefixed, in-order, reliable byte-frame carrier (§1 "Out of
/// scope", §6 "Transport contract consumed"). `init` is given a callback to
/// invoke once per received frame, from a single serialized context per
/// local endpoint, mirroring the real transport's delivery guarantee.
///
/// `CONNECTED` must be observed by the caller of `init` before `send` is
/// used; this trait models that as `init` blocking until the peer is ready,
/// matching §4.5 ("Transport connect never completes: `init()` blocks
/// indefinitely").
pub trait Transport: Send + Sync + 'static {
    /// Registers the frame-arrival callback and blocks until the transport
    /// reports the peer connected.
    fn init(&self, on_frame: Box<dyn Fn(&[u8]) + Send + Sync>);

    /// Sends one already-framed buffer (`[dst][src][payload...]`).
    fn send(&self, frame: &[u8]) -> Result<(), TransportError>;
}
