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

//! Error kinds (§7). Transport errors translate into these at the
//! endpoint/dispatcher boundary; decoder-level application errors are not
//! represented here at all — they ride inside a regular `RSP` payload,
//! opaque to the framework.

use dualrpc_endpoint::TransportError;
use num_enum::{FromPrimitive, IntoPrimitive};

#[repr(usize)]
#[derive(Debug, Default, Clone, Copy, Eq, PartialEq, FromPrimitive, IntoPrimitive, thiserror::Error)]
pub enum RpcError {
    #[error("out of memory")]
    NoMem = 0,
    #[error("invalid parameter")]
    InvalidParam = 1,
    #[error("invalid state")]
    InvalidState = 2,
    #[error("internal error")]
    #[default]
    Internal = 3,
    #[error("command or event not supported by the peer")]
    NotSupported = 4,
}

impl From<TransportError> for RpcError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::NoMem => RpcError::NoMem,
            TransportError::InvalidParam => RpcError::InvalidParam,
            TransportError::InvalidState => RpcError::InvalidState,
            TransportError::Internal => RpcError::Internal,
        }
    }
}
