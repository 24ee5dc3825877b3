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

//! The RPC dispatcher: packet framing, command/event/response routing,
//! nested-call handling, thread-pool management, and the event-ack
//! protocol. See `dualrpc-endpoint` for the address pools this is built
//! on and `dualrpc-cbkproxy` for the callback-proxy tables exposed off of
//! `Dispatcher`.

mod config;
mod context;
mod dispatcher;
mod error;
mod group;
mod packet;
mod state;

pub use config::DispatcherConfig;
pub use context::RpcContext;
pub use dispatcher::Dispatcher;
pub use error::RpcError;
pub use group::{CommandHandler, EventHandler, Group, GroupTable};
pub use packet::PacketTag;

pub use dualrpc_endpoint::Transport;
