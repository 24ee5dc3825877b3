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

//! Registration groups (§4.2 "Registration") and the §11.1 group
//! handshake.
//!
//! A `Group` is a named bundle of command/event decoders, mirroring the
//! static `NRF_RPC_GROUP_DEFINE` tables the original builds at link time.
//! Because this crate has no linker-section trick available, groups are
//! registered at runtime, in the same order on both sides, into a
//! `GroupTable`; the numeric group id is simply the registration index.
//! The handshake packet (§11.1) exists to *validate* that both sides agree
//! on which name sits at which id, not to negotiate the id itself — it is
//! advisory: a mismatch is logged, not fatal, since nothing in §4.2's
//! dispatch loop depends on the handshake having completed.

use crate::context::RpcContext;
use crate::packet::PacketTag;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

pub type CommandHandler = Arc<dyn Fn(&dyn RpcContext, &[u8]) + Send + Sync>;
pub type EventHandler = Arc<dyn Fn(&dyn RpcContext, &[u8]) + Send + Sync>;

/// A handle to a registered group, returned by `GroupTable::register`.
#[derive(Debug, Clone, Copy)]
pub struct Group {
    pub id: u8,
}

struct GroupEntry {
    name: String,
    commands: HashMap<u16, CommandHandler>,
    events: HashMap<u16, EventHandler>,
}

/// The process-wide table of registered groups (§9 "Global mutable state":
/// "registration tables ... are process-wide singletons. Their
/// initialization must precede any transport activity").
#[derive(Default)]
pub struct GroupTable {
    groups: RwLock<Vec<GroupEntry>>,
}

impl GroupTable {
    pub fn new() -> Self { Self::default() }

    /// Registers a new group, assigning it the next numeric id. Must be
    /// called in the same order on both sides of the link.
    pub fn register(&self, name: &str) -> Group {
        let mut groups = self.groups.write().expect("group table poisoned");
        let id = groups.len() as u8;
        groups.push(GroupEntry { name: name.to_string(), commands: HashMap::new(), events: HashMap::new() });
        Group { id }
    }

    pub fn register_command(&self, group: Group, id: u16, handler: CommandHandler) {
        let mut groups = self.groups.write().expect("group table poisoned");
        groups[group.id as usize].commands.insert(id, handler);
    }

    pub fn register_event(&self, group: Group, id: u16, handler: EventHandler) {
        let mut groups = self.groups.write().expect("group table poisoned");
        groups[group.id as usize].events.insert(id, handler);
    }

    pub fn command(&self, group: u8, id: u16) -> Option<CommandHandler> {
        let groups = self.groups.read().expect("group table poisoned");
        groups.get(group as usize)?.commands.get(&id).cloned()
    }

    pub fn event(&self, group: u8, id: u16) -> Option<EventHandler> {
        let groups = self.groups.read().expect("group table poisoned");
        groups.get(group as usize)?.events.get(&id).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        self.groups.read().expect("group table poisoned").iter().map(|g| g.name.clone()).collect()
    }

    /// Validates an incoming handshake against this side's own registration
    /// order. Logged only (§11.1: advisory).
    pub fn verify_handshake(&self, peer_names: &[String]) {
        let ours = self.names();
        if ours.len() != peer_names.len() {
            log::warn!(
                "dualrpc: group handshake mismatch: {} groups registered locally, peer reports {}",
                ours.len(),
                peer_names.len()
            );
        }
        for (id, (mine, theirs)) in ours.iter().zip(peer_names.iter()).enumerate() {
            if mine != theirs {
                log::warn!("dualrpc: group id {id} name mismatch: local={mine:?} peer={theirs:?}");
            }
        }
    }
}

/// Wire payload of the `INIT` handshake packet (§11.1).
#[derive(Debug, Serialize, Deserialize)]
pub struct Handshake {
    pub groups: Vec<String>,
}

impl Handshake {
    pub fn encode(groups: &GroupTable) -> Vec<u8> {
        let handshake = Handshake { groups: groups.names() };
        let mut buf = vec![PacketTag::Init.into()];
        buf.extend(postcard::to_allocvec(&handshake).expect("handshake payload never fails to serialize"));
        buf
    }

    pub fn decode(payload: &[u8]) -> Option<Handshake> { postcard::from_bytes(payload).ok() }
}
