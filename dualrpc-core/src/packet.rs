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

//! Packet framing (§3 "Packet", §6 "Wire frame").
//!
//! The two address bytes are handled by `dualrpc-endpoint`; everything this
//! module defines lives inside the opaque payload that layer hands up: a
//! one-byte type tag, then (for `CMD`/`EVT`) a one-byte group id and a
//! two-byte little-endian numeric id, then the application payload.

use num_enum::{FromPrimitive, IntoPrimitive};

/// Packet-type tag (§3, §6). Values are illustrative per §6 ("any
/// consistent assignment is acceptable"); `Err` and `Init` are the §11
/// supplements.
#[repr(u8)]
#[derive(Debug, Default, Clone, Copy, Eq, PartialEq, FromPrimitive, IntoPrimitive)]
pub enum PacketTag {
    Cmd = 0x01,
    Evt = 0x02,
    Rsp = 0x03,
    Ack = 0x04,
    /// §11.2: sent in place of a `RSP`/`ACK` when the receiver cannot even
    /// construct one.
    Err = 0x05,
    /// §11.1: the group-handshake packet.
    Init = 0x06,
    #[default]
    Unknown = 0xFF,
}

const HEADER_LEN: usize = 4; // tag + group + id(2)

/// Builds a `CMD`/`EVT` payload: `[tag][group][id_lo][id_hi][body...]`.
pub fn encode(tag: PacketTag, group: u8, id: u16, body: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(HEADER_LEN + body.len());
    buf.push(tag.into());
    buf.push(group);
    buf.extend_from_slice(&id.to_le_bytes());
    buf.extend_from_slice(body);
    buf
}

/// A decoded `CMD`/`EVT` header plus a view of the remaining body.
pub struct Header<'a> {
    pub tag: PacketTag,
    pub group: u8,
    pub id: u16,
    pub body: &'a [u8],
}

/// Parses a payload produced by `encode`. Returns `None` if it is shorter
/// than the fixed header — a malformed frame, not a protocol violation the
/// dispatcher can attribute to a specific endpoint.
pub fn decode(payload: &[u8]) -> Option<Header<'_>> {
    if payload.len() < HEADER_LEN {
        return None;
    }
    let tag = PacketTag::from(payload[0]);
    let group = payload[1];
    let id = u16::from_le_bytes([payload[2], payload[3]]);
    Some(Header { tag, group, id, body: &payload[HEADER_LEN..] })
}

/// `RSP`/`ACK` carry no group/id — the filter already knows which endpoint
/// is waiting for them from the endpoint's own state, so all that is needed
/// on the wire is the tag and the body.
pub fn encode_reply(tag: PacketTag, body: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(1 + body.len());
    buf.push(tag.into());
    buf.extend_from_slice(body);
    buf
}

pub fn decode_reply(payload: &[u8]) -> Option<(PacketTag, &[u8])> {
    let (&tag, body) = payload.split_first()?;
    Some((PacketTag::from(tag), body))
}

/// Reads just the tag byte, the one thing the endpoint-layer filter needs
/// to look at (§4.1 "filter").
pub fn peek_tag(payload: &[u8]) -> Option<PacketTag> { payload.first().copied().map(PacketTag::from) }

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cmd_round_trips_through_encode_decode() {
        let frame = encode(PacketTag::Cmd, 3, 0x1234, &[0xAA, 0xBB]);
        let header = decode(&frame).unwrap();
        assert_eq!(header.tag, PacketTag::Cmd);
        assert_eq!(header.group, 3);
        assert_eq!(header.id, 0x1234);
        assert_eq!(header.body, &[0xAA, 0xBB]);
    }

    #[test]
    fn reply_round_trips() {
        let frame = encode_reply(PacketTag::Rsp, &[1, 2, 3]);
        let (tag, body) = decode_reply(&frame).unwrap();
        assert_eq!(tag, PacketTag::Rsp);
        assert_eq!(body, &[1, 2, 3]);
    }

    #[test]
    fn short_payload_fails_to_decode() {
        assert!(decode(&[0x01, 0x00]).is_none());
    }
}
