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

//! The dispatcher (§4.2, §4.3, §4.5): packet routing, the event-ack/
//! nested-call state machine, and the thread pool that drives it.

use crate::config::DispatcherConfig;
use crate::context::RpcContext;
use crate::error::RpcError;
use crate::group::{GroupTable, Handshake};
use crate::packet::{self, PacketTag};
use crate::state::{EndpointState, Expect};
use dualrpc_cbkproxy::{InTable, OutTable};
use dualrpc_endpoint::{
    EndpointConfig, EndpointLayer, FilterCode, LocalEndpoint, Received, RemoteEndpoint, Transport, FILTERED_ACK,
    FILTERED_ERR, FILTERED_RESPONSE, NOT_FILTERED,
};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// The RPC core for one side of the link. Symmetric: both peers construct
/// and `start()` an identical `Dispatcher`.
pub struct Dispatcher<T: Transport> {
    endpoints: Arc<EndpointLayer<T>>,
    groups: Arc<GroupTable>,
    states: Vec<EndpointState>,
    config: DispatcherConfig,
    on_violation: Arc<dyn Fn(&str) + Send + Sync>,
    callback_out: OutTable,
    callback_in: InTable,
}

fn default_violation_reporter(message: &str) { log::error!("dualrpc: protocol violation: {message}"); }

impl<T: Transport> Dispatcher<T> {
    pub fn new(transport: T, config: DispatcherConfig, groups: Arc<GroupTable>) -> Arc<Self> {
        Self::with_violation_reporter(transport, config, groups, default_violation_reporter)
    }

    pub fn with_violation_reporter(
        transport: T,
        config: DispatcherConfig,
        groups: Arc<GroupTable>,
        on_violation: impl Fn(&str) + Send + Sync + 'static,
    ) -> Arc<Self> {
        let endpoint_config = EndpointConfig {
            pool_size: config.pool_size,
            extra_endpoints: config.extra_endpoints,
            remote_pool_size: config.remote_pool_size,
        };
        let total = config.pool_size + config.extra_endpoints;
        Arc::new(Self {
            endpoints: Arc::new(EndpointLayer::new(transport, endpoint_config)),
            groups,
            states: (0..total).map(|_| EndpointState::new()).collect(),
            config,
            on_violation: Arc::new(on_violation),
            callback_out: OutTable::new(config.callback_slots),
            callback_in: InTable::new(),
        })
    }

    pub fn callback_out(&self) -> &OutTable { &self.callback_out }

    pub fn callback_in(&self) -> &InTable { &self.callback_in }

    fn state(&self, addr: u8) -> &EndpointState { &self.states[addr as usize] }

    fn violate(&self, message: &str) -> ! {
        (self.on_violation)(message);
        panic!("dualrpc: protocol violation: {message}");
    }

    /// Wires the filter, blocks until the transport's peer connects, then
    /// spawns the fixed worker pool (§4.3) and sends this side's group
    /// handshake (§11.1). Returns once the pool is running; the pool
    /// threads themselves run forever.
    pub fn start(self: &Arc<Self>) {
        let this = Arc::clone(self);
        self.endpoints.init(move |dst, _src, payload| this.filter(dst, payload));

        let this = Arc::clone(self);
        dualrpc_os::ThreadPool::spawn(self.config.pool_size, move |i| {
            this.endpoints.bind_pool_worker(i);
            let local = this.endpoints.local_table().get(i).expect("pool worker index within local table");
            loop {
                this.pool_step(local);
            }
        });

        self.send_handshake();
    }

    fn send_handshake(&self) {
        let frame = Handshake::encode(&self.groups);
        if let Err(err) = self.endpoints.send(0, &RemoteEndpoint { addr: 0 }, &frame) {
            log::warn!("dualrpc: failed to send group handshake: {err}");
        }
    }

    /// The filter installed on the endpoint layer (§4.2 "Filter policy").
    fn filter(&self, dst: u8, payload: &[u8]) -> FilterCode {
        let Some(tag) = packet::peek_tag(payload) else { return NOT_FILTERED };
        let state = self.state(dst);
        match tag {
            PacketTag::Rsp if state.take_if(Expect::Rsp) => {
                state.stash_rsp(payload[1..].to_vec());
                FILTERED_RESPONSE
            }
            PacketTag::Ack if state.take_if(Expect::Ack) => FILTERED_ACK,
            // §11.2: an ERR arrives in place of whichever reply the endpoint
            // was waiting for, never in addition to it.
            PacketTag::Err if state.take_if(Expect::Rsp) || state.take_if(Expect::Ack) => FILTERED_ERR,
            _ => NOT_FILTERED,
        }
    }

    /// One iteration of a permanently-bound worker's `read -> dispatch ->
    /// loop` (§4.3).
    fn pool_step(&self, local: &LocalEndpoint) {
        match self.endpoints.read(local) {
            Received::Data { src, bytes } => {
                self.dispatch_inbound(local, src, &bytes);
                self.endpoints.release_buffer(local);
            }
            Received::Filtered(code) => {
                self.violate(&format!("pool worker observed a filtered packet (code {code}) while idle"));
            }
        }
    }

    /// Repeats `read -> dispatch` until a `RSP` filtered to this endpoint
    /// arrives, implementing the caller's response-wait loop (§4.2 step 6).
    /// An `ERR` arriving in place of the `RSP` (§11.2) short-circuits the
    /// wait with `RpcError::Internal` instead of a protocol violation.
    fn response_wait_loop(&self, local: &LocalEndpoint) -> Result<Vec<u8>, RpcError> {
        loop {
            match self.endpoints.read(local) {
                Received::Filtered(code) if code == FILTERED_RESPONSE => {
                    return Ok(self.state(local.addr).take_rsp().unwrap_or_else(|| {
                        self.violate("filtered response delivered with no pending payload");
                    }));
                }
                Received::Filtered(code) if code == FILTERED_ERR => return Err(RpcError::Internal),
                Received::Filtered(code) => {
                    self.violate(&format!("unexpected filtered packet (code {code}) while awaiting a response"));
                }
                Received::Data { src, bytes } => {
                    self.dispatch_inbound(local, src, &bytes);
                    self.endpoints.release_buffer(local);
                }
            }
        }
    }

    /// Repeats `read -> dispatch` until this endpoint's outstanding `ACK`
    /// clears (§4.2 "ack-wait loop"). An `ERR` arriving in place of the
    /// `ACK` (§11.2) short-circuits the wait with `RpcError::Internal`.
    fn ack_wait_loop(&self, local: &LocalEndpoint) -> Result<(), RpcError> {
        while self.state(local.addr).get() == Expect::Ack {
            match self.endpoints.read(local) {
                Received::Filtered(code) if code == FILTERED_ACK => return Ok(()),
                Received::Filtered(code) if code == FILTERED_ERR => return Err(RpcError::Internal),
                Received::Filtered(code) => {
                    self.violate(&format!("unexpected filtered packet (code {code}) while awaiting an ack"));
                }
                Received::Data { src, bytes } => {
                    self.dispatch_inbound(local, src, &bytes);
                    self.endpoints.release_buffer(local);
                }
            }
        }
        Ok(())
    }

    fn dispatch_inbound(&self, local: &LocalEndpoint, src: u8, bytes: &[u8]) {
        if packet::peek_tag(bytes) == Some(PacketTag::Init) {
            match Handshake::decode(&bytes[1..]) {
                Some(handshake) => self.groups.verify_handshake(&handshake.groups),
                None => log::warn!("dualrpc: malformed group handshake from {src}"),
            }
            return;
        }

        let Some(header) = packet::decode(bytes) else {
            log::error!("dualrpc: malformed frame from {src} ({} bytes)", bytes.len());
            self.send_err(local, src, b"malformed frame");
            return;
        };

        match header.tag {
            PacketTag::Cmd => self.handle_cmd(local, src, header.group, header.id, header.body),
            PacketTag::Evt => self.handle_evt(local, src, header.group, header.id, header.body),
            other => self.violate(&format!("unexpected tag {other:?} delivered as plain data")),
        }
    }

    fn handle_cmd(&self, local: &LocalEndpoint, src: u8, group: u8, id: u16, body: &[u8]) {
        // §4.2 "remember the previous value of waiting_for_ack, clear it ...
        // run the decoder, then restore waiting_for_ack".
        let was_waiting_for_ack = self.state(local.addr).take_if(Expect::Ack);

        let ctx = DispatchCtx::new(self, local, src, group);
        match self.groups.command(group, id) {
            Some(handler) => {
                let outcome = catch_unwind(AssertUnwindSafe(|| handler(&ctx, body)));
                ctx.decoding_done();
                match outcome {
                    Ok(()) if ctx.responded() => {}
                    Ok(()) => self.violate(&format!("command handler for group {group} id {id:#x} returned without sending a response")),
                    Err(_) if ctx.responded() => {
                        log::error!("dualrpc: command handler for group {group} id {id:#x} panicked after responding");
                    }
                    Err(_) => {
                        log::error!("dualrpc: command handler for group {group} id {id:#x} panicked; sending error report");
                        self.send_err(local, src, b"decoder panicked");
                    }
                }
            }
            None => {
                log::warn!("dualrpc: unknown command id {id:#x} in group {group}");
                let body = [usize::from(RpcError::NotSupported) as u8];
                let frame = packet::encode_reply(PacketTag::Rsp, &body);
                let _ = self.endpoints.send(local.addr, &RemoteEndpoint { addr: src }, &frame);
            }
        }

        if was_waiting_for_ack {
            self.state(local.addr).set(Expect::Ack);
        }
    }

    fn handle_evt(&self, local: &LocalEndpoint, src: u8, group: u8, id: u16, body: &[u8]) {
        let ctx = DispatchCtx::new(self, local, src, group);
        match self.groups.event(group, id) {
            Some(handler) => {
                let outcome = catch_unwind(AssertUnwindSafe(|| handler(&ctx, body)));
                ctx.decoding_done();
                match outcome {
                    Ok(()) if self.config.event_ack_enabled && !ctx.acked() => {
                        self.violate(&format!("event handler for group {group} id {id:#x} returned without acking"));
                    }
                    Ok(()) => {}
                    Err(_) => log::error!("dualrpc: event handler for group {group} id {id:#x} panicked"),
                }
            }
            None => log::warn!("dualrpc: unknown event id {id:#x} in group {group}; no ack sent"),
        }
    }

    fn send_err(&self, local: &LocalEndpoint, src: u8, reason: &[u8]) {
        let frame = packet::encode_reply(PacketTag::Err, reason);
        let _ = self.endpoints.send(local.addr, &RemoteEndpoint { addr: src }, &frame);
    }

    /// `send_cmd_rsp` (§6): blocks for the response and hands back its raw
    /// bytes for the caller to decode inline.
    ///
    /// Saves and restores this endpoint's installed response-decoder state
    /// around the call (§4.2 steps 3 and 7; §3 "TransactionContext" —
    /// "threaded through nested calls by saving/restoring the previous
    /// decoder pair around each synchronous call"). This matters whenever
    /// the call is itself issued from inside a handler that a response-wait
    /// loop dispatched reentrantly on this same endpoint (P3): without the
    /// save/restore, this call's `Expect::Rsp` would clobber the enclosing
    /// call's, and the enclosing `response_wait_loop` would never see its
    /// own `RSP` filtered once this nested one completes.
    pub fn send_cmd_rsp(&self, group: u8, id: u16, payload: &[u8]) -> Result<Vec<u8>, RpcError> {
        let local = self.endpoints.current_local();

        if self.config.event_ack_enabled {
            self.ack_wait_loop(local)?;
        }

        let saved = self.state(local.addr).get();
        self.state(local.addr).set(Expect::Rsp);
        let remote = self.endpoints.reserve_remote();
        let frame = packet::encode(PacketTag::Cmd, group, id, payload);
        let sent = self.endpoints.send(local.addr, &remote, &frame);
        if let Err(err) = sent {
            self.state(local.addr).set(saved);
            self.endpoints.release_remote(remote);
            return Err(err.into());
        }

        let rsp = self.response_wait_loop(local);
        self.state(local.addr).set(saved);
        self.endpoints.release_remote(remote);
        rsp
    }

    /// `send_cmd` (§6): like `send_cmd_rsp`, but decodes the response
    /// inline via the supplied closure before returning.
    pub fn send_cmd<R>(&self, group: u8, id: u16, payload: &[u8], decode: impl FnOnce(&[u8]) -> R) -> Result<R, RpcError> {
        self.send_cmd_rsp(group, id, payload).map(|bytes| decode(&bytes))
    }

    /// `send_evt` (§6): fire-and-forget, subject to the ack-wait discipline
    /// on the *next* send from this endpoint (§4.2 "Event flow").
    ///
    /// `Expect::Ack` is only set once the frame has actually gone out: if
    /// `endpoints.send` fails, no `EVT` is in flight and no `ACK` will ever
    /// arrive, so leaving the endpoint waiting on one would deadlock every
    /// later send on it.
    pub fn send_evt(&self, group: u8, id: u16, payload: &[u8]) -> Result<(), RpcError> {
        let local = self.endpoints.current_local();

        if self.config.event_ack_enabled {
            self.ack_wait_loop(local)?;
        }

        let remote = self.endpoints.reserve_remote();
        let frame = packet::encode(PacketTag::Evt, group, id, payload);
        let result = self.endpoints.send(local.addr, &remote, &frame);
        self.endpoints.release_remote(remote);

        if self.config.event_ack_enabled && result.is_ok() {
            self.state(local.addr).set(Expect::Ack);
        }

        result.map_err(RpcError::from)
    }
}

/// The concrete, non-generic-over-`T` handle passed to decoders as `&dyn
/// RpcContext` (§6 "send_rsp/send_ack from inside a decoder").
struct DispatchCtx<'a, T: Transport> {
    dispatcher: &'a Dispatcher<T>,
    local: &'a LocalEndpoint,
    src: u8,
    group: u8,
    responded: AtomicBool,
    acked: AtomicBool,
    done: AtomicBool,
}

impl<'a, T: Transport> DispatchCtx<'a, T> {
    fn new(dispatcher: &'a Dispatcher<T>, local: &'a LocalEndpoint, src: u8, group: u8) -> Self {
        Self {
            dispatcher,
            local,
            src,
            group,
            responded: AtomicBool::new(false),
            acked: AtomicBool::new(false),
            done: AtomicBool::new(false),
        }
    }

    fn responded(&self) -> bool { self.responded.load(Ordering::SeqCst) }

    fn acked(&self) -> bool { self.acked.load(Ordering::SeqCst) }
}

impl<'a, T: Transport> RpcContext for DispatchCtx<'a, T> {
    fn group_id(&self) -> u8 { self.group }

    fn source_addr(&self) -> u8 { self.src }

    fn send_rsp(&self, body: &[u8]) {
        if self.responded.swap(true, Ordering::SeqCst) {
            self.dispatcher.violate("send_rsp called more than once for the same command");
        }
        let frame = packet::encode_reply(PacketTag::Rsp, body);
        let _ = self.dispatcher.endpoints.send(self.local.addr, &RemoteEndpoint { addr: self.src }, &frame);
    }

    fn send_ack(&self) {
        if self.acked.swap(true, Ordering::SeqCst) {
            self.dispatcher.violate("send_ack called more than once for the same event");
        }
        let frame = packet::encode_reply(PacketTag::Ack, &[]);
        let _ = self.dispatcher.endpoints.send(self.local.addr, &RemoteEndpoint { addr: self.src }, &frame);
    }

    fn decoding_done(&self) {
        if !self.done.swap(true, Ordering::SeqCst) {
            self.dispatcher.endpoints.release_buffer(self.local);
        }
    }
}
