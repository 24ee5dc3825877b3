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

//! The endpoint/transport layer (§4.1): local and remote address pools,
//! filter-mediated delivery, and the backpressure that keeps the number of
//! simultaneously in-flight outbound commands bounded by the peer's worker
//! count.
//!
//! `dualrpc-core` owns packet semantics (what a `CMD`/`RSP`/`ACK` tag means);
//! this crate only knows about two address bytes and an opaque payload, the
//! same separation `nrf_rpc_rpmsg.c` draws against `nrf_rpc_dispatcher.c`.

mod local;
mod remote;
mod transport;

pub use local::{FilterCode, LocalEndpoint, LocalTable, Received, NOT_FILTERED};
pub use remote::{RemoteEndpoint, RemotePool};
pub use transport::{Transport, TransportError};

use std::sync::Arc;

/// The reserved destination/source address meaning "no endpoint" (§3
/// invariant, §6 "Wire frame").
pub const NULL_ENDPOINT: u8 = 0x7F;

/// Reserved filter codes the dispatcher uses to short-circuit a matching
/// `RSP`/`ACK` straight into the waiting thread (§4.1).
pub const FILTERED_RESPONSE: FilterCode = 1;
pub const FILTERED_ACK: FilterCode = 2;
/// §11.2: short-circuits an `ERR` packet straight into whichever wait loop
/// (`RSP` or `ACK`) is currently blocked on this endpoint.
pub const FILTERED_ERR: FilterCode = 3;

/// Runtime sizing for the endpoint layer (part of `dualrpc-core`'s
/// `DispatcherConfig`, §10.3; kept here too since `EndpointLayer` can be
/// exercised on its own in tests without the dispatcher).
#[derive(Debug, Clone, Copy)]
pub struct EndpointConfig {
    pub pool_size: usize,
    pub extra_endpoints: usize,
    pub remote_pool_size: usize,
}

/// Ties a `Transport` to the local/remote address pools and the
/// user-supplied filter (§4.1). One instance per side.
pub struct EndpointLayer<T: Transport> {
    local: LocalTable,
    remote: RemotePool,
    transport: T,
}

impl<T: Transport> EndpointLayer<T> {
    pub fn new(transport: T, config: EndpointConfig) -> Self {
        Self {
            local: LocalTable::new(config.pool_size, config.extra_endpoints),
            remote: RemotePool::new(config.remote_pool_size),
            transport,
        }
    }

    pub fn local_table(&self) -> &LocalTable { &self.local }

    pub fn remote_pool(&self) -> &RemotePool { &self.remote }

    /// Wires the transport's frame callback to address lookup + filter +
    /// delivery (§4.1 "On every arriving frame..."), then blocks until the
    /// transport reports the peer connected (§4.5 "Transport connect never
    /// completes").
    ///
    /// `filter(dst, src, payload) -> FilterCode` inspects the frame (the
    /// dispatcher reads the first payload byte as the packet-type tag) and
    /// returns `NOT_FILTERED`, `FILTERED_RESPONSE`, or `FILTERED_ACK`.
    pub fn init<F>(self: &Arc<Self>, filter: F)
    where
        F: Fn(u8, u8, &[u8]) -> FilterCode + Send + Sync + 'static,
    {
        let this = Arc::clone(self);
        self.transport.init(Box::new(move |frame| {
            if frame.len() < 2 {
                log::error!("dualrpc: dropped frame shorter than the address header ({} bytes)", frame.len());
                return;
            }
            let dst = frame[0];
            let src = frame[1];
            let payload = &frame[2..];

            if dst as usize >= this.local.len() {
                log::error!("dualrpc: dropped frame addressed to unknown local endpoint {dst}");
                return;
            }

            let code = filter(dst, src, payload);
            log::trace!("dualrpc: frame dst={dst} src={src} len={} filter={code}", payload.len());
            this.local.get(dst as usize).unwrap().deliver(src, payload.to_vec(), code);
        }));
    }

    /// Frames `[dst][src][payload...]` and hands it to the transport.
    pub fn send(&self, src_local: u8, dst_remote: &RemoteEndpoint, payload: &[u8]) -> Result<(), TransportError> {
        let mut frame = Vec::with_capacity(2 + payload.len());
        frame.push(dst_remote.addr);
        frame.push(src_local);
        frame.extend_from_slice(payload);
        log::trace!("dualrpc: send dst={} src={src_local} len={}", dst_remote.addr, payload.len());
        self.transport.send(&frame)
    }

    pub fn read(&self, local: &LocalEndpoint) -> Received { local.read() }

    pub fn release_buffer(&self, local: &LocalEndpoint) { local.release_buffer(); }

    pub fn reserve_remote(&self) -> RemoteEndpoint {
        let ep = self.remote.reserve();
        log::debug!("dualrpc: reserved remote endpoint {}", ep.addr);
        ep
    }

    pub fn release_remote(&self, ep: RemoteEndpoint) {
        log::debug!("dualrpc: released remote endpoint {}", ep.addr);
        self.remote.release(ep);
    }

    pub fn current_local(&self) -> &LocalEndpoint { self.local.current_local() }

    pub fn bind_pool_worker(&self, index: usize) { self.local.bind_pool_worker(index); }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex as StdMutex;
    use std::thread;
    use std::time::Duration;

    /// An in-process loopback transport: `send` hands the frame straight to
    /// whichever `on_frame` callback the *other* layer registered.
    struct Loopback {
        peer: StdMutex<Option<Box<dyn Fn(&[u8]) + Send + Sync>>>,
    }

    impl Loopback {
        fn new() -> Arc<Self> { Arc::new(Self { peer: StdMutex::new(None) }) }
    }

    impl Transport for Arc<Loopback> {
        fn init(&self, on_frame: Box<dyn Fn(&[u8]) + Send + Sync>) {
            *self.peer.lock().unwrap() = Some(on_frame);
        }

        fn send(&self, frame: &[u8]) -> Result<(), TransportError> {
            if let Some(cb) = self.peer.lock().unwrap().as_ref() {
                cb(frame);
            }
            Ok(())
        }
    }

    #[test]
    fn send_then_read_round_trips_through_loopback() {
        let transport = Loopback::new();
        let config = EndpointConfig { pool_size: 1, extra_endpoints: 1, remote_pool_size: 1 };
        let layer = Arc::new(EndpointLayer::new(transport, config));
        layer.init(|_dst, _src, _payload| NOT_FILTERED);

        let remote = layer.reserve_remote();
        layer.send(0, &remote, b"hello").unwrap();

        let local = layer.local_table().get(0).unwrap();
        match layer.read(local) {
            Received::Data { src, bytes } => {
                assert_eq!(src, 0);
                assert_eq!(bytes, b"hello");
            }
            Received::Filtered(_) => panic!("expected data"),
        }
        layer.release_buffer(local);
        layer.release_remote(remote);
    }

    #[test]
    fn filter_short_circuits_without_touching_local_read() {
        let transport = Loopback::new();
        let config = EndpointConfig { pool_size: 1, extra_endpoints: 0, remote_pool_size: 1 };
        let layer = Arc::new(EndpointLayer::new(transport, config));
        layer.init(|_dst, _src, payload| if payload.first() == Some(&0xFF) { FILTERED_RESPONSE } else { NOT_FILTERED });

        let remote = layer.reserve_remote();
        layer.send(0, &remote, &[0xFF, 0x01]).unwrap();

        let local = layer.local_table().get(0).unwrap();
        match layer.read(local) {
            Received::Filtered(code) => assert_eq!(code, FILTERED_RESPONSE),
            Received::Data { .. } => panic!("expected filtered"),
        }
        layer.release_remote(remote);
    }

    #[test]
    fn reserve_remote_blocks_past_pool_size() {
        let transport = Loopback::new();
        let config = EndpointConfig { pool_size: 1, extra_endpoints: 0, remote_pool_size: 1 };
        let layer = Arc::new(EndpointLayer::new(transport, config));
        layer.init(|_, _, _| NOT_FILTERED);

        let first = layer.reserve_remote();
        let layer2 = Arc::clone(&layer);
        let unblocked = Arc::new(AtomicUsize::new(0));
        let unblocked2 = Arc::clone(&unblocked);
        let handle = thread::spawn(move || {
            let ep = layer2.reserve_remote();
            unblocked2.store(1, Ordering::SeqCst);
            ep
        });

        thread::sleep(Duration::from_millis(20));
        assert_eq!(unblocked.load(Ordering::SeqCst), 0);
        layer.release_remote(first);
        let second = handle.join().unwrap();
        layer.release_remote(second);
    }
}
