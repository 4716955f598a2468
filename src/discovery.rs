//! Discovery backend interface (spec §6), grounded in
//! `examples/original_source/cpp/include/fibre/channel_discoverer.hpp` and
//! `posix_tcp_backend.hpp`'s `start_channel_discovery`/
//! `stop_channel_discovery` pair.
//!
//! A `Backend` resolves `specs_str` (a `key=value,key=value` blob, e.g.
//! `address=127.0.0.1,port=9910`) into zero or more reachable peers and
//! hands each one to the owning `Domain` as a [`DiscoveredChannel`]. Actual
//! socket/USB/D-Bus plumbing is an external collaborator per spec §1; this
//! module only specifies the interface a concrete backend must present and
//! the small spec parser every backend needs.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::Result;
use crate::event_loop::EventLoop;
use crate::transport::{FrameStreamSink, FrameStreamSource};

/// Whether a discovered channel just appeared or just went away (spec §6:
/// `domain.add_channels({status, ...})`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelStatus {
    Connected,
    Closed,
}

/// One reachable peer channel, handed from a `Backend` to a `Domain` once
/// discovered. `tx`/`rx` are the two halves of the duplex byte-stream
/// abstraction spec §1 says Fibre hides transport differences behind.
pub struct DiscoveredChannel {
    pub status: ChannelStatus,
    pub rx: Arc<dyn FrameStreamSource>,
    pub tx: Arc<dyn FrameStreamSink>,
    pub mtu: usize,
    /// True for transports that frame their own datagrams (UDP, CAN); false
    /// for a raw byte stream (TCP) that needs Fibre's own delimiting.
    pub packetized: bool,
}

/// Opaque handle to one in-flight `start_channel_discovery` call, returned
/// so the caller can later `stop_channel_discovery` the same search. The
/// original identifies a discovery context by raw pointer
/// (`ChannelDiscoveryContext*`); here backends hand out a small integer
/// instead, matching the same "assign an id, don't expose the internal
/// handle" choice `multiplexer.rs` makes for `PipeId`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DiscoveryHandle(u64);

static NEXT_HANDLE: AtomicU64 = AtomicU64::new(0);

impl DiscoveryHandle {
    /// Mints a fresh handle. Exposed to backend implementations so each one
    /// doesn't need its own counter.
    pub fn next() -> Self {
        DiscoveryHandle(NEXT_HANDLE.fetch_add(1, Ordering::Relaxed))
    }
}

/// A pluggable source of reachable peers (spec §6). Implementations live
/// outside this crate's core scope (UDP broadcast, BLE advertisement
/// parsing, a static address list, ...); this trait only specifies the
/// boundary.
#[async_trait]
pub trait Backend: Send + Sync {
    /// One-time setup, handed the `EventLoop` every callback from this
    /// backend must be `post`ed through (spec §5: discovery backends run on
    /// their own OS thread and must marshal notifications onto the
    /// `Domain`'s loop).
    async fn init(&self, event_loop: EventLoop) -> Result<()>;

    async fn deinit(&self) -> Result<()>;

    /// Starts resolving `specs` into channels for `on_channel` to receive.
    /// Returns a handle identifying this search so it can be stopped later.
    /// `on_channel` is called once per discovered/lost channel and must
    /// itself marshal onto the `Domain`'s `EventLoop` if it touches `Domain`
    /// state (this trait doesn't do it automatically, since a backend may
    /// want to batch several discoveries into one `post`).
    async fn start_channel_discovery(
        &self,
        specs: &str,
        on_channel: Arc<dyn Fn(DiscoveredChannel) + Send + Sync>,
    ) -> Result<DiscoveryHandle>;

    async fn stop_channel_discovery(&self, handle: DiscoveryHandle) -> Result<()>;
}

/// Parses a `key=value,key=value` spec string into a lookup table. Neither
/// keys nor values may contain `,` or `=`; a malformed pair (missing `=`)
/// is skipped rather than failing the whole parse, since a backend that
/// only cares about a subset of keys shouldn't be tripped up by an
/// unrelated one it doesn't understand.
pub fn parse_specs(specs: &str) -> HashMap<&str, &str> {
    specs
        .split(',')
        .filter_map(|pair| pair.split_once('='))
        .map(|(k, v)| (k.trim(), v.trim()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_address_and_port() {
        let specs = parse_specs("address=127.0.0.1,port=9910");
        assert_eq!(specs.get("address"), Some(&"127.0.0.1"));
        assert_eq!(specs.get("port"), Some(&"9910"));
    }

    #[test]
    fn skips_malformed_pairs() {
        let specs = parse_specs("address=127.0.0.1,garbage,port=9910");
        assert_eq!(specs.len(), 2);
    }

    #[test]
    fn handles_never_collide() {
        let a = DiscoveryHandle::next();
        let b = DiscoveryHandle::next();
        assert_ne!(a, b);
    }
}
