//! `FrameStreamSink`: the outbound transport boundary every concrete
//! transport (UDP, TCP, USB bulk, CAN, BLE GATT) presents (spec §6).
//!
//! Grounded in `other_examples/`'s socket-trait shapes (e.g. `gnet`'s
//! `Context`) rather than a literal port, since the teacher crate has no
//! pluggable-transport trait of its own to imitate: `bafomet` only ever
//! talks to one concrete `async_std_tcp` socket. `async-trait` is used the
//! way it would be needed here regardless of which teacher module it's
//! modeled on, since a plain `dyn Trait` can't return an `async fn`.
//!
//! Packing (`crate::protocol::pack`) happens on the near side of this
//! boundary, inside `TxPipe::pack_next` — see `DESIGN.md` for why this
//! collapses the original's separate `get_task`/`pack`/`release_task`
//! sequence into one call. `FrameStreamSink` therefore only ever sees
//! fully-owned packet bytes, never a chunk chain, which sidesteps lifetime
//! issues a borrowed chunk chain would otherwise have to survive across an
//! `await` point.

use async_trait::async_trait;

use crate::error::Result;

/// The outbound half of a transport. One `FrameStreamSink` backs one
/// `Multiplexer`.
#[async_trait]
pub trait FrameStreamSink: Send + Sync {
    /// Sends one packet. For non-stream transports (UDP, CAN) this maps to
    /// exactly one datagram/frame; for a stream transport the sink is
    /// responsible for its own inter-packet delimiting.
    async fn start_write(&self, packet: &[u8]) -> Result<()>;

    /// Aborts an in-flight write, if any. A no-op default for sinks with
    /// nothing cancellable to abort (e.g. connectionless datagram sends
    /// that already completed synchronously).
    fn cancel_write(&self) {}

    /// Maximum bytes `pack` may use per packet.
    fn mtu(&self) -> usize;
}

/// A source of outbound data multiplexed onto one `FrameStreamSink` — the
/// `TxPipe` of the original. `ConnectionOutputSlot` is the only
/// implementer in this crate.
pub trait TxPipe: Send {
    /// True if this pipe has at least one chunk ready to send.
    fn has_data(&self) -> bool;

    /// Packs the next outbound packet for this pipe into `packet`,
    /// returning the number of bytes written (0 if nothing could be
    /// packed, e.g. the pipe has no data or `packet` is too small for even
    /// the header).
    fn pack_next(&mut self, packet: &mut [u8]) -> usize;
}

/// The inbound half of a transport: the "invokes an inbound callback with
/// (cbufptr_t packet)" side of spec §6's transport boundary. Modeled as a
/// pull interface rather than a push callback so a `Domain`'s I/O pump can
/// `await` it directly on the owning `EventLoop`, the same shape
/// `FrameStreamSink::start_write` already uses for the outbound half.
#[async_trait]
pub trait FrameStreamSource: Send + Sync {
    /// Blocks until one packet is available, or the source is closed. A
    /// packetized source (UDP, CAN) yields exactly one datagram/frame per
    /// call; a stream source (TCP) is responsible for its own inter-packet
    /// delimiting before handing bytes back here.
    async fn recv(&self, buf: &mut Vec<u8>) -> Result<bool>;
}
