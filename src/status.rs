//! Status codes surfaced on every [`crate::socket::Socket`] boundary, and the
//! small `WriteArgs`/`WriteResult` envelopes that carry them (spec §3, §7).

/// Outcome of a `Socket::write` or `Socket::on_write_done` call.
///
/// `Busy` is the distinguished "not ready; I will call back" value on both
/// sides of the push-mode duplex contract. Once a side returns anything
/// other than `Ok` or `Busy`, it is closed and must not be written to again.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum Status {
    /// Progress was made; the caller may continue.
    Ok,
    /// Cannot progress right now; the callee will notify via
    /// `on_write_done`/a future `write`.
    Busy,
    /// Application- or peer-initiated abort.
    Cancelled,
    /// Orderly end-of-stream.
    Closed,
    /// Bug in the calling application.
    InvalidArgument,
    /// Bug in the local fibre implementation.
    InternalError,
    /// A remote peer violated the wire contract.
    ProtocolError,
    /// The remote peer can no longer be reached through any known sink.
    HostUnreachable,
    /// A bounded local resource (heap or fixed-capacity pool) was exhausted.
    OutOfMemory,
    /// The decoder needs more bytes before it can make progress.
    InsufficientData,
}

impl Status {
    /// True for `Ok` and `Busy` — the two statuses that permit the
    /// connection to remain open and keep exchanging writes.
    pub fn is_open(self) -> bool {
        matches!(self, Status::Ok | Status::Busy)
    }

    pub fn is_busy(self) -> bool {
        matches!(self, Status::Busy)
    }

    pub fn is_terminal(self) -> bool {
        !self.is_open()
    }
}

use crate::bufchain::{BufChain, ChainCursor};

/// Arguments passed into `Socket::write`.
#[derive(Debug, Clone)]
pub struct WriteArgs<'a> {
    pub buf: BufChain<'a>,
    pub status: Status,
}

impl<'a> WriteArgs<'a> {
    pub fn is_busy(&self) -> bool {
        self.status.is_busy()
    }

    pub fn busy() -> WriteArgs<'static> {
        WriteArgs {
            buf: BufChain::empty(),
            status: Status::Busy,
        }
    }
}

/// Result returned from `Socket::write`, and the argument to
/// `Socket::on_write_done`.
///
/// `end` marks how far into the input `BufChain` the sink was able to
/// consume (spec §3: "a non-empty input must either advance at least one
/// chunk or return status != Ok").
#[derive(Debug, Copy, Clone)]
pub struct WriteResult {
    pub status: Status,
    pub end: ChainCursor,
}

impl WriteResult {
    pub fn is_busy(&self) -> bool {
        self.status.is_busy()
    }

    pub fn busy() -> WriteResult {
        WriteResult {
            status: Status::Busy,
            end: ChainCursor::null(),
        }
    }
}
