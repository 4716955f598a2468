//! The `Socket` contract: a push-mode duplex interface every layer of the
//! connection stack speaks (spec §3, §5), grounded in
//! `examples/original_source/cpp/include/fibre/socket.hpp`.
//!
//! Data flows in both directions by the source calling `write` on the sink
//! whenever it has something to send; if the sink can't accept it
//! synchronously it returns `Status::Busy` and later calls the source's
//! `on_write_done` once it can make progress. There is no separate
//! "readable" notification — the direction that wants to move data always
//! initiates.

use crate::status::{WriteArgs, WriteResult};

/// One direction of a duplex frame-stream connection.
///
/// Per the contract carried over from the original: a non-empty `write`
/// must either consume at least one chunk or return a status other than
/// `Ok`; an empty `write` with a non-`Ok` status must itself return a
/// non-`Ok` status; once a `Socket` returns anything other than `Ok`/`Busy`
/// it is closed and must not be written to again.
pub trait Socket {
    fn write(&mut self, args: WriteArgs<'_>) -> WriteResult;
    fn on_write_done(&mut self, result: WriteResult) -> WriteArgs<'static>;
}

/// A component that sits between two `Socket` directions and needs to
/// implement both without conflating "upstream-facing" and
/// "downstream-facing" behavior under one `write`/`on_write_done` pair —
/// the `TwoSidedSocket` of the original. `Connection` is the motivating
/// implementer: its upfacing side talks to the application, its
/// downfacing side talks to the wire.
pub trait TwoSidedSocket {
    fn downstream_write(&mut self, args: WriteArgs<'_>) -> WriteResult;
    fn on_upstream_write_done(&mut self, result: WriteResult) -> WriteArgs<'static>;
    fn upstream_write(&mut self, args: WriteArgs<'_>) -> WriteResult;
    fn on_downstream_write_done(&mut self, result: WriteResult) -> WriteArgs<'static>;
}

/// Presents a `TwoSidedSocket`'s upstream-facing half as a plain `Socket`.
pub struct Upfacing<'a, T: TwoSidedSocket>(pub &'a mut T);

impl<'a, T: TwoSidedSocket> Socket for Upfacing<'a, T> {
    fn write(&mut self, args: WriteArgs<'_>) -> WriteResult {
        self.0.downstream_write(args)
    }

    fn on_write_done(&mut self, result: WriteResult) -> WriteArgs<'static> {
        self.0.on_upstream_write_done(result)
    }
}

/// Presents a `TwoSidedSocket`'s downstream-facing half as a plain `Socket`.
pub struct Downfacing<'a, T: TwoSidedSocket>(pub &'a mut T);

impl<'a, T: TwoSidedSocket> Socket for Downfacing<'a, T> {
    fn write(&mut self, args: WriteArgs<'_>) -> WriteResult {
        self.0.upstream_write(args)
    }

    fn on_write_done(&mut self, result: WriteResult) -> WriteArgs<'static> {
        self.0.on_downstream_write_done(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bufchain::BufChain;
    use crate::status::Status;

    struct Echo;

    impl TwoSidedSocket for Echo {
        fn downstream_write(&mut self, _args: WriteArgs<'_>) -> WriteResult {
            WriteResult {
                status: Status::Ok,
                end: BufChain::empty().end(),
            }
        }
        fn on_upstream_write_done(&mut self, _result: WriteResult) -> WriteArgs<'static> {
            WriteArgs::busy()
        }
        fn upstream_write(&mut self, _args: WriteArgs<'_>) -> WriteResult {
            WriteResult::busy()
        }
        fn on_downstream_write_done(&mut self, _result: WriteResult) -> WriteArgs<'static> {
            WriteArgs::busy()
        }
    }

    #[test]
    fn facades_delegate_to_the_right_half() {
        let mut echo = Echo;
        let mut up = Upfacing(&mut echo);
        let result = up.write(WriteArgs::busy());
        assert_eq!(result.status, Status::Ok);

        let mut echo2 = Echo;
        let mut down = Downfacing(&mut echo2);
        let result = down.write(WriteArgs::busy());
        assert!(result.is_busy());
    }
}
