//! `EventLoop`: the single-threaded cooperative scheduler a `Domain` and
//! everything it owns runs on (spec §5), built on `tokio::runtime` the way
//! the teacher crate's `async_runtime::tokio` wraps a `Runtime` behind a
//! tiny `init` function.
//!
//! spec §5 requires that a Domain's Connections, Fifos and slot pools never
//! be touched from more than one thread, and that `post(cb)` be the only
//! thread-safe primitive for getting a closure onto that thread. Tokio
//! itself is multi-threaded, so `EventLoop` pins all posted work onto a
//! single `tokio::task` reading from an unbounded channel, giving the
//! single-writer semantics the spec calls for while still running inside a
//! normal multi-threaded tokio runtime in production.

use crate::error::{Error, ErrorKind, Result, ResultWrappedExt};
use tokio::sync::mpsc;

type BoxedFnOnce = Box<dyn FnOnce() + Send + 'static>;

/// A handle that can marshal a closure onto the EventLoop's single
/// logical thread from any other thread (the mechanism discovery backends
/// and platform I/O callbacks are required to use per spec §5).
#[derive(Clone)]
pub struct EventLoop {
    sender: mpsc::UnboundedSender<BoxedFnOnce>,
}

impl EventLoop {
    /// Spawns the loop's pump task onto `runtime` and returns a handle to
    /// it. The pump task runs until every `EventLoop` clone is dropped.
    pub fn spawn(runtime: &tokio::runtime::Handle) -> EventLoop {
        let (sender, mut receiver) = mpsc::unbounded_channel::<BoxedFnOnce>();
        runtime.spawn(async move {
            while let Some(job) = receiver.recv().await {
                job();
            }
        });
        EventLoop { sender }
    }

    /// Posts a closure to run on the EventLoop's single logical thread.
    /// The only thread-safe primitive in the whole stack; everything else
    /// (Connection, Fifo, Multiplexer, Domain) assumes single-threaded
    /// access and must only be reached through this.
    pub fn post(&self, job: impl FnOnce() + Send + 'static) -> Result<()> {
        self.sender
            .send(Box::new(job))
            .map_err(|_| Error::simple(ErrorKind::Other))
    }
}

/// Builds a dedicated multi-threaded tokio runtime, matching the teacher
/// crate's `async_runtime::tokio::init`.
pub fn init_runtime(num_threads: usize) -> Result<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(num_threads)
        .thread_name("fibre-worker")
        .enable_all()
        .build()
        .wrapped(ErrorKind::Other)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn post_runs_on_the_loop() {
        let rt = init_runtime(1).unwrap();
        let event_loop = EventLoop::spawn(rt.handle());
        let (tx, rx) = std::sync::mpsc::channel();
        event_loop.post(move || tx.send(42).unwrap()).unwrap();
        assert_eq!(rx.recv_timeout(std::time::Duration::from_secs(1)).unwrap(), 42);
    }
}
