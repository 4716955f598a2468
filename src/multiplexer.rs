//! `Multiplexer`: arbitrates multiple ready `TxPipe`s onto one
//! `FrameStreamSink` in FIFO order with fair round-robin release (spec
//! §4.5), grounded in
//! `examples/original_source/cpp/include/fibre/multiplexer.hpp` and
//! `multiplexer.cpp`.

use std::collections::VecDeque;
use std::sync::Arc;

use crate::transport::{FrameStreamSink, TxPipe};
use tracing::{debug, warn};

/// Opaque handle identifying a pipe registered with a `Multiplexer`. The
/// original identifies pipes by raw pointer; here the Multiplexer assigns
/// a small integer on `add_source` instead, since pipes are owned
/// elsewhere (typically inside a `Connection`'s `ConnectionOutputSlot`
/// pool) and the Multiplexer only ever needs to refer back to them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PipeId(u64);

struct Slot {
    id: PipeId,
    pipe: Box<dyn TxPipe>,
}

/// Per-sink fair dispatcher. Exactly one pipe is ever "sending" at a time;
/// everyone else waits in `queue_`.
pub struct Multiplexer {
    sink: Arc<dyn FrameStreamSink>,
    queue: VecDeque<Slot>,
    sending: Option<Slot>,
    next_id: u64,
    mtu_packet: Vec<u8>,
}

impl Multiplexer {
    pub fn new(sink: Arc<dyn FrameStreamSink>) -> Self {
        let mtu = sink.mtu();
        Multiplexer {
            sink,
            queue: VecDeque::new(),
            sending: None,
            next_id: 0,
            mtu_packet: vec![0u8; mtu],
        }
    }

    /// Registers a pipe with data ready to send, assigning it a
    /// `PipeId`. If nothing is currently sending, dispatch starts
    /// immediately.
    pub async fn add_source(&mut self, pipe: Box<dyn TxPipe>) -> PipeId {
        let id = PipeId(self.next_id);
        self.next_id += 1;
        let slot = Slot { id, pipe };
        if self.sending.is_some() {
            self.queue.push_back(slot);
        } else {
            self.send_next(slot).await;
        }
        id
    }

    /// Removes `id` from consideration, cancelling its write if it is the
    /// one currently in flight.
    pub async fn remove_source(&mut self, id: PipeId) {
        if self.sending.as_ref().map(|s| s.id) == Some(id) {
            self.sink.cancel_write();
            self.sending = None;
            self.maybe_send_next().await;
        } else if let Some(pos) = self.queue.iter().position(|s| s.id == id) {
            self.queue.remove(pos);
        } else {
            warn!(?id, "remove_source: unknown pipe id");
        }
    }

    async fn maybe_send_next(&mut self) {
        if let Some(slot) = self.queue.pop_front() {
            self.send_next(slot).await;
        } else {
            self.sending = None;
        }
    }

    async fn send_next(&mut self, mut slot: Slot) {
        let n = slot.pipe.pack_next(&mut self.mtu_packet);
        let id = slot.id;
        self.sending = Some(slot);
        debug!(?id, bytes = n, "multiplexer: dispatching packet");
        match self.sink.start_write(&self.mtu_packet[..n]).await {
            Ok(()) => self.on_sent(id).await,
            Err(e) => {
                warn!(?id, error = %e, "multiplexer: sink write failed");
                self.on_cancelled(id);
            }
        }
    }

    /// Called once the sink confirms the in-flight write completed. If the
    /// pipe still has more data it re-enqueues at the tail (fairness: every
    /// enqueued pipe is drained at least once before any pipe a second
    /// time); otherwise it is dropped from active rotation.
    async fn on_sent(&mut self, id: PipeId) {
        if let Some(mut slot) = self.sending.take() {
            debug_assert_eq!(slot.id, id);
            if slot.pipe.has_data() {
                self.queue.push_back(slot);
            }
        }
        self.maybe_send_next().await;
    }

    fn on_cancelled(&mut self, id: PipeId) {
        if let Some(slot) = &self.sending {
            debug_assert_eq!(slot.id, id);
        }
        self.sending = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct FakeSink {
        sent: Mutex<Vec<Vec<u8>>>,
    }

    #[async_trait::async_trait]
    impl FrameStreamSink for FakeSink {
        async fn start_write(&self, packet: &[u8]) -> crate::error::Result<()> {
            self.sent.lock().unwrap().push(packet.to_vec());
            Ok(())
        }
        fn mtu(&self) -> usize {
            64
        }
    }

    struct OneShotPipe {
        payload: Vec<u8>,
        sent: bool,
    }

    impl TxPipe for OneShotPipe {
        fn has_data(&self) -> bool {
            !self.sent
        }
        fn pack_next(&mut self, packet: &mut [u8]) -> usize {
            if self.sent {
                return 0;
            }
            let n = self.payload.len().min(packet.len());
            packet[..n].copy_from_slice(&self.payload[..n]);
            self.sent = true;
            n
        }
    }

    #[tokio::test]
    async fn single_pipe_round_trip() {
        let sink = Arc::new(FakeSink { sent: Mutex::new(Vec::new()) });
        let mut mux = Multiplexer::new(sink.clone());
        let pipe = Box::new(OneShotPipe { payload: vec![1, 2, 3], sent: false });
        mux.add_source(pipe).await;
        assert_eq!(sink.sent.lock().unwrap().len(), 1);
        assert_eq!(sink.sent.lock().unwrap()[0], vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn second_source_queues_until_first_completes() {
        let sink = Arc::new(FakeSink { sent: Mutex::new(Vec::new()) });
        let mut mux = Multiplexer::new(sink.clone());
        let a = Box::new(OneShotPipe { payload: vec![1], sent: false });
        let b = Box::new(OneShotPipe { payload: vec![2], sent: false });
        mux.add_source(a).await;
        mux.add_source(b).await;
        let sent = sink.sent.lock().unwrap();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0], vec![1]);
        assert_eq!(sent[1], vec![2]);
    }
}
