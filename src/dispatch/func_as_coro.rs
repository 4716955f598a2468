//! `FuncAsCoro`: wraps a synchronous [`NativeFunction`] as a [`Socket`]
//! (spec §4.6). The `ArgCollector` half lives in `Socket::write`; once the
//! caller closes the input direction the function runs synchronously and
//! its output is buffered for the caller to pull with [`FuncAsCoro::take_output`].

use std::sync::Arc;

use crate::bufchain::BufChainBuilder;
use crate::chunk::Chunk;
use crate::socket::Socket;
use crate::status::{Status, WriteArgs, WriteResult};

use super::{NativeFunction, MAX_ARGS};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    CollectingArgs,
    Done,
}

/// Server-side call adaptor: collects input-arg chunks, invokes the
/// wrapped function once the caller closes the input, and buffers the
/// result for pickup.
///
/// Holds the function as `Arc<dyn NativeFunction>` rather than a generic
/// parameter: a Connection's endpoint table maps many different
/// `endpoint_id`s to different concrete functions, so `FuncAsCoro` itself
/// needs to be a single concrete type the Connection can store regardless
/// of which function a given call dispatches to.
pub struct FuncAsCoro {
    func: Arc<dyn NativeFunction>,
    scratch: Vec<u8>,
    arg_bounds: Vec<usize>,
    outputs: Option<(Status, Vec<Vec<u8>>)>,
    phase: Phase,
    /// Upper bound on `scratch`'s total size across every `write` call
    /// (spec §4.6: "Out-of-memory... payload larger than scratch buf",
    /// matching the original's fixed-size `call_frame`).
    max_payload_bytes: usize,
}

impl FuncAsCoro {
    pub fn new(func: Arc<dyn NativeFunction>, max_payload_bytes: usize) -> Self {
        FuncAsCoro {
            func,
            scratch: Vec::new(),
            arg_bounds: Vec::new(),
            outputs: None,
            phase: Phase::CollectingArgs,
            max_payload_bytes,
        }
    }

    /// True once the function has run and its output is ready to be
    /// drained by the caller's serialization path.
    pub fn has_output(&self) -> bool {
        self.outputs.is_some()
    }

    /// Builds the return-arg chunk sequence: one buffer per output
    /// argument, each followed by a layer-0 boundary (spec §4.6:
    /// "output args... handed to an ArgEmitter... streams output-arg
    /// buffers back... separated by layer-0 boundaries").
    pub fn take_output(&mut self) -> Option<(Status, Vec<Chunk<'_>>)> {
        let (status, outputs) = self.outputs.as_ref()?;
        let status = *status;
        let mut builder = BufChainBuilder::new();
        for out in outputs {
            if !out.is_empty() {
                builder.push_buf(0, out);
            }
            builder.push_frame_boundary(0);
        }
        Some((status, builder.into_chunks()))
    }

    fn invoke(&mut self) {
        let mut start = 0;
        let mut input_slices: Vec<&[u8]> = Vec::with_capacity(self.arg_bounds.len());
        for &end in &self.arg_bounds {
            input_slices.push(&self.scratch[start..end]);
            start = end;
        }
        let mut outputs = Vec::new();
        let status = self.func.call(&input_slices, &mut outputs);
        self.outputs = Some((status, outputs));
        self.phase = Phase::Done;
    }
}

impl Socket for FuncAsCoro {
    fn write(&mut self, args: WriteArgs<'_>) -> WriteResult {
        if self.phase == Phase::Done {
            return WriteResult {
                status: Status::Closed,
                end: args.buf.begin(),
            };
        }

        let mut chain = args.buf.clone();
        while let Some(chunk) = chain.front() {
            if chunk.is_frame_boundary() {
                if self.arg_bounds.len() >= MAX_ARGS {
                    return WriteResult {
                        status: Status::OutOfMemory,
                        end: chain.begin(),
                    };
                }
                self.arg_bounds.push(self.scratch.len());
                chain.skip_chunks(1);
                continue;
            }
            let buf = chunk.as_buf();
            if self.scratch.len() + buf.len() > self.max_payload_bytes {
                return WriteResult {
                    status: Status::OutOfMemory,
                    end: chain.begin(),
                };
            }
            self.scratch.extend_from_slice(buf);
            chain.skip_bytes(buf.len());
        }

        let end = args.buf.end();
        if args.status == Status::Closed {
            if self.arg_bounds.last() != Some(&self.scratch.len()) {
                self.arg_bounds.push(self.scratch.len());
            }
            self.invoke();
            return WriteResult {
                status: Status::Ok,
                end,
            };
        }
        WriteResult {
            status: Status::Ok,
            end,
        }
    }

    fn on_write_done(&mut self, _result: WriteResult) -> WriteArgs<'static> {
        WriteArgs::busy()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bufchain::BufChain;

    fn echo_fn(inputs: &[&[u8]], outputs: &mut Vec<Vec<u8>>) -> Status {
        for i in inputs {
            outputs.push(i.to_vec());
        }
        Status::Ok
    }

    #[test]
    fn collects_args_and_invokes_on_close() {
        let mut coro = FuncAsCoro::new(Arc::new(echo_fn), 512);
        let data = b"hello";
        let chunks = [Chunk::buf(0, &data[..]), Chunk::frame_boundary(0)];
        let chain = BufChain::new(&chunks);
        let result = coro.write(WriteArgs {
            buf: chain,
            status: Status::Closed,
        });
        assert_eq!(result.status, Status::Ok);
        assert!(coro.has_output());
        let (status, chunks) = coro.take_output().unwrap();
        assert_eq!(status, Status::Ok);
        assert!(chunks.iter().any(|c| c.is_buf() && c.as_buf() == b"hello"));
    }

    #[test]
    fn rejects_writes_after_close() {
        let mut coro = FuncAsCoro::new(Arc::new(echo_fn), 512);
        let chunks: [Chunk; 0] = [];
        let chain = BufChain::new(&chunks);
        coro.write(WriteArgs {
            buf: chain.clone(),
            status: Status::Closed,
        });
        let result = coro.write(WriteArgs {
            buf: chain,
            status: Status::Ok,
        });
        assert_eq!(result.status, Status::Closed);
    }
}
