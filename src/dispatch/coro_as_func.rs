//! `CoroAsFunc`: the client-side inverse of `FuncAsCoro` (spec §4.6).
//! Serializes caller-supplied input buffers into a chunk chain to start a
//! call, then collects the response chunks and reports completion once
//! the response closes.

use crate::bufchain::BufChainBuilder;
use crate::chunk::Chunk;
use crate::status::Status;

use super::MAX_ARGS;

/// Builds the outbound chunk sequence for a call's input arguments: one
/// buffer per argument, each followed by a layer-0 boundary, matching
/// `FuncAsCoro`'s expectation on the receiving end.
pub fn input_chain<'a>(inputs: &[&'a [u8]]) -> Vec<Chunk<'a>> {
    let mut builder = BufChainBuilder::new();
    for buf in inputs.iter().take(MAX_ARGS) {
        if !buf.is_empty() {
            builder.push_buf(0, buf);
        }
        builder.push_frame_boundary(0);
    }
    builder.into_chunks()
}

/// Client-side response collector paired with one in-flight call.
/// `on_response_chunk` is fed every chunk the Connection's RX side
/// delivers for this call; once the response closes, `finished()` reports
/// the collected return values.
pub struct CoroAsFunc {
    scratch: Vec<u8>,
    arg_bounds: Vec<usize>,
    status: Option<Status>,
}

impl CoroAsFunc {
    pub fn new() -> Self {
        CoroAsFunc {
            scratch: Vec::new(),
            arg_bounds: Vec::new(),
            status: None,
        }
    }

    pub fn on_response_chunk(&mut self, chunk: Chunk<'_>) {
        if self.status.is_some() {
            return;
        }
        if chunk.is_frame_boundary() {
            self.arg_bounds.push(self.scratch.len());
        } else {
            self.scratch.extend_from_slice(chunk.as_buf());
        }
    }

    /// Call this once the Connection reports the response direction
    /// closed. Returns the collected output arguments.
    pub fn finish(&mut self, status: Status) -> Vec<&[u8]> {
        if self.arg_bounds.last() != Some(&self.scratch.len()) && !self.scratch.is_empty() {
            self.arg_bounds.push(self.scratch.len());
        }
        self.status = Some(status);
        let mut out = Vec::with_capacity(self.arg_bounds.len());
        let mut start = 0;
        for &end in &self.arg_bounds {
            out.push(&self.scratch[start..end]);
            start = end;
        }
        out
    }

    pub fn is_finished(&self) -> bool {
        self.status.is_some()
    }
}

impl Default for CoroAsFunc {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn input_chain_separates_args_with_boundaries() {
        let a = b"one";
        let b = b"two";
        let chunks = input_chain(&[&a[..], &b[..]]);
        let boundaries = chunks.iter().filter(|c| c.is_frame_boundary()).count();
        assert_eq!(boundaries, 2);
    }

    #[test]
    fn response_collector_splits_on_boundaries() {
        let mut coro = CoroAsFunc::new();
        let a = b"abc";
        coro.on_response_chunk(Chunk::buf(0, &a[..]));
        coro.on_response_chunk(Chunk::frame_boundary(0));
        let b = b"xyz";
        coro.on_response_chunk(Chunk::buf(0, &b[..]));
        coro.on_response_chunk(Chunk::frame_boundary(0));
        let outputs = coro.finish(Status::Closed);
        assert_eq!(outputs, vec![&a[..], &b[..]]);
        assert!(coro.is_finished());
    }
}
