//! `BufChain`: an ordered, zero-copy view over a sequence of
//! [`crate::chunk::Chunk`]s (spec §3), grounded in
//! `examples/original_source/cpp/include/fibre/bufchain.hpp`.
//!
//! The C++ original tracks a chain with two raw pointers (`bbegin_`, a byte
//! cursor into the first chunk's buffer, and `begin_`, a chunk cursor) plus an
//! `end_` chunk pointer and an `elevation_`. Rust has no business holding raw
//! pointers into caller-owned memory, so `BufChain` instead borrows a chunk
//! slice and tracks its position as an index into that slice plus a byte
//! offset into the first remaining chunk — same shape, safe representation.

use crate::chunk::Chunk;

/// A position within a `BufChain`'s *original* backing chunk array — the
/// `CBufIt` of the original. Two cursors only compare meaningfully if they
/// were produced from `BufChain`s built over the same backing slice.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ChainCursor {
    chunk_idx: usize,
    byte_offset: usize,
}

impl ChainCursor {
    /// A cursor that never compares equal to any cursor produced by a real
    /// `BufChain` (there is no slice long enough to reach `usize::MAX`
    /// chunks). Used as the "no progress was made" sentinel in
    /// `WriteResult::busy()`.
    pub fn null() -> Self {
        ChainCursor {
            chunk_idx: usize::MAX,
            byte_offset: 0,
        }
    }

    pub fn is_null(&self) -> bool {
        self.chunk_idx == usize::MAX
    }
}

/// An ordered sequence of `Chunk`s, a starting byte offset into the first
/// chunk, and a layer elevation applied to every chunk as it's read out.
///
/// `chunks` is always relative to some backing array; `base` records this
/// chain's position within that array so cursors handed out by `begin()`/
/// `end()` remain meaningful after `skip_chunks`/`skip_bytes` narrow the
/// slice.
#[derive(Debug, Clone)]
pub struct BufChain<'a> {
    base: usize,
    chunks: &'a [Chunk<'a>],
    byte_offset: usize,
    elevation: i8,
}

impl<'a> BufChain<'a> {
    /// Builds a chain over the whole of `chunks`, starting at its first byte.
    pub fn new(chunks: &'a [Chunk<'a>]) -> Self {
        BufChain {
            base: 0,
            chunks,
            byte_offset: 0,
            elevation: 0,
        }
    }

    /// The empty chain: no chunks remain.
    pub fn empty() -> BufChain<'static> {
        BufChain {
            base: 0,
            chunks: &[],
            byte_offset: 0,
            elevation: 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Cursor pointing at the current front of the chain.
    pub fn begin(&self) -> ChainCursor {
        ChainCursor {
            chunk_idx: self.base,
            byte_offset: self.byte_offset,
        }
    }

    /// Cursor pointing just past the last chunk of the chain.
    pub fn end(&self) -> ChainCursor {
        ChainCursor {
            chunk_idx: self.base + self.chunks.len(),
            byte_offset: 0,
        }
    }

    /// Adds `layers` (signed, wrapping) to every chunk's reported layer.
    pub fn elevate(mut self, layers: i8) -> Self {
        self.elevation = self.elevation.wrapping_add(layers);
        self
    }

    /// The first chunk of the chain, with elevation and partial byte
    /// consumption applied. `None` if the chain is empty.
    pub fn front(&self) -> Option<Chunk<'a>> {
        let head = *self.chunks.first()?;
        let head = if head.is_buf() && self.byte_offset > 0 {
            head.with_buf(&head.as_buf()[self.byte_offset..])
        } else {
            head
        };
        Some(head.elevate(self.elevation))
    }

    /// The last chunk of the chain, with elevation applied.
    pub fn back(&self) -> Option<Chunk<'a>> {
        self.chunks.last().map(|c| c.elevate(self.elevation))
    }

    /// Consumes up to `n` bytes from the front of the chain, crossing chunk
    /// boundaries as needed (frame-boundary markers are skipped over as
    /// zero-width). Returns the number of bytes actually consumed, which is
    /// less than `n` only if the chain ran out of data chunks.
    pub fn skip_bytes(&mut self, mut n: usize) -> usize {
        let mut consumed = 0;
        while n > 0 {
            match self.chunks.first() {
                None => break,
                Some(head) if !head.is_buf() => {
                    self.advance_chunk();
                }
                Some(head) => {
                    let remaining = head.as_buf().len() - self.byte_offset;
                    let take = remaining.min(n);
                    self.byte_offset += take;
                    n -= take;
                    consumed += take;
                    if self.byte_offset == head.as_buf().len() {
                        self.advance_chunk();
                    }
                }
            }
        }
        consumed
    }

    /// Drops the first `n` chunks (and their markers) from the chain
    /// wholesale, regardless of how many bytes remain in the first of them.
    pub fn skip_chunks(&mut self, n: usize) {
        let n = n.min(self.chunks.len());
        for _ in 0..n {
            self.advance_chunk();
        }
    }

    fn advance_chunk(&mut self) {
        self.chunks = &self.chunks[1..];
        self.byte_offset = 0;
        self.base += 1;
    }

    /// Returns a sub-chain starting at `cursor`, which must have been
    /// produced from this same backing array (typically via `begin()`/
    /// `end()` on this chain or a chain derived from it).
    pub fn from_cursor(&self, cursor: ChainCursor) -> BufChain<'a> {
        debug_assert!(cursor.chunk_idx >= self.base);
        let skip = cursor.chunk_idx - self.base;
        BufChain {
            base: cursor.chunk_idx,
            chunks: &self.chunks[skip..],
            byte_offset: cursor.byte_offset,
            elevation: self.elevation,
        }
    }

    /// Returns a sub-chain ending at `cursor` (exclusive), truncating this
    /// chain's tail.
    pub fn until_cursor(&self, cursor: ChainCursor) -> BufChain<'a> {
        debug_assert!(cursor.chunk_idx >= self.base);
        let keep = (cursor.chunk_idx - self.base).min(self.chunks.len());
        BufChain {
            base: self.base,
            chunks: &self.chunks[..keep],
            byte_offset: self.byte_offset,
            elevation: self.elevation,
        }
    }

    /// Total number of data bytes remaining in the chain (ignoring frame
    /// boundary markers).
    pub fn byte_len(&self) -> usize {
        self.iter()
            .map(|c| if c.is_buf() { c.as_buf().len() } else { 0 })
            .sum()
    }

    /// Cursor at the first frame-boundary marker whose (elevated) layer is
    /// 0, or `end()` if none is found. Used by `Connection` to locate the
    /// end of the current call's layer-0 frame within a chain.
    pub fn find_layer0_bound(&self) -> ChainCursor {
        self.find_chunk(|c| c.is_frame_boundary() && c.layer() == 0)
    }

    /// Cursor at the first chunk whose own (unelevated) layer is `<= layer`
    /// — the first chunk that does *not* belong to a strictly deeper nested
    /// layer than `layer`.
    pub fn find_chunk_on_layer(&self, layer: u8) -> ChainCursor {
        self.find_chunk(|c| c.layer() <= layer)
    }

    fn find_chunk(&self, pred: impl Fn(Chunk<'a>) -> bool) -> ChainCursor {
        let mut idx = 0;
        for c in self.iter() {
            if pred(c) {
                return ChainCursor {
                    chunk_idx: self.base + idx,
                    byte_offset: if idx == 0 { self.byte_offset } else { 0 },
                };
            }
            idx += 1;
        }
        self.end()
    }

    /// Iterates the remaining chunks of the chain, elevation applied,
    /// without mutating the chain.
    pub fn iter(&self) -> impl Iterator<Item = Chunk<'a>> + '_ {
        let mut first = true;
        self.chunks.iter().map(move |c| {
            let c = if first && c.is_buf() && self.byte_offset > 0 {
                c.with_buf(&c.as_buf()[self.byte_offset..])
            } else {
                *c
            };
            first = false;
            c.elevate(self.elevation)
        })
    }
}

/// Incrementally builds a `BufChain` over caller-owned storage — the
/// `BufChainBuilder` of the original, used to stage a call frame's argument
/// chunks before handing them to a `Socket`.
#[derive(Debug, Default)]
pub struct BufChainBuilder<'a> {
    chunks: Vec<Chunk<'a>>,
}

impl<'a> BufChainBuilder<'a> {
    pub fn new() -> Self {
        BufChainBuilder { chunks: Vec::new() }
    }

    pub fn push_buf(&mut self, layer: u8, buf: &'a [u8]) -> &mut Self {
        self.chunks.push(Chunk::buf(layer, buf));
        self
    }

    pub fn push_frame_boundary(&mut self, layer: u8) -> &mut Self {
        self.chunks.push(Chunk::frame_boundary(layer));
        self
    }

    /// Consumes the builder, leaking the staged chunk list into the returned
    /// chain's lifetime. Callers own the `Vec` returned by `into_chunks()` if
    /// they'd rather not allocate twice; `build()` is a convenience for
    /// tests and one-shot call sites.
    pub fn into_chunks(self) -> Vec<Chunk<'a>> {
        self.chunks
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn front_back_over_two_chunks() {
        let a = [1u8, 2, 3];
        let b = [4u8, 5];
        let chunks = [Chunk::buf(0, &a), Chunk::buf(0, &b)];
        let chain = BufChain::new(&chunks);
        assert_eq!(chain.front().unwrap().as_buf(), &a);
        assert_eq!(chain.back().unwrap().as_buf(), &b);
    }

    #[test]
    fn skip_bytes_crosses_chunk_boundary() {
        let a = [1u8, 2, 3];
        let b = [4u8, 5];
        let chunks = [Chunk::buf(0, &a), Chunk::buf(0, &b)];
        let mut chain = BufChain::new(&chunks);
        let n = chain.skip_bytes(4);
        assert_eq!(n, 4);
        assert_eq!(chain.front().unwrap().as_buf(), &[5]);
    }

    #[test]
    fn skip_bytes_stops_at_frame_boundary_then_continues() {
        let a = [1u8, 2];
        let b = [3u8, 4];
        let chunks = [Chunk::buf(0, &a), Chunk::frame_boundary(1), Chunk::buf(0, &b)];
        let mut chain = BufChain::new(&chunks);
        let n = chain.skip_bytes(3);
        assert_eq!(n, 3);
        assert_eq!(chain.front().unwrap().as_buf(), &[4]);
    }

    #[test]
    fn elevate_shifts_layer() {
        let a = [1u8];
        let chunks = [Chunk::buf(0, &a)];
        let chain = BufChain::new(&chunks).elevate(1);
        assert_eq!(chain.front().unwrap().layer(), 1);
    }

    #[test]
    fn cursor_roundtrip_from_until() {
        let a = [1u8, 2];
        let b = [3u8, 4];
        let chunks = [Chunk::buf(0, &a), Chunk::buf(0, &b)];
        let chain = BufChain::new(&chunks);
        let mid = {
            let mut c = chain.clone();
            c.skip_chunks(1);
            c.begin()
        };
        let tail = chain.from_cursor(mid);
        assert_eq!(tail.front().unwrap().as_buf(), &b);
        let head = chain.until_cursor(mid);
        assert_eq!(head.front().unwrap().as_buf(), &a);
    }

    #[test]
    fn empty_chain_has_no_front() {
        let chain = BufChain::empty();
        assert!(chain.is_empty());
        assert!(chain.front().is_none());
    }
}
