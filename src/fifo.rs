//! `Fifo`: the fixed-capacity byte ring behind a `Connection`'s RX/TX
//! queues (spec §4.2), grounded in
//! `examples/original_source/cpp/include/fibre/connection.hpp`'s `Fifo`.
//!
//! The original indexes its 256-byte ring with a wrapping `uint8_t`
//! (`TIndex`) and layers frame-boundary bookkeeping on top via
//! `ReadIterator`/`ConnectionPos`. Rust's checked arithmetic makes a
//! wrapping `u8` index error-prone to reason about, so this Fifo instead
//! keeps two monotonically increasing `u64` logical offsets (`tail`, `head`)
//! and derives the ring index with `% CAPACITY` at the point of use — same
//! fixed-capacity ring, a cursor representation that can't silently alias
//! across a wraparound.

use crate::chunk::Chunk;

/// Ring capacity in bytes, matching the original's `uint8_t buf_[256]`.
pub const CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy)]
struct Boundary {
    seq: u64,
    offset: u64,
    layer: u8,
}

/// A position within a `Fifo`'s logical byte stream — the `ReadIterator` of
/// the original. Cursors from different `Fifo`s are not comparable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadCursor {
    byte_offset: u64,
    boundary_seq: u64,
}

impl ReadCursor {
    pub fn byte_offset(&self) -> u64 {
        self.byte_offset
    }
}

/// A fixed-capacity byte ring with interleaved frame-boundary markers.
/// `Connection` keeps one for its RX direction and one for TX.
pub struct Fifo {
    buf: Box<[u8; CAPACITY]>,
    tail: u64,
    head: u64,
    next_seq: u64,
    consumed_boundary_seq: u64,
    boundaries: std::collections::VecDeque<Boundary>,
}

impl Default for Fifo {
    fn default() -> Self {
        Fifo::new()
    }
}

impl Fifo {
    pub fn new() -> Self {
        Fifo {
            buf: Box::new([0u8; CAPACITY]),
            tail: 0,
            head: 0,
            next_seq: 0,
            consumed_boundary_seq: 0,
            boundaries: std::collections::VecDeque::new(),
        }
    }

    /// Bytes currently retained (between the last `drop_until`/`consume`
    /// point and the write head).
    pub fn len(&self) -> usize {
        (self.head - self.tail) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.head == self.tail && self.boundaries.is_empty()
    }

    /// Free space left in the ring.
    pub fn free_space(&self) -> usize {
        CAPACITY - self.len()
    }

    /// Cursor at the oldest retained byte.
    pub fn read_begin(&self) -> ReadCursor {
        ReadCursor {
            byte_offset: self.tail,
            boundary_seq: self.consumed_boundary_seq,
        }
    }

    /// Cursor just past the write head.
    pub fn read_end(&self) -> ReadCursor {
        ReadCursor {
            byte_offset: self.head,
            boundary_seq: self.next_seq,
        }
    }

    /// True if any data or frame boundary lies at or after `read_begin()`.
    pub fn has_data(&self) -> bool {
        !self.is_empty()
    }

    /// Copies chunks from `chain` into the ring starting at the write head.
    /// Returns the cursor marking how far into `chain` it got, in case the
    /// ring filled up before the whole chain was appended (spec §4.2: a
    /// `Fifo` never blocks, it reports partial progress).
    pub fn append(&mut self, chain: &crate::bufchain::BufChain<'_>) -> crate::bufchain::ChainCursor {
        let mut chain = chain.clone();
        loop {
            let Some(chunk) = chain.front() else {
                return chain.end();
            };
            if chunk.is_frame_boundary() {
                self.boundaries.push_back(Boundary {
                    seq: self.next_seq,
                    offset: self.head,
                    layer: chunk.layer(),
                });
                self.next_seq += 1;
                chain.skip_chunks(1);
                continue;
            }
            let data = chunk.as_buf();
            if data.is_empty() {
                chain.skip_chunks(1);
                continue;
            }
            if self.free_space() == 0 {
                return chain.begin();
            }
            let take = data.len().min(self.free_space());
            for (i, byte) in data[..take].iter().enumerate() {
                let idx = ((self.head + i as u64) % CAPACITY as u64) as usize;
                self.buf[idx] = *byte;
            }
            self.head += take as u64;
            if take < data.len() {
                chain.skip_bytes(take);
                return chain.begin();
            }
            chain.skip_bytes(take);
        }
    }

    /// Materializes up to `limit` chunks starting at `cursor`, borrowing
    /// directly from the ring (no copy). A chunk never straddles a ring
    /// wraparound, so a single logical run of bytes can surface as two
    /// chunks if it crosses the end of `buf`.
    pub fn read<'a>(&'a self, mut cursor: ReadCursor, out: &mut Vec<Chunk<'a>>, limit: usize) -> ReadCursor {
        while out.len() < limit && cursor.byte_offset <= self.head {
            if let Some(b) = self
                .boundaries
                .iter()
                .find(|b| b.seq > cursor.boundary_seq && b.offset == cursor.byte_offset)
            {
                out.push(Chunk::frame_boundary(b.layer));
                cursor.boundary_seq = b.seq;
                continue;
            }
            if cursor.byte_offset >= self.head {
                break;
            }
            let next_boundary = self
                .boundaries
                .iter()
                .filter(|b| b.seq > cursor.boundary_seq && b.offset > cursor.byte_offset)
                .map(|b| b.offset)
                .min()
                .unwrap_or(self.head);
            let run_end = next_boundary.min(self.head);
            let start_idx = (cursor.byte_offset % CAPACITY as u64) as usize;
            let contiguous = CAPACITY - start_idx;
            let run_len = ((run_end - cursor.byte_offset) as usize).min(contiguous);
            if run_len == 0 {
                break;
            }
            out.push(Chunk::buf(0, &self.buf[start_idx..start_idx + run_len]));
            cursor.byte_offset += run_len as u64;
        }
        cursor
    }

    /// Advances `cursor` by `n` data bytes, transparently passing over any
    /// frame boundaries in between (their count is reported back so a
    /// caller tracking per-layer frame IDs, e.g. `ConnectionPos`, can update
    /// its own bookkeeping).
    pub fn advance_it(&self, mut cursor: ReadCursor, n: usize) -> (ReadCursor, usize) {
        let mut remaining = n as u64;
        let mut boundaries_crossed = 0;
        while remaining > 0 && cursor.byte_offset < self.head {
            if let Some(b) = self
                .boundaries
                .iter()
                .find(|b| b.seq > cursor.boundary_seq && b.offset == cursor.byte_offset)
            {
                cursor.boundary_seq = b.seq;
                boundaries_crossed += 1;
                continue;
            }
            let next_boundary = self
                .boundaries
                .iter()
                .filter(|b| b.seq > cursor.boundary_seq && b.offset > cursor.byte_offset)
                .map(|b| b.offset)
                .min()
                .unwrap_or(self.head);
            let run_end = next_boundary.min(self.head);
            let step = remaining.min(run_end - cursor.byte_offset);
            if step == 0 {
                break;
            }
            cursor.byte_offset += step;
            remaining -= step;
        }
        (cursor, boundaries_crossed)
    }

    /// Drops all retained bytes and boundaries up to `cursor`, freeing ring
    /// space. `cursor` must be at or after the current `read_begin()`.
    pub fn drop_until(&mut self, cursor: ReadCursor) {
        debug_assert!(cursor.byte_offset >= self.tail);
        self.tail = cursor.byte_offset;
        self.consumed_boundary_seq = self.consumed_boundary_seq.max(cursor.boundary_seq);
        while let Some(b) = self.boundaries.front() {
            if b.seq <= self.consumed_boundary_seq {
                self.boundaries.pop_front();
            } else {
                break;
            }
        }
    }

    /// Drops the first `n_chunks` logical chunks (data runs or boundaries)
    /// from the front, as read by `read_begin()`. Kept for call sites that
    /// consume by chunk count rather than by cursor.
    pub fn consume(&mut self, n_chunks: usize) {
        let begin = self.read_begin();
        let mut out = Vec::with_capacity(n_chunks);
        let end = self.read(begin, &mut out, n_chunks);
        self.drop_until(end);
    }

    /// Internal consistency check: the ring window fits the capacity and
    /// every boundary sits within the retained window, in non-decreasing
    /// offset order.
    pub fn fsck(&self) -> bool {
        if self.head < self.tail {
            return false;
        }
        if self.head - self.tail > CAPACITY as u64 {
            return false;
        }
        let mut last_offset = self.tail;
        let mut last_seq = None;
        for b in &self.boundaries {
            if b.offset < self.tail || b.offset > self.head {
                return false;
            }
            if b.offset < last_offset {
                return false;
            }
            if let Some(seq) = last_seq {
                if b.seq <= seq {
                    return false;
                }
            }
            last_offset = b.offset;
            last_seq = Some(b.seq);
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bufchain::BufChain;

    #[test]
    fn append_then_read_roundtrip() {
        let mut fifo = Fifo::new();
        let data = [1u8, 2, 3, 4];
        let chunks = [Chunk::buf(0, &data)];
        let chain = BufChain::new(&chunks);
        fifo.append(&chain);
        assert!(fifo.fsck());

        let mut out = Vec::new();
        let cursor = fifo.read(fifo.read_begin(), &mut out, 8);
        let collected: Vec<u8> = out.iter().filter(|c| c.is_buf()).flat_map(|c| c.as_buf().to_vec()).collect();
        assert_eq!(collected, data);
        fifo.drop_until(cursor);
        assert!(fifo.is_empty());
    }

    #[test]
    fn append_respects_capacity() {
        let mut fifo = Fifo::new();
        let data = vec![7u8; CAPACITY + 10];
        let chunks = [Chunk::buf(0, &data)];
        let chain = BufChain::new(&chunks);
        fifo.append(&chain);
        assert_eq!(fifo.len(), CAPACITY);
        assert!(fifo.fsck());
    }

    #[test]
    fn frame_boundary_surfaces_between_data_runs() {
        let mut fifo = Fifo::new();
        let a = [1u8, 2];
        let b = [3u8, 4];
        let chunks = [Chunk::buf(0, &a), Chunk::frame_boundary(1), Chunk::buf(0, &b)];
        let chain = BufChain::new(&chunks);
        fifo.append(&chain);

        let mut out = Vec::new();
        fifo.read(fifo.read_begin(), &mut out, 16);
        assert_eq!(out.len(), 3);
        assert!(out[0].is_buf());
        assert!(out[1].is_frame_boundary());
        assert_eq!(out[1].layer(), 1);
        assert!(out[2].is_buf());
        assert!(fifo.fsck());
    }

    #[test]
    fn read_handles_ring_wraparound() {
        let mut fifo = Fifo::new();
        let warmup = vec![0u8; CAPACITY - 2];
        let warmup_chunks = [Chunk::buf(0, &warmup)];
        fifo.append(&BufChain::new(&warmup_chunks));
        let (advanced, _) = fifo.advance_it(fifo.read_begin(), CAPACITY - 2);
        fifo.drop_until(advanced);

        let data = [9u8, 9, 9, 9];
        let chunks = [Chunk::buf(0, &data)];
        fifo.append(&BufChain::new(&chunks));

        let mut out = Vec::new();
        fifo.read(fifo.read_begin(), &mut out, 16);
        let collected: Vec<u8> = out.iter().filter(|c| c.is_buf()).flat_map(|c| c.as_buf().to_vec()).collect();
        assert_eq!(collected, data);
        assert!(fifo.fsck());
    }
}
