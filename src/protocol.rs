//! The low-level wire codec: packs a `BufChain` into a transport packet and
//! unpacks a packet back into a sequence of `Chunk`s (spec §4.1), ported
//! bit-for-bit from
//! `examples/original_source/cpp/include/fibre/low_level_protocol.hpp`.
//!
//! Wire layout recap (see spec §4.1 for the full grammar):
//! - byte 0: `flags`, bit 7 reserved (must be 0), bits 0-6 a per-layer
//!   "frame id present" bitset. Note this only ever addresses layers 0-6
//!   even though a `Chunk`'s layer field and `SenderState`/`ReceiverState`'s
//!   arrays go up to [`MAX_LAYERS`] (16) — this asymmetry is intentional,
//!   not a bug: layers above 6 are only ever reached mid-packet via a
//!   `0x80 | layer` marker, never via the per-packet resync header.
//! - per set bit i: one byte `(frame_id << 1) | has_offset`, optionally
//!   followed by one offset byte when `has_offset` is set.
//! - then a sequence of: `0x80 | layer` (switch current layer) or
//!   `(size << 2) | n_close` (size 0-30 direct, 31 = "rest of the packet",
//!   n_close frame boundaries closed immediately above this chunk).

use crate::bufchain::{BufChain, ChainCursor};
use crate::chunk::Chunk;

pub use crate::chunk::MAX_LAYERS;

/// Number of layers addressable by the per-packet frame-id resync header.
/// Strictly smaller than `MAX_LAYERS`; see the module doc.
const HEADER_LAYER_BITS: u8 = 7;

/// Per-direction frame-id/offset bookkeeping, one slot per layer. Shared
/// shape for both sender and receiver (`ReceiverState` is a type alias in
/// the original).
#[derive(Debug, Clone, Copy)]
pub struct SenderState {
    frame_ids: [u16; MAX_LAYERS],
    offsets: [u16; MAX_LAYERS],
}

pub type ReceiverState = SenderState;

impl Default for SenderState {
    fn default() -> Self {
        SenderState {
            frame_ids: [0; MAX_LAYERS],
            offsets: [0; MAX_LAYERS],
        }
    }
}

impl SenderState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Advances the frame id at `layer` and every layer nested below it
    /// (i.e. every layer `>= layer`, since a closed outer frame implicitly
    /// closes everything it contains), resetting their offsets to 0.
    pub fn inc(&mut self, layer: u8) {
        for i in (layer as usize)..MAX_LAYERS {
            self.frame_ids[i] = self.frame_ids[i].wrapping_add(1);
            self.offsets[i] = 0;
        }
    }
}

/// Index of the lowest set bit in `bits`, or `MAX_LAYERS` if none is set.
fn find_first(bits: u16) -> u8 {
    if bits == 0 {
        MAX_LAYERS as u8
    } else {
        bits.trailing_zeros() as u8
    }
}

/// Packs as much of `chain` as fits into `packet`. Returns a cursor marking
/// how far into `chain` packing got; a non-empty chain for which nothing
/// could be packed (header alone didn't fit, or the first chunk didn't fit)
/// returns `chain.begin()` unchanged.
pub fn pack<'a>(state: &mut SenderState, chain: &BufChain<'a>, packet: &mut [u8]) -> ChainCursor {
    pack_sized(state, chain, packet).0
}

/// Like [`pack`], but also reports how many bytes of `packet` were
/// written — callers handing the result straight to a transport (rather
/// than just tracking consumption of `chain`) need the packet length, not
/// just the input cursor.
pub fn pack_sized<'a>(
    state: &mut SenderState,
    chain: &BufChain<'a>,
    packet: &mut [u8],
) -> (ChainCursor, usize) {
    let mut chain = chain.clone();
    if chain.is_empty() {
        return (chain.begin(), 0);
    }

    let mut max_layer: u8 = 0;
    let mut include_offsets: u16 = 0;
    {
        let mut scan = chain.clone();
        while !scan.is_empty() {
            let c = scan.front().unwrap();
            if c.layer() as usize >= MAX_LAYERS {
                return (chain.begin(), 0);
            }
            max_layer = max_layer.max(c.layer());
            if c.is_buf() && state.offsets[c.layer() as usize] != 0 {
                include_offsets |= 1 << c.layer();
            }
            scan.skip_chunks(1);
        }
    }

    let header_len = 1 + (max_layer as usize + 1) + include_offsets.count_ones() as usize;
    if packet.len() < header_len {
        return (chain.begin(), 0);
    }

    let mut pos = 0usize;
    packet[pos] = ((1u16 << (max_layer as u32 + 1)) - 1) as u8;
    pos += 1;

    for i in 0..=max_layer {
        let has_offset = include_offsets & (1 << i) != 0;
        packet[pos] = ((state.frame_ids[i as usize] as u8) << 1) | (has_offset as u8);
        pos += 1;
        if has_offset {
            if state.offsets[i as usize] & 0x80 != 0 {
                return (chain.end(), 0); // offset rollover unsupported
            }
            packet[pos] = (state.offsets[i as usize] as u8) & 0x7f;
            pos += 1;
        }
    }

    let mut layer = max_layer;
    let mut length_field: Option<usize> = None;

    while !chain.is_empty() {
        let chunk = chain.front().unwrap();

        if chunk.is_frame_boundary() {
            if let Some(lf) = length_field {
                let n_close_prev = packet[lf] & 0x3;
                if chunk.layer() + n_close_prev == layer && layer - chunk.layer() <= 1 {
                    packet[lf] = (packet[lf] & 0x7c) | (layer - chunk.layer() + 1);
                    state.inc(chunk.layer());
                    chain.skip_chunks(1);
                    continue;
                }
            }
        }

        if chunk.layer() != layer {
            if pos >= packet.len() {
                return (chain.begin(), pos);
            }
            layer = chunk.layer();
            packet[pos] = 0x80 | layer;
            pos += 1;
        }

        if chunk.is_buf() {
            let buf = chunk.as_buf();
            if buf.is_empty() {
                chain.skip_chunks(1);
                continue;
            }
            if pos >= packet.len() {
                return (chain.begin(), pos);
            }
            let lf = pos;
            pos += 1;
            let avail = packet.len() - pos;
            let n_copy = if buf.len() >= avail {
                packet[lf] = 0x1f << 2;
                avail
            } else {
                let n = buf.len().min(0x1e);
                packet[lf] = (n as u8) << 2;
                n
            };
            packet[pos..pos + n_copy].copy_from_slice(&buf[..n_copy]);
            pos += n_copy;
            length_field = Some(lf);
            chain.skip_bytes(n_copy);
        } else {
            if pos >= packet.len() {
                return (chain.begin(), pos);
            }
            packet[pos] = 1; // close frame: size=0, n_close=1
            pos += 1;
            state.inc(chunk.layer());
            length_field = None;
            chain.skip_chunks(1);
        }
    }

    (chain.begin(), pos)
}

/// Outcome of `unpack`. `Malformed` means the packet must be dropped
/// outright; `Ok` means the packet (or the prefix of it that fit in `out`)
/// was accepted, possibly producing zero chunks if the header alone
/// indicated an un-resumable gap. `reset_layer`, when set, is the lowest
/// layer whose frame id didn't match what was expected — everything at or
/// below it should be treated as stale until state resyncs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnpackOutcome {
    Malformed,
    Ok { reset_layer: Option<u8> },
}

/// Decodes `packet` into `out`, stopping early (successfully) once `out`
/// reaches `limit` chunks. `packet` must outlive the chunks pushed into
/// `out`, since they borrow directly from it.
pub fn unpack<'a>(
    state: &mut ReceiverState,
    packet: &'a [u8],
    out: &mut Vec<Chunk<'a>>,
    limit: usize,
) -> UnpackOutcome {
    if packet.is_empty() {
        return UnpackOutcome::Malformed;
    }
    let flags = packet[0];
    let mut pos = 1usize;

    if flags & 0x80 != 0 {
        return UnpackOutcome::Malformed; // reserved bit set
    }

    let frame_ids_present = (flags & 0x7f) as u16;
    let lowest_layer = find_first(frame_ids_present);

    let mut layer: u8 = 0;
    let mut reset_layer: Option<u8> = None;

    for i in 0..HEADER_LAYER_BITS {
        if frame_ids_present & (1 << i) == 0 {
            continue;
        }
        layer = i;
        if i as usize >= MAX_LAYERS {
            return UnpackOutcome::Malformed; // resource exhaustion
        }
        if pos >= packet.len() {
            return UnpackOutcome::Malformed;
        }
        let has_offset = packet[pos] & 1 != 0;
        let new_frame_id = (packet[pos] >> 1) as u16;
        pos += 1;

        if new_frame_id != state.frame_ids[i as usize] {
            if i == lowest_layer {
                // Insufficient information to resume: accept the packet
                // (it wasn't malformed) but surface no chunks.
                return UnpackOutcome::Ok { reset_layer: None };
            }
            reset_layer = Some(reset_layer.map_or(i, |rl| rl.min(i)));
        }
        state.frame_ids[i as usize] = new_frame_id;

        if has_offset {
            if pos >= packet.len() {
                return UnpackOutcome::Malformed;
            }
            if packet[pos] & 0x80 != 0 {
                return UnpackOutcome::Malformed; // reserved bit set
            }
            state.offsets[i as usize] = packet[pos] as u16;
            pos += 1;
        }
    }

    unpack_chunks(state, packet, pos, layer, out, limit, reset_layer)
}

#[allow(clippy::too_many_arguments)]
fn unpack_chunks<'a>(
    state: &mut ReceiverState,
    packet: &'a [u8],
    mut pos: usize,
    mut layer: u8,
    out: &mut Vec<Chunk<'a>>,
    limit: usize,
    reset_layer: Option<u8>,
) -> UnpackOutcome {
    while pos < packet.len() {
        if packet[pos] & 0x80 != 0 {
            if packet[pos] & 0x70 != 0 {
                // Reserved bits set: discard this chunk and the rest of the
                // packet, since we can no longer tell where the next chunk
                // would start.
                return UnpackOutcome::Ok { reset_layer };
            }
            layer = packet[pos] & 0x0f;
            pos += 1;
            continue;
        }

        let n_close = packet[pos] & 0x03;
        let mut size = (packet[pos] >> 2) & 0x1f;
        pos += 1;

        if size == 0x1f {
            // Matches the original's implicit truncation: "rest of packet"
            // is cast into the same 8-bit `size` field used for direct
            // lengths, so a remainder longer than 255 bytes would wrap.
            size = (packet.len() - pos) as u8;
        } else if size as usize > packet.len() - pos {
            return UnpackOutcome::Malformed;
        }

        if n_close as usize > layer as usize + 1 {
            return UnpackOutcome::Malformed;
        }

        if size > 0 {
            if out.len() >= limit {
                return UnpackOutcome::Ok { reset_layer };
            }
            out.push(Chunk::buf(layer, &packet[pos..pos + size as usize]));
            pos += size as usize;
        }

        for k in 0..n_close {
            if out.len() >= limit {
                return UnpackOutcome::Ok { reset_layer };
            }
            let close_layer = layer - k;
            out.push(Chunk::frame_boundary(close_layer));
            state.inc(close_layer);
        }
    }

    UnpackOutcome::Ok { reset_layer }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pack_unpack_single_chunk_roundtrip() {
        let mut sender = SenderState::new();
        let mut receiver = ReceiverState::new();

        let data = [1u8, 2, 3];
        let chunks = [Chunk::buf(0, &data), Chunk::frame_boundary(0)];
        let chain = BufChain::new(&chunks);

        let mut packet = [0u8; 32];
        let end = pack(&mut sender, &chain, &mut packet);
        assert_eq!(end, chain.end());

        let mut out = Vec::new();
        let outcome = unpack(&mut receiver, &packet, &mut out, 8);
        assert_eq!(outcome, UnpackOutcome::Ok { reset_layer: None });
        assert!(out[0].is_buf());
        assert_eq!(out[0].as_buf(), &data);
        assert!(out.iter().any(|c| c.is_frame_boundary() && c.layer() == 0));
    }

    #[test]
    fn unpack_rejects_reserved_header_bit() {
        let mut receiver = ReceiverState::new();
        let packet = [0x80u8];
        let mut out = Vec::new();
        assert_eq!(
            unpack(&mut receiver, &packet, &mut out, 8),
            UnpackOutcome::Malformed
        );
    }

    #[test]
    fn unpack_empty_packet_is_malformed() {
        let mut receiver = ReceiverState::new();
        let mut out = Vec::new();
        assert_eq!(unpack(&mut receiver, &[], &mut out, 8), UnpackOutcome::Malformed);
    }

    #[test]
    fn repeated_frame_id_triggers_resync_wait() {
        let mut sender = SenderState::new();
        let mut receiver = ReceiverState::new();

        let data = [9u8];
        let chunks = [Chunk::buf(0, &data)];
        let chain = BufChain::new(&chunks);
        let mut packet = [0u8; 32];
        pack(&mut sender, &chain, &mut packet);

        let mut out = Vec::new();
        unpack(&mut receiver, &packet, &mut out, 8);

        // Re-send the exact same packet (frame id unchanged at layer 0,
        // which is also the lowest present layer): the receiver can't tell
        // whether this is a retransmit or fresh data, so it must wait.
        out.clear();
        let outcome = unpack(&mut receiver, &packet, &mut out, 8);
        assert_eq!(outcome, UnpackOutcome::Ok { reset_layer: None });
        assert!(out.is_empty());
    }

    #[test]
    fn multi_layer_pack_unpack() {
        let mut sender = SenderState::new();
        let mut receiver = ReceiverState::new();

        let a = [1u8, 2];
        let b = [3u8, 4];
        let chunks = [
            Chunk::buf(0, &a),
            Chunk::buf(1, &b),
            Chunk::frame_boundary(1),
            Chunk::frame_boundary(0),
        ];
        let chain = BufChain::new(&chunks);
        let mut packet = [0u8; 32];
        let end = pack(&mut sender, &chain, &mut packet);
        assert_eq!(end, chain.end());

        let mut out = Vec::new();
        let outcome = unpack(&mut receiver, &packet, &mut out, 16);
        assert_eq!(outcome, UnpackOutcome::Ok { reset_layer: None });
        let bufs: Vec<_> = out.iter().filter(|c| c.is_buf()).collect();
        assert_eq!(bufs.len(), 2);
        assert_eq!(bufs[0].layer(), 0);
        assert_eq!(bufs[0].as_buf(), &a);
        assert_eq!(bufs[1].layer(), 1);
        assert_eq!(bufs[1].as_buf(), &b);
    }
}
