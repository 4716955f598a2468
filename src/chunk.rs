//! Chunks: the unit of zero-copy framed data that flows through a
//! [`crate::bufchain::BufChain`], a [`crate::fifo::Fifo`], and the wire codec
//! in [`crate::protocol`] (spec §3).

/// Number of layers a [`Chunk`] can be tagged with. Layer 0 is the raw byte
/// stream, layer 1 is the argument boundary, layer 2 is the call boundary;
/// layers above that are reserved for future protocol nesting. Note this is
/// an array bound for per-layer frame-id tracking, not a budget on the
/// per-packet frame-id header block, which only ever addresses the first 7
/// layers (see `protocol::HEADER_LAYER_BITS`).
pub const MAX_LAYERS: usize = 16;

/// Either a byte buffer tagged with a layer, or a frame-boundary marker
/// tagged with a layer. A `Chunk` never owns its buffer: it borrows from
/// whatever backing storage the enclosing `BufChain` was built over (a
/// `Fifo`'s ring, a call frame, a caller-supplied argument buffer, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Chunk<'a> {
    layer: u8,
    data: ChunkData<'a>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChunkData<'a> {
    Buf(&'a [u8]),
    Boundary,
}

impl<'a> Chunk<'a> {
    /// Builds a data chunk carrying `buf` at `layer`.
    pub fn buf(layer: u8, buf: &'a [u8]) -> Self {
        Chunk {
            layer,
            data: ChunkData::Buf(buf),
        }
    }

    /// Builds a frame-boundary marker at `layer`. Closing a frame at layer
    /// `L` implicitly advances frame IDs at all layers `>= L`.
    pub fn frame_boundary(layer: u8) -> Self {
        Chunk {
            layer,
            data: ChunkData::Boundary,
        }
    }

    pub fn is_buf(&self) -> bool {
        matches!(self.data, ChunkData::Buf(_))
    }

    pub fn is_frame_boundary(&self) -> bool {
        matches!(self.data, ChunkData::Boundary)
    }

    pub fn layer(&self) -> u8 {
        self.layer
    }

    /// Returns the buffer backing this chunk. Panics if this chunk is a
    /// frame boundary; callers must check `is_buf()` first, same as the
    /// original's "legal if and only if is_buf() is true" contract.
    pub fn as_buf(&self) -> &'a [u8] {
        match self.data {
            ChunkData::Buf(b) => b,
            ChunkData::Boundary => panic!("Chunk::as_buf called on a frame boundary"),
        }
    }

    /// Returns a copy of this chunk shifted to `layer` (used when slicing
    /// out of the raw backing chunk but reporting a different logical
    /// layer, e.g. a partially-consumed head chunk).
    pub fn at_layer(&self, layer: u8) -> Self {
        Chunk {
            layer,
            data: self.data,
        }
    }

    /// Returns a copy of this chunk with its layer shifted by a signed
    /// offset (wrapping, matching the original's `(uint8_t)(layer_ +
    /// layers)`).
    pub fn elevate(&self, layers: i8) -> Self {
        self.at_layer(self.layer.wrapping_add(layers as u8))
    }

    /// Returns a copy of this chunk with `buf` replacing its payload
    /// (panics on a frame boundary, same as `as_buf`).
    pub fn with_buf(&self, buf: &'a [u8]) -> Self {
        assert!(self.is_buf());
        Chunk {
            layer: self.layer,
            data: ChunkData::Buf(buf),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buf_chunk_roundtrip() {
        let data = [1u8, 2, 3];
        let c = Chunk::buf(2, &data);
        assert!(c.is_buf());
        assert!(!c.is_frame_boundary());
        assert_eq!(c.layer(), 2);
        assert_eq!(c.as_buf(), &data);
    }

    #[test]
    fn boundary_elevate_wraps() {
        let c = Chunk::frame_boundary(0);
        let elevated = c.elevate(-1);
        assert_eq!(elevated.layer(), 255);
        assert!(elevated.is_frame_boundary());
    }

    #[test]
    #[should_panic]
    fn boundary_as_buf_panics() {
        Chunk::frame_boundary(0).as_buf();
    }
}
