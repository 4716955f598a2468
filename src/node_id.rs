//! Identifiers: `NodeId` (one per process, CSPRNG-seeded) and `CallId`
//! (one per logical call, deterministically derived) — spec §3.

use rand_core::{OsRng, RngCore};

/// 16 opaque bytes identifying a peer process for the lifetime of that
/// process. Generated once at `Domain` construction from a CSPRNG seed;
/// never persisted (spec §6 "Persisted state: None").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId([u8; 16]);

impl NodeId {
    pub fn from_bytes(bytes: [u8; 16]) -> Self {
        NodeId(bytes)
    }

    pub fn generate() -> Self {
        let mut bytes = [0u8; 16];
        OsRng.fill_bytes(&mut bytes);
        NodeId(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }
}

/// 16 opaque bytes identifying one logical call across its lifetime.
/// Produced by a per-Domain `CallIdGenerator` seeded with the local
/// `NodeId` and a monotonic counter, so two calls from the same Domain
/// never collide even across reconnects within the process lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CallId([u8; 16]);

impl CallId {
    pub fn from_bytes(bytes: [u8; 16]) -> Self {
        CallId(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }
}

/// Deterministic `CallId` generator: mixes the owning `NodeId` with a
/// monotonic counter via a non-cryptographic hash (twox-hash, already in
/// the dependency stack for `Domain`'s lookup tables), so call IDs a peer
/// observes are opaque but never repeat within a process's lifetime.
pub struct CallIdGenerator {
    node_id: NodeId,
    counter: u64,
}

impl CallIdGenerator {
    pub fn new(node_id: NodeId) -> Self {
        CallIdGenerator {
            node_id,
            counter: 0,
        }
    }

    pub fn next(&mut self) -> CallId {
        use std::hash::Hasher;
        let mut bytes = [0u8; 16];

        let mut lo = twox_hash::XxHash64::with_seed(0);
        lo.write(self.node_id.as_bytes());
        lo.write_u64(self.counter);
        bytes[..8].copy_from_slice(&lo.finish().to_le_bytes());

        let mut hi = twox_hash::XxHash64::with_seed(1);
        hi.write(self.node_id.as_bytes());
        hi.write_u64(self.counter);
        bytes[8..].copy_from_slice(&hi.finish().to_le_bytes());

        self.counter = self.counter.wrapping_add(1);
        CallId(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generator_never_repeats_within_a_run() {
        let mut gen = CallIdGenerator::new(NodeId::from_bytes([1; 16]));
        let a = gen.next();
        let b = gen.next();
        assert_ne!(a, b);
    }

    #[test]
    fn different_nodes_diverge() {
        let mut a = CallIdGenerator::new(NodeId::from_bytes([1; 16]));
        let mut b = CallIdGenerator::new(NodeId::from_bytes([2; 16]));
        assert_ne!(a.next(), b.next());
    }
}
