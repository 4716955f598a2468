//! Capacity knobs for the bounded pools spec §5 requires ("Fifos,
//! Connections, slot pools, and node maps ... use fixed capacity").
//!
//! Mirrors the shape of a plain config struct with a `DEFAULT` constant,
//! the way the teacher crate's node configuration is plumbed through
//! construction rather than threaded as const generics — see
//! `DESIGN.md` for the Open Question this resolves.

/// Bounded capacities for one `Domain` and the `Connection`s it owns.
#[derive(Debug, Clone, Copy)]
pub struct Config {
    /// Max server-initiated Connections per Domain.
    pub max_server_connections: usize,
    /// Max client-initiated Connections per Domain.
    pub max_client_connections: usize,
    /// Max known remote Nodes per Domain.
    pub max_nodes: usize,
    /// Max ConnectionInputSlots per Connection (one per attached RX
    /// transport).
    pub max_input_slots: usize,
    /// Max ConnectionOutputSlots per Connection (one per attached TX
    /// transport).
    pub max_output_slots: usize,
    /// Chunks pulled from a TX Fifo per `TxPipe::get_task` call.
    pub max_chunks_per_task: usize,
    /// Chunks pumped to the upstream Socket per RX upcall pass.
    pub max_chunks_per_upcall: usize,
    /// Size in bytes of a Connection's call frame (spec §4.4).
    pub call_frame_size: usize,
    /// Whether heap allocation is permitted for anything beyond the fixed
    /// pools above. When false, callers are expected to size pools
    /// generously enough that arena allocation never needs to spill.
    pub allow_heap: bool,
}

impl Config {
    /// Matches spec §5's stated typical capacities exactly.
    pub const DEFAULT: Config = Config {
        max_server_connections: 3,
        max_client_connections: 3,
        max_nodes: 16,
        max_input_slots: 1,
        max_output_slots: 1,
        max_chunks_per_task: 10,
        max_chunks_per_upcall: 8,
        call_frame_size: 512,
        allow_heap: true,
    };
}

impl Default for Config {
    fn default() -> Self {
        Config::DEFAULT
    }
}
