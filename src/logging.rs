//! Structured logging helpers built on `tracing` (see `SPEC_FULL.md` §2.2).
//!
//! These are thin span constructors, not a logging backend: the crate user
//! installs whatever `tracing_subscriber` formatter they want (the
//! standalone node binary installs `fmt()`), matching spec §6's "logging
//! formatters" being an external collaborator.

use tracing::Span;

/// Span covering one Connection's lifetime, tagged by its `tx_call_id`.
pub fn connection_span(tx_call_id: &[u8; 16]) -> Span {
    tracing::info_span!("connection", call_id = %hex(tx_call_id))
}

/// Span covering one packet unpack attempt.
pub fn unpack_span(len: usize) -> Span {
    tracing::trace_span!("unpack", packet_len = len)
}

/// Span covering one Multiplexer dispatch turn for a given sink.
pub fn multiplexer_span(sink_name: &str) -> Span {
    tracing::debug_span!("multiplexer", sink = sink_name)
}

fn hex(bytes: &[u8; 16]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}
