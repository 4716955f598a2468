//! Fibre: a peer-to-peer RPC fabric that exposes typed objects and functions
//! to remote nodes over heterogeneous transports.
//!
//! This crate is the transport-independent connection layer: the
//! multi-layer framing codec ([`protocol`]), the per-connection reassembly
//! buffer ([`fifo`], [`connection`]), the send-side multiplexer
//! ([`multiplexer`]), and the node/domain directory ([`domain`]) that binds
//! incoming framed call streams to local function dispatchers
//! ([`dispatch`]). Platform event loops, socket bindings, and discovery
//! backend implementations are external collaborators; [`transport`] and
//! [`discovery`] only specify the interfaces they must present.

pub mod bufchain;
pub mod cancellation;
pub mod chunk;
pub mod config;
pub mod connection;
pub mod discovery;
pub mod dispatch;
pub mod domain;
pub mod error;
pub mod event_loop;
pub mod fifo;
pub mod logging;
pub mod multiplexer;
pub mod node_id;
pub mod protocol;
pub mod socket;
pub mod status;
pub mod transport;

#[cfg(feature = "transport_tokio")]
pub mod transport_tokio;

pub use config::Config;
pub use domain::Domain;
pub use error::{Error, ErrorKind, Result};
pub use node_id::{CallId, NodeId};
pub use status::Status;
