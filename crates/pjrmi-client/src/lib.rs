//! Blocking PJRmi client.
//!
//! This crate drives the state machines defined in `pjrmi-core` over a
//! real [`transport::Transport`]: completing the handshake, maintaining
//! the request/response [`correlator::Correlator`], dispatching
//! server-originated requests to exported callables, moving bulk numeric
//! arrays over the same-host SHM channel, and running the background
//! threads a live connection keeps alive for its lifetime (spec.md §5 —
//! parallel OS threads and blocking I/O, no async runtime).
//!
//! [`client::PjrmiClient`] is the public entry point; everything else in
//! this crate is a building block it assembles.

mod client;
mod correlator;
mod dispatch;
mod error;
mod lifecycle;
mod shm;
mod transport;

pub use client::{boxed_value_as_argument, PjrmiClient};
pub use correlator::{CorrelationMode, Correlator};
pub use dispatch::{CallbackHandler, DispatchFault, NullCallbackHandler};
pub use error::ClientError;
pub use lifecycle::{ConnectionHandle, RequestIdAllocator};
pub use transport::{
    FifoTransport, InProcessTransport, StdioTransport, TcpTransport, Transport, TlsTransport,
};
