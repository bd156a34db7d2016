//! In-process test harness for the PJRmi client.
//!
//! There is no server crate in this workspace — the wire protocol's
//! server half is somebody else's process in production. What this
//! crate provides instead is [`MockServer`], a scriptable stand-in that
//! speaks just enough of the protocol (the handshake plus the handful
//! of request types spec.md §8's end-to-end scenarios exercise) to
//! drive a real [`pjrmi_client::PjrmiClient`] over an
//! [`pjrmi_client::InProcessTransport`] pair, with no sockets and no
//! nondeterminism.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod env;
pub mod mock_server;

pub use env::TestEnvironment;
pub use mock_server::MockServer;
