//! Wire framing and codec primitives for the PJRmi protocol.
//!
//! This crate has no knowledge of type registries, handles, or overload
//! resolution — it only knows how to turn bytes into [`Frame`]s and
//! [`Frame`]s into bytes, and how to read/write the small set of primitive
//! encodings ([`wire`]) and tagged-argument envelopes ([`value`]) that sit
//! inside a frame's payload. Everything that gives those bytes meaning
//! (type descriptors, marshalling, the dispatch loop) lives in
//! `pjrmi-core`, `pjrmi-marshal`, and `pjrmi-client`.

pub mod errors;
pub mod frame;
pub mod header;
pub mod message;
pub mod value;
pub mod wire;

pub use errors::{ProtocolError, Result};
pub use frame::Frame;
pub use header::FrameHeader;
pub use message::{Direction, MessageType, UNSOLICITED_REQUEST_ID};
pub use value::{ArgTag, LambdaArg, MethodHandleArg, ReferenceArg, ShmArg};
