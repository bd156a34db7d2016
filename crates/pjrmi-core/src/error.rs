//! Error taxonomy for the PJRmi core (spec.md §7).
//!
//! Layered the way the wire boundary is layered: framing errors come up
//! from `pjrmi-proto`, this crate adds the errors that can occur once
//! bytes have meaning (handshake, type/handle/callback registries,
//! connection-state violations), and `pjrmi-client` adds the transport and
//! marshalling layers on top via its own `From` impls.

use std::io;

use thiserror::Error;

use crate::connection::ConnectionPhase;

/// Errors surfaced by the PJRmi core.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PjrmiError {
    /// A connection-state-machine method was called out of order.
    #[error("invalid state transition: cannot {operation} from {phase:?}")]
    InvalidState {
        /// Current phase when the error occurred.
        phase: ConnectionPhase,
        /// Operation that was attempted.
        operation: String,
    },

    /// The hello handshake failed: the server rejected the client's
    /// version string, or the server's own hello string could not be
    /// parsed (spec.md §4.2).
    #[error("protocol version mismatch: {message}")]
    VersionMismatch {
        /// Error message the server sent (hello echo's negative-length
        /// payload).
        message: String,
    },

    /// The server rejected the connection after a successful version
    /// handshake (the service-name string's negative-length payload).
    #[error("connection rejected by server: {reason}")]
    ConnectionRejected {
        /// Reason string the server sent.
        reason: String,
    },

    /// The server's capability byte does not advertise worker-thread
    /// dispatch, but the client attempted an operation that requires
    /// exporting a local callable (spec.md §4.2: "A client lacking
    /// callback support must refuse APIs that require exporting local
    /// callables").
    #[error("server does not support callbacks (reentrant dispatch); cannot export a callable")]
    CallbacksUnsupported,

    /// A frame of an unexpected message type arrived for the current
    /// connection phase.
    #[error("unexpected message type {message_type:?} in phase {phase:?}")]
    UnexpectedMessage {
        /// Current phase when the frame was received.
        phase: ConnectionPhase,
        /// Message type byte of the unexpected frame.
        message_type: u8,
    },

    /// No local-to-wire encoding exists for a given (value, type) pair.
    #[error("cannot convert value to type id {type_id}: {reason}")]
    MarshalError {
        /// Target type id the value could not be converted to.
        type_id: u32,
        /// Human-readable reason.
        reason: String,
    },

    /// A value does not round-trip through the target numeric type.
    #[error("value does not round-trip through target numeric type: {reason}")]
    PrecisionLoss {
        /// Human-readable reason.
        reason: String,
    },

    /// Overload resolution found zero or more than one matching overload.
    #[error("overload resolution failed for `{name}`: {reason}")]
    OverloadResolution {
        /// Method or constructor name.
        name: String,
        /// "no matching overload" or "ambiguous", plus candidate
        /// signatures.
        reason: String,
    },

    /// The server returned an `EXCEPTION` frame.
    #[error("remote exception (type {type_id}): {message}")]
    RemoteException {
        /// Remote exception's type id.
        type_id: u32,
        /// Remote exception message (may be a placeholder until the
        /// lazily-fetched `toString` is resolved).
        message: String,
    },

    /// Underlying protocol framing error (malformed header, impossible
    /// length, EOF mid-frame). Always fatal.
    #[error("protocol framing error: {0}")]
    Protocol(String),

    /// Underlying transport error (connection reset, broken pipe). Always
    /// fatal.
    #[error("transport error: {0}")]
    Transport(String),

    /// The connection was closed, either locally or because EOF was
    /// observed on the wire; all waiters on outstanding requests are
    /// unblocked with this error (spec.md §7).
    #[error("connection closed")]
    ConnectionClosed,
}

impl PjrmiError {
    /// Whether this error means the connection is no longer usable and
    /// must be torn down. Every variant except the non-fatal marshalling
    /// and resolution errors qualifies (spec.md §7's "fatal" column).
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            Self::MarshalError { .. }
                | Self::PrecisionLoss { .. }
                | Self::OverloadResolution { .. }
                | Self::RemoteException { .. }
        )
    }
}

impl From<pjrmi_proto::ProtocolError> for PjrmiError {
    fn from(err: pjrmi_proto::ProtocolError) -> Self {
        Self::Protocol(err.to_string())
    }
}

impl From<io::Error> for PjrmiError {
    fn from(err: io::Error) -> Self {
        Self::Transport(err.to_string())
    }
}

impl From<PjrmiError> for io::Error {
    fn from(err: PjrmiError) -> Self {
        let kind = match &err {
            PjrmiError::Transport(_) => io::ErrorKind::Other,
            PjrmiError::ConnectionClosed => io::ErrorKind::ConnectionAborted,
            _ => io::ErrorKind::InvalidData,
        };
        Self::new(kind, err.to_string())
    }
}
