//! Client-level errors (spec.md §7): wraps every layer below it
//! (`pjrmi-proto`'s framing errors, `pjrmi-core`/`pjrmi-marshal`'s
//! `PjrmiError`) and adds the transport I/O errors only this crate can
//! produce.

use thiserror::Error;

/// Errors surfaced by the PJRmi client.
#[derive(Error, Debug)]
pub enum ClientError {
    /// Everything from the core/marshalling layers (handshake, registry,
    /// marshalling, overload resolution, remote exceptions, framing).
    #[error(transparent)]
    Pjrmi(#[from] pjrmi_core::PjrmiError),

    /// A transport-level I/O failure (socket, pipe, stdio).
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// TLS handshake or record-layer failure.
    #[error("TLS error: {0}")]
    Tls(#[from] rustls::Error),

    /// The connection was closed locally and no further operations are
    /// permitted.
    #[error("connection is closed")]
    Closed,

    /// A caller-imposed timeout elapsed while waiting for a response
    /// (spec.md §4.5: "purely caller-imposed"; the correlator itself
    /// never times out on its own).
    #[error("timed out waiting for a response")]
    TimedOut,

    /// The peer advertised a capability set incompatible with the
    /// requested operation (e.g. exporting a callable to a non-reentrant
    /// peer).
    #[error("operation requires a capability the peer does not support: {0}")]
    UnsupportedByPeer(String),
}

impl ClientError {
    /// Whether this error means the underlying connection must be torn
    /// down, mirroring [`pjrmi_core::PjrmiError::is_fatal`] for the
    /// client-level variants layered on top.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::Pjrmi(err) => err.is_fatal(),
            Self::Io(_) | Self::Tls(_) | Self::Closed => true,
            Self::TimedOut | Self::UnsupportedByPeer(_) => false,
        }
    }
}

impl From<pjrmi_proto::ProtocolError> for ClientError {
    fn from(err: pjrmi_proto::ProtocolError) -> Self {
        Self::Pjrmi(err.into())
    }
}
