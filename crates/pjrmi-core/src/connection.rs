//! Client-side handshake and lifecycle state machine (spec.md §4.2, §4.10).
//!
//! Uses the action pattern: methods take already-read bytes (or request the
//! next chunk to read) and return actions for the driver (`pjrmi-client`'s
//! connection-lifecycle module) to execute. This keeps the state machine
//! itself free of I/O, so it can be driven from unit tests with
//! hand-assembled byte sequences instead of a real socket.
//!
//! The handshake precedes the frame protocol: its four messages (client
//! hello, server hello-echo, server service-string, server capability
//! byte) are raw length-prefixed fields, not `pjrmi_proto::Frame`s. Once
//! [`ConnectionPhase::Established`] is reached, all further traffic on the
//! connection is framed.
//!
//! # State machine
//!
//! ```text
//! Init --send_hello--> AwaitingHelloEcho --handle_hello_echo-->
//!   AwaitingServiceString --handle_service_string-->
//!   AwaitingCapabilities --handle_capability_byte--> Established --> Closed
//! ```

use pjrmi_proto::wire;

use crate::error::PjrmiError;

/// Protocol version string this client speaks (spec.md §4.2: "currently
/// `PJRMI_1.13`").
pub const HELLO_STRING: &str = "PJRMI_1.13";

/// Bit 0 of the capability byte: server dispatches on worker threads and
/// therefore supports callbacks (spec.md §4.2).
pub const CAPABILITY_SUPPORTS_CALLBACKS: u8 = 0b0000_0001;

/// Actions the handshake state machine asks the driver to perform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionAction {
    /// Write these raw bytes to the transport (not a framed message — the
    /// handshake preamble).
    SendBytes(Vec<u8>),

    /// Handshake finished successfully.
    HandshakeComplete {
        /// Service name the server advertised.
        service_name: String,
        /// Whether the server supports callback dispatch.
        supports_callbacks: bool,
    },

    /// Close the connection with this reason.
    Close {
        /// Reason for closing the connection.
        reason: String,
    },
}

/// Connection phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionPhase {
    /// Initial state — handshake not started.
    Init,
    /// Hello sent, waiting for the server's hello echo or error string.
    AwaitingHelloEcho,
    /// Hello confirmed, waiting for the service name or rejection reason.
    AwaitingServiceString,
    /// Service string received, waiting for the capability byte.
    AwaitingCapabilities,
    /// Handshake complete; frame traffic may flow.
    Established,
    /// Connection closed (graceful or error).
    Closed,
}

/// Parameters the client sends in its opening hello (spec.md §4.2).
#[derive(Debug, Clone)]
pub struct HelloParams {
    /// Human-readable description of the client, e.g. its command line.
    pub command_line: String,
    /// This process's pid.
    pub pid: i32,
    /// A 64-bit value identifying this client instance, used by the server
    /// to recognize a reconnecting client.
    pub self_identifier: i64,
}

/// Client-side handshake state machine.
///
/// This is a pure state machine — no I/O. The driver reads raw bytes off
/// the transport and feeds them to `handle_*`; it writes the bytes
/// `ConnectionAction::SendBytes` returns.
#[derive(Debug, Clone)]
pub struct Connection {
    phase: ConnectionPhase,
    service_name: Option<String>,
    supports_callbacks: bool,
}

impl Default for Connection {
    fn default() -> Self {
        Self::new()
    }
}

impl Connection {
    /// Create a new connection in [`ConnectionPhase::Init`].
    #[must_use]
    pub fn new() -> Self {
        Self { phase: ConnectionPhase::Init, service_name: None, supports_callbacks: false }
    }

    /// Current phase.
    #[must_use]
    pub fn phase(&self) -> ConnectionPhase {
        self.phase
    }

    /// Service name the server advertised. `None` until the handshake
    /// completes.
    #[must_use]
    pub fn service_name(&self) -> Option<&str> {
        self.service_name.as_deref()
    }

    /// Whether the server supports callback dispatch. Only meaningful once
    /// [`ConnectionPhase::Established`] is reached.
    #[must_use]
    pub fn supports_callbacks(&self) -> bool {
        self.supports_callbacks
    }

    /// Build and send the client's opening hello (spec.md §4.2): the ASCII
    /// version string, a UTF-16 command-line description, the pid, and the
    /// self-identifier.
    ///
    /// # Errors
    ///
    /// [`PjrmiError::InvalidState`] if not in [`ConnectionPhase::Init`].
    pub fn send_hello(
        &mut self,
        params: &HelloParams,
    ) -> Result<Vec<ConnectionAction>, PjrmiError> {
        if self.phase != ConnectionPhase::Init {
            return Err(PjrmiError::InvalidState {
                phase: self.phase,
                operation: "send_hello".to_string(),
            });
        }

        let mut bytes = Vec::new();
        wire::put_ascii_string(&mut bytes, HELLO_STRING);
        wire::put_utf16_string(&mut bytes, &params.command_line);
        bytes.extend_from_slice(&params.pid.to_be_bytes());
        bytes.extend_from_slice(&params.self_identifier.to_be_bytes());

        self.phase = ConnectionPhase::AwaitingHelloEcho;
        Ok(vec![ConnectionAction::SendBytes(bytes)])
    }

    /// Handle the server's reply to the hello: either an echo of
    /// [`HELLO_STRING`] (positive length) confirming compatibility, or a
    /// negative-length error message.
    ///
    /// # Errors
    ///
    /// - [`PjrmiError::InvalidState`] if not awaiting the echo.
    /// - [`PjrmiError::VersionMismatch`] if the server signaled
    ///   incompatibility or echoed an unexpected string.
    /// - [`PjrmiError::Protocol`] if the bytes cannot be parsed.
    pub fn handle_hello_echo(
        &mut self,
        bytes: &[u8],
    ) -> Result<Vec<ConnectionAction>, PjrmiError> {
        if self.phase != ConnectionPhase::AwaitingHelloEcho {
            return Err(PjrmiError::InvalidState {
                phase: self.phase,
                operation: "handle_hello_echo".to_string(),
            });
        }

        let mut buf = bytes;
        let (len, text) = wire::get_signed_ascii_string(&mut buf)?;

        if len < 0 {
            tracing::warn!(error = %text, "server rejected hello version");
            self.phase = ConnectionPhase::Closed;
            return Err(PjrmiError::VersionMismatch { message: text });
        }

        if text != HELLO_STRING {
            tracing::warn!(echoed = %text, expected = HELLO_STRING, "unexpected hello echo");
            self.phase = ConnectionPhase::Closed;
            return Err(PjrmiError::VersionMismatch {
                message: format!("server echoed unexpected hello string: {text:?}"),
            });
        }

        self.phase = ConnectionPhase::AwaitingServiceString;
        Ok(vec![])
    }

    /// Handle the server's service-name string: positive length is the
    /// service name, negative length is a connection-rejection reason.
    ///
    /// # Errors
    ///
    /// - [`PjrmiError::InvalidState`] if not awaiting the service string.
    /// - [`PjrmiError::ConnectionRejected`] if the server rejected the
    ///   connection.
    pub fn handle_service_string(
        &mut self,
        bytes: &[u8],
    ) -> Result<Vec<ConnectionAction>, PjrmiError> {
        if self.phase != ConnectionPhase::AwaitingServiceString {
            return Err(PjrmiError::InvalidState {
                phase: self.phase,
                operation: "handle_service_string".to_string(),
            });
        }

        let mut buf = bytes;
        let (len, text) = wire::get_signed_ascii_string(&mut buf)?;

        if len < 0 {
            self.phase = ConnectionPhase::Closed;
            return Err(PjrmiError::ConnectionRejected { reason: text });
        }

        self.service_name = Some(text);
        self.phase = ConnectionPhase::AwaitingCapabilities;
        Ok(vec![])
    }

    /// Handle the server's capability byte, completing the handshake.
    ///
    /// # Errors
    ///
    /// [`PjrmiError::InvalidState`] if not awaiting the capability byte.
    pub fn handle_capability_byte(
        &mut self,
        byte: u8,
    ) -> Result<Vec<ConnectionAction>, PjrmiError> {
        if self.phase != ConnectionPhase::AwaitingCapabilities {
            return Err(PjrmiError::InvalidState {
                phase: self.phase,
                operation: "handle_capability_byte".to_string(),
            });
        }

        self.supports_callbacks = byte & CAPABILITY_SUPPORTS_CALLBACKS != 0;
        self.phase = ConnectionPhase::Established;

        #[allow(clippy::expect_used)]
        let service_name =
            self.service_name.clone().expect("invariant: set by handle_service_string");

        Ok(vec![ConnectionAction::HandshakeComplete {
            service_name,
            supports_callbacks: self.supports_callbacks,
        }])
    }

    /// Mark the connection closed (spec.md §4.10 shutdown: `connected =
    /// false`).
    pub fn close(&mut self) {
        self.phase = ConnectionPhase::Closed;
    }
}

#[cfg(test)]
mod tests {
    use bytes::Buf;
    use pjrmi_proto::wire;

    use super::*;

    fn hello_params() -> HelloParams {
        HelloParams { command_line: "pjrmi-client --demo".to_string(), pid: 4242, self_identifier: 7 }
    }

    fn encode_signed_ascii(s: &str, negative: bool) -> Vec<u8> {
        let mut buf = Vec::new();
        wire::put_signed_ascii_string(&mut buf, s, negative);
        buf
    }

    #[test]
    fn full_handshake_reaches_established() {
        let mut conn = Connection::new();
        assert_eq!(conn.phase(), ConnectionPhase::Init);

        let actions = conn.send_hello(&hello_params()).unwrap();
        assert_eq!(conn.phase(), ConnectionPhase::AwaitingHelloEcho);
        assert!(matches!(actions[0], ConnectionAction::SendBytes(_)));

        let echo = encode_signed_ascii(HELLO_STRING, false);
        conn.handle_hello_echo(&echo).unwrap();
        assert_eq!(conn.phase(), ConnectionPhase::AwaitingServiceString);

        let service = encode_signed_ascii("demo-service", false);
        conn.handle_service_string(&service).unwrap();
        assert_eq!(conn.phase(), ConnectionPhase::AwaitingCapabilities);
        assert_eq!(conn.service_name(), Some("demo-service"));

        let actions = conn.handle_capability_byte(CAPABILITY_SUPPORTS_CALLBACKS).unwrap();
        assert_eq!(conn.phase(), ConnectionPhase::Established);
        assert!(conn.supports_callbacks());

        match &actions[0] {
            ConnectionAction::HandshakeComplete { service_name, supports_callbacks } => {
                assert_eq!(service_name, "demo-service");
                assert!(*supports_callbacks);
            },
            other => panic!("expected HandshakeComplete, got {other:?}"),
        }
    }

    #[test]
    fn capability_byte_without_bit_zero_means_no_callbacks() {
        let mut conn = Connection::new();
        conn.send_hello(&hello_params()).unwrap();
        conn.handle_hello_echo(&encode_signed_ascii(HELLO_STRING, false)).unwrap();
        conn.handle_service_string(&encode_signed_ascii("svc", false)).unwrap();

        conn.handle_capability_byte(0).unwrap();
        assert!(!conn.supports_callbacks());
    }

    #[test]
    fn negative_length_hello_echo_is_version_mismatch() {
        let mut conn = Connection::new();
        conn.send_hello(&hello_params()).unwrap();

        let err = encode_signed_ascii("incompatible client version", true);
        let result = conn.handle_hello_echo(&err);
        assert!(matches!(result, Err(PjrmiError::VersionMismatch { .. })));
        assert_eq!(conn.phase(), ConnectionPhase::Closed);
    }

    #[test]
    fn mismatched_hello_echo_is_version_mismatch() {
        let mut conn = Connection::new();
        conn.send_hello(&hello_params()).unwrap();

        let wrong = encode_signed_ascii("PJRMI_9.9", false);
        let result = conn.handle_hello_echo(&wrong);
        assert!(matches!(result, Err(PjrmiError::VersionMismatch { .. })));
    }

    #[test]
    fn negative_length_service_string_is_rejection() {
        let mut conn = Connection::new();
        conn.send_hello(&hello_params()).unwrap();
        conn.handle_hello_echo(&encode_signed_ascii(HELLO_STRING, false)).unwrap();

        let rejection = encode_signed_ascii("too many connections", true);
        let result = conn.handle_service_string(&rejection);
        assert!(matches!(result, Err(PjrmiError::ConnectionRejected { .. })));
        assert_eq!(conn.phase(), ConnectionPhase::Closed);
    }

    #[test]
    fn out_of_order_calls_are_rejected() {
        let mut conn = Connection::new();
        let result = conn.handle_hello_echo(&encode_signed_ascii(HELLO_STRING, false));
        assert!(matches!(result, Err(PjrmiError::InvalidState { .. })));

        let result = conn.handle_capability_byte(1);
        assert!(matches!(result, Err(PjrmiError::InvalidState { .. })));
    }

    #[test]
    fn close_moves_to_closed_from_any_phase() {
        let mut conn = Connection::new();
        conn.send_hello(&hello_params()).unwrap();
        conn.close();
        assert_eq!(conn.phase(), ConnectionPhase::Closed);
    }

    #[test]
    fn send_hello_encodes_command_line_and_identifiers() {
        let mut conn = Connection::new();
        let params = hello_params();
        let actions = conn.send_hello(&params).unwrap();

        let ConnectionAction::SendBytes(bytes) = &actions[0] else {
            panic!("expected SendBytes");
        };

        let mut buf = bytes.as_slice();
        let hello = wire::get_ascii_string(&mut buf).unwrap();
        assert_eq!(hello, HELLO_STRING);

        let command_line = wire::get_utf16_string(&mut buf).unwrap();
        assert_eq!(command_line, params.command_line);

        let mut pid_bytes = [0u8; 4];
        buf.copy_to_slice(&mut pid_bytes);
        assert_eq!(i32::from_be_bytes(pid_bytes), params.pid);

        let mut id_bytes = [0u8; 8];
        buf.copy_to_slice(&mut id_bytes);
        assert_eq!(i64::from_be_bytes(id_bytes), params.self_identifier);
    }
}
