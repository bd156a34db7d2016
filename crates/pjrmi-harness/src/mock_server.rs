//! Scriptable in-process server double (spec.md §8).
//!
//! Grounded in the teacher's `SimServer`: an explicit wrapper a test
//! drives step by step from its own thread, rather than an autonomous
//! event loop. Where the teacher owns a `ServerDriver` and executes the
//! `ServerAction`s it returns, this server has no action-pattern core
//! of its own to drive (there is no `pjrmi-server` crate in this
//! workspace) — tests script it directly, one frame at a time, reusing
//! `pjrmi-core`'s wire types (`TypeDescriptor`, `SpecificityMatrix`) and
//! `pjrmi-proto`'s framing so the bytes a test hand-assembles are the
//! same shapes `pjrmi-client` decodes for real.

use std::collections::HashMap;

use bytes::Bytes;
use pjrmi_client::{InProcessTransport, Transport};
use pjrmi_core::{
    connection::CAPABILITY_SUPPORTS_CALLBACKS,
    types::{CallableDescriptor, SpecificityMatrix, TypeFlags, BOOTSTRAP_NAMES},
    TypeDescriptor, TypeId, TypeRegistry,
};
use pjrmi_proto::{wire, Frame, FrameHeader, MessageType};

/// The server side of an in-process PJRmi connection.
///
/// Bootstrap types (`int`, `java.lang.String`, ...) are pre-registered
/// with sequential ids in [`BOOTSTRAP_NAMES`] order, matching what
/// [`pjrmi_client::PjrmiClient::connect`] resolves at startup; scenario
/// types register on top of those via [`Self::define_type`].
pub struct MockServer {
    transport: InProcessTransport,
    registry: TypeRegistry,
    next_type_id: u32,
}

impl MockServer {
    /// Builds a connected transport pair and a server pre-seeded with
    /// bootstrap types. The client-side half is handed back for the
    /// caller to pass to `PjrmiClient::connect`.
    #[must_use]
    pub fn pair() -> (InProcessTransport, Self) {
        let (client_side, server_side) = InProcessTransport::pair();
        let registry = TypeRegistry::new();
        let mut next_type_id = 1;
        for name in BOOTSTRAP_NAMES {
            registry.insert(bare_type(TypeId(next_type_id), name));
            next_type_id += 1;
        }
        (client_side, Self { transport: server_side, registry, next_type_id })
    }

    /// Id of a previously registered (bootstrap or scenario) type.
    ///
    /// # Panics
    ///
    /// Panics if `name` was never registered — a test bug, not a
    /// runtime condition.
    #[must_use]
    pub fn type_id(&self, name: &str) -> TypeId {
        self.registry.get_by_name(name).unwrap_or_else(|| panic!("type `{name}` not registered")).type_id
    }

    /// The type registry backing this server, for building
    /// [`pjrmi_marshal::marshal::Marshaller`]-encoded reply values with
    /// the same rules the client uses to encode its arguments.
    #[must_use]
    pub fn registry(&self) -> &TypeRegistry {
        &self.registry
    }

    /// Registers a new non-bootstrap type, assigning it the next free
    /// id. `descriptor.type_id` is overwritten with that id so callers
    /// can build the rest of the descriptor (methods, specificity)
    /// without pre-guessing it.
    pub fn define_type(&mut self, mut descriptor: TypeDescriptor) -> TypeId {
        let type_id = TypeId(self.next_type_id);
        self.next_type_id += 1;
        descriptor.type_id = type_id;
        self.registry.insert(descriptor);
        type_id
    }

    /// Drives the handshake (spec.md §4.2): reads the client's hello
    /// preamble, replies with the wire version and service name, then
    /// answers one `TYPE_REQUEST` per bootstrap name with the
    /// pre-registered bootstrap descriptor.
    ///
    /// # Panics
    ///
    /// Panics on any I/O failure or malformed request — a broken
    /// fixture, not a condition a real server tolerates either.
    pub fn serve_handshake(&self, service_name: &str, supports_callbacks: bool) {
        let capability = if supports_callbacks { CAPABILITY_SUPPORTS_CALLBACKS } else { 0 };

        Self::read_hello(&self.transport);
        Self::write_ascii(&self.transport, "PJRMI_1.13");
        Self::write_ascii(&self.transport, service_name);
        self.transport.write_raw(&[capability]).expect("write capability byte");

        for name in BOOTSTRAP_NAMES {
            let request = self.transport.recv_frame().expect("bootstrap TYPE_REQUEST");
            let descriptor = self.registry.get_by_name(name).expect("bootstrap type pre-registered");
            self.reply_type(&request, &descriptor);
        }
    }

    /// Blocks for the next client request frame.
    ///
    /// # Panics
    ///
    /// Panics if the transport closes before a frame arrives.
    #[must_use]
    pub fn recv_request(&self) -> Frame {
        self.transport.recv_frame().expect("client request frame")
    }

    /// Replies to `request` with `message_type` and `payload`, echoing
    /// its thread id and request id (spec.md §4.5: the correlator
    /// matches strictly by request id).
    ///
    /// # Panics
    ///
    /// Panics if the transport is closed.
    pub fn reply(&self, request: &Frame, message_type: MessageType, payload: impl Into<Bytes>) {
        let reply = Frame::new(
            FrameHeader::new(message_type, request.header.thread_id(), request.header.request_id()),
            payload.into(),
        );
        self.transport.send_frame(&reply).expect("send reply frame");
    }

    /// Sends `descriptor` back as a `TYPE_DESCRIPTION` reply.
    pub fn reply_type(&self, request: &Frame, descriptor: &TypeDescriptor) {
        let mut payload = Vec::new();
        descriptor.encode(&mut payload);
        self.reply(request, MessageType::TypeDescription, payload);
    }

    /// Sends an unsolicited (`request_id = -1`) server-originated frame,
    /// e.g. a `CALLBACK` invoking a client-exported function (spec.md
    /// §4.8, §8 scenario 5).
    ///
    /// # Panics
    ///
    /// Panics if the transport is closed.
    pub fn send_unsolicited(&self, message_type: MessageType, thread_id: i64, payload: impl Into<Bytes>) {
        let frame = Frame::request(message_type, thread_id, pjrmi_proto::UNSOLICITED_REQUEST_ID, payload.into());
        self.transport.send_frame(&frame).expect("send unsolicited frame");
    }

    /// Consumes the client's hello preamble byte for byte: the ascii
    /// `HELLO_STRING` (length prefix counts bytes), the UTF-16
    /// command-line (length prefix counts code units), then the raw
    /// `pid`/`self_identifier` fields (spec.md §4.2).
    fn read_hello(transport: &dyn Transport) {
        let read_len_prefixed = |unit_size: usize| {
            let prefix = transport.read_raw(4).expect("length prefix");
            let mut cursor = prefix.as_slice();
            let len = wire::get_i32(&mut cursor).expect("length prefix");
            let _ = transport.read_raw(len.unsigned_abs() as usize * unit_size).expect("length-prefixed field body");
        };
        read_len_prefixed(1); // HELLO_STRING (ascii).
        read_len_prefixed(2); // command_line (utf16 code units).
        let _ = transport.read_raw(4).expect("pid"); // pid
        let _ = transport.read_raw(8).expect("self_identifier"); // self_identifier
    }

    fn write_ascii(transport: &dyn Transport, text: &str) {
        let mut buf = Vec::new();
        wire::put_ascii_string(&mut buf, text);
        transport.write_raw(&buf).expect("write ascii field");
    }
}

/// A `TypeDescriptor` with no fields, constructors, or methods —
/// enough to satisfy bootstrap resolution and act as a placeholder
/// return/argument type a scenario doesn't otherwise care about.
fn bare_type(type_id: TypeId, name: &str) -> TypeDescriptor {
    TypeDescriptor {
        type_id,
        name: name.to_string(),
        flags: TypeFlags::default(),
        array_element_type_id: None,
        supertype_ids: Vec::new(),
        fields: Vec::new(),
        constructors: Vec::new(),
        methods: HashMap::new(),
        method_specificity: HashMap::new(),
        constructor_specificity: SpecificityMatrix::default(),
    }
}

/// A `static` overload with no kwargs, deprecation, or default-method
/// flags set — the shape of every method spec.md §8's scenarios use.
#[must_use]
pub fn static_overload(
    index: i32,
    argument_type_ids: Vec<TypeId>,
    parameter_names: Vec<&str>,
    return_type_id: Option<TypeId>,
) -> CallableDescriptor {
    CallableDescriptor {
        index,
        is_static: true,
        is_deprecated: false,
        is_explicit_only: false,
        accepts_kwargs: false,
        accepted_kwarg_names: Vec::new(),
        return_type_id,
        argument_type_ids,
        parameter_names: parameter_names.into_iter().map(str::to_owned).collect(),
        is_default_method: false,
    }
}
