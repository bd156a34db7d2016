//! The blocking PJRmi client facade: connects, resolves types, marshals
//! arguments, and drives every request/response operation in spec.md §4
//! over a [`ConnectionHandle`].
//!
//! Every public method here blocks the calling thread until its reply
//! arrives (or times out); concurrent callers on the same connection are
//! free to call in from different OS threads at once, since
//! [`crate::correlator::Correlator`] correlates by request id rather than
//! by caller identity.

use std::sync::Arc;
use std::time::Duration;

use bytes::{Buf, BufMut, Bytes};
use pjrmi_core::{
    env::Environment, BoxedValue, CallableDescriptor, CallbackRegistry, Handle, HelloParams, PjrmiError, Proxy,
    TypeDescriptor, TypeId, WrapperKey,
};
use pjrmi_marshal::{decode_value, EncodedArg, Fidelity, MarshalOptions, Marshaller, NumericKind, Value};
use pjrmi_proto::{
    value::{ArgTag, ReferenceArg, ShmArg},
    wire, Frame, MessageType,
};

use crate::{dispatch::CallbackHandler, error::ClientError, lifecycle::ConnectionHandle, transport::Transport};

/// `thread_id` PJRmi uses to identify which OS thread on the server should
/// own a call's lock state; this client uses a stable hash of the calling
/// Rust thread's id, since a live lock held across two calls must be
/// released from a frame carrying the same `thread_id` (spec.md §4.7).
fn calling_thread_id() -> i64 {
    use std::hash::{Hash, Hasher};
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    std::thread::current().id().hash(&mut hasher);
    #[allow(clippy::cast_possible_wrap)]
    {
        hasher.finish() as i64
    }
}

/// A blocking, thread-safe PJRmi client connection.
///
/// Wraps a [`ConnectionHandle`] (transport, correlator, registries,
/// background threads) with the marshaller and callback registry needed
/// to turn local [`Value`]s and exported callables into wire requests.
pub struct PjrmiClient {
    connection: ConnectionHandle,
    callbacks: CallbackRegistry,
    marshal_options: MarshalOptions,
    same_host: bool,
    shm_enabled: bool,
    connection_id: u64,
}

impl PjrmiClient {
    /// Connects to a PJRmi server over `transport`, completes the
    /// handshake, resolves the bootstrap types, and starts the
    /// connection's background threads.
    ///
    /// `shm_enabled` additionally gates the shared-memory fast path
    /// (spec.md §4.9): it is still only used when the transport reports
    /// the peer is on the same host.
    ///
    /// # Errors
    ///
    /// Any handshake, bootstrap-resolution, or transport failure.
    pub fn connect<E: Environment>(
        transport: Arc<dyn Transport>,
        params: &HelloParams,
        handler: Arc<dyn CallbackHandler>,
        shm_dir: std::path::PathBuf,
        shm_enabled: bool,
        marshal_options: MarshalOptions,
        env: E,
    ) -> Result<Self, ClientError> {
        let same_host = transport.is_localhost();
        let connection_id = env.random_u64();
        let connection = ConnectionHandle::connect(transport, params, handler, shm_dir, env)?;

        Ok(Self { connection, callbacks: CallbackRegistry::new(), marshal_options, same_host, shm_enabled, connection_id })
    }

    /// Service name the server advertised.
    #[must_use]
    pub fn service_name(&self) -> &str {
        self.connection.service_name()
    }

    /// Whether the connection is still open.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.connection.is_connected()
    }

    /// Shuts the connection down (spec.md §4.10): flushes pending
    /// reference drops, stops background threads, and closes the
    /// transport.
    pub fn shutdown(&self) {
        self.connection.shutdown();
    }

    fn marshaller(&self) -> Marshaller<'_> {
        Marshaller::new(self.connection.type_registry(), self.marshal_options)
    }

    fn proxy_of(&self, handle: Handle, type_id: TypeId) -> Proxy {
        let proxy = Proxy { connection_id: self.connection_id, handle, type_id };
        self.connection.handle_registry().pin(proxy);
        proxy
    }

    fn call(&self, message_type: MessageType, payload: Bytes, timeout: Option<Duration>) -> Result<Frame, ClientError> {
        let request_id = self.connection.request_ids().next();
        let frame = Frame::request(message_type, calling_thread_id(), request_id, payload);
        self.connection.correlator().call(&frame, timeout)
    }

    /// Decodes a reply frame into the shape its message type describes,
    /// translating an `Exception` reply into
    /// [`PjrmiError::RemoteException`] up front so every call site gets
    /// a uniform `Err` for a remote-side failure.
    fn decode_response(&self, reply: &Frame) -> Result<Response, ClientError> {
        let Some(message_type) = reply.header.message_type() else {
            return Err(
                PjrmiError::UnexpectedMessage {
                    phase: pjrmi_core::ConnectionPhase::Established,
                    message_type: reply.header.message_type_byte(),
                }
                .into(),
            );
        };

        let mut payload = reply.payload.clone();
        match message_type {
            MessageType::Exception => {
                let type_id = wire::get_i32(&mut payload).map_err(PjrmiError::from)? as u32;
                let message = wire::get_utf16_string(&mut payload).map_err(PjrmiError::from)?;
                Err(PjrmiError::RemoteException { type_id, message }.into())
            }
            MessageType::ObjectReference | MessageType::PythonReference => {
                let handle = wire::get_i64(&mut payload).map_err(PjrmiError::from)?;
                let type_id = wire::get_i32(&mut payload).map_err(PjrmiError::from)? as u32;
                Ok(Response::Object(Handle(handle), TypeId(type_id)))
            }
            MessageType::TypeDescription => {
                let descriptor = TypeDescriptor::decode(&mut payload).map_err(PjrmiError::from)?;
                Ok(Response::Type(self.connection.type_registry().insert(descriptor)))
            }
            MessageType::ArbitraryItem => {
                Ok(Response::Value(decode_value(&mut payload, self.connection.type_registry())?))
            }
            MessageType::AsciiValue => {
                Ok(Response::Text(wire::get_ascii_string(&mut payload).map_err(PjrmiError::from)?))
            }
            MessageType::Utf16Value => {
                Ok(Response::Text(wire::get_utf16_string(&mut payload).map_err(PjrmiError::from)?))
            }
            MessageType::PickleBytes => Ok(Response::Bytes(payload)),
            MessageType::EmptyAck => Ok(Response::Ack),
            MessageType::ArrayLengthReply => {
                Ok(Response::Length(wire::get_i32(&mut payload).map_err(PjrmiError::from)?))
            }
            MessageType::ShmBytes => self.decode_shm_response(&mut payload).map(Response::Value),
            other => Err(
                PjrmiError::UnexpectedMessage {
                    phase: pjrmi_core::ConnectionPhase::Established,
                    message_type: other.to_u8(),
                }
                .into(),
            ),
        }
    }

    /// Decodes a `ShmBytes` response body: UTF-16 filename · int32 length
    /// · UTF-16 dtype-code (spec.md §4.9), the same body shape the `S`-tag
    /// carries for an outgoing argument, minus the leading tag byte that
    /// the message type already substitutes for.
    fn decode_shm_response(&self, payload: &mut Bytes) -> Result<Value, ClientError> {
        let file_name = wire::get_utf16_string(payload).map_err(PjrmiError::from)?;
        let length = wire::get_i32(payload).map_err(PjrmiError::from)?;
        let dtype = wire::get_utf16_string(payload).map_err(PjrmiError::from)?;
        let kind = numeric_kind_from_dtype(&dtype).ok_or_else(|| PjrmiError::MarshalError {
            type_id: 0,
            reason: format!("unrecognized SHM dtype code `{dtype}`"),
        })?;

        let bytes = crate::shm::read_array(self.connection.shm_dir(), &file_name)?;
        let mut cursor = bytes.as_slice();
        let mut elements = Vec::with_capacity(length.max(0) as usize);
        for _ in 0..length {
            elements.push(read_numeric_element(&mut cursor, kind)?);
        }
        Ok(Value::NumericArray(kind, elements))
    }

    /// Looks up a named top-level instance the server exposes (spec.md
    /// §4.1's `INSTANCE_LOOKUP`), e.g. a singleton registered under a
    /// dotted name.
    ///
    /// # Errors
    ///
    /// A remote exception if no such instance exists, or a transport
    /// failure.
    pub fn lookup_instance(&self, name: &str) -> Result<Proxy, ClientError> {
        let mut payload = Vec::new();
        wire::put_utf16_string(&mut payload, name);
        let reply = self.call(MessageType::InstanceLookup, Bytes::from(payload), None)?;
        match self.decode_response(&reply)? {
            Response::Object(handle, type_id) => Ok(self.proxy_of(handle, type_id)),
            other => Err(unexpected_response("ObjectReference", other)),
        }
    }

    /// Resolves a type by its fully-qualified name, populating the type
    /// registry cache on first use.
    ///
    /// # Errors
    ///
    /// A remote exception if the name is unknown, or a transport failure.
    pub fn resolve_type(&self, name: &str) -> Result<Arc<TypeDescriptor>, ClientError> {
        if let Some(cached) = self.connection.type_registry().get_by_name(name) {
            return Ok(cached);
        }
        let mut payload = Vec::new();
        payload.put_u8(0); // tag 0: by name (spec.md §4.3).
        wire::put_utf16_string(&mut payload, name);
        let reply = self.call(MessageType::TypeRequest, Bytes::from(payload), None)?;
        match self.decode_response(&reply)? {
            Response::Type(descriptor) => Ok(descriptor),
            other => Err(unexpected_response("TypeDescription", other)),
        }
    }

    /// Explicitly increments the peer's reference count for `proxy`
    /// (spec.md §4.6's `ADD_REFERENCE`), for when a handle is about to be
    /// shared beyond this client's own lifetime tracking (e.g. handed to
    /// a third connection).
    ///
    /// # Errors
    ///
    /// A transport failure or remote exception.
    pub fn add_reference(&self, proxy: &Proxy) -> Result<(), ClientError> {
        let mut payload = Vec::new();
        payload.put_i64(proxy.handle.0);
        let reply = self.call(MessageType::AddReference, Bytes::from(payload), None)?;
        self.expect_ack(&reply)
    }

    /// Releases this client's local hold on `proxy`; the reference drop
    /// is queued and sent to the peer in the next batched
    /// `DROP_REFERENCES` flush (spec.md §4.6). If this release pushes the
    /// pending count over the threshold, that flush happens immediately
    /// on this thread rather than waiting for the periodic tick.
    pub fn release(&self, proxy: &Proxy) {
        self.connection.handle_registry().release(proxy.handle);
        self.connection.flush_drops_if_over_threshold();
    }

    /// Invokes a method on `proxy`, resolving the overload via spec.md
    /// §4.4's five-step algorithm.
    ///
    /// # Errors
    ///
    /// [`PjrmiError::OverloadResolution`] if zero or more than one
    /// candidate survives; a remote exception if the call itself throws;
    /// a transport failure.
    pub fn call_method(&self, proxy: &Proxy, method_name: &str, args: &[Value]) -> Result<Value, ClientError> {
        self.call_method_inner(proxy, method_name, args, None)
    }

    /// As [`Self::call_method`], but bounded by `timeout` (spec.md §4.5:
    /// "purely caller-imposed"; the correlator itself never applies one).
    ///
    /// # Errors
    ///
    /// [`ClientError::TimedOut`] if `timeout` elapses first; otherwise as
    /// [`Self::call_method`].
    pub fn call_method_with_timeout(
        &self,
        proxy: &Proxy,
        method_name: &str,
        args: &[Value],
        timeout: Duration,
    ) -> Result<Value, ClientError> {
        self.call_method_inner(proxy, method_name, args, Some(timeout))
    }

    fn call_method_inner(
        &self,
        proxy: &Proxy,
        method_name: &str,
        args: &[Value],
        timeout: Option<Duration>,
    ) -> Result<Value, ClientError> {
        let type_descriptor = self.connection.type_registry().get_by_id(proxy.type_id).ok_or(
            PjrmiError::MarshalError { type_id: proxy.type_id.0, reason: "proxy's type is not resolved".to_owned() },
        )?;

        let candidates = type_descriptor.methods_named(method_name, args.len());
        if candidates.is_empty() {
            return Err(PjrmiError::OverloadResolution {
                name: method_name.to_owned(),
                reason: format!("no overload of `{method_name}` takes {} argument(s)", args.len()),
            }
            .into());
        }

        // `method_specificity`'s matrix indexes by position in the
        // overload's full `methods[name]` vec (every arity together), not
        // by the server-assigned `CallableDescriptor::index` wire handle
        // and not by position in the arity-filtered `candidates` above.
        let all_overloads = type_descriptor.methods.get(method_name);
        let full_position_of = |candidate: &CallableDescriptor| -> usize {
            all_overloads
                .into_iter()
                .flatten()
                .position(|c| std::ptr::eq(c, candidate))
                .unwrap_or(0)
        };

        let marshaller = self.marshaller();
        let mut fits = Vec::with_capacity(candidates.len());
        let mut encodings: Vec<Option<Vec<EncodedArg>>> = Vec::with_capacity(candidates.len());
        for candidate in candidates.iter().copied() {
            if candidate.is_explicit_only {
                continue;
            }
            let mut argument_fits = Vec::with_capacity(args.len());
            let mut encoded = Vec::with_capacity(args.len());
            let mut compatible = true;
            for (arg, target) in args.iter().zip(&candidate.argument_type_ids) {
                match marshaller.marshal_with_fidelity(arg, *target, false) {
                    Ok((enc, fidelity)) => {
                        argument_fits.push(match fidelity {
                            Fidelity::Exact => pjrmi_marshal::ArgumentFit::Exact,
                            Fidelity::PrecisionLoss => pjrmi_marshal::ArgumentFit::PrecisionLoss,
                        });
                        encoded.push(enc);
                    }
                    Err(err) => {
                        argument_fits.push(pjrmi_marshal::ArgumentFit::Incompatible(err.to_string()));
                        compatible = false;
                    }
                }
            }
            let index = full_position_of(candidate);
            fits.push(pjrmi_marshal::CandidateFit { index, candidate, argument_fits });
            encodings.push(if compatible { Some(encoded) } else { None });
        }

        let specificity = type_descriptor.method_specificity.get(method_name).cloned().unwrap_or_default();
        let outcome = pjrmi_marshal::resolve(method_name, fits, &specificity);
        let winner_full_index = match outcome {
            pjrmi_marshal::ResolutionOutcome::Resolved(index) => index,
            pjrmi_marshal::ResolutionOutcome::NoMatch(sigs) => {
                return Err(PjrmiError::OverloadResolution {
                    name: method_name.to_owned(),
                    reason: format!("no overload matched: {}", sigs.join(", ")),
                }
                .into());
            }
            pjrmi_marshal::ResolutionOutcome::Ambiguous(sigs) => {
                return Err(PjrmiError::OverloadResolution {
                    name: method_name.to_owned(),
                    reason: format!("call is ambiguous between: {}", sigs.join(", ")),
                }
                .into());
            }
        };
        let position = candidates
            .iter()
            .position(|c| full_position_of(*c) == winner_full_index)
            .ok_or_else(|| PjrmiError::OverloadResolution {
                name: method_name.to_owned(),
                reason: "resolved candidate vanished from the overload list".to_owned(),
            })?;
        let winner = candidates[position];
        let Some(Some(encoded_args)) = encodings.get(position) else {
            return Err(PjrmiError::OverloadResolution {
                name: method_name.to_owned(),
                reason: "resolved candidate had no cached encoding".to_owned(),
            }
            .into());
        };

        let mut payload = Vec::new();
        payload.put_i64(proxy.handle.0);
        payload.put_i32(winner.index);
        #[allow(clippy::cast_possible_truncation)]
        payload.put_i32(encoded_args.len() as i32);
        for encoded in encoded_args {
            self.append_argument(&mut payload, encoded)?;
        }
        payload.put_i32(0); // kwarg_count: keyword arguments are out of scope for this client.

        let reply = self.call(MessageType::MethodCall, Bytes::from(payload), timeout)?;
        match self.decode_response(&reply)? {
            Response::Value(value) => Ok(value),
            Response::Object(handle, type_id) => Ok(Value::Handle(self.proxy_of(handle, type_id).handle)),
            Response::Ack => Ok(Value::Null),
            other => Err(unexpected_response("ArbitraryItem", other)),
        }
    }

    /// Appends one already-resolved argument to a request payload,
    /// routing a numeric array through the shared-memory channel when
    /// [`pjrmi_marshal::shm_policy`] says it is eligible (spec.md §4.9),
    /// and falling back to the inline encoding on any SHM failure.
    fn append_argument(&self, payload: &mut Vec<u8>, encoded: &EncodedArg) -> Result<(), ClientError> {
        match encoded {
            EncodedArg::Reference(handle) => {
                ReferenceArg { handle: handle.0 }.encode(payload);
                Ok(())
            }
            EncodedArg::Inline(bytes) => {
                if let Some(shm_bytes) = self.try_shm_encode(bytes)? {
                    payload.extend_from_slice(&shm_bytes);
                } else {
                    payload.extend_from_slice(bytes);
                }
                Ok(())
            }
        }
    }

    /// Attempts to replace an inline `V`-tagged numeric-array encoding
    /// with an out-of-band SHM one. Returns `Ok(None)` whenever the
    /// array is not SHM-eligible (not an array, wrong host, feature
    /// disabled, peer extension absent, or too long) so the caller falls
    /// back to the inline bytes it already has.
    fn try_shm_encode(&self, inline: &bytes::BytesMut) -> Result<Option<Vec<u8>>, ClientError> {
        let mut cursor = inline.clone().freeze();
        let Ok(first_byte) = wire::get_u8(&mut cursor) else { return Ok(None) };
        let Ok(tag) = ArgTag::try_from_u8(first_byte) else { return Ok(None) };
        if tag != ArgTag::Value {
            return Ok(None);
        }
        let Ok(type_id) = wire::get_i32(&mut cursor) else { return Ok(None) };
        let Some(descriptor) = self.connection.type_registry().get_by_id(TypeId(type_id as u32)) else {
            return Ok(None);
        };
        if !descriptor.flags.is_array {
            return Ok(None);
        }
        let Some(element_type) = descriptor.array_element_type_id else { return Ok(None) };
        let Some(element_descriptor) = self.connection.type_registry().get_by_id(element_type) else {
            return Ok(None);
        };
        let Some(kind) = NumericKind::from_primitive_name(&element_descriptor.name) else {
            return Ok(None);
        };

        let Ok(length) = wire::get_i32(&mut cursor) else { return Ok(None) };
        let candidate = pjrmi_marshal::ShmCandidate {
            same_host: self.same_host,
            feature_enabled: self.shm_enabled,
            extension_present: self.same_host,
            element_kind: Some(kind),
            length: i64::from(length),
            target_accepts_shm: true,
        };
        if pjrmi_marshal::evaluate(candidate) != pjrmi_marshal::ShmDecision::Eligible {
            return Ok(None);
        }

        let raw = cursor.chunk().to_vec();
        let Ok(file_name) = crate::shm::write_array(self.connection.shm_dir(), &raw) else {
            return Ok(None);
        };

        let mut out = Vec::new();
        ShmArg { file_name, length, dtype_code: pjrmi_marshal::dtype_code(kind).to_owned() }.encode(&mut out);
        Ok(Some(out))
    }

    /// Returns the peer's string representation of `proxy` (spec.md
    /// §4.1's `TO_STRING`).
    ///
    /// # Errors
    ///
    /// A remote exception or transport failure.
    pub fn to_string_of(&self, proxy: &Proxy) -> Result<String, ClientError> {
        let mut payload = Vec::new();
        payload.put_i64(proxy.handle.0);
        let reply = self.call(MessageType::ToString, Bytes::from(payload), None)?;
        match self.decode_response(&reply)? {
            Response::Text(text) => Ok(text),
            other => Err(unexpected_response("AsciiValue/Utf16Value", other)),
        }
    }

    /// Reads a field on `proxy` by name.
    ///
    /// # Errors
    ///
    /// [`PjrmiError::MarshalError`] if the named field does not exist; a
    /// remote exception or transport failure.
    pub fn get_field(&self, proxy: &Proxy, field_name: &str) -> Result<Value, ClientError> {
        let descriptor = self.connection.type_registry().get_by_id(proxy.type_id).ok_or(
            PjrmiError::MarshalError { type_id: proxy.type_id.0, reason: "proxy's type is not resolved".to_owned() },
        )?;
        if !descriptor.fields.iter().any(|f| f.name == field_name) {
            return Err(PjrmiError::MarshalError {
                type_id: proxy.type_id.0,
                reason: format!("no field named `{field_name}`"),
            }
            .into());
        }

        let mut payload = Vec::new();
        payload.put_i64(proxy.handle.0);
        wire::put_utf16_string(&mut payload, field_name);
        let reply = self.call(MessageType::GetField, Bytes::from(payload), None)?;
        match self.decode_response(&reply)? {
            Response::Value(value) => Ok(value),
            Response::Object(handle, type_id) => Ok(Value::Handle(self.proxy_of(handle, type_id).handle)),
            other => Err(unexpected_response("ArbitraryItem", other)),
        }
    }

    /// Writes a field on `proxy` by name.
    ///
    /// # Errors
    ///
    /// A marshalling failure, remote exception, or transport failure.
    pub fn set_field(&self, proxy: &Proxy, field_name: &str, value: &Value) -> Result<(), ClientError> {
        let descriptor = self.connection.type_registry().get_by_id(proxy.type_id).ok_or(
            PjrmiError::MarshalError { type_id: proxy.type_id.0, reason: "proxy's type is not resolved".to_owned() },
        )?;
        let field = descriptor.fields.iter().find(|f| f.name == field_name).ok_or_else(|| PjrmiError::MarshalError {
            type_id: proxy.type_id.0,
            reason: format!("no field named `{field_name}`"),
        })?;

        let encoded = self.marshaller().marshal(value, field.field_type_id, false)?;

        let mut payload = Vec::new();
        payload.put_i64(proxy.handle.0);
        wire::put_utf16_string(&mut payload, field_name);
        self.append_argument(&mut payload, &encoded)?;
        let reply = self.call(MessageType::SetField, Bytes::from(payload), None)?;
        self.expect_ack(&reply)
    }

    /// Returns the length of the remote array `proxy` refers to.
    ///
    /// # Errors
    ///
    /// A remote exception (not an array) or transport failure.
    pub fn array_length(&self, proxy: &Proxy) -> Result<i32, ClientError> {
        let mut payload = Vec::new();
        payload.put_i64(proxy.handle.0);
        let reply = self.call(MessageType::ArrayLength, Bytes::from(payload), None)?;
        match self.decode_response(&reply)? {
            Response::Length(len) => Ok(len),
            other => Err(unexpected_response("ArrayLengthReply", other)),
        }
    }

    /// Allocates a new remote array of `element_type` with `length`
    /// elements.
    ///
    /// # Errors
    ///
    /// A remote exception or transport failure.
    pub fn new_array(&self, element_type: TypeId, length: i32) -> Result<Proxy, ClientError> {
        let mut payload = Vec::new();
        payload.put_i32(element_type.0 as i32);
        payload.put_i32(length);
        let reply = self.call(MessageType::NewArray, Bytes::from(payload), None)?;
        match self.decode_response(&reply)? {
            Response::Object(handle, type_id) => Ok(self.proxy_of(handle, type_id)),
            other => Err(unexpected_response("ObjectReference", other)),
        }
    }

    /// Casts `proxy` to `target_type`, returning a new proxy of that
    /// type sharing the same remote handle.
    ///
    /// # Errors
    ///
    /// A remote exception (incompatible cast) or transport failure.
    pub fn cast(&self, proxy: &Proxy, target_type: TypeId) -> Result<Proxy, ClientError> {
        let mut payload = Vec::new();
        payload.put_i64(proxy.handle.0);
        payload.put_i32(target_type.0 as i32);
        let reply = self.call(MessageType::Cast, Bytes::from(payload), None)?;
        match self.decode_response(&reply)? {
            Response::Object(handle, type_id) => Ok(self.proxy_of(handle, type_id)),
            other => Err(unexpected_response("ObjectReference", other)),
        }
    }

    /// Acquires the peer-side monitor lock on `proxy` (spec.md §4.1's
    /// `LOCK`). Blocks on the server until the lock is available.
    ///
    /// # Errors
    ///
    /// A remote exception or transport failure.
    pub fn lock(&self, proxy: &Proxy) -> Result<(), ClientError> {
        let mut payload = Vec::new();
        payload.put_i64(proxy.handle.0);
        let reply = self.call(MessageType::Lock, Bytes::from(payload), None)?;
        self.expect_ack(&reply)
    }

    /// Releases the peer-side monitor lock on `proxy`.
    ///
    /// # Errors
    ///
    /// A remote exception (not locked by this thread) or transport
    /// failure.
    pub fn unlock(&self, proxy: &Proxy) -> Result<(), ClientError> {
        let mut payload = Vec::new();
        payload.put_i64(proxy.handle.0);
        let reply = self.call(MessageType::Unlock, Bytes::from(payload), None)?;
        self.expect_ack(&reply)
    }

    /// Injects compiled class bytes under `class_name`, returning the
    /// resulting type descriptor (spec.md §4.1's `INJECT_CLASS`).
    ///
    /// # Errors
    ///
    /// A remote exception (bad bytecode, name clash) or transport
    /// failure.
    pub fn inject_class(&self, class_name: &str, bytecode: &[u8]) -> Result<Arc<TypeDescriptor>, ClientError> {
        let mut payload = Vec::new();
        wire::put_utf16_string(&mut payload, class_name);
        #[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
        payload.put_i32(bytecode.len() as i32);
        payload.extend_from_slice(bytecode);
        let reply = self.call(MessageType::InjectClass, Bytes::from(payload), None)?;
        match self.decode_response(&reply)? {
            Response::Type(descriptor) => Ok(descriptor),
            other => Err(unexpected_response("TypeDescription", other)),
        }
    }

    /// Unboxes `proxy` (a boxed primitive wrapper, e.g. `java.lang.Integer`)
    /// into a value that quacks like the native numeric/string type while
    /// still carrying `proxy`'s handle — spec.md §3's "Box" (get-value-of
    /// is one of §4.1's client→server message types). Pass the result to
    /// [`boxed_value_as_argument`] when marshalling it back out, so the
    /// handle is preferred over re-encoding the native value.
    ///
    /// # Errors
    ///
    /// A remote exception or transport failure.
    pub fn get_value_of(&self, proxy: &Proxy) -> Result<BoxedValue<Value>, ClientError> {
        let mut payload = Vec::new();
        payload.put_i64(proxy.handle.0);
        let reply = self.call(MessageType::GetValueOf, Bytes::from(payload), None)?;
        match self.decode_response(&reply)? {
            Response::Value(value) => Ok(BoxedValue::remote(value, *proxy)),
            other => Err(unexpected_response("ArbitraryItem", other)),
        }
    }

    /// Exports a local callable to the peer as a functional-interface
    /// instance the server can invoke (spec.md §4.8). `callable_identity`
    /// should be stable across calls for the *same* underlying callable,
    /// so repeated exports of one closure reuse a single wire handle
    /// rather than minting a new one each time.
    ///
    /// # Errors
    ///
    /// [`ClientError::UnsupportedByPeer`] if the peer's handshake did not
    /// advertise callback support; a remote exception or transport
    /// failure otherwise.
    pub fn export_callback(&self, callable_identity: u64, target_type: TypeId, arity: u8) -> Result<Proxy, ClientError> {
        if !self.connection.supports_callbacks() {
            return Err(ClientError::UnsupportedByPeer("peer does not dispatch callbacks".to_owned()));
        }

        let local_id =
            self.callbacks.local_id_for(WrapperKey { callable_identity, target_type_id: target_type }, arity)?;

        let mut payload = Vec::new();
        payload.put_i64(local_id.0);
        payload.put_u8(arity);
        payload.put_i32(target_type.0 as i32);
        let reply = self.call(MessageType::GetCallbackHandle, Bytes::from(payload), None)?;
        match self.decode_response(&reply)? {
            Response::Object(handle, type_id) => {
                self.callbacks.record_export(local_id, Some(arity), handle.0);
                Ok(self.proxy_of(handle, type_id))
            }
            other => Err(unexpected_response("ObjectReference", other)),
        }
    }

    /// Looks up a dotted Python-side name (spec.md §4.1's `GET_PROXY`),
    /// e.g. `"numpy.array"`, returning a proxy to the referenced object.
    ///
    /// # Errors
    ///
    /// A remote exception (unresolved name) or transport failure.
    pub fn get_proxy(&self, dotted_name: &str) -> Result<Proxy, ClientError> {
        let mut payload = Vec::new();
        wire::put_utf16_string(&mut payload, dotted_name);
        let reply = self.call(MessageType::GetProxy, Bytes::from(payload), None)?;
        match self.decode_response(&reply)? {
            Response::Object(handle, type_id) => Ok(self.proxy_of(handle, type_id)),
            other => Err(unexpected_response("PythonReference", other)),
        }
    }

    /// Invokes a dotted callable (spec.md §4.1's `INVOKE_AND_GET_OBJECT`),
    /// either returning its value inline or, when `export_result` is set,
    /// exporting it and returning a proxy instead (useful for results too
    /// large or stateful to marshal by value).
    ///
    /// # Errors
    ///
    /// A marshalling failure, remote exception, or transport failure.
    pub fn invoke_and_get_object(&self, dotted_name: &str, args: &[Value], export_result: bool) -> Result<Value, ClientError> {
        let marshaller = self.marshaller();
        let object_type = self.resolve_type("java.lang.Object")?;

        let mut payload = Vec::new();
        wire::put_utf16_string(&mut payload, dotted_name);
        #[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
        payload.put_i32(args.len() as i32);
        for arg in args {
            let encoded = marshaller.marshal(arg, object_type.type_id, false)?;
            self.append_argument(&mut payload, &encoded)?;
        }
        payload.put_u8(u8::from(export_result));

        let reply = self.call(MessageType::InvokeAndGetObject, Bytes::from(payload), None)?;
        match self.decode_response(&reply)? {
            Response::Value(value) => Ok(value),
            Response::Object(handle, type_id) => Ok(Value::Handle(self.proxy_of(handle, type_id).handle)),
            other => Err(unexpected_response("ArbitraryItem/ObjectReference", other)),
        }
    }

    /// Injects free-standing source text the peer compiles and executes
    /// in its embedded interpreter (spec.md §4.1's `INJECT_SOURCE`).
    ///
    /// # Errors
    ///
    /// A remote exception (compile/execution error) or transport
    /// failure.
    pub fn inject_source(&self, source: &str) -> Result<(), ClientError> {
        let mut payload = Vec::new();
        wire::put_utf16_string(&mut payload, source);
        let reply = self.call(MessageType::InjectSource, Bytes::from(payload), None)?;
        self.expect_ack(&reply)
    }

    /// Replaces an already-injected class's bytecode in place (spec.md
    /// §4.1's `REPLACE_CLASS`), e.g. for hot-reloading a previously
    /// injected class.
    ///
    /// # Errors
    ///
    /// A remote exception (unknown class, incompatible replacement) or
    /// transport failure.
    pub fn replace_class(&self, class_name: &str, bytecode: &[u8]) -> Result<(), ClientError> {
        let mut payload = Vec::new();
        wire::put_utf16_string(&mut payload, class_name);
        #[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
        payload.put_i32(bytecode.len() as i32);
        payload.extend_from_slice(bytecode);
        let reply = self.call(MessageType::ReplaceClass, Bytes::from(payload), None)?;
        self.expect_ack(&reply)
    }

    fn expect_ack(&self, reply: &Frame) -> Result<(), ClientError> {
        match self.decode_response(reply)? {
            Response::Ack => Ok(()),
            other => Err(unexpected_response("EmptyAck", other)),
        }
    }
}

/// A decoded reply, collapsed across the several message types that can
/// answer any given request (spec.md §4.1 documents which reply type
/// each request expects; call sites narrow this down themselves).
enum Response {
    Object(Handle, TypeId),
    Type(Arc<TypeDescriptor>),
    Value(Value),
    Text(String),
    #[allow(dead_code, reason = "payload decoded for completeness; no call site needs it yet")]
    Bytes(Bytes),
    Ack,
    Length(i32),
}

/// Resolves a box obtained from [`PjrmiClient::get_value_of`] into the
/// [`Value`] to marshal when passing it as an argument, preferring the
/// remote handle over re-encoding the native value (spec.md §3: "a box
/// carries both the native value and the remote handle; marshalling a box
/// back out must prefer the handle").
#[must_use]
pub fn boxed_value_as_argument(boxed: &BoxedValue<Value>) -> Value {
    match boxed.preferred_handle() {
        Some(handle) => Value::Handle(handle),
        None => boxed.native.clone(),
    }
}

fn unexpected_response(expected: &str, got: Response) -> ClientError {
    let got = match got {
        Response::Object(..) => "ObjectReference",
        Response::Type(_) => "TypeDescription",
        Response::Value(_) => "ArbitraryItem",
        Response::Text(_) => "AsciiValue/Utf16Value",
        Response::Bytes(_) => "PickleBytes",
        Response::Ack => "EmptyAck",
        Response::Length(_) => "ArrayLengthReply",
    };
    PjrmiError::Protocol(format!("expected a {expected} reply, got {got}")).into()
}

fn numeric_kind_from_dtype(dtype: &str) -> Option<NumericKind> {
    Some(match dtype {
        "b" => NumericKind::Byte,
        "s" => NumericKind::Short,
        "c" => NumericKind::Char,
        "i" => NumericKind::Int,
        "l" => NumericKind::Long,
        "f" => NumericKind::Float,
        "d" => NumericKind::Double,
        _ => return None,
    })
}

fn read_numeric_element(buf: &mut &[u8], kind: NumericKind) -> Result<pjrmi_marshal::NumericValue, ClientError> {
    use pjrmi_marshal::NumericValue;
    Ok(match kind {
        NumericKind::Byte => NumericValue::Byte(wire::get_u8(buf).map_err(PjrmiError::from)? as i8),
        NumericKind::Short => NumericValue::Short(buf.get_i16()),
        NumericKind::Char => NumericValue::Char(buf.get_i16() as u16),
        NumericKind::Int => NumericValue::Int(wire::get_i32(buf).map_err(PjrmiError::from)?),
        NumericKind::Long => NumericValue::Long(wire::get_i64(buf).map_err(PjrmiError::from)?),
        NumericKind::Float => NumericValue::Float(wire::get_f32(buf).map_err(PjrmiError::from)?),
        NumericKind::Double => NumericValue::Double(wire::get_f64(buf).map_err(PjrmiError::from)?),
    })
}
