//! Connection lifecycle: handshake driving, startup, and shutdown
//! (spec.md §4.10).
//!
//! Everything in [`pjrmi_core::connection`] is a pure state machine; this
//! module is the driver that feeds it bytes read off a [`Transport`] and
//! carries out the actions it returns. It also owns the sequence of
//! background threads a live connection keeps running (receiver, in
//! [`crate::correlator::Correlator`]; drop-flusher; SHM cleaner) and the
//! fork-survival exit hook.

use std::sync::{
    atomic::{AtomicBool, AtomicI32, Ordering},
    Arc, Mutex, OnceLock, Weak,
};

use bytes::{BufMut, Bytes};
use pjrmi_core::{
    connection::{Connection, ConnectionAction, HelloParams},
    env::Environment,
    handle_registry::HandleRegistry,
    type_registry::TypeRegistry,
    types::TypeDescriptor,
    PjrmiError,
};
use pjrmi_proto::{wire, Frame, MessageType};

use crate::{
    correlator::{CorrelationMode, Correlator},
    dispatch::{spawn_worker_pool, CallbackHandler},
    error::ClientError,
    transport::Transport,
};

/// Number of dispatch workers spawned for a reentrant connection (spec.md
/// §4.8: "grown on demand"; this is the initial pool size).
const INITIAL_WORKER_COUNT: usize = 4;

/// `thread_id` used for frames this module originates that aren't tied to
/// any particular calling thread on the server (bootstrap type lookups,
/// batched reference drops).
const LIFECYCLE_THREAD_ID: i64 = 0;

/// Allocates connection-scoped request ids, skipping
/// [`pjrmi_proto::message::UNSOLICITED_REQUEST_ID`] (spec.md §3: that
/// value is reserved for server-originated, unmatched requests).
#[derive(Debug)]
pub struct RequestIdAllocator {
    next: AtomicI32,
}

impl Default for RequestIdAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl RequestIdAllocator {
    /// Creates an allocator starting at 0.
    #[must_use]
    pub fn new() -> Self {
        Self { next: AtomicI32::new(0) }
    }

    /// Returns the next request id, wrapping past `i32::MAX` back to 0 and
    /// never yielding `-1`.
    pub fn next(&self) -> i32 {
        loop {
            let id = self.next.fetch_add(1, Ordering::Relaxed);
            if id != pjrmi_proto::message::UNSOLICITED_REQUEST_ID {
                return id;
            }
        }
    }
}

/// Reads a length-prefixed handshake field off `transport`: a 4-byte
/// big-endian length (positive or negative) followed by `abs(length)`
/// bytes of payload, returned concatenated so the result can be fed
/// straight to `Connection::handle_hello_echo` /
/// `Connection::handle_service_string`, both of which parse the prefix
/// themselves.
fn read_length_prefixed_field(transport: &dyn Transport) -> Result<Vec<u8>, ClientError> {
    let prefix = transport.read_raw(4)?;
    let mut cursor = prefix.as_slice();
    let len = wire::get_i32(&mut cursor).map_err(PjrmiError::from)?;
    let body = transport.read_raw(len.unsigned_abs() as usize)?;

    let mut field = prefix;
    field.extend(body);
    Ok(field)
}

fn apply(
    transport: &dyn Transport,
    actions: Vec<ConnectionAction>,
) -> Result<Option<(String, bool)>, ClientError> {
    for action in actions {
        match action {
            ConnectionAction::SendBytes(bytes) => transport.write_raw(&bytes)?,
            ConnectionAction::HandshakeComplete { service_name, supports_callbacks } => {
                return Ok(Some((service_name, supports_callbacks)));
            },
            ConnectionAction::Close { reason } => {
                return Err(ClientError::Pjrmi(PjrmiError::ConnectionRejected { reason }));
            },
        }
    }
    Ok(None)
}

/// Drives the full handshake (spec.md §4.2) over `transport`, returning
/// the service name and callback-support bit the server advertised.
fn run_handshake(
    transport: &dyn Transport,
    params: &HelloParams,
) -> Result<(String, bool), ClientError> {
    let mut connection = Connection::new();

    apply(transport, connection.send_hello(params)?)?;

    let echo = read_length_prefixed_field(transport)?;
    apply(transport, connection.handle_hello_echo(&echo)?)?;

    let service = read_length_prefixed_field(transport)?;
    apply(transport, connection.handle_service_string(&service)?)?;

    let capability_byte = transport.read_raw(1)?;
    let actions = connection.handle_capability_byte(capability_byte[0])?;

    apply(transport, actions)?.ok_or_else(|| {
        ClientError::Pjrmi(PjrmiError::Protocol(
            "capability byte did not complete the handshake".to_string(),
        ))
    })
}

fn encode_type_request_by_name(name: &str) -> Bytes {
    let mut buf = Vec::new();
    buf.put_u8(0); // tag 0: by name (spec.md §4.3: "tagged by name or id")
    wire::put_utf16_string(&mut buf, name);
    Bytes::from(buf)
}

/// Resolves every name in [`pjrmi_core::types::BOOTSTRAP_NAMES`] not
/// already cached, in the fixed bootstrap order (spec.md §4.3), sending
/// one `TYPE_REQUEST` per name and decoding its `TYPE_DESCRIPTION` reply.
fn resolve_bootstrap_types(
    correlator: &Correlator,
    type_registry: &TypeRegistry,
    request_ids: &RequestIdAllocator,
) -> Result<(), ClientError> {
    for name in type_registry.missing_bootstrap_names() {
        let request_id = request_ids.next();
        let request = Frame::request(
            MessageType::TypeRequest,
            LIFECYCLE_THREAD_ID,
            request_id,
            encode_type_request_by_name(name),
        );

        let reply = correlator.call(&request, None)?;
        let mut payload = reply.payload.clone();
        let descriptor = TypeDescriptor::decode(&mut payload).map_err(PjrmiError::from)?;
        type_registry.insert(descriptor);
    }
    Ok(())
}

/// Global registry of live connections' transports, consulted by the
/// `atexit` hook installed by [`connect`] so each connection can
/// best-effort disconnect exactly once, only if this process is still the
/// one that opened it (spec.md §4.10: "survive `fork`").
static EXIT_HOOK: OnceLock<Mutex<Vec<(i32, Weak<dyn Transport>)>>> = OnceLock::new();

fn exit_hook_registry() -> &'static Mutex<Vec<(i32, Weak<dyn Transport>)>> {
    EXIT_HOOK.get_or_init(|| Mutex::new(Vec::new()))
}

extern "C" fn run_exit_hook() {
    let current_pid = std::process::id() as i32;
    #[allow(clippy::unwrap_used)]
    let entries = exit_hook_registry().lock().unwrap();
    for (connect_pid, transport) in entries.iter() {
        if *connect_pid != current_pid {
            continue;
        }
        if let Some(transport) = transport.upgrade() {
            let _ = transport.disconnect();
        }
    }
}

fn install_exit_hook(connect_pid: i32, transport: &Arc<dyn Transport>) {
    #[allow(clippy::unwrap_used)]
    exit_hook_registry().lock().unwrap().push((connect_pid, Arc::downgrade(transport)));

    static INSTALLED: std::sync::Once = std::sync::Once::new();
    INSTALLED.call_once(|| {
        // SAFETY: `run_exit_hook` is `extern "C" fn()`, matching
        // `atexit`'s required signature, and never unwinds.
        #[allow(unsafe_code)]
        unsafe {
            libc::atexit(run_exit_hook);
        }
    });
}

/// A live, established connection: transport, correlator, registries, and
/// the background threads that keep it alive (spec.md §4.10).
pub struct ConnectionHandle {
    transport: Arc<dyn Transport>,
    correlator: Correlator,
    request_ids: RequestIdAllocator,
    type_registry: TypeRegistry,
    handle_registry: Arc<HandleRegistry>,
    service_name: String,
    supports_callbacks: bool,
    connected: Arc<AtomicBool>,
    shm_dir: std::path::PathBuf,
    connect_pid: i32,
    background: Mutex<Vec<std::thread::JoinHandle<()>>>,
    /// Dispatch worker pool. These block on the correlator's unsolicited
    /// channel rather than on `connected`, so they are not joined at
    /// shutdown — they exit on their own once `correlator` (dropped along
    /// with the rest of `self`) closes that channel. Joining them here
    /// would deadlock whenever no unsolicited frame is in flight to wake
    /// a worker's `recv()`.
    workers: Vec<std::thread::JoinHandle<()>>,
}

impl ConnectionHandle {
    /// Opens `transport`, completes the handshake, and starts every
    /// background thread a live connection needs (spec.md §4.10
    /// startup).
    ///
    /// `handler` dispatches server-originated requests; pass
    /// [`crate::dispatch::NullCallbackHandler`] for a connection that
    /// exports nothing.
    ///
    /// # Errors
    ///
    /// Any handshake or bootstrap-resolution failure.
    pub fn connect<E: Environment>(
        transport: Arc<dyn Transport>,
        params: &HelloParams,
        handler: Arc<dyn CallbackHandler>,
        shm_dir: std::path::PathBuf,
        env: E,
    ) -> Result<Self, ClientError> {
        let (service_name, supports_callbacks) = run_handshake(transport.as_ref(), params)?;

        let mode = if supports_callbacks {
            CorrelationMode::Reentrant
        } else {
            CorrelationMode::NonReentrant
        };

        let (unsolicited_tx, unsolicited_rx) = std::sync::mpsc::channel();
        let correlator = Correlator::new(Arc::clone(&transport), mode, unsolicited_tx);

        let connected = Arc::new(AtomicBool::new(true));
        let mut background = Vec::new();

        let workers = if mode == CorrelationMode::Reentrant {
            let unsolicited_rx = Arc::new(Mutex::new(unsolicited_rx));
            spawn_worker_pool(INITIAL_WORKER_COUNT, unsolicited_rx, handler, Arc::clone(&transport))
        } else {
            Vec::new()
        };

        let handle_registry = Arc::new(HandleRegistry::new());
        background.push(spawn_drop_flusher(
            Arc::clone(&transport),
            Arc::clone(&handle_registry),
            Arc::clone(&connected),
            env.clone(),
        ));

        if transport.is_localhost() {
            background.push(crate::shm::spawn_cleaner(
                shm_dir.clone(),
                Arc::clone(&connected),
                env,
            ));
        }

        let type_registry = TypeRegistry::new();
        let request_ids = RequestIdAllocator::new();
        resolve_bootstrap_types(&correlator, &type_registry, &request_ids)?;

        let connect_pid = std::process::id() as i32;
        install_exit_hook(connect_pid, &transport);

        Ok(Self {
            transport,
            correlator,
            request_ids,
            type_registry,
            handle_registry,
            service_name,
            supports_callbacks,
            connected,
            shm_dir,
            connect_pid,
            background: Mutex::new(background),
            workers,
        })
    }

    /// Service name the server advertised during the handshake.
    #[must_use]
    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    /// Whether the server advertised worker-thread dispatch (and
    /// therefore accepts exported callables).
    #[must_use]
    pub fn supports_callbacks(&self) -> bool {
        self.supports_callbacks
    }

    /// The request/response correlator for this connection.
    #[must_use]
    pub fn correlator(&self) -> &Correlator {
        &self.correlator
    }

    /// Allocator for this connection's outgoing request ids.
    #[must_use]
    pub fn request_ids(&self) -> &RequestIdAllocator {
        &self.request_ids
    }

    /// This connection's type descriptor cache.
    #[must_use]
    pub fn type_registry(&self) -> &TypeRegistry {
        &self.type_registry
    }

    /// This connection's live-handle / pending-drop tracker.
    #[must_use]
    pub fn handle_registry(&self) -> &Arc<HandleRegistry> {
        &self.handle_registry
    }

    /// Number of dispatch workers spawned for this connection (zero for a
    /// non-reentrant connection, which never receives unsolicited
    /// requests).
    #[must_use]
    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Directory this connection's SHM array files live under.
    #[must_use]
    pub fn shm_dir(&self) -> &std::path::Path {
        &self.shm_dir
    }

    /// Whether the connection is still considered open.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    /// The pid this process had when the connection was established. The
    /// exit hook compares this against the pid at exit time to detect a
    /// `fork` and avoid disconnecting a connection the child no longer
    /// owns.
    #[must_use]
    pub fn connect_pid(&self) -> i32 {
        self.connect_pid
    }

    /// Flushes pending reference drops immediately if their count has
    /// crossed [`pjrmi_core::handle_registry::DEFAULT_DROP_THRESHOLD`],
    /// rather than waiting for the next periodic flusher tick (spec.md
    /// §4.6: a same-thread out-of-band flush on top of the periodic one).
    pub(crate) fn flush_drops_if_over_threshold(&self) {
        let Some(drops) = self
            .handle_registry
            .drain_if_over_threshold(pjrmi_core::handle_registry::DEFAULT_DROP_THRESHOLD)
        else {
            return;
        };
        let request_id = self.request_ids.next();
        let frame = Frame::request(
            MessageType::DropReferences,
            LIFECYCLE_THREAD_ID,
            request_id,
            encode_drop_references(&drops),
        );
        if let Err(err) = self.transport.send_frame(&frame) {
            tracing::warn!(error = %err, count = drops.len(), "failed to send threshold-triggered drop references");
        }
    }

    /// Shuts the connection down (spec.md §4.10 shutdown): marks it
    /// disconnected, stops background threads, unlinks pending SHM
    /// files, and closes the transport. No lock is held across the
    /// transport close.
    pub fn shutdown(&self) {
        self.connected.store(false, Ordering::Release);
        self.correlator.close("connection shut down locally".to_string());

        if let Some(drops) = self.handle_registry.drain_all() {
            let payload = encode_drop_references(&drops);
            let request_id = self.request_ids.next();
            let frame = Frame::request(
                MessageType::DropReferences,
                LIFECYCLE_THREAD_ID,
                request_id,
                payload,
            );
            if let Err(err) = self.transport.send_frame(&frame) {
                tracing::warn!(error = %err, "failed to flush pending drops at shutdown");
            }
        }

        crate::shm::unlink_all(&self.shm_dir);

        if let Err(err) = self.transport.disconnect() {
            tracing::warn!(error = %err, "error disconnecting transport at shutdown");
        }

        #[allow(clippy::unwrap_used)]
        for handle in self.background.lock().unwrap().drain(..) {
            let _ = handle.join();
        }
    }
}

impl Drop for ConnectionHandle {
    fn drop(&mut self) {
        if self.is_connected() {
            self.shutdown();
        }
    }
}

fn encode_drop_references(handles: &[pjrmi_core::handle::Handle]) -> Bytes {
    let mut buf = Vec::new();
    #[allow(clippy::cast_possible_truncation)]
    buf.put_i32(handles.len() as i32);
    for handle in handles {
        buf.put_i64(handle.0);
    }
    Bytes::from(buf)
}

const DROP_FLUSH_PERIOD: std::time::Duration = std::time::Duration::from_secs(1);

/// Spawns the background drop-flusher thread (spec.md §4.6): wakes every
/// [`DROP_FLUSH_PERIOD`], drains every pending drop unconditionally, and
/// sends a single best-effort `DROP_REFERENCES` frame. A send failure is
/// logged, not surfaced — the connection's own health is judged by the
/// correlator and receiver, not by this thread.
fn spawn_drop_flusher<E: Environment>(
    transport: Arc<dyn Transport>,
    handle_registry: Arc<HandleRegistry>,
    connected: Arc<AtomicBool>,
    env: E,
) -> std::thread::JoinHandle<()> {
    std::thread::spawn(move || {
        let request_ids = RequestIdAllocator::new();
        while connected.load(Ordering::Acquire) {
            env.sleep(DROP_FLUSH_PERIOD);
            if !connected.load(Ordering::Acquire) {
                break;
            }

            let Some(drops) = handle_registry.drain_all() else { continue };
            let request_id = request_ids.next();
            let frame = Frame::request(
                MessageType::DropReferences,
                LIFECYCLE_THREAD_ID,
                request_id,
                encode_drop_references(&drops),
            );
            if let Err(err) = transport.send_frame(&frame) {
                tracing::warn!(error = %err, count = drops.len(), "failed to send batched drop references");
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use pjrmi_core::{connection::CAPABILITY_SUPPORTS_CALLBACKS, SystemEnvironment};
    use pjrmi_proto::FrameHeader;

    use super::*;
    use crate::{dispatch::NullCallbackHandler, transport::InProcessTransport};

    fn hello_params() -> HelloParams {
        HelloParams {
            command_line: "pjrmi-client --test".to_string(),
            pid: std::process::id() as i32,
            self_identifier: 1,
        }
    }

    fn write_length_prefixed(transport: &dyn Transport, text: &str, negative: bool) {
        let mut buf = Vec::new();
        wire::put_signed_ascii_string(&mut buf, text, negative);
        transport.write_raw(&buf).unwrap();
    }

    fn bootstrap_descriptor(id: u32, name: &'static str) -> TypeDescriptor {
        TypeDescriptor {
            type_id: pjrmi_core::types::TypeId(id),
            name: name.to_string(),
            flags: pjrmi_core::types::TypeFlags::default(),
            array_element_type_id: None,
            supertype_ids: Vec::new(),
            fields: Vec::new(),
            constructors: Vec::new(),
            methods: HashMap::new(),
            method_specificity: HashMap::new(),
            constructor_specificity: pjrmi_core::types::SpecificityMatrix::default(),
        }
    }

    #[test]
    fn request_id_allocator_never_yields_unsolicited_sentinel() {
        let allocator = RequestIdAllocator::new();
        for _ in 0..5 {
            assert_ne!(allocator.next(), pjrmi_proto::message::UNSOLICITED_REQUEST_ID);
        }
    }

    #[test]
    fn run_handshake_completes_against_a_scripted_server() {
        let (client_side, server_side) = InProcessTransport::pair();

        let server = std::thread::spawn(move || {
            // client hello: ascii version, utf16 command line, pid, id.
            let _ = read_length_prefixed_field(&server_side).unwrap();
            let _ = server_side.read_raw(4).unwrap();
            let _ = server_side.read_raw(8).unwrap();

            write_length_prefixed(&server_side, "PJRMI_1.13", false);
            write_length_prefixed(&server_side, "demo-service", false);
            server_side.write_raw(&[CAPABILITY_SUPPORTS_CALLBACKS]).unwrap();
        });

        let (service_name, supports_callbacks) =
            run_handshake(&client_side, &hello_params()).unwrap();
        assert_eq!(service_name, "demo-service");
        assert!(supports_callbacks);

        server.join().unwrap();
    }

    #[test]
    fn connect_resolves_bootstrap_types_and_starts_background_threads() {
        let (client_side, server_side) = InProcessTransport::pair();
        let shm_dir =
            std::env::temp_dir().join(format!("pjrmi-lifecycle-test-{}", std::process::id()));

        let server = std::thread::spawn(move || {
            let _ = read_length_prefixed_field(&server_side).unwrap();
            let _ = server_side.read_raw(4).unwrap();
            let _ = server_side.read_raw(8).unwrap();
            write_length_prefixed(&server_side, "PJRMI_1.13", false);
            write_length_prefixed(&server_side, "demo-service", false);
            server_side.write_raw(&[0]).unwrap();

            for (i, name) in pjrmi_core::types::BOOTSTRAP_NAMES.iter().enumerate() {
                let request = server_side.recv_frame().unwrap();
                let descriptor = bootstrap_descriptor(i as u32 + 1, name);
                let mut payload = Vec::new();
                descriptor.encode(&mut payload);
                let reply = Frame::new(
                    FrameHeader::new(
                        MessageType::TypeDescription,
                        request.header.thread_id(),
                        request.header.request_id(),
                    ),
                    payload,
                );
                server_side.send_frame(&reply).unwrap();
            }
        });

        let handle = ConnectionHandle::connect(
            Arc::new(client_side),
            &hello_params(),
            Arc::new(NullCallbackHandler),
            shm_dir.clone(),
            SystemEnvironment,
        )
        .unwrap();

        assert_eq!(handle.service_name(), "demo-service");
        assert!(!handle.supports_callbacks());
        assert!(handle.type_registry().missing_bootstrap_names().is_empty());

        handle.shutdown();
        server.join().unwrap();
        let _ = std::fs::remove_dir_all(&shm_dir);
    }
}
