//! End-to-end scenarios (spec.md §8) driven against [`MockServer`].
//!
//! Each test plays both sides: a background thread scripts the server
//! half frame by frame while the main thread drives a real
//! [`PjrmiClient`] through the public API a caller would actually use.

use std::{collections::HashMap, sync::Arc, thread};

use bytes::BufMut;
use pjrmi_client::{ClientError, NullCallbackHandler, PjrmiClient};
use pjrmi_core::{HelloParams, PjrmiError, SpecificityMatrix, TypeDescriptor, TypeFlags, TypeId};
use pjrmi_harness::{mock_server::static_overload, MockServer, TestEnvironment};
use pjrmi_marshal::{MarshalOptions, NumericKind, NumericValue, Value};
use pjrmi_proto::{wire, ArgTag, MessageType};

fn hello_params() -> HelloParams {
    HelloParams { command_line: "pjrmi-harness --scenario".to_string(), pid: std::process::id() as i32, self_identifier: 1 }
}

fn unique_shm_dir(tag: &str) -> std::path::PathBuf {
    static NEXT: std::sync::atomic::AtomicU64 = std::sync::atomic::AtomicU64::new(0);
    let n = NEXT.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
    std::env::temp_dir().join(format!("pjrmi-harness-test-{tag}-{}-{n}", std::process::id()))
}

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

fn connect(transport: pjrmi_client::InProcessTransport, shm_enabled: bool, env: TestEnvironment) -> PjrmiClient {
    PjrmiClient::connect(
        Arc::new(transport),
        &hello_params(),
        Arc::new(NullCallbackHandler),
        unique_shm_dir("connect"),
        shm_enabled,
        MarshalOptions::default(),
        env,
    )
    .unwrap()
}

/// Server-side half of `resolve_type`: consumes one `TYPE_REQUEST`
/// (by-name, spec.md §4.3's tag 0) and answers from `server`'s registry.
fn serve_type_request(server: &MockServer) {
    let request = server.recv_request();
    let mut body = request.payload.clone();
    let tag = wire::get_u8(&mut body).unwrap();
    assert_eq!(tag, 0, "this harness only scripts by-name TYPE_REQUESTs");
    let name = wire::get_utf16_string(&mut body).unwrap();
    let descriptor = server.registry().get_by_name(&name).unwrap_or_else(|| panic!("type `{name}` not registered"));
    server.reply_type(&request, &descriptor);
}

// Scenario 1: primitive echo.
#[test]
fn primitive_echo_round_trips_through_a_static_method() {
    let (client_transport, mut server) = MockServer::pair();
    let int_id = server.type_id("int");

    let mut demo = bare_type(TypeId(0), "Demo");
    demo.methods.insert("identity".to_string(), vec![static_overload(0, vec![int_id], vec!["x"], Some(int_id))]);
    let demo_id = server.define_type(demo);

    let server_thread = thread::spawn(move || {
        server.serve_handshake("demo-service", false);
        serve_type_request(&server);

        let lookup = server.recv_request();
        let mut payload = Vec::new();
        payload.put_i64(1);
        payload.put_i32(demo_id.0 as i32);
        server.reply(&lookup, MessageType::ObjectReference, payload);

        let call = server.recv_request();
        let mut body = call.payload.clone();
        assert_eq!(wire::get_i64(&mut body).unwrap(), 1);
        assert_eq!(wire::get_i32(&mut body).unwrap(), 0); // method index
        assert_eq!(wire::get_i32(&mut body).unwrap(), 1); // arg count
        assert_eq!(wire::get_u8(&mut body).unwrap(), ArgTag::Value.to_u8());
        assert_eq!(wire::get_i32(&mut body).unwrap(), int_id.0 as i32);
        assert_eq!(wire::get_i32(&mut body).unwrap(), i32::MAX);

        let mut reply_payload = Vec::new();
        reply_payload.put_u8(ArgTag::Value.to_u8());
        reply_payload.put_i32(int_id.0 as i32);
        reply_payload.put_i32(i32::MAX);
        server.reply(&call, MessageType::ArbitraryItem, reply_payload);
    });

    let client = connect(client_transport, false, TestEnvironment::new(1));
    client.resolve_type("Demo").unwrap();
    let proxy = client.lookup_instance("demo").unwrap();

    let result = client.call_method(&proxy, "identity", &[Value::Numeric(NumericValue::Int(i32::MAX))]).unwrap();
    assert_eq!(result, Value::Numeric(NumericValue::Int(i32::MAX)));

    client.shutdown();
    server_thread.join().unwrap();
}

// Scenario 2: a narrowing too lossy for any overload rejects locally,
// before a frame is ever sent.
#[test]
fn numeric_narrowing_with_no_lossless_candidate_is_rejected_locally() {
    let (client_transport, mut server) = MockServer::pair();
    let short_id = server.type_id("short");
    let int_id = server.type_id("int");

    let mut demo = bare_type(TypeId(0), "Demo");
    demo.methods.insert(
        "narrow".to_string(),
        vec![
            static_overload(0, vec![short_id], vec!["x"], Some(short_id)),
            static_overload(1, vec![int_id], vec!["x"], Some(int_id)),
        ],
    );
    let demo_id = server.define_type(demo);

    let server_thread = thread::spawn(move || {
        server.serve_handshake("demo-service", false);
        serve_type_request(&server);

        let lookup = server.recv_request();
        let mut payload = Vec::new();
        payload.put_i64(2);
        payload.put_i32(demo_id.0 as i32);
        server.reply(&lookup, MessageType::ObjectReference, payload);

        // No METHOD_CALL should ever arrive: resolution fails before the
        // client sends anything. Prove it by making a further recv block
        // forever impossible to observe directly; instead the client side
        // assertion (no send happened) is what this scenario actually
        // tests. Nothing further to do here.
    });

    let client = connect(client_transport, false, TestEnvironment::new(2));
    client.resolve_type("Demo").unwrap();
    let proxy = client.lookup_instance("demo").unwrap();

    let value = 1i64 << 40;
    let err = client.call_method(&proxy, "narrow", &[Value::Numeric(NumericValue::Long(value))]).unwrap_err();
    assert!(matches!(err, ClientError::Pjrmi(PjrmiError::OverloadResolution { .. })));

    client.shutdown();
    server_thread.join().unwrap();
}

// Scenario 3: overload chosen by specificity, not declaration order.
#[test]
fn string_overload_beats_object_overload_for_a_string_argument() {
    let (client_transport, mut server) = MockServer::pair();
    let object_id = server.type_id("java.lang.Object");
    let string_id = server.type_id("java.lang.String");

    let mut demo = bare_type(TypeId(0), "Demo");
    demo.methods.insert(
        "foo".to_string(),
        vec![
            static_overload(0, vec![object_id], vec!["x"], Some(object_id)),
            static_overload(1, vec![string_id], vec!["x"], Some(string_id)),
        ],
    );
    // index 1 (String) is more specific than index 0 (Object).
    demo.method_specificity.insert("foo".to_string(), SpecificityMatrix::from_raw(vec![vec![0, 1], vec![-1, 0]]));
    let demo_id = server.define_type(demo);

    let server_thread = thread::spawn(move || {
        server.serve_handshake("demo-service", false);
        serve_type_request(&server);

        let lookup = server.recv_request();
        let mut payload = Vec::new();
        payload.put_i64(3);
        payload.put_i32(demo_id.0 as i32);
        server.reply(&lookup, MessageType::ObjectReference, payload);

        let call = server.recv_request();
        let mut body = call.payload.clone();
        let _handle = wire::get_i64(&mut body).unwrap();
        let method_index = wire::get_i32(&mut body).unwrap();
        assert_eq!(method_index, 1, "the String overload must win, not the Object one");
        assert_eq!(wire::get_i32(&mut body).unwrap(), 1); // arg count
        assert_eq!(wire::get_u8(&mut body).unwrap(), ArgTag::Value.to_u8());
        assert_eq!(wire::get_i32(&mut body).unwrap(), string_id.0 as i32);
        assert_eq!(wire::get_utf16_string(&mut body).unwrap(), "hi");

        let mut reply_payload = Vec::new();
        reply_payload.put_u8(ArgTag::Value.to_u8());
        reply_payload.put_i32(string_id.0 as i32);
        wire::put_utf16_string(&mut reply_payload, "hi");
        server.reply(&call, MessageType::ArbitraryItem, reply_payload);
    });

    let client = connect(client_transport, false, TestEnvironment::new(3));
    client.resolve_type("Demo").unwrap();
    let proxy = client.lookup_instance("demo").unwrap();

    let result = client.call_method(&proxy, "foo", &[Value::Str("hi".to_string())]).unwrap();
    assert_eq!(result, Value::Str("hi".to_string()));

    client.shutdown();
    server_thread.join().unwrap();
}

// Scenario 4: a large numeric array goes over the SHM channel instead of
// being inlined.
#[test]
fn large_double_array_argument_is_sent_through_shared_memory() {
    let (client_transport, mut server) = MockServer::pair();
    let double_id = server.type_id("double");

    let mut array_type = bare_type(TypeId(0), "double[]");
    array_type.flags.is_array = true;
    array_type.array_element_type_id = Some(double_id);
    let array_id = server.define_type(array_type);

    let mut demo = bare_type(TypeId(0), "Demo");
    demo.methods.insert("sum".to_string(), vec![static_overload(0, vec![array_id], vec!["a"], Some(double_id))]);
    let demo_id = server.define_type(demo);

    const LEN: usize = 1_000_000;

    let server_thread = thread::spawn(move || {
        server.serve_handshake("demo-service", false);
        serve_type_request(&server);
        serve_type_request(&server); // "double[]" is also resolved, by name, before the call.

        let lookup = server.recv_request();
        let mut payload = Vec::new();
        payload.put_i64(4);
        payload.put_i32(demo_id.0 as i32);
        server.reply(&lookup, MessageType::ObjectReference, payload);

        let call = server.recv_request();
        let mut body = call.payload.clone();
        let _handle = wire::get_i64(&mut body).unwrap();
        let _method_index = wire::get_i32(&mut body).unwrap();
        assert_eq!(wire::get_i32(&mut body).unwrap(), 1); // arg count
        // spec.md §4.9: tag `S` · UTF-16 filename · int32 length · UTF-16
        // dtype-code, with no leading `V`/type-id header — the callee
        // already knows the declared parameter type from the signature.
        assert_eq!(wire::get_u8(&mut body).unwrap(), ArgTag::Shm.to_u8());
        let file_name = wire::get_utf16_string(&mut body).unwrap();
        assert_eq!(wire::get_i32(&mut body).unwrap(), LEN as i32);
        assert_eq!(wire::get_utf16_string(&mut body).unwrap(), pjrmi_marshal::dtype_code(NumericKind::Double));

        assert!(!file_name.is_empty());

        let mut reply_payload = Vec::new();
        reply_payload.put_u8(ArgTag::Value.to_u8());
        reply_payload.put_i32(double_id.0 as i32);
        reply_payload.put_f64(f64::from(LEN as u32));
        server.reply(&call, MessageType::ArbitraryItem, reply_payload);
    });

    let shm_dir = unique_shm_dir("shm-scenario");
    let client = PjrmiClient::connect(
        Arc::new(client_transport),
        &hello_params(),
        Arc::new(NullCallbackHandler),
        shm_dir.clone(),
        true,
        MarshalOptions::default(),
        TestEnvironment::new(4),
    )
    .unwrap();

    client.resolve_type("Demo").unwrap();
    client.resolve_type("double[]").unwrap();
    let proxy = client.lookup_instance("demo").unwrap();

    let elements: Vec<NumericValue> = (0..LEN).map(|i| NumericValue::Double(i as f64)).collect();
    let result =
        client.call_method(&proxy, "sum", &[Value::NumericArray(NumericKind::Double, elements)]).unwrap();
    assert_eq!(result, Value::Numeric(NumericValue::Double(f64::from(LEN as u32))));

    // The file written for this call is cleaned up by the background
    // sweeper within `CLEANER_MAX_AGE`; `TestEnvironment`'s compressed
    // sleep makes that converge well inside the test timeout.
    for _ in 0..50 {
        if std::fs::read_dir(&shm_dir).map(|mut d| d.next().is_none()).unwrap_or(true) {
            break;
        }
        std::thread::sleep(std::time::Duration::from_millis(20));
    }
    let remaining: Vec<_> = std::fs::read_dir(&shm_dir).map(|d| d.collect::<Vec<_>>()).unwrap_or_default();
    assert!(remaining.is_empty(), "SHM file was not cleaned up: {remaining:?}");

    client.shutdown();
    server_thread.join().unwrap();
}

// Scenario 5: a reentrant call resolves a server-issued callback before
// the original method call itself returns.
struct IncrementHandler {
    int_id: TypeId,
}

impl pjrmi_client::CallbackHandler for IncrementHandler {
    fn invoke_callback(
        &self,
        _function_id: pjrmi_core::LocalId,
        _arg_count: i32,
        _kwarg_count: i32,
        mut body: bytes::Bytes,
    ) -> Result<bytes::Bytes, pjrmi_client::DispatchFault> {
        assert_eq!(wire::get_u8(&mut body).unwrap(), ArgTag::Value.to_u8());
        let _type_id = wire::get_i32(&mut body).unwrap();
        let n = wire::get_i32(&mut body).unwrap();

        let mut out = Vec::new();
        out.put_u8(ArgTag::Value.to_u8());
        out.put_i32(self.int_id.0 as i32);
        out.put_i32(n + 1);
        Ok(out.into())
    }

    fn invoke_object_method(
        &self,
        _object_id: pjrmi_core::LocalId,
        _method_name: &str,
        _arg_count: i32,
        _kwarg_count: i32,
        _body: bytes::Bytes,
    ) -> Result<bytes::Bytes, pjrmi_client::DispatchFault> {
        unreachable!("this scenario only exercises CALLBACK")
    }

    fn eval_or_exec(&self, _source: &str, _return_type_id: u32) -> Result<bytes::Bytes, pjrmi_client::DispatchFault> {
        unreachable!()
    }

    fn invoke_dotted(
        &self,
        _dotted_name: &str,
        _arg_count: i32,
        _kwarg_count: i32,
        _body: bytes::Bytes,
        _export_result: bool,
    ) -> Result<bytes::Bytes, pjrmi_client::DispatchFault> {
        unreachable!()
    }

    fn get_object(&self, _dotted_name: &str) -> Result<bytes::Bytes, pjrmi_client::DispatchFault> {
        unreachable!()
    }

    fn get_attr(&self, _object_id: pjrmi_core::LocalId, _field: &str) -> Result<bytes::Bytes, pjrmi_client::DispatchFault> {
        unreachable!()
    }

    fn set_global(&self, _name: &str, _value: bytes::Bytes) {
        unreachable!()
    }

    fn adjust_reference(&self, _local_id: pjrmi_core::LocalId, _delta: i64) {}
}

#[test]
fn a_server_issued_callback_resolves_before_the_call_that_triggered_it() {
    let (client_transport, mut server) = MockServer::pair();
    let int_id = server.type_id("int");

    let mut function_type = bare_type(TypeId(0), "java.util.function.Function");
    function_type.flags.is_interface = true;
    function_type.flags.is_functional_interface = true;
    let function_id = server.define_type(function_type);

    let mut demo = bare_type(TypeId(0), "Demo");
    demo.methods.insert(
        "apply".to_string(),
        vec![static_overload(0, vec![function_id, int_id], vec!["f", "x"], Some(int_id))],
    );
    let demo_id = server.define_type(demo);

    let server_thread = thread::spawn(move || {
        server.serve_handshake("demo-service", true);
        serve_type_request(&server); // Demo
        serve_type_request(&server); // java.util.function.Function

        let lookup = server.recv_request();
        let mut payload = Vec::new();
        payload.put_i64(5);
        payload.put_i32(demo_id.0 as i32);
        server.reply(&lookup, MessageType::ObjectReference, payload);

        let export = server.recv_request();
        let mut body = export.payload.clone();
        let local_id = wire::get_i64(&mut body).unwrap();
        server.reply(&export, MessageType::ObjectReference, {
            let mut p = Vec::new();
            p.put_i64(500);
                p.put_i32(function_id.0 as i32);
            p
        });

        let call = server.recv_request();
        let thread_id = call.header.thread_id();

        let mut callback_payload = Vec::new();
        callback_payload.put_i32(77); // java_req_id
        callback_payload.put_i64(local_id);
        callback_payload.put_i32(1); // arg_count
        callback_payload.put_i32(0); // kwarg_count
        callback_payload.put_u8(ArgTag::Value.to_u8());
        callback_payload.put_i32(int_id.0 as i32);
        callback_payload.put_i32(41);
        server.send_unsolicited(MessageType::Callback, thread_id, callback_payload);

        let callback_reply = server.recv_request();
        assert_eq!(callback_reply.header.message_type(), Some(MessageType::CallbackResponse));
        let mut body = callback_reply.payload.clone();
        assert_eq!(wire::get_i32(&mut body).unwrap(), 77);
        assert_eq!(wire::get_u8(&mut body).unwrap(), 0); // is_exception
        assert_eq!(wire::get_u8(&mut body).unwrap(), ArgTag::Value.to_u8());
        let _type_id = wire::get_i32(&mut body).unwrap();
        assert_eq!(wire::get_i32(&mut body).unwrap(), 42);

        let mut reply_payload = Vec::new();
        reply_payload.put_u8(ArgTag::Value.to_u8());
        reply_payload.put_i32(int_id.0 as i32);
        reply_payload.put_i32(42);
        server.reply(&call, MessageType::ArbitraryItem, reply_payload);
    });

    let client = PjrmiClient::connect(
        Arc::new(client_transport),
        &hello_params(),
        Arc::new(IncrementHandler { int_id }),
        unique_shm_dir("reentrant"),
        false,
        MarshalOptions::default(),
        TestEnvironment::new(5),
    )
    .unwrap();

    client.resolve_type("Demo").unwrap();
    client.resolve_type("java.util.function.Function").unwrap();
    let proxy = client.lookup_instance("demo").unwrap();

    let callback_proxy = client.export_callback(1, function_id, 1).unwrap();
    let result = client
        .call_method(&proxy, "apply", &[Value::Handle(callback_proxy.handle), Value::Numeric(NumericValue::Int(41))])
        .unwrap();
    assert_eq!(result, Value::Numeric(NumericValue::Int(42)));

    client.shutdown();
    server_thread.join().unwrap();
}

// Scenario 6: reference drops batch, flushing once at the 100-handle
// threshold and again at the next periodic tick.
#[test]
fn releasing_150_proxies_batches_into_at_most_two_drop_frames() {
    let (client_transport, server) = MockServer::pair();

    let server_thread = thread::spawn(move || {
        server.serve_handshake("demo-service", false);

        let mut handles = Vec::new();
        for i in 0..150i64 {
            let lookup = server.recv_request();
            let mut payload = Vec::new();
            payload.put_i64(1000 + i);
            payload.put_i32(1); // "void" bootstrap type id, unused by the test
            server.reply(&lookup, MessageType::ObjectReference, payload);
            handles.push(1000 + i);
        }

        let mut seen = Vec::new();
        let mut frames = 0;
        while seen.len() < 150 {
            let drop_frame = server.recv_request();
            frames += 1;
            assert!(frames <= 2, "expected at most two DROP_REFERENCES frames, got a third");
            let mut body = drop_frame.payload.clone();
            let count = wire::get_i32(&mut body).unwrap();
            for _ in 0..count {
                seen.push(wire::get_i64(&mut body).unwrap());
            }
        }
        seen.sort_unstable();
        let mut expected = handles;
        expected.sort_unstable();
        assert_eq!(seen, expected);
        assert_eq!(seen.len(), 150, "no duplicates, no missing handles");
    });

    let client = connect(client_transport, false, TestEnvironment::with_speedup(6, 200));
    let mut proxies = Vec::new();
    for _ in 0..150 {
        proxies.push(client.lookup_instance("whatever").unwrap());
    }
    for proxy in proxies {
        client.release(&proxy);
    }

    client.shutdown();
    server_thread.join().unwrap();
}
