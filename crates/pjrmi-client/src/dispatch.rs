//! Dispatch loop for server-originated (unsolicited) requests (spec.md
//! §4.8).
//!
//! Frames the correlator routes here (`request_id == -1`, or one of the
//! callback-shaped message types) are handed to a small fixed-size
//! worker pool so a slow callback can never starve the caller-side wait
//! on `received[id]` (spec.md §5's deadlock-avoidance rule). Exactly one
//! `CALLBACK_RESPONSE` frame is sent per unsolicited message.
//!
//! Argument decoding is deliberately left to [`CallbackHandler`]: only
//! the embedding application knows the declared parameter types of its
//! own exported callables, so only it can drive `pjrmi-marshal`'s
//! decoding correctly. This module's job stops at envelope framing —
//! pulling off the ids and counts every case shares, and wrapping
//! whatever the handler returns back into a `CALLBACK_RESPONSE`.

use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use pjrmi_core::callback_registry::LocalId;
use pjrmi_proto::{wire, Frame, MessageType};

use crate::transport::Transport;

/// A fault an exported callable/object can raise back at the server.
/// `NoSuchMethod`/`NoSuchField` are distinguished from
/// [`DispatchFault::UserError`] because the server falls through to its
/// own default-method handling only for those two (spec.md §4.8).
#[derive(Debug, Clone)]
pub enum DispatchFault {
    /// `OBJECT_CALLBACK` named a method the exported object doesn't
    /// have.
    NoSuchMethod(String),
    /// `GETATTR` named a field the exported object doesn't have.
    NoSuchField(String),
    /// Any other failure while running user code.
    UserError(String),
}

impl DispatchFault {
    fn message(&self) -> &str {
        match self {
            Self::NoSuchMethod(m) | Self::NoSuchField(m) | Self::UserError(m) => m,
        }
    }
}

/// Application hook invoked for each of spec.md §4.8's nine
/// server-originated message cases. Implementors own the actual
/// reflection/invocation logic (arbitrary user code); this trait's job
/// is only to decode its own arguments from `body` and return an
/// encoded result or fault.
pub trait CallbackHandler: Send + Sync {
    /// `CALLBACK`: invoke exported callable `function_id` with
    /// positional args and keyword args still encoded in `body`.
    fn invoke_callback(
        &self,
        function_id: LocalId,
        arg_count: i32,
        kwarg_count: i32,
        body: Bytes,
    ) -> Result<Bytes, DispatchFault>;

    /// `OBJECT_CALLBACK`: invoke `method_name` on exported object
    /// `object_id`.
    fn invoke_object_method(
        &self,
        object_id: LocalId,
        method_name: &str,
        arg_count: i32,
        kwarg_count: i32,
        body: Bytes,
    ) -> Result<Bytes, DispatchFault>;

    /// `PYTHON_EVAL_OR_EXEC`: evaluate or execute `source` in the global
    /// scope.
    fn eval_or_exec(&self, source: &str, return_type_id: u32) -> Result<Bytes, DispatchFault>;

    /// `PYTHON_INVOKE` / `INVOKE_AND_GET_OBJECT`: resolve `dotted_name`
    /// and invoke it. `export_result` is `true` for
    /// `INVOKE_AND_GET_OBJECT` (return a newly-exported object id rather
    /// than an inline value).
    fn invoke_dotted(
        &self,
        dotted_name: &str,
        arg_count: i32,
        kwarg_count: i32,
        body: Bytes,
        export_result: bool,
    ) -> Result<Bytes, DispatchFault>;

    /// `GET_OBJECT`: resolve `dotted_name` to an object and export it.
    fn get_object(&self, dotted_name: &str) -> Result<Bytes, DispatchFault>;

    /// `GETATTR`: `getattr(object, field)`.
    fn get_attr(&self, object_id: LocalId, field: &str) -> Result<Bytes, DispatchFault>;

    /// `SET_GLOBAL_VARIABLE`: bind `name` in the global scope. No
    /// response value beyond acknowledgement.
    fn set_global(&self, name: &str, value: Bytes);

    /// `ADD_REFERENCE` / `DROP_REFERENCES` on a client-exported entry.
    fn adjust_reference(&self, local_id: LocalId, delta: i64);
}

/// A [`CallbackHandler`] for connections that never export anything.
/// Every case reports a fault rather than performing any invocation —
/// there is nothing registered locally for the server to have called.
#[derive(Debug, Default)]
pub struct NullCallbackHandler;

impl CallbackHandler for NullCallbackHandler {
    fn invoke_callback(
        &self,
        function_id: LocalId,
        _arg_count: i32,
        _kwarg_count: i32,
        _body: Bytes,
    ) -> Result<Bytes, DispatchFault> {
        Err(DispatchFault::NoSuchMethod(format!("no callable registered for {function_id:?}")))
    }

    fn invoke_object_method(
        &self,
        _object_id: LocalId,
        method_name: &str,
        _arg_count: i32,
        _kwarg_count: i32,
        _body: Bytes,
    ) -> Result<Bytes, DispatchFault> {
        Err(DispatchFault::NoSuchMethod(method_name.to_string()))
    }

    fn eval_or_exec(&self, _source: &str, _return_type_id: u32) -> Result<Bytes, DispatchFault> {
        Err(DispatchFault::UserError("eval/exec not supported by this client".into()))
    }

    fn invoke_dotted(
        &self,
        dotted_name: &str,
        _arg_count: i32,
        _kwarg_count: i32,
        _body: Bytes,
        _export_result: bool,
    ) -> Result<Bytes, DispatchFault> {
        Err(DispatchFault::NoSuchMethod(dotted_name.to_string()))
    }

    fn get_object(&self, dotted_name: &str) -> Result<Bytes, DispatchFault> {
        Err(DispatchFault::NoSuchMethod(dotted_name.to_string()))
    }

    fn get_attr(&self, _object_id: LocalId, field: &str) -> Result<Bytes, DispatchFault> {
        Err(DispatchFault::NoSuchField(field.to_string()))
    }

    fn set_global(&self, _name: &str, _value: Bytes) {}

    fn adjust_reference(&self, _local_id: LocalId, _delta: i64) {}
}

/// Spawns `worker_count` threads pulling unsolicited frames off `rx` and
/// dispatching them to `handler`, sending exactly one `CALLBACK_RESPONSE`
/// per frame back over `transport`.
pub fn spawn_worker_pool(
    worker_count: usize,
    rx: Arc<std::sync::Mutex<std::sync::mpsc::Receiver<Frame>>>,
    handler: Arc<dyn CallbackHandler>,
    transport: Arc<dyn Transport>,
) -> Vec<std::thread::JoinHandle<()>> {
    (0..worker_count.max(1))
        .map(|_| {
            let rx = Arc::clone(&rx);
            let handler = Arc::clone(&handler);
            let transport = Arc::clone(&transport);
            std::thread::spawn(move || worker_loop(&rx, handler.as_ref(), transport.as_ref()))
        })
        .collect()
}

fn worker_loop(
    rx: &std::sync::Mutex<std::sync::mpsc::Receiver<Frame>>,
    handler: &dyn CallbackHandler,
    transport: &dyn Transport,
) {
    loop {
        #[allow(clippy::unwrap_used)]
        let frame = {
            let guard = rx.lock().unwrap();
            guard.recv()
        };
        let Ok(frame) = frame else { return };

        if let Some(reply) = handle_one(&frame, handler) {
            let _ = transport.send_frame(&reply);
        }
    }
}

/// Handles one unsolicited frame, returning the `CALLBACK_RESPONSE`
/// frame to send (or `None` for the two cases spec.md §4.8 says produce
/// no response: `EXCEPTION` and unknown message types).
fn handle_one(frame: &Frame, handler: &dyn CallbackHandler) -> Option<Frame> {
    let Some(message_type) = frame.header.message_type() else {
        tracing::warn!(byte = frame.header.message_type_byte(), "unknown unsolicited message type, ignoring");
        return None;
    };

    if message_type == MessageType::Exception {
        tracing::warn!("unsolicited EXCEPTION frame (server likely mid-shutdown), logging only");
        return None;
    }

    let mut body = frame.payload.clone();
    let thread_id = frame.header.thread_id();

    let (java_req_id, outcome) = match message_type {
        MessageType::Callback => dispatch_callback(&mut body, handler),
        MessageType::ObjectCallback => dispatch_object_callback(&mut body, handler),
        MessageType::EvalOrExec => dispatch_eval_or_exec(&mut body, handler),
        MessageType::PythonInvoke => dispatch_invoke(&mut body, handler, false),
        MessageType::InvokeAndGetObject => dispatch_invoke(&mut body, handler, true),
        MessageType::GetObject => dispatch_get_object(&mut body, handler),
        MessageType::GetAttr => dispatch_get_attr(&mut body, handler),
        MessageType::SetGlobal => {
            let req_id = read_i32(&mut body);
            let name = wire::get_utf16_string(&mut body).unwrap_or_default();
            handler.set_global(&name, body.clone());
            (req_id, Ok(Bytes::new()))
        },
        MessageType::AddReference => {
            let req_id = read_i32(&mut body);
            let local_id = read_local_id(&mut body);
            handler.adjust_reference(local_id, 1);
            (req_id, Ok(Bytes::new()))
        },
        MessageType::DropReferences => {
            let req_id = read_i32(&mut body);
            let local_id = read_local_id(&mut body);
            let count = wire::get_i64(&mut body).unwrap_or(1);
            handler.adjust_reference(local_id, -count);
            (req_id, Ok(Bytes::new()))
        },
        _ => {
            tracing::warn!(?message_type, "unhandled server-originated message type, ignoring");
            return None;
        },
    };

    Some(encode_callback_response(thread_id, java_req_id, outcome))
}

fn read_i32(body: &mut Bytes) -> i32 {
    wire::get_i32(body).unwrap_or(0)
}

fn read_local_id(body: &mut Bytes) -> LocalId {
    LocalId(wire::get_i64(body).unwrap_or(0))
}

fn dispatch_callback(body: &mut Bytes, handler: &dyn CallbackHandler) -> (i32, Result<Bytes, DispatchFault>) {
    let java_req_id = read_i32(body);
    let function_id = read_local_id(body);
    let arg_count = read_i32(body);
    let kwarg_count = read_i32(body);
    (java_req_id, handler.invoke_callback(function_id, arg_count, kwarg_count, body.clone()))
}

fn dispatch_object_callback(
    body: &mut Bytes,
    handler: &dyn CallbackHandler,
) -> (i32, Result<Bytes, DispatchFault>) {
    let java_req_id = read_i32(body);
    let object_id = read_local_id(body);
    let Ok(method_name) = wire::get_utf16_string(body) else {
        return (java_req_id, Err(DispatchFault::UserError("malformed method name".into())));
    };
    let arg_count = read_i32(body);
    let kwarg_count = read_i32(body);
    (
        java_req_id,
        handler.invoke_object_method(object_id, &method_name, arg_count, kwarg_count, body.clone()),
    )
}

fn dispatch_eval_or_exec(
    body: &mut Bytes,
    handler: &dyn CallbackHandler,
) -> (i32, Result<Bytes, DispatchFault>) {
    let java_req_id = read_i32(body);
    let Ok(source) = wire::get_utf16_string(body) else {
        return (java_req_id, Err(DispatchFault::UserError("malformed source string".into())));
    };
    let return_type_id = read_i32(body) as u32;
    (java_req_id, handler.eval_or_exec(&source, return_type_id))
}

fn dispatch_invoke(
    body: &mut Bytes,
    handler: &dyn CallbackHandler,
    export_result: bool,
) -> (i32, Result<Bytes, DispatchFault>) {
    let java_req_id = read_i32(body);
    let Ok(dotted_name) = wire::get_utf16_string(body) else {
        return (java_req_id, Err(DispatchFault::UserError("malformed dotted name".into())));
    };
    let arg_count = read_i32(body);
    let kwarg_count = read_i32(body);
    (
        java_req_id,
        handler.invoke_dotted(&dotted_name, arg_count, kwarg_count, body.clone(), export_result),
    )
}

fn dispatch_get_object(
    body: &mut Bytes,
    handler: &dyn CallbackHandler,
) -> (i32, Result<Bytes, DispatchFault>) {
    let java_req_id = read_i32(body);
    let Ok(dotted_name) = wire::get_utf16_string(body) else {
        return (java_req_id, Err(DispatchFault::UserError("malformed dotted name".into())));
    };
    (java_req_id, handler.get_object(&dotted_name))
}

fn dispatch_get_attr(
    body: &mut Bytes,
    handler: &dyn CallbackHandler,
) -> (i32, Result<Bytes, DispatchFault>) {
    let java_req_id = read_i32(body);
    let object_id = read_local_id(body);
    let Ok(field) = wire::get_utf16_string(body) else {
        return (java_req_id, Err(DispatchFault::UserError("malformed field name".into())));
    };
    (java_req_id, handler.get_attr(object_id, &field))
}

/// Encodes `{java_req_id, is_exception, encoded_value}` as a
/// `CALLBACK_RESPONSE` frame (spec.md §4.8).
fn encode_callback_response(
    thread_id: i64,
    java_req_id: i32,
    outcome: Result<Bytes, DispatchFault>,
) -> Frame {
    let mut payload = BytesMut::new();
    payload.extend_from_slice(&java_req_id.to_be_bytes());

    match outcome {
        Ok(value) => {
            payload.extend_from_slice(&[0u8]);
            payload.extend_from_slice(&value);
        },
        Err(fault) => {
            payload.extend_from_slice(&[1u8]);
            wire::put_utf16_string(&mut payload, fault.message());
        },
    }

    Frame::request(
        MessageType::CallbackResponse,
        thread_id,
        pjrmi_proto::message::UNSOLICITED_REQUEST_ID,
        payload.freeze(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    struct EchoHandler;

    impl CallbackHandler for EchoHandler {
        fn invoke_callback(
            &self,
            _function_id: LocalId,
            _arg_count: i32,
            _kwarg_count: i32,
            _body: Bytes,
        ) -> Result<Bytes, DispatchFault> {
            Ok(Bytes::from_static(b"ok"))
        }

        fn invoke_object_method(
            &self,
            _object_id: LocalId,
            method_name: &str,
            _arg_count: i32,
            _kwarg_count: i32,
            _body: Bytes,
        ) -> Result<Bytes, DispatchFault> {
            if method_name == "missing" {
                Err(DispatchFault::NoSuchMethod(method_name.to_string()))
            } else {
                Ok(Bytes::from_static(b"ok"))
            }
        }

        fn eval_or_exec(&self, _source: &str, _return_type_id: u32) -> Result<Bytes, DispatchFault> {
            Ok(Bytes::new())
        }

        fn invoke_dotted(
            &self,
            _dotted_name: &str,
            _arg_count: i32,
            _kwarg_count: i32,
            _body: Bytes,
            _export_result: bool,
        ) -> Result<Bytes, DispatchFault> {
            Ok(Bytes::new())
        }

        fn get_object(&self, _dotted_name: &str) -> Result<Bytes, DispatchFault> {
            Ok(Bytes::new())
        }

        fn get_attr(&self, _object_id: LocalId, field: &str) -> Result<Bytes, DispatchFault> {
            if field == "missing" {
                Err(DispatchFault::NoSuchField(field.to_string()))
            } else {
                Ok(Bytes::new())
            }
        }

        fn set_global(&self, _name: &str, _value: Bytes) {}

        fn adjust_reference(&self, _local_id: LocalId, _delta: i64) {}
    }

    fn callback_frame(function_id: i64) -> Frame {
        let mut payload = BytesMut::new();
        payload.extend_from_slice(&7i32.to_be_bytes());
        payload.extend_from_slice(&function_id.to_be_bytes());
        payload.extend_from_slice(&0i32.to_be_bytes());
        payload.extend_from_slice(&0i32.to_be_bytes());
        Frame::request(MessageType::Callback, 1, -1, payload.freeze())
    }

    #[test]
    fn successful_callback_produces_a_non_exception_response() {
        let reply = handle_one(&callback_frame(42), &EchoHandler).unwrap();
        assert_eq!(reply.header.message_type(), Some(MessageType::CallbackResponse));
        let mut body = reply.payload.clone();
        assert_eq!(read_i32(&mut body), 7);
        assert_eq!(body[0], 0);
    }

    #[test]
    fn missing_method_produces_a_tagged_no_such_method_exception() {
        let mut payload = BytesMut::new();
        payload.extend_from_slice(&3i32.to_be_bytes());
        payload.extend_from_slice(&9i64.to_be_bytes());
        wire::put_utf16_string(&mut payload, "missing");
        payload.extend_from_slice(&0i32.to_be_bytes());
        payload.extend_from_slice(&0i32.to_be_bytes());
        let frame = Frame::request(MessageType::ObjectCallback, 1, -1, payload.freeze());

        let reply = handle_one(&frame, &EchoHandler).unwrap();
        let mut body = reply.payload.clone();
        assert_eq!(read_i32(&mut body), 3);
        assert_eq!(body[0], 1);
    }

    #[test]
    fn exception_messages_produce_no_response() {
        let frame = Frame::request(MessageType::Exception, 1, -1, Bytes::new());
        assert!(handle_one(&frame, &EchoHandler).is_none());
    }
}
