//! End-to-end property tests across the header/frame/value layers: these
//! exercise the crate's public API the way a transport implementation in
//! `pjrmi-client` would, rather than reaching into private module internals
//! the way the unit tests in `src/` do.

use bytes::Bytes;
use pjrmi_proto::{
    value::{ArgTag, LambdaArg, ReferenceArg},
    Frame, FrameHeader, MessageType, ProtocolError,
};
use proptest::prelude::*;

fn arbitrary_message_type() -> impl Strategy<Value = MessageType> {
    prop_oneof![
        Just(MessageType::InstanceLookup),
        Just(MessageType::MethodCall),
        Just(MessageType::ToString),
        Just(MessageType::Callback),
        Just(MessageType::ShmBytes),
        Just(MessageType::Exception),
    ]
}

proptest! {
    #[test]
    fn frame_survives_a_wire_round_trip(
        msg_type in arbitrary_message_type(),
        thread_id in any::<i64>(),
        request_id in any::<i32>(),
        payload in prop::collection::vec(any::<u8>(), 0..512),
    ) {
        let frame = Frame::request(msg_type, thread_id, request_id, payload.clone());

        let mut wire = Vec::new();
        frame.encode(&mut wire).expect("should encode");

        // Split the way a blocking transport reads: exactly SIZE header
        // bytes, then exactly payload_size payload bytes.
        let (header_bytes, payload_bytes) = wire.split_at(FrameHeader::SIZE);
        let header_array: [u8; FrameHeader::SIZE] = header_bytes.try_into().unwrap();
        let parsed = Frame::decode_exact(&header_array, Bytes::copy_from_slice(payload_bytes))
            .expect("should decode");

        prop_assert_eq!(parsed.header.message_type(), Some(msg_type));
        prop_assert_eq!(parsed.header.thread_id(), thread_id);
        prop_assert_eq!(parsed.header.request_id(), request_id);
        prop_assert_eq!(parsed.payload.as_ref(), payload.as_slice());
    }
}

#[test]
fn unsolicited_requests_use_the_reserved_request_id() {
    let frame = Frame::request(
        MessageType::Callback,
        7,
        pjrmi_proto::UNSOLICITED_REQUEST_ID,
        Vec::new(),
    );
    assert_eq!(frame.header.request_id(), pjrmi_proto::UNSOLICITED_REQUEST_ID);
}

#[test]
fn reference_and_lambda_args_are_distinguishable_by_tag() {
    let mut buf = Vec::new();
    ReferenceArg { handle: 100 }.encode(&mut buf);
    assert_eq!(ArgTag::try_from_u8(buf[0]), Ok(ArgTag::Reference));

    let mut buf = Vec::new();
    LambdaArg { callback_handle: 5, arity: 1 }.encode(&mut buf);
    assert_eq!(ArgTag::try_from_u8(buf[0]), Ok(ArgTag::Lambda));
}

#[test]
fn decoding_a_header_only_buffer_fails_cleanly() {
    let result = FrameHeader::from_bytes(&[0u8; 3]);
    assert!(matches!(result, Err(ProtocolError::FrameTooShort { .. })));
}
