//! Frame header implementation with zero-copy parsing.
//!
//! The `FrameHeader` is a fixed 17-byte structure serialized as raw binary
//! (Big Endian), exactly as spec.md §4.1 defines it: `msg_type:byte ·
//! thread_id:int64 · request_id:int32 · payload_size:int32`. Every message
//! on the wire starts with these 17 bytes, followed by exactly
//! `payload_size` bytes of payload.

use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use crate::{
    errors::{ProtocolError, Result},
    message::MessageType,
};

/// Fixed 17-byte frame header (Big Endian network byte order).
///
/// Fields are stored as raw byte arrays rather than native integers so the
/// struct has no alignment requirements and can be cast directly from an
/// untrusted byte slice.
///
/// # Security
///
/// `#[repr(C, packed)]` plus the `zerocopy` traits below mean every 17-byte
/// pattern is a structurally valid `FrameHeader` — casting untrusted bytes
/// cannot produce undefined behavior. This does not mean the header is
/// semantically valid; `from_bytes` still validates `payload_size` against
/// the protocol's addressable-array limit before returning it.
#[repr(C, packed)]
#[derive(Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable)]
pub struct FrameHeader {
    msg_type: u8,
    thread_id: [u8; 8],
    request_id: [u8; 4],
    payload_size: [u8; 4],
}

impl FrameHeader {
    /// Size of the serialized header (17 bytes).
    pub const SIZE: usize = 17;

    /// Maximum payload size: the addressable array limit on the peer
    /// (spec.md §4.1: "must not exceed 2,147,483,647").
    pub const MAX_PAYLOAD_SIZE: u32 = i32::MAX as u32;

    /// Build a new header for the given message type, thread id and request
    /// id. `payload_size` is filled in later by [`crate::Frame::new`].
    #[must_use]
    pub fn new(msg_type: MessageType, thread_id: i64, request_id: i32) -> Self {
        Self {
            msg_type: msg_type.to_u8(),
            thread_id: thread_id.to_be_bytes(),
            request_id: request_id.to_be_bytes(),
            payload_size: [0; 4],
        }
    }

    /// Parse a header from the front of `bytes` (zero-copy, safe).
    ///
    /// # Errors
    ///
    /// - [`ProtocolError::FrameTooShort`] if fewer than [`Self::SIZE`] bytes
    ///   are available.
    /// - [`ProtocolError::UnknownMessageType`] if the first byte is not a
    ///   recognized tag.
    /// - [`ProtocolError::PayloadTooLarge`] if the declared payload size
    ///   exceeds [`Self::MAX_PAYLOAD_SIZE`].
    pub fn from_bytes(bytes: &[u8]) -> Result<&Self> {
        let header = Self::ref_from_prefix(bytes)
            .map_err(|_| ProtocolError::FrameTooShort { expected: Self::SIZE, actual: bytes.len() })?
            .0;

        MessageType::try_from_u8(header.msg_type)?;

        let payload_size = header.payload_size();
        if payload_size > Self::MAX_PAYLOAD_SIZE {
            return Err(ProtocolError::PayloadTooLarge {
                size: payload_size as usize,
                max: Self::MAX_PAYLOAD_SIZE as usize,
            });
        }

        Ok(header)
    }

    /// Serialize to a 17-byte array.
    #[must_use]
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let bytes = IntoBytes::as_bytes(self);
        let mut arr = [0u8; Self::SIZE];
        arr.copy_from_slice(bytes);
        arr
    }

    /// Message type byte, decoded. `None` only if the header was
    /// constructed by hand with a bad byte; frames parsed with
    /// [`Self::from_bytes`] always decode.
    #[must_use]
    pub fn message_type(&self) -> Option<MessageType> {
        MessageType::from_u8(self.msg_type)
    }

    /// Raw message type byte.
    #[must_use]
    pub fn message_type_byte(&self) -> u8 {
        self.msg_type
    }

    /// Thread id identifying the logical call chain this frame belongs to.
    #[must_use]
    pub fn thread_id(&self) -> i64 {
        i64::from_be_bytes(self.thread_id)
    }

    /// Request id: monotonically increasing per connection, or
    /// [`crate::message::UNSOLICITED_REQUEST_ID`] for server-originated
    /// unsolicited requests.
    #[must_use]
    pub fn request_id(&self) -> i32 {
        i32::from_be_bytes(self.request_id)
    }

    /// Payload length in bytes.
    #[must_use]
    pub fn payload_size(&self) -> u32 {
        u32::from_be_bytes(self.payload_size)
    }

    /// Set the payload size field (used by [`crate::Frame::new`] to keep
    /// the header and payload length in sync).
    pub(crate) fn set_payload_size(&mut self, size: u32) {
        self.payload_size = size.to_be_bytes();
    }
}

// Manual Debug impl: packed repr means field references are unaligned.
impl std::fmt::Debug for FrameHeader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameHeader")
            .field("msg_type", &self.message_type())
            .field("thread_id", &self.thread_id())
            .field("request_id", &self.request_id())
            .field("payload_size", &self.payload_size())
            .finish()
    }
}

impl PartialEq for FrameHeader {
    fn eq(&self, other: &Self) -> bool {
        self.to_bytes() == other.to_bytes()
    }
}

impl Eq for FrameHeader {}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    fn arbitrary_message_byte() -> impl Strategy<Value = u8> {
        prop_oneof![
            Just(MessageType::InstanceLookup.to_u8()),
            Just(MessageType::MethodCall.to_u8()),
            Just(MessageType::Callback.to_u8()),
            Just(MessageType::ShmBytes.to_u8()),
        ]
    }

    impl Arbitrary for FrameHeader {
        type Parameters = ();
        type Strategy = BoxedStrategy<Self>;

        fn arbitrary_with((): Self::Parameters) -> Self::Strategy {
            (arbitrary_message_byte(), any::<i64>(), any::<i32>(), 0u32..=Self::MAX_PAYLOAD_SIZE)
                .prop_map(|(msg_type, thread_id, request_id, payload_size)| {
                    let mut header = Self::new(
                        MessageType::from_u8(msg_type)
                            .unwrap_or(MessageType::InstanceLookup),
                        thread_id,
                        request_id,
                    );
                    header.set_payload_size(payload_size);
                    header
                })
                .boxed()
        }
    }

    #[test]
    fn header_size() {
        assert_eq!(std::mem::size_of::<FrameHeader>(), FrameHeader::SIZE);
        assert_eq!(FrameHeader::SIZE, 17);
    }

    proptest! {
        #[test]
        fn header_round_trip(header in any::<FrameHeader>()) {
            let bytes = header.to_bytes();
            let parsed = FrameHeader::from_bytes(&bytes).expect("should parse");
            prop_assert_eq!(&header, parsed);
        }

        #[test]
        fn request_id_never_negative_one_on_client_headers(
            thread_id in any::<i64>(), request_id in 0i32..=i32::MAX,
        ) {
            let header = FrameHeader::new(MessageType::MethodCall, thread_id, request_id);
            prop_assert_ne!(header.request_id(), -1);
        }
    }

    #[test]
    fn reject_short_buffer() {
        let short_buf = [0u8; 10];
        let result = FrameHeader::from_bytes(&short_buf);
        assert_eq!(result, Err(ProtocolError::FrameTooShort { expected: 17, actual: 10 }));
    }

    #[test]
    fn reject_unknown_message_type() {
        let mut buf = [0u8; 17];
        buf[0] = 0x00;
        let result = FrameHeader::from_bytes(&buf);
        assert_eq!(result, Err(ProtocolError::UnknownMessageType(0x00)));
    }

    #[test]
    fn reject_oversized_payload() {
        let mut buf = [0u8; 17];
        buf[0] = MessageType::MethodCall.to_u8();
        buf[9..13].copy_from_slice(&0i32.to_be_bytes());
        let oversized = FrameHeader::MAX_PAYLOAD_SIZE + 1;
        buf[13..17].copy_from_slice(&oversized.to_be_bytes());

        let result = FrameHeader::from_bytes(&buf);
        assert!(matches!(result, Err(ProtocolError::PayloadTooLarge { .. })));
    }
}
