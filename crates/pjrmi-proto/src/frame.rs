//! Frame type combining header and payload.
//!
//! A `Frame` is the unit the transport sends and receives: a 17-byte header
//! (spec.md §4.1) followed by exactly `header.payload_size()` bytes of
//! payload. This module only deals in raw bytes — interpreting the payload
//! as a message-type-specific structure is `pjrmi-core`/`pjrmi-marshal`'s
//! job.

use bytes::{BufMut, Bytes};

use crate::{
    errors::{ProtocolError, Result},
    header::FrameHeader,
    message::MessageType,
};

/// A complete protocol frame: header plus raw payload bytes.
///
/// # Invariants
///
/// - `payload.len()` always matches `header.payload_size()` — enforced by
///   [`Frame::new`], which computes the header field from the payload it is
///   given rather than trusting a caller-supplied value.
/// - `payload.len()` never exceeds [`FrameHeader::MAX_PAYLOAD_SIZE`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Frame header (17 bytes).
    pub header: FrameHeader,
    /// Raw payload bytes.
    pub payload: Bytes,
}

impl Frame {
    /// Build a frame, computing `header.payload_size` from `payload`.
    ///
    /// # Panics
    ///
    /// Panics if `payload.len() > u32::MAX`, which cannot happen in
    /// practice: `Bytes` is bounded by `isize::MAX`, far below `u32::MAX`.
    #[must_use]
    pub fn new(mut header: FrameHeader, payload: impl Into<Bytes>) -> Self {
        let payload = payload.into();

        #[allow(clippy::expect_used)]
        let payload_len = u32::try_from(payload.len())
            .expect("invariant: payload length fits in u32 (bounded by isize::MAX)");

        header.set_payload_size(payload_len);
        Self { header, payload }
    }

    /// Convenience constructor for a request frame.
    #[must_use]
    pub fn request(
        msg_type: MessageType,
        thread_id: i64,
        request_id: i32,
        payload: impl Into<Bytes>,
    ) -> Self {
        Self::new(FrameHeader::new(msg_type, thread_id, request_id), payload)
    }

    /// Encode the frame onto `dst`: header bytes followed by payload bytes.
    ///
    /// # Errors
    ///
    /// [`ProtocolError::PayloadTooLarge`] if the payload exceeds the
    /// protocol's maximum.
    pub fn encode(&self, dst: &mut impl BufMut) -> Result<()> {
        debug_assert_eq!(self.payload.len(), self.header.payload_size() as usize);

        if self.payload.len() > FrameHeader::MAX_PAYLOAD_SIZE as usize {
            return Err(ProtocolError::PayloadTooLarge {
                size: self.payload.len(),
                max: FrameHeader::MAX_PAYLOAD_SIZE as usize,
            });
        }

        dst.put_slice(&self.header.to_bytes());
        dst.put_slice(&self.payload);
        Ok(())
    }

    /// Decode a frame from `bytes`. Trailing bytes beyond the frame are
    /// ignored — callers that read directly off a stream should instead use
    /// [`Self::decode_exact`] after reading exactly `header.payload_size()`
    /// bytes per spec.md §4.1 ("Receivers must read exactly 17 header
    /// bytes, then exactly `payload_size` payload bytes").
    ///
    /// # Errors
    ///
    /// Propagates [`FrameHeader::from_bytes`] errors, plus
    /// [`ProtocolError::FrameTruncated`] if fewer payload bytes are present
    /// than the header claims.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let header = FrameHeader::from_bytes(bytes)?;
        let payload_size = header.payload_size() as usize;
        let total_size = FrameHeader::SIZE.checked_add(payload_size).ok_or(
            ProtocolError::PayloadTooLarge { size: payload_size, max: FrameHeader::MAX_PAYLOAD_SIZE as usize },
        )?;

        if bytes.len() < total_size {
            return Err(ProtocolError::FrameTruncated {
                expected: payload_size,
                actual: bytes.len().saturating_sub(FrameHeader::SIZE),
            });
        }

        #[allow(clippy::expect_used)]
        let payload = Bytes::copy_from_slice(
            bytes.get(FrameHeader::SIZE..total_size).expect("invariant: bounds checked above"),
        );

        Ok(Self { header: *header, payload })
    }

    /// Decode a frame whose payload has already been read in full (the
    /// `header bytes` + `payload bytes` reads the transport layer performs
    /// per spec.md §4.1). Equivalent to [`Self::decode`] but documents the
    /// caller's intent at call sites in the correlator/dispatch loop.
    pub fn decode_exact(header_bytes: &[u8; FrameHeader::SIZE], payload: Bytes) -> Result<Self> {
        let header = *FrameHeader::from_bytes(header_bytes)?;
        if payload.len() != header.payload_size() as usize {
            return Err(ProtocolError::FrameTruncated {
                expected: header.payload_size() as usize,
                actual: payload.len(),
            });
        }
        Ok(Self { header, payload })
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;
    use crate::message::MessageType;

    impl Arbitrary for Frame {
        type Parameters = ();
        type Strategy = BoxedStrategy<Self>;

        fn arbitrary_with((): Self::Parameters) -> Self::Strategy {
            (any::<FrameHeader>(), any::<Vec<u8>>())
                .prop_map(|(header, payload_bytes)| Self::new(header, payload_bytes))
                .boxed()
        }
    }

    proptest! {
        #[test]
        fn frame_round_trip(frame in any::<Frame>()) {
            let mut wire = Vec::new();
            frame.encode(&mut wire).expect("should encode");
            let parsed = Frame::decode(&wire).expect("should decode");
            prop_assert_eq!(frame.payload, parsed.payload);
        }
    }

    #[test]
    fn frame_with_payload_sets_size_automatically() {
        let header = FrameHeader::new(MessageType::MethodCall, 42, 7);
        let payload_bytes = vec![1, 2, 3, 4];
        let frame = Frame::new(header, payload_bytes.clone());

        assert_eq!(frame.header.payload_size(), payload_bytes.len() as u32);

        let mut wire = Vec::new();
        frame.encode(&mut wire).expect("should encode");
        let parsed = Frame::decode(&wire).expect("should decode");
        assert_eq!(frame.payload, parsed.payload);
    }

    #[test]
    fn reject_truncated_frame() {
        let mut header = FrameHeader::new(MessageType::MethodCall, 0, 0);
        header.set_payload_size(100);
        let header_bytes = header.to_bytes();

        let result = Frame::decode(&header_bytes);
        assert!(matches!(result, Err(ProtocolError::FrameTruncated { .. })));
    }

    #[test]
    fn decode_exact_checks_length() {
        let header = FrameHeader::new(MessageType::ToString, 0, 0);
        let header_bytes = header.to_bytes();

        let ok = Frame::decode_exact(&header_bytes, Bytes::new());
        assert!(ok.is_ok());

        let mismatched = Frame::decode_exact(&header_bytes, Bytes::from_static(b"oops"));
        assert!(matches!(mismatched, Err(ProtocolError::FrameTruncated { .. })));
    }
}
