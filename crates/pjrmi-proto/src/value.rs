//! Tagged argument encoding (spec.md §4.4): every argument value on the
//! wire is a one-byte tag followed by a tag-specific body. This module
//! only knows how to read/write the envelope; interpreting `V`'s inner
//! type-specific payload is `pjrmi-marshal`'s job (it needs the type
//! registry to know which primitive encoding follows).

use bytes::{Buf, BufMut};

use crate::{
    errors::{ProtocolError, Result},
    wire,
};

/// The five wire forms an argument (or return value) can take.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArgTag {
    /// `V`: an inline, self-describing value (primitive or object).
    Value,
    /// `R`: a reference to an object already known to the peer by handle.
    Reference,
    /// `S`: bulk numeric array data transferred out-of-band via shared
    /// memory, with this tag's body only carrying the SHM descriptor.
    Shm,
    /// `M`: a bound method handle (object handle + method id), used when
    /// passing a method reference rather than invoking it.
    MethodHandle,
    /// `L`: a lambda: a callback handle the peer can invoke later.
    Lambda,
}

impl ArgTag {
    /// Encode as the wire byte.
    #[must_use]
    pub const fn to_u8(self) -> u8 {
        match self {
            Self::Value => b'V',
            Self::Reference => b'R',
            Self::Shm => b'S',
            Self::MethodHandle => b'M',
            Self::Lambda => b'L',
        }
    }

    /// Decode from a wire byte.
    #[must_use]
    pub const fn from_u8(byte: u8) -> Option<Self> {
        match byte {
            b'V' => Some(Self::Value),
            b'R' => Some(Self::Reference),
            b'S' => Some(Self::Shm),
            b'M' => Some(Self::MethodHandle),
            b'L' => Some(Self::Lambda),
            _ => None,
        }
    }

    /// Decode from a wire byte, or a typed error.
    pub fn try_from_u8(byte: u8) -> Result<Self> {
        Self::from_u8(byte).ok_or(ProtocolError::UnknownArgTag(byte))
    }
}

/// A reference argument's body: the handle the peer already holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReferenceArg {
    /// The handle identifying the remote object.
    pub handle: i64,
}

impl ReferenceArg {
    /// Writes the tag byte and body.
    pub fn encode(self, dst: &mut impl BufMut) {
        dst.put_u8(ArgTag::Reference.to_u8());
        dst.put_i64(self.handle);
    }

    /// Reads the body, assuming the tag byte has already been consumed.
    pub fn decode_body(buf: &mut impl Buf) -> Result<Self> {
        Ok(Self { handle: wire::get_i64(buf)? })
    }
}

/// A bound-method-handle argument's body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MethodHandleArg {
    /// Handle of the object the method is bound to.
    pub object_handle: i64,
    /// Id of the method within the object's type descriptor.
    pub method_id: i32,
}

impl MethodHandleArg {
    /// Writes the tag byte and body.
    pub fn encode(self, dst: &mut impl BufMut) {
        dst.put_u8(ArgTag::MethodHandle.to_u8());
        dst.put_i64(self.object_handle);
        dst.put_i32(self.method_id);
    }

    /// Reads the body, assuming the tag byte has already been consumed.
    pub fn decode_body(buf: &mut impl Buf) -> Result<Self> {
        Ok(Self { object_handle: wire::get_i64(buf)?, method_id: wire::get_i32(buf)? })
    }
}

/// A lambda argument's body: a callback handle the peer allocated locally
/// and registered before sending.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LambdaArg {
    /// The callback handle to invoke on this side when the peer calls it.
    pub callback_handle: i64,
    /// Declared arity, so the peer can validate calls before dispatching
    /// (spec.md §4.8: arity must fit in a single byte, 0..=255).
    pub arity: u8,
}

impl LambdaArg {
    /// Writes the tag byte and body.
    pub fn encode(self, dst: &mut impl BufMut) {
        dst.put_u8(ArgTag::Lambda.to_u8());
        dst.put_i64(self.callback_handle);
        dst.put_u8(self.arity);
    }

    /// Reads the body, assuming the tag byte has already been consumed.
    pub fn decode_body(buf: &mut impl Buf) -> Result<Self> {
        Ok(Self { callback_handle: wire::get_i64(buf)?, arity: wire::get_u8(buf)? })
    }
}

/// A shared-memory argument's body (spec.md §4.9): the whole of it, not
/// just a descriptor fragment — this tag carries the out-of-band array
/// directly, with no separate `V`-style header naming a java type. The
/// callee already knows the declared parameter type from the method
/// signature it resolved to reach this argument.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShmArg {
    /// Name of the backing SHM file, relative to the configured SHM
    /// directory.
    pub file_name: String,
    /// Number of elements in the array (not a byte count).
    pub length: i32,
    /// The element dtype code (spec.md §4.9), e.g. `"d"` for `double`.
    pub dtype_code: String,
}

impl ShmArg {
    /// Writes the tag byte and body: `S` · UTF-16 filename · int32 length
    /// · UTF-16 dtype-code, per spec.md §4.9.
    pub fn encode(&self, dst: &mut impl BufMut) {
        dst.put_u8(ArgTag::Shm.to_u8());
        wire::put_utf16_string(dst, &self.file_name);
        dst.put_i32(self.length);
        wire::put_utf16_string(dst, &self.dtype_code);
    }

    /// Reads the body, assuming the tag byte has already been consumed.
    pub fn decode_body(buf: &mut impl Buf) -> Result<Self> {
        Ok(Self {
            file_name: wire::get_utf16_string(buf)?,
            length: wire::get_i32(buf)?,
            dtype_code: wire::get_utf16_string(buf)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arg_tag_round_trips_known_bytes() {
        for tag in [ArgTag::Value, ArgTag::Reference, ArgTag::Shm, ArgTag::MethodHandle, ArgTag::Lambda] {
            assert_eq!(ArgTag::from_u8(tag.to_u8()), Some(tag));
        }
    }

    #[test]
    fn unknown_arg_tag_is_an_error() {
        assert!(matches!(ArgTag::try_from_u8(b'?'), Err(ProtocolError::UnknownArgTag(b'?'))));
    }

    #[test]
    fn reference_arg_round_trips() {
        let arg = ReferenceArg { handle: -42 };
        let mut buf = Vec::new();
        arg.encode(&mut buf);
        assert_eq!(buf[0], b'R');
        let mut body = &buf[1..];
        assert_eq!(ReferenceArg::decode_body(&mut body).unwrap(), arg);
    }

    #[test]
    fn method_handle_arg_round_trips() {
        let arg = MethodHandleArg { object_handle: 7, method_id: 3 };
        let mut buf = Vec::new();
        arg.encode(&mut buf);
        let mut body = &buf[1..];
        assert_eq!(MethodHandleArg::decode_body(&mut body).unwrap(), arg);
    }

    #[test]
    fn lambda_arg_round_trips() {
        let arg = LambdaArg { callback_handle: 99, arity: 2 };
        let mut buf = Vec::new();
        arg.encode(&mut buf);
        let mut body = &buf[1..];
        assert_eq!(LambdaArg::decode_body(&mut body).unwrap(), arg);
    }

    #[test]
    fn shm_arg_round_trips() {
        let arg = ShmArg { file_name: "pjrmi-shm-1".to_owned(), length: 4096, dtype_code: "d".to_owned() };
        let mut buf = Vec::new();
        arg.encode(&mut buf);
        let mut body = &buf[1..];
        assert_eq!(ShmArg::decode_body(&mut body).unwrap(), arg);
    }
}
