//! Codec primitives: big-endian fixed-width integers, length-prefixed
//! strings (UTF-16 and ASCII), and length-prefixed byte arrays (spec.md §2
//! component 2, "Framing & codec primitives").
//!
//! These are the building blocks `pjrmi-marshal` uses to encode and decode
//! argument values; they know nothing about message types or type ids.

use bytes::{Buf, BufMut};

use crate::errors::{ProtocolError, Result};

/// Reads a big-endian `u8` from `buf`.
pub fn get_u8(buf: &mut impl Buf) -> Result<u8> {
    ensure_remaining(buf, 1)?;
    Ok(buf.get_u8())
}

/// Reads a big-endian `i32` from `buf`.
pub fn get_i32(buf: &mut impl Buf) -> Result<i32> {
    ensure_remaining(buf, 4)?;
    Ok(buf.get_i32())
}

/// Reads a big-endian `i64` from `buf`.
pub fn get_i64(buf: &mut impl Buf) -> Result<i64> {
    ensure_remaining(buf, 8)?;
    Ok(buf.get_i64())
}

/// Reads a big-endian `f32` from `buf`.
pub fn get_f32(buf: &mut impl Buf) -> Result<f32> {
    ensure_remaining(buf, 4)?;
    Ok(buf.get_f32())
}

/// Reads a big-endian `f64` from `buf`.
pub fn get_f64(buf: &mut impl Buf) -> Result<f64> {
    ensure_remaining(buf, 8)?;
    Ok(buf.get_f64())
}

fn ensure_remaining(buf: &impl Buf, needed: usize) -> Result<()> {
    if buf.remaining() < needed {
        return Err(ProtocolError::FieldTruncated { expected: needed, actual: buf.remaining() });
    }
    Ok(())
}

/// Writes a UTF-16 string with a 4-byte big-endian length prefix (the
/// prefix counts UTF-16 code units, not bytes, matching the Java
/// `DataOutputStream.writeChars`-style encoding spec.md §4.4 assumes).
pub fn put_utf16_string(dst: &mut impl BufMut, s: &str) {
    let units: Vec<u16> = s.encode_utf16().collect();
    #[allow(clippy::cast_possible_truncation)]
    dst.put_i32(units.len() as i32);
    for unit in units {
        dst.put_u16(unit);
    }
}

/// Reads a UTF-16 string with a 4-byte big-endian length prefix.
///
/// # Errors
///
/// - [`ProtocolError::FieldTruncated`] if fewer code units are present than
///   the prefix declares.
/// - [`ProtocolError::InvalidUtf16`] if the code units do not form valid
///   UTF-16 (e.g. an unpaired surrogate).
pub fn get_utf16_string(buf: &mut impl Buf) -> Result<String> {
    let len = get_i32(buf)?;
    if len < 0 {
        return Err(ProtocolError::InvalidUtf16);
    }
    let len = len as usize;
    ensure_remaining(buf, len.saturating_mul(2))?;

    let mut units = Vec::with_capacity(len);
    for _ in 0..len {
        ensure_remaining(buf, 2)?;
        units.push(buf.get_u16());
    }
    String::from_utf16(&units).map_err(|_| ProtocolError::InvalidUtf16)
}

/// Writes an ASCII string: 4-byte big-endian length prefix (bytes), then
/// the bytes themselves. A negative length prefix is used by the handshake
/// (spec.md §4.2) to carry an error message instead of a plain string; use
/// [`put_signed_ascii_string`] for that case.
pub fn put_ascii_string(dst: &mut impl BufMut, s: &str) {
    put_signed_ascii_string(dst, s, false);
}

/// Writes an ASCII string whose length prefix is negated when `negative`
/// is set. The handshake (spec.md §4.2) uses the sign of a short string's
/// length to distinguish a normal reply (service name, hello echo) from an
/// error message.
pub fn put_signed_ascii_string(dst: &mut impl BufMut, s: &str, negative: bool) {
    debug_assert!(s.is_ascii(), "ASCII string field contains non-ASCII bytes: {s:?}");
    #[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
    let len = s.len() as i32;
    dst.put_i32(if negative { -len } else { len });
    dst.put_slice(s.as_bytes());
}

/// Reads an ASCII string written by [`put_ascii_string`]. A negative
/// length prefix is returned as `Err` here — callers on the handshake path
/// that need to observe the sign should use [`get_signed_ascii_string`]
/// instead.
pub fn get_ascii_string(buf: &mut impl Buf) -> Result<String> {
    let len = get_i32(buf)?;
    if len < 0 {
        return Err(ProtocolError::FieldTruncated { expected: 0, actual: 0 });
    }
    get_ascii_bytes(buf, len as usize)
}

/// Reads an ASCII string whose length prefix may be negative (the
/// handshake's error-signaling convention, spec.md §4.2). Returns the raw
/// signed length alongside the decoded text so the caller can branch on
/// its sign.
pub fn get_signed_ascii_string(buf: &mut impl Buf) -> Result<(i32, String)> {
    let len = get_i32(buf)?;
    let text = get_ascii_bytes(buf, len.unsigned_abs() as usize)?;
    Ok((len, text))
}

/// Reads exactly `len` bytes and interprets them as ASCII/Latin-1 text,
/// lossily substituting any non-ASCII byte. Used after the caller has
/// already inspected the sign of a length prefix (spec.md §4.2's
/// negative-length error string).
pub fn get_ascii_bytes(buf: &mut impl Buf, len: usize) -> Result<String> {
    ensure_remaining(buf, len)?;
    let mut bytes = vec![0u8; len];
    buf.copy_to_slice(&mut bytes);
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

/// Writes a length-prefixed byte array: 4-byte big-endian length, then the
/// bytes.
pub fn put_byte_array(dst: &mut impl BufMut, bytes: &[u8]) {
    #[allow(clippy::cast_possible_truncation)]
    dst.put_i32(bytes.len() as i32);
    dst.put_slice(bytes);
}

/// Reads a length-prefixed byte array written by [`put_byte_array`].
pub fn get_byte_array(buf: &mut impl Buf) -> Result<Vec<u8>> {
    let len = get_i32(buf)?;
    if len < 0 {
        return Err(ProtocolError::FieldTruncated { expected: 0, actual: 0 });
    }
    let len = len as usize;
    ensure_remaining(buf, len)?;
    let mut bytes = vec![0u8; len];
    buf.copy_to_slice(&mut bytes);
    Ok(bytes)
}
