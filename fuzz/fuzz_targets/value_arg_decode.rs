//! Fuzz target for the tagged-argument envelope (`pjrmi_proto::value`) and
//! the primitive wire readers underneath it.
//!
//! Reads the leading tag byte and dispatches to the matching body decoder,
//! the same sequence `pjrmi-marshal`'s argument decoding performs once a
//! type registry is available to interpret a `Value` tag's payload. Every
//! body decoder bottoms out in `wire::get_*`, so this single target also
//! covers the ASCII/UTF-16 string and length-prefixed byte array readers
//! against truncated and adversarial length prefixes.

#![no_main]

use bytes::Bytes;
use libfuzzer_sys::fuzz_target;
use pjrmi_proto::{wire, ArgTag, LambdaArg, MethodHandleArg, ReferenceArg, ShmArg};

fuzz_target!(|data: &[u8]| {
    if data.is_empty() {
        return;
    }

    let tag_byte = data[0];
    let mut body = Bytes::copy_from_slice(&data[1..]);

    let Ok(tag) = ArgTag::try_from_u8(tag_byte) else {
        return;
    };

    match tag {
        ArgTag::Reference => {
            let _ = ReferenceArg::decode_body(&mut body);
        }
        ArgTag::MethodHandle => {
            let _ = MethodHandleArg::decode_body(&mut body);
        }
        ArgTag::Lambda => {
            let _ = LambdaArg::decode_body(&mut body);
        }
        ArgTag::Shm => {
            let _ = ShmArg::decode_body(&mut body);
        }
        ArgTag::Value => {
            // `pjrmi-marshal` reads a type id and dispatches on a type
            // registry from here; without one, exercise the primitive
            // readers a `Value` payload bottoms out in directly.
            let _ = wire::get_i32(&mut body.clone());
            let _ = wire::get_ascii_string(&mut body.clone());
            let _ = wire::get_signed_ascii_string(&mut body.clone());
            let _ = wire::get_utf16_string(&mut body.clone());
            let _ = wire::get_byte_array(&mut body);
        }
    }
});
