//! Fuzz target for `Frame::decode`.
//!
//! Exercises the full 17-byte-header-plus-payload parse against arbitrary
//! byte sequences. The decoder must never panic: short, truncated, or
//! oversized-payload-size inputs should all come back as a typed
//! `ProtocolError`, never a crash.

#![no_main]

use libfuzzer_sys::fuzz_target;
use pjrmi_proto::Frame;

fuzz_target!(|data: &[u8]| {
    let _ = Frame::decode(data);
});
