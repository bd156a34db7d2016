//! Fuzz target for `FrameHeader::from_bytes`.
//!
//! The header is a `#[repr(C, packed)]` struct cast directly out of raw
//! bytes via `zerocopy`, so every 17-byte pattern is structurally valid;
//! the only thing left to check is that `from_bytes` rejects short slices
//! and out-of-range `payload_size` values as errors rather than producing
//! a header that later code trusts past the wire's addressable-array
//! limit.

#![no_main]

use libfuzzer_sys::fuzz_target;
use pjrmi_proto::FrameHeader;

fuzz_target!(|data: &[u8]| {
    let _ = FrameHeader::from_bytes(data);
});
