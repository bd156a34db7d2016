//! Value marshalling for PJRmi: numeric narrowing, overload resolution,
//! and shared-memory array eligibility.
//!
//! This crate is pure logic — no sockets, no filesystem. It takes local
//! values and [`pjrmi_core::TypeDescriptor`]s in, and produces wire-ready
//! bytes or a resolved overload index out. `pjrmi-client` drives it with
//! real connections.

pub mod marshal;
pub mod narrowing;
pub mod overload;
pub mod shm_policy;

pub use marshal::{decode_value, EncodedArg, Fidelity, MarshalOptions, Marshaller, Value, SLICE_TYPE_NAME};
pub use narrowing::{NumericKind, NumericValue};
pub use overload::{resolve, ArgumentFit, CandidateFit, ResolutionOutcome};
pub use shm_policy::{dtype_code, evaluate, IneligibleReason, ShmCandidate, ShmDecision};
