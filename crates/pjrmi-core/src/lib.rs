//! Connection-level state for PJRmi: the handshake state machine, type
//! registry, handle lifetime tracking, and callback/export registry.
//!
//! This crate has no transport or threading of its own — every background
//! thread, socket read, and frame dispatch loop lives in `pjrmi-client`,
//! which drives the state machines defined here. Keeping that split lets
//! the handshake and registries be unit-tested with hand-assembled bytes
//! instead of a real connection.

pub mod callback_registry;
pub mod connection;
pub mod env;
pub mod error;
pub mod handle;
pub mod handle_registry;
pub mod type_registry;
pub mod types;

pub use callback_registry::{CallbackEntry, CallbackRegistry, LocalId, WrapperKey};
pub use connection::{Connection, ConnectionAction, ConnectionPhase, HelloParams};
pub use env::{Environment, SystemEnvironment};
pub use error::PjrmiError;
pub use handle::{BoxedValue, Handle, Proxy};
pub use handle_registry::HandleRegistry;
pub use type_registry::TypeRegistry;
pub use types::{
    CallableDescriptor, FieldDescriptor, Specificity, SpecificityMatrix, TypeDescriptor, TypeFlags,
    TypeId, BOOTSTRAP_NAMES,
};
