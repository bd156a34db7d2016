//! Handles and proxies (spec.md §3).

use crate::types::TypeId;

/// 64-bit id identifying a remote object. `0` is the null handle;
/// negative values are reserved (the callback request id `-1`, spec.md
/// §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Handle(pub i64);

impl Handle {
    /// The null handle.
    pub const NULL: Self = Self(0);

    /// Whether this is the null handle.
    #[must_use]
    pub fn is_null(self) -> bool {
        self == Self::NULL
    }
}

/// Local representation of a remote object: its handle, its type
/// descriptor id, and the connection it belongs to.
///
/// Equality is by `(connection_id, handle)` per spec.md §3 ("Equality is
/// by (connection, handle)"); hashing the remote object's own `hashCode`
/// and caching it for immutable types is a `pjrmi-client` concern, since
/// it requires a round trip the core layer must not perform implicitly.
#[derive(Debug, Clone, Copy)]
pub struct Proxy {
    /// Id of the owning connection, distinguishing proxies with the same
    /// handle value on different connections.
    pub connection_id: u64,
    /// The remote object's handle.
    pub handle: Handle,
    /// The remote object's type.
    pub type_id: TypeId,
}

impl PartialEq for Proxy {
    fn eq(&self, other: &Self) -> bool {
        self.connection_id == other.connection_id && self.handle == other.handle
    }
}

impl Eq for Proxy {}

impl std::hash::Hash for Proxy {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.connection_id.hash(state);
        self.handle.hash(state);
    }
}

/// Local representation of a remote primitive/string instance that also
/// behaves as the native value in arithmetic and comparisons (spec.md §3:
/// "quacks like the local numeric or string type"). Marshalling a box back
/// out must prefer the handle over re-encoding the native value, since the
/// server's copy may carry identity the plain value does not.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoxedValue<T> {
    /// Native value (e.g. an `i32`).
    pub native: T,
    /// The remote object's proxy, if one has been constructed for this
    /// box (a freshly created local box not yet sent to the server has
    /// none).
    pub proxy: Option<Proxy>,
}

impl<T> BoxedValue<T> {
    /// Wrap a bare native value with no remote handle yet.
    pub fn local(native: T) -> Self {
        Self { native, proxy: None }
    }

    /// Wrap a native value alongside the proxy it was received as.
    pub fn remote(native: T, proxy: Proxy) -> Self {
        Self { native, proxy: Some(proxy) }
    }

    /// The handle to prefer when marshalling this box back out, if any.
    #[must_use]
    pub fn preferred_handle(&self) -> Option<Handle> {
        self.proxy.map(|p| p.handle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_handle_is_zero() {
        assert_eq!(Handle::NULL.0, 0);
        assert!(Handle::NULL.is_null());
        assert!(!Handle(1).is_null());
    }

    #[test]
    fn proxy_equality_ignores_type_id() {
        let a = Proxy { connection_id: 1, handle: Handle(42), type_id: TypeId(1) };
        let b = Proxy { connection_id: 1, handle: Handle(42), type_id: TypeId(2) };
        assert_eq!(a, b);
    }

    #[test]
    fn proxy_equality_distinguishes_connections() {
        let a = Proxy { connection_id: 1, handle: Handle(42), type_id: TypeId(1) };
        let b = Proxy { connection_id: 2, handle: Handle(42), type_id: TypeId(1) };
        assert_ne!(a, b);
    }

    #[test]
    fn boxed_value_prefers_remote_handle() {
        let proxy = Proxy { connection_id: 1, handle: Handle(7), type_id: TypeId(9) };
        let boxed = BoxedValue::remote(5i32, proxy);
        assert_eq!(boxed.preferred_handle(), Some(Handle(7)));

        let local = BoxedValue::local(5i32);
        assert_eq!(local.preferred_handle(), None);
    }
}
