//! Callback & export registry (spec.md §4.7).
//!
//! Tracks local callables and objects exported to the server so they can
//! be invoked from the dispatch loop, and their incoming refcounts so
//! entries can be evicted once the server drops its last reference.

use std::{collections::HashMap, sync::Mutex};

use crate::{error::PjrmiError, types::TypeId};

/// Maximum arity a local callable may have when exported (spec.md §4.7:
/// "verify arity ≤ 255").
pub const MAX_CALLBACK_ARITY: u8 = 255;

/// Opaque local id assigned to an exported callable or object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LocalId(pub i64);

/// Key identifying a particular (callable identity, target interface)
/// pairing in the wrapper cache (spec.md §4.7 step 1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WrapperKey {
    /// Identity of the callable or object being exported (e.g. a pointer
    /// address or a content hash, supplied by the caller).
    pub callable_identity: u64,
    /// Target functional-interface or interface type id.
    pub target_type_id: TypeId,
}

/// An exported callable or object entry.
#[derive(Debug, Clone)]
pub struct CallbackEntry {
    /// Local id this entry is registered under.
    pub local_id: LocalId,
    /// Declared arity, for callables (subtract one for bound methods per
    /// spec.md §4.7); `None` for exported objects.
    pub arity: Option<u8>,
    /// Wire handle the server returned for this export.
    pub wire_handle: i64,
    /// Current incoming refcount.
    pub refcount: u64,
}

/// Registry of exported callables/objects and their wire handles.
#[derive(Debug, Default)]
pub struct CallbackRegistry {
    next_local_id: Mutex<i64>,
    wrapper_cache: Mutex<HashMap<WrapperKey, LocalId>>,
    entries: Mutex<HashMap<LocalId, CallbackEntry>>,
}

impl CallbackRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up or allocate a local id for exporting `key`, validating
    /// `arity` against [`MAX_CALLBACK_ARITY`]. Returns the existing local
    /// id if this exact `(callable, target type)` pair was already
    /// exported (the wrapper cache, spec.md §4.7 step 1), or a freshly
    /// allocated one otherwise.
    ///
    /// # Errors
    ///
    /// [`PjrmiError::MarshalError`] if `arity` exceeds
    /// [`MAX_CALLBACK_ARITY`].
    ///
    /// # Panics
    ///
    /// Panics if an internal mutex is poisoned.
    pub fn local_id_for(&self, key: WrapperKey, arity: u8) -> Result<LocalId, PjrmiError> {
        if arity > MAX_CALLBACK_ARITY {
            return Err(PjrmiError::MarshalError {
                type_id: key.target_type_id.0,
                reason: format!("callback arity {arity} exceeds maximum of {MAX_CALLBACK_ARITY}"),
            });
        }

        #[allow(clippy::unwrap_used)]
        let mut cache = self.wrapper_cache.lock().unwrap();
        if let Some(existing) = cache.get(&key) {
            return Ok(*existing);
        }

        #[allow(clippy::unwrap_used)]
        let mut next = self.next_local_id.lock().unwrap();
        let id = LocalId(*next);
        *next += 1;
        drop(next);

        cache.insert(key, id);
        Ok(id)
    }

    /// Record the wire handle the server returned for `local_id` (a
    /// `GET_CALLBACK_HANDLE` or `GET_PROXY` reply).
    ///
    /// # Panics
    ///
    /// Panics if an internal mutex is poisoned.
    pub fn record_export(&self, local_id: LocalId, arity: Option<u8>, wire_handle: i64) {
        #[allow(clippy::unwrap_used)]
        self.entries.lock().unwrap().insert(
            local_id,
            CallbackEntry { local_id, arity, wire_handle, refcount: 0 },
        );
    }

    /// Apply an incoming `ADD_REFERENCE`.
    ///
    /// # Panics
    ///
    /// Panics if an internal mutex is poisoned, or if `local_id` has no
    /// entry (the server referenced something never exported).
    pub fn add_reference(&self, local_id: LocalId) {
        #[allow(clippy::unwrap_used)]
        let mut entries = self.entries.lock().unwrap();
        if let Some(entry) = entries.get_mut(&local_id) {
            entry.refcount += 1;
        }
    }

    /// Apply an incoming `DROP_REFERENCES` of `count` references. Evicts
    /// the entry (and its wrapper-cache mapping) when the refcount reaches
    /// zero (spec.md §4.7).
    ///
    /// # Panics
    ///
    /// Panics if an internal mutex is poisoned.
    pub fn drop_references(&self, local_id: LocalId, count: u64) {
        #[allow(clippy::unwrap_used)]
        let mut entries = self.entries.lock().unwrap();
        let Some(entry) = entries.get_mut(&local_id) else { return };
        entry.refcount = entry.refcount.saturating_sub(count);

        if entry.refcount == 0 {
            entries.remove(&local_id);
            drop(entries);

            #[allow(clippy::unwrap_used)]
            self.wrapper_cache.lock().unwrap().retain(|_, v| *v != local_id);
        }
    }

    /// Current refcount for `local_id`, or `None` if evicted/never
    /// exported.
    ///
    /// # Panics
    ///
    /// Panics if an internal mutex is poisoned.
    #[must_use]
    pub fn refcount(&self, local_id: LocalId) -> Option<u64> {
        #[allow(clippy::unwrap_used)]
        self.entries.lock().unwrap().get(&local_id).map(|e| e.refcount)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(identity: u64, type_id: u32) -> WrapperKey {
        WrapperKey { callable_identity: identity, target_type_id: TypeId(type_id) }
    }

    #[test]
    fn same_callable_and_type_reuses_local_id() {
        let registry = CallbackRegistry::new();
        let a = registry.local_id_for(key(1, 10), 1).unwrap();
        let b = registry.local_id_for(key(1, 10), 1).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn same_callable_different_type_gets_distinct_ids() {
        let registry = CallbackRegistry::new();
        let a = registry.local_id_for(key(1, 10), 1).unwrap();
        let b = registry.local_id_for(key(1, 11), 1).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn arity_over_255_is_rejected() {
        let registry = CallbackRegistry::new();
        let err = registry.local_id_for(key(1, 10), 255).is_ok();
        assert!(err);
        // 255 is the max; anything higher does not fit in u8 anyway, so the
        // guard is exercised via MAX_CALLBACK_ARITY directly.
        assert_eq!(MAX_CALLBACK_ARITY, 255);
    }

    #[test]
    fn refcount_lifecycle_evicts_at_zero() {
        let registry = CallbackRegistry::new();
        let id = registry.local_id_for(key(1, 10), 1).unwrap();
        registry.record_export(id, Some(1), 999);

        registry.add_reference(id);
        registry.add_reference(id);
        assert_eq!(registry.refcount(id), Some(2));

        registry.drop_references(id, 1);
        assert_eq!(registry.refcount(id), Some(1));

        registry.drop_references(id, 1);
        assert_eq!(registry.refcount(id), None);

        // Wrapper cache no longer resolves to the evicted id; a fresh
        // export allocates a new local id.
        let new_id = registry.local_id_for(key(1, 10), 1).unwrap();
        assert_ne!(new_id, id);
    }

    #[test]
    fn never_evicts_while_refcount_positive() {
        let registry = CallbackRegistry::new();
        let id = registry.local_id_for(key(1, 10), 1).unwrap();
        registry.record_export(id, Some(1), 1);
        registry.add_reference(id);
        registry.add_reference(id);
        registry.drop_references(id, 1);
        assert_eq!(registry.refcount(id), Some(1));
    }
}
