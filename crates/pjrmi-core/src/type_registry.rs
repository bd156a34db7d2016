//! Type registry: caches type descriptors by id and by name (spec.md
//! §4.3). Fetching a missing descriptor (sending `TYPE_REQUEST` and
//! waiting for the reply) is `pjrmi-client`'s job; this module only owns
//! the cache and the bootstrap-ordering policy.

use std::{collections::HashMap, sync::Arc, sync::Mutex};

use crate::types::{TypeDescriptor, TypeId, BOOTSTRAP_NAMES};

/// Lock-protected cache of type descriptors.
#[derive(Debug, Default)]
pub struct TypeRegistry {
    by_id: Mutex<HashMap<TypeId, Arc<TypeDescriptor>>>,
    by_name: Mutex<HashMap<String, TypeId>>,
}

impl TypeRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fetch a cached descriptor by id, if present.
    ///
    /// # Panics
    ///
    /// Panics if an internal mutex is poisoned.
    #[must_use]
    pub fn get_by_id(&self, type_id: TypeId) -> Option<Arc<TypeDescriptor>> {
        #[allow(clippy::unwrap_used)]
        self.by_id.lock().unwrap().get(&type_id).cloned()
    }

    /// Fetch a cached descriptor by name, if present.
    ///
    /// # Panics
    ///
    /// Panics if an internal mutex is poisoned.
    #[must_use]
    pub fn get_by_name(&self, name: &str) -> Option<Arc<TypeDescriptor>> {
        #[allow(clippy::unwrap_used)]
        let type_id = *self.by_name.lock().unwrap().get(name)?;
        self.get_by_id(type_id)
    }

    /// Insert a freshly fetched descriptor, making it resolvable by both
    /// id and name from now on. Once inserted a descriptor is never
    /// replaced for the lifetime of the connection (spec.md §3: "once
    /// cached it is never replaced for the session") — a second insert of
    /// the same id is a caller bug and overwrites, since the registry has
    /// no way to detect that on its own.
    ///
    /// # Panics
    ///
    /// Panics if an internal mutex is poisoned.
    pub fn insert(&self, descriptor: TypeDescriptor) -> Arc<TypeDescriptor> {
        let type_id = descriptor.type_id;
        let name = descriptor.name.clone();
        let descriptor = Arc::new(descriptor);

        #[allow(clippy::unwrap_used)]
        self.by_id.lock().unwrap().insert(type_id, descriptor.clone());
        #[allow(clippy::unwrap_used)]
        self.by_name.lock().unwrap().insert(name, type_id);

        descriptor
    }

    /// Names from [`BOOTSTRAP_NAMES`] not yet present in the cache, in the
    /// fixed bootstrap order (spec.md §4.3: "Bootstrapping order matters").
    ///
    /// # Panics
    ///
    /// Panics if an internal mutex is poisoned.
    #[must_use]
    pub fn missing_bootstrap_names(&self) -> Vec<&'static str> {
        #[allow(clippy::unwrap_used)]
        let by_name = self.by_name.lock().unwrap();
        BOOTSTRAP_NAMES.iter().filter(|name| !by_name.contains_key(**name)).copied().collect()
    }
}
