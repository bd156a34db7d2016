//! Handle registry and reference-drop batching (spec.md §4.6).
//!
//! The registry pins every handle with a live local [`Proxy`]. When the
//! last local reference drops, the handle moves into a pending-drops list
//! that a background thread (owned by `pjrmi-client`) periodically flushes
//! as a single `DROP_REFERENCES` frame. This module only holds the data
//! structure and batching policy; sending the frame and running the
//! periodic thread is the client's job.

use std::{collections::HashMap, sync::Mutex};

use crate::handle::{Handle, Proxy};

/// Number of pending drops that triggers an immediate flush, rather than
/// waiting for the next periodic tick (spec.md §4.6: "~100").
pub const DEFAULT_DROP_THRESHOLD: usize = 100;

/// Tracks live proxies and batches their eventual `DROP_REFERENCES`.
#[derive(Debug)]
pub struct HandleRegistry {
    live: Mutex<HashMap<Handle, Proxy>>,
    pending_drops: Mutex<Vec<Handle>>,
}

impl Default for HandleRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl HandleRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self { live: Mutex::new(HashMap::new()), pending_drops: Mutex::new(Vec::new()) }
    }

    /// Register a newly-received proxy, pinning its handle.
    ///
    /// # Panics
    ///
    /// Panics if the registry's internal mutex is poisoned, which can only
    /// happen if another thread panicked while holding it.
    pub fn pin(&self, proxy: Proxy) {
        #[allow(clippy::unwrap_used)]
        self.live.lock().unwrap().insert(proxy.handle, proxy);
    }

    /// Whether `handle` currently has a live local proxy.
    ///
    /// # Panics
    ///
    /// Panics if the registry's internal mutex is poisoned.
    #[must_use]
    pub fn is_live(&self, handle: Handle) -> bool {
        #[allow(clippy::unwrap_used)]
        self.live.lock().unwrap().contains_key(&handle)
    }

    /// Number of live proxies currently pinned.
    ///
    /// # Panics
    ///
    /// Panics if the registry's internal mutex is poisoned.
    #[must_use]
    pub fn live_count(&self) -> usize {
        #[allow(clippy::unwrap_used)]
        self.live.lock().unwrap().len()
    }

    /// Unpin a handle: remove it from the live set and append it to the
    /// pending-drops list. Returns the number of handles now pending,
    /// so the caller can decide whether to trigger an out-of-band flush.
    ///
    /// # Panics
    ///
    /// Panics if the registry's internal mutexes are poisoned.
    pub fn release(&self, handle: Handle) -> usize {
        #[allow(clippy::unwrap_used)]
        self.live.lock().unwrap().remove(&handle);

        #[allow(clippy::unwrap_used)]
        let mut pending = self.pending_drops.lock().unwrap();
        pending.push(handle);
        pending.len()
    }

    /// Drain every pending drop unconditionally (used at disconnect, and
    /// by the periodic flusher tick regardless of threshold, spec.md §4.6:
    /// "flushes the list ... or on disconnect"). Returns `None` if there
    /// is nothing to flush.
    ///
    /// # Panics
    ///
    /// Panics if the registry's internal mutex is poisoned.
    #[must_use]
    pub fn drain_all(&self) -> Option<Vec<Handle>> {
        #[allow(clippy::unwrap_used)]
        let mut pending = self.pending_drops.lock().unwrap();
        if pending.is_empty() { None } else { Some(std::mem::take(&mut pending)) }
    }

    /// Drain pending drops only if the threshold has been crossed, for use
    /// immediately after [`Self::release`] to support a same-thread
    /// out-of-band flush without waiting for the next periodic tick.
    ///
    /// # Panics
    ///
    /// Panics if the registry's internal mutex is poisoned.
    #[must_use]
    pub fn drain_if_over_threshold(&self, threshold: usize) -> Option<Vec<Handle>> {
        #[allow(clippy::unwrap_used)]
        let over = self.pending_drops.lock().unwrap().len() >= threshold;
        if over { self.drain_all() } else { None }
    }
}
