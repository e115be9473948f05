//! Callback identities handed to native code.
//!
//! When a wrapper is set up, native code receives a [`CallbackHandle`] it can
//! later use to reach the wrapper again. The table holds each wrapper weakly;
//! a wrapper with outstanding managed references is also held strongly
//! ("pinned") so native code can call back into it after every managed `Arc`
//! is gone.

use std::sync::{Arc, Weak};

use objbridge_core::CallbackHandle;
use parking_lot::Mutex;
use slab::Slab;
use tracing::warn;

use crate::object::Managed;

struct CallbackSlot {
    generation: u32,
    weak: Weak<dyn Managed>,
    strong: Option<Arc<dyn Managed>>,
}

struct Inner {
    slots: Slab<CallbackSlot>,
    next_generation: u32,
}

impl Inner {
    fn get_mut(&mut self, callback: CallbackHandle) -> Option<&mut CallbackSlot> {
        self.slots
            .get_mut(callback.index())
            .filter(|slot| slot.generation == callback.generation())
    }
}

/// Table of callback identities.
///
/// Methods that release a strong reference return it instead of dropping it,
/// so the wrapper's `Drop` never runs under the table lock.
pub struct CallbackTable {
    inner: Mutex<Inner>,
}

impl CallbackTable {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                slots: Slab::new(),
                next_generation: 0,
            }),
        }
    }

    /// Allocate an identity for `wrapper`. The wrapper starts unpinned.
    pub fn insert(&self, wrapper: Weak<dyn Managed>) -> Option<CallbackHandle> {
        let mut inner = self.inner.lock();
        let generation = inner.next_generation;
        let entry = inner.slots.vacant_entry();
        let callback = CallbackHandle::new(entry.key(), generation)?;
        entry.insert(CallbackSlot {
            generation,
            weak: wrapper,
            strong: None,
        });
        inner.next_generation = generation.wrapping_add(1);
        Some(callback)
    }

    /// The wrapper behind `callback`, if it is still alive.
    pub fn resolve(&self, callback: CallbackHandle) -> Option<Arc<dyn Managed>> {
        let mut inner = self.inner.lock();
        let slot = inner.get_mut(callback)?;
        match &slot.strong {
            Some(strong) => Some(Arc::clone(strong)),
            None => slot.weak.upgrade(),
        }
    }

    /// Bring the pin in line with `should_pin`, evaluated under the table lock.
    ///
    /// Returns the strong reference released by unpinning, if any.
    pub(crate) fn sync_pin(
        &self,
        callback: CallbackHandle,
        should_pin: impl FnOnce() -> bool,
    ) -> Option<Arc<dyn Managed>> {
        let mut inner = self.inner.lock();
        let slot = inner.get_mut(callback)?;
        if should_pin() {
            if slot.strong.is_none() {
                slot.strong = slot.weak.upgrade();
                if slot.strong.is_none() {
                    warn!(?callback, "pin requested for a wrapper that is already gone");
                }
            }
            None
        } else {
            slot.strong.take()
        }
    }

    pub fn is_pinned(&self, callback: CallbackHandle) -> bool {
        let mut inner = self.inner.lock();
        inner
            .get_mut(callback)
            .is_some_and(|slot| slot.strong.is_some())
    }

    /// Release the identity. Returns the pinned reference, if any.
    pub fn free(&self, callback: CallbackHandle) -> Option<Arc<dyn Managed>> {
        let mut inner = self.inner.lock();
        inner.get_mut(callback)?;
        inner.slots.remove(callback.index()).strong
    }

    pub fn len(&self) -> usize {
        self.inner.lock().slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().slots.is_empty()
    }

    pub fn pinned_count(&self) -> usize {
        self.inner
            .lock()
            .slots
            .iter()
            .filter(|(_, slot)| slot.strong.is_some())
            .count()
    }

    /// Every wrapper that still resolves.
    pub fn snapshot(&self) -> Vec<Arc<dyn Managed>> {
        self.inner
            .lock()
            .slots
            .iter()
            .filter_map(|(_, slot)| slot.strong.clone().or_else(|| slot.weak.upgrade()))
            .collect()
    }

    /// Free every identity. Pinned references are returned undropped.
    pub(crate) fn clear(&self) -> Vec<Arc<dyn Managed>> {
        let mut inner = self.inner.lock();
        inner
            .slots
            .drain()
            .filter_map(|slot| slot.strong)
            .collect()
    }
}

impl Default for CallbackTable {
    fn default() -> Self {
        Self::new()
    }
}
