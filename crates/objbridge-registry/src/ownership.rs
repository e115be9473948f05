//! Managed reference counting for refcounted wrappers.
//!
//! A refcounted wrapper keeps two counters apart: the native object's own
//! reference count, owned by the native runtime, and `managed_refs`, the
//! number of explicit keep-alive requests made from managed code. The first
//! managed reference pins the wrapper's callback identity and takes one native
//! reference; dropping the last one unpins it and gives that reference back.
//!
//! Pin state is recomputed from `managed_refs` under the callback table lock
//! on every transition, so racing 0 -> 1 and 1 -> 0 transitions always settle
//! on "pinned iff managed_refs > 0".

use std::sync::Arc;
use std::sync::atomic::Ordering;

use objbridge_core::{BridgeError, BridgeResult};
use tracing::{debug, error, trace};

use crate::deferred::PendingRelease;
use crate::object::{Managed, NativeObject};

impl NativeObject {
    /// Current number of managed references.
    pub fn managed_refs(&self) -> u32 {
        self.managed_refs.load(Ordering::Acquire)
    }

    /// Whether the callback identity is held strongly.
    pub fn is_pinned(&self) -> bool {
        match (self.shared(), self.callback()) {
            (Some(shared), Some(callback)) => shared.callbacks.is_pinned(callback),
            _ => false,
        }
    }

    fn ensure_refcounted(&self) -> BridgeResult<()> {
        if !self.is_refcounted() {
            return Err(BridgeError::NotRefCounted {
                type_name: self.type_name(),
            });
        }
        Ok(())
    }

    /// Take a managed reference. Returns the new managed count.
    ///
    /// The wrapper must have been set up through its bridge; without a
    /// callback identity there is nothing to pin and the call fails with
    /// `NotSetUp`.
    #[cfg_attr(feature = "profiling", profiling::function)]
    pub fn add_ref(&self) -> BridgeResult<u32> {
        self.ensure_refcounted()?;
        self.ensure_live()?;
        if self.callback().is_none() {
            return Err(BridgeError::NotSetUp {
                type_name: self.type_name(),
                handle: self.raw_handle(),
            });
        }

        let previous = self.managed_refs.fetch_add(1, Ordering::AcqRel);
        if previous == 0 {
            let released = self.sync_pin();
            let count = self.runtime().add_ref(self.raw_handle());
            drop(released);
            if count <= 0 {
                error!(handle = %self.raw_handle(), count, "native add_ref returned a non-positive count");
                self.managed_refs.fetch_sub(1, Ordering::AcqRel);
                drop(self.sync_pin());
                return Err(BridgeError::NativeProtocolViolation {
                    handle: self.raw_handle(),
                    count,
                });
            }
            trace!(handle = %self.raw_handle(), native_count = count, "wrapper pinned");
        }
        Ok(previous + 1)
    }

    /// Give a managed reference back. Returns the new managed count.
    ///
    /// Fails with `DoubleRelease` at zero without touching the counter. With
    /// an owner-thread release policy, the final release from another thread
    /// is queued for `Bridge::run_deferred`.
    #[cfg_attr(feature = "profiling", profiling::function)]
    pub fn release_ref(&self) -> BridgeResult<u32> {
        self.ensure_refcounted()?;

        let previous = self
            .managed_refs
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
            .map_err(|_| {
                error!(handle = %self.raw_handle(), type_name = self.type_name(), "release_ref without matching add_ref");
                BridgeError::DoubleRelease {
                    type_name: self.type_name(),
                    handle: self.raw_handle(),
                }
            })?;

        if previous == 1 {
            self.last_release()?;
        }
        Ok(previous - 1)
    }

    fn last_release(&self) -> BridgeResult<()> {
        if let Some(shared) = self.shared()
            && shared.releases.should_defer()
        {
            let wrapper = self
                .callback()
                .and_then(|callback| shared.callbacks.resolve(callback));
            shared.releases.push(PendingRelease::new(
                self.raw_handle(),
                Arc::clone(self.runtime()),
                wrapper,
            ));
            debug!(handle = %self.raw_handle(), "final release deferred to owner thread");
            return Ok(());
        }
        self.complete_release()
    }

    /// Unpin and return the native reference taken on the first `add_ref`.
    pub(crate) fn complete_release(&self) -> BridgeResult<()> {
        let released = self.sync_pin();
        drop(released);

        let handle = self.raw_handle();
        let count = self.runtime().release(handle);
        if count < 0 {
            error!(%handle, count, "native release returned a negative count");
            return Err(BridgeError::NativeProtocolViolation { handle, count });
        }
        trace!(%handle, native_count = count, "wrapper unpinned");
        if count == 0 {
            self.mark_destroyed_by_native();
        }
        Ok(())
    }

    /// Recompute the pin from the current managed count.
    fn sync_pin(&self) -> Option<Arc<dyn Managed>> {
        let shared = self.shared()?;
        let callback = self.callback()?;
        shared
            .callbacks
            .sync_pin(callback, || self.managed_refs.load(Ordering::Acquire) > 0)
    }
}
