//! Per-wrapper native state and the [`Managed`] trait.
//!
//! Every managed wrapper embeds one [`NativeObject`]. It records which native
//! object the wrapper stands for, whether disposing the wrapper destroys that
//! object, and the two counters the ownership protocol runs on: the disposal
//! counter and the managed reference count.

use std::any::Any;
use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, OnceLock, Weak};

use bitflags::bitflags;
use objbridge_core::{
    BridgeError, BridgeResult, CallbackHandle, Handle, ManagedType, NativeRuntime,
};
use tracing::{debug, error, trace};

use crate::bridge::{Bridge, Shared};

bitflags! {
    /// How a wrapper relates to its native object.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ObjectFlags: u8 {
        /// Disposing the wrapper destroys the native object.
        const OWNS_NATIVE = 1 << 0;
        /// The wrapper takes part in managed reference counting.
        const REFCOUNTED = 1 << 1;
    }
}

/// Upcast support for `Arc<dyn Managed>`.
///
/// Implemented for every sized `'static` type; never implement it by hand.
pub trait AsAnyArc: Any + Send + Sync {
    fn as_any(&self) -> &dyn Any;

    fn into_any_arc(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;

    /// The Rust type name of the concrete wrapper.
    fn rust_type_name(&self) -> &'static str;
}

impl<T: Any + Send + Sync> AsAnyArc for T {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn into_any_arc(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }

    fn rust_type_name(&self) -> &'static str {
        std::any::type_name::<T>()
    }
}

/// A managed wrapper around one native object.
///
/// # Example
///
/// ```ignore
/// struct Node {
///     native: NativeObject,
/// }
///
/// impl Managed for Node {
///     fn native(&self) -> &NativeObject {
///         &self.native
///     }
/// }
/// ```
pub trait Managed: AsAnyArc {
    fn native(&self) -> &NativeObject;
}

/// Downcast a type-erased wrapper, reporting a mismatch as an error.
pub(crate) fn downcast<T: Managed>(handle: Handle, object: Arc<dyn Managed>) -> BridgeResult<Arc<T>> {
    let found = <dyn Managed as AsAnyArc>::rust_type_name(&*object);
    let mismatch = || BridgeError::TypeMismatch {
        handle,
        expected: std::any::type_name::<T>(),
        found,
    };

    if !<dyn Managed as AsAnyArc>::as_any(&*object).is::<T>() {
        return Err(mismatch());
    }
    <dyn Managed as AsAnyArc>::into_any_arc(object)
        .downcast::<T>()
        .map_err(|_| mismatch())
}

/// The native half of a managed wrapper.
pub struct NativeObject {
    handle: Handle,
    type_name: &'static str,
    flags: ObjectFlags,
    /// 0 while live; every disposal attempt increments it.
    disposed: AtomicU32,
    pub(crate) managed_refs: AtomicU32,
    callback: OnceLock<CallbackHandle>,
    runtime: Arc<dyn NativeRuntime>,
    shared: Weak<Shared>,
}

impl NativeObject {
    /// Create the native state for a wrapper of type `T`.
    ///
    /// `owns_native` decides whether disposing the wrapper destroys the
    /// native object.
    pub fn new<T: ManagedType>(bridge: &Bridge, handle: Handle, owns_native: bool) -> BridgeResult<Self> {
        let mut flags = ObjectFlags::empty();
        flags.set(ObjectFlags::OWNS_NATIVE, owns_native);
        flags.set(ObjectFlags::REFCOUNTED, T::is_refcounted());
        Self::with_flags(bridge, handle, T::type_name(), flags)
    }

    /// Native state for an object the wrapper owns.
    pub fn owned<T: ManagedType>(bridge: &Bridge, handle: Handle) -> BridgeResult<Self> {
        Self::new::<T>(bridge, handle, true)
    }

    /// Native state for an object native code owns.
    pub fn borrowed<T: ManagedType>(bridge: &Bridge, handle: Handle) -> BridgeResult<Self> {
        Self::new::<T>(bridge, handle, false)
    }

    pub fn with_flags(
        bridge: &Bridge,
        handle: Handle,
        type_name: &'static str,
        flags: ObjectFlags,
    ) -> BridgeResult<Self> {
        if handle.is_null() {
            return Err(BridgeError::NullHandle);
        }
        let shared = bridge.shared();
        shared.ensure_running()?;
        shared.wrapper_created();

        Ok(Self {
            handle,
            type_name,
            flags,
            disposed: AtomicU32::new(0),
            managed_refs: AtomicU32::new(0),
            callback: OnceLock::new(),
            runtime: Arc::clone(&shared.native),
            shared: Arc::downgrade(shared),
        })
    }

    /// The native handle, or `UseAfterDispose` once disposed.
    pub fn handle(&self) -> BridgeResult<Handle> {
        self.ensure_live()?;
        Ok(self.handle)
    }

    /// The native handle regardless of disposal state.
    #[inline]
    pub fn raw_handle(&self) -> Handle {
        self.handle
    }

    #[inline]
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    #[inline]
    pub fn flags(&self) -> ObjectFlags {
        self.flags
    }

    #[inline]
    pub fn owns_native(&self) -> bool {
        self.flags.contains(ObjectFlags::OWNS_NATIVE)
    }

    #[inline]
    pub fn is_refcounted(&self) -> bool {
        self.flags.contains(ObjectFlags::REFCOUNTED)
    }

    #[inline]
    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire) != 0
    }

    /// The callback identity native code holds for this wrapper, once set up.
    pub fn callback(&self) -> Option<CallbackHandle> {
        self.callback.get().copied()
    }

    pub(crate) fn set_callback(&self, callback: CallbackHandle) -> bool {
        self.callback.set(callback).is_ok()
    }

    pub(crate) fn runtime(&self) -> &Arc<dyn NativeRuntime> {
        &self.runtime
    }

    pub(crate) fn shared(&self) -> Option<Arc<Shared>> {
        self.shared.upgrade()
    }

    pub(crate) fn belongs_to(&self, shared: &Arc<Shared>) -> bool {
        std::ptr::eq(self.shared.as_ptr(), Arc::as_ptr(shared))
    }

    pub(crate) fn ensure_live(&self) -> BridgeResult<()> {
        if self.is_disposed() {
            return Err(BridgeError::UseAfterDispose {
                type_name: self.type_name,
                handle: self.handle,
            });
        }
        Ok(())
    }

    /// Dispose the wrapper.
    ///
    /// Returns `Ok(true)` for the call that performed teardown and `Ok(false)`
    /// for every later call. Teardown evicts the wrapper from the instance
    /// cache, frees its callback identity and, if the wrapper owns its native
    /// object, destroys it.
    ///
    /// Disposing the bridge's root object while other wrappers are live fails
    /// with `TeardownOrderViolation` and leaves the root untouched.
    #[cfg_attr(feature = "profiling", profiling::function)]
    pub fn dispose(&self) -> BridgeResult<bool> {
        if !self.is_disposed()
            && let Some(shared) = self.shared.upgrade()
        {
            shared.check_teardown_order(self.handle)?;
        }

        if self.disposed.fetch_add(1, Ordering::AcqRel) != 0 {
            trace!(handle = %self.handle, "dispose on already disposed wrapper");
            return Ok(false);
        }
        self.teardown(true);
        Ok(true)
    }

    /// Mark disposed after the native side destroyed the object itself.
    ///
    /// Nothing is called on the native runtime.
    pub(crate) fn mark_destroyed_by_native(&self) -> bool {
        if self.disposed.fetch_add(1, Ordering::AcqRel) != 0 {
            return false;
        }
        self.managed_refs.store(0, Ordering::Release);

        let pinned = self.shared.upgrade().and_then(|shared| {
            shared.instances.evict(self);
            self.callback
                .get()
                .and_then(|callback| shared.callbacks.free(*callback))
        });
        debug!(handle = %self.handle, type_name = self.type_name, "native object destroyed by native side");
        drop(pinned);
        true
    }

    fn teardown(&self, explicit: bool) {
        let mut pinned = None;
        if let Some(shared) = self.shared.upgrade() {
            if explicit {
                shared.instances.evict(self);
            }
            if let Some(callback) = self.callback.get() {
                pinned = shared.callbacks.free(*callback);
            }
        }

        // Outstanding managed references each stand for one native reference
        // taken on the 0 -> 1 transition.
        let mut released_natively = false;
        if self.managed_refs.swap(0, Ordering::AcqRel) > 0 {
            let count = self.runtime.release(self.handle);
            if count < 0 {
                error!(handle = %self.handle, count, "native release returned a negative count during disposal");
            }
            released_natively = count == 0;
        }

        if self.owns_native() && !released_natively {
            self.runtime.destroy(self.handle);
        }

        debug!(
            handle = %self.handle,
            type_name = self.type_name,
            explicit,
            owns_native = self.owns_native(),
            "wrapper disposed"
        );
        drop(pinned);
    }
}

impl Drop for NativeObject {
    fn drop(&mut self) {
        let shared = self.shared.upgrade();

        if self.disposed.fetch_add(1, Ordering::AcqRel) == 0 {
            if let Some(shared) = &shared
                && let Err(err) = shared.check_teardown_order(self.handle)
            {
                error!(%err, "root wrapper dropped out of order");
            }
            self.teardown(false);
        }

        if let Some(shared) = shared {
            shared.wrapper_dropped();
        }
    }
}

impl PartialEq for NativeObject {
    fn eq(&self, other: &Self) -> bool {
        self.handle == other.handle && self.is_disposed() == other.is_disposed()
    }
}

impl Eq for NativeObject {}

impl fmt::Debug for NativeObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeObject")
            .field("handle", &self.handle)
            .field("type_name", &self.type_name)
            .field("flags", &self.flags)
            .field("disposed", &self.is_disposed())
            .field("managed_refs", &self.managed_refs.load(Ordering::Relaxed))
            .field("callback", &self.callback.get())
            .finish()
    }
}
