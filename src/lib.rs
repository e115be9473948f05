//! Lifetime bridge between managed wrappers and native objects.
//!
//! This crate re-exports the pieces of the workspace:
//!
//! - [`objbridge_core`]: handles, type hashes, errors, configuration and the
//!   [`NativeRuntime`] interface.
//! - [`objbridge_registry`]: the [`Bridge`], its instance cache, callback
//!   table and type factory registry.
//! - [`objbridge_macros`]: `#[derive(Managed)]`.
//!
//! # Example
//!
//! ```ignore
//! use objbridge::prelude::*;
//!
//! #[derive(Managed)]
//! #[objbridge(name = "Widget", refcounted)]
//! struct Widget {
//!     native: NativeObject,
//! }
//!
//! let bridge = Bridge::new(runtime);
//! let widget = bridge.get_or_create(handle, |bridge, handle| {
//!     Ok(Widget { native: NativeObject::borrowed::<Widget>(bridge, handle)? })
//! })?;
//! widget.native().add_ref()?;
//! ```

pub use objbridge_core::{
    BridgeConfig, BridgeError, BridgeResult, CallbackHandle, Clock, DEFAULT_GRACE_WINDOW,
    DEFAULT_SHARD_COUNT, DEFAULT_SWEEP_INTERVAL, Handle, ManagedType, ManualClock, NativeRuntime,
    ReleasePolicy, SystemClock, TypeHash, hash_constants,
};
pub use objbridge_macros::Managed;
pub use objbridge_registry::{
    AsAnyArc, Binding, Bridge, BridgeStats, CacheEntry, CallbackTable, Constructor, FactoryEntry,
    InstanceCache, Managed, NativeObject, ObjectFlags, ShutdownReport, TypeFactoryRegistry,
    TypeRegistration,
};

#[cfg(feature = "test-util")]
pub use objbridge_registry::testing;

pub mod prelude {
    pub use objbridge_core::{
        BridgeConfig, BridgeError, BridgeResult, Handle, ManagedType, NativeRuntime,
        ReleasePolicy, TypeHash,
    };
    pub use objbridge_macros::Managed;
    pub use objbridge_registry::{Bridge, Managed, NativeObject};
}
