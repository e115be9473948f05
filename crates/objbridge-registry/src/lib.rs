//! Instance registry and ownership protocol for the object bridge.
//!
//! A [`Bridge`] ties managed wrappers (values owned through `Arc`) to native
//! objects addressed by [`Handle`](objbridge_core::Handle). It keeps at most
//! one live wrapper per handle, keeps a wrapper alive while either side still
//! needs it, and makes sure a native object owned by a wrapper is destroyed
//! exactly once.
//!
//! # Thread Safety
//!
//! Every type here is `Send + Sync` and safe to call from any thread:
//!
//! - [`InstanceCache`] is sharded. Shard locks cover map lookups only; each
//!   handle has its own slot mutex that serializes wrapper construction.
//! - Wrapper `Arc`s are never dropped while a registry lock is held, so a
//!   wrapper's `Drop` may freely call back into the bridge.
//! - Reference counts and disposal state are atomics mutated with
//!   read-modify-write operations only.

mod bridge;
mod cache;
mod callbacks;
mod deferred;
mod factory;
mod object;
mod ownership;
mod sweeper;

#[cfg(any(test, feature = "test-util"))]
pub mod testing;

pub use bridge::{Bridge, BridgeStats, ShutdownReport};
pub use cache::{CacheEntry, InstanceCache};
pub use callbacks::CallbackTable;
pub use factory::{Binding, Constructor, FactoryEntry, TypeFactoryRegistry, TypeRegistration};
pub use object::{AsAnyArc, Managed, NativeObject, ObjectFlags};

#[doc(hidden)]
pub mod __private {
    pub use inventory;
}
