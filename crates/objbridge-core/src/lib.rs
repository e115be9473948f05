//! Core types shared by every objbridge crate.
//!
//! This crate holds the vocabulary of the bridge between managed wrappers and
//! native objects: handles, type identity, errors, configuration and the
//! [`NativeRuntime`] trait through which the native engine is reached. It has
//! no knowledge of caching or ownership; see `objbridge-registry` for that.

mod clock;
mod config;
mod error;
mod handle;
mod managed_type;
mod native;
mod type_hash;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{
    BridgeConfig, DEFAULT_GRACE_WINDOW, DEFAULT_SHARD_COUNT, DEFAULT_SWEEP_INTERVAL, ReleasePolicy,
};
pub use error::{BridgeError, BridgeResult};
pub use handle::{CallbackHandle, Handle};
pub use managed_type::ManagedType;
pub use native::NativeRuntime;
pub use type_hash::{TypeHash, hash_constants};
