//! Error types for the object bridge.
//!
//! ## Error Hierarchy
//!
//! ```text
//! BridgeError
//! ├── Lifetime violations   - UseAfterDispose, DoubleRelease, NotRefCounted,
//! │                           NotSetUp, TeardownOrderViolation
//! ├── Native protocol       - NativeProtocolViolation, NullHandle, HandleMismatch
//! ├── Identity              - TypeMismatch, ReentrantConstruction,
//! │                           ConstructionCycle
//! ├── Type factory          - DuplicateType, UnboundType, Construction
//! └── Bridge state          - ShutDown, NotOwnerThread
//! ```
//!
//! Lifetime violations are bugs in the caller. They are reported rather than
//! tolerated so that a wrapper is never used after its native object is gone.

use std::fmt;

use thiserror::Error;

use crate::{Handle, TypeHash};

/// Result type used throughout the bridge.
pub type BridgeResult<T> = Result<T, BridgeError>;

/// Errors raised by the object bridge.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BridgeError {
    // ========================================================================
    // Lifetime violations
    // ========================================================================
    /// The wrapper was already disposed.
    #[error("cannot access disposed {type_name} at {handle}")]
    UseAfterDispose {
        type_name: &'static str,
        handle: Handle,
    },

    /// `release_ref` was called with no matching `add_ref`.
    #[error("release_ref on {type_name} at {handle} without a matching add_ref")]
    DoubleRelease {
        type_name: &'static str,
        handle: Handle,
    },

    /// Managed reference counting on a type that is not reference counted.
    #[error("{type_name} is not reference counted")]
    NotRefCounted { type_name: &'static str },

    /// Managed reference counting on a wrapper that was never set up through
    /// a bridge, so it has no callback identity to pin.
    #[error("{type_name} at {handle} has no callback identity; set it up through the bridge first")]
    NotSetUp {
        type_name: &'static str,
        handle: Handle,
    },

    /// The root object was disposed while other wrappers were still live.
    #[error("root object at {handle} disposed while {live} other wrapper(s) are live")]
    TeardownOrderViolation { handle: Handle, live: usize },

    // ========================================================================
    // Native protocol
    // ========================================================================
    /// The native runtime reported an impossible reference count.
    #[error("native runtime returned reference count {count} for {handle}")]
    NativeProtocolViolation { handle: Handle, count: i32 },

    /// A null handle was passed where an object was required.
    #[error("null native handle")]
    NullHandle,

    /// A factory produced a wrapper for a different handle than requested.
    #[error("factory for {expected} produced a wrapper for {found}")]
    HandleMismatch { expected: Handle, found: Handle },

    // ========================================================================
    // Identity
    // ========================================================================
    /// The cached wrapper is not of the requested Rust type.
    #[error("object at {handle} is wrapped as {found}, not {expected}")]
    TypeMismatch {
        handle: Handle,
        expected: &'static str,
        found: &'static str,
    },

    /// A factory re-entered the instance cache for the handle it is building.
    #[error("wrapper construction for {handle} re-entered the instance cache")]
    ReentrantConstruction { handle: Handle },

    /// Waiting for the wrapper at `handle` would close a cycle of threads
    /// building wrappers inside each other's factories.
    #[error("wrapper construction for {handle} would wait on a construction cycle")]
    ConstructionCycle { handle: Handle },

    // ========================================================================
    // Type factory
    // ========================================================================
    /// A type with this name is already registered.
    #[error("type '{name}' is already registered")]
    DuplicateType { name: String },

    /// No binding exists for the native type of an object or any of its bases.
    #[error("no managed binding for native type {type_id} (object at {handle})")]
    UnboundType { handle: Handle, type_id: TypeHash },

    /// A wrapper constructor failed.
    #[error("failed to construct {type_name}: {message}")]
    Construction { type_name: String, message: String },

    // ========================================================================
    // Bridge state
    // ========================================================================
    /// The bridge has been shut down.
    #[error("bridge has been shut down")]
    ShutDown,

    /// Deferred releases were drained away from the owning thread.
    #[error("deferred releases must be run on the owning thread")]
    NotOwnerThread,
}

impl BridgeError {
    /// Wrap a constructor failure.
    pub fn construction(type_name: impl Into<String>, cause: impl fmt::Display) -> Self {
        BridgeError::Construction {
            type_name: type_name.into(),
            message: cause.to_string(),
        }
    }

    /// Returns true for errors caused by misuse of a wrapper's lifetime.
    pub fn is_lifetime_violation(&self) -> bool {
        matches!(
            self,
            BridgeError::UseAfterDispose { .. }
                | BridgeError::DoubleRelease { .. }
                | BridgeError::NotRefCounted { .. }
                | BridgeError::NotSetUp { .. }
                | BridgeError::TeardownOrderViolation { .. }
        )
    }

    /// The native handle this error is about, if any.
    pub fn handle(&self) -> Option<Handle> {
        match self {
            BridgeError::UseAfterDispose { handle, .. }
            | BridgeError::DoubleRelease { handle, .. }
            | BridgeError::TeardownOrderViolation { handle, .. }
            | BridgeError::NativeProtocolViolation { handle, .. }
            | BridgeError::TypeMismatch { handle, .. }
            | BridgeError::NotSetUp { handle, .. }
            | BridgeError::ReentrantConstruction { handle }
            | BridgeError::ConstructionCycle { handle }
            | BridgeError::UnboundType { handle, .. } => Some(*handle),
            BridgeError::HandleMismatch { expected, .. } => Some(*expected),
            _ => None,
        }
    }
}
