//! The narrow interface through which the bridge reaches the native engine.

use crate::{CallbackHandle, Handle, TypeHash};

/// Operations the bridge needs from the native runtime.
///
/// Implementations must be callable from any thread. None of these methods
/// may call back into the bridge for the same handle while the bridge is
/// constructing a wrapper for it.
pub trait NativeRuntime: Send + Sync {
    /// The native type id of the object at `handle`.
    fn type_id(&self, handle: Handle) -> TypeHash;

    /// The base type of a native type, if it has one.
    fn base_type_id(&self, _type_id: TypeHash) -> Option<TypeHash> {
        None
    }

    /// Destroy the object at `handle`.
    ///
    /// Called at most once per handle, and only for wrappers that own their
    /// native object.
    fn destroy(&self, handle: Handle);

    /// Take a native reference. Returns the new native count.
    fn add_ref(&self, handle: Handle) -> i32;

    /// Give a native reference back. Returns the remaining native count; zero
    /// means the native side destroyed the object.
    fn release(&self, handle: Handle) -> i32;

    /// Announce a managed subtype so native code can request it by hash.
    fn register_factory(&self, type_name: &str, base_type: TypeHash, category: Option<&str>);

    /// Attach a managed wrapper's callback identity to its native object.
    fn setup(&self, _handle: Handle, _callback: CallbackHandle, _type_name: &str) {}
}
