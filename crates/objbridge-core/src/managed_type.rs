//! Static type identity for managed wrapper types.

use crate::TypeHash;

/// Type identity of a managed wrapper type.
///
/// Usually implemented through `#[derive(Managed)]`. The name is what native
/// code sees: it is hashed into the [`TypeHash`] the native runtime stores per
/// object and the key of the wrapper's constructor in the factory registry.
pub trait ManagedType: 'static {
    /// The type name as seen by the native runtime.
    fn type_name() -> &'static str;

    /// Get the type hash for this type.
    fn type_hash() -> TypeHash {
        TypeHash::from_name(Self::type_name())
    }

    /// Name of the native base type this wrapper derives from.
    ///
    /// A wrapper that mirrors a native type directly is its own base.
    fn base_type_name() -> &'static str {
        Self::type_name()
    }

    fn base_type_hash() -> TypeHash {
        TypeHash::from_name(Self::base_type_name())
    }

    /// Optional category announced to the native factory.
    fn category() -> Option<&'static str> {
        None
    }

    /// Whether wrappers of this type take part in managed reference counting.
    fn is_refcounted() -> bool {
        false
    }
}
