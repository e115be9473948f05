//! Deterministic hash-based type identity.
//!
//! [`TypeHash`] is the 64-bit identifier both runtimes use for a type name.
//! The native side stores it per object and the factory registry keys its
//! constructors by it, so the same name must always produce the same hash on
//! both sides of the bridge.
//!
//! # Examples
//!
//! ```
//! use objbridge_core::TypeHash;
//!
//! let widget = TypeHash::from_name("Widget");
//! assert_eq!(widget, TypeHash::from_name("Widget"));
//! assert_ne!(widget, TypeHash::from_name("Gadget"));
//! ```

use std::fmt;
use xxhash_rust::xxh64::xxh64;

/// Domain-specific mixing constants for hash computation.
pub mod hash_constants {
    /// Domain marker for type hashes
    pub const TYPE: u64 = 0x2fac10b63a6cc57c;
}

/// A deterministic 64-bit hash identifying a type by name.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(transparent)]
pub struct TypeHash(pub u64);

impl TypeHash {
    /// Empty/invalid hash (used as sentinel).
    pub const EMPTY: TypeHash = TypeHash(0);

    /// Create a type hash from a type name.
    #[inline]
    pub fn from_name(name: &str) -> Self {
        TypeHash(hash_constants::TYPE ^ xxh64(name.as_bytes(), 0))
    }

    /// Check if this is the empty/invalid hash.
    #[inline]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Get the raw u64 value.
    #[inline]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Debug for TypeHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TypeHash({:#018x})", self.0)
    }
}

impl fmt::Display for TypeHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#018x}", self.0)
    }
}

impl Default for TypeHash {
    fn default() -> Self {
        Self::EMPTY
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn type_hash_determinism() {
        let hash1 = TypeHash::from_name("Widget");
        let hash2 = TypeHash::from_name("Widget");
        assert_eq!(hash1, hash2);

        let hash3 = TypeHash::from_name("Scene::Node");
        let hash4 = TypeHash::from_name("Scene::Node");
        assert_eq!(hash3, hash4);
    }

    #[test]
    fn type_hash_uniqueness() {
        let object = TypeHash::from_name("Object");
        let node = TypeHash::from_name("Node");
        let widget = TypeHash::from_name("Widget");
        let component = TypeHash::from_name("Component");

        assert_ne!(object, node);
        assert_ne!(object, widget);
        assert_ne!(object, component);
        assert_ne!(node, widget);
    }

    #[test]
    fn names_are_case_sensitive() {
        assert_ne!(TypeHash::from_name("widget"), TypeHash::from_name("Widget"));
    }

    #[test]
    fn empty_hash() {
        assert!(TypeHash::EMPTY.is_empty());
        assert!(TypeHash::default().is_empty());
        assert!(!TypeHash::from_name("Widget").is_empty());
    }

    #[test]
    fn hash_display() {
        let hash = TypeHash::from_name("Widget");
        let display = format!("{}", hash);
        assert!(display.starts_with("0x"));
        assert_eq!(display.len(), 18);
    }

    #[test]
    fn hash_debug() {
        let hash = TypeHash::from_name("Widget");
        let debug = format!("{:?}", hash);
        assert!(debug.starts_with("TypeHash(0x"));
    }

    #[test]
    fn type_hash_ordering() {
        let hash1 = TypeHash(100);
        let hash2 = TypeHash(200);
        assert!(hash1 < hash2);
        assert!(hash2 > hash1);
    }

    #[test]
    fn type_hash_as_u64() {
        let hash = TypeHash(0x123456789abcdef0);
        assert_eq!(hash.as_u64(), 0x123456789abcdef0);
    }
}
