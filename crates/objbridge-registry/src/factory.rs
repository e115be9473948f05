//! Type factory registry.
//!
//! Maps a [`TypeHash`] to the constructor of a managed wrapper type. Native
//! code that wants an instance of a managed-defined subtype asks the bridge
//! by hash; a miss means "no managed override" and the native side falls back
//! to its own default.
//!
//! The registry also holds bindings: wrapper constructors keyed by native
//! type id, used to wrap native objects native code surfaces by handle.
//!
//! # Thread Safety
//!
//! Both maps sit behind `RwLock`s. Constructors are cloned out of the map
//! before they run, so a constructor may itself consult the registry.

use std::fmt;
use std::sync::Arc;

use objbridge_core::{BridgeError, BridgeResult, Handle, NativeRuntime, TypeHash};
use parking_lot::RwLock;
use rustc_hash::FxHashMap;

use crate::bridge::Bridge;
use crate::object::Managed;

/// Builds a wrapper for a freshly requested object, given a context handle.
pub type Constructor = Arc<dyn Fn(&Bridge, Handle) -> BridgeResult<Arc<dyn Managed>> + Send + Sync>;

/// Builds a wrapper for an existing native object.
pub type Binding = Arc<dyn Fn(&Bridge, Handle) -> BridgeResult<Arc<dyn Managed>> + Send + Sync>;

/// Bound on base-type walks, in case a native runtime reports a cycle.
const MAX_BASE_DEPTH: usize = 64;

/// A registered managed type.
#[derive(Clone)]
pub struct FactoryEntry {
    pub name: String,
    pub type_hash: TypeHash,
    pub base_name: String,
    pub base: TypeHash,
    pub category: Option<String>,
    constructor: Constructor,
}

impl FactoryEntry {
    pub fn constructor(&self) -> &Constructor {
        &self.constructor
    }
}

impl fmt::Debug for FactoryEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FactoryEntry")
            .field("name", &self.name)
            .field("type_hash", &self.type_hash)
            .field("base_name", &self.base_name)
            .field("category", &self.category)
            .finish_non_exhaustive()
    }
}

/// A type registration collected at link time.
///
/// Submitted by `#[derive(Managed)]` for types with a `constructor`
/// attribute and registered by `Bridge::register_collected_types`.
pub struct TypeRegistration {
    pub name: &'static str,
    pub base: &'static str,
    pub category: Option<&'static str>,
    pub construct: fn(&Bridge, Handle) -> BridgeResult<Arc<dyn Managed>>,
}

inventory::collect!(TypeRegistration);

impl TypeRegistration {
    /// Every registration submitted in the final binary.
    pub fn collected() -> impl Iterator<Item = &'static TypeRegistration> {
        inventory::iter::<TypeRegistration>.into_iter()
    }
}

impl fmt::Debug for TypeRegistration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypeRegistration")
            .field("name", &self.name)
            .field("base", &self.base)
            .field("category", &self.category)
            .finish_non_exhaustive()
    }
}

/// Registry of managed type constructors and native type bindings.
pub struct TypeFactoryRegistry {
    types: RwLock<FxHashMap<TypeHash, FactoryEntry>>,
    bindings: RwLock<FxHashMap<TypeHash, Binding>>,
}

impl TypeFactoryRegistry {
    pub fn new() -> Self {
        Self {
            types: RwLock::new(FxHashMap::default()),
            bindings: RwLock::new(FxHashMap::default()),
        }
    }

    /// Record a constructor under `TypeHash::from_name(name)`.
    ///
    /// Fails with `DuplicateType` if the name is taken. Announcing the type
    /// to the native runtime is left to the caller.
    pub fn register(
        &self,
        name: &str,
        base_name: &str,
        category: Option<&str>,
        constructor: Constructor,
    ) -> BridgeResult<TypeHash> {
        let type_hash = TypeHash::from_name(name);
        let mut types = self.types.write();
        if types.contains_key(&type_hash) {
            return Err(BridgeError::DuplicateType {
                name: name.to_string(),
            });
        }
        types.insert(
            type_hash,
            FactoryEntry {
                name: name.to_string(),
                type_hash,
                base_name: base_name.to_string(),
                base: TypeHash::from_name(base_name),
                category: category.map(str::to_string),
                constructor,
            },
        );
        Ok(type_hash)
    }

    pub fn constructor(&self, type_hash: TypeHash) -> Option<Constructor> {
        self.types
            .read()
            .get(&type_hash)
            .map(|entry| Arc::clone(&entry.constructor))
    }

    pub fn entry(&self, type_hash: TypeHash) -> Option<FactoryEntry> {
        self.types.read().get(&type_hash).cloned()
    }

    /// Reverse lookup of a registered type name.
    pub fn type_name(&self, type_hash: TypeHash) -> Option<String> {
        self.types
            .read()
            .get(&type_hash)
            .map(|entry| entry.name.clone())
    }

    pub fn contains(&self, type_hash: TypeHash) -> bool {
        self.types.read().contains_key(&type_hash)
    }

    pub fn len(&self) -> usize {
        self.types.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.read().is_empty()
    }

    /// Bind a wrapper constructor to a native type id.
    ///
    /// Returns `false` if an existing binding was replaced.
    pub fn bind(&self, type_id: TypeHash, binding: Binding) -> bool {
        self.bindings.write().insert(type_id, binding).is_none()
    }

    pub fn binding(&self, type_id: TypeHash) -> Option<Binding> {
        self.bindings.read().get(&type_id).cloned()
    }

    /// The binding for `type_id` or its nearest bound base type.
    ///
    /// Returns the type id the binding was found under.
    pub fn binding_for(
        &self,
        type_id: TypeHash,
        native: &dyn NativeRuntime,
    ) -> Option<(TypeHash, Binding)> {
        let mut current = type_id;
        for _ in 0..MAX_BASE_DEPTH {
            if let Some(binding) = self.binding(current) {
                return Some((current, binding));
            }
            current = native.base_type_id(current)?;
        }
        None
    }
}

impl Default for TypeFactoryRegistry {
    fn default() -> Self {
        Self::new()
    }
}
