//! Procedural macros for the object bridge.
//!
//! # Example
//!
//! ```ignore
//! use objbridge_macros::Managed;
//! use objbridge_registry::NativeObject;
//!
//! #[derive(Managed)]
//! #[objbridge(name = "Button", base = "Widget", refcounted)]
//! pub struct Button {
//!     native: NativeObject,
//!     label: String,
//! }
//! ```

use proc_macro::TokenStream;

mod attrs;
mod derive_managed;

/// Derive `ManagedType` and `Managed` for a wrapper struct.
///
/// The struct must hold exactly one `NativeObject`, either in a field named
/// `native` or in a field marked `#[objbridge(native)]`.
///
/// # Attributes
///
/// - `#[objbridge(name = "...")]` - Type name seen by native code (default: the struct name)
/// - `#[objbridge(base = "...")]` - Native base type name (default: the type name)
/// - `#[objbridge(category = "...")]` - Category announced with the factory
/// - `#[objbridge(refcounted)]` - Take part in managed reference counting
/// - `#[objbridge(constructor = path)]` - Register a factory at link time
///
/// A `constructor` is a `fn(&Bridge, Handle) -> BridgeResult<Self>`. Types
/// with one are submitted to the link-time registry and picked up by
/// `Bridge::register_collected_types`.
///
/// # Field Attributes
///
/// - `#[objbridge(native)]` - The field holding the `NativeObject`
#[proc_macro_derive(Managed, attributes(objbridge))]
pub fn derive_managed(input: TokenStream) -> TokenStream {
    derive_managed::derive_managed_impl(input)
}
