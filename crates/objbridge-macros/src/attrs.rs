//! Attribute parsing for the `objbridge` derive.

use syn::{Attribute, ExprPath, LitStr};

/// Parsed `#[objbridge(...)]` attributes on a type.
#[derive(Default)]
pub struct TypeAttrs {
    /// Override name seen by native code (default: Rust struct name)
    pub name: Option<String>,
    pub base: Option<String>,
    pub category: Option<String>,
    pub refcounted: bool,
    /// Constructor registered with the link-time factory registry
    pub constructor: Option<ExprPath>,
}

/// Parsed `#[objbridge(...)]` attributes on a field.
#[derive(Debug, Default)]
pub struct FieldAttrs {
    /// The field holds the wrapper's `NativeObject`
    pub native: bool,
}

impl TypeAttrs {
    /// Parse attributes from a list of `#[objbridge(...)]` attributes.
    pub fn from_attrs(attrs: &[Attribute]) -> syn::Result<Self> {
        let mut result = Self::default();

        for attr in attrs {
            if !attr.path().is_ident("objbridge") {
                continue;
            }

            attr.parse_nested_meta(|meta| {
                if meta.path.is_ident("name") {
                    let value: LitStr = meta.value()?.parse()?;
                    result.name = Some(non_empty(value)?);
                } else if meta.path.is_ident("base") {
                    let value: LitStr = meta.value()?.parse()?;
                    result.base = Some(non_empty(value)?);
                } else if meta.path.is_ident("category") {
                    let value: LitStr = meta.value()?.parse()?;
                    result.category = Some(value.value());
                } else if meta.path.is_ident("refcounted") {
                    result.refcounted = true;
                } else if meta.path.is_ident("constructor") {
                    result.constructor = Some(meta.value()?.parse()?);
                } else {
                    return Err(meta.error(format!(
                        "unknown objbridge attribute: {}",
                        meta.path.get_ident().map(|i| i.to_string()).unwrap_or_default()
                    )));
                }
                Ok(())
            })?;
        }

        Ok(result)
    }
}

impl FieldAttrs {
    /// Parse attributes from a list of `#[objbridge(...)]` attributes.
    pub fn from_attrs(attrs: &[Attribute]) -> syn::Result<Self> {
        let mut result = Self::default();

        for attr in attrs {
            if !attr.path().is_ident("objbridge") {
                continue;
            }

            attr.parse_nested_meta(|meta| {
                if meta.path.is_ident("native") {
                    result.native = true;
                } else {
                    return Err(meta.error(format!(
                        "unknown objbridge field attribute: {}",
                        meta.path.get_ident().map(|i| i.to_string()).unwrap_or_default()
                    )));
                }
                Ok(())
            })?;
        }

        Ok(result)
    }
}

fn non_empty(value: LitStr) -> syn::Result<String> {
    let text = value.value();
    if text.is_empty() {
        return Err(syn::Error::new(value.span(), "type names must not be empty"));
    }
    Ok(text)
}
