//! Implementation of the `#[derive(Managed)]` macro.

use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::quote;
use syn::{Data, DeriveInput, Index, Member, parse_macro_input};

use crate::attrs::{FieldAttrs, TypeAttrs};

pub fn derive_managed_impl(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);

    match derive_managed_inner(&input) {
        Ok(tokens) => tokens.into(),
        Err(err) => err.to_compile_error().into(),
    }
}

fn derive_managed_inner(input: &DeriveInput) -> syn::Result<TokenStream2> {
    let name = &input.ident;
    if !input.generics.params.is_empty() {
        return Err(syn::Error::new_spanned(
            &input.generics,
            "Managed cannot be derived for generic types",
        ));
    }

    let attrs = TypeAttrs::from_attrs(&input.attrs)?;
    let type_name = attrs.name.clone().unwrap_or_else(|| name.to_string());
    let base_name = attrs.base.clone().unwrap_or_else(|| type_name.clone());

    let managed_type_impl = generate_managed_type_impl(name, &type_name, &attrs);
    let managed_impl = generate_managed_impl(input)?;
    let registration = match &attrs.constructor {
        Some(constructor) => generate_registration(name, &type_name, &base_name, &attrs, constructor),
        None => TokenStream2::new(),
    };

    Ok(quote! {
        #managed_type_impl
        #managed_impl
        #registration
    })
}

/// Generate the `ManagedType` implementation.
fn generate_managed_type_impl(name: &syn::Ident, type_name: &str, attrs: &TypeAttrs) -> TokenStream2 {
    let base = attrs.base.as_ref().map(|base| {
        quote! {
            fn base_type_name() -> &'static str {
                #base
            }
        }
    });
    let category = attrs.category.as_ref().map(|category| {
        quote! {
            fn category() -> ::std::option::Option<&'static str> {
                ::std::option::Option::Some(#category)
            }
        }
    });
    let refcounted = attrs.refcounted.then(|| {
        quote! {
            fn is_refcounted() -> bool {
                true
            }
        }
    });

    quote! {
        impl ::objbridge_core::ManagedType for #name {
            fn type_name() -> &'static str {
                #type_name
            }

            #base
            #category
            #refcounted
        }
    }
}

/// Generate the `Managed` implementation over the `NativeObject` field.
fn generate_managed_impl(input: &DeriveInput) -> syn::Result<TokenStream2> {
    let name = &input.ident;
    let field = find_native_field(input)?;

    Ok(quote! {
        impl ::objbridge_registry::Managed for #name {
            fn native(&self) -> &::objbridge_registry::NativeObject {
                &self.#field
            }
        }
    })
}

fn find_native_field(input: &DeriveInput) -> syn::Result<Member> {
    let Data::Struct(data) = &input.data else {
        return Err(syn::Error::new_spanned(
            &input.ident,
            "Managed can only be derived for structs",
        ));
    };

    let mut marked = None;
    let mut by_name = None;
    for (index, field) in data.fields.iter().enumerate() {
        let member = match &field.ident {
            Some(ident) => Member::Named(ident.clone()),
            None => Member::Unnamed(Index::from(index)),
        };
        if FieldAttrs::from_attrs(&field.attrs)?.native {
            if marked.is_some() {
                return Err(syn::Error::new_spanned(
                    field,
                    "only one field may be marked #[objbridge(native)]",
                ));
            }
            marked = Some(member);
        } else if field.ident.as_ref().is_some_and(|ident| ident == "native") {
            by_name = Some(member);
        }
    }

    marked.or(by_name).ok_or_else(|| {
        syn::Error::new_spanned(
            &input.ident,
            "no NativeObject field: name it `native` or mark it #[objbridge(native)]",
        )
    })
}

/// Generate the link-time factory registration.
fn generate_registration(
    name: &syn::Ident,
    type_name: &str,
    base_name: &str,
    attrs: &TypeAttrs,
    constructor: &syn::ExprPath,
) -> TokenStream2 {
    let category = match &attrs.category {
        Some(category) => quote! { ::std::option::Option::Some(#category) },
        None => quote! { ::std::option::Option::None },
    };

    quote! {
        const _: () = {
            fn construct(
                bridge: &::objbridge_registry::Bridge,
                context: ::objbridge_core::Handle,
            ) -> ::objbridge_core::BridgeResult<
                ::std::sync::Arc<dyn ::objbridge_registry::Managed>,
            > {
                let wrapper: #name = (#constructor)(bridge, context)?;
                ::std::result::Result::Ok(::std::sync::Arc::new(wrapper))
            }

            ::objbridge_registry::__private::inventory::submit! {
                ::objbridge_registry::TypeRegistration {
                    name: #type_name,
                    base: #base_name,
                    category: #category,
                    construct,
                }
            }
        };
    }
}
