//! `#[derive(MessageType)]` implementation.
//!
//! | Key | Example | Description |
//! |-----|---------|-------------|
//! | `name` | `"orders.v1.OrderPlaced"` | Fixed type tag |
//! | `crate` | `"quay::core"` | Path to the crate exporting `MessageType` |

use proc_macro2::TokenStream;
use quote::quote;
use syn::{Attribute, Data, DeriveInput, LitStr, Path, spanned::Spanned};

#[derive(Default)]
struct MessageTypeAttrs {
    name: Option<LitStr>,
    crate_path: Option<Path>,
}

/// Expands `#[derive(MessageType)]` for `input`.
pub fn derive_message_type(input: &DeriveInput) -> syn::Result<TokenStream> {
    if let Data::Union(_) = input.data {
        return Err(syn::Error::new(
            input.span(),
            "MessageType cannot be derived for unions",
        ));
    }
    if !input.generics.params.is_empty() {
        return Err(syn::Error::new(
            input.generics.span(),
            "MessageType cannot be derived for generic types; every instantiation would share one type tag",
        ));
    }

    let attrs = parse_attrs(&input.attrs)?;
    let ident = &input.ident;
    let crate_path = attrs
        .crate_path
        .map(|path| quote!(#path))
        .unwrap_or_else(|| quote!(::quay_core));

    let type_name = match attrs.name {
        Some(name) => {
            if name.value().trim().is_empty() {
                return Err(syn::Error::new(name.span(), "type tag cannot be blank"));
            }
            quote!(#name)
        }
        None => {
            let ident_str = ident.to_string();
            quote!(::core::concat!(::core::module_path!(), "::", #ident_str))
        }
    };

    Ok(quote! {
        impl #crate_path::MessageType for #ident {
            const TYPE_NAME: &'static str = #type_name;
        }
    })
}

fn parse_attrs(attrs: &[Attribute]) -> syn::Result<MessageTypeAttrs> {
    let mut result = MessageTypeAttrs::default();

    for attr in attrs {
        if !attr.path().is_ident("message_type") {
            continue;
        }
        attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("name") {
                result.name = Some(meta.value()?.parse::<LitStr>()?);
            } else if meta.path.is_ident("crate") {
                let path = meta.value()?.parse::<LitStr>()?;
                result.crate_path = Some(path.parse::<Path>()?);
            } else {
                return Err(meta.error("expected `name` or `crate`"));
            }
            Ok(())
        })?;
    }

    Ok(result)
}
