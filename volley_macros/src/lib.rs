use proc_macro::TokenStream;
use quote::quote;
use syn::{Item, parse_macro_input};

extern crate proc_macro;

/// Marks a struct or enum as a serializable engine record.
///
/// Derives the serde pair plus `Debug`, `Clone` and `PartialEq` so reports, results and
/// parameter sets can be streamed, compared in tests and round-tripped through JSON.
/// Serde attributes on the item keep working since the derives are emitted first.
#[proc_macro_attribute]
pub fn record(_attr: TokenStream, item: TokenStream) -> TokenStream {
    let ast = parse_macro_input!(item as Item);
    match &ast {
        Item::Struct(_) | Item::Enum(_) => {}
        other => {
            return syn::Error::new_spanned(other, "#[record] only applies to structs and enums")
                .to_compile_error()
                .into();
        }
    }
    let expanded = quote! {
        #[derive(
            serde::Serialize,
            serde::Deserialize,
            std::cmp::PartialEq,
            std::fmt::Debug,
            std::clone::Clone
        )]
        #ast
    };

    TokenStream::from(expanded)
}

/// Same as [`record`](macro@record) for fieldless status enums, adding `Copy` and `Eq`.
#[proc_macro_attribute]
pub fn status(_attr: TokenStream, item: TokenStream) -> TokenStream {
    let ast = parse_macro_input!(item as syn::ItemEnum);
    let expanded = quote! {
        #[derive(
            serde::Serialize,
            serde::Deserialize,
            std::cmp::PartialEq,
            std::cmp::Eq,
            std::fmt::Debug,
            std::clone::Clone,
            std::marker::Copy
        )]
        #ast
    };

    TokenStream::from(expanded)
}
