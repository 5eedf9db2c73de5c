//! Derives `Default`, `From<Inner>` and `From<Wrapper> for Inner` for a single-field
//! tuple struct, given a `#[wrapper_default_value(...)]` const expression.
//!
//! ```ignore
//! #[derive(WrapperWithDefault)]
//! #[wrapper_default_value(Duration::from_secs(10))]
//! struct Interval(Duration);
//! ```

use proc_macro::TokenStream;
use quote::quote;
use syn::{parse_macro_input, Data, DeriveInput, Fields, Lit, Meta};

#[proc_macro_derive(WrapperWithDefault, attributes(wrapper_default_value))]
pub fn derive_wrapper_with_default(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    let name = &input.ident;

    let inner_ty = match &input.data {
        Data::Struct(data) => match &data.fields {
            Fields::Unnamed(fields) if fields.unnamed.len() == 1 => {
                fields.unnamed.first().unwrap().ty.clone()
            }
            _ => {
                return syn::Error::new_spanned(
                    &input,
                    "WrapperWithDefault only supports single-field tuple structs",
                )
                .to_compile_error()
                .into()
            }
        },
        _ => {
            return syn::Error::new_spanned(&input, "WrapperWithDefault only supports structs")
                .to_compile_error()
                .into()
        }
    };

    let default_expr = match find_default_value(&input) {
        Ok(expr) => expr,
        Err(err) => return err.to_compile_error().into(),
    };

    let expanded = quote! {
        impl ::std::default::Default for #name {
            fn default() -> Self {
                #name(#default_expr)
            }
        }

        impl ::std::convert::From<#inner_ty> for #name {
            fn from(value: #inner_ty) -> Self {
                #name(value)
            }
        }

        impl ::std::convert::From<#name> for #inner_ty {
            fn from(wrapper: #name) -> Self {
                wrapper.0
            }
        }
    };

    expanded.into()
}

fn find_default_value(input: &DeriveInput) -> syn::Result<proc_macro2::TokenStream> {
    for attr in &input.attrs {
        if !attr.path().is_ident("wrapper_default_value") {
            continue;
        }
        return match &attr.meta {
            Meta::List(list) => Ok(list.tokens.clone()),
            Meta::NameValue(nv) => {
                if let syn::Expr::Lit(expr_lit) = &nv.value {
                    if let Lit::Str(s) = &expr_lit.lit {
                        let expr: syn::Expr = s.parse()?;
                        return Ok(quote!(#expr));
                    }
                }
                Ok(quote!(#nv))
            }
            Meta::Path(_) => Err(syn::Error::new_spanned(
                attr,
                "wrapper_default_value requires a value, e.g. #[wrapper_default_value(EXPR)]",
            )),
        };
    }

    Err(syn::Error::new_spanned(
        input,
        "missing #[wrapper_default_value(...)] attribute",
    ))
}
