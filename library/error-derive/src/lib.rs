extern crate proc_macro;

use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::quote;
use syn::{
    parse_macro_input, Attribute, Data, DataEnum, DeriveInput, Expr, Fields, Ident, Variant,
};

// https://blog.turbo.fish/proc-macro-simple-derive/

/// Marks a type as an error that may cross the HTTP boundary of the service.
///
/// The type must also implement [std::error::Error], `HttpCode` and `Kind`, which in
/// practice means deriving all four together.
#[proc_macro_derive(LfmError)]
pub fn lfm_error(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    let name = input.ident;
    let (impl_generics, ty_generics, where_clause) = input.generics.split_for_impl();
    quote!(
        impl #impl_generics error::LfmError for #name #ty_generics #where_clause {}
    )
    .into()
}

/// Derives `HttpCode` from `#[code(<expr>)]` attributes.
///
/// Structs carry a single `#[code(..)]`. Enums carry one per variant, or a single
/// enum-level `#[code(..)]` which is used for every variant that does not declare its own.
#[proc_macro_derive(HttpCode, attributes(code))]
pub fn http_code(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    match expand_http_code(&input) {
        Ok(tokens) => tokens.into(),
        Err(err) => err.to_compile_error().into(),
    }
}

fn expand_http_code(input: &DeriveInput) -> syn::Result<TokenStream2> {
    let name = &input.ident;
    let default = find_code(&input.attrs)?;
    let body = match &input.data {
        Data::Struct(_) => match default {
            Some(code) => quote!(#code),
            None => {
                return Err(syn::Error::new_spanned(
                    name,
                    "struct must have a #[code(<CODE>)] attribute",
                ))
            }
        },
        Data::Enum(DataEnum { variants, .. }) => {
            let arms = variants
                .iter()
                .map(|variant| {
                    let code = match (find_code(&variant.attrs)?, default.as_ref()) {
                        (Some(code), _) => code,
                        (None, Some(code)) => code.clone(),
                        (None, None) => {
                            return Err(syn::Error::new_spanned(
                                &variant.ident,
                                format!(
                                    "variant {} is missing a #[code(<CODE>)] attribute and {} \
                                    declares no default",
                                    variant.ident, name
                                ),
                            ))
                        }
                    };
                    let pattern = variant_pattern(name, variant);
                    Ok(quote!(#pattern => { #code }))
                })
                .collect::<syn::Result<Vec<_>>>()?;
            quote!(match self { #(#arms),* })
        }
        Data::Union(_) => {
            return Err(syn::Error::new_spanned(
                name,
                "HttpCode cannot be derived for unions",
            ))
        }
    };
    let (impl_generics, ty_generics, where_clause) = input.generics.split_for_impl();
    Ok(quote!(
        impl #impl_generics error::HttpCode for #name #ty_generics #where_clause {
            fn http_code(&self) -> error::Status {
                #body
            }
        }
    ))
}

fn find_code(attrs: &[Attribute]) -> syn::Result<Option<Expr>> {
    attrs
        .iter()
        .find(|attr| attr.path.is_ident("code"))
        .map(|attr| attr.parse_args::<Expr>())
        .transpose()
}

/// Derives `Kind`, which names a type (or `Type::Variant` for enums) for outside systems.
#[proc_macro_derive(Kind)]
pub fn kind(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    let name = &input.ident;
    let body = match &input.data {
        Data::Struct(_) => quote!(stringify!(#name).to_string()),
        Data::Enum(DataEnum { variants, .. }) => {
            let arms = variants.iter().map(|variant| {
                let v = &variant.ident;
                let pattern = variant_pattern(name, variant);
                quote!(#pattern => concat!(stringify!(#name), "::", stringify!(#v)).to_string())
            });
            quote!(match self { #(#arms),* })
        }
        // Unions are for FFI and embedded work, neither of which produce errors we report.
        Data::Union(_) => {
            return syn::Error::new_spanned(
                name,
                "Kind cannot be derived for unions, implement it by hand",
            )
            .to_compile_error()
            .into()
        }
    };
    let (impl_generics, ty_generics, where_clause) = input.generics.split_for_impl();
    quote!(
        impl #impl_generics error::Kind for #name #ty_generics #where_clause {
            fn kind(&self) -> String {
                #body
            }
        }
    )
    .into()
}

fn variant_pattern(name: &Ident, variant: &Variant) -> TokenStream2 {
    let v = &variant.ident;
    match variant.fields {
        Fields::Unnamed(_) => quote!(#name::#v(..)),
        Fields::Named(_) => quote!(#name::#v { .. }),
        Fields::Unit => quote!(#name::#v),
    }
}
