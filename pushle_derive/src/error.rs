//! Derive macro for error types.
//!
//! Generates `std::fmt::Display` and `std::error::Error` implementations.
//!
//! # Usage
//!
//! ```ignore
//! use pushle_derive::Error;
//!
//! #[derive(Debug, Error)]
//! pub enum VMError {
//!     #[error("invalid instruction {opcode:#04x} at offset {offset}")]
//!     InvalidInstruction { opcode: u8, offset: usize },
//!
//!     #[error("io error: {0}")]
//!     Io(String),
//!
//!     #[error("stack overflow")]
//!     StackOverflow,
//! }
//! ```
//!
//! Placeholders may name struct fields (`{offset}`) or tuple positions (`{0}`), with
//! any format spec (`{opcode:#04x}`, `{0:?}`). Fields the message does not mention
//! are simply not formatted.

use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::{ToTokens, format_ident, quote};
use syn::{Data, DeriveInput, Fields, Lit, LitStr, Meta, parse_macro_input};

pub fn derive_error(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);

    match expand(&input) {
        Ok(tokens) => TokenStream::from(tokens),
        Err(err) => err.to_compile_error().into(),
    }
}

fn expand(input: &DeriveInput) -> syn::Result<TokenStream2> {
    let name = &input.ident;
    let (impl_generics, ty_generics, where_clause) = input.generics.split_for_impl();

    let body = match &input.data {
        Data::Enum(data) => {
            let arms = data
                .variants
                .iter()
                .map(|variant| {
                    let ident = &variant.ident;
                    let message = message_from_attrs(
                        &variant.attrs,
                        ident,
                        &format!("variant `{ident}`"),
                    )?;
                    let (pattern, write) = display_for_fields(&variant.fields, &message, false);
                    Ok(quote! { Self::#ident #pattern => #write, })
                })
                .collect::<syn::Result<Vec<_>>>()?;

            quote! {
                match self {
                    #(#arms)*
                }
            }
        }
        Data::Struct(data) => {
            let message =
                message_from_attrs(&input.attrs, name, &format!("type `{name}`"))?;
            let (_, write) = display_for_fields(&data.fields, &message, true);
            write
        }
        Data::Union(_) => {
            return Err(syn::Error::new_spanned(
                input,
                "Error derive does not support unions",
            ));
        }
    };

    Ok(quote! {
        impl #impl_generics ::std::fmt::Display for #name #ty_generics #where_clause {
            fn fmt(&self, f: &mut ::std::fmt::Formatter<'_>) -> ::std::fmt::Result {
                #body
            }
        }

        impl #impl_generics ::std::error::Error for #name #ty_generics #where_clause {}
    })
}

/// Builds the destructuring pattern (enums only) and the `write!` call for a set of fields.
///
/// Only fields referenced by the message are bound and passed to `write!`, so messages
/// may leave fields out without tripping the unused-argument check of `format_args!`.
fn display_for_fields(
    fields: &Fields,
    message: &LitStr,
    on_self: bool,
) -> (TokenStream2, TokenStream2) {
    let (format, referenced) = rewrite_placeholders(&message.value());
    let format = LitStr::new(&format, message.span());

    let bound: Vec<(syn::Ident, TokenStream2)> = match fields {
        Fields::Unit => Vec::new(),
        Fields::Named(named) => named
            .named
            .iter()
            .filter_map(|field| field.ident.clone())
            .map(|ident| {
                let access = if on_self {
                    quote! { self.#ident }
                } else {
                    quote! { #ident }
                };
                (ident, access)
            })
            .collect(),
        Fields::Unnamed(unnamed) => (0..unnamed.unnamed.len())
            .map(|i| {
                let ident = format_ident!("_{}", i);
                let access = if on_self {
                    let index = syn::Index::from(i);
                    quote! { self.#index }
                } else {
                    quote! { #ident }
                };
                (ident, access)
            })
            .collect(),
    };

    let is_referenced = |ident: &syn::Ident| referenced.iter().any(|r| ident == r.as_str());

    let pattern = match fields {
        Fields::Unit => quote! {},
        Fields::Named(_) => {
            let names = bound
                .iter()
                .map(|(ident, _)| ident)
                .filter(|ident| is_referenced(ident));
            quote! { { #(#names,)* .. } }
        }
        Fields::Unnamed(_) => {
            let slots = bound.iter().map(|(ident, _)| {
                if is_referenced(ident) {
                    quote! { #ident }
                } else {
                    quote! { _ }
                }
            });
            quote! { ( #(#slots),* ) }
        }
    };

    let args = bound
        .iter()
        .filter(|(ident, _)| is_referenced(ident))
        .map(|(ident, access)| quote! { #ident = #access });

    let write = quote! {
        write!(f, #format, #(#args),*)
    };

    (pattern, write)
}

/// Rewrites positional placeholders (`{0}`, `{1:?}`) to named ones (`{_0}`, `{_1:?}`)
/// and collects every argument name the message refers to.
fn rewrite_placeholders(message: &str) -> (String, Vec<String>) {
    let mut out = String::with_capacity(message.len() + 8);
    let mut referenced = Vec::new();
    let mut chars = message.chars().peekable();

    while let Some(c) = chars.next() {
        out.push(c);
        if c != '{' {
            continue;
        }
        if chars.peek() == Some(&'{') {
            out.push('{');
            chars.next();
            continue;
        }

        let mut name = String::new();
        while let Some(&next) = chars.peek() {
            if next.is_alphanumeric() || next == '_' {
                name.push(next);
                chars.next();
            } else {
                break;
            }
        }
        if name.is_empty() {
            continue;
        }
        if name.chars().all(|ch| ch.is_ascii_digit()) {
            name.insert(0, '_');
        }
        out.push_str(&name);
        if !referenced.contains(&name) {
            referenced.push(name);
        }
    }

    (out, referenced)
}

/// Extracts the message literal from an `#[error("...")]` attribute.
fn message_from_attrs<T: ToTokens>(
    attrs: &[syn::Attribute],
    target: &T,
    target_desc: &str,
) -> syn::Result<LitStr> {
    let attr = attrs
        .iter()
        .find(|attr| attr.path().is_ident("error"))
        .ok_or_else(|| {
            syn::Error::new_spanned(
                target,
                format!("missing #[error(\"...\")] attribute on {target_desc}"),
            )
        })?;

    let Meta::List(list) = &attr.meta else {
        return Err(syn::Error::new_spanned(
            &attr.meta,
            "expected #[error(\"message\")]",
        ));
    };

    match syn::parse2::<Lit>(list.tokens.clone()) {
        Ok(Lit::Str(lit)) => Ok(lit),
        _ => Err(syn::Error::new_spanned(
            &attr.meta,
            "#[error] message must be a single string literal",
        )),
    }
}
