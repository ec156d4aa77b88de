//! Builtin validation rules. Every rule applies to `String` fields only.
//!
//! Generated code runs inside the derived `new`, where `E` names the error
//! type and must implement `From<String>`.
use proc_macro2::{Ident, TokenStream};
use quote::quote;

pub(crate) const FIELD_DELIMITER: char = '|';
pub(crate) const TAX_ID_DIGITS: usize = 13;

/// Expand `rule` for field `ident`, `None` for an unknown rule.
pub(crate) fn dispatch(rule: &str, ident: &Ident) -> Option<TokenStream> {
    let name = ident.to_string();
    let check = match rule {
        "non_empty" => non_empty(ident, &name),
        "no_special_chars" => no_special_chars(ident, &name),
        "digits_only" => digits_only(ident, &name),
        "no_field_delimiter" => no_field_delimiter(ident, &name),
        "tax_id" => tax_id(ident, &name),
        _ => return None,
    };
    Some(check)
}

fn non_empty(ident: &Ident, name: &str) -> TokenStream {
    let msg = format!("{name} must be non-empty");
    quote! {
        if #ident.trim().is_empty() {
            return Err(E::from(#msg.to_string()));
        }
    }
}

fn no_special_chars(ident: &Ident, name: &str) -> TokenStream {
    let msg = format!("{name} must not contain special characters");
    quote! {
        if #ident.contains(|c: char| !(c.is_alphanumeric() || c.is_whitespace())) {
            return Err(E::from(#msg.to_string()));
        }
    }
}

fn digits_only(ident: &Ident, name: &str) -> TokenStream {
    let msg = format!("{name} must contain only digits");
    quote! {
        if !#ident.chars().all(|c| c.is_ascii_digit()) {
            return Err(E::from(#msg.to_string()));
        }
    }
}

fn no_field_delimiter(ident: &Ident, name: &str) -> TokenStream {
    let msg = format!("{name} must not contain the '{FIELD_DELIMITER}' delimiter");
    quote! {
        if #ident.contains(#FIELD_DELIMITER) {
            return Err(E::from(#msg.to_string()));
        }
    }
}

fn tax_id(ident: &Ident, name: &str) -> TokenStream {
    let msg = format!("{name} must be exactly {TAX_ID_DIGITS} digits");
    quote! {
        if #ident.len() != #TAX_ID_DIGITS || !#ident.chars().all(|c| c.is_ascii_digit()) {
            return Err(E::from(#msg.to_string()));
        }
    }
}
