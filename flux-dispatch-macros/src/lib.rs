//! Procedural macros for flux-dispatch

use darling::{FromDeriveInput, FromVariant};
use proc_macro::TokenStream;
use quote::quote;
use syn::{parse_macro_input, DeriveInput};

/// Container-level attributes for #[derive(ActionType)]
#[derive(Debug, FromDeriveInput)]
#[darling(attributes(action_type), supports(enum_unit))]
struct ActionTypeOpts {
    ident: syn::Ident,
    data: darling::ast::Data<ActionTypeVariant, ()>,

    /// Namespace prepended to every generated name (`prefix/NAME`)
    #[darling(default)]
    prefix: Option<String>,
}

/// Variant-level attributes
#[derive(Debug, FromVariant)]
#[darling(attributes(action_type))]
struct ActionTypeVariant {
    ident: syn::Ident,

    /// Explicit name override (the prefix still applies)
    #[darling(default)]
    rename: Option<String>,
}

/// Convert PascalCase to SCREAMING_SNAKE_CASE
///
/// Runs of capitals stay together: `HTTPRequest` becomes `HTTP_REQUEST`.
fn to_screaming_snake_case(s: &str) -> String {
    let chars: Vec<char> = s.chars().collect();
    let mut result = String::with_capacity(s.len() + 4);

    for (i, ch) in chars.iter().enumerate() {
        if i > 0 && ch.is_uppercase() {
            let prev = chars[i - 1];
            let next_is_lower = chars.get(i + 1).is_some_and(|c| c.is_lowercase());
            if prev.is_lowercase() || prev.is_ascii_digit() || (prev.is_uppercase() && next_is_lower)
            {
                result.push('_');
            }
        }
        result.extend(ch.to_uppercase());
    }
    result
}

/// Derive macro for the ActionType trait
///
/// Turns a unit enum into a set of action identifiers. Each variant maps to an
/// `ActionId::Name`, by default its name in SCREAMING_SNAKE_CASE. Also generates
/// `From<Enum>` and `From<&Enum>` for `ActionId`, so variants can be passed to
/// `Store::bind`, `Dispatcher::register` and `ActionCreator::dispatch` directly.
///
/// # Attributes
///
/// - `#[action_type(prefix = "todo")]` on the enum: names become `todo/ADD_TODO`
/// - `#[action_type(rename = "todo:add")]` on a variant: explicit name
///
/// # Example
/// ```ignore
/// #[derive(ActionType, Clone, Copy, Debug, PartialEq)]
/// #[action_type(prefix = "todo")]
/// enum TodoAction {
///     AddTodo,
///     #[action_type(rename = "CLEAR")]
///     ClearCompleted,
/// }
///
/// assert_eq!(TodoAction::AddTodo.action_id().to_string(), "todo/ADD_TODO");
/// assert_eq!(TodoAction::ClearCompleted.action_id().to_string(), "todo/CLEAR");
/// assert_eq!(TodoAction::all().len(), 2);
/// ```
#[proc_macro_derive(ActionType, attributes(action_type))]
pub fn derive_action_type(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);

    let opts = match ActionTypeOpts::from_derive_input(&input) {
        Ok(opts) => opts,
        Err(e) => return e.write_errors().into(),
    };

    let name = &opts.ident;

    let variants = match &opts.data {
        darling::ast::Data::Enum(variants) => variants,
        _ => {
            return syn::Error::new_spanned(&input, "ActionType can only be derived for enums")
                .to_compile_error()
                .into();
        }
    };

    if variants.is_empty() {
        return syn::Error::new_spanned(&input, "ActionType needs at least one variant")
            .to_compile_error()
            .into();
    }

    let id_strings: Vec<String> = variants
        .iter()
        .map(|v| {
            let base = v
                .rename
                .clone()
                .unwrap_or_else(|| to_screaming_snake_case(&v.ident.to_string()));
            match &opts.prefix {
                Some(prefix) => format!("{prefix}/{base}"),
                None => base,
            }
        })
        .collect();

    // Duplicate names would make two variants indistinguishable to the dispatcher
    for (i, id) in id_strings.iter().enumerate() {
        if id_strings[..i].contains(id) {
            return syn::Error::new_spanned(
                &variants[i].ident,
                format!("duplicate action type name `{id}`"),
            )
            .to_compile_error()
            .into();
        }
    }

    let id_arms: Vec<proc_macro2::TokenStream> = variants
        .iter()
        .zip(id_strings.iter())
        .map(|(v, s)| {
            let variant = &v.ident;
            quote! {
                #name::#variant => flux_dispatch::ActionId::Name(
                    ::std::borrow::Cow::Borrowed(#s)
                )
            }
        })
        .collect();

    let all_variants = variants.iter().map(|v| {
        let variant = &v.ident;
        quote! { #name::#variant }
    });

    let expanded = quote! {
        impl flux_dispatch::ActionType for #name {
            fn action_id(&self) -> flux_dispatch::ActionId {
                match self {
                    #(#id_arms),*
                }
            }

            fn all() -> &'static [Self] {
                static ALL: &[#name] = &[#(#all_variants),*];
                ALL
            }
        }

        impl ::core::convert::From<#name> for flux_dispatch::ActionId {
            fn from(value: #name) -> Self {
                flux_dispatch::ActionType::action_id(&value)
            }
        }

        impl ::core::convert::From<&#name> for flux_dispatch::ActionId {
            fn from(value: &#name) -> Self {
                flux_dispatch::ActionType::action_id(value)
            }
        }
    };

    TokenStream::from(expanded)
}

#[cfg(test)]
mod tests {
    use super::to_screaming_snake_case;

    #[test]
    fn test_screaming_snake_case() {
        assert_eq!(to_screaming_snake_case("Add"), "ADD");
        assert_eq!(to_screaming_snake_case("AddTodo"), "ADD_TODO");
        assert_eq!(to_screaming_snake_case("HTTPRequest"), "HTTP_REQUEST");
        assert_eq!(to_screaming_snake_case("Page2Loaded"), "PAGE2_LOADED");
    }
}
