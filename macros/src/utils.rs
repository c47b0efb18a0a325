use proc_macro::TokenStream;
use quote::ToTokens;
use std::fmt::Display;
use syn::parse::{Parse, ParseStream};
use syn::{parse_quote, Attribute, Ident, LitStr, Token, Type};

pub fn error(tokens: impl ToTokens, message: impl Display) -> TokenStream {
    syn::Error::new_spanned(tokens, message)
        .to_compile_error()
        .into()
}

pub fn has_name(attribute: &Attribute, name: &str) -> bool {
    let path = attribute.path();
    path.segments.len() == 1 && path.segments[0].ident == name
}

pub fn find_arguments<T: Parse + Default>(attributes: &[Attribute]) -> syn::Result<T> {
    for attribute in attributes {
        if has_name(attribute, "strata") {
            return attribute.parse_args();
        }
    }
    Ok(T::default())
}

pub fn create_str_literal_from_ident(type_name: &Ident) -> LitStr {
    LitStr::new(&type_name.to_string(), type_name.span())
}

/// Parses `key = value` pairs separated by commas, calling `parse_value` for each key.
pub fn parse_pairs(
    input: ParseStream,
    mut parse_value: impl FnMut(&Ident, ParseStream) -> syn::Result<()>,
) -> syn::Result<()> {
    while !input.is_empty() {
        let argument = input.parse::<Ident>()?;
        input.parse::<Token![=]>()?;
        parse_value(&argument, input)?;
        if !input.is_empty() {
            input.parse::<Token![,]>()?;
        }
    }
    Ok(())
}

/// The arguments of `#[strata(...)]` on a command or a query.
#[derive(Default)]
pub struct OperationArguments {
    pub name: Option<LitStr>,
    pub output: Option<Type>,
}

impl OperationArguments {
    pub fn output(&self) -> Type {
        self.output.clone().unwrap_or_else(|| parse_quote!(()))
    }
}

impl Parse for OperationArguments {
    fn parse(input: ParseStream) -> syn::Result<Self> {
        let mut arguments = OperationArguments::default();
        parse_pairs(input, |argument, input| {
            if argument == "name" {
                arguments.name = Some(input.parse()?);
            } else if argument == "output" {
                arguments.output = Some(input.parse()?);
            } else {
                return Err(syn::Error::new_spanned(argument, "unexpected argument"));
            }
            Ok(())
        })?;
        Ok(arguments)
    }
}
