use proc_macro::TokenStream;
use quote::quote;
use syn::parse::{Parse, ParseStream};
use syn::{parse_macro_input, Data, DeriveInput, LitInt, LitStr};

use crate::utils::{create_str_literal_from_ident, error, find_arguments, parse_pairs};

pub fn derive_event(event: TokenStream) -> TokenStream {
    let input = parse_macro_input!(event as DeriveInput);

    if let Data::Union(_) = input.data {
        return error(&input.ident, "Event can only be derived for a struct or an enum");
    }

    let arguments: DeriveEventArguments = match find_arguments(&input.attrs) {
        Ok(arguments) => arguments,
        Err(error) => return error.into_compile_error().into(),
    };

    let type_name = &input.ident;
    let event_name = arguments
        .event_name
        .unwrap_or_else(|| create_str_literal_from_ident(type_name));
    let version = arguments.version.map(|version| {
        quote! {
            const VERSION: Option<u32> = Some(#version);
        }
    });
    let (impl_generics, type_generics, where_clause) = input.generics.split_for_impl();

    TokenStream::from(quote! {
        impl #impl_generics strata::Event for #type_name #type_generics #where_clause {
            const NAME: &'static str = #event_name;
            #version
        }
    })
}

#[derive(Default)]
struct DeriveEventArguments {
    event_name: Option<LitStr>,
    version: Option<LitInt>,
}

impl Parse for DeriveEventArguments {
    fn parse(input: ParseStream) -> syn::Result<Self> {
        let mut arguments = DeriveEventArguments::default();
        parse_pairs(input, |argument, input| {
            if argument == "name" {
                arguments.event_name = Some(input.parse()?);
            } else if argument == "version" {
                let version: LitInt = input.parse()?;
                version.base10_parse::<u32>()?;
                arguments.version = Some(version);
            } else {
                return Err(syn::Error::new_spanned(argument, "unexpected argument"));
            }
            Ok(())
        })?;
        Ok(arguments)
    }
}
