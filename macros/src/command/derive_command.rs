use proc_macro::TokenStream;
use quote::quote;
use syn::{parse_macro_input, Data, DeriveInput};

use crate::utils::{create_str_literal_from_ident, error, find_arguments, OperationArguments};

pub fn derive_command(command: TokenStream) -> TokenStream {
    let input = parse_macro_input!(command as DeriveInput);

    if let Data::Union(_) = input.data {
        return error(
            &input.ident,
            "Command can only be derived for a struct or an enum",
        );
    }

    let arguments: OperationArguments = match find_arguments(&input.attrs) {
        Ok(arguments) => arguments,
        Err(error) => return error.into_compile_error().into(),
    };

    let type_name = &input.ident;
    let command_name = arguments
        .name
        .clone()
        .unwrap_or_else(|| create_str_literal_from_ident(type_name));
    let output = arguments.output();
    let (impl_generics, type_generics, where_clause) = input.generics.split_for_impl();

    TokenStream::from(quote! {
        impl #impl_generics strata::Command for #type_name #type_generics #where_clause {
            const NAME: &'static str = #command_name;
            type Output = #output;
        }
    })
}
