use proc_macro::TokenStream;

mod command;
mod event;
mod query;
pub(crate) mod utils;

#[proc_macro_derive(Event, attributes(strata))]
pub fn derive_event(event: TokenStream) -> TokenStream {
    event::derive_event::derive_event(event)
}

#[proc_macro_derive(Command, attributes(strata))]
pub fn derive_command(command: TokenStream) -> TokenStream {
    command::derive_command::derive_command(command)
}

#[proc_macro_derive(Query, attributes(strata))]
pub fn derive_query(query: TokenStream) -> TokenStream {
    query::derive_query::derive_query(query)
}
