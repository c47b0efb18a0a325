pub mod derive_query;
