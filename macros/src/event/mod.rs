pub mod derive_event;
