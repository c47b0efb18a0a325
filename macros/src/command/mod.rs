pub mod derive_command;
