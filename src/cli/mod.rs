//! Command-line interface
//!
//! Thin layer over the library: argument parsing, settings assembly, signal
//! wiring and progress rendering.

pub mod args;
pub mod commands;

pub use args::{Cli, Commands, GlobalArgs, InitConfigArgs, RunArgs};
pub use commands::{handle_init_config, handle_run};
