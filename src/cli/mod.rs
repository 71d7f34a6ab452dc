pub mod commands;

pub use commands::{handle_subcommands, run_console, ConsoleAction, ConsoleCommand};
