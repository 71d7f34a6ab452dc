pub mod formatters;

pub use formatters::{formatter_for, ConsoleFormatter, EventFormatter, JsonFormatter};
