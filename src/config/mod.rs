pub mod settings;

pub use settings::{Config, ConnectionConfig, DisplayConfig, OutputFormat, RequestConfig};
