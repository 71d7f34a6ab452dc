//! Modbus TCP Client Library
//!
//! Connects to a PLC over Modbus TCP, issues single-value register reads
//! and decodes the answers into typed values. Results are delivered as
//! session events so front-ends stay responsive while the link is busy.

pub mod cli;
pub mod config;
pub mod modbus;
pub mod output;
pub mod utils;

// Re-export commonly used types
pub use config::Config;
pub use modbus::{
    ConnectionSession, ConnectionState, DataType, DecodedValue, ModbusClientTrait, ReadRequest,
    SessionEvent, SessionOptions,
};
pub use output::{ConsoleFormatter, EventFormatter, JsonFormatter};
pub use utils::error::{DecodeError, ModbusError};

pub const VERSION: &str = "0.1.0";
