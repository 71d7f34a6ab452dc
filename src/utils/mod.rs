pub mod error;
pub mod hexdump;

pub use error::{DecodeError, ModbusError};
pub use hexdump::{to_hex_string, to_hex_string_limited};
