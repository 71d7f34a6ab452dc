use thiserror::Error;

use crate::modbus::session::ConnectionState;

#[derive(Error, Debug)]
pub enum ModbusError {
    #[error("Invalid server address: {0:?}")]
    InvalidAddress(String),

    #[error("Invalid port {0}: must be between 1 and 65535")]
    InvalidPort(u32),

    #[error("Invalid register address: {0:?}")]
    InvalidRegisterAddress(String),

    #[error("Unsupported data type: {0:?}")]
    UnsupportedDataType(String),

    #[error("Connection error: {0}")]
    ConnectionError(String),

    #[error("Write error: {0}")]
    WriteError(String),

    #[error("Not connected")]
    NotConnected,

    #[error("Operation not allowed while {0}")]
    InvalidState(ConnectionState),

    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),

    #[error("Timeout occurred")]
    Timeout,

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Communication error: {0}")]
    CommunicationError(String),
}

impl ModbusError {
    /// True for errors raised before any socket was touched.
    pub fn is_configuration_error(&self) -> bool {
        matches!(
            self,
            ModbusError::InvalidAddress(_)
                | ModbusError::InvalidPort(_)
                | ModbusError::InvalidRegisterAddress(_)
                | ModbusError::UnsupportedDataType(_)
                | ModbusError::ConfigError(_)
        )
    }
}

/// Reasons an inbound buffer could not be interpreted as a typed value.
///
/// None of these end the receive loop; the raw bytes are still delivered.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("response too short ({len} bytes)")]
    TooShort { len: usize },

    #[error("malformed response: {0}")]
    Malformed(String),

    #[error("response carries no data")]
    NoData,

    #[error("Modbus exception: function code 0x{function_code:02X}, exception code 0x{exception_code:02X}")]
    ModbusFault {
        function_code: u8,
        exception_code: u8,
    },

    #[error("no data type requested for this response")]
    UnsupportedType,
}

impl From<std::io::Error> for ModbusError {
    fn from(err: std::io::Error) -> Self {
        ModbusError::CommunicationError(format!("IO error: {}", err))
    }
}

impl From<toml::de::Error> for ModbusError {
    fn from(err: toml::de::Error) -> Self {
        ModbusError::ConfigError(format!("TOML parse error: {}", err))
    }
}

impl From<toml::ser::Error> for ModbusError {
    fn from(err: toml::ser::Error) -> Self {
        ModbusError::ConfigError(format!("TOML write error: {}", err))
    }
}
