use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::utils::error::ModbusError;

/// Size of a read request on the wire: MBAP header (7) + PDU (5).
pub const REQUEST_FRAME_LEN: usize = 12;
/// MBAP header (7) + function code + byte count.
pub const RESPONSE_HEADER_LEN: usize = 9;
pub const PROTOCOL_ID: u16 = 0x0000;
/// Bytes following the length field in a read request.
pub const REQUEST_PDU_LEN: u16 = 0x0006;
pub const UNIT_ID: u8 = 0x01;

pub const FC_READ_COILS: u8 = 0x01;
pub const FC_READ_HOLDING_REGISTERS: u8 = 0x03;
/// Set on the function code of an exception response.
pub const EXCEPTION_FLAG: u8 = 0x80;

pub type TransactionId = u16;

/// Value kinds a register read can be interpreted as.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    Bool,
    Short,
    Int,
    Float,
    Double,
    String,
}

impl DataType {
    pub const ALL: [DataType; 6] = [
        DataType::Bool,
        DataType::Short,
        DataType::Int,
        DataType::Float,
        DataType::Double,
        DataType::String,
    ];

    pub fn function_code(self) -> u8 {
        match self {
            DataType::Bool => FC_READ_COILS,
            _ => FC_READ_HOLDING_REGISTERS,
        }
    }

    /// Number of coils or 16-bit registers requested.
    pub fn quantity(self) -> u16 {
        match self {
            DataType::Bool | DataType::Short => 1,
            DataType::Int | DataType::Float => 2,
            DataType::Double => 4,
            // up to 32 bytes of text
            DataType::String => 16,
        }
    }

    /// Payload bytes needed to decode a value of this kind.
    pub fn required_bytes(self) -> usize {
        match self {
            DataType::Bool => 1,
            DataType::Short => 2,
            DataType::Int | DataType::Float => 4,
            DataType::Double => 8,
            DataType::String => 1,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DataType::Bool => "bool",
            DataType::Short => "short",
            DataType::Int => "int",
            DataType::Float => "float",
            DataType::Double => "double",
            DataType::String => "string",
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DataType {
    type Err = ModbusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let name = s.trim().to_ascii_lowercase();
        DataType::ALL
            .iter()
            .copied()
            .find(|t| t.as_str() == name)
            .ok_or_else(|| ModbusError::UnsupportedDataType(s.to_string()))
    }
}

/// A single register read, validated before it reaches the encoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadRequest {
    pub address: u16,
    pub data_type: DataType,
}

impl ReadRequest {
    pub fn new(address: u16, data_type: DataType) -> Self {
        Self { address, data_type }
    }

    /// Builds a request from operator-entered text.
    pub fn parse(address: &str, data_type: &str) -> Result<Self, ModbusError> {
        let trimmed = address.trim();
        if trimmed.is_empty() {
            return Err(ModbusError::InvalidRegisterAddress(address.to_string()));
        }
        let address_value = trimmed
            .parse::<u16>()
            .map_err(|_| ModbusError::InvalidRegisterAddress(address.to_string()))?;
        let data_type = data_type.parse::<DataType>()?;
        Ok(Self::new(address_value, data_type))
    }
}

impl fmt::Display for ReadRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "address {} as {}", self.address, self.data_type)
    }
}
