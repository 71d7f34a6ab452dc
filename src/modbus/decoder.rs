//! Response interpretation.
//!
//! Multi-register values are read least-significant register first: each
//! register is big-endian on its own, but the register order is reversed
//! relative to a plain big-endian value. Controllers disagree on this, so
//! one fixed convention is used and anything that does not fit degrades to
//! a hex dump instead of an error.

use serde::Serialize;
use std::fmt;

use super::protocol::{DataType, TransactionId, EXCEPTION_FLAG, PROTOCOL_ID, RESPONSE_HEADER_LEN};
use crate::utils::error::DecodeError;
use crate::utils::hexdump::{to_hex_string, to_hex_string_limited};

const STRING_HEX_LIMIT: usize = 32;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum DecodedValue {
    Bool(bool),
    Short(i16),
    Int(i32),
    Float(f32),
    Double(f64),
    StringVal(String),
    RawHex(String),
}

impl fmt::Display for DecodedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodedValue::Bool(v) => write!(f, "[bool] value: {}", v),
            DecodedValue::Short(v) => write!(f, "[short] value: {}", v),
            DecodedValue::Int(v) => write!(f, "[int] value: {}", v),
            DecodedValue::Float(v) => write!(f, "[float] value: {}", v),
            DecodedValue::Double(v) => write!(f, "[double] value: {}", v),
            DecodedValue::StringVal(v) => write!(f, "[string] value: {}", v),
            DecodedValue::RawHex(v) => write!(f, "raw data: {}", v),
        }
    }
}

/// Header fields and payload of an inbound frame, payload not interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModbusResponse<'a> {
    pub transaction_id: TransactionId,
    pub protocol_id: u16,
    pub length: u16,
    pub unit_id: u8,
    pub function_code: u8,
    pub byte_count: u8,
    pub payload: &'a [u8],
}

impl<'a> ModbusResponse<'a> {
    pub fn parse(buffer: &'a [u8]) -> Result<Self, DecodeError> {
        if buffer.len() < RESPONSE_HEADER_LEN {
            return Err(DecodeError::TooShort { len: buffer.len() });
        }

        let word = |i: usize| u16::from_be_bytes([buffer[i], buffer[i + 1]]);
        let protocol_id = word(2);
        if protocol_id != PROTOCOL_ID {
            return Err(DecodeError::Malformed(format!(
                "protocol id 0x{:04X}",
                protocol_id
            )));
        }

        let function_code = buffer[7];
        let byte_count = buffer[8];
        let end = RESPONSE_HEADER_LEN + byte_count as usize;
        if buffer.len() < end {
            return Err(DecodeError::Malformed(format!(
                "byte count {} exceeds the {} bytes received",
                byte_count,
                buffer.len() - RESPONSE_HEADER_LEN
            )));
        }

        // Offset 8 is validated as a byte count first, then read as the
        // exception code when the fault flag is set.
        if function_code & EXCEPTION_FLAG != 0 {
            return Err(DecodeError::ModbusFault {
                function_code,
                exception_code: byte_count,
            });
        }

        Ok(Self {
            transaction_id: word(0),
            protocol_id,
            length: word(4),
            unit_id: buffer[6],
            function_code,
            byte_count,
            payload: &buffer[RESPONSE_HEADER_LEN..end],
        })
    }
}

/// Interprets `buffer` as the answer to a read of `requested`.
pub fn decode(buffer: &[u8], requested: DataType) -> Result<DecodedValue, DecodeError> {
    let response = ModbusResponse::parse(buffer)?;
    if response.byte_count == 0 {
        return Err(DecodeError::NoData);
    }
    Ok(decode_payload(response.payload, requested))
}

/// Never fails: short payloads and undecodable text come back as `RawHex`.
pub fn decode_payload(payload: &[u8], requested: DataType) -> DecodedValue {
    if payload.len() < requested.required_bytes() {
        return DecodedValue::RawHex(to_hex_string(payload));
    }

    let reg = |i: usize| u16::from_be_bytes([payload[2 * i], payload[2 * i + 1]]);

    match requested {
        DataType::Bool => DecodedValue::Bool(payload[0] != 0),
        DataType::Short => DecodedValue::Short(reg(0) as i16),
        DataType::Int => DecodedValue::Int(swapped_u32(reg(0), reg(1)) as i32),
        DataType::Float => DecodedValue::Float(f32::from_bits(swapped_u32(reg(0), reg(1)))),
        DataType::Double => {
            let bits = ((reg(3) as u64) << 48)
                | ((reg(2) as u64) << 32)
                | ((reg(1) as u64) << 16)
                | reg(0) as u64;
            DecodedValue::Double(f64::from_bits(bits))
        }
        DataType::String => decode_text(payload),
    }
}

fn swapped_u32(reg0: u16, reg1: u16) -> u32 {
    ((reg1 as u32) << 16) | reg0 as u32
}

fn decode_text(payload: &[u8]) -> DecodedValue {
    let len = payload
        .iter()
        .rposition(|&b| b != 0)
        .map_or(0, |last| last + 1);
    let trimmed = &payload[..len];
    match std::str::from_utf8(trimmed) {
        Ok(text) => DecodedValue::StringVal(text.to_string()),
        Err(_) => DecodedValue::RawHex(to_hex_string_limited(trimmed, STRING_HEX_LIMIT)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(function_code: u8, payload: &[u8]) -> Vec<u8> {
        let mut buf = vec![0x00, 0x01, 0x00, 0x00];
        buf.extend_from_slice(&(3 + payload.len() as u16).to_be_bytes());
        buf.push(0x01);
        buf.push(function_code);
        buf.push(payload.len() as u8);
        buf.extend_from_slice(payload);
        buf
    }

    #[test]
    fn test_int_is_register_swapped() {
        let buf = [
            0x00, 0x01, 0x00, 0x00, 0x00, 0x07, 0x01, 0x03, 0x04, 0x00, 0x05, 0x00, 0x00,
        ];
        assert_eq!(decode(&buf, DataType::Int), Ok(DecodedValue::Int(5)));

        let buf = frame(0x03, &[0x00, 0x01, 0x00, 0x02]);
        assert_eq!(decode(&buf, DataType::Int), Ok(DecodedValue::Int(0x0002_0001)));
    }

    #[test]
    fn test_negative_short_and_int() {
        let buf = frame(0x03, &[0xFF, 0xFE]);
        assert_eq!(decode(&buf, DataType::Short), Ok(DecodedValue::Short(-2)));

        let buf = frame(0x03, &[0xFF, 0xFF, 0xFF, 0xFF]);
        assert_eq!(decode(&buf, DataType::Int), Ok(DecodedValue::Int(-1)));
    }

    #[test]
    fn test_bool_from_coil_byte() {
        assert_eq!(
            decode(&frame(0x01, &[0x01]), DataType::Bool),
            Ok(DecodedValue::Bool(true))
        );
        assert_eq!(
            decode(&frame(0x01, &[0x00]), DataType::Bool),
            Ok(DecodedValue::Bool(false))
        );
    }

    #[test]
    fn test_float_register_order() {
        // 1.5f32 = 0x3FC0_0000, low register first on the wire
        let buf = frame(0x03, &[0x00, 0x00, 0x3F, 0xC0]);
        assert_eq!(decode(&buf, DataType::Float), Ok(DecodedValue::Float(1.5)));
    }

    #[test]
    fn test_double_register_order() {
        // 2.5f64 = 0x4004_0000_0000_0000, registers sent 0,1,2,3
        let buf = frame(0x03, &[0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x40, 0x04]);
        assert_eq!(decode(&buf, DataType::Double), Ok(DecodedValue::Double(2.5)));
    }

    #[test]
    fn test_zero_payload_floats_are_zero() {
        assert_eq!(
            decode(&frame(0x03, &[0; 4]), DataType::Float),
            Ok(DecodedValue::Float(0.0))
        );
        assert_eq!(
            decode(&frame(0x03, &[0; 8]), DataType::Double),
            Ok(DecodedValue::Double(0.0))
        );
    }

    #[test]
    fn test_string_trims_trailing_zeros() {
        let mut payload = b"PUMP-01".to_vec();
        payload.resize(32, 0);
        assert_eq!(
            decode(&frame(0x03, &payload), DataType::String),
            Ok(DecodedValue::StringVal("PUMP-01".to_string()))
        );
    }

    #[test]
    fn test_invalid_utf8_string_falls_back_to_hex() {
        let payload = [0xC3, 0x28, 0x41, 0x00];
        assert_eq!(
            decode(&frame(0x03, &payload), DataType::String),
            Ok(DecodedValue::RawHex("C3 28 41".to_string()))
        );
    }

    #[test]
    fn test_short_payload_degrades_to_hex() {
        let buf = frame(0x03, &[0x12, 0x34]);
        assert_eq!(
            decode(&buf, DataType::Double),
            Ok(DecodedValue::RawHex("12 34".to_string()))
        );
    }

    #[test]
    fn test_too_short() {
        assert_eq!(
            decode(&[0x00, 0x01, 0x00], DataType::Int),
            Err(DecodeError::TooShort { len: 3 })
        );
        assert_eq!(
            decode(&[], DataType::Bool),
            Err(DecodeError::TooShort { len: 0 })
        );
    }

    #[test]
    fn test_no_data() {
        let buf = frame(0x03, &[]);
        assert_eq!(decode(&buf, DataType::Int), Err(DecodeError::NoData));
    }

    #[test]
    fn test_truncated_payload_is_malformed() {
        let mut buf = frame(0x03, &[0x00, 0x05, 0x00, 0x00]);
        buf.truncate(11);
        assert!(matches!(
            decode(&buf, DataType::Int),
            Err(DecodeError::Malformed(_))
        ));
    }

    #[test]
    fn test_wrong_protocol_id_is_malformed() {
        let mut buf = frame(0x03, &[0x00, 0x05]);
        buf[3] = 0x01;
        assert!(matches!(
            decode(&buf, DataType::Short),
            Err(DecodeError::Malformed(_))
        ));
    }

    #[test]
    fn test_bare_exception_frame_is_malformed() {
        // exception code 0x02 is also taken as a byte count of 2
        let buf = [0x00, 0x01, 0x00, 0x00, 0x00, 0x03, 0x01, 0x83, 0x02];
        assert!(matches!(
            decode(&buf, DataType::Int),
            Err(DecodeError::Malformed(_))
        ));
    }

    #[test]
    fn test_exception_response_is_fault() {
        // illegal data address on read holding registers
        let buf = [0x00, 0x01, 0x00, 0x00, 0x00, 0x03, 0x01, 0x83, 0x02, 0x00, 0x00];
        assert_eq!(
            decode(&buf, DataType::Int),
            Err(DecodeError::ModbusFault {
                function_code: 0x83,
                exception_code: 0x02
            })
        );
    }

    #[test]
    fn test_response_view_fields() {
        let buf = frame(0x03, &[0xAB, 0xCD]);
        let response = ModbusResponse::parse(&buf).unwrap();
        assert_eq!(response.transaction_id, 1);
        assert_eq!(response.length, 5);
        assert_eq!(response.unit_id, 1);
        assert_eq!(response.function_code, 0x03);
        assert_eq!(response.byte_count, 2);
        assert_eq!(response.payload, &[0xAB, 0xCD]);
    }

    #[test]
    fn test_trailing_bytes_beyond_byte_count_ignored() {
        let mut buf = frame(0x03, &[0x00, 0x07]);
        buf.extend_from_slice(&[0xFF, 0xFF]);
        assert_eq!(decode(&buf, DataType::Short), Ok(DecodedValue::Short(7)));
    }
}
