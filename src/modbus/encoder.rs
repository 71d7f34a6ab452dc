use super::protocol::{
    DataType, ReadRequest, TransactionId, PROTOCOL_ID, REQUEST_FRAME_LEN, REQUEST_PDU_LEN,
    UNIT_ID,
};
use crate::utils::error::ModbusError;

/// Builds the 12-byte Modbus TCP read request for `data_type` at `address`.
pub fn encode(
    transaction_id: TransactionId,
    address: u16,
    data_type: DataType,
) -> [u8; REQUEST_FRAME_LEN] {
    let mut frame = [0u8; REQUEST_FRAME_LEN];
    frame[0..2].copy_from_slice(&transaction_id.to_be_bytes());
    frame[2..4].copy_from_slice(&PROTOCOL_ID.to_be_bytes());
    frame[4..6].copy_from_slice(&REQUEST_PDU_LEN.to_be_bytes());
    frame[6] = UNIT_ID;
    frame[7] = data_type.function_code();
    frame[8..10].copy_from_slice(&address.to_be_bytes());
    frame[10..12].copy_from_slice(&data_type.quantity().to_be_bytes());
    frame
}

pub fn encode_request(
    transaction_id: TransactionId,
    request: &ReadRequest,
) -> [u8; REQUEST_FRAME_LEN] {
    encode(transaction_id, request.address, request.data_type)
}

/// Field view over an encoded read request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestHeader {
    pub transaction_id: TransactionId,
    pub protocol_id: u16,
    pub length: u16,
    pub unit_id: u8,
    pub function_code: u8,
    pub address: u16,
    pub quantity: u16,
}

impl RequestHeader {
    pub fn parse(frame: &[u8]) -> Result<Self, ModbusError> {
        if frame.len() != REQUEST_FRAME_LEN {
            return Err(ModbusError::CommunicationError(format!(
                "request frame must be {} bytes, got {}",
                REQUEST_FRAME_LEN,
                frame.len()
            )));
        }
        let word = |i: usize| u16::from_be_bytes([frame[i], frame[i + 1]]);
        Ok(Self {
            transaction_id: word(0),
            protocol_id: word(2),
            length: word(4),
            unit_id: frame[6],
            function_code: frame[7],
            address: word(8),
            quantity: word(10),
        })
    }
}
