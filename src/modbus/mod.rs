pub mod client;
pub mod decoder;
pub mod encoder;
pub mod protocol;
pub mod sequencer;
pub mod session;

pub use client::ModbusClientTrait;
pub use decoder::{decode, DecodedValue, ModbusResponse};
pub use encoder::{encode, RequestHeader};
pub use protocol::{DataType, ReadRequest, TransactionId};
pub use sequencer::TransactionSequencer;
pub use session::{ConnectionSession, ConnectionState, ReceivedData, SessionEvent, SessionOptions};
