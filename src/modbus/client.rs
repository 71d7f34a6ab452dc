use async_trait::async_trait;

use super::protocol::TransactionId;
use super::session::{ConnectionSession, ConnectionState};
use crate::utils::error::ModbusError;

/// Command surface offered to front-ends.
///
/// Results of reads are not returned here; they arrive on the session's
/// event channel.
#[async_trait]
pub trait ModbusClientTrait: Send + Sync {
    async fn connect(&self, host: &str, port: u32) -> Result<(), ModbusError>;

    async fn disconnect(&self) -> Result<(), ModbusError>;

    /// `address` and `data_type` are operator text, validated before sending.
    async fn read_register(
        &self,
        address: &str,
        data_type: &str,
    ) -> Result<TransactionId, ModbusError>;

    fn connection_state(&self) -> ConnectionState;

    fn received_count(&self) -> u64;
}

#[async_trait]
impl ModbusClientTrait for ConnectionSession {
    async fn connect(&self, host: &str, port: u32) -> Result<(), ModbusError> {
        ConnectionSession::connect(self, host, port).await
    }

    async fn disconnect(&self) -> Result<(), ModbusError> {
        ConnectionSession::disconnect(self).await;
        Ok(())
    }

    async fn read_register(
        &self,
        address: &str,
        data_type: &str,
    ) -> Result<TransactionId, ModbusError> {
        self.read_text(address, data_type).await
    }

    fn connection_state(&self) -> ConnectionState {
        self.state()
    }

    fn received_count(&self) -> u64 {
        ConnectionSession::received_count(self)
    }
}
