use super::protocol::TransactionId;

/// Issues MBAP transaction identifiers for one session.
///
/// Zero is reserved; after 65535 the sequence restarts at 1.
#[derive(Debug, Default, Clone)]
pub struct TransactionSequencer {
    current: TransactionId,
}

impl TransactionSequencer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next(&mut self) -> TransactionId {
        self.current = match self.current.wrapping_add(1) {
            0 => 1,
            id => id,
        };
        self.current
    }

    /// Last issued id, 0 if none has been issued yet.
    pub fn current(&self) -> TransactionId {
        self.current
    }
}
