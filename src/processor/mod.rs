//! Funds-transfer processor interface and HTTP client.

mod client;

pub use client::ProcessorClient;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum ProcessorError {
    /// Worth retrying with the same idempotency token.
    #[error("transient processor failure: {0}")]
    Transient(String),

    /// Not recoverable for this obligation (e.g. account closed).
    #[error("terminal processor failure: {0}")]
    Terminal(String),

    /// No definitive response was received. The transfer may or may not
    /// have been accepted; only a status lookup can tell.
    #[error("processor request timed out")]
    Timeout,

    #[error("processor circuit breaker is open")]
    CircuitOpen,
}

/// Transfer status as reported by the processor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessorTransferStatus {
    Pending,
    Processed,
    Failed,
    Cancelled,
}

#[derive(Debug, Clone)]
pub struct TransferRequest {
    pub source_account_id: Uuid,
    pub destination_account_id: Uuid,
    /// Minor units.
    pub amount: i64,
    pub idempotency_token: Uuid,
}

#[derive(Debug, Clone)]
pub struct ProcessorAck {
    pub processor_transfer_id: String,
    pub status: ProcessorTransferStatus,
}

/// The external money-movement collaborator. Its internal ledgering is out
/// of scope; this trait only captures what the orchestrator consumes.
#[async_trait]
pub trait TransferProcessor: Send + Sync {
    async fn create_transfer(
        &self,
        request: &TransferRequest,
    ) -> Result<ProcessorAck, ProcessorError>;

    async fn get_transfer_status(
        &self,
        processor_transfer_id: &str,
    ) -> Result<ProcessorTransferStatus, ProcessorError>;

    /// Cancellation is only final once the processor confirms it.
    async fn cancel_transfer(&self, processor_transfer_id: &str) -> Result<(), ProcessorError>;

    /// Real-time available balance for an account, minor units.
    async fn get_available_balance(&self, account_id: Uuid) -> Result<i64, ProcessorError>;
}
