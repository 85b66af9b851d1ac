//! Transfer records, withheld transfers, and the append-only ledger.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Namespace for deterministic idempotency tokens.
const IDEMPOTENCY_NAMESPACE: Uuid = Uuid::from_bytes([
    0x5e, 0x1f, 0x8c, 0x2a, 0x9b, 0x4d, 0x4e, 0x7a, 0x8f, 0x3c, 0x6d, 0x2e, 0x1a, 0x9f, 0x4b,
    0x7c,
]);

/// One instance requiring a transfer under an agreement: either a matched
/// bank transaction or a scheduled date.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Occurrence {
    Transaction(String),
    ScheduledDate(NaiveDate),
}

impl Occurrence {
    pub fn scheduled_date(&self) -> Option<NaiveDate> {
        match self {
            Occurrence::Transaction(_) => None,
            Occurrence::ScheduledDate(date) => Some(*date),
        }
    }

    pub fn transaction_id(&self) -> Option<&str> {
        match self {
            Occurrence::Transaction(id) => Some(id),
            Occurrence::ScheduledDate(_) => None,
        }
    }

    pub fn key(&self) -> String {
        match self {
            Occurrence::Transaction(id) => format!("txn:{}", id),
            Occurrence::ScheduledDate(date) => format!("date:{}", date),
        }
    }
}

/// Deterministic token identifying one obligation to the external
/// processor. The same (agreement, participant, occurrence) triple always
/// yields the same token, so retries can never double-charge.
pub fn idempotency_token(
    agreement_id: Uuid,
    participant_agreement_id: Uuid,
    occurrence: &Occurrence,
) -> Uuid {
    let material = format!(
        "{}:{}:{}",
        agreement_id,
        participant_agreement_id,
        occurrence.key()
    );
    Uuid::new_v5(&IDEMPOTENCY_NAMESPACE, material.as_bytes())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransferStatus {
    Initiated,
    Pending,
    Processed,
    Failed,
}

impl TransferStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TransferStatus::Processed | TransferStatus::Failed)
    }
}

impl fmt::Display for TransferStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let value = match self {
            TransferStatus::Initiated => "INITIATED",
            TransferStatus::Pending => "PENDING",
            TransferStatus::Processed => "PROCESSED",
            TransferStatus::Failed => "FAILED",
        };
        write!(f, "{}", value)
    }
}

impl FromStr for TransferStatus {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "INITIATED" => Ok(TransferStatus::Initiated),
            "PENDING" => Ok(TransferStatus::Pending),
            "PROCESSED" => Ok(TransferStatus::Processed),
            "FAILED" => Ok(TransferStatus::Failed),
            other => Err(format!("unknown transfer status: {}", other)),
        }
    }
}

/// A single money movement between a participant's payment account and the
/// agreement owner's destination account. Created at most once per
/// (agreement, participant, occurrence); the idempotency token carries that
/// guarantee to the external processor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transfer {
    pub id: Uuid,
    pub agreement_id: Uuid,
    pub participant_agreement_id: Uuid,
    pub source_account_id: Uuid,
    pub destination_account_id: Uuid,
    /// Amount owed, minor units.
    pub total_amount: i64,
    /// Service fee, minor units. Currently always zero.
    pub fee_amount: i64,
    pub idempotency_token: Uuid,
    pub attempt_count: i32,
    pub status: TransferStatus,
    /// Present only for recurring transfers; distinguishes repeated
    /// occurrences of the same agreement.
    pub scheduled_date: Option<NaiveDate>,
    pub processor_transfer_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Transfer {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        agreement_id: Uuid,
        participant_agreement_id: Uuid,
        source_account_id: Uuid,
        destination_account_id: Uuid,
        total_amount: i64,
        fee_amount: i64,
        occurrence: &Occurrence,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            agreement_id,
            participant_agreement_id,
            source_account_id,
            destination_account_id,
            total_amount,
            fee_amount,
            idempotency_token: idempotency_token(
                agreement_id,
                participant_agreement_id,
                occurrence,
            ),
            attempt_count: 0,
            status: TransferStatus::Initiated,
            scheduled_date: occurrence.scheduled_date(),
            processor_transfer_id: None,
            created_at: Utc::now(),
            completed_at: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WithholdingReason {
    InsufficientFunds,
    Other,
}

impl fmt::Display for WithholdingReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let value = match self {
            WithholdingReason::InsufficientFunds => "INSUFFICIENT_FUNDS",
            WithholdingReason::Other => "OTHER",
        };
        write!(f, "{}", value)
    }
}

impl FromStr for WithholdingReason {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "INSUFFICIENT_FUNDS" => Ok(WithholdingReason::InsufficientFunds),
            "OTHER" => Ok(WithholdingReason::Other),
            other => Err(format!("unknown withholding reason: {}", other)),
        }
    }
}

/// A transfer attempt that could not proceed, pending reconciliation.
/// `transfer_id` is empty when the attempt was withheld before any Transfer
/// row existed (the insufficient-funds pre-check path).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WithheldTransfer {
    pub id: Uuid,
    pub transfer_id: Option<Uuid>,
    pub agreement_id: Uuid,
    pub participant_agreement_id: Uuid,
    pub reason: WithholdingReason,
    pub attempted_amount: i64,
    pub available_funds_at_attempt: Option<i64>,
    pub attempted_at: DateTime<Utc>,
    pub has_been_reconciled: bool,
    pub reconciled_at: Option<DateTime<Utc>>,
    /// Identifies the occurrence for recurring agreements.
    pub original_scheduled_date: Option<NaiveDate>,
    /// Identifies the occurrence for vendor-triggered agreements.
    pub bank_transaction_id: Option<String>,
}

impl WithheldTransfer {
    pub fn new(
        agreement_id: Uuid,
        participant_agreement_id: Uuid,
        reason: WithholdingReason,
        attempted_amount: i64,
        occurrence: &Occurrence,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            transfer_id: None,
            agreement_id,
            participant_agreement_id,
            reason,
            attempted_amount,
            available_funds_at_attempt: None,
            attempted_at: Utc::now(),
            has_been_reconciled: false,
            reconciled_at: None,
            original_scheduled_date: occurrence.scheduled_date(),
            bank_transaction_id: occurrence.transaction_id().map(str::to_string),
        }
    }

    /// Withholding recorded against an already-created transfer (the
    /// processor-failure path).
    pub fn for_transfer(transfer: &Transfer, reason: WithholdingReason) -> Self {
        Self {
            id: Uuid::new_v4(),
            transfer_id: Some(transfer.id),
            agreement_id: transfer.agreement_id,
            participant_agreement_id: transfer.participant_agreement_id,
            reason,
            attempted_amount: transfer.total_amount,
            available_funds_at_attempt: None,
            attempted_at: Utc::now(),
            has_been_reconciled: false,
            reconciled_at: None,
            original_scheduled_date: transfer.scheduled_date,
            bank_transaction_id: None,
        }
    }

    /// The occurrence this withholding belongs to, rebuilt from the stored
    /// identifying fields.
    pub fn occurrence(&self) -> Option<Occurrence> {
        if let Some(id) = &self.bank_transaction_id {
            return Some(Occurrence::Transaction(id.clone()));
        }
        self.original_scheduled_date.map(Occurrence::ScheduledDate)
    }
}

/// One entry in the append-only transfer lifecycle log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerEvent {
    pub id: Uuid,
    pub transfer_id: Uuid,
    pub previous_status: Option<TransferStatus>,
    pub new_status: TransferStatus,
    /// Processor transfer id or URL, when the processor supplied one.
    pub processor_reference: Option<String>,
    pub recorded_at: DateTime<Utc>,
}

impl LedgerEvent {
    pub fn transition(
        transfer_id: Uuid,
        previous_status: Option<TransferStatus>,
        new_status: TransferStatus,
        processor_reference: Option<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            transfer_id,
            previous_status,
            new_status,
            processor_reference,
            recorded_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_is_deterministic_per_triple() {
        let agreement = Uuid::new_v4();
        let participant = Uuid::new_v4();
        let occurrence = Occurrence::Transaction("txn-123".to_string());

        let a = idempotency_token(agreement, participant, &occurrence);
        let b = idempotency_token(agreement, participant, &occurrence);
        assert_eq!(a, b);
    }

    #[test]
    fn token_differs_across_occurrences() {
        let agreement = Uuid::new_v4();
        let participant = Uuid::new_v4();

        let txn = idempotency_token(
            agreement,
            participant,
            &Occurrence::Transaction("txn-123".to_string()),
        );
        let date = idempotency_token(
            agreement,
            participant,
            &Occurrence::ScheduledDate(NaiveDate::from_ymd_opt(2026, 9, 1).unwrap()),
        );
        assert_ne!(txn, date);
    }

    #[test]
    fn token_differs_across_participants() {
        let agreement = Uuid::new_v4();
        let occurrence = Occurrence::Transaction("txn-123".to_string());

        let a = idempotency_token(agreement, Uuid::new_v4(), &occurrence);
        let b = idempotency_token(agreement, Uuid::new_v4(), &occurrence);
        assert_ne!(a, b);
    }

    #[test]
    fn transfer_status_rejects_unknown_values() {
        assert!("SETTLED".parse::<TransferStatus>().is_err());
        assert_eq!(
            "PROCESSED".parse::<TransferStatus>().unwrap(),
            TransferStatus::Processed
        );
    }

    #[test]
    fn withheld_transfer_rebuilds_its_occurrence() {
        let occurrence = Occurrence::Transaction("txn-9".to_string());
        let withheld = WithheldTransfer::new(
            Uuid::new_v4(),
            Uuid::new_v4(),
            WithholdingReason::InsufficientFunds,
            2500,
            &occurrence,
        );
        assert_eq!(withheld.occurrence(), Some(occurrence));
        assert!(!withheld.has_been_reconciled);
    }
}
