//! Ports consumed by the services. Postgres adapters live in
//! `crate::adapters`; in-memory implementations for tests live in
//! `crate::testing`.

use async_trait::async_trait;
use chrono::NaiveDate;
use thiserror::Error;
use uuid::Uuid;

use crate::domain::{
    Agreement, LedgerEvent, ParticipantAgreement, Transfer, Vendor, VendorAlias,
    VendorAssociation, WithheldTransfer,
};

#[derive(Error, Debug)]
pub enum RepositoryError {
    #[error("not found: {0}")]
    NotFound(String),

    /// A storage-level uniqueness constraint fired.
    #[error("conflict: {0}")]
    Conflict(String),

    #[error("database error: {0}")]
    Database(String),

    /// A persisted value could not be decoded (e.g. unknown enum string).
    #[error("corrupt row: {0}")]
    Corrupt(String),
}

impl From<sqlx::Error> for RepositoryError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::RowNotFound => RepositoryError::NotFound(err.to_string()),
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                RepositoryError::Conflict(err.to_string())
            }
            _ => RepositoryError::Database(err.to_string()),
        }
    }
}

pub type RepositoryResult<T> = Result<T, RepositoryError>;

#[async_trait]
pub trait VendorRepository: Send + Sync {
    async fn insert_vendor(&self, vendor: &Vendor) -> RepositoryResult<Vendor>;
    async fn update_vendor(&self, vendor: &Vendor) -> RepositoryResult<()>;
    async fn get_vendor(&self, id: Uuid) -> RepositoryResult<Vendor>;
    async fn find_by_ppd_id(&self, ppd_id: &str) -> RepositoryResult<Option<Vendor>>;
    /// The lazily created "identity cannot be determined" vendor, if any.
    async fn find_sentinel(&self) -> RepositoryResult<Option<Vendor>>;

    async fn find_alias(&self, raw_name: &str) -> RepositoryResult<Option<VendorAlias>>;
    /// Fails with `Conflict` when the raw name is already bound.
    async fn insert_alias(&self, alias: &VendorAlias) -> RepositoryResult<VendorAlias>;

    async fn insert_association(
        &self,
        association: &VendorAssociation,
    ) -> RepositoryResult<VendorAssociation>;
}

#[async_trait]
pub trait AgreementRepository: Send + Sync {
    async fn insert_agreement(&self, agreement: &Agreement) -> RepositoryResult<Agreement>;
    async fn update_agreement(&self, agreement: &Agreement) -> RepositoryResult<()>;
    async fn get_agreement(&self, id: Uuid) -> RepositoryResult<Agreement>;

    /// The active vendor-triggered agreement watching (vendor, source
    /// account), if one exists. At most one agreement is returned; a
    /// transaction can trigger at most one agreement.
    async fn find_active_vendor_agreement(
        &self,
        vendor_id: Uuid,
        source_account_id: Uuid,
    ) -> RepositoryResult<Option<Agreement>>;

    /// Active recurring agreements whose next scheduled date has arrived.
    async fn list_due_recurring(&self, today: NaiveDate) -> RepositoryResult<Vec<Agreement>>;

    async fn insert_participant(
        &self,
        participant: &ParticipantAgreement,
    ) -> RepositoryResult<ParticipantAgreement>;
    async fn update_participant(
        &self,
        participant: &ParticipantAgreement,
    ) -> RepositoryResult<()>;
    async fn get_participant(&self, id: Uuid) -> RepositoryResult<ParticipantAgreement>;
    async fn list_participants(
        &self,
        agreement_id: Uuid,
    ) -> RepositoryResult<Vec<ParticipantAgreement>>;
    async fn find_unconverted_invites(
        &self,
        email: &str,
    ) -> RepositoryResult<Vec<ParticipantAgreement>>;
}

#[async_trait]
pub trait TransferRepository: Send + Sync {
    async fn get_transfer(&self, id: Uuid) -> RepositoryResult<Transfer>;
    async fn find_by_token(&self, token: Uuid) -> RepositoryResult<Option<Transfer>>;

    /// Atomic lookup-or-create keyed by the idempotency token. When two
    /// callers race on the same obligation, the loser receives the winner's
    /// row instead of an error. The flag is true when this call inserted
    /// the row.
    async fn find_or_create(&self, transfer: &Transfer) -> RepositoryResult<(Transfer, bool)>;

    async fn update_transfer(&self, transfer: &Transfer) -> RepositoryResult<()>;

    /// Transfers the sweep should pick back up: INITIATED and PENDING rows.
    async fn list_resumable(&self) -> RepositoryResult<Vec<Transfer>>;

    async fn insert_withheld(
        &self,
        withheld: &WithheldTransfer,
    ) -> RepositoryResult<WithheldTransfer>;
    async fn update_withheld(&self, withheld: &WithheldTransfer) -> RepositoryResult<()>;
    async fn list_unreconciled(&self) -> RepositoryResult<Vec<WithheldTransfer>>;
}

#[async_trait]
pub trait LedgerRepository: Send + Sync {
    /// Append-only. There is deliberately no update operation.
    async fn append(&self, event: &LedgerEvent) -> RepositoryResult<()>;
    async fn events_for_transfer(&self, transfer_id: Uuid) -> RepositoryResult<Vec<LedgerEvent>>;
}

/// Routing details for an account, as reported by the bank-data provider.
#[derive(Debug, Clone)]
pub struct RoutingInfo {
    pub account_number: String,
    pub routing_number: String,
}

/// Fire-and-forget notification collaborator. Failures are logged by
/// implementations and never surface to the orchestrator.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, user_id: Uuid, template: &str, payload: serde_json::Value);
}

/// Default notifier that only logs. Delivery transports are out of scope
/// for this core.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, user_id: Uuid, template: &str, payload: serde_json::Value) {
        tracing::info!(%user_id, template, %payload, "notification dispatched");
    }
}
