//! Postgres implementation of TransferRepository.

use async_trait::async_trait;
use chrono::NaiveDate;
use sqlx::PgPool;
use uuid::Uuid;

use crate::domain::{Transfer, TransferStatus, WithheldTransfer, WithholdingReason};
use crate::ports::{RepositoryError, RepositoryResult, TransferRepository};

#[derive(Clone)]
pub struct PostgresTransferRepository {
    pool: PgPool,
}

impl PostgresTransferRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TransferRepository for PostgresTransferRepository {
    async fn get_transfer(&self, id: Uuid) -> RepositoryResult<Transfer> {
        let row = sqlx::query_as::<_, TransferRow>("SELECT * FROM transfers WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(RepositoryError::from)?;

        row.map(|r| r.into_domain())
            .transpose()?
            .ok_or_else(|| RepositoryError::NotFound(id.to_string()))
    }

    async fn find_by_token(&self, token: Uuid) -> RepositoryResult<Option<Transfer>> {
        let row = sqlx::query_as::<_, TransferRow>(
            "SELECT * FROM transfers WHERE idempotency_token = $1",
        )
        .bind(token)
        .fetch_optional(&self.pool)
        .await
        .map_err(RepositoryError::from)?;

        row.map(|r| r.into_domain()).transpose()
    }

    async fn find_or_create(&self, transfer: &Transfer) -> RepositoryResult<(Transfer, bool)> {
        // The unique index on idempotency_token arbitrates races: the loser's
        // INSERT inserts nothing and the follow-up SELECT returns the
        // winner's row.
        let inserted = sqlx::query_as::<_, TransferRow>(
            r#"
            INSERT INTO transfers (
                id, agreement_id, participant_agreement_id, source_account_id,
                destination_account_id, total_amount, fee_amount, idempotency_token,
                attempt_count, status, scheduled_date, processor_transfer_id,
                created_at, completed_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            ON CONFLICT (idempotency_token) DO NOTHING
            RETURNING *
            "#,
        )
        .bind(transfer.id)
        .bind(transfer.agreement_id)
        .bind(transfer.participant_agreement_id)
        .bind(transfer.source_account_id)
        .bind(transfer.destination_account_id)
        .bind(transfer.total_amount)
        .bind(transfer.fee_amount)
        .bind(transfer.idempotency_token)
        .bind(transfer.attempt_count)
        .bind(transfer.status.to_string())
        .bind(transfer.scheduled_date)
        .bind(&transfer.processor_transfer_id)
        .bind(transfer.created_at)
        .bind(transfer.completed_at)
        .fetch_optional(&self.pool)
        .await
        .map_err(RepositoryError::from)?;

        if let Some(row) = inserted {
            return Ok((row.into_domain()?, true));
        }

        let existing = self
            .find_by_token(transfer.idempotency_token)
            .await?
            .ok_or_else(|| {
                RepositoryError::Database(format!(
                    "transfer with token {} vanished mid-insert",
                    transfer.idempotency_token
                ))
            })?;
        Ok((existing, false))
    }

    async fn update_transfer(&self, transfer: &Transfer) -> RepositoryResult<()> {
        sqlx::query(
            r#"
            UPDATE transfers
            SET attempt_count = $2, status = $3, processor_transfer_id = $4,
                completed_at = $5
            WHERE id = $1
            "#,
        )
        .bind(transfer.id)
        .bind(transfer.attempt_count)
        .bind(transfer.status.to_string())
        .bind(&transfer.processor_transfer_id)
        .bind(transfer.completed_at)
        .execute(&self.pool)
        .await
        .map_err(RepositoryError::from)?;

        Ok(())
    }

    async fn list_resumable(&self) -> RepositoryResult<Vec<Transfer>> {
        let rows = sqlx::query_as::<_, TransferRow>(
            r#"
            SELECT * FROM transfers
            WHERE status IN ('INITIATED', 'PENDING')
            ORDER BY created_at
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(RepositoryError::from)?;

        rows.into_iter().map(|r| r.into_domain()).collect()
    }

    async fn insert_withheld(
        &self,
        withheld: &WithheldTransfer,
    ) -> RepositoryResult<WithheldTransfer> {
        let row = sqlx::query_as::<_, WithheldRow>(
            r#"
            INSERT INTO withheld_transfers (
                id, transfer_id, agreement_id, participant_agreement_id, reason,
                attempted_amount, available_funds_at_attempt, attempted_at,
                has_been_reconciled, reconciled_at, original_scheduled_date,
                bank_transaction_id
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            RETURNING *
            "#,
        )
        .bind(withheld.id)
        .bind(withheld.transfer_id)
        .bind(withheld.agreement_id)
        .bind(withheld.participant_agreement_id)
        .bind(withheld.reason.to_string())
        .bind(withheld.attempted_amount)
        .bind(withheld.available_funds_at_attempt)
        .bind(withheld.attempted_at)
        .bind(withheld.has_been_reconciled)
        .bind(withheld.reconciled_at)
        .bind(withheld.original_scheduled_date)
        .bind(&withheld.bank_transaction_id)
        .fetch_one(&self.pool)
        .await
        .map_err(RepositoryError::from)?;

        row.into_domain()
    }

    async fn update_withheld(&self, withheld: &WithheldTransfer) -> RepositoryResult<()> {
        sqlx::query(
            r#"
            UPDATE withheld_transfers
            SET has_been_reconciled = $2,
                reconciled_at = $3,
                attempted_at = $4,
                available_funds_at_attempt = $5
            WHERE id = $1
            "#,
        )
        .bind(withheld.id)
        .bind(withheld.has_been_reconciled)
        .bind(withheld.reconciled_at)
        .bind(withheld.attempted_at)
        .bind(withheld.available_funds_at_attempt)
        .execute(&self.pool)
        .await
        .map_err(RepositoryError::from)?;

        Ok(())
    }

    async fn list_unreconciled(&self) -> RepositoryResult<Vec<WithheldTransfer>> {
        let rows = sqlx::query_as::<_, WithheldRow>(
            r#"
            SELECT * FROM withheld_transfers
            WHERE NOT has_been_reconciled
            ORDER BY attempted_at
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(RepositoryError::from)?;

        rows.into_iter().map(|r| r.into_domain()).collect()
    }
}

/// Internal row type for SQLx. Not exposed outside the adapter.
#[derive(Debug, sqlx::FromRow)]
struct TransferRow {
    id: Uuid,
    agreement_id: Uuid,
    participant_agreement_id: Uuid,
    source_account_id: Uuid,
    destination_account_id: Uuid,
    total_amount: i64,
    fee_amount: i64,
    idempotency_token: Uuid,
    attempt_count: i32,
    status: String,
    scheduled_date: Option<NaiveDate>,
    processor_transfer_id: Option<String>,
    created_at: chrono::DateTime<chrono::Utc>,
    completed_at: Option<chrono::DateTime<chrono::Utc>>,
}

impl TransferRow {
    fn into_domain(self) -> RepositoryResult<Transfer> {
        let status: TransferStatus = self.status.parse().map_err(RepositoryError::Corrupt)?;
        Ok(Transfer {
            id: self.id,
            agreement_id: self.agreement_id,
            participant_agreement_id: self.participant_agreement_id,
            source_account_id: self.source_account_id,
            destination_account_id: self.destination_account_id,
            total_amount: self.total_amount,
            fee_amount: self.fee_amount,
            idempotency_token: self.idempotency_token,
            attempt_count: self.attempt_count,
            status,
            scheduled_date: self.scheduled_date,
            processor_transfer_id: self.processor_transfer_id,
            created_at: self.created_at,
            completed_at: self.completed_at,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct WithheldRow {
    id: Uuid,
    transfer_id: Option<Uuid>,
    agreement_id: Uuid,
    participant_agreement_id: Uuid,
    reason: String,
    attempted_amount: i64,
    available_funds_at_attempt: Option<i64>,
    attempted_at: chrono::DateTime<chrono::Utc>,
    has_been_reconciled: bool,
    reconciled_at: Option<chrono::DateTime<chrono::Utc>>,
    original_scheduled_date: Option<NaiveDate>,
    bank_transaction_id: Option<String>,
}

impl WithheldRow {
    fn into_domain(self) -> RepositoryResult<WithheldTransfer> {
        let reason: WithholdingReason =
            self.reason.parse().map_err(RepositoryError::Corrupt)?;
        Ok(WithheldTransfer {
            id: self.id,
            transfer_id: self.transfer_id,
            agreement_id: self.agreement_id,
            participant_agreement_id: self.participant_agreement_id,
            reason,
            attempted_amount: self.attempted_amount,
            available_funds_at_attempt: self.available_funds_at_attempt,
            attempted_at: self.attempted_at,
            has_been_reconciled: self.has_been_reconciled,
            reconciled_at: self.reconciled_at,
            original_scheduled_date: self.original_scheduled_date,
            bank_transaction_id: self.bank_transaction_id,
        })
    }
}
