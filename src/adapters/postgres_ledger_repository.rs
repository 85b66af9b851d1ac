//! Postgres implementation of the append-only ledger.

use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use crate::domain::{LedgerEvent, TransferStatus};
use crate::ports::{LedgerRepository, RepositoryError, RepositoryResult};

#[derive(Clone)]
pub struct PostgresLedgerRepository {
    pool: PgPool,
}

impl PostgresLedgerRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl LedgerRepository for PostgresLedgerRepository {
    async fn append(&self, event: &LedgerEvent) -> RepositoryResult<()> {
        sqlx::query(
            r#"
            INSERT INTO ledger_events (
                id, transfer_id, previous_status, new_status,
                processor_reference, recorded_at
            ) VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(event.id)
        .bind(event.transfer_id)
        .bind(event.previous_status.map(|s| s.to_string()))
        .bind(event.new_status.to_string())
        .bind(&event.processor_reference)
        .bind(event.recorded_at)
        .execute(&self.pool)
        .await
        .map_err(RepositoryError::from)?;

        Ok(())
    }

    async fn events_for_transfer(&self, transfer_id: Uuid) -> RepositoryResult<Vec<LedgerEvent>> {
        let rows = sqlx::query_as::<_, LedgerEventRow>(
            "SELECT * FROM ledger_events WHERE transfer_id = $1 ORDER BY recorded_at",
        )
        .bind(transfer_id)
        .fetch_all(&self.pool)
        .await
        .map_err(RepositoryError::from)?;

        rows.into_iter().map(|r| r.into_domain()).collect()
    }
}

#[derive(Debug, sqlx::FromRow)]
struct LedgerEventRow {
    id: Uuid,
    transfer_id: Uuid,
    previous_status: Option<String>,
    new_status: String,
    processor_reference: Option<String>,
    recorded_at: chrono::DateTime<chrono::Utc>,
}

impl LedgerEventRow {
    fn into_domain(self) -> RepositoryResult<LedgerEvent> {
        let previous_status = self
            .previous_status
            .map(|s| s.parse::<TransferStatus>())
            .transpose()
            .map_err(RepositoryError::Corrupt)?;
        let new_status: TransferStatus =
            self.new_status.parse().map_err(RepositoryError::Corrupt)?;
        Ok(LedgerEvent {
            id: self.id,
            transfer_id: self.transfer_id,
            previous_status,
            new_status,
            processor_reference: self.processor_reference,
            recorded_at: self.recorded_at,
        })
    }
}
