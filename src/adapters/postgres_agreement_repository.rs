//! Postgres implementation of AgreementRepository.

use async_trait::async_trait;
use chrono::NaiveDate;
use sqlx::PgPool;
use uuid::Uuid;

use crate::domain::{
    Agreement, AgreementKind, Contribution, IntervalUnit, ParticipantAgreement, Recurrence,
};
use crate::ports::{AgreementRepository, RepositoryError, RepositoryResult};

#[derive(Clone)]
pub struct PostgresAgreementRepository {
    pool: PgPool,
}

impl PostgresAgreementRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AgreementRepository for PostgresAgreementRepository {
    async fn insert_agreement(&self, agreement: &Agreement) -> RepositoryResult<Agreement> {
        let recurrence = agreement.recurrence.as_ref();
        let row = sqlx::query_as::<_, AgreementRow>(
            r#"
            INSERT INTO agreements (
                id, owner_user_id, owner_source_account_id, owner_destination_account_id,
                nickname, kind, vendor_id, recurrence_interval, recurrence_frequency,
                next_scheduled_date, recurrence_end_date, is_active, is_pending,
                created_at, deactivated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
            RETURNING *
            "#,
        )
        .bind(agreement.id)
        .bind(agreement.owner_user_id)
        .bind(agreement.owner_source_account_id)
        .bind(agreement.owner_destination_account_id)
        .bind(&agreement.nickname)
        .bind(agreement.kind.to_string())
        .bind(agreement.vendor_id)
        .bind(recurrence.map(|r| r.interval.to_string()))
        .bind(recurrence.map(|r| r.frequency as i32))
        .bind(recurrence.map(|r| r.next_scheduled_date))
        .bind(recurrence.and_then(|r| r.end_date))
        .bind(agreement.is_active)
        .bind(agreement.is_pending)
        .bind(agreement.created_at)
        .bind(agreement.deactivated_at)
        .fetch_one(&self.pool)
        .await
        .map_err(RepositoryError::from)?;

        row.into_domain()
    }

    async fn update_agreement(&self, agreement: &Agreement) -> RepositoryResult<()> {
        let recurrence = agreement.recurrence.as_ref();
        sqlx::query(
            r#"
            UPDATE agreements
            SET nickname = $2, next_scheduled_date = $3, recurrence_end_date = $4,
                is_active = $5, is_pending = $6, deactivated_at = $7
            WHERE id = $1
            "#,
        )
        .bind(agreement.id)
        .bind(&agreement.nickname)
        .bind(recurrence.map(|r| r.next_scheduled_date))
        .bind(recurrence.and_then(|r| r.end_date))
        .bind(agreement.is_active)
        .bind(agreement.is_pending)
        .bind(agreement.deactivated_at)
        .execute(&self.pool)
        .await
        .map_err(RepositoryError::from)?;

        Ok(())
    }

    async fn get_agreement(&self, id: Uuid) -> RepositoryResult<Agreement> {
        let row = sqlx::query_as::<_, AgreementRow>("SELECT * FROM agreements WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(RepositoryError::from)?;

        row.map(|r| r.into_domain())
            .transpose()?
            .ok_or_else(|| RepositoryError::NotFound(id.to_string()))
    }

    async fn find_active_vendor_agreement(
        &self,
        vendor_id: Uuid,
        source_account_id: Uuid,
    ) -> RepositoryResult<Option<Agreement>> {
        let row = sqlx::query_as::<_, AgreementRow>(
            r#"
            SELECT * FROM agreements
            WHERE is_active AND kind = 'VENDOR_TRIGGERED'
              AND vendor_id = $1 AND owner_source_account_id = $2
            LIMIT 1
            "#,
        )
        .bind(vendor_id)
        .bind(source_account_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(RepositoryError::from)?;

        row.map(|r| r.into_domain()).transpose()
    }

    async fn list_due_recurring(&self, today: NaiveDate) -> RepositoryResult<Vec<Agreement>> {
        let rows = sqlx::query_as::<_, AgreementRow>(
            r#"
            SELECT * FROM agreements
            WHERE is_active AND kind = 'RECURRING_DATE' AND next_scheduled_date <= $1
            ORDER BY next_scheduled_date
            "#,
        )
        .bind(today)
        .fetch_all(&self.pool)
        .await
        .map_err(RepositoryError::from)?;

        rows.into_iter().map(|r| r.into_domain()).collect()
    }

    async fn insert_participant(
        &self,
        participant: &ParticipantAgreement,
    ) -> RepositoryResult<ParticipantAgreement> {
        let row = sqlx::query_as::<_, ParticipantRow>(
            r#"
            INSERT INTO participant_agreements (
                id, agreement_id, user_id, invite_email, is_converted,
                contribution_kind, contribution_value, payment_account_id,
                is_active, is_pending, created_at, activated_at, deactivated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            RETURNING *
            "#,
        )
        .bind(participant.id)
        .bind(participant.agreement_id)
        .bind(participant.user_id)
        .bind(&participant.invite_email)
        .bind(participant.is_converted)
        .bind(participant.contribution.kind())
        .bind(participant.contribution.value())
        .bind(participant.payment_account_id)
        .bind(participant.is_active)
        .bind(participant.is_pending)
        .bind(participant.created_at)
        .bind(participant.activated_at)
        .bind(participant.deactivated_at)
        .fetch_one(&self.pool)
        .await
        .map_err(RepositoryError::from)?;

        row.into_domain()
    }

    async fn update_participant(
        &self,
        participant: &ParticipantAgreement,
    ) -> RepositoryResult<()> {
        sqlx::query(
            r#"
            UPDATE participant_agreements
            SET user_id = $2, is_converted = $3, payment_account_id = $4,
                is_active = $5, is_pending = $6, activated_at = $7, deactivated_at = $8
            WHERE id = $1
            "#,
        )
        .bind(participant.id)
        .bind(participant.user_id)
        .bind(participant.is_converted)
        .bind(participant.payment_account_id)
        .bind(participant.is_active)
        .bind(participant.is_pending)
        .bind(participant.activated_at)
        .bind(participant.deactivated_at)
        .execute(&self.pool)
        .await
        .map_err(RepositoryError::from)?;

        Ok(())
    }

    async fn get_participant(&self, id: Uuid) -> RepositoryResult<ParticipantAgreement> {
        let row = sqlx::query_as::<_, ParticipantRow>(
            "SELECT * FROM participant_agreements WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(RepositoryError::from)?;

        row.map(|r| r.into_domain())
            .transpose()?
            .ok_or_else(|| RepositoryError::NotFound(id.to_string()))
    }

    async fn list_participants(
        &self,
        agreement_id: Uuid,
    ) -> RepositoryResult<Vec<ParticipantAgreement>> {
        let rows = sqlx::query_as::<_, ParticipantRow>(
            "SELECT * FROM participant_agreements WHERE agreement_id = $1 ORDER BY id",
        )
        .bind(agreement_id)
        .fetch_all(&self.pool)
        .await
        .map_err(RepositoryError::from)?;

        rows.into_iter().map(|r| r.into_domain()).collect()
    }

    async fn find_unconverted_invites(
        &self,
        email: &str,
    ) -> RepositoryResult<Vec<ParticipantAgreement>> {
        let rows = sqlx::query_as::<_, ParticipantRow>(
            r#"
            SELECT * FROM participant_agreements
            WHERE NOT is_converted AND invite_email = $1
            ORDER BY id
            "#,
        )
        .bind(email)
        .fetch_all(&self.pool)
        .await
        .map_err(RepositoryError::from)?;

        rows.into_iter().map(|r| r.into_domain()).collect()
    }
}

/// Internal row type for SQLx. Recurrence columns are flattened; either all
/// of interval/frequency/date are present or none are.
#[derive(Debug, sqlx::FromRow)]
struct AgreementRow {
    id: Uuid,
    owner_user_id: Uuid,
    owner_source_account_id: Uuid,
    owner_destination_account_id: Uuid,
    nickname: String,
    kind: String,
    vendor_id: Option<Uuid>,
    recurrence_interval: Option<String>,
    recurrence_frequency: Option<i32>,
    next_scheduled_date: Option<NaiveDate>,
    recurrence_end_date: Option<NaiveDate>,
    is_active: bool,
    is_pending: bool,
    created_at: chrono::DateTime<chrono::Utc>,
    deactivated_at: Option<chrono::DateTime<chrono::Utc>>,
}

impl AgreementRow {
    fn into_domain(self) -> RepositoryResult<Agreement> {
        let kind: AgreementKind = self.kind.parse().map_err(RepositoryError::Corrupt)?;

        let recurrence = match (
            self.recurrence_interval,
            self.recurrence_frequency,
            self.next_scheduled_date,
        ) {
            (Some(interval), Some(frequency), Some(next_scheduled_date)) => {
                let interval: IntervalUnit =
                    interval.parse().map_err(RepositoryError::Corrupt)?;
                Some(Recurrence {
                    interval,
                    frequency: frequency as u32,
                    next_scheduled_date,
                    end_date: self.recurrence_end_date,
                })
            }
            (None, None, None) => None,
            _ => {
                return Err(RepositoryError::Corrupt(format!(
                    "agreement {} has partial recurrence columns",
                    self.id
                )))
            }
        };

        Ok(Agreement {
            id: self.id,
            owner_user_id: self.owner_user_id,
            owner_source_account_id: self.owner_source_account_id,
            owner_destination_account_id: self.owner_destination_account_id,
            nickname: self.nickname,
            kind,
            vendor_id: self.vendor_id,
            recurrence,
            is_active: self.is_active,
            is_pending: self.is_pending,
            created_at: self.created_at,
            deactivated_at: self.deactivated_at,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct ParticipantRow {
    id: Uuid,
    agreement_id: Uuid,
    user_id: Option<Uuid>,
    invite_email: Option<String>,
    is_converted: bool,
    contribution_kind: String,
    contribution_value: Option<i64>,
    payment_account_id: Option<Uuid>,
    is_active: bool,
    is_pending: bool,
    created_at: chrono::DateTime<chrono::Utc>,
    activated_at: Option<chrono::DateTime<chrono::Utc>>,
    deactivated_at: Option<chrono::DateTime<chrono::Utc>>,
}

impl ParticipantRow {
    fn into_domain(self) -> RepositoryResult<ParticipantAgreement> {
        let contribution =
            Contribution::from_parts(&self.contribution_kind, self.contribution_value)
                .map_err(RepositoryError::Corrupt)?;
        Ok(ParticipantAgreement {
            id: self.id,
            agreement_id: self.agreement_id,
            user_id: self.user_id,
            invite_email: self.invite_email,
            is_converted: self.is_converted,
            contribution,
            payment_account_id: self.payment_account_id,
            is_active: self.is_active,
            is_pending: self.is_pending,
            created_at: self.created_at,
            activated_at: self.activated_at,
            deactivated_at: self.deactivated_at,
        })
    }
}
