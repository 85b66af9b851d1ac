//! Postgres implementation of VendorRepository.

use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use crate::domain::{AssociationKind, Vendor, VendorAlias, VendorAssociation};
use crate::ports::{RepositoryError, RepositoryResult, VendorRepository};

#[derive(Clone)]
pub struct PostgresVendorRepository {
    pool: PgPool,
}

impl PostgresVendorRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl VendorRepository for PostgresVendorRepository {
    async fn insert_vendor(&self, vendor: &Vendor) -> RepositoryResult<Vendor> {
        let row = sqlx::query_as::<_, VendorRow>(
            r#"
            INSERT INTO vendors (
                id, friendly_name, ppd_id, has_been_reviewed,
                identity_cannot_be_determined, created_at
            ) VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING id, friendly_name, ppd_id, has_been_reviewed,
                identity_cannot_be_determined, created_at
            "#,
        )
        .bind(vendor.id)
        .bind(&vendor.friendly_name)
        .bind(&vendor.ppd_id)
        .bind(vendor.has_been_reviewed)
        .bind(vendor.identity_cannot_be_determined)
        .bind(vendor.created_at)
        .fetch_one(&self.pool)
        .await
        .map_err(RepositoryError::from)?;

        Ok(row.into_domain())
    }

    async fn update_vendor(&self, vendor: &Vendor) -> RepositoryResult<()> {
        sqlx::query(
            r#"
            UPDATE vendors
            SET friendly_name = $2, ppd_id = $3, has_been_reviewed = $4,
                identity_cannot_be_determined = $5
            WHERE id = $1
            "#,
        )
        .bind(vendor.id)
        .bind(&vendor.friendly_name)
        .bind(&vendor.ppd_id)
        .bind(vendor.has_been_reviewed)
        .bind(vendor.identity_cannot_be_determined)
        .execute(&self.pool)
        .await
        .map_err(RepositoryError::from)?;

        Ok(())
    }

    async fn get_vendor(&self, id: Uuid) -> RepositoryResult<Vendor> {
        let row = sqlx::query_as::<_, VendorRow>("SELECT * FROM vendors WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(RepositoryError::from)?;

        row.map(|r| r.into_domain())
            .ok_or_else(|| RepositoryError::NotFound(id.to_string()))
    }

    async fn find_by_ppd_id(&self, ppd_id: &str) -> RepositoryResult<Option<Vendor>> {
        let row = sqlx::query_as::<_, VendorRow>("SELECT * FROM vendors WHERE ppd_id = $1")
            .bind(ppd_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(RepositoryError::from)?;

        Ok(row.map(|r| r.into_domain()))
    }

    async fn find_sentinel(&self) -> RepositoryResult<Option<Vendor>> {
        let row = sqlx::query_as::<_, VendorRow>(
            "SELECT * FROM vendors WHERE identity_cannot_be_determined LIMIT 1",
        )
        .fetch_optional(&self.pool)
        .await
        .map_err(RepositoryError::from)?;

        Ok(row.map(|r| r.into_domain()))
    }

    async fn find_alias(&self, raw_name: &str) -> RepositoryResult<Option<VendorAlias>> {
        let row = sqlx::query_as::<_, VendorAliasRow>(
            "SELECT * FROM vendor_aliases WHERE raw_name = $1",
        )
        .bind(raw_name)
        .fetch_optional(&self.pool)
        .await
        .map_err(RepositoryError::from)?;

        Ok(row.map(|r| r.into_domain()))
    }

    async fn insert_alias(&self, alias: &VendorAlias) -> RepositoryResult<VendorAlias> {
        let row = sqlx::query_as::<_, VendorAliasRow>(
            r#"
            INSERT INTO vendor_aliases (id, vendor_id, raw_name, created_at)
            VALUES ($1, $2, $3, $4)
            RETURNING id, vendor_id, raw_name, created_at
            "#,
        )
        .bind(alias.id)
        .bind(alias.vendor_id)
        .bind(&alias.raw_name)
        .bind(alias.created_at)
        .fetch_one(&self.pool)
        .await
        .map_err(RepositoryError::from)?;

        Ok(row.into_domain())
    }

    async fn insert_association(
        &self,
        association: &VendorAssociation,
    ) -> RepositoryResult<VendorAssociation> {
        let row = sqlx::query_as::<_, VendorAssociationRow>(
            r#"
            INSERT INTO vendor_associations (
                id, vendor_id, associated_vendor_id, kind, notes, created_at
            ) VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING id, vendor_id, associated_vendor_id, kind, notes, created_at
            "#,
        )
        .bind(association.id)
        .bind(association.vendor_id)
        .bind(association.associated_vendor_id)
        .bind(association.kind.to_string())
        .bind(&association.notes)
        .bind(association.created_at)
        .fetch_one(&self.pool)
        .await
        .map_err(RepositoryError::from)?;

        row.into_domain()
    }
}

/// Internal row type for SQLx. Not exposed outside the adapter.
#[derive(Debug, sqlx::FromRow)]
struct VendorRow {
    id: Uuid,
    friendly_name: String,
    ppd_id: Option<String>,
    has_been_reviewed: bool,
    identity_cannot_be_determined: bool,
    created_at: chrono::DateTime<chrono::Utc>,
}

impl VendorRow {
    fn into_domain(self) -> Vendor {
        Vendor {
            id: self.id,
            friendly_name: self.friendly_name,
            ppd_id: self.ppd_id,
            has_been_reviewed: self.has_been_reviewed,
            identity_cannot_be_determined: self.identity_cannot_be_determined,
            created_at: self.created_at,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct VendorAliasRow {
    id: Uuid,
    vendor_id: Uuid,
    raw_name: String,
    created_at: chrono::DateTime<chrono::Utc>,
}

impl VendorAliasRow {
    fn into_domain(self) -> VendorAlias {
        VendorAlias {
            id: self.id,
            vendor_id: self.vendor_id,
            raw_name: self.raw_name,
            created_at: self.created_at,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct VendorAssociationRow {
    id: Uuid,
    vendor_id: Uuid,
    associated_vendor_id: Uuid,
    kind: String,
    notes: Option<String>,
    created_at: chrono::DateTime<chrono::Utc>,
}

impl VendorAssociationRow {
    fn into_domain(self) -> RepositoryResult<VendorAssociation> {
        let kind: AssociationKind = self
            .kind
            .parse()
            .map_err(RepositoryError::Corrupt)?;
        Ok(VendorAssociation {
            id: self.id,
            vendor_id: self.vendor_id,
            associated_vendor_id: self.associated_vendor_id,
            kind,
            notes: self.notes,
            created_at: self.created_at,
        })
    }
}
