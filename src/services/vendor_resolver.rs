//! Vendor identity resolution.
//!
//! Maps noisy bank-supplied merchant strings to a stable vendor identity.
//! Alias rows are append-only: a raw name, once seen, is permanently bound
//! to one vendor.

use std::sync::Arc;
use uuid::Uuid;

use crate::domain::{AssociationKind, Vendor, VendorAlias, VendorAssociation};
use crate::ports::{RepositoryError, RepositoryResult, VendorRepository};
use crate::validation::sanitize_string;

/// Raw-name fragments that can never identify a merchant. With no ppd_id to
/// fall back on, these resolve to the sentinel vendor instead of fabricating
/// a false match.
const NON_IDENTIFYING_PATTERNS: &[&str] = &[
    "interest payment",
    "check withdrawal",
    "atm withdrawal",
    "cash withdrawal",
    "payment to",
    "transfer",
    "deposit",
];

pub struct VendorResolver {
    vendors: Arc<dyn VendorRepository>,
}

impl VendorResolver {
    pub fn new(vendors: Arc<dyn VendorRepository>) -> Self {
        Self { vendors }
    }

    /// Resolve a raw merchant name (plus optional ACH originator id) to a
    /// vendor. Lookup order:
    ///
    /// 1. exact match on a previously seen alias string;
    /// 2. ppd_id match, which survives merchant-name drift; the drifted
    ///    name is appended as a new alias;
    /// 3. non-identifying pattern with no ppd_id resolves to the sentinel;
    /// 4. otherwise a new vendor plus alias is created, flagged for review.
    pub async fn resolve(
        &self,
        raw_name: &str,
        ppd_id: Option<&str>,
    ) -> RepositoryResult<Vendor> {
        let raw_name = sanitize_string(raw_name);

        if let Some(alias) = self.vendors.find_alias(&raw_name).await? {
            return self.vendors.get_vendor(alias.vendor_id).await;
        }

        if let Some(ppd_id) = ppd_id {
            if let Some(vendor) = self.vendors.find_by_ppd_id(ppd_id).await? {
                // Name drift on a known originator: remember the new
                // spelling so step 1 catches it next time.
                self.append_alias(vendor.id, &raw_name).await?;
                return Ok(vendor);
            }
        }

        if ppd_id.is_none() && is_non_identifying(&raw_name) {
            tracing::debug!(raw_name, "merchant identity cannot be determined");
            return self.sentinel().await;
        }

        self.create_vendor(&raw_name, ppd_id).await
    }

    /// Record an informational association between two vendors (e.g. a
    /// parent company). Identity is never merged.
    pub async fn associate_vendors(
        &self,
        vendor_id: Uuid,
        associated_vendor_id: Uuid,
        kind: AssociationKind,
    ) -> RepositoryResult<VendorAssociation> {
        let association = VendorAssociation::new(vendor_id, associated_vendor_id, kind);
        self.vendors.insert_association(&association).await
    }

    /// Ops reviewed a newly seen vendor and settled on a display name.
    /// Alias rows keep the original transaction spelling.
    pub async fn mark_reviewed(
        &self,
        vendor_id: Uuid,
        friendly_name: &str,
    ) -> RepositoryResult<Vendor> {
        let mut vendor = self.vendors.get_vendor(vendor_id).await?;
        vendor.friendly_name = sanitize_string(friendly_name);
        vendor.has_been_reviewed = true;
        self.vendors.update_vendor(&vendor).await?;
        Ok(vendor)
    }

    async fn create_vendor(
        &self,
        raw_name: &str,
        ppd_id: Option<&str>,
    ) -> RepositoryResult<Vendor> {
        let vendor = Vendor::new(raw_name, ppd_id.map(str::to_string));
        let vendor = self.vendors.insert_vendor(&vendor).await?;

        match self.append_alias(vendor.id, raw_name).await {
            Ok(()) => Ok(vendor),
            // Concurrent batches can race on a first-seen name. The alias
            // unique constraint picks a winner; the loser adopts its vendor.
            Err(RepositoryError::Conflict(_)) => {
                tracing::warn!(raw_name, "lost alias insert race, adopting existing vendor");
                match self.vendors.find_alias(raw_name).await? {
                    Some(alias) => self.vendors.get_vendor(alias.vendor_id).await,
                    None => Err(RepositoryError::Conflict(format!(
                        "alias for {} vanished after conflict",
                        raw_name
                    ))),
                }
            }
            Err(other) => Err(other),
        }
    }

    async fn append_alias(&self, vendor_id: Uuid, raw_name: &str) -> RepositoryResult<()> {
        let alias = VendorAlias::new(vendor_id, raw_name);
        self.vendors.insert_alias(&alias).await.map(|_| ())
    }

    /// The lazily created "identity cannot be determined" vendor.
    async fn sentinel(&self) -> RepositoryResult<Vendor> {
        if let Some(vendor) = self.vendors.find_sentinel().await? {
            return Ok(vendor);
        }
        self.vendors.insert_vendor(&Vendor::sentinel()).await
    }
}

fn is_non_identifying(raw_name: &str) -> bool {
    let lowered = raw_name.to_lowercase();
    NON_IDENTIFYING_PATTERNS
        .iter()
        .any(|pattern| lowered.contains(pattern))
}
