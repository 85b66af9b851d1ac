//! Canonical vendor identity and the raw merchant names bound to it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// A canonical vendor. Bank-supplied merchant strings (aliases) all point at
/// one of these.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Vendor {
    pub id: Uuid,
    pub friendly_name: String,
    /// ACH originator id, when the bank provider supplied one. Stable across
    /// merchant-name drift.
    pub ppd_id: Option<String>,
    pub has_been_reviewed: bool,
    /// Sentinel flag for raw names that can never identify a merchant
    /// ("Interest Payment" and friends). A vendor with this flag never
    /// satisfies a vendor-triggered agreement.
    pub identity_cannot_be_determined: bool,
    pub created_at: DateTime<Utc>,
}

impl Vendor {
    pub fn new(friendly_name: impl Into<String>, ppd_id: Option<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            friendly_name: friendly_name.into(),
            ppd_id,
            has_been_reviewed: false,
            identity_cannot_be_determined: false,
            created_at: Utc::now(),
        }
    }

    /// The "identity cannot be determined" sentinel.
    pub fn sentinel() -> Self {
        Self {
            id: Uuid::new_v4(),
            friendly_name: "Unknown".to_string(),
            ppd_id: None,
            has_been_reviewed: true,
            identity_cannot_be_determined: true,
            created_at: Utc::now(),
        }
    }
}

/// A raw merchant string as it appeared on a bank transaction. Append-only:
/// once a raw name is bound to a vendor it is never re-bound.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VendorAlias {
    pub id: Uuid,
    pub vendor_id: Uuid,
    pub raw_name: String,
    pub created_at: DateTime<Utc>,
}

impl VendorAlias {
    pub fn new(vendor_id: Uuid, raw_name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            vendor_id,
            raw_name: raw_name.into(),
            created_at: Utc::now(),
        }
    }
}

/// Informational link between two vendors (e.g. parent company). Never
/// merges identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VendorAssociation {
    pub id: Uuid,
    pub vendor_id: Uuid,
    pub associated_vendor_id: Uuid,
    pub kind: AssociationKind,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl VendorAssociation {
    pub fn new(vendor_id: Uuid, associated_vendor_id: Uuid, kind: AssociationKind) -> Self {
        Self {
            id: Uuid::new_v4(),
            vendor_id,
            associated_vendor_id,
            kind,
            notes: None,
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AssociationKind {
    ParentCompany,
    Other,
}

impl fmt::Display for AssociationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let value = match self {
            AssociationKind::ParentCompany => "PARENT_COMPANY",
            AssociationKind::Other => "OTHER",
        };
        write!(f, "{}", value)
    }
}

impl FromStr for AssociationKind {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "PARENT_COMPANY" => Ok(AssociationKind::ParentCompany),
            "OTHER" => Ok(AssociationKind::Other),
            other => Err(format!("unknown association kind: {}", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_vendor_requires_review() {
        let vendor = Vendor::new("Netflix", None);
        assert!(!vendor.has_been_reviewed);
        assert!(!vendor.identity_cannot_be_determined);
    }

    #[test]
    fn sentinel_vendor_is_undeterminable() {
        let vendor = Vendor::sentinel();
        assert!(vendor.identity_cannot_be_determined);
    }

    #[test]
    fn association_kind_round_trips() {
        for kind in [AssociationKind::ParentCompany, AssociationKind::Other] {
            let parsed: AssociationKind = kind.to_string().parse().unwrap();
            assert_eq!(parsed, kind);
        }
        assert!("SUBSIDIARY".parse::<AssociationKind>().is_err());
    }
}
