//! Domain entities for the expense-sharing engine.
//!
//! Everything here is a plain value struct with explicit foreign-key ids.
//! Related entities are resolved through repository calls, never lazy
//! loads, so state transitions stay auditable.

pub mod agreement;
pub mod bank;
pub mod transfer;
pub mod vendor;

pub use agreement::{
    Agreement, AgreementKind, Contribution, IntervalUnit, ParticipantAgreement, Recurrence,
};
pub use bank::BankTransaction;
pub use transfer::{
    idempotency_token, LedgerEvent, Occurrence, Transfer, TransferStatus, WithheldTransfer,
    WithholdingReason,
};
pub use vendor::{AssociationKind, Vendor, VendorAlias, VendorAssociation};
