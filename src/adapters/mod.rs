//! Postgres adapters for the repository ports.

mod postgres_agreement_repository;
mod postgres_ledger_repository;
mod postgres_transfer_repository;
mod postgres_vendor_repository;

pub use postgres_agreement_repository::PostgresAgreementRepository;
pub use postgres_ledger_repository::PostgresLedgerRepository;
pub use postgres_transfer_repository::PostgresTransferRepository;
pub use postgres_vendor_repository::PostgresVendorRepository;
