pub mod agreement_store;
pub mod reconciliation;
pub mod scheduler;
pub mod transfer_orchestrator;
pub mod trigger;
pub mod vendor_resolver;

pub use agreement_store::{AgreementStore, NewParticipant};
pub use reconciliation::{ReconciliationService, SweepReport};
pub use transfer_orchestrator::{ObligationOutcome, TransferOrchestrator, MAX_TRANSFER_ATTEMPTS};
pub use trigger::{TransferTrigger, TriggerDetector};
pub use vendor_resolver::VendorResolver;
