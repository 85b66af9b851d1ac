//! Reconciliation sweep.
//!
//! Periodically revisits everything that did not finish cleanly: PENDING
//! and INITIATED transfers (timeouts, crashes) and unreconciled withheld
//! transfers. Insufficient-funds withholdings are retried; processor
//! failures (reason OTHER) wait for intervention and are never silently
//! retried.

use chrono::{DateTime, Utc};
use std::sync::Arc;

use crate::domain::{idempotency_token, TransferStatus, WithholdingReason};
use crate::error::AppError;
use crate::ports::{AgreementRepository, TransferRepository};
use crate::services::transfer_orchestrator::{ObligationOutcome, TransferOrchestrator};

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SweepReport {
    pub transfers_resumed: usize,
    pub withheld_examined: usize,
    pub withheld_reconciled: usize,
}

pub struct ReconciliationService {
    agreements: Arc<dyn AgreementRepository>,
    transfers: Arc<dyn TransferRepository>,
    orchestrator: Arc<TransferOrchestrator>,
}

impl ReconciliationService {
    pub fn new(
        agreements: Arc<dyn AgreementRepository>,
        transfers: Arc<dyn TransferRepository>,
        orchestrator: Arc<TransferOrchestrator>,
    ) -> Self {
        Self {
            agreements,
            transfers,
            orchestrator,
        }
    }

    pub async fn sweep(&self, now: DateTime<Utc>) -> Result<SweepReport, AppError> {
        let mut report = SweepReport::default();

        // In-flight transfers first: a timed-out submission parked in
        // PENDING gets its status looked up (or its token resubmitted)
        // before the withheld pass asks whether the obligation succeeded.
        for transfer in self.transfers.list_resumable().await? {
            report.transfers_resumed += 1;
            if let Err(err) = self.orchestrator.resume(transfer).await {
                tracing::error!(error = %err, "failed to resume transfer during sweep");
            }
        }

        for mut withheld in self.transfers.list_unreconciled().await? {
            report.withheld_examined += 1;

            let agreement = self.agreements.get_agreement(withheld.agreement_id).await?;
            if !agreement.is_active {
                continue;
            }

            let Some(occurrence) = withheld.occurrence() else {
                // Processor-failure withholdings carry no occurrence of
                // their own; their transfer row identifies the obligation.
                if withheld.reason == WithholdingReason::Other {
                    continue;
                }
                tracing::error!(withheld_id = %withheld.id, "withheld transfer has no occurrence");
                continue;
            };

            // Did a later attempt already satisfy this obligation?
            let token = idempotency_token(
                withheld.agreement_id,
                withheld.participant_agreement_id,
                &occurrence,
            );
            if let Some(transfer) = self.transfers.find_by_token(token).await? {
                if transfer.status == TransferStatus::Processed {
                    self.mark_reconciled(&mut withheld, now).await?;
                    report.withheld_reconciled += 1;
                    continue;
                }
            }

            if withheld.reason == WithholdingReason::Other && withheld.transfer_id.is_some() {
                // Terminal processor failure: manual intervention only.
                continue;
            }

            let participant = self
                .agreements
                .get_participant(withheld.participant_agreement_id)
                .await?;
            // A still-short balance refreshes the existing withholding, so
            // the row count for an obligation never grows across sweeps.
            let outcome = self
                .orchestrator
                .retry_withheld(&agreement, &participant, &occurrence, &mut withheld)
                .await?;

            if matches!(outcome, ObligationOutcome::Processed(_)) {
                self.mark_reconciled(&mut withheld, now).await?;
                report.withheld_reconciled += 1;
            }
        }

        tracing::info!(
            resumed = report.transfers_resumed,
            examined = report.withheld_examined,
            reconciled = report.withheld_reconciled,
            "reconciliation sweep finished"
        );
        Ok(report)
    }

    async fn mark_reconciled(
        &self,
        withheld: &mut crate::domain::WithheldTransfer,
        now: DateTime<Utc>,
    ) -> Result<(), AppError> {
        withheld.has_been_reconciled = true;
        withheld.reconciled_at = Some(now);
        self.transfers.update_withheld(withheld).await?;
        tracing::info!(withheld_id = %withheld.id, "withheld transfer reconciled");
        Ok(())
    }
}
