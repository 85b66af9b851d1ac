//! Transfer Orchestrator.
//!
//! Owns Transfer and WithheldTransfer rows and drives each obligation
//! through INITIATED → PENDING → {PROCESSED | FAILED}. Every failure path
//! leaves either a PENDING transfer or a WithheldTransfer behind, so an
//! obligation can always be found again and eventually reconciled.

use std::sync::Arc;
use chrono::Utc;
use serde_json::json;
use uuid::Uuid;

use crate::allocation::{self, ContributionTerm};
use crate::domain::{
    idempotency_token, Agreement, LedgerEvent, Occurrence, ParticipantAgreement, Transfer,
    TransferStatus, WithheldTransfer, WithholdingReason,
};
use crate::error::AppError;
use crate::ports::{AgreementRepository, LedgerRepository, Notifier, TransferRepository};
use crate::processor::{ProcessorError, ProcessorTransferStatus, TransferProcessor, TransferRequest};
use crate::services::trigger::TransferTrigger;

/// Transient-failure ceiling. Past this the obligation downgrades to a
/// terminal failure and waits for manual or policy-driven intervention.
pub const MAX_TRANSFER_ATTEMPTS: i32 = 5;

/// We started out planning a flat service fee and then dropped fees
/// entirely. The column stays; the amount is zero.
fn fee_for(_total_amount: i64) -> i64 {
    0
}

/// What became of one (agreement, participant, occurrence) obligation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ObligationOutcome {
    Processed(Uuid),
    Pending(Uuid),
    Failed(Uuid),
    Withheld(Uuid),
    Skipped,
}

pub struct TransferOrchestrator {
    agreements: Arc<dyn AgreementRepository>,
    transfers: Arc<dyn TransferRepository>,
    ledger: Arc<dyn LedgerRepository>,
    processor: Arc<dyn TransferProcessor>,
    notifier: Arc<dyn Notifier>,
}

impl TransferOrchestrator {
    pub fn new(
        agreements: Arc<dyn AgreementRepository>,
        transfers: Arc<dyn TransferRepository>,
        ledger: Arc<dyn LedgerRepository>,
        processor: Arc<dyn TransferProcessor>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            agreements,
            transfers,
            ledger,
            processor,
            notifier,
        }
    }

    /// Settle one triggered occurrence: allocate the total across the
    /// agreement's active participants and execute each obligation.
    pub async fn settle(
        &self,
        trigger: &TransferTrigger,
    ) -> Result<Vec<ObligationOutcome>, AppError> {
        let agreement = self.agreements.get_agreement(trigger.agreement_id).await?;
        if !agreement.is_active {
            tracing::debug!(agreement_id = %agreement.id, "skipping trigger for inactive agreement");
            return Ok(Vec::new());
        }

        let participants: Vec<ParticipantAgreement> = self
            .agreements
            .list_participants(agreement.id)
            .await?
            .into_iter()
            .filter(|participant| participant.is_active)
            .collect();

        let terms: Vec<ContributionTerm> = participants
            .iter()
            .map(|participant| ContributionTerm {
                participant_id: participant.id,
                contribution: participant.contribution,
            })
            .collect();
        let allocation = allocation::allocate(trigger.total_amount, &terms)?;

        let mut outcomes = Vec::with_capacity(allocation.shares.len());
        for share in &allocation.shares {
            let participant = participants
                .iter()
                .find(|p| p.id == share.participant_id)
                .expect("share belongs to a known participant");
            if share.amount == 0 {
                outcomes.push(ObligationOutcome::Skipped);
                continue;
            }
            let outcome = self
                .execute_obligation(&agreement, participant, &trigger.occurrence, share.amount)
                .await?;
            outcomes.push(outcome);
        }

        Ok(outcomes)
    }

    /// Run one obligation through the state machine. Idempotent per
    /// (agreement, participant, occurrence): a second invocation resumes
    /// the existing transfer instead of creating another.
    pub async fn execute_obligation(
        &self,
        agreement: &Agreement,
        participant: &ParticipantAgreement,
        occurrence: &Occurrence,
        amount: i64,
    ) -> Result<ObligationOutcome, AppError> {
        let token = idempotency_token(agreement.id, participant.id, occurrence);
        if let Some(existing) = self.transfers.find_by_token(token).await? {
            return self.resume(existing).await;
        }

        let source_account = participant.payment_account_id.ok_or_else(|| {
            AppError::BadRequest(format!(
                "participant agreement {} has no payment account",
                participant.id
            ))
        })?;

        // Funds pre-check. Withholding here happens before any Transfer row
        // exists, so the occurrence stays free for a later retry.
        match self.processor.get_available_balance(source_account).await {
            Ok(balance) if balance < amount => {
                let mut withheld = WithheldTransfer::new(
                    agreement.id,
                    participant.id,
                    WithholdingReason::InsufficientFunds,
                    amount,
                    occurrence,
                );
                withheld.available_funds_at_attempt = Some(balance);
                let withheld = self.transfers.insert_withheld(&withheld).await?;
                tracing::info!(
                    agreement_id = %agreement.id,
                    participant_agreement_id = %participant.id,
                    balance,
                    amount,
                    "transfer withheld: insufficient funds"
                );
                if let Some(user_id) = participant.user_id {
                    self.notifier
                        .notify(
                            user_id,
                            "transfer_withheld_insufficient_funds",
                            json!({ "amount": amount, "available": balance }),
                        )
                        .await;
                }
                return Ok(ObligationOutcome::Withheld(withheld.id));
            }
            Ok(_) => {}
            Err(err) => {
                // Can't verify funds; withhold rather than risk an
                // overdraft, and let the sweep try again.
                tracing::warn!(error = %err, "balance check failed, withholding transfer");
                let withheld = WithheldTransfer::new(
                    agreement.id,
                    participant.id,
                    WithholdingReason::Other,
                    amount,
                    occurrence,
                );
                let withheld = self.transfers.insert_withheld(&withheld).await?;
                return Ok(ObligationOutcome::Withheld(withheld.id));
            }
        }

        self.initiate_and_submit(agreement, participant, source_account, occurrence, amount)
            .await
    }

    /// Re-check the obligation behind a withholding. A balance that is
    /// still short refreshes the existing row; no second withholding is
    /// ever recorded for the same obligation, and no notification is
    /// re-sent.
    pub async fn retry_withheld(
        &self,
        agreement: &Agreement,
        participant: &ParticipantAgreement,
        occurrence: &Occurrence,
        withheld: &mut WithheldTransfer,
    ) -> Result<ObligationOutcome, AppError> {
        let token = idempotency_token(agreement.id, participant.id, occurrence);
        if let Some(existing) = self.transfers.find_by_token(token).await? {
            return self.resume(existing).await;
        }

        let source_account = participant.payment_account_id.ok_or_else(|| {
            AppError::BadRequest(format!(
                "participant agreement {} has no payment account",
                participant.id
            ))
        })?;

        match self.processor.get_available_balance(source_account).await {
            Ok(balance) if balance < withheld.attempted_amount => {
                withheld.available_funds_at_attempt = Some(balance);
                withheld.attempted_at = Utc::now();
                self.transfers.update_withheld(withheld).await?;
                tracing::info!(
                    withheld_id = %withheld.id,
                    balance,
                    amount = withheld.attempted_amount,
                    "funds still insufficient, withholding stays open"
                );
                Ok(ObligationOutcome::Withheld(withheld.id))
            }
            Ok(_) => {
                self.initiate_and_submit(
                    agreement,
                    participant,
                    source_account,
                    occurrence,
                    withheld.attempted_amount,
                )
                .await
            }
            Err(err) => {
                tracing::warn!(
                    withheld_id = %withheld.id,
                    error = %err,
                    "balance check failed, leaving withholding for the next sweep"
                );
                Ok(ObligationOutcome::Withheld(withheld.id))
            }
        }
    }

    async fn initiate_and_submit(
        &self,
        agreement: &Agreement,
        participant: &ParticipantAgreement,
        source_account: Uuid,
        occurrence: &Occurrence,
        amount: i64,
    ) -> Result<ObligationOutcome, AppError> {
        let transfer = Transfer::new(
            agreement.id,
            participant.id,
            source_account,
            agreement.owner_destination_account_id,
            amount,
            fee_for(amount),
            occurrence,
        );
        let (transfer, created) = self.transfers.find_or_create(&transfer).await?;
        if !created {
            // Lost a lookup-or-create race; the winner's row carries on.
            return self.resume(transfer).await;
        }

        self.ledger
            .append(&LedgerEvent::transition(
                transfer.id,
                None,
                TransferStatus::Initiated,
                None,
            ))
            .await?;

        self.submit(transfer).await
    }

    /// Pick an existing transfer back up wherever it left off. Used when a
    /// trigger fires twice and by the reconciliation sweep.
    pub async fn resume(&self, transfer: Transfer) -> Result<ObligationOutcome, AppError> {
        match transfer.status {
            TransferStatus::Processed => Ok(ObligationOutcome::Processed(transfer.id)),
            TransferStatus::Failed => Ok(ObligationOutcome::Failed(transfer.id)),
            TransferStatus::Initiated => self.submit(transfer).await,
            TransferStatus::Pending => match transfer.processor_transfer_id.clone() {
                Some(reference) => match self.processor.get_transfer_status(&reference).await {
                    Ok(ProcessorTransferStatus::Processed) => {
                        self.mark_processed(transfer, Some(reference)).await
                    }
                    Ok(
                        ProcessorTransferStatus::Failed | ProcessorTransferStatus::Cancelled,
                    ) => self.mark_failed(transfer, Some(reference)).await,
                    Ok(ProcessorTransferStatus::Pending) => {
                        Ok(ObligationOutcome::Pending(transfer.id))
                    }
                    Err(err) => {
                        tracing::warn!(
                            transfer_id = %transfer.id,
                            error = %err,
                            "status lookup failed, leaving transfer pending"
                        );
                        Ok(ObligationOutcome::Pending(transfer.id))
                    }
                },
                // The original submission timed out before any ack. The
                // idempotency token identifies the obligation to the
                // processor, so resubmitting the same token cannot
                // double-charge.
                None => self.submit(transfer).await,
            },
        }
    }

    /// Explicit cancellation of a specific transfer. The row is marked
    /// FAILED only after the processor confirms, never optimistically.
    pub async fn cancel(&self, transfer_id: Uuid) -> Result<Transfer, AppError> {
        let transfer = self.transfers.get_transfer(transfer_id).await?;
        if transfer.status.is_terminal() {
            return Err(AppError::BadRequest(format!(
                "transfer {} is already {}",
                transfer.id, transfer.status
            )));
        }
        let reference = transfer.processor_transfer_id.clone().ok_or_else(|| {
            AppError::BadRequest(format!(
                "transfer {} has not been submitted to the processor",
                transfer.id
            ))
        })?;

        self.processor.cancel_transfer(&reference).await?;

        let mut cancelled = transfer;
        let previous = cancelled.status;
        cancelled.status = TransferStatus::Failed;
        self.transfers.update_transfer(&cancelled).await?;
        self.ledger
            .append(&LedgerEvent::transition(
                cancelled.id,
                Some(previous),
                TransferStatus::Failed,
                Some(reference),
            ))
            .await?;
        tracing::info!(transfer_id = %cancelled.id, "transfer cancelled");
        Ok(cancelled)
    }

    /// Submit (or resubmit) a transfer, bounded by the attempt ceiling.
    async fn submit(&self, mut transfer: Transfer) -> Result<ObligationOutcome, AppError> {
        loop {
            transfer.attempt_count += 1;
            self.transfers.update_transfer(&transfer).await?;

            let request = TransferRequest {
                source_account_id: transfer.source_account_id,
                destination_account_id: transfer.destination_account_id,
                amount: transfer.total_amount,
                idempotency_token: transfer.idempotency_token,
            };

            match self.processor.create_transfer(&request).await {
                Ok(ack) => {
                    transfer.processor_transfer_id = Some(ack.processor_transfer_id.clone());
                    return match ack.status {
                        ProcessorTransferStatus::Pending => {
                            self.mark_pending(transfer, Some(ack.processor_transfer_id))
                                .await
                        }
                        ProcessorTransferStatus::Processed => {
                            self.mark_processed(transfer, Some(ack.processor_transfer_id))
                                .await
                        }
                        ProcessorTransferStatus::Failed
                        | ProcessorTransferStatus::Cancelled => {
                            self.mark_failed(transfer, Some(ack.processor_transfer_id))
                                .await
                        }
                    };
                }
                Err(ProcessorError::Timeout) => {
                    // Indeterminate: the processor may have accepted it.
                    // Park as PENDING; the sweep will ask the processor
                    // rather than resubmitting blindly.
                    tracing::warn!(
                        transfer_id = %transfer.id,
                        attempt = transfer.attempt_count,
                        "processor call timed out, leaving transfer pending"
                    );
                    return self.mark_pending(transfer, None).await;
                }
                Err(err @ (ProcessorError::Transient(_) | ProcessorError::CircuitOpen)) => {
                    if transfer.attempt_count < MAX_TRANSFER_ATTEMPTS {
                        tracing::warn!(
                            transfer_id = %transfer.id,
                            attempt = transfer.attempt_count,
                            error = %err,
                            "transient processor failure, retrying with the same token"
                        );
                        continue;
                    }
                    tracing::error!(
                        transfer_id = %transfer.id,
                        attempts = transfer.attempt_count,
                        error = %err,
                        "attempt ceiling reached, downgrading to terminal failure"
                    );
                    return self.mark_failed(transfer, None).await;
                }
                Err(ProcessorError::Terminal(reason)) => {
                    tracing::error!(
                        transfer_id = %transfer.id,
                        reason,
                        "terminal processor failure"
                    );
                    return self.mark_failed(transfer, None).await;
                }
            }
        }
    }

    async fn mark_pending(
        &self,
        mut transfer: Transfer,
        reference: Option<String>,
    ) -> Result<ObligationOutcome, AppError> {
        let previous = transfer.status;
        transfer.status = TransferStatus::Pending;
        self.transfers.update_transfer(&transfer).await?;
        if previous != TransferStatus::Pending {
            self.ledger
                .append(&LedgerEvent::transition(
                    transfer.id,
                    Some(previous),
                    TransferStatus::Pending,
                    reference,
                ))
                .await?;
        }
        Ok(ObligationOutcome::Pending(transfer.id))
    }

    async fn mark_processed(
        &self,
        mut transfer: Transfer,
        reference: Option<String>,
    ) -> Result<ObligationOutcome, AppError> {
        let previous = transfer.status;
        transfer.status = TransferStatus::Processed;
        transfer.completed_at = Some(Utc::now());
        self.transfers.update_transfer(&transfer).await?;
        self.ledger
            .append(&LedgerEvent::transition(
                transfer.id,
                Some(previous),
                TransferStatus::Processed,
                reference,
            ))
            .await?;
        tracing::info!(transfer_id = %transfer.id, amount = transfer.total_amount, "transfer processed");

        // Fire-and-forget; a notification failure never rolls back state.
        if let Ok(participant) = self
            .agreements
            .get_participant(transfer.participant_agreement_id)
            .await
        {
            if let Some(user_id) = participant.user_id {
                self.notifier
                    .notify(
                        user_id,
                        "transfer_processed",
                        json!({ "transfer_id": transfer.id, "amount": transfer.total_amount }),
                    )
                    .await;
            }
        }

        Ok(ObligationOutcome::Processed(transfer.id))
    }

    async fn mark_failed(
        &self,
        mut transfer: Transfer,
        reference: Option<String>,
    ) -> Result<ObligationOutcome, AppError> {
        let previous = transfer.status;
        transfer.status = TransferStatus::Failed;
        self.transfers.update_transfer(&transfer).await?;
        self.ledger
            .append(&LedgerEvent::transition(
                transfer.id,
                Some(previous),
                TransferStatus::Failed,
                reference,
            ))
            .await?;

        let withheld = WithheldTransfer::for_transfer(&transfer, WithholdingReason::Other);
        let withheld = self.transfers.insert_withheld(&withheld).await?;
        tracing::error!(
            transfer_id = %transfer.id,
            withheld_id = %withheld.id,
            "transfer failed, recorded for intervention"
        );

        Ok(ObligationOutcome::Failed(transfer.id))
    }
}
