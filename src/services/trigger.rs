//! Trigger Detector.
//!
//! Two independent paths locate agreements that owe a transfer: freshly
//! ingested bank transactions matched by vendor, and recurring agreements
//! whose scheduled date has arrived.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use uuid::Uuid;

use crate::domain::{BankTransaction, Contribution, Occurrence};
use crate::error::AppError;
use crate::ports::AgreementRepository;
use crate::services::vendor_resolver::VendorResolver;

/// One occurrence requiring settlement under an agreement.
#[derive(Debug, Clone)]
pub struct TransferTrigger {
    pub agreement_id: Uuid,
    /// Total amount to allocate across participants, minor units.
    pub total_amount: i64,
    pub occurrence: Occurrence,
}

pub struct TriggerDetector {
    resolver: Arc<VendorResolver>,
    agreements: Arc<dyn AgreementRepository>,
}

impl TriggerDetector {
    pub fn new(resolver: Arc<VendorResolver>, agreements: Arc<dyn AgreementRepository>) -> Self {
        Self {
            resolver,
            agreements,
        }
    }

    /// Vendor-match path: resolve each transaction's merchant and look for
    /// an active vendor-triggered agreement watching that vendor on the
    /// transaction's account. A transaction triggers at most one agreement.
    pub async fn detect_vendor_triggers(
        &self,
        batch: &[BankTransaction],
    ) -> Result<Vec<TransferTrigger>, AppError> {
        let mut triggers = Vec::new();

        for transaction in batch {
            // Credits and refunds never trigger a shared bill.
            if transaction.amount <= 0 {
                continue;
            }

            let vendor = self
                .resolver
                .resolve(&transaction.merchant_name, transaction.ppd_id.as_deref())
                .await?;
            if vendor.identity_cannot_be_determined {
                continue;
            }

            let Some(agreement) = self
                .agreements
                .find_active_vendor_agreement(vendor.id, transaction.account_id)
                .await?
            else {
                continue;
            };

            tracing::info!(
                agreement_id = %agreement.id,
                vendor_id = %vendor.id,
                transaction_id = %transaction.transaction_id,
                amount = transaction.amount,
                "vendor charge matched an active agreement"
            );
            triggers.push(TransferTrigger {
                agreement_id: agreement.id,
                total_amount: transaction.amount,
                occurrence: Occurrence::Transaction(transaction.transaction_id.clone()),
            });
        }

        Ok(triggers)
    }

    /// Calendar path: emit a trigger for every recurring agreement whose
    /// next scheduled date has arrived, then advance that date *before* any
    /// transfer is attempted. A crash mid-transfer therefore cannot make
    /// the same date scan twice; retries go through the orchestrator's
    /// stored scheduled date instead.
    pub async fn scan_recurring(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<TransferTrigger>, AppError> {
        let today = now.date_naive();
        let due = self.agreements.list_due_recurring(today).await?;
        let mut triggers = Vec::with_capacity(due.len());

        for mut agreement in due {
            let Some(recurrence) = agreement.recurrence.clone() else {
                tracing::error!(agreement_id = %agreement.id, "recurring agreement without recurrence");
                continue;
            };
            if let Some(end) = recurrence.end_date {
                if today > end {
                    continue;
                }
            }

            let scheduled_date = recurrence.next_scheduled_date;
            let advanced = recurrence.advance(scheduled_date);

            let total_amount = self.recurring_amount(agreement.id).await?;

            if let Some(end) = recurrence.end_date {
                if advanced > end {
                    // Last occurrence: fire it, then retire the agreement.
                    agreement.is_active = false;
                    agreement.deactivated_at = Some(Utc::now());
                }
            }
            if let Some(recurrence) = agreement.recurrence.as_mut() {
                recurrence.next_scheduled_date = advanced;
            }
            self.agreements.update_agreement(&agreement).await?;

            if total_amount <= 0 {
                tracing::warn!(agreement_id = %agreement.id, "recurring agreement has no contribution amount");
                continue;
            }

            tracing::info!(
                agreement_id = %agreement.id,
                %scheduled_date,
                next = %advanced,
                "recurring agreement due"
            );
            triggers.push(TransferTrigger {
                agreement_id: agreement.id,
                total_amount,
                occurrence: Occurrence::ScheduledDate(scheduled_date),
            });
        }

        Ok(triggers)
    }

    /// Recurring amounts are always precomputed from the fixed terms; the
    /// contribution type only matters for reporting.
    async fn recurring_amount(&self, agreement_id: Uuid) -> Result<i64, AppError> {
        let participants = self.agreements.list_participants(agreement_id).await?;
        Ok(participants
            .iter()
            .filter(|p| p.is_active)
            .filter_map(|p| match p.contribution {
                Contribution::Fixed(value) => Some(value),
                _ => None,
            })
            .sum())
    }
}
