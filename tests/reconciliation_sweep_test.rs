//! Reconciliation sweep behavior: parked transfers get resumed and
//! withheld transfers get retried or left for intervention.

use std::sync::Arc;

use chrono::Utc;
use fairshare_core::domain::{Contribution, Occurrence, TransferStatus, WithholdingReason};
use fairshare_core::ports::{
    AgreementRepository, LedgerRepository, LogNotifier, TransferRepository,
};
use fairshare_core::services::{
    ObligationOutcome, ReconciliationService, TransferOrchestrator, TransferTrigger,
};
use fairshare_core::testing::{
    active_participant, active_vendor_agreement, InMemoryAgreementRepository,
    InMemoryLedgerRepository, InMemoryTransferRepository, ScriptedCall, StubProcessor,
};
use fairshare_core::processor::ProcessorTransferStatus;
use uuid::Uuid;

struct Harness {
    agreements: Arc<InMemoryAgreementRepository>,
    transfers: Arc<InMemoryTransferRepository>,
    processor: Arc<StubProcessor>,
    orchestrator: Arc<TransferOrchestrator>,
    reconciliation: ReconciliationService,
}

fn harness() -> Harness {
    let agreements = Arc::new(InMemoryAgreementRepository::default());
    let transfers = Arc::new(InMemoryTransferRepository::default());
    let ledger = Arc::new(InMemoryLedgerRepository::default());
    let processor = Arc::new(StubProcessor::default());

    let orchestrator = Arc::new(TransferOrchestrator::new(
        agreements.clone() as Arc<dyn AgreementRepository>,
        transfers.clone() as Arc<dyn TransferRepository>,
        ledger as Arc<dyn LedgerRepository>,
        processor.clone(),
        Arc::new(LogNotifier),
    ));
    let reconciliation = ReconciliationService::new(
        agreements.clone() as Arc<dyn AgreementRepository>,
        transfers.clone() as Arc<dyn TransferRepository>,
        orchestrator.clone(),
    );

    Harness {
        agreements,
        transfers,
        processor,
        orchestrator,
        reconciliation,
    }
}

async fn seed_single_participant(harness: &Harness) -> (Uuid, Uuid, Uuid) {
    let agreement = active_vendor_agreement(Uuid::new_v4(), Uuid::new_v4());
    harness.agreements.insert_agreement(&agreement).await.unwrap();

    let participant = active_participant(agreement.id, Contribution::SplitEvenly);
    harness
        .agreements
        .insert_participant(&participant)
        .await
        .unwrap();
    (
        agreement.id,
        participant.id,
        participant.payment_account_id.unwrap(),
    )
}

fn trigger(agreement_id: Uuid, total_amount: i64) -> TransferTrigger {
    TransferTrigger {
        agreement_id,
        total_amount,
        occurrence: Occurrence::Transaction("txn-1".to_string()),
    }
}

#[tokio::test]
async fn insufficient_funds_withholding_reconciles_once_funds_return() {
    let harness = harness();
    let (agreement_id, _, account_id) = seed_single_participant(&harness).await;
    harness.processor.set_balance(account_id, 100);

    let outcomes = harness
        .orchestrator
        .settle(&trigger(agreement_id, 1000))
        .await
        .unwrap();
    assert!(matches!(outcomes[0], ObligationOutcome::Withheld(_)));
    assert_eq!(harness.transfers.transfer_count(), 0);

    let withheld = &harness.transfers.list_unreconciled().await.unwrap()[0];
    assert_eq!(withheld.reason, WithholdingReason::InsufficientFunds);
    assert_eq!(withheld.available_funds_at_attempt, Some(100));
    assert!(withheld.transfer_id.is_none());

    // Funds arrive; the sweep retries the obligation.
    harness.processor.set_balance(account_id, 5000);
    let report = harness.reconciliation.sweep(Utc::now()).await.unwrap();

    assert_eq!(report.withheld_examined, 1);
    assert_eq!(report.withheld_reconciled, 1);
    assert_eq!(harness.transfers.transfer_count(), 1);
    assert!(harness.transfers.list_unreconciled().await.unwrap().is_empty());
}

#[tokio::test]
async fn withholding_stays_a_single_row_while_funds_remain_short() {
    let harness = harness();
    let (agreement_id, _, account_id) = seed_single_participant(&harness).await;
    harness.processor.set_balance(account_id, 100);

    harness
        .orchestrator
        .settle(&trigger(agreement_id, 1000))
        .await
        .unwrap();
    assert_eq!(harness.transfers.withheld_count(), 1);

    // The balance never recovers. Each sweep re-checks the same obligation
    // and refreshes the one withholding instead of recording another.
    harness.processor.set_balance(account_id, 250);
    for _ in 0..4 {
        let report = harness.reconciliation.sweep(Utc::now()).await.unwrap();
        assert_eq!(report.withheld_examined, 1);
        assert_eq!(report.withheld_reconciled, 0);
    }

    let unreconciled = harness.transfers.list_unreconciled().await.unwrap();
    assert_eq!(unreconciled.len(), 1);
    assert_eq!(harness.transfers.withheld_count(), 1);
    assert!(!unreconciled[0].has_been_reconciled);
    // The re-check recorded the latest balance on the existing row.
    assert_eq!(unreconciled[0].available_funds_at_attempt, Some(250));
    assert_eq!(harness.transfers.transfer_count(), 0);
}

#[tokio::test]
async fn timed_out_submission_is_resubmitted_with_the_same_token() {
    let harness = harness();
    let (agreement_id, _, _) = seed_single_participant(&harness).await;
    harness.processor.enqueue(ScriptedCall::Timeout);

    let outcomes = harness
        .orchestrator
        .settle(&trigger(agreement_id, 1000))
        .await
        .unwrap();
    let transfer_id = match outcomes[0] {
        ObligationOutcome::Pending(id) => id,
        ref other => panic!("expected pending, got {:?}", other),
    };
    let parked = harness.transfers.get_transfer(transfer_id).await.unwrap();
    assert_eq!(parked.status, TransferStatus::Pending);
    assert!(parked.processor_transfer_id.is_none());

    let report = harness.reconciliation.sweep(Utc::now()).await.unwrap();
    assert_eq!(report.transfers_resumed, 1);

    let resumed = harness.transfers.get_transfer(transfer_id).await.unwrap();
    assert_eq!(resumed.status, TransferStatus::Processed);
    assert_eq!(harness.transfers.transfer_count(), 1);

    let requests = harness.processor.requests();
    assert_eq!(requests.len(), 2);
    assert_eq!(
        requests[0].idempotency_token,
        requests[1].idempotency_token
    );
}

#[tokio::test]
async fn pending_transfer_with_a_reference_is_polled_not_resubmitted() {
    let harness = harness();
    let (agreement_id, _, _) = seed_single_participant(&harness).await;
    harness
        .processor
        .enqueue(ScriptedCall::Ack(ProcessorTransferStatus::Pending));

    let outcomes = harness
        .orchestrator
        .settle(&trigger(agreement_id, 1000))
        .await
        .unwrap();
    let transfer_id = match outcomes[0] {
        ObligationOutcome::Pending(id) => id,
        ref other => panic!("expected pending, got {:?}", other),
    };
    let parked = harness.transfers.get_transfer(transfer_id).await.unwrap();
    let reference = parked.processor_transfer_id.clone().unwrap();

    harness
        .processor
        .set_status(&reference, ProcessorTransferStatus::Processed);
    harness.reconciliation.sweep(Utc::now()).await.unwrap();

    let resumed = harness.transfers.get_transfer(transfer_id).await.unwrap();
    assert_eq!(resumed.status, TransferStatus::Processed);
    // Only the original submission hit the create endpoint.
    assert_eq!(harness.processor.requests().len(), 1);
}

#[tokio::test]
async fn processor_failure_withholdings_wait_for_intervention() {
    let harness = harness();
    let (agreement_id, _, _) = seed_single_participant(&harness).await;
    harness.processor.enqueue(ScriptedCall::Terminal);

    harness
        .orchestrator
        .settle(&trigger(agreement_id, 1000))
        .await
        .unwrap();
    let withheld = &harness.transfers.list_unreconciled().await.unwrap()[0];
    assert_eq!(withheld.reason, WithholdingReason::Other);
    assert!(withheld.transfer_id.is_some());

    let submissions_before = harness.processor.requests().len();
    let report = harness.reconciliation.sweep(Utc::now()).await.unwrap();

    assert_eq!(report.withheld_reconciled, 0);
    assert_eq!(harness.processor.requests().len(), submissions_before);
    assert_eq!(harness.transfers.list_unreconciled().await.unwrap().len(), 1);
}

#[tokio::test]
async fn deactivated_agreement_is_skipped_but_pending_transfers_keep_their_status() {
    let harness = harness();
    let (agreement_id, _, account_id) = seed_single_participant(&harness).await;
    harness.processor.set_balance(account_id, 0);

    harness
        .orchestrator
        .settle(&trigger(agreement_id, 1000))
        .await
        .unwrap();
    assert_eq!(harness.transfers.list_unreconciled().await.unwrap().len(), 1);

    let mut agreement = harness.agreements.get_agreement(agreement_id).await.unwrap();
    agreement.is_active = false;
    agreement.deactivated_at = Some(Utc::now());
    harness.agreements.update_agreement(&agreement).await.unwrap();

    harness.processor.set_balance(account_id, 5000);
    let report = harness.reconciliation.sweep(Utc::now()).await.unwrap();

    // No retry and no reconciliation for a retired agreement.
    assert_eq!(report.withheld_reconciled, 0);
    assert_eq!(harness.transfers.transfer_count(), 0);
}

#[tokio::test]
async fn sweep_reconciles_a_withholding_whose_obligation_later_succeeded() {
    let harness = harness();
    let (agreement_id, _, account_id) = seed_single_participant(&harness).await;

    // First attempt withheld on funds.
    harness.processor.set_balance(account_id, 0);
    harness
        .orchestrator
        .settle(&trigger(agreement_id, 1000))
        .await
        .unwrap();

    // A later trigger for the same occurrence goes through.
    harness.processor.set_balance(account_id, 5000);
    harness
        .orchestrator
        .settle(&trigger(agreement_id, 1000))
        .await
        .unwrap();
    assert_eq!(harness.transfers.transfer_count(), 1);

    let report = harness.reconciliation.sweep(Utc::now()).await.unwrap();
    assert_eq!(report.withheld_reconciled, 1);
    // The processed transfer satisfied the obligation; no new submission.
    assert_eq!(harness.processor.requests().len(), 1);
}
