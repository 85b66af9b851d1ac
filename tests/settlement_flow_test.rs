//! End-to-end settlement over the in-memory ports: a matched vendor charge
//! fans out into participant transfers exactly once.

use std::sync::Arc;

use fairshare_core::domain::{Contribution, Occurrence, TransferStatus};
use fairshare_core::ports::{
    AgreementRepository, LedgerRepository, LogNotifier, TransferRepository,
};
use fairshare_core::services::{ObligationOutcome, TransferOrchestrator, TransferTrigger};
use fairshare_core::testing::{
    active_participant, active_vendor_agreement, InMemoryAgreementRepository,
    InMemoryLedgerRepository, InMemoryTransferRepository, ScriptedCall, StubProcessor,
};
use uuid::Uuid;

struct Harness {
    agreements: Arc<InMemoryAgreementRepository>,
    transfers: Arc<InMemoryTransferRepository>,
    ledger: Arc<InMemoryLedgerRepository>,
    processor: Arc<StubProcessor>,
    orchestrator: TransferOrchestrator,
}

fn harness() -> Harness {
    let agreements = Arc::new(InMemoryAgreementRepository::default());
    let transfers = Arc::new(InMemoryTransferRepository::default());
    let ledger = Arc::new(InMemoryLedgerRepository::default());
    let processor = Arc::new(StubProcessor::default());

    let orchestrator = TransferOrchestrator::new(
        agreements.clone() as Arc<dyn AgreementRepository>,
        transfers.clone() as Arc<dyn TransferRepository>,
        ledger.clone() as Arc<dyn LedgerRepository>,
        processor.clone(),
        Arc::new(LogNotifier),
    );

    Harness {
        agreements,
        transfers,
        ledger,
        processor,
        orchestrator,
    }
}

async fn seed_agreement(
    harness: &Harness,
    contributions: &[Contribution],
) -> (Uuid, Vec<Uuid>) {
    let agreement = active_vendor_agreement(Uuid::new_v4(), Uuid::new_v4());
    harness.agreements.insert_agreement(&agreement).await.unwrap();

    let mut participant_ids = Vec::new();
    for contribution in contributions {
        let participant = active_participant(agreement.id, *contribution);
        participant_ids.push(participant.id);
        harness
            .agreements
            .insert_participant(&participant)
            .await
            .unwrap();
    }
    (agreement.id, participant_ids)
}

fn transaction_trigger(agreement_id: Uuid, total_amount: i64) -> TransferTrigger {
    TransferTrigger {
        agreement_id,
        total_amount,
        occurrence: Occurrence::Transaction("txn-1".to_string()),
    }
}

#[tokio::test]
async fn even_split_settles_each_participant_share() {
    let harness = harness();
    let (agreement_id, _) = seed_agreement(
        &harness,
        &[Contribution::SplitEvenly, Contribution::SplitEvenly],
    )
    .await;

    let outcomes = harness
        .orchestrator
        .settle(&transaction_trigger(agreement_id, 3000))
        .await
        .unwrap();

    assert_eq!(outcomes.len(), 2);
    assert!(outcomes
        .iter()
        .all(|o| matches!(o, ObligationOutcome::Processed(_))));
    assert_eq!(harness.transfers.transfer_count(), 2);

    // Owner covers the third share; each participant moves 1000.
    for request in harness.processor.requests() {
        assert_eq!(request.amount, 1000);
    }
}

#[tokio::test]
async fn settling_the_same_occurrence_twice_creates_no_duplicate_transfers() {
    let harness = harness();
    let (agreement_id, _) = seed_agreement(
        &harness,
        &[Contribution::SplitEvenly, Contribution::SplitEvenly],
    )
    .await;
    let trigger = transaction_trigger(agreement_id, 3000);

    harness.orchestrator.settle(&trigger).await.unwrap();
    let second = harness.orchestrator.settle(&trigger).await.unwrap();

    assert!(second
        .iter()
        .all(|o| matches!(o, ObligationOutcome::Processed(_))));
    assert_eq!(harness.transfers.transfer_count(), 2);
    // The second pass resumed terminal transfers without resubmitting.
    assert_eq!(harness.processor.requests().len(), 2);
}

#[tokio::test]
async fn zero_shares_are_skipped_without_a_transfer_row() {
    let harness = harness();
    let (agreement_id, _) = seed_agreement(
        &harness,
        &[Contribution::Fixed(0), Contribution::Fixed(500)],
    )
    .await;

    let outcomes = harness
        .orchestrator
        .settle(&transaction_trigger(agreement_id, 1000))
        .await
        .unwrap();

    assert!(outcomes.contains(&ObligationOutcome::Skipped));
    assert_eq!(harness.transfers.transfer_count(), 1);
}

#[tokio::test]
async fn inactive_agreement_never_settles() {
    let harness = harness();
    let (agreement_id, _) = seed_agreement(&harness, &[Contribution::SplitEvenly]).await;

    let mut agreement = harness.agreements.get_agreement(agreement_id).await.unwrap();
    agreement.is_active = false;
    harness.agreements.update_agreement(&agreement).await.unwrap();

    let outcomes = harness
        .orchestrator
        .settle(&transaction_trigger(agreement_id, 1000))
        .await
        .unwrap();

    assert!(outcomes.is_empty());
    assert_eq!(harness.transfers.transfer_count(), 0);
}

#[tokio::test]
async fn terminal_processor_failure_records_a_withholding() {
    let harness = harness();
    let (agreement_id, _) = seed_agreement(&harness, &[Contribution::SplitEvenly]).await;
    harness.processor.enqueue(ScriptedCall::Terminal);

    let outcomes = harness
        .orchestrator
        .settle(&transaction_trigger(agreement_id, 1000))
        .await
        .unwrap();

    assert!(matches!(outcomes[0], ObligationOutcome::Failed(_)));
    assert_eq!(harness.transfers.withheld_count(), 1);

    let transfer = match outcomes[0] {
        ObligationOutcome::Failed(id) => harness.transfers.get_transfer(id).await.unwrap(),
        _ => unreachable!(),
    };
    assert_eq!(transfer.status, TransferStatus::Failed);
}

#[tokio::test]
async fn transient_failures_stop_at_the_attempt_ceiling() {
    let harness = harness();
    let (agreement_id, _) = seed_agreement(&harness, &[Contribution::SplitEvenly]).await;
    for _ in 0..5 {
        harness.processor.enqueue(ScriptedCall::Transient);
    }

    let outcomes = harness
        .orchestrator
        .settle(&transaction_trigger(agreement_id, 1000))
        .await
        .unwrap();

    let transfer_id = match outcomes[0] {
        ObligationOutcome::Failed(id) => id,
        ref other => panic!("expected failure, got {:?}", other),
    };
    let transfer = harness.transfers.get_transfer(transfer_id).await.unwrap();
    assert_eq!(transfer.attempt_count, 5);
    assert_eq!(transfer.status, TransferStatus::Failed);
}

#[tokio::test]
async fn ledger_records_the_full_lifecycle() {
    let harness = harness();
    let (agreement_id, _) = seed_agreement(&harness, &[Contribution::SplitEvenly]).await;

    let outcomes = harness
        .orchestrator
        .settle(&transaction_trigger(agreement_id, 1000))
        .await
        .unwrap();
    let transfer_id = match outcomes[0] {
        ObligationOutcome::Processed(id) => id,
        ref other => panic!("expected processed, got {:?}", other),
    };

    let events = harness.ledger.events_for_transfer(transfer_id).await.unwrap();
    let statuses: Vec<TransferStatus> = events.iter().map(|e| e.new_status).collect();
    assert_eq!(
        statuses,
        vec![TransferStatus::Initiated, TransferStatus::Processed]
    );
    assert_eq!(events[0].previous_status, None);
    assert_eq!(events[1].previous_status, Some(TransferStatus::Initiated));
}

#[tokio::test]
async fn missing_payment_account_is_rejected() {
    let harness = harness();
    let agreement = active_vendor_agreement(Uuid::new_v4(), Uuid::new_v4());
    harness.agreements.insert_agreement(&agreement).await.unwrap();

    let mut participant = active_participant(agreement.id, Contribution::SplitEvenly);
    participant.payment_account_id = None;
    harness
        .agreements
        .insert_participant(&participant)
        .await
        .unwrap();

    let result = harness
        .orchestrator
        .settle(&transaction_trigger(agreement.id, 1000))
        .await;
    assert!(result.is_err());
    assert_eq!(harness.transfers.transfer_count(), 0);
}
