//! Calendar-driven trigger detection: due dates fire once, advance, and
//! retire the agreement past its end date.

use std::sync::Arc;

use chrono::{NaiveDate, TimeZone, Utc};
use fairshare_core::domain::{
    Agreement, Contribution, IntervalUnit, Occurrence, Recurrence,
};
use fairshare_core::ports::AgreementRepository;
use fairshare_core::services::{TriggerDetector, VendorResolver};
use fairshare_core::testing::{
    active_participant, InMemoryAgreementRepository, InMemoryVendorRepository,
};
use uuid::Uuid;

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

fn detector(agreements: Arc<InMemoryAgreementRepository>) -> TriggerDetector {
    let resolver = Arc::new(VendorResolver::new(Arc::new(
        InMemoryVendorRepository::default(),
    )));
    TriggerDetector::new(resolver, agreements)
}

async fn seed_recurring(
    agreements: &InMemoryAgreementRepository,
    recurrence: Recurrence,
    amounts: &[i64],
) -> Uuid {
    let mut agreement = Agreement::new_recurring(
        Uuid::new_v4(),
        Uuid::new_v4(),
        Uuid::new_v4(),
        "Rent",
        recurrence,
    );
    agreement.is_active = true;
    agreement.is_pending = false;
    agreements.insert_agreement(&agreement).await.unwrap();

    for amount in amounts {
        let participant = active_participant(agreement.id, Contribution::Fixed(*amount));
        agreements.insert_participant(&participant).await.unwrap();
    }
    agreement.id
}

#[tokio::test]
async fn due_agreement_fires_once_and_advances() {
    let agreements = Arc::new(InMemoryAgreementRepository::default());
    let detector = detector(agreements.clone());
    let agreement_id = seed_recurring(
        &agreements,
        Recurrence {
            interval: IntervalUnit::Months,
            frequency: 1,
            next_scheduled_date: date(2026, 9, 1),
            end_date: None,
        },
        &[80000, 80000],
    )
    .await;

    let now = Utc.with_ymd_and_hms(2026, 9, 1, 12, 0, 0).unwrap();
    let triggers = detector.scan_recurring(now).await.unwrap();

    assert_eq!(triggers.len(), 1);
    assert_eq!(triggers[0].agreement_id, agreement_id);
    assert_eq!(triggers[0].total_amount, 160000);
    assert_eq!(
        triggers[0].occurrence,
        Occurrence::ScheduledDate(date(2026, 9, 1))
    );

    let agreement = agreements.get_agreement(agreement_id).await.unwrap();
    assert_eq!(
        agreement.recurrence.unwrap().next_scheduled_date,
        date(2026, 10, 1)
    );

    // The date moved on, so a second scan finds nothing.
    let again = detector.scan_recurring(now).await.unwrap();
    assert!(again.is_empty());
}

#[tokio::test]
async fn agreement_is_not_due_before_its_date() {
    let agreements = Arc::new(InMemoryAgreementRepository::default());
    let detector = detector(agreements.clone());
    seed_recurring(
        &agreements,
        Recurrence {
            interval: IntervalUnit::Days,
            frequency: 7,
            next_scheduled_date: date(2026, 9, 10),
            end_date: None,
        },
        &[5000],
    )
    .await;

    let now = Utc.with_ymd_and_hms(2026, 9, 9, 23, 0, 0).unwrap();
    assert!(detector.scan_recurring(now).await.unwrap().is_empty());
}

#[tokio::test]
async fn final_occurrence_fires_then_retires_the_agreement() {
    let agreements = Arc::new(InMemoryAgreementRepository::default());
    let detector = detector(agreements.clone());
    let agreement_id = seed_recurring(
        &agreements,
        Recurrence {
            interval: IntervalUnit::Months,
            frequency: 1,
            next_scheduled_date: date(2026, 9, 1),
            end_date: Some(date(2026, 9, 15)),
        },
        &[40000],
    )
    .await;

    let now = Utc.with_ymd_and_hms(2026, 9, 1, 0, 0, 0).unwrap();
    let triggers = detector.scan_recurring(now).await.unwrap();
    assert_eq!(triggers.len(), 1);

    let agreement = agreements.get_agreement(agreement_id).await.unwrap();
    assert!(!agreement.is_active);
    assert!(agreement.deactivated_at.is_some());

    let later = Utc.with_ymd_and_hms(2026, 10, 1, 0, 0, 0).unwrap();
    assert!(detector.scan_recurring(later).await.unwrap().is_empty());
}

#[tokio::test]
async fn only_active_participants_count_toward_the_total() {
    let agreements = Arc::new(InMemoryAgreementRepository::default());
    let detector = detector(agreements.clone());
    let agreement_id = seed_recurring(
        &agreements,
        Recurrence {
            interval: IntervalUnit::Days,
            frequency: 30,
            next_scheduled_date: date(2026, 9, 1),
            end_date: None,
        },
        &[30000, 20000],
    )
    .await;

    let mut participants = agreements.list_participants(agreement_id).await.unwrap();
    let mut dropped = participants.remove(0);
    dropped.is_active = false;
    agreements.update_participant(&dropped).await.unwrap();
    let remaining = participants[0].contribution.value().unwrap();

    let now = Utc.with_ymd_and_hms(2026, 9, 1, 6, 0, 0).unwrap();
    let triggers = detector.scan_recurring(now).await.unwrap();
    assert_eq!(triggers[0].total_amount, remaining);
}
