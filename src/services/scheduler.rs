//! Background task loops: the calendar trigger scan and the reconciliation
//! sweep. Both run forever; per-iteration errors are logged, never fatal.

use chrono::Utc;
use cron::Schedule;
use std::sync::Arc;
use tokio::time::{sleep, Duration};
use tracing::{error, info};

use crate::services::reconciliation::ReconciliationService;
use crate::services::transfer_orchestrator::TransferOrchestrator;
use crate::services::trigger::TriggerDetector;

/// Scan recurring agreements on the configured cron schedule and settle
/// every due occurrence.
pub async fn run_recurring_scan(
    schedule: Schedule,
    detector: Arc<TriggerDetector>,
    orchestrator: Arc<TransferOrchestrator>,
) {
    info!("recurring-date scan loop started");

    loop {
        sleep_until_next(&schedule).await;

        let now = Utc::now();
        match detector.scan_recurring(now).await {
            Ok(triggers) => {
                info!(count = triggers.len(), "recurring scan found due agreements");
                for trigger in &triggers {
                    if let Err(err) = orchestrator.settle(trigger).await {
                        error!(
                            agreement_id = %trigger.agreement_id,
                            error = %err,
                            "failed to settle recurring trigger"
                        );
                    }
                }
            }
            Err(err) => error!(error = %err, "recurring scan failed"),
        }
    }
}

/// Run the reconciliation sweep on the configured cron schedule.
pub async fn run_reconciliation(schedule: Schedule, reconciliation: Arc<ReconciliationService>) {
    info!("reconciliation sweep loop started");

    loop {
        sleep_until_next(&schedule).await;

        if let Err(err) = reconciliation.sweep(Utc::now()).await {
            error!(error = %err, "reconciliation sweep failed");
        }
    }
}

async fn sleep_until_next(schedule: &Schedule) {
    let next = schedule.upcoming(Utc).next();
    let wait = match next {
        Some(when) => (when - Utc::now())
            .to_std()
            .unwrap_or(Duration::from_secs(1)),
        // Degenerate schedule (e.g. all dates in the past): poll slowly.
        None => Duration::from_secs(3600),
    };
    sleep(wait).await;
}
