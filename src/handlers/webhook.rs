//! Bank-data provider webhook: batches of enriched transactions arrive
//! here, get matched against active agreements, and settle inline.

use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use hmac::{Hmac, Mac};
use serde::Deserialize;
use serde_json::json;
use sha2::Sha256;

use crate::domain::BankTransaction;
use crate::error::AppError;
use crate::services::ObligationOutcome;
use crate::AppState;

const SIGNATURE_HEADER: &str = "x-bank-signature";

#[derive(Debug, Deserialize)]
pub struct TransactionBatchPayload {
    pub transactions: Vec<BankTransaction>,
}

pub async fn ingest_transactions(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse, AppError> {
    verify_signature(&headers, &body, state.webhook_secret.as_bytes())?;

    let payload: TransactionBatchPayload = serde_json::from_slice(&body)
        .map_err(|err| AppError::BadRequest(format!("malformed payload: {}", err)))?;

    let triggers = state
        .trigger_detector
        .detect_vendor_triggers(&payload.transactions)
        .await?;

    let mut settled = 0usize;
    let mut withheld = 0usize;
    let mut pending = 0usize;
    let mut failed = 0usize;
    for trigger in &triggers {
        for outcome in state.orchestrator.settle(trigger).await? {
            match outcome {
                ObligationOutcome::Processed(_) => settled += 1,
                ObligationOutcome::Pending(_) => pending += 1,
                ObligationOutcome::Withheld(_) => withheld += 1,
                ObligationOutcome::Failed(_) => failed += 1,
                ObligationOutcome::Skipped => {}
            }
        }
    }

    tracing::info!(
        transactions = payload.transactions.len(),
        triggers = triggers.len(),
        settled,
        pending,
        withheld,
        failed,
        "webhook batch processed"
    );
    Ok((
        StatusCode::ACCEPTED,
        Json(json!({
            "transactions": payload.transactions.len(),
            "triggers": triggers.len(),
            "settled": settled,
            "pending": pending,
            "withheld": withheld,
            "failed": failed,
        })),
    ))
}

/// Hex-encoded HMAC-SHA256 of the raw body, verified in constant time.
fn verify_signature(headers: &HeaderMap, body: &[u8], secret: &[u8]) -> Result<(), AppError> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|value| value.to_str().ok())
        .ok_or_else(|| AppError::Unauthorized("missing webhook signature".to_string()))?;
    let signature = hex::decode(signature)
        .map_err(|_| AppError::Unauthorized("malformed webhook signature".to_string()))?;

    let mut mac = Hmac::<Sha256>::new_from_slice(secret)
        .map_err(|err| AppError::Internal(format!("webhook secret unusable: {}", err)))?;
    mac.update(body);
    mac.verify_slice(&signature)
        .map_err(|_| AppError::Unauthorized("invalid webhook signature".to_string()))
}
