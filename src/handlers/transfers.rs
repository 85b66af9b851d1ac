//! Transfer inspection and manual controls.

use axum::{
    extract::{Path, State},
    response::IntoResponse,
    Json,
};
use uuid::Uuid;

use crate::error::AppError;
use crate::AppState;

pub async fn get(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let transfer = state.transfers.get_transfer(id).await?;
    Ok(Json(transfer))
}

/// The full lifecycle history of one transfer, oldest first.
pub async fn events(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    // 404 for unknown transfers rather than an empty list.
    state.transfers.get_transfer(id).await?;
    let events = state.ledger.events_for_transfer(id).await?;
    Ok(Json(events))
}

pub async fn cancel(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let transfer = state.orchestrator.cancel(id).await?;
    Ok(Json(transfer))
}

pub async fn list_withheld(
    State(state): State<AppState>,
) -> Result<impl IntoResponse, AppError> {
    let withheld = state.transfers.list_unreconciled().await?;
    Ok(Json(withheld))
}
