//! Vendor review and association endpoints for the ops surface.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::Deserialize;
use uuid::Uuid;

use crate::domain::AssociationKind;
use crate::error::AppError;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct ReviewVendorRequest {
    pub friendly_name: String,
}

pub async fn review(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(request): Json<ReviewVendorRequest>,
) -> Result<impl IntoResponse, AppError> {
    let vendor = state
        .vendor_resolver
        .mark_reviewed(id, &request.friendly_name)
        .await?;
    Ok(Json(vendor))
}

#[derive(Debug, Deserialize)]
pub struct AssociateVendorsRequest {
    pub vendor_id: Uuid,
    pub associated_vendor_id: Uuid,
    pub kind: AssociationKind,
}

pub async fn associate(
    State(state): State<AppState>,
    Json(request): Json<AssociateVendorsRequest>,
) -> Result<impl IntoResponse, AppError> {
    let association = state
        .vendor_resolver
        .associate_vendors(
            request.vendor_id,
            request.associated_vendor_id,
            request.kind,
        )
        .await?;
    Ok((StatusCode::CREATED, Json(association)))
}
