//! Agreement lifecycle endpoints.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use chrono::NaiveDate;
use serde::Deserialize;
use uuid::Uuid;

use crate::domain::{Contribution, IntervalUnit, Recurrence};
use crate::error::AppError;
use crate::services::NewParticipant;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct CreateAgreementRequest {
    pub owner_user_id: Uuid,
    pub owner_source_account_id: Uuid,
    pub owner_destination_account_id: Uuid,
    pub nickname: String,
    /// Present for vendor-triggered agreements.
    pub vendor_id: Option<Uuid>,
    /// Present for recurring agreements.
    pub recurrence: Option<RecurrenceRequest>,
    pub participants: Vec<ParticipantRequest>,
}

#[derive(Debug, Deserialize)]
pub struct RecurrenceRequest {
    pub interval: IntervalUnit,
    pub frequency: u32,
    pub next_scheduled_date: NaiveDate,
    pub end_date: Option<NaiveDate>,
}

#[derive(Debug, Deserialize)]
pub struct ParticipantRequest {
    pub user_id: Option<Uuid>,
    pub email: Option<String>,
    pub contribution: Contribution,
}

impl ParticipantRequest {
    fn into_new_participant(self) -> Result<NewParticipant, AppError> {
        match (self.user_id, self.email) {
            (Some(user_id), None) => Ok(NewParticipant::User {
                user_id,
                contribution: self.contribution,
            }),
            (None, Some(email)) => Ok(NewParticipant::Invite {
                email,
                contribution: self.contribution,
            }),
            _ => Err(AppError::BadRequest(
                "participant must have exactly one of user_id or email".to_string(),
            )),
        }
    }
}

pub async fn create(
    State(state): State<AppState>,
    Json(request): Json<CreateAgreementRequest>,
) -> Result<impl IntoResponse, AppError> {
    let participants = request
        .participants
        .into_iter()
        .map(ParticipantRequest::into_new_participant)
        .collect::<Result<Vec<_>, _>>()?;

    let agreement = match (request.vendor_id, request.recurrence) {
        (Some(vendor_id), None) => {
            state
                .agreement_store
                .create_vendor_agreement(
                    request.owner_user_id,
                    request.owner_source_account_id,
                    request.owner_destination_account_id,
                    vendor_id,
                    &request.nickname,
                    participants,
                )
                .await?
        }
        (None, Some(recurrence)) => {
            let recurrence = Recurrence {
                interval: recurrence.interval,
                frequency: recurrence.frequency,
                next_scheduled_date: recurrence.next_scheduled_date,
                end_date: recurrence.end_date,
            };
            state
                .agreement_store
                .create_recurring_agreement(
                    request.owner_user_id,
                    request.owner_source_account_id,
                    request.owner_destination_account_id,
                    recurrence,
                    &request.nickname,
                    participants,
                )
                .await?
        }
        _ => {
            return Err(AppError::BadRequest(
                "exactly one of vendor_id or recurrence is required".to_string(),
            ))
        }
    };

    Ok((StatusCode::CREATED, Json(agreement)))
}

pub async fn get(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let agreement = state.agreement_store.get(id).await?;
    Ok(Json(agreement))
}

pub async fn list_participants(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let participants = state.agreements.list_participants(id).await?;
    Ok(Json(participants))
}

pub async fn deactivate(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let agreement = state.agreement_store.deactivate(id).await?;
    Ok(Json(agreement))
}

#[derive(Debug, Deserialize)]
pub struct ActivateParticipantRequest {
    pub payment_account_id: Uuid,
}

pub async fn activate_participant(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(request): Json<ActivateParticipantRequest>,
) -> Result<impl IntoResponse, AppError> {
    let participant = state
        .agreement_store
        .activate_participant(id, request.payment_account_id)
        .await?;
    Ok(Json(participant))
}

#[derive(Debug, Deserialize)]
pub struct ConvertInviteRequest {
    pub email: String,
    pub user_id: Uuid,
}

pub async fn convert_invite(
    State(state): State<AppState>,
    Json(request): Json<ConvertInviteRequest>,
) -> Result<impl IntoResponse, AppError> {
    let converted = state
        .agreement_store
        .convert_invite(&request.email, request.user_id)
        .await?;
    Ok(Json(converted))
}
