//! Disbursement handlers

use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, State},
};
use validator::Validate;

use super::super::state::AppState;
use super::super::types::{
    ApiError, ApiResult, CancelRequest, DisbursementData, OverrideStatusRequest,
    SubmitDisbursementRequest, ok,
};
use crate::disbursement::types::{DisbursementHistory, DisbursementId};

/// Create-or-continue a disbursement and run one settlement attempt
///
/// POST /api/v1/disbursements
///
/// Re-submitting an existing `external_id` continues that disbursement;
/// while PENDING or COMPLETED it is a no-op that returns the current view.
#[utoipa::path(
    post,
    path = "/api/v1/disbursements",
    request_body = SubmitDisbursementRequest,
    responses(
        (status = 200, description = "Canonical disbursement view after the attempt", body = DisbursementData),
        (status = 400, description = "Invalid parameters"),
        (status = 404, description = "Validation or disbursement not found"),
        (status = 409, description = "Concurrent update"),
        (status = 422, description = "Recipient not validated or no eligible vendor")
    ),
    tag = "Disbursement"
)]
pub async fn submit_disbursement(
    State(state): State<Arc<AppState>>,
    Json(req): Json<SubmitDisbursementRequest>,
) -> ApiResult<DisbursementData> {
    req.validate().map_err(ApiError::bad_request)?;
    tracing::info!(
        external_id = %req.external_id,
        validation_id = req.name_bank_validation_id,
        amount = %req.amount,
        "Disbursement submitted"
    );
    let coordinator = &state.coordinator;
    let d = coordinator.submit(req.into()).await?;
    ok(coordinator.view(d.id).await?.into())
}

/// GET /api/v1/disbursements/{id}
#[utoipa::path(
    get,
    path = "/api/v1/disbursements/{id}",
    params(("id" = i64, Path, description = "Disbursement id")),
    responses(
        (status = 200, description = "Canonical disbursement view", body = DisbursementData),
        (status = 404, description = "Disbursement not found")
    ),
    tag = "Disbursement"
)]
pub async fn get_disbursement(
    State(state): State<Arc<AppState>>,
    Path(id): Path<DisbursementId>,
) -> ApiResult<DisbursementData> {
    ok(state.coordinator.view(id).await?.into())
}

/// Append-only audit trail
///
/// GET /api/v1/disbursements/{id}/history
#[utoipa::path(
    get,
    path = "/api/v1/disbursements/{id}/history",
    params(("id" = i64, Path, description = "Disbursement id")),
    responses(
        (status = 200, description = "Snapshots, oldest first", content_type = "application/json"),
        (status = 404, description = "Disbursement not found")
    ),
    tag = "Disbursement"
)]
pub async fn get_disbursement_history(
    State(state): State<Arc<AppState>>,
    Path(id): Path<DisbursementId>,
) -> ApiResult<Vec<DisbursementHistory>> {
    ok(state.coordinator.history(id).await?)
}

/// Operator override to a terminal status
///
/// POST /api/v1/disbursements/{id}/override
#[utoipa::path(
    post,
    path = "/api/v1/disbursements/{id}/override",
    params(("id" = i64, Path, description = "Disbursement id")),
    request_body = OverrideStatusRequest,
    responses(
        (status = 200, description = "Overridden", body = DisbursementData),
        (status = 400, description = "Invalid parameters"),
        (status = 404, description = "Disbursement not found"),
        (status = 409, description = "Transition not allowed")
    ),
    tag = "Disbursement"
)]
pub async fn override_disbursement(
    State(state): State<Arc<AppState>>,
    Path(id): Path<DisbursementId>,
    Json(req): Json<OverrideStatusRequest>,
) -> ApiResult<DisbursementData> {
    req.validate().map_err(ApiError::bad_request)?;
    let request = req.into_override()?;
    let coordinator = &state.coordinator;
    coordinator.override_status(id, request).await?;
    ok(coordinator.view(id).await?.into())
}

/// Cancel a disbursement that has no transfer in flight
///
/// POST /api/v1/disbursements/{id}/cancel
#[utoipa::path(
    post,
    path = "/api/v1/disbursements/{id}/cancel",
    params(("id" = i64, Path, description = "Disbursement id")),
    request_body = CancelRequest,
    responses(
        (status = 200, description = "Cancelled", body = DisbursementData),
        (status = 404, description = "Disbursement not found"),
        (status = 409, description = "Transfer already in flight or settled")
    ),
    tag = "Disbursement"
)]
pub async fn cancel_disbursement(
    State(state): State<Arc<AppState>>,
    Path(id): Path<DisbursementId>,
    Json(req): Json<CancelRequest>,
) -> ApiResult<DisbursementData> {
    req.validate().map_err(ApiError::bad_request)?;
    let coordinator = &state.coordinator;
    coordinator.cancel(id, &req.reason).await?;
    ok(coordinator.view(id).await?.into())
}
