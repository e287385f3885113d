//! Recipient validation handlers

use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, State},
};
use validator::Validate;

use super::super::state::AppState;
use super::super::types::{
    ApiError, ApiResult, CreateValidationRequest, ValidationData, created, ok,
};
use crate::disbursement::types::{ValidationHistory, ValidationId};

/// Create a recipient validation and run it against the routed vendor
///
/// POST /api/v1/validations
#[utoipa::path(
    post,
    path = "/api/v1/validations",
    request_body = CreateValidationRequest,
    responses(
        (status = 201, description = "Validation recorded; status may be PENDING for async vendors", body = ValidationData),
        (status = 400, description = "Invalid parameters"),
        (status = 422, description = "No vendor can validate this bank"),
        (status = 503, description = "Vendor unavailable")
    ),
    tag = "Validation"
)]
pub async fn create_validation(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateValidationRequest>,
) -> ApiResult<ValidationData> {
    req.validate().map_err(ApiError::bad_request)?;
    let validation = state.validation().create(req.into()).await?;
    created(validation.into())
}

/// GET /api/v1/validations/{id}
#[utoipa::path(
    get,
    path = "/api/v1/validations/{id}",
    params(("id" = i64, Path, description = "Validation id")),
    responses(
        (status = 200, description = "Validation", body = ValidationData),
        (status = 404, description = "Validation not found")
    ),
    tag = "Validation"
)]
pub async fn get_validation(
    State(state): State<Arc<AppState>>,
    Path(id): Path<ValidationId>,
) -> ApiResult<ValidationData> {
    let validation = state.validation().get(id).await?;
    ok(validation.into())
}

/// Field-level change log of a validation
///
/// GET /api/v1/validations/{id}/history
#[utoipa::path(
    get,
    path = "/api/v1/validations/{id}/history",
    params(("id" = i64, Path, description = "Validation id")),
    responses(
        (status = 200, description = "Field changes, oldest first", content_type = "application/json"),
        (status = 404, description = "Validation not found")
    ),
    tag = "Validation"
)]
pub async fn get_validation_history(
    State(state): State<Arc<AppState>>,
    Path(id): Path<ValidationId>,
) -> ApiResult<Vec<ValidationHistory>> {
    let service = state.validation();
    service.get(id).await?;
    ok(service.history(id).await?)
}
