//! Gateway request/response types
//!
//! - `ApiResponse<T>`: unified `{code, msg, data}` envelope
//! - `ApiError` / `ApiResult`: handler error path
//! - Request DTOs validated with `validator`
//! - Response DTOs with amounts rendered as strings

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use validator::Validate;

use crate::callback::{CallbackAck, ValidationAck};
use crate::disbursement::types::{
    DisburseRequest, DisbursementId, DisbursementType, DisbursementView, NewValidation,
    RecipientValidation, ValidationId,
};
use crate::disbursement::{DisbursementError, DisbursementStatus, OverrideRequest, ReconcileOutcome};

// ============================================================================
// Unified API Response Format
// ============================================================================

/// Unified API response wrapper
///
/// - code: 0 = success, non-zero = error code
/// - msg: short message description
/// - data: actual data (success) or null (error)
#[derive(Debug, Serialize, ToSchema)]
pub struct ApiResponse<T> {
    #[schema(example = 0)]
    pub code: i32,
    #[schema(example = "ok")]
    pub msg: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            code: error_codes::SUCCESS,
            msg: "ok".to_string(),
            data: Some(data),
        }
    }

    pub fn error(code: i32, msg: impl Into<String>) -> ApiResponse<()> {
        ApiResponse {
            code,
            msg: msg.into(),
            data: None,
        }
    }
}

/// Standard API error codes
pub mod error_codes {
    pub const SUCCESS: i32 = 0;

    // Client errors (1xxx)
    pub const INVALID_PARAMETER: i32 = 1001;
    pub const RECIPIENT_NOT_VALIDATED: i32 = 1002;
    pub const EXTERNAL_ID_CONFLICT: i32 = 1003;
    pub const NO_ELIGIBLE_VENDOR: i32 = 1004;

    // Resource errors (4xxx)
    pub const DISBURSEMENT_NOT_FOUND: i32 = 4001;
    pub const VALIDATION_NOT_FOUND: i32 = 4002;
    pub const STATE_CONFLICT: i32 = 4091;

    // Server errors (5xxx)
    pub const INTERNAL_ERROR: i32 = 5000;
    pub const SERVICE_UNAVAILABLE: i32 = 5001;
    pub const DATABASE_ERROR: i32 = 5002;
    pub const PROTOCOL_VIOLATION: i32 = 5003;
}

// ============================================================================
// Error path
// ============================================================================

#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub code: i32,
    pub msg: String,
}

impl ApiError {
    pub fn new(status: StatusCode, code: i32, msg: impl Into<String>) -> Self {
        Self {
            status,
            code,
            msg: msg.into(),
        }
    }

    pub fn bad_request(msg: impl ToString) -> Self {
        Self::new(
            StatusCode::BAD_REQUEST,
            error_codes::INVALID_PARAMETER,
            msg.to_string(),
        )
    }

    pub fn service_unavailable(msg: impl Into<String>) -> Self {
        Self::new(
            StatusCode::SERVICE_UNAVAILABLE,
            error_codes::SERVICE_UNAVAILABLE,
            msg,
        )
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            error_codes::INTERNAL_ERROR,
            msg,
        )
    }

    pub fn into_err<T>(self) -> Result<T, Self> {
        Err(self)
    }
}

impl From<DisbursementError> for ApiError {
    fn from(e: DisbursementError) -> Self {
        let code = match &e {
            DisbursementError::InvalidAmount
            | DisbursementError::MissingExternalId
            | DisbursementError::ImmutableField(_) => error_codes::INVALID_PARAMETER,
            DisbursementError::RecipientNotValidated { .. } => error_codes::RECIPIENT_NOT_VALIDATED,
            DisbursementError::ExternalIdConflict(_) => error_codes::EXTERNAL_ID_CONFLICT,
            DisbursementError::NoEligibleVendor { .. } => error_codes::NO_ELIGIBLE_VENDOR,
            DisbursementError::DisbursementNotFound(_) => error_codes::DISBURSEMENT_NOT_FOUND,
            DisbursementError::ValidationNotFound(_) => error_codes::VALIDATION_NOT_FOUND,
            DisbursementError::NotCancellable(_)
            | DisbursementError::ConcurrentUpdate(_)
            | DisbursementError::InvalidStateTransition { .. } => error_codes::STATE_CONFLICT,
            DisbursementError::VendorUnavailable(_) => error_codes::SERVICE_UNAVAILABLE,
            DisbursementError::DatabaseError(_) => error_codes::DATABASE_ERROR,
            DisbursementError::ProtocolViolation(_) => error_codes::PROTOCOL_VIOLATION,
            DisbursementError::VendorNotRegistered(_) | DisbursementError::SystemError(_) => {
                error_codes::INTERNAL_ERROR
            }
        };
        let status =
            StatusCode::from_u16(e.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        // Storage detail stays in the logs
        let msg = match &e {
            DisbursementError::DatabaseError(_) => "database error".to_string(),
            _ => e.to_string(),
        };
        if status.is_server_error() {
            tracing::error!(error_code = e.code(), error = %e, "Request failed");
        }
        Self::new(status, code, msg)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(ApiResponse::<()>::error(self.code, self.msg))).into_response()
    }
}

pub type ApiResult<T> = Result<(StatusCode, Json<ApiResponse<T>>), ApiError>;

pub fn ok<T>(data: T) -> ApiResult<T> {
    Ok((StatusCode::OK, Json(ApiResponse::success(data))))
}

pub fn created<T>(data: T) -> ApiResult<T> {
    Ok((StatusCode::CREATED, Json(ApiResponse::success(data))))
}

// ============================================================================
// Requests
// ============================================================================

/// Recipient to validate
#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct CreateValidationRequest {
    #[schema(example = "BCA")]
    #[validate(length(min = 2, max = 16))]
    pub bank_code: String,
    #[schema(example = "1234567890")]
    #[validate(length(min = 4, max = 34))]
    pub account_number: String,
    /// Account holder name as declared by the borrower
    #[schema(example = "John Doe")]
    #[validate(length(min = 1, max = 128))]
    pub name_in_bank: String,
}

impl From<CreateValidationRequest> for NewValidation {
    fn from(req: CreateValidationRequest) -> Self {
        Self {
            bank_code: req.bank_code.trim().to_uppercase(),
            account_number: req.account_number.trim().to_string(),
            name_in_bank: req.name_in_bank.trim().to_string(),
        }
    }
}

/// Create-or-continue a disbursement
#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct SubmitDisbursementRequest {
    /// Continue an existing disbursement
    pub disbursement_id: Option<DisbursementId>,
    #[serde(alias = "validation_id")]
    #[validate(range(min = 1))]
    pub name_bank_validation_id: ValidationId,
    #[schema(value_type = String, example = "500000")]
    pub amount: Decimal,
    /// Pre-fee amount used by the balance guard on the first hop
    #[schema(value_type = Option<String>)]
    pub original_amount: Option<Decimal>,
    #[schema(example = "123")]
    #[validate(length(min = 1, max = 64))]
    pub external_id: String,
    #[serde(rename = "type", default)]
    #[schema(value_type = String, example = "loan")]
    pub disbursement_type: DisbursementType,
}

impl From<SubmitDisbursementRequest> for DisburseRequest {
    fn from(req: SubmitDisbursementRequest) -> Self {
        Self {
            disbursement_id: req.disbursement_id,
            validation_id: req.name_bank_validation_id,
            amount: req.amount,
            original_amount: req.original_amount,
            external_id: req.external_id,
            disbursement_type: req.disbursement_type,
        }
    }
}

/// Operator override of a disbursement status
#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct OverrideStatusRequest {
    /// `COMPLETED` or `FAILED`
    #[schema(example = "COMPLETED")]
    pub status: String,
    #[validate(length(min = 1, max = 64))]
    pub operator: String,
    #[validate(length(min = 1, max = 512))]
    pub reason: String,
}

impl OverrideStatusRequest {
    pub fn into_override(self) -> Result<OverrideRequest, ApiError> {
        let status = match self.status.to_uppercase().as_str() {
            "COMPLETED" => DisbursementStatus::Completed,
            "FAILED" => DisbursementStatus::Failed,
            other => {
                return ApiError::bad_request(format!(
                    "override status must be COMPLETED or FAILED, got {}",
                    other
                ))
                .into_err();
            }
        };
        Ok(OverrideRequest {
            status,
            operator: self.operator,
            reason: self.reason,
        })
    }
}

#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct CancelRequest {
    #[validate(length(min = 1, max = 512))]
    pub reason: String,
}

// ============================================================================
// Responses
// ============================================================================

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct BankInfoData {
    pub bank_code: String,
    pub account_number: String,
    pub name_in_bank: String,
    pub validated_name: Option<String>,
    pub validation_status: String,
}

/// Canonical disbursement view
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct DisbursementData {
    #[schema(example = 1)]
    pub id: DisbursementId,
    #[schema(example = "PENDING")]
    pub status: String,
    #[schema(example = "wire")]
    pub method: Option<String>,
    #[schema(example = "500000")]
    pub amount: String,
    pub reason: Option<String>,
    pub bank_info: Option<BankInfoData>,
}

impl From<DisbursementView> for DisbursementData {
    fn from(v: DisbursementView) -> Self {
        Self {
            id: v.id,
            status: v.status.as_str().to_string(),
            method: v.method,
            amount: v.amount.to_string(),
            reason: v.reason,
            bank_info: v.bank_info.map(|b| BankInfoData {
                bank_code: b.bank_code,
                account_number: b.account_number,
                name_in_bank: b.name_in_bank,
                validated_name: b.validated_name,
                validation_status: b.validation_status.as_str().to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ValidationData {
    pub id: ValidationId,
    #[schema(example = "SUCCESS")]
    pub status: String,
    pub vendor: Option<String>,
    pub bank_code: String,
    pub account_number: String,
    pub name_in_bank: String,
    pub validated_name: Option<String>,
    pub reason: Option<String>,
    pub attempt: u32,
}

impl From<RecipientValidation> for ValidationData {
    fn from(v: RecipientValidation) -> Self {
        Self {
            id: v.id,
            status: v.status.as_str().to_string(),
            vendor: v.vendor.map(|vendor| vendor.to_string()),
            bank_code: v.bank_code,
            account_number: v.account_number,
            name_in_bank: v.name_in_bank,
            validated_name: v.validated_name,
            reason: v.reason,
            attempt: v.attempt,
        }
    }
}

/// Callback acknowledgement; returned with HTTP 200 whatever happened
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct CallbackAckData {
    pub matched: bool,
    /// `APPLIED`, `IGNORED`, `STALE`, `CONFLICT` or `DROPPED`
    #[schema(example = "APPLIED")]
    pub outcome: String,
}

impl CallbackAckData {
    pub fn dropped() -> Self {
        Self {
            matched: false,
            outcome: "DROPPED".to_string(),
        }
    }
}

impl From<CallbackAck> for CallbackAckData {
    fn from(ack: CallbackAck) -> Self {
        let outcome = match &ack.outcome {
            Some(ReconcileOutcome::Applied(_)) => "APPLIED",
            Some(ReconcileOutcome::Ignored) => "IGNORED",
            Some(ReconcileOutcome::Stale) => "STALE",
            Some(ReconcileOutcome::Conflict) => "CONFLICT",
            None => "DROPPED",
        };
        Self {
            matched: ack.matched(),
            outcome: outcome.to_string(),
        }
    }
}

impl From<ValidationAck> for CallbackAckData {
    fn from(ack: ValidationAck) -> Self {
        let matched = ack.validation_id.is_some();
        Self {
            matched,
            outcome: if matched { "APPLIED" } else { "DROPPED" }.to_string(),
        }
    }
}
