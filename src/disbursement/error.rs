//! Disbursement Error Types
//!
//! Engine-level errors. Vendor business outcomes (name mismatch, transfer
//! rejected) are NOT errors; they travel as `ValidationOutcome` /
//! `DisburseOutcome` values. Only transport failures and programming-level
//! faults surface here.

use thiserror::Error;

use super::state::{DisbursementStatus, ValidationStatus};
use crate::vendor::TransportError;

#[derive(Error, Debug, Clone)]
pub enum DisbursementError {
    // === Request Errors ===
    #[error("Amount must be greater than zero")]
    InvalidAmount,

    #[error("External id must not be empty")]
    MissingExternalId,

    #[error("Disbursement not found: {0}")]
    DisbursementNotFound(i64),

    #[error("Recipient validation not found: {0}")]
    ValidationNotFound(i64),

    #[error("Recipient validation {id} is {status}, not SUCCESS")]
    RecipientNotValidated { id: i64, status: ValidationStatus },

    #[error("External id {0} is already linked to a different recipient")]
    ExternalIdConflict(String),

    // === Routing Errors ===
    #[error("No eligible vendor for bank {bank_code} amount {amount}")]
    NoEligibleVendor { bank_code: String, amount: String },

    #[error("Vendor not registered: {0}")]
    VendorNotRegistered(String),

    // === State Errors ===
    #[error("Invalid state transition: {from} -> {to}")]
    InvalidStateTransition {
        from: DisbursementStatus,
        to: DisbursementStatus,
    },

    #[error("Protocol violation: {0}")]
    ProtocolViolation(String),

    #[error("Field is immutable once validated: {0}")]
    ImmutableField(&'static str),

    #[error("Disbursement {0} was acknowledged by the vendor and cannot be cancelled")]
    NotCancellable(i64),

    #[error("Concurrent update detected for disbursement {0}")]
    ConcurrentUpdate(i64),

    // === Vendor Errors ===
    #[error("Vendor unavailable: {0}")]
    VendorUnavailable(#[from] TransportError),

    // === System Errors ===
    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Internal system error: {0}")]
    SystemError(String),
}

impl DisbursementError {
    /// Get the error code for API responses
    pub fn code(&self) -> &'static str {
        match self {
            DisbursementError::InvalidAmount => "INVALID_AMOUNT",
            DisbursementError::MissingExternalId => "MISSING_EXTERNAL_ID",
            DisbursementError::DisbursementNotFound(_) => "DISBURSEMENT_NOT_FOUND",
            DisbursementError::ValidationNotFound(_) => "VALIDATION_NOT_FOUND",
            DisbursementError::RecipientNotValidated { .. } => "RECIPIENT_NOT_VALIDATED",
            DisbursementError::ExternalIdConflict(_) => "EXTERNAL_ID_CONFLICT",
            DisbursementError::NoEligibleVendor { .. } => "NO_ELIGIBLE_VENDOR",
            DisbursementError::VendorNotRegistered(_) => "VENDOR_NOT_REGISTERED",
            DisbursementError::InvalidStateTransition { .. } => "INVALID_STATE_TRANSITION",
            DisbursementError::ProtocolViolation(_) => "PROTOCOL_VIOLATION",
            DisbursementError::ImmutableField(_) => "IMMUTABLE_FIELD",
            DisbursementError::NotCancellable(_) => "NOT_CANCELLABLE",
            DisbursementError::ConcurrentUpdate(_) => "CONCURRENT_UPDATE",
            DisbursementError::VendorUnavailable(_) => "VENDOR_UNAVAILABLE",
            DisbursementError::DatabaseError(_) => "DATABASE_ERROR",
            DisbursementError::SystemError(_) => "SYSTEM_ERROR",
        }
    }

    /// Get HTTP status code suggestion
    pub fn http_status(&self) -> u16 {
        match self {
            DisbursementError::InvalidAmount
            | DisbursementError::MissingExternalId
            | DisbursementError::ExternalIdConflict(_) => 400,
            DisbursementError::DisbursementNotFound(_)
            | DisbursementError::ValidationNotFound(_) => 404,
            DisbursementError::NotCancellable(_)
            | DisbursementError::ConcurrentUpdate(_)
            | DisbursementError::InvalidStateTransition { .. } => 409,
            DisbursementError::RecipientNotValidated { .. }
            | DisbursementError::NoEligibleVendor { .. }
            | DisbursementError::ImmutableField(_) => 422,
            DisbursementError::VendorUnavailable(_) => 503,
            DisbursementError::VendorNotRegistered(_)
            | DisbursementError::ProtocolViolation(_)
            | DisbursementError::DatabaseError(_)
            | DisbursementError::SystemError(_) => 500,
        }
    }
}

impl From<sqlx::Error> for DisbursementError {
    fn from(e: sqlx::Error) -> Self {
        DisbursementError::DatabaseError(e.to_string())
    }
}
