//! Disbursement Store
//!
//! Persistence port for validations, disbursements and their append-only
//! history. Every disbursement mutation is a compare-and-swap on
//! `(status, retry_times, step)` and writes its history rows atomically with
//! the update.

pub mod memory;
pub mod postgres;
pub mod schema;

pub use memory::MemoryStore;
pub use postgres::PgStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::error::DisbursementError;
use super::state::{DisbursementStatus, Step};
use super::types::{
    Disbursement, DisbursementHistory, DisbursementId, NewDisbursement, NewValidation,
    RecipientValidation, ValidationHistory, ValidationId,
};
use crate::vendor::VendorId;

/// Fields a CAS update must still find unchanged
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateVersion {
    pub status: DisbursementStatus,
    pub retry_times: u32,
    pub step: Option<Step>,
}

impl From<&Disbursement> for StateVersion {
    fn from(d: &Disbursement) -> Self {
        Self {
            status: d.status,
            retry_times: d.retry_times,
            step: d.step,
        }
    }
}

#[async_trait]
pub trait DisbursementStore: Send + Sync {
    // === Recipient validation ===

    async fn insert_validation(
        &self,
        new: NewValidation,
    ) -> Result<RecipientValidation, DisbursementError>;

    async fn get_validation(
        &self,
        id: ValidationId,
    ) -> Result<Option<RecipientValidation>, DisbursementError>;

    async fn find_validation_by_reference(
        &self,
        vendor: VendorId,
        reference_id: &str,
    ) -> Result<Option<RecipientValidation>, DisbursementError>;

    /// Persist `validation` and its field history in one write
    async fn save_validation(
        &self,
        validation: &RecipientValidation,
        history: &[ValidationHistory],
    ) -> Result<(), DisbursementError>;

    async fn validation_history(
        &self,
        id: ValidationId,
    ) -> Result<Vec<ValidationHistory>, DisbursementError>;

    // === Disbursement ===

    /// Insert a new INITIATED disbursement plus its creation snapshot
    async fn insert_disbursement(
        &self,
        new: NewDisbursement,
    ) -> Result<Disbursement, DisbursementError>;

    async fn get_disbursement(
        &self,
        id: DisbursementId,
    ) -> Result<Option<Disbursement>, DisbursementError>;

    async fn get_by_external_id(
        &self,
        external_id: &str,
    ) -> Result<Option<Disbursement>, DisbursementError>;

    /// Match a vendor reference against either the stored vendor reference
    /// id or the idempotency key presented to that vendor
    async fn find_by_reference(
        &self,
        vendor: VendorId,
        reference: &str,
    ) -> Result<Option<Disbursement>, DisbursementError>;

    /// CAS update. Returns `false` when the stored row no longer matches
    /// `expected` (another writer got there first); nothing is written then.
    async fn update_disbursement(
        &self,
        disbursement: &Disbursement,
        expected: StateVersion,
        history: &[DisbursementHistory],
    ) -> Result<bool, DisbursementError>;

    async fn disbursement_history(
        &self,
        id: DisbursementId,
    ) -> Result<Vec<DisbursementHistory>, DisbursementError>;

    /// Most recent snapshot written while the disbursement was at `step`
    async fn latest_step_history(
        &self,
        id: DisbursementId,
        step: Step,
    ) -> Result<Option<DisbursementHistory>, DisbursementError>;

    /// FAILED with a retry due at or before `now`
    async fn find_due_retries(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Disbursement>, DisbursementError>;

    /// PENDING and untouched since `older_than`
    async fn find_stale_pending(
        &self,
        older_than: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Disbursement>, DisbursementError>;

    /// INITIATED with a persisted attempt (crash between persist and call),
    /// or a payout hop whose internal hop already completed
    async fn find_stale_initiated(
        &self,
        older_than: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Disbursement>, DisbursementError>;
}
