//! Disbursement Core Types
//!
//! Records persisted by the store plus the inbound request / outbound view
//! shapes exchanged with the loan collaborator.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::error::DisbursementError;
use super::retry::FailureClass;
use super::state::{DisbursementStatus, Step, ValidationStatus};
use crate::vendor::VendorId;

pub type DisbursementId = i64;
pub type ValidationId = i64;

/// What the money is for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DisbursementType {
    #[default]
    Loan,
    Cashback,
    Bulk,
}

impl DisbursementType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DisbursementType::Loan => "loan",
            DisbursementType::Cashback => "cashback",
            DisbursementType::Bulk => "bulk",
        }
    }
}

impl fmt::Display for DisbursementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for DisbursementType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "loan" => Ok(DisbursementType::Loan),
            "cashback" => Ok(DisbursementType::Cashback),
            "bulk" => Ok(DisbursementType::Bulk),
            _ => Err(format!("Invalid disbursement type: {}", s)),
        }
    }
}

/// Idempotency key presented to a vendor.
///
/// Pure function of (external id, retry counter[, step]): a new attempt
/// always bumps the retry counter, so keys never repeat across attempts.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IdempotencyKey(String);

impl IdempotencyKey {
    pub fn derive(external_id: &str, retry_times: u32, step: Option<Step>) -> Self {
        match step {
            None => Self(format!("{}-{}", external_id, retry_times)),
            Some(step) => Self(format!("{}-s{}-{}", external_id, step.id(), retry_times)),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for IdempotencyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ============================================================================
// Recipient Validation
// ============================================================================

/// One attempt to confirm a recipient's bank-account identity
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecipientValidation {
    pub id: ValidationId,
    pub vendor: Option<VendorId>,
    pub bank_code: String,
    pub account_number: String,
    /// Name declared by the borrower
    pub name_in_bank: String,
    /// Name returned by the vendor
    pub validated_name: Option<String>,
    pub status: ValidationStatus,
    pub reference_id: Option<String>,
    pub reason: Option<String>,
    pub attempt: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Insert payload for a new recipient validation
#[derive(Debug, Clone)]
pub struct NewValidation {
    pub bank_code: String,
    pub account_number: String,
    pub name_in_bank: String,
}

impl RecipientValidation {
    pub fn is_success(&self) -> bool {
        self.status == ValidationStatus::Success
    }

    /// Field-level diff against `previous`, as `(field, old, new)`.
    pub fn diff(&self, previous: &RecipientValidation) -> Vec<(&'static str, Option<String>, Option<String>)> {
        let mut changes = Vec::new();
        let mut push = |field, old: Option<String>, new: Option<String>| {
            if old != new {
                changes.push((field, old, new));
            }
        };
        push(
            "vendor",
            previous.vendor.map(|v| v.to_string()),
            self.vendor.map(|v| v.to_string()),
        );
        push(
            "bank_code",
            Some(previous.bank_code.clone()),
            Some(self.bank_code.clone()),
        );
        push(
            "account_number",
            Some(previous.account_number.clone()),
            Some(self.account_number.clone()),
        );
        push(
            "name_in_bank",
            Some(previous.name_in_bank.clone()),
            Some(self.name_in_bank.clone()),
        );
        push(
            "validated_name",
            previous.validated_name.clone(),
            self.validated_name.clone(),
        );
        push(
            "status",
            Some(previous.status.to_string()),
            Some(self.status.to_string()),
        );
        push(
            "reference_id",
            previous.reference_id.clone(),
            self.reference_id.clone(),
        );
        push("reason", previous.reason.clone(), self.reason.clone());
        push(
            "attempt",
            Some(previous.attempt.to_string()),
            Some(self.attempt.to_string()),
        );
        changes
    }

    /// Account number and reference id are frozen once validated.
    pub fn check_immutable(&self, previous: &RecipientValidation) -> Result<(), DisbursementError> {
        if previous.status != ValidationStatus::Success {
            return Ok(());
        }
        if self.account_number != previous.account_number {
            return Err(DisbursementError::ImmutableField("account_number"));
        }
        if self.reference_id != previous.reference_id {
            return Err(DisbursementError::ImmutableField("reference_id"));
        }
        Ok(())
    }
}

/// Audit row for one mutated validation field
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidationHistory {
    pub validation_id: ValidationId,
    pub field: String,
    pub old_value: Option<String>,
    pub new_value: Option<String>,
    pub note: Option<String>,
    pub created_at: DateTime<Utc>,
}

// ============================================================================
// Disbursement
// ============================================================================

/// One money-movement record for one loan/transaction
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Disbursement {
    pub id: DisbursementId,
    pub validation_id: ValidationId,
    pub disbursement_type: DisbursementType,
    /// Correlation id from the loan collaborator
    pub external_id: String,
    /// Amount paid out to the recipient
    pub amount: Decimal,
    /// Pre-fee amount (moved by the first leg of a multi-hop transfer)
    pub original_amount: Decimal,
    /// Chosen vendor
    pub method: Option<VendorId>,
    /// Vendor-assigned reference id
    pub reference_id: Option<String>,
    /// Key presented on the current attempt
    pub idempotency_key: Option<String>,
    pub status: DisbursementStatus,
    pub retry_times: u32,
    /// Retries that were not charged against the attempt budget
    pub uncharged_retries: u32,
    pub step: Option<Step>,
    /// Human-readable reason shown to callers
    pub reason: Option<String>,
    /// Literal vendor-provided reason text
    pub vendor_reason: Option<String>,
    pub failure_class: Option<FailureClass>,
    pub next_retry_at: Option<DateTime<Utc>>,
    /// Vendor to avoid on the next routing decision (force switch)
    pub excluded_vendor: Option<VendorId>,
    pub archived: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Insert payload for a new disbursement
#[derive(Debug, Clone)]
pub struct NewDisbursement {
    pub validation_id: ValidationId,
    pub disbursement_type: DisbursementType,
    pub external_id: String,
    pub amount: Decimal,
    pub original_amount: Decimal,
}

impl Disbursement {
    /// Apply a status change, rejecting illegal transitions.
    pub fn transition(
        &mut self,
        to: DisbursementStatus,
        retry: bool,
    ) -> Result<(), DisbursementError> {
        if !self.status.can_transition(to, retry) {
            return Err(DisbursementError::InvalidStateTransition {
                from: self.status,
                to,
            });
        }
        self.status = to;
        Ok(())
    }

    /// Attempts consumed so far, including the current one
    pub fn charged_attempts(&self) -> u32 {
        (self.retry_times + 1).saturating_sub(self.uncharged_retries)
    }

    /// Closed: COMPLETED, or FAILED with no retry scheduled
    pub fn is_closed(&self) -> bool {
        match self.status {
            DisbursementStatus::Completed => true,
            DisbursementStatus::Failed => self.next_retry_at.is_none(),
            _ => false,
        }
    }

    /// Amount the current leg moves
    pub fn leg_amount(&self) -> Decimal {
        match self.step {
            Some(Step::Internal) => self.original_amount,
            _ => self.amount,
        }
    }

    pub fn idempotency_key(&self) -> IdempotencyKey {
        IdempotencyKey::derive(&self.external_id, self.retry_times, self.step)
    }

    /// Canonical view returned to the loan collaborator
    pub fn view(&self, validation: Option<&RecipientValidation>) -> DisbursementView {
        DisbursementView {
            id: self.id,
            status: self.status,
            method: self.method.map(|m| m.to_string()),
            amount: self.amount,
            reason: self.reason.clone(),
            bank_info: validation.map(BankInfo::from),
        }
    }
}

impl fmt::Display for Disbursement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Disbursement[{}] ext={} amount={} method={} state={} retry={}",
            self.id,
            self.external_id,
            self.amount,
            self.method.map(|m| m.as_str()).unwrap_or("-"),
            self.status,
            self.retry_times
        )
    }
}

/// Immutable snapshot appended on every disbursement mutation
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DisbursementHistory {
    pub disbursement_id: DisbursementId,
    pub step: Option<Step>,
    pub status: DisbursementStatus,
    pub retry_times: u32,
    pub method: Option<VendorId>,
    pub reference_id: Option<String>,
    pub amount: Decimal,
    pub reason: Option<String>,
    pub vendor_reason: Option<String>,
    pub changed_fields: Vec<String>,
    pub note: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl DisbursementHistory {
    /// Snapshot `current`, listing fields that differ from `previous`.
    pub fn snapshot(
        current: &Disbursement,
        previous: Option<&Disbursement>,
        note: Option<&str>,
    ) -> Self {
        let changed_fields = match previous {
            Some(prev) => changed_fields(prev, current),
            None => vec!["created".to_string()],
        };
        Self {
            disbursement_id: current.id,
            step: current.step,
            status: current.status,
            retry_times: current.retry_times,
            method: current.method,
            reference_id: current.reference_id.clone(),
            amount: current.amount,
            reason: current.reason.clone(),
            vendor_reason: current.vendor_reason.clone(),
            changed_fields,
            note: note.map(str::to_string),
            created_at: Utc::now(),
        }
    }
}

fn changed_fields(prev: &Disbursement, cur: &Disbursement) -> Vec<String> {
    let mut fields = Vec::new();
    macro_rules! cmp {
        ($($field:ident),*) => {
            $(if prev.$field != cur.$field {
                fields.push(stringify!($field).to_string());
            })*
        };
    }
    cmp!(
        amount,
        original_amount,
        method,
        reference_id,
        idempotency_key,
        status,
        retry_times,
        uncharged_retries,
        step,
        reason,
        vendor_reason,
        failure_class,
        next_retry_at,
        excluded_vendor,
        archived
    );
    fields
}

// ============================================================================
// Inbound request / outbound view
// ============================================================================

/// "Ready to disburse" request from the loan collaborator
#[derive(Debug, Clone)]
pub struct DisburseRequest {
    pub disbursement_id: Option<DisbursementId>,
    pub validation_id: ValidationId,
    pub amount: Decimal,
    pub original_amount: Option<Decimal>,
    pub external_id: String,
    pub disbursement_type: DisbursementType,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BankInfo {
    pub bank_code: String,
    pub account_number: String,
    pub name_in_bank: String,
    pub validated_name: Option<String>,
    pub validation_status: ValidationStatus,
}

impl From<&RecipientValidation> for BankInfo {
    fn from(v: &RecipientValidation) -> Self {
        Self {
            bank_code: v.bank_code.clone(),
            account_number: v.account_number.clone(),
            name_in_bank: v.name_in_bank.clone(),
            validated_name: v.validated_name.clone(),
            validation_status: v.status,
        }
    }
}

/// Canonical disbursement view `{id, status, method, amount, reason, bank_info}`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DisbursementView {
    pub id: DisbursementId,
    pub status: DisbursementStatus,
    pub method: Option<String>,
    pub amount: Decimal,
    pub reason: Option<String>,
    pub bank_info: Option<BankInfo>,
}


#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;

    #[test]
    fn test_idempotency_key_is_pure() {
        let a = IdempotencyKey::derive("123", 0, None);
        let b = IdempotencyKey::derive("123", 0, None);
        assert_eq!(a, b);
        assert_eq!(a.as_str(), "123-0");
        assert_ne!(a, IdempotencyKey::derive("123", 1, None));
        assert_eq!(
            IdempotencyKey::derive("123", 2, Some(Step::External)).as_str(),
            "123-s2-2"
        );
    }

    #[test]
    fn test_transition_rejects_backward_moves() {
        let mut d = disbursement(1, "ext-1");
        d.transition(DisbursementStatus::Pending, false).unwrap();
        d.transition(DisbursementStatus::Completed, false).unwrap();
        let err = d.transition(DisbursementStatus::Pending, true).unwrap_err();
        assert!(matches!(
            err,
            DisbursementError::InvalidStateTransition { .. }
        ));
        assert_eq!(d.status, DisbursementStatus::Completed);
    }

    #[test]
    fn test_charged_attempts() {
        let mut d = disbursement(1, "ext-1");
        assert_eq!(d.charged_attempts(), 1);
        d.retry_times = 3;
        d.uncharged_retries = 2;
        assert_eq!(d.charged_attempts(), 2);
    }

    #[test]
    fn test_leg_amount_uses_original_for_internal_hop() {
        let mut d = disbursement(1, "ext-1");
        assert_eq!(d.leg_amount(), d.amount);
        d.step = Some(Step::Internal);
        assert_eq!(d.leg_amount(), d.original_amount);
        d.step = Some(Step::External);
        assert_eq!(d.leg_amount(), d.amount);
    }

    #[test]
    fn test_history_snapshot_lists_changed_fields() {
        let before = disbursement(7, "ext-7");
        let mut after = before.clone();
        after.status = DisbursementStatus::Pending;
        after.reference_id = Some("REF-1".to_string());

        let h = DisbursementHistory::snapshot(&after, Some(&before), Some("accepted"));
        assert_eq!(h.disbursement_id, 7);
        assert_eq!(h.status, DisbursementStatus::Pending);
        assert!(h.changed_fields.contains(&"status".to_string()));
        assert!(h.changed_fields.contains(&"reference_id".to_string()));
        assert!(!h.changed_fields.contains(&"amount".to_string()));
    }

    #[test]
    fn test_validation_immutable_after_success() {
        let mut before = validation(1, ValidationStatus::Success);
        before.reference_id = Some("INQ-1".to_string());
        let mut after = before.clone();
        after.account_number = "999".to_string();
        assert!(matches!(
            after.check_immutable(&before),
            Err(DisbursementError::ImmutableField("account_number"))
        ));

        let pending = validation(2, ValidationStatus::Pending);
        let mut changed = pending.clone();
        changed.account_number = "999".to_string();
        assert!(changed.check_immutable(&pending).is_ok());
    }

    #[test]
    fn test_validation_diff() {
        let before = validation(1, ValidationStatus::Initiated);
        let mut after = before.clone();
        after.status = ValidationStatus::NameInvalid;
        after.validated_name = Some("JOHN DOE".to_string());
        let diff = after.diff(&before);
        let fields: Vec<_> = diff.iter().map(|(f, _, _)| *f).collect();
        assert_eq!(fields, vec!["validated_name", "status"]);
    }
}
