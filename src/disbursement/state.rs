//! Disbursement / Validation State Definitions
//!
//! State IDs are stored as SMALLINT in PostgreSQL.
//!
//! ```text
//! INITIATED → PENDING → COMPLETED
//!     │          │
//!     └──────────┴────→ FAILED ──(explicit retry)──→ INITIATED
//! ```

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Disbursement FSM States
///
/// COMPLETED is terminal. FAILED is terminal unless the retry policy
/// schedules another attempt, which re-enters INITIATED.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[repr(i16)]
pub enum DisbursementStatus {
    /// Attempt recorded, vendor not yet acknowledged
    Initiated = 0,

    /// Vendor accepted the transfer (or outcome unknown after timeout)
    Pending = 10,

    /// Terminal: money moved
    Completed = 40,

    /// Attempt failed (retryable or permanent, see `FailureClass`)
    Failed = -10,
}

impl DisbursementStatus {
    pub const ALL: [DisbursementStatus; 4] = [
        DisbursementStatus::Initiated,
        DisbursementStatus::Pending,
        DisbursementStatus::Completed,
        DisbursementStatus::Failed,
    ];

    /// Terminal from the point of view of vendor callbacks
    #[inline]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            DisbursementStatus::Completed | DisbursementStatus::Failed
        )
    }

    /// Re-invoking settlement in these states must be a no-op
    #[inline]
    pub fn is_in_flight_or_done(&self) -> bool {
        matches!(
            self,
            DisbursementStatus::Pending | DisbursementStatus::Completed
        )
    }

    /// Check whether `self -> to` is a legal transition.
    ///
    /// `retry` marks the explicit retry path, the only way out of FAILED.
    pub fn can_transition(&self, to: DisbursementStatus, retry: bool) -> bool {
        use DisbursementStatus::*;
        match (*self, to) {
            (Completed, _) => false,
            (Failed, Initiated) => retry,
            (Failed, Failed) => true,
            (Failed, _) => false,
            (Pending, Initiated) => false,
            (Initiated | Pending, _) => true,
        }
    }

    /// Get the numeric state ID for PostgreSQL storage
    #[inline]
    pub fn id(&self) -> i16 {
        *self as i16
    }

    /// Convert from PostgreSQL state ID
    pub fn from_id(id: i16) -> Option<Self> {
        match id {
            0 => Some(DisbursementStatus::Initiated),
            10 => Some(DisbursementStatus::Pending),
            40 => Some(DisbursementStatus::Completed),
            -10 => Some(DisbursementStatus::Failed),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DisbursementStatus::Initiated => "INITIATED",
            DisbursementStatus::Pending => "PENDING",
            DisbursementStatus::Completed => "COMPLETED",
            DisbursementStatus::Failed => "FAILED",
        }
    }
}

impl fmt::Display for DisbursementStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for DisbursementStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "INITIATED" => Ok(DisbursementStatus::Initiated),
            "PENDING" => Ok(DisbursementStatus::Pending),
            "COMPLETED" => Ok(DisbursementStatus::Completed),
            "FAILED" => Ok(DisbursementStatus::Failed),
            _ => Err(format!("Invalid disbursement status: {}", s)),
        }
    }
}

impl TryFrom<i16> for DisbursementStatus {
    type Error = ();

    fn try_from(value: i16) -> Result<Self, Self::Error> {
        DisbursementStatus::from_id(value).ok_or(())
    }
}

/// Recipient validation states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[repr(i16)]
pub enum ValidationStatus {
    Initiated = 0,
    /// Async vendor: waiting for validation callback
    Pending = 10,
    Success = 40,
    NameInvalid = -10,
    AccountInvalid = -20,
    /// Vendor unreachable / protocol error (not a validation verdict)
    Failed = -30,
}

impl ValidationStatus {
    /// A vendor verdict has been reached (positive or negative)
    #[inline]
    pub fn is_verdict(&self) -> bool {
        matches!(
            self,
            ValidationStatus::Success
                | ValidationStatus::NameInvalid
                | ValidationStatus::AccountInvalid
        )
    }

    #[inline]
    pub fn id(&self) -> i16 {
        *self as i16
    }

    pub fn from_id(id: i16) -> Option<Self> {
        match id {
            0 => Some(ValidationStatus::Initiated),
            10 => Some(ValidationStatus::Pending),
            40 => Some(ValidationStatus::Success),
            -10 => Some(ValidationStatus::NameInvalid),
            -20 => Some(ValidationStatus::AccountInvalid),
            -30 => Some(ValidationStatus::Failed),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ValidationStatus::Initiated => "INITIATED",
            ValidationStatus::Pending => "PENDING",
            ValidationStatus::Success => "SUCCESS",
            ValidationStatus::NameInvalid => "NAME_INVALID",
            ValidationStatus::AccountInvalid => "ACCOUNT_INVALID",
            ValidationStatus::Failed => "FAILED",
        }
    }
}

impl fmt::Display for ValidationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Hop of a multi-hop transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(i16)]
pub enum Step {
    /// Step 1: internal float hop between two ledger accounts
    Internal = 1,
    /// Step 2: external payout to the recipient
    External = 2,
}

impl Step {
    #[inline]
    pub fn id(&self) -> i16 {
        *self as i16
    }

    pub fn from_id(id: i16) -> Option<Self> {
        match id {
            1 => Some(Step::Internal),
            2 => Some(Step::External),
            _ => None,
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.id())
    }
}
