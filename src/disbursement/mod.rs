//! Disbursement Settlement
//!
//! Owns the disbursement lifecycle:
//!
//! ```text
//! submit ─→ INITIATED ─→ PENDING ─→ COMPLETED
//!               │           │
//!               └───────────┴──→ FAILED ──(retry due)──→ INITIATED
//! ```
//!
//! - [`coordinator`] drives attempts, multi-hop transfers and reconciliation
//! - [`worker`] picks up due retries and stale records
//! - [`store`] persists rows and append-only history

pub mod coordinator;
pub mod error;
pub mod guard;
pub mod locks;
pub mod notifier;
pub mod retry;
pub mod state;
pub mod store;
pub mod types;
pub mod worker;

pub use coordinator::{CallSettings, OverrideRequest, ReconcileOutcome, SettlementCoordinator};
pub use error::DisbursementError;
pub use notifier::{LedgerEvent, LedgerNotifier};
pub use retry::{FailureClass, RetryPolicy};
pub use state::{DisbursementStatus, Step, ValidationStatus};
pub use store::{DisbursementStore, MemoryStore, PgStore};
pub use types::{
    DisburseRequest, Disbursement, DisbursementHistory, DisbursementId, DisbursementType,
    DisbursementView, IdempotencyKey, RecipientValidation, ValidationId,
};
pub use worker::{RetryWorker, WorkerConfig};
