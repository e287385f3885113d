//! Disbursement Settlement Engine
//!
//! Moves approved loan money to borrower bank accounts through several
//! payment vendors.
//!
//! # Modules
//!
//! - [`validation`] - Recipient name/bank validation with approximate-name override
//! - [`router`] - Vendor selection (bank support, whitelist, experiments)
//! - [`disbursement`] - Settlement state machine, retries, balance guard, worker
//! - [`callback`] - Vendor webhook reconciliation
//! - [`vendor`] - Vendor adapters and registry
//! - [`gateway`] - HTTP API
//! - [`db`] - Postgres connection
//! - [`config`] / [`logging`] - Ambient setup

pub mod callback;
pub mod config;
pub mod db;
pub mod disbursement;
pub mod gateway;
pub mod logging;
pub mod router;
pub mod validation;
pub mod vendor;

pub use callback::CallbackReconciler;
pub use config::AppConfig;
pub use disbursement::{
    DisbursementError, DisbursementStatus, RetryWorker, SettlementCoordinator, WorkerConfig,
};
pub use router::VendorRouter;
pub use validation::ValidationService;
pub use vendor::{VendorAdapter, VendorId, VendorRegistry};
