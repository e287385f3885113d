//! HTTP handlers
//!
//! - [`validation`]: recipient validation
//! - [`disbursement`]: submit, query, override, cancel
//! - [`callback`]: vendor webhooks (always 200)
//! - [`health`]: liveness

pub mod callback;
pub mod disbursement;
pub mod health;
pub mod validation;

pub use callback::{disbursement_callback, validation_callback};
pub use disbursement::{
    cancel_disbursement, get_disbursement, get_disbursement_history, override_disbursement,
    submit_disbursement,
};
pub use health::{HealthResponse, health_check};
pub use validation::{create_validation, get_validation, get_validation_history};
