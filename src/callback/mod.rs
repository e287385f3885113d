//! Callback Reconciler
//!
//! Entry point for vendor webhooks. Every callback is acknowledged, matched
//! or not, so the vendor stops redelivering; the reconciliation sweep covers
//! anything dropped here.

use std::sync::Arc;

use tracing::{error, info, warn};

use crate::disbursement::{DisbursementError, ReconcileOutcome, SettlementCoordinator};
use crate::disbursement::types::{DisbursementId, ValidationId};
use crate::vendor::VendorId;

/// What happened to one disbursement callback
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallbackAck {
    pub vendor: VendorId,
    pub reference_id: Option<String>,
    pub disbursement_id: Option<DisbursementId>,
    pub outcome: Option<ReconcileOutcome>,
}

impl CallbackAck {
    fn dropped(vendor: VendorId, reference_id: Option<String>) -> Self {
        Self {
            vendor,
            reference_id,
            disbursement_id: None,
            outcome: None,
        }
    }

    pub fn matched(&self) -> bool {
        self.disbursement_id.is_some()
    }
}

/// What happened to one validation callback
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationAck {
    pub vendor: VendorId,
    pub validation_id: Option<ValidationId>,
}

pub struct CallbackReconciler {
    coordinator: Arc<SettlementCoordinator>,
}

impl CallbackReconciler {
    pub fn new(coordinator: Arc<SettlementCoordinator>) -> Self {
        Self { coordinator }
    }

    /// Apply a disbursement status callback from `vendor`
    pub async fn handle_disbursement(
        &self,
        vendor: VendorId,
        payload: &serde_json::Value,
    ) -> CallbackAck {
        let adapter = match self.coordinator.router().registry().primary(vendor) {
            Ok(adapter) => adapter,
            Err(e) => {
                warn!(vendor = %vendor, error = %e, "Callback for unregistered vendor dropped");
                return CallbackAck::dropped(vendor, None);
            }
        };

        let report = match adapter.process_callback_disbursement(payload) {
            Ok(report) => report,
            Err(e) => {
                warn!(
                    vendor = %vendor,
                    error = %e,
                    payload = %payload,
                    "Malformed disbursement callback dropped"
                );
                return CallbackAck::dropped(vendor, None);
            }
        };

        let found = match self.lookup(vendor, &report.reference_id, report.idempotency_key.as_deref()).await {
            Ok(found) => found,
            Err(e) => {
                error!(
                    vendor = %vendor,
                    reference_id = %report.reference_id,
                    error = %e,
                    "Callback lookup failed"
                );
                return CallbackAck::dropped(vendor, Some(report.reference_id));
            }
        };
        let Some(id) = found else {
            warn!(
                vendor = %vendor,
                reference_id = %report.reference_id,
                idempotency_key = ?report.idempotency_key,
                raw_status = %report.raw_status,
                "Unmatched disbursement callback dropped"
            );
            return CallbackAck::dropped(vendor, Some(report.reference_id));
        };

        let reference_id = report.reference_id.clone();
        let raw_status = report.raw_status.clone();
        let outcome = match self.coordinator.reconcile(id, vendor, report).await {
            Ok(outcome) => {
                match &outcome {
                    ReconcileOutcome::Applied(status) => info!(
                        disbursement_id = id,
                        vendor = %vendor,
                        raw_status = %raw_status,
                        status = %status,
                        "Disbursement callback applied"
                    ),
                    other => info!(
                        disbursement_id = id,
                        vendor = %vendor,
                        raw_status = %raw_status,
                        outcome = ?other,
                        "Late or duplicate disbursement callback ignored"
                    ),
                }
                Some(outcome)
            }
            Err(e) => {
                log_reconcile_error(id, vendor, &e);
                None
            }
        };

        CallbackAck {
            vendor,
            reference_id: Some(reference_id),
            disbursement_id: Some(id),
            outcome,
        }
    }

    /// Apply a recipient validation callback from `vendor`
    pub async fn handle_validation(
        &self,
        vendor: VendorId,
        payload: &serde_json::Value,
    ) -> ValidationAck {
        match self.coordinator.validation().handle_callback(vendor, payload).await {
            Ok(validation) => ValidationAck {
                vendor,
                validation_id: validation.map(|v| v.id),
            },
            Err(e) => {
                warn!(
                    vendor = %vendor,
                    error = %e,
                    payload = %payload,
                    "Validation callback dropped"
                );
                ValidationAck {
                    vendor,
                    validation_id: None,
                }
            }
        }
    }

    /// Match on the vendor reference first, then on the echoed key
    async fn lookup(
        &self,
        vendor: VendorId,
        reference_id: &str,
        idempotency_key: Option<&str>,
    ) -> Result<Option<DisbursementId>, DisbursementError> {
        let store = self.coordinator.store();
        if !reference_id.is_empty()
            && let Some(d) = store.find_by_reference(vendor, reference_id).await?
        {
            return Ok(Some(d.id));
        }
        if let Some(key) = idempotency_key
            && let Some(d) = store.find_by_reference(vendor, key).await?
        {
            return Ok(Some(d.id));
        }
        Ok(None)
    }
}

fn log_reconcile_error(id: DisbursementId, vendor: VendorId, e: &DisbursementError) {
    match e {
        DisbursementError::ProtocolViolation(_) => error!(
            disbursement_id = id,
            vendor = %vendor,
            error = %e,
            alert = true,
            "Callback rejected: protocol violation"
        ),
        _ => error!(
            disbursement_id = id,
            vendor = %vendor,
            error = %e,
            "Callback could not be applied"
        ),
    }
}
