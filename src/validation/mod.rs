//! Recipient Name/Bank Validation
//!
//! Confirms a recipient's declared name against the bank's record before
//! any transfer. A vendor-reported name mismatch goes through the
//! approximate-match fallback in [`fuzzy`], which may override it to
//! SUCCESS. Every attempt is persisted (with per-field history) before the
//! caller gets an answer.

pub mod fuzzy;

pub use fuzzy::{NameMatch, NameMatcher};

use std::sync::Arc;

use chrono::Utc;
use tracing::{info, warn};

use crate::disbursement::error::DisbursementError;
use crate::disbursement::state::ValidationStatus;
use crate::disbursement::store::DisbursementStore;
use crate::disbursement::types::{
    NewValidation, RecipientValidation, ValidationHistory, ValidationId,
};
use crate::router::VendorRouter;
use crate::vendor::{ValidationOutcome, VendorId};

pub struct ValidationService {
    store: Arc<dyn DisbursementStore>,
    router: Arc<VendorRouter>,
    matcher: NameMatcher,
}

impl ValidationService {
    pub fn new(
        store: Arc<dyn DisbursementStore>,
        router: Arc<VendorRouter>,
        matcher: NameMatcher,
    ) -> Self {
        Self {
            store,
            router,
            matcher,
        }
    }

    /// Record a new recipient and validate it right away
    pub async fn create(&self, new: NewValidation) -> Result<RecipientValidation, DisbursementError> {
        let validation = self.store.insert_validation(new).await?;
        info!(
            validation_id = validation.id,
            bank_code = %validation.bank_code,
            "Recipient validation created"
        );
        self.validate(validation.id).await
    }

    pub async fn get(&self, id: ValidationId) -> Result<RecipientValidation, DisbursementError> {
        self.store
            .get_validation(id)
            .await?
            .ok_or(DisbursementError::ValidationNotFound(id))
    }

    pub async fn history(&self, id: ValidationId) -> Result<Vec<ValidationHistory>, DisbursementError> {
        self.store.validation_history(id).await
    }

    /// Run validation on the routed vendor.
    ///
    /// SUCCESS is reused as-is, PENDING waits for the vendor callback.
    /// Transport failures mark the attempt FAILED and surface as
    /// `VendorUnavailable`, never as a validation verdict.
    pub async fn validate(&self, id: ValidationId) -> Result<RecipientValidation, DisbursementError> {
        let current = self.get(id).await?;
        if matches!(
            current.status,
            ValidationStatus::Success | ValidationStatus::Pending
        ) {
            return Ok(current);
        }

        let vendor = self.router.route_validation(&current.bank_code)?;
        let adapter = self.router.registry().primary(vendor)?;

        let mut attempt = current.clone();
        attempt.vendor = Some(vendor);
        attempt.attempt += 1;

        match adapter.validate(&attempt).await {
            Ok(outcome) => self.apply_outcome(&current, attempt, outcome, None).await,
            Err(e) => {
                warn!(
                    validation_id = id,
                    vendor = %vendor,
                    error = %e,
                    "Recipient validation transport failure"
                );
                attempt.status = ValidationStatus::Failed;
                attempt.reason = Some(e.to_string());
                self.persist(&current, &mut attempt, Some("vendor unavailable"))
                    .await?;
                Err(DisbursementError::VendorUnavailable(e))
            }
        }
    }

    /// Apply an asynchronous validation result delivered by `vendor`.
    ///
    /// Returns `None` when the reference matches no validation.
    pub async fn handle_callback(
        &self,
        vendor: VendorId,
        payload: &serde_json::Value,
    ) -> Result<Option<RecipientValidation>, DisbursementError> {
        let adapter = self.router.registry().primary(vendor)?;
        let callback = adapter.process_callback_validation(payload)?;

        let Some(current) = self
            .store
            .find_validation_by_reference(vendor, &callback.reference_id)
            .await?
        else {
            warn!(
                vendor = %vendor,
                reference_id = %callback.reference_id,
                "Unmatched validation callback dropped"
            );
            return Ok(None);
        };

        if current.status.is_verdict() {
            info!(
                validation_id = current.id,
                vendor = %vendor,
                status = %current.status,
                "Duplicate validation callback ignored"
            );
            return Ok(Some(current));
        }

        let next = current.clone();
        self.apply_outcome(&current, next, callback.outcome, Some("callback"))
            .await
            .map(Some)
    }

    async fn apply_outcome(
        &self,
        previous: &RecipientValidation,
        mut next: RecipientValidation,
        outcome: ValidationOutcome,
        source: Option<&str>,
    ) -> Result<RecipientValidation, DisbursementError> {
        let mut note = source.map(str::to_string);
        match outcome {
            ValidationOutcome::Success {
                validated_name,
                reference_id,
            } => {
                next.status = ValidationStatus::Success;
                next.validated_name = Some(validated_name);
                next.reference_id = reference_id.or(next.reference_id);
                next.reason = None;
            }
            ValidationOutcome::NameInvalid {
                validated_name,
                reference_id,
                reason,
            } => {
                next.reference_id = reference_id.or(next.reference_id);
                next.validated_name = validated_name;
                next.status = ValidationStatus::NameInvalid;
                next.reason = Some(reason);

                if let Some(returned) = next.validated_name.as_deref() {
                    let verdict = self.matcher.compare(&next.name_in_bank, returned);
                    if verdict.accepted {
                        next.status = ValidationStatus::Success;
                        next.reason = None;
                        info!(
                            validation_id = next.id,
                            declared = %next.name_in_bank,
                            returned = %returned,
                            distance = verdict.distance,
                            ratio = verdict.ratio,
                            diff = ?next.diff(previous),
                            "Name mismatch overridden by approximate match"
                        );
                        note = Some(format!(
                            "approximate name match override (distance {}, ratio {:.3})",
                            verdict.distance, verdict.ratio
                        ));
                    }
                }
            }
            ValidationOutcome::AccountInvalid {
                reference_id,
                reason,
            } => {
                next.reference_id = reference_id.or(next.reference_id);
                next.status = ValidationStatus::AccountInvalid;
                next.reason = Some(reason);
            }
            ValidationOutcome::Pending { reference_id } => {
                next.status = ValidationStatus::Pending;
                next.reference_id = Some(reference_id);
            }
        }

        next.check_immutable(previous)?;
        self.persist(previous, &mut next, note.as_deref()).await?;
        info!(
            validation_id = next.id,
            vendor = ?next.vendor,
            status = %next.status,
            "Recipient validation recorded"
        );
        Ok(next)
    }

    async fn persist(
        &self,
        previous: &RecipientValidation,
        next: &mut RecipientValidation,
        note: Option<&str>,
    ) -> Result<(), DisbursementError> {
        let now = Utc::now();
        next.updated_at = now;
        let history: Vec<ValidationHistory> = next
            .diff(previous)
            .into_iter()
            .map(|(field, old_value, new_value)| ValidationHistory {
                validation_id: next.id,
                field: field.to_string(),
                old_value,
                new_value,
                note: note.map(str::to_string),
                created_at: now,
            })
            .collect();
        self.store.save_validation(next, &history).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ValidationConfig;
    use crate::disbursement::store::MemoryStore;
    use crate::router::RoutingConfig;
    use crate::vendor::mock::MockVendor;
    use crate::vendor::{TransportError, VendorRegistry};
    use serde_json::json;

    fn setup() -> (ValidationService, Arc<MockVendor>, Arc<MemoryStore>) {
        let mock = Arc::new(MockVendor::new(VendorId::Mock));
        let mut registry = VendorRegistry::new();
        registry.register(mock.clone());
        let router = Arc::new(VendorRouter::new(
            RoutingConfig::default(),
            Arc::new(registry),
        ));
        let store = Arc::new(MemoryStore::new());
        let service = ValidationService::new(
            store.clone(),
            router,
            NameMatcher::from_config(&ValidationConfig::default()),
        );
        (service, mock, store)
    }

    fn recipient(name: &str) -> NewValidation {
        NewValidation {
            bank_code: "BCA".to_string(),
            account_number: "1234567890".to_string(),
            name_in_bank: name.to_string(),
        }
    }

    #[tokio::test]
    async fn test_exact_match_succeeds() {
        let (service, mock, _) = setup();
        let v = service.create(recipient("John Doe")).await.unwrap();
        assert_eq!(v.status, ValidationStatus::Success);
        assert_eq!(v.vendor, Some(VendorId::Mock));
        assert_eq!(v.attempt, 1);
        assert_eq!(mock.validate_calls(), 1);
    }

    #[tokio::test]
    async fn test_approximate_match_overrides_and_logs_history() {
        let (service, mock, _) = setup();
        mock.set_holder_name("John Doe");
        let v = service.create(recipient("Jhon Doe")).await.unwrap();
        assert_eq!(v.status, ValidationStatus::Success);
        assert_eq!(v.validated_name.as_deref(), Some("John Doe"));

        let history = service.history(v.id).await.unwrap();
        let status_row = history.iter().find(|h| h.field == "status").unwrap();
        assert_eq!(status_row.new_value.as_deref(), Some("SUCCESS"));
        assert!(status_row
            .note
            .as_deref()
            .unwrap()
            .starts_with("approximate name match override"));
    }

    #[tokio::test]
    async fn test_real_mismatch_stays_invalid() {
        let (service, mock, _) = setup();
        mock.set_holder_name("Jane Smith");
        let v = service.create(recipient("John Doe")).await.unwrap();
        assert_eq!(v.status, ValidationStatus::NameInvalid);
        assert_eq!(v.reason.as_deref(), Some("name mismatch"));
    }

    #[tokio::test]
    async fn test_success_is_not_revalidated() {
        let (service, mock, _) = setup();
        let v = service.create(recipient("John Doe")).await.unwrap();
        let again = service.validate(v.id).await.unwrap();
        assert_eq!(again.status, ValidationStatus::Success);
        assert_eq!(mock.validate_calls(), 1);
    }

    #[tokio::test]
    async fn test_transport_error_is_not_a_verdict() {
        let (service, mock, _) = setup();
        mock.push_validation(Err(TransportError::Timeout("read timeout".into())));
        let err = service.create(recipient("John Doe")).await.unwrap_err();
        assert!(matches!(err, DisbursementError::VendorUnavailable(_)));

        // Retrying the same validation reaches the vendor again
        let stored = service.get(1).await.unwrap();
        assert_eq!(stored.status, ValidationStatus::Failed);
        let v = service.validate(stored.id).await.unwrap();
        assert_eq!(v.status, ValidationStatus::Success);
        assert_eq!(v.attempt, 2);
    }

    #[tokio::test]
    async fn test_async_validation_callback() {
        let (service, mock, _) = setup();
        mock.push_validation(Ok(ValidationOutcome::Pending {
            reference_id: "INQ-9".into(),
        }));
        let v = service.create(recipient("Jhon Doe")).await.unwrap();
        assert_eq!(v.status, ValidationStatus::Pending);

        let payload = json!({
            "reference_id": "INQ-9",
            "status": "NAME_INVALID",
            "validated_name": "JOHN DOE",
        });
        let updated = service
            .handle_callback(VendorId::Mock, &payload)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated.status, ValidationStatus::Success);

        // Replay is ignored
        let replay = service
            .handle_callback(VendorId::Mock, &payload)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(replay, updated);

        let unknown = json!({"reference_id": "NOPE", "status": "SUCCESS", "validated_name": "X"});
        assert!(service
            .handle_callback(VendorId::Mock, &unknown)
            .await
            .unwrap()
            .is_none());
    }
}
