use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use super::{DisbursementStore, StateVersion};
use crate::disbursement::error::DisbursementError;
use crate::disbursement::state::{DisbursementStatus, Step, ValidationStatus};
use crate::disbursement::types::{
    Disbursement, DisbursementHistory, DisbursementId, NewDisbursement, NewValidation,
    RecipientValidation, ValidationHistory, ValidationId,
};
use crate::vendor::VendorId;

#[derive(Default)]
struct Inner {
    next_validation_id: ValidationId,
    next_disbursement_id: DisbursementId,
    validations: HashMap<ValidationId, RecipientValidation>,
    validation_history: Vec<ValidationHistory>,
    disbursements: HashMap<DisbursementId, Disbursement>,
    disbursement_history: Vec<DisbursementHistory>,
}

/// Thread-safe in-memory store for tests and local runs.
///
/// One lock guards rows and history so a CAS update and its history rows
/// land together.
#[derive(Default, Clone)]
pub struct MemoryStore {
    inner: Arc<RwLock<Inner>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn oldest_first(mut rows: Vec<Disbursement>, limit: usize) -> Vec<Disbursement> {
    rows.sort_by_key(|d| (d.updated_at, d.id));
    rows.truncate(limit);
    rows
}

#[async_trait]
impl DisbursementStore for MemoryStore {
    async fn insert_validation(
        &self,
        new: NewValidation,
    ) -> Result<RecipientValidation, DisbursementError> {
        let mut inner = self.inner.write().await;
        inner.next_validation_id += 1;
        let now = Utc::now();
        let validation = RecipientValidation {
            id: inner.next_validation_id,
            vendor: None,
            bank_code: new.bank_code,
            account_number: new.account_number,
            name_in_bank: new.name_in_bank,
            validated_name: None,
            status: ValidationStatus::Initiated,
            reference_id: None,
            reason: None,
            attempt: 0,
            created_at: now,
            updated_at: now,
        };
        inner.validations.insert(validation.id, validation.clone());
        Ok(validation)
    }

    async fn get_validation(
        &self,
        id: ValidationId,
    ) -> Result<Option<RecipientValidation>, DisbursementError> {
        Ok(self.inner.read().await.validations.get(&id).cloned())
    }

    async fn find_validation_by_reference(
        &self,
        vendor: VendorId,
        reference_id: &str,
    ) -> Result<Option<RecipientValidation>, DisbursementError> {
        let inner = self.inner.read().await;
        Ok(inner
            .validations
            .values()
            .find(|v| v.vendor == Some(vendor) && v.reference_id.as_deref() == Some(reference_id))
            .cloned())
    }

    async fn save_validation(
        &self,
        validation: &RecipientValidation,
        history: &[ValidationHistory],
    ) -> Result<(), DisbursementError> {
        let mut inner = self.inner.write().await;
        if !inner.validations.contains_key(&validation.id) {
            return Err(DisbursementError::ValidationNotFound(validation.id));
        }
        inner.validations.insert(validation.id, validation.clone());
        inner.validation_history.extend_from_slice(history);
        Ok(())
    }

    async fn validation_history(
        &self,
        id: ValidationId,
    ) -> Result<Vec<ValidationHistory>, DisbursementError> {
        let inner = self.inner.read().await;
        Ok(inner
            .validation_history
            .iter()
            .filter(|h| h.validation_id == id)
            .cloned()
            .collect())
    }

    async fn insert_disbursement(
        &self,
        new: NewDisbursement,
    ) -> Result<Disbursement, DisbursementError> {
        let mut inner = self.inner.write().await;
        if inner
            .disbursements
            .values()
            .any(|d| d.external_id == new.external_id)
        {
            return Err(DisbursementError::ExternalIdConflict(new.external_id));
        }
        inner.next_disbursement_id += 1;
        let now = Utc::now();
        let disbursement = Disbursement {
            id: inner.next_disbursement_id,
            validation_id: new.validation_id,
            disbursement_type: new.disbursement_type,
            external_id: new.external_id,
            amount: new.amount,
            original_amount: new.original_amount,
            method: None,
            reference_id: None,
            idempotency_key: None,
            status: DisbursementStatus::Initiated,
            retry_times: 0,
            uncharged_retries: 0,
            step: None,
            reason: None,
            vendor_reason: None,
            failure_class: None,
            next_retry_at: None,
            excluded_vendor: None,
            archived: false,
            created_at: now,
            updated_at: now,
        };
        inner
            .disbursement_history
            .push(DisbursementHistory::snapshot(&disbursement, None, None));
        inner
            .disbursements
            .insert(disbursement.id, disbursement.clone());
        Ok(disbursement)
    }

    async fn get_disbursement(
        &self,
        id: DisbursementId,
    ) -> Result<Option<Disbursement>, DisbursementError> {
        Ok(self.inner.read().await.disbursements.get(&id).cloned())
    }

    async fn get_by_external_id(
        &self,
        external_id: &str,
    ) -> Result<Option<Disbursement>, DisbursementError> {
        let inner = self.inner.read().await;
        Ok(inner
            .disbursements
            .values()
            .find(|d| d.external_id == external_id)
            .cloned())
    }

    async fn find_by_reference(
        &self,
        vendor: VendorId,
        reference: &str,
    ) -> Result<Option<Disbursement>, DisbursementError> {
        let inner = self.inner.read().await;
        Ok(inner
            .disbursements
            .values()
            .find(|d| {
                d.method == Some(vendor)
                    && (d.reference_id.as_deref() == Some(reference)
                        || d.idempotency_key.as_deref() == Some(reference))
            })
            .cloned())
    }

    async fn update_disbursement(
        &self,
        disbursement: &Disbursement,
        expected: StateVersion,
        history: &[DisbursementHistory],
    ) -> Result<bool, DisbursementError> {
        let mut inner = self.inner.write().await;
        let Some(current) = inner.disbursements.get_mut(&disbursement.id) else {
            return Err(DisbursementError::DisbursementNotFound(disbursement.id));
        };
        if StateVersion::from(&*current) != expected {
            return Ok(false);
        }
        *current = disbursement.clone();
        inner.disbursement_history.extend_from_slice(history);
        Ok(true)
    }

    async fn disbursement_history(
        &self,
        id: DisbursementId,
    ) -> Result<Vec<DisbursementHistory>, DisbursementError> {
        let inner = self.inner.read().await;
        Ok(inner
            .disbursement_history
            .iter()
            .filter(|h| h.disbursement_id == id)
            .cloned()
            .collect())
    }

    async fn latest_step_history(
        &self,
        id: DisbursementId,
        step: Step,
    ) -> Result<Option<DisbursementHistory>, DisbursementError> {
        let inner = self.inner.read().await;
        Ok(inner
            .disbursement_history
            .iter()
            .rev()
            .find(|h| h.disbursement_id == id && h.step == Some(step))
            .cloned())
    }

    async fn find_due_retries(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Disbursement>, DisbursementError> {
        let inner = self.inner.read().await;
        let due = inner
            .disbursements
            .values()
            .filter(|d| {
                d.status == DisbursementStatus::Failed
                    && !d.archived
                    && d.next_retry_at.is_some_and(|at| at <= now)
            })
            .cloned()
            .collect();
        Ok(oldest_first(due, limit))
    }

    async fn find_stale_pending(
        &self,
        older_than: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Disbursement>, DisbursementError> {
        let inner = self.inner.read().await;
        let stale = inner
            .disbursements
            .values()
            .filter(|d| d.status == DisbursementStatus::Pending && d.updated_at < older_than)
            .cloned()
            .collect();
        Ok(oldest_first(stale, limit))
    }

    async fn find_stale_initiated(
        &self,
        older_than: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Disbursement>, DisbursementError> {
        let inner = self.inner.read().await;
        let stale = inner
            .disbursements
            .values()
            .filter(|d| {
                d.status == DisbursementStatus::Initiated
                    && (d.idempotency_key.is_some() || d.step == Some(Step::External))
                    && d.updated_at < older_than
            })
            .cloned()
            .collect();
        Ok(oldest_first(stale, limit))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::disbursement::types::DisbursementType;
    use rust_decimal::Decimal;

    fn new_disbursement(ext: &str) -> NewDisbursement {
        NewDisbursement {
            validation_id: 1,
            disbursement_type: DisbursementType::Loan,
            external_id: ext.to_string(),
            amount: Decimal::new(100, 0),
            original_amount: Decimal::new(100, 0),
        }
    }

    #[tokio::test]
    async fn test_insert_writes_creation_snapshot() {
        let store = MemoryStore::new();
        let d = store.insert_disbursement(new_disbursement("e1")).await.unwrap();
        assert_eq!(d.id, 1);
        let history = store.disbursement_history(d.id).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].changed_fields, vec!["created".to_string()]);
    }

    #[tokio::test]
    async fn test_duplicate_external_id_rejected() {
        let store = MemoryStore::new();
        store.insert_disbursement(new_disbursement("e1")).await.unwrap();
        assert!(matches!(
            store.insert_disbursement(new_disbursement("e1")).await,
            Err(DisbursementError::ExternalIdConflict(_))
        ));
    }

    #[tokio::test]
    async fn test_cas_rejects_stale_version() {
        let store = MemoryStore::new();
        let d = store.insert_disbursement(new_disbursement("e1")).await.unwrap();
        let expected = StateVersion::from(&d);

        let mut first = d.clone();
        first.status = DisbursementStatus::Pending;
        let h = DisbursementHistory::snapshot(&first, Some(&d), None);
        assert!(store.update_disbursement(&first, expected, &[h]).await.unwrap());

        let mut second = d.clone();
        second.status = DisbursementStatus::Failed;
        let h = DisbursementHistory::snapshot(&second, Some(&d), None);
        assert!(!store.update_disbursement(&second, expected, &[h]).await.unwrap());

        let stored = store.get_disbursement(d.id).await.unwrap().unwrap();
        assert_eq!(stored.status, DisbursementStatus::Pending);
        assert_eq!(store.disbursement_history(d.id).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_find_by_reference_or_key() {
        let store = MemoryStore::new();
        let d = store.insert_disbursement(new_disbursement("e1")).await.unwrap();
        let mut updated = d.clone();
        updated.method = Some(VendorId::Mock);
        updated.idempotency_key = Some("e1-0".into());
        store
            .update_disbursement(&updated, StateVersion::from(&d), &[])
            .await
            .unwrap();

        assert!(store.find_by_reference(VendorId::Mock, "e1-0").await.unwrap().is_some());
        assert!(store.find_by_reference(VendorId::Wire, "e1-0").await.unwrap().is_none());
        assert!(store.find_by_reference(VendorId::Mock, "nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_due_retries() {
        let store = MemoryStore::new();
        let d = store.insert_disbursement(new_disbursement("e1")).await.unwrap();
        let now = Utc::now();
        let mut failed = d.clone();
        failed.status = DisbursementStatus::Failed;
        failed.next_retry_at = Some(now - chrono::Duration::seconds(1));
        store
            .update_disbursement(&failed, StateVersion::from(&d), &[])
            .await
            .unwrap();

        assert_eq!(store.find_due_retries(now, 10).await.unwrap().len(), 1);
        let earlier = now - chrono::Duration::seconds(10);
        assert!(store.find_due_retries(earlier, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_stale_initiated_includes_payout_hop() {
        let store = MemoryStore::new();
        let fresh = store.insert_disbursement(new_disbursement("e1")).await.unwrap();
        let d = store.insert_disbursement(new_disbursement("e2")).await.unwrap();
        let mut hop = d.clone();
        hop.method = Some(VendorId::Float);
        hop.step = Some(Step::External);
        store
            .update_disbursement(&hop, StateVersion::from(&d), &[])
            .await
            .unwrap();

        let later = Utc::now() + chrono::Duration::seconds(1);
        let stale = store.find_stale_initiated(later, 10).await.unwrap();
        assert_eq!(stale.len(), 1);
        assert_eq!(stale[0].id, hop.id);
        assert_ne!(stale[0].id, fresh.id);
    }

    #[tokio::test]
    async fn test_validation_history_appends() {
        let store = MemoryStore::new();
        let v = store
            .insert_validation(NewValidation {
                bank_code: "BCA".into(),
                account_number: "1".into(),
                name_in_bank: "John Doe".into(),
            })
            .await
            .unwrap();
        let mut updated = v.clone();
        updated.status = ValidationStatus::Success;
        let history: Vec<_> = updated
            .diff(&v)
            .into_iter()
            .map(|(field, old, new)| ValidationHistory {
                validation_id: v.id,
                field: field.to_string(),
                old_value: old,
                new_value: new,
                note: None,
                created_at: Utc::now(),
            })
            .collect();
        store.save_validation(&updated, &history).await.unwrap();
        assert_eq!(store.validation_history(v.id).await.unwrap().len(), 1);
        assert_eq!(
            store.get_validation(v.id).await.unwrap().unwrap().status,
            ValidationStatus::Success
        );
    }
}
