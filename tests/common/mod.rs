//! Shared engine fixture for integration tests: in-memory store, scripted
//! mock vendors and a recording ledger.
#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use rust_decimal::Decimal;

use disbursement_engine::callback::CallbackReconciler;
use disbursement_engine::config::ValidationConfig;
use disbursement_engine::disbursement::notifier::RecordingNotifier;
use disbursement_engine::disbursement::store::MemoryStore;
use disbursement_engine::disbursement::types::{
    DisburseRequest, DisbursementType, NewValidation, RecipientValidation,
};
use disbursement_engine::disbursement::{CallSettings, RetryPolicy, SettlementCoordinator};
use disbursement_engine::router::{RoutingConfig, VendorRouter};
use disbursement_engine::validation::{NameMatcher, ValidationService};
use disbursement_engine::vendor::mock::MockVendor;
use disbursement_engine::vendor::{VendorAdapter, VendorRegistry};

pub struct Engine {
    pub coordinator: Arc<SettlementCoordinator>,
    pub reconciler: CallbackReconciler,
    pub store: Arc<MemoryStore>,
    pub notifier: Arc<RecordingNotifier>,
}

/// Retries fall due immediately
pub fn eager_policy() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 3,
        base_backoff: Duration::ZERO,
        max_backoff: Duration::ZERO,
        insufficient_balance_backoff: Duration::ZERO,
        charge_insufficient_balance: false,
        max_balance_retries: 5,
    }
}

pub fn engine(vendors: &[Arc<MockVendor>]) -> Engine {
    engine_with_policy(vendors, RetryPolicy::default())
}

pub fn engine_with_policy(vendors: &[Arc<MockVendor>], policy: RetryPolicy) -> Engine {
    let mut registry = VendorRegistry::new();
    for vendor in vendors {
        registry.register(vendor.clone() as Arc<dyn VendorAdapter>);
    }
    let router = Arc::new(VendorRouter::new(RoutingConfig::default(), Arc::new(registry)));
    let store = Arc::new(MemoryStore::new());
    let validation = Arc::new(ValidationService::new(
        store.clone(),
        router.clone(),
        NameMatcher::from_config(&ValidationConfig::default()),
    ));
    let notifier = Arc::new(RecordingNotifier::new());
    let coordinator = Arc::new(SettlementCoordinator::new(
        store.clone(),
        router,
        validation,
        notifier.clone(),
        policy,
        CallSettings {
            timeout: Duration::from_secs(2),
            transport_retries: 1,
            retry_delay: Duration::from_millis(1),
        },
    ));
    Engine {
        reconciler: CallbackReconciler::new(coordinator.clone()),
        coordinator,
        store,
        notifier,
    }
}

impl Engine {
    /// Create and validate a recipient
    pub async fn recipient(&self, name: &str) -> RecipientValidation {
        self.coordinator
            .validation()
            .create(NewValidation {
                bank_code: "BCA".to_string(),
                account_number: "1234567890".to_string(),
                name_in_bank: name.to_string(),
            })
            .await
            .unwrap()
    }

    pub fn request(&self, recipient: &RecipientValidation, external_id: &str) -> DisburseRequest {
        DisburseRequest {
            disbursement_id: None,
            validation_id: recipient.id,
            amount: Decimal::new(500_000, 0),
            original_amount: None,
            external_id: external_id.to_string(),
            disbursement_type: DisbursementType::Loan,
        }
    }
}
