//! Settlement Coordinator
//!
//! Drives one disbursement through `INITIATED → PENDING → {COMPLETED, FAILED}`
//! including multi-hop transfers. Every mutation is a CAS on the store and
//! runs under the per-disbursement lock.
//!
//! Attempt order: recipient validated → route → sequence check → balance
//! guard → persist attempt (vendor, step, key) → vendor call → apply outcome.
//! A crash between persist and call leaves an INITIATED row with a key; the
//! next attempt re-presents that same key.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, error, info, warn};

use super::error::DisbursementError;
use super::guard::{Admission, BalanceGuard, INSUFFICIENT_BALANCE};
use super::locks::LockRegistry;
use super::notifier::{LedgerEvent, LedgerNotifier};
use super::retry::{FailureClass, RetryDecision, RetryPolicy};
use super::state::{DisbursementStatus, Step, ValidationStatus};
use super::store::{DisbursementStore, StateVersion};
use super::types::{
    DisburseRequest, Disbursement, DisbursementHistory, DisbursementId, DisbursementView,
    IdempotencyKey, NewDisbursement, RecipientValidation,
};
use crate::config::SettlementConfig;
use crate::router::{RouteRequest, VendorRouter};
use crate::validation::ValidationService;
use crate::vendor::{DisburseOutcome, StatusReport, TransportError, VendorAdapter, VendorId};

/// Upper bound on hops driven by one invocation
const MAX_HOPS: usize = 3;

/// Per-call limits for vendor requests
#[derive(Debug, Clone)]
pub struct CallSettings {
    pub timeout: Duration,
    /// Re-presentations of the same key after a retryable transport error
    pub transport_retries: u32,
    pub retry_delay: Duration,
}

impl CallSettings {
    pub fn from_config(config: &SettlementConfig) -> Self {
        Self {
            timeout: Duration::from_millis(config.vendor_call_timeout_ms),
            transport_retries: config.transport_retries,
            retry_delay: Duration::from_millis(config.transport_retry_delay_ms),
        }
    }
}

impl Default for CallSettings {
    fn default() -> Self {
        Self::from_config(&SettlementConfig::default())
    }
}

/// Operator-requested terminal status
#[derive(Debug, Clone)]
pub struct OverrideRequest {
    pub status: DisbursementStatus,
    pub operator: String,
    pub reason: String,
}

/// What a status report did to the disbursement
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    Applied(DisbursementStatus),
    /// Already terminal or nothing to change
    Ignored,
    /// Report belongs to a superseded attempt
    Stale,
    /// Success reported for a disbursement that is not in flight
    Conflict,
}

enum Next {
    Done(Disbursement),
    Continue(Disbursement),
}

pub struct SettlementCoordinator {
    store: Arc<dyn DisbursementStore>,
    router: Arc<VendorRouter>,
    validation: Arc<ValidationService>,
    notifier: Arc<dyn LedgerNotifier>,
    policy: RetryPolicy,
    call: CallSettings,
    locks: LockRegistry,
}

impl SettlementCoordinator {
    pub fn new(
        store: Arc<dyn DisbursementStore>,
        router: Arc<VendorRouter>,
        validation: Arc<ValidationService>,
        notifier: Arc<dyn LedgerNotifier>,
        policy: RetryPolicy,
        call: CallSettings,
    ) -> Self {
        Self {
            store,
            router,
            validation,
            notifier,
            policy,
            call,
            locks: LockRegistry::new(),
        }
    }

    pub fn store(&self) -> &Arc<dyn DisbursementStore> {
        &self.store
    }

    pub fn router(&self) -> &Arc<VendorRouter> {
        &self.router
    }

    pub fn validation(&self) -> &Arc<ValidationService> {
        &self.validation
    }

    // ========================================================================
    // Inbound
    // ========================================================================

    /// Create-or-continue a disbursement and run one settlement attempt.
    ///
    /// A known disbursement id or external id continues the existing record;
    /// re-submitting while PENDING or COMPLETED is a no-op.
    pub async fn submit(&self, req: DisburseRequest) -> Result<Disbursement, DisbursementError> {
        if req.amount <= rust_decimal::Decimal::ZERO {
            return Err(DisbursementError::InvalidAmount);
        }
        if req.external_id.trim().is_empty() {
            return Err(DisbursementError::MissingExternalId);
        }

        let existing = match req.disbursement_id {
            Some(id) => Some(self.load(id).await?),
            None => self.store.get_by_external_id(&req.external_id).await?,
        };

        let disbursement = match existing {
            Some(d) => {
                if d.validation_id != req.validation_id {
                    return Err(DisbursementError::ExternalIdConflict(d.external_id));
                }
                debug!(disbursement_id = d.id, external_id = %d.external_id, "Continuing existing disbursement");
                d
            }
            None => self.create(&req).await?,
        };

        self.attempt(disbursement.id).await
    }

    async fn create(&self, req: &DisburseRequest) -> Result<Disbursement, DisbursementError> {
        self.store
            .get_validation(req.validation_id)
            .await?
            .ok_or(DisbursementError::ValidationNotFound(req.validation_id))?;

        let new = NewDisbursement {
            validation_id: req.validation_id,
            disbursement_type: req.disbursement_type,
            external_id: req.external_id.clone(),
            amount: req.amount,
            original_amount: req.original_amount.unwrap_or(req.amount),
        };
        match self.store.insert_disbursement(new).await {
            Ok(d) => {
                info!(
                    disbursement_id = d.id,
                    external_id = %d.external_id,
                    amount = %d.amount,
                    "Disbursement created"
                );
                Ok(d)
            }
            // Lost a race with a concurrent submit of the same external id
            Err(DisbursementError::ExternalIdConflict(ext)) => {
                match self.store.get_by_external_id(&ext).await? {
                    Some(d) if d.validation_id == req.validation_id => Ok(d),
                    _ => Err(DisbursementError::ExternalIdConflict(ext)),
                }
            }
            Err(e) => Err(e),
        }
    }

    /// Run one settlement attempt (or the next hop) for `id`.
    ///
    /// No-op when PENDING, COMPLETED, closed, or FAILED with a retry that
    /// is not yet due.
    pub async fn attempt(&self, id: DisbursementId) -> Result<Disbursement, DisbursementError> {
        let guard = self.locks.acquire(id).await;
        let current = self.load(id).await?;
        let result = self.run_locked(current).await;
        drop(guard);
        if let Ok(d) = &result
            && d.is_closed()
        {
            self.locks.release(id);
        }
        result
    }

    pub async fn get(&self, id: DisbursementId) -> Result<Disbursement, DisbursementError> {
        self.load(id).await
    }

    /// Canonical view including the recipient's bank info
    pub async fn view(&self, id: DisbursementId) -> Result<DisbursementView, DisbursementError> {
        let d = self.load(id).await?;
        let validation = self.store.get_validation(d.validation_id).await?;
        Ok(d.view(validation.as_ref()))
    }

    pub async fn history(&self, id: DisbursementId) -> Result<Vec<DisbursementHistory>, DisbursementError> {
        self.load(id).await?;
        self.store.disbursement_history(id).await
    }

    // ========================================================================
    // Operator
    // ========================================================================

    /// Close a PENDING or retry-scheduled FAILED disbursement by hand
    pub async fn override_status(
        &self,
        id: DisbursementId,
        req: OverrideRequest,
    ) -> Result<Disbursement, DisbursementError> {
        let _guard = self.locks.acquire(id).await;
        let persisted = self.load(id).await?;

        let allowed = !persisted.is_closed()
            && matches!(
                (persisted.status, req.status),
                (DisbursementStatus::Pending, DisbursementStatus::Completed)
                    | (DisbursementStatus::Pending, DisbursementStatus::Failed)
                    | (DisbursementStatus::Failed, DisbursementStatus::Failed)
            );
        if !allowed {
            return Err(DisbursementError::InvalidStateTransition {
                from: persisted.status,
                to: req.status,
            });
        }

        let note = format!("override by {}: {}", req.operator, req.reason);
        warn!(
            disbursement_id = id,
            operator = %req.operator,
            from = %persisted.status,
            to = %req.status,
            reason = %req.reason,
            "Manual status override"
        );
        let mut d = persisted.clone();
        d.reason = Some(req.reason);
        if req.status == DisbursementStatus::Completed {
            self.complete(&persisted, d, &note).await
        } else {
            self.close_failed(&persisted, d, &note).await
        }
    }

    /// Cancel a disbursement no vendor has acknowledged yet
    pub async fn cancel(&self, id: DisbursementId, reason: &str) -> Result<Disbursement, DisbursementError> {
        let _guard = self.locks.acquire(id).await;
        let persisted = self.load(id).await?;

        let cancellable = match persisted.status {
            DisbursementStatus::Initiated => persisted.idempotency_key.is_none(),
            DisbursementStatus::Failed => !persisted.is_closed(),
            DisbursementStatus::Pending | DisbursementStatus::Completed => false,
        };
        if !cancellable || self.internal_hop_settled(&persisted).await? {
            return Err(DisbursementError::NotCancellable(id));
        }

        info!(disbursement_id = id, reason = %reason, "Disbursement cancelled");
        let mut d = persisted.clone();
        d.reason = Some(format!("cancelled: {}", reason));
        self.close_failed(&persisted, d, "cancelled").await
    }

    // ========================================================================
    // Reconciliation
    // ========================================================================

    /// Apply a vendor status report (callback or status query).
    pub async fn reconcile(
        &self,
        id: DisbursementId,
        vendor: VendorId,
        report: StatusReport,
    ) -> Result<ReconcileOutcome, DisbursementError> {
        let _guard = self.locks.acquire(id).await;
        let persisted = self.load(id).await?;

        if persisted.method != Some(vendor) {
            warn!(
                disbursement_id = id,
                vendor = %vendor,
                method = ?persisted.method,
                "Status report from a vendor that does not own the disbursement"
            );
            return Ok(ReconcileOutcome::Stale);
        }

        let superseded = matches!(
            (report.idempotency_key.as_deref(), persisted.idempotency_key.as_deref()),
            (Some(reported), Some(current)) if reported != current
        );
        if superseded {
            if report.status == DisbursementStatus::Completed {
                error!(
                    disbursement_id = id,
                    vendor = %vendor,
                    reported_key = ?report.idempotency_key,
                    current_key = ?persisted.idempotency_key,
                    alert = true,
                    "Success reported for a superseded attempt"
                );
                return Ok(ReconcileOutcome::Conflict);
            }
            info!(
                disbursement_id = id,
                reported_key = ?report.idempotency_key,
                "Status report for a previous attempt ignored"
            );
            return Ok(ReconcileOutcome::Stale);
        }

        if persisted.status.is_terminal() {
            if persisted.status == DisbursementStatus::Failed
                && report.status == DisbursementStatus::Completed
            {
                error!(
                    disbursement_id = id,
                    vendor = %vendor,
                    reference_id = %report.reference_id,
                    alert = true,
                    "Success callback for a FAILED disbursement, not applied"
                );
                return Ok(ReconcileOutcome::Conflict);
            }
            info!(
                disbursement_id = id,
                status = %persisted.status,
                reported = %report.raw_status,
                "Late callback on terminal disbursement ignored"
            );
            return Ok(ReconcileOutcome::Ignored);
        }

        if !report.recognized {
            warn!(
                disbursement_id = id,
                vendor = %vendor,
                raw_status = %report.raw_status,
                alert = true,
                "Unrecognized vendor status, keeping disbursement PENDING"
            );
        }

        let adapter = self.router.registry().get(vendor, persisted.step)?;
        let mut d = persisted.clone();
        if d.reference_id.is_none() && !report.reference_id.is_empty() {
            d.reference_id = Some(report.reference_id.clone());
        }

        match report.status {
            DisbursementStatus::Initiated | DisbursementStatus::Pending => {
                if persisted.status == DisbursementStatus::Initiated {
                    d.transition(DisbursementStatus::Pending, false)?;
                    let d = self.save(&persisted, d, "acknowledged by vendor").await?;
                    Ok(ReconcileOutcome::Applied(d.status))
                } else if d.reference_id != persisted.reference_id {
                    self.save(&persisted, d, "vendor reference recorded").await?;
                    Ok(ReconcileOutcome::Ignored)
                } else {
                    Ok(ReconcileOutcome::Ignored)
                }
            }
            DisbursementStatus::Completed => {
                if d.step == Some(Step::Internal) {
                    let next = self.advance_hop(&persisted, d).await?;
                    let d = self.run_locked(next).await?;
                    Ok(ReconcileOutcome::Applied(d.status))
                } else {
                    let d = self.complete(&persisted, d, "confirmed by vendor").await?;
                    Ok(ReconcileOutcome::Applied(d.status))
                }
            }
            DisbursementStatus::Failed => {
                let code = report
                    .error_code
                    .clone()
                    .unwrap_or_else(|| report.raw_status.clone());
                let class = self.classify(adapter.as_ref(), &code);
                let reason = report.reason.clone().unwrap_or_else(|| code.clone());
                let vendor_reason = Some(format!("{}: {}", code, reason));
                let d = self
                    .fail(&persisted, d, class, reason, vendor_reason, "failed by vendor")
                    .await?;
                Ok(ReconcileOutcome::Applied(d.status))
            }
        }
    }

    /// Query the vendor for a PENDING disbursement and apply the answer
    pub async fn refresh(&self, id: DisbursementId) -> Result<ReconcileOutcome, DisbursementError> {
        let d = self.load(id).await?;
        if d.status != DisbursementStatus::Pending {
            return Ok(ReconcileOutcome::Ignored);
        }
        let vendor = d
            .method
            .ok_or_else(|| DisbursementError::SystemError(format!("PENDING disbursement {} has no vendor", id)))?;
        let adapter = self.router.registry().get(vendor, d.step)?;
        let report = self.bounded(adapter.query_status(&d)).await?;
        debug!(
            disbursement_id = id,
            vendor = %vendor,
            status = %report.status,
            "Vendor status queried"
        );
        self.reconcile(id, vendor, report).await
    }

    // ========================================================================
    // Attempt driver
    // ========================================================================

    async fn run_locked(&self, mut d: Disbursement) -> Result<Disbursement, DisbursementError> {
        for _ in 0..MAX_HOPS {
            match self.step_once(d).await? {
                Next::Done(done) => return Ok(done),
                Next::Continue(next) => d = next,
            }
        }
        Ok(d)
    }

    async fn step_once(&self, persisted: Disbursement) -> Result<Next, DisbursementError> {
        if persisted.status.is_in_flight_or_done() {
            debug!(
                disbursement_id = persisted.id,
                status = %persisted.status,
                "Settlement already in flight or done"
            );
            return Ok(Next::Done(persisted));
        }

        let mut d = persisted.clone();
        let retrying = persisted.status == DisbursementStatus::Failed;
        if retrying {
            if persisted.is_closed() {
                return Ok(Next::Done(persisted));
            }
            if persisted.next_retry_at.is_some_and(|at| at > Utc::now()) {
                debug!(disbursement_id = d.id, next_retry_at = ?d.next_retry_at, "Retry not yet due");
                return Ok(Next::Done(persisted));
            }
            begin_retry(&mut d)?;
        }

        let recipient = self.require_validated(&d).await?;

        let adapter = if d.idempotency_key.is_some() {
            // Attempt recorded before a crash: re-present the same key
            let vendor = d.method.ok_or_else(|| {
                DisbursementError::SystemError(format!("disbursement {} has a key but no vendor", d.id))
            })?;
            let adapter = self.router.registry().get(vendor, d.step)?;
            self.check_sequence(adapter.as_ref(), &d).await?;
            info!(
                disbursement_id = d.id,
                vendor = %vendor,
                key = ?d.idempotency_key,
                "Re-presenting recorded attempt"
            );
            adapter
        } else {
            let vendor = match d.method {
                Some(vendor) => vendor,
                None => match self.route(&d, &recipient) {
                    Ok(vendor) => {
                        d.method = Some(vendor);
                        d.step = self.router.registry().first_step(vendor);
                        vendor
                    }
                    Err(e @ DisbursementError::NoEligibleVendor { .. }) if retrying => {
                        let reason = e.to_string();
                        let d = self
                            .fail(&persisted, d, FailureClass::Permanent, reason, None, "no eligible vendor on retry")
                            .await?;
                        return Ok(Next::Done(d));
                    }
                    Err(e) => return Err(e),
                },
            };
            let adapter = self.router.registry().get(vendor, d.step)?;
            self.check_sequence(adapter.as_ref(), &d).await?;

            let admission = self.bounded(BalanceGuard::check(adapter.as_ref(), &d)).await;
            match admission {
                Ok(Admission::Admitted) => {}
                Ok(Admission::Insufficient { vendor_reason, .. }) => {
                    let d = self
                        .fail(
                            &persisted,
                            d,
                            FailureClass::InsufficientBalance,
                            INSUFFICIENT_BALANCE.to_string(),
                            vendor_reason,
                            "balance check",
                        )
                        .await?;
                    return Ok(Next::Done(d));
                }
                Err(e) => {
                    let d = self
                        .fail(
                            &persisted,
                            d,
                            FailureClass::Transport,
                            "Vendor unavailable".to_string(),
                            Some(e.to_string()),
                            "balance check",
                        )
                        .await?;
                    return Ok(Next::Done(d));
                }
            }

            d.idempotency_key = Some(d.idempotency_key().to_string());
            adapter
        };

        // Persist-before-call
        let persisted = if d == persisted {
            persisted
        } else {
            self.save(&persisted, d, "attempt recorded").await?
        };
        let d = persisted.clone();
        let key = d.idempotency_key();

        info!(
            disbursement_id = d.id,
            vendor = %adapter.vendor(),
            step = ?d.step,
            key = %key,
            amount = %d.leg_amount(),
            "Calling vendor disburse"
        );
        let result = self.call_disburse(adapter.as_ref(), &d, &recipient, &key).await;
        self.apply_disburse(&persisted, d, adapter.as_ref(), result).await
    }

    async fn apply_disburse(
        &self,
        persisted: &Disbursement,
        mut d: Disbursement,
        adapter: &dyn VendorAdapter,
        result: Result<DisburseOutcome, TransportError>,
    ) -> Result<Next, DisbursementError> {
        match result {
            Ok(DisburseOutcome::Accepted { reference_id }) => {
                d.transition(DisbursementStatus::Pending, false)?;
                d.reference_id = reference_id;
                d.reason = None;
                let d = self.save(persisted, d, "accepted by vendor").await?;
                info!(disbursement_id = d.id, reference_id = ?d.reference_id, "Disbursement PENDING");
                Ok(Next::Done(d))
            }
            Ok(DisburseOutcome::Completed { reference_id }) => {
                d.reference_id = reference_id;
                if d.step == Some(Step::Internal) {
                    let next = self.advance_hop(persisted, d).await?;
                    return Ok(Next::Continue(next));
                }
                let d = self.complete(persisted, d, "settled synchronously").await?;
                Ok(Next::Done(d))
            }
            Ok(DisburseOutcome::Failed { code, reason }) => {
                let class = self.classify(adapter, &code);
                let vendor_reason = Some(format!("{}: {}", code, reason));
                let d = self
                    .fail(persisted, d, class, reason, vendor_reason, "rejected by vendor")
                    .await?;
                Ok(Next::Done(d))
            }
            Err(e) if e.is_timeout() => {
                d.transition(DisbursementStatus::Pending, false)?;
                d.reason = Some("Vendor timeout, outcome unknown".to_string());
                d.vendor_reason = Some(e.to_string());
                let d = self.save(persisted, d, "vendor timeout").await?;
                warn!(
                    disbursement_id = d.id,
                    vendor = %adapter.vendor(),
                    error = %e,
                    "Vendor call timed out, awaiting callback or status sweep"
                );
                Ok(Next::Done(d))
            }
            Err(e) => {
                let d = self
                    .fail(
                        persisted,
                        d,
                        FailureClass::Transport,
                        "Vendor unavailable".to_string(),
                        Some(e.to_string()),
                        "transport error",
                    )
                    .await?;
                Ok(Next::Done(d))
            }
        }
    }

    /// Record step 1 as COMPLETED and move to step 2 INITIATED
    async fn advance_hop(
        &self,
        persisted: &Disbursement,
        d: Disbursement,
    ) -> Result<Disbursement, DisbursementError> {
        let mut hop_done = d;
        hop_done.status = DisbursementStatus::Completed;
        hop_done.reason = None;
        let first = DisbursementHistory::snapshot(&hop_done, Some(persisted), Some("step 1 completed"));

        let mut next = hop_done.clone();
        next.step = Some(Step::External);
        next.status = DisbursementStatus::Initiated;
        next.idempotency_key = None;
        next.reference_id = None;
        next.updated_at = Utc::now();
        let second = DisbursementHistory::snapshot(&next, Some(&hop_done), Some("step 2 initiated"));

        if !self
            .store
            .update_disbursement(&next, StateVersion::from(persisted), &[first, second])
            .await?
        {
            return Err(DisbursementError::ConcurrentUpdate(next.id));
        }
        info!(disbursement_id = next.id, vendor = ?next.method, "Internal hop completed, starting payout hop");
        Ok(next)
    }

    async fn complete(
        &self,
        persisted: &Disbursement,
        mut d: Disbursement,
        note: &str,
    ) -> Result<Disbursement, DisbursementError> {
        d.transition(DisbursementStatus::Completed, false)?;
        d.next_retry_at = None;
        d.archived = true;
        let d = self.save(persisted, d, note).await?;
        info!(disbursement_id = d.id, reference_id = ?d.reference_id, "Disbursement COMPLETED");
        self.notify(&d).await;
        Ok(d)
    }

    /// FAILED with no retry
    async fn close_failed(
        &self,
        persisted: &Disbursement,
        mut d: Disbursement,
        note: &str,
    ) -> Result<Disbursement, DisbursementError> {
        d.transition(DisbursementStatus::Failed, false)?;
        d.failure_class = Some(FailureClass::Permanent);
        d.next_retry_at = None;
        d.archived = true;
        let d = self.save(persisted, d, note).await?;
        self.notify(&d).await;
        Ok(d)
    }

    /// FAILED, scheduling a retry when the policy allows one
    async fn fail(
        &self,
        persisted: &Disbursement,
        mut d: Disbursement,
        class: FailureClass,
        reason: String,
        vendor_reason: Option<String>,
        note: &str,
    ) -> Result<Disbursement, DisbursementError> {
        let decision = self
            .policy
            .decide(class, d.charged_attempts(), d.uncharged_retries, Utc::now());

        d.transition(DisbursementStatus::Failed, false)?;
        d.failure_class = Some(class);
        d.reason = Some(reason);
        d.vendor_reason = vendor_reason;
        match decision {
            RetryDecision::RetryAt {
                at,
                switch_vendor,
                charged,
            } => {
                d.next_retry_at = Some(at);
                if switch_vendor {
                    d.excluded_vendor = d.method;
                }
                if !charged {
                    d.uncharged_retries += 1;
                }
            }
            RetryDecision::GiveUp => {
                d.next_retry_at = None;
                d.archived = true;
            }
        }

        let d = self.save(persisted, d, note).await?;
        warn!(
            disbursement_id = d.id,
            vendor = ?d.method,
            step = ?d.step,
            class = %class,
            reason = ?d.reason,
            vendor_reason = ?d.vendor_reason,
            next_retry_at = ?d.next_retry_at,
            "Disbursement attempt FAILED"
        );
        if d.is_closed() {
            self.notify(&d).await;
        }
        Ok(d)
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    /// Step 1 of a multi-hop transfer already moved money
    async fn internal_hop_settled(&self, d: &Disbursement) -> Result<bool, DisbursementError> {
        if d.step == Some(Step::External) {
            return Ok(true);
        }
        let hop = self.store.latest_step_history(d.id, Step::Internal).await?;
        Ok(hop.is_some_and(|h| h.status == DisbursementStatus::Completed))
    }

    async fn load(&self, id: DisbursementId) -> Result<Disbursement, DisbursementError> {
        self.store
            .get_disbursement(id)
            .await?
            .ok_or(DisbursementError::DisbursementNotFound(id))
    }

    /// CAS against `persisted`, appending one history snapshot
    async fn save(
        &self,
        persisted: &Disbursement,
        mut d: Disbursement,
        note: &str,
    ) -> Result<Disbursement, DisbursementError> {
        d.updated_at = Utc::now();
        let history = DisbursementHistory::snapshot(&d, Some(persisted), Some(note));
        if !self
            .store
            .update_disbursement(&d, StateVersion::from(persisted), &[history])
            .await?
        {
            warn!(disbursement_id = d.id, "CAS lost, disbursement changed underneath");
            return Err(DisbursementError::ConcurrentUpdate(d.id));
        }
        Ok(d)
    }

    async fn notify(&self, d: &Disbursement) {
        if let Err(e) = self.notifier.notify(&LedgerEvent::from(d)).await {
            error!(
                disbursement_id = d.id,
                status = %d.status,
                error = %e,
                alert = true,
                "Ledger notification failed"
            );
        }
    }

    /// Recipient must be SUCCESS; an unvalidated recipient is validated first
    async fn require_validated(&self, d: &Disbursement) -> Result<RecipientValidation, DisbursementError> {
        let mut validation = self
            .store
            .get_validation(d.validation_id)
            .await?
            .ok_or(DisbursementError::ValidationNotFound(d.validation_id))?;

        if matches!(
            validation.status,
            ValidationStatus::Initiated | ValidationStatus::Failed
        ) {
            validation = self.validation.validate(validation.id).await?;
        }
        if !validation.is_success() {
            return Err(DisbursementError::RecipientNotValidated {
                id: validation.id,
                status: validation.status,
            });
        }
        Ok(validation)
    }

    fn route(&self, d: &Disbursement, recipient: &RecipientValidation) -> Result<VendorId, DisbursementError> {
        let decision = self.router.route(&RouteRequest {
            transaction_id: d.external_id.parse::<i64>().unwrap_or(d.id),
            bank_code: &recipient.bank_code,
            amount: d.amount,
            validation_vendor: recipient.vendor,
            excluded: d.excluded_vendor,
        })?;
        info!(
            disbursement_id = d.id,
            vendor = %decision.vendor,
            rule = %decision.rule,
            retry_times = d.retry_times,
            "Disbursement routed"
        );
        Ok(decision.vendor)
    }

    /// Adapter legal-state check plus step ordering for multi-hop rails
    async fn check_sequence(&self, adapter: &dyn VendorAdapter, d: &Disbursement) -> Result<(), DisbursementError> {
        let mut result = adapter.ensure_sequence(d);
        if result.is_ok() && d.step == Some(Step::External) {
            let hop = self.store.latest_step_history(d.id, Step::Internal).await?;
            if hop.as_ref().map(|h| h.status) != Some(DisbursementStatus::Completed) {
                result = Err(DisbursementError::ProtocolViolation(format!(
                    "payout hop of disbursement {} requested before internal hop completed (last: {:?})",
                    d.id,
                    hop.map(|h| h.status)
                )));
            }
        }
        if let Err(e) = &result {
            error!(
                disbursement_id = d.id,
                vendor = %adapter.vendor(),
                step = ?d.step,
                status = %d.status,
                error = %e,
                alert = true,
                "Out-of-sequence vendor action refused"
            );
        }
        result
    }

    fn classify(&self, adapter: &dyn VendorAdapter, code: &str) -> FailureClass {
        let (class, known) = adapter.classify(code);
        if !known {
            warn!(
                vendor = %adapter.vendor(),
                code = %code,
                alert = true,
                "Unclassified vendor error code"
            );
        }
        class
    }

    async fn bounded<T>(
        &self,
        call: impl Future<Output = Result<T, TransportError>>,
    ) -> Result<T, TransportError> {
        match tokio::time::timeout(self.call.timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(TransportError::Timeout(format!(
                "no vendor response within {}ms",
                self.call.timeout.as_millis()
            ))),
        }
    }

    /// Disburse with bounded in-attempt retries, always with the same key.
    ///
    /// Once a try has timed out (or the vendor answered for another key) the
    /// request may have landed, so a later transport error is reported as a
    /// timeout: the outcome stays unknown and the key must not be replaced.
    async fn call_disburse(
        &self,
        adapter: &dyn VendorAdapter,
        d: &Disbursement,
        recipient: &RecipientValidation,
        key: &IdempotencyKey,
    ) -> Result<DisburseOutcome, TransportError> {
        let mut retries = 0;
        let mut unknown: Option<TransportError> = None;
        loop {
            match self.bounded(adapter.disburse(d, recipient, key)).await {
                Err(e) if e.is_retryable() && retries < self.call.transport_retries => {
                    if unknown.is_none() && outcome_unknown(&e) {
                        unknown = Some(e.clone());
                    }
                    retries += 1;
                    warn!(
                        disbursement_id = d.id,
                        vendor = %adapter.vendor(),
                        key = %key,
                        retry = retries,
                        error = %e,
                        "Retrying vendor call with the same key"
                    );
                    tokio::time::sleep(self.call.retry_delay).await;
                }
                Err(e) if !e.is_timeout() && (unknown.is_some() || outcome_unknown(&e)) => {
                    let detail = match unknown.take() {
                        Some(first) => format!("outcome unknown after {}; last try: {}", first, e),
                        None => format!("outcome unknown: {}", e),
                    };
                    return Err(TransportError::Timeout(detail));
                }
                other => return other,
            }
        }
    }
}

/// The vendor may have acted on the request
fn outcome_unknown(e: &TransportError) -> bool {
    e.is_timeout() || matches!(e, TransportError::KeyNotEchoed { .. })
}

/// FAILED → INITIATED with a fresh retry counter (and so a fresh key).
///
/// Routing is recomputed unless the vendor is pinned: a payout hop after a
/// completed internal hop, or an insufficient-balance retry.
fn begin_retry(d: &mut Disbursement) -> Result<(), DisbursementError> {
    d.transition(DisbursementStatus::Initiated, true)?;
    d.retry_times += 1;
    d.idempotency_key = None;
    d.reference_id = None;
    d.next_retry_at = None;
    let pinned = d.step == Some(Step::External)
        || d.failure_class == Some(FailureClass::InsufficientBalance);
    if !pinned {
        d.method = None;
        d.step = None;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ValidationConfig;
    use crate::disbursement::notifier::RecordingNotifier;
    use crate::disbursement::store::MemoryStore;
    use crate::disbursement::types::{DisbursementType, NewValidation};
    use crate::router::RoutingConfig;
    use crate::validation::NameMatcher;
    use crate::vendor::VendorRegistry;
    use crate::vendor::mock::MockVendor;
    use rust_decimal::Decimal;

    struct Harness {
        coordinator: SettlementCoordinator,
        mock: Arc<MockVendor>,
        store: Arc<MemoryStore>,
        notifier: Arc<RecordingNotifier>,
    }

    fn harness() -> Harness {
        let mock = Arc::new(MockVendor::new(VendorId::Mock));
        let mut registry = VendorRegistry::new();
        registry.register(mock.clone());
        let router = Arc::new(VendorRouter::new(RoutingConfig::default(), Arc::new(registry)));
        let store = Arc::new(MemoryStore::new());
        let validation = Arc::new(ValidationService::new(
            store.clone(),
            router.clone(),
            NameMatcher::from_config(&ValidationConfig::default()),
        ));
        let notifier = Arc::new(RecordingNotifier::new());
        let coordinator = SettlementCoordinator::new(
            store.clone(),
            router,
            validation,
            notifier.clone(),
            RetryPolicy::default(),
            CallSettings {
                timeout: Duration::from_millis(200),
                transport_retries: 1,
                retry_delay: Duration::from_millis(1),
            },
        );
        Harness {
            coordinator,
            mock,
            store,
            notifier,
        }
    }

    async fn request(h: &Harness, external_id: &str) -> DisburseRequest {
        let v = h
            .store
            .insert_validation(NewValidation {
                bank_code: "BCA".into(),
                account_number: "1234567890".into(),
                name_in_bank: "John Doe".into(),
            })
            .await
            .unwrap();
        DisburseRequest {
            disbursement_id: None,
            validation_id: v.id,
            amount: Decimal::new(500_000, 0),
            original_amount: None,
            external_id: external_id.to_string(),
            disbursement_type: DisbursementType::Loan,
        }
    }

    #[tokio::test]
    async fn test_rejects_bad_requests() {
        let h = harness();
        let mut req = request(&h, "1").await;
        req.amount = Decimal::ZERO;
        assert!(matches!(
            h.coordinator.submit(req.clone()).await,
            Err(DisbursementError::InvalidAmount)
        ));
        req.amount = Decimal::ONE;
        req.external_id = " ".into();
        assert!(matches!(
            h.coordinator.submit(req).await,
            Err(DisbursementError::MissingExternalId)
        ));
    }

    #[tokio::test]
    async fn test_validates_recipient_before_first_attempt() {
        let h = harness();
        let d = h.coordinator.submit(request(&h, "10").await).await.unwrap();
        assert_eq!(d.status, DisbursementStatus::Pending);
        assert_eq!(h.mock.validate_calls(), 1);
        assert_eq!(h.mock.disburse_calls(), 1);
        assert_eq!(h.mock.presented_keys(), vec!["10-0".to_string()]);
    }

    #[tokio::test]
    async fn test_unvalidated_recipient_never_reaches_pending() {
        let h = harness();
        h.mock.set_holder_name("Somebody Else");
        let err = h.coordinator.submit(request(&h, "11").await).await.unwrap_err();
        assert!(matches!(err, DisbursementError::RecipientNotValidated { .. }));
        assert_eq!(h.mock.disburse_calls(), 0);
        let d = h.store.get_by_external_id("11").await.unwrap().unwrap();
        assert_eq!(d.status, DisbursementStatus::Initiated);
    }

    #[tokio::test]
    async fn test_timeout_leaves_pending() {
        let h = harness();
        h.mock.set_latency(Duration::from_millis(500));
        let d = h.coordinator.submit(request(&h, "12").await).await.unwrap();
        assert_eq!(d.status, DisbursementStatus::Pending);
        // Both tries presented the same key
        assert_eq!(h.mock.presented_keys(), vec!["12-0".to_string(), "12-0".to_string()]);
        assert!(d.vendor_reason.as_deref().unwrap().starts_with("timeout"));
    }

    #[tokio::test]
    async fn test_transport_exhaustion_fails_with_raw_text() {
        let h = harness();
        h.mock.push_disburse(Err(TransportError::Http { status: 503, body: "down".into() }));
        h.mock.push_disburse(Err(TransportError::Http { status: 503, body: "still down".into() }));
        let d = h.coordinator.submit(request(&h, "13").await).await.unwrap();
        assert_eq!(d.status, DisbursementStatus::Failed);
        assert_eq!(d.failure_class, Some(FailureClass::Transport));
        assert_eq!(d.vendor_reason.as_deref(), Some("HTTP 503: still down"));
        assert!(d.next_retry_at.is_some());
        assert!(h.notifier.events().is_empty());
    }

    #[tokio::test]
    async fn test_permanent_failure_closes_and_notifies_once() {
        let h = harness();
        h.mock.push_disburse(Ok(DisburseOutcome::Failed {
            code: "ACCOUNT_CLOSED".into(),
            reason: "Account closed".into(),
        }));
        let d = h.coordinator.submit(request(&h, "14").await).await.unwrap();
        assert_eq!(d.status, DisbursementStatus::Failed);
        assert!(d.is_closed());
        assert!(d.archived);
        assert_eq!(d.reason.as_deref(), Some("Account closed"));
        assert_eq!(d.vendor_reason.as_deref(), Some("ACCOUNT_CLOSED: Account closed"));

        // Re-invocation is a no-op
        h.coordinator.attempt(d.id).await.unwrap();
        assert_eq!(h.mock.disburse_calls(), 1);
        assert_eq!(h.notifier.events().len(), 1);
    }

    #[tokio::test]
    async fn test_retry_uses_new_key() {
        let h = harness();
        h.mock.push_disburse(Ok(DisburseOutcome::Failed {
            code: "TEMPORARY_ERROR".into(),
            reason: "try later".into(),
        }));
        let d = h.coordinator.submit(request(&h, "15").await).await.unwrap();
        assert_eq!(d.status, DisbursementStatus::Failed);

        // Not due yet
        h.coordinator.attempt(d.id).await.unwrap();
        assert_eq!(h.mock.disburse_calls(), 1);

        let mut due = d.clone();
        due.next_retry_at = Some(Utc::now() - chrono::Duration::seconds(1));
        assert!(h
            .store
            .update_disbursement(&due, StateVersion::from(&d), &[])
            .await
            .unwrap());

        let d = h.coordinator.attempt(d.id).await.unwrap();
        assert_eq!(d.status, DisbursementStatus::Pending);
        assert_eq!(d.retry_times, 1);
        assert_eq!(h.mock.presented_keys(), vec!["15-0".to_string(), "15-1".to_string()]);
    }

    #[tokio::test]
    async fn test_cancel_and_override() {
        let h = harness();
        let d = h.coordinator.submit(request(&h, "16").await).await.unwrap();
        assert!(matches!(
            h.coordinator.cancel(d.id, "customer request").await,
            Err(DisbursementError::NotCancellable(_))
        ));

        let done = h
            .coordinator
            .override_status(
                d.id,
                OverrideRequest {
                    status: DisbursementStatus::Completed,
                    operator: "ops".into(),
                    reason: "confirmed by bank statement".into(),
                },
            )
            .await
            .unwrap();
        assert_eq!(done.status, DisbursementStatus::Completed);
        let history = h.coordinator.history(d.id).await.unwrap();
        assert_eq!(
            history.last().unwrap().note.as_deref(),
            Some("override by ops: confirmed by bank statement")
        );

        assert!(matches!(
            h.coordinator
                .override_status(
                    d.id,
                    OverrideRequest {
                        status: DisbursementStatus::Failed,
                        operator: "ops".into(),
                        reason: "oops".into(),
                    },
                )
                .await,
            Err(DisbursementError::InvalidStateTransition { .. })
        ));
    }

    #[tokio::test]
    async fn test_cancel_before_vendor_ack() {
        let h = harness();
        h.mock.set_holder_name("Somebody Else");
        let req = request(&h, "17").await;
        let _ = h.coordinator.submit(req).await;
        let d = h.store.get_by_external_id("17").await.unwrap().unwrap();
        let cancelled = h.coordinator.cancel(d.id, "duplicate loan").await.unwrap();
        assert_eq!(cancelled.status, DisbursementStatus::Failed);
        assert_eq!(cancelled.reason.as_deref(), Some("cancelled: duplicate loan"));
        assert_eq!(h.notifier.events().len(), 1);
    }

    #[tokio::test]
    async fn test_timeout_then_server_error_keeps_key() {
        let h = harness();
        h.mock.push_disburse(Err(TransportError::Timeout("read timed out".into())));
        h.mock.push_disburse(Err(TransportError::Http { status: 503, body: "down".into() }));
        let d = h.coordinator.submit(request(&h, "18").await).await.unwrap();
        assert_eq!(d.status, DisbursementStatus::Pending);
        assert_eq!(d.idempotency_key.as_deref(), Some("18-0"));
        assert!(d.vendor_reason.as_deref().unwrap().contains("HTTP 503"));

        // Outcome unknown: never re-sent under a new key
        h.coordinator.attempt(d.id).await.unwrap();
        assert_eq!(h.mock.presented_keys(), vec!["18-0".to_string(), "18-0".to_string()]);
        assert!(h.notifier.events().is_empty());
    }

    #[tokio::test]
    async fn test_key_not_echoed_is_unknown_outcome() {
        let h = harness();
        for _ in 0..2 {
            h.mock.push_disburse(Err(TransportError::KeyNotEchoed {
                expected: "19-0".into(),
                actual: "other".into(),
            }));
        }
        let d = h.coordinator.submit(request(&h, "19").await).await.unwrap();
        assert_eq!(d.status, DisbursementStatus::Pending);
        assert_eq!(d.failure_class, None);
        assert_eq!(h.mock.disburse_calls(), 2);
    }

    #[test]
    fn test_begin_retry_pins_payout_hop() {
        use crate::disbursement::types::fixtures::disbursement;
        let mut d = disbursement(1, "x");
        d.status = DisbursementStatus::Failed;
        d.method = Some(VendorId::Float);
        d.step = Some(Step::External);
        d.idempotency_key = Some("x-s2-0".into());
        begin_retry(&mut d).unwrap();
        assert_eq!(d.status, DisbursementStatus::Initiated);
        assert_eq!(d.method, Some(VendorId::Float));
        assert_eq!(d.step, Some(Step::External));
        assert_eq!(d.idempotency_key, None);
        assert_eq!(d.retry_times, 1);

        let mut d = disbursement(2, "y");
        d.status = DisbursementStatus::Failed;
        d.method = Some(VendorId::Float);
        d.step = Some(Step::Internal);
        begin_retry(&mut d).unwrap();
        assert_eq!(d.method, None);
        assert_eq!(d.step, None);
    }
}
