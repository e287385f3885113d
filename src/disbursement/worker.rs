//! Retry Worker
//!
//! Background worker that drives disbursements the request path left
//! behind:
//! - FAILED with a retry that has come due
//! - PENDING for longer than the stale threshold (status query sweep)
//! - INITIATED with a recorded attempt (crash between persist and call)

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use chrono::Utc;
use futures::stream::{self, StreamExt};
use tracing::{debug, error, info};

use super::coordinator::{ReconcileOutcome, SettlementCoordinator};
use super::error::DisbursementError;
use super::types::Disbursement;
use crate::config::WorkerSettings;

/// Configuration for the retry worker
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// How often to scan
    pub scan_interval: Duration,
    /// How long a disbursement must sit in PENDING/INITIATED to be swept
    pub stale_threshold: Duration,
    /// Maximum disbursements per category per scan
    pub batch_size: usize,
    /// Concurrent vendor interactions per scan
    pub concurrency: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self::from_settings(&WorkerSettings::default())
    }
}

impl WorkerConfig {
    pub fn from_settings(settings: &WorkerSettings) -> Self {
        Self {
            scan_interval: Duration::from_secs(settings.scan_interval_secs),
            stale_threshold: Duration::from_secs(settings.stale_pending_secs),
            batch_size: settings.batch_size,
            concurrency: settings.concurrency.max(1),
        }
    }
}

/// Counts from one scan
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanReport {
    pub retried: usize,
    pub refreshed: usize,
    pub resumed: usize,
}

impl ScanReport {
    pub fn total(&self) -> usize {
        self.retried + self.refreshed + self.resumed
    }
}

pub struct RetryWorker {
    coordinator: Arc<SettlementCoordinator>,
    config: WorkerConfig,
}

impl RetryWorker {
    pub fn new(coordinator: Arc<SettlementCoordinator>, config: WorkerConfig) -> Self {
        Self {
            coordinator,
            config,
        }
    }

    /// Run the worker loop forever
    pub async fn run(&self) -> ! {
        info!(
            scan_interval_secs = self.config.scan_interval.as_secs(),
            stale_threshold_secs = self.config.stale_threshold.as_secs(),
            concurrency = self.config.concurrency,
            "Starting retry worker"
        );

        loop {
            if let Err(e) = self.scan_and_recover().await {
                error!(error = %e, "Retry scan failed");
            }
            tokio::time::sleep(self.config.scan_interval).await;
        }
    }

    /// Run a single scan
    pub async fn scan_and_recover(&self) -> Result<ScanReport, DisbursementError> {
        let now = Utc::now();
        let stale_before = now
            - chrono::Duration::from_std(self.config.stale_threshold)
                .unwrap_or(chrono::Duration::zero());
        let store = self.coordinator.store();

        let due = store.find_due_retries(now, self.config.batch_size).await?;
        let stale_pending = store
            .find_stale_pending(stale_before, self.config.batch_size)
            .await?;
        let stale_initiated = store
            .find_stale_initiated(stale_before, self.config.batch_size)
            .await?;

        if due.is_empty() && stale_pending.is_empty() && stale_initiated.is_empty() {
            debug!("Nothing to recover");
            return Ok(ScanReport::default());
        }
        info!(
            due = due.len(),
            stale_pending = stale_pending.len(),
            stale_initiated = stale_initiated.len(),
            "Recovering disbursements"
        );

        let report = ScanReport {
            retried: self.drive(due, Action::Attempt).await,
            refreshed: self.drive(stale_pending, Action::Refresh).await,
            resumed: self.drive(stale_initiated, Action::Attempt).await,
        };
        if report.total() > 0 {
            info!(
                retried = report.retried,
                refreshed = report.refreshed,
                resumed = report.resumed,
                "Disbursements advanced this scan"
            );
        }
        Ok(report)
    }

    /// Returns how many disbursements changed state
    async fn drive(&self, batch: Vec<Disbursement>, action: Action) -> usize {
        let advanced = AtomicUsize::new(0);
        stream::iter(batch)
            .for_each_concurrent(self.config.concurrency, |d| {
                let advanced = &advanced;
                async move {
                    let changed = match action {
                        Action::Attempt => self.coordinator.attempt(d.id).await.map(|after| {
                            after.status != d.status || after.retry_times != d.retry_times
                        }),
                        Action::Refresh => self
                            .coordinator
                            .refresh(d.id)
                            .await
                            .map(|outcome| matches!(outcome, ReconcileOutcome::Applied(_))),
                    };
                    match changed {
                        Ok(true) => {
                            advanced.fetch_add(1, Ordering::Relaxed);
                        }
                        Ok(false) => {}
                        Err(e) => error!(
                            disbursement_id = d.id,
                            status = %d.status,
                            error = %e,
                            "Failed to recover disbursement"
                        ),
                    }
                }
            })
            .await;
        advanced.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Clone, Copy)]
enum Action {
    Attempt,
    Refresh,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_worker_config_default() {
        let config = WorkerConfig::default();
        assert_eq!(config.scan_interval, Duration::from_secs(30));
        assert_eq!(config.stale_threshold, Duration::from_secs(900));
        assert_eq!(config.batch_size, 100);
        assert_eq!(config.concurrency, 8);
    }

    #[test]
    fn test_zero_concurrency_is_clamped() {
        let settings = WorkerSettings {
            concurrency: 0,
            ..WorkerSettings::default()
        };
        assert_eq!(WorkerConfig::from_settings(&settings).concurrency, 1);
    }
}
