//! Ledger notification
//!
//! The ledger collaborator hears about each disbursement exactly once, when
//! it closes (COMPLETED or permanently FAILED).

use std::time::Duration;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::info;

use super::state::DisbursementStatus;
use super::types::{Disbursement, DisbursementId};
use crate::config::LedgerConfig;
use crate::vendor::TransportError;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LedgerEvent {
    pub disbursement_id: DisbursementId,
    pub external_id: String,
    pub status: DisbursementStatus,
    pub amount: Decimal,
    pub reason: Option<String>,
}

impl From<&Disbursement> for LedgerEvent {
    fn from(d: &Disbursement) -> Self {
        Self {
            disbursement_id: d.id,
            external_id: d.external_id.clone(),
            status: d.status,
            amount: d.amount,
            reason: d.reason.clone(),
        }
    }
}

#[async_trait]
pub trait LedgerNotifier: Send + Sync {
    async fn notify(&self, event: &LedgerEvent) -> Result<(), TransportError>;
}

/// Used when no ledger endpoint is configured
pub struct LogNotifier;

#[async_trait]
impl LedgerNotifier for LogNotifier {
    async fn notify(&self, event: &LedgerEvent) -> Result<(), TransportError> {
        info!(
            disbursement_id = event.disbursement_id,
            external_id = %event.external_id,
            status = %event.status,
            amount = %event.amount,
            reason = ?event.reason,
            "Ledger notified"
        );
        Ok(())
    }
}

/// POSTs the event as JSON to the ledger collaborator
pub struct HttpNotifier {
    client: reqwest::Client,
    url: String,
}

impl HttpNotifier {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TransportError::Unavailable(e.to_string()))?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl LedgerNotifier for HttpNotifier {
    async fn notify(&self, event: &LedgerEvent) -> Result<(), TransportError> {
        let resp = self
            .client
            .post(&self.url)
            .json(event)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    TransportError::Timeout(e.to_string())
                } else {
                    TransportError::Unavailable(e.to_string())
                }
            })?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(TransportError::Http {
                status: status.as_u16(),
                body,
            });
        }
        info!(
            disbursement_id = event.disbursement_id,
            status = %event.status,
            "Ledger notified"
        );
        Ok(())
    }
}

/// Pick the notifier for `config`
pub fn from_config(config: &LedgerConfig) -> Result<Box<dyn LedgerNotifier>, TransportError> {
    match &config.notify_url {
        Some(url) => Ok(Box::new(HttpNotifier::new(
            url.clone(),
            Duration::from_millis(config.timeout_ms),
        )?)),
        None => Ok(Box::new(LogNotifier)),
    }
}

/// Keeps every event in memory
#[cfg(any(test, feature = "mock-vendors"))]
#[derive(Default)]
pub struct RecordingNotifier {
    events: std::sync::Mutex<Vec<LedgerEvent>>,
}

#[cfg(any(test, feature = "mock-vendors"))]
impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<LedgerEvent> {
        self.events
            .lock()
            .map(|e| e.clone())
            .unwrap_or_else(|poisoned| poisoned.into_inner().clone())
    }
}

#[cfg(any(test, feature = "mock-vendors"))]
#[async_trait]
impl LedgerNotifier for RecordingNotifier {
    async fn notify(&self, event: &LedgerEvent) -> Result<(), TransportError> {
        match self.events.lock() {
            Ok(mut events) => events.push(event.clone()),
            Err(poisoned) => poisoned.into_inner().push(event.clone()),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::disbursement::types::fixtures::disbursement;
    use mockito::Matcher;
    use serde_json::json;

    #[tokio::test]
    async fn test_http_notifier_posts_event() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/ledger/disbursements")
            .match_body(Matcher::PartialJson(json!({
                "disbursement_id": 5,
                "external_id": "ext-5",
                "status": "COMPLETED",
            })))
            .with_status(200)
            .with_body("{}")
            .expect(1)
            .create_async()
            .await;

        let notifier = HttpNotifier::new(
            format!("{}/ledger/disbursements", server.url()),
            Duration::from_secs(2),
        )
        .unwrap();
        let mut d = disbursement(5, "ext-5");
        d.status = DisbursementStatus::Completed;
        notifier.notify(&LedgerEvent::from(&d)).await.unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_http_notifier_surfaces_errors() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/ledger")
            .with_status(502)
            .with_body("bad gateway")
            .create_async()
            .await;

        let notifier = HttpNotifier::new(format!("{}/ledger", server.url()), Duration::from_secs(2))
            .unwrap();
        let err = notifier
            .notify(&LedgerEvent::from(&disbursement(1, "x")))
            .await
            .unwrap_err();
        assert_eq!(
            err,
            TransportError::Http {
                status: 502,
                body: "bad gateway".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_recording_notifier() {
        let notifier = RecordingNotifier::new();
        notifier
            .notify(&LedgerEvent::from(&disbursement(1, "x")))
            .await
            .unwrap();
        assert_eq!(notifier.events().len(), 1);
    }
}
