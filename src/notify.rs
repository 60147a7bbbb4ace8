//! Notification collaborator boundary.
//!
//! The engine announces two events: a payer is told about a new payment
//! request at creation time, and a merchant is told about a confirmed payment
//! with its on-chain hash. Delivery is fire-and-forget: a failed notification
//! is logged and never affects settlement state.

use async_trait::async_trait;
use serde::Serialize;
use std::time::Duration;
use url::Url;

use crate::types::{TransactionId, TxHash, UsdAmount};

#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("Notification delivery failed: {0}")]
    Delivery(String),
}

impl From<reqwest::Error> for NotifyError {
    fn from(err: reqwest::Error) -> Self {
        NotifyError::Delivery(err.to_string())
    }
}

/// Outbound notification delivery.
///
/// Object-safe so the engine can hold whichever implementation the deployment
/// configured behind one `Arc<dyn Notifier>`.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Tells the payer a payment request awaits them.
    async fn payment_requested(
        &self,
        recipient: &str,
        amount: &UsdAmount,
        transaction_id: &TransactionId,
    ) -> Result<(), NotifyError>;

    /// Tells the merchant a payment was confirmed, with the on-chain hash.
    async fn payment_received(
        &self,
        recipient: &str,
        payer: &str,
        amount: &UsdAmount,
        tx_hash: &TxHash,
        explorer_url: Option<&str>,
    ) -> Result<(), NotifyError>;
}

/// Notifier that only logs. Used when no delivery channel is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingNotifier;

#[async_trait]
impl Notifier for TracingNotifier {
    async fn payment_requested(
        &self,
        recipient: &str,
        amount: &UsdAmount,
        transaction_id: &TransactionId,
    ) -> Result<(), NotifyError> {
        tracing::info!(%recipient, %amount, %transaction_id, "Payment requested");
        Ok(())
    }

    async fn payment_received(
        &self,
        recipient: &str,
        payer: &str,
        amount: &UsdAmount,
        tx_hash: &TxHash,
        explorer_url: Option<&str>,
    ) -> Result<(), NotifyError> {
        tracing::info!(%recipient, %payer, %amount, %tx_hash, ?explorer_url, "Payment received");
        Ok(())
    }
}

#[derive(Debug, Serialize)]
#[serde(tag = "event", rename_all = "snake_case", rename_all_fields = "camelCase")]
enum WebhookEvent<'a> {
    PaymentRequested {
        recipient: &'a str,
        amount_usd: &'a UsdAmount,
        transaction_id: &'a TransactionId,
    },
    PaymentReceived {
        recipient: &'a str,
        payer: &'a str,
        amount_usd: &'a UsdAmount,
        tx_hash: &'a TxHash,
        #[serde(skip_serializing_if = "Option::is_none")]
        explorer_url: Option<&'a str>,
    },
}

/// Notifier that posts events as JSON to a mail-relay webhook.
#[derive(Clone)]
pub struct WebhookNotifier {
    http: reqwest::Client,
    url: Url,
}

impl WebhookNotifier {
    pub fn new(url: Url, timeout: Duration) -> Result<Self, NotifyError> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { http, url })
    }

    async fn post(&self, event: &WebhookEvent<'_>) -> Result<(), NotifyError> {
        let response = self.http.post(self.url.clone()).json(event).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(NotifyError::Delivery(format!(
                "HTTP {status} from notification webhook"
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn payment_requested(
        &self,
        recipient: &str,
        amount: &UsdAmount,
        transaction_id: &TransactionId,
    ) -> Result<(), NotifyError> {
        self.post(&WebhookEvent::PaymentRequested {
            recipient,
            amount_usd: amount,
            transaction_id,
        })
        .await
    }

    async fn payment_received(
        &self,
        recipient: &str,
        payer: &str,
        amount: &UsdAmount,
        tx_hash: &TxHash,
        explorer_url: Option<&str>,
    ) -> Result<(), NotifyError> {
        self.post(&WebhookEvent::PaymentReceived {
            recipient,
            payer,
            amount_usd: amount,
            tx_hash,
            explorer_url,
        })
        .await
    }
}
