//! Client-side status polling for settlement transactions.
//!
//! There is no push channel: a payer's client discovers the outcome of a
//! settlement by polling the status endpoint at a fixed interval with a
//! bounded number of attempts. The cap exists to bound local resource usage;
//! the server's own expiry window stays the authoritative ceiling, and the
//! client's observation window is deliberately shorter so it never keeps
//! polling a transaction the server has already resolved.

use serde::Deserialize;
use std::time::Duration;
use tracing::instrument;
use url::Url;

use crate::types::{TransactionId, TransactionStatus};

/// Fixed delay between status polls.
pub const POLL_INTERVAL: Duration = Duration::from_secs(5);
/// Maximum poll attempts before the client gives up locally.
pub const MAX_POLL_ATTEMPTS: u32 = 60;

/// Errors surfaced by the polling client.
#[derive(Debug, thiserror::Error)]
pub enum PollError {
    #[error("Status endpoint unavailable: {0}")]
    Transport(String),
    #[error("Unknown transaction")]
    UnknownTransaction,
}

impl From<reqwest::Error> for PollError {
    fn from(err: reqwest::Error) -> Self {
        PollError::Transport(err.to_string())
    }
}

/// Outcome of a bounded polling session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    /// The server reported a terminal status.
    Settled(TransactionStatus),
    /// The local attempt cap was reached while the server still reported
    /// `pending`. Distinct from the server's own `failed`: the transaction
    /// may yet settle either way on the server.
    TimedOut,
}

#[derive(Debug, Deserialize)]
struct StatusPayload {
    status: TransactionStatus,
}

/// HTTP client for the status polling protocol.
#[derive(Clone)]
pub struct StatusPoller {
    http: reqwest::Client,
    base_url: Url,
    interval: Duration,
    max_attempts: u32,
}

impl StatusPoller {
    pub fn new(base_url: Url) -> Result<Self, PollError> {
        let http = reqwest::Client::builder()
            .timeout(POLL_INTERVAL)
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            http,
            base_url,
            interval: POLL_INTERVAL,
            max_attempts: MAX_POLL_ATTEMPTS,
        })
    }

    /// Overrides the polling cadence.
    ///
    /// The observation window `interval * max_attempts` must stay at or below
    /// the server's expiry window to keep the protocol contract.
    pub fn with_cadence(mut self, interval: Duration, max_attempts: u32) -> Self {
        self.interval = interval;
        self.max_attempts = max_attempts;
        self
    }

    /// One status lookup. Every poll re-evaluates expiry server-side.
    #[instrument(skip(self), err)]
    pub async fn poll_status(&self, id: &TransactionId) -> Result<TransactionStatus, PollError> {
        let url = self
            .base_url
            .join(&format!("transactions/{id}/status"))
            .map_err(|e| PollError::Transport(e.to_string()))?;
        let response = self.http.get(url).send().await?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(PollError::UnknownTransaction);
        }
        if !response.status().is_success() {
            return Err(PollError::Transport(format!(
                "HTTP {} from status endpoint",
                response.status()
            )));
        }
        let payload: StatusPayload = response
            .json()
            .await
            .map_err(|e| PollError::Transport(e.to_string()))?;
        Ok(payload.status)
    }

    /// Polls until the server reports a terminal status or the local attempt
    /// cap is reached.
    #[instrument(skip(self))]
    pub async fn poll_until_terminal(
        &self,
        id: &TransactionId,
    ) -> Result<PollOutcome, PollError> {
        for attempt in 1..=self.max_attempts {
            let status = self.poll_status(id).await?;
            if status.is_terminal() {
                return Ok(PollOutcome::Settled(status));
            }
            tracing::debug!(%id, attempt, "Transaction still pending");
            if attempt < self.max_attempts {
                tokio::time::sleep(self.interval).await;
            }
        }
        Ok(PollOutcome::TimedOut)
    }
}
