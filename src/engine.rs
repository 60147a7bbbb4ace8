//! Transaction lifecycle manager: the settlement engine's state machine.
//!
//! A transaction starts `Pending` and ends in exactly one of two terminal
//! states: `Success` (confirmed with on-chain proof) or `Failed` (explicit
//! failure or lazy expiry). Expiry evaluation and confirmation can race, so
//! every transition goes through the store's per-record compare-and-set and
//! the first terminal transition is authoritative; later attempts observe the
//! settled record instead of corrupting it.

use std::fmt::{Debug, Display};
use std::sync::Arc;
use std::time::Duration;
use tracing::instrument;

use crate::expiry::{self, DEFAULT_EXPIRY_WINDOW, Evaluation};
use crate::network::{ChainRegistry, Network};
use crate::notify::Notifier;
use crate::store::{
    PaymentRequestStore, StoreError, TerminalTransition, TransactionStore,
};
use crate::timestamp::{Clock, SystemClock};
use crate::types::{
    PaymentRequestId, Transaction, TransactionId, TransactionStatus, TxHash, UsdAmount,
};

/// Errors surfaced by the settlement engine.
#[derive(Debug, thiserror::Error)]
pub enum SettlementError {
    /// The referenced payment request is missing or inactive.
    #[error("Payment request not found")]
    RequestNotFound,
    /// No transaction exists under the given id.
    #[error("Transaction not found")]
    NotFound,
    /// The submitted chain is not accepted by the payment request.
    #[error("Chain {0} is not accepted by this payment request")]
    UnsupportedChain(Network),
    /// Confirmation arrived without an on-chain transaction hash.
    #[error("Confirmation requires an on-chain transaction hash")]
    MissingProof,
    /// Confirmation arrived after the transaction already failed or expired.
    #[error("Transaction already expired")]
    AlreadyExpired,
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Trait defining the asynchronous interface of the settlement engine.
///
/// Implementors own the [`Transaction`] state machine: creation, lazy-expiry
/// reads, confirmation with proof, explicit failure, and payer history.
pub trait SettlementEngine {
    /// The error type returned by this engine.
    type Error: Debug + Display;

    /// Creates a pending transaction against an active payment request.
    ///
    /// Copies the payee address from the request, appends the back-reference,
    /// and notifies the payer. `chain` defaults to the request's first
    /// accepted chain when omitted.
    fn create(
        &self,
        payment_request_id: &PaymentRequestId,
        payer: &str,
        amount_usd: UsdAmount,
        chain: Option<Network>,
    ) -> impl Future<Output = Result<Transaction, Self::Error>> + Send;

    /// Reads a transaction, applying lazy expiry first.
    ///
    /// No caller ever observes a pending transaction older than the expiry
    /// window.
    fn get(
        &self,
        id: &TransactionId,
    ) -> impl Future<Output = Result<Transaction, Self::Error>> + Send;

    /// Confirms a transaction with client-submitted on-chain proof.
    ///
    /// Idempotent on an already-successful record; a confirmation arriving
    /// after expiry is rejected without resurrecting the record.
    fn confirm(
        &self,
        id: &TransactionId,
        tx_hash: Option<&str>,
    ) -> impl Future<Output = Result<Transaction, Self::Error>> + Send;

    /// Marks a transaction failed on an explicit external signal.
    ///
    /// A no-op on records that already settled either way.
    fn fail(
        &self,
        id: &TransactionId,
    ) -> impl Future<Output = Result<Transaction, Self::Error>> + Send;

    /// All transactions for a payer, newest first, expiry applied to each.
    fn list_for_payer(
        &self,
        payer: &str,
    ) -> impl Future<Output = Result<Vec<Transaction>, Self::Error>> + Send;

    /// The payer's most recent transaction, while still inside the expiry
    /// window. Lets a client resume an in-flight payment instead of creating
    /// a duplicate.
    fn latest_for_payer(
        &self,
        payer: &str,
    ) -> impl Future<Output = Result<Option<Transaction>, Self::Error>> + Send;
}

impl<T: SettlementEngine> SettlementEngine for Arc<T> {
    type Error = T::Error;

    fn create(
        &self,
        payment_request_id: &PaymentRequestId,
        payer: &str,
        amount_usd: UsdAmount,
        chain: Option<Network>,
    ) -> impl Future<Output = Result<Transaction, Self::Error>> + Send {
        self.as_ref().create(payment_request_id, payer, amount_usd, chain)
    }

    fn get(
        &self,
        id: &TransactionId,
    ) -> impl Future<Output = Result<Transaction, Self::Error>> + Send {
        self.as_ref().get(id)
    }

    fn confirm(
        &self,
        id: &TransactionId,
        tx_hash: Option<&str>,
    ) -> impl Future<Output = Result<Transaction, Self::Error>> + Send {
        self.as_ref().confirm(id, tx_hash)
    }

    fn fail(
        &self,
        id: &TransactionId,
    ) -> impl Future<Output = Result<Transaction, Self::Error>> + Send {
        self.as_ref().fail(id)
    }

    fn list_for_payer(
        &self,
        payer: &str,
    ) -> impl Future<Output = Result<Vec<Transaction>, Self::Error>> + Send {
        self.as_ref().list_for_payer(payer)
    }

    fn latest_for_payer(
        &self,
        payer: &str,
    ) -> impl Future<Output = Result<Option<Transaction>, Self::Error>> + Send {
        self.as_ref().latest_for_payer(payer)
    }
}

/// Reference implementation of the settlement engine over pluggable stores.
#[derive(Clone)]
pub struct SettlementLocal<T, R> {
    transactions: T,
    requests: R,
    registry: Arc<ChainRegistry>,
    notifier: Arc<dyn Notifier>,
    clock: Arc<dyn Clock>,
    expiry_window: Duration,
}

impl<T, R> SettlementLocal<T, R>
where
    T: TransactionStore,
    R: PaymentRequestStore,
{
    pub fn new(
        transactions: T,
        requests: R,
        registry: Arc<ChainRegistry>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        SettlementLocal {
            transactions,
            requests,
            registry,
            notifier,
            clock: Arc::new(SystemClock),
            expiry_window: DEFAULT_EXPIRY_WINDOW,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_expiry_window(mut self, window: Duration) -> Self {
        self.expiry_window = window;
        self
    }

    pub fn expiry_window(&self) -> Duration {
        self.expiry_window
    }

    /// Applies the lazy-expiry policy to a freshly read record, persisting the
    /// transition through the conditional update before returning.
    async fn apply_expiry(&self, tx: Transaction) -> Result<Transaction, SettlementError> {
        match expiry::evaluate(tx.status, tx.created_at, self.clock.now(), self.expiry_window) {
            Evaluation::Keep => Ok(tx),
            Evaluation::Expire => {
                let outcome = self
                    .transactions
                    .transition_if_pending(&tx.id, TerminalTransition::Failed)
                    .await?
                    .ok_or(SettlementError::NotFound)?;
                if outcome.applied {
                    tracing::info!(transaction = %tx.id, "Pending transaction expired");
                }
                // A racing confirmation may have won; either way the record
                // is terminal now.
                Ok(outcome.record)
            }
        }
    }

    fn spawn_payer_notification(&self, tx: &Transaction) {
        let notifier = self.notifier.clone();
        let recipient = tx.payer.clone();
        let amount = tx.amount_usd;
        let tx_id = tx.id;
        tokio::spawn(async move {
            if let Err(err) = notifier.payment_requested(&recipient, &amount, &tx_id).await {
                tracing::warn!(error = %err, transaction = %tx_id, "Payer notification failed");
            }
        });
    }

    async fn spawn_merchant_notification(&self, tx: &Transaction, tx_hash: &TxHash) {
        let recipient = match self.requests.find_by_id(&tx.payment_request_id).await {
            Ok(Some(request)) => request.merchant_contact,
            Ok(None) => {
                tracing::warn!(transaction = %tx.id, "Payment request gone, skipping merchant notification");
                return;
            }
            Err(err) => {
                tracing::warn!(error = %err, transaction = %tx.id, "Failed to load payment request for notification");
                return;
            }
        };
        let explorer_url = self.registry.explorer_tx_url(tx.network, tx_hash.as_str());
        let notifier = self.notifier.clone();
        let payer = tx.payer.clone();
        let amount = tx.amount_usd;
        let tx_hash = tx_hash.clone();
        let tx_id = tx.id;
        tokio::spawn(async move {
            if let Err(err) = notifier
                .payment_received(
                    &recipient,
                    &payer,
                    &amount,
                    &tx_hash,
                    explorer_url.as_deref(),
                )
                .await
            {
                tracing::warn!(error = %err, transaction = %tx_id, "Merchant notification failed");
            }
        });
    }
}

impl<T, R> SettlementEngine for SettlementLocal<T, R>
where
    T: TransactionStore,
    R: PaymentRequestStore,
{
    type Error = SettlementError;

    #[instrument(skip(self, payer), err)]
    async fn create(
        &self,
        payment_request_id: &PaymentRequestId,
        payer: &str,
        amount_usd: UsdAmount,
        chain: Option<Network>,
    ) -> Result<Transaction, SettlementError> {
        let request = self
            .requests
            .find_by_id(payment_request_id)
            .await?
            .filter(|r| r.is_active)
            .ok_or(SettlementError::RequestNotFound)?;

        let network = match chain {
            Some(chain) => {
                if !request.chain_ids.contains(&chain) {
                    return Err(SettlementError::UnsupportedChain(chain));
                }
                chain
            }
            None => *request
                .chain_ids
                .first()
                .ok_or(SettlementError::RequestNotFound)?,
        };

        // The request's amount is authoritative; the submitted amount only
        // echoes what the widget displayed.
        if amount_usd != request.amount_usd {
            tracing::warn!(
                request = %request.id,
                submitted = %amount_usd,
                expected = %request.amount_usd,
                "Submitted amount differs from payment request"
            );
        }

        let tx = Transaction {
            id: TransactionId::generate(),
            payer: payer.to_string(),
            payee: request.merchant_address.clone(),
            amount_usd: request.amount_usd,
            network,
            tx_hash: None,
            status: TransactionStatus::Pending,
            payment_request_id: request.id,
            created_at: self.clock.now(),
        };
        self.transactions.insert(tx.clone()).await?;
        self.requests.append_transaction(&request.id, tx.id).await?;
        tracing::info!(transaction = %tx.id, request = %request.id, chain = %network, "Transaction created");

        self.spawn_payer_notification(&tx);
        Ok(tx)
    }

    #[instrument(skip(self), err)]
    async fn get(&self, id: &TransactionId) -> Result<Transaction, SettlementError> {
        let tx = self
            .transactions
            .get(id)
            .await?
            .ok_or(SettlementError::NotFound)?;
        self.apply_expiry(tx).await
    }

    #[instrument(skip(self, tx_hash), err)]
    async fn confirm(
        &self,
        id: &TransactionId,
        tx_hash: Option<&str>,
    ) -> Result<Transaction, SettlementError> {
        let hash = tx_hash
            .map(TxHash::parse)
            .transpose()
            .map_err(|_| SettlementError::MissingProof)?
            .ok_or(SettlementError::MissingProof)?;

        let tx = self
            .transactions
            .get(id)
            .await?
            .ok_or(SettlementError::NotFound)?;
        let tx = self.apply_expiry(tx).await?;

        match tx.status {
            // Idempotent: a repeated confirmation succeeds and never
            // overwrites the stored hash.
            TransactionStatus::Success => Ok(tx),
            TransactionStatus::Failed => Err(SettlementError::AlreadyExpired),
            TransactionStatus::Pending => {
                let outcome = self
                    .transactions
                    .transition_if_pending(
                        id,
                        TerminalTransition::Success {
                            tx_hash: hash.clone(),
                        },
                    )
                    .await?
                    .ok_or(SettlementError::NotFound)?;
                if outcome.applied {
                    tracing::info!(transaction = %id, "Transaction confirmed");
                    self.spawn_merchant_notification(&outcome.record, &hash).await;
                    return Ok(outcome.record);
                }
                // Lost the race against another writer.
                match outcome.record.status {
                    TransactionStatus::Success => Ok(outcome.record),
                    TransactionStatus::Failed => Err(SettlementError::AlreadyExpired),
                    TransactionStatus::Pending => Ok(outcome.record),
                }
            }
        }
    }

    #[instrument(skip(self), err)]
    async fn fail(&self, id: &TransactionId) -> Result<Transaction, SettlementError> {
        let outcome = self
            .transactions
            .transition_if_pending(id, TerminalTransition::Failed)
            .await?
            .ok_or(SettlementError::NotFound)?;
        if outcome.applied {
            tracing::info!(transaction = %id, "Transaction failed on external signal");
        }
        Ok(outcome.record)
    }

    #[instrument(skip(self, payer), err)]
    async fn list_for_payer(&self, payer: &str) -> Result<Vec<Transaction>, SettlementError> {
        let listed = self.transactions.list_by_payer(payer).await?;
        let mut transactions = Vec::with_capacity(listed.len());
        for tx in listed {
            transactions.push(self.apply_expiry(tx).await?);
        }
        Ok(transactions)
    }

    #[instrument(skip(self, payer), err)]
    async fn latest_for_payer(&self, payer: &str) -> Result<Option<Transaction>, SettlementError> {
        let listed = self.list_for_payer(payer).await?;
        let now = self.clock.now();
        Ok(listed
            .into_iter()
            .next()
            .filter(|tx| now.duration_since(tx.created_at) <= self.expiry_window))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::{Notifier, NotifyError};
    use crate::store::{InMemoryPaymentRequestStore, InMemoryTransactionStore};
    use crate::timestamp::UnixTimestamp;
    use crate::types::PaymentRequest;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU64, Ordering};

    const T0: u64 = 1_700_000_000;

    /// Clock whose reading the test advances by hand.
    struct ManualClock(AtomicU64);

    impl ManualClock {
        fn at(secs: u64) -> Arc<Self> {
            Arc::new(Self(AtomicU64::new(secs)))
        }

        fn advance_minutes(&self, minutes: u64) {
            self.0.fetch_add(minutes * 60, Ordering::SeqCst);
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> UnixTimestamp {
            UnixTimestamp::from_secs(self.0.load(Ordering::SeqCst))
        }
    }

    /// Notifier double that records every delivery.
    #[derive(Default)]
    struct RecordingNotifier {
        requested: Mutex<Vec<String>>,
        received: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Notifier for RecordingNotifier {
        async fn payment_requested(
            &self,
            recipient: &str,
            _amount: &UsdAmount,
            _transaction_id: &TransactionId,
        ) -> Result<(), NotifyError> {
            self.requested.lock().unwrap().push(recipient.to_string());
            Ok(())
        }

        async fn payment_received(
            &self,
            recipient: &str,
            _payer: &str,
            _amount: &UsdAmount,
            _tx_hash: &TxHash,
            _explorer_url: Option<&str>,
        ) -> Result<(), NotifyError> {
            self.received.lock().unwrap().push(recipient.to_string());
            Ok(())
        }
    }

    struct Harness {
        engine: SettlementLocal<InMemoryTransactionStore, InMemoryPaymentRequestStore>,
        clock: Arc<ManualClock>,
        notifier: Arc<RecordingNotifier>,
        request_id: PaymentRequestId,
    }

    async fn harness() -> Harness {
        let requests = InMemoryPaymentRequestStore::new();
        let request = PaymentRequest {
            id: PaymentRequestId::generate(),
            amount_usd: UsdAmount::parse("10").unwrap(),
            chain_ids: vec![Network::Ethereum, Network::Base],
            merchant_address: "0x1111111111111111111111111111111111111111".into(),
            merchant_contact: "merchant@example.com".into(),
            is_active: true,
            transactions: vec![],
        };
        let request_id = request.id;
        requests.insert(request).await.unwrap();

        let clock = ManualClock::at(T0);
        let notifier = Arc::new(RecordingNotifier::default());
        let engine = SettlementLocal::new(
            InMemoryTransactionStore::new(),
            requests,
            Arc::new(ChainRegistry::mainnet()),
            notifier.clone(),
        )
        .with_clock(clock.clone());
        Harness {
            engine,
            clock,
            notifier,
            request_id,
        }
    }

    /// Lets fire-and-forget notification tasks run on the test runtime.
    async fn drain_notifications() {
        tokio::task::yield_now().await;
    }

    #[tokio::test]
    async fn test_create_copies_request_fields() {
        let h = harness().await;
        let tx = h
            .engine
            .create(
                &h.request_id,
                "payer@example.com",
                UsdAmount::parse("10").unwrap(),
                Some(Network::Ethereum),
            )
            .await
            .unwrap();
        assert_eq!(tx.status, TransactionStatus::Pending);
        assert_eq!(tx.payee, "0x1111111111111111111111111111111111111111");
        assert_eq!(tx.network, Network::Ethereum);
        assert_eq!(tx.created_at.as_secs(), T0);
        assert!(tx.tx_hash.is_none());
    }

    #[tokio::test]
    async fn test_create_appends_backreference_and_notifies_payer() {
        let h = harness().await;
        let tx = h
            .engine
            .create(
                &h.request_id,
                "payer@example.com",
                UsdAmount::parse("10").unwrap(),
                None,
            )
            .await
            .unwrap();
        drain_notifications().await;

        let request = h
            .engine
            .requests
            .find_by_id(&h.request_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(request.transactions, vec![tx.id]);
        assert_eq!(
            *h.notifier.requested.lock().unwrap(),
            vec!["payer@example.com".to_string()]
        );
    }

    #[tokio::test]
    async fn test_create_copies_amount_from_request() {
        let h = harness().await;
        let tx = h
            .engine
            .create(
                &h.request_id,
                "payer@example.com",
                UsdAmount::parse("999").unwrap(),
                None,
            )
            .await
            .unwrap();
        // The request's own amount wins over the client-submitted echo.
        assert_eq!(tx.amount_usd, UsdAmount::parse("10").unwrap());
    }

    #[tokio::test]
    async fn test_create_defaults_to_first_chain() {
        let h = harness().await;
        let tx = h
            .engine
            .create(
                &h.request_id,
                "payer@example.com",
                UsdAmount::parse("10").unwrap(),
                None,
            )
            .await
            .unwrap();
        assert_eq!(tx.network, Network::Ethereum);
    }

    #[tokio::test]
    async fn test_create_rejects_unaccepted_chain() {
        let h = harness().await;
        let err = h
            .engine
            .create(
                &h.request_id,
                "payer@example.com",
                UsdAmount::parse("10").unwrap(),
                Some(Network::Avalanche),
            )
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            SettlementError::UnsupportedChain(Network::Avalanche)
        ));
    }

    #[tokio::test]
    async fn test_create_rejects_unknown_request() {
        let h = harness().await;
        let err = h
            .engine
            .create(
                &PaymentRequestId::generate(),
                "payer@example.com",
                UsdAmount::parse("10").unwrap(),
                None,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, SettlementError::RequestNotFound));
    }

    #[tokio::test]
    async fn test_create_rejects_inactive_request() {
        let h = harness().await;
        let inactive = PaymentRequest {
            id: PaymentRequestId::generate(),
            amount_usd: UsdAmount::parse("10").unwrap(),
            chain_ids: vec![Network::Ethereum],
            merchant_address: "0x2222222222222222222222222222222222222222".into(),
            merchant_contact: "merchant@example.com".into(),
            is_active: false,
            transactions: vec![],
        };
        let inactive_id = inactive.id;
        h.engine.requests.insert(inactive).await.unwrap();

        let err = h
            .engine
            .create(
                &inactive_id,
                "payer@example.com",
                UsdAmount::parse("10").unwrap(),
                None,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, SettlementError::RequestNotFound));
    }

    #[tokio::test]
    async fn test_pending_within_window_then_expired_after() {
        let h = harness().await;
        let tx = h
            .engine
            .create(
                &h.request_id,
                "payer@example.com",
                UsdAmount::parse("10").unwrap(),
                None,
            )
            .await
            .unwrap();

        h.clock.advance_minutes(5);
        let at_5 = h.engine.get(&tx.id).await.unwrap();
        assert_eq!(at_5.status, TransactionStatus::Pending);

        h.clock.advance_minutes(6);
        let at_11 = h.engine.get(&tx.id).await.unwrap();
        assert_eq!(at_11.status, TransactionStatus::Failed);
    }

    #[tokio::test]
    async fn test_confirm_then_polls_stay_success() {
        let h = harness().await;
        let tx = h
            .engine
            .create(
                &h.request_id,
                "payer@example.com",
                UsdAmount::parse("10").unwrap(),
                None,
            )
            .await
            .unwrap();

        h.clock.advance_minutes(2);
        let confirmed = h.engine.confirm(&tx.id, Some("0xabc123")).await.unwrap();
        assert_eq!(confirmed.status, TransactionStatus::Success);
        assert_eq!(confirmed.tx_hash.as_ref().unwrap().as_str(), "0xabc123");

        // Polls long after the window still observe success.
        h.clock.advance_minutes(60);
        let later = h.engine.get(&tx.id).await.unwrap();
        assert_eq!(later.status, TransactionStatus::Success);
    }

    #[tokio::test]
    async fn test_confirm_is_idempotent_and_keeps_first_hash() {
        let h = harness().await;
        let tx = h
            .engine
            .create(
                &h.request_id,
                "payer@example.com",
                UsdAmount::parse("10").unwrap(),
                None,
            )
            .await
            .unwrap();

        h.engine.confirm(&tx.id, Some("0xabc")).await.unwrap();
        let again = h.engine.confirm(&tx.id, Some("0xabc")).await.unwrap();
        assert_eq!(again.status, TransactionStatus::Success);

        // A different hash succeeds but never replaces the stored proof.
        let different = h.engine.confirm(&tx.id, Some("0xdef")).await.unwrap();
        assert_eq!(different.tx_hash.unwrap().as_str(), "0xabc");
    }

    #[tokio::test]
    async fn test_confirm_requires_proof() {
        let h = harness().await;
        let tx = h
            .engine
            .create(
                &h.request_id,
                "payer@example.com",
                UsdAmount::parse("10").unwrap(),
                None,
            )
            .await
            .unwrap();

        for missing in [None, Some(""), Some("   ")] {
            let err = h.engine.confirm(&tx.id, missing).await.unwrap_err();
            assert!(matches!(err, SettlementError::MissingProof));
        }
        let unchanged = h.engine.get(&tx.id).await.unwrap();
        assert_eq!(unchanged.status, TransactionStatus::Pending);
    }

    #[tokio::test]
    async fn test_confirm_after_expiry_is_rejected() {
        let h = harness().await;
        let tx = h
            .engine
            .create(
                &h.request_id,
                "payer@example.com",
                UsdAmount::parse("10").unwrap(),
                None,
            )
            .await
            .unwrap();

        h.clock.advance_minutes(11);
        let err = h.engine.confirm(&tx.id, Some("0xabc")).await.unwrap_err();
        assert!(matches!(err, SettlementError::AlreadyExpired));

        let stored = h.engine.get(&tx.id).await.unwrap();
        assert_eq!(stored.status, TransactionStatus::Failed);
        assert!(stored.tx_hash.is_none());
    }

    #[tokio::test]
    async fn test_expiry_has_no_notification_side_effects() {
        let h = harness().await;
        let tx = h
            .engine
            .create(
                &h.request_id,
                "payer@example.com",
                UsdAmount::parse("10").unwrap(),
                None,
            )
            .await
            .unwrap();
        drain_notifications().await;

        h.clock.advance_minutes(11);
        for _ in 0..3 {
            let stored = h.engine.get(&tx.id).await.unwrap();
            assert_eq!(stored.status, TransactionStatus::Failed);
        }
        drain_notifications().await;

        // One payer notification from creation, nothing from expiry.
        assert_eq!(h.notifier.requested.lock().unwrap().len(), 1);
        assert!(h.notifier.received.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_merchant_notified_exactly_once_per_confirmation() {
        let h = harness().await;
        let tx = h
            .engine
            .create(
                &h.request_id,
                "payer@example.com",
                UsdAmount::parse("10").unwrap(),
                None,
            )
            .await
            .unwrap();

        h.engine.confirm(&tx.id, Some("0xabc")).await.unwrap();
        h.engine.confirm(&tx.id, Some("0xabc")).await.unwrap();
        h.engine.confirm(&tx.id, Some("0xdef")).await.unwrap();
        drain_notifications().await;

        assert_eq!(
            *h.notifier.received.lock().unwrap(),
            vec!["merchant@example.com".to_string()]
        );
    }

    #[tokio::test]
    async fn test_explicit_fail_is_terminal_but_harmless_on_success() {
        let h = harness().await;
        let tx = h
            .engine
            .create(
                &h.request_id,
                "payer@example.com",
                UsdAmount::parse("10").unwrap(),
                None,
            )
            .await
            .unwrap();

        let failed = h.engine.fail(&tx.id).await.unwrap();
        assert_eq!(failed.status, TransactionStatus::Failed);
        let err = h.engine.confirm(&tx.id, Some("0xabc")).await.unwrap_err();
        assert!(matches!(err, SettlementError::AlreadyExpired));

        // Failing a confirmed transaction leaves it confirmed.
        let tx2 = h
            .engine
            .create(
                &h.request_id,
                "payer@example.com",
                UsdAmount::parse("10").unwrap(),
                None,
            )
            .await
            .unwrap();
        h.engine.confirm(&tx2.id, Some("0xabc")).await.unwrap();
        let still_success = h.engine.fail(&tx2.id).await.unwrap();
        assert_eq!(still_success.status, TransactionStatus::Success);
    }

    #[tokio::test]
    async fn test_list_for_payer_applies_expiry_newest_first() {
        let h = harness().await;
        let old = h
            .engine
            .create(
                &h.request_id,
                "payer@example.com",
                UsdAmount::parse("10").unwrap(),
                None,
            )
            .await
            .unwrap();

        h.clock.advance_minutes(11);
        let fresh = h
            .engine
            .create(
                &h.request_id,
                "payer@example.com",
                UsdAmount::parse("10").unwrap(),
                None,
            )
            .await
            .unwrap();

        let listed = h.engine.list_for_payer("payer@example.com").await.unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].id, fresh.id);
        assert_eq!(listed[0].status, TransactionStatus::Pending);
        assert_eq!(listed[1].id, old.id);
        assert_eq!(listed[1].status, TransactionStatus::Failed);
    }

    #[tokio::test]
    async fn test_latest_for_payer_only_inside_window() {
        let h = harness().await;
        let tx = h
            .engine
            .create(
                &h.request_id,
                "payer@example.com",
                UsdAmount::parse("10").unwrap(),
                None,
            )
            .await
            .unwrap();

        let latest = h
            .engine
            .latest_for_payer("payer@example.com")
            .await
            .unwrap();
        assert_eq!(latest.unwrap().id, tx.id);

        h.clock.advance_minutes(11);
        let stale = h
            .engine
            .latest_for_payer("payer@example.com")
            .await
            .unwrap();
        assert!(stale.is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_confirm_races_expiry_to_one_terminal_state() {
        let h = harness().await;
        let tx = h
            .engine
            .create(
                &h.request_id,
                "payer@example.com",
                UsdAmount::parse("10").unwrap(),
                None,
            )
            .await
            .unwrap();
        h.clock.advance_minutes(11);

        let engine = Arc::new(h.engine);
        let confirm = {
            let engine = engine.clone();
            let id = tx.id;
            tokio::spawn(async move { engine.confirm(&id, Some("0xabc")).await })
        };
        let poll = {
            let engine = engine.clone();
            let id = tx.id;
            tokio::spawn(async move { engine.get(&id).await })
        };

        let confirm = confirm.await.unwrap();
        let poll = poll.await.unwrap().unwrap();

        let stored = engine.get(&tx.id).await.unwrap();
        assert!(stored.status.is_terminal());
        assert_eq!(poll.status, stored.status);
        match stored.status {
            TransactionStatus::Success => {
                // Confirmation won: the poll's expiry attempt was a no-op.
                assert_eq!(stored.tx_hash.unwrap().as_str(), "0xabc");
                assert_eq!(confirm.unwrap().status, TransactionStatus::Success);
            }
            TransactionStatus::Failed => {
                // Expiry won: the late confirmation was rejected cleanly.
                assert!(stored.tx_hash.is_none());
                assert!(matches!(confirm, Err(SettlementError::AlreadyExpired)));
            }
            TransactionStatus::Pending => unreachable!(),
        }
    }
}
