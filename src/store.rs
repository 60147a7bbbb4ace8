//! Persistent stores for transactions and payment requests.
//!
//! The traits surface an async, fallible interface so a database-backed
//! implementation can slot in; the in-memory implementations here keep
//! records in sharded concurrent maps. The single discipline that matters is
//! [`TransactionStore::transition_if_pending`]: every status change goes
//! through a per-record compare-and-set on `status == Pending`, so the first
//! terminal transition wins and unrelated records never contend.

use dashmap::DashMap;

use crate::types::{
    PaymentRequest, PaymentRequestId, Transaction, TransactionId, TransactionStatus, TxHash,
};

/// Errors surfaced by a storage backend.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Record not found")]
    NotFound,
    #[error("Storage backend unavailable: {0}")]
    Unavailable(String),
}

/// A terminal status change, applied only to a still-pending record.
#[derive(Debug, Clone)]
pub enum TerminalTransition {
    /// Confirmation with on-chain proof.
    Success { tx_hash: TxHash },
    /// Explicit failure or lazy expiry.
    Failed,
}

/// Result of a conditional transition attempt.
#[derive(Debug, Clone)]
pub struct CasOutcome {
    /// The record after the attempt, terminal either way.
    pub record: Transaction,
    /// Whether this call performed the transition. A racing writer that lost
    /// sees `false` and the record as the winner left it.
    pub applied: bool,
}

/// Store of settlement attempts, keyed by transaction id.
pub trait TransactionStore: Send + Sync {
    fn insert(&self, tx: Transaction) -> impl Future<Output = Result<(), StoreError>> + Send;

    fn get(
        &self,
        id: &TransactionId,
    ) -> impl Future<Output = Result<Option<Transaction>, StoreError>> + Send;

    /// Applies `transition` only if the record is currently `Pending`.
    ///
    /// This is the per-record serialization point. Returns `None` for an
    /// unknown id.
    fn transition_if_pending(
        &self,
        id: &TransactionId,
        transition: TerminalTransition,
    ) -> impl Future<Output = Result<Option<CasOutcome>, StoreError>> + Send;

    /// All transactions for a payer, newest first.
    fn list_by_payer(
        &self,
        payer: &str,
    ) -> impl Future<Output = Result<Vec<Transaction>, StoreError>> + Send;
}

/// Store of merchant payment requests.
///
/// Requests are read-only to the engine except for the append-only list of
/// transaction back-references.
pub trait PaymentRequestStore: Send + Sync {
    fn insert(
        &self,
        request: PaymentRequest,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    fn find_by_id(
        &self,
        id: &PaymentRequestId,
    ) -> impl Future<Output = Result<Option<PaymentRequest>, StoreError>> + Send;

    fn append_transaction(
        &self,
        id: &PaymentRequestId,
        tx_id: TransactionId,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;
}

impl<T: TransactionStore> TransactionStore for std::sync::Arc<T> {
    fn insert(&self, tx: Transaction) -> impl Future<Output = Result<(), StoreError>> + Send {
        self.as_ref().insert(tx)
    }

    fn get(
        &self,
        id: &TransactionId,
    ) -> impl Future<Output = Result<Option<Transaction>, StoreError>> + Send {
        self.as_ref().get(id)
    }

    fn transition_if_pending(
        &self,
        id: &TransactionId,
        transition: TerminalTransition,
    ) -> impl Future<Output = Result<Option<CasOutcome>, StoreError>> + Send {
        self.as_ref().transition_if_pending(id, transition)
    }

    fn list_by_payer(
        &self,
        payer: &str,
    ) -> impl Future<Output = Result<Vec<Transaction>, StoreError>> + Send {
        self.as_ref().list_by_payer(payer)
    }
}

impl<T: PaymentRequestStore> PaymentRequestStore for std::sync::Arc<T> {
    fn insert(
        &self,
        request: PaymentRequest,
    ) -> impl Future<Output = Result<(), StoreError>> + Send {
        self.as_ref().insert(request)
    }

    fn find_by_id(
        &self,
        id: &PaymentRequestId,
    ) -> impl Future<Output = Result<Option<PaymentRequest>, StoreError>> + Send {
        self.as_ref().find_by_id(id)
    }

    fn append_transaction(
        &self,
        id: &PaymentRequestId,
        tx_id: TransactionId,
    ) -> impl Future<Output = Result<(), StoreError>> + Send {
        self.as_ref().append_transaction(id, tx_id)
    }
}

/// Sharded in-memory transaction store.
#[derive(Debug, Default)]
pub struct InMemoryTransactionStore {
    records: DashMap<TransactionId, Transaction>,
}

impl InMemoryTransactionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TransactionStore for InMemoryTransactionStore {
    async fn insert(&self, tx: Transaction) -> Result<(), StoreError> {
        self.records.insert(tx.id, tx);
        Ok(())
    }

    async fn get(&self, id: &TransactionId) -> Result<Option<Transaction>, StoreError> {
        Ok(self.records.get(id).map(|r| r.clone()))
    }

    async fn transition_if_pending(
        &self,
        id: &TransactionId,
        transition: TerminalTransition,
    ) -> Result<Option<CasOutcome>, StoreError> {
        // The entry guard holds the shard lock for this record, serializing
        // racing writers without blocking unrelated records.
        let Some(mut entry) = self.records.get_mut(id) else {
            return Ok(None);
        };
        if entry.status != TransactionStatus::Pending {
            return Ok(Some(CasOutcome {
                record: entry.clone(),
                applied: false,
            }));
        }
        match transition {
            TerminalTransition::Success { tx_hash } => {
                entry.status = TransactionStatus::Success;
                entry.tx_hash = Some(tx_hash);
            }
            TerminalTransition::Failed => {
                entry.status = TransactionStatus::Failed;
            }
        }
        Ok(Some(CasOutcome {
            record: entry.clone(),
            applied: true,
        }))
    }

    async fn list_by_payer(&self, payer: &str) -> Result<Vec<Transaction>, StoreError> {
        let mut transactions: Vec<Transaction> = self
            .records
            .iter()
            .filter(|r| r.payer == payer)
            .map(|r| r.clone())
            .collect();
        // Newest first; transaction ids are v7 so they tie-break in time order.
        transactions.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| b.id.0.cmp(&a.id.0))
        });
        Ok(transactions)
    }
}

/// Sharded in-memory payment request store.
#[derive(Debug, Default)]
pub struct InMemoryPaymentRequestStore {
    records: DashMap<PaymentRequestId, PaymentRequest>,
}

impl InMemoryPaymentRequestStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PaymentRequestStore for InMemoryPaymentRequestStore {
    async fn insert(&self, request: PaymentRequest) -> Result<(), StoreError> {
        self.records.insert(request.id, request);
        Ok(())
    }

    async fn find_by_id(
        &self,
        id: &PaymentRequestId,
    ) -> Result<Option<PaymentRequest>, StoreError> {
        Ok(self.records.get(id).map(|r| r.clone()))
    }

    async fn append_transaction(
        &self,
        id: &PaymentRequestId,
        tx_id: TransactionId,
    ) -> Result<(), StoreError> {
        let mut entry = self.records.get_mut(id).ok_or(StoreError::NotFound)?;
        entry.transactions.push(tx_id);
        Ok(())
    }
}
