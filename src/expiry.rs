//! Lazy expiry policy for pending transactions.
//!
//! Expiry is not a background scheduler: it is a pure decision function
//! evaluated on every read or write of a transaction record. A pending record
//! older than the expiry window must be treated as failed by whoever touches
//! it next, and the resulting write-back goes through the store's conditional
//! transition so a racing confirmation cannot be clobbered.

use std::time::Duration;

use crate::timestamp::UnixTimestamp;
use crate::types::TransactionStatus;

/// Default window after which a pending transaction is considered failed.
pub const DEFAULT_EXPIRY_WINDOW: Duration = Duration::from_secs(10 * 60);

/// Outcome of evaluating the expiry policy against one record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Evaluation {
    /// The record's status stands as-is.
    Keep,
    /// The record is pending and stale: transition it to failed.
    Expire,
}

/// Decides whether a record must be expired, given its status, creation time,
/// the current time, and the configured window.
///
/// Terminal records are never touched; a pending record expires strictly
/// after `window` has elapsed.
pub fn evaluate(
    status: TransactionStatus,
    created_at: UnixTimestamp,
    now: UnixTimestamp,
    window: Duration,
) -> Evaluation {
    if status.is_terminal() {
        return Evaluation::Keep;
    }
    if now.duration_since(created_at) > window {
        Evaluation::Expire
    } else {
        Evaluation::Keep
    }
}
