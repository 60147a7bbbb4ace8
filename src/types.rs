//! Core domain types for the settlement engine.
//!
//! The key objects are [`PaymentRequest`] (a merchant-defined, reusable amount
//! plus accepted chains), [`Transaction`] (one payer's attempt to settle a
//! request on a specific chain), and the validated scalar types they are built
//! from. Wire payloads serialize in camelCase to stay compatible with the
//! JavaScript widget clients.

use once_cell::sync::Lazy;
use regex::Regex;
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::fmt::Display;
use std::str::FromStr;
use uuid::Uuid;

use crate::network::{Network, TokenSymbol};
use crate::timestamp::UnixTimestamp;

/// Opaque identifier of a [`PaymentRequest`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PaymentRequestId(pub Uuid);

impl PaymentRequestId {
    pub fn generate() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Display for PaymentRequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for PaymentRequestId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Opaque identifier of a [`Transaction`], generated at creation time.
///
/// UUID v7, so identifiers sort by creation time like the records they name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransactionId(pub Uuid);

impl TransactionId {
    pub fn generate() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for TransactionId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// A positive USD amount in human-readable currency format.
///
/// Accepts strings like `"$0.01"`, `"1,000"`, `"10.50"`, or raw JSON numbers.
/// Negative, zero, and out-of-range values are rejected at parse time, so an
/// amount that exists is always valid to convert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct UsdAmount(Decimal);

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum UsdAmountError {
    #[error("Invalid number format")]
    InvalidFormat,
    #[error(
        "Amount must be between {} and {}",
        usd_amount::MIN_STR,
        usd_amount::MAX_STR
    )]
    OutOfRange,
    #[error("Negative value is not allowed")]
    Negative,
}

mod usd_amount {
    use super::*;

    pub const MIN_STR: &str = "0.01";
    pub const MAX_STR: &str = "999999999";

    pub static MIN: Lazy<Decimal> = Lazy::new(|| Decimal::from_str(MIN_STR).expect("valid decimal"));
    pub static MAX: Lazy<Decimal> = Lazy::new(|| Decimal::from_str(MAX_STR).expect("valid decimal"));

    pub static CLEANER: Lazy<Regex> =
        Lazy::new(|| Regex::new(r"[^\d\.\-]+").expect("valid regex for amount cleanup"));
}

impl UsdAmount {
    pub fn parse(input: &str) -> Result<Self, UsdAmountError> {
        // Remove anything that isn't digit, dot, minus
        let cleaned = usd_amount::CLEANER.replace_all(input, "").to_string();

        let parsed = Decimal::from_str(&cleaned).map_err(|_| UsdAmountError::InvalidFormat)?;

        if parsed.is_sign_negative() {
            return Err(UsdAmountError::Negative);
        }

        if parsed < *usd_amount::MIN || parsed > *usd_amount::MAX {
            return Err(UsdAmountError::OutOfRange);
        }

        Ok(UsdAmount(parsed))
    }

    /// The amount as an `f64` for oracle arithmetic.
    pub fn as_f64(&self) -> f64 {
        self.0.to_f64().unwrap_or(f64::NAN)
    }

    pub fn as_decimal(&self) -> Decimal {
        self.0
    }
}

impl Display for UsdAmount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for UsdAmount {
    type Err = UsdAmountError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        UsdAmount::parse(s)
    }
}

impl Serialize for UsdAmount {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0.to_string())
    }
}

impl<'de> Deserialize<'de> for UsdAmount {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct AmountVisitor;

        impl serde::de::Visitor<'_> for AmountVisitor {
            type Value = UsdAmount;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                formatter.write_str("a positive USD amount as a string or number")
            }

            fn visit_str<E: serde::de::Error>(self, v: &str) -> Result<Self::Value, E> {
                UsdAmount::parse(v).map_err(E::custom)
            }

            fn visit_f64<E: serde::de::Error>(self, v: f64) -> Result<Self::Value, E> {
                if !v.is_finite() {
                    return Err(E::custom(UsdAmountError::InvalidFormat));
                }
                UsdAmount::parse(&v.to_string()).map_err(E::custom)
            }

            fn visit_u64<E: serde::de::Error>(self, v: u64) -> Result<Self::Value, E> {
                UsdAmount::parse(&v.to_string()).map_err(E::custom)
            }

            fn visit_i64<E: serde::de::Error>(self, v: i64) -> Result<Self::Value, E> {
                UsdAmount::parse(&v.to_string()).map_err(E::custom)
            }
        }

        deserializer.deserialize_any(AmountVisitor)
    }
}

/// Client-reported on-chain transaction hash, the provisional proof of payment.
///
/// Stored verbatim after a non-emptiness check; the engine does not query the
/// chain to verify inclusion (see the crate docs for the hardening path).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct TxHash(String);

#[derive(Debug, thiserror::Error, PartialEq)]
#[error("Transaction hash must be a non-empty string")]
pub struct EmptyTxHash;

impl TxHash {
    pub fn parse(input: &str) -> Result<Self, EmptyTxHash> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(EmptyTxHash);
        }
        Ok(TxHash(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for TxHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl<'de> Deserialize<'de> for TxHash {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        TxHash::parse(&s).map_err(serde::de::Error::custom)
    }
}

/// Lifecycle state of a [`Transaction`].
///
/// `Pending` is the initial state; `Success` and `Failed` are terminal and
/// never left once entered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionStatus {
    Pending,
    Success,
    Failed,
}

impl TransactionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TransactionStatus::Success | TransactionStatus::Failed)
    }
}

impl Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TransactionStatus::Pending => "pending",
            TransactionStatus::Success => "success",
            TransactionStatus::Failed => "failed",
        };
        write!(f, "{}", s)
    }
}

/// A merchant-defined, reusable payment specification ("button").
///
/// Read-only to the settlement engine except for the append-only list of
/// transaction back-references.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentRequest {
    pub id: PaymentRequestId,
    pub amount_usd: UsdAmount,
    /// Chains the payer may settle on, in merchant preference order.
    pub chain_ids: Vec<Network>,
    pub merchant_address: String,
    /// Where the merchant receives payment confirmations.
    pub merchant_contact: String,
    #[serde(default = "default_true")]
    pub is_active: bool,
    /// Non-owning back-references to settlement attempts, newest last.
    #[serde(default)]
    pub transactions: Vec<TransactionId>,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum PaymentRequestError {
    #[error("Payment request must accept at least one chain")]
    NoChains,
    #[error("Payment request chains must be unique")]
    DuplicateChains,
    #[error("Merchant address must not be empty")]
    EmptyMerchantAddress,
}

impl PaymentRequest {
    /// Checks the structural invariants: at least one unique chain and a
    /// non-empty merchant address. The amount is valid by construction.
    pub fn validate(&self) -> Result<(), PaymentRequestError> {
        if self.chain_ids.is_empty() {
            return Err(PaymentRequestError::NoChains);
        }
        let mut seen = std::collections::HashSet::new();
        for chain in &self.chain_ids {
            if !seen.insert(chain) {
                return Err(PaymentRequestError::DuplicateChains);
            }
        }
        if self.merchant_address.trim().is_empty() {
            return Err(PaymentRequestError::EmptyMerchantAddress);
        }
        Ok(())
    }
}

/// One payer's attempt to settle a [`PaymentRequest`] on a specific chain.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    pub id: TransactionId,
    /// Payer identifier: an email or wallet-derived string.
    pub payer: String,
    /// Merchant payout address, copied from the request at creation time.
    pub payee: String,
    pub amount_usd: UsdAmount,
    #[serde(rename = "chainId")]
    pub network: Network,
    /// Set if and only if the transaction reached `Success`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tx_hash: Option<TxHash>,
    pub status: TransactionStatus,
    pub payment_request_id: PaymentRequestId,
    pub created_at: UnixTimestamp,
}

/// A USD price observation for one token, valid only at its fetch instant.
///
/// Not persisted; callers must treat any quote as possibly stale beyond the
/// moment it was fetched.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PriceQuote {
    pub symbol: TokenSymbol,
    /// USD per unit token, already scaled by the feed exponent.
    pub price: f64,
    /// Signed decimal exponent as published by the feed.
    pub expo: i32,
    pub publish_time: UnixTimestamp,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_usd_amount_parses_plain() {
        let amount = UsdAmount::parse("10").unwrap();
        assert_eq!(amount.to_string(), "10");
    }

    #[test]
    fn test_usd_amount_parses_currency_format() {
        let amount = UsdAmount::parse("$1,000.50").unwrap();
        assert_eq!(amount.to_string(), "1000.50");
    }

    #[test]
    fn test_usd_amount_rejects_negative() {
        assert_eq!(UsdAmount::parse("-5"), Err(UsdAmountError::Negative));
    }

    #[test]
    fn test_usd_amount_rejects_zero() {
        assert_eq!(UsdAmount::parse("0"), Err(UsdAmountError::OutOfRange));
    }

    #[test]
    fn test_usd_amount_rejects_garbage() {
        assert_eq!(UsdAmount::parse("abc"), Err(UsdAmountError::InvalidFormat));
    }

    #[test]
    fn test_usd_amount_deserializes_from_number() {
        let amount: UsdAmount = serde_json::from_str("10.5").unwrap();
        assert_eq!(amount, UsdAmount::parse("10.5").unwrap());
    }

    #[test]
    fn test_usd_amount_deserializes_from_string() {
        let amount: UsdAmount = serde_json::from_str("\"$25\"").unwrap();
        assert_eq!(amount, UsdAmount::parse("25").unwrap());
    }

    #[test]
    fn test_usd_amount_rejects_negative_number_in_json() {
        let result: Result<UsdAmount, _> = serde_json::from_str("-5");
        assert!(result.is_err());
    }

    #[test]
    fn test_tx_hash_rejects_empty() {
        assert_eq!(TxHash::parse(""), Err(EmptyTxHash));
        assert_eq!(TxHash::parse("   "), Err(EmptyTxHash));
    }

    #[test]
    fn test_tx_hash_trims() {
        let hash = TxHash::parse(" 0xabc ").unwrap();
        assert_eq!(hash.as_str(), "0xabc");
    }

    #[test]
    fn test_status_serializes_lowercase() {
        assert_eq!(
            serde_json::to_string(&TransactionStatus::Pending).unwrap(),
            "\"pending\""
        );
        assert_eq!(
            serde_json::to_string(&TransactionStatus::Success).unwrap(),
            "\"success\""
        );
        assert_eq!(
            serde_json::to_string(&TransactionStatus::Failed).unwrap(),
            "\"failed\""
        );
    }

    #[test]
    fn test_terminal_states() {
        assert!(!TransactionStatus::Pending.is_terminal());
        assert!(TransactionStatus::Success.is_terminal());
        assert!(TransactionStatus::Failed.is_terminal());
    }

    #[test]
    fn test_payment_request_validation() {
        let mut request = PaymentRequest {
            id: PaymentRequestId::generate(),
            amount_usd: UsdAmount::parse("10").unwrap(),
            chain_ids: vec![Network::Ethereum, Network::Base],
            merchant_address: "0x1111111111111111111111111111111111111111".into(),
            merchant_contact: "merchant@example.com".into(),
            is_active: true,
            transactions: vec![],
        };
        assert!(request.validate().is_ok());

        request.chain_ids.clear();
        assert_eq!(request.validate(), Err(PaymentRequestError::NoChains));

        request.chain_ids = vec![Network::Ethereum, Network::Ethereum];
        assert_eq!(request.validate(), Err(PaymentRequestError::DuplicateChains));

        request.chain_ids = vec![Network::Ethereum];
        request.merchant_address = " ".into();
        assert_eq!(
            request.validate(),
            Err(PaymentRequestError::EmptyMerchantAddress)
        );
    }

    #[test]
    fn test_transaction_wire_format() {
        let tx = Transaction {
            id: TransactionId::generate(),
            payer: "payer@example.com".into(),
            payee: "0x1111111111111111111111111111111111111111".into(),
            amount_usd: UsdAmount::parse("10").unwrap(),
            network: Network::Ethereum,
            tx_hash: None,
            status: TransactionStatus::Pending,
            payment_request_id: PaymentRequestId::generate(),
            created_at: UnixTimestamp::from_secs(1699999999),
        };
        let value = serde_json::to_value(&tx).unwrap();
        assert_eq!(value["chainId"], "1");
        assert_eq!(value["status"], "pending");
        assert_eq!(value["createdAt"], "1699999999");
        assert!(value.get("txHash").is_none());
    }
}
