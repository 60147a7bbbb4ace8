//! Price oracle adapter for Hermes-style USD price feeds.
//!
//! This module isolates every dependency on the external price service. The
//! feed encodes each price as an integer mantissa plus a signed decimal
//! exponent; the adapter computes `mantissa * 10^expo` exactly as published
//! and never assumes a fixed number of decimals.
//!
//! All other components talk to prices only through the [`PriceOracle`] trait.

use futures_util::stream::{self, StreamExt};
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::instrument;
use url::Url;

use crate::network::{ChainRegistry, FeedId, TokenSymbol};
use crate::timestamp::UnixTimestamp;
use crate::types::PriceQuote;

/// Feed ids per outbound request. The provider accepts multi-id queries, so a
/// bulk lookup is batched instead of issued one id at a time.
const MAX_IDS_PER_REQUEST: usize = 8;
/// Concurrent in-flight requests when a bulk lookup spans multiple chunks.
const MAX_IN_FLIGHT: usize = 4;

/// Errors surfaced by the price oracle adapter.
#[derive(Debug, thiserror::Error)]
pub enum OracleError {
    /// No price feed is configured for the requested token.
    #[error("No price feed found for token: {0}")]
    UnsupportedToken(TokenSymbol),
    /// Transient upstream failure: transport error, non-2xx response, or a
    /// malformed payload. Safe to retry with backoff.
    #[error("Price feed unavailable: {0}")]
    Unavailable(String),
}

impl From<reqwest::Error> for OracleError {
    fn from(err: reqwest::Error) -> Self {
        OracleError::Unavailable(err.to_string())
    }
}

/// Read access to USD token prices.
///
/// Implementors fetch and normalize prices from an external feed. The engine
/// stays generic over this trait so tests can count and stub oracle calls.
pub trait PriceOracle: Send + Sync {
    /// Current USD price of one unit of `symbol`.
    fn get_price(
        &self,
        symbol: TokenSymbol,
    ) -> impl Future<Output = Result<f64, OracleError>> + Send;

    /// Batched lookup. Symbols for which the provider returns no data are
    /// absent from the result map; callers must check for their presence.
    fn get_prices(
        &self,
        symbols: &[TokenSymbol],
    ) -> impl Future<Output = Result<HashMap<TokenSymbol, f64>, OracleError>> + Send;
}

impl<T: PriceOracle> PriceOracle for Arc<T> {
    fn get_price(
        &self,
        symbol: TokenSymbol,
    ) -> impl Future<Output = Result<f64, OracleError>> + Send {
        self.as_ref().get_price(symbol)
    }

    fn get_prices(
        &self,
        symbols: &[TokenSymbol],
    ) -> impl Future<Output = Result<HashMap<TokenSymbol, f64>, OracleError>> + Send {
        self.as_ref().get_prices(symbols)
    }
}

/// One entry of the provider's `latest_price_feeds` response.
#[derive(Debug, Deserialize)]
struct PriceFeedEntry {
    id: String,
    price: Option<FeedPrice>,
}

/// The mantissa/exponent price pair as published by the feed.
#[derive(Debug, Deserialize)]
struct FeedPrice {
    price: String,
    expo: i32,
    publish_time: u64,
}

/// Scales an integer mantissa by its published exponent.
fn decode_price(mantissa: &str, expo: i32) -> Option<f64> {
    let mantissa: i64 = mantissa.parse().ok()?;
    Some(mantissa as f64 * 10f64.powi(expo))
}

/// Price oracle backed by a Hermes-compatible HTTP feed.
///
/// Queries `GET {base}/latest_price_feeds?ids[]=…` and maps responses back to
/// token symbols through the injected [`ChainRegistry`] feed table.
#[derive(Clone)]
pub struct HermesOracle {
    http: reqwest::Client,
    base_url: Url,
    registry: Arc<ChainRegistry>,
}

impl HermesOracle {
    pub fn new(
        base_url: Url,
        timeout: Duration,
        registry: Arc<ChainRegistry>,
    ) -> Result<Self, OracleError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            http,
            base_url,
            registry,
        })
    }

    /// Fetches one chunk of feeds and normalizes every entry that carries
    /// price data. Entries without a price are skipped, not an error.
    #[instrument(skip_all, fields(ids = ids.len()))]
    async fn fetch_feeds(
        &self,
        ids: &[(TokenSymbol, FeedId)],
    ) -> Result<Vec<PriceQuote>, OracleError> {
        let query: Vec<(&str, &str)> = ids
            .iter()
            .map(|(_, feed_id)| ("ids[]", feed_id.0.as_str()))
            .collect();
        let url = self
            .base_url
            .join("latest_price_feeds")
            .map_err(|e| OracleError::Unavailable(e.to_string()))?;

        let response = self.http.get(url).query(&query).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::warn!(%status, body = %body, "Price feed returned an error");
            return Err(OracleError::Unavailable(format!(
                "HTTP {status} from price feed"
            )));
        }

        let entries: Vec<PriceFeedEntry> = response
            .json()
            .await
            .map_err(|e| OracleError::Unavailable(format!("Malformed feed payload: {e}")))?;

        let symbol_by_id: HashMap<&str, TokenSymbol> = ids
            .iter()
            .map(|(symbol, feed_id)| (feed_id.0.as_str(), *symbol))
            .collect();

        let mut quotes = Vec::with_capacity(entries.len());
        for entry in entries {
            let Some(symbol) = symbol_by_id
                .get(entry.id.trim_start_matches("0x"))
                .copied()
            else {
                continue;
            };
            let Some(feed_price) = entry.price else {
                tracing::warn!(%symbol, "Feed entry carries no price data");
                continue;
            };
            let Some(price) = decode_price(&feed_price.price, feed_price.expo) else {
                tracing::warn!(%symbol, mantissa = %feed_price.price, "Unparseable feed mantissa");
                continue;
            };
            quotes.push(PriceQuote {
                symbol,
                price,
                expo: feed_price.expo,
                publish_time: UnixTimestamp::from_secs(feed_price.publish_time),
            });
        }
        Ok(quotes)
    }
}

impl PriceOracle for HermesOracle {
    #[instrument(skip(self), err)]
    async fn get_price(&self, symbol: TokenSymbol) -> Result<f64, OracleError> {
        let feed_id = self
            .registry
            .feed_id(symbol)
            .ok_or(OracleError::UnsupportedToken(symbol))?
            .clone();
        let quotes = self.fetch_feeds(&[(symbol, feed_id)]).await?;
        quotes
            .first()
            .map(|quote| quote.price)
            .ok_or_else(|| OracleError::Unavailable(format!("No price data available for {symbol}")))
    }

    #[instrument(skip_all, fields(symbols = symbols.len()), err)]
    async fn get_prices(
        &self,
        symbols: &[TokenSymbol],
    ) -> Result<HashMap<TokenSymbol, f64>, OracleError> {
        let mut ids = Vec::with_capacity(symbols.len());
        for symbol in symbols {
            // Unconfigured symbols are absent from the result, mirroring
            // symbols the provider has no data for.
            if let Some(feed_id) = self.registry.feed_id(*symbol) {
                ids.push((*symbol, feed_id.clone()));
            }
        }

        let chunks: Vec<Vec<(TokenSymbol, FeedId)>> =
            ids.chunks(MAX_IDS_PER_REQUEST).map(|c| c.to_vec()).collect();
        let mut results = stream::iter(chunks)
            .map(|chunk| async move { self.fetch_feeds(&chunk).await })
            .buffer_unordered(MAX_IN_FLIGHT);

        let mut prices = HashMap::new();
        while let Some(quotes) = results.next().await {
            for quote in quotes? {
                prices.insert(quote.symbol, quote.price);
            }
        }
        Ok(prices)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_price_applies_exponent() {
        // 247103102214 * 10^-8 = 2471.03102214
        let price = decode_price("247103102214", -8).unwrap();
        assert!((price - 2471.03102214).abs() < 1e-9);
    }

    #[test]
    fn test_decode_price_positive_exponent() {
        let price = decode_price("25", 2).unwrap();
        assert_eq!(price, 2500.0);
    }

    #[test]
    fn test_decode_price_rejects_garbage_mantissa() {
        assert!(decode_price("not-a-number", -8).is_none());
    }

    #[test]
    fn test_feed_entry_parses_without_price() {
        let entry: PriceFeedEntry =
            serde_json::from_str(r#"{"id": "ff61491a", "price": null}"#).unwrap();
        assert!(entry.price.is_none());
    }

    #[test]
    fn test_feed_entry_parses_full() {
        let raw = r#"{
            "id": "ff61491a931112ddf1bd8147cd1b641375f79f5825126d665480874634fd0ace",
            "price": {"price": "250000000000", "conf": "12345", "expo": -8, "publish_time": 1700000000},
            "ema_price": {"price": "249000000000", "conf": "12345", "expo": -8, "publish_time": 1700000000}
        }"#;
        let entry: PriceFeedEntry = serde_json::from_str(raw).unwrap();
        let price = entry.price.unwrap();
        assert_eq!(price.expo, -8);
        assert_eq!(price.publish_time, 1700000000);
        assert_eq!(decode_price(&price.price, price.expo).unwrap(), 2500.0);
    }

    #[test]
    fn test_empty_feed_array_is_no_data() {
        let entries: Vec<PriceFeedEntry> = serde_json::from_str("[]").unwrap();
        assert!(entries.is_empty());
    }
}
