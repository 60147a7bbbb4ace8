//! Conversion calculator: USD amounts to chain-native token amounts.
//!
//! A conversion resolves the chain to its pricing token, fetches one USD
//! quote, and divides. The bulk variant computes the minimal set of distinct
//! pricing tokens across the requested chains and fetches each exactly once,
//! so six chains sharing three price series cost three feed lookups, not six.

use std::collections::HashMap;
use std::sync::Arc;
use tracing::instrument;

use crate::network::{ChainRegistry, Network, TokenSymbol};
use crate::oracle::{OracleError, PriceOracle};

/// Result of converting a USD amount for one chain.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversion {
    /// Amount of the native token equal to the requested USD amount.
    pub native_amount: f64,
    /// Symbol shown to the payer; may differ from the pricing token.
    #[serde(rename = "tokenSymbol")]
    pub display_symbol: TokenSymbol,
    /// USD per unit of the pricing token at fetch time.
    #[serde(rename = "price")]
    pub unit_price: f64,
}

impl Conversion {
    /// Formats the native amount with a chain-appropriate number of fraction
    /// digits (see [`crate::network::ChainInfo::display_decimals`]).
    pub fn format_native(&self, decimals: u32) -> String {
        format!("{:.*}", decimals as usize, self.native_amount)
    }
}

/// Errors surfaced by the conversion calculator.
#[derive(Debug, thiserror::Error)]
pub enum ConversionError {
    /// The chain is not present in the injected registry.
    #[error("Unsupported chain ID: {0}")]
    UnsupportedChain(Network),
    /// Non-positive or non-finite USD amount; rejected before any oracle call.
    #[error("Invalid USD amount: {0}")]
    InvalidAmount(f64),
    #[error(transparent)]
    Oracle(#[from] OracleError),
}

/// Maps `(USD amount, chain)` to `(native amount, display symbol, unit price)`.
#[derive(Clone)]
pub struct ConversionEngine<O> {
    oracle: O,
    registry: Arc<ChainRegistry>,
}

impl<O: PriceOracle> ConversionEngine<O> {
    pub fn new(oracle: O, registry: Arc<ChainRegistry>) -> Self {
        Self { oracle, registry }
    }

    pub fn registry(&self) -> &ChainRegistry {
        &self.registry
    }

    /// Converts a USD amount into the native amount for a single chain.
    #[instrument(skip(self), err)]
    pub async fn convert(
        &self,
        usd_amount: f64,
        network: Network,
    ) -> Result<Conversion, ConversionError> {
        if !usd_amount.is_finite() || usd_amount <= 0.0 {
            return Err(ConversionError::InvalidAmount(usd_amount));
        }
        let info = self
            .registry
            .info(network)
            .ok_or(ConversionError::UnsupportedChain(network))?;
        let unit_price = self.oracle.get_price(info.pricing_token).await?;
        Ok(Conversion {
            native_amount: usd_amount / unit_price,
            display_symbol: info.display_token,
            unit_price,
        })
    }

    /// Converts a USD amount for every requested chain in one batched fetch.
    ///
    /// Chains with no registry entry or no available price are omitted from
    /// the result rather than failing the whole batch; callers render a
    /// per-chain "price unavailable" state for the missing ones.
    #[instrument(skip(self, networks), fields(chains = networks.len()), err)]
    pub async fn convert_all(
        &self,
        usd_amount: f64,
        networks: &[Network],
    ) -> Result<HashMap<Network, Conversion>, ConversionError> {
        if !usd_amount.is_finite() || usd_amount <= 0.0 {
            return Err(ConversionError::InvalidAmount(usd_amount));
        }

        // Minimal distinct set of pricing tokens across the requested chains.
        let mut pricing_tokens: Vec<TokenSymbol> = Vec::new();
        for network in networks {
            if let Some(info) = self.registry.info(*network) {
                if !pricing_tokens.contains(&info.pricing_token) {
                    pricing_tokens.push(info.pricing_token);
                }
            }
        }

        let prices = self.oracle.get_prices(&pricing_tokens).await?;

        let mut conversions = HashMap::with_capacity(networks.len());
        for network in networks {
            let Some(info) = self.registry.info(*network) else {
                continue;
            };
            let Some(unit_price) = prices.get(&info.pricing_token).copied() else {
                tracing::warn!(%network, token = %info.pricing_token, "Price unavailable, omitting chain");
                continue;
            };
            conversions.insert(
                *network,
                Conversion {
                    native_amount: usd_amount / unit_price,
                    display_symbol: info.display_token,
                    unit_price,
                },
            );
        }
        Ok(conversions)
    }
}
