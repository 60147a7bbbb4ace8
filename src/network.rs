//! Network definitions and the chain registry.
//!
//! This module defines the supported networks and a single immutable registry
//! mapping each chain to its pricing token, display token, display precision,
//! and block explorer. Every component that needs chain metadata reads it from
//! an injected [`ChainRegistry`] instead of keeping its own table.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt::{Display, Formatter};
use std::str::FromStr;

/// Supported settlement networks.
///
/// Serialized on the wire as the decimal EVM chain id string (e.g. `"1"` for
/// Ethereum mainnet, `"8453"` for Base), matching what wallet clients report.
#[derive(Debug, Hash, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Network {
    /// Ethereum Mainnet (chain ID 1).
    #[serde(rename = "1")]
    Ethereum,
    /// Optimism (chain ID 10).
    #[serde(rename = "10")]
    Optimism,
    /// Polygon (chain ID 137).
    #[serde(rename = "137")]
    Polygon,
    /// Base (chain ID 8453).
    #[serde(rename = "8453")]
    Base,
    /// Arbitrum One (chain ID 42161).
    #[serde(rename = "42161")]
    Arbitrum,
    /// Avalanche C-Chain (chain ID 43114).
    #[serde(rename = "43114")]
    Avalanche,
}

impl Display for Network {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.chain_id())
    }
}

impl FromStr for Network {
    type Err = UnknownNetwork;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "1" => Ok(Network::Ethereum),
            "10" => Ok(Network::Optimism),
            "137" => Ok(Network::Polygon),
            "8453" => Ok(Network::Base),
            "42161" => Ok(Network::Arbitrum),
            "43114" => Ok(Network::Avalanche),
            other => Err(UnknownNetwork(other.to_string())),
        }
    }
}

/// Error for a chain id string that does not name a supported network.
#[derive(Debug, thiserror::Error)]
#[error("Unsupported chain ID: {0}")]
pub struct UnknownNetwork(pub String);

impl Network {
    /// Return all known [`Network`] variants.
    pub fn variants() -> &'static [Network] {
        &[
            Network::Ethereum,
            Network::Optimism,
            Network::Polygon,
            Network::Base,
            Network::Arbitrum,
            Network::Avalanche,
        ]
    }

    /// Decimal EVM chain id.
    pub fn chain_id(&self) -> u64 {
        match self {
            Network::Ethereum => 1,
            Network::Optimism => 10,
            Network::Polygon => 137,
            Network::Base => 8453,
            Network::Arbitrum => 42161,
            Network::Avalanche => 43114,
        }
    }

    /// Human-readable network name for display surfaces.
    pub fn display_name(&self) -> &'static str {
        match self {
            Network::Ethereum => "Ethereum Mainnet",
            Network::Optimism => "Optimism",
            Network::Polygon => "Polygon",
            Network::Base => "Base",
            Network::Arbitrum => "Arbitrum One",
            Network::Avalanche => "Avalanche",
        }
    }
}

/// Token symbols known to the price feed table.
#[derive(Debug, Hash, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TokenSymbol {
    #[serde(rename = "ETH")]
    Eth,
    #[serde(rename = "POL")]
    Pol,
    #[serde(rename = "ARB")]
    Arb,
    #[serde(rename = "OP")]
    Op,
    #[serde(rename = "AVAX")]
    Avax,
}

impl Display for TokenSymbol {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TokenSymbol::Eth => "ETH",
            TokenSymbol::Pol => "POL",
            TokenSymbol::Arb => "ARB",
            TokenSymbol::Op => "OP",
            TokenSymbol::Avax => "AVAX",
        };
        write!(f, "{}", s)
    }
}

/// Provider-specific identifier of a USD price series (hex, no 0x prefix).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedId(pub String);

impl Display for FeedId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Per-chain settlement metadata.
///
/// `pricing_token` is the asset whose USD price is fetched to compute a native
/// amount; `display_token` is the symbol shown to the payer. They coincide for
/// most chains but diverge where the gas-equivalent asset is priced off a
/// base-layer series while the user-facing symbol is the chain's own token
/// (Arbitrum and Optimism).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChainInfo {
    pub network: Network,
    pub pricing_token: TokenSymbol,
    pub display_token: TokenSymbol,
    /// Fraction digits used when formatting native amounts for display.
    pub display_decimals: u32,
    /// Block explorer transaction URL prefix, hash appended verbatim.
    pub explorer_tx_base: &'static str,
}

/// Immutable registry of chain metadata and price feed identifiers.
///
/// Constructed once at startup and injected into the conversion calculator,
/// the lifecycle manager, and the HTTP handlers.
#[derive(Debug, Clone)]
pub struct ChainRegistry {
    chains: HashMap<Network, ChainInfo>,
    feeds: HashMap<TokenSymbol, FeedId>,
}

impl ChainRegistry {
    /// Builds a registry from explicit chain and feed tables.
    pub fn new(
        chains: impl IntoIterator<Item = ChainInfo>,
        feeds: impl IntoIterator<Item = (TokenSymbol, FeedId)>,
    ) -> Self {
        ChainRegistry {
            chains: chains.into_iter().map(|c| (c.network, c)).collect(),
            feeds: feeds.into_iter().collect(),
        }
    }

    /// The production registry for supported mainnets.
    pub fn mainnet() -> Self {
        let chains = [
            ChainInfo {
                network: Network::Ethereum,
                pricing_token: TokenSymbol::Eth,
                display_token: TokenSymbol::Eth,
                display_decimals: 6,
                explorer_tx_base: "https://etherscan.io/tx/",
            },
            ChainInfo {
                network: Network::Base,
                pricing_token: TokenSymbol::Eth,
                display_token: TokenSymbol::Eth,
                display_decimals: 6,
                explorer_tx_base: "https://basescan.org/tx/",
            },
            ChainInfo {
                network: Network::Polygon,
                pricing_token: TokenSymbol::Pol,
                display_token: TokenSymbol::Pol,
                display_decimals: 4,
                explorer_tx_base: "https://polygonscan.com/tx/",
            },
            ChainInfo {
                network: Network::Arbitrum,
                pricing_token: TokenSymbol::Eth,
                display_token: TokenSymbol::Arb,
                display_decimals: 4,
                explorer_tx_base: "https://arbiscan.io/tx/",
            },
            ChainInfo {
                network: Network::Optimism,
                pricing_token: TokenSymbol::Eth,
                display_token: TokenSymbol::Op,
                display_decimals: 4,
                explorer_tx_base: "https://optimistic.etherscan.io/tx/",
            },
            ChainInfo {
                network: Network::Avalanche,
                pricing_token: TokenSymbol::Avax,
                display_token: TokenSymbol::Avax,
                display_decimals: 4,
                explorer_tx_base: "https://snowtrace.io/tx/",
            },
        ];
        let feeds = [
            (
                TokenSymbol::Eth,
                FeedId("ff61491a931112ddf1bd8147cd1b641375f79f5825126d665480874634fd0ace".into()),
            ),
            (
                TokenSymbol::Pol,
                FeedId("5de33a9112c2b700b8d30b8a3402c103578ccfa2765696471cc672bd5cf6ac52".into()),
            ),
            (
                TokenSymbol::Arb,
                FeedId("3fa4252848f9f0a1480be62745a4629d9eb1322aebab8a791e344b3b9c1adcf5".into()),
            ),
            (
                TokenSymbol::Op,
                FeedId("385f64d993f7b77d8182ed5003d97c60aa3361f3cecfe711544d2d59165e9bdf".into()),
            ),
            (
                TokenSymbol::Avax,
                FeedId("93da3352f9f1d105fdfe4971cfa80e9dd777bfc5d0f683ebb6e1294b92137bb7".into()),
            ),
        ];
        ChainRegistry {
            chains: chains.into_iter().map(|c| (c.network, c)).collect(),
            feeds: feeds.into_iter().collect(),
        }
    }

    /// Metadata for a network, `None` if the chain is not supported.
    pub fn info(&self, network: Network) -> Option<&ChainInfo> {
        self.chains.get(&network)
    }

    /// Price feed identifier for a token, `None` if no feed is configured.
    pub fn feed_id(&self, token: TokenSymbol) -> Option<&FeedId> {
        self.feeds.get(&token)
    }

    /// All registered networks, in variant order.
    pub fn networks(&self) -> Vec<Network> {
        Network::variants()
            .iter()
            .copied()
            .filter(|n| self.chains.contains_key(n))
            .collect()
    }

    /// Full block explorer URL for a transaction hash on a network.
    pub fn explorer_tx_url(&self, network: Network, tx_hash: &str) -> Option<String> {
        self.info(network)
            .map(|info| format!("{}{}", info.explorer_tx_base, tx_hash))
    }
}
