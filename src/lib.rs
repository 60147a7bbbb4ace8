//! Cross-chain payment settlement engine.
//!
//! A merchant defines a payment request for a fixed USD amount; a payer
//! settles it in the native token of any accepted chain. This crate converts
//! the USD amount into a chain-native amount with a live price oracle, owns
//! the lifecycle of the resulting transaction record, reconciles the payer's
//! client-reported on-chain hash with the pending record, and exposes a
//! bounded-retry status-polling contract over HTTP.
//!
//! # Modules
//!
//! - [`network`] — Supported networks and the immutable chain/token registry.
//! - [`oracle`] — Price oracle adapter over a Hermes-style USD price feed.
//! - [`conversion`] — USD to native-token conversion, single and batched.
//! - [`store`] — Transaction and payment request stores with per-record
//!   conditional transitions.
//! - [`expiry`] — The lazy-expiry policy as a pure decision function.
//! - [`engine`] — The transaction lifecycle manager
//!   ([`engine::SettlementEngine`] trait and [`engine::SettlementLocal`]
//!   implementation).
//! - [`notify`] — Outbound payer/merchant notification boundary,
//!   fire-and-forget.
//! - [`handlers`] — HTTP endpoint handlers for the settlement server.
//! - [`client`] — Client-side bounded status polling.
//! - [`config`] — Server configuration from CLI, env, and JSON file.
//! - [`types`] — Domain types: requests, transactions, amounts, hashes.
//! - [`timestamp`] — Unix timestamp and the injectable clock.
//! - [`telemetry`] — tracing + OpenTelemetry setup.
//! - [`shutdown`] — SIGTERM/SIGINT graceful shutdown.
//!
//! # Trust model
//!
//! The engine accepts a payer-submitted transaction hash as provisional proof
//! of payment and does not query a chain node to verify inclusion. A hardened
//! deployment would treat the client report as a hint that triggers receipt
//! verification against the chain's RPC before confirming; the
//! [`engine::SettlementEngine`] trait is the seam where such an implementation
//! slots in.

pub mod client;
pub mod config;
pub mod conversion;
pub mod engine;
pub mod expiry;
pub mod handlers;
pub mod network;
pub mod notify;
pub mod oracle;
pub mod shutdown;
pub mod store;
pub mod telemetry;
pub mod timestamp;
pub mod trace_id;
pub mod types;
