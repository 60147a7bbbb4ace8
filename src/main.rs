//! Settlement engine HTTP entrypoint.
//!
//! This binary launches an Axum-based HTTP server exposing the cross-chain
//! payment settlement interface: USD-to-native price conversion, settlement
//! submission, confirmation with client-reported on-chain proof, and status
//! polling.
//!
//! Endpoints:
//! - `GET /supported` – Supported chains with display metadata
//! - `GET /prices` – USD to native-token conversion (single chain or bulk)
//! - `POST /transactions` – Settlement submission
//! - `GET /transactions/{id}/status` – Status polling
//! - `POST /transactions/{id}/confirm` – Confirmation with on-chain hash
//!
//! This server includes:
//! - OpenTelemetry tracing via `TraceLayer`
//! - CORS support for cross-origin payment widgets
//! - Graceful shutdown on SIGTERM/SIGINT
//!
//! Environment:
//! - `.env` values loaded at startup
//! - `HOST`, `PORT` control binding address
//! - `ORACLE_URL` overrides the price feed endpoint
//! - `OTEL_*` variables enable tracing export

use axum::Router;
use axum::http::Method;
use dotenvy::dotenv;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors;

use settle_rs::config::Config;
use settle_rs::conversion::ConversionEngine;
use settle_rs::engine::SettlementLocal;
use settle_rs::handlers::{self, AppState};
use settle_rs::network::ChainRegistry;
use settle_rs::notify::{Notifier, TracingNotifier, WebhookNotifier};
use settle_rs::oracle::HermesOracle;
use settle_rs::shutdown::ShutdownSignal;
use settle_rs::store::{
    InMemoryPaymentRequestStore, InMemoryTransactionStore, PaymentRequestStore,
};
use settle_rs::telemetry::Telemetry;
use settle_rs::trace_id::RequestIdLayer;

const NOTIFY_TIMEOUT: Duration = Duration::from_secs(10);

/// Initializes the settlement engine server.
///
/// - Loads `.env` variables.
/// - Initializes tracing and optional OpenTelemetry export.
/// - Builds the chain registry, price oracle, and settlement engine.
/// - Seeds configured payment requests.
/// - Starts an Axum HTTP server with the settlement handlers.
///
/// Binds to the address specified by the `HOST` and `PORT` env vars.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load .env variables
    dotenv().ok();

    let telemetry = Telemetry::init();

    let config = Config::load()?;

    let registry = Arc::new(ChainRegistry::mainnet());
    let oracle = HermesOracle::new(
        config.oracle().base_url().clone(),
        config.oracle().timeout(),
        registry.clone(),
    )?;
    let conversion = Arc::new(ConversionEngine::new(oracle, registry.clone()));

    let notifier: Arc<dyn Notifier> = match config.notification_webhook() {
        Some(url) => Arc::new(WebhookNotifier::new(url.clone(), NOTIFY_TIMEOUT)?),
        None => Arc::new(TracingNotifier),
    };

    let transactions = Arc::new(InMemoryTransactionStore::new());
    let requests = Arc::new(InMemoryPaymentRequestStore::new());
    for request in config.requests() {
        requests.insert(request.clone()).await?;
    }
    tracing::info!(count = config.requests().len(), "Seeded payment requests");

    let engine = Arc::new(
        SettlementLocal::new(
            transactions,
            requests.clone(),
            registry.clone(),
            notifier,
        )
        .with_expiry_window(config.expiry_window()),
    );

    let state = AppState {
        engine,
        conversion,
        requests,
        registry,
    };

    let http_endpoints = Router::new()
        .merge(handlers::routes().with_state(state))
        .layer(telemetry.http_tracing())
        .layer(RequestIdLayer)
        .layer(
            cors::CorsLayer::new()
                .allow_origin(cors::Any)
                .allow_methods([Method::GET, Method::POST])
                .allow_headers(cors::Any),
        );

    let addr = SocketAddr::new(config.host(), config.port());
    tracing::info!("Starting server at http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .unwrap_or_else(|e| {
            tracing::error!("Failed to bind to {}: {}", addr, e);
            std::process::exit(1);
        });

    let shutdown = ShutdownSignal::install()?;
    let cancellation_token = shutdown.token();
    let graceful_shutdown = async move { cancellation_token.cancelled().await };
    axum::serve(listener, http_endpoints)
        .with_graceful_shutdown(graceful_shutdown)
        .await?;

    Ok(())
}
