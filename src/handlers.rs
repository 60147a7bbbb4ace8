//! HTTP endpoints of the settlement engine.
//!
//! These are the server-side handlers the payment widget clients talk to:
//! submit a settlement, poll its status, report on-chain proof, and fetch
//! USD-to-native conversions. Payloads serialize in camelCase to stay
//! compatible with the JavaScript widget SDK.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::instrument;

use crate::conversion::{Conversion, ConversionEngine, ConversionError};
use crate::engine::{SettlementEngine, SettlementError, SettlementLocal};
use crate::network::{ChainRegistry, Network, TokenSymbol};
use crate::oracle::{HermesOracle, OracleError};
use crate::store::{InMemoryPaymentRequestStore, InMemoryTransactionStore, PaymentRequestStore};
use crate::types::{PaymentRequestId, Transaction, TransactionId, TransactionStatus, UsdAmount};

/// The concrete engine this server runs.
pub type Engine = SettlementLocal<Arc<InMemoryTransactionStore>, Arc<InMemoryPaymentRequestStore>>;

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<Engine>,
    pub conversion: Arc<ConversionEngine<HermesOracle>>,
    pub requests: Arc<InMemoryPaymentRequestStore>,
    pub registry: Arc<ChainRegistry>,
}

/// Error payload returned alongside non-2xx statuses.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

fn error_json(status: StatusCode, message: impl Into<String>) -> axum::response::Response {
    (
        status,
        Json(ErrorResponse {
            error: message.into(),
        }),
    )
        .into_response()
}

fn settlement_error(error: SettlementError) -> axum::response::Response {
    let status = match &error {
        SettlementError::RequestNotFound | SettlementError::NotFound => StatusCode::NOT_FOUND,
        SettlementError::UnsupportedChain(_) | SettlementError::MissingProof => {
            StatusCode::BAD_REQUEST
        }
        SettlementError::AlreadyExpired => StatusCode::CONFLICT,
        SettlementError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    if status.is_server_error() {
        tracing::error!(error = %error, "Settlement operation failed");
        return error_json(status, "Internal Server Error");
    }
    error_json(status, error.to_string())
}

fn conversion_error(error: ConversionError) -> axum::response::Response {
    match &error {
        ConversionError::UnsupportedChain(_) | ConversionError::InvalidAmount(_) => {
            error_json(StatusCode::BAD_REQUEST, error.to_string())
        }
        ConversionError::Oracle(OracleError::UnsupportedToken(_)) => {
            error_json(StatusCode::BAD_REQUEST, error.to_string())
        }
        ConversionError::Oracle(OracleError::Unavailable(_)) => {
            tracing::warn!(error = %error, "Price feed unavailable");
            error_json(StatusCode::BAD_GATEWAY, error.to_string())
        }
    }
}

/// Routes exposed by the settlement engine.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/supported", get(get_supported))
        .route("/prices", get(get_prices))
        .route(
            "/transactions",
            post(post_transaction).get(list_transactions),
        )
        .route("/transactions/latest", get(get_latest_transaction))
        .route("/transactions/{id}", get(get_transaction))
        .route("/transactions/{id}/status", get(get_transaction_status))
        .route("/transactions/{id}/confirm", post(post_confirm))
        .route("/requests/{id}", get(get_payment_request))
}

/// One supported chain with its display metadata.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SupportedChain {
    pub chain_id: Network,
    pub name: &'static str,
    pub pricing_token: TokenSymbol,
    pub display_token: TokenSymbol,
    pub explorer_tx_base: &'static str,
}

/// `GET /supported`: lists the chains this engine settles on.
///
/// Clients use this to render chain pickers without hardcoding their own
/// tables.
#[instrument(skip_all)]
async fn get_supported(State(state): State<AppState>) -> impl IntoResponse {
    let mut chains = Vec::new();
    for network in state.registry.networks() {
        // networks() only returns registered chains.
        if let Some(info) = state.registry.info(network) {
            chains.push(SupportedChain {
                chain_id: network,
                name: network.display_name(),
                pricing_token: info.pricing_token,
                display_token: info.display_token,
                explorer_tx_base: info.explorer_tx_base,
            });
        }
    }
    (StatusCode::OK, Json(chains))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PricesQuery {
    amount: f64,
    #[serde(default)]
    chain_id: Option<Network>,
    #[serde(default)]
    request_id: Option<PaymentRequestId>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SingleConversionResponse {
    usd_amount: f64,
    chain_id: Network,
    #[serde(flatten)]
    conversion: Conversion,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct BulkConversionResponse {
    usd_amount: f64,
    conversions: HashMap<Network, Conversion>,
}

/// `GET /prices`: converts a USD amount to native token amounts.
///
/// With `chainId`, returns the conversion for that single chain. Without it,
/// returns the bulk map for every chain referenced by `requestId` (or all
/// supported chains), omitting chains whose price is currently unavailable.
#[instrument(skip_all)]
async fn get_prices(
    State(state): State<AppState>,
    Query(query): Query<PricesQuery>,
) -> axum::response::Response {
    if let Some(chain_id) = query.chain_id {
        return match state.conversion.convert(query.amount, chain_id).await {
            Ok(conversion) => (
                StatusCode::OK,
                Json(SingleConversionResponse {
                    usd_amount: query.amount,
                    chain_id,
                    conversion,
                }),
            )
                .into_response(),
            Err(error) => conversion_error(error),
        };
    }

    let networks = match query.request_id {
        Some(request_id) => match state.requests.find_by_id(&request_id).await {
            Ok(Some(request)) => request.chain_ids,
            Ok(None) => return error_json(StatusCode::NOT_FOUND, "Payment request not found"),
            Err(error) => {
                tracing::error!(error = %error, "Failed to load payment request");
                return error_json(StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error");
            }
        },
        None => state.registry.networks(),
    };

    match state.conversion.convert_all(query.amount, &networks).await {
        Ok(conversions) => (
            StatusCode::OK,
            Json(BulkConversionResponse {
                usd_amount: query.amount,
                conversions,
            }),
        )
            .into_response(),
        Err(error) => conversion_error(error),
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateTransactionPayload {
    payment_request_id: PaymentRequestId,
    /// Payer identifier: an email or wallet-derived string.
    payer: String,
    amount_usd: UsdAmount,
    #[serde(default)]
    chain_id: Option<Network>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateTransactionResponse {
    transaction_id: TransactionId,
    message: &'static str,
}

/// `POST /transactions`: settlement submission.
///
/// Creates a pending transaction against an active payment request and
/// returns its id for subsequent status polling.
#[instrument(skip_all)]
async fn post_transaction(
    State(state): State<AppState>,
    Json(payload): Json<CreateTransactionPayload>,
) -> axum::response::Response {
    match state
        .engine
        .create(
            &payload.payment_request_id,
            &payload.payer,
            payload.amount_usd,
            payload.chain_id,
        )
        .await
    {
        Ok(tx) => (
            StatusCode::CREATED,
            Json(CreateTransactionResponse {
                transaction_id: tx.id,
                message: "Transaction created",
            }),
        )
            .into_response(),
        Err(error) => settlement_error(error),
    }
}

#[derive(Debug, Serialize)]
struct StatusResponse {
    status: TransactionStatus,
}

/// `GET /transactions/{id}/status`: the status polling endpoint.
///
/// Every poll re-evaluates lazy expiry through the engine, so a caller never
/// observes a pending transaction older than the expiry window. For a known
/// id this always returns a definite status, never an error.
#[instrument(skip_all, fields(transaction = %id))]
async fn get_transaction_status(
    State(state): State<AppState>,
    Path(id): Path<TransactionId>,
) -> axum::response::Response {
    match state.engine.get(&id).await {
        Ok(tx) => (StatusCode::OK, Json(StatusResponse { status: tx.status })).into_response(),
        Err(error) => settlement_error(error),
    }
}

/// `GET /transactions/{id}`: the full transaction record.
#[instrument(skip_all, fields(transaction = %id))]
async fn get_transaction(
    State(state): State<AppState>,
    Path(id): Path<TransactionId>,
) -> axum::response::Response {
    match state.engine.get(&id).await {
        Ok(tx) => (StatusCode::OK, Json(tx)).into_response(),
        Err(error) => settlement_error(error),
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConfirmPayload {
    status: TransactionStatus,
    #[serde(default)]
    tx_hash: Option<String>,
}

/// `POST /transactions/{id}/confirm`: applies client-reported settlement.
///
/// `status: "success"` requires an on-chain hash and confirms the record;
/// `status: "failed"` marks it failed on an explicit external signal. A
/// confirmation that arrives after expiry is rejected with `409`.
#[instrument(skip_all, fields(transaction = %id))]
async fn post_confirm(
    State(state): State<AppState>,
    Path(id): Path<TransactionId>,
    Json(payload): Json<ConfirmPayload>,
) -> axum::response::Response {
    let result = match payload.status {
        TransactionStatus::Success => {
            state.engine.confirm(&id, payload.tx_hash.as_deref()).await
        }
        TransactionStatus::Failed => state.engine.fail(&id).await,
        TransactionStatus::Pending => {
            return error_json(
                StatusCode::BAD_REQUEST,
                "Confirmation status must be success or failed",
            );
        }
    };
    match result {
        Ok(tx) => (StatusCode::OK, Json(tx)).into_response(),
        Err(error) => settlement_error(error),
    }
}

#[derive(Debug, Deserialize)]
struct PayerQuery {
    payer: String,
}

/// `GET /transactions?payer=…`: the payer's settlement history, newest first.
#[instrument(skip_all)]
async fn list_transactions(
    State(state): State<AppState>,
    Query(query): Query<PayerQuery>,
) -> axum::response::Response {
    match state.engine.list_for_payer(&query.payer).await {
        Ok(transactions) => (StatusCode::OK, Json(transactions)).into_response(),
        Err(error) => settlement_error(error),
    }
}

#[derive(Debug, Serialize)]
struct LatestTransactionResponse {
    transaction: Option<Transaction>,
}

/// `GET /transactions/latest?payer=…`: the payer's most recent transaction
/// while it is still inside the expiry window, letting a client resume an
/// in-flight payment instead of creating a duplicate.
#[instrument(skip_all)]
async fn get_latest_transaction(
    State(state): State<AppState>,
    Query(query): Query<PayerQuery>,
) -> axum::response::Response {
    match state.engine.latest_for_payer(&query.payer).await {
        Ok(transaction) => {
            (StatusCode::OK, Json(LatestTransactionResponse { transaction })).into_response()
        }
        Err(error) => settlement_error(error),
    }
}

/// `GET /requests/{id}`: a payment request, as shown on the payer-facing page.
#[instrument(skip_all, fields(request = %id))]
async fn get_payment_request(
    State(state): State<AppState>,
    Path(id): Path<PaymentRequestId>,
) -> axum::response::Response {
    match state.requests.find_by_id(&id).await {
        Ok(Some(request)) => (StatusCode::OK, Json(request)).into_response(),
        Ok(None) => error_json(StatusCode::NOT_FOUND, "Payment request not found"),
        Err(error) => {
            tracing::error!(error = %error, "Failed to load payment request");
            error_json(StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error")
        }
    }
}
