//! # REST + WebSocket API
//!
//! Builds the axum router that exposes the vault node's HTTP interface.
//! All endpoints share application state through axum's `State` extractor.
//!
//! ## Endpoints
//!
//! | Method | Path                      | Description                          |
//! |--------|---------------------------|--------------------------------------|
//! | GET    | `/health`                 | Liveness probe                       |
//! | GET    | `/status`                 | Vault status summary                 |
//! | GET    | `/issuer`                 | Issuer address                       |
//! | GET    | `/paid-out/:beneficiary`  | Cumulative payout of a beneficiary   |
//! | GET    | `/total-paid-out`         | Sum of all payouts                   |
//! | GET    | `/accounts/:address`      | External account balance             |
//! | GET    | `/nonces/:address`        | Next call nonce for an account       |
//! | POST   | `/calls`                  | Submit a signed call                 |
//! | GET    | `/ws`                     | WebSocket stream of vault events     |
//!
//! ## Call outcomes
//!
//! | Status | Meaning                                          |
//! |--------|--------------------------------------------------|
//! | 200    | accepted; body carries the [`VaultEvent`]         |
//! | 400    | envelope could not be encoded                    |
//! | 401    | envelope signature does not match the caller     |
//! | 409    | nonce is not the caller's next nonce             |
//! | 422    | vault rejected the call (nonce consumed)         |
//! | 500    | storage failure (nothing changed)                |

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, State,
    },
    http::{Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::broadcast;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use chequebook_contracts::{Amount, VaultEvent};
use chequebook_protocol::identity::{AccountId, VaultId};

use crate::auth::{AuthError, CallEnvelope};
use crate::metrics::SharedMetrics;
use crate::service::{CallError, VaultService, VaultStatus};

// ---------------------------------------------------------------------------
// Application State
// ---------------------------------------------------------------------------

/// Shared application state available to all request handlers.
///
/// Cheap to clone; everything is behind `Arc`.
#[derive(Clone)]
pub struct AppState {
    /// The node's reported version string.
    pub version: String,
    /// The vault, its account book and nonces.
    pub service: Arc<VaultService>,
    /// Broadcast channel for accepted-call events.
    pub event_tx: broadcast::Sender<VaultEvent>,
    /// Prometheus metrics for in-handler recording.
    pub metrics: SharedMetrics,
}

// ---------------------------------------------------------------------------
// Router Construction
// ---------------------------------------------------------------------------

/// Builds the full axum [`Router`] with all API routes, CORS, and tracing.
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_handler))
        .route("/status", get(status_handler))
        .route("/issuer", get(issuer_handler))
        .route("/paid-out/:beneficiary", get(paid_out_handler))
        .route("/total-paid-out", get(total_paid_out_handler))
        .route("/accounts/:address", get(account_handler))
        .route("/nonces/:address", get(nonce_handler))
        .route("/calls", post(call_handler))
        .route("/ws", get(ws_handler))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Response Types
// ---------------------------------------------------------------------------

/// Response payload for `GET /status`.
#[derive(Debug, Serialize, Deserialize)]
pub struct StatusResponse {
    pub version: String,
    #[serde(flatten)]
    pub vault: VaultStatus,
    /// RFC 3339 timestamp of the response.
    pub timestamp: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct IssuerResponse {
    pub vault_id: VaultId,
    pub issuer: AccountId,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PaidOutResponse {
    pub beneficiary: AccountId,
    pub paid_out: Amount,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TotalPaidOutResponse {
    pub total_paid_out: Amount,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AccountResponse {
    pub address: AccountId,
    pub balance: Amount,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct NonceResponse {
    pub address: AccountId,
    pub next_nonce: u64,
}

/// Body of a successful `POST /calls`.
#[derive(Debug, Serialize, Deserialize)]
pub struct CallReceipt {
    pub caller: AccountId,
    pub nonce: u64,
    pub event: VaultEvent,
}

/// Error body returned by REST endpoints on failure.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
}

fn error_response(status: StatusCode, error: String, kind: Option<&str>) -> Response {
    let body = ErrorResponse {
        error,
        kind: kind.map(str::to_string),
    };
    (status, Json(body)).into_response()
}

/// Parse a path segment as an account address, or produce a 400.
fn parse_account(raw: &str) -> Result<AccountId, Response> {
    AccountId::from_str(raw).map_err(|e| {
        error_response(
            StatusCode::BAD_REQUEST,
            format!("invalid address '{raw}': {e}"),
            None,
        )
    })
}

fn call_status(err: &CallError) -> StatusCode {
    match err {
        CallError::Auth(AuthError::BadSignature) => StatusCode::UNAUTHORIZED,
        CallError::Auth(AuthError::BadNonce { .. }) => StatusCode::CONFLICT,
        CallError::Auth(AuthError::Encoding(_)) => StatusCode::BAD_REQUEST,
        CallError::Vault(_) => StatusCode::UNPROCESSABLE_ENTITY,
        CallError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// `GET /health`: 200 while the process is up.
async fn health_handler() -> impl IntoResponse {
    (StatusCode::OK, Json(serde_json::json!({ "status": "ok" })))
}

async fn status_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(StatusResponse {
        version: state.version.clone(),
        vault: state.service.status(),
        timestamp: chrono::Utc::now().to_rfc3339(),
    })
}

async fn issuer_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(IssuerResponse {
        vault_id: *state.service.vault_id(),
        issuer: state.service.issuer(),
    })
}

/// `GET /paid-out/:beneficiary`: 0 for a beneficiary who never cashed.
async fn paid_out_handler(
    Path(beneficiary): Path<String>,
    State(state): State<AppState>,
) -> Response {
    match parse_account(&beneficiary) {
        Ok(beneficiary) => Json(PaidOutResponse {
            beneficiary,
            paid_out: state.service.paid_out(&beneficiary),
        })
        .into_response(),
        Err(resp) => resp,
    }
}

async fn total_paid_out_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(TotalPaidOutResponse {
        total_paid_out: state.service.total_paid_out(),
    })
}

async fn account_handler(Path(address): Path<String>, State(state): State<AppState>) -> Response {
    match parse_account(&address) {
        Ok(address) => Json(AccountResponse {
            address,
            balance: state.service.account_balance(&address),
        })
        .into_response(),
        Err(resp) => resp,
    }
}

async fn nonce_handler(Path(address): Path<String>, State(state): State<AppState>) -> Response {
    match parse_account(&address) {
        Ok(address) => Json(NonceResponse {
            address,
            next_nonce: state.service.next_nonce(&address),
        })
        .into_response(),
        Err(resp) => resp,
    }
}

/// `POST /calls`: authenticate and run one vault operation.
async fn call_handler(
    State(state): State<AppState>,
    Json(envelope): Json<CallEnvelope>,
) -> Response {
    let (caller, nonce) = (envelope.caller, envelope.nonce);
    let service = Arc::clone(&state.service);

    // Submitting flushes sled to disk; keep that off the async workers.
    let timer = state.metrics.call_latency_seconds.start_timer();
    let joined = tokio::task::spawn_blocking(move || service.submit(&envelope)).await;
    timer.observe_duration();

    let result = match joined {
        Ok(result) => result,
        Err(e) => {
            tracing::error!(error = %e, %caller, nonce, "call task failed");
            state.metrics.observe_rejection("internal");
            return error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "call task failed".to_string(),
                Some("internal"),
            );
        }
    };

    match result {
        Ok(event) => {
            state.metrics.observe_event(&event);
            // No subscribers is not an error.
            let _ = state.event_tx.send(event.clone());
            (
                StatusCode::OK,
                Json(CallReceipt {
                    caller,
                    nonce,
                    event,
                }),
            )
                .into_response()
        }
        Err(err) => {
            state.metrics.observe_rejection(err.kind());
            error_response(call_status(&err), err.to_string(), Some(err.kind()))
        }
    }
}

/// `GET /ws`: push-only stream of JSON-encoded [`VaultEvent`]s.
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_ws_connection(socket, state))
}

/// Forwards broadcast events until the client disconnects or the channel
/// closes.
async fn handle_ws_connection(mut socket: WebSocket, state: AppState) {
    let mut rx = state.event_tx.subscribe();
    loop {
        tokio::select! {
            event = rx.recv() => {
                match event {
                    Ok(ev) => {
                        let payload = match serde_json::to_string(&ev) {
                            Ok(s) => s,
                            Err(e) => {
                                tracing::warn!("failed to serialize ws event: {}", e);
                                continue;
                            }
                        };
                        if socket.send(Message::Text(payload)).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!("ws subscriber lagged by {} events", n);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            msg = socket.recv() => {
                match msg {
                    // Client messages are ignored.
                    Some(Ok(_)) => {}
                    _ => break,
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
