use std::{str::FromStr, sync::Arc};

use alloy::primitives::Address;
use anyhow::{Context, Result};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio_util::sync::CancellationToken;

use crate::{
    history::HistoryEngine,
    models::{FetchProgress, PriceObservation},
};

pub struct AppState {
    pub engine: Arc<HistoryEngine>,
}

#[derive(Debug, Serialize)]
pub struct HistoryResponse {
    pub pool: Address,
    pub observations: Arc<Vec<PriceObservation>>,
}

#[derive(Debug, Deserialize)]
pub struct HistoryRequest {
    pub pool: String,
    pub from_block: Option<u64>,
    pub to_block: Option<u64>,
}

type Reply = (StatusCode, Json<serde_json::Value>);

fn parse_pool(raw: &str) -> Result<Address, StatusCode> {
    Address::from_str(raw.trim()).map_err(|_| {
        warn!("Rejected malformed pool address {:?}", raw);
        StatusCode::BAD_REQUEST
    })
}

fn reply(status: StatusCode, body: serde_json::Value) -> Reply {
    (status, Json(body))
}

/// GET /health
async fn health() -> &'static str {
    "OK"
}

/// GET /history/:pool
async fn get_history(
    Path(pool): Path<String>,
    State(state): State<Arc<AppState>>,
) -> Result<Json<HistoryResponse>, StatusCode> {
    let pool = parse_pool(&pool)?;
    let observations = state.engine.store().read(&pool).ok_or(StatusCode::NOT_FOUND)?;
    Ok(Json(HistoryResponse { pool, observations }))
}

/// GET /progress/:pool - `idle` when nothing was ever requested
async fn get_progress(
    Path(pool): Path<String>,
    State(state): State<Arc<AppState>>,
) -> Result<Json<FetchProgress>, StatusCode> {
    let pool = parse_pool(&pool)?;
    Ok(Json(state.engine.progress(&pool).unwrap_or_default()))
}

/// POST /history - start a full load in the background
async fn request_history(
    State(state): State<Arc<AppState>>,
    Json(request): Json<HistoryRequest>,
) -> Reply {
    let pool = match parse_pool(&request.pool) {
        Ok(pool) => pool,
        Err(status) => return reply(status, json!({ "error": "invalid pool address" })),
    };

    let range = match (request.from_block, request.to_block) {
        (None, None) => None,
        (Some(from), to) if from <= to.unwrap_or(u64::MAX) => Some((from, to.unwrap_or(u64::MAX))),
        _ => {
            return reply(
                StatusCode::BAD_REQUEST,
                json!({ "error": "from_block must be given and not exceed to_block" }),
            )
        },
    };

    if state.engine.is_fetching(&pool) {
        return reply(
            StatusCode::CONFLICT,
            json!({ "pool": pool, "error": "fetch already in progress" }),
        );
    }

    let engine = Arc::clone(&state.engine);
    tokio::spawn(async move {
        match engine.load_history(pool, range).await {
            Ok(count) => info!("Pool {}: history ready with {} observations", pool, count),
            Err(e) => error!("Pool {}: requested load failed: {}", pool, e),
        }
    });

    reply(StatusCode::ACCEPTED, json!({ "pool": pool, "status": "accepted" }))
}

/// POST /history/:pool/more - extend an existing series backward
async fn request_more(
    Path(pool): Path<String>,
    State(state): State<Arc<AppState>>,
) -> Reply {
    let pool = match parse_pool(&pool) {
        Ok(pool) => pool,
        Err(status) => return reply(status, json!({ "error": "invalid pool address" })),
    };

    if !state.engine.store().contains(&pool) {
        return reply(
            StatusCode::NOT_FOUND,
            json!({ "pool": pool, "error": "no history loaded" }),
        );
    }
    if state.engine.is_fetching(&pool) {
        return reply(
            StatusCode::CONFLICT,
            json!({ "pool": pool, "error": "fetch already in progress" }),
        );
    }

    let engine = Arc::clone(&state.engine);
    tokio::spawn(async move {
        match engine.load_more(pool).await {
            Ok(count) => info!("Pool {}: prepended {} observations", pool, count),
            Err(e) => error!("Pool {}: load more failed: {}", pool, e),
        }
    });

    reply(StatusCode::ACCEPTED, json!({ "pool": pool, "status": "accepted" }))
}

/// GET /stable
async fn get_stable(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(json!({
        "selection": state.engine.selector().current(),
        "candidates": state.engine.stable_candidates(),
    }))
}

pub fn create_rest_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/history", post(request_history))
        .route("/history/:pool", get(get_history))
        .route("/history/:pool/more", post(request_more))
        .route("/progress/:pool", get(get_progress))
        .route("/stable", get(get_stable))
        .with_state(state)
}

/// Serve the router on `bind` until `cancellation_token` fires.
pub async fn serve(
    bind: &str,
    state: Arc<AppState>,
    cancellation_token: CancellationToken,
) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(bind)
        .await
        .with_context(|| format!("Failed to bind API listener on {}", bind))?;
    info!("API listening on {}", bind);

    axum::serve(listener, create_rest_router(state))
        .with_graceful_shutdown(async move { cancellation_token.cancelled().await })
        .await
        .context("API server failed")
}
