//! HTTP handlers for the tracking API.

use crate::caching::CacheClient;
use crate::core::error::TrackingResult;
use crate::lookup::{ShipmentCode, ShipmentRecord, TrackingLookup};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{info, instrument};

/// Shared handler state
#[derive(Clone)]
pub struct AppState {
    pub lookup: Arc<TrackingLookup>,
    pub cache: Arc<CacheClient>,
}

/// Adapter-level answer for one code
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrackingReply {
    pub found: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub record: Option<ShipmentRecord>,
}

/// Normalize `raw_code` and look it up
pub async fn track(lookup: &TrackingLookup, raw_code: &str) -> TrackingResult<TrackingReply> {
    let code = ShipmentCode::parse(raw_code)?;
    let outcome = lookup.lookup(&code).await?;
    info!(code = %code, path = ?outcome.path, found = outcome.found(), "Tracking lookup finished");

    Ok(TrackingReply {
        found: outcome.found(),
        record: outcome.record,
    })
}

#[derive(Debug, Deserialize)]
pub struct TrackingQuery {
    pub code: Option<String>,
}

/// `GET /api/v1/bol/tracking?code=`
#[instrument(skip(state))]
pub async fn tracking_handler(
    State(state): State<AppState>,
    Query(query): Query<TrackingQuery>,
) -> TrackingResult<Json<Value>> {
    let reply = track(&state.lookup, query.code.as_deref().unwrap_or_default()).await?;
    let message = if reply.found {
        "Get tracking detail successfully"
    } else {
        "No tracking detail found for this code"
    };

    Ok(Json(json!({
        "data": reply.record,
        "status": StatusCode::OK.as_u16(),
        "message": message,
    })))
}

/// `DELETE /api/v1/bol/tracking/cache/:code`
#[instrument(skip(state))]
pub async fn invalidate_handler(
    State(state): State<AppState>,
    Path(code): Path<String>,
) -> TrackingResult<Json<Value>> {
    let code = ShipmentCode::parse(&code)?;
    let removed = state.lookup.invalidate(&code).await;

    Ok(Json(json!({
        "data": { "code": code.as_str(), "removed": removed },
        "status": StatusCode::OK.as_u16(),
        "message": "Tracking cache invalidated",
    })))
}

/// `GET /api/v1/cache/stats`
pub async fn cache_stats_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "data": state.cache.stats(),
        "status": StatusCode::OK.as_u16(),
        "message": "Cache statistics",
    }))
}

/// `GET /health`
///
/// Always 200; a down cache only degrades lookups.
pub async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let cache_up = state.cache.ping().await;

    (
        StatusCode::OK,
        Json(json!({
            "status": if cache_up { "healthy" } else { "degraded" },
            "cache": if cache_up { "up" } else { "down" },
            "timestamp": chrono::Utc::now().to_rfc3339(),
            "version": env!("CARGO_PKG_VERSION"),
        })),
    )
}
