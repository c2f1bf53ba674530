// =============================================================================
// Syncwave Matrix Sliding Sync Proxy - Sync v3 Handlers Module
// =============================================================================
//
// Project: Syncwave - High Performance Matrix Sliding Sync Proxy
// Author: Syncwave Development Team
// Date: 2026-06-15
// Version: 0.2.0
// License: Apache 2.0
//
// Description:
//   Request handlers. Thin by design: auth header extraction and body
//   parsing here, everything else in the service.
//
// =============================================================================

use std::sync::Arc;

use axum::extract::State;
use axum::http::header::AUTHORIZATION;
use axum::http::HeaderMap;
use axum::Json;
use tracing::instrument;

use crate::metrics::MetricsSnapshot;
use crate::service::sync::{Request, Response};
use crate::service::SyncService;
use crate::{Error, Result};

/// # `POST /sync`
///
/// The sliding sync endpoint: returns a windowed, incrementally-diffed view
/// of the user's room list, long-polling when there is nothing to say.
#[instrument(level = "debug", skip_all)]
pub async fn sync_events(
    State(service): State<Arc<SyncService>>,
    headers: HeaderMap,
    body: String,
) -> Result<Json<Response>> {
    let auth = headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .ok_or_else(|| Error::UpstreamAuth("missing Authorization header".to_owned()))?
        .to_owned();

    // parse by hand so malformed bodies surface the offending field in our
    // own error shape
    let request: Request = serde_json::from_str(&body)
        .map_err(|e| Error::bad_request(format!("invalid request body: {e}")))?;

    let response = service.handle_request(&auth, request).await?;
    Ok(Json(response))
}

/// # `GET /healthz`
pub async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({"status": "ok"}))
}

/// # `GET /metrics` (profiling port)
pub async fn metrics(State(service): State<Arc<SyncService>>) -> Json<MetricsSnapshot> {
    Json(service.metrics.snapshot())
}
