// =============================================================================
// Syncwave Matrix Sliding Sync Proxy - API Module
// =============================================================================
//
// Project: Syncwave - High Performance Matrix Sliding Sync Proxy
// Author: Syncwave Development Team
// Date: 2026-06-15
// Version: 0.2.0
// License: Apache 2.0
//
// Description:
//   HTTP surface: the sync v3 route and the profiling endpoints.
//
// =============================================================================

pub mod sync_v3;

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::service::SyncService;

/// Build the main sync v3 router.
pub fn router(service: Arc<SyncService>) -> Router {
    Router::new()
        .route("/sync", post(sync_v3::sync_events))
        .route("/healthz", get(sync_v3::health))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(service)
}

/// Build the profiling router served on the optional profiling port.
pub fn profiling_router(service: Arc<SyncService>) -> Router {
    Router::new()
        .route("/metrics", get(sync_v3::metrics))
        .route("/healthz", get(sync_v3::health))
        .with_state(service)
}
