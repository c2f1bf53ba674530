// =============================================================================
// Syncwave Matrix Sliding Sync Proxy - Library Crate
// =============================================================================
//
// Project: Syncwave - High Performance Matrix Sliding Sync Proxy
// Author: Syncwave Development Team
// Date: 2026-06-15
// Version: 0.2.0
// License: Apache 2.0
//
// Description:
//   Core library for the Syncwave proxy: the sync v3 engine, the upstream
//   sync v2 poller and the HTTP surface tying them together.
//
// =============================================================================

pub mod api;
pub mod config;
pub mod metrics;
pub mod service;
pub mod storage;
pub mod utils;

// Re-export common types
pub use ruma;
pub use tokio;
pub use tracing;

pub use config::Config;
pub use service::SyncService;
pub use utils::error::{Error, Result};
