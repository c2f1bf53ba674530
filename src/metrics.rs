// =============================================================================
// Syncwave Matrix Sliding Sync Proxy - Metrics Module
// =============================================================================
//
// Project: Syncwave - High Performance Matrix Sliding Sync Proxy
// Author: Syncwave Development Team
// Date: 2026-06-15
// Version: 0.2.0
// License: Apache 2.0
//
// Description:
//   Lightweight atomic counters exposed on the profiling port.
//
// =============================================================================

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Performance counters for the whole proxy
#[derive(Debug, Default)]
pub struct SyncMetrics {
    /// Connections created since start-up
    pub total_connections: AtomicU64,

    /// Connections currently registered
    pub active_connections: AtomicU64,

    /// Sync v3 requests handled
    pub total_requests: AtomicU64,

    /// Events fanned out to connection queues
    pub events_dispatched: AtomicU64,

    /// Connections invalidated by fan-in overflow
    pub queue_overflows: AtomicU64,

    /// Upstream sync v2 polls completed
    pub upstream_polls: AtomicU64,
}

/// Point-in-time copy of the counters, serialised on the profiling endpoint
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub total_connections: u64,
    pub active_connections: u64,
    pub total_requests: u64,
    pub events_dispatched: u64,
    pub queue_overflows: u64,
    pub upstream_polls: u64,
}

impl SyncMetrics {
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            total_connections: self.total_connections.load(Ordering::Relaxed),
            active_connections: self.active_connections.load(Ordering::Relaxed),
            total_requests: self.total_requests.load(Ordering::Relaxed),
            events_dispatched: self.events_dispatched.load(Ordering::Relaxed),
            queue_overflows: self.queue_overflows.load(Ordering::Relaxed),
            upstream_polls: self.upstream_polls.load(Ordering::Relaxed),
        }
    }

    pub fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_reflects_counters() {
        let metrics = SyncMetrics::default();
        SyncMetrics::incr(&metrics.total_requests);
        SyncMetrics::incr(&metrics.total_requests);
        SyncMetrics::incr(&metrics.queue_overflows);

        let snap = metrics.snapshot();
        assert_eq!(snap.total_requests, 2);
        assert_eq!(snap.queue_overflows, 1);
        assert_eq!(snap.total_connections, 0);
    }
}
