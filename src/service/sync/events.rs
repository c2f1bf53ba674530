// =============================================================================
// Syncwave Matrix Sliding Sync Proxy - Event Fan-In Module
// =============================================================================
//
// Project: Syncwave - High Performance Matrix Sliding Sync Proxy
// Author: Syncwave Development Team
// Date: 2026-06-15
// Version: 0.2.0
// License: Apache 2.0
//
// Description:
//   Event notifications flowing from the upstream poller into connections,
//   and the bounded per-connection queue that carries them. Overflow marks
//   the connection invalidated so a slow client can never back-pressure the
//   shared poller.
//
// =============================================================================

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use ruma::OwnedRoomId;
use ruma::events::TimelineEventType;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::warn;

/// Per-connection fan-in buffer capacity.
pub const FAN_IN_CAPACITY: usize = 512;

/// A single event notification.
///
/// Produced by the upstream poller, cloned into the queue of every
/// interested connection, consumed at most once by each.
#[derive(Debug, Clone)]
pub struct EventData {
    pub room_id: OwnedRoomId,
    pub event_type: TimelineEventType,
    pub state_key: Option<String>,

    /// Typed content used for indexing decisions (name changes, membership)
    pub content: Value,

    /// Opaque serialised event, carried through unchanged to the client
    pub event: Value,

    /// `origin_server_ts`, milliseconds
    pub timestamp: u64,

    /// Global stream watermark at which this event was observed. Zero means
    /// "unpositioned" and is never filtered.
    pub latest_pos: u64,
}

/// Producer half of a connection's fan-in queue.
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: mpsc::Sender<EventData>,
    invalidated: Arc<AtomicBool>,
}

impl EventSink {
    /// Enqueue without blocking. A full buffer invalidates the connection;
    /// its next request tells the client to reconnect and reload.
    pub fn push(&self, event: EventData) {
        if self.invalidated.load(Ordering::Relaxed) {
            return;
        }
        match self.tx.try_send(event) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(event)) => {
                warn!(room_id = %event.room_id, "🚰 fan-in queue overflowed, invalidating connection");
                self.invalidated.store(true, Ordering::Relaxed);
            }
            // receiver dropped: connection already torn down
            Err(mpsc::error::TrySendError::Closed(_)) => {}
        }
    }

    pub fn is_invalidated(&self) -> bool {
        self.invalidated.load(Ordering::Relaxed)
    }
}

/// Consumer half of a connection's fan-in queue, drained only by the
/// currently-active request handler.
#[derive(Debug)]
pub struct EventQueue {
    rx: mpsc::Receiver<EventData>,
    invalidated: Arc<AtomicBool>,
}

impl EventQueue {
    /// Pop without waiting.
    pub fn try_next(&mut self) -> Option<EventData> {
        self.rx.try_recv().ok()
    }

    /// Wait for the next event.
    pub async fn recv(&mut self) -> Option<EventData> {
        self.rx.recv().await
    }

    pub fn is_invalidated(&self) -> bool {
        self.invalidated.load(Ordering::Relaxed)
    }
}

/// Build a connected sink/queue pair with the given capacity.
pub fn event_queue(capacity: usize) -> (EventSink, EventQueue) {
    let (tx, rx) = mpsc::channel(capacity);
    let invalidated = Arc::new(AtomicBool::new(false));
    (
        EventSink { tx, invalidated: invalidated.clone() },
        EventQueue { rx, invalidated },
    )
}
