// =============================================================================
// Syncwave Matrix Sliding Sync Proxy - Request Module
// =============================================================================
//
// Project: Syncwave - High Performance Matrix Sliding Sync Proxy
// Author: Syncwave Development Team
// Date: 2026-06-15
// Version: 0.2.0
// License: Apache 2.0
//
// Description:
//   The sync v3 request body.
//
// =============================================================================

use std::collections::BTreeMap;

use ruma::OwnedRoomId;
use serde::{Deserialize, Serialize};

use super::ranges::SliceRanges;
use super::room::RoomSubscription;
use super::sorted_list::SortCriterion;

/// Default long-poll timeout, milliseconds.
pub const DEFAULT_TIMEOUT_MS: u64 = 30_000;

fn default_timeout_ms() -> u64 {
    DEFAULT_TIMEOUT_MS
}

/// A sync v3 request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    /// Opaque position token; present on all but the first request
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pos: Option<String>,

    /// Client-chosen session identifier, half of the connection identity
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,

    /// Long-poll timeout in milliseconds
    #[serde(default = "default_timeout_ms")]
    pub timeout: u64,

    /// Sort criteria, primary first. Empty means `by_recency`.
    #[serde(default)]
    pub sort: Vec<SortCriterion>,

    /// Index ranges the client wants kept up to date
    #[serde(default)]
    pub rooms: SliceRanges,

    /// Rooms to begin (or re-parameterise) explicit subscriptions for
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub room_subscriptions: BTreeMap<OwnedRoomId, RoomSubscription>,

    /// Rooms to drop explicit subscriptions for
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub unsubscribe_rooms: Vec<OwnedRoomId>,
}

impl Default for Request {
    fn default() -> Self {
        Self {
            pos: None,
            session_id: None,
            timeout: DEFAULT_TIMEOUT_MS,
            sort: Vec::new(),
            rooms: SliceRanges::default(),
            room_subscriptions: BTreeMap::new(),
            unsubscribe_rooms: Vec::new(),
        }
    }
}

impl Request {
    /// The effective sort: `by_recency` unless the client said otherwise.
    pub fn effective_sort(&self) -> Vec<SortCriterion> {
        if self.sort.is_empty() {
            vec![SortCriterion::ByRecency]
        } else {
            self.sort.clone()
        }
    }
}
