// =============================================================================
// Syncwave Matrix Sliding Sync Proxy - Response Module
// =============================================================================
//
// Project: Syncwave - High Performance Matrix Sliding Sync Proxy
// Author: Syncwave Development Team
// Date: 2026-06-15
// Version: 0.2.0
// License: Apache 2.0
//
// Description:
//   The sync v3 response body and the list operations that transform a
//   client's view of its window.
//
// =============================================================================

use std::collections::BTreeMap;

use ruma::OwnedRoomId;
use serde::{Deserialize, Serialize};

use super::room::Room;

/// A primitive transformation of the client's view of the window.
///
/// Within one response, ops appear in event consumption order and a `DELETE`
/// strictly precedes its paired `INSERT`/`UPDATE`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op")]
pub enum ResponseOp {
    /// Replace the client's view of an interval wholesale. `range` echoes
    /// the requested interval; `rooms` holds only the positions that exist.
    #[serde(rename = "SYNC")]
    Sync { range: [u64; 2], rooms: Vec<Room> },

    /// A room entered the window at `index`, full payload attached
    #[serde(rename = "INSERT")]
    Insert { index: u64, room: Room },

    /// The room at `index` left the window
    #[serde(rename = "DELETE")]
    Delete { index: u64 },

    /// The room at `index` changed without moving, partial payload attached
    #[serde(rename = "UPDATE")]
    Update { index: u64, room: Room },
}

/// A sync v3 response.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Response {
    /// Opaque position token to echo on the next request
    #[serde(default)]
    pub pos: String,

    /// Total number of rooms in the sorted list after all events applied
    pub count: u64,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ops: Vec<ResponseOp>,

    /// Initial data and deltas for explicitly subscribed rooms
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub room_subscriptions: BTreeMap<OwnedRoomId, Room>,
}

impl Response {
    /// An empty response blocks in the long-poll wait; anything else is
    /// returned to the client immediately.
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty() && self.room_subscriptions.is_empty()
    }
}
