// =============================================================================
// Syncwave Matrix Sliding Sync Proxy - Upstream Module
// =============================================================================
//
// Project: Syncwave - High Performance Matrix Sliding Sync Proxy
// Author: Syncwave Development Team
// Date: 2026-06-15
// Version: 0.2.0
// License: Apache 2.0
//
// Description:
//   The legacy sync v2 side of the proxy: wire types, the long-poll client
//   and the per-device poller feeding the shared cache and fan-out.
//
// =============================================================================

pub mod client;
pub mod poller;

use std::collections::HashMap;

use ruma::OwnedRoomId;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub use client::{HttpClient, SyncV2Client};
pub use poller::Poller;

/// One sync v2 long-poll response.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct SyncV2Response {
    #[serde(default)]
    pub next_batch: String,

    #[serde(default)]
    pub rooms: SyncV2Rooms,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct SyncV2Rooms {
    #[serde(default)]
    pub join: HashMap<OwnedRoomId, SyncV2JoinedRoom>,

    #[serde(default)]
    pub invite: HashMap<OwnedRoomId, SyncV2InvitedRoom>,

    #[serde(default)]
    pub leave: HashMap<OwnedRoomId, SyncV2LeftRoom>,
}

/// A room under the `join` key.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct SyncV2JoinedRoom {
    #[serde(default)]
    pub state: SyncV2EventList,

    #[serde(default)]
    pub timeline: SyncV2Timeline,

    #[serde(default)]
    pub unread_notifications: SyncV2UnreadNotifications,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct SyncV2InvitedRoom {
    #[serde(default)]
    pub invite_state: SyncV2EventList,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct SyncV2LeftRoom {
    #[serde(default)]
    pub state: SyncV2EventList,

    #[serde(default)]
    pub timeline: SyncV2Timeline,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct SyncV2EventList {
    #[serde(default)]
    pub events: Vec<Value>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct SyncV2Timeline {
    #[serde(default)]
    pub events: Vec<Value>,

    #[serde(default)]
    pub limited: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prev_batch: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct SyncV2UnreadNotifications {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub highlight_count: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notification_count: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_sync_v2_response_parses_sparse_payload() {
        let resp: SyncV2Response = serde_json::from_value(json!({
            "next_batch": "s_42",
            "rooms": {
                "join": {
                    "!a:localhost": {
                        "timeline": {
                            "events": [{"type": "m.room.message"}],
                            "limited": true,
                        },
                        "unread_notifications": {"notification_count": 2},
                    }
                }
            }
        }))
        .unwrap();

        assert_eq!(resp.next_batch, "s_42");
        let room = &resp.rooms.join[&OwnedRoomId::try_from("!a:localhost").unwrap()];
        assert_eq!(room.timeline.events.len(), 1);
        assert!(room.timeline.limited);
        assert_eq!(room.unread_notifications.notification_count, Some(2));
        assert!(resp.rooms.leave.is_empty());
    }

    #[test]
    fn test_empty_response_parses() {
        let resp: SyncV2Response = serde_json::from_value(json!({})).unwrap();
        assert!(resp.next_batch.is_empty());
        assert!(resp.rooms.join.is_empty());
    }
}
