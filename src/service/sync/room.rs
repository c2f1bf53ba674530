// =============================================================================
// Syncwave Matrix Sliding Sync Proxy - Room Types Module
// =============================================================================
//
// Project: Syncwave - High Performance Matrix Sliding Sync Proxy
// Author: Syncwave Development Team
// Date: 2026-06-15
// Version: 0.2.0
// License: Apache 2.0
//
// Description:
//   Sortable room snapshots, wire-level room payloads and per-room
//   subscription parameters.
//
// =============================================================================

use ruma::OwnedRoomId;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A room reduced to the fields needed to sort and summarise it.
///
/// Snapshots are value-like: an update produces a new snapshot, nothing
/// aliases the copy held inside a connection's sorted list.
#[derive(Debug, Clone, PartialEq)]
pub struct SortableRoom {
    pub room_id: OwnedRoomId,

    /// Display name, derived from the room's `m.room.name` state event
    pub name: String,

    /// Milliseconds since epoch of the latest timeline event. The upstream
    /// does not guarantee monotonicity within a room; the engine never
    /// assumes it.
    pub last_message_timestamp: u64,

    /// Opaque serialised form of the latest timeline event
    pub last_event: Option<Value>,

    pub highlight_count: u64,
    pub notification_count: u64,
}

impl SortableRoom {
    pub fn new(room_id: OwnedRoomId) -> Self {
        Self {
            room_id,
            name: String::new(),
            last_message_timestamp: 0,
            last_event: None,
            highlight_count: 0,
            notification_count: 0,
        }
    }
}

/// Wire-level room payload.
///
/// Full payloads (after `SYNC` and `INSERT`) carry every known field.
/// Partial payloads (after `UPDATE`, or a subscription delta) carry only
/// what changed; clients merge them field-by-field onto the entry they
/// already hold, which is why every field except `room_id` is omissible.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Room {
    pub room_id: OwnedRoomId,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub timeline: Vec<Value>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub required_state: Option<Vec<Value>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub highlight_count: Option<u64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub notification_count: Option<u64>,
}

impl Room {
    /// A partial payload carrying nothing but the room id.
    pub fn partial(room_id: OwnedRoomId) -> Self {
        Self {
            room_id,
            name: None,
            timeline: Vec::new(),
            required_state: None,
            highlight_count: None,
            notification_count: None,
        }
    }
}

fn default_timeline_limit() -> u64 {
    20
}

/// Parameters of an explicit single-room subscription.
///
/// Subscriptions are independent of the sorted window: a subscribed room's
/// updates are delivered even when the room lies outside every tracked range.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoomSubscription {
    #[serde(default = "default_timeline_limit")]
    pub timeline_limit: u64,

    /// `(event_type, state_key)` pairs to include on the initial emission
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub required_state: Vec<(String, String)>,
}

impl Default for RoomSubscription {
    fn default() -> Self {
        Self {
            timeline_limit: default_timeline_limit(),
            required_state: Vec::new(),
        }
    }
}

/// Per-user, per-room data served by the store for subscription initialisation.
#[derive(Debug, Clone, Default)]
pub struct UserRoomData {
    pub notification_count: u64,
    pub highlight_count: u64,

    /// Timeline tail, oldest first
    pub timeline: Vec<Value>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_partial_room_serialises_sparse() {
        let room_id = OwnedRoomId::try_from("!a:localhost").unwrap();
        let mut room = Room::partial(room_id);
        room.timeline.push(json!({"type": "m.room.message"}));

        let value = serde_json::to_value(&room).unwrap();
        assert_eq!(
            value,
            json!({
                "room_id": "!a:localhost",
                "timeline": [{"type": "m.room.message"}],
            })
        );
    }

    #[test]
    fn test_subscription_defaults() {
        let sub: RoomSubscription = serde_json::from_value(json!({})).unwrap();
        assert_eq!(sub.timeline_limit, 20);
        assert!(sub.required_state.is_empty());

        let sub: RoomSubscription = serde_json::from_value(json!({
            "timeline_limit": 5,
            "required_state": [["m.room.topic", ""]],
        }))
        .unwrap();
        assert_eq!(sub.timeline_limit, 5);
        assert_eq!(sub.required_state[0].0, "m.room.topic");
    }
}
