// =============================================================================
// Syncwave Matrix Sliding Sync Proxy - Storage Module
// =============================================================================
//
// Project: Syncwave - High Performance Matrix Sliding Sync Proxy
// Author: Syncwave Development Team
// Date: 2026-06-15
// Version: 0.2.0
// License: Apache 2.0
//
// Description:
//   The store contract consumed by the connection engine, and the in-process
//   shared cache that implements it. The cache is read-mostly: readers copy
//   summaries out under a read lock, the upstream poller writes single-room
//   updates under a write lock.
//
// =============================================================================

pub mod tracker;

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use ruma::{OwnedRoomId, OwnedUserId, RoomId, UserId};
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::debug;

use crate::service::sync::events::EventData;
use crate::service::sync::room::{SortableRoom, UserRoomData};
use crate::{Error, Result};

use self::tracker::JoinedRoomsTracker;

/// How many trailing timeline events are retained per room for subscription
/// initialisation.
const TIMELINE_TAIL: usize = 50;

/// Store operations the connection engine needs. Implemented by the
/// in-process [`SharedCache`]; a persistence layer slots in behind the same
/// contract.
#[async_trait]
pub trait ConnStateStore: Send + Sync {
    /// The user's joined rooms and the stream watermark identifying how
    /// caught-up a freshly-loaded connection is.
    async fn load(&self, user_id: &UserId) -> Result<(Vec<OwnedRoomId>, u64)>;

    /// Copy out a room's sortable summary.
    async fn load_room(&self, room_id: &RoomId) -> Result<SortableRoom>;

    /// State events matching the requested `(event_type, state_key)` pairs.
    async fn load_state(
        &self,
        room_id: &RoomId,
        load_position: u64,
        required_state: &[(String, String)],
    ) -> Vec<Value>;

    /// Notification counters and timeline tail for one user in one room.
    async fn load_user_room_data(&self, room_id: &RoomId, user_id: &UserId) -> UserRoomData;
}

#[derive(Debug, Default, Clone)]
struct CachedRoom {
    summary: Option<SortableRoom>,
    /// `(event_type, state_key) → raw event`
    state: HashMap<(String, String), Value>,
    /// Trailing timeline events, oldest first
    timeline: VecDeque<Value>,
    /// Per-user unread counters
    unread: HashMap<OwnedUserId, (u64, u64)>,
}

/// Shared room store fed by the upstream poller.
#[derive(Debug, Default)]
pub struct SharedCache {
    rooms: RwLock<HashMap<OwnedRoomId, CachedRoom>>,
    tracker: JoinedRoomsTracker,
    latest_pos: AtomicU64,
}

impl SharedCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tracker(&self) -> &JoinedRoomsTracker {
        &self.tracker
    }

    pub fn latest_pos(&self) -> u64 {
        self.latest_pos.load(Ordering::SeqCst)
    }

    /// Record a state event: updates the room's derived fields and the
    /// `(type, state_key)` index serving `required_state` lookups.
    pub async fn apply_state_event(&self, room_id: &RoomId, event: &Value) {
        let event_type = event_type_of(event);
        let state_key = event["state_key"].as_str().unwrap_or_default().to_owned();

        let mut rooms = self.rooms.write().await;
        let cached = rooms.entry(room_id.to_owned()).or_default();
        let summary = cached
            .summary
            .get_or_insert_with(|| SortableRoom::new(room_id.to_owned()));
        if event_type == "m.room.name" {
            if let Some(name) = event["content"]["name"].as_str() {
                summary.name = name.to_owned();
            }
        }
        cached.state.insert((event_type, state_key), event.clone());
    }

    /// Record a timeline event: bumps the room's summary, appends to the
    /// retained tail and assigns the next global stream position.
    ///
    /// Returns the notification the fan-out should dispatch.
    pub async fn apply_timeline_event(&self, room_id: &RoomId, event: Value) -> EventData {
        let event_type = event_type_of(&event);
        let state_key = event["state_key"].as_str().map(str::to_owned);
        let timestamp = event["origin_server_ts"].as_u64().unwrap_or_default();

        // state events can ride in the timeline section too
        if state_key.is_some() {
            self.apply_state_event(room_id, &event).await;
        }

        let pos = self.latest_pos.fetch_add(1, Ordering::SeqCst) + 1;

        let mut rooms = self.rooms.write().await;
        let cached = rooms.entry(room_id.to_owned()).or_default();
        let summary = cached
            .summary
            .get_or_insert_with(|| SortableRoom::new(room_id.to_owned()));
        summary.last_message_timestamp = timestamp;
        summary.last_event = Some(event.clone());
        cached.timeline.push_back(event.clone());
        while cached.timeline.len() > TIMELINE_TAIL {
            cached.timeline.pop_front();
        }
        debug!(room_id = %room_id, pos, "🗄️ cached timeline event");

        EventData {
            room_id: room_id.to_owned(),
            event_type: event_type.as_str().into(),
            state_key,
            content: event["content"].clone(),
            event,
            timestamp,
            latest_pos: pos,
        }
    }

    /// Record the unread counters the upstream reported for one user.
    pub async fn set_unread_counts(
        &self,
        room_id: &RoomId,
        user_id: &UserId,
        highlight_count: u64,
        notification_count: u64,
    ) {
        let mut rooms = self.rooms.write().await;
        let cached = rooms.entry(room_id.to_owned()).or_default();
        cached
            .unread
            .insert(user_id.to_owned(), (highlight_count, notification_count));
    }
}

fn event_type_of(event: &Value) -> String {
    event["type"].as_str().unwrap_or_default().to_owned()
}

#[async_trait]
impl ConnStateStore for SharedCache {
    async fn load(&self, user_id: &UserId) -> Result<(Vec<OwnedRoomId>, u64)> {
        let joined = self.tracker.joined_rooms_for_user(user_id);
        Ok((joined, self.latest_pos()))
    }

    async fn load_room(&self, room_id: &RoomId) -> Result<SortableRoom> {
        let rooms = self.rooms.read().await;
        rooms
            .get(room_id)
            .and_then(|cached| cached.summary.clone())
            .ok_or_else(|| Error::bad_request(format!("unknown room {room_id}")))
    }

    async fn load_state(
        &self,
        room_id: &RoomId,
        _load_position: u64,
        required_state: &[(String, String)],
    ) -> Vec<Value> {
        let rooms = self.rooms.read().await;
        let Some(cached) = rooms.get(room_id) else {
            return Vec::new();
        };
        required_state
            .iter()
            .filter_map(|(event_type, state_key)| {
                cached.state.get(&(event_type.clone(), state_key.clone())).cloned()
            })
            .collect()
    }

    async fn load_user_room_data(&self, room_id: &RoomId, user_id: &UserId) -> UserRoomData {
        let rooms = self.rooms.read().await;
        let Some(cached) = rooms.get(room_id) else {
            return UserRoomData::default();
        };
        let (highlight_count, notification_count) =
            cached.unread.get(user_id).copied().unwrap_or_default();
        UserRoomData {
            highlight_count,
            notification_count,
            timeline: cached.timeline.iter().cloned().collect(),
        }
    }
}
