// =============================================================================
// Syncwave Matrix Sliding Sync Proxy - Joined Rooms Tracker Module
// =============================================================================
//
// Project: Syncwave - High Performance Matrix Sliding Sync Proxy
// Author: Syncwave Development Team
// Date: 2026-06-15
// Version: 0.2.0
// License: Apache 2.0
//
// Description:
//   Bi-directional user/room membership index used to fan events out to the
//   right connections. Readers are the dispatch path, writers are the
//   membership-event handlers in the poller.
//
// =============================================================================

use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

use ruma::{OwnedRoomId, OwnedUserId, RoomId, UserId};

/// `user_id ↔ room_id` membership bi-index.
#[derive(Debug, Default)]
pub struct JoinedRoomsTracker {
    inner: RwLock<TrackerInner>,
}

#[derive(Debug, Default)]
struct TrackerInner {
    room_to_users: HashMap<OwnedRoomId, HashSet<OwnedUserId>>,
    user_to_rooms: HashMap<OwnedUserId, HashSet<OwnedRoomId>>,
}

impl JoinedRoomsTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn user_joined_room(&self, user_id: &UserId, room_id: &RoomId) {
        let mut inner = self.inner.write().expect("tracker lock poisoned");
        inner
            .room_to_users
            .entry(room_id.to_owned())
            .or_default()
            .insert(user_id.to_owned());
        inner
            .user_to_rooms
            .entry(user_id.to_owned())
            .or_default()
            .insert(room_id.to_owned());
    }

    pub fn user_left_room(&self, user_id: &UserId, room_id: &RoomId) {
        let mut inner = self.inner.write().expect("tracker lock poisoned");
        if let Some(users) = inner.room_to_users.get_mut(room_id) {
            users.remove(user_id);
        }
        if let Some(rooms) = inner.user_to_rooms.get_mut(user_id) {
            rooms.remove(room_id);
        }
    }

    pub fn is_joined(&self, user_id: &UserId, room_id: &RoomId) -> bool {
        let inner = self.inner.read().expect("tracker lock poisoned");
        inner
            .user_to_rooms
            .get(user_id)
            .is_some_and(|rooms| rooms.contains(room_id))
    }

    pub fn joined_rooms_for_user(&self, user_id: &UserId) -> Vec<OwnedRoomId> {
        let inner = self.inner.read().expect("tracker lock poisoned");
        inner
            .user_to_rooms
            .get(user_id)
            .map(|rooms| rooms.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn joined_users_for_room(&self, room_id: &RoomId) -> Vec<OwnedUserId> {
        let inner = self.inner.read().expect("tracker lock poisoned");
        inner
            .room_to_users
            .get(room_id)
            .map(|users| users.iter().cloned().collect())
            .unwrap_or_default()
    }
}
