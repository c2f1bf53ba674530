// =============================================================================
// Syncwave Matrix Sliding Sync Proxy - Sorted Room List Module
// =============================================================================
//
// Project: Syncwave - High Performance Matrix Sliding Sync Proxy
// Author: Syncwave Development Team
// Date: 2026-06-15
// Version: 0.2.0
// License: Apache 2.0
//
// Description:
//   Ordered index of a user's rooms under a chosen sort. The single source
//   of truth for "where is room X right now", consulted by the diff engine
//   for every incoming event.
//
// =============================================================================

use std::cmp::Ordering;
use std::collections::HashMap;

use ruma::{OwnedRoomId, RoomId};
use serde::{Deserialize, Serialize};

use super::room::SortableRoom;

/// Sort criteria a client may request, applied in order, with ascending
/// `room_id` as the final tie-break so diffs stay deterministic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortCriterion {
    /// Descending `last_message_timestamp`
    ByRecency,
    /// Case-insensitive lexicographic on `name`
    ByName,
}

/// Outcome of reclassifying a room after an update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MoveResult {
    /// The snapshot was identical, nothing happened
    Unchanged,
    /// The summary changed but the room kept its position
    UpdatedInPlace(usize),
    /// The room moved; `from` is `None` when it was not present before
    Moved { from: Option<usize>, to: usize },
}

fn compare(criteria: &[SortCriterion], a: &SortableRoom, b: &SortableRoom) -> Ordering {
    for criterion in criteria {
        let ord = match criterion {
            SortCriterion::ByRecency => b.last_message_timestamp.cmp(&a.last_message_timestamp),
            SortCriterion::ByName => a.name.to_lowercase().cmp(&b.name.to_lowercase()),
        };
        if ord != Ordering::Equal {
            return ord;
        }
    }
    a.room_id.cmp(&b.room_id)
}

/// A dense ordered sequence of rooms plus a companion position index.
///
/// Invariant: every joined room appears exactly once, positions are
/// `0..N-1`, and `positions` agrees with `rooms` after every mutation.
#[derive(Debug, Clone)]
pub struct SortedRoomList {
    rooms: Vec<SortableRoom>,
    positions: HashMap<OwnedRoomId, usize>,
    criteria: Vec<SortCriterion>,
}

impl SortedRoomList {
    /// Initialise from an unordered collection. O(N log N).
    pub fn build(mut rooms: Vec<SortableRoom>, criteria: Vec<SortCriterion>) -> Self {
        rooms.sort_by(|a, b| compare(&criteria, a, b));
        let positions = rooms
            .iter()
            .enumerate()
            .map(|(i, r)| (r.room_id.clone(), i))
            .collect();
        Self { rooms, positions, criteria }
    }

    pub fn len(&self) -> usize {
        self.rooms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rooms.is_empty()
    }

    pub fn criteria(&self) -> &[SortCriterion] {
        &self.criteria
    }

    pub fn position_of(&self, room_id: &RoomId) -> Option<usize> {
        self.positions.get(room_id).copied()
    }

    pub fn at(&self, index: usize) -> Option<&SortableRoom> {
        self.rooms.get(index)
    }

    /// Re-sort the whole list under new criteria.
    pub fn resort(&mut self, criteria: Vec<SortCriterion>) {
        self.criteria = criteria;
        self.rooms.sort_by(|a, b| compare(&self.criteria, a, b));
        self.reindex(0);
    }

    /// Reclassify `summary` under the active criteria.
    ///
    /// An unknown room is appended at its sorted position and reported as
    /// `Moved { from: None, .. }`; a known room whose computed position is
    /// unchanged is updated in place.
    pub fn update(&mut self, summary: SortableRoom) -> MoveResult {
        match self.positions.get(&summary.room_id).copied() {
            None => {
                let to = self.insert(summary);
                MoveResult::Moved { from: None, to }
            }
            Some(from) => {
                if self.rooms[from] == summary {
                    return MoveResult::Unchanged;
                }
                self.rooms[from] = summary;
                if self.ordered_at(from) {
                    return MoveResult::UpdatedInPlace(from);
                }
                let room = self.rooms.remove(from);
                let to = self.insertion_point(&room);
                self.rooms.insert(to, room);
                self.reindex(from.min(to));
                MoveResult::Moved { from: Some(from), to }
            }
        }
    }

    /// Insert a room known to be absent. Returns its position.
    pub fn insert(&mut self, summary: SortableRoom) -> usize {
        debug_assert!(!self.positions.contains_key(&summary.room_id));
        let to = self.insertion_point(&summary);
        self.rooms.insert(to, summary);
        self.reindex(to);
        to
    }

    /// Remove a room, e.g. on a leave transition.
    pub fn remove(&mut self, room_id: &RoomId) -> Option<(usize, SortableRoom)> {
        let from = self.positions.remove(room_id)?;
        let room = self.rooms.remove(from);
        self.reindex(from);
        Some((from, room))
    }

    fn insertion_point(&self, room: &SortableRoom) -> usize {
        self.rooms
            .binary_search_by(|probe| compare(&self.criteria, probe, room))
            .unwrap_or_else(|i| i)
    }

    /// Is the entry at `index` correctly ordered relative to its neighbours?
    fn ordered_at(&self, index: usize) -> bool {
        if index > 0 && compare(&self.criteria, &self.rooms[index - 1], &self.rooms[index]) == Ordering::Greater {
            return false;
        }
        if index + 1 < self.rooms.len()
            && compare(&self.criteria, &self.rooms[index], &self.rooms[index + 1]) == Ordering::Greater
        {
            return false;
        }
        true
    }

    fn reindex(&mut self, from: usize) {
        for i in from..self.rooms.len() {
            self.positions.insert(self.rooms[i].room_id.clone(), i);
        }
    }
}
