// =============================================================================
// Syncwave Matrix Sliding Sync Proxy - Connection State Module
// =============================================================================
//
// Project: Syncwave - High Performance Matrix Sliding Sync Proxy
// Author: Syncwave Development Team
// Date: 2026-06-15
// Version: 0.2.0
// License: Apache 2.0
//
// Description:
//   The per-connection diff engine. Owns the sorted room list, the tracked
//   range set and the room subscription map, consumes the event fan-in and
//   produces the minimal ordered-diff operations that keep the client's
//   window consistent with the server's sorted truth.
//
// Performance Targets:
//   • O(log N) room reclassification per event
//   • At most one DELETE/INSERT pair emitted per event
//   • Long-poll waits bounded by client deadline and cancellation
//
// Dependencies:
//   • Tokio async runtime
//   • Structured logging with tracing
//   • Matrix protocol types with ruma
//
// =============================================================================

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use ruma::events::room::member::MembershipState;
use ruma::events::TimelineEventType;
use ruma::{OwnedRoomId, OwnedUserId, RoomId};
use tokio::sync::watch;
use tokio::time::{self, Instant};
use tracing::{debug, instrument, trace};

use crate::storage::ConnStateStore;
use crate::{Error, Result};

use super::events::{EventData, EventQueue};
use super::ranges::SliceRanges;
use super::request::Request;
use super::response::{Response, ResponseOp};
use super::room::{Room, RoomSubscription, SortableRoom};
use super::sorted_list::{MoveResult, SortCriterion, SortedRoomList};

/// Per-connection state machine.
///
/// Accessed only by the currently-active request handler for the connection;
/// the fan-in queue's own synchronisation is the only locking underneath.
pub struct ConnState {
    user_id: OwnedUserId,
    store: Arc<dyn ConnStateStore>,

    /// `None` until the first request loads the user's rooms
    list: Option<SortedRoomList>,

    /// Stream watermark; queued events older than this are already reflected
    /// in the loaded list and must be dropped for idempotence
    load_position: u64,

    /// Ranges delivered by the previous response
    active_ranges: SliceRanges,

    room_subscriptions: HashMap<OwnedRoomId, RoomSubscription>,

    queue: EventQueue,
}

impl ConnState {
    pub fn new(user_id: OwnedUserId, store: Arc<dyn ConnStateStore>, queue: EventQueue) -> Self {
        Self {
            user_id,
            store,
            list: None,
            load_position: 0,
            active_ranges: SliceRanges::default(),
            room_subscriptions: HashMap::new(),
            queue,
        }
    }

    pub fn user_id(&self) -> &OwnedUserId {
        &self.user_id
    }

    /// Handle one sync v3 request to completion.
    ///
    /// Returns immediately when the response carries anything; otherwise
    /// blocks on the fan-in until an event lands, the deadline passes or
    /// `kick` fires because a newer request arrived for this connection.
    #[instrument(level = "debug", skip_all, fields(user_id = %self.user_id))]
    pub async fn on_incoming_request(
        &mut self,
        req: &Request,
        kick: &mut watch::Receiver<u64>,
    ) -> Result<Response> {
        if self.queue.is_invalidated() {
            return Err(Error::session_expired(
                "event buffer overflowed, drop pos and reconnect",
            ));
        }

        let deadline = Instant::now() + Duration::from_millis(req.timeout);
        let sort = req.effective_sort();

        if self.list.is_none() {
            self.load(&sort).await?;
        } else if self.list.as_ref().is_some_and(|l| l.criteria() != sort) {
            if let Some(list) = self.list.as_mut() {
                list.resort(sort);
            }
            // the ordering the client holds is void; re-SYNC every range
            self.active_ranges = SliceRanges::default();
        }

        let mut response = Response::default();

        // 1. subscription deltas; validate before mutating so a bad request
        //    leaves the subscription map untouched
        for room_id in &req.unsubscribe_rooms {
            self.room_subscriptions.remove(room_id);
        }
        let mut initial_subs = Vec::with_capacity(req.room_subscriptions.len());
        for (room_id, sub) in &req.room_subscriptions {
            let room = self.initial_subscription_data(room_id, sub).await?;
            initial_subs.push((room_id.clone(), sub.clone(), room));
        }
        for (room_id, sub, room) in initial_subs {
            self.room_subscriptions.insert(room_id.clone(), sub);
            response.room_subscriptions.insert(room_id, room);
        }

        // 2. reconcile ranges: one SYNC per interval that is new, nothing
        //    for dropped intervals, incremental handling for kept ones
        let new_ranges = req.rooms.clone();
        if let Some(list) = self.list.as_ref() {
            for interval in new_ranges.added_since(&self.active_ranges) {
                response.ops.push(sync_op(list, interval));
            }
        }
        self.active_ranges = new_ranges;

        // 3. drain pending events; 4. block while the response stays empty
        loop {
            while let Some(ev) = self.queue.try_next() {
                self.process_event(&ev, &mut response).await;
            }
            if self.queue.is_invalidated() {
                return Err(Error::session_expired(
                    "event buffer overflowed, drop pos and reconnect",
                ));
            }
            if !response.is_empty() || Instant::now() >= deadline {
                break;
            }
            tokio::select! {
                maybe_ev = self.queue.recv() => match maybe_ev {
                    Some(ev) => self.process_event(&ev, &mut response).await,
                    None => break,
                },
                _ = time::sleep_until(deadline) => break,
                _ = kick.changed() => {
                    debug!("⏩ newer request arrived, completing early");
                    break;
                }
            }
        }

        response.count = self.list.as_ref().map(|l| l.len() as u64).unwrap_or_default();
        Ok(response)
    }

    /// First-request initialisation: fetch the joined room set and build the
    /// sorted list under the requested criteria.
    async fn load(&mut self, sort: &[SortCriterion]) -> Result<()> {
        let (joined, watermark) = self.store.load(&self.user_id).await?;
        let mut rooms = Vec::with_capacity(joined.len());
        for room_id in joined {
            rooms.push(self.store.load_room(&room_id).await?);
        }
        debug!(rooms = rooms.len(), watermark, "🔄 loaded initial room set");
        self.load_position = watermark;
        self.list = Some(SortedRoomList::build(rooms, sort.to_vec()));
        Ok(())
    }

    /// Apply one event notification to the list and fold the resulting ops
    /// into the response.
    async fn process_event(&mut self, ev: &EventData, response: &mut Response) {
        if ev.latest_pos != 0 && ev.latest_pos < self.load_position {
            trace!(room_id = %ev.room_id, pos = ev.latest_pos, "event predates watermark, dropped");
            return;
        }
        if ev.latest_pos > self.load_position {
            self.load_position = ev.latest_pos;
        }

        // subscribed rooms get the event regardless of window visibility
        if let Some(sub) = self.room_subscriptions.get(&ev.room_id) {
            let entry = response
                .room_subscriptions
                .entry(ev.room_id.clone())
                .or_insert_with(|| Room::partial(ev.room_id.clone()));
            entry.timeline.push(ev.event.clone());
            let limit = sub.timeline_limit as usize;
            if entry.timeline.len() > limit {
                let excess = entry.timeline.len() - limit;
                entry.timeline.drain(..excess);
            }
        }

        if self.is_own_leave(ev) {
            let removed = self.list.as_mut().and_then(|l| l.remove(&ev.room_id));
            if let (Some(list), Some((from, _))) = (self.list.as_ref(), removed) {
                response.ops.extend(ops_for_leave(list, &self.active_ranges, from));
            }
            return;
        }

        let from = self.list.as_ref().and_then(|l| l.position_of(&ev.room_id));
        let mut summary = match from.and_then(|i| self.list.as_ref().and_then(|l| l.at(i))) {
            Some(existing) => existing.clone(),
            // the user may have just joined, so the list has no entry yet
            None => self
                .store
                .load_room(&ev.room_id)
                .await
                .unwrap_or_else(|_| SortableRoom::new(ev.room_id.clone())),
        };
        apply_event(&mut summary, ev);

        let Some(list) = self.list.as_mut() else { return };
        match list.update(summary) {
            MoveResult::Unchanged | MoveResult::UpdatedInPlace(_) => {
                if let Some(index) = list.position_of(&ev.room_id) {
                    if self.active_ranges.contains(index as u64) {
                        let mut room = Room::partial(ev.room_id.clone());
                        room.timeline.push(ev.event.clone());
                        response.ops.push(ResponseOp::Update { index: index as u64, room });
                    }
                }
            }
            MoveResult::Moved { from, to } => {
                response.ops.extend(ops_for_move(list, &self.active_ranges, from, to));
            }
        }
    }

    /// Is this the session user leaving (or being banned from) the room?
    fn is_own_leave(&self, ev: &EventData) -> bool {
        if ev.event_type != TimelineEventType::RoomMember
            || ev.state_key.as_deref() != Some(self.user_id.as_str())
        {
            return false;
        }
        matches!(
            serde_json::from_value::<MembershipState>(ev.content["membership"].clone()),
            Ok(MembershipState::Leave | MembershipState::Ban)
        )
    }

    /// Build the full payload emitted once when a subscription is created.
    async fn initial_subscription_data(
        &self,
        room_id: &RoomId,
        sub: &RoomSubscription,
    ) -> Result<Room> {
        let summary = self
            .store
            .load_room(room_id)
            .await
            .map_err(|_| Error::bad_request(format!("room_subscriptions: unknown room {room_id}")))?;
        let data = self.store.load_user_room_data(room_id, &self.user_id).await;

        let limit = sub.timeline_limit as usize;
        let mut timeline = data.timeline;
        if timeline.len() > limit {
            let excess = timeline.len() - limit;
            timeline.drain(..excess);
        }
        if timeline.is_empty() && limit > 0 {
            if let Some(last_event) = summary.last_event.clone() {
                timeline.push(last_event);
            }
        }

        let required_state = if sub.required_state.is_empty() {
            None
        } else {
            Some(
                self.store
                    .load_state(room_id, self.load_position, &sub.required_state)
                    .await,
            )
        };

        Ok(Room {
            room_id: room_id.to_owned(),
            name: Some(summary.name),
            timeline,
            required_state,
            highlight_count: (data.highlight_count > 0).then_some(data.highlight_count),
            notification_count: (data.notification_count > 0).then_some(data.notification_count),
        })
    }
}

/// Fold an event into a room snapshot.
fn apply_event(summary: &mut SortableRoom, ev: &EventData) {
    summary.last_message_timestamp = ev.timestamp;
    summary.last_event = Some(ev.event.clone());
    if ev.event_type == TimelineEventType::RoomName {
        if let Some(name) = ev.content["name"].as_str() {
            summary.name = name.to_owned();
        }
    }
}

/// Full room payload for the room currently at `index`.
fn full_room_at(list: &SortedRoomList, index: usize) -> Option<Room> {
    let summary = list.at(index)?;
    Some(Room {
        room_id: summary.room_id.clone(),
        name: Some(summary.name.clone()),
        timeline: summary.last_event.clone().into_iter().collect(),
        required_state: None,
        highlight_count: None,
        notification_count: None,
    })
}

/// SYNC payload for a newly-tracked interval. The op echoes the requested
/// interval; only positions that exist contribute rooms.
fn sync_op(list: &SortedRoomList, interval: [u64; 2]) -> ResponseOp {
    let mut rooms = Vec::new();
    if !list.is_empty() {
        let hi = interval[1].min(list.len() as u64 - 1);
        for index in interval[0]..=hi {
            if let Some(room) = full_room_at(list, index as usize) {
                rooms.push(room);
            }
        }
    }
    ResponseOp::Sync { range: interval, rooms }
}

/// The affected interval nearest to `index`.
fn nearest_range(ranges: &[[u64; 2]], index: u64) -> [u64; 2] {
    let distance = |r: &[u64; 2]| {
        if index < r[0] {
            r[0] - index
        } else if index > r[1] {
            index - r[1]
        } else {
            0
        }
    };
    ranges
        .iter()
        .copied()
        .min_by_key(distance)
        .unwrap_or([0, 0])
}

/// Ops for a room that moved from `from` to `to` (or joined, `from = None`).
///
/// Every range lying between the vacated and the arrival position shifts by
/// one slot. The client is told with a single DELETE/INSERT pair: the DELETE
/// lands on the vacated position when visible, otherwise on the edge of the
/// affected range nearest it (`hi` for a downward displacement, `lo` for an
/// upward one); the INSERT lands on the arrival position when visible,
/// otherwise on the nearest affected edge, carrying the room that scrolled
/// into that slot.
fn ops_for_move(
    list: &SortedRoomList,
    ranges: &SliceRanges,
    from: Option<usize>,
    to: usize,
) -> Vec<ResponseOp> {
    let len = list.len() as u64;
    let clamped = ranges.clamp(len);
    if clamped.is_empty() {
        return Vec::new();
    }

    let to = to as u64;
    // a join shifts everything from the arrival position to the end
    let from_eff = from.map(|f| f as u64).unwrap_or_else(|| len.saturating_sub(1));
    let (span_lo, span_hi) = if from_eff <= to { (from_eff, to) } else { (to, from_eff) };

    let affected: Vec<[u64; 2]> = clamped
        .iter()
        .filter(|r| r[0] <= span_hi && span_lo <= r[1])
        .collect();
    if affected.is_empty() {
        return Vec::new();
    }

    let delete_index = match from {
        Some(f) if clamped.contains(f as u64) => f as u64,
        _ => {
            let r = nearest_range(&affected, from_eff);
            if from_eff > r[1] {
                r[1]
            } else if from_eff < r[0] {
                r[0]
            } else {
                // a join: the tail of the grown list is the vacated end
                from_eff
            }
        }
    };

    let (insert_index, insert_room) = if clamped.contains(to) {
        (to, full_room_at(list, to as usize))
    } else {
        let r = nearest_range(&affected, to);
        let edge = if to < r[0] { r[0] } else { r[1] };
        (edge, full_room_at(list, edge as usize))
    };

    let mut ops = vec![ResponseOp::Delete { index: delete_index }];
    if let Some(room) = insert_room {
        ops.push(ResponseOp::Insert { index: insert_index, room });
    }
    ops
}

/// Ops for a room removed at `from` (leave transition); `list` has already
/// shrunk. Everything past the vacated slot shifts down, so the edge slot of
/// the last affected range gains the room that scrolled into visibility —
/// unless the range reached past the end of the list and nothing is there.
fn ops_for_leave(list: &SortedRoomList, ranges: &SliceRanges, from: usize) -> Vec<ResponseOp> {
    let old_len = list.len() as u64 + 1;
    let clamped = ranges.clamp(old_len);
    let from = from as u64;

    let affected: Vec<[u64; 2]> = clamped.iter().filter(|r| r[1] >= from).collect();
    if affected.is_empty() {
        return Vec::new();
    }

    let delete_index = if clamped.contains(from) {
        from
    } else {
        let r = nearest_range(&affected, from);
        if from > r[1] {
            r[1]
        } else {
            r[0]
        }
    };

    let mut ops = vec![ResponseOp::Delete { index: delete_index }];
    if let Some(&last) = affected.last() {
        let edge = last[1];
        if let Some(room) = full_room_at(list, edge as usize) {
            ops.push(ResponseOp::Insert { index: edge, room });
        }
    }
    ops
}
