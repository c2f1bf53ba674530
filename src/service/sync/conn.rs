// =============================================================================
// Syncwave Matrix Sliding Sync Proxy - Connection Module
// =============================================================================
//
// Project: Syncwave - High Performance Matrix Sliding Sync Proxy
// Author: Syncwave Development Team
// Date: 2026-06-15
// Version: 0.2.0
// License: Apache 2.0
//
// Description:
//   Wraps the per-connection engine with position-token bookkeeping and the
//   one-in-flight-request discipline: a newer request completes the pending
//   one immediately so the client's latest HTTP request always gets a fresh
//   turn.
//
// =============================================================================

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use ruma::OwnedUserId;
use tokio::sync::{watch, Mutex};
use tracing::{debug, instrument};

use crate::storage::ConnStateStore;
use crate::utils;
use crate::{Error, Result};

use super::connstate::ConnState;
use super::events::{event_queue, EventData, EventSink};
use super::request::Request;
use super::response::Response;

/// Connection identity: one engine instance per `(session_id, device_id)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConnId {
    pub session_id: String,
    pub device_id: String,
}

struct ConnInner {
    state: ConnState,

    /// The position the next response will carry
    next_pos: u64,

    /// `pos` of the request that produced `cached`; repeating it replays
    /// the cached response (idempotent resume after a lost reply)
    last_req_pos: u64,

    cached: Option<Response>,
}

/// A live sync v3 connection.
pub struct Conn {
    pub conn_id: ConnId,
    user_id: OwnedUserId,
    sink: EventSink,
    kick: watch::Sender<u64>,
    last_activity_ms: AtomicU64,
    inner: Mutex<ConnInner>,
}

impl Conn {
    pub fn new(
        conn_id: ConnId,
        user_id: OwnedUserId,
        store: Arc<dyn ConnStateStore>,
        fan_in_capacity: usize,
    ) -> Self {
        let (sink, queue) = event_queue(fan_in_capacity);
        let (kick, _) = watch::channel(0);
        Self {
            conn_id,
            user_id: user_id.clone(),
            sink,
            kick,
            last_activity_ms: AtomicU64::new(utils::millis_since_unix_epoch()),
            inner: Mutex::new(ConnInner {
                state: ConnState::new(user_id, store, queue),
                next_pos: 1,
                last_req_pos: 0,
                cached: None,
            }),
        }
    }

    pub fn user_id(&self) -> &OwnedUserId {
        &self.user_id
    }

    pub fn last_activity_ms(&self) -> u64 {
        self.last_activity_ms.load(Ordering::Relaxed)
    }

    pub fn is_invalidated(&self) -> bool {
        self.sink.is_invalidated()
    }

    /// Enqueue an event from the fan-out path. Never blocks; overflow
    /// invalidates the connection instead of back-pressuring the poller.
    pub fn push_event(&self, event: EventData) {
        self.sink.push(event);
    }

    /// Handle one request, serialised against any other request on this
    /// connection.
    #[instrument(level = "debug", skip(self, req), fields(session_id = %self.conn_id.session_id))]
    pub async fn on_incoming_request(&self, req: &Request) -> Result<Response> {
        self.last_activity_ms
            .store(utils::millis_since_unix_epoch(), Ordering::Relaxed);

        // complete any in-flight request before taking the lock ourselves
        self.kick.send_modify(|generation| *generation += 1);
        let mut kick_rx = self.kick.subscribe();

        let mut inner = self.inner.lock().await;

        let pos = match req.pos.as_deref() {
            None | Some("") => 0,
            Some(p) => p
                .parse::<u64>()
                .map_err(|_| Error::session_expired(format!("unparseable pos '{p}'")))?,
        };

        if pos != 0 {
            if pos == inner.last_req_pos {
                if let Some(cached) = inner.cached.clone() {
                    debug!(pos, "🔁 retransmitting previous response");
                    return Ok(cached);
                }
            }
            let last_issued = inner.next_pos - 1;
            if pos != last_issued {
                return Err(Error::session_expired(format!(
                    "pos {pos} is outside the retention window (expected {last_issued})"
                )));
            }
        }

        let mut response = inner.state.on_incoming_request(req, &mut kick_rx).await?;
        response.pos = inner.next_pos.to_string();
        inner.last_req_pos = pos;
        inner.cached = Some(response.clone());
        inner.next_pos += 1;
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::sync::ranges::SliceRanges;
    use crate::service::sync::room::{SortableRoom, UserRoomData};
    use crate::service::sync::sorted_list::SortCriterion;
    use async_trait::async_trait;
    use ruma::{OwnedRoomId, RoomId, UserId};
    use serde_json::{json, Value};
    use std::time::Duration;

    struct TwoRoomStore;

    #[async_trait]
    impl ConnStateStore for TwoRoomStore {
        async fn load(&self, _user_id: &UserId) -> Result<(Vec<OwnedRoomId>, u64)> {
            Ok((
                vec![
                    OwnedRoomId::try_from("!a:localhost").unwrap(),
                    OwnedRoomId::try_from("!b:localhost").unwrap(),
                ],
                1,
            ))
        }

        async fn load_room(&self, room_id: &RoomId) -> Result<SortableRoom> {
            let ts = if room_id.as_str() == "!a:localhost" { 2000 } else { 1000 };
            Ok(SortableRoom {
                room_id: room_id.to_owned(),
                name: room_id.to_string(),
                last_message_timestamp: ts,
                last_event: Some(json!({})),
                highlight_count: 0,
                notification_count: 0,
            })
        }

        async fn load_state(
            &self,
            _room_id: &RoomId,
            _load_position: u64,
            _required_state: &[(String, String)],
        ) -> Vec<Value> {
            Vec::new()
        }

        async fn load_user_room_data(&self, _room_id: &RoomId, _user_id: &UserId) -> UserRoomData {
            UserRoomData::default()
        }
    }

    fn new_conn() -> Arc<Conn> {
        Arc::new(Conn::new(
            ConnId { session_id: "s".to_owned(), device_id: "d".to_owned() },
            OwnedUserId::try_from("@alice:localhost").unwrap(),
            Arc::new(TwoRoomStore),
            64,
        ))
    }

    fn request(pos: Option<&str>, timeout: u64) -> Request {
        Request {
            pos: pos.map(str::to_owned),
            timeout,
            sort: vec![SortCriterion::ByRecency],
            rooms: SliceRanges::new(vec![[0, 9]]),
            ..Default::default()
        }
    }

    fn bump_event(room: &str, ts: u64) -> EventData {
        EventData {
            room_id: OwnedRoomId::try_from(room).unwrap(),
            event_type: "m.room.message".into(),
            state_key: None,
            content: json!({}),
            event: json!({}),
            timestamp: ts,
            latest_pos: 0,
        }
    }

    #[tokio::test]
    async fn test_pos_advances_and_resubmit_replays() {
        let conn = new_conn();

        let first = conn.on_incoming_request(&request(None, 10)).await.unwrap();
        assert_eq!(first.pos, "1");
        assert_eq!(first.count, 2);

        conn.push_event(bump_event("!b:localhost", 3000));
        let second = conn.on_incoming_request(&request(Some("1"), 10)).await.unwrap();
        assert_eq!(second.pos, "2");
        assert!(!second.ops.is_empty());

        // the reply was lost; the client resubmits the same request
        let replay = conn.on_incoming_request(&request(Some("1"), 10)).await.unwrap();
        assert_eq!(replay, second);

        // and can still advance afterwards
        let third = conn.on_incoming_request(&request(Some("2"), 10)).await.unwrap();
        assert_eq!(third.pos, "3");
    }

    #[tokio::test]
    async fn test_stale_pos_expires_session() {
        let conn = new_conn();
        conn.on_incoming_request(&request(None, 10)).await.unwrap();
        conn.on_incoming_request(&request(Some("1"), 10)).await.unwrap();
        conn.on_incoming_request(&request(Some("2"), 10)).await.unwrap();

        let err = conn.on_incoming_request(&request(Some("1"), 10)).await.unwrap_err();
        assert!(matches!(err, Error::SessionExpired(_)));

        let err = conn.on_incoming_request(&request(Some("99"), 10)).await.unwrap_err();
        assert!(matches!(err, Error::SessionExpired(_)));

        let err = conn.on_incoming_request(&request(Some("junk"), 10)).await.unwrap_err();
        assert!(matches!(err, Error::SessionExpired(_)));
    }

    #[tokio::test]
    async fn test_new_request_completes_pending_one() {
        let conn = new_conn();
        conn.on_incoming_request(&request(None, 10)).await.unwrap();

        // a long poll with nothing to say...
        let waiter = {
            let conn = conn.clone();
            tokio::spawn(async move { conn.on_incoming_request(&request(Some("1"), 30_000)).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!waiter.is_finished());

        // ...is kicked by a newer request instead of holding the slot
        let newer = {
            let conn = conn.clone();
            tokio::spawn(async move { conn.on_incoming_request(&request(Some("2"), 10)).await })
        };

        let first = tokio::time::timeout(Duration::from_secs(2), waiter)
            .await
            .expect("pending request should complete promptly")
            .unwrap()
            .unwrap();
        assert_eq!(first.pos, "2");
        assert!(first.ops.is_empty());

        let second = newer.await.unwrap().unwrap();
        assert_eq!(second.pos, "3");
    }
}
