// =============================================================================
// Syncwave Matrix Sliding Sync Proxy - Upstream Poller Module
// =============================================================================
//
// Project: Syncwave - High Performance Matrix Sliding Sync Proxy
// Author: Syncwave Development Team
// Date: 2026-06-15
// Version: 0.2.0
// License: Apache 2.0
//
// Description:
//   One long-poll loop per upstream device. Threads the next_batch token
//   from call to call, retries transport failures with exponential backoff,
//   tears down on auth failures, and feeds every event through the shared
//   cache into the connection fan-out.
//
// =============================================================================

use std::sync::Arc;
use std::time::Duration;

use ruma::{OwnedUserId, RoomId, UserId};
use serde_json::Value;
use tokio::sync::watch;
use tokio::time;
use tracing::{debug, error, info, instrument, warn};

use crate::metrics::SyncMetrics;
use crate::service::sync::ConnMap;
use crate::storage::SharedCache;
use crate::Error;

use super::{SyncV2Client, SyncV2Response};

const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// A sync v2 long-poll loop for one `(user, device)` pair.
pub struct Poller {
    client: Arc<dyn SyncV2Client>,
    cache: Arc<SharedCache>,
    conns: Arc<ConnMap>,
    metrics: Arc<SyncMetrics>,
    user_id: OwnedUserId,
    auth: String,
}

impl Poller {
    pub fn new(
        client: Arc<dyn SyncV2Client>,
        cache: Arc<SharedCache>,
        conns: Arc<ConnMap>,
        metrics: Arc<SyncMetrics>,
        user_id: OwnedUserId,
        auth: String,
    ) -> Self {
        Self { client, cache, conns, metrics, user_id, auth }
    }

    /// Poll until shutdown or the upstream revokes the credentials.
    #[instrument(level = "info", skip(self, shutdown), fields(user_id = %self.user_id))]
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut since = String::new();
        let mut backoff = INITIAL_BACKOFF;

        info!("📡 poller started");
        loop {
            let poll = tokio::select! {
                _ = shutdown.changed() => break,
                result = self.client.do_sync_v2(&self.auth, &since) => result,
            };
            match poll {
                Ok(response) => {
                    backoff = INITIAL_BACKOFF;
                    SyncMetrics::incr(&self.metrics.upstream_polls);
                    since = response.next_batch.clone();
                    self.process_response(response).await;
                }
                Err(Error::UpstreamAuth(msg)) => {
                    error!("🚫 upstream revoked credentials, tearing down poller: {msg}");
                    break;
                }
                Err(err) => {
                    warn!("upstream poll failed, retrying in {backoff:?}: {err}");
                    tokio::select! {
                        _ = shutdown.changed() => break,
                        _ = time::sleep(backoff) => {}
                    }
                    backoff = (backoff * 2).min(MAX_BACKOFF);
                }
            }
        }
        info!("📴 poller terminated");
    }

    async fn process_response(&self, response: SyncV2Response) {
        for (room_id, joined) in response.rooms.join {
            for event in &joined.state.events {
                self.handle_state_event(&room_id, event).await;
            }
            for event in joined.timeline.events {
                self.handle_timeline_event(&room_id, event).await;
            }

            let unread = &joined.unread_notifications;
            if unread.highlight_count.is_some() || unread.notification_count.is_some() {
                self.cache
                    .set_unread_counts(
                        &room_id,
                        &self.user_id,
                        unread.highlight_count.unwrap_or_default(),
                        unread.notification_count.unwrap_or_default(),
                    )
                    .await;
            }
        }

        // leave deltas carry the membership event in their timeline
        for (room_id, left) in response.rooms.leave {
            for event in left.timeline.events {
                self.handle_timeline_event(&room_id, event).await;
            }
        }
    }

    async fn handle_state_event(&self, room_id: &RoomId, event: &Value) {
        self.track_membership(room_id, event);
        self.cache.apply_state_event(room_id, event).await;
    }

    async fn handle_timeline_event(&self, room_id: &RoomId, event: Value) {
        self.track_membership(room_id, &event);
        let event_data = self.cache.apply_timeline_event(room_id, event).await;
        let users = self.cache.tracker().joined_users_for_room(room_id);
        debug!(room_id = %room_id, fan_out = users.len(), "🔄 dispatching event");
        self.conns.dispatch(&users, &event_data).await;
    }

    /// Keep the membership bi-index current for fan-out decisions.
    fn track_membership(&self, room_id: &RoomId, event: &Value) {
        if event["type"].as_str() != Some("m.room.member") {
            return;
        }
        let Some(state_key) = event["state_key"].as_str() else {
            return;
        };
        let Ok(member) = UserId::parse(state_key) else {
            return;
        };
        match event["content"]["membership"].as_str() {
            Some("join") => self.cache.tracker().user_joined_room(&member, room_id),
            Some("leave") | Some("ban") => self.cache.tracker().user_left_room(&member, room_id),
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::sync::conn::ConnId;
    use crate::service::sync::ranges::SliceRanges;
    use crate::service::sync::request::Request;
    use crate::service::sync::response::ResponseOp;
    use crate::service::sync::sorted_list::SortCriterion;
    use crate::storage::ConnStateStore;
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Scripted upstream: hands out queued responses, then blocks forever
    /// like a real long-poll with nothing to say.
    struct ScriptedClient {
        responses: Mutex<VecDeque<crate::Result<SyncV2Response>>>,
    }

    impl ScriptedClient {
        fn new(responses: Vec<crate::Result<SyncV2Response>>) -> Arc<Self> {
            Arc::new(Self { responses: Mutex::new(responses.into()) })
        }
    }

    #[async_trait]
    impl SyncV2Client for ScriptedClient {
        async fn who_am_i(&self, _auth: &str) -> crate::Result<OwnedUserId> {
            Ok(OwnedUserId::try_from("@alice:localhost").unwrap())
        }

        async fn do_sync_v2(&self, _auth: &str, _since: &str) -> crate::Result<SyncV2Response> {
            let next = self.responses.lock().unwrap().pop_front();
            match next {
                Some(result) => result,
                None => futures_util::future::pending().await,
            }
        }
    }

    fn join_response(room: &str, user: &str, ts: u64) -> SyncV2Response {
        serde_json::from_value(json!({
            "next_batch": "s_1",
            "rooms": {
                "join": {
                    room: {
                        "state": {
                            "events": [
                                {
                                    "type": "m.room.member",
                                    "state_key": user,
                                    "content": {"membership": "join"},
                                },
                                {
                                    "type": "m.room.name",
                                    "state_key": "",
                                    "content": {"name": "Test Room"},
                                },
                            ]
                        },
                        "timeline": {
                            "events": [
                                {
                                    "type": "m.room.message",
                                    "content": {"body": "hello"},
                                    "origin_server_ts": ts,
                                }
                            ]
                        },
                        "unread_notifications": {"notification_count": 1},
                    }
                }
            }
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn test_poller_feeds_cache_tracker_and_connections() {
        let alice = OwnedUserId::try_from("@alice:localhost").unwrap();
        let room = ruma::OwnedRoomId::try_from("!a:localhost").unwrap();
        let cache = Arc::new(SharedCache::new());
        let metrics = Arc::new(SyncMetrics::default());
        let conns = Arc::new(ConnMap::new(
            cache.clone() as Arc<dyn ConnStateStore>,
            metrics.clone(),
            16,
        ));

        let client = ScriptedClient::new(vec![Ok(join_response("!a:localhost", "@alice:localhost", 1000))]);
        let poller = Poller::new(
            client,
            cache.clone(),
            conns.clone(),
            metrics.clone(),
            alice.clone(),
            "Bearer token".to_owned(),
        );
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(poller.run(shutdown_rx));

        // wait for the scripted response to flow through
        time::sleep(Duration::from_millis(100)).await;

        assert!(cache.tracker().is_joined(&alice, &room));
        let summary = cache.load_room(&room).await.unwrap();
        assert_eq!(summary.name, "Test Room");
        assert_eq!(summary.last_message_timestamp, 1000);

        // a connection created afterwards sees the loaded world
        let conn = conns
            .get_or_create(
                ConnId { session_id: "s".to_owned(), device_id: "d".to_owned() },
                &alice,
                true,
            )
            .await;
        let req = Request {
            timeout: 10,
            sort: vec![SortCriterion::ByRecency],
            rooms: SliceRanges::new(vec![[0, 9]]),
            ..Default::default()
        };
        let res = conn.on_incoming_request(&req).await.unwrap();
        assert_eq!(res.count, 1);
        assert!(matches!(res.ops[0], ResponseOp::Sync { .. }));

        shutdown_tx.send_replace(true);
        time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("poller should honour shutdown")
            .unwrap();
    }

    #[tokio::test]
    async fn test_poller_tears_down_on_auth_failure() {
        let alice = OwnedUserId::try_from("@alice:localhost").unwrap();
        let cache = Arc::new(SharedCache::new());
        let metrics = Arc::new(SyncMetrics::default());
        let conns = Arc::new(ConnMap::new(
            cache.clone() as Arc<dyn ConnStateStore>,
            metrics.clone(),
            16,
        ));
        let client = ScriptedClient::new(vec![Err(Error::UpstreamAuth("HTTP 401".to_owned()))]);
        let poller = Poller::new(client, cache, conns, metrics, alice, "Bearer bad".to_owned());

        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        time::timeout(Duration::from_secs(2), poller.run(shutdown_rx))
            .await
            .expect("auth failure must terminate the poller");
    }

    #[tokio::test]
    async fn test_transport_errors_back_off_and_recover() {
        let alice = OwnedUserId::try_from("@alice:localhost").unwrap();
        let room = ruma::OwnedRoomId::try_from("!a:localhost").unwrap();
        let cache = Arc::new(SharedCache::new());
        let metrics = Arc::new(SyncMetrics::default());
        let conns = Arc::new(ConnMap::new(
            cache.clone() as Arc<dyn ConnStateStore>,
            metrics.clone(),
            16,
        ));
        let client = ScriptedClient::new(vec![
            Err(Error::UpstreamTransport("connection refused".to_owned())),
            Ok(join_response("!a:localhost", "@alice:localhost", 2000)),
        ]);
        let poller = Poller::new(
            client,
            cache.clone(),
            conns,
            metrics.clone(),
            alice.clone(),
            "Bearer token".to_owned(),
        );

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        tokio::time::pause();
        let handle = tokio::spawn(poller.run(shutdown_rx));
        // let the failed poll, the backoff sleep and the retry all elapse
        for _ in 0..10 {
            tokio::task::yield_now().await;
            time::advance(INITIAL_BACKOFF).await;
        }

        assert!(cache.tracker().is_joined(&alice, &room));
        assert_eq!(
            metrics.upstream_polls.load(std::sync::atomic::Ordering::Relaxed),
            1
        );
        shutdown_tx.send_replace(true);
        let _ = time::timeout(Duration::from_secs(5), handle).await;
    }
}
