// =============================================================================
// Syncwave Matrix Sliding Sync Proxy - Connection Map Module
// =============================================================================
//
// Project: Syncwave - High Performance Matrix Sliding Sync Proxy
// Author: Syncwave Development Team
// Date: 2026-06-15
// Version: 0.2.0
// License: Apache 2.0
//
// Description:
//   Registry of live connections keyed by (session_id, device_id), with a
//   per-user index for event fan-out and periodic expiry of idle entries.
//
// =============================================================================

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use ruma::{OwnedUserId, UserId};
use tokio::sync::RwLock;
use tracing::debug;

use crate::metrics::SyncMetrics;
use crate::storage::ConnStateStore;
use crate::utils;

use super::conn::{Conn, ConnId};
use super::events::EventData;

#[derive(Default)]
struct ConnMapInner {
    conns: HashMap<ConnId, Arc<Conn>>,
    user_conns: HashMap<OwnedUserId, HashSet<ConnId>>,
}

/// Registry of live connections.
pub struct ConnMap {
    store: Arc<dyn ConnStateStore>,
    metrics: Arc<SyncMetrics>,
    fan_in_capacity: usize,
    inner: RwLock<ConnMapInner>,
}

impl ConnMap {
    pub fn new(
        store: Arc<dyn ConnStateStore>,
        metrics: Arc<SyncMetrics>,
        fan_in_capacity: usize,
    ) -> Self {
        Self {
            store,
            metrics,
            fan_in_capacity,
            inner: RwLock::new(ConnMapInner::default()),
        }
    }

    /// Fetch the connection for `conn_id`, creating it when absent.
    ///
    /// `fresh` (a request without `pos`) always replaces existing state:
    /// the client has discarded everything and wants a clean load. An
    /// existing entry bound to a different user is never handed out.
    pub async fn get_or_create(
        &self,
        conn_id: ConnId,
        user_id: &UserId,
        fresh: bool,
    ) -> Arc<Conn> {
        let mut inner = self.inner.write().await;
        if !fresh {
            if let Some(conn) = inner.conns.get(&conn_id) {
                if conn.user_id() == user_id {
                    return conn.clone();
                }
            }
        }

        let conn = Arc::new(Conn::new(
            conn_id.clone(),
            user_id.to_owned(),
            self.store.clone(),
            self.fan_in_capacity,
        ));
        if inner.conns.insert(conn_id.clone(), conn.clone()).is_none() {
            SyncMetrics::incr(&self.metrics.active_connections);
        }
        SyncMetrics::incr(&self.metrics.total_connections);
        inner
            .user_conns
            .entry(user_id.to_owned())
            .or_default()
            .insert(conn_id);
        debug!(user_id = %user_id, "🔗 connection registered, {} active", inner.conns.len());
        conn
    }

    /// Fan one event out to every connection of every interested user.
    pub async fn dispatch(&self, users: &[OwnedUserId], event: &EventData) {
        let inner = self.inner.read().await;
        for user_id in users {
            let Some(conn_ids) = inner.user_conns.get(user_id) else {
                continue;
            };
            for conn_id in conn_ids {
                if let Some(conn) = inner.conns.get(conn_id) {
                    let was_invalidated = conn.is_invalidated();
                    conn.push_event(event.clone());
                    SyncMetrics::incr(&self.metrics.events_dispatched);
                    if !was_invalidated && conn.is_invalidated() {
                        SyncMetrics::incr(&self.metrics.queue_overflows);
                    }
                }
            }
        }
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.conns.len()
    }

    /// Drop connections idle for longer than `ttl`.
    pub async fn cleanup_idle(&self, ttl: Duration) {
        let now = utils::millis_since_unix_epoch();
        let ttl_ms = ttl.as_millis() as u64;

        let mut inner = self.inner.write().await;
        let ConnMapInner { conns, user_conns } = &mut *inner;
        conns.retain(|conn_id, conn| {
            let idle = now.saturating_sub(conn.last_activity_ms());
            if idle <= ttl_ms {
                return true;
            }
            if let Some(ids) = user_conns.get_mut(conn.user_id()) {
                ids.remove(conn_id);
                if ids.is_empty() {
                    user_conns.remove(conn.user_id());
                }
            }
            false
        });
        self.metrics
            .active_connections
            .store(conns.len() as u64, std::sync::atomic::Ordering::Relaxed);
        debug!("🧹 cleaned up idle connections, {} active remaining", conns.len());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::sync::room::{SortableRoom, UserRoomData};
    use async_trait::async_trait;
    use ruma::{OwnedRoomId, RoomId};
    use serde_json::{json, Value};

    struct EmptyStore;

    #[async_trait]
    impl ConnStateStore for EmptyStore {
        async fn load(&self, _user_id: &UserId) -> crate::Result<(Vec<OwnedRoomId>, u64)> {
            Ok((Vec::new(), 1))
        }

        async fn load_room(&self, room_id: &RoomId) -> crate::Result<SortableRoom> {
            Err(crate::Error::bad_request(format!("unknown room {room_id}")))
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

    fn conn_id(session: &str) -> ConnId {
        ConnId { session_id: session.to_owned(), device_id: "dev".to_owned() }
    }

    fn user(s: &str) -> OwnedUserId {
        OwnedUserId::try_from(s).unwrap()
    }

    fn event(room: &str) -> EventData {
        EventData {
            room_id: OwnedRoomId::try_from(room).unwrap(),
            event_type: "m.room.message".into(),
            state_key: None,
            content: json!({}),
            event: json!({}),
            timestamp: 1,
            latest_pos: 0,
        }
    }

    fn new_map() -> ConnMap {
        ConnMap::new(Arc::new(EmptyStore), Arc::new(SyncMetrics::default()), 8)
    }

    #[tokio::test]
    async fn test_get_or_create_reuses_until_fresh() {
        let map = new_map();
        let alice = user("@alice:localhost");

        let a = map.get_or_create(conn_id("s"), &alice, true).await;
        let b = map.get_or_create(conn_id("s"), &alice, false).await;
        assert!(Arc::ptr_eq(&a, &b));

        // a fresh request (no pos) discards the old engine state
        let c = map.get_or_create(conn_id("s"), &alice, true).await;
        assert!(!Arc::ptr_eq(&a, &c));
        assert_eq!(map.len().await, 1);
    }

    #[tokio::test]
    async fn test_conn_bound_to_other_user_is_replaced() {
        let map = new_map();
        let a = map.get_or_create(conn_id("s"), &user("@alice:localhost"), false).await;
        let b = map.get_or_create(conn_id("s"), &user("@bob:localhost"), false).await;
        assert!(!Arc::ptr_eq(&a, &b));
        assert_eq!(b.user_id().as_str(), "@bob:localhost");
    }

    #[tokio::test]
    async fn test_dispatch_reaches_only_interested_users() {
        let map = new_map();
        let alice = user("@alice:localhost");
        let bob = user("@bob:localhost");
        map.get_or_create(conn_id("sa"), &alice, true).await;
        map.get_or_create(conn_id("sb"), &bob, true).await;

        map.dispatch(std::slice::from_ref(&alice), &event("!a:localhost")).await;
        assert_eq!(
            map.metrics.events_dispatched.load(std::sync::atomic::Ordering::Relaxed),
            1
        );
    }

    #[tokio::test]
    async fn test_cleanup_idle() {
        let map = new_map();
        let alice = user("@alice:localhost");
        map.get_or_create(conn_id("s"), &alice, true).await;
        assert_eq!(map.len().await, 1);

        map.cleanup_idle(Duration::from_secs(3600)).await;
        assert_eq!(map.len().await, 1);

        map.cleanup_idle(Duration::ZERO).await;
        // a zero TTL can race the clock; allow either but the index must agree
        let inner = map.inner.read().await;
        assert_eq!(
            inner.user_conns.values().map(|s| s.len()).sum::<usize>(),
            inner.conns.len()
        );
    }
}
