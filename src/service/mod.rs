// =============================================================================
// Syncwave Matrix Sliding Sync Proxy - Service Module
// =============================================================================
//
// Project: Syncwave - High Performance Matrix Sliding Sync Proxy
// Author: Syncwave Development Team
// Date: 2026-06-15
// Version: 0.2.0
// License: Apache 2.0
//
// Description:
//   Service orchestration: token verification, per-device poller lifecycle,
//   connection resolution and request dispatch into the engine.
//
// =============================================================================

pub mod sync;
pub mod upstream;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use ruma::OwnedUserId;
use tokio::sync::{watch, Mutex, RwLock};
use tracing::{debug, info, instrument};

use crate::config::Config;
use crate::metrics::SyncMetrics;
use crate::storage::{ConnStateStore, SharedCache};
use crate::utils;
use crate::{Error, Result};

use self::sync::{ConnId, ConnMap, Request, Response};
use self::upstream::{Poller, SyncV2Client};

/// Interval between idle-connection sweeps.
const CLEANUP_INTERVAL: Duration = Duration::from_secs(60);

/// The proxy service: everything behind the HTTP surface.
pub struct SyncService {
    pub config: Config,
    pub metrics: Arc<SyncMetrics>,
    cache: Arc<SharedCache>,
    conns: Arc<ConnMap>,
    client: Arc<dyn SyncV2Client>,

    /// Verified `auth header → user` bindings
    tokens: RwLock<HashMap<String, OwnedUserId>>,

    /// Devices with a live upstream poller
    pollers: Mutex<HashSet<String>>,

    shutdown: watch::Sender<bool>,
}

impl SyncService {
    pub fn new(config: Config, client: Arc<dyn SyncV2Client>) -> Arc<Self> {
        let metrics = Arc::new(SyncMetrics::default());
        let cache = Arc::new(SharedCache::new());
        let conns = Arc::new(ConnMap::new(
            cache.clone() as Arc<dyn ConnStateStore>,
            metrics.clone(),
            config.fan_in_capacity,
        ));
        let (shutdown, _) = watch::channel(false);
        Arc::new(Self {
            config,
            metrics,
            cache,
            conns,
            client,
            tokens: RwLock::new(HashMap::new()),
            pollers: Mutex::new(HashSet::new()),
            shutdown,
        })
    }

    /// Handle one sync v3 request end to end.
    #[instrument(level = "debug", skip_all)]
    pub async fn handle_request(self: &Arc<Self>, auth: &str, req: Request) -> Result<Response> {
        SyncMetrics::incr(&self.metrics.total_requests);
        self.validate(&req)?;

        let user_id = self.resolve_user(auth).await?;
        let device_id = utils::hash_token(auth);
        self.ensure_poller(auth, &user_id, &device_id).await;

        let conn_id = ConnId {
            session_id: req.session_id.clone().unwrap_or_default(),
            device_id,
        };
        let fresh = req.pos.is_none();
        let conn = self.conns.get_or_create(conn_id, &user_id, fresh).await;
        conn.on_incoming_request(&req).await
    }

    /// Signal pollers and maintenance tasks to stop.
    pub fn shutdown(&self) {
        self.shutdown.send_replace(true);
    }

    /// Spawn the periodic idle-connection sweep.
    pub fn spawn_cleanup_task(self: &Arc<Self>) {
        let service = Arc::downgrade(self);
        let mut shutdown = self.shutdown.subscribe();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(CLEANUP_INTERVAL);
            loop {
                tokio::select! {
                    _ = shutdown.changed() => break,
                    _ = ticker.tick() => {}
                }
                let Some(service) = service.upgrade() else { break };
                let ttl = Duration::from_secs(service.config.conn_ttl_s);
                service.conns.cleanup_idle(ttl).await;
            }
        });
    }

    fn validate(&self, req: &Request) -> Result<()> {
        for (room_id, sub) in &req.room_subscriptions {
            if sub.timeline_limit > self.config.max_timeline_limit {
                return Err(Error::bad_request(format!(
                    "room_subscriptions[{room_id}].timeline_limit exceeds maximum {}",
                    self.config.max_timeline_limit
                )));
            }
        }
        Ok(())
    }

    /// Resolve the auth header to a user, caching the upstream answer.
    async fn resolve_user(&self, auth: &str) -> Result<OwnedUserId> {
        if let Some(user_id) = self.tokens.read().await.get(auth) {
            return Ok(user_id.clone());
        }
        let user_id = self.client.who_am_i(auth).await?;
        info!(user_id = %user_id, "🪪 upstream verified a new token");
        self.tokens
            .write()
            .await
            .insert(auth.to_owned(), user_id.clone());
        Ok(user_id)
    }

    /// Start the upstream long-poll loop for this device if not running.
    async fn ensure_poller(self: &Arc<Self>, auth: &str, user_id: &OwnedUserId, device_id: &str) {
        let mut pollers = self.pollers.lock().await;
        if pollers.contains(device_id) {
            return;
        }
        pollers.insert(device_id.to_owned());
        drop(pollers);

        info!(user_id = %user_id, "📡 starting sync v2 poller");
        let poller = Poller::new(
            self.client.clone(),
            self.cache.clone(),
            self.conns.clone(),
            self.metrics.clone(),
            user_id.clone(),
            auth.to_owned(),
        );
        let shutdown_rx = self.shutdown.subscribe();
        let service = Arc::downgrade(self);
        let auth = auth.to_owned();
        let device_id = device_id.to_owned();
        tokio::spawn(async move {
            poller.run(shutdown_rx).await;
            // the poller only exits on shutdown or revoked credentials;
            // either way the token binding is stale now
            if let Some(service) = service.upgrade() {
                service.pollers.lock().await.remove(&device_id);
                service.tokens.write().await.remove(&auth);
                debug!("poller slot released");
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::sync::{ResponseOp, RoomSubscription, SliceRanges};
    use crate::service::upstream::SyncV2Response;
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::VecDeque;

    struct ScriptedClient {
        responses: std::sync::Mutex<VecDeque<SyncV2Response>>,
    }

    #[async_trait]
    impl SyncV2Client for ScriptedClient {
        async fn who_am_i(&self, auth: &str) -> Result<OwnedUserId> {
            if auth.contains("bad") {
                return Err(Error::UpstreamAuth("/whoami returned HTTP 401".to_owned()));
            }
            Ok(OwnedUserId::try_from("@alice:localhost").unwrap())
        }

        async fn do_sync_v2(&self, _auth: &str, _since: &str) -> Result<SyncV2Response> {
            let next = self.responses.lock().unwrap().pop_front();
            match next {
                Some(response) => Ok(response),
                None => futures_util::future::pending().await,
            }
        }
    }

    fn upstream_world() -> SyncV2Response {
        serde_json::from_value(json!({
            "next_batch": "s_1",
            "rooms": {
                "join": {
                    "!a:localhost": {
                        "state": {
                            "events": [{
                                "type": "m.room.member",
                                "state_key": "@alice:localhost",
                                "content": {"membership": "join"},
                            }]
                        },
                        "timeline": {
                            "events": [{
                                "type": "m.room.message",
                                "content": {"body": "hi"},
                                "origin_server_ts": 1000,
                            }]
                        },
                    }
                }
            }
        }))
        .unwrap()
    }

    fn test_service(responses: Vec<SyncV2Response>) -> Arc<SyncService> {
        let config = Config {
            upstream_url: "https://upstream.example".to_owned(),
            ..Config::default()
        };
        SyncService::new(
            config,
            Arc::new(ScriptedClient { responses: std::sync::Mutex::new(responses.into()) }),
        )
    }

    fn window_request() -> Request {
        Request {
            timeout: 10,
            rooms: SliceRanges::new(vec![[0, 9]]),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_request_flows_through_poller_and_engine() {
        let service = test_service(vec![upstream_world()]);

        // first request starts the poller; give it a beat to land the world
        let first = service.handle_request("Bearer ok", window_request()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        let mut req = window_request();
        req.pos = Some(first.pos.clone());
        let second = service.handle_request("Bearer ok", req).await.unwrap();
        assert_eq!(second.count, 1);
        assert!(second
            .ops
            .iter()
            .any(|op| matches!(op, ResponseOp::Sync { .. } | ResponseOp::Insert { .. })));

        service.shutdown();
    }

    #[tokio::test]
    async fn test_bad_token_is_auth_error() {
        let service = test_service(Vec::new());
        let err = service
            .handle_request("Bearer bad", window_request())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::UpstreamAuth(_)));
    }

    #[tokio::test]
    async fn test_timeline_limit_cap_enforced() {
        let service = test_service(Vec::new());
        let mut req = window_request();
        req.room_subscriptions.insert(
            ruma::OwnedRoomId::try_from("!a:localhost").unwrap(),
            RoomSubscription { timeline_limit: 10_000, required_state: Vec::new() },
        );
        let err = service.handle_request("Bearer ok", req).await.unwrap_err();
        match err {
            Error::BadRequest(msg) => assert!(msg.contains("timeline_limit")),
            other => panic!("expected BadRequest, got {other:?}"),
        }
    }
}
