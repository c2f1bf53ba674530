// =============================================================================
// Syncwave Matrix Sliding Sync Proxy - Upstream Client Module
// =============================================================================
//
// Project: Syncwave - High Performance Matrix Sliding Sync Proxy
// Author: Syncwave Development Team
// Date: 2026-06-15
// Version: 0.2.0
// License: Apache 2.0
//
// Description:
//   Sync v2 HTTP client. One client is shared among all users; auth headers
//   are passed through per call and never stored.
//
// =============================================================================

use std::time::Duration;

use async_trait::async_trait;
use http::header::AUTHORIZATION;
use reqwest::StatusCode;
use ruma::{OwnedUserId, UserId};
use serde_json::Value;
use tracing::{debug, instrument};

use crate::{Error, Result};

use super::SyncV2Response;

/// Upstream long-poll timeout threaded into every `/sync` call.
const SYNC_V2_TIMEOUT_MS: u64 = 30_000;

/// The two upstream calls the proxy consumes.
#[async_trait]
pub trait SyncV2Client: Send + Sync {
    /// Resolve the user an auth header belongs to.
    async fn who_am_i(&self, auth: &str) -> Result<OwnedUserId>;

    /// One long-poll round. `since` is the opaque `next_batch` token from
    /// the previous round, empty on the first call.
    async fn do_sync_v2(&self, auth: &str, since: &str) -> Result<SyncV2Response>;
}

/// Sync v2 client backed by `reqwest`.
pub struct HttpClient {
    client: reqwest::Client,
    destination: String,
}

impl HttpClient {
    pub fn new(destination: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent("syncwave-proxy")
            // generous: the upstream itself long-polls for 30s
            .timeout(Duration::from_secs(300))
            .build()
            .map_err(|e| Error::BadConfig(format!("cannot build upstream client: {e}")))?;
        Ok(Self {
            client,
            destination: destination.trim_end_matches('/').to_owned(),
        })
    }
}

fn check_auth_status(status: StatusCode, context: &str) -> Result<()> {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(Error::UpstreamAuth(format!(
            "{context} returned HTTP {status}"
        ))),
        s if !s.is_success() => Err(Error::UpstreamTransport(format!(
            "{context} returned HTTP {status}"
        ))),
        _ => Ok(()),
    }
}

#[async_trait]
impl SyncV2Client for HttpClient {
    #[instrument(level = "debug", skip(self, auth))]
    async fn who_am_i(&self, auth: &str) -> Result<OwnedUserId> {
        let url = format!("{}/_matrix/client/r0/account/whoami", self.destination);
        let res = self
            .client
            .get(url)
            .header(AUTHORIZATION, auth)
            .send()
            .await?;
        check_auth_status(res.status(), "/whoami")?;

        let body: Value = res.json().await?;
        let user_id = body["user_id"]
            .as_str()
            .ok_or_else(|| Error::UpstreamTransport("/whoami response lacked user_id".to_owned()))?;
        let user_id = UserId::parse(user_id)
            .map_err(|e| Error::UpstreamTransport(format!("/whoami returned bad user_id: {e}")))?;
        debug!(user_id = %user_id, "✅ upstream confirmed identity");
        Ok(user_id)
    }

    #[instrument(level = "debug", skip(self, auth, since))]
    async fn do_sync_v2(&self, auth: &str, since: &str) -> Result<SyncV2Response> {
        let mut url = format!(
            "{}/_matrix/client/r0/sync?timeout={SYNC_V2_TIMEOUT_MS}",
            self.destination
        );
        if !since.is_empty() {
            url.push_str("&since=");
            url.push_str(since);
        }
        let res = self
            .client
            .get(url)
            .header(AUTHORIZATION, auth)
            .send()
            .await?;
        check_auth_status(res.status(), "/sync")?;

        let response: SyncV2Response = res
            .json()
            .await
            .map_err(|e| Error::UpstreamTransport(format!("/sync body decode failed: {e}")))?;
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auth_statuses_map_to_error_kinds() {
        assert!(check_auth_status(StatusCode::OK, "/sync").is_ok());
        assert!(matches!(
            check_auth_status(StatusCode::UNAUTHORIZED, "/sync"),
            Err(Error::UpstreamAuth(_))
        ));
        assert!(matches!(
            check_auth_status(StatusCode::FORBIDDEN, "/whoami"),
            Err(Error::UpstreamAuth(_))
        ));
        assert!(matches!(
            check_auth_status(StatusCode::BAD_GATEWAY, "/sync"),
            Err(Error::UpstreamTransport(_))
        ));
    }

    #[test]
    fn test_destination_trailing_slash_trimmed() {
        let client = HttpClient::new("https://matrix.example.org/").unwrap();
        assert_eq!(client.destination, "https://matrix.example.org");
    }
}
