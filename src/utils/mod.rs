// =============================================================================
// Syncwave Matrix Sliding Sync Proxy - Utils Module
// =============================================================================
//
// Project: Syncwave - High Performance Matrix Sliding Sync Proxy
// Author: Syncwave Development Team
// Date: 2026-06-15
// Version: 0.2.0
// License: Apache 2.0
//
// Description:
//   Small shared helpers: identifier generation, token hashing and time.
//
// =============================================================================

pub mod error;

use std::time::{SystemTime, UNIX_EPOCH};

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use rand::{distributions::Alphanumeric, thread_rng, Rng};
use sha2::{Digest, Sha256};

/// Generate a random alphanumeric string of the given length.
pub fn random_string(length: usize) -> String {
    thread_rng()
        .sample_iter(&Alphanumeric)
        .take(length)
        .map(char::from)
        .collect()
}

/// Derive a stable device identifier from an access token.
///
/// The raw token never leaves this function; connections are keyed on the
/// digest so logs and internal maps cannot leak credentials.
pub fn hash_token(token: &str) -> String {
    let digest = Sha256::digest(token.as_bytes());
    URL_SAFE_NO_PAD.encode(digest)
}

/// Milliseconds since the unix epoch.
pub fn millis_since_unix_epoch() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}
