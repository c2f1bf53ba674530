// =============================================================================
// Syncwave Matrix Sliding Sync Proxy - Config Module
// =============================================================================
//
// Project: Syncwave - High Performance Matrix Sliding Sync Proxy
// Author: Syncwave Development Team
// Date: 2026-06-15
// Version: 0.2.0
// License: Apache 2.0
//
// Description:
//   Proxy configuration, loaded from a TOML file merged with SYNCWAVE_
//   prefixed environment variables and CLI overrides.
//
// =============================================================================

use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Configuration structure for the Syncwave proxy
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    /// Base URL of the destination sync v2 homeserver, e.g. `https://matrix.example.org`
    pub upstream_url: String,

    /// Bind address for the sync v3 listener
    pub address: IpAddr,
    pub port: u16,

    /// Database connection string, threaded through to the persistence layer
    pub database_url: Option<String>,

    /// Optional port serving runtime metrics for profiling
    pub profiling_port: Option<u16>,

    /// Log filter, `tracing_subscriber::EnvFilter` syntax
    pub log: String,

    /// Per-connection fan-in buffer capacity; overflow invalidates the session
    pub fan_in_capacity: usize,

    /// Idle connections are expired after this many seconds
    pub conn_ttl_s: u64,

    /// Hard cap on client-requested timeline limits
    pub max_timeline_limit: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            upstream_url: String::new(),
            address: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: 8008,
            database_url: None,
            profiling_port: None,
            log: "info".to_owned(),
            fan_in_capacity: crate::service::sync::FAN_IN_CAPACITY,
            conn_ttl_s: 1800,
            max_timeline_limit: 50,
        }
    }
}

impl Config {
    /// Load configuration from an optional TOML file and the environment.
    pub fn load(config_path: Option<&str>) -> Result<Config> {
        let mut figment = Figment::from(Serialized::defaults(Config::default()));
        if let Some(path) = config_path {
            figment = figment.merge(Toml::file(path));
        }
        figment
            .merge(Env::prefixed("SYNCWAVE_").global())
            .extract()
            .map_err(|e| Error::BadConfig(e.to_string()))
    }

    /// Fatal start-up validation. A proxy without an upstream is useless.
    pub fn validate(&self) -> Result<()> {
        if self.upstream_url.is_empty() {
            return Err(Error::BadConfig(
                "upstream_url must be set (config file, SYNCWAVE_UPSTREAM_URL or --server)".to_owned(),
            ));
        }
        url::Url::parse(&self.upstream_url)
            .map_err(|e| Error::BadConfig(format!("upstream_url is not a valid URL: {e}")))?;
        if self.fan_in_capacity == 0 {
            return Err(Error::BadConfig("fan_in_capacity must be non-zero".to_owned()));
        }
        Ok(())
    }

    pub fn bind_addr(&self) -> SocketAddr {
        SocketAddr::new(self.address, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.port, 8008);
        assert_eq!(config.fan_in_capacity, 512);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_with_upstream() {
        let config = Config {
            upstream_url: "https://matrix.example.org".to_owned(),
            ..Config::default()
        };
        assert!(config.validate().is_ok());
        assert_eq!(config.bind_addr().port(), 8008);
    }
}
