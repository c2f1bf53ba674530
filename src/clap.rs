// =============================================================================
// Syncwave Matrix Sliding Sync Proxy - Clap Module
// =============================================================================
//
// Project: Syncwave - High Performance Matrix Sliding Sync Proxy
// Author: Syncwave Development Team
// Date: 2026-06-15
// Version: 0.2.0
// License: Apache 2.0
//
// Description:
//   Command line argument parsing for the proxy binary.
//
// =============================================================================

use std::path::PathBuf;

use clap::Parser;

/// Returns the current version of the crate with extra info if supplied
///
/// Set the environment variable `SYNCWAVE_VERSION_EXTRA` to any UTF-8 string
/// to include it in parenthesis after the SemVer version. A common value are
/// git commit hashes.
pub fn version() -> String {
    let cargo_pkg_version = env!("CARGO_PKG_VERSION");

    match option_env!("SYNCWAVE_VERSION_EXTRA") {
        Some(x) => format!("{} ({})", cargo_pkg_version, x),
        None => cargo_pkg_version.to_owned(),
    }
}

/// Syncwave - Matrix sliding sync proxy
///
/// Sits in front of a legacy long-poll sync v2 homeserver and re-exposes a
/// windowed, incrementally-diffed sync v3 API.
#[derive(Parser, Debug, Clone, PartialEq, Eq)]
#[clap(about, version, name = "syncwave")]
pub struct Args {
    /// Path to configuration file
    #[clap(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Destination sync v2 homeserver URL (overrides config)
    #[clap(long)]
    pub server: Option<String>,

    /// Bind address (overrides config)
    #[clap(long)]
    pub address: Option<String>,

    /// Bind port (overrides config)
    #[clap(long)]
    pub port: Option<u16>,

    /// Database connection string (overrides config)
    #[clap(long)]
    pub db: Option<String>,

    /// Serve runtime metrics on this port for profiling
    #[clap(long)]
    pub profiling_port: Option<u16>,

    /// Log filter override (tracing EnvFilter syntax)
    #[clap(short, long)]
    pub log_level: Option<String>,
}

/// Parse CLI arguments
pub fn parse() -> Args {
    Args::parse()
}
