// =============================================================================
// Syncwave Matrix Sliding Sync Proxy - Main Entry Point
// =============================================================================
//
// Project: Syncwave - High Performance Matrix Sliding Sync Proxy
// Author: Syncwave Development Team
// Date: 2026-06-15
// Version: 0.2.0
// License: Apache 2.0
//
// Description:
//   Binary entry point: configuration assembly, logging initialisation,
//   listener setup and graceful shutdown.
//
// Architecture:
//   • One tokio task per inbound HTTP request
//   • One upstream poller task per authenticated device
//   • Shared room cache behind a reader-writer lock
//
// =============================================================================

use std::net::SocketAddr;
use std::sync::Arc;

use syncwave::api;
use syncwave::service::upstream::HttpClient;
use syncwave::{Config, SyncService};
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{prelude::*, EnvFilter};

mod clap;

#[tokio::main(flavor = "multi_thread")]
async fn main() {
    let args = clap::parse();

    let mut config = match Config::load(args.config.as_deref().and_then(|p| p.to_str())) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("It looks like your config is invalid. The following error occurred: {e}");
            std::process::exit(1);
        }
    };

    // CLI overrides beat the config file and environment
    if let Some(server) = args.server {
        config.upstream_url = server;
    }
    if let Some(address) = args.address {
        match address.parse() {
            Ok(addr) => config.address = addr,
            Err(_) => {
                eprintln!("Invalid bind address: {address}");
                std::process::exit(1);
            }
        }
    }
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(db) = args.db {
        config.database_url = Some(db);
    }
    if let Some(port) = args.profiling_port {
        config.profiling_port = Some(port);
    }
    if let Some(log) = args.log_level {
        config.log = log;
    }

    init_tracing(&config);
    info!("🚀 Starting Syncwave Matrix Sliding Sync Proxy v{}", clap::version());

    if let Err(e) = config.validate() {
        error!("❌ {e}");
        std::process::exit(1);
    }

    let client = match HttpClient::new(&config.upstream_url) {
        Ok(client) => Arc::new(client),
        Err(e) => {
            error!("❌ {e}");
            std::process::exit(1);
        }
    };

    info!("📡 upstream sync v2 server: {}", config.upstream_url);
    let service = SyncService::new(config.clone(), client);
    service.spawn_cleanup_task();

    if let Some(port) = config.profiling_port {
        let addr = SocketAddr::new(config.address, port);
        let router = api::profiling_router(service.clone());
        tokio::spawn(async move {
            match TcpListener::bind(addr).await {
                Ok(listener) => {
                    info!("🔍 profiling endpoint on http://{addr}/metrics");
                    if let Err(e) = axum::serve(listener, router).await {
                        error!("profiling listener failed: {e}");
                    }
                }
                Err(e) => error!("cannot bind profiling port {addr}: {e}"),
            }
        });
    }

    let addr = config.bind_addr();
    let listener = match TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("❌ cannot bind {addr}: {e}");
            std::process::exit(1);
        }
    };
    info!("✅ listening on http://{addr}/sync");

    let router = api::router(service.clone());
    let serve = axum::serve(listener, router).with_graceful_shutdown(shutdown_signal());
    if let Err(e) = serve.await {
        error!("server error: {e}");
        service.shutdown();
        std::process::exit(1);
    }

    service.shutdown();
    info!("👋 shut down cleanly");
}

fn init_tracing(config: &Config) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

async fn shutdown_signal() {
    if let Err(e) = signal::ctrl_c().await {
        error!("cannot listen for shutdown signal: {e}");
        return;
    }
    info!("🛑 shutdown signal received");
}
