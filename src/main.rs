//! request-guards server
//!
//! Serves a static directory behind the guard stack.
//!
//! ```text
//!     Client ──▶ net::Listener ──▶ http::HttpServer (hyper-util auto)
//!                                      │
//!                                      ▼
//!                  admission → query string → idle timeout → bandwidth
//!                                      │
//!                                      ▼
//!                              axum Router (/health, files)
//!
//!     config file ──▶ ConfigWatcher ──▶ SharedLimits (read per decision)
//! ```

use std::path::PathBuf;

use clap::Parser;

use request_guards::config::{load_config, ConfigWatcher, GuardConfig, SharedLimits};
use request_guards::http::{app, GuardStack, HttpServer};
use request_guards::lifecycle::{shutdown_on_signal, Shutdown};
use request_guards::net::Listener;
use request_guards::observability::{logging, metrics};

#[derive(Parser)]
#[command(name = "request-guards")]
#[command(about = "HTTP server guarded by concurrency, bandwidth, query-string and idle limits", long_about = None)]
struct Cli {
    /// TOML configuration file; watched for limit changes
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Overrides listener.bind_address
    #[arg(short, long)]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => load_config(path)?,
        None => GuardConfig::default(),
    };
    if let Some(bind) = cli.bind {
        config.listener.bind_address = bind;
    }

    logging::init_logging(&config.observability);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "request-guards starting");

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr)?,
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let limits = SharedLimits::new(config.limits.clone());
    tracing::info!(
        max_concurrent_requests = config.limits.max_concurrent_requests,
        max_query_string_length = config.limits.max_query_string_length,
        max_bandwidth_bytes_per_second = config.limits.max_bandwidth_bytes_per_second,
        bandwidth_scope = ?config.limits.bandwidth_scope,
        connection_timeout_ms = config.limits.connection_timeout_ms,
        "Limits loaded"
    );

    // Held for the process lifetime; dropping it stops the file watch.
    let _watcher = match &cli.config {
        Some(path) => {
            let (watcher, mut updates) = ConfigWatcher::new(path);
            let watcher = watcher.run()?;
            let live = limits.clone();
            tokio::spawn(async move {
                while let Some(updated) = updates.recv().await {
                    tracing::info!("Applying reloaded limits");
                    live.store(updated.limits);
                }
            });
            Some(watcher)
        }
        None => None,
    };

    let guards = GuardStack::new(&limits, config.limits.bandwidth_scope);
    let router = app::router(&config.app, guards.controller().clone());
    let server = HttpServer::new(guards.service(router));

    let listener = Listener::bind(&config.listener).await?;

    let shutdown = Shutdown::new();
    tokio::spawn(shutdown_on_signal(shutdown.clone()));

    server.run(listener, shutdown).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
