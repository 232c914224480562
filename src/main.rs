//! roundproxy
//!
//! A round-robin reverse-proxy load balancer built with Tokio and Axum.
//!
//! # Architecture Overview
//!
//! ```text
//!                              ┌──────────────────────────────────────────────┐
//!                              │                  ROUNDPROXY                  │
//!     Client Request           │  ┌─────────┐    ┌──────────────────────┐     │
//!     ─────────────────────────┼─▶│  http   │───▶│ pool.select()        │     │
//!                              │  │ server  │    │ round robin, healthy │     │
//!                              │  └─────────┘    └──────────┬───────────┘     │
//!                              │                            ▼                 │
//!     Client Response          │  ┌─────────┐    ┌──────────────────────┐     │
//!     ◀────────────────────────┼──│ stream  │◀───│ backend.forward()    │◀────┼──── Upstream
//!                              │  └─────────┘    └──────────────────────┘     │
//!                              │                                              │
//!                              │  per backend: heartbeat → GET /health        │
//!                              │  admin API: add / remove (drain) / status    │
//!                              └──────────────────────────────────────────────┘
//! ```

mod demo;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio::net::TcpListener;

use roundproxy::admin::{self, AdminState};
use roundproxy::config::{load_config, watcher::ConfigWatcher, ProxyConfig};
use roundproxy::lifecycle::{signals::shutdown_signal, startup, Shutdown};
use roundproxy::observability::{logging, metrics};
use roundproxy::{BackendPool, HttpServer};

#[derive(Parser)]
#[command(name = "roundproxy", version)]
#[command(about = "Round-robin reverse-proxy load balancer", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the load balancer
    Serve {
        /// TOML configuration file; defaults apply when omitted
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Reconcile backends whenever the configuration file changes
        #[arg(long, requires = "config")]
        watch: bool,
    },
    /// Run against local mock upstreams with flapping health
    Demo(demo::DemoArgs),
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    match cli.command {
        Command::Serve { config, watch } => serve(config, watch).await,
        Command::Demo(args) => {
            logging::init("info");
            demo::run(args).await
        }
    }
}

async fn serve(path: Option<PathBuf>, watch: bool) -> Result<(), Box<dyn std::error::Error>> {
    let config = match &path {
        Some(path) => load_config(path)?,
        None => ProxyConfig::default(),
    };

    logging::init(&config.observability.log_level);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "roundproxy starting");
    tracing::info!(
        bind_address = %config.listener.bind_address,
        backends = config.backends.len(),
        health_interval_secs = config.health_check.interval_secs,
        request_timeout_secs = config.timeouts.request_secs,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => {
                let health_interval = Duration::from_secs(config.health_check.interval_secs);
                if let Err(e) = metrics::init_metrics(addr, health_interval) {
                    tracing::error!(error = %e, "Failed to start metrics endpoint");
                }
            }
            Err(e) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                error = %e,
                "Failed to parse metrics address"
            ),
        }
    }

    let pool = Arc::new(BackendPool::new());
    let registered = startup::register_backends(&pool, &config).await;
    tracing::info!(registered, healthy = pool.healthy_count(), "Backends registered");

    // Every receiver exists before the signal task can fire, so no
    // component starts after a missed trigger.
    let shutdown = Arc::new(Shutdown::new());
    let server_shutdown = shutdown.subscribe();
    let admin_shutdown = shutdown.subscribe();
    let mut reload_shutdown = shutdown.subscribe();
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            shutdown_signal().await;
            shutdown.trigger();
        });
    }

    if config.admin.enabled {
        let listener = TcpListener::bind(&config.admin.bind_address).await?;
        let state = AdminState {
            pool: pool.clone(),
            api_key: Arc::from(config.admin.api_key.as_str()),
            health_check: config.health_check.clone(),
        };
        tokio::spawn(async move {
            if let Err(e) = admin::serve(listener, state, admin_shutdown).await {
                tracing::error!(error = %e, "Admin API failed");
            }
        });
    }

    // Keep the watcher handle alive for the lifetime of the server.
    let _watcher = match (watch, &path) {
        (true, Some(path)) => {
            let (watcher, mut updates) = ConfigWatcher::new(path, &config);
            let handle = watcher.run()?;
            let pool = pool.clone();
            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        update = updates.recv() => match update {
                            Some(new_config) => {
                                startup::reconcile(&pool, &new_config).await;
                            }
                            None => break,
                        },
                        _ = reload_shutdown.recv() => break,
                    }
                }
            });
            Some(handle)
        }
        _ => None,
    };

    let listener = TcpListener::bind(&config.listener.bind_address).await?;
    tracing::info!(address = %listener.local_addr()?, "Listening for connections");

    let server = HttpServer::new(&config, pool);
    server.run(listener, server_shutdown).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
