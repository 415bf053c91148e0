// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
use exposure_node::config::NodeConfig;
use exposure_node::engine::Engine;
use exposure_node::retry::retry_with_backoff;
use exposure_node::server::{build_router, SharedEngine};
use exposure_node::telemetry;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;

#[tokio::main]
async fn main() {
    telemetry::init_telemetry();

    let cfg = match NodeConfig::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            tracing::error!("Bad configuration: {}", e);
            std::process::exit(2);
        }
    };
    tracing::info!("Initializing exposure node with config: {:?}", RedactedConfig(&cfg));

    let engine: SharedEngine = match Engine::open(&cfg) {
        Ok(engine) => Arc::new(engine),
        Err(e) => {
            tracing::error!("Failed to open data directory {:?}: {}", cfg.data_dir, e);
            std::process::exit(1);
        }
    };

    // Retention sweep task
    if cfg.sweep_interval_secs > 0 {
        let engine = engine.clone();
        let period = Duration::from_secs(cfg.sweep_interval_secs);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            loop {
                interval.tick().await;
                tracing::debug!("Running retention sweep");
                let result = retry_with_backoff(3, Duration::from_millis(250), |e: &exposure_node::errors::EngineError| e.is_transient(), || {
                    let engine = engine.clone();
                    async move { tokio::task::spawn_blocking(move || engine.sweep()).await? }
                })
                .await;
                if let Err(e) = result {
                    tracing::error!("Retention sweep failed: {}", e);
                }
            }
        });
    }

    let app = build_router(engine, cfg.auth_token.clone());

    let addr = cfg.bind_addr;
    tracing::info!("Listening on {}", addr);
    let listener = match TcpListener::bind(addr).await {
        Ok(l) => l,
        Err(e) => {
            tracing::error!("Failed to bind {}: {}", addr, e);
            std::process::exit(1);
        }
    };
    if let Err(e) = axum::serve(listener, app).await {
        tracing::error!("Server error: {}", e);
    }
}

/// Debug view of the config without secrets.
struct RedactedConfig<'a>(&'a NodeConfig);

impl std::fmt::Debug for RedactedConfig<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let cfg = self.0;
        f.debug_struct("NodeConfig")
            .field("data_dir", &cfg.data_dir)
            .field("bind_addr", &cfg.bind_addr)
            .field("auth", &cfg.auth_token.is_some())
            .field("retention_secs", &cfg.retention_secs)
            .field("sweep_interval_secs", &cfg.sweep_interval_secs)
            .field("scan_interval_secs", &cfg.scan_interval_secs)
            .field("ids_per_key", &cfg.ids_per_key)
            .field("segment_max_bytes", &cfg.segment_max_bytes)
            .finish()
    }
}
