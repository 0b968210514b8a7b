#![cfg_attr(not(test), deny(clippy::panic))]

use clap::Parser;
use parlor_server::broadcast::LocalFanout;
use parlor_server::config;
use parlor_server::dedup::DedupStore;
use parlor_server::dispatcher::Dispatcher;
use parlor_server::logging;
use parlor_server::metrics::EngineMetrics;
use parlor_server::rate_limit::RateLimiter;
use parlor_server::reconnect::ReconnectRegistry;
use parlor_server::room::RuntimeServices;
use parlor_server::security_log::SecurityLog;
use parlor_server::storage::NoopStore;
use parlor_server::websocket::{self, AppState};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

/// Parlor -- authoritative real-time engine for multi-room party games
#[derive(Parser, Debug)]
#[command(name = "parlor-server")]
#[command(about = "Authoritative real-time room engine for a multi-room party-game server")]
#[command(version)]
struct Cli {
    /// Validate configuration and exit without starting the server.
    /// Useful for CI/CD pipelines and pre-deployment checks.
    #[arg(long, short = 'c', conflicts_with = "print_config")]
    validate_config: bool,

    /// Print the loaded configuration to stdout (as JSON) and exit.
    #[arg(long, conflicts_with = "validate_config")]
    print_config: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration from config.json if present; otherwise use
    // code defaults with environment overrides.
    let cfg = Arc::new(config::load());

    if cli.print_config {
        let json = serde_json::to_string_pretty(&*cfg)
            .map_err(|e| anyhow::anyhow!("Failed to serialize config: {e}"))?;
        println!("{json}");
        return Ok(());
    }

    let validation_result = config::validate(&cfg);
    if cli.validate_config {
        match validation_result {
            Ok(()) => {
                println!("Configuration validation passed");
                println!();
                println!("Configuration summary:");
                println!("  Port: {}", cfg.port);
                println!("  Room code length: {}", cfg.protocol.room.room_code_length);
                println!("  Room expiration: {}h", cfg.protocol.room.expiration_hours);
                println!("  Max players per room: {}", cfg.protocol.room.max_players);
                println!("  Replay buffer capacity: {}", cfg.sync.replay_buffer_capacity);
                println!("  ACK timeout: {}ms", cfg.sync.ack_timeout_ms);
                println!("  Fan-out adapter: {}", fanout_label(&cfg));
                return Ok(());
            }
            Err(report) => {
                eprintln!("Configuration validation failed:\n{report}");
                std::process::exit(1);
            }
        }
    }
    if let Err(report) = validation_result {
        anyhow::bail!("invalid configuration:\n{report}");
    }

    // The guard flushes buffered file output when main returns
    let _log_guard = logging::init_with_config(&cfg.logging);

    let addr = SocketAddr::from(([0, 0, 0, 0], cfg.port));
    tracing::info!(%addr, "Starting Parlor server");

    if cfg.redis_url.is_some() {
        // The engine only requires that broadcasts reach every
        // connection in a room; a shared pub/sub adapter slots in at
        // the Fanout seam when instances must reach each other.
        tracing::warn!(
            "REDIS_URL is set but this build ships the in-process fan-out adapter only"
        );
    }

    // Shared singletons, injected explicitly
    let metrics = Arc::new(EngineMetrics::new());
    let security = Arc::new(SecurityLog::default());
    let fanout = Arc::new(LocalFanout::new());
    let dedup = DedupStore::new(
        parlor_server::dedup::DEFAULT_CAPACITY,
        cfg.sync.dedup_ttl(),
        metrics.clone(),
    );
    let reconnect = Arc::new(ReconnectRegistry::new(Duration::from_secs(
        cfg.sync.reconnect_token_ttl_secs,
    )));
    let store = Arc::new(NoopStore);
    let rate_limiter = Arc::new(RateLimiter::new(cfg.rate_limits.clone(), metrics.clone()));

    let services = RuntimeServices {
        config: cfg.clone(),
        fanout: fanout.clone(),
        dedup,
        reconnect,
        security: security.clone(),
        metrics: metrics.clone(),
        store,
    };

    let dispatcher = Arc::new(Dispatcher::new(services, rate_limiter.clone()));
    dispatcher.restore_from_storage().await;
    dispatcher.spawn_gc();

    let app_state = Arc::new(AppState {
        config: cfg.clone(),
        dispatcher: dispatcher.clone(),
        fanout,
        rate_limiter,
        metrics,
        security,
    });

    let router = websocket::create_router(app_state).layer(build_cors(&cfg.cors_origins));

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(
        %addr,
        cors_origins = %cfg.cors_origins,
        "Server started - WebSocket: /ws, Metrics: /metrics, Schema: /schema"
    );

    let drain = Duration::from_secs(cfg.shutdown_drain_secs);
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Draining room queues");
    dispatcher.shutdown(drain).await;

    Ok(())
}

fn fanout_label(cfg: &config::Config) -> &'static str {
    if cfg.redis_url.is_some() {
        "shared pub/sub (configured)"
    } else {
        "in-process"
    }
}

fn build_cors(origins: &str) -> tower_http::cors::CorsLayer {
    use tower_http::cors::{Any, CorsLayer};

    if origins == "*" {
        return CorsLayer::permissive();
    }
    let parsed: Vec<_> = origins
        .split(',')
        .filter_map(|origin| origin.trim().parse::<axum::http::HeaderValue>().ok())
        .collect();
    if parsed.is_empty() {
        tracing::warn!("No valid CORS origins configured, using permissive CORS");
        CorsLayer::permissive()
    } else {
        CorsLayer::new()
            .allow_origin(parsed)
            .allow_methods(Any)
            .allow_headers(Any)
    }
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("Shutdown signal received");
}
