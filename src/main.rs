//! Ship Arena Server - authoritative simulation for a multiplayer asteroid arena
//!
//! This is the main entry point. It handles:
//! - WebSocket connections for game pages and stats pages
//! - The game session task that owns the world
//! - HTTP health and telemetry export endpoints

use std::net::SocketAddr;
use std::sync::Arc;

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use tokio::net::TcpListener;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use ship_arena_server::app::AppState;
use ship_arena_server::config::Config;
use ship_arena_server::game::agent::FixedControllerPool;
use ship_arena_server::game::{GameSession, SessionConfig, SessionStats, World};
use ship_arena_server::http::build_router;
use ship_arena_server::ws::ClientHub;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let config = Config::from_env()?;

    init_tracing(&config.log_level, config.log_json);

    info!("Starting Ship Arena Server");
    info!("Server address: {}", config.server_addr);

    let seed = config.world_seed.unwrap_or_else(rand::random);
    info!(seed, tick_rate = config.tick_rate, sync_rate = config.sync_rate, "World seed chosen");

    let telemetry = Arc::new(SessionStats::new());
    let mut world = World::new(
        config.sim.clone(),
        ChaCha8Rng::seed_from_u64(seed),
        telemetry.clone(),
    );
    let mut pool = FixedControllerPool::new(ChaCha8Rng::seed_from_u64(seed.wrapping_add(1)));
    world.populate(&mut pool);

    let hub = Arc::new(ClientHub::new());
    let (session, handle) = GameSession::new(
        SessionConfig::from_config(&config),
        world,
        Box::new(pool),
        hub.clone(),
    );
    tokio::spawn(session.run());

    let config = Arc::new(config);
    let state = AppState::new(config.clone(), handle, hub, telemetry);
    let router = build_router(state);

    let addr: SocketAddr = config.server_addr;
    let listener = TcpListener::bind(addr).await?;

    info!("Server listening on {}", addr);
    info!("Health check: http://{}/health", addr);
    info!("WebSocket endpoint: ws://{}/ws", addr);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server shutdown complete");
    Ok(())
}

/// Initialize tracing/logging
fn init_tracing(log_level: &str, json: bool) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level));

    let registry = tracing_subscriber::registry().with(env_filter);
    if json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_target(true))
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_target(true))
            .init();
    }
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install signal handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, starting graceful shutdown");
        }
        _ = terminate => {
            info!("Received terminate signal, starting graceful shutdown");
        }
    }
}
