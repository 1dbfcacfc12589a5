use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use hollowmaze::config::GameConfig;
use hollowmaze::game::GameServer;
use hollowmaze::transports;

#[cfg(feature = "jemalloc")]
mod allocator {
    #[cfg(not(target_env = "msvc"))]
    use tikv_jemallocator::Jemalloc;
    #[cfg(not(target_env = "msvc"))]
    #[global_allocator]
    static GLOBAL: Jemalloc = Jemalloc;
}

const PLAYER_CLEANUP_INTERVAL: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ================
    //      Tracing
    // ================
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("{}=info,tower_http=debug", env!("CARGO_CRATE_NAME")).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = GameConfig::from_env()?;
    info!(
        host = %config.server.host,
        port = config.server.port,
        maze_size = config.maze.size,
        maze_seed = config.maze.seed,
        max_objects = config.spawn.max_objects,
        "Configuration loaded"
    );

    // Single owner of all game state; everything else borrows through the Arc
    let server = Arc::new(GameServer::new(config)?);

    let tick = tokio::spawn(server.clone().run_tick_task());

    let player_cleanup = tokio::spawn(server.clone().run_player_cleanup_task(PLAYER_CLEANUP_INTERVAL));

    let http = tokio::spawn(transports::https::serve(server.clone()));

    info!("Hollowmaze v{}", env!("CARGO_PKG_VERSION"));

    tokio::select! {
        result = http => {
            match result {
                Ok(Err(e)) => error!(error = %e, "HTTP server failed"),
                Err(e) => error!(error = %e, "HTTP server task panicked"),
                Ok(Ok(())) => info!("HTTP server stopped"),
            }
        },
        _ = tick => {
            error!("Game tick task terminated unexpectedly");
        },
        _ = player_cleanup => {
            error!("Player cleanup task terminated unexpectedly");
        },
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown signal received");
        }
    }

    Ok(())
}
