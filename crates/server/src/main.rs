use std::sync::Arc;

use anyhow::Context;
use voxelsrv_server::block;
use voxelsrv_server::config::{self, ServerConfig};
use voxelsrv_server::net::{self, ServerState};
use voxelsrv_server::persistence::JsonPaletteStore;
use voxelsrv_server::registry::BlockRegistry;
use voxelsrv_server::world_manager::WorldManager;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args: Vec<String> = std::env::args().collect();
    let config_path = config::flag_value(&args, "--config").unwrap_or(config::DEFAULT_CONFIG_PATH);
    let mut config = ServerConfig::load(config_path)?;
    config.apply_args(&args);

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .or_else(|_| tracing_subscriber::EnvFilter::try_new(&config.logging.level))
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    tracing::info!("voxelsrv starting (config {})", config_path);

    // ── Block registry ───────────────────────────────────────────────────
    let world_dir = config.world.worlds_dir.join(&config.world.name);
    let mut registry = BlockRegistry::new(Box::new(JsonPaletteStore::in_world(&world_dir)));
    block::register_defaults(&mut registry)?;
    registry.load_palette()?;
    registry.finalize()?;
    let terrain = block::terrain_blocks(&registry)?;
    let registry = Arc::new(registry);

    // ── Worlds ───────────────────────────────────────────────────────────
    let manager = WorldManager::new(
        config.world.worlds_dir.clone(),
        terrain,
        config.storage.store_settings(),
    )
    .with_palette(registry.palette());
    let world = manager
        .load_or_create(config.world.world_config())
        .await
        .with_context(|| format!("opening world '{}'", config.world.name))?;

    // ── Listener with graceful shutdown ──────────────────────────────────
    let state = Arc::new(ServerState::new(Arc::clone(&registry), world));
    let signal = {
        let state = Arc::clone(&state);
        async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to listen for Ctrl+C: {}", e);
                return std::future::pending().await;
            }
            tracing::info!("Ctrl+C received, shutting down...");
            // Upgraded sockets outlive the listener; close them explicitly.
            state.close_sessions();
        }
    };
    if let Err(e) = net::listener::run(Arc::clone(&state), &config.server.bind, signal).await {
        tracing::error!("Server error: {:#}", e);
    }

    state.close_sessions();
    manager.shutdown_all().await;
    tracing::info!("Shutdown complete");
    Ok(())
}
