// Commander picker entry point.
//
// Startup sequence:
// 1. Initialize tracing
// 2. Load config (copying defaults on first run)
// 3. Connect the Google Sheets store (fails fast on a bad sheet)
// 4. Build the draft coordinator and Scryfall client
// 5. Serve the HTTP API until ctrl-c

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use tracing::{info, warn};

use commander_picker::config;
use commander_picker::draft::coordinator::DraftCoordinator;
use commander_picker::scryfall::ScryfallClient;
use commander_picker::server::{self, AppState};
use commander_picker::store::sheets::SheetsStore;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 1. Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();
    info!("commander picker starting up");

    // 2. Load config
    let config = config::load_config().context("failed to load configuration")?;
    info!(
        port = config.server.port,
        worksheet = %config.sheet.worksheet,
        cache_ttl_secs = config.sheet.cache_ttl_secs,
        "config loaded"
    );
    if config.credentials.admin_secret.is_none() {
        warn!("no admin secret configured; pool reset is disabled");
    }

    // 3. Connect the store. This validates the sheet's header row, so a
    // misconfigured pool stops the process here instead of failing picks.
    let store = SheetsStore::connect(&config)
        .await
        .context("failed to connect to the card pool sheet")?;

    // 4. Coordinator and image client
    let state = AppState {
        coordinator: Arc::new(DraftCoordinator::new(Arc::new(store), config.retry)),
        scryfall: Arc::new(ScryfallClient::new(&config.scryfall)),
        admin_secret: config.credentials.admin_secret.clone(),
    };
    let app = server::router(state);

    // 5. Serve
    let addr: SocketAddr = format!("0.0.0.0:{}", config.server.port).parse()?;
    info!(%addr, "starting server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("server stopped");
    Ok(())
}

async fn shutdown_signal() {
    tokio::signal::ctrl_c().await.ok();
    info!("received shutdown signal");
}
