/**
 * KAPUA KERNEL - Point d'entrée du client Kapua résilient
 *
 * RÔLE : Bootstrap: config, logging, client Kapua, authentification initiale
 * puis front door HTTP du catalogue de ressources.
 *
 * ARCHITECTURE : session auto-renouvelée + appels REST uniformes + rapport de
 * santé de flotte agrégé à la demande.
 */

mod models;
mod state;
mod config;
mod clock;
mod error;
mod session;
mod client;
mod devices;
mod classifier;
mod fleet_health;
mod resources;
mod http;

use crate::client::KapuaClient;
use crate::clock::{SharedClock, SystemClock};
use crate::config::load_config;
use crate::http::AppState;
use crate::resources::KapuaResources;

use anyhow::Context;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

fn init_tracing() {
    // RUST_LOG prioritaire, puis LOG_LEVEL, puis info
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".into())))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Charger les variables d'environnement depuis .env (si présent)
    dotenvy::dotenv().ok();
    init_tracing();

    let cfg = load_config().await.context("invalid configuration")?;
    info!("kapua endpoint {} (user {})", cfg.kapua.api_endpoint, cfg.kapua.username);

    let clock: SharedClock = Arc::new(SystemClock);
    let client = Arc::new(KapuaClient::new(&cfg.kapua, clock.clone()).context("failed to build kapua client")?);

    // sans session initiale le kernel ne sert à rien
    client
        .quick_authenticate()
        .await
        .context("initial authentication failed")?;

    let app_state = AppState {
        resources: KapuaResources::new(client, clock),
        api_key: cfg.server.api_key.as_deref().map(Arc::from),
    };
    let app = http::build_router(app_state);

    let addr = format!("{}:{}", cfg.server.host, cfg.server.port);
    let listener = TcpListener::bind(&addr).await.with_context(|| format!("failed to bind {addr}"))?;
    info!("listening on http://{addr}");
    axum::serve(listener, app).await.context("http server failed")?;
    Ok(())
}
