//! anycast-atlas - latency measurement orchestrator for anycast targets
//!
//! Creates one-off measurements from regional probes toward a list of anycast
//! addresses, then collects and normalizes their results.

mod atlas;
mod config;
mod db;
mod intel;
mod orchestrator;
mod regions;
mod web;

use atlas::{AtlasConnector, Credential};
use config::Config;
use db::Store;
use orchestrator::Orchestrator;
use web::Server;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // Missing .env is fine; the environment may be set directly
    dotenvy::dotenv().ok();

    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::from_default_env()
            .add_directive("anycast_atlas=info".parse()?))
        .init();

    // Load configuration
    let cfg = Config::load()?;
    tracing::info!("Starting anycast-atlas on port {}...", cfg.http_port);
    tracing::info!("{} platform credentials configured", cfg.atlas_api_keys.len());

    let store = Store::new(&cfg.data_dir);
    tracing::info!("Using data directory {}", store.root().display());
    let connector = AtlasConnector::new(cfg.atlas_base_url.clone(), cfg.http_timeout);
    let orchestrator = Orchestrator::new(
        store,
        connector,
        Credential::from_keys(&cfg.atlas_api_keys),
        cfg.run.clone(),
    );

    // Start web server
    let server = Server::new(cfg, orchestrator);
    server.start().await?;

    Ok(())
}
