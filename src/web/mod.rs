//! Web server module.

mod handlers;

pub use handlers::*;

use crate::atlas::AtlasConnector;
use crate::config::Config;
use crate::orchestrator::Orchestrator;

use axum::{
    routing::{get, post},
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::Mutex;
use tower_http::trace::TraceLayer;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub orchestrator: Arc<Orchestrator<AtlasConnector>>,
    /// Held by the task of any run that writes ledger artifacts.
    pub run_lock: Arc<Mutex<()>>,
}

/// HTTP front end for the orchestrator.
pub struct Server {
    state: AppState,
}

impl Server {
    pub fn new(config: Config, orchestrator: Orchestrator<AtlasConnector>) -> Self {
        Self {
            state: AppState {
                config: Arc::new(config),
                orchestrator: Arc::new(orchestrator),
                run_lock: Arc::new(Mutex::new(())),
            },
        }
    }

    /// Build the router with all routes.
    fn routes(&self) -> Router {
        Router::new()
            .route(
                "/measurements/initiate/{region}",
                post(handlers::handle_initiate_measurements),
            )
            .route(
                "/measurements/process-results/{region}",
                post(handlers::handle_process_results),
            )
            .route("/measurements/upload", post(handlers::handle_upload_traceroutes))
            .route("/measurements/{id}", get(handlers::handle_get_measurement))
            .route("/measurements/{id}/traceroute", get(handlers::handle_get_traceroute))
            .route("/probes", get(handlers::handle_list_probes))
            .route("/probes/", get(handlers::handle_list_probes))
            .route("/probes/{region}", get(handlers::handle_get_probes))
            .route("/anycast/ips", get(handlers::handle_list_targets))
            .route("/anycast/enrich", post(handlers::handle_enrich_targets))
            .layer(TraceLayer::new_for_http())
            .with_state(self.state.clone())
    }

    /// Start the server on the configured port.
    pub async fn start(&self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.state.config.http_port));
        let router = self.routes();

        tracing::info!("Web server listening on {}", addr);

        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, router).await?;

        Ok(())
    }
}
