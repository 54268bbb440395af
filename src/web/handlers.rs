//! HTTP request handlers.

use super::AppState;
use crate::atlas::{AtlasConnector, AtlasError, MeasurementKind};
use crate::config::ConfigError;
use crate::intel::{GeoLiteClient, GeoLookup, IpInfoClient, IpIntelligence};
use crate::orchestrator::{Orchestrator, OrchestratorError};
use crate::regions::Region;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::future::Future;
use std::sync::Arc;

const RUN_IN_PROGRESS: &str = "Another run is in progress";

fn parse_region(code: &str) -> Result<Region, Response> {
    Region::from_code(code)
        .ok_or_else(|| (StatusCode::BAD_REQUEST, format!("Unknown region: {}", code)).into_response())
}

fn error_response(e: OrchestratorError) -> Response {
    let status = match &e {
        OrchestratorError::Remote(AtlasError::Request { status: 404, .. }) => StatusCode::NOT_FOUND,
        OrchestratorError::Remote(_) | OrchestratorError::Intel(_) => StatusCode::BAD_GATEWAY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    tracing::error!("Request failed: {}", e);
    (status, e.to_string()).into_response()
}

/// Run a ledger-writing operation on its own task while holding the run lock.
///
/// The handler only waits for the task, so a client that disconnects does
/// not cancel the run; the lock is released when the task finishes.
async fn run_detached<T, F, Fut>(state: &AppState, run: F) -> Response
where
    F: FnOnce(Arc<Orchestrator<AtlasConnector>>) -> Fut,
    Fut: Future<Output = Result<T, OrchestratorError>> + Send + 'static,
    T: Serialize + Send + 'static,
{
    let Ok(guard) = state.run_lock.clone().try_lock_owned() else {
        return (StatusCode::CONFLICT, RUN_IN_PROGRESS).into_response();
    };

    let task = run(state.orchestrator.clone());
    let handle = tokio::spawn(async move {
        let _run = guard;
        task.await
    });

    match handle.await {
        Ok(Ok(summary)) => Json(summary).into_response(),
        Ok(Err(e)) => error_response(e),
        Err(e) => {
            tracing::error!("Run task failed: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}

// ============================================================================
// Measurements
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct InitiateParams {
    #[serde(default)]
    pub kind: Option<String>,
}

pub async fn handle_initiate_measurements(
    State(state): State<AppState>,
    Path(region): Path<String>,
    Query(params): Query<InitiateParams>,
) -> Response {
    let region = match parse_region(&region) {
        Ok(r) => r,
        Err(res) => return res,
    };
    let kind = match params.kind.as_deref().map(str::parse::<MeasurementKind>) {
        None => MeasurementKind::default(),
        Some(Ok(kind)) => kind,
        Some(Err(e)) => return (StatusCode::BAD_REQUEST, e).into_response(),
    };

    run_detached(&state, move |orchestrator| async move {
        orchestrator.create_measurements(region.code(), kind).await
    })
    .await
}

pub async fn handle_process_results(
    State(state): State<AppState>,
    Path(region): Path<String>,
) -> Response {
    let region = match parse_region(&region) {
        Ok(r) => r,
        Err(res) => return res,
    };

    run_detached(&state, move |orchestrator| async move {
        orchestrator.fetch_results(region.code()).await
    })
    .await
}

pub async fn handle_get_measurement(State(state): State<AppState>, Path(id): Path<u64>) -> Response {
    match state.orchestrator.get_measurement(id).await {
        Ok(meta) => Json(meta).into_response(),
        Err(e) => error_response(e),
    }
}

pub async fn handle_get_traceroute(State(state): State<AppState>, Path(id): Path<u64>) -> Response {
    let (intel, geo) = match hop_sources(&state) {
        Ok(sources) => sources,
        Err(e) => return error_response(e),
    };

    let intel = intel.as_ref().map(|c| c as &dyn IpIntelligence);
    let geo = geo.as_ref().map(|c| c as &dyn GeoLookup);
    match state.orchestrator.trace_job(id, intel, geo).await {
        Ok(report) => Json(report).into_response(),
        Err(e) => error_response(e),
    }
}

/// Enrich an uploaded traceroute export (JSON array or one result per line).
pub async fn handle_upload_traceroutes(State(state): State<AppState>, body: String) -> Response {
    let (intel, geo) = match hop_sources(&state) {
        Ok(sources) => sources,
        Err(e) => return error_response(e),
    };

    let intel = intel.as_ref().map(|c| c as &dyn IpIntelligence);
    let geo = geo.as_ref().map(|c| c as &dyn GeoLookup);
    let report = state.orchestrator.enrich_traceroute_export(&body, intel, geo).await;
    Json(report).into_response()
}

// ============================================================================
// Probes
// ============================================================================

pub async fn handle_get_probes(State(state): State<AppState>, Path(region): Path<String>) -> Response {
    let region = match parse_region(&region) {
        Ok(r) => r,
        Err(res) => return res,
    };

    match state.orchestrator.select_probes(region.code()).await {
        Ok(probes) => Json(probes).into_response(),
        Err(e) => error_response(e),
    }
}

pub async fn handle_list_probes(State(state): State<AppState>) -> Response {
    match state.orchestrator.all_probes().await {
        Ok(probes) => Json(json!({ "total": probes.len(), "probes": probes })).into_response(),
        Err(e) => error_response(e),
    }
}

// ============================================================================
// Anycast targets
// ============================================================================

pub async fn handle_list_targets(State(state): State<AppState>) -> Response {
    match state.orchestrator.list_targets() {
        Ok(ips) => Json(json!({ "total": ips.len(), "ips": ips })).into_response(),
        Err(e) => error_response(e),
    }
}

pub async fn handle_enrich_targets(State(state): State<AppState>) -> Response {
    let intel = match intel_client(&state) {
        Ok(client) => client,
        Err(e) => return error_response(e),
    };

    run_detached(&state, move |orchestrator| async move {
        orchestrator.enrich_targets(&intel).await
    })
    .await
}

fn intel_client(state: &AppState) -> Result<IpInfoClient, OrchestratorError> {
    optional_intel(state)?.ok_or_else(|| ConfigError::Missing("ANYCAST_IPINFO_TOKEN").into())
}

fn optional_intel(state: &AppState) -> Result<Option<IpInfoClient>, OrchestratorError> {
    let config = &state.config;
    match config.ipinfo_token.as_deref() {
        Some(token) => Ok(Some(IpInfoClient::new(&config.ipinfo_base_url, token, config.http_timeout)?)),
        None => Ok(None),
    }
}

/// Clients for hop enrichment. A source without credentials is left out.
fn hop_sources(state: &AppState) -> Result<(Option<IpInfoClient>, Option<GeoLiteClient>), OrchestratorError> {
    let config = &state.config;
    let geo = match (config.geolite_account_id.as_deref(), config.geolite_license_key.as_deref()) {
        (Some(account), Some(key)) => Some(GeoLiteClient::new(
            &config.geolite_base_url,
            account,
            key,
            config.http_timeout,
        )?),
        _ => None,
    };
    Ok((optional_intel(state)?, geo))
}
