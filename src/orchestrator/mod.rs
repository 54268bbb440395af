//! Measurement lifecycle orchestration.
//!
//! Every operation re-reads the ledger artifacts it depends on, so the
//! orchestrator keeps no state between runs and any run can be interrupted
//! and started again.

mod collect;
mod create;
mod credentials;
mod enrich;
mod hops;
mod probes;
mod window;

#[cfg(test)]
pub(crate) mod testing;

pub use collect::*;
pub use create::*;
pub use credentials::*;
pub use enrich::*;
pub use hops::*;
pub use probes::*;
pub use window::*;

use serde::Serialize;
use thiserror::Error;

use crate::atlas::{
    decode_traceroute_export, AtlasError, Connector, Credential, MeasurementKind, MeasurementMeta,
    RemotePlatform,
};
use crate::config::{ConfigError, RunSettings};
use crate::db::{Probe, Store, StoreError};
use crate::intel::{GeoLookup, IntelError, IpIntelligence};
use crate::regions::Region;

/// Orchestration error types. Only run-level failures surface here;
/// per-target and per-job failures are logged and skipped.
#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error("storage error: {0}")]
    Store(#[from] StoreError),
    #[error("remote platform error: {0}")]
    Remote(#[from] AtlasError),
    #[error("IP intelligence error: {0}")]
    Intel(#[from] IntelError),
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
}

/// Outcome class of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    /// Nothing to do; no remote request was issued.
    Complete,
    /// Work was attempted; see the counts for partial failures.
    Success,
}

/// Result of a measurement creation run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CreationSummary {
    pub status: RunStatus,
    pub message: String,
    /// Targets without a ledger entry at the start of the run
    pub considered: usize,
    pub created: usize,
    pub remaining: usize,
}

impl CreationSummary {
    fn complete(message: &str, considered: usize) -> Self {
        Self {
            status: RunStatus::Complete,
            message: message.to_string(),
            considered,
            created: 0,
            remaining: considered,
        }
    }
}

/// Result of a result collection run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CollectionSummary {
    pub status: RunStatus,
    pub message: String,
    /// Jobs whose results were not yet persisted at the start of the run
    pub planned: usize,
    pub saved: usize,
    pub remaining: usize,
    pub rows_written: usize,
}

/// Entry point used by callers such as the HTTP surface.
pub struct Orchestrator<C: Connector> {
    store: Store,
    connector: C,
    credentials: Vec<Credential>,
    settings: RunSettings,
}

impl<C: Connector> Orchestrator<C> {
    pub fn new(store: Store, connector: C, credentials: Vec<Credential>, settings: RunSettings) -> Self {
        Self {
            store,
            connector,
            credentials,
            settings,
        }
    }

    fn pool(&self) -> CredentialPool {
        CredentialPool::new(self.credentials.clone())
    }

    /// Connect with the first configured credential.
    fn connect_primary(&self) -> Result<C::Platform, OrchestratorError> {
        let credential = self
            .credentials
            .first()
            .ok_or(ConfigError::Missing("ANYCAST_ATLAS_API_KEYS"))?;
        Ok(self.connector.connect(credential)?)
    }

    /// Create one measurement per target that has no ledger entry yet.
    pub async fn create_measurements(
        &self,
        region_code: &str,
        kind: MeasurementKind,
    ) -> Result<CreationSummary, OrchestratorError> {
        let region = Region::resolve(region_code);
        CreationEngine::new(&self.store, &self.connector, self.pool(), &self.settings)
            .run(region, kind)
            .await
    }

    /// Fetch and persist results for every ledger job not yet in the result table.
    pub async fn fetch_results(&self, region_code: &str) -> Result<CollectionSummary, OrchestratorError> {
        let region = Region::resolve(region_code);
        let platform = self.connect_primary()?;
        CollectionEngine::new(&self.store, &platform, &self.settings)
            .run(region)
            .await
    }

    /// Region probes reduced to one per (country, network).
    pub async fn select_probes(&self, region_code: &str) -> Result<Vec<Probe>, OrchestratorError> {
        let region = Region::resolve(region_code);
        let platform = self.connect_primary()?;
        let probes = ProbeSelector::new(&self.store)
            .select_region(&platform, region)
            .await?;
        Ok(reduce_to_one_per_network(&probes))
    }

    pub async fn get_measurement(&self, job_id: u64) -> Result<MeasurementMeta, OrchestratorError> {
        let platform = self.connect_primary()?;
        Ok(platform.measurement(job_id).await?)
    }

    pub async fn enrich_targets<I>(&self, intel: &I) -> Result<EnrichmentSummary, OrchestratorError>
    where
        I: IpIntelligence + ?Sized,
    {
        enrich_targets(&self.store, intel, self.settings.enrich_batch_size).await
    }

    /// Fetch a traceroute job's results and enrich every responding hop.
    pub async fn trace_job(
        &self,
        job_id: u64,
        intel: Option<&dyn IpIntelligence>,
        geo: Option<&dyn GeoLookup>,
    ) -> Result<TracerouteReport, OrchestratorError> {
        let platform = self.connect_primary()?;
        let raw = platform.traceroute_results(job_id).await?;
        let records = normalize_traceroutes(&raw);
        Ok(HopEnricher::new(intel, geo).enrich(records).await)
    }

    /// Decode an exported traceroute file and enrich every responding hop.
    pub async fn enrich_traceroute_export(
        &self,
        body: &str,
        intel: Option<&dyn IpIntelligence>,
        geo: Option<&dyn GeoLookup>,
    ) -> TracerouteReport {
        let records = normalize_traceroutes(&decode_traceroute_export(body));
        HopEnricher::new(intel, geo).enrich(records).await
    }

    /// The anycast target list.
    pub fn list_targets(&self) -> Result<Vec<String>, OrchestratorError> {
        Ok(self.store.read_targets()?)
    }

    /// The full active probe inventory, from cache when present.
    pub async fn all_probes(&self) -> Result<Vec<Probe>, OrchestratorError> {
        let platform = self.connect_primary()?;
        ProbeSelector::new(&self.store).load_all_probes(&platform).await
    }
}
