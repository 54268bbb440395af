use chrono::Utc;
use tracing::{debug, error, info, warn};

use super::{reduce_to_one_per_network, CreationSummary, CredentialPool, OrchestratorError, ProbeSelector, RequestWindow, RunStatus};
use crate::atlas::{Connector, MeasurementKind, MeasurementRequest, RemotePlatform};
use crate::config::{ConfigError, RunSettings};
use crate::db::{FailedTarget, LedgerEntry, Store};
use crate::regions::Region;

/// Where a creation run currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreationPhase {
    Init,
    SelectingTargets,
    Creating,
    RateLimited,
    QuotaExhausted,
    Done,
}

/// Drives one measurement creation run.
///
/// Each success is appended to the target ledger before the next target is
/// submitted. A quota rejection switches to the next unused credential and
/// retries the same target; when the pool runs dry the engine sleeps out the
/// quota reset period and starts over from the first credential.
pub struct CreationEngine<'a, C: Connector> {
    store: &'a Store,
    connector: &'a C,
    pool: CredentialPool,
    settings: &'a RunSettings,
    phase: CreationPhase,
}

impl<'a, C: Connector> CreationEngine<'a, C> {
    pub fn new(store: &'a Store, connector: &'a C, pool: CredentialPool, settings: &'a RunSettings) -> Self {
        Self {
            store,
            connector,
            pool,
            settings,
            phase: CreationPhase::Init,
        }
    }

    fn enter(&mut self, phase: CreationPhase) {
        debug!("Creation phase {:?} -> {:?}", self.phase, phase);
        self.phase = phase;
    }

    pub async fn run(mut self, region: Region, kind: MeasurementKind) -> Result<CreationSummary, OrchestratorError> {
        self.enter(CreationPhase::SelectingTargets);
        let targets = self.store.read_targets()?;
        let ledger = self.store.read_ledger(region, kind)?;
        let total = targets.len();
        let pending: Vec<String> = targets.into_iter().filter(|t| !ledger.contains(t)).collect();
        let considered = pending.len();
        debug!("{} targets listed, {} ledger entries", total, ledger.len());

        if pending.is_empty() {
            info!("All {} measurements for {} already created", kind, region.name());
            self.enter(CreationPhase::Done);
            return Ok(CreationSummary::complete("All measurements have already been created.", 0));
        }

        info!("{} targets pending {} measurement in {}", considered, kind, region.name());

        let mut platform = self.connect_next()?;
        let probes = ProbeSelector::new(self.store).select_region(&platform, region).await?;
        let probes = reduce_to_one_per_network(&probes);
        if probes.is_empty() {
            warn!("No {} probes available, nothing submitted", region.name());
            self.enter(CreationPhase::Done);
            return Ok(CreationSummary::complete(
                "No probes available for the region.",
                considered,
            ));
        }
        let probe_ids: Vec<u64> = probes.iter().map(|p| p.id).collect();
        info!("Using {} probes, one per network", probe_ids.len());

        self.enter(CreationPhase::Creating);
        let mut window = RequestWindow::new(self.settings.rate_limit_count, self.settings.rate_limit_cooldown);
        let mut created = 0usize;
        let mut index = 0usize;

        while index < pending.len() {
            if window.is_full() {
                self.enter(CreationPhase::RateLimited);
                info!(
                    "Submitted {} requests, cooling down for {:?}",
                    self.settings.rate_limit_count,
                    window.pause()
                );
                tokio::time::sleep(window.pause()).await;
                window.reset();
                self.enter(CreationPhase::Creating);
            }

            let target = &pending[index];
            let request = MeasurementRequest::one_off(target, kind, &probe_ids);
            let outcome = platform.create_measurement(&request).await;
            window.record();

            match outcome {
                Ok(reply) => {
                    match reply.job_id() {
                        Some(job_id) => {
                            let entry = LedgerEntry {
                                target: target.clone(),
                                job_id,
                            };
                            self.store.append_ledger_entry(region, kind, &entry)?;
                            created += 1;
                            info!("Created {} measurement {} for {}", kind, job_id, target);
                        }
                        None => {
                            warn!("No measurement id returned for {}", target);
                            self.record_failure(target, "platform returned no measurement id");
                        }
                    }
                    index += 1;
                }
                Err(e) if e.is_quota_exceeded() => {
                    warn!("Quota exceeded while creating measurement for {}: {}", target, e);
                    platform = self.rotate_credential(&mut window).await?;
                }
                Err(e) => {
                    error!("Failed to create measurement for {}: {}", target, e);
                    self.record_failure(target, &e.to_string());
                    index += 1;
                }
            }
        }

        self.enter(CreationPhase::Done);
        let remaining = considered - created;
        info!("Created {} of {} {} measurements", created, considered, kind);
        Ok(CreationSummary {
            status: RunStatus::Success,
            message: format!("Created {} measurements.", created),
            considered,
            created,
            remaining,
        })
    }

    fn connect_next(&mut self) -> Result<C::Platform, OrchestratorError> {
        let credential = self
            .pool
            .acquire()
            .ok_or(ConfigError::Missing("ANYCAST_ATLAS_API_KEYS"))?;
        info!("Using credential {}", credential.label());
        match self.connector.connect(&credential) {
            Ok(platform) => Ok(platform),
            Err(e) => {
                self.pool.release(&credential);
                Err(e.into())
            }
        }
    }

    /// Connect with the next unused credential, sleeping out the quota
    /// reset period first when every credential has been used. The reset
    /// also starts a new rate-limit window.
    async fn rotate_credential(&mut self, window: &mut RequestWindow) -> Result<C::Platform, OrchestratorError> {
        if self.pool.available() == 0 {
            self.enter(CreationPhase::QuotaExhausted);
            warn!(
                "All {} credentials exhausted, waiting {:?} for quota reset",
                self.pool.capacity(),
                self.settings.quota_reset
            );
            tokio::time::sleep(self.settings.quota_reset).await;
            self.pool.reset_all();
            window.reset();
            self.enter(CreationPhase::Creating);
        }
        self.connect_next()
    }

    fn record_failure(&self, target: &str, reason: &str) {
        let failure = FailedTarget::new(target, reason, Utc::now());
        if let Err(e) = self.store.record_failure(&failure) {
            error!("Could not log failure for {}: {}", target, e);
        }
    }
}
