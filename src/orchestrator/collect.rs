use tracing::{debug, error, info, warn};

use super::{CollectionSummary, OrchestratorError, RequestWindow, RunStatus};
use crate::atlas::{MeasurementKind, RawPingResult, RemotePlatform};
use crate::config::RunSettings;
use crate::db::{PingResultRow, Store};
use crate::regions::Region;

/// Fetches ping results for ledger jobs that have none persisted yet.
///
/// A job counts as fetched once any of its rows are in the result table,
/// so a job whose results are not ready stays pending for the next run.
pub struct CollectionEngine<'a, P: RemotePlatform> {
    store: &'a Store,
    platform: &'a P,
    settings: &'a RunSettings,
}

impl<'a, P: RemotePlatform> CollectionEngine<'a, P> {
    pub fn new(store: &'a Store, platform: &'a P, settings: &'a RunSettings) -> Self {
        Self {
            store,
            platform,
            settings,
        }
    }

    pub async fn run(&self, region: Region) -> Result<CollectionSummary, OrchestratorError> {
        let ledger = self.store.read_ledger(region, MeasurementKind::Ping)?;
        if ledger.is_empty() {
            debug!("No {} measurements recorded yet", region.name());
        }
        let fetched = self.store.read_fetched_job_ids(region)?;
        let pending: Vec<u64> = ledger
            .job_ids()
            .into_iter()
            .filter(|id| !fetched.contains(id))
            .collect();
        let planned = pending.len();

        if pending.is_empty() {
            info!("All {} results already fetched", region.name());
            return Ok(CollectionSummary {
                status: RunStatus::Complete,
                message: "All results have already been fetched.".to_string(),
                planned: 0,
                saved: 0,
                remaining: 0,
                rows_written: 0,
            });
        }

        info!("Fetching results for {} {} jobs", planned, region.name());
        let mut window = RequestWindow::new(self.settings.result_batch_size, self.settings.result_batch_pause);
        let mut saved = 0usize;
        let mut rows_written = 0usize;

        for job_id in pending.iter().copied() {
            if window.is_full() {
                info!("Batch done, pausing for {:?}", window.pause());
                tokio::time::sleep(window.pause()).await;
                window.reset();
            }

            let fetched = self.platform.results(job_id).await;
            window.record();
            match fetched {
                Ok(results) if results.is_empty() => {
                    debug!("Results for job {} not available yet", job_id);
                }
                Ok(results) => {
                    let rows = normalize(job_id, &results);
                    if rows.is_empty() {
                        warn!("Job {} returned {} results, none usable", job_id, results.len());
                    } else {
                        self.store.append_ping_results(region, &rows)?;
                        saved += 1;
                        rows_written += rows.len();
                        info!("Saved {} rows for job {}", rows.len(), job_id);
                    }
                }
                Err(e) => error!("Error fetching results for job {}: {}", job_id, e),
            }
        }

        info!("Saved results for {} of {} jobs", saved, planned);
        Ok(CollectionSummary {
            status: RunStatus::Success,
            message: format!("Saved results for {} measurements.", saved),
            planned,
            saved,
            remaining: planned - saved,
            rows_written,
        })
    }
}

/// Flatten one job's results, numbering the kept rows from 1.
fn normalize(job_id: u64, results: &[RawPingResult]) -> Vec<PingResultRow> {
    let mut rows = Vec::with_capacity(results.len());
    for raw in results {
        match PingResultRow::from_raw(rows.len() + 1, job_id, raw) {
            Ok(row) => rows.push(row),
            Err(e) => warn!("Skipping record in job {}: {}", job_id, e),
        }
    }
    rows
}
