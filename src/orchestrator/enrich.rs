use serde::Serialize;
use tracing::{info, warn};

use super::OrchestratorError;
use crate::db::Store;
use crate::intel::IpIntelligence;

/// Counts from one enrichment run.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct EnrichmentSummary {
    pub seen: usize,
    pub skipped_existing: usize,
    pub written: usize,
    pub errors: usize,
}

/// Look up ownership details for targets not yet enriched.
///
/// Rows are appended one batch at a time, so an interrupted run keeps every
/// completed batch and the next run picks up where it stopped.
pub async fn enrich_targets<I>(store: &Store, intel: &I, batch_size: usize) -> Result<EnrichmentSummary, OrchestratorError>
where
    I: IpIntelligence + ?Sized,
{
    let targets = store.read_targets()?;
    let existing = store.read_enriched_ips()?;

    let mut summary = EnrichmentSummary {
        seen: targets.len(),
        ..Default::default()
    };
    let pending: Vec<&String> = targets.iter().filter(|ip| !existing.contains(*ip)).collect();
    summary.skipped_existing = summary.seen - pending.len();
    info!("Enriching {} addresses, {} already done", pending.len(), summary.skipped_existing);

    for batch in pending.chunks(batch_size.max(1)) {
        let mut rows = Vec::with_capacity(batch.len());
        for ip in batch {
            match intel.lookup(ip).await {
                Ok(Some(details)) => rows.push(details),
                Ok(None) => {
                    warn!("No details for {}", ip);
                    summary.errors += 1;
                }
                Err(e) => {
                    warn!("Lookup failed for {}: {}", ip, e);
                    summary.errors += 1;
                }
            }
        }
        store.append_ip_details(&rows)?;
        summary.written += rows.len();
    }

    info!(
        "Enrichment wrote {} rows with {} errors",
        summary.written, summary.errors
    );
    Ok(summary)
}
