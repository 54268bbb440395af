//! CSV-backed artifact store.
//!
//! Every artifact lives under one data directory. Appends create the file
//! with a header row on first write; reads re-scan the file on every call so
//! a restarted process always sees what earlier runs persisted.

use std::collections::HashSet;
use std::fs::{self, OpenOptions};
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::models::*;
use crate::atlas::MeasurementKind;
use crate::regions::Region;

/// Storage error types.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("{} not found", .0.display())]
    Missing(PathBuf),
}

/// Which probe cache file to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeCache {
    All,
    Region(Region),
}

impl ProbeCache {
    fn file_name(self) -> &'static str {
        match self {
            ProbeCache::All => "all_active_probes.csv",
            ProbeCache::Region(region) => region.probe_cache_file(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct TargetRow {
    ip: String,
}

#[derive(Debug, Deserialize)]
struct JobIdColumn {
    #[serde(rename = "measurement_id")]
    job_id: u64,
}

#[derive(Debug, Deserialize)]
struct IpColumn {
    ip_address: String,
}

/// File-system store rooted at the data directory.
#[derive(Debug, Clone)]
pub struct Store {
    root: PathBuf,
}

impl Store {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn probe_cache_path(&self, cache: ProbeCache) -> PathBuf {
        self.root.join("ripe").join(cache.file_name())
    }

    fn targets_path(&self) -> PathBuf {
        self.root.join("anycast").join("anycast_ip_list.csv")
    }

    fn ip_details_path(&self) -> PathBuf {
        self.root.join("anycast").join("anycast_ip_details.csv")
    }

    fn ledger_path(&self, region: Region, kind: MeasurementKind) -> PathBuf {
        let code = region.code().to_ascii_lowercase();
        let name = match kind {
            MeasurementKind::Ping => format!("measurements_{}.csv", code),
            other => format!("measurements_{}_{}.csv", code, other),
        };
        self.root.join("measurements").join(name)
    }

    fn results_path(&self, region: Region) -> PathBuf {
        self.root
            .join("measurements")
            .join(format!("ping_results_{}.csv", region.code().to_ascii_lowercase()))
    }

    fn failures_path(&self) -> PathBuf {
        self.root.join("measurements").join("failed.csv")
    }

    // --- Probe cache ---

    /// Read a probe cache. A missing file reads as empty.
    pub fn read_probe_cache(&self, cache: ProbeCache) -> Result<Vec<Probe>, StoreError> {
        Ok(read_rows(&self.probe_cache_path(cache), "probe")?.unwrap_or_default())
    }

    /// Replace a probe cache. Nothing is written for an empty list.
    ///
    /// Rows go to a temporary file that is renamed into place, so readers
    /// never observe a partially written cache.
    pub fn write_probe_cache(&self, cache: ProbeCache, probes: &[Probe]) -> Result<(), StoreError> {
        if probes.is_empty() {
            return Ok(());
        }

        let path = self.probe_cache_path(cache);
        ensure_parent(&path)?;
        let tmp = path.with_extension("csv.tmp");
        {
            let mut writer = csv::Writer::from_path(&tmp)?;
            for probe in probes {
                writer.serialize(probe)?;
            }
            writer.flush()?;
        }
        fs::rename(&tmp, &path)?;
        Ok(())
    }

    // --- Targets ---

    /// Read the anycast target list.
    ///
    /// Non-IPv4 rows are skipped and duplicates keep their first position.
    pub fn read_targets(&self) -> Result<Vec<String>, StoreError> {
        let path = self.targets_path();
        let rows: Vec<TargetRow> = read_rows(&path, "target")?.ok_or(StoreError::Missing(path))?;

        let mut seen = HashSet::new();
        let mut targets = Vec::with_capacity(rows.len());
        for row in rows {
            let ip = row.ip.trim();
            if ip.parse::<Ipv4Addr>().is_err() {
                tracing::warn!("Skipping record: {}", MalformedRecord::new("target", format!("{:?} is not IPv4", ip)));
                continue;
            }
            if seen.insert(ip.to_string()) {
                targets.push(ip.to_string());
            }
        }
        Ok(targets)
    }

    // --- Target ledger ---

    pub fn read_ledger(&self, region: Region, kind: MeasurementKind) -> Result<TargetLedger, StoreError> {
        let rows: Vec<LedgerEntry> =
            read_rows(&self.ledger_path(region, kind), "ledger")?.unwrap_or_default();
        Ok(TargetLedger::from_entries(rows))
    }

    /// Durably append one target to job id mapping.
    pub fn append_ledger_entry(
        &self,
        region: Region,
        kind: MeasurementKind,
        entry: &LedgerEntry,
    ) -> Result<(), StoreError> {
        append_rows(&self.ledger_path(region, kind), std::slice::from_ref(entry))
    }

    // --- Ping results ---

    /// Distinct job ids already present in the region's result table.
    pub fn read_fetched_job_ids(&self, region: Region) -> Result<HashSet<u64>, StoreError> {
        let rows: Vec<JobIdColumn> =
            read_rows(&self.results_path(region), "ping result")?.unwrap_or_default();
        Ok(rows.into_iter().map(|r| r.job_id).collect())
    }

    pub fn append_ping_results(&self, region: Region, rows: &[PingResultRow]) -> Result<(), StoreError> {
        append_rows(&self.results_path(region), rows)
    }

    // --- Failed targets ---

    pub fn record_failure(&self, failure: &FailedTarget) -> Result<(), StoreError> {
        append_rows(&self.failures_path(), std::slice::from_ref(failure))
    }

    // --- IP details ---

    pub fn read_enriched_ips(&self) -> Result<HashSet<String>, StoreError> {
        let rows: Vec<IpColumn> = read_rows(&self.ip_details_path(), "ip details")?.unwrap_or_default();
        Ok(rows.into_iter().map(|r| r.ip_address).collect())
    }

    pub fn append_ip_details(&self, rows: &[IpDetails]) -> Result<(), StoreError> {
        append_rows(&self.ip_details_path(), rows)
    }
}

fn ensure_parent(path: &Path) -> Result<(), StoreError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    Ok(())
}

/// Append rows, writing the header only when the file is new or empty.
/// The file is synced before returning.
fn append_rows<T: Serialize>(path: &Path, rows: &[T]) -> Result<(), StoreError> {
    if rows.is_empty() {
        return Ok(());
    }

    ensure_parent(path)?;
    let needs_header = fs::metadata(path).map(|m| m.len() == 0).unwrap_or(true);
    let file = OpenOptions::new().create(true).append(true).open(path)?;

    let mut writer = csv::WriterBuilder::new()
        .has_headers(needs_header)
        .from_writer(file);
    for row in rows {
        writer.serialize(row)?;
    }
    let file = writer.into_inner().map_err(|e| StoreError::Io(e.into_error()))?;
    file.sync_data()?;
    Ok(())
}

/// Read every row that deserializes as `T`; `None` if the file does not exist.
fn read_rows<T: DeserializeOwned>(path: &Path, kind: &'static str) -> Result<Option<Vec<T>>, StoreError> {
    if !path.exists() {
        return Ok(None);
    }

    let mut reader = csv::Reader::from_path(path)?;
    let mut rows = Vec::new();
    for (i, row) in reader.deserialize::<T>().enumerate() {
        match row {
            Ok(r) => rows.push(r),
            Err(e) if e.is_io_error() => return Err(e.into()),
            Err(e) => {
                let err = MalformedRecord::new(kind, format!("{} row {}: {}", path.display(), i + 1, e));
                tracing::warn!("Skipping record: {}", err);
            }
        }
    }
    Ok(Some(rows))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store() -> (TempDir, Store) {
        let tmp = TempDir::new().unwrap();
        let store = Store::new(tmp.path());
        (tmp, store)
    }

    fn write(store: &Store, rel: &str, content: &str) {
        let path = store.root().join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    #[test]
    fn test_ledger_append_and_read() {
        let (_tmp, store) = store();
        let region = Region::Africa;
        assert!(store.read_ledger(region, MeasurementKind::Ping).unwrap().is_empty());

        for (target, job_id) in [("8.8.8.8", 1), ("1.1.1.1", 2), ("8.8.8.8", 3)] {
            let entry = LedgerEntry { target: target.into(), job_id };
            store.append_ledger_entry(region, MeasurementKind::Ping, &entry).unwrap();
        }

        let content = fs::read_to_string(store.root().join("measurements/measurements_af.csv")).unwrap();
        assert_eq!(content.matches("target,measurement_id").count(), 1);

        let ledger = store.read_ledger(region, MeasurementKind::Ping).unwrap();
        assert!(ledger.contains("8.8.8.8"));
        assert_eq!(ledger.len(), 2);

        // Traceroute jobs are tracked separately.
        assert!(store.read_ledger(region, MeasurementKind::Traceroute).unwrap().is_empty());
    }

    #[test]
    fn test_ledger_skips_malformed_rows() {
        let (_tmp, store) = store();
        write(
            &store,
            "measurements/measurements_sa.csv",
            "target,measurement_id\n8.8.8.8,11\n1.1.1.1,oops\n9.9.9.9,12\n",
        );
        let ledger = store.read_ledger(Region::SouthAmerica, MeasurementKind::Ping).unwrap();
        assert_eq!(ledger.job_ids(), vec![11, 12]);
    }

    #[test]
    fn test_fetched_job_ids_from_results() {
        let (_tmp, store) = store();
        let row = |seq, job_id| PingResultRow {
            seq,
            job_id,
            probe_id: 1,
            target: Some("8.8.8.8".into()),
            source_addr: None,
            ts_unix: Some(1),
            ts_iso: iso_timestamp(1),
            sent: 3,
            received: 0,
            loss_pct: 100.0,
            min_rtt: None,
            avg_rtt: None,
            max_rtt: None,
            rtt1: None,
            rtt2: None,
            rtt3: None,
        };
        store.append_ping_results(Region::Africa, &[row(1, 5), row(2, 5)]).unwrap();
        store.append_ping_results(Region::Africa, &[row(1, 6)]).unwrap();

        let fetched = store.read_fetched_job_ids(Region::Africa).unwrap();
        assert_eq!(fetched, HashSet::from([5, 6]));

        let content = fs::read_to_string(store.root().join("measurements/ping_results_af.csv")).unwrap();
        let mut lines = content.lines();
        assert_eq!(
            lines.next().unwrap(),
            "serial_no,measurement_id,probe_id,dst_addr,from,timestamp_unix,timestamp_iso,sent,rcvd,loss_pct,min_ms,avg_ms,max_ms,rtt1,rtt2,rtt3"
        );
        assert_eq!(content.lines().count(), 4);
    }

    #[test]
    fn test_targets_are_validated_and_unique() {
        let (_tmp, store) = store();
        assert!(matches!(store.read_targets(), Err(StoreError::Missing(_))));

        write(
            &store,
            "anycast/anycast_ip_list.csv",
            "ip\n8.8.8.8\n1.1.1.1\nnot-an-ip\n8.8.8.8\n2001:db8::1\n",
        );
        assert_eq!(store.read_targets().unwrap(), vec!["8.8.8.8", "1.1.1.1"]);
    }

    #[test]
    fn test_probe_cache_round_trip() {
        let (_tmp, store) = store();
        let cache = ProbeCache::Region(Region::Africa);
        assert!(store.read_probe_cache(cache).unwrap().is_empty());

        store.write_probe_cache(cache, &[]).unwrap();
        assert!(!store.root().join("ripe/african_active_probes.csv").exists());

        let probe = Probe {
            id: 7,
            country_code: Some("KE".into()),
            asn_v4: Some(33771),
            last_connected: Some(100),
            is_public: true,
            ..Default::default()
        };
        store.write_probe_cache(cache, std::slice::from_ref(&probe)).unwrap();
        assert_eq!(store.read_probe_cache(cache).unwrap(), vec![probe]);
        assert!(store.read_probe_cache(ProbeCache::All).unwrap().is_empty());
    }

    #[test]
    fn test_failures_and_ip_details() {
        let (_tmp, store) = store();
        let at = chrono::Utc::now();
        store.record_failure(&FailedTarget::new("8.8.8.8", "boom", at)).unwrap();
        store.record_failure(&FailedTarget::new("1.1.1.1", "bang", at)).unwrap();
        let content = fs::read_to_string(store.root().join("measurements/failed.csv")).unwrap();
        assert!(content.starts_with("target,timestamp,error\n"));
        assert_eq!(content.lines().count(), 3);

        store
            .append_ip_details(&[IpDetails { ip_address: "8.8.8.8".into(), ..Default::default() }])
            .unwrap();
        assert_eq!(store.read_enriched_ips().unwrap(), HashSet::from(["8.8.8.8".to_string()]));
    }
}
