//! In-memory platform doubles shared by the orchestrator tests.

use std::collections::{HashMap, HashSet, VecDeque};
use std::fs;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;

use crate::atlas::{
    AtlasError, Connector, CreatedMeasurement, Credential, MeasurementMeta, MeasurementRequest,
    ProbePage, ProbeRecord, RawPingResult, RawTracerouteResult, RemotePlatform,
};
use crate::config::RunSettings;
use crate::db::Store;

/// Scripted reply to one creation request.
#[derive(Debug, Clone)]
pub enum CreateOutcome {
    Created(u64),
    NoId,
    Quota,
    Fail(u16),
}

#[derive(Debug, Default)]
pub struct FakeState {
    pub pages: Vec<Vec<ProbeRecord>>,
    pub failing_page: Option<usize>,
    pub page_calls: usize,
    pub create_script: VecDeque<CreateOutcome>,
    pub next_job_id: u64,
    /// (credential label, target) per creation request
    pub create_calls: Vec<(String, String)>,
    pub requests: Vec<MeasurementRequest>,
    pub results: HashMap<u64, Vec<RawPingResult>>,
    pub failing_jobs: HashSet<u64>,
    pub result_calls: Vec<u64>,
    pub traceroutes: HashMap<u64, Vec<RawTracerouteResult>>,
    pub connects: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct FakeConnector {
    state: Arc<Mutex<FakeState>>,
}

impl FakeConnector {
    pub fn state(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap()
    }

    pub fn platform(&self, label: &str) -> FakePlatform {
        FakePlatform {
            state: self.state.clone(),
            label: label.to_string(),
        }
    }
}

impl Connector for FakeConnector {
    type Platform = FakePlatform;

    fn connect(&self, credential: &Credential) -> Result<FakePlatform, AtlasError> {
        self.state().connects.push(credential.label().to_string());
        Ok(self.platform(credential.label()))
    }
}

pub struct FakePlatform {
    state: Arc<Mutex<FakeState>>,
    label: String,
}

#[async_trait]
impl RemotePlatform for FakePlatform {
    async fn probe_page(&self, cursor: Option<&str>) -> Result<ProbePage, AtlasError> {
        let mut state = self.state.lock().unwrap();
        state.page_calls += 1;
        let index = cursor.map(|c| c.parse::<usize>().unwrap()).unwrap_or(0);
        if state.failing_page == Some(index) {
            return Err(AtlasError::RemoteFetch("connection reset".to_string()));
        }
        let probes = state.pages.get(index).cloned().unwrap_or_default();
        let next = (index + 1 < state.pages.len()).then(|| (index + 1).to_string());
        Ok(ProbePage { probes, next })
    }

    async fn create_measurement(
        &self,
        request: &MeasurementRequest,
    ) -> Result<CreatedMeasurement, AtlasError> {
        let mut state = self.state.lock().unwrap();
        let target = request.target().unwrap_or_default().to_string();
        state.create_calls.push((self.label.clone(), target));
        state.requests.push(request.clone());
        match state.create_script.pop_front() {
            Some(CreateOutcome::Created(id)) => Ok(CreatedMeasurement { measurements: vec![id] }),
            Some(CreateOutcome::NoId) => Ok(CreatedMeasurement::default()),
            Some(CreateOutcome::Quota) => Err(AtlasError::QuotaExceeded("daily limit reached".to_string())),
            Some(CreateOutcome::Fail(status)) => Err(AtlasError::Request {
                status,
                body: "target rejected".to_string(),
            }),
            None => {
                state.next_job_id += 1;
                Ok(CreatedMeasurement {
                    measurements: vec![1000 + state.next_job_id],
                })
            }
        }
    }

    async fn results(&self, job_id: u64) -> Result<Vec<RawPingResult>, AtlasError> {
        let mut state = self.state.lock().unwrap();
        state.result_calls.push(job_id);
        if state.failing_jobs.contains(&job_id) {
            return Err(AtlasError::RemoteFetch("timed out".to_string()));
        }
        Ok(state.results.get(&job_id).cloned().unwrap_or_default())
    }

    async fn traceroute_results(&self, job_id: u64) -> Result<Vec<RawTracerouteResult>, AtlasError> {
        let mut state = self.state.lock().unwrap();
        state.result_calls.push(job_id);
        if state.failing_jobs.contains(&job_id) {
            return Err(AtlasError::RemoteFetch("timed out".to_string()));
        }
        Ok(state.traceroutes.get(&job_id).cloned().unwrap_or_default())
    }

    async fn measurement(&self, job_id: u64) -> Result<MeasurementMeta, AtlasError> {
        Ok(MeasurementMeta {
            id: job_id,
            ..Default::default()
        })
    }
}

pub fn credentials(n: usize) -> Vec<Credential> {
    let keys: Vec<String> = (0..n).map(|i| format!("secret-{}", i)).collect();
    Credential::from_keys(&keys)
}

pub fn test_settings() -> RunSettings {
    RunSettings {
        rate_limit_count: 90,
        rate_limit_cooldown: Duration::from_secs(800),
        result_batch_size: 10,
        result_batch_pause: Duration::from_secs(10),
        quota_reset: Duration::from_secs(86_400),
        enrich_batch_size: 10,
    }
}

pub fn probe_record(id: u64, country: &str, asn: u32, last_connected: i64, uptime: u64) -> ProbeRecord {
    ProbeRecord {
        id,
        country_code: Some(country.to_string()),
        asn_v4: Some(asn),
        last_connected: Some(last_connected),
        total_uptime: Some(uptime),
        is_public: true,
        ..Default::default()
    }
}

pub fn ping_result(job_id: u64, probe_id: u64) -> RawPingResult {
    RawPingResult {
        msm_id: Some(job_id),
        prb_id: Some(probe_id),
        dst_addr: Some("192.0.2.1".to_string()),
        from: Some("198.51.100.7".to_string()),
        timestamp: Some(1_700_000_000),
        sent: Some(3),
        rcvd: Some(3),
        min: Some(10.0),
        avg: Some(11.0),
        max: Some(12.0),
        ..Default::default()
    }
}

/// Write the target list consumed by the target provider.
pub fn seed_targets(store: &Store, targets: &[&str]) {
    let dir = store.root().join("anycast");
    fs::create_dir_all(&dir).unwrap();
    let mut body = String::from("ip\n");
    for target in targets {
        body.push_str(target);
        body.push('\n');
    }
    fs::write(dir.join("anycast_ip_list.csv"), body).unwrap();
}
