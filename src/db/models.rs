//! Persisted record types.

use std::collections::HashMap;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::atlas::{ProbeRecord, RawPingResult, RawTracerouteResult};

/// A fetched or persisted record that lacks a required field.
///
/// Never fatal: the record is skipped and the skip is logged.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("malformed {kind} record: {reason}")]
pub struct MalformedRecord {
    pub kind: &'static str,
    pub reason: String,
}

impl MalformedRecord {
    pub fn new(kind: &'static str, reason: impl Into<String>) -> Self {
        Self {
            kind,
            reason: reason.into(),
        }
    }
}

/// A vantage point, as cached on disk.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Probe {
    pub id: u64,
    pub country_code: Option<String>,
    pub asn_v4: Option<u32>,
    pub asn_v6: Option<u32>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub address_v4: Option<String>,
    pub prefix_v4: Option<String>,
    pub status: Option<String>,
    /// Unix time the probe last connected
    pub last_connected: Option<i64>,
    /// Cumulative uptime in seconds
    pub total_uptime: Option<u64>,
    pub is_anchor: bool,
    pub is_public: bool,
}

impl Probe {
    /// The (country, origin network) pair used to bucket probes.
    pub fn selection_key(&self) -> Option<(&str, u32)> {
        let country = self.country_code.as_deref().filter(|c| !c.is_empty())?;
        Some((country, self.asn_v4?))
    }
}

impl From<ProbeRecord> for Probe {
    fn from(record: ProbeRecord) -> Self {
        let lon_lat = record.geometry.as_ref().and_then(|g| g.lon_lat());
        Self {
            id: record.id,
            country_code: record.country_code.filter(|c| !c.is_empty()),
            asn_v4: record.asn_v4,
            asn_v6: record.asn_v6,
            latitude: lon_lat.map(|(_, lat)| lat),
            longitude: lon_lat.map(|(lon, _)| lon),
            address_v4: record.address_v4,
            prefix_v4: record.prefix_v4,
            status: record.status.and_then(|s| s.name),
            last_connected: record.last_connected,
            total_uptime: record.total_uptime,
            is_anchor: record.is_anchor,
            is_public: record.is_public,
        }
    }
}

/// One row of the target ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub target: String,
    #[serde(rename = "measurement_id")]
    pub job_id: u64,
}

/// Target to job id view over the ledger rows.
///
/// A target written more than once keeps its first position and its last job id.
#[derive(Debug, Clone, Default)]
pub struct TargetLedger {
    entries: Vec<LedgerEntry>,
    index: HashMap<String, usize>,
}

impl TargetLedger {
    pub fn from_entries<I: IntoIterator<Item = LedgerEntry>>(rows: I) -> Self {
        let mut ledger = Self::default();
        for row in rows {
            match ledger.index.get(&row.target) {
                Some(&pos) => ledger.entries[pos].job_id = row.job_id,
                None => {
                    ledger.index.insert(row.target.clone(), ledger.entries.len());
                    ledger.entries.push(row);
                }
            }
        }
        ledger
    }

    pub fn contains(&self, target: &str) -> bool {
        self.index.contains_key(target)
    }

    /// Job ids in ledger order, without duplicates.
    pub fn job_ids(&self) -> Vec<u64> {
        let mut seen = std::collections::HashSet::new();
        self.entries
            .iter()
            .map(|e| e.job_id)
            .filter(|id| seen.insert(*id))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Normalized ping result, one per probe per job.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PingResultRow {
    /// 1-based position within the write batch
    #[serde(rename = "serial_no")]
    pub seq: usize,
    #[serde(rename = "measurement_id")]
    pub job_id: u64,
    pub probe_id: u64,
    #[serde(rename = "dst_addr")]
    pub target: Option<String>,
    /// Responding address; absent when the probe got no reply
    #[serde(rename = "from")]
    pub source_addr: Option<String>,
    #[serde(rename = "timestamp_unix")]
    pub ts_unix: Option<i64>,
    #[serde(rename = "timestamp_iso")]
    pub ts_iso: String,
    pub sent: u32,
    #[serde(rename = "rcvd")]
    pub received: u32,
    pub loss_pct: f64,
    #[serde(rename = "min_ms")]
    pub min_rtt: Option<f64>,
    #[serde(rename = "avg_ms")]
    pub avg_rtt: Option<f64>,
    #[serde(rename = "max_ms")]
    pub max_rtt: Option<f64>,
    pub rtt1: Option<f64>,
    pub rtt2: Option<f64>,
    pub rtt3: Option<f64>,
}

impl PingResultRow {
    /// Normalize a raw result fetched for `job_id`.
    ///
    /// The row is always attributed to `job_id`, so the fetched-job scan
    /// matches the ledger even if the platform echoes a group id instead.
    pub fn from_raw(seq: usize, job_id: u64, raw: &RawPingResult) -> Result<Self, MalformedRecord> {
        let probe_id = raw
            .prb_id
            .ok_or_else(|| MalformedRecord::new("ping result", format!("job {} row without prb_id", job_id)))?;

        let echoed = raw.msm_id.or(raw.group_id);
        if echoed.is_some_and(|id| id != job_id) {
            tracing::debug!("Job {} result carries measurement id {:?}", job_id, echoed);
        }

        let sent = raw.sent.unwrap_or(0);
        let received = raw.rcvd.unwrap_or(0);
        let summary_rtt = |value: Option<f64>| value.filter(|v| received > 0 && *v >= 0.0);

        let mut rtts = raw.result.iter().filter_map(|reply| reply.rtt);

        Ok(Self {
            seq,
            job_id,
            probe_id,
            target: raw.dst_addr.clone().or_else(|| raw.dst_name.clone()),
            source_addr: raw.from.clone().or_else(|| raw.src_addr.clone()),
            ts_unix: raw.timestamp,
            ts_iso: raw.timestamp.map(iso_timestamp).unwrap_or_default(),
            sent,
            received,
            loss_pct: loss_percentage(sent, received),
            min_rtt: summary_rtt(raw.min),
            avg_rtt: summary_rtt(raw.avg),
            max_rtt: summary_rtt(raw.max),
            rtt1: rtts.next(),
            rtt2: rtts.next(),
            rtt3: rtts.next(),
        })
    }
}

/// Packet loss in percent, rounded to two decimals. Zero when nothing was sent.
pub fn loss_percentage(sent: u32, received: u32) -> f64 {
    if sent == 0 {
        return 0.0;
    }
    let lost = sent.saturating_sub(received) as f64;
    (100.0 * lost / sent as f64 * 100.0).round() / 100.0
}

/// Unix seconds as `YYYY-MM-DDTHH:MM:SSZ`, empty if out of range.
pub fn iso_timestamp(unix: i64) -> String {
    DateTime::<Utc>::from_timestamp(unix, 0)
        .map(|dt| dt.format("%Y-%m-%dT%H:%M:%SZ").to_string())
        .unwrap_or_default()
}

/// A creation failure kept for manual review.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailedTarget {
    pub target: String,
    pub timestamp: String,
    pub error: String,
}

impl FailedTarget {
    pub const MAX_ERROR_CHARS: usize = 500;

    pub fn new(target: &str, error: &str, at: DateTime<Utc>) -> Self {
        let flat = error.trim().replace(['\r', '\n'], " ");
        Self {
            target: target.to_string(),
            timestamp: at.to_rfc3339_opts(SecondsFormat::Secs, true),
            error: flat.chars().take(Self::MAX_ERROR_CHARS).collect(),
        }
    }
}

/// Ownership and location details for an address.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IpDetails {
    pub ip_address: String,
    pub asn: Option<String>,
    pub as_name: Option<String>,
    pub as_domain: Option<String>,
    pub country_code: Option<String>,
    pub country: Option<String>,
    pub continent: Option<String>,
    pub continent_code: Option<String>,
}

/// City-level location and routing details from the GeoLite service.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GeoLocation {
    pub ip_address: String,
    pub as_num: Option<u32>,
    pub as_org: Option<String>,
    pub network: Option<String>,
    pub continent: Option<String>,
    pub continent_code: Option<String>,
    pub country: Option<String>,
    pub country_iso: Option<String>,
    pub registered_country: Option<String>,
    pub registered_country_iso: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub time_zone: Option<String>,
    pub accuracy_radius_km: Option<u32>,
}

/// One hop of a normalized traceroute.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TracerouteHop {
    pub hop: u32,
    /// Responding router; `None` when every packet at this hop timed out
    pub from: Option<String>,
    pub rtt: Option<f64>,
    pub ipinfo: Option<IpDetails>,
    pub geolite: Option<GeoLocation>,
}

impl TracerouteHop {
    /// Address worth looking up, if the hop answered.
    pub fn responder(&self) -> Option<&str> {
        self.from.as_deref().filter(|ip| !ip.is_empty() && *ip != "*")
    }
}

/// A probe's traceroute reduced to one entry per hop.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TracerouteRecord {
    #[serde(rename = "measurement_id")]
    pub job_id: Option<u64>,
    pub probe_id: u64,
    pub src_addr: Option<String>,
    pub dst_addr: Option<String>,
    #[serde(rename = "destination_ip_responded")]
    pub destination_responded: bool,
    pub hops: Vec<TracerouteHop>,
}

impl TracerouteRecord {
    /// Keep the first reply of each hop. A hop whose first reply is neither
    /// an answer nor a timeout (an ICMP error, say) is dropped; a hop without
    /// a number takes its 1-based position.
    pub fn from_raw(raw: &RawTracerouteResult) -> Result<Self, MalformedRecord> {
        let probe_id = raw
            .prb_id
            .ok_or_else(|| MalformedRecord::new("traceroute result", "row without prb_id"))?;

        let hops = raw
            .result
            .iter()
            .enumerate()
            .filter_map(|(pos, hop)| {
                let first = hop.result.first()?;
                let number = hop.hop.unwrap_or(pos as u32 + 1);
                let (from, rtt) = match (&first.from, &first.x) {
                    (Some(from), _) => (Some(from.clone()), first.rtt),
                    (None, Some(_)) => (None, None),
                    (None, None) => return None,
                };
                Some(TracerouteHop {
                    hop: number,
                    from,
                    rtt,
                    ipinfo: None,
                    geolite: None,
                })
            })
            .collect();

        Ok(Self {
            job_id: raw.msm_id,
            probe_id,
            src_addr: raw.src_addr.clone(),
            dst_addr: raw.dst_addr.clone().or_else(|| raw.dst_name.clone()),
            destination_responded: raw.destination_ip_responded.unwrap_or(false),
            hops,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::atlas::{Geometry, NamedStatus, PingReply, RawHop, RawHopReply};

    fn raw(sent: u32, rcvd: u32, rtts: &[f64]) -> RawPingResult {
        RawPingResult {
            msm_id: Some(10),
            prb_id: Some(3),
            dst_addr: Some("8.8.8.8".to_string()),
            from: Some("41.0.0.1".to_string()),
            timestamp: Some(1_700_000_000),
            sent: Some(sent),
            rcvd: Some(rcvd),
            min: Some(if rcvd > 0 { 1.0 } else { -1.0 }),
            avg: Some(if rcvd > 0 { 2.0 } else { -1.0 }),
            max: Some(if rcvd > 0 { 3.0 } else { -1.0 }),
            result: rtts.iter().map(|r| PingReply { rtt: Some(*r) }).collect(),
            ..Default::default()
        }
    }

    #[test]
    fn test_loss_percentage_bounds() {
        for sent in (0..=10_000u32).step_by(7) {
            for received in [0, sent / 3, sent / 2, sent] {
                let loss = loss_percentage(sent, received);
                assert!((0.0..=100.0).contains(&loss), "sent={} rcvd={} loss={}", sent, received, loss);
            }
        }
        assert_eq!(loss_percentage(0, 0), 0.0);
        assert_eq!(loss_percentage(3, 2), 33.33);
        assert_eq!(loss_percentage(3, 0), 100.0);
        // More replies than requests never yields negative loss.
        assert_eq!(loss_percentage(3, 5), 0.0);
    }

    #[test]
    fn test_rtt_padding() {
        let row = PingResultRow::from_raw(1, 10, &raw(3, 1, &[12.5])).unwrap();
        assert_eq!(row.rtt1, Some(12.5));
        assert_eq!(row.rtt2, None);
        assert_eq!(row.rtt3, None);

        let row = PingResultRow::from_raw(1, 10, &raw(5, 5, &[1.0, 2.0, 3.0, 4.0, 5.0])).unwrap();
        assert_eq!((row.rtt1, row.rtt2, row.rtt3), (Some(1.0), Some(2.0), Some(3.0)));
    }

    #[test]
    fn test_no_reply_has_no_summary_rtts() {
        let row = PingResultRow::from_raw(2, 10, &raw(3, 0, &[])).unwrap();
        assert_eq!(row.loss_pct, 100.0);
        assert_eq!(row.min_rtt, None);
        assert_eq!(row.avg_rtt, None);
        assert_eq!(row.max_rtt, None);
        assert_eq!(row.seq, 2);
    }

    #[test]
    fn test_timestamps_and_fallback_fields() {
        let mut r = raw(3, 3, &[1.0, 1.1, 1.2]);
        r.dst_addr = None;
        r.dst_name = Some("1.1.1.1".to_string());
        r.from = None;
        r.src_addr = Some("10.0.0.1".to_string());
        let row = PingResultRow::from_raw(1, 10, &r).unwrap();
        assert_eq!(row.ts_iso, "2023-11-14T22:13:20Z");
        assert_eq!(row.target.as_deref(), Some("1.1.1.1"));
        assert_eq!(row.source_addr.as_deref(), Some("10.0.0.1"));

        r.timestamp = None;
        let row = PingResultRow::from_raw(1, 10, &r).unwrap();
        assert_eq!(row.ts_iso, "");
    }

    #[test]
    fn test_missing_probe_id_is_malformed() {
        let mut r = raw(3, 3, &[]);
        r.prb_id = None;
        let err = PingResultRow::from_raw(1, 10, &r).unwrap_err();
        assert_eq!(err.kind, "ping result");
    }

    #[test]
    fn test_ledger_last_writer_wins() {
        let ledger = TargetLedger::from_entries(vec![
            LedgerEntry { target: "8.8.8.8".into(), job_id: 1 },
            LedgerEntry { target: "1.1.1.1".into(), job_id: 2 },
            LedgerEntry { target: "8.8.8.8".into(), job_id: 3 },
        ]);
        assert_eq!(ledger.len(), 2);
        assert!(ledger.contains("8.8.8.8"));
        assert_eq!(ledger.job_ids(), vec![3, 2]);
        assert!(ledger.contains("1.1.1.1"));
        assert!(!ledger.contains("9.9.9.9"));
    }

    #[test]
    fn test_probe_from_record() {
        let probe = Probe::from(ProbeRecord {
            id: 42,
            country_code: Some("KE".into()),
            asn_v4: Some(33771),
            geometry: Some(Geometry { coordinates: Some(vec![36.8, -1.3]) }),
            status: Some(NamedStatus { name: Some("Connected".into()) }),
            is_public: true,
            ..Default::default()
        });
        assert_eq!(probe.selection_key(), Some(("KE", 33771)));
        assert_eq!(probe.latitude, Some(-1.3));
        assert_eq!(probe.longitude, Some(36.8));
        assert_eq!(probe.status.as_deref(), Some("Connected"));
    }

    fn reply(from: Option<&str>, rtt: Option<f64>, x: Option<&str>) -> RawHopReply {
        RawHopReply {
            from: from.map(str::to_string),
            rtt,
            x: x.map(str::to_string),
        }
    }

    #[test]
    fn test_traceroute_keeps_first_reply_per_hop() {
        let raw = RawTracerouteResult {
            msm_id: Some(70),
            prb_id: Some(4),
            dst_name: Some("192.0.2.9".into()),
            destination_ip_responded: Some(true),
            result: vec![
                RawHop {
                    hop: Some(1),
                    result: vec![reply(Some("10.0.0.1"), Some(0.5), None), reply(Some("10.0.0.2"), Some(0.9), None)],
                },
                RawHop {
                    hop: Some(2),
                    result: vec![reply(None, None, Some("*"))],
                },
                RawHop {
                    hop: Some(3),
                    result: vec![RawHopReply::default()],
                },
                RawHop { hop: Some(4), result: vec![] },
                RawHop {
                    hop: None,
                    result: vec![reply(Some("192.0.2.9"), Some(12.0), None)],
                },
            ],
            ..Default::default()
        };

        let record = TracerouteRecord::from_raw(&raw).unwrap();
        assert_eq!(record.job_id, Some(70));
        assert_eq!(record.dst_addr.as_deref(), Some("192.0.2.9"));
        assert!(record.destination_responded);

        let hops: Vec<(u32, Option<&str>, Option<f64>)> = record
            .hops
            .iter()
            .map(|h| (h.hop, h.from.as_deref(), h.rtt))
            .collect();
        assert_eq!(
            hops,
            vec![(1, Some("10.0.0.1"), Some(0.5)), (2, None, None), (5, Some("192.0.2.9"), Some(12.0))]
        );
        assert_eq!(record.hops[0].responder(), Some("10.0.0.1"));
        assert_eq!(record.hops[1].responder(), None);
    }

    #[test]
    fn test_traceroute_without_probe_is_malformed() {
        let err = TracerouteRecord::from_raw(&RawTracerouteResult::default()).unwrap_err();
        assert_eq!(err.kind, "traceroute result");
    }

    #[test]
    fn test_failed_target_is_flattened_and_truncated() {
        let at = DateTime::<Utc>::from_timestamp(0, 0).unwrap();
        let failure = FailedTarget::new("8.8.8.8", &format!("line one\nline two {}", "x".repeat(600)), at);
        assert!(!failure.error.contains('\n'));
        assert_eq!(failure.error.chars().count(), FailedTarget::MAX_ERROR_CHARS);
        assert_eq!(failure.timestamp, "1970-01-01T00:00:00Z");
    }
}
