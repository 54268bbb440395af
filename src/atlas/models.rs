//! Wire types exchanged with the measurement platform.

use std::fmt;
use std::str::FromStr;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::db::MalformedRecord;

/// Kind of measurement a job runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MeasurementKind {
    #[default]
    Ping,
    Traceroute,
}

impl MeasurementKind {
    pub fn as_str(self) -> &'static str {
        match self {
            MeasurementKind::Ping => "ping",
            MeasurementKind::Traceroute => "traceroute",
        }
    }
}

impl fmt::Display for MeasurementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MeasurementKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "ping" => Ok(MeasurementKind::Ping),
            "traceroute" => Ok(MeasurementKind::Traceroute),
            other => Err(format!("unknown measurement kind: {}", other)),
        }
    }
}

// ============================================================================
// Probes
// ============================================================================

/// A probe as listed by the platform.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProbeRecord {
    pub id: u64,
    #[serde(default)]
    pub country_code: Option<String>,
    #[serde(default)]
    pub asn_v4: Option<u32>,
    #[serde(default)]
    pub asn_v6: Option<u32>,
    #[serde(default)]
    pub address_v4: Option<String>,
    #[serde(default)]
    pub prefix_v4: Option<String>,
    #[serde(default)]
    pub geometry: Option<Geometry>,
    #[serde(default)]
    pub last_connected: Option<i64>,
    #[serde(default)]
    pub total_uptime: Option<u64>,
    #[serde(default)]
    pub is_anchor: bool,
    #[serde(default)]
    pub is_public: bool,
    #[serde(default)]
    pub status: Option<NamedStatus>,
}

/// GeoJSON point, `[longitude, latitude]`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Geometry {
    #[serde(default)]
    pub coordinates: Option<Vec<f64>>,
}

impl Geometry {
    pub fn lon_lat(&self) -> Option<(f64, f64)> {
        match self.coordinates.as_deref() {
            Some([lon, lat, ..]) => Some((*lon, *lat)),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NamedStatus {
    #[serde(default)]
    pub name: Option<String>,
}

/// One page of the probe inventory.
#[derive(Debug, Clone, Default)]
pub struct ProbePage {
    pub probes: Vec<ProbeRecord>,
    /// Cursor for the following page, `None` on the last page.
    pub next: Option<String>,
}

// ============================================================================
// Measurement creation
// ============================================================================

/// Body of a measurement creation request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MeasurementRequest {
    pub definitions: Vec<MeasurementDefinition>,
    pub probes: Vec<ProbeSelection>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MeasurementDefinition {
    pub target: String,
    pub description: String,
    #[serde(rename = "type")]
    pub kind: MeasurementKind,
    pub af: u8,
    pub is_oneoff: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProbeSelection {
    pub requested: usize,
    #[serde(rename = "type")]
    pub selector: &'static str,
    pub value: String,
}

impl MeasurementRequest {
    /// One-off IPv4 measurement of `target` from exactly the given probes.
    pub fn one_off(target: &str, kind: MeasurementKind, probe_ids: &[u64]) -> Self {
        let value = probe_ids
            .iter()
            .map(|id| id.to_string())
            .collect::<Vec<_>>()
            .join(",");

        Self {
            definitions: vec![MeasurementDefinition {
                target: target.to_string(),
                description: format!("{} measurement for {}", kind, target),
                kind,
                af: 4,
                is_oneoff: true,
            }],
            probes: vec![ProbeSelection {
                requested: probe_ids.len(),
                selector: "probes",
                value,
            }],
        }
    }

    pub fn target(&self) -> Option<&str> {
        self.definitions.first().map(|d| d.target.as_str())
    }
}

/// Platform reply to a creation request.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CreatedMeasurement {
    #[serde(default)]
    pub measurements: Vec<u64>,
}

impl CreatedMeasurement {
    pub fn job_id(&self) -> Option<u64> {
        self.measurements.first().copied()
    }
}

// ============================================================================
// Results and metadata
// ============================================================================

/// A single probe's ping result as returned by the platform.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawPingResult {
    #[serde(default)]
    pub msm_id: Option<u64>,
    #[serde(default)]
    pub group_id: Option<u64>,
    #[serde(default)]
    pub prb_id: Option<u64>,
    #[serde(default)]
    pub dst_addr: Option<String>,
    #[serde(default)]
    pub dst_name: Option<String>,
    #[serde(default)]
    pub from: Option<String>,
    #[serde(default)]
    pub src_addr: Option<String>,
    #[serde(default)]
    pub timestamp: Option<i64>,
    #[serde(default)]
    pub sent: Option<u32>,
    #[serde(default)]
    pub rcvd: Option<u32>,
    #[serde(default)]
    pub min: Option<f64>,
    #[serde(default)]
    pub avg: Option<f64>,
    #[serde(default)]
    pub max: Option<f64>,
    #[serde(default)]
    pub result: Vec<PingReply>,
}

/// One echo reply; timeouts and errors carry no `rtt`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PingReply {
    #[serde(default)]
    pub rtt: Option<f64>,
}

/// Measurement metadata record.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MeasurementMeta {
    pub id: u64,
    #[serde(default)]
    pub target: Option<String>,
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
    #[serde(default)]
    pub status: Option<NamedStatus>,
    #[serde(default)]
    pub creation_time: Option<i64>,
    #[serde(default)]
    pub start_time: Option<i64>,
    #[serde(default)]
    pub stop_time: Option<i64>,
    #[serde(default)]
    pub probes_scheduled: Option<u32>,
}

/// A single probe's traceroute result as returned by the platform.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawTracerouteResult {
    #[serde(default)]
    pub msm_id: Option<u64>,
    #[serde(default)]
    pub prb_id: Option<u64>,
    #[serde(default)]
    pub src_addr: Option<String>,
    #[serde(default)]
    pub dst_addr: Option<String>,
    #[serde(default)]
    pub dst_name: Option<String>,
    #[serde(default)]
    pub timestamp: Option<i64>,
    #[serde(default)]
    pub destination_ip_responded: Option<bool>,
    #[serde(default)]
    pub result: Vec<RawHop>,
}

/// One hop of a traceroute with the replies to each packet sent at that TTL.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawHop {
    #[serde(default)]
    pub hop: Option<u32>,
    #[serde(default)]
    pub result: Vec<RawHopReply>,
}

/// A reply at one hop. Unanswered packets carry `x: "*"` instead of `from`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawHopReply {
    #[serde(default)]
    pub from: Option<String>,
    #[serde(default)]
    pub rtt: Option<f64>,
    #[serde(default)]
    pub x: Option<String>,
}

/// Decode an uploaded traceroute export.
///
/// Accepts a JSON array or newline-delimited JSON. Lines and elements that
/// do not decode are skipped with a warning.
pub fn decode_traceroute_export(body: &str) -> Vec<RawTracerouteResult> {
    const KIND: &str = "traceroute result";

    let trimmed = body.trim_start();
    if trimmed.starts_with('[') {
        return match serde_json::from_str::<Vec<Value>>(trimmed) {
            Ok(values) => decode_each(values, KIND),
            Err(e) => {
                tracing::warn!("Skipping record: {}", MalformedRecord::new(KIND, e.to_string()));
                Vec::new()
            }
        };
    }

    let values = body
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .filter_map(|(i, line)| match serde_json::from_str::<Value>(line) {
            Ok(value) => Some(value),
            Err(e) => {
                let err = MalformedRecord::new(KIND, format!("line {}: {}", i + 1, e));
                tracing::warn!("Skipping record: {}", err);
                None
            }
        })
        .collect();
    decode_each(values, KIND)
}

/// Decode each element on its own, skipping the ones that do not fit `T`.
pub fn decode_each<T: DeserializeOwned>(values: Vec<Value>, kind: &'static str) -> Vec<T> {
    values
        .into_iter()
        .filter_map(|value| match serde_json::from_value::<T>(value) {
            Ok(record) => Some(record),
            Err(e) => {
                let err = MalformedRecord::new(kind, e.to_string());
                tracing::warn!("Skipping record: {}", err);
                None
            }
        })
        .collect()
}
