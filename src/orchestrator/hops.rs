use std::collections::HashMap;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::atlas::RawTracerouteResult;
use crate::db::{GeoLocation, IpDetails, TracerouteRecord};
use crate::intel::{GeoLookup, IpIntelligence};

/// Normalized traceroutes and what hop enrichment found.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TracerouteReport {
    pub total: usize,
    /// Hops that answered, counted once per traceroute
    pub responding_hops: usize,
    pub lookup_errors: usize,
    pub traceroutes: Vec<TracerouteRecord>,
}

/// Normalize every traceroute, skipping the malformed ones.
pub fn normalize_traceroutes(raw: &[RawTracerouteResult]) -> Vec<TracerouteRecord> {
    raw.iter()
        .filter_map(|r| match TracerouteRecord::from_raw(r) {
            Ok(record) => Some(record),
            Err(e) => {
                warn!("Skipping record: {}", e);
                None
            }
        })
        .collect()
}

type HopDetails = (Option<IpDetails>, Option<GeoLocation>);

/// Attaches IP intelligence and GeoLite details to responding hops.
///
/// Either source may be absent, in which case its field stays empty. Each
/// router address is looked up once per enrichment, however many
/// traceroutes cross it. A failed lookup is logged and leaves the field empty.
pub struct HopEnricher<'a> {
    intel: Option<&'a dyn IpIntelligence>,
    geo: Option<&'a dyn GeoLookup>,
    seen: HashMap<String, HopDetails>,
    errors: usize,
}

impl<'a> HopEnricher<'a> {
    pub fn new(intel: Option<&'a dyn IpIntelligence>, geo: Option<&'a dyn GeoLookup>) -> Self {
        Self {
            intel,
            geo,
            seen: HashMap::new(),
            errors: 0,
        }
    }

    pub async fn enrich(mut self, mut records: Vec<TracerouteRecord>) -> TracerouteReport {
        if self.intel.is_none() && self.geo.is_none() {
            warn!("No IP intelligence or GeoLite credentials configured, hops stay bare");
        }

        let mut responding = 0usize;
        for record in records.iter_mut() {
            for hop in record.hops.iter_mut() {
                let Some(ip) = hop.responder().map(str::to_string) else {
                    continue;
                };
                responding += 1;
                let (ipinfo, geolite) = self.resolve(&ip).await;
                hop.ipinfo = ipinfo;
                hop.geolite = geolite;
            }
        }

        info!(
            "Enriched {} responding hops across {} traceroutes ({} distinct, {} errors)",
            responding,
            records.len(),
            self.seen.len(),
            self.errors
        );
        TracerouteReport {
            total: records.len(),
            responding_hops: responding,
            lookup_errors: self.errors,
            traceroutes: records,
        }
    }

    async fn resolve(&mut self, ip: &str) -> HopDetails {
        if let Some(found) = self.seen.get(ip) {
            return found.clone();
        }

        let ipinfo = match self.intel {
            Some(intel) => match intel.lookup(ip).await {
                Ok(details) => details,
                Err(e) => {
                    warn!("Lookup failed for hop {}: {}", ip, e);
                    self.errors += 1;
                    None
                }
            },
            None => None,
        };
        let geolite = match self.geo {
            Some(geo) => match geo.city(ip).await {
                Ok(location) => location,
                Err(e) => {
                    warn!("GeoLite lookup failed for hop {}: {}", ip, e);
                    self.errors += 1;
                    None
                }
            },
            None => None,
        };

        debug!("Resolved hop {}", ip);
        self.seen.insert(ip.to_string(), (ipinfo.clone(), geolite.clone()));
        (ipinfo, geolite)
    }
}
