use std::cmp::Ordering;
use std::collections::BTreeMap;

use tracing::info;

use super::OrchestratorError;
use crate::atlas::RemotePlatform;
use crate::db::{Probe, ProbeCache, Store};
use crate::regions::Region;

/// Loads the probe inventory and narrows it to a region, caching both.
pub struct ProbeSelector<'a> {
    store: &'a Store,
}

impl<'a> ProbeSelector<'a> {
    pub fn new(store: &'a Store) -> Self {
        Self { store }
    }

    /// All connected probes, from cache when present.
    ///
    /// The cache is written only after every page was fetched, so an
    /// interrupted download never leaves a truncated inventory behind.
    pub async fn load_all_probes<P>(&self, platform: &P) -> Result<Vec<Probe>, OrchestratorError>
    where
        P: RemotePlatform + ?Sized,
    {
        let cached = self.store.read_probe_cache(ProbeCache::All)?;
        if !cached.is_empty() {
            info!("Loaded {} probes from cache", cached.len());
            return Ok(cached);
        }

        info!("Fetching probe inventory");
        let mut probes = Vec::new();
        let mut cursor: Option<String> = None;
        let mut pages = 0usize;
        loop {
            let page = platform.probe_page(cursor.as_deref()).await?;
            pages += 1;
            probes.extend(page.probes.into_iter().map(Probe::from));
            match page.next {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }

        info!("Fetched {} probes over {} pages", probes.len(), pages);
        self.store.write_probe_cache(ProbeCache::All, &probes)?;
        Ok(probes)
    }

    /// Probes located in `region`, from the region cache when present.
    pub async fn select_region<P>(&self, platform: &P, region: Region) -> Result<Vec<Probe>, OrchestratorError>
    where
        P: RemotePlatform + ?Sized,
    {
        let cache = ProbeCache::Region(region);
        let cached = self.store.read_probe_cache(cache)?;
        if !cached.is_empty() {
            info!("Loaded {} {} probes from cache", cached.len(), region.name());
            return Ok(cached);
        }

        let selected: Vec<Probe> = self
            .load_all_probes(platform)
            .await?
            .into_iter()
            .filter(|p| p.country_code.as_deref().is_some_and(|cc| region.contains(cc)))
            .collect();

        info!("Selected {} {} probes", selected.len(), region.name());
        self.store.write_probe_cache(cache, &selected)?;
        Ok(selected)
    }
}

/// Keep one probe per (country, origin network).
///
/// Within a bucket the most recently connected probe wins, then the one with
/// the longest uptime, then the lowest id. Probes without a country or
/// network are dropped. Output is ordered by (country, network).
pub fn reduce_to_one_per_network(probes: &[Probe]) -> Vec<Probe> {
    let mut best: BTreeMap<(&str, u32), &Probe> = BTreeMap::new();
    for probe in probes {
        let Some(key) = probe.selection_key() else {
            continue;
        };
        best.entry(key)
            .and_modify(|current| {
                if preference(probe, current) == Ordering::Less {
                    *current = probe;
                }
            })
            .or_insert(probe);
    }
    best.into_values().cloned().collect()
}

/// `Less` when `a` is preferred over `b`.
fn preference(a: &Probe, b: &Probe) -> Ordering {
    b.last_connected
        .cmp(&a.last_connected)
        .then_with(|| b.total_uptime.cmp(&a.total_uptime))
        .then_with(|| a.id.cmp(&b.id))
}
