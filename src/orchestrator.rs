//! Region collection loop: fan-out to collectors, differential polling of
//! the global network tier, station ingestion, fusion, and snapshot
//! publication.
//!
//! Each region runs independently within a cycle; a failing region never
//! blocks the others. The local tier is fetched every cycle, the network
//! tier only once its cached result is older than the network interval.

use crate::aircraft::{Aircraft, Location, RegionSnapshot, StationPayload};
use crate::blender::{Blender, STATION_SOURCE_PREFIX};
use crate::collector::CollectorStats;
use crate::config::{CollectorKind, Config, RegionConfig};
use crate::dump1090::Dump1090Collector;
use crate::opensky::OpenSkyCollector;
use crate::store::Store;
use futures::future::join_all;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// Pause after a cycle that panicked or was cancelled at the task level.
const ERROR_PAUSE: Duration = Duration::from_secs(5);

/// Last good network-tier result for one region, reused between refreshes.
struct NetworkCache {
    aircraft: Vec<Aircraft>,
    fetched_at: Instant,
}

/// Mutable per-region state. Locked for the duration of that region's slice
/// of a cycle; regions never share collectors.
struct RegionRuntime {
    key: String,
    config: RegionConfig,
    local: Vec<Dump1090Collector>,
    network: Vec<OpenSkyCollector>,
    network_cache: Option<NetworkCache>,
}

pub struct Orchestrator {
    regions: Vec<Arc<Mutex<RegionRuntime>>>,
    store: Store,
    blender: Arc<Blender>,
    running: Arc<AtomicBool>,
    local_interval: Duration,
    network_interval: Duration,
    snapshot_ttl: Duration,
    stats: Vec<(String, Arc<CollectorStats>)>,
}

impl Orchestrator {
    pub fn new(config: &Config, store: Store, blender: Arc<Blender>) -> Self {
        let mut regions = Vec::new();
        let mut stats = Vec::new();

        for (key, region) in &config.regions {
            if !region.enabled {
                tracing::info!("Region '{}' disabled, skipping", key);
                continue;
            }

            let mut local = Vec::new();
            let mut network = Vec::new();
            for collector in region.collectors.iter().filter(|c| c.enabled) {
                match collector.kind {
                    CollectorKind::Dump1090 => match Dump1090Collector::new(collector, region) {
                        Ok(c) => {
                            stats.push((format!("{}/{}", key, c.name()), c.stats()));
                            local.push(c);
                        }
                        Err(e) => tracing::error!(
                            "Failed to initialize collector '{}' in region '{}': {}",
                            collector.display_name(),
                            key,
                            e
                        ),
                    },
                    CollectorKind::Opensky => match OpenSkyCollector::new(collector, region) {
                        Ok(c) => {
                            stats.push((format!("{}/{}", key, c.name()), c.stats()));
                            network.push(c);
                        }
                        Err(e) => tracing::error!(
                            "Failed to initialize collector '{}' in region '{}': {}",
                            collector.display_name(),
                            key,
                            e
                        ),
                    },
                }
            }

            if local.is_empty() && network.is_empty() {
                tracing::warn!("Region '{}' has no working collectors, dropping it", key);
                continue;
            }

            tracing::info!(
                "Region '{}' ({}): {} local + {} network collectors, {:.0} mi radius",
                key,
                region.name,
                local.len(),
                network.len(),
                region.radius_miles
            );
            regions.push(Arc::new(Mutex::new(RegionRuntime {
                key: key.clone(),
                config: region.clone(),
                local,
                network,
                network_cache: None,
            })));
        }

        Self {
            regions,
            store,
            blender,
            running: Arc::new(AtomicBool::new(true)),
            local_interval: Duration::from_secs(config.polling.local_interval_secs),
            network_interval: Duration::from_secs(config.polling.network_interval_secs),
            snapshot_ttl: Duration::from_secs(config.store.snapshot_ttl_secs),
            stats,
        }
    }

    /// Shared flag the signal handler flips to stop the loop after the
    /// current cycle.
    pub fn running_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.running)
    }

    /// Named stats handles for every collector, for the periodic report.
    pub fn stats_handles(&self) -> Vec<(String, Arc<CollectorStats>)> {
        self.stats.clone()
    }

    pub async fn run(self) {
        tracing::info!(
            "Collection loop started: {} regions, local every {:?}, network every {:?}",
            self.regions.len(),
            self.local_interval,
            self.network_interval
        );

        while self.running.load(Ordering::Relaxed) {
            let cycle_start = Instant::now();
            let mut tasks = Vec::with_capacity(self.regions.len());
            for region in &self.regions {
                let region = Arc::clone(region);
                let store = self.store.clone();
                let blender = Arc::clone(&self.blender);
                let network_interval = self.network_interval;
                let snapshot_ttl = self.snapshot_ttl;
                tasks.push(tokio::spawn(async move {
                    run_region(region, store, blender, network_interval, snapshot_ttl).await;
                }));
            }

            let mut cycle_failed = false;
            for result in join_all(tasks).await {
                if let Err(e) = result {
                    tracing::error!("Region task failed: {}", e);
                    cycle_failed = true;
                }
            }
            if cycle_failed {
                tokio::time::sleep(ERROR_PAUSE).await;
            }

            tracing::debug!("Cycle finished in {:.2}s", cycle_start.elapsed().as_secs_f64());
            tokio::time::sleep(self.local_interval).await;
        }

        tracing::info!("Collection loop stopped");
    }
}

async fn run_region(
    runtime: Arc<Mutex<RegionRuntime>>,
    store: Store,
    blender: Arc<Blender>,
    network_interval: Duration,
    snapshot_ttl: Duration,
) {
    let mut runtime = runtime.lock().await;
    let RegionRuntime {
        key,
        config,
        local,
        network,
        network_cache,
    } = &mut *runtime;

    let (local_aircraft, network_aircraft) = tokio::join!(
        fetch_local(key, local),
        fetch_network(key, network, network_cache, network_interval),
    );
    let station_aircraft = load_station_aircraft(&store, key).await;

    let fused = blender
        .blend(station_aircraft, local_aircraft, network_aircraft)
        .await;
    if fused.is_empty() {
        tracing::warn!("Region '{}': no aircraft data from any source, keeping previous snapshot", key);
        return;
    }

    if let Some(closest) = fused.iter().find(|a| a.distance_miles.is_some()) {
        tracing::info!(
            "Region '{}': closest aircraft {} at {:.1} mi ({})",
            key,
            closest.hex,
            closest.distance_miles.unwrap_or(0.0),
            closest.data_source
        );
    }

    let helicopters = blender.identify_helicopters(&fused);
    publish_snapshots(&store, key, config, &fused, &helicopters, snapshot_ttl).await;
    tracing::info!(
        "Region '{}': published {} aircraft ({} helicopters)",
        key,
        fused.len(),
        helicopters.len()
    );
}

async fn fetch_local(region_key: &str, collectors: &[Dump1090Collector]) -> Vec<Aircraft> {
    let mut aircraft = Vec::new();
    for result in join_all(collectors.iter().map(|c| c.fetch())).await {
        match result {
            Ok(Some(batch)) => aircraft.extend(batch),
            Ok(None) => {}
            Err(e) => tracing::warn!("Region '{}': {}", region_key, e),
        }
    }
    aircraft
}

/// Refresh the network tier only when the cached result is stale; a failed
/// refresh falls back to the cache rather than dropping the tier.
async fn fetch_network(
    region_key: &str,
    collectors: &mut [OpenSkyCollector],
    cache: &mut Option<NetworkCache>,
    network_interval: Duration,
) -> Vec<Aircraft> {
    if collectors.is_empty() {
        return Vec::new();
    }

    let now = Instant::now();
    if let Some(cached) = cache.as_ref() {
        let age = now.duration_since(cached.fetched_at);
        if age < network_interval {
            tracing::debug!(
                "Region '{}': reusing network data aged {:.0}s",
                region_key,
                age.as_secs_f64()
            );
            return cached.aircraft.clone();
        }
    }

    let mut aircraft = Vec::new();
    let mut fetched = false;
    for result in join_all(collectors.iter_mut().map(|c| c.fetch())).await {
        if let Some(batch) = result {
            aircraft.extend(batch);
            fetched = true;
        }
    }

    if fetched {
        *cache = Some(NetworkCache {
            aircraft: aircraft.clone(),
            fetched_at: now,
        });
        return aircraft;
    }

    match cache.as_ref() {
        Some(cached) => {
            tracing::warn!(
                "Region '{}': network refresh failed, reusing data aged {:.0}s",
                region_key,
                now.duration_since(cached.fetched_at).as_secs_f64()
            );
            cached.aircraft.clone()
        }
        None => Vec::new(),
    }
}

/// Read every station submission under `pi_data:{region}:` and tag each
/// record with its station of origin.
pub(crate) async fn load_station_aircraft(store: &Store, region_key: &str) -> Vec<Aircraft> {
    let prefix = format!("pi_data:{region_key}:");
    let keys = store.list_keys(&prefix).await;
    let mut aircraft = Vec::new();

    for key in keys {
        let Some(payload) = store.get_json::<StationPayload>(&key).await else {
            continue;
        };
        let station_id = payload
            .station_id
            .clone()
            .or_else(|| key.rsplit(':').next().map(str::to_string))
            .unwrap_or_else(|| "unknown".to_string());

        for value in payload.aircraft {
            let record = match serde_json::from_value::<Aircraft>(value) {
                Ok(record) => record,
                Err(e) => {
                    tracing::debug!("Skipping malformed record from station {}: {}", station_id, e);
                    continue;
                }
            };
            if record.hex.trim().is_empty() {
                continue;
            }
            let mut record = record;
            if !record.data_source.starts_with(STATION_SOURCE_PREFIX) {
                record.data_source = format!("{STATION_SOURCE_PREFIX}_{station_id}");
            }
            aircraft.push(record);
        }
    }

    if !aircraft.is_empty() {
        tracing::debug!(
            "Region '{}': {} aircraft from station submissions",
            region_key,
            aircraft.len()
        );
    }
    aircraft
}

/// One pipelined write per cycle: the flights and helicopter snapshots plus
/// a live record per aircraft, all sharing the snapshot TTL.
pub(crate) async fn publish_snapshots(
    store: &Store,
    region_key: &str,
    region: &RegionConfig,
    aircraft: &[Aircraft],
    helicopters: &[Aircraft],
    ttl: Duration,
) {
    let timestamp = chrono::Utc::now().to_rfc3339();
    let location = Location {
        name: region.name.clone(),
        lat: region.center.lat,
        lon: region.center.lon,
    };
    let snapshot = |list: &[Aircraft]| RegionSnapshot {
        timestamp: timestamp.clone(),
        aircraft_count: list.len(),
        aircraft: list.to_vec(),
        location: location.clone(),
        region: region_key.to_string(),
    };

    let mut entries = Vec::with_capacity(aircraft.len() + 2);
    match serde_json::to_value(snapshot(aircraft)) {
        Ok(value) => entries.push((format!("{region_key}:flights"), value)),
        Err(e) => tracing::error!("Failed to serialize flights snapshot: {}", e),
    }
    match serde_json::to_value(snapshot(helicopters)) {
        Ok(value) => entries.push((format!("{region_key}:choppers"), value)),
        Err(e) => tracing::error!("Failed to serialize helicopter snapshot: {}", e),
    }
    for a in aircraft {
        match serde_json::to_value(a) {
            Ok(value) => entries.push((format!("aircraft_live:{}", a.hex), value)),
            Err(e) => tracing::error!("Failed to serialize aircraft {}: {}", a.hex, e),
        }
    }

    store.set_json_batch(&entries, ttl).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Center;
    use serde_json::json;

    fn region() -> RegionConfig {
        RegionConfig {
            enabled: true,
            name: "Southern California".into(),
            center: Center {
                lat: 34.05,
                lon: -118.24,
            },
            radius_miles: 150.0,
            collectors: Vec::new(),
        }
    }

    #[tokio::test]
    async fn station_records_are_tagged_and_filtered() {
        let store = Store::memory();
        let ttl = Duration::from_secs(300);
        store
            .set_json(
                "pi_data:socal:ETEX01",
                &json!({
                    "station_id": "ETEX01",
                    "aircraft": [
                        { "hex": "abc123", "lat": 34.0, "lon": -118.0 },
                        { "hex": "", "lat": 34.1, "lon": -118.1 },
                        { "hex": "def456", "data_source": "pi_station_custom" },
                        "not an object"
                    ]
                }),
                ttl,
            )
            .await;
        // different region, must not leak in
        store
            .set_json(
                "pi_data:norcal:OTHER",
                &json!({ "aircraft": [{ "hex": "999999" }] }),
                ttl,
            )
            .await;

        let mut aircraft = load_station_aircraft(&store, "socal").await;
        aircraft.sort_by(|a, b| a.hex.cmp(&b.hex));
        assert_eq!(aircraft.len(), 2);
        assert_eq!(aircraft[0].hex, "abc123");
        assert_eq!(aircraft[0].data_source, "pi_station_ETEX01");
        // an existing station tag is preserved
        assert_eq!(aircraft[1].data_source, "pi_station_custom");
    }

    #[tokio::test]
    async fn station_id_falls_back_to_key_suffix() {
        let store = Store::memory();
        store
            .set_json(
                "pi_data:socal:ETEX02",
                &json!({ "aircraft": [{ "hex": "abc123" }] }),
                Duration::from_secs(300),
            )
            .await;

        let aircraft = load_station_aircraft(&store, "socal").await;
        assert_eq!(aircraft.len(), 1);
        assert_eq!(aircraft[0].data_source, "pi_station_ETEX02");
    }

    #[tokio::test]
    async fn publish_writes_snapshots_and_live_records() {
        let store = Store::memory();
        let mut heli = Aircraft::new("HELI01", "dump1090");
        heli.icao_aircraft_class = Some("H1P".into());
        let jet = Aircraft::new("JET001", "opensky");
        let all = vec![heli.clone(), jet];
        let helicopters = vec![heli];

        publish_snapshots(
            &store,
            "socal",
            &region(),
            &all,
            &helicopters,
            Duration::from_secs(300),
        )
        .await;

        let flights: RegionSnapshot = store.get_json("socal:flights").await.unwrap();
        assert_eq!(flights.aircraft_count, 2);
        assert_eq!(flights.region, "socal");
        assert_eq!(flights.location.name, "Southern California");

        let choppers: RegionSnapshot = store.get_json("socal:choppers").await.unwrap();
        assert_eq!(choppers.aircraft_count, 1);
        assert_eq!(choppers.aircraft[0].hex, "HELI01");

        let live: Aircraft = store.get_json("aircraft_live:JET001").await.unwrap();
        assert_eq!(live.data_source, "opensky");
        assert_eq!(store.count_keys("aircraft_live:").await, 2);
    }

    #[tokio::test]
    async fn snapshots_expire_with_ttl() {
        let store = Store::memory();
        publish_snapshots(
            &store,
            "socal",
            &region(),
            &[Aircraft::new("ABC123", "opensky")],
            &[],
            Duration::ZERO,
        )
        .await;

        let flights: Option<RegionSnapshot> = store.get_json("socal:flights").await;
        assert!(flights.is_none());
    }
}
