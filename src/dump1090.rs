//! Local ADS-B receiver collector (dump1090/tar1090 `aircraft.json`).
//!
//! Polled every cycle at the fast interval. Numeric fields arrive already in
//! feet/knots/ft-per-min, so conversion is pass-through; the shared distance
//! filter and sort run after conversion.

use crate::aircraft::Aircraft;
use crate::collector::{CollectorStats, FetchError, StatsSnapshot};
use crate::config::{CollectorConfig, RegionConfig};
use crate::geo;
use serde::Deserialize;
use std::sync::Arc;
use std::time::{Duration, Instant};

pub const SOURCE: &str = "dump1090";

const FETCH_TIMEOUT: Duration = Duration::from_secs(10);

pub struct Dump1090Collector {
    name: String,
    url: String,
    enabled: bool,
    client: reqwest::Client,
    center_lat: f64,
    center_lon: f64,
    radius_miles: f64,
    stats: Arc<CollectorStats>,
}

impl Dump1090Collector {
    pub fn new(config: &CollectorConfig, region: &RegionConfig) -> Result<Self, reqwest::Error> {
        // dump1090 typically serves the tar1090 layout
        let mut url = config.url.clone();
        if !url.ends_with("/data/aircraft.json") {
            if !url.ends_with('/') {
                url.push('/');
            }
            url.push_str("data/aircraft.json");
        }

        let client = reqwest::Client::builder().timeout(FETCH_TIMEOUT).build()?;
        let name = config.display_name().to_string();
        tracing::info!("dump1090 collector '{}' configured at {}", name, url);

        Ok(Self {
            name,
            url,
            enabled: config.enabled,
            client,
            center_lat: region.center.lat,
            center_lon: region.center.lon,
            radius_miles: region.radius_miles,
            stats: Arc::new(CollectorStats::new()),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn stats(&self) -> Arc<CollectorStats> {
        Arc::clone(&self.stats)
    }

    pub fn stats_snapshot(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Fetch, normalize, distance-filter, and sort the receiver's current
    /// aircraft list. Failures update stats and surface as [`FetchError`]
    /// for the orchestrator to log; they never abort a cycle.
    pub async fn fetch(&self) -> Result<Option<Vec<Aircraft>>, FetchError> {
        if !self.enabled {
            return Ok(None);
        }

        let start = Instant::now();
        match self.fetch_inner().await {
            Ok(aircraft) => {
                self.stats.record_success(aircraft.len());
                tracing::info!(
                    "dump1090 ({}): {} aircraft in {:.2}s",
                    self.name,
                    aircraft.len(),
                    start.elapsed().as_secs_f64()
                );
                Ok(Some(aircraft))
            }
            Err(e) => {
                self.stats.record_failure();
                Err(e)
            }
        }
    }

    async fn fetch_inner(&self) -> Result<Vec<Aircraft>, FetchError> {
        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|e| self.request_error(e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                collector: self.name.clone(),
                endpoint: self.url.clone(),
                status,
            });
        }

        let payload: serde_json::Value = response
            .json()
            .await
            .map_err(|e| self.request_error(e))?;

        let aircraft = convert_payload(&payload);
        let mut aircraft =
            geo::filter_by_radius(aircraft, self.center_lat, self.center_lon, self.radius_miles);
        geo::sort_by_distance(&mut aircraft);
        Ok(aircraft)
    }

    fn request_error(&self, source: reqwest::Error) -> FetchError {
        if source.is_timeout() {
            FetchError::Timeout {
                collector: self.name.clone(),
                timeout: FETCH_TIMEOUT,
            }
        } else {
            FetchError::Connection {
                collector: self.name.clone(),
                endpoint: self.url.clone(),
                source,
            }
        }
    }
}

/// Raw aircraft.json entry. Decoded per element so one malformed record is
/// skipped without failing the batch.
#[derive(Debug, Deserialize)]
struct RawAircraft {
    #[serde(default)]
    hex: String,
    flight: Option<String>,
    lat: Option<f64>,
    lon: Option<f64>,
    alt_baro: Option<i64>,
    alt_geom: Option<i64>,
    gs: Option<f64>,
    track: Option<f64>,
    baro_rate: Option<f64>,
    squawk: Option<String>,
    #[serde(default)]
    on_ground: bool,
    seen: Option<f64>,
    rssi: Option<f64>,
    messages: Option<i64>,
}

impl RawAircraft {
    fn into_aircraft(self) -> Option<Aircraft> {
        let hex = self.hex.trim().to_uppercase();
        if hex.is_empty() {
            return None;
        }
        let mut aircraft = Aircraft::new(hex, SOURCE);
        aircraft.flight = self
            .flight
            .map(|f| f.trim().to_string())
            .filter(|f| !f.is_empty());
        aircraft.lat = self.lat;
        aircraft.lon = self.lon;
        aircraft.alt_baro = self.alt_baro;
        aircraft.alt_geom = self.alt_geom;
        aircraft.gs = self.gs;
        aircraft.track = self.track;
        aircraft.baro_rate = self.baro_rate;
        aircraft.squawk = self.squawk;
        aircraft.on_ground = self.on_ground;
        aircraft.seen = self.seen;
        aircraft.rssi = self.rssi;
        aircraft.messages = self.messages;
        Some(aircraft)
    }
}

pub(crate) fn convert_payload(payload: &serde_json::Value) -> Vec<Aircraft> {
    let Some(entries) = payload.get("aircraft").and_then(|v| v.as_array()) else {
        return Vec::new();
    };

    entries
        .iter()
        .filter_map(|entry| match serde_json::from_value::<RawAircraft>(entry.clone()) {
            Ok(raw) => raw.into_aircraft(),
            Err(e) => {
                tracing::debug!("Skipping malformed dump1090 record: {}", e);
                None
            }
        })
        .collect()
}
