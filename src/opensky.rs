//! Global-network collector (OpenSky state vectors) with rate-limit backoff.
//!
//! The upstream API accepts only bounding-box queries, so the region radius
//! is approximated as a box; per-aircraft distance is still computed for
//! sorting but not used to filter further. All failures are absorbed here —
//! the orchestrator only ever sees data or `None`.

use crate::aircraft::Aircraft;
use crate::collector::{CollectorStats, StatsSnapshot};
use crate::config::{CollectorConfig, RegionConfig};
use crate::geo::{self, BoundingBox};
use reqwest::StatusCode;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::time::Instant;

pub const SOURCE: &str = "opensky";

const FETCH_TIMEOUT: Duration = Duration::from_secs(30);

/// Minimum spacing between upstream requests in the normal state.
const MIN_INTERVAL: Duration = Duration::from_secs(10);

/// Minimum spacing after a 429, anchored to the 429 timestamp.
const BACKOFF_INTERVAL: Duration = Duration::from_secs(300);

const CREDITS_HEADER: &str = "X-Rate-Limit-Remaining";

/// Two-state request gate. `normal` enforces [`MIN_INTERVAL`] between
/// attempts; a 429 switches to `backoff`, which holds until
/// [`BACKOFF_INTERVAL`] has elapsed since the 429 itself. Owned by exactly
/// one collector instance; never shared across regions.
#[derive(Debug, Default)]
struct RateGate {
    last_attempt: Option<Instant>,
    limited_at: Option<Instant>,
}

impl RateGate {
    /// Whether a real network call may go out at `now`. Leaves backoff as a
    /// side effect once the window has elapsed.
    fn ready(&mut self, now: Instant) -> bool {
        if let Some(limited_at) = self.limited_at {
            if now.duration_since(limited_at) < BACKOFF_INTERVAL {
                return false;
            }
            self.limited_at = None;
        }
        match self.last_attempt {
            Some(last) if now.duration_since(last) < MIN_INTERVAL => false,
            _ => true,
        }
    }

    fn note_attempt(&mut self, now: Instant) {
        self.last_attempt = Some(now);
    }

    fn note_limited(&mut self, now: Instant) {
        self.limited_at = Some(now);
    }
}

pub struct OpenSkyCollector {
    name: String,
    url: String,
    enabled: bool,
    client: reqwest::Client,
    auth: Option<(String, String)>,
    bbox: BoundingBox,
    center_lat: f64,
    center_lon: f64,
    gate: RateGate,
    credits_remaining: Option<i64>,
    stats: Arc<CollectorStats>,
}

impl OpenSkyCollector {
    pub fn new(config: &CollectorConfig, region: &RegionConfig) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(FETCH_TIMEOUT).build()?;
        let auth = match (&config.username, &config.password) {
            (Some(user), Some(pass)) => {
                tracing::info!("OpenSky collector configured with authentication for {}", user);
                Some((user.clone(), pass.clone()))
            }
            _ => {
                tracing::info!("OpenSky collector configured for anonymous access");
                None
            }
        };

        Ok(Self {
            name: config.display_name().to_string(),
            url: config.url.clone(),
            enabled: config.enabled,
            client,
            auth,
            bbox: BoundingBox::around(region.center.lat, region.center.lon, region.radius_miles),
            center_lat: region.center.lat,
            center_lon: region.center.lon,
            gate: RateGate::default(),
            credits_remaining: None,
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

    pub fn credits_remaining(&self) -> Option<i64> {
        self.credits_remaining
    }

    /// Fetch the current state vectors for the region's bounding box.
    /// Returns `None` while disabled or rate-gated, and on any upstream
    /// failure; a 429 switches the gate to backoff.
    pub async fn fetch(&mut self) -> Option<Vec<Aircraft>> {
        if !self.enabled {
            return None;
        }

        let now = Instant::now();
        if !self.gate.ready(now) {
            tracing::debug!("OpenSky ({}): rate gate closed, skipping fetch", self.name);
            return None;
        }
        self.gate.note_attempt(now);

        let start = std::time::Instant::now();
        let mut request = self.client.get(&self.url).query(&[
            ("lamin", self.bbox.lat_min),
            ("lamax", self.bbox.lat_max),
            ("lomin", self.bbox.lon_min),
            ("lomax", self.bbox.lon_max),
        ]);
        if let Some((user, pass)) = &self.auth {
            request = request.basic_auth(user, Some(pass));
        }

        let response = match request.send().await {
            Ok(response) => response,
            Err(e) => {
                if e.is_timeout() {
                    tracing::warn!("OpenSky ({}) timed out after {:?}", self.name, FETCH_TIMEOUT);
                } else {
                    tracing::error!("OpenSky ({}) fetch failed: {}", self.name, e);
                }
                self.stats.record_failure();
                return None;
            }
        };

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            tracing::warn!(
                "OpenSky ({}) rate limited, backing off {:?}",
                self.name,
                BACKOFF_INTERVAL
            );
            self.gate.note_limited(now);
            self.stats.record_failure();
            return None;
        }
        if !status.is_success() {
            tracing::error!("OpenSky ({}) HTTP error {}", self.name, status);
            self.stats.record_failure();
            return None;
        }

        self.credits_remaining = response
            .headers()
            .get(CREDITS_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse().ok());

        let payload: serde_json::Value = match response.json().await {
            Ok(payload) => payload,
            Err(e) => {
                tracing::error!("OpenSky ({}) returned invalid JSON: {}", self.name, e);
                self.stats.record_failure();
                return None;
            }
        };

        let mut aircraft = convert_states(&payload, now_unix());
        geo::attach_distances(&mut aircraft, self.center_lat, self.center_lon);
        geo::sort_by_distance(&mut aircraft);

        self.stats.record_success(aircraft.len());
        let credits = self
            .credits_remaining
            .map(|c| format!(", {} credits remaining", c))
            .unwrap_or_default();
        tracing::info!(
            "OpenSky ({}): {} aircraft in {:.2}s{}",
            self.name,
            aircraft.len(),
            start.elapsed().as_secs_f64(),
            credits
        );
        Some(aircraft)
    }
}

pub(crate) fn meters_to_feet(meters: f64) -> i64 {
    (meters * 3.28084) as i64
}

pub(crate) fn ms_to_knots(ms: f64) -> f64 {
    geo::round1(ms * 1.94384)
}

pub(crate) fn ms_to_fpm(ms: f64) -> f64 {
    geo::round1(ms * 196.85)
}

/// Convert the fixed positional state-vector array. Entries without a hex or
/// a full position are skipped; individual malformed entries never fail the
/// batch.
pub(crate) fn convert_states(payload: &serde_json::Value, now_unix: f64) -> Vec<Aircraft> {
    let Some(states) = payload.get("states").and_then(|v| v.as_array()) else {
        return Vec::new();
    };

    states
        .iter()
        .filter_map(|state| {
            let state = state.as_array()?;
            let str_at = |i: usize| state.get(i).and_then(|v| v.as_str());
            let f64_at = |i: usize| state.get(i).and_then(|v| v.as_f64());
            let bool_at = |i: usize| state.get(i).and_then(|v| v.as_bool());

            let hex = str_at(0)?.trim().to_uppercase();
            if hex.is_empty() {
                return None;
            }
            let lat = f64_at(6)?;
            let lon = f64_at(5)?;

            let mut aircraft = Aircraft::new(hex, SOURCE);
            aircraft.flight = str_at(1).map(|s| s.trim().to_string()).filter(|s| !s.is_empty());
            aircraft.lat = Some(lat);
            aircraft.lon = Some(lon);
            aircraft.alt_baro = f64_at(7).map(meters_to_feet);
            aircraft.alt_geom = f64_at(13).map(meters_to_feet);
            aircraft.gs = f64_at(9).map(ms_to_knots);
            aircraft.track = f64_at(10).map(geo::round1);
            aircraft.baro_rate = f64_at(11).map(ms_to_fpm);
            aircraft.squawk = str_at(14).map(str::to_string).filter(|s| !s.is_empty());
            aircraft.on_ground = bool_at(8).unwrap_or(false);
            aircraft.seen = f64_at(4).map(|last_contact| (now_unix - last_contact).max(0.0));
            Some(aircraft)
        })
        .collect()
}

fn now_unix() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn unit_conversions() {
        // 10,668 m is FL350
        assert!((meters_to_feet(10668.0) - 35000).abs() <= 100);
        assert!((ms_to_knots(250.0) - 486.0).abs() < 0.1);
        assert!((ms_to_fpm(5.0) - 984.3).abs() < 0.1);
    }

    #[test]
    fn state_vector_conversion() {
        let payload = json!({
            "states": [
                ["abc123", "UAL123  ", "United States", 1000.0, 1690.0, -118.2, 34.1,
                 10668.0, false, 250.0, 270.04, 5.0, null, 10700.0, "7700", false, 0],
                ["def456", null, "US", null, null, null, null,
                 null, null, null, null, null, null, null, null, false, 0],
                ["", "NOHEX", "US", null, 0.0, -118.0, 34.0,
                 null, null, null, null, null, null, null, null, false, 0]
            ]
        });

        let aircraft = convert_states(&payload, 1700.0);
        assert_eq!(aircraft.len(), 1);
        let a = &aircraft[0];
        assert_eq!(a.hex, "ABC123");
        assert_eq!(a.flight.as_deref(), Some("UAL123"));
        assert_eq!(a.lat, Some(34.1));
        assert_eq!(a.lon, Some(-118.2));
        assert_eq!(a.alt_baro, Some(35000));
        assert_eq!(a.gs, Some(486.0));
        assert_eq!(a.track, Some(270.0));
        assert_eq!(a.baro_rate, Some(984.3));
        assert_eq!(a.squawk.as_deref(), Some("7700"));
        assert_eq!(a.seen, Some(10.0));
        assert_eq!(a.data_source, SOURCE);
    }

    #[tokio::test(start_paused = true)]
    async fn gate_enforces_minimum_interval() {
        let mut gate = RateGate::default();
        let t0 = Instant::now();
        assert!(gate.ready(t0));
        gate.note_attempt(t0);

        tokio::time::advance(Duration::from_secs(5)).await;
        assert!(!gate.ready(Instant::now()));

        tokio::time::advance(Duration::from_secs(5)).await;
        assert!(gate.ready(Instant::now()));
    }

    #[tokio::test(start_paused = true)]
    async fn gate_backs_off_for_full_window_after_429() {
        let mut gate = RateGate::default();
        let t0 = Instant::now();
        gate.note_attempt(t0);
        gate.note_limited(t0);

        tokio::time::advance(Duration::from_secs(100)).await;
        assert!(!gate.ready(Instant::now()));

        tokio::time::advance(Duration::from_secs(199)).await;
        // t=299: still inside the window
        assert!(!gate.ready(Instant::now()));

        tokio::time::advance(Duration::from_secs(1)).await;
        // t=300: window elapsed, a real call may go out
        assert!(gate.ready(Instant::now()));
    }
}
