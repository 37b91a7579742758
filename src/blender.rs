//! Multi-source fusion: priority overlay, ranking, enrichment, and
//! helicopter classification.
//!
//! Three trust tiers feed each cycle: remote-station submissions (highest),
//! the local receiver, and the global network (base). A higher tier's record
//! replaces a lower tier's wholesale when both saw the same hex — there is
//! no field-level merge across tiers.

use crate::aircraft::Aircraft;
use crate::dump1090;
use crate::metadata::{AircraftInfo, MetadataStore};
use std::collections::HashMap;
use std::sync::Arc;

/// Prefix tagging remote-station records, e.g. `pi_station_ETEX01`.
pub const STATION_SOURCE_PREFIX: &str = "pi_station";

// Tier weights for the priority score; lower sorts first.
const TIER_STATION: f64 = 0.0;
const TIER_LOCAL: f64 = 50.0;
const TIER_NETWORK: f64 = 100.0;

/// Score penalty when an aircraft carries no distance.
const NO_DISTANCE_PENALTY: f64 = 10_000.0;

#[derive(Debug, Default)]
struct BlendStats {
    station: usize,
    local: usize,
    network: usize,
    total: usize,
}

pub struct Blender {
    metadata: Arc<MetadataStore>,
}

impl Blender {
    pub fn new(metadata: Arc<MetadataStore>) -> Self {
        Self { metadata }
    }

    /// Fuse the three tier lists into one ranked, enriched list.
    pub async fn blend(
        &self,
        station_aircraft: Vec<Aircraft>,
        local_aircraft: Vec<Aircraft>,
        network_aircraft: Vec<Aircraft>,
    ) -> Vec<Aircraft> {
        let mut fused: HashMap<String, Aircraft> = HashMap::new();
        let mut stats = BlendStats::default();

        // Base layer: every network record, accepted unconditionally.
        for mut aircraft in network_aircraft {
            let hex = aircraft.hex.trim().to_uppercase();
            if hex.is_empty() {
                continue;
            }
            aircraft.hex = hex.clone();
            fused.insert(hex, aircraft);
            stats.network += 1;
        }

        // Local receiver overlays, gated on field completeness.
        for mut aircraft in local_aircraft {
            let hex = aircraft.hex.trim().to_uppercase();
            if hex.is_empty() || !quality_gate(&aircraft) {
                continue;
            }
            aircraft.hex = hex.clone();
            aircraft.data_source = dump1090::SOURCE.to_string();
            fused.insert(hex, aircraft);
            stats.local += 1;
        }

        // Remote-station overlays keep their own source tag for
        // traceability.
        for mut aircraft in station_aircraft {
            let hex = aircraft.hex.trim().to_uppercase();
            if hex.is_empty() || !quality_gate(&aircraft) {
                continue;
            }
            aircraft.hex = hex.clone();
            fused.insert(hex, aircraft);
            stats.station += 1;
        }

        stats.total = fused.len();

        let mut aircraft: Vec<Aircraft> = fused.into_values().collect();
        aircraft.sort_by(|a, b| priority_score(a).total_cmp(&priority_score(b)));

        self.enrich(&mut aircraft).await;

        tracing::info!(
            "Blend stats: {} station | {} local | {} network | {} total",
            stats.station,
            stats.local,
            stats.network,
            stats.total
        );

        aircraft
    }

    /// Aircraft whose enriched ICAO class marks them as rotorcraft. The
    /// class code is the only authoritative signal.
    pub fn identify_helicopters(&self, aircraft: &[Aircraft]) -> Vec<Aircraft> {
        aircraft
            .iter()
            .filter(|a| is_helicopter(a))
            .cloned()
            .collect()
    }

    async fn enrich(&self, aircraft: &mut [Aircraft]) {
        let hexes: Vec<String> = aircraft.iter().map(|a| a.hex.clone()).collect();
        let infos = self.metadata.batch_lookup(&hexes).await;
        for a in aircraft {
            if let Some(info) = infos.get(&a.hex) {
                apply_enrichment(a, info);
            }
        }
    }
}

/// Minimum completeness a reading must meet to override a lower tier:
/// position, altitude, speed, and track all present.
pub fn quality_gate(aircraft: &Aircraft) -> bool {
    aircraft.lat.is_some()
        && aircraft.lon.is_some()
        && aircraft.alt_baro.is_some()
        && aircraft.gs.is_some()
        && aircraft.track.is_some()
}

/// Tier weight plus distance penalty; ascending sort puts trusted, nearby
/// aircraft first.
fn priority_score(aircraft: &Aircraft) -> f64 {
    let tier = if aircraft.data_source.starts_with(STATION_SOURCE_PREFIX) {
        TIER_STATION
    } else if aircraft.data_source == dump1090::SOURCE {
        TIER_LOCAL
    } else {
        TIER_NETWORK
    };
    tier + aircraft
        .distance_miles
        .map_or(NO_DISTANCE_PENALTY, |d| d * 10.0)
}

fn apply_enrichment(aircraft: &mut Aircraft, info: &AircraftInfo) {
    aircraft.registration = non_empty(&info.registration);
    aircraft.manufacturer = non_empty(&info.manufacturer);
    aircraft.model = non_empty(&info.model);
    aircraft.typecode = non_empty(&info.typecode);
    aircraft.operator = non_empty(&info.operator);
    aircraft.owner = non_empty(&info.owner);
    aircraft.icao_aircraft_class = non_empty(&info.icao_aircraft_class);

    aircraft.aircraft_type = if info.model.is_empty() {
        non_empty(&info.icao_aircraft_class)
    } else {
        let composed = format!("{} {}", info.manufacturer, info.model);
        Some(composed.trim().to_string())
    };
}

fn non_empty(value: &str) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn is_helicopter(aircraft: &Aircraft) -> bool {
    aircraft
        .icao_aircraft_class
        .as_deref()
        .is_some_and(|class| class.starts_with('H'))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Store;
    use std::io::Write;
    use tempfile::NamedTempFile;

    async fn blender() -> Blender {
        Blender::new(Arc::new(MetadataStore::open(Store::memory(), None).await))
    }

    fn complete(hex: &str, source: &str, distance: f64) -> Aircraft {
        let mut a = Aircraft::new(hex, source);
        a.lat = Some(34.0);
        a.lon = Some(-118.0);
        a.alt_baro = Some(35000);
        a.gs = Some(450.0);
        a.track = Some(270.0);
        a.distance_miles = Some(distance);
        a
    }

    #[tokio::test]
    async fn station_tier_wins_when_all_three_see_same_hex() {
        let mut station = complete("ABC123", "pi_station_ETEX01", 12.0);
        station.alt_baro = Some(5000);
        let mut local = complete("ABC123", "dump1090", 12.0);
        local.alt_baro = Some(6000);
        let network = complete("ABC123", "opensky", 12.0);

        let fused = blender()
            .await
            .blend(vec![station], vec![local], vec![network])
            .await;
        assert_eq!(fused.len(), 1);
        assert_eq!(fused[0].data_source, "pi_station_ETEX01");
        assert_eq!(fused[0].alt_baro, Some(5000));
    }

    #[tokio::test]
    async fn local_overrides_network_base() {
        let local = complete("ABC123", "dump1090", 8.0);
        let mut network = complete("ABC123", "opensky", 8.0);
        network.flight = Some("UAL123".into());

        let fused = blender().await.blend(vec![], vec![local], vec![network]).await;
        assert_eq!(fused.len(), 1);
        assert_eq!(fused[0].data_source, "dump1090");
        // full replace: no field backfill from the lower tier
        assert_eq!(fused[0].flight, None);
    }

    #[tokio::test]
    async fn incomplete_local_record_does_not_override() {
        let mut local = complete("ABC123", "dump1090", 8.0);
        local.track = None;
        let network = complete("ABC123", "opensky", 8.0);

        let fused = blender().await.blend(vec![], vec![local], vec![network]).await;
        assert_eq!(fused.len(), 1);
        assert_eq!(fused[0].data_source, "opensky");
    }

    #[tokio::test]
    async fn ordering_by_tier_then_distance() {
        let fused = blender()
            .await
            .blend(
                vec![complete("S00001", "pi_station_X", 30.0)],
                vec![
                    complete("L00001", "dump1090", 30.0),
                    complete("L00002", "dump1090", 2.0),
                ],
                vec![complete("N00001", "opensky", 30.0), {
                    let mut a = Aircraft::new("N00002", "opensky");
                    a.distance_miles = None;
                    a
                }],
            )
            .await;

        let order: Vec<&str> = fused.iter().map(|a| a.hex.as_str()).collect();
        // same distance sorts station < local < network; same tier sorts by
        // distance; unknown distance sorts last
        assert_eq!(order, vec!["L00002", "S00001", "L00001", "N00001", "N00002"]);
    }

    #[tokio::test]
    async fn empty_hex_never_enters_fusion() {
        let fused = blender()
            .await
            .blend(vec![], vec![], vec![Aircraft::new("", "opensky")])
            .await;
        assert!(fused.is_empty());
    }

    #[tokio::test]
    async fn helicopter_classification_by_icao_class() {
        let mut helicopter = complete("HELI01", "opensky", 5.0);
        helicopter.icao_aircraft_class = Some("H1P".into());
        let mut jet = complete("JET001", "opensky", 5.0);
        jet.icao_aircraft_class = Some("L2J".into());
        let unknown = complete("UNK001", "opensky", 5.0);

        let b = blender().await;
        let helicopters = b.identify_helicopters(&[helicopter, jet, unknown]);
        assert_eq!(helicopters.len(), 1);
        assert_eq!(helicopters[0].hex, "HELI01");
    }

    #[tokio::test]
    async fn enrichment_composes_aircraft_type() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            "icao24,registration,manufacturerName,model,icaoAircraftClass"
        )
        .unwrap();
        writeln!(file, "abc123,N12345,Boeing,737-800,L2J").unwrap();
        writeln!(file, "def456,,,,H1P").unwrap();
        file.flush().unwrap();

        let metadata = MetadataStore::open(Store::memory(), Some(file.path())).await;
        let b = Blender::new(Arc::new(metadata));
        let fused = b
            .blend(
                vec![],
                vec![],
                vec![
                    complete("ABC123", "opensky", 1.0),
                    complete("DEF456", "opensky", 2.0),
                    complete("000000", "opensky", 3.0),
                ],
            )
            .await;

        assert_eq!(fused[0].aircraft_type.as_deref(), Some("Boeing 737-800"));
        assert_eq!(fused[0].registration.as_deref(), Some("N12345"));
        // no model: falls back to the ICAO class
        assert_eq!(fused[1].aircraft_type.as_deref(), Some("H1P"));
        assert_eq!(fused[2].aircraft_type, None);
        assert_eq!(fused[2].registration, None);
    }
}
