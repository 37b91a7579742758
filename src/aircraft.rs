//! Core data types shared by all collectors and the fusion engine.

use serde::{Deserialize, Serialize};

/// One observation of one airframe within a single collection cycle.
///
/// Records are ephemeral: every cycle rebuilds them from scratch, and identity
/// across sources is re-established purely by matching `hex` during fusion.
/// A record with an empty `hex` is invalid and must be dropped before it
/// enters any pipeline stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Aircraft {
    /// ICAO 24-bit transponder address, uppercased.
    pub hex: String,
    /// Callsign/flight number, trimmed.
    pub flight: Option<String>,
    pub lat: Option<f64>,
    pub lon: Option<f64>,
    /// Barometric altitude in feet.
    pub alt_baro: Option<i64>,
    /// Geometric altitude in feet.
    pub alt_geom: Option<i64>,
    /// Ground speed in knots.
    pub gs: Option<f64>,
    /// True track in degrees.
    pub track: Option<f64>,
    /// Vertical rate in ft/min.
    pub baro_rate: Option<f64>,
    pub squawk: Option<String>,
    #[serde(default)]
    pub on_ground: bool,
    /// Seconds since the source last heard this aircraft.
    pub seen: Option<f64>,
    /// Signal strength, local receivers only.
    pub rssi: Option<f64>,
    /// Message count, local receivers only.
    pub messages: Option<i64>,
    /// Distance from the region center in miles, set by the distance filter.
    pub distance_miles: Option<f64>,
    /// Origin tag: `dump1090`, `opensky`, or `pi_station_<id>`.
    #[serde(default)]
    pub data_source: String,
    // Enrichment fields, filled from the metadata store after fusion.
    pub registration: Option<String>,
    pub manufacturer: Option<String>,
    pub model: Option<String>,
    pub typecode: Option<String>,
    pub operator: Option<String>,
    pub owner: Option<String>,
    pub icao_aircraft_class: Option<String>,
    /// Composed display string, `"{manufacturer} {model}"`.
    pub aircraft_type: Option<String>,
}

impl Aircraft {
    /// Create a bare record with only identity and origin set.
    pub fn new(hex: impl Into<String>, data_source: impl Into<String>) -> Self {
        Self {
            hex: hex.into().to_uppercase(),
            flight: None,
            lat: None,
            lon: None,
            alt_baro: None,
            alt_geom: None,
            gs: None,
            track: None,
            baro_rate: None,
            squawk: None,
            on_ground: false,
            seen: None,
            rssi: None,
            messages: None,
            distance_miles: None,
            data_source: data_source.into(),
            registration: None,
            manufacturer: None,
            model: None,
            typecode: None,
            operator: None,
            owner: None,
            icao_aircraft_class: None,
            aircraft_type: None,
        }
    }

    pub fn has_position(&self) -> bool {
        self.lat.is_some() && self.lon.is_some()
    }
}

/// Region center published alongside each snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub name: String,
    pub lat: f64,
    pub lon: f64,
}

/// Snapshot published per region per cycle under `{region}:flights` and
/// `{region}:choppers`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegionSnapshot {
    pub timestamp: String,
    pub aircraft_count: usize,
    pub aircraft: Vec<Aircraft>,
    pub location: Location,
    pub region: String,
}

/// Payload written by the remote-station ingestion endpoint under
/// `pi_data:{region}:{station_id}`. Aircraft entries are kept as raw JSON so
/// one malformed record never discards the whole station submission.
#[derive(Debug, Clone, Deserialize)]
pub struct StationPayload {
    #[serde(default)]
    pub station_id: Option<String>,
    #[serde(default)]
    pub aircraft: Vec<serde_json::Value>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_uppercases_hex() {
        let a = Aircraft::new("abc123", "dump1090");
        assert_eq!(a.hex, "ABC123");
        assert_eq!(a.data_source, "dump1090");
        assert!(!a.has_position());
    }

    #[test]
    fn partial_station_record_deserializes() {
        let a: Aircraft = serde_json::from_str(r#"{"hex":"A1B2C3","lat":34.0,"lon":-118.0}"#).unwrap();
        assert_eq!(a.hex, "A1B2C3");
        assert!(a.has_position());
        assert_eq!(a.data_source, "");
        assert!(a.alt_baro.is_none());
    }

    #[test]
    fn snapshot_round_trips_through_json() {
        let snapshot = RegionSnapshot {
            timestamp: "2024-01-15T12:00:00Z".into(),
            aircraft_count: 1,
            aircraft: vec![Aircraft::new("ABC123", "opensky")],
            location: Location {
                name: "Test".into(),
                lat: 34.0,
                lon: -118.0,
            },
            region: "test".into(),
        };
        let json = serde_json::to_string(&snapshot).unwrap();
        let back: RegionSnapshot = serde_json::from_str(&json).unwrap();
        assert_eq!(back, snapshot);
    }
}
