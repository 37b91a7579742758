//! YAML configuration loading and validation.
//!
//! Configuration errors are the only fatal condition besides explicit
//! cancellation: a missing file, unparseable YAML, or a region set that can
//! never produce data aborts startup.

use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("no enabled regions configured")]
    NoRegions,
    #[error("region '{region}' has no enabled collectors")]
    NoCollectors { region: String },
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub polling: PollingConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub metadata: MetadataConfig,
    pub regions: HashMap<String, RegionConfig>,
    /// Pattern-based helicopter detection rules. Parsed and carried for
    /// operators that still ship them, but the classifier keys solely off
    /// `icao_aircraft_class`; see [`crate::blender`].
    #[serde(default)]
    pub helicopter_patterns: Vec<HelicopterPattern>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PollingConfig {
    /// Fast tick: local receivers are fetched every cycle at this cadence.
    #[serde(default = "default_local_interval")]
    pub local_interval_secs: u64,
    /// Minimum age before the global-network tier is refreshed per region.
    #[serde(default = "default_network_interval")]
    pub network_interval_secs: u64,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            local_interval_secs: default_local_interval(),
            network_interval_secs: default_network_interval(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StoreConfig {
    /// Redis URL; absent means the process-local memory store.
    pub url: Option<String>,
    #[serde(default = "default_snapshot_ttl")]
    pub snapshot_ttl_secs: u64,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MetadataConfig {
    /// Bulk aircraft reference dataset (CSV keyed by ICAO hex).
    pub dataset_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RegionConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    pub name: String,
    pub center: Center,
    pub radius_miles: f64,
    #[serde(default)]
    pub collectors: Vec<CollectorConfig>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct Center {
    pub lat: f64,
    pub lon: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CollectorKind {
    Dump1090,
    Opensky,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CollectorConfig {
    #[serde(rename = "type")]
    pub kind: CollectorKind,
    #[serde(default = "default_true")]
    pub enabled: bool,
    pub url: String,
    pub name: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl CollectorConfig {
    /// Display name, falling back to the collector type.
    pub fn display_name(&self) -> &str {
        match &self.name {
            Some(name) => name,
            None => match self.kind {
                CollectorKind::Dump1090 => "dump1090",
                CollectorKind::Opensky => "opensky",
            },
        }
    }
}

/// One pattern rule from the legacy helicopter config. Inert: kept only so
/// existing config files keep loading.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct HelicopterPattern {
    pub prefix: Option<String>,
    pub suffix: Option<String>,
    pub callsign_contains: Option<Vec<String>>,
    pub aircraft_type: Option<Vec<String>>,
    pub icao_hex_prefix: Option<Vec<String>>,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let config: Config = serde_yaml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let mut enabled_regions = 0;
        for (key, region) in &self.regions {
            if !region.enabled {
                continue;
            }
            enabled_regions += 1;
            if !region.collectors.iter().any(|c| c.enabled) {
                return Err(ConfigError::NoCollectors {
                    region: key.clone(),
                });
            }
        }
        if enabled_regions == 0 {
            return Err(ConfigError::NoRegions);
        }
        Ok(())
    }
}

fn default_true() -> bool {
    true
}

fn default_local_interval() -> u64 {
    15
}

fn default_network_interval() -> u64 {
    60
}

fn default_snapshot_ttl() -> u64 {
    300
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
polling:
  local_interval_secs: 10
store:
  url: redis://localhost:6379
regions:
  socal:
    name: Southern California
    center: { lat: 34.05, lon: -118.24 }
    radius_miles: 150
    collectors:
      - type: dump1090
        url: "http://feeder:8080"
      - type: opensky
        url: "https://opensky-network.org/api/states/all"
        name: opensky-socal
helicopter_patterns:
  - prefix: "N911"
    callsign_contains: ["MEDIC", "LIFE"]
"#;

    #[test]
    fn sample_config_parses() {
        let config: Config = serde_yaml::from_str(SAMPLE).unwrap();
        config.validate().unwrap();

        assert_eq!(config.polling.local_interval_secs, 10);
        assert_eq!(config.polling.network_interval_secs, 60);
        assert_eq!(config.store.snapshot_ttl_secs, 300);

        let region = &config.regions["socal"];
        assert!(region.enabled);
        assert_eq!(region.radius_miles, 150.0);
        assert_eq!(region.collectors.len(), 2);
        assert_eq!(region.collectors[0].kind, CollectorKind::Dump1090);
        assert_eq!(region.collectors[0].display_name(), "dump1090");
        assert_eq!(region.collectors[1].display_name(), "opensky-socal");
        assert_eq!(config.helicopter_patterns.len(), 1);
    }

    #[test]
    fn unknown_collector_type_is_rejected() {
        let bad = SAMPLE.replace("type: dump1090", "type: flightaware");
        assert!(serde_yaml::from_str::<Config>(&bad).is_err());
    }

    #[test]
    fn region_without_enabled_collectors_is_fatal() {
        let bad = SAMPLE.replace("- type: dump1090", "- enabled: false\n        type: dump1090");
        let bad = bad.replace("- type: opensky", "- enabled: false\n        type: opensky");
        let config: Config = serde_yaml::from_str(&bad).unwrap();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::NoCollectors { .. })
        ));
    }

    #[test]
    fn all_regions_disabled_is_fatal() {
        let bad = SAMPLE.replace("socal:\n", "socal:\n    enabled: false\n");
        let config: Config = serde_yaml::from_str(&bad).unwrap();
        assert!(matches!(config.validate(), Err(ConfigError::NoRegions)));
    }
}
