//! Aircraft metadata enrichment: tiered lookup by ICAO hex.
//!
//! Three tiers, each optional: a bounded in-process cache, hash entries in
//! the snapshot store (`aircraft_db:{hex}`), and a bulk CSV reference
//! dataset. Lookups never fail — an unknown hex yields an all-empty record,
//! and that negative result is cached like any other.

use crate::store::Store;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::path::Path;
use thiserror::Error;

const CACHE_CAP: usize = 1000;
const CACHE_EVICT: usize = 200;

/// Store-tier key count above which the dataset import is skipped.
const STORE_TIER_THRESHOLD: usize = 1000;

/// Pipelined import batch size.
const IMPORT_BATCH: usize = 1000;

#[derive(Debug, Error)]
pub enum MetadataError {
    #[error("failed to read aircraft dataset {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("aircraft dataset has no recognizable ICAO column")]
    NoIcaoColumn,
    #[error("aircraft dataset could not be parsed with any strategy")]
    Unparseable,
}

/// Enrichment record for one airframe. Fields are empty strings when
/// unknown, never absent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AircraftInfo {
    pub registration: String,
    pub manufacturer: String,
    pub model: String,
    pub typecode: String,
    pub operator: String,
    pub owner: String,
    pub icao_aircraft_class: String,
}

impl AircraftInfo {
    pub fn is_empty(&self) -> bool {
        self.registration.is_empty()
            && self.manufacturer.is_empty()
            && self.model.is_empty()
            && self.typecode.is_empty()
            && self.operator.is_empty()
            && self.owner.is_empty()
            && self.icao_aircraft_class.is_empty()
    }

    fn to_fields(&self) -> Vec<(String, String)> {
        vec![
            ("registration".into(), self.registration.clone()),
            ("manufacturer".into(), self.manufacturer.clone()),
            ("model".into(), self.model.clone()),
            ("typecode".into(), self.typecode.clone()),
            ("operator".into(), self.operator.clone()),
            ("owner".into(), self.owner.clone()),
            ("icao_aircraft_class".into(), self.icao_aircraft_class.clone()),
        ]
    }

    fn from_fields(map: &HashMap<String, String>) -> Self {
        let get = |key: &str| map.get(key).cloned().unwrap_or_default();
        Self {
            registration: get("registration"),
            manufacturer: get("manufacturer"),
            model: get("model"),
            typecode: get("typecode"),
            operator: get("operator"),
            owner: get("owner"),
            icao_aircraft_class: get("icao_aircraft_class"),
        }
    }
}

/// Insertion-ordered bounded cache. On exceeding the cap, the oldest chunk
/// of entries is evicted wholesale.
struct LookupCache {
    map: HashMap<String, AircraftInfo>,
    order: VecDeque<String>,
}

impl LookupCache {
    fn new() -> Self {
        Self {
            map: HashMap::new(),
            order: VecDeque::new(),
        }
    }

    fn get(&self, hex: &str) -> Option<&AircraftInfo> {
        self.map.get(hex)
    }

    fn insert(&mut self, hex: String, info: AircraftInfo) {
        if !self.map.contains_key(&hex) {
            self.order.push_back(hex.clone());
        }
        self.map.insert(hex, info);

        if self.map.len() > CACHE_CAP {
            for _ in 0..CACHE_EVICT {
                if let Some(oldest) = self.order.pop_front() {
                    self.map.remove(&oldest);
                }
            }
        }
    }

    fn len(&self) -> usize {
        self.map.len()
    }
}

/// Tiered metadata lookup service, constructed once at startup and shared by
/// handle with the blender.
pub struct MetadataStore {
    store: Store,
    cache: Mutex<LookupCache>,
    dataset: HashMap<String, AircraftInfo>,
    use_store_tier: bool,
}

impl MetadataStore {
    /// Build the tiers: reuse the store tier when it is already populated,
    /// otherwise load the CSV dataset and import it.
    pub async fn open(store: Store, dataset_path: Option<&Path>) -> Self {
        let existing = store.count_keys("aircraft_db:").await;
        if existing > STORE_TIER_THRESHOLD {
            tracing::info!("Using aircraft metadata from store ({} records)", existing);
            return Self {
                store,
                cache: Mutex::new(LookupCache::new()),
                dataset: HashMap::new(),
                use_store_tier: true,
            };
        }

        let dataset = match dataset_path {
            Some(path) => match load_dataset(path) {
                Ok(dataset) => {
                    tracing::info!(
                        "Loaded aircraft dataset with {} records from {}",
                        dataset.len(),
                        path.display()
                    );
                    dataset
                }
                Err(e) => {
                    tracing::error!("Aircraft dataset unavailable: {}", e);
                    HashMap::new()
                }
            },
            None => HashMap::new(),
        };

        let mut use_store_tier = false;
        if !store.is_memory() && dataset.len() > STORE_TIER_THRESHOLD {
            tracing::info!("Importing aircraft dataset to store for faster lookups");
            import_dataset(&store, &dataset).await;
            use_store_tier = true;
        }

        Self {
            store,
            cache: Mutex::new(LookupCache::new()),
            dataset,
            use_store_tier,
        }
    }

    /// Single-hex convenience wrapper over [`Self::batch_lookup`].
    pub async fn lookup(&self, hex: &str) -> AircraftInfo {
        let mut results = self.batch_lookup(std::slice::from_ref(&hex.to_string())).await;
        results.remove(hex).unwrap_or_default()
    }

    /// Resolve all hexes with at most one pipelined store round trip for the
    /// cache misses. Results are keyed by the input strings.
    pub async fn batch_lookup(&self, hexes: &[String]) -> HashMap<String, AircraftInfo> {
        let mut out = HashMap::with_capacity(hexes.len());
        // (input key, normalized hex) pairs the cache could not answer
        let mut misses: Vec<(String, String)> = Vec::new();
        {
            let cache = self.cache.lock();
            for hex in hexes {
                if out.contains_key(hex) {
                    continue;
                }
                let normalized = normalize_hex(hex);
                if normalized.is_empty() {
                    out.insert(hex.clone(), AircraftInfo::default());
                    continue;
                }
                match cache.get(&normalized) {
                    Some(info) => {
                        out.insert(hex.clone(), info.clone());
                    }
                    None => misses.push((hex.clone(), normalized)),
                }
            }
        }

        let mut unresolved: Vec<(String, String)> = Vec::new();
        if self.use_store_tier && !misses.is_empty() {
            let keys: Vec<String> = misses
                .iter()
                .map(|(_, hex)| format!("aircraft_db:{hex}"))
                .collect();
            let maps = self.store.hash_get_all_batch(&keys).await;
            for ((input, normalized), map) in misses.into_iter().zip(maps) {
                if map.is_empty() {
                    unresolved.push((input, normalized));
                } else {
                    let info = AircraftInfo::from_fields(&map);
                    self.cache.lock().insert(normalized, info.clone());
                    out.insert(input, info);
                }
            }
        } else {
            unresolved = misses;
        }

        if !unresolved.is_empty() {
            let mut cache = self.cache.lock();
            for (input, normalized) in unresolved {
                let info = self
                    .dataset
                    .get(&normalized)
                    .cloned()
                    .unwrap_or_default();
                cache.insert(normalized, info.clone());
                out.insert(input, info);
            }
        }

        out
    }

    pub fn cache_len(&self) -> usize {
        self.cache.lock().len()
    }
}

fn normalize_hex(hex: &str) -> String {
    hex.trim().trim_start_matches('~').to_uppercase()
}

async fn import_dataset(store: &Store, dataset: &HashMap<String, AircraftInfo>) {
    let mut batch: Vec<(String, Vec<(String, String)>)> = Vec::with_capacity(IMPORT_BATCH);
    let mut imported = 0usize;
    for (hex, info) in dataset {
        batch.push((format!("aircraft_db:{hex}"), info.to_fields()));
        if batch.len() == IMPORT_BATCH {
            store.hash_set_batch(&batch).await;
            imported += batch.len();
            batch.clear();
        }
    }
    if !batch.is_empty() {
        imported += batch.len();
        store.hash_set_batch(&batch).await;
    }
    tracing::info!("Imported {} aircraft records to store", imported);
}

// Header aliases observed across aircraft dataset exports.
const ICAO_ALIASES: &[&str] = &["icao24", "ICAO24", "icao", "ICAO", "hex", "HEX"];
const REGISTRATION_ALIASES: &[&str] = &["registration", "Registration", "reg"];
const MANUFACTURER_ALIASES: &[&str] = &[
    "manufacturerName",
    "manufacturerIcao",
    "manufacturer",
    "Manufacturer",
    "mfr",
];
const MODEL_ALIASES: &[&str] = &["model", "Model", "type"];
const CLASS_ALIASES: &[&str] = &["icaoAircraftClass", "typecode", "TypeCode", "aircraft_type"];
const TYPECODE_ALIASES: &[&str] = &["typecode", "TypeCode", "type_code"];
const OPERATOR_ALIASES: &[&str] = &["operator", "Operator", "airline"];
const OWNER_ALIASES: &[&str] = &["owner", "Owner", "registered_owner"];

/// Load the bulk CSV dataset, trying parse strategies in order and accepting
/// the first that yields records.
pub fn load_dataset(path: &Path) -> Result<HashMap<String, AircraftInfo>, MetadataError> {
    let raw = std::fs::read(path).map_err(|source| MetadataError::Read {
        path: path.display().to_string(),
        source,
    })?;
    let bytes = raw.strip_prefix(b"\xef\xbb\xbf".as_slice()).unwrap_or(&raw);

    // strict quoting first, then permissive for exports with stray quotes
    let attempts = [(true, false), (true, true), (false, true)];
    let mut last_err = MetadataError::Unparseable;
    for (quoting, flexible) in attempts {
        match parse_dataset(bytes, quoting, flexible) {
            Ok(dataset) if !dataset.is_empty() => return Ok(dataset),
            Ok(_) => {}
            Err(e) => last_err = e,
        }
    }
    Err(last_err)
}

fn parse_dataset(
    bytes: &[u8],
    quoting: bool,
    flexible: bool,
) -> Result<HashMap<String, AircraftInfo>, MetadataError> {
    let mut reader = csv::ReaderBuilder::new()
        .quoting(quoting)
        .flexible(flexible)
        .trim(csv::Trim::All)
        .from_reader(bytes);

    let headers: Vec<String> = reader
        .headers()
        .map_err(|_| MetadataError::Unparseable)?
        .iter()
        .map(clean_field)
        .collect();

    let icao_col = resolve_column(&headers, ICAO_ALIASES).ok_or(MetadataError::NoIcaoColumn)?;
    let registration_col = resolve_column(&headers, REGISTRATION_ALIASES);
    let manufacturer_col = resolve_column(&headers, MANUFACTURER_ALIASES);
    let model_col = resolve_column(&headers, MODEL_ALIASES);
    let class_col = resolve_column(&headers, CLASS_ALIASES);
    let typecode_col = resolve_column(&headers, TYPECODE_ALIASES);
    let operator_col = resolve_column(&headers, OPERATOR_ALIASES);
    let owner_col = resolve_column(&headers, OWNER_ALIASES);

    let mut dataset = HashMap::new();
    for record in reader.records() {
        // bad lines are skipped, not fatal
        let Ok(record) = record else { continue };
        let field = |col: Option<usize>| {
            col.and_then(|i| record.get(i))
                .map(clean_field)
                .unwrap_or_default()
        };

        let hex = field(Some(icao_col)).to_uppercase();
        if hex.is_empty() || hex == "NAN" {
            continue;
        }

        dataset.insert(
            hex,
            AircraftInfo {
                registration: field(registration_col),
                manufacturer: field(manufacturer_col),
                model: field(model_col),
                typecode: field(typecode_col),
                operator: field(operator_col),
                owner: field(owner_col),
                icao_aircraft_class: field(class_col),
            },
        );
    }
    Ok(dataset)
}

fn clean_field(value: &str) -> String {
    value
        .trim()
        .trim_matches(|c| c == '\'' || c == '"')
        .trim()
        .to_string()
}

fn resolve_column(headers: &[String], aliases: &[&str]) -> Option<usize> {
    aliases
        .iter()
        .find_map(|alias| headers.iter().position(|h| h == alias))
}
