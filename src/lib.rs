//! Multi-source live flight data aggregation library.
//!
//! This library provides functionality to:
//! - Collect aircraft positions from local dump1090 receivers and the
//!   OpenSky global network
//! - Ingest submissions from remote receiver stations via the snapshot store
//! - Fuse overlapping observations with a source-priority overlay
//! - Enrich records with airframe metadata (registration, type, operator)
//! - Publish TTL-bounded per-region snapshots for downstream consumers
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────┐   ┌─────────────┐   ┌─────────────┐
//! │  dump1090   │   │   OpenSky   │   │  Stations   │
//! │  (local)    │   │  (network)  │   │  (store)    │
//! └──────┬──────┘   └──────┬──────┘   └──────┬──────┘
//!        └─────────────────┼─────────────────┘
//!                          ▼
//!                   ┌─────────────┐   ┌─────────────┐
//!                   │   Blender   │──▶│  Metadata   │
//!                   │  (fusion)   │   │  (enrich)   │
//!                   └──────┬──────┘   └─────────────┘
//!                          ▼
//!                   ┌─────────────┐
//!                   │    Store    │
//!                   │ (snapshots) │
//!                   └─────────────┘
//! ```
//!
//! The [`orchestrator`] drives the whole pipeline on a fixed cycle, fetching
//! the local tier every cycle and the network tier only when its cached
//! result has aged past the configured interval.

pub mod aircraft;
pub mod blender;
pub mod collector;
pub mod config;
pub mod dump1090;
pub mod geo;
pub mod metadata;
pub mod opensky;
pub mod orchestrator;
pub mod store;

pub use aircraft::{Aircraft, RegionSnapshot};
pub use blender::Blender;
pub use config::Config;
pub use dump1090::Dump1090Collector;
pub use metadata::MetadataStore;
pub use opensky::OpenSkyCollector;
pub use orchestrator::Orchestrator;
pub use store::Store;
