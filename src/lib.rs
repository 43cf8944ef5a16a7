//! # Significant Locations
//!
//! Extraction of significant locations (home, work, other recurrent places)
//! from a subject's GPS history.
//!
//! This library provides:
//! - An incremental spatial reducer that folds GPS history into a bounded set
//!   of weighted summary points, persisted between calls
//! - Two extractors: density+partition (DBSCAN summary, elbow-selected k-means)
//!   and frequency ("mode") grid binning
//! - A proximity merge that folds near-duplicate locations together
//! - A run-length dwell-duration estimator
//!
//! ## Features
//!
//! - **`parallel`** - Fit elbow-scan candidates in parallel with rayon
//! - **`persistence`** - SQLite-backed GPS history and attachment storage
//! - **`http`** - LAMP platform client (GPS source + attachment store)
//! - **`full`** - Enable all features
//!
//! ## Quick Start
//!
//! ```rust
//! use significant_locations::{
//!     GpsReading, LocationConfig, LocationEngine, MemoryAttachmentStore, MemoryGpsSource,
//! };
//!
//! let mut gps = MemoryGpsSource::new();
//! gps.insert(
//!     "U1",
//!     (0..10).map(|i| GpsReading::new(i * 60_000, 37.7749, -122.4194)),
//! );
//! let store = MemoryAttachmentStore::new();
//!
//! let engine = LocationEngine::new(&gps, &store, LocationConfig::default());
//! let locations = engine.significant_locations("U1", 0, 600_000).unwrap();
//! assert_eq!(locations.len(), 1);
//! assert_eq!(locations[0].rank, 0);
//! ```

use serde::{Deserialize, Deserializer, Serialize};

// Unified error handling
pub mod error;
pub use error::{LocationError, OptionExt, Result};

// Geographic utilities (planar and great-circle distance, grid rounding)
pub mod geo_utils;

// External collaborators: GPS source and attachment store
pub mod source;
pub use source::{AttachmentStore, GpsSource, MemoryAttachmentStore, MemoryGpsSource};

// Run-length dwell duration
pub mod dwell;
pub use dwell::dwell_duration;

// Incremental spatial reducer (persisted summary state)
pub mod reduction;
pub use reduction::{reduce, ReductionParams, ReductionState, SummaryPoint, REDUCED_ATTACHMENT_KEY};

// Density+partition extractor (elbow-selected k-means over the reduced summary)
pub mod density;
pub use density::{expand_summary, select_cluster_count};

// Frequency ("mode") extractor
pub mod frequency;
pub use frequency::{bucket_readings, select_buckets};

// Proximity merge
pub mod merge;
pub use merge::merge_nearby_locations;

// Stateful orchestration with per-subject serialization
pub mod engine;
pub use engine::{with_subject_lock, LocationEngine};

// Algorithm toolbox - standalone access to the building blocks
pub mod algorithms;

// SQLite store for GPS history and attachments
#[cfg(feature = "persistence")]
pub mod persistence;
#[cfg(feature = "persistence")]
pub use persistence::SqliteStore;

// HTTP client for the LAMP platform
#[cfg(feature = "http")]
pub mod http;
#[cfg(feature = "http")]
pub use http::LampClient;

// ============================================================================
// Core Types
// ============================================================================

/// A GPS coordinate with latitude and longitude.
///
/// # Example
/// ```
/// use significant_locations::GpsPoint;
/// let point = GpsPoint::new(51.5074, -0.1278); // London
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GpsPoint {
    pub latitude: f64,
    pub longitude: f64,
}

impl GpsPoint {
    /// Create a new GPS point.
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    /// Check if the point has valid coordinates.
    pub fn is_valid(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && self.latitude >= -90.0
            && self.latitude <= 90.0
            && self.longitude >= -180.0
            && self.longitude <= 180.0
    }
}

/// A single timestamped GPS fix.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GpsReading {
    /// Unix timestamp in milliseconds
    pub timestamp: i64,
    pub latitude: f64,
    pub longitude: f64,
}

impl GpsReading {
    /// Create a new GPS reading.
    pub fn new(timestamp: i64, latitude: f64, longitude: f64) -> Self {
        Self {
            timestamp,
            latitude,
            longitude,
        }
    }

    /// The reading's coordinate.
    pub fn point(&self) -> GpsPoint {
        GpsPoint::new(self.latitude, self.longitude)
    }
}

/// Drop readings whose timestamp equals the previous reading's timestamp.
///
/// Only consecutive duplicates are removed; the first reading of each run is kept.
pub fn dedup_consecutive_timestamps(mut readings: Vec<GpsReading>) -> Vec<GpsReading> {
    readings.dedup_by_key(|r| r.timestamp);
    readings
}

/// Assignment of a reading to a candidate location.
///
/// `None` means the reading is not part of any significant location.
pub type LocationLabel = Option<usize>;

/// A significant location detected within a time window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Location {
    /// Window start (epoch ms, inclusive)
    #[serde(rename = "start")]
    pub window_start: i64,
    /// Window end (epoch ms, exclusive)
    #[serde(rename = "end")]
    pub window_end: i64,
    pub latitude: f64,
    pub longitude: f64,
    /// Zero-based prevalence rank (0 is typically home)
    pub rank: usize,
    /// Mean planar distance from the centroid to its readings, in meters.
    /// `None` when no readings are assigned to this location.
    #[serde(rename = "radius")]
    pub radius_meters: Option<f64>,
    /// Fraction of readings attributed to this location
    pub proportion: f64,
    /// Total contiguous dwell time in milliseconds
    #[serde(rename = "duration")]
    pub duration_ms: u64,
}

impl Location {
    /// The location's centroid.
    pub fn point(&self) -> GpsPoint {
        GpsPoint::new(self.latitude, self.longitude)
    }
}

// ============================================================================
// Configuration
// ============================================================================

/// Algorithm used to turn GPS readings into locations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionMethod {
    /// DBSCAN-reduced summary, elbow-selected k-means partitioning
    #[serde(alias = "k_means")]
    DensityPartition,
    /// Most frequent ~100 m grid cells
    #[serde(alias = "mode")]
    Frequency,
}

/// Parameters for one significant-location invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LocationConfig {
    /// Which extractor to run.
    /// Default: Frequency
    pub method: ExtractionMethod,

    /// Upper bound on candidate k-means cluster counts (density path).
    /// Default: 10
    pub k_max: usize,

    /// DBSCAN neighbor radius in raw coordinate degrees (density path).
    /// Default: 1e-5
    pub epsilon: f64,

    /// DBSCAN minimum neighborhood size, the point itself included (density path).
    /// Default: 5
    pub min_points: usize,

    /// Minimum k-means inertia improvement for the elbow scan to keep going.
    /// Default: 0.01
    pub elbow_threshold: f64,

    /// Number of grid buckets to keep (frequency path).
    /// `None` (or `-1` in parameter documents) selects buckets by `min_cluster_size`.
    /// Default: None
    #[serde(deserialize_with = "deserialize_max_clusters")]
    pub max_clusters: Option<usize>,

    /// Minimum fraction of readings a bucket needs to be significant (frequency path).
    /// Default: 0.01
    pub min_cluster_size: f64,

    /// Locations closer than this (great-circle) are merged.
    /// Default: 300.0 meters
    pub max_merge_distance_meters: f64,

    /// Route density-path results through the proximity merge as well.
    /// Default: false (only the frequency path merges)
    pub merge_density_results: bool,

    /// Readings per DBSCAN pass during reduction.
    /// Default: 30000
    pub chunk_size: usize,

    /// Planar distance under which a new cluster centroid snaps to an existing
    /// summary point.
    /// Default: 20.0 meters
    pub snap_distance_meters: f64,
}

impl Default for LocationConfig {
    fn default() -> Self {
        Self {
            method: ExtractionMethod::Frequency,
            k_max: 10,
            epsilon: 1e-5,
            min_points: 5,
            elbow_threshold: 0.01,
            max_clusters: None,
            min_cluster_size: 0.01,
            max_merge_distance_meters: 300.0,
            merge_density_results: false,
            chunk_size: 30_000,
            snap_distance_meters: 20.0,
        }
    }
}

impl LocationConfig {
    /// Parse a parameter document, filling absent fields with defaults.
    ///
    /// # Example
    /// ```
    /// use significant_locations::{ExtractionMethod, LocationConfig};
    ///
    /// let config = LocationConfig::from_json(r#"{"method": "k_means", "k_max": 6}"#).unwrap();
    /// assert_eq!(config.method, ExtractionMethod::DensityPartition);
    /// assert_eq!(config.k_max, 6);
    /// assert_eq!(config.max_clusters, None);
    /// ```
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Check that every parameter is within its valid range.
    pub fn validate(&self) -> Result<()> {
        let fail = |message: String| Err(LocationError::ConfigError { message });

        if self.k_max == 0 {
            return fail("k_max must be at least 1".to_string());
        }
        if !(self.epsilon.is_finite() && self.epsilon > 0.0) {
            return fail(format!("epsilon must be positive, got {}", self.epsilon));
        }
        if self.min_points < 2 {
            return fail(format!("min_points must be at least 2, got {}", self.min_points));
        }
        if !(self.elbow_threshold.is_finite() && self.elbow_threshold >= 0.0) {
            return fail(format!(
                "elbow_threshold must be non-negative, got {}",
                self.elbow_threshold
            ));
        }
        if !(self.min_cluster_size > 0.0 && self.min_cluster_size <= 1.0) {
            return fail(format!(
                "min_cluster_size must be in (0, 1], got {}",
                self.min_cluster_size
            ));
        }
        if !(self.max_merge_distance_meters.is_finite() && self.max_merge_distance_meters >= 0.0) {
            return fail(format!(
                "max_merge_distance_meters must be non-negative, got {}",
                self.max_merge_distance_meters
            ));
        }
        if self.chunk_size == 0 {
            return fail("chunk_size must be at least 1".to_string());
        }
        if !(self.snap_distance_meters.is_finite() && self.snap_distance_meters >= 0.0) {
            return fail(format!(
                "snap_distance_meters must be non-negative, got {}",
                self.snap_distance_meters
            ));
        }
        Ok(())
    }
}

/// Accept `-1` (or any negative number, or null) as "no fixed bucket count".
fn deserialize_max_clusters<'de, D>(deserializer: D) -> std::result::Result<Option<usize>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<i64> = Option::deserialize(deserializer)?;
    Ok(raw.and_then(|n| usize::try_from(n).ok()))
}

// ============================================================================
// Tests
// ============================================================================
