//! # Algorithm Toolbox
//!
//! Direct access to the building blocks behind [`LocationEngine`](crate::LocationEngine),
//! for callers that manage their own GPS history and state.
//!
//! ## Core Algorithms
//!
//! - **Spatial reduction**: DBSCAN chunks folded into weighted summary points
//! - **Elbow selection**: pick a k-means cluster count from summed squared distances
//! - **Grid binning**: most visited ~100 m cells
//! - **Proximity merge**: fold near-duplicate locations together
//! - **Dwell duration**: run-length time spent at a location
//!
//! ## Geographic Utilities
//!
//! - **Planar distance**: fast equirectangular approximation
//! - **Haversine distance**: great-circle distance between GPS points
//!
//! # Example
//!
//! ```rust
//! use significant_locations::algorithms::{dwell_duration, haversine_distance, GpsPoint};
//!
//! let a = GpsPoint::new(37.7749, -122.4194);
//! let b = GpsPoint::new(37.7849, -122.4194);
//! assert!(haversine_distance(&a, &b) > 1000.0);
//!
//! let timestamps = [0, 1000, 2000, 3000];
//! let labels = [Some(0), Some(0), None, Some(0)];
//! assert_eq!(dwell_duration(&timestamps, &labels, 0), 1000);
//! ```

// =============================================================================
// Core Types (re-exported from lib)
// =============================================================================

pub use crate::{GpsPoint, GpsReading, Location, LocationConfig, LocationLabel};

// =============================================================================
// Geographic Utilities
// =============================================================================

pub use crate::geo_utils::{
    compute_center, haversine_distance, mean_planar_distance, meters_to_degrees,
    planar_distance, round_to_grid,
};

// =============================================================================
// Spatial Reduction
// =============================================================================

/// Fold one chunk of readings into a summary (DBSCAN + snapping).
pub use crate::reduction::fold_chunk;
pub use crate::reduction::{reduce, ReductionParams, ReductionState, SummaryPoint};

// =============================================================================
// Density+Partition
// =============================================================================

pub use crate::density::{
    candidate_upper_bound, expand_summary, locations_from_assignments, select_cluster_count,
};

// =============================================================================
// Frequency Binning
// =============================================================================

pub use crate::frequency::{bucket_readings, select_buckets, Bucket};

// =============================================================================
// Post-processing
// =============================================================================

pub use crate::dwell::dwell_duration;
pub use crate::merge::merge_nearby_locations;
