//! # Incremental Spatial Reducer
//!
//! Repeatedly clustering a subject's entire GPS history gets more expensive
//! with every call. Instead, history is folded forward into a compact set of
//! weighted summary points, and only readings newer than the persisted
//! watermark are ever read again.
//!
//! ## Algorithm
//!
//! 1. Fetch readings in `[watermark, end)` and drop consecutive duplicate timestamps
//! 2. Split them into fixed-size chunks to bound DBSCAN's memory use
//! 3. Per chunk, run DBSCAN over raw `(lat, lon)`:
//!    - every cluster centroid snaps onto the nearest existing summary point
//!      within the snap distance (its count grows, its coordinate stays put),
//!      or becomes a new summary point
//!    - every noise reading becomes its own summary point with count 1
//! 4. Return the new state with `watermark = end` as a single value
//!
//! The caller persists the returned state with one write, so a failure in any
//! chunk leaves the stored state untouched.

use linfa::traits::Transformer;
use linfa::ParamGuard;
use linfa_clustering::Dbscan;
use log::{debug, info};
use ndarray::{Array1, Array2};
use rstar::{RTree, RTreeObject, AABB};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::geo_utils::{compute_center, meters_to_degrees, planar_distance};
use crate::source::fetch_valid;
use crate::{
    dedup_consecutive_timestamps, GpsPoint, GpsReading, GpsSource, LocationConfig,
    LocationError, OptionExt, Result,
};

/// Attachment key under which a subject's reduction state is stored.
pub const REDUCED_ATTACHMENT_KEY: &str = "cortex.significant_locations.reduced";

// ============================================================================
// Types
// ============================================================================

/// A weighted representative of one or more raw readings.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SummaryPoint {
    pub latitude: f64,
    pub longitude: f64,
    /// Number of raw readings this point stands in for
    pub count: u64,
}

impl SummaryPoint {
    pub fn new(latitude: f64, longitude: f64, count: u64) -> Self {
        Self {
            latitude,
            longitude,
            count,
        }
    }

    pub fn point(&self) -> GpsPoint {
        GpsPoint::new(self.latitude, self.longitude)
    }
}

/// Persisted per-subject reduction state.
///
/// Serialized as `{"end": watermark, "data": [summary points]}`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReductionState {
    /// Readings strictly before this timestamp are already folded in
    #[serde(rename = "end")]
    pub watermark: i64,
    #[serde(rename = "data")]
    pub summary_points: Vec<SummaryPoint>,
}

impl ReductionState {
    /// Decode a stored attachment. A missing attachment is the empty state.
    pub fn from_attachment(value: Option<Value>) -> Result<Self> {
        match value {
            Some(value) => Ok(serde_json::from_value(value)?),
            None => Ok(Self::default()),
        }
    }

    /// Encode the state for the attachment store.
    pub fn to_attachment(&self) -> Result<Value> {
        Ok(serde_json::to_value(self)?)
    }

    /// Total number of raw readings represented by the summary.
    pub fn total_count(&self) -> u64 {
        self.summary_points.iter().map(|p| p.count).sum()
    }
}

/// Tuning for one reduction pass.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReductionParams {
    /// DBSCAN neighbor radius in coordinate degrees
    pub epsilon: f64,
    /// DBSCAN minimum neighborhood size
    pub min_points: usize,
    /// Readings per DBSCAN pass
    pub chunk_size: usize,
    /// Snap threshold in planar meters
    pub snap_distance_meters: f64,
}

impl Default for ReductionParams {
    fn default() -> Self {
        Self::from(&LocationConfig::default())
    }
}

impl From<&LocationConfig> for ReductionParams {
    fn from(config: &LocationConfig) -> Self {
        Self {
            epsilon: config.epsilon,
            min_points: config.min_points,
            chunk_size: config.chunk_size,
            snap_distance_meters: config.snap_distance_meters,
        }
    }
}

// ============================================================================
// Reduction
// ============================================================================

/// Fold readings in `[state.watermark, end)` into `state`'s summary points.
///
/// Returns `state` unchanged when the watermark already covers `end` or when
/// there are no new readings (the watermark is not advanced in that case).
pub fn reduce<G: GpsSource + ?Sized>(
    gps: &G,
    subject_id: &str,
    end: i64,
    state: &ReductionState,
    params: &ReductionParams,
) -> Result<ReductionState> {
    if state.watermark >= end {
        debug!(
            "[Reducer] {} already reduced up to {} (requested {})",
            subject_id, state.watermark, end
        );
        return Ok(state.clone());
    }

    let readings =
        dedup_consecutive_timestamps(fetch_valid(gps, subject_id, state.watermark, end)?);
    if readings.is_empty() {
        debug!(
            "[Reducer] No new readings for {} in [{}, {})",
            subject_id, state.watermark, end
        );
        return Ok(state.clone());
    }

    let chunk_size = params.chunk_size.max(1);
    info!(
        "[Reducer] Reducing {} new readings for {} in {} chunk(s)",
        readings.len(),
        subject_id,
        readings.len().div_ceil(chunk_size)
    );

    let mut summary_points = state.summary_points.clone();
    for chunk in readings.chunks(chunk_size) {
        fold_chunk(&mut summary_points, chunk, params)?;
    }

    info!(
        "[Reducer] {} summary points for {} (was {})",
        summary_points.len(),
        subject_id,
        state.summary_points.len()
    );

    Ok(ReductionState {
        watermark: end,
        summary_points,
    })
}

/// Run DBSCAN over one chunk and fold its clusters and noise into `summary_points`.
///
/// Snapping only considers the summary points that existed before this chunk.
pub fn fold_chunk(
    summary_points: &mut Vec<SummaryPoint>,
    chunk: &[GpsReading],
    params: &ReductionParams,
) -> Result<()> {
    if chunk.is_empty() {
        return Ok(());
    }

    let memberships = density_labels(chunk, params)?;

    let cluster_count = memberships.iter().flatten().max().map_or(0, |&c| c + 1);
    let mut clusters: Vec<Vec<GpsPoint>> = vec![Vec::new(); cluster_count];
    let mut noise = Vec::new();
    for (reading, label) in chunk.iter().zip(memberships.iter()) {
        match label {
            Some(cluster) => clusters[*cluster].push(reading.point()),
            None => noise.push(reading.point()),
        }
    }

    debug!(
        "[Reducer] Chunk of {}: {} clusters, {} noise readings",
        chunk.len(),
        cluster_count,
        noise.len()
    );

    let index = SnapIndex::new(summary_points);
    for members in clusters.iter().filter(|m| !m.is_empty()) {
        let center = compute_center(members).ok_or_internal("empty cluster has no centroid")?;
        let size = members.len() as u64;

        match index.nearest_within(&center, params.snap_distance_meters) {
            Some(existing) => summary_points[existing].count += size,
            None => summary_points.push(SummaryPoint::new(center.latitude, center.longitude, size)),
        }
    }

    summary_points.extend(
        noise
            .into_iter()
            .map(|p| SummaryPoint::new(p.latitude, p.longitude, 1)),
    );

    Ok(())
}

/// DBSCAN cluster ids per reading; `None` marks noise.
fn density_labels(chunk: &[GpsReading], params: &ReductionParams) -> Result<Array1<Option<usize>>> {
    let records = Array2::from_shape_fn((chunk.len(), 2), |(i, j)| {
        if j == 0 {
            chunk[i].latitude
        } else {
            chunk[i].longitude
        }
    });

    let dbscan = Dbscan::params(params.min_points)
        .tolerance(params.epsilon)
        .check()
        .map_err(|e| LocationError::Clustering {
            message: e.to_string(),
        })?;

    Ok(dbscan.transform(&records))
}

// ============================================================================
// Snap index
// ============================================================================

/// Summary point position for R-tree lookup.
#[derive(Debug, Clone)]
struct SnapEntry {
    index: usize,
    lng: f64,
    lat: f64,
}

impl RTreeObject for SnapEntry {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        AABB::from_point([self.lng, self.lat])
    }
}

/// Nearest-summary-point lookup under the planar metric.
///
/// The R-tree prefilters candidates to the box that can possibly lie within
/// the snap distance; the nearest candidate is then picked by planar distance
/// with ties going to the lowest index, matching a full linear scan.
struct SnapIndex {
    tree: RTree<SnapEntry>,
}

impl SnapIndex {
    fn new(points: &[SummaryPoint]) -> Self {
        let entries = points
            .iter()
            .enumerate()
            .map(|(index, p)| SnapEntry {
                index,
                lng: p.longitude,
                lat: p.latitude,
            })
            .collect();
        Self {
            tree: RTree::bulk_load(entries),
        }
    }

    fn nearest_within(&self, center: &GpsPoint, max_meters: f64) -> Option<usize> {
        // Small slack so float rounding never excludes a boundary candidate
        let lat_span = meters_to_degrees(max_meters) * 1.001;
        let cos_lat = center.latitude.to_radians().cos().abs();
        let lng_span = if cos_lat > 1e-9 {
            (lat_span / cos_lat).min(360.0)
        } else {
            360.0
        };

        let envelope = AABB::from_corners(
            [center.longitude - lng_span, center.latitude - lat_span],
            [center.longitude + lng_span, center.latitude + lat_span],
        );

        self.tree
            .locate_in_envelope(&envelope)
            .map(|entry| {
                let existing = GpsPoint::new(entry.lat, entry.lng);
                (entry.index, planar_distance(&existing, center))
            })
            .filter(|&(_, distance)| distance < max_meters)
            .min_by(|a, b| a.1.total_cmp(&b.1).then(a.0.cmp(&b.0)))
            .map(|(index, _)| index)
    }
}
