//! # Density+Partition Extractor
//!
//! Turns the reduced summary of a subject's history into significant
//! locations, then measures them against the readings of the requested window.
//!
//! ## Algorithm
//!
//! 1. Expand every summary point into `count` copies (a weighted cloud that
//!    approximates the full history while staying small to cluster)
//! 2. Fit k-means for each candidate `k`, score it by the total within-cluster
//!    sum of squares, and pick `k` with the elbow rule: the first `k` whose
//!    improvement to `k + 1` is below the threshold
//! 3. Refit with k-means++ seeding and the chosen `k`
//! 4. Assign each window reading to its nearest centroid and compute
//!    proportion, radius and dwell time per centroid
//!
//! Locations are ranked by how many window readings they captured.

use std::collections::HashSet;

use linfa::traits::{Fit, Predict};
use linfa::DatasetBase;
use linfa_clustering::{KMeans, KMeansInit};
use log::{debug, info, warn};
use ndarray::{Array1, Array2, ArrayView2};

#[cfg(feature = "parallel")]
use rayon::prelude::*;

use crate::geo_utils::mean_planar_distance;
use crate::merge::merge_nearby_locations;
use crate::reduction::{ReductionState, SummaryPoint};
use crate::source::fetch_valid;
use crate::{
    dwell_duration, GpsPoint, GpsReading, GpsSource, Location, LocationConfig, LocationError,
    LocationLabel, Result,
};

/// Extract locations for `[start, end)` from an up-to-date reduction state.
///
/// Returns an empty list when the window has no readings.
pub fn extract_locations<G: GpsSource + ?Sized>(
    gps: &G,
    subject_id: &str,
    start: i64,
    end: i64,
    state: &ReductionState,
    config: &LocationConfig,
) -> Result<Vec<Location>> {
    let window = fetch_valid(gps, subject_id, start, end)?;
    if window.is_empty() {
        debug!(
            "[DensityExtractor] No readings for {} in [{}, {})",
            subject_id, start, end
        );
        return Ok(Vec::new());
    }

    let cloud = expand_summary(&state.summary_points);
    if cloud.nrows() == 0 {
        warn!(
            "[DensityExtractor] {} has {} window readings but an empty summary",
            subject_id,
            window.len()
        );
        return Ok(Vec::new());
    }

    let max_k = candidate_upper_bound(
        config.k_max,
        cloud.nrows(),
        distinct_coordinates(&state.summary_points),
    );
    info!(
        "[DensityExtractor] Scoring k = 1..={} over {} weighted points (k_max = {})",
        max_k,
        cloud.nrows(),
        config.k_max
    );
    let inertias = fit_inertias(cloud.view(), max_k)?;
    let k = select_cluster_count(&inertias, config.elbow_threshold);

    info!("[DensityExtractor] Computing k-means++ with k = {}", k);
    let model = KMeans::params(k)
        .init_method(KMeansInit::KMeansPlusPlus)
        .fit(&DatasetBase::from(cloud.view()))
        .map_err(clustering_error)?;

    let records = readings_to_records(&window);
    let assignments: Array1<usize> = model.predict(&records);
    let centroids: Vec<GpsPoint> = model
        .centroids()
        .rows()
        .into_iter()
        .map(|row| GpsPoint::new(row[0], row[1]))
        .collect();

    let assignments = assignments.to_vec();
    let locations = locations_from_assignments(start, end, &window, &centroids, &assignments);

    if config.merge_density_results {
        Ok(merge_nearby_locations(
            locations,
            config.max_merge_distance_meters,
        ))
    } else {
        Ok(locations)
    }
}

/// Repeat each summary point's coordinate `count` times as `[lat, lon]` rows.
pub fn expand_summary(points: &[SummaryPoint]) -> Array2<f64> {
    let total: usize = points.iter().map(|p| p.count as usize).sum();
    let mut flat = Vec::with_capacity(total * 2);
    for p in points {
        for _ in 0..p.count {
            flat.push(p.latitude);
            flat.push(p.longitude);
        }
    }
    Array2::from_shape_vec((total, 2), flat).unwrap_or_else(|_| Array2::zeros((0, 2)))
}

/// Largest candidate cluster count for the elbow scan.
///
/// Candidates run up to `min(k_max, cloud_len) - 1`, never past the number of
/// distinct coordinates, and always include `k = 1`.
pub fn candidate_upper_bound(k_max: usize, cloud_len: usize, distinct: usize) -> usize {
    k_max
        .min(cloud_len)
        .saturating_sub(1)
        .min(distinct)
        .max(1)
}

/// Pick `k` from inertias of `k = 1, 2, ...` (index 0 is `k = 1`).
///
/// Returns the first `k` whose improvement to the next candidate is below
/// `threshold`, or the last candidate when none qualifies.
///
/// # Example
/// ```
/// use significant_locations::select_cluster_count;
///
/// assert_eq!(select_cluster_count(&[10.0, 2.0, 1.995, 1.99], 0.01), 2);
/// assert_eq!(select_cluster_count(&[10.0, 5.0, 1.0], 0.01), 3);
/// ```
pub fn select_cluster_count(inertias: &[f64], threshold: f64) -> usize {
    inertias
        .windows(2)
        .position(|pair| pair[0] - pair[1] < threshold)
        .map_or(inertias.len().max(1), |i| i + 1)
}

/// Build one location per centroid from per-reading centroid assignments.
///
/// Ranks follow the number of assigned readings, most first; centroids with
/// equal counts keep their fitted order.
pub fn locations_from_assignments(
    start: i64,
    end: i64,
    window: &[GpsReading],
    centroids: &[GpsPoint],
    assignments: &[usize],
) -> Vec<Location> {
    let total = window.len();
    let mut counts = vec![0usize; centroids.len()];
    for &idx in assignments {
        if let Some(count) = counts.get_mut(idx) {
            *count += 1;
        }
    }

    let mut order: Vec<usize> = (0..centroids.len()).collect();
    order.sort_by(|a, b| counts[*b].cmp(&counts[*a]));

    let timestamps: Vec<i64> = window.iter().map(|r| r.timestamp).collect();
    let labels: Vec<LocationLabel> = assignments.iter().map(|&idx| Some(idx)).collect();

    order
        .into_iter()
        .enumerate()
        .map(|(rank, idx)| {
            let center = centroids[idx];
            let assigned: Vec<GpsPoint> = window
                .iter()
                .zip(assignments)
                .filter(|(_, assigned_idx)| **assigned_idx == idx)
                .map(|(r, _)| r.point())
                .collect();

            Location {
                window_start: start,
                window_end: end,
                latitude: center.latitude,
                longitude: center.longitude,
                rank,
                radius_meters: mean_planar_distance(&center, &assigned),
                proportion: if total == 0 {
                    0.0
                } else {
                    counts[idx] as f64 / total as f64
                },
                duration_ms: dwell_duration(&timestamps, &labels, idx),
            }
        })
        .collect()
}

// ============================================================================
// Clustering helpers
// ============================================================================

/// Fit `k` clusters and score the fit by its total within-cluster sum of
/// squared distances.
///
/// `KMeans::inertia` is a per-sample mean, so the sum is taken here.
fn fit_inertia(cloud: ArrayView2<f64>, k: usize) -> Result<f64> {
    let model = KMeans::params(k)
        .fit(&DatasetBase::from(cloud))
        .map_err(clustering_error)?;
    let assignments: Array1<usize> = model.predict(&cloud);
    Ok(sum_of_squares(cloud, model.centroids().view(), &assignments))
}

/// Sum of squared distances from each row to its assigned centroid.
fn sum_of_squares(
    cloud: ArrayView2<f64>,
    centroids: ArrayView2<f64>,
    assignments: &Array1<usize>,
) -> f64 {
    cloud
        .rows()
        .into_iter()
        .zip(assignments.iter())
        .map(|(row, &idx)| {
            let centroid = centroids.row(idx);
            row.iter()
                .zip(centroid.iter())
                .map(|(x, c)| (x - c).powi(2))
                .sum::<f64>()
        })
        .sum()
}

#[cfg(feature = "parallel")]
fn fit_inertias(cloud: ArrayView2<f64>, max_k: usize) -> Result<Vec<f64>> {
    (1..=max_k)
        .into_par_iter()
        .map(|k| fit_inertia(cloud, k))
        .collect()
}

#[cfg(not(feature = "parallel"))]
fn fit_inertias(cloud: ArrayView2<f64>, max_k: usize) -> Result<Vec<f64>> {
    (1..=max_k).map(|k| fit_inertia(cloud, k)).collect()
}

fn readings_to_records(readings: &[GpsReading]) -> Array2<f64> {
    Array2::from_shape_fn((readings.len(), 2), |(i, j)| {
        if j == 0 {
            readings[i].latitude
        } else {
            readings[i].longitude
        }
    })
}

fn distinct_coordinates(points: &[SummaryPoint]) -> usize {
    points
        .iter()
        .map(|p| (p.latitude.to_bits(), p.longitude.to_bits()))
        .collect::<HashSet<_>>()
        .len()
}

fn clustering_error<E: std::fmt::Display>(e: E) -> LocationError {
    LocationError::Clustering {
        message: e.to_string(),
    }
}
