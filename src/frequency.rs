//! # Frequency ("Mode") Extractor
//!
//! Snaps every reading onto a coarse grid (latitude and longitude rounded to
//! three decimals, roughly 100 m cells) and keeps the most visited cells as
//! locations.
//!
//! Two selection policies:
//! - a fixed number of cells (`max_clusters = Some(n)`), regardless of size
//! - every cell, most visited first, while it holds more than
//!   `min_cluster_size` of all readings (`max_clusters = None`)
//!
//! Proportions are relative to readings that landed in a selected cell, and
//! the result always goes through the proximity merge.

use std::collections::HashMap;

use log::{debug, info};

use crate::geo_utils::{mean_planar_distance, round_to_grid};
use crate::merge::merge_nearby_locations;
use crate::source::fetch_valid;
use crate::{
    dedup_consecutive_timestamps, dwell_duration, GpsPoint, GpsReading, GpsSource, Location,
    LocationConfig, LocationLabel, Result,
};

/// Decimal places kept for grid cells.
pub const GRID_DECIMALS: u32 = 3;

/// A grid cell and how many readings fell into it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bucket {
    pub latitude: f64,
    pub longitude: f64,
    pub count: usize,
}

impl Bucket {
    pub fn point(&self) -> GpsPoint {
        GpsPoint::new(self.latitude, self.longitude)
    }
}

/// Extract locations for `[start, end)` by grid frequency.
///
/// Returns an empty list when the window has no readings.
pub fn extract_locations<G: GpsSource + ?Sized>(
    gps: &G,
    subject_id: &str,
    start: i64,
    end: i64,
    config: &LocationConfig,
) -> Result<Vec<Location>> {
    let readings = dedup_consecutive_timestamps(fetch_valid(gps, subject_id, start, end)?);
    if readings.is_empty() {
        debug!(
            "[FrequencyExtractor] No readings for {} in [{}, {})",
            subject_id, start, end
        );
        return Ok(Vec::new());
    }

    let (buckets, bucket_of) = bucket_readings(&readings);
    let selected = select_buckets(
        &buckets,
        readings.len(),
        config.max_clusters,
        config.min_cluster_size,
    );
    info!(
        "[FrequencyExtractor] {} of {} grid cells selected from {} readings for {}",
        selected,
        buckets.len(),
        readings.len(),
        subject_id
    );

    let labels: Vec<LocationLabel> = bucket_of
        .iter()
        .map(|&b| if b < selected { Some(b) } else { None })
        .collect();

    let locations = locations_from_labels(start, end, &readings, &buckets[..selected], &labels);
    Ok(merge_nearby_locations(
        locations,
        config.max_merge_distance_meters,
    ))
}

/// Group readings into grid cells.
///
/// Returns the cells ordered by descending count (ties in order of first
/// appearance) and, per reading, the index of its cell in that order.
pub fn bucket_readings(readings: &[GpsReading]) -> (Vec<Bucket>, Vec<usize>) {
    let mut ids: HashMap<(u64, u64), usize> = HashMap::new();
    let mut buckets: Vec<Bucket> = Vec::new();
    let mut first_pass = Vec::with_capacity(readings.len());

    for reading in readings {
        // `+ 0.0` folds -0.0 into 0.0 so both land in the same cell
        let lat = round_to_grid(reading.latitude, GRID_DECIMALS) + 0.0;
        let lng = round_to_grid(reading.longitude, GRID_DECIMALS) + 0.0;

        let id = *ids.entry((lat.to_bits(), lng.to_bits())).or_insert_with(|| {
            buckets.push(Bucket {
                latitude: lat,
                longitude: lng,
                count: 0,
            });
            buckets.len() - 1
        });
        buckets[id].count += 1;
        first_pass.push(id);
    }

    let mut order: Vec<usize> = (0..buckets.len()).collect();
    order.sort_by(|a, b| buckets[*b].count.cmp(&buckets[*a].count));

    let mut position = vec![0; buckets.len()];
    for (pos, &id) in order.iter().enumerate() {
        position[id] = pos;
    }

    let sorted = order.iter().map(|&id| buckets[id]).collect();
    let bucket_of = first_pass.into_iter().map(|id| position[id]).collect();
    (sorted, bucket_of)
}

/// How many of the leading (most visited) buckets become locations.
///
/// With `max_clusters = Some(n)` the first `n` buckets are taken. Otherwise
/// buckets are taken while their count exceeds `floor(min_cluster_size * total)`
/// and fewer than `total - 1` have been taken.
///
/// # Example
/// ```
/// use significant_locations::frequency::{select_buckets, Bucket};
///
/// let bucket = |count| Bucket { latitude: 0.0, longitude: 0.0, count };
/// let buckets = [bucket(6), bucket(1), bucket(1), bucket(1), bucket(1)];
/// assert_eq!(select_buckets(&buckets, 10, None, 0.5), 1);
/// assert_eq!(select_buckets(&buckets, 10, Some(3), 0.5), 3);
/// ```
pub fn select_buckets(
    buckets: &[Bucket],
    total: usize,
    max_clusters: Option<usize>,
    min_cluster_size: f64,
) -> usize {
    match max_clusters {
        Some(n) => n.min(buckets.len()),
        None => {
            let min_points = (min_cluster_size * total as f64) as usize;
            buckets
                .iter()
                .enumerate()
                .take_while(|(k, b)| b.count > min_points && *k < total.saturating_sub(1))
                .count()
        }
    }
}

/// Build one location per selected bucket from per-reading labels.
fn locations_from_labels(
    start: i64,
    end: i64,
    readings: &[GpsReading],
    selected: &[Bucket],
    labels: &[LocationLabel],
) -> Vec<Location> {
    let assigned_total = labels.iter().filter(|l| l.is_some()).count();
    let timestamps: Vec<i64> = readings.iter().map(|r| r.timestamp).collect();

    selected
        .iter()
        .enumerate()
        .map(|(idx, bucket)| {
            let center = bucket.point();
            let members: Vec<GpsPoint> = readings
                .iter()
                .zip(labels)
                .filter(|(_, label)| **label == Some(idx))
                .map(|(r, _)| r.point())
                .collect();

            Location {
                window_start: start,
                window_end: end,
                latitude: center.latitude,
                longitude: center.longitude,
                rank: idx,
                radius_meters: mean_planar_distance(&center, &members),
                proportion: if assigned_total == 0 {
                    0.0
                } else {
                    members.len() as f64 / assigned_total as f64
                },
                duration_ms: dwell_duration(&timestamps, labels, idx),
            }
        })
        .collect()
}
