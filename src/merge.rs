//! Proximity merge of detected locations.
//!
//! Walking locations in rank order, every later location closer than the merge
//! distance (great-circle) is absorbed into the earlier one: its proportion and
//! dwell time move over and it is dropped. The absorbing location keeps its own
//! coordinate and radius.
//!
//! An absorbed location keeps its dwell time, so a later anchor that is also
//! within range adds that time again. Its proportion is already zero by then.
//!
//! Survivors are re-ranked by position only. They are not re-sorted by their
//! post-merge proportion, so a merged location can end up with a larger
//! proportion than one ranked above it.

use log::debug;

use crate::geo_utils::haversine_distance;
use crate::Location;

/// Fold together locations closer than `max_distance_meters`.
///
/// Total proportion is conserved; ranks of the result are `0..len`.
///
/// # Example
/// ```
/// use significant_locations::{merge_nearby_locations, Location};
///
/// let at = |lat: f64, proportion: f64| Location {
///     window_start: 0,
///     window_end: 1,
///     latitude: lat,
///     longitude: 0.0,
///     rank: 0,
///     radius_meters: None,
///     proportion,
///     duration_ms: 0,
/// };
/// let merged = merge_nearby_locations(vec![at(0.0, 0.5), at(0.001, 0.3), at(1.0, 0.2)], 300.0);
/// assert_eq!(merged.len(), 2);
/// assert!((merged[0].proportion - 0.8).abs() < 1e-12);
/// assert_eq!(merged[1].rank, 1);
/// ```
pub fn merge_nearby_locations(mut locations: Vec<Location>, max_distance_meters: f64) -> Vec<Location> {
    let n = locations.len();

    for i in 0..n.saturating_sub(1) {
        if locations[i].proportion <= 0.0 {
            continue;
        }
        let anchor = locations[i].point();

        for j in (i + 1)..n {
            if haversine_distance(&anchor, &locations[j].point()) < max_distance_meters {
                let absorbed_proportion = locations[j].proportion;
                let absorbed_duration = locations[j].duration_ms;

                locations[i].proportion += absorbed_proportion;
                locations[i].duration_ms += absorbed_duration;
                locations[j].proportion = 0.0;
            }
        }
    }

    let before = locations.len();
    let mut survivors: Vec<Location> = locations
        .into_iter()
        .filter(|l| l.proportion > 0.0)
        .collect();

    for (rank, location) in survivors.iter_mut().enumerate() {
        location.rank = rank;
    }

    debug!(
        "[Merge] {} locations -> {} within {:.0}m",
        before,
        survivors.len(),
        max_distance_meters
    );

    survivors
}

#[cfg(test)]
mod tests {
    use super::*;

    fn location(rank: usize, latitude: f64, longitude: f64, proportion: f64, duration_ms: u64) -> Location {
        Location {
            window_start: 0,
            window_end: 100,
            latitude,
            longitude,
            rank,
            radius_meters: Some(10.0),
            proportion,
            duration_ms,
        }
    }

    #[test]
    fn test_far_apart_locations_untouched() {
        let input = vec![
            location(0, 37.0, -122.0, 0.6, 100),
            location(1, 38.0, -122.0, 0.4, 50),
        ];
        let merged = merge_nearby_locations(input.clone(), 300.0);
        assert_eq!(merged, input);
    }

    #[test]
    fn test_nearby_absorbed_into_earlier() {
        let merged = merge_nearby_locations(
            vec![
                location(0, 37.0, -122.0, 0.5, 100),
                location(1, 38.0, -122.0, 0.3, 70),
                location(2, 37.001, -122.0, 0.2, 30),
            ],
            300.0,
        );

        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].latitude, 37.0);
        assert!((merged[0].proportion - 0.7).abs() < 1e-12);
        assert_eq!(merged[0].duration_ms, 130);
        assert_eq!(merged[1].latitude, 38.0);
        assert_eq!(merged[1].rank, 1);
    }

    #[test]
    fn test_merge_conserves_total_proportion() {
        let input = vec![
            location(0, 37.0, -122.0, 0.4, 0),
            location(1, 37.0005, -122.0, 0.25, 0),
            location(2, 37.5, -122.0, 0.2, 0),
            location(3, 37.5005, -122.0, 0.1, 0),
            location(4, 40.0, -122.0, 0.05, 0),
        ];
        let before: f64 = input.iter().map(|l| l.proportion).sum();
        let merged = merge_nearby_locations(input, 300.0);
        let after: f64 = merged.iter().map(|l| l.proportion).sum();

        assert_eq!(merged.len(), 3);
        assert!((before - after).abs() < 1e-12);
        let ranks: Vec<usize> = merged.iter().map(|l| l.rank).collect();
        assert_eq!(ranks, vec![0, 1, 2]);
    }

    #[test]
    fn test_rank_order_not_resorted_after_merge() {
        let merged = merge_nearby_locations(
            vec![
                location(0, 37.0, -122.0, 0.4, 0),
                location(1, 38.0, -122.0, 0.3, 0),
                location(2, 38.0005, -122.0, 0.3, 0),
            ],
            300.0,
        );
        assert_eq!(merged.len(), 2);
        // The merged location now outweighs rank 0 but keeps rank 1
        assert_eq!(merged[0].latitude, 37.0);
        assert!(merged[1].proportion > merged[0].proportion);
        assert_eq!(merged[1].rank, 1);
    }

    #[test]
    fn test_absorbed_location_still_feeds_later_anchor() {
        // Location 2 is within range of both 0 and 1: 0 takes its proportion,
        // and both take its dwell time
        let merged = merge_nearby_locations(
            vec![
                location(0, 37.0, -122.0, 0.5, 100),
                location(1, 37.004, -122.0, 0.3, 50),
                location(2, 37.002, -122.0, 0.2, 40),
            ],
            300.0,
        );
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].duration_ms, 140);
        assert_eq!(merged[1].duration_ms, 90);
        assert!((merged[0].proportion - 0.7).abs() < 1e-12);
        assert!((merged[1].proportion - 0.3).abs() < 1e-12);
    }

    #[test]
    fn test_zero_proportion_dropped() {
        let merged = merge_nearby_locations(
            vec![
                location(0, 37.0, -122.0, 1.0, 0),
                location(1, 40.0, -122.0, 0.0, 0),
            ],
            300.0,
        );
        assert_eq!(merged.len(), 1);
    }

    #[test]
    fn test_empty_and_single() {
        assert!(merge_nearby_locations(vec![], 300.0).is_empty());
        let single = merge_nearby_locations(vec![location(3, 1.0, 1.0, 0.5, 0)], 300.0);
        assert_eq!(single[0].rank, 0);
    }
}
