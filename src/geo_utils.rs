//! Geographic utilities.
//!
//! Two distance formulas live here and they are not interchangeable:
//!
//! - [`planar_distance`] is a flat-earth approximation. It is cheap and only
//!   meaningful over short ranges, so it is used for snapping summary points
//!   and for location radii.
//! - [`haversine_distance`] is the great-circle distance. It is used by the
//!   proximity merge, which may compare locations that are far apart.
//!
//! Both take coordinates in degrees and return meters.

use crate::GpsPoint;

/// Length of one degree of arc used by the planar approximation, in kilometers.
pub const KM_PER_DEGREE: f64 = 110.25;

/// Earth radius used by the great-circle formula (equatorial), in meters.
pub const EARTH_RADIUS_METERS: f64 = 6_378_137.0;

/// Planar approximation of the distance from `from` to `to`, in meters.
///
/// The longitude delta is compensated by the cosine of `to`'s latitude, so the
/// result is not symmetric under swapping the arguments. Callers keep a fixed
/// argument order: the reference coordinate (centroid, existing summary point)
/// first, the other point second.
///
/// # Example
/// ```
/// use significant_locations::GpsPoint;
/// use significant_locations::geo_utils::planar_distance;
///
/// let a = GpsPoint::new(37.0, -122.0);
/// let b = GpsPoint::new(37.001, -122.0);
/// let d = planar_distance(&a, &b);
/// assert!((d - 110.25).abs() < 0.01);
/// ```
pub fn planar_distance(from: &GpsPoint, to: &GpsPoint) -> f64 {
    let d_lat = from.latitude - to.latitude;
    let d_lng = (from.longitude - to.longitude) * to.latitude.to_radians().cos();
    KM_PER_DEGREE * (d_lat * d_lat + d_lng * d_lng).sqrt() * 1000.0
}

/// Great-circle distance between two points, in meters.
///
/// # Example
/// ```
/// use significant_locations::GpsPoint;
/// use significant_locations::geo_utils::haversine_distance;
///
/// let london = GpsPoint::new(51.5074, -0.1278);
/// let paris = GpsPoint::new(48.8566, 2.3522);
/// let d = haversine_distance(&london, &paris);
/// assert!((d - 344_000.0).abs() < 5_000.0);
/// ```
pub fn haversine_distance(p1: &GpsPoint, p2: &GpsPoint) -> f64 {
    let lat1 = p1.latitude.to_radians();
    let lat2 = p2.latitude.to_radians();
    let d_lat = lat2 - lat1;
    let d_lng = (p2.longitude - p1.longitude).to_radians();

    let a = (d_lat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (d_lng / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());

    EARTH_RADIUS_METERS * c
}

/// Mean planar distance from `center` to each of `points`, in meters.
///
/// Returns `None` when `points` is empty.
pub fn mean_planar_distance<'a, I>(center: &GpsPoint, points: I) -> Option<f64>
where
    I: IntoIterator<Item = &'a GpsPoint>,
{
    let (sum, count) = points
        .into_iter()
        .fold((0.0, 0usize), |(sum, count), p| {
            (sum + planar_distance(center, p), count + 1)
        });

    if count == 0 {
        None
    } else {
        Some(sum / count as f64)
    }
}

/// Round a coordinate to `decimals` decimal places.
///
/// Rounds the exact binary value rather than a scaled product, so `-122.4195`
/// (stored just above `-122.4195`) goes to `-122.419`, not `-122.42`.
pub fn round_to_grid(value: f64, decimals: u32) -> f64 {
    if !value.is_finite() {
        return value;
    }
    format!("{:.*}", decimals as usize, value)
        .parse()
        .unwrap_or(value)
}

/// Convert a planar distance in meters to degrees of latitude.
pub fn meters_to_degrees(meters: f64) -> f64 {
    meters / (KM_PER_DEGREE * 1000.0)
}

/// Arithmetic mean of a set of points, or `None` when empty.
pub fn compute_center(points: &[GpsPoint]) -> Option<GpsPoint> {
    if points.is_empty() {
        return None;
    }
    let n = points.len() as f64;
    let lat = points.iter().map(|p| p.latitude).sum::<f64>() / n;
    let lng = points.iter().map(|p| p.longitude).sum::<f64>() / n;
    Some(GpsPoint::new(lat, lng))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx_eq(a: f64, b: f64, epsilon: f64) -> bool {
        (a - b).abs() < epsilon
    }

    #[test]
    fn test_planar_distance_same_point() {
        let p = GpsPoint::new(37.0, -122.0);
        assert_eq!(planar_distance(&p, &p), 0.0);
    }

    #[test]
    fn test_planar_distance_latitude_only() {
        let a = GpsPoint::new(10.0, 20.0);
        let b = GpsPoint::new(10.01, 20.0);
        assert!(approx_eq(planar_distance(&a, &b), 1102.5, 0.01));
    }

    #[test]
    fn test_planar_distance_is_asymmetric() {
        let a = GpsPoint::new(0.0, 0.0);
        let b = GpsPoint::new(60.0, 1.0);
        // Longitude compensated with cos(60°) in one order and cos(0°) in the other
        assert!(planar_distance(&a, &b) < planar_distance(&b, &a));
    }

    #[test]
    fn test_haversine_distance_same_point() {
        let p = GpsPoint::new(51.5074, -0.1278);
        assert_eq!(haversine_distance(&p, &p), 0.0);
    }

    #[test]
    fn test_haversine_short_range_close_to_planar() {
        let a = GpsPoint::new(37.0, -122.0);
        let b = GpsPoint::new(37.001, -122.001);
        let h = haversine_distance(&a, &b);
        let p = planar_distance(&a, &b);
        assert!(approx_eq(h, p, 5.0), "haversine {} vs planar {}", h, p);
    }

    #[test]
    fn test_mean_planar_distance() {
        let center = GpsPoint::new(10.0, 20.0);
        let points = vec![GpsPoint::new(10.0, 20.0), GpsPoint::new(10.01, 20.0)];
        let mean = mean_planar_distance(&center, &points).unwrap();
        assert!(approx_eq(mean, 551.25, 0.01));

        let empty: Vec<GpsPoint> = vec![];
        assert!(mean_planar_distance(&center, &empty).is_none());
    }

    #[test]
    fn test_round_to_grid() {
        assert_eq!(round_to_grid(37.12345, 3), 37.123);
        assert_eq!(round_to_grid(-122.0006, 3), -122.001);
        assert_eq!(round_to_grid(1.0, 3), 1.0);
    }

    #[test]
    fn test_round_to_grid_uses_binary_value() {
        // 1000 * -122.4195 rounds to exactly -122419.5 in floating point,
        // but the stored coordinate sits just above the half-way mark
        assert_eq!(round_to_grid(-122.4195, 3), -122.419);
        assert_eq!(round_to_grid(37.7749, 3), 37.775);
        assert_eq!(round_to_grid(10.001, 3), 10.001);
        assert!(round_to_grid(f64::NAN, 3).is_nan());
    }

    #[test]
    fn test_compute_center() {
        let track = vec![GpsPoint::new(51.50, -0.10), GpsPoint::new(51.52, -0.12)];
        let center = compute_center(&track).unwrap();
        assert!(approx_eq(center.latitude, 51.51, 1e-9));
        assert!(approx_eq(center.longitude, -0.11, 1e-9));
        assert!(compute_center(&[]).is_none());
    }
}
