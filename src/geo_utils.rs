//! # Geographic Utilities
//!
//! Great-circle distance computation for GPS track points.
//!
//! ## Overview
//!
//! | Function | Description |
//! |----------|-------------|
//! | [`haversine_nm`] | Great-circle distance between two coordinates, in nautical miles |
//! | [`point_distance_nm`] | The same, between two [`TrackPoint`]s |
//! | [`track_distance_nm`] | Cumulative length of a point sequence |
//!
//! ## Algorithm Notes
//!
//! Distances use the haversine formula on a spherical Earth of radius
//! 6371.0 km, converted to nautical miles (1 nm = 1.852 km). All inputs are
//! WGS84 latitude/longitude in degrees, the coordinate system GPS receivers
//! emit.
//!
//! Reference: [Haversine formula (Wikipedia)](https://en.wikipedia.org/wiki/Haversine_formula)

use crate::TrackPoint;

const EARTH_RADIUS_KM: f64 = 6371.0;
const KM_PER_NAUTICAL_MILE: f64 = 1.852;

// =============================================================================
// Distance Functions
// =============================================================================

/// Calculate the great-circle distance between two coordinates using the
/// haversine formula.
///
/// Returns the distance in nautical miles. Coincident points return exactly
/// 0.0.
///
/// # Example
///
/// ```rust
/// use gpx_splitter::geo_utils::haversine_nm;
///
/// // One degree of longitude at the equator is about 60 nm
/// let distance = haversine_nm(0.0, 0.0, 0.0, 1.0);
/// assert!((distance - 60.04).abs() < 0.1);
/// ```
#[inline]
pub fn haversine_nm(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let lat1_rad = lat1.to_radians();
    let lat2_rad = lat2.to_radians();
    let dlat = (lat2 - lat1).to_radians();
    let dlon = (lon2 - lon1).to_radians();

    let a = (dlat / 2.0).sin().powi(2)
        + lat1_rad.cos() * lat2_rad.cos() * (dlon / 2.0).sin().powi(2);
    // a can overshoot 1.0 by a few ulps for antipodal pairs
    let a = a.min(1.0);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());

    EARTH_RADIUS_KM * c / KM_PER_NAUTICAL_MILE
}

/// [`haversine_nm`] between two track points.
#[inline]
pub fn point_distance_nm(a: &TrackPoint, b: &TrackPoint) -> f64 {
    haversine_nm(a.latitude, a.longitude, b.latitude, b.longitude)
}

/// Cumulative great-circle length of a point sequence, in nautical miles.
///
/// Sums the haversine distance between consecutive points. Empty or
/// single-point sequences return 0.0.
pub fn track_distance_nm(points: &[TrackPoint]) -> f64 {
    if points.len() < 2 {
        return 0.0;
    }

    points
        .windows(2)
        .map(|w| point_distance_nm(&w[0], &w[1]))
        .sum()
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn approx_eq(a: f64, b: f64, epsilon: f64) -> bool {
        (a - b).abs() < epsilon
    }

    fn point(lat: f64, lon: f64) -> TrackPoint {
        TrackPoint::new(lat, lon, Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap())
    }

    #[test]
    fn test_coincident_points_are_zero() {
        assert_eq!(haversine_nm(51.5074, -0.1278, 51.5074, -0.1278), 0.0);
    }

    #[test]
    fn test_distance_is_symmetric() {
        let d1 = haversine_nm(51.5074, -0.1278, 48.8566, 2.3522);
        let d2 = haversine_nm(48.8566, 2.3522, 51.5074, -0.1278);
        assert!(approx_eq(d1, d2, 1e-9));
    }

    #[test]
    fn test_one_degree_longitude_at_equator() {
        // 1 degree of arc on a 6371 km sphere is ~111.195 km, ~60.04 nm
        let d = haversine_nm(0.0, 0.0, 0.0, 1.0);
        assert!(approx_eq(d, 60.04, 0.05), "got {d}");
    }

    #[test]
    fn test_london_to_paris() {
        // ~343.5 km, ~185.5 nm
        let d = haversine_nm(51.5074, -0.1278, 48.8566, 2.3522);
        assert!(approx_eq(d, 185.5, 2.0), "got {d}");
    }

    #[test]
    fn test_antipodal_points_are_finite() {
        // Half the circumference: pi * 6371 km / 1.852
        let d = haversine_nm(0.0, 0.0, 0.0, 180.0);
        assert!(d.is_finite());
        assert!(approx_eq(d, 10807.28, 1.0), "got {d}");

        let d2 = haversine_nm(90.0, 0.0, -90.0, 0.0);
        assert!(d2.is_finite());
        assert!(approx_eq(d2, 10807.28, 1.0), "got {d2}");
    }

    #[test]
    fn test_track_distance_empty_and_single() {
        assert_eq!(track_distance_nm(&[]), 0.0);
        assert_eq!(track_distance_nm(&[point(51.5, -0.1)]), 0.0);
    }

    #[test]
    fn test_track_distance_sums_legs() {
        let points = [point(0.0, 0.0), point(0.0, 0.5), point(0.0, 1.0)];
        let total = track_distance_nm(&points);
        let direct = haversine_nm(0.0, 0.0, 0.0, 1.0);
        // Legs along the equator add up to the direct distance
        assert!(approx_eq(total, direct, 1e-6));
    }
}
