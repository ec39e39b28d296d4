//! # GPX Splitter
//!
//! GPX track splitting and per-track statistics, with an optional web
//! service for uploads, progress polling, renaming, and per-track downloads.
//!
//! The core of this library is a set of pure functions:
//! - Parse GPX text into tracks of timestamped points
//! - Split points into sub-tracks, either by the file's own track tags or
//!   by a time/distance threshold rule
//! - Serialize a point sequence back into GPX track XML
//!
//! ## Features
//!
//! - **`http`** - Enable the reverse-geocoding client (Nominatim)
//! - **`server`** - Enable the axum web application and the `gpx-splitter` binary
//!
//! ## Quick Start
//!
//! ```rust
//! use gpx_splitter::{parse_gpx, split_by_threshold, SplitConfig};
//!
//! let gpx = r#"<gpx xmlns="http://www.topografix.com/GPX/1/1" version="1.1" creator="demo">
//!   <trk><name>Harbour run</name><trkseg>
//!     <trkpt lat="60.1699" lon="24.9384"><time>2024-05-01T08:00:00Z</time></trkpt>
//!     <trkpt lat="60.1702" lon="24.9410"><time>2024-05-01T08:05:00Z</time></trkpt>
//!   </trkseg></trk>
//! </gpx>"#;
//!
//! let tracks = parse_gpx(gpx).unwrap();
//! let split = split_by_threshold(tracks, &SplitConfig::default()).unwrap();
//! for track in &split {
//!     println!("{}: {} points, {:.2} nm", track.name, track.point_count(), track.total_distance_nm());
//! }
//! ```

use chrono::{DateTime, Duration, Utc};
use thiserror::Error;

pub mod geo_utils;
pub mod gpx;
pub mod split;

// Reverse geocoding client (network I/O, kept out of the core)
#[cfg(feature = "http")]
pub mod geocode;

// Web service: upload, progress polling, renaming, downloads
#[cfg(feature = "server")]
pub mod server;
#[cfg(feature = "server")]
pub mod store;

pub use gpx::{parse_gpx, parse_gpx_at, serialize_track};
pub use split::{
    generate_track_name, split_by_threshold, split_by_threshold_at, split_by_tracks, SplitConfig,
};

#[cfg(feature = "http")]
pub use geocode::NominatimClient;

// ============================================================================
// Core Types
// ============================================================================

/// Errors surfaced by parsing and splitting.
#[derive(Debug, Error)]
pub enum SplitError {
    /// The input is not well-formed XML, or no usable tracks survived parsing.
    #[error("invalid GPX file format: {0}")]
    Format(String),

    /// The request is structurally fine but there is nothing to work on.
    #[error("{0}")]
    Validation(String),

    /// GPX output could not be written.
    #[error("failed to write GPX output: {0}")]
    Xml(String),
}

/// A GPS track point: coordinates plus a timestamp.
///
/// Every point carries a timestamp; when the source file had none (or an
/// unparseable one) the parser synthesizes it, so downstream code never deals
/// with missing times.
///
/// # Example
/// ```
/// use chrono::{TimeZone, Utc};
/// use gpx_splitter::TrackPoint;
/// let point = TrackPoint::new(51.5074, -0.1278, Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap());
/// ```
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrackPoint {
    pub latitude: f64,
    pub longitude: f64,
    pub time: DateTime<Utc>,
}

impl TrackPoint {
    /// Create a new track point.
    pub fn new(latitude: f64, longitude: f64, time: DateTime<Utc>) -> Self {
        Self { latitude, longitude, time }
    }
}

/// A named sequence of track points, sorted ascending by timestamp.
///
/// Statistics are derived from the points on demand, never stored, so they
/// cannot drift out of sync. Invariant: a track has at least one point;
/// both the parser and the splitter drop empty candidates instead of
/// emitting them.
#[derive(Debug, Clone)]
pub struct Track {
    pub name: String,
    pub points: Vec<TrackPoint>,
}

impl Track {
    /// Create a track. `points` must be non-empty and sorted by timestamp;
    /// the parser and splitter both uphold this.
    pub fn new(name: impl Into<String>, points: Vec<TrackPoint>) -> Self {
        Self { name: name.into(), points }
    }

    /// Timestamp of the first point.
    pub fn start_time(&self) -> DateTime<Utc> {
        self.points[0].time
    }

    /// Timestamp of the last point.
    pub fn end_time(&self) -> DateTime<Utc> {
        self.points[self.points.len() - 1].time
    }

    /// Elapsed time between the first and last point.
    pub fn duration(&self) -> Duration {
        self.end_time() - self.start_time()
    }

    /// Cumulative great-circle distance over consecutive points, in
    /// nautical miles.
    pub fn total_distance_nm(&self) -> f64 {
        geo_utils::track_distance_nm(&self.points)
    }

    /// Number of points in the track.
    pub fn point_count(&self) -> usize {
        self.points.len()
    }

    /// The first point.
    pub fn start_point(&self) -> TrackPoint {
        self.points[0]
    }

    /// The last point.
    pub fn end_point(&self) -> TrackPoint {
        self.points[self.points.len() - 1]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn point(lat: f64, lon: f64, secs: u32) -> TrackPoint {
        TrackPoint::new(lat, lon, Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, secs).unwrap())
    }

    #[test]
    fn track_statistics_are_derived_from_points() {
        let track = Track::new(
            "test",
            vec![point(0.0, 0.0, 0), point(0.0, 0.5, 30), point(0.0, 1.0, 50)],
        );
        assert_eq!(track.point_count(), 3);
        assert_eq!(track.duration(), Duration::seconds(50));
        assert_eq!(track.start_time(), track.points[0].time);
        assert_eq!(track.end_time(), track.points[2].time);
        // 1 degree of longitude at the equator, split over two legs
        assert!((track.total_distance_nm() - 60.04).abs() < 0.1);
    }

    #[test]
    fn single_point_track_has_zero_duration_and_distance() {
        let track = Track::new("test", vec![point(10.0, 20.0, 0)]);
        assert_eq!(track.duration(), Duration::zero());
        assert_eq!(track.total_distance_nm(), 0.0);
        assert_eq!(track.start_point(), track.end_point());
    }
}
