//! # Track Segmentation
//!
//! Two strategies for turning parsed tracks into output tracks:
//!
//! 1. **By existing tracks** ([`split_by_tracks`]): each track in the file
//!    becomes one output, name preserved.
//! 2. **By time/distance threshold** ([`split_by_threshold`]): all points are
//!    pooled, sorted by time, and walked once; a new track starts wherever a
//!    long pause happens without a matching jump in position.
//!
//! Split tracks are named from their endpoints when those are far enough
//! apart to be meaningful, and from the current local time otherwise.

use chrono::{DateTime, Local};
use log::info;

use crate::geo_utils::point_distance_nm;
use crate::{SplitError, Track, TrackPoint};

/// Endpoints closer than this (nautical miles) produce a timestamp-based
/// name instead of a coordinate-based one.
const ENDPOINT_NAME_THRESHOLD_NM: f64 = 0.1;

/// Parameters for threshold-based splitting.
#[derive(Debug, Clone)]
pub struct SplitConfig {
    /// Maximum distance, in nautical miles, a point may move during a time
    /// gap for that gap to count as a break.
    pub max_distance_nm: f64,
    /// Minimum time gap, in hours, between consecutive points to start a new
    /// track.
    pub max_time_hours: f64,
    /// Accepted for interface compatibility but inert: every parsed point
    /// carries a timestamp (synthetic when the source had none), so there is
    /// never timestamp-less input to reject.
    pub require_timestamps: bool,
}

impl Default for SplitConfig {
    fn default() -> Self {
        Self {
            max_distance_nm: 1.0,
            max_time_hours: 1.0,
            require_timestamps: false,
        }
    }
}

/// Split by the file's own track tags: every parsed track passes through
/// unchanged, keeping its name and points.
pub fn split_by_tracks(tracks: Vec<Track>) -> Vec<Track> {
    tracks
}

/// Split the pooled points of all tracks wherever a time gap of at least
/// `max_time_hours` coincides with a position change of at most
/// `max_distance_nm`.
///
/// Names for the resulting tracks that need a timestamp (near-coincident
/// endpoints) use the current local time; see [`split_by_threshold_at`] to
/// pin the clock.
pub fn split_by_threshold(
    tracks: Vec<Track>,
    config: &SplitConfig,
) -> Result<Vec<Track>, SplitError> {
    split_by_threshold_at(tracks, config, Local::now())
}

/// Clock-pinned variant of [`split_by_threshold`].
///
/// All points are flattened into one pool and stable-sorted by timestamp.
/// The pool is walked once; for each point the time gap and great-circle
/// distance to the *previous walked point* are computed, and a new track
/// starts if and only if `time_gap >= max_time_hours` **and**
/// `distance <= max_distance_nm`. Both conditions must hold: a long gap
/// combined with a large position jump does not split.
pub fn split_by_threshold_at(
    tracks: Vec<Track>,
    config: &SplitConfig,
    now: DateTime<Local>,
) -> Result<Vec<Track>, SplitError> {
    let mut all_points: Vec<TrackPoint> = tracks.into_iter().flat_map(|t| t.points).collect();
    all_points.sort_by_key(|p| p.time);

    if all_points.is_empty() {
        return Err(SplitError::Validation(
            "no valid track points found in GPX file".to_string(),
        ));
    }

    let mut segments: Vec<Vec<TrackPoint>> = Vec::new();
    let mut current = vec![all_points[0]];
    let mut last = all_points[0];

    for &point in &all_points[1..] {
        let time_diff_hours = (point.time - last.time).num_milliseconds() as f64 / 3_600_000.0;
        let distance = point_distance_nm(&last, &point);

        if time_diff_hours >= config.max_time_hours && distance <= config.max_distance_nm {
            segments.push(std::mem::replace(&mut current, vec![point]));
        } else {
            current.push(point);
        }
        last = point;
    }
    segments.push(current);

    let tracks: Vec<Track> = segments
        .into_iter()
        .map(|points| {
            let name = generate_track_name(&points[0], &points[points.len() - 1], now);
            Track::new(name, points)
        })
        .collect();

    info!("split point pool into {} tracks", tracks.len());
    Ok(tracks)
}

/// Generate a display name for a track from its endpoints.
///
/// Endpoints at least 0.1 nm apart yield
/// `"{start_lat},{start_lon} to {end_lat},{end_lon}"` with four decimal
/// places; closer endpoints (loops, stationary recordings) yield
/// `Track_{YYYYMMDD_HHMM}` from `now`.
pub fn generate_track_name(start: &TrackPoint, end: &TrackPoint, now: DateTime<Local>) -> String {
    if point_distance_nm(start, end) < ENDPOINT_NAME_THRESHOLD_NM {
        return format!("Track_{}", now.format("%Y%m%d_%H%M"));
    }
    format!(
        "{:.4},{:.4} to {:.4},{:.4}",
        start.latitude, start.longitude, end.latitude, end.longitude
    )
}

// ============================================================================
// Unit Tests
// ============================================================================
