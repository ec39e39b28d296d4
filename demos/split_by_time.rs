//! Split a GPX file from disk by the time/distance threshold rule and print
//! per-track statistics.
//!
//! Usage: cargo run --example split_by_time -- path/to/file.gpx

use gpx_splitter::{parse_gpx, split_by_threshold, SplitConfig};

fn main() {
    let path = std::env::args()
        .nth(1)
        .expect("usage: split_by_time <file.gpx>");
    let text = std::fs::read_to_string(&path).expect("failed to read GPX file");

    let tracks = parse_gpx(&text)
        .and_then(|tracks| split_by_threshold(tracks, &SplitConfig::default()))
        .expect("failed to split GPX file");

    println!("{} tracks:", tracks.len());
    for track in &tracks {
        println!(
            "  {}: {} points, {:.2} nm, {:.2} h",
            track.name,
            track.point_count(),
            track.total_distance_nm(),
            track.duration().num_milliseconds() as f64 / 3_600_000.0,
        );
    }
}
