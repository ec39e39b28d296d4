//! # GPX Parsing and Serialization
//!
//! Converts GPX 1.0/1.1 XML into [`Track`]s and renders point sequences back
//! into GPX track XML.
//!
//! The parser is deliberately tolerant: real-world GPX files disagree about
//! namespaces, omit timestamps, and carry the odd broken point. Namespace
//! handling probes an ordered list of conventions and uses the first one that
//! matches; broken points are skipped with a warning rather than failing the
//! whole file; missing or unparseable timestamps are synthesized so every
//! point downstream carries a time.

use chrono::{DateTime, Duration, NaiveDateTime, SecondsFormat, Utc};
use log::{debug, info, warn};
use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;
use roxmltree::{Document, Node};
use std::io::Cursor;

use crate::{SplitError, Track, TrackPoint};

/// The GPX 1.1 namespace, used for serialized output.
pub const GPX_NAMESPACE: &str = "http://www.topografix.com/GPX/1/1";

/// Namespace conventions probed when locating GPX elements, in order.
///
/// The first convention yielding at least one match wins; matches are never
/// merged across conventions.
const NAMESPACE_CANDIDATES: [Option<&str>; 3] = [
    Some("http://www.topografix.com/GPX/1/1"),
    None,
    Some("http://www.topografix.com/GPX/1/0"),
];

// ============================================================================
// Parsing
// ============================================================================

/// Parse GPX text into an ordered list of tracks.
///
/// Fails with [`SplitError::Format`] when the input is not well-formed XML or
/// when no track with at least one usable point survives. Within a track,
/// points that lack numeric `lat`/`lon` attributes are skipped with a
/// warning; points without a usable `time` child get a synthetic timestamp.
/// Each track's points are sorted ascending by timestamp before it is
/// returned.
///
/// # Example
/// ```
/// use gpx_splitter::parse_gpx;
///
/// let gpx = r#"<gpx xmlns="http://www.topografix.com/GPX/1/1" version="1.1" creator="demo">
///   <trk><trkseg>
///     <trkpt lat="60.0" lon="24.0"><time>2024-05-01T08:00:00Z</time></trkpt>
///   </trkseg></trk>
/// </gpx>"#;
///
/// let tracks = parse_gpx(gpx).unwrap();
/// assert_eq!(tracks[0].name, "Track_001");
/// ```
pub fn parse_gpx(gpx_text: &str) -> Result<Vec<Track>, SplitError> {
    parse_gpx_at(gpx_text, Utc::now())
}

/// Clock-pinned variant of [`parse_gpx`].
///
/// `now` seeds the synthetic timestamps handed to points whose `time` child
/// is absent or unparseable: point `j` within its track (counting in document
/// order, before sorting) receives `now + j` minutes.
pub fn parse_gpx_at(gpx_text: &str, now: DateTime<Utc>) -> Result<Vec<Track>, SplitError> {
    let doc = Document::parse(gpx_text).map_err(|e| SplitError::Format(e.to_string()))?;

    let trk_elements = find_all(doc.root_element(), "trk");
    let mut tracks = Vec::new();

    for (i, trk) in trk_elements.iter().enumerate() {
        let name = child_text(*trk, "name")
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| format!("Track_{:03}", i + 1));

        let trkpts = find_all(*trk, "trkpt");
        let mut points = Vec::with_capacity(trkpts.len());
        for (j, trkpt) in trkpts.iter().enumerate() {
            if let Some(point) = parse_point(*trkpt, j, now) {
                points.push(point);
            }
        }

        // Stable: points with equal timestamps keep document order
        points.sort_by_key(|p| p.time);

        if points.is_empty() {
            debug!("dropping track {:?}: no usable points", name);
            continue;
        }
        tracks.push(Track::new(name, points));
    }

    if tracks.is_empty() {
        return Err(SplitError::Format(
            "no valid tracks found in GPX file".to_string(),
        ));
    }

    info!("parsed {} tracks from GPX input", tracks.len());
    Ok(tracks)
}

/// Find all descendant elements of `scope` with the given local name,
/// probing [`NAMESPACE_CANDIDATES`] in order.
fn find_all<'a, 'input>(scope: Node<'a, 'input>, local_name: &str) -> Vec<Node<'a, 'input>> {
    for ns in NAMESPACE_CANDIDATES {
        let matches: Vec<Node> = scope
            .descendants()
            .filter(|n| {
                n.is_element()
                    && n.tag_name().name() == local_name
                    && n.tag_name().namespace() == ns
            })
            .collect();
        if !matches.is_empty() {
            debug!(
                "found {} <{}> elements ({})",
                matches.len(),
                local_name,
                ns.unwrap_or("no namespace")
            );
            return matches;
        }
    }
    Vec::new()
}

/// Text of the first direct child of `node` with the given local name,
/// trimmed, probing the same namespace conventions as [`find_all`].
fn child_text(node: Node, local_name: &str) -> Option<String> {
    for ns in NAMESPACE_CANDIDATES {
        let child = node.children().find(|n| {
            n.is_element() && n.tag_name().name() == local_name && n.tag_name().namespace() == ns
        });
        if let Some(child) = child {
            return Some(child.text().unwrap_or_default().trim().to_string());
        }
    }
    None
}

fn parse_point(trkpt: Node, index: usize, now: DateTime<Utc>) -> Option<TrackPoint> {
    let lat: f64 = match trkpt.attribute("lat").map(str::parse) {
        Some(Ok(v)) => v,
        _ => {
            warn!("skipping track point {index}: missing or invalid lat attribute");
            return None;
        }
    };
    let lon: f64 = match trkpt.attribute("lon").map(str::parse) {
        Some(Ok(v)) => v,
        _ => {
            warn!("skipping track point {index}: missing or invalid lon attribute");
            return None;
        }
    };

    let time = child_text(trkpt, "time")
        .filter(|s| !s.is_empty())
        .and_then(|s| parse_timestamp(&s))
        .unwrap_or_else(|| now + Duration::minutes(index as i64));

    Some(TrackPoint::new(lat, lon, time))
}

/// Parse a GPX timestamp, trying formats from strictest to loosest:
/// RFC 3339 (a trailing `Z` reads as `+00:00`), then `YYYY-MM-DDTHH:MM:SSZ`
/// read as UTC, then a zone-less `YYYY-MM-DDTHH:MM:SS` (optionally
/// fractional) read as UTC.
fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(t) = DateTime::parse_from_rfc3339(s) {
        return Some(t.with_timezone(&Utc));
    }
    if let Ok(t) = NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%SZ") {
        return Some(t.and_utc());
    }
    if let Ok(t) = NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f") {
        return Some(t.and_utc());
    }
    None
}

// ============================================================================
// Serialization
// ============================================================================

/// Render a point sequence as a single-track GPX 1.1 document.
///
/// The output carries one `trk` with the given name and one `trkseg`; each
/// point becomes a `trkpt` with `lat`/`lon` attributes and an RFC 3339 `time`
/// child. No XML declaration is written; callers that need one prepend it.
/// Parsing the output reproduces the same points and name.
pub fn serialize_track(points: &[TrackPoint], track_name: &str) -> Result<String, SplitError> {
    let mut writer = Writer::new_with_indent(Cursor::new(Vec::new()), b' ', 2);

    let mut gpx = BytesStart::new("gpx");
    gpx.push_attribute(("version", "1.1"));
    gpx.push_attribute(("creator", "gpx-splitter"));
    gpx.push_attribute(("xmlns", GPX_NAMESPACE));
    writer
        .write_event(Event::Start(gpx))
        .map_err(|e| SplitError::Xml(e.to_string()))?;

    writer
        .write_event(Event::Start(BytesStart::new("trk")))
        .map_err(|e| SplitError::Xml(e.to_string()))?;
    write_element(&mut writer, "name", track_name)?;

    writer
        .write_event(Event::Start(BytesStart::new("trkseg")))
        .map_err(|e| SplitError::Xml(e.to_string()))?;

    for point in points {
        let lat = point.latitude.to_string();
        let lon = point.longitude.to_string();
        let mut trkpt = BytesStart::new("trkpt");
        trkpt.push_attribute(("lat", lat.as_str()));
        trkpt.push_attribute(("lon", lon.as_str()));
        writer
            .write_event(Event::Start(trkpt))
            .map_err(|e| SplitError::Xml(e.to_string()))?;
        write_element(
            &mut writer,
            "time",
            &point.time.to_rfc3339_opts(SecondsFormat::Secs, true),
        )?;
        writer
            .write_event(Event::End(BytesEnd::new("trkpt")))
            .map_err(|e| SplitError::Xml(e.to_string()))?;
    }

    for tag in ["trkseg", "trk", "gpx"] {
        writer
            .write_event(Event::End(BytesEnd::new(tag)))
            .map_err(|e| SplitError::Xml(e.to_string()))?;
    }

    String::from_utf8(writer.into_inner().into_inner()).map_err(|e| SplitError::Xml(e.to_string()))
}

fn write_element<W: std::io::Write>(
    writer: &mut Writer<W>,
    name: &str,
    value: &str,
) -> Result<(), SplitError> {
    writer
        .write_event(Event::Start(BytesStart::new(name)))
        .map_err(|e| SplitError::Xml(e.to_string()))?;
    writer
        .write_event(Event::Text(BytesText::new(value)))
        .map_err(|e| SplitError::Xml(e.to_string()))?;
    writer
        .write_event(Event::End(BytesEnd::new(name)))
        .map_err(|e| SplitError::Xml(e.to_string()))?;
    Ok(())
}

// ============================================================================
// Unit Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn pinned_now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
    }

    fn utc(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    const GPX_11: &str = r#"<gpx xmlns="http://www.topografix.com/GPX/1/1" version="1.1" creator="test">
  <trk><name>Morning Sail</name><trkseg>
    <trkpt lat="60.1699" lon="24.9384"><time>2024-05-01T08:00:00Z</time></trkpt>
    <trkpt lat="60.1702" lon="24.9410"><time>2024-05-01T08:05:00Z</time></trkpt>
  </trkseg></trk>
</gpx>"#;

    #[test]
    fn parses_gpx_11_namespace() {
        let tracks = parse_gpx(GPX_11).unwrap();
        assert_eq!(tracks.len(), 1);
        assert_eq!(tracks[0].name, "Morning Sail");
        assert_eq!(tracks[0].point_count(), 2);
        assert_eq!(tracks[0].points[0].latitude, 60.1699);
        assert_eq!(tracks[0].start_time(), utc("2024-05-01T08:00:00Z"));
    }

    #[test]
    fn parses_without_namespace() {
        let gpx = r#"<gpx version="1.1" creator="test">
  <trk><name>Plain</name><trkseg>
    <trkpt lat="1.0" lon="2.0"><time>2024-05-01T08:00:00Z</time></trkpt>
  </trkseg></trk>
</gpx>"#;
        let tracks = parse_gpx(gpx).unwrap();
        assert_eq!(tracks.len(), 1);
        assert_eq!(tracks[0].name, "Plain");
    }

    #[test]
    fn parses_gpx_10_namespace() {
        let gpx = r#"<gpx xmlns="http://www.topografix.com/GPX/1/0" version="1.0" creator="test">
  <trk><name>Old Format</name><trkseg>
    <trkpt lat="1.0" lon="2.0"><time>2024-05-01T08:00:00Z</time></trkpt>
  </trkseg></trk>
</gpx>"#;
        let tracks = parse_gpx(gpx).unwrap();
        assert_eq!(tracks.len(), 1);
        assert_eq!(tracks[0].name, "Old Format");
    }

    #[test]
    fn namespace_conventions_are_not_merged() {
        // One track in the 1.1 namespace, one opting out of it: only the
        // first matching convention is used.
        let gpx = r#"<gpx xmlns="http://www.topografix.com/GPX/1/1" version="1.1" creator="test">
  <trk><name>Namespaced</name><trkseg>
    <trkpt lat="1.0" lon="2.0"><time>2024-05-01T08:00:00Z</time></trkpt>
  </trkseg></trk>
  <trk xmlns=""><name>Bare</name><trkseg>
    <trkpt lat="3.0" lon="4.0"><time>2024-05-01T09:00:00Z</time></trkpt>
  </trkseg></trk>
</gpx>"#;
        let tracks = parse_gpx(gpx).unwrap();
        assert_eq!(tracks.len(), 1);
        assert_eq!(tracks[0].name, "Namespaced");
    }

    #[test]
    fn missing_or_blank_name_gets_default() {
        let gpx = r#"<gpx version="1.1" creator="test">
  <trk><trkseg>
    <trkpt lat="1.0" lon="2.0"><time>2024-05-01T08:00:00Z</time></trkpt>
  </trkseg></trk>
  <trk><name>   </name><trkseg>
    <trkpt lat="3.0" lon="4.0"><time>2024-05-01T09:00:00Z</time></trkpt>
  </trkseg></trk>
</gpx>"#;
        let tracks = parse_gpx(gpx).unwrap();
        assert_eq!(tracks[0].name, "Track_001");
        assert_eq!(tracks[1].name, "Track_002");
    }

    #[test]
    fn points_are_scoped_to_their_track() {
        let gpx = r#"<gpx version="1.1" creator="test">
  <trk><name>A</name><trkseg>
    <trkpt lat="1.0" lon="1.0"><time>2024-05-01T08:00:00Z</time></trkpt>
  </trkseg></trk>
  <trk><name>B</name><trkseg>
    <trkpt lat="2.0" lon="2.0"><time>2024-05-01T09:00:00Z</time></trkpt>
    <trkpt lat="3.0" lon="3.0"><time>2024-05-01T10:00:00Z</time></trkpt>
  </trkseg></trk>
</gpx>"#;
        let tracks = parse_gpx(gpx).unwrap();
        assert_eq!(tracks[0].point_count(), 1);
        assert_eq!(tracks[1].point_count(), 2);
    }

    #[test]
    fn malformed_xml_is_a_format_error() {
        let err = parse_gpx("<gpx><trk>").unwrap_err();
        assert!(matches!(err, SplitError::Format(_)));
    }

    #[test]
    fn track_without_points_is_dropped_and_empty_file_fails() {
        let gpx = r#"<gpx version="1.1" creator="test"><trk><name>Empty</name><trkseg/></trk></gpx>"#;
        let err = parse_gpx(gpx).unwrap_err();
        assert!(matches!(err, SplitError::Format(_)));
    }

    #[test]
    fn point_missing_lat_is_skipped() {
        let gpx = r#"<gpx version="1.1" creator="test">
  <trk><name>Partial</name><trkseg>
    <trkpt lon="2.0"><time>2024-05-01T08:00:00Z</time></trkpt>
    <trkpt lat="1.0" lon="2.0"><time>2024-05-01T08:01:00Z</time></trkpt>
  </trkseg></trk>
</gpx>"#;
        let tracks = parse_gpx(gpx).unwrap();
        assert_eq!(tracks[0].point_count(), 1);
        assert_eq!(tracks[0].points[0].latitude, 1.0);
    }

    #[test]
    fn track_whose_only_point_is_broken_is_dropped() {
        let gpx = r#"<gpx version="1.1" creator="test">
  <trk><name>Broken</name><trkseg>
    <trkpt lon="2.0"><time>2024-05-01T08:00:00Z</time></trkpt>
  </trkseg></trk>
</gpx>"#;
        let err = parse_gpx(gpx).unwrap_err();
        assert!(matches!(err, SplitError::Format(_)));
    }

    #[test]
    fn timestamp_formats_resolve_in_order() {
        let gpx = r#"<gpx version="1.1" creator="test">
  <trk><name>Times</name><trkseg>
    <trkpt lat="1.0" lon="1.0"><time>2024-05-01T08:00:00+02:00</time></trkpt>
    <trkpt lat="2.0" lon="2.0"><time>2024-05-01T08:00:00Z</time></trkpt>
    <trkpt lat="3.0" lon="3.0"><time>2024-05-01T09:00:00</time></trkpt>
    <trkpt lat="4.0" lon="4.0"><time>2024-05-01T09:30:00.500</time></trkpt>
  </trkseg></trk>
</gpx>"#;
        let tracks = parse_gpx_at(gpx, pinned_now()).unwrap();
        let times: Vec<DateTime<Utc>> = tracks[0].points.iter().map(|p| p.time).collect();
        // +02:00 normalizes to 06:00 UTC and sorts first
        assert_eq!(times[0], utc("2024-05-01T06:00:00Z"));
        assert_eq!(times[1], utc("2024-05-01T08:00:00Z"));
        assert_eq!(times[2], utc("2024-05-01T09:00:00Z"));
        assert_eq!(times[3].timestamp_millis(), utc("2024-05-01T09:30:00Z").timestamp_millis() + 500);
    }

    #[test]
    fn missing_or_garbage_time_synthesizes_by_element_index() {
        let gpx = r#"<gpx version="1.1" creator="test">
  <trk><name>NoTimes</name><trkseg>
    <trkpt lat="1.0" lon="1.0"/>
    <trkpt lat="2.0" lon="2.0"><time>not a timestamp</time></trkpt>
  </trkseg></trk>
</gpx>"#;
        let now = pinned_now();
        let tracks = parse_gpx_at(gpx, now).unwrap();
        assert_eq!(tracks[0].points[0].time, now);
        assert_eq!(tracks[0].points[1].time, now + Duration::minutes(1));
    }

    #[test]
    fn synthetic_index_counts_skipped_points() {
        // The broken first point still advances the element index, so the
        // second point gets now + 1 minute.
        let gpx = r#"<gpx version="1.1" creator="test">
  <trk><name>Skips</name><trkseg>
    <trkpt lon="1.0"/>
    <trkpt lat="2.0" lon="2.0"/>
  </trkseg></trk>
</gpx>"#;
        let now = pinned_now();
        let tracks = parse_gpx_at(gpx, now).unwrap();
        assert_eq!(tracks[0].point_count(), 1);
        assert_eq!(tracks[0].points[0].time, now + Duration::minutes(1));
    }

    #[test]
    fn equal_timestamps_keep_document_order() {
        let gpx = r#"<gpx version="1.1" creator="test">
  <trk><name>Ties</name><trkseg>
    <trkpt lat="1.0" lon="1.0"><time>2024-05-01T08:00:00Z</time></trkpt>
    <trkpt lat="2.0" lon="2.0"><time>2024-05-01T08:00:00Z</time></trkpt>
    <trkpt lat="3.0" lon="3.0"><time>2024-05-01T08:00:00Z</time></trkpt>
  </trkseg></trk>
</gpx>"#;
        let tracks = parse_gpx(gpx).unwrap();
        let lats: Vec<f64> = tracks[0].points.iter().map(|p| p.latitude).collect();
        assert_eq!(lats, vec![1.0, 2.0, 3.0]);
    }

    #[test]
    fn serialized_output_round_trips() {
        let points = vec![
            TrackPoint::new(60.1699, 24.9384, utc("2024-05-01T08:00:00Z")),
            TrackPoint::new(60.1702, 24.9410, utc("2024-05-01T08:05:00Z")),
        ];
        let xml = serialize_track(&points, "Round Trip").unwrap();
        assert!(!xml.starts_with("<?xml"));

        let tracks = parse_gpx(&xml).unwrap();
        assert_eq!(tracks.len(), 1);
        assert_eq!(tracks[0].name, "Round Trip");
        assert_eq!(tracks[0].points, points);
    }

    #[test]
    fn serializer_escapes_track_names() {
        let points = vec![TrackPoint::new(1.0, 2.0, utc("2024-05-01T08:00:00Z"))];
        let xml = serialize_track(&points, "A <B> & C").unwrap();
        let tracks = parse_gpx(&xml).unwrap();
        assert_eq!(tracks[0].name, "A <B> & C");
    }
}
