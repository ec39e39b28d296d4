//! Web application: GPX upload, progress polling, renaming, downloads.
//!
//! `POST /split-gpx` runs the core parse/split synchronously, registers the
//! operation in the injected [`OperationStore`], and hands the result list to
//! a background task that (optionally) reverse-geocodes each track's
//! endpoints while clients poll `GET /progress/{id}`. Finished tracks are
//! re-serialized on download so renames are reflected in the delivered file.

use std::sync::Arc;

use axum::extract::{DefaultBodyLimit, Multipart, Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::SecondsFormat;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::geocode::NominatimClient;
use crate::store::{
    OperationResults, OperationStatus, OperationStore, Progress, TrackRecord,
};
use crate::{
    parse_gpx, serialize_track, split_by_threshold, split_by_tracks, SplitConfig, SplitError,
};

/// Uploads larger than this are rejected outright.
const MAX_UPLOAD_BYTES: usize = 100 * 1024 * 1024;

const INDEX_HTML: &str = include_str!("../static/index.html");

/// Shared state injected into every handler.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<OperationStore>,
    pub geocoder: Arc<NominatimClient>,
}

/// Build the application router.
pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/split-gpx", post(split_gpx))
        .route("/progress/:operation_id", get(progress))
        .route("/download-gpx/:operation_id/:track_index", get(download_gpx))
        .route("/update-track-name", post(update_track_name))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .with_state(state)
}

async fn index() -> Html<&'static str> {
    Html(INDEX_HTML)
}

fn error_response(status: StatusCode, message: impl Into<String>) -> (StatusCode, Json<Value>) {
    (
        status,
        Json(json!({"success": false, "error": message.into()})),
    )
}

// ============================================================================
// Upload and split
// ============================================================================

#[derive(Debug, Default)]
struct SplitForm {
    gpx_content: Option<String>,
    file_name: Option<String>,
    split_method: Option<String>,
    max_distance_nm: Option<String>,
    max_time_hours: Option<String>,
    require_timestamps: Option<String>,
    lookup_place_names: Option<String>,
}

async fn split_gpx(State(state): State<AppState>, mut multipart: Multipart) -> Response {
    let mut form = SplitForm::default();

    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(e) => {
                return error_response(
                    StatusCode::BAD_REQUEST,
                    format!("invalid multipart body: {e}"),
                )
                .into_response()
            }
        };
        let name = field.name().unwrap_or_default().to_string();

        if name == "gpx_file" {
            form.file_name = field.file_name().map(str::to_string);
            let bytes = match field.bytes().await {
                Ok(bytes) => bytes,
                Err(e) => {
                    return error_response(
                        StatusCode::BAD_REQUEST,
                        format!("failed to read upload: {e}"),
                    )
                    .into_response()
                }
            };
            match String::from_utf8(bytes.to_vec()) {
                Ok(text) => form.gpx_content = Some(text),
                Err(_) => {
                    return error_response(
                        StatusCode::BAD_REQUEST,
                        "GPX file is not valid UTF-8",
                    )
                    .into_response()
                }
            }
        } else {
            let value = match field.text().await {
                Ok(value) => value,
                Err(e) => {
                    return error_response(
                        StatusCode::BAD_REQUEST,
                        format!("failed to read form field {name}: {e}"),
                    )
                    .into_response()
                }
            };
            match name.as_str() {
                "split_method" => form.split_method = Some(value),
                "max_distance_nm" => form.max_distance_nm = Some(value),
                "max_time_hours" => form.max_time_hours = Some(value),
                "require_timestamps" => form.require_timestamps = Some(value),
                "lookup_place_names" => form.lookup_place_names = Some(value),
                _ => {}
            }
        }
    }

    let Some(gpx_content) = form.gpx_content else {
        return error_response(StatusCode::BAD_REQUEST, "No file uploaded").into_response();
    };
    if form.file_name.as_deref().unwrap_or_default().is_empty() {
        return error_response(StatusCode::BAD_REQUEST, "No file selected").into_response();
    }

    let split_method = form.split_method.unwrap_or_else(|| "tracks".to_string());
    let max_distance_nm = match form.max_distance_nm.map(|s| s.parse::<f64>()).transpose() {
        Ok(value) => value.unwrap_or(1.0),
        Err(_) => {
            return error_response(StatusCode::BAD_REQUEST, "invalid max_distance_nm")
                .into_response()
        }
    };
    let max_time_hours = match form.max_time_hours.map(|s| s.parse::<f64>()).transpose() {
        Ok(value) => value.unwrap_or(1.0),
        Err(_) => {
            return error_response(StatusCode::BAD_REQUEST, "invalid max_time_hours")
                .into_response()
        }
    };
    let require_timestamps = is_true(form.require_timestamps.as_deref());
    let lookup_place_names = is_true(form.lookup_place_names.as_deref());

    info!(
        "processing GPX file {:?} with method {split_method} \
         (max_distance_nm={max_distance_nm}, max_time_hours={max_time_hours}, \
         require_timestamps={require_timestamps})",
        form.file_name
    );

    let split_result = if split_method == "time" {
        let config = SplitConfig {
            max_distance_nm,
            max_time_hours,
            require_timestamps,
        };
        parse_gpx(&gpx_content).and_then(|tracks| split_by_threshold(tracks, &config))
    } else {
        parse_gpx(&gpx_content).map(split_by_tracks)
    };

    let tracks = match split_result {
        Ok(tracks) => tracks,
        Err(e @ (SplitError::Format(_) | SplitError::Validation(_))) => {
            error!("rejecting GPX upload: {e}");
            return error_response(StatusCode::BAD_REQUEST, e.to_string()).into_response();
        }
        Err(e) => {
            error!("error processing GPX file: {e}");
            return error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
                .into_response();
        }
    };

    let operation_id = Uuid::new_v4();
    let total_tracks = tracks.len();
    let total_lookups = if lookup_place_names {
        // Start and end lookup per track
        total_tracks as u32 * 2
    } else {
        0
    };
    state.store.insert(
        operation_id,
        Progress::starting(total_lookups, total_tracks as u32, lookup_place_names),
    );

    tokio::spawn(annotate_tracks(
        state.store.clone(),
        state.geocoder.clone(),
        operation_id,
        tracks,
        split_method,
        lookup_place_names,
    ));

    Json(json!({
        "success": true,
        "operation_id": operation_id.to_string(),
        "total_tracks": total_tracks,
        "message": "Processing started. Poll /progress/<operation_id> for updates.",
    }))
    .into_response()
}

fn is_true(value: Option<&str>) -> bool {
    value.is_some_and(|v| v.eq_ignore_ascii_case("true"))
}

/// Background task: serialize each track, optionally decorate its endpoints
/// with place names, then publish the finished list (newest first).
async fn annotate_tracks(
    store: Arc<OperationStore>,
    geocoder: Arc<NominatimClient>,
    operation_id: Uuid,
    tracks: Vec<crate::Track>,
    split_method: String,
    lookup_place_names: bool,
) {
    let total_tracks = tracks.len();
    let mut records = Vec::with_capacity(total_tracks);

    for (idx, track) in tracks.into_iter().enumerate() {
        store.update(&operation_id, |op| {
            op.progress.current_track = idx as u32 + 1;
        });

        let gpx_content = match serialize_track(&track.points, &track.name) {
            Ok(content) => content,
            Err(e) => {
                error!("failed to serialize track {:?}: {e}", track.name);
                store.update(&operation_id, |op| {
                    op.progress.status = OperationStatus::Error;
                    op.error = Some(e.to_string());
                });
                return;
            }
        };

        let (start_place_name, end_place_name) = if lookup_place_names {
            info!(
                "looking up place names for track {}/{total_tracks}: {}",
                idx + 1,
                track.name
            );
            let start = track.start_point();
            let end = track.end_point();
            let start_place = geocoder
                .reverse_geocode(start.latitude, start.longitude)
                .await
                .unwrap_or_default();
            store.update(&operation_id, |op| op.progress.completed += 1);
            let end_place = geocoder
                .reverse_geocode(end.latitude, end.longitude)
                .await
                .unwrap_or_default();
            store.update(&operation_id, |op| op.progress.completed += 1);
            (start_place, end_place)
        } else {
            (String::new(), String::new())
        };

        records.push(TrackRecord {
            track,
            gpx_content,
            start_place_name,
            end_place_name,
        });
    }

    // Newest first
    records.sort_by(|a, b| b.track.start_time().cmp(&a.track.start_time()));

    let stored = store.update(&operation_id, |op| {
        op.results = Some(OperationResults {
            tracks: records,
            split_method,
        });
        op.progress.status = OperationStatus::Complete;
        op.progress.completed = op.progress.total;
        op.progress.current_track = op.progress.total_tracks;
    });
    if stored {
        info!("operation {operation_id} complete: {total_tracks} tracks");
    } else {
        warn!("operation {operation_id} expired before completion");
    }
}

// ============================================================================
// Progress polling
// ============================================================================

#[derive(Debug, Serialize)]
struct PointData {
    lat: f64,
    lon: f64,
    timestamp: String,
}

#[derive(Debug, Serialize)]
struct TrackData {
    name: String,
    start_time: String,
    end_time: String,
    duration_hours: f64,
    total_distance_nm: f64,
    point_count: usize,
    gpx_content: String,
    points: Vec<PointData>,
    start_lat: f64,
    start_lon: f64,
    end_lat: f64,
    end_lon: f64,
    start_coords: String,
    end_coords: String,
    start_place_name: String,
    end_place_name: String,
}

fn track_data(record: &TrackRecord) -> TrackData {
    let track = &record.track;
    let start = track.start_point();
    let end = track.end_point();
    TrackData {
        name: track.name.clone(),
        start_time: track.start_time().to_rfc3339_opts(SecondsFormat::Secs, true),
        end_time: track.end_time().to_rfc3339_opts(SecondsFormat::Secs, true),
        duration_hours: round2(track.duration().num_milliseconds() as f64 / 3_600_000.0),
        total_distance_nm: round2(track.total_distance_nm()),
        point_count: track.point_count(),
        gpx_content: record.gpx_content.clone(),
        points: track
            .points
            .iter()
            .map(|p| PointData {
                lat: p.latitude,
                lon: p.longitude,
                timestamp: p.time.to_rfc3339_opts(SecondsFormat::Secs, true),
            })
            .collect(),
        start_lat: start.latitude,
        start_lon: start.longitude,
        end_lat: end.latitude,
        end_lon: end.longitude,
        start_coords: format!("{:.4},{:.4}", start.latitude, start.longitude),
        end_coords: format!("{:.4},{:.4}", end.latitude, end.longitude),
        start_place_name: record.start_place_name.clone(),
        end_place_name: record.end_place_name.clone(),
    }
}

fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

fn operation_not_found() -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(json!({
            "success": false,
            "error": "Operation not found",
            "status": "not_found",
        })),
    )
        .into_response()
}

async fn progress(
    State(state): State<AppState>,
    Path(operation_id): Path<String>,
) -> Response {
    let Ok(id) = Uuid::parse_str(&operation_id) else {
        return operation_not_found();
    };
    let Some(op) = state.store.get(&id) else {
        return operation_not_found();
    };

    let p = &op.progress;
    let percentage = if p.total > 0 {
        round1(p.completed as f64 / p.total as f64 * 100.0)
    } else {
        0.0
    };
    let mut body = json!({
        "success": true,
        "total": p.total,
        "completed": p.completed,
        "remaining": p.total.saturating_sub(p.completed),
        "current_track": p.current_track,
        "total_tracks": p.total_tracks,
        "percentage": percentage,
        "status": p.status.as_str(),
    });

    match p.status {
        OperationStatus::Complete => {
            if let Some(results) = &op.results {
                let tracks: Vec<TrackData> = results.tracks.iter().map(track_data).collect();
                match serde_json::to_value(tracks) {
                    Ok(value) => body["tracks"] = value,
                    Err(e) => {
                        return error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
                            .into_response()
                    }
                }
                body["split_method"] = json!(results.split_method);
                body["operation_id"] = json!(operation_id);
            }
        }
        OperationStatus::Error => {
            if let Some(err) = &op.error {
                body["error"] = json!(err);
            }
        }
        OperationStatus::Processing => {}
    }

    Json(body).into_response()
}

// ============================================================================
// Downloads and renaming
// ============================================================================

#[derive(Debug, Deserialize)]
struct DownloadParams {
    track_name: Option<String>,
}

async fn download_gpx(
    State(state): State<AppState>,
    Path((operation_id, track_index)): Path<(String, usize)>,
    Query(params): Query<DownloadParams>,
) -> Response {
    let results = Uuid::parse_str(&operation_id)
        .ok()
        .and_then(|id| state.store.get(&id))
        .and_then(|op| op.results);
    let Some(results) = results else {
        return error_response(
            StatusCode::NOT_FOUND,
            "Track data not found. Please process the GPX file again.",
        )
        .into_response();
    };

    let Some(record) = results.tracks.get(track_index) else {
        return error_response(StatusCode::BAD_REQUEST, "Invalid track index").into_response();
    };

    // The client may have renamed the track since processing
    let track_name = params
        .track_name
        .filter(|name| !name.trim().is_empty())
        .unwrap_or_else(|| record.track.name.clone());

    let gpx = match serialize_track(&record.track.points, &track_name) {
        Ok(gpx) => gpx,
        Err(e) => {
            error!("error serving GPX download: {e}");
            return error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
                .into_response();
        }
    };
    let content = format!("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n{gpx}");

    let filename = sanitize_filename(&track_name);
    info!("downloading GPX file {filename}.gpx (track name {track_name:?})");
    (
        StatusCode::OK,
        [
            (
                header::CONTENT_TYPE,
                "application/gpx+xml; charset=utf-8".to_string(),
            ),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{filename}.gpx\""),
            ),
        ],
        content,
    )
        .into_response()
}

/// Make a track name safe to use as a download filename: characters invalid
/// on common filesystems become `_`, runs of commas/spaces collapse to one
/// `_`, leading/trailing `_`/`.` are trimmed, and the result is capped at
/// 240 characters to leave room for the extension.
fn sanitize_filename(name: &str) -> String {
    let replaced: String = name
        .chars()
        .map(|c| match c {
            '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*' => '_',
            other => other,
        })
        .collect();

    let mut collapsed = String::with_capacity(replaced.len());
    let mut in_separator_run = false;
    for c in replaced.chars() {
        if c == ',' || c == ' ' {
            if !in_separator_run {
                collapsed.push('_');
                in_separator_run = true;
            }
        } else {
            collapsed.push(c);
            in_separator_run = false;
        }
    }

    collapsed
        .trim_matches(|c| c == '_' || c == '.')
        .chars()
        .take(240)
        .collect()
}

#[derive(Debug, Deserialize)]
struct UpdateTrackNameRequest {
    operation_id: Option<String>,
    track_index: Option<i64>,
    new_name: Option<String>,
    start_place_name: Option<String>,
    end_place_name: Option<String>,
}

async fn update_track_name(
    State(state): State<AppState>,
    Json(req): Json<UpdateTrackNameRequest>,
) -> Response {
    let (Some(track_index), Some(new_name)) = (req.track_index, req.new_name) else {
        return error_response(StatusCode::BAD_REQUEST, "Missing track_index or new_name")
            .into_response();
    };
    if track_index < 0 {
        return error_response(StatusCode::BAD_REQUEST, "Invalid track_index").into_response();
    }
    if new_name.trim().is_empty() {
        return error_response(StatusCode::BAD_REQUEST, "Track name cannot be empty")
            .into_response();
    }
    let index = track_index as usize;

    if let Some(id) = req.operation_id.as_deref().and_then(|s| Uuid::parse_str(s).ok()) {
        state.store.update(&id, |op| {
            if let Some(record) = op
                .results
                .as_mut()
                .and_then(|results| results.tracks.get_mut(index))
            {
                record.track.name = new_name.clone();
                if let Ok(content) = serialize_track(&record.track.points, &new_name) {
                    record.gpx_content = content;
                }
                if let Some(place) = req.start_place_name.clone() {
                    record.start_place_name = place;
                }
                if let Some(place) = req.end_place_name.clone() {
                    record.end_place_name = place;
                }
            }
        });
    }

    info!("track {index} renamed to {new_name:?}");
    Json(json!({
        "success": true,
        "message": format!("Track renamed to \"{new_name}\""),
    }))
    .into_response()
}

// ============================================================================
// Unit Tests
// ============================================================================
