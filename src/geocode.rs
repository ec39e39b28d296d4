//! Reverse-geocoding client for Nominatim (OpenStreetMap) with rate limiting.
//!
//! Used to decorate split results with human-readable place names for track
//! start/end coordinates. The core never depends on this module: lookups are
//! decoration, and every failure degrades to "no place name" rather than an
//! error.
//!
//! Nominatim's usage policy allows at most one request per second, so request
//! starts are spaced out by a dispatch rate limiter rather than fired
//! back-to-back.

use log::{debug, warn};
use reqwest::Client;
use serde::Deserialize;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

const NOMINATIM_URL: &str = "https://nominatim.openstreetmap.org/reverse";

// Nominatim requires a User-Agent identifying the application
const USER_AGENT: &str = "gpx-splitter/0.1";

// Policy is 1 req/s; 1100ms leaves a safety margin
const DISPATCH_INTERVAL_MS: u64 = 1100;

const REQUEST_TIMEOUT_SECS: u64 = 5;

/// Response body of the `/reverse` endpoint, reduced to the fields used for
/// naming.
#[derive(Debug, Default, Deserialize)]
struct ReverseResponse {
    #[serde(default)]
    address: Option<Address>,
    #[serde(default)]
    display_name: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct Address {
    #[serde(default)]
    city: Option<String>,
    #[serde(default)]
    town: Option<String>,
    #[serde(default)]
    village: Option<String>,
    #[serde(default)]
    municipality: Option<String>,
    #[serde(default)]
    county: Option<String>,
    #[serde(default)]
    state: Option<String>,
    #[serde(default)]
    country: Option<String>,
}

/// Rate-limited Nominatim client.
///
/// Safe to share behind an `Arc`; concurrent callers are serialized onto
/// dispatch slots spaced [`DISPATCH_INTERVAL_MS`] apart.
pub struct NominatimClient {
    client: Client,
    next_dispatch: Mutex<Instant>,
}

impl NominatimClient {
    /// Create a new client.
    pub fn new() -> Result<Self, String> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .map_err(|e| format!("Failed to create HTTP client: {}", e))?;

        Ok(Self {
            client,
            next_dispatch: Mutex::new(Instant::now()),
        })
    }

    /// Look up a human-readable place name for a coordinate.
    ///
    /// Returns `None` when the lookup fails or yields nothing useful;
    /// failures are logged as warnings, never propagated.
    pub async fn reverse_geocode(&self, lat: f64, lon: f64) -> Option<String> {
        self.wait_for_dispatch_slot().await;

        let response = self
            .client
            .get(NOMINATIM_URL)
            .query(&[
                ("lat", lat.to_string()),
                ("lon", lon.to_string()),
                ("format", "json".to_string()),
                ("addressdetails", "1".to_string()),
            ])
            .send()
            .await;

        let body: ReverseResponse = match response {
            Ok(resp) => match resp.error_for_status() {
                Ok(resp) => match resp.json().await {
                    Ok(body) => body,
                    Err(e) => {
                        warn!("reverse geocoding failed for {lat},{lon}: {e}");
                        return None;
                    }
                },
                Err(e) => {
                    warn!("reverse geocoding failed for {lat},{lon}: {e}");
                    return None;
                }
            },
            Err(e) => {
                warn!("reverse geocoding failed for {lat},{lon}: {e}");
                return None;
            }
        };

        let place = extract_place_name(&body);
        debug!("reverse geocoded {lat},{lon} -> {place:?}");
        place
    }

    /// Wait for our dispatch slot. Each caller reserves a unique slot spaced
    /// [`DISPATCH_INTERVAL_MS`] after the previous one.
    async fn wait_for_dispatch_slot(&self) {
        let wait = {
            let mut next = self.next_dispatch.lock().await;
            let now = Instant::now();
            let dispatch_at = if *next > now { *next } else { now };
            *next = dispatch_at + Duration::from_millis(DISPATCH_INTERVAL_MS);
            dispatch_at.saturating_duration_since(now)
        };

        // Wait outside the lock
        if !wait.is_zero() {
            tokio::time::sleep(wait).await;
        }
    }
}

/// Pick the most useful place name out of a reverse-geocoding response.
///
/// Preference order: city, town, village, municipality, county, state,
/// country. City/town/village results get the state (or country) appended
/// for context. Falls back to the first component of `display_name`.
fn extract_place_name(response: &ReverseResponse) -> Option<String> {
    if let Some(addr) = &response.address {
        let preferred = [
            &addr.city,
            &addr.town,
            &addr.village,
            &addr.municipality,
            &addr.county,
            &addr.state,
            &addr.country,
        ];
        let place = preferred
            .iter()
            .find_map(|field| field.as_deref().filter(|s| !s.is_empty()));

        if let Some(place) = place {
            let is_locality = [&addr.city, &addr.town, &addr.village]
                .iter()
                .any(|field| field.as_deref().is_some_and(|s| !s.is_empty()));
            if is_locality {
                let region = addr
                    .state
                    .as_deref()
                    .filter(|s| !s.is_empty())
                    .or_else(|| addr.country.as_deref().filter(|s| !s.is_empty()));
                if let Some(region) = region {
                    return Some(format!("{place}, {region}"));
                }
            }
            return Some(place.to_string());
        }
    }

    response
        .display_name
        .as_deref()
        .and_then(|d| d.split(',').next())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(json: &str) -> ReverseResponse {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn city_is_preferred_and_gets_state_appended() {
        let body = parse(
            r#"{"address": {"city": "Portland", "county": "Multnomah", "state": "Oregon", "country": "United States"}}"#,
        );
        assert_eq!(extract_place_name(&body), Some("Portland, Oregon".to_string()));
    }

    #[test]
    fn village_falls_back_to_country_for_context() {
        let body = parse(r#"{"address": {"village": "Grindavik", "country": "Iceland"}}"#);
        assert_eq!(extract_place_name(&body), Some("Grindavik, Iceland".to_string()));
    }

    #[test]
    fn non_locality_levels_are_used_bare() {
        let body = parse(r#"{"address": {"county": "Clare", "state": "Munster", "country": "Ireland"}}"#);
        assert_eq!(extract_place_name(&body), Some("Clare".to_string()));
    }

    #[test]
    fn display_name_is_the_last_resort() {
        let body = parse(r#"{"display_name": "Baltic Sea, Finland"}"#);
        assert_eq!(extract_place_name(&body), Some("Baltic Sea".to_string()));
    }

    #[test]
    fn empty_response_yields_none() {
        assert_eq!(extract_place_name(&parse("{}")), None);
    }

    #[tokio::test]
    async fn dispatch_slots_are_spaced_out() {
        let client = NominatimClient::new().unwrap();

        // First caller gets an immediate slot
        let start = Instant::now();
        client.wait_for_dispatch_slot().await;
        assert!(start.elapsed() < Duration::from_millis(100));

        // Second caller waits out the dispatch interval
        let start2 = Instant::now();
        client.wait_for_dispatch_slot().await;
        let elapsed = start2.elapsed();
        assert!(
            elapsed >= Duration::from_millis(DISPATCH_INTERVAL_MS - 100),
            "expected ~{DISPATCH_INTERVAL_MS}ms wait, got {elapsed:?}"
        );
    }
}
