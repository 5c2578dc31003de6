//! HTTP clients for the external geodata services.
//!
//! Three independent concerns live here: the mirrored speed-limit query
//! service, the reverse geocoder, and the correction-note publisher. Each
//! failure is absorbed at a different layer: mirror exhaustion falls back
//! to the default limit, geocode failures leave the address blank, and
//! publish failures surface to the caller.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::config::{GeocodeConfig, PublishConfig, ResolverConfig};
use crate::error::{Error, Result};
use crate::resolver::select_candidate;

/// Source of posted speed limits near a coordinate.
///
/// Implementations run candidate selection themselves so a backend whose
/// answer has no usable value can be skipped in favor of the next one.
/// `Ok(None)` means the query succeeded but nothing usable was found.
#[async_trait]
pub trait SpeedLimitProvider: Send + Sync + std::fmt::Debug {
    /// Fetch the limit in force around a coordinate, in km/h.
    ///
    /// The current speed steers candidate selection between overlapping
    /// ways.
    ///
    /// # Errors
    ///
    /// Returns an error when no backend could be reached at all.
    async fn fetch_limit(&self, latitude: f64, longitude: f64, speed_kmh: f64)
        -> Result<Option<u32>>;
}

/// Speed-limit provider backed by an ordered list of query mirrors.
///
/// Mirrors are tried strictly in configured order with a short per-mirror
/// timeout. The first mirror whose answer selects to a usable limit wins;
/// a mirror that responds with nothing usable is skipped like a failed one.
#[derive(Debug, Clone)]
pub struct OverpassMirrors {
    client: reqwest::Client,
    mirrors: Vec<String>,
    timeout: Duration,
    radius_m: u32,
    high_speed_kmh: f64,
}

impl OverpassMirrors {
    /// Create a provider from resolver configuration.
    #[must_use]
    pub fn new(config: &ResolverConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            mirrors: config.mirrors.clone(),
            timeout: Duration::from_millis(config.mirror_timeout_ms),
            radius_m: config.search_radius_m,
            high_speed_kmh: config.high_speed_kmh,
        }
    }

    fn query_for(&self, latitude: f64, longitude: f64) -> String {
        format!(
            "[out:json];way[maxspeed](around:{},{latitude},{longitude});out tags;",
            self.radius_m
        )
    }

    async fn query_mirror(&self, mirror: &str, query: &str) -> Result<Vec<u32>> {
        let request = self.client.get(mirror).query(&[("data", query)]).send();

        let response = tokio::time::timeout(self.timeout, request)
            .await
            .map_err(|_| Error::internal(format!("mirror {mirror} timed out")))??
            .error_for_status()?;

        let body: OverpassResponse = response.json().await?;
        Ok(extract_limits(&body))
    }
}

#[async_trait]
impl SpeedLimitProvider for OverpassMirrors {
    async fn fetch_limit(
        &self,
        latitude: f64,
        longitude: f64,
        speed_kmh: f64,
    ) -> Result<Option<u32>> {
        let query = self.query_for(latitude, longitude);
        let mut answered = false;

        for mirror in &self.mirrors {
            match self.query_mirror(mirror, &query).await {
                Ok(candidates) => {
                    answered = true;
                    // A selected zero is as unusable as no candidate at all;
                    // zeros only matter while they can shadow real values
                    // during selection.
                    match select_candidate(&candidates, speed_kmh, self.high_speed_kmh) {
                        Some(value) if value > 0 => {
                            debug!(mirror, value, "limit query answered");
                            return Ok(Some(value));
                        }
                        _ => {
                            debug!(mirror, "no usable limit from mirror, trying next");
                        }
                    }
                }
                Err(err) => {
                    warn!(mirror, %err, "limit query mirror failed, trying next");
                }
            }
        }

        if answered {
            Ok(None)
        } else {
            Err(Error::MirrorsExhausted {
                count: self.mirrors.len(),
            })
        }
    }
}

/// Wire shape of a limit-query response.
#[derive(Debug, Deserialize)]
struct OverpassResponse {
    #[serde(default)]
    elements: Vec<OverpassElement>,
}

#[derive(Debug, Deserialize)]
struct OverpassElement {
    #[serde(default)]
    tags: HashMap<String, String>,
}

/// Pull the numeric limit values out of a response, in document order.
///
/// Zeros stay in the list; whether the selected value is usable is judged
/// after selection.
fn extract_limits(response: &OverpassResponse) -> Vec<u32> {
    response
        .elements
        .iter()
        .filter_map(|element| element.tags.get("maxspeed"))
        .filter_map(|raw| parse_maxspeed(raw))
        .collect()
}

/// Parse a raw maxspeed tag value into km/h.
///
/// Takes the leading integer, so unit-suffixed values like `"50 kmh"` still
/// yield a candidate. Non-numeric values are dropped; zero parses and is
/// weeded out after selection.
fn parse_maxspeed(raw: &str) -> Option<u32> {
    let digits: String = raw
        .trim_start()
        .chars()
        .take_while(char::is_ascii_digit)
        .collect();
    digits.parse::<u32>().ok()
}

/// Reverse geocoder that turns a coordinate into a short road label.
///
/// Lookups are best effort; any failure is logged and reported as no
/// address so the caller falls back to bare coordinates.
#[derive(Debug, Clone)]
pub struct ReverseGeocoder {
    client: reqwest::Client,
    endpoint: String,
}

impl ReverseGeocoder {
    /// Create a geocoder from configuration.
    #[must_use]
    pub fn new(config: &GeocodeConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
        }
    }

    /// Look up a human-readable label for a coordinate.
    pub async fn reverse(&self, latitude: f64, longitude: f64) -> Option<String> {
        match self.reverse_inner(latitude, longitude).await {
            Ok(label) => label,
            Err(err) => {
                debug!(%err, "reverse geocode failed");
                None
            }
        }
    }

    async fn reverse_inner(&self, latitude: f64, longitude: f64) -> Result<Option<String>> {
        let url = format!("{}/reverse", self.endpoint);
        let response = self
            .client
            .get(&url)
            .query(&[
                ("format", "json"),
                ("lat", latitude.to_string().as_str()),
                ("lon", longitude.to_string().as_str()),
                ("zoom", "18"),
                ("addressdetails", "1"),
            ])
            .send()
            .await?
            .error_for_status()?;

        let body: GeocodeResponse = response.json().await?;
        Ok(format_address(&body.address))
    }
}

/// Wire shape of a reverse-geocode response.
#[derive(Debug, Default, Deserialize)]
struct GeocodeResponse {
    #[serde(default)]
    address: GeocodeAddress,
}

#[derive(Debug, Default, Deserialize)]
struct GeocodeAddress {
    road: Option<String>,
    suburb: Option<String>,
    city: Option<String>,
    town: Option<String>,
    village: Option<String>,
}

/// Build the short label, keeping the road as the trailing token.
///
/// The override store matches records by the last whitespace token of the
/// address, so the road name must come last when it is known.
fn format_address(address: &GeocodeAddress) -> Option<String> {
    let locality = address
        .suburb
        .as_deref()
        .or(address.city.as_deref())
        .or(address.town.as_deref())
        .or(address.village.as_deref());

    match (locality, address.road.as_deref()) {
        (Some(locality), Some(road)) => Some(format!("{locality} {road}")),
        (None, Some(road)) => Some(road.to_string()),
        (Some(locality), None) => Some(locality.to_string()),
        (None, None) => None,
    }
}

/// Client that files a correction note with the upstream map service.
#[derive(Debug, Clone)]
pub struct NotePublisher {
    client: reqwest::Client,
    endpoint: String,
}

impl NotePublisher {
    /// Create a publisher from configuration.
    #[must_use]
    pub fn new(config: &PublishConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
        }
    }

    /// File a note at a coordinate and return its assigned id.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Publish`] when the service rejects the note and
    /// [`Error::Http`] when the request itself fails.
    pub async fn publish(&self, latitude: f64, longitude: f64, text: &str) -> Result<u64> {
        let url = format!("{}/api/0.6/notes.json", self.endpoint);
        let response = self
            .client
            .post(&url)
            .query(&[
                ("lat", latitude.to_string().as_str()),
                ("lon", longitude.to_string().as_str()),
                ("text", text),
            ])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::publish(format!(
                "note service returned status {status}"
            )));
        }

        let body: NoteResponse = response.json().await?;
        Ok(body.properties.id)
    }
}

/// Wire shape of a filed-note response.
#[derive(Debug, Deserialize)]
struct NoteResponse {
    properties: NoteProperties,
}

#[derive(Debug, Deserialize)]
struct NoteProperties {
    id: u64,
}
