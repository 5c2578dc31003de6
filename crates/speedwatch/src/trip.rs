//! Trip accumulation, the bounded trip log, and GPX export.
//!
//! A trip runs for the lifetime of a monitoring session. Distance is
//! integrated step by step with plausibility filters on both ends: steps
//! too small to be real movement are GPS jitter, steps too large are fix
//! jumps, and neither contributes. Max speed has no filter. Trips too short
//! to mean anything are discarded at the end rather than logged.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::Result;
use crate::geo::{haversine_km, GeoSample};
use crate::storage::{keys, KvStore};

/// Steps below this speed do not count toward distance, in km/h.
const MIN_MOVE_SPEED_KMH: f64 = 2.0;

/// Steps shorter than this are jitter, in kilometers (~0.5 m).
const MIN_STEP_KM: f64 = 0.0005;

/// Steps longer than this are fix jumps, in kilometers.
const MAX_STEP_KM: f64 = 0.2;

/// Minimum spacing between retained path points, in kilometers.
const PATH_STEP_KM: f64 = 0.01;

/// Trips shorter than this duration AND distance are discarded.
const MIN_TRIP_SECS: i64 = 10;
const MIN_TRIP_KM: f64 = 0.1;

/// A retained point of a trip path.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PathPoint {
    /// Latitude in decimal degrees.
    pub latitude: f64,
    /// Longitude in decimal degrees.
    pub longitude: f64,
}

/// A completed, logged trip.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TripRecord {
    /// When the trip started.
    pub started_at: DateTime<Utc>,
    /// When the trip ended.
    pub ended_at: DateTime<Utc>,
    /// Accumulated plausible distance in kilometers.
    pub distance_km: f64,
    /// Highest observed speed in km/h.
    pub max_speed_kmh: f64,
    /// Simplified path, oldest point first.
    pub path: Vec<PathPoint>,
}

impl TripRecord {
    /// Trip duration in whole seconds.
    #[must_use]
    pub fn duration_secs(&self) -> i64 {
        (self.ended_at - self.started_at).num_seconds()
    }

    /// Average speed over the trip in km/h, or 0 for a zero-length trip.
    #[must_use]
    pub fn average_speed_kmh(&self) -> f64 {
        let secs = self.duration_secs();
        if secs <= 0 {
            return 0.0;
        }
        #[allow(clippy::cast_precision_loss)]
        let hours = secs as f64 / 3600.0;
        self.distance_km / hours
    }

    /// Render this trip as a GPX 1.1 track document.
    #[must_use]
    pub fn to_gpx(&self) -> String {
        let mut out = String::new();
        out.push_str("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
        out.push_str(
            "<gpx version=\"1.1\" creator=\"speedwatch\" xmlns=\"http://www.topografix.com/GPX/1/1\">\n",
        );
        out.push_str(&format!(
            "  <metadata><time>{}</time></metadata>\n",
            self.started_at.to_rfc3339()
        ));
        out.push_str("  <trk>\n    <name>");
        out.push_str(&self.started_at.format("Trip %Y-%m-%d %H:%M").to_string());
        out.push_str("</name>\n    <trkseg>\n");
        for point in &self.path {
            out.push_str(&format!(
                "      <trkpt lat=\"{}\" lon=\"{}\"/>\n",
                point.latitude, point.longitude
            ));
        }
        out.push_str("    </trkseg>\n  </trk>\n</gpx>\n");
        out
    }
}

/// Per-session trip state.
///
/// Created when monitoring starts, fed every accepted fix, and finished
/// when monitoring stops.
#[derive(Debug)]
pub struct TripAccumulator {
    started_at: DateTime<Utc>,
    last_fix: Option<(f64, f64)>,
    distance_km: f64,
    max_speed_kmh: f64,
    path: Vec<PathPoint>,
}

impl TripAccumulator {
    /// Start a trip at the given instant.
    #[must_use]
    pub fn start(started_at: DateTime<Utc>) -> Self {
        Self {
            started_at,
            last_fix: None,
            distance_km: 0.0,
            max_speed_kmh: 0.0,
            path: Vec::new(),
        }
    }

    /// Feed one fix into the trip.
    pub fn update(&mut self, sample: &GeoSample) {
        let speed = sample.speed_kmh();

        // Max speed is unconditional; the distance filters don't apply.
        if speed > self.max_speed_kmh {
            self.max_speed_kmh = speed;
        }

        if let Some((last_lat, last_lon)) = self.last_fix {
            let step = haversine_km(last_lat, last_lon, sample.latitude, sample.longitude);
            if speed > MIN_MOVE_SPEED_KMH && step > MIN_STEP_KM && step < MAX_STEP_KM {
                self.distance_km += step;
            }
        }
        self.last_fix = Some((sample.latitude, sample.longitude));

        let far_enough = match self.path.last() {
            Some(last) => {
                haversine_km(last.latitude, last.longitude, sample.latitude, sample.longitude)
                    > PATH_STEP_KM
            }
            None => true,
        };
        if far_enough {
            self.path.push(PathPoint {
                latitude: sample.latitude,
                longitude: sample.longitude,
            });
        }
    }

    /// Accumulated distance so far, in kilometers.
    #[must_use]
    pub fn distance_km(&self) -> f64 {
        self.distance_km
    }

    /// Highest observed speed so far, in km/h.
    #[must_use]
    pub fn max_speed_kmh(&self) -> f64 {
        self.max_speed_kmh
    }

    /// Finish the trip, returning a record unless it was too short to keep.
    ///
    /// A trip is discarded only when it is short in both duration and
    /// distance; a long idle trip or a quick-but-real hop is kept.
    #[must_use]
    pub fn finish(self, ended_at: DateTime<Utc>) -> Option<TripRecord> {
        let duration = (ended_at - self.started_at).num_seconds();
        if duration < MIN_TRIP_SECS && self.distance_km < MIN_TRIP_KM {
            debug!(duration, distance = self.distance_km, "discarding trivial trip");
            return None;
        }
        Some(TripRecord {
            started_at: self.started_at,
            ended_at,
            distance_km: self.distance_km,
            max_speed_kmh: self.max_speed_kmh,
            path: self.path,
        })
    }
}

/// Capacity-bounded log of completed trips, newest first.
#[derive(Debug, Clone)]
pub struct TripLog {
    records: Vec<TripRecord>,
    capacity: usize,
}

impl TripLog {
    /// Create an empty log with the given capacity.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            records: Vec::new(),
            capacity,
        }
    }

    /// Load the log from persistence; absent or malformed reads as empty.
    #[must_use]
    pub fn load(kv: &dyn KvStore, capacity: usize) -> Self {
        let mut records = match kv.load(keys::TRIP_RECORDS) {
            Ok(Some(raw)) => serde_json::from_str::<Vec<TripRecord>>(&raw).unwrap_or_else(|err| {
                tracing::warn!("trip collection malformed, starting empty: {err}");
                Vec::new()
            }),
            Ok(None) => Vec::new(),
            Err(err) => {
                tracing::warn!("failed to read trip collection, starting empty: {err}");
                Vec::new()
            }
        };
        records.truncate(capacity);
        Self { records, capacity }
    }

    /// Write the log back to persistence.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or the storage write fails.
    pub fn persist(&self, kv: &dyn KvStore) -> Result<()> {
        let raw = serde_json::to_string(&self.records)?;
        kv.save(keys::TRIP_RECORDS, &raw)
    }

    /// Prepend a completed trip, evicting the oldest past capacity.
    pub fn push(&mut self, record: TripRecord) {
        info!(
            distance = record.distance_km,
            max_speed = record.max_speed_kmh,
            "logging trip"
        );
        self.records.insert(0, record);
        self.records.truncate(self.capacity);
    }

    /// Remove a trip by index, newest first.
    pub fn remove(&mut self, index: usize) -> Option<TripRecord> {
        if index < self.records.len() {
            Some(self.records.remove(index))
        } else {
            None
        }
    }

    /// Remove all trips.
    pub fn clear(&mut self) {
        self.records.clear();
    }

    /// The trips, newest first.
    #[must_use]
    pub fn records(&self) -> &[TripRecord] {
        &self.records
    }

    /// Number of logged trips.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the log is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
