//! Proximity-indexed store of user-supplied speed-limit corrections.
//!
//! Remembers limits for spots the remote data source gets wrong or lacks
//! entirely. Writes are merged by a loose proximity rule so repeated noisy
//! observations of the same stretch of road collapse into one record, while
//! reads use a much tighter exact-box match so a remembered limit is never
//! substituted for a road it doesn't belong to. The asymmetry is deliberate.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::Result;
use crate::geo::haversine_km;
use crate::storage::{keys, KvStore};

/// Records closer than this merge unconditionally, in kilometers.
const MERGE_RADIUS_KM: f64 = 0.2;

/// Records on the same road merge out to this distance, in kilometers.
const ROAD_MERGE_RADIUS_KM: f64 = 1.0;

/// Half-width of the exact-box used by `lookup`, in degrees (~55 m).
const LOOKUP_BOX_DEG: f64 = 0.0005;

/// A remembered speed-limit correction for an approximate location.
///
/// `limit == None` means the location is marked as needing review: the
/// remote source had nothing here, but no correction has been filled in yet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LimitOverride {
    /// Latitude of the most recent observation.
    pub latitude: f64,

    /// Longitude of the most recent observation.
    pub longitude: f64,

    /// Corrected limit in km/h, or `None` for "marked, limit unknown".
    pub limit: Option<u32>,

    /// Reverse-geocoded address at the last observation.
    pub address: String,

    /// When this record was last touched.
    pub updated_at: DateTime<Utc>,
}

impl LimitOverride {
    /// Whether this record is still waiting for a limit to be filled in.
    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.limit.is_none()
    }
}

/// Capacity-bounded, proximity-deduplicated override store.
///
/// Records are kept most-recently-touched first; the store never holds more
/// than its capacity, evicting the least-recently-touched records silently.
#[derive(Debug, Clone)]
pub struct OverrideStore {
    records: Vec<LimitOverride>,
    capacity: usize,
}

impl OverrideStore {
    /// Create an empty store with the given capacity.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            records: Vec::new(),
            capacity,
        }
    }

    /// Load the store from persistence.
    ///
    /// An absent or malformed collection reads as empty; the next
    /// successful write repairs it.
    #[must_use]
    pub fn load(kv: &dyn KvStore, capacity: usize) -> Self {
        let mut records = match kv.load(keys::LIMIT_OVERRIDES) {
            Ok(Some(raw)) => match serde_json::from_str::<Vec<LimitOverride>>(&raw) {
                Ok(records) => records,
                Err(err) => {
                    warn!("override collection malformed, starting empty: {err}");
                    Vec::new()
                }
            },
            Ok(None) => Vec::new(),
            Err(err) => {
                warn!("failed to read override collection, starting empty: {err}");
                Vec::new()
            }
        };
        records.truncate(capacity);
        Self { records, capacity }
    }

    /// Write the store back to persistence.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or the storage write fails.
    pub fn persist(&self, kv: &dyn KvStore) -> Result<()> {
        let raw = serde_json::to_string(&self.records)?;
        kv.save(keys::LIMIT_OVERRIDES, &raw)
    }

    /// Record an observation, merging with an existing record when the
    /// proximity rule says they are the same location.
    ///
    /// Scans in store order and merges with the first record that either
    /// lies within 0.2 km, or shares the current road name (last
    /// whitespace-delimited token of `address`) and lies within 1.0 km.
    /// First match wins; there is no closest-match search. The merged (or
    /// new) record moves to the front, and the store is truncated to its
    /// capacity.
    pub fn upsert(&mut self, latitude: f64, longitude: f64, limit: Option<u32>, address: &str) {
        let road = road_name(address);

        let found = self.records.iter().position(|r| {
            let dist = haversine_km(r.latitude, r.longitude, latitude, longitude);
            if dist < MERGE_RADIUS_KM {
                return true;
            }
            match road {
                Some(road) => r.address.contains(road) && dist < ROAD_MERGE_RADIUS_KM,
                None => false,
            }
        });

        let record = match found {
            Some(idx) => {
                let mut record = self.records.remove(idx);
                record.limit = limit;
                record.latitude = latitude;
                record.longitude = longitude;
                record.address = address.to_string();
                record.updated_at = Utc::now();
                debug!(index = idx, "merged override observation");
                record
            }
            None => LimitOverride {
                latitude,
                longitude,
                limit,
                address: address.to_string(),
                updated_at: Utc::now(),
            },
        };

        self.records.insert(0, record);
        // Least-recently-touched records fall off the end.
        self.records.truncate(self.capacity);
    }

    /// Look up a remembered limit at the given coordinates.
    ///
    /// Uses the tight exact-box match (±0.0005° on each axis), not the merge
    /// rule. Returns `None` when no record covers the location, `Some(None)`
    /// for a "marked, limit unknown" record, and `Some(Some(v))` for a
    /// remembered limit.
    #[must_use]
    pub fn lookup(&self, latitude: f64, longitude: f64) -> Option<Option<u32>> {
        self.records
            .iter()
            .find(|r| {
                (r.latitude - latitude).abs() < LOOKUP_BOX_DEG
                    && (r.longitude - longitude).abs() < LOOKUP_BOX_DEG
            })
            .map(|r| r.limit)
    }

    /// Fill in the limit of an existing record by index.
    ///
    /// Returns `false` if the index is out of range.
    pub fn set_limit(&mut self, index: usize, limit: u32) -> bool {
        match self.records.get_mut(index) {
            Some(record) => {
                record.limit = Some(limit);
                record.updated_at = Utc::now();
                true
            }
            None => false,
        }
    }

    /// Remove a record by index.
    pub fn remove(&mut self, index: usize) -> Option<LimitOverride> {
        if index < self.records.len() {
            Some(self.records.remove(index))
        } else {
            None
        }
    }

    /// Remove all records.
    pub fn clear(&mut self) {
        self.records.clear();
    }

    /// The records, most-recently-touched first.
    #[must_use]
    pub fn records(&self) -> &[LimitOverride] {
        &self.records
    }

    /// Number of records in the store.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the store is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// The road name used by the dedup rule: the last whitespace-delimited
/// token of the reverse-geocoded address.
fn road_name(address: &str) -> Option<&str> {
    address.split_whitespace().last().filter(|s| !s.is_empty())
}

/// A correction that was successfully filed with the upstream service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublishedNote {
    /// Latitude of the corrected location.
    pub latitude: f64,

    /// Longitude of the corrected location.
    pub longitude: f64,

    /// The limit that was reported, if one was known.
    pub limit: Option<u32>,

    /// Reverse-geocoded address at publish time.
    pub address: String,

    /// Note id assigned by the upstream service.
    pub note_id: u64,

    /// When the note was filed.
    pub published_at: DateTime<Utc>,
}

/// Capacity-bounded history of filed notes, newest first.
///
/// Append-only from the application's point of view; records only leave
/// by eviction or an explicit clear.
#[derive(Debug, Clone)]
pub struct PublishedLog {
    records: Vec<PublishedNote>,
    capacity: usize,
}

impl PublishedLog {
    /// Create an empty history with the given capacity.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            records: Vec::new(),
            capacity,
        }
    }

    /// Load the history from persistence; absent or malformed reads as empty.
    #[must_use]
    pub fn load(kv: &dyn KvStore, capacity: usize) -> Self {
        let mut records = match kv.load(keys::PUBLISHED_NOTES) {
            Ok(Some(raw)) => serde_json::from_str::<Vec<PublishedNote>>(&raw).unwrap_or_else(|err| {
                warn!("published-note collection malformed, starting empty: {err}");
                Vec::new()
            }),
            Ok(None) => Vec::new(),
            Err(err) => {
                warn!("failed to read published-note collection, starting empty: {err}");
                Vec::new()
            }
        };
        records.truncate(capacity);
        Self { records, capacity }
    }

    /// Write the history back to persistence.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or the storage write fails.
    pub fn persist(&self, kv: &dyn KvStore) -> Result<()> {
        let raw = serde_json::to_string(&self.records)?;
        kv.save(keys::PUBLISHED_NOTES, &raw)
    }

    /// Record a filed note, evicting the oldest past capacity.
    pub fn push(&mut self, note: PublishedNote) {
        self.records.insert(0, note);
        self.records.truncate(self.capacity);
    }

    /// Remove all records.
    pub fn clear(&mut self) {
        self.records.clear();
    }

    /// The records, newest first.
    #[must_use]
    pub fn records(&self) -> &[PublishedNote] {
        &self.records
    }

    /// Number of records in the history.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the history is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
