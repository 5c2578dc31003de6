//! `speedwatch` - Speed-limit resolution and overspeed alerting
//!
//! This library resolves the posted speed limit for a stream of position
//! fixes, raises rate-limited alerts when the observed speed drifts over
//! it, remembers user corrections for places the map data gets wrong, and
//! logs trips.

#![warn(missing_docs)]
#![warn(missing_debug_implementations)]
#![deny(unsafe_code)]

pub mod alert;
pub mod cli;
pub mod config;
pub mod error;
pub mod geo;
pub mod logging;
pub mod monitor;
pub mod overrides;
pub mod remote;
pub mod resolver;
pub mod storage;
pub mod trip;

pub use alert::{AlertEngine, AlertLevel, LogNotifier, Notifier};
pub use config::Config;
pub use error::{Error, Result};
pub use geo::{haversine_km, GeoSample};
pub use logging::init_logging;
pub use monitor::{GeoEvent, MonitorEngine, SessionStatus};
pub use overrides::{LimitOverride, OverrideStore};
pub use resolver::{LimitResolver, LimitSource, ResolvedLimit};
pub use storage::{KvStore, SqliteStore};
pub use trip::{TripAccumulator, TripLog, TripRecord};
