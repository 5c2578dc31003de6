//! Core geospatial types for speedwatch.
//!
//! This module defines the position-fix sample produced by the external
//! GPS source, and the single shared great-circle distance implementation
//! used by both the override store and the trip accumulator.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Mean Earth radius in kilometers, as used by the haversine formula.
const EARTH_RADIUS_KM: f64 = 6371.0;

/// A single position fix from the GPS source.
///
/// Fields other than the coordinates may be absent depending on the fix
/// quality; none of them are owned by the core beyond the current sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeoSample {
    /// Latitude in decimal degrees.
    pub latitude: f64,

    /// Longitude in decimal degrees.
    pub longitude: f64,

    /// Ground speed in meters per second, if reported.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speed_mps: Option<f64>,

    /// Heading in degrees clockwise from true north, if reported.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub heading: Option<f64>,

    /// Altitude in meters above sea level, if reported.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub altitude: Option<f64>,

    /// When the fix was taken.
    pub timestamp: DateTime<Utc>,
}

impl GeoSample {
    /// Create a sample at the given coordinates, timestamped now.
    #[must_use]
    pub fn at(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
            speed_mps: None,
            heading: None,
            altitude: None,
            timestamp: Utc::now(),
        }
    }

    /// Ground speed in km/h.
    ///
    /// Absent or negative reported speeds read as 0, matching the behavior
    /// of receivers that report -1 while stationary.
    #[must_use]
    pub fn speed_kmh(&self) -> f64 {
        match self.speed_mps {
            Some(mps) if mps > 0.0 => mps * 3.6,
            _ => 0.0,
        }
    }

    /// Builder-style setter for the reported speed in m/s.
    #[must_use]
    pub fn with_speed_mps(mut self, mps: f64) -> Self {
        self.speed_mps = Some(mps);
        self
    }

    /// Compass direction for the reported heading, if any.
    #[must_use]
    pub fn compass(&self) -> Option<&'static str> {
        self.heading.map(compass_point)
    }
}

/// Great-circle distance between two coordinates in kilometers.
///
/// Standard haversine on a spherical Earth of radius 6371 km. This is the
/// only distance implementation in the crate; the override-store dedup rule
/// and the trip distance accumulation must agree exactly.
#[must_use]
pub fn haversine_km(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let d_lat = (lat2 - lat1).to_radians();
    let d_lon = (lon2 - lon1).to_radians();
    let a = (d_lat / 2.0).sin().powi(2)
        + lat1.to_radians().cos() * lat2.to_radians().cos() * (d_lon / 2.0).sin().powi(2);
    EARTH_RADIUS_KM * 2.0 * a.sqrt().atan2((1.0 - a).sqrt())
}

/// Eight-point compass direction for a heading in degrees.
#[must_use]
pub fn compass_point(heading_deg: f64) -> &'static str {
    const POINTS: [&str; 8] = ["N", "NE", "E", "SE", "S", "SW", "W", "NW"];
    let idx = ((heading_deg / 45.0).round() as usize) % 8;
    POINTS[idx]
}

#[cfg(test)]
mod tests {
    use super::*;

    const TAIPEI_101: (f64, f64) = (25.0330, 121.5654);

    #[test]
    fn test_haversine_same_point_is_zero() {
        let d = haversine_km(TAIPEI_101.0, TAIPEI_101.1, TAIPEI_101.0, TAIPEI_101.1);
        assert_eq!(d, 0.0);
    }

    #[test]
    fn test_haversine_one_degree_latitude() {
        // One degree of latitude spans roughly 111 km everywhere.
        let d = haversine_km(25.0, 121.0, 26.0, 121.0);
        assert!((d - 111.0).abs() < 0.5, "got {d}");
    }

    #[test]
    fn test_haversine_symmetry() {
        let a = haversine_km(25.0330, 121.5654, 25.0478, 121.5170);
        let b = haversine_km(25.0478, 121.5170, 25.0330, 121.5654);
        assert!((a - b).abs() < 1e-12);
    }

    #[test]
    fn test_haversine_short_hop() {
        // ~0.001 degrees of latitude is about 111 m.
        let d = haversine_km(25.0330, 121.5654, 25.0340, 121.5654);
        assert!((d - 0.111).abs() < 0.002, "got {d}");
    }

    #[test]
    fn test_speed_kmh_conversion() {
        let sample = GeoSample::at(25.0, 121.0).with_speed_mps(10.0);
        assert!((sample.speed_kmh() - 36.0).abs() < 1e-9);
    }

    #[test]
    fn test_speed_kmh_absent_is_zero() {
        let sample = GeoSample::at(25.0, 121.0);
        assert_eq!(sample.speed_kmh(), 0.0);
    }

    #[test]
    fn test_speed_kmh_negative_is_zero() {
        let sample = GeoSample::at(25.0, 121.0).with_speed_mps(-1.0);
        assert_eq!(sample.speed_kmh(), 0.0);
    }

    #[test]
    fn test_compass_points() {
        assert_eq!(compass_point(0.0), "N");
        assert_eq!(compass_point(45.0), "NE");
        assert_eq!(compass_point(90.0), "E");
        assert_eq!(compass_point(180.0), "S");
        assert_eq!(compass_point(270.0), "W");
        assert_eq!(compass_point(359.0), "N");
    }

    #[test]
    fn test_sample_serialization_round_trip() {
        let sample = GeoSample {
            latitude: 25.0330,
            longitude: 121.5654,
            speed_mps: Some(13.9),
            heading: Some(87.0),
            altitude: Some(12.0),
            timestamp: Utc::now(),
        };
        let json = serde_json::to_string(&sample).unwrap();
        let back: GeoSample = serde_json::from_str(&json).unwrap();
        assert_eq!(sample, back);
    }

    #[test]
    fn test_sample_omits_absent_fields() {
        let sample = GeoSample::at(25.0, 121.0);
        let json = serde_json::to_string(&sample).unwrap();
        assert!(!json.contains("speed_mps"));
        assert!(!json.contains("heading"));
    }
}
