//! Configuration management for speedwatch.
//!
//! This module provides configuration loading and validation using figment,
//! supporting TOML config files, environment variables, and defaults.

use std::path::PathBuf;
use std::time::Duration;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "config.toml";

/// Default data directory name.
const DATA_DIR_NAME: &str = "speedwatch";

/// Default database file name.
const DATABASE_FILE_NAME: &str = "speedwatch.db";

/// Application configuration.
///
/// Configuration is loaded from (in order of precedence, highest first):
/// 1. Environment variables (prefixed with `SPEEDWATCH_`)
/// 2. TOML config file at `~/.config/speedwatch/config.toml`
/// 3. Default values
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Alert engine configuration.
    pub alert: AlertConfig,
    /// Limit resolver configuration.
    pub resolver: ResolverConfig,
    /// Reverse-geocoding configuration.
    pub geocode: GeocodeConfig,
    /// Correction-publishing configuration.
    pub publish: PublishConfig,
    /// Storage configuration.
    pub storage: StorageConfig,
}

/// Alert-engine configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertConfig {
    /// Buffer above the limit before the danger level triggers, in km/h.
    ///
    /// Deliberately large to absorb GPS speed jitter; this is not a legal
    /// tolerance.
    pub tolerance_kmh: u32,
    /// How far below the danger threshold the warning level starts, in km/h.
    pub pre_warning_buffer_kmh: u32,
    /// Minimum interval between danger notifications in milliseconds.
    pub danger_cooldown_ms: u64,
    /// Minimum interval between warning beeps in milliseconds.
    pub warning_cooldown_ms: u64,
    /// Phrase spoken when the danger level fires.
    pub voice_text: String,
}

/// Limit-resolver configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolverConfig {
    /// Remote geospatial query mirrors, tried in order.
    pub mirrors: Vec<String>,
    /// Per-mirror request timeout in milliseconds.
    pub mirror_timeout_ms: u64,
    /// Search radius around the sample in meters.
    pub search_radius_m: u32,
    /// Minimum interval between resolution passes in seconds.
    pub check_interval_secs: u64,
    /// Limit lookups are suppressed below this speed, in km/h.
    pub min_speed_kmh: f64,
    /// Above this speed the maximum candidate limit is selected, in km/h.
    pub high_speed_kmh: f64,
    /// Last-resort limit when no source yields a value, in km/h.
    pub default_limit_kmh: u32,
    /// Whether resolution passes run at all.
    pub auto_resolve: bool,
    /// Whether a default fallback writes a "needs review" mark to the
    /// override store.
    pub auto_log_missing: bool,
}

/// Reverse-geocoding configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeocodeConfig {
    /// Reverse-geocode service endpoint.
    pub endpoint: String,
    /// Minimum interval between address lookups in seconds.
    pub check_interval_secs: u64,
}

/// Correction-publishing configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PublishConfig {
    /// Note-filing service endpoint.
    pub endpoint: String,
}

/// Storage-related configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Path to the database file.
    /// Defaults to `~/.local/share/speedwatch/speedwatch.db`
    pub database_path: Option<PathBuf>,
    /// Maximum number of limit overrides to retain.
    pub max_overrides: usize,
    /// Maximum number of trip records to retain.
    pub max_trips: usize,
    /// Maximum number of published-note records to retain.
    pub max_published: usize,
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            tolerance_kmh: 38,
            pre_warning_buffer_kmh: 5,
            danger_cooldown_ms: 3000,
            warning_cooldown_ms: 1000,
            voice_text: "Slow down".to_string(),
        }
    }
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            mirrors: default_mirrors(),
            mirror_timeout_ms: 3000,
            search_radius_m: 20,
            check_interval_secs: 15,
            min_speed_kmh: 10.0,
            high_speed_kmh: 60.0,
            default_limit_kmh: 50,
            auto_resolve: true,
            auto_log_missing: false,
        }
    }
}

impl Default for GeocodeConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://nominatim.openstreetmap.org".to_string(),
            check_interval_secs: 15,
        }
    }
}

impl Default for PublishConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://api.openstreetmap.org".to_string(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: None, // Will be resolved to default at runtime
            max_overrides: 100,
            max_trips: 20,
            max_published: 50,
        }
    }
}

/// Default query mirrors in priority order.
fn default_mirrors() -> Vec<String> {
    vec![
        "https://overpass-api.de/api/interpreter".to_string(),
        "https://maps.mail.ru/osm/tools/overpass/api/interpreter".to_string(),
        "https://overpass.kumi.systems/api/interpreter".to_string(),
    ]
}

impl Config {
    /// Load configuration from all sources.
    ///
    /// Configuration is loaded in this order (later sources override earlier):
    /// 1. Default values
    /// 2. TOML config file (if exists)
    /// 3. Environment variables (prefixed with `SPEEDWATCH_`)
    ///
    /// # Errors
    ///
    /// Returns an error if configuration loading or parsing fails.
    pub fn load() -> Result<Self> {
        Self::load_from(None)
    }

    /// Load configuration with an optional custom config path.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration loading or parsing fails.
    pub fn load_from(config_path: Option<PathBuf>) -> Result<Self> {
        let config_file = config_path.unwrap_or_else(Self::default_config_path);

        let figment = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(&config_file).nested())
            .merge(Env::prefixed("SPEEDWATCH_").split("_"));

        let config: Config = figment.extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Get the default configuration file path.
    #[must_use]
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from(".config"))
            .join(DATA_DIR_NAME)
            .join(CONFIG_FILE_NAME)
    }

    /// Get the default data directory path.
    #[must_use]
    pub fn default_data_dir() -> PathBuf {
        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from(".local/share"))
            .join(DATA_DIR_NAME)
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if any configuration values are invalid.
    pub fn validate(&self) -> Result<()> {
        if self.resolver.mirrors.is_empty() {
            return Err(Error::ConfigValidation {
                message: "resolver.mirrors must not be empty".to_string(),
            });
        }

        if self.resolver.mirror_timeout_ms == 0 {
            return Err(Error::ConfigValidation {
                message: "resolver.mirror_timeout_ms must be greater than 0".to_string(),
            });
        }

        if self.resolver.check_interval_secs == 0 {
            return Err(Error::ConfigValidation {
                message: "resolver.check_interval_secs must be greater than 0".to_string(),
            });
        }

        if self.alert.pre_warning_buffer_kmh > self.alert.tolerance_kmh {
            return Err(Error::ConfigValidation {
                message: format!(
                    "alert.pre_warning_buffer_kmh ({}) cannot exceed alert.tolerance_kmh ({})",
                    self.alert.pre_warning_buffer_kmh, self.alert.tolerance_kmh
                ),
            });
        }

        if self.storage.max_overrides == 0
            || self.storage.max_trips == 0
            || self.storage.max_published == 0
        {
            return Err(Error::ConfigValidation {
                message: "storage caps must be at least 1".to_string(),
            });
        }

        Ok(())
    }

    /// Get the database path, resolving defaults if not set.
    #[must_use]
    pub fn database_path(&self) -> PathBuf {
        self.storage
            .database_path
            .clone()
            .unwrap_or_else(|| Self::default_data_dir().join(DATABASE_FILE_NAME))
    }

    /// Get the per-mirror timeout as a Duration.
    #[must_use]
    pub fn mirror_timeout(&self) -> Duration {
        Duration::from_millis(self.resolver.mirror_timeout_ms)
    }

    /// Get the resolution-pass interval as a Duration.
    #[must_use]
    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.resolver.check_interval_secs)
    }

    /// Get the address-lookup interval as a Duration.
    #[must_use]
    pub fn geocode_interval(&self) -> Duration {
        Duration::from_secs(self.geocode.check_interval_secs)
    }

    /// Get the danger notification cooldown as a Duration.
    #[must_use]
    pub fn danger_cooldown(&self) -> Duration {
        Duration::from_millis(self.alert.danger_cooldown_ms)
    }

    /// Get the warning notification cooldown as a Duration.
    #[must_use]
    pub fn warning_cooldown(&self) -> Duration {
        Duration::from_millis(self.alert.warning_cooldown_ms)
    }
}
