//! Hysteresis-based overspeed alerting.
//!
//! Maps a (current speed, resolved limit) pair to a discrete danger level
//! and fires rate-limited notifications. The level itself is recomputed
//! from scratch on every sample; only the notification side effects are
//! edge-sensitive, each on its own cooldown timer.

use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::config::AlertConfig;

/// Discrete danger level for the current sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertLevel {
    /// At or below the warning threshold.
    #[default]
    Safe,
    /// Within the pre-warning band below the danger threshold.
    Warning,
    /// Above the danger threshold.
    Danger,
}

impl std::fmt::Display for AlertLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Safe => write!(f, "safe"),
            Self::Warning => write!(f, "warning"),
            Self::Danger => write!(f, "danger"),
        }
    }
}

/// Sink for alert side effects.
///
/// The production sink logs; platform audio and speech synthesis are
/// presentation concerns layered on top of this trait.
pub trait Notifier: Send + Sync {
    /// Play the alert tone.
    fn beep(&self);

    /// Speak the given phrase.
    fn speak(&self, text: &str);
}

/// Notifier that reports alerts through the tracing log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn beep(&self) {
        info!("alert tone");
    }

    fn speak(&self, text: &str) {
        info!("speaking: {text}");
    }
}

/// The alert state machine.
///
/// Holds the current level and the per-level notification timestamps.
/// Process state only; nothing here is persisted.
#[derive(Debug)]
pub struct AlertEngine {
    config: AlertConfig,
    level: AlertLevel,
    last_danger_notify: Option<Instant>,
    last_warning_notify: Option<Instant>,
}

impl AlertEngine {
    /// Create an engine in the initial Safe state.
    #[must_use]
    pub fn new(config: AlertConfig) -> Self {
        Self {
            config,
            level: AlertLevel::Safe,
            last_danger_notify: None,
            last_warning_notify: None,
        }
    }

    /// The current alert level.
    #[must_use]
    pub fn level(&self) -> AlertLevel {
        self.level
    }

    /// The speed above which the danger level triggers, for a given limit.
    ///
    /// An unknown limit is treated as 0, so the tolerance alone governs.
    #[must_use]
    pub fn danger_threshold(&self, limit_kmh: Option<u32>) -> f64 {
        f64::from(limit_kmh.unwrap_or(0) + self.config.tolerance_kmh)
    }

    /// The speed above which the warning level triggers, for a given limit.
    #[must_use]
    pub fn warning_threshold(&self, limit_kmh: Option<u32>) -> f64 {
        self.danger_threshold(limit_kmh) - f64::from(self.config.pre_warning_buffer_kmh)
    }

    /// Recompute the level for a sample and fire any due notifications.
    ///
    /// While monitoring is inactive the level is forced to Safe and no
    /// notifications fire. Notifications are rate-limited per level: a
    /// danger breach fires the tone plus the spoken phrase at most once per
    /// danger cooldown; a warning breach fires the tone alone at most once
    /// per warning cooldown. The timers are independent of level
    /// transitions, so a re-entered breach re-triggers on elapsed time.
    pub fn evaluate(
        &mut self,
        speed_kmh: f64,
        limit_kmh: Option<u32>,
        monitoring: bool,
        now: Instant,
        notifier: &dyn Notifier,
    ) -> AlertLevel {
        if !monitoring {
            self.level = AlertLevel::Safe;
            return self.level;
        }

        let danger = self.danger_threshold(limit_kmh);
        let warning = self.warning_threshold(limit_kmh);

        self.level = if speed_kmh > danger {
            if self.cooldown_elapsed(self.last_danger_notify, self.config.danger_cooldown_ms, now) {
                notifier.beep();
                notifier.speak(&self.config.voice_text);
                self.last_danger_notify = Some(now);
            }
            AlertLevel::Danger
        } else if speed_kmh > warning {
            if self.cooldown_elapsed(self.last_warning_notify, self.config.warning_cooldown_ms, now)
            {
                notifier.beep();
                self.last_warning_notify = Some(now);
            }
            AlertLevel::Warning
        } else {
            AlertLevel::Safe
        };

        self.level
    }

    /// Force the level back to Safe, as happens when monitoring stops.
    pub fn reset(&mut self) {
        self.level = AlertLevel::Safe;
    }

    fn cooldown_elapsed(&self, last: Option<Instant>, cooldown_ms: u64, now: Instant) -> bool {
        match last {
            Some(last) => now.duration_since(last).as_millis() >= u128::from(cooldown_ms),
            None => true,
        }
    }
}
