//! Speed-limit resolution.
//!
//! Resolution is a two-stage pass: a synchronous check against the local
//! override store, then an asynchronous remote query with a default-limit
//! fallback. The stages are split so the session loop can apply the local
//! answer immediately and run the remote stage as its single in-flight
//! resolution task.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::ResolverConfig;
use crate::overrides::OverrideStore;
use crate::remote::SpeedLimitProvider;

/// Where a resolved limit came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LimitSource {
    /// A user correction in the local override store.
    LocalOverride,
    /// The remote geodata service.
    RemoteAuto,
    /// The configured last-resort default.
    DefaultFallback,
    /// No resolution has happened yet.
    #[default]
    Unknown,
}

impl std::fmt::Display for LimitSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::LocalOverride => write!(f, "override"),
            Self::RemoteAuto => write!(f, "remote"),
            Self::DefaultFallback => write!(f, "default"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

/// The outcome of a resolution pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ResolvedLimit {
    /// The limit in km/h, or `None` before the first resolution.
    pub value_kmh: Option<u32>,
    /// Where the value came from.
    pub source: LimitSource,
}

impl ResolvedLimit {
    /// A limit taken from the local override store.
    #[must_use]
    pub fn local(value_kmh: u32) -> Self {
        Self {
            value_kmh: Some(value_kmh),
            source: LimitSource::LocalOverride,
        }
    }

    /// A limit answered by the remote service.
    #[must_use]
    pub fn remote(value_kmh: u32) -> Self {
        Self {
            value_kmh: Some(value_kmh),
            source: LimitSource::RemoteAuto,
        }
    }

    /// The configured default, used when no source had an answer.
    #[must_use]
    pub fn fallback(value_kmh: u32) -> Self {
        Self {
            value_kmh: Some(value_kmh),
            source: LimitSource::DefaultFallback,
        }
    }

    /// Whether this came from the default fallback.
    #[must_use]
    pub fn is_fallback(&self) -> bool {
        self.source == LimitSource::DefaultFallback
    }
}

/// Pick one limit out of a backend's candidates, given the current speed.
///
/// Above the high-speed threshold the largest candidate wins, on the theory
/// that a fast road overlapping slower side roads in the search radius is
/// the one actually being driven. Otherwise the first candidate, in service
/// order, wins. Zeros take part in selection like any other value; the
/// caller decides afterwards whether the selected value is usable.
#[must_use]
pub fn select_candidate(candidates: &[u32], speed_kmh: f64, high_speed_kmh: f64) -> Option<u32> {
    if candidates.is_empty() {
        return None;
    }
    if speed_kmh > high_speed_kmh {
        candidates.iter().copied().max()
    } else {
        candidates.first().copied()
    }
}

/// Outcome of the local stage of a resolution pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocalDecision {
    /// The store answered with a remembered limit.
    Answered(ResolvedLimit),
    /// The location is marked for review; the pass ends with no value.
    Marked,
    /// The store has nothing here; proceed to the remote stage.
    Miss,
}

/// The two-stage limit resolver.
#[derive(Debug, Clone)]
pub struct LimitResolver {
    config: ResolverConfig,
    provider: Arc<dyn SpeedLimitProvider>,
}

impl LimitResolver {
    /// Create a resolver over the given remote provider.
    #[must_use]
    pub fn new(config: ResolverConfig, provider: Arc<dyn SpeedLimitProvider>) -> Self {
        Self { config, provider }
    }

    /// Stage one: consult the local override store.
    ///
    /// A record with a filled-in limit answers outright. A pending record
    /// (marked, limit unknown) also ends the pass, with no value and no
    /// remote query; the spot is already known to need review. Only a miss
    /// proceeds to the remote stage.
    #[must_use]
    pub fn local(&self, store: &OverrideStore, latitude: f64, longitude: f64) -> LocalDecision {
        match store.lookup(latitude, longitude) {
            Some(Some(value)) => {
                debug!(value, "limit answered by local override");
                LocalDecision::Answered(ResolvedLimit::local(value))
            }
            Some(None) => {
                debug!("location marked for review, skipping remote query");
                LocalDecision::Marked
            }
            None => LocalDecision::Miss,
        }
    }

    /// Stage two: query the remote provider, falling back to the default.
    ///
    /// Never fails; backend exhaustion and chains with no usable answer
    /// both collapse into the default fallback.
    pub async fn resolve_remote(
        &self,
        latitude: f64,
        longitude: f64,
        speed_kmh: f64,
    ) -> ResolvedLimit {
        let answer = match self
            .provider
            .fetch_limit(latitude, longitude, speed_kmh)
            .await
        {
            Ok(answer) => answer,
            Err(err) => {
                warn!(%err, "remote limit query unavailable");
                None
            }
        };

        match answer {
            Some(value) => {
                debug!(value, "limit answered by remote service");
                ResolvedLimit::remote(value)
            }
            None => {
                debug!(
                    default = self.config.default_limit_kmh,
                    "no remote answer, using default limit"
                );
                ResolvedLimit::fallback(self.config.default_limit_kmh)
            }
        }
    }

    /// The resolver configuration.
    #[must_use]
    pub fn config(&self) -> &ResolverConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;

    use crate::error::{Error, Result};

    /// Provider that always answers with a fixed selection.
    #[derive(Debug)]
    struct StaticProvider {
        answer: Option<u32>,
        calls: Mutex<u32>,
    }

    impl StaticProvider {
        fn new(answer: Option<u32>) -> Self {
            Self {
                answer,
                calls: Mutex::new(0),
            }
        }
    }

    #[async_trait]
    impl SpeedLimitProvider for StaticProvider {
        async fn fetch_limit(
            &self,
            _latitude: f64,
            _longitude: f64,
            _speed_kmh: f64,
        ) -> Result<Option<u32>> {
            *self.calls.lock().unwrap() += 1;
            Ok(self.answer)
        }
    }

    /// Provider whose every backend is down.
    #[derive(Debug)]
    struct ExhaustedProvider;

    #[async_trait]
    impl SpeedLimitProvider for ExhaustedProvider {
        async fn fetch_limit(
            &self,
            _latitude: f64,
            _longitude: f64,
            _speed_kmh: f64,
        ) -> Result<Option<u32>> {
            Err(Error::MirrorsExhausted { count: 3 })
        }
    }

    fn resolver(provider: Arc<dyn SpeedLimitProvider>) -> LimitResolver {
        LimitResolver::new(ResolverConfig::default(), provider)
    }

    #[test]
    fn test_select_first_at_low_speed() {
        assert_eq!(select_candidate(&[30, 50, 80], 40.0, 60.0), Some(30));
    }

    #[test]
    fn test_select_max_at_high_speed() {
        assert_eq!(select_candidate(&[30, 50, 80], 70.0, 60.0), Some(80));
    }

    #[test]
    fn test_select_threshold_is_strict() {
        // Exactly the threshold is not "high speed".
        assert_eq!(select_candidate(&[30, 80], 60.0, 60.0), Some(30));
    }

    #[test]
    fn test_select_empty_candidates() {
        assert_eq!(select_candidate(&[], 70.0, 60.0), None);
    }

    #[test]
    fn test_select_single_candidate() {
        assert_eq!(select_candidate(&[50], 100.0, 60.0), Some(50));
        assert_eq!(select_candidate(&[50], 20.0, 60.0), Some(50));
    }

    #[test]
    fn test_local_answers_from_store() {
        let r = resolver(Arc::new(StaticProvider::new(None)));
        let mut store = OverrideStore::new(100);
        store.upsert(25.0330, 121.5654, Some(40), "Da'an Xinyi");

        let decision = r.local(&store, 25.0330, 121.5654);
        assert_eq!(decision, LocalDecision::Answered(ResolvedLimit::local(40)));
    }

    #[test]
    fn test_local_marked_record_ends_the_pass() {
        let r = resolver(Arc::new(StaticProvider::new(None)));
        let mut store = OverrideStore::new(100);
        store.upsert(25.0330, 121.5654, None, "Da'an Xinyi");

        // A marked location yields no value and suppresses the remote stage.
        assert_eq!(r.local(&store, 25.0330, 121.5654), LocalDecision::Marked);
    }

    #[test]
    fn test_local_misses_outside_box() {
        let r = resolver(Arc::new(StaticProvider::new(None)));
        let mut store = OverrideStore::new(100);
        store.upsert(25.0330, 121.5654, Some(40), "Da'an Xinyi");

        assert_eq!(r.local(&store, 25.0350, 121.5654), LocalDecision::Miss);
    }

    #[tokio::test]
    async fn test_remote_answer_wins() {
        let r = resolver(Arc::new(StaticProvider::new(Some(80))));

        let resolved = r.resolve_remote(25.0, 121.5, 70.0).await;
        assert_eq!(resolved.value_kmh, Some(80));
        assert_eq!(resolved.source, LimitSource::RemoteAuto);
    }

    #[tokio::test]
    async fn test_unusable_remote_answer_falls_back_to_default() {
        let r = resolver(Arc::new(StaticProvider::new(None)));

        let resolved = r.resolve_remote(25.0, 121.5, 40.0).await;
        assert_eq!(resolved.value_kmh, Some(50));
        assert_eq!(resolved.source, LimitSource::DefaultFallback);
        assert!(resolved.is_fallback());
    }

    #[tokio::test]
    async fn test_mirror_exhaustion_falls_back_to_default() {
        let r = resolver(Arc::new(ExhaustedProvider));

        let resolved = r.resolve_remote(25.0, 121.5, 40.0).await;
        assert_eq!(resolved.value_kmh, Some(50));
        assert_eq!(resolved.source, LimitSource::DefaultFallback);
    }

    #[tokio::test]
    async fn test_provider_called_once_per_pass() {
        let provider = Arc::new(StaticProvider::new(Some(60)));
        let r = resolver(provider.clone());

        r.resolve_remote(25.0, 121.5, 40.0).await;
        assert_eq!(*provider.calls.lock().unwrap(), 1);
    }

    #[test]
    fn test_unresolved_default() {
        let resolved = ResolvedLimit::default();
        assert_eq!(resolved.value_kmh, None);
        assert_eq!(resolved.source, LimitSource::Unknown);
    }

    #[test]
    fn test_source_display() {
        assert_eq!(LimitSource::LocalOverride.to_string(), "override");
        assert_eq!(LimitSource::RemoteAuto.to_string(), "remote");
        assert_eq!(LimitSource::DefaultFallback.to_string(), "default");
        assert_eq!(LimitSource::Unknown.to_string(), "unknown");
    }
}
