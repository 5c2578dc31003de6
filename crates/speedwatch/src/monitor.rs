//! Monitoring session lifecycle.
//!
//! A session owns every piece of live state: the override store, the alert
//! engine, the trip accumulator, and the most recently resolved limit. It
//! consumes a stream of position events and processes each fix to
//! completion; the remote resolution step is the only suspension point and
//! runs as a single background task at a time.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::alert::{AlertEngine, Notifier};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::geo::GeoSample;
use crate::overrides::OverrideStore;
use crate::remote::ReverseGeocoder;
use crate::resolver::{LimitResolver, LocalDecision, ResolvedLimit};
use crate::storage::KvStore;
use crate::trip::{TripAccumulator, TripLog, TripRecord};

/// One event from a position source.
#[derive(Debug, Clone, PartialEq)]
pub enum GeoEvent {
    /// A position fix.
    Fix(GeoSample),
    /// The fix stream went away; the session degrades but keeps its state.
    SignalLost,
}

/// A source of position events.
///
/// Implementors push events into the channel until the stream ends or the
/// receiver is dropped. Closing the channel ends the session cleanly.
#[async_trait]
pub trait GeoSampleSource: Send {
    /// Run the source to completion.
    ///
    /// # Errors
    ///
    /// Returns an error if the source cannot start at all; failures after
    /// startup are reported in-stream as [`GeoEvent::SignalLost`].
    async fn run(&mut self, tx: mpsc::Sender<GeoEvent>) -> Result<()>;
}

/// Lifecycle state of a monitoring session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionStatus {
    /// Created but not yet started.
    #[default]
    Idle,
    /// Processing fixes.
    Running,
    /// The fix stream is lost; state is frozen until it returns.
    Degraded,
    /// Stopped; the trip has been closed out.
    Stopped,
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Running => write!(f, "running"),
            Self::Degraded => write!(f, "degraded"),
            Self::Stopped => write!(f, "stopped"),
        }
    }
}

/// A remote resolution the session wants run.
///
/// Carries the triggering sample's coordinates and speed so the completed
/// result can be applied, and the location marked, without re-reading
/// session state that may have moved on.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResolutionRequest {
    /// Latitude of the triggering fix.
    pub latitude: f64,
    /// Longitude of the triggering fix.
    pub longitude: f64,
    /// Speed at the triggering fix, in km/h.
    pub speed_kmh: f64,
}

/// The monitoring session context.
///
/// Created at session start and torn down at stop; there is no global
/// state. All mutation happens on the session task.
pub struct MonitorEngine {
    resolver: LimitResolver,
    overrides: OverrideStore,
    alert: AlertEngine,
    trip: Option<TripAccumulator>,
    limit: ResolvedLimit,
    status: SessionStatus,
    last_check: Option<Instant>,
    last_geocode: Option<Instant>,
    resolution_pending: bool,
    address: Option<String>,
    fix_count: u64,
    check_interval: Duration,
    geocode_interval: Duration,
    min_speed_kmh: f64,
    auto_resolve: bool,
    auto_log_missing: bool,
    max_trips: usize,
    kv: Arc<dyn KvStore>,
}

impl std::fmt::Debug for MonitorEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MonitorEngine")
            .field("status", &self.status)
            .field("limit", &self.limit)
            .field("fix_count", &self.fix_count)
            .field("resolution_pending", &self.resolution_pending)
            .finish_non_exhaustive()
    }
}

impl MonitorEngine {
    /// Create a session context over the given persistence handle.
    ///
    /// The override store is loaded eagerly; a corrupt collection reads as
    /// empty.
    #[must_use]
    pub fn new(config: &Config, resolver: LimitResolver, kv: Arc<dyn KvStore>) -> Self {
        let overrides = OverrideStore::load(kv.as_ref(), config.storage.max_overrides);
        Self {
            resolver,
            overrides,
            alert: AlertEngine::new(config.alert.clone()),
            trip: None,
            limit: ResolvedLimit::default(),
            status: SessionStatus::Idle,
            last_check: None,
            last_geocode: None,
            resolution_pending: false,
            address: None,
            fix_count: 0,
            check_interval: config.check_interval(),
            geocode_interval: config.geocode_interval(),
            min_speed_kmh: config.resolver.min_speed_kmh,
            auto_resolve: config.resolver.auto_resolve,
            auto_log_missing: config.resolver.auto_log_missing,
            max_trips: config.storage.max_trips,
            kv,
        }
    }

    /// Start the session: open a trip and begin accepting fixes.
    pub fn start(&mut self) {
        info!("monitoring session started");
        self.status = SessionStatus::Running;
        self.trip = Some(TripAccumulator::start(Utc::now()));
        self.last_check = None;
        self.fix_count = 0;
    }

    /// Process one fix to completion.
    ///
    /// Updates the trip, recomputes the alert level, and decides whether a
    /// resolution pass is due. Returns a request when the remote stage
    /// should run; the caller owns scheduling it and feeding the result
    /// back through [`Self::complete_resolution`].
    pub fn on_fix(
        &mut self,
        sample: &GeoSample,
        now: Instant,
        notifier: &dyn Notifier,
    ) -> Option<ResolutionRequest> {
        if self.status == SessionStatus::Degraded {
            info!("fix stream regained");
            self.status = SessionStatus::Running;
        }
        if self.status != SessionStatus::Running {
            return None;
        }

        self.fix_count += 1;
        if let Some(trip) = self.trip.as_mut() {
            trip.update(sample);
        }

        let speed = sample.speed_kmh();
        self.alert
            .evaluate(speed, self.limit.value_kmh, true, now, notifier);

        if !self.resolution_due(speed, now) {
            return None;
        }
        self.last_check = Some(now);

        match self
            .resolver
            .local(&self.overrides, sample.latitude, sample.longitude)
        {
            LocalDecision::Answered(resolved) => {
                self.limit = resolved;
                None
            }
            LocalDecision::Marked => {
                // Known gap in the data; no value, no remote query.
                self.limit = ResolvedLimit::default();
                None
            }
            LocalDecision::Miss => {
                self.resolution_pending = true;
                Some(ResolutionRequest {
                    latitude: sample.latitude,
                    longitude: sample.longitude,
                    speed_kmh: speed,
                })
            }
        }
    }

    /// Whether a resolution pass should trigger for this fix.
    ///
    /// The very first fix of a session always triggers. After that a pass
    /// needs the interval elapsed and the speed gate cleared, and never
    /// starts while another pass is in flight.
    fn resolution_due(&self, speed_kmh: f64, now: Instant) -> bool {
        if !self.auto_resolve || self.resolution_pending {
            return false;
        }
        match self.last_check {
            None => true,
            Some(last) => {
                now.duration_since(last) >= self.check_interval && speed_kmh > self.min_speed_kmh
            }
        }
    }

    /// Apply a completed remote resolution.
    ///
    /// A default fallback optionally marks the location in the override
    /// store, the only store side effect a pass can have.
    pub fn complete_resolution(&mut self, request: ResolutionRequest, resolved: ResolvedLimit) {
        self.resolution_pending = false;
        self.limit = resolved;
        debug!(?resolved, "resolution pass completed");

        if resolved.is_fallback() && self.auto_log_missing {
            let address = self.address.clone().unwrap_or_default();
            self.overrides
                .upsert(request.latitude, request.longitude, None, &address);
            if let Err(err) = self.overrides.persist(self.kv.as_ref()) {
                warn!(%err, "failed to persist auto-logged location");
            }
        }
    }

    /// Clear the in-flight marker after a resolution task died without a
    /// result.
    pub fn resolution_aborted(&mut self) {
        self.resolution_pending = false;
    }

    /// Mark the fix stream as lost. Never fatal; state stays frozen.
    pub fn on_signal_lost(&mut self) {
        if self.status == SessionStatus::Running {
            warn!("fix stream lost, session degraded");
            self.status = SessionStatus::Degraded;
        }
    }

    /// Whether an address lookup is due for this fix.
    pub fn geocode_due(&mut self, now: Instant) -> bool {
        let due = match self.last_geocode {
            None => true,
            Some(last) => now.duration_since(last) >= self.geocode_interval,
        };
        if due {
            self.last_geocode = Some(now);
        }
        due
    }

    /// Record a completed address lookup.
    pub fn set_address(&mut self, address: Option<String>) {
        if address.is_some() {
            self.address = address;
        }
    }

    /// Stop the session, closing out and logging the trip.
    ///
    /// An in-flight resolution is not cancelled; stopping only gates
    /// future triggers and alert effects.
    pub fn stop(&mut self) -> Option<TripRecord> {
        self.status = SessionStatus::Stopped;
        self.alert.reset();

        let record = self.trip.take().and_then(|trip| trip.finish(Utc::now()));
        if let Some(record) = record.clone() {
            let mut log = TripLog::load(self.kv.as_ref(), self.max_trips);
            log.push(record);
            if let Err(err) = log.persist(self.kv.as_ref()) {
                warn!(%err, "failed to persist trip log");
            }
        }
        info!("monitoring session stopped");
        record
    }

    /// Current lifecycle status.
    #[must_use]
    pub fn status(&self) -> SessionStatus {
        self.status
    }

    /// The most recently resolved limit.
    #[must_use]
    pub fn limit(&self) -> ResolvedLimit {
        self.limit
    }

    /// The alert engine, for level inspection.
    #[must_use]
    pub fn alert(&self) -> &AlertEngine {
        &self.alert
    }

    /// The live override store.
    #[must_use]
    pub fn overrides(&self) -> &OverrideStore {
        &self.overrides
    }

    /// The most recent reverse-geocoded address, if any.
    #[must_use]
    pub fn address(&self) -> Option<&str> {
        self.address.as_deref()
    }

    /// Number of fixes processed this session.
    #[must_use]
    pub fn fix_count(&self) -> u64 {
        self.fix_count
    }

    /// Drive a full session from an event stream.
    ///
    /// Runs until the source closes its channel, then stops the session
    /// and returns the logged trip, if one survived the filters.
    pub async fn run(
        &mut self,
        mut rx: mpsc::Receiver<GeoEvent>,
        notifier: &dyn Notifier,
        geocoder: Option<ReverseGeocoder>,
    ) -> Result<Option<TripRecord>> {
        self.start();

        let mut resolution: Option<JoinHandle<(ResolutionRequest, ResolvedLimit)>> = None;
        let mut geocode: Option<JoinHandle<Option<String>>> = None;

        loop {
            tokio::select! {
                event = rx.recv() => {
                    match event {
                        Some(GeoEvent::Fix(sample)) => {
                            let now = Instant::now();
                            if let Some(request) = self.on_fix(&sample, now, notifier) {
                                let resolver = self.resolver.clone();
                                resolution = Some(tokio::spawn(async move {
                                    let resolved = resolver
                                        .resolve_remote(
                                            request.latitude,
                                            request.longitude,
                                            request.speed_kmh,
                                        )
                                        .await;
                                    (request, resolved)
                                }));
                            }
                            if geocode.is_none() && self.geocode_due(now) {
                                if let Some(geocoder) = geocoder.clone() {
                                    geocode = Some(tokio::spawn(async move {
                                        geocoder.reverse(sample.latitude, sample.longitude).await
                                    }));
                                }
                            }
                        }
                        Some(GeoEvent::SignalLost) => self.on_signal_lost(),
                        None => break,
                    }
                }
                joined = join_next(&mut resolution) => {
                    resolution = None;
                    match joined {
                        Some((request, resolved)) => self.complete_resolution(request, resolved),
                        None => self.resolution_aborted(),
                    }
                }
                joined = join_next(&mut geocode) => {
                    geocode = None;
                    if let Some(address) = joined {
                        self.set_address(address);
                    }
                }
            }
        }

        // Let an in-flight pass land before closing out.
        if let Some(handle) = resolution.take() {
            match handle.await {
                Ok((request, resolved)) => self.complete_resolution(request, resolved),
                Err(_) => self.resolution_aborted(),
            }
        }
        if let Some(handle) = geocode.take() {
            handle.abort();
        }

        Ok(self.stop())
    }
}

/// Await the task inside the slot. The caller's `select!` guard keeps this
/// arm disabled while the slot is empty.
async fn join_next<T>(slot: &mut Option<JoinHandle<T>>) -> Option<T> {
    match slot.as_mut() {
        Some(handle) => handle.await.ok(),
        None => std::future::pending().await,
    }
}

/// Position source that replays recorded samples from a JSONL file.
///
/// Each line holds one sample object; a literal `null` line injects a
/// signal-loss event. With pacing enabled, inter-sample gaps follow the
/// recorded timestamps.
#[derive(Debug)]
pub struct ReplaySource {
    path: PathBuf,
    pace: bool,
}

impl ReplaySource {
    /// Create a replay source over a sample file.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>, pace: bool) -> Self {
        Self {
            path: path.into(),
            pace,
        }
    }
}

#[async_trait]
impl GeoSampleSource for ReplaySource {
    async fn run(&mut self, tx: mpsc::Sender<GeoEvent>) -> Result<()> {
        let file = tokio::fs::File::open(&self.path).await.map_err(|err| {
            Error::sensor(format!("cannot open replay file {}: {err}", self.path.display()))
        })?;
        let mut lines = BufReader::new(file).lines();
        let mut previous: Option<GeoSample> = None;

        while let Some(line) = lines.next_line().await? {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            if line == "null" {
                if tx.send(GeoEvent::SignalLost).await.is_err() {
                    break;
                }
                continue;
            }
            match serde_json::from_str::<GeoSample>(line) {
                Ok(sample) => {
                    if self.pace {
                        if let Some(prev) = &previous {
                            let gap = (sample.timestamp - prev.timestamp)
                                .to_std()
                                .unwrap_or(Duration::ZERO);
                            tokio::time::sleep(gap).await;
                        }
                    }
                    previous = Some(sample.clone());
                    if tx.send(GeoEvent::Fix(sample)).await.is_err() {
                        break;
                    }
                }
                Err(err) => warn!(%err, "skipping malformed replay line"),
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;

    use crate::remote::SpeedLimitProvider;
    use crate::resolver::LimitSource;
    use crate::storage::MemoryStore;

    #[derive(Debug, Default)]
    struct SilentNotifier;

    impl Notifier for SilentNotifier {
        fn beep(&self) {}
        fn speak(&self, _text: &str) {}
    }

    #[derive(Debug)]
    struct StaticProvider(Option<u32>);

    #[async_trait]
    impl SpeedLimitProvider for StaticProvider {
        async fn fetch_limit(
            &self,
            _latitude: f64,
            _longitude: f64,
            _speed_kmh: f64,
        ) -> Result<Option<u32>> {
            Ok(self.0)
        }
    }

    #[derive(Debug, Default)]
    struct CountingNotifier {
        beeps: Mutex<u32>,
    }

    impl Notifier for CountingNotifier {
        fn beep(&self) {
            *self.beeps.lock().unwrap() += 1;
        }
        fn speak(&self, _text: &str) {}
    }

    fn engine_with(config: Config, answer: Option<u32>) -> MonitorEngine {
        let resolver = LimitResolver::new(
            config.resolver.clone(),
            Arc::new(StaticProvider(answer)),
        );
        MonitorEngine::new(&config, resolver, Arc::new(MemoryStore::new()))
    }

    fn started_engine() -> MonitorEngine {
        let mut engine = engine_with(Config::default(), Some(50));
        engine.start();
        engine
    }

    fn fix(latitude: f64, longitude: f64, speed_kmh: f64) -> GeoSample {
        GeoSample::at(latitude, longitude).with_speed_mps(speed_kmh / 3.6)
    }

    #[test]
    fn test_first_fix_always_triggers() {
        let mut engine = started_engine();
        // Below the speed gate, but the first fix is exempt.
        let request = engine.on_fix(&fix(25.0, 121.5, 3.0), Instant::now(), &SilentNotifier);
        assert!(request.is_some());
    }

    #[test]
    fn test_interval_gates_triggers() {
        let mut engine = started_engine();
        let start = Instant::now();
        let request = engine.on_fix(&fix(25.0, 121.5, 30.0), start, &SilentNotifier);
        engine.complete_resolution(request.unwrap(), ResolvedLimit::remote(50));

        // Fourteen seconds in: too soon.
        let request = engine.on_fix(
            &fix(25.0, 121.5, 30.0),
            start + Duration::from_secs(14),
            &SilentNotifier,
        );
        assert!(request.is_none());

        // Fifteen seconds in: due.
        let request = engine.on_fix(
            &fix(25.0, 121.5, 30.0),
            start + Duration::from_secs(15),
            &SilentNotifier,
        );
        assert!(request.is_some());
    }

    #[test]
    fn test_speed_gate_suppresses_triggers() {
        let mut engine = started_engine();
        let start = Instant::now();
        let request = engine.on_fix(&fix(25.0, 121.5, 30.0), start, &SilentNotifier);
        engine.complete_resolution(request.unwrap(), ResolvedLimit::remote(50));

        // Interval elapsed but crawling: suppressed.
        let request = engine.on_fix(
            &fix(25.0, 121.5, 5.0),
            start + Duration::from_secs(20),
            &SilentNotifier,
        );
        assert!(request.is_none());

        // Exactly at the gate is still suppressed (strict comparison).
        let request = engine.on_fix(
            &fix(25.0, 121.5, 10.0),
            start + Duration::from_secs(25),
            &SilentNotifier,
        );
        assert!(request.is_none());
    }

    #[test]
    fn test_single_in_flight_resolution() {
        let mut engine = started_engine();
        let start = Instant::now();
        let request = engine.on_fix(&fix(25.0, 121.5, 30.0), start, &SilentNotifier);
        assert!(request.is_some());

        // A due trigger while one is pending is dropped, not queued.
        let dropped = engine.on_fix(
            &fix(25.1, 121.6, 30.0),
            start + Duration::from_secs(30),
            &SilentNotifier,
        );
        assert!(dropped.is_none());

        engine.complete_resolution(request.unwrap(), ResolvedLimit::remote(60));
        assert_eq!(engine.limit().value_kmh, Some(60));

        // With the pass landed, the next due fix triggers again.
        let request = engine.on_fix(
            &fix(25.1, 121.6, 30.0),
            start + Duration::from_secs(60),
            &SilentNotifier,
        );
        assert!(request.is_some());
    }

    #[test]
    fn test_samples_keep_previous_limit_while_pending() {
        let mut engine = started_engine();
        let start = Instant::now();
        let request = engine.on_fix(&fix(25.0, 121.5, 30.0), start, &SilentNotifier);
        engine.complete_resolution(request.unwrap(), ResolvedLimit::remote(40));

        let request = engine.on_fix(
            &fix(25.0, 121.5, 30.0),
            start + Duration::from_secs(15),
            &SilentNotifier,
        );
        assert!(request.is_some());
        // Pending pass has not landed; the old value still governs.
        assert_eq!(engine.limit().value_kmh, Some(40));
    }

    #[test]
    fn test_local_override_answers_without_request() {
        let config = Config::default();
        let kv: Arc<dyn KvStore> = Arc::new(MemoryStore::new());
        let resolver = LimitResolver::new(config.resolver.clone(), Arc::new(StaticProvider(None)));
        let mut engine = MonitorEngine::new(&config, resolver, kv);
        engine.start();

        // Seed the store through a first pass marking flow instead: simpler
        // to upsert via a fresh store before the engine loads it.
        drop(engine);
        let kv: Arc<dyn KvStore> = Arc::new(MemoryStore::new());
        let mut store = OverrideStore::new(100);
        store.upsert(25.0330, 121.5654, Some(40), "Da'an Xinyi");
        store.persist(kv.as_ref()).unwrap();

        let resolver = LimitResolver::new(config.resolver.clone(), Arc::new(StaticProvider(None)));
        let mut engine = MonitorEngine::new(&config, resolver, kv);
        engine.start();

        let request = engine.on_fix(&fix(25.0330, 121.5654, 30.0), Instant::now(), &SilentNotifier);
        assert!(request.is_none());
        assert_eq!(engine.limit().value_kmh, Some(40));
        assert_eq!(engine.limit().source, LimitSource::LocalOverride);
    }

    #[test]
    fn test_marked_location_skips_remote() {
        let config = Config::default();
        let kv: Arc<dyn KvStore> = Arc::new(MemoryStore::new());
        let mut store = OverrideStore::new(100);
        store.upsert(25.0330, 121.5654, None, "Da'an Xinyi");
        store.persist(kv.as_ref()).unwrap();

        let resolver = LimitResolver::new(config.resolver.clone(), Arc::new(StaticProvider(None)));
        let mut engine = MonitorEngine::new(&config, resolver, kv);
        engine.start();

        let request = engine.on_fix(&fix(25.0330, 121.5654, 30.0), Instant::now(), &SilentNotifier);
        assert!(request.is_none());
        assert_eq!(engine.limit().value_kmh, None);
        assert_eq!(engine.limit().source, LimitSource::Unknown);
    }

    #[test]
    fn test_fallback_with_auto_log_marks_location() {
        let mut config = Config::default();
        config.resolver.auto_log_missing = true;
        let kv: Arc<dyn KvStore> = Arc::new(MemoryStore::new());
        let resolver = LimitResolver::new(config.resolver.clone(), Arc::new(StaticProvider(None)));
        let mut engine = MonitorEngine::new(&config, resolver, kv.clone());
        engine.start();

        let request = engine
            .on_fix(&fix(25.0330, 121.5654, 30.0), Instant::now(), &SilentNotifier)
            .unwrap();
        engine.complete_resolution(request, ResolvedLimit::fallback(50));

        assert_eq!(engine.overrides().len(), 1);
        assert!(engine.overrides().records()[0].is_pending());
        // The mark is persisted immediately.
        let reloaded = OverrideStore::load(kv.as_ref(), 100);
        assert_eq!(reloaded.len(), 1);
    }

    #[test]
    fn test_fallback_without_auto_log_writes_nothing() {
        let mut engine = started_engine();
        let request = engine
            .on_fix(&fix(25.0330, 121.5654, 30.0), Instant::now(), &SilentNotifier)
            .unwrap();
        engine.complete_resolution(request, ResolvedLimit::fallback(50));

        assert!(engine.overrides().is_empty());
        assert_eq!(engine.limit().value_kmh, Some(50));
    }

    #[test]
    fn test_auto_resolve_disabled_never_triggers() {
        let mut config = Config::default();
        config.resolver.auto_resolve = false;
        let mut engine = engine_with(config, Some(50));
        engine.start();

        let request = engine.on_fix(&fix(25.0, 121.5, 30.0), Instant::now(), &SilentNotifier);
        assert!(request.is_none());
    }

    #[test]
    fn test_signal_lost_degrades_and_fix_recovers() {
        let mut engine = started_engine();
        engine.on_signal_lost();
        assert_eq!(engine.status(), SessionStatus::Degraded);

        // State survives degradation; the next fix resumes.
        engine.on_fix(&fix(25.0, 121.5, 30.0), Instant::now(), &SilentNotifier);
        assert_eq!(engine.status(), SessionStatus::Running);
    }

    #[test]
    fn test_signal_lost_when_stopped_stays_stopped() {
        let mut engine = started_engine();
        engine.stop();
        engine.on_signal_lost();
        assert_eq!(engine.status(), SessionStatus::Stopped);
    }

    #[test]
    fn test_alert_fires_during_fix_processing() {
        let notifier = CountingNotifier::default();
        let mut engine = started_engine();
        let start = Instant::now();
        let request = engine.on_fix(&fix(25.0, 121.5, 30.0), start, &notifier);
        engine.complete_resolution(request.unwrap(), ResolvedLimit::remote(50));

        // 95 km/h against a 50 limit is over the danger threshold.
        engine.on_fix(&fix(25.0, 121.5, 95.0), start + Duration::from_secs(1), &notifier);
        assert!(*notifier.beeps.lock().unwrap() >= 1);
    }

    #[test]
    fn test_stop_logs_surviving_trip() {
        let kv: Arc<dyn KvStore> = Arc::new(MemoryStore::new());
        let config = Config::default();
        let resolver =
            LimitResolver::new(config.resolver.clone(), Arc::new(StaticProvider(Some(50))));
        let mut engine = MonitorEngine::new(&config, resolver, kv.clone());
        engine.start();

        let start = Instant::now();
        for i in 0..5_u32 {
            engine.on_fix(
                &fix(25.0330 + f64::from(i) * 0.001, 121.5654, 40.0),
                start + Duration::from_secs(u64::from(i)),
                &SilentNotifier,
            );
        }

        let record = engine.stop();
        // ~0.44 km accumulated, over the distance threshold.
        let record = record.unwrap();
        assert!(record.distance_km > 0.1);
        assert_eq!(engine.status(), SessionStatus::Stopped);

        let log = TripLog::load(kv.as_ref(), 20);
        assert_eq!(log.len(), 1);
    }

    #[test]
    fn test_geocode_cadence() {
        let mut engine = started_engine();
        let start = Instant::now();

        assert!(engine.geocode_due(start));
        assert!(!engine.geocode_due(start + Duration::from_secs(5)));
        assert!(engine.geocode_due(start + Duration::from_secs(16)));
    }

    #[test]
    fn test_set_address_keeps_last_known() {
        let mut engine = started_engine();
        engine.set_address(Some("Da'an Xinyi".to_string()));
        // A failed lookup does not erase the last known address.
        engine.set_address(None);
        assert_eq!(engine.address(), Some("Da'an Xinyi"));
    }

    #[tokio::test]
    async fn test_run_consumes_stream_to_completion() {
        let config = Config::default();
        let kv: Arc<dyn KvStore> = Arc::new(MemoryStore::new());
        let resolver =
            LimitResolver::new(config.resolver.clone(), Arc::new(StaticProvider(Some(60))));
        let mut engine = MonitorEngine::new(&config, resolver, kv);

        let (tx, rx) = mpsc::channel(8);
        let feeder = tokio::spawn(async move {
            for _ in 0..3 {
                let sample = GeoSample::at(25.0330, 121.5654).with_speed_mps(40.0 / 3.6);
                tx.send(GeoEvent::Fix(sample)).await.unwrap();
            }
            tx.send(GeoEvent::SignalLost).await.unwrap();
        });

        let outcome = engine.run(rx, &SilentNotifier, None).await.unwrap();
        feeder.await.unwrap();

        assert_eq!(engine.status(), SessionStatus::Stopped);
        // The first fix triggered a pass that landed before shutdown.
        assert_eq!(engine.limit().value_kmh, Some(60));
        // Stationary and short: discarded by the trip filters.
        assert!(outcome.is_none());
    }

    #[tokio::test]
    async fn test_replay_source_emits_events() {
        let dir = std::env::temp_dir().join(format!("speedwatch-replay-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("trace.jsonl");
        let sample = GeoSample::at(25.0330, 121.5654).with_speed_mps(10.0);
        let line = serde_json::to_string(&sample).unwrap();
        std::fs::write(&path, format!("{line}\nnull\nnot json\n{line}\n")).unwrap();

        let (tx, mut rx) = mpsc::channel(8);
        let mut source = ReplaySource::new(&path, false);
        source.run(tx).await.unwrap();

        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        // Malformed line skipped; two fixes and one loss arrive in order.
        assert_eq!(events.len(), 3);
        assert!(matches!(events[0], GeoEvent::Fix(_)));
        assert_eq!(events[1], GeoEvent::SignalLost);
        assert!(matches!(events[2], GeoEvent::Fix(_)));

        std::fs::remove_dir_all(&dir).ok();
    }
}
