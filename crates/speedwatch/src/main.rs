//! `spedw` - CLI for speedwatch
//!
//! This binary provides the command-line interface for running monitoring
//! sessions and managing the stored correction, trip, and note data.

#![warn(missing_debug_implementations)]
#![deny(unsafe_code)]

use std::sync::Arc;

use clap::Parser;
use tokio::sync::mpsc;

use speedwatch::cli::{
    Cli, Command, ConfigCommand, MonitorCommand, OutputFormat, OverridesCommand,
    PublishedCommand, TripsCommand,
};
use speedwatch::monitor::{GeoSampleSource, MonitorEngine, ReplaySource};
use speedwatch::overrides::{OverrideStore, PublishedLog, PublishedNote};
use speedwatch::remote::{NotePublisher, OverpassMirrors, ReverseGeocoder};
use speedwatch::resolver::LimitResolver;
use speedwatch::storage::{KvStore, SqliteStore};
use speedwatch::trip::TripLog;
use speedwatch::{init_logging, Config, LogNotifier};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging based on verbosity
    init_logging(cli.verbosity());

    // Load configuration
    let config = Config::load_from(cli.config.clone())?;

    // Execute the command
    match cli.command {
        Command::Monitor(cmd) => handle_monitor(&config, cmd).await,
        Command::Overrides(cmd) => handle_overrides(&config, cmd).await,
        Command::Trips(cmd) => handle_trips(&config, cmd),
        Command::Published(cmd) => handle_published(&config, cmd),
        Command::Status(cmd) => handle_status(&config, cmd.json),
        Command::Config(cmd) => handle_config(&config, cmd),
    }
}

fn open_store(config: &Config) -> anyhow::Result<Arc<SqliteStore>> {
    Ok(Arc::new(SqliteStore::open(config.database_path())?))
}

async fn handle_monitor(
    config: &Config,
    cmd: MonitorCommand,
) -> anyhow::Result<()> {
    let store = open_store(config)?;
    let provider = Arc::new(OverpassMirrors::new(&config.resolver));
    let resolver = LimitResolver::new(config.resolver.clone(), provider);
    let geocoder = ReverseGeocoder::new(&config.geocode);
    let mut engine = MonitorEngine::new(config, resolver, store);

    let mut source = ReplaySource::new(&cmd.replay, !cmd.no_pace);
    let (tx, rx) = mpsc::channel(32);
    let source_task = tokio::spawn(async move { source.run(tx).await });

    println!("Monitoring from {}...", cmd.replay.display());
    let trip = engine.run(rx, &LogNotifier, Some(geocoder)).await?;
    source_task.await??;

    println!("Session ended: {} fixes processed.", engine.fix_count());
    if let Some(limit) = engine.limit().value_kmh {
        println!("Last limit:    {} km/h ({})", limit, engine.limit().source);
    }
    match trip {
        Some(trip) => println!(
            "Trip logged:   {:.2} km in {} s, max {:.0} km/h",
            trip.distance_km,
            trip.duration_secs(),
            trip.max_speed_kmh
        ),
        None => println!("Trip too short to log."),
    }
    Ok(())
}

async fn handle_overrides(
    config: &Config,
    cmd: OverridesCommand,
) -> anyhow::Result<()> {
    let store = open_store(config)?;
    let kv: &dyn KvStore = store.as_ref();
    let mut overrides = OverrideStore::load(kv, config.storage.max_overrides);

    match cmd {
        OverridesCommand::List { format } => {
            if overrides.is_empty() {
                println!("No remembered corrections.");
                return Ok(());
            }
            match format {
                OutputFormat::Json => {
                    println!("{}", serde_json::to_string_pretty(overrides.records())?);
                }
                OutputFormat::Plain | OutputFormat::Table => {
                    println!(
                        "{:>3}  {:>10}  {:>11}  {:>6}  {}",
                        "#", "lat", "lon", "limit", "address"
                    );
                    for (i, r) in overrides.records().iter().enumerate() {
                        let limit = r
                            .limit
                            .map_or_else(|| "?".to_string(), |v| v.to_string());
                        println!(
                            "{i:>3}  {:>10.4}  {:>11.4}  {limit:>6}  {}",
                            r.latitude, r.longitude, r.address
                        );
                    }
                }
            }
        }
        OverridesCommand::Set { index, limit } => {
            if overrides.set_limit(index, limit) {
                overrides.persist(kv)?;
                println!("Record {index} set to {limit} km/h.");
            } else {
                println!("No record at index {index}.");
            }
        }
        OverridesCommand::Mark {
            latitude,
            longitude,
            address,
        } => {
            overrides.upsert(latitude, longitude, None, &address);
            overrides.persist(kv)?;
            println!("Marked {latitude:.4}, {longitude:.4} for review.");
        }
        OverridesCommand::Remove { index } => match overrides.remove(index) {
            Some(record) => {
                overrides.persist(kv)?;
                println!("Removed record at {}.", record.address);
            }
            None => println!("No record at index {index}."),
        },
        OverridesCommand::Clear { yes } => {
            if yes {
                overrides.clear();
                overrides.persist(kv)?;
                println!("All corrections removed.");
            } else {
                println!("This will remove all remembered corrections.");
                println!("Use --yes to confirm.");
            }
        }
        OverridesCommand::Publish { index } => {
            let Some(record) = overrides.records().get(index).cloned() else {
                println!("No record at index {index}.");
                return Ok(());
            };

            let text = match record.limit {
                Some(limit) => format!(
                    "Speed limit here is {limit} km/h based on local observation. {}",
                    record.address
                ),
                None => format!(
                    "Speed limit missing or incorrect in map data. {}",
                    record.address
                ),
            };

            let publisher = NotePublisher::new(&config.publish);
            let note_id = publisher
                .publish(record.latitude, record.longitude, &text)
                .await?;

            // Success moves the record into the filed-note history.
            let mut published = PublishedLog::load(kv, config.storage.max_published);
            published.push(PublishedNote {
                latitude: record.latitude,
                longitude: record.longitude,
                limit: record.limit,
                address: record.address,
                note_id,
                published_at: chrono::Utc::now(),
            });
            published.persist(kv)?;

            overrides.remove(index);
            overrides.persist(kv)?;
            println!("Filed note {note_id}.");
        }
    }
    Ok(())
}

fn handle_trips(config: &Config, cmd: TripsCommand) -> anyhow::Result<()> {
    let store = open_store(config)?;
    let kv: &dyn KvStore = store.as_ref();
    let mut trips = TripLog::load(kv, config.storage.max_trips);

    match cmd {
        TripsCommand::List { format } => {
            if trips.is_empty() {
                println!("No trips logged.");
                return Ok(());
            }
            match format {
                OutputFormat::Json => {
                    println!("{}", serde_json::to_string_pretty(trips.records())?);
                }
                OutputFormat::Plain | OutputFormat::Table => {
                    println!(
                        "{:>3}  {:<20}  {:>9}  {:>9}  {:>9}",
                        "#", "started", "km", "max km/h", "avg km/h"
                    );
                    for (i, t) in trips.records().iter().enumerate() {
                        println!(
                            "{i:>3}  {:<20}  {:>9.2}  {:>9.0}  {:>9.1}",
                            t.started_at.format("%Y-%m-%d %H:%M:%S"),
                            t.distance_km,
                            t.max_speed_kmh,
                            t.average_speed_kmh()
                        );
                    }
                }
            }
        }
        TripsCommand::Export { index, output } => {
            let Some(trip) = trips.records().get(index) else {
                println!("No trip at index {index}.");
                return Ok(());
            };
            let gpx = trip.to_gpx();
            match output {
                Some(path) => {
                    std::fs::write(&path, gpx)?;
                    println!("Exported trip {index} to {}.", path.display());
                }
                None => print!("{gpx}"),
            }
        }
        TripsCommand::Delete { index } => match trips.remove(index) {
            Some(_) => {
                trips.persist(kv)?;
                println!("Deleted trip {index}.");
            }
            None => println!("No trip at index {index}."),
        },
        TripsCommand::Clear { yes } => {
            if yes {
                trips.clear();
                trips.persist(kv)?;
                println!("All trips deleted.");
            } else {
                println!("This will delete all logged trips.");
                println!("Use --yes to confirm.");
            }
        }
    }
    Ok(())
}

fn handle_published(
    config: &Config,
    cmd: PublishedCommand,
) -> anyhow::Result<()> {
    let store = open_store(config)?;
    let kv: &dyn KvStore = store.as_ref();
    let mut published = PublishedLog::load(kv, config.storage.max_published);

    match cmd {
        PublishedCommand::List { format } => {
            if published.is_empty() {
                println!("No notes filed.");
                return Ok(());
            }
            match format {
                OutputFormat::Json => {
                    println!("{}", serde_json::to_string_pretty(published.records())?);
                }
                OutputFormat::Plain | OutputFormat::Table => {
                    println!(
                        "{:>3}  {:>9}  {:>6}  {:<20}  {}",
                        "#", "note", "limit", "filed", "address"
                    );
                    for (i, n) in published.records().iter().enumerate() {
                        let limit = n
                            .limit
                            .map_or_else(|| "?".to_string(), |v| v.to_string());
                        println!(
                            "{i:>3}  {:>9}  {limit:>6}  {:<20}  {}",
                            n.note_id,
                            n.published_at.format("%Y-%m-%d %H:%M:%S"),
                            n.address
                        );
                    }
                }
            }
        }
        PublishedCommand::Clear { yes } => {
            if yes {
                published.clear();
                published.persist(kv)?;
                println!("Filed-note history cleared.");
            } else {
                println!("This will clear the filed-note history.");
                println!("Use --yes to confirm.");
            }
        }
    }
    Ok(())
}

fn handle_status(config: &Config, json: bool) -> anyhow::Result<()> {
    let store = open_store(config)?;
    let kv: &dyn KvStore = store.as_ref();
    let overrides = OverrideStore::load(kv, config.storage.max_overrides);
    let trips = TripLog::load(kv, config.storage.max_trips);
    let published = PublishedLog::load(kv, config.storage.max_published);
    let pending = overrides.records().iter().filter(|r| r.is_pending()).count();

    if json {
        let status = serde_json::json!({
            "database_path": config.database_path(),
            "overrides": overrides.len(),
            "overrides_pending_review": pending,
            "trips": trips.len(),
            "published_notes": published.len(),
        });
        println!("{}", serde_json::to_string_pretty(&status)?);
    } else {
        println!("spedw status");
        println!("------------");
        println!("Database:       {}", config.database_path().display());
        println!("Corrections:    {} ({pending} pending review)", overrides.len());
        println!("Trips:          {}", trips.len());
        println!("Filed notes:    {}", published.len());
    }
    Ok(())
}

fn handle_config(config: &Config, cmd: ConfigCommand) -> anyhow::Result<()> {
    match cmd {
        ConfigCommand::Show { json } => {
            if json {
                println!("{}", serde_json::to_string_pretty(config)?);
            } else {
                println!("Current Configuration");
                println!("=====================");
                println!();
                println!("[Alert]");
                println!("  Tolerance:          {} km/h", config.alert.tolerance_kmh);
                println!(
                    "  Pre-warning buffer: {} km/h",
                    config.alert.pre_warning_buffer_kmh
                );
                println!("  Danger cooldown:    {} ms", config.alert.danger_cooldown_ms);
                println!("  Warning cooldown:   {} ms", config.alert.warning_cooldown_ms);
                println!();
                println!("[Resolver]");
                println!("  Mirrors:            {}", config.resolver.mirrors.len());
                println!("  Mirror timeout:     {} ms", config.resolver.mirror_timeout_ms);
                println!("  Search radius:      {} m", config.resolver.search_radius_m);
                println!(
                    "  Check interval:     {} s",
                    config.resolver.check_interval_secs
                );
                println!("  Default limit:      {} km/h", config.resolver.default_limit_kmh);
                println!("  Auto resolve:       {}", config.resolver.auto_resolve);
                println!("  Auto-log missing:   {}", config.resolver.auto_log_missing);
                println!();
                println!("[Storage]");
                println!("  Database path:      {}", config.database_path().display());
                println!("  Max corrections:    {}", config.storage.max_overrides);
                println!("  Max trips:          {}", config.storage.max_trips);
                println!("  Max filed notes:    {}", config.storage.max_published);
            }
        }
        ConfigCommand::Path => {
            println!("{}", Config::default_config_path().display());
        }
        ConfigCommand::Validate { file } => {
            let path = file.unwrap_or_else(Config::default_config_path);
            println!("Validating configuration: {}", path.display());
            match Config::load_from(Some(path)) {
                Ok(_) => println!("Configuration is valid."),
                Err(e) => println!("Configuration error: {e}"),
            }
        }
    }
    Ok(())
}
