//! Core application runner for `ruuvi-trmnl`.
//!
//! This module is decoupled from CLI dispatch, signal handling and process
//! exit codes so it can be tested deterministically with an injected
//! advertisement source and webhook.

use crate::alias::{self, Alias, AliasMap, parse_alias};
use crate::cache::{CacheError, TagCache};
use crate::collector::Collector;
use crate::config::{Config, ConfigError, DEFAULT_CONFIG_FILENAME, check_duration, parse_duration};
use crate::error_log::ErrorLog;
use crate::gate::{Decision, SendGate};
use crate::reading::SensorReading;
use crate::scanner::{AdvertisementSource, ScanError, ScanEvent};
use crate::trmnl::{SendOutcome, Webhook, build_payload};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use std::future::Future;
use std::io;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior, interval_at};

/// Push RuuviTag readings to a TRMNL e-ink display.
#[derive(Parser, Debug, Clone)]
#[command(author, about, version)]
pub struct Options {
    /// Configuration file
    #[arg(short, long, default_value = DEFAULT_CONFIG_FILENAME, value_name = "FILE")]
    pub config: PathBuf,

    /// Name a tag, adding it to the tags that are sent.
    /// Format: --alias a06bd66b=Sauna or --alias DE:AD:BE:EF:00:00=Sauna
    #[arg(long = "alias", value_parser = parse_alias, value_name = "ALIAS")]
    pub aliases: Vec<Alias>,

    /// Verbose output, log debug messages
    #[arg(short = 'v', long = "verbose")]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Listen for tags and push to TRMNL on every refresh (default)
    Run {
        /// Only push when SIGUSR1 is received
        #[arg(long)]
        manual: bool,
    },
    /// Collect readings once, push them and exit
    SendOnce {
        /// How long to wait for the configured tags.
        /// Accepts duration with suffix: 3s, 1m, 500ms, 2h.
        #[arg(long, default_value = "30s", value_parser = parse_timeout)]
        timeout: Duration,
    },
    /// Print the contents of the tag cache
    Inspect,
    /// Send a test payload to the webhook
    Check,
}

fn parse_timeout(src: &str) -> Result<Duration, String> {
    parse_duration(src).and_then(check_duration)
}

impl Options {
    pub fn command(&self) -> Command {
        self.command
            .clone()
            .unwrap_or(Command::Run { manual: false })
    }

    /// Read the configuration file, with `--alias` options applied on top.
    ///
    /// `validate` is false for commands that never talk to TRMNL.
    pub fn load_config(&self, validate: bool) -> Result<Config, ConfigError> {
        let mut config = if validate {
            Config::read(&self.config)?
        } else {
            Config::load(&self.config)?
        };
        alias::merge(&mut config.ruuvi.tags, &self.aliases);
        Ok(config)
    }
}

/// Errors returned by the application.
#[derive(Error, Debug)]
pub enum RunError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Cache(#[from] CacheError),
    #[error(transparent)]
    Scan(#[from] ScanError),
    #[error("HTTP client: {0}")]
    Http(#[from] reqwest::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error("Sending to TRMNL failed: {0}")]
    Send(String),
}

/// Result of one send cycle.
#[derive(Debug, Clone, PartialEq)]
pub enum CycleResult {
    Sent { tags: usize },
    Skipped(Decision),
    Failed(SendOutcome),
}

/// Application state: everything the event loop owns.
pub struct App {
    config: Config,
    ids: Vec<String>,
    aliases: AliasMap,
    cache: TagCache,
    collector: Collector,
    gate: SendGate,
    webhook: Box<dyn Webhook>,
    error_log: ErrorLog,
    sends: u64,
}

impl App {
    pub fn new(config: Config, cache: TagCache, webhook: Box<dyn Webhook>) -> Self {
        let ids = config.ordered_tag_ids();
        let aliases = config.alias_map();
        let gate = SendGate::new(&config, cache.most_recent_sent_time());
        App {
            ids,
            collector: Collector::new(aliases.clone()),
            aliases,
            error_log: ErrorLog::new(&config.ruuvi.error_log_file),
            config,
            cache,
            gate,
            webhook,
            sends: 0,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn cache(&self) -> &TagCache {
        &self.cache
    }

    pub fn collector(&self) -> &Collector {
        &self.collector
    }

    pub fn gate(&self) -> &SendGate {
        &self.gate
    }

    /// Number of successful pushes since startup.
    pub fn sends(&self) -> u64 {
        self.sends
    }

    /// Configured tag ids in display order.
    pub fn tag_ids(&self) -> &[String] {
        &self.ids
    }

    /// Returns `true` if the event changed a cached reading.
    pub fn handle_event(&mut self, event: ScanEvent, now: DateTime<Utc>) -> bool {
        self.collector.handle(event, &mut self.cache, now)
    }

    /// Scheduled send cycle.
    pub async fn tick(&mut self) -> CycleResult {
        self.tick_at(Utc::now()).await
    }

    pub async fn tick_at(&mut self, now: DateTime<Utc>) -> CycleResult {
        let collector_stats = self
            .collector
            .stats(now, self.config.ruuvi.data_retention);
        let cache_stats = self.cache.stats_for(&self.ids);
        log::info!(
            "Data cycle - discovered: {}, configured: {}, pending: {}",
            collector_stats.discovered,
            cache_stats.allowed,
            cache_stats.pending
        );

        if self.ids.is_empty() {
            log::warn!("No tags configured, nothing to send");
            return CycleResult::Skipped(Decision::NoChanges);
        }

        let has_pending = cache_stats.pending > 0;
        match self.gate.decide(now, has_pending) {
            Decision::Send => self.send_at(now).await,
            skipped => {
                log::info!("Skipping TRMNL update: {skipped}");
                CycleResult::Skipped(skipped)
            }
        }
    }

    /// Send now regardless of changes and the send interval.
    ///
    /// A 429 cool-down still applies.
    pub async fn force_send(&mut self) -> CycleResult {
        self.force_send_at(Utc::now()).await
    }

    pub async fn force_send_at(&mut self, now: DateTime<Utc>) -> CycleResult {
        log::info!("Forced send requested");
        match self.gate.decide_forced(now) {
            Decision::Send => self.send_at(now).await,
            refused => {
                log::warn!("Forced send refused: {refused}");
                CycleResult::Skipped(refused)
            }
        }
    }

    async fn send_at(&mut self, now: DateTime<Utc>) -> CycleResult {
        let dataset = self
            .gate
            .build_dataset(&self.cache, &self.ids, &self.aliases, now);
        let payload = build_payload(&dataset, self.config.trmnl.merge_strategy, now);
        log::info!("Sending {} tags to TRMNL", dataset.len());

        let outcome = self.webhook.post(&payload).await;
        self.gate.record(&outcome, now);

        match outcome {
            SendOutcome::Delivered { status } => {
                log::info!("Sent {} tags to TRMNL (HTTP {status})", dataset.len());
                self.cache.mark_sent_at(&self.ids, now);
                self.sends += 1;
                log_summary(&dataset);
                CycleResult::Sent {
                    tags: dataset.len(),
                }
            }
            SendOutcome::RateLimited => {
                self.error_log
                    .record("Rate limited by TRMNL", outcome.status());
                CycleResult::Failed(outcome)
            }
            SendOutcome::Failed {
                status,
                ref message,
            } => {
                log::error!("Failed to send data to TRMNL: {message}");
                self.error_log.record(message, status);
                CycleResult::Failed(outcome)
            }
        }
    }

    /// Persist the cache.
    pub fn flush(&self) {
        match self.cache.save() {
            Ok(()) => log::debug!("Cache saved"),
            Err(e) => log::error!("Failed to save cache: {e}"),
        }
    }
}

fn log_summary(dataset: &[SensorReading]) {
    for tag in dataset {
        let temperature = tag
            .temperature
            .map_or_else(|| "N/A".to_string(), |t| format!("{t:.1}°C"));
        let humidity = tag
            .humidity
            .map_or_else(|| "N/A".to_string(), |h| format!("{h:.0}%"));
        let battery = tag
            .battery
            .map_or_else(|| "N/A".to_string(), |b| format!("{b:.2}V"));
        log::info!(
            "  {} [{}]: {temperature}, {humidity}, {battery}",
            tag.name,
            tag.status
        );
    }
}

/// Run the event loop until `shutdown` completes.
///
/// - Scan events update the collector and cache.
/// - Each refresh tick runs a send cycle, unless `manual` is set. The first
///   tick fires after the startup delay.
/// - Every message on `force` runs a forced send.
///
/// Forced sends and ticks are served ahead of queued scan events.
///
/// On shutdown the cache is flushed and the app is handed back.
pub async fn run(
    mut app: App,
    source: &dyn AdvertisementSource,
    mut force: mpsc::Receiver<()>,
    shutdown: impl Future<Output = ()>,
    manual: bool,
) -> Result<App, RunError> {
    let mut events = source.start().await?;
    let mut scanning = true;
    let mut forcing = true;

    let refresh = app.config.trmnl.refresh_interval;
    let mut ticker = interval_at(Instant::now() + app.config.ruuvi.startup_delay, refresh);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    if manual {
        log::info!("Manual mode: send with SIGUSR1");
    } else {
        log::info!("Refresh interval: {}s", refresh.as_secs());
    }

    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            biased;
            () = &mut shutdown => {
                log::info!("Shutting down");
                break;
            }
            trigger = force.recv(), if forcing => match trigger {
                Some(()) => {
                    app.force_send().await;
                }
                None => forcing = false,
            },
            _ = ticker.tick(), if !manual => {
                app.tick().await;
            }
            event = events.recv(), if scanning => match event {
                Some(event) => {
                    app.handle_event(event, Utc::now());
                }
                None => {
                    log::warn!("Advertisement stream ended, no new readings will arrive");
                    scanning = false;
                }
            },
        }
    }

    app.flush();
    Ok(app)
}
