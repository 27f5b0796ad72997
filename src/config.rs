//! Service configuration, read from a TOML file.
//!
//! Every section and field has a default except the webhook URL, so the
//! smallest useful file is:
//!
//! ```toml
//! [trmnl]
//! webhook_url = "https://usetrmnl.com/api/custom_plugins/..."
//!
//! [ruuvi]
//! tags = ["a06bd66b=Living Room"]
//! ```

use crate::alias::{self, Alias, AliasMap, parse_alias};
use crate::trmnl::MergeStrategy;
use serde::{Deserialize, Deserializer};
use std::fs::read_to_string;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_CONFIG_FILENAME: &str = "ruuvi-trmnl.toml";
const DEFAULT_CACHE_FILENAME: &str = "ruuvi-cache.json";
const DEFAULT_ERROR_LOG_FILENAME: &str = "trmnl-errors.log";
const WEBHOOK_URL_PLACEHOLDER: &str = "YOUR_TRMNL_WEBHOOK_URL_HERE";

const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_secs(5 * 60);
const DEFAULT_MIN_SEND_INTERVAL: Duration = Duration::from_secs(10 * 60);
const DEFAULT_RATE_LIMIT_COOLDOWN: Duration = Duration::from_secs(10 * 60);
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_DATA_RETENTION: Duration = Duration::from_secs(5 * 60);
const DEFAULT_STARTUP_DELAY: Duration = Duration::from_secs(3);

/// Upper bound for every configured duration.
pub const MAX_DURATION: Duration = Duration::from_secs(30 * 24 * 60 * 60);

/// Errors loading or validating the configuration. All are fatal at startup.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Reading {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Parsing {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub trmnl: TrmnlConfig,
    pub ruuvi: RuuviConfig,
}

impl Config {
    /// Read and validate the configuration file.
    pub fn read(path: &Path) -> Result<Config, ConfigError> {
        let config = Config::load(path)?;
        config.validate()?;
        Ok(config)
    }

    /// Read the configuration file without validating it.
    ///
    /// Enough for commands that never talk to TRMNL.
    pub fn load(path: &Path) -> Result<Config, ConfigError> {
        let config_file = read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_owned(),
            source,
        })?;
        toml::from_str(&config_file).map_err(|source| ConfigError::Parse {
            path: path.to_owned(),
            source,
        })
    }

    /// Check the things that cannot have a sensible default.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let url = self.trmnl.webhook_url.trim();
        if url.is_empty() || url.contains(WEBHOOK_URL_PLACEHOLDER) {
            return Err(ConfigError::Invalid(
                "TRMNL webhook URL not configured, set trmnl.webhook_url".into(),
            ));
        }
        reqwest::Url::parse(url)
            .map_err(|e| ConfigError::Invalid(format!("trmnl.webhook_url '{url}': {e}")))?;
        if self.trmnl.refresh_interval.is_zero() {
            return Err(ConfigError::Invalid(
                "trmnl.refresh_interval must be greater than zero".into(),
            ));
        }
        let durations = [
            ("trmnl.refresh_interval", self.trmnl.refresh_interval),
            ("trmnl.min_send_interval", self.trmnl.min_send_interval),
            ("trmnl.rate_limit_cooldown", self.trmnl.rate_limit_cooldown),
            ("trmnl.request_timeout", self.trmnl.request_timeout),
            ("ruuvi.data_retention", self.ruuvi.data_retention),
            ("ruuvi.startup_delay", self.ruuvi.startup_delay),
        ];
        for (name, value) in durations {
            check_duration(value).map_err(|e| ConfigError::Invalid(format!("{name}: {e}")))?;
        }
        Ok(())
    }

    /// Configured tag ids in display order.
    pub fn ordered_tag_ids(&self) -> Vec<String> {
        alias::ordered_ids(&self.ruuvi.tags)
    }

    pub fn alias_map(&self) -> AliasMap {
        alias::to_map(&self.ruuvi.tags)
    }

    /// Display name for any tag id, configured or not.
    pub fn tag_name(&self, id: &str) -> String {
        alias::resolve_name(id, &self.alias_map())
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TrmnlConfig {
    pub webhook_url: String,
    /// How often the send gate is evaluated.
    #[serde(deserialize_with = "de_duration")]
    pub refresh_interval: Duration,
    /// Minimum time between two automatic pushes.
    #[serde(deserialize_with = "de_duration")]
    pub min_send_interval: Duration,
    /// How long to refuse every push after the webhook answered 429.
    #[serde(deserialize_with = "de_duration")]
    pub rate_limit_cooldown: Duration,
    #[serde(deserialize_with = "de_duration")]
    pub request_timeout: Duration,
    pub merge_strategy: MergeStrategy,
}

impl Default for TrmnlConfig {
    fn default() -> TrmnlConfig {
        TrmnlConfig {
            webhook_url: String::new(),
            refresh_interval: DEFAULT_REFRESH_INTERVAL,
            min_send_interval: DEFAULT_MIN_SEND_INTERVAL,
            rate_limit_cooldown: DEFAULT_RATE_LIMIT_COOLDOWN,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            merge_strategy: MergeStrategy::default(),
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RuuviConfig {
    /// Readings older than this are shown as stale.
    #[serde(deserialize_with = "de_duration")]
    pub data_retention: Duration,
    /// Time to listen for advertisements before the first send cycle.
    #[serde(deserialize_with = "de_duration")]
    pub startup_delay: Duration,
    pub cache_file: PathBuf,
    pub error_log_file: PathBuf,
    /// Tags to push, in display order, as `ID=Name`.
    #[serde(deserialize_with = "de_aliases")]
    pub tags: Vec<Alias>,
}

impl Default for RuuviConfig {
    fn default() -> RuuviConfig {
        RuuviConfig {
            data_retention: DEFAULT_DATA_RETENTION,
            startup_delay: DEFAULT_STARTUP_DELAY,
            cache_file: PathBuf::from(DEFAULT_CACHE_FILENAME),
            error_log_file: PathBuf::from(DEFAULT_ERROR_LOG_FILENAME),
            tags: Vec::new(),
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum DurationValue {
    Seconds(u64),
    Text(String),
}

/// Deserialize a duration given either as a number of seconds or as a string
/// accepted by [`parse_duration`].
pub fn de_duration<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
    match DurationValue::deserialize(d)? {
        DurationValue::Seconds(secs) => Ok(Duration::from_secs(secs)),
        DurationValue::Text(text) => parse_duration(&text).map_err(serde::de::Error::custom),
    }
}

fn de_aliases<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<Alias>, D::Error> {
    Vec::<String>::deserialize(d)?
        .iter()
        .map(|entry| parse_alias(entry).map_err(serde::de::Error::custom))
        .collect()
}

/// Reject durations above [`MAX_DURATION`].
pub fn check_duration(duration: Duration) -> Result<Duration, String> {
    if duration > MAX_DURATION {
        return Err(format!(
            "{}s is longer than the maximum of {}s",
            duration.as_secs(),
            MAX_DURATION.as_secs()
        ));
    }
    Ok(duration)
}

/// Parse a duration from a human-readable string.
///
/// Supports the following suffixes:
/// - `s` or no suffix: seconds
/// - `m`: minutes
/// - `h`: hours
/// - `ms`: milliseconds
///
/// # Examples
/// ```
/// use ruuvi_trmnl::config::parse_duration;
/// use std::time::Duration;
///
/// assert_eq!(parse_duration("3s").unwrap(), Duration::from_secs(3));
/// assert_eq!(parse_duration("10m").unwrap(), Duration::from_secs(600));
/// assert_eq!(parse_duration("500ms").unwrap(), Duration::from_millis(500));
/// ```
pub fn parse_duration(src: &str) -> Result<Duration, String> {
    let src = src.trim();

    if src.is_empty() {
        return Err("empty duration string".to_string());
    }

    let (num, unit_secs, unit) = if let Some(num) = src.strip_suffix("ms") {
        let millis: u64 = num
            .trim()
            .parse()
            .map_err(|_| format!("invalid milliseconds: {}", num))?;
        return Ok(Duration::from_millis(millis));
    } else if let Some(num) = src.strip_suffix('h') {
        (num, 3600, "hours")
    } else if let Some(num) = src.strip_suffix('m') {
        (num, 60, "minutes")
    } else if let Some(num) = src.strip_suffix('s') {
        (num, 1, "seconds")
    } else {
        (src, 1, "duration")
    };

    let value: u64 = num
        .trim()
        .parse()
        .map_err(|_| format!("invalid {}: {}", unit, num))?;
    value
        .checked_mul(unit_secs)
        .map(Duration::from_secs)
        .ok_or_else(|| format!("duration too large: {}", src))
}
