//! File-backed cache of the latest reading per tag, with change detection.
//!
//! Each entry keeps a fingerprint of the fields that matter on the display.
//! A tag is pending while it has never been sent or its reading changed
//! after the last send. The whole cache is written to a JSON file whenever
//! tags are marked as sent, and read back once at startup.

use crate::reading::SensorReading;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Version written to the cache file.
pub const CACHE_FORMAT_VERSION: &str = "1.0.0";

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Cache file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("Cache file {path} is not valid: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// One tag's cached reading and send state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry {
    pub data: SensorReading,
    /// Fingerprint of the significant fields, see [`fingerprint`]
    pub hash: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_sent: Option<DateTime<Utc>>,
    /// Last advertisement, including ones that changed nothing
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_seen: Option<DateTime<Utc>>,
}

impl CacheEntry {
    /// Whether this reading still has to be pushed.
    pub fn is_pending(&self) -> bool {
        self.last_sent
            .is_none_or(|sent| sent < self.data.last_updated)
    }
}

/// Counts shown by the inspector and in status logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CacheStats {
    /// Every cached tag
    pub total: usize,
    /// Cached tags that are configured for sending
    pub allowed: usize,
    /// Configured tags with unsent changes
    pub pending: usize,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CacheFileOut<'a> {
    version: &'a str,
    last_updated: DateTime<Utc>,
    cache: &'a BTreeMap<String, CacheEntry>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CacheFileIn {
    #[serde(default)]
    version: Option<String>,
    #[serde(default)]
    cache: BTreeMap<String, CacheEntry>,
}

/// Fingerprint of the fields that decide whether a reading changed.
///
/// Values are quantized first (temperature and humidity to 0.1, pressure and
/// battery to 0.01) so sub-threshold noise does not count as a change. The
/// result is plain text so it stays comparable across restarts.
pub fn fingerprint(reading: &SensorReading) -> String {
    fn quantized(value: Option<f64>, scale: f64) -> String {
        match value.filter(|v| v.is_finite()) {
            Some(v) => ((v * scale).round() as i64).to_string(),
            None => "-".to_string(),
        }
    }

    let signal = reading
        .signal
        .map_or_else(|| "-".to_string(), |s| s.to_string());

    format!(
        "t:{}|h:{}|p:{}|b:{}|s:{}|st:{}",
        quantized(reading.temperature, 10.0),
        quantized(reading.humidity, 10.0),
        quantized(reading.pressure, 100.0),
        quantized(reading.battery, 100.0),
        signal,
        reading.status,
    )
}

/// Latest reading and send state per tag id.
#[derive(Debug, Default)]
pub struct TagCache {
    path: Option<PathBuf>,
    entries: BTreeMap<String, CacheEntry>,
}

impl TagCache {
    /// An empty cache persisted to `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        TagCache {
            path: Some(path.into()),
            entries: BTreeMap::new(),
        }
    }

    /// An empty cache that is never written to disk.
    pub fn in_memory() -> Self {
        TagCache::default()
    }

    /// Load the cache file at `path`.
    ///
    /// A missing file is a cold start and yields an empty cache. Any other
    /// failure is returned.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, CacheError> {
        let path = path.into();
        let contents = match fs::read_to_string(&path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                log::info!("Creating new cache at {}", path.display());
                return Ok(TagCache::new(path));
            }
            Err(source) => return Err(CacheError::Io { path, source }),
        };

        let file: CacheFileIn = match serde_json::from_str(&contents) {
            Ok(file) => file,
            Err(source) => return Err(CacheError::Json { path, source }),
        };
        if let Some(version) = file.version.as_deref()
            && version != CACHE_FORMAT_VERSION
        {
            log::warn!("Cache file version {version}, expected {CACHE_FORMAT_VERSION}");
        }

        log::info!(
            "Loaded {} cached entries from {}",
            file.cache.len(),
            path.display()
        );
        Ok(TagCache {
            path: Some(path),
            entries: file.cache,
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&CacheEntry> {
        self.entries.get(id)
    }

    /// Record a reading. Returns `true` if it differs from the cached one.
    ///
    /// On a change the stored reading and fingerprint are replaced and any
    /// previous `last_sent` is kept. A reading with the same fingerprint
    /// leaves the stored reading alone, so its `last_updated` does not
    /// advance; only the entry's `last_seen` moves.
    pub fn update(&mut self, reading: SensorReading) -> bool {
        let hash = fingerprint(&reading);
        let seen = reading.last_updated;

        if let Some(entry) = self.entries.get_mut(&reading.id)
            && entry.hash == hash
        {
            entry.last_seen = Some(entry.last_seen.map_or(seen, |prev| prev.max(seen)));
            return false;
        }

        let last_sent = self.entries.get(&reading.id).and_then(|entry| entry.last_sent);
        log::debug!("Cache updated for {} ({})", reading.name, reading.id);
        self.entries.insert(
            reading.id.clone(),
            CacheEntry {
                data: reading,
                hash,
                last_sent,
                last_seen: Some(seen),
            },
        );
        true
    }

    /// Pending readings for `ids`, in the order of `ids`.
    pub fn changed_since<S: AsRef<str>>(&self, ids: &[S]) -> Vec<SensorReading> {
        ids.iter()
            .filter_map(|id| self.entries.get(id.as_ref()))
            .filter(|entry| entry.is_pending())
            .map(|entry| entry.data.clone())
            .collect()
    }

    /// Readings for every id in `ids`, in the order of `ids`.
    ///
    /// Ids that were never seen get an offline placeholder named `Tag <id>`.
    pub fn all_for_ids<S: AsRef<str>>(&self, ids: &[S]) -> Vec<SensorReading> {
        self.all_for_ids_at(ids, Utc::now())
    }

    /// Like [`TagCache::all_for_ids`], stamping placeholders with `now`.
    pub fn all_for_ids_at<S: AsRef<str>>(&self, ids: &[S], now: DateTime<Utc>) -> Vec<SensorReading> {
        ids.iter()
            .map(|id| {
                let id = id.as_ref();
                match self.entries.get(id) {
                    Some(entry) => entry.data.clone(),
                    None => SensorReading::offline(id, format!("Tag {id}"), now),
                }
            })
            .collect()
    }

    /// Every cached reading, ordered by id.
    pub fn all(&self) -> Vec<SensorReading> {
        self.entries.values().map(|entry| entry.data.clone()).collect()
    }

    /// Mark `ids` as sent now and persist the cache.
    pub fn mark_sent<S: AsRef<str>>(&mut self, ids: &[S]) {
        self.mark_sent_at(ids, Utc::now());
    }

    /// Mark `ids` as sent at `at` and persist the cache.
    ///
    /// Ids without an entry are ignored. A failed save is logged; the
    /// in-memory state stays authoritative.
    pub fn mark_sent_at<S: AsRef<str>>(&mut self, ids: &[S], at: DateTime<Utc>) {
        for id in ids {
            if let Some(entry) = self.entries.get_mut(id.as_ref()) {
                entry.last_sent = Some(at);
            }
        }

        if let Err(e) = self.save() {
            log::error!("Failed to save cache after marking tags as sent: {e}");
        }
    }

    /// The latest `last_sent` of any entry.
    pub fn most_recent_sent_time(&self) -> Option<DateTime<Utc>> {
        self.entries.values().filter_map(|entry| entry.last_sent).max()
    }

    /// When the tag was last heard from, changed or not.
    pub fn last_seen(&self, id: &str) -> Option<DateTime<Utc>> {
        self.entries.get(id).map(|entry| {
            entry
                .last_seen
                .map_or(entry.data.last_updated, |seen| seen.max(entry.data.last_updated))
        })
    }

    pub fn stats_for<S: AsRef<str>>(&self, ids: &[S]) -> CacheStats {
        let mut stats = CacheStats {
            total: self.entries.len(),
            ..Default::default()
        };
        for entry in ids.iter().filter_map(|id| self.entries.get(id.as_ref())) {
            stats.allowed += 1;
            if entry.is_pending() {
                stats.pending += 1;
            }
        }
        stats
    }

    /// Write the cache file. A cache without a path does nothing.
    pub fn save(&self) -> Result<(), CacheError> {
        let Some(path) = self.path.as_deref() else {
            return Ok(());
        };

        let file = CacheFileOut {
            version: CACHE_FORMAT_VERSION,
            last_updated: Utc::now(),
            cache: &self.entries,
        };
        let json = serde_json::to_string_pretty(&file).map_err(|source| CacheError::Json {
            path: path.to_owned(),
            source,
        })?;

        // Write next to the target and rename so a crash never leaves half a file.
        let mut tmp = path.as_os_str().to_owned();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);
        fs::write(&tmp, json)
            .and_then(|()| fs::rename(&tmp, path))
            .map_err(|source| CacheError::Io {
                path: path.to_owned(),
                source,
            })
    }

    /// Drop every entry and persist the empty cache.
    pub fn clear(&mut self) {
        self.entries.clear();
        if let Err(e) = self.save() {
            log::error!("Failed to save cleared cache: {e}");
        }
    }
}
