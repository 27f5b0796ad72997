//! Turns scan events into per-tag readings and feeds them to the cache.

use crate::alias::{AliasMap, resolve_name};
use crate::cache::TagCache;
use crate::mac_address::MacAddress;
use crate::reading::SensorReading;
use crate::scanner::ScanEvent;
use chrono::{DateTime, TimeDelta, Utc};
use std::collections::HashMap;
use std::time::Duration;

/// Discovery counts for status logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CollectorStats {
    pub discovered: usize,
    pub active: usize,
    pub stale: usize,
}

/// Merges partial advertisements into one reading per device.
#[derive(Debug, Default)]
pub struct Collector {
    aliases: AliasMap,
    readings: HashMap<MacAddress, SensorReading>,
}

impl Collector {
    pub fn new(aliases: AliasMap) -> Self {
        Collector {
            aliases,
            readings: HashMap::new(),
        }
    }

    /// Process one scan event.
    ///
    /// Returns `true` if the event changed the cached reading of a tag.
    pub fn handle(&mut self, event: ScanEvent, cache: &mut TagCache, now: DateTime<Utc>) -> bool {
        match event {
            ScanEvent::Discovered { mac } => {
                self.register(mac, cache, now);
                false
            }
            ScanEvent::Updated { mac, reading } => {
                if reading.is_empty() {
                    return false;
                }
                let current = self.register(mac, cache, now);
                current.merge(&reading, now);
                cache.update(current.clone())
            }
        }
    }

    /// Start tracking `mac` if it is new, continuing from its cached reading
    /// when there is one.
    fn register(
        &mut self,
        mac: MacAddress,
        cache: &TagCache,
        now: DateTime<Utc>,
    ) -> &mut SensorReading {
        let aliases = &self.aliases;
        self.readings.entry(mac).or_insert_with(|| {
            let id = mac.tag_id();
            let name = resolve_name(&id, aliases);
            log::info!("Found RuuviTag: {name} ({id})");
            match cache.get(&id) {
                Some(entry) => SensorReading {
                    name,
                    ..entry.data.clone()
                },
                None => SensorReading::empty(id, name, now),
            }
        })
    }

    /// Whether a device with this tag id was seen since startup.
    pub fn is_seen(&self, id: &str) -> bool {
        self.readings.values().any(|reading| reading.id == id)
    }

    pub fn stats(&self, now: DateTime<Utc>, retention: Duration) -> CollectorStats {
        let retention = TimeDelta::from_std(retention).unwrap_or(TimeDelta::MAX);
        let mut stats = CollectorStats {
            discovered: self.readings.len(),
            ..Default::default()
        };
        for reading in self.readings.values() {
            if now - reading.last_updated > retention {
                stats.stale += 1;
            } else {
                stats.active += 1;
            }
        }
        stats
    }
}
