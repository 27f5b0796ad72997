//! Human-readable dump of the tag cache.

use crate::cache::TagCache;
use crate::config::Config;
use crate::error_log::ErrorLog;
use crate::reading::SensorReading;
use crate::trmnl::format_display_time;
use chrono::Local;
use std::io::{self, Write};

const RECENT_ERRORS: usize = 5;

fn temperature(tag: &SensorReading) -> String {
    tag.temperature
        .map_or_else(|| "N/A".to_string(), |t| format!("{t:.1}"))
}

fn humidity(tag: &SensorReading) -> String {
    tag.humidity
        .map_or_else(|| "N/A".to_string(), |h| format!("{h:.0}"))
}

/// Write the cache report: configured tags, statistics, every cached tag
/// and the tags a send cycle would pick up as changed.
pub fn write_report(config: &Config, cache: &TagCache, out: &mut dyn Write) -> io::Result<()> {
    writeln!(out, "RuuviTRMNL cache inspector")?;
    if let Some(path) = cache.path() {
        writeln!(out, "Cache file: {}", path.display())?;
    }
    writeln!(out)?;

    let tags = cache.all();
    writeln!(out, "Total cached tags: {}", tags.len())?;
    if tags.is_empty() {
        writeln!(out, "No cached data found")?;
        return Ok(());
    }
    writeln!(out)?;

    let ids = config.ordered_tag_ids();
    writeln!(out, "Configured tags:")?;
    for alias in &config.ruuvi.tags {
        writeln!(out, "  - {}: {}", alias.id, alias.name)?;
    }
    writeln!(out)?;

    let stats = cache.stats_for(&ids);
    writeln!(out, "Cache statistics:")?;
    writeln!(out, "  - Total cached tags: {}", stats.total)?;
    writeln!(out, "  - Configured tags in cache: {}", stats.allowed)?;
    writeln!(out, "  - Pending to send: {}", stats.pending)?;
    writeln!(out)?;

    writeln!(out, "All cached tags:")?;
    for tag in &tags {
        let marker = if ids.contains(&tag.id) { "[x]" } else { "[ ]" };
        writeln!(out, "  {marker} {} ({})", tag.name, tag.id)?;
        writeln!(
            out,
            "      {}°C, {}%, last: {}",
            temperature(tag),
            humidity(tag),
            format_display_time(tag.last_updated, &Local)
        )?;
        writeln!(out, "      status: {}", tag.status)?;
    }

    let changed = cache.changed_since(&ids);
    writeln!(out)?;
    writeln!(out, "Tags to be sent next cycle: {}", changed.len())?;
    for tag in &changed {
        writeln!(
            out,
            "  - {}: {}°C, {}%",
            tag.name,
            temperature(tag),
            humidity(tag)
        )?;
    }

    let errors = ErrorLog::new(&config.ruuvi.error_log_file).recent(RECENT_ERRORS);
    if !errors.is_empty() {
        writeln!(out)?;
        writeln!(out, "Recent webhook errors:")?;
        for line in &errors {
            writeln!(out, "  {line}")?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alias::parse_alias;
    use crate::test_utils::{reading, t0, temp_path};

    fn report(config: &Config, cache: &TagCache) -> String {
        let mut out = Vec::<u8>::new();
        write_report(config, cache, &mut out).unwrap();
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn empty_cache() {
        let out = report(&Config::default(), &TagCache::in_memory());
        assert!(out.contains("Total cached tags: 0"));
        assert!(out.contains("No cached data found"));
        assert!(!out.contains("Cache statistics"));
    }

    #[test]
    fn marks_configured_and_pending_tags() {
        let mut config = Config::default();
        config.ruuvi.tags = vec![parse_alias("a06bd66b=Sauna").unwrap()];

        let mut cache = TagCache::in_memory();
        let mut sauna = reading("a06bd66b", t0());
        sauna.name = "Sauna".to_string();
        sauna.temperature = Some(80.26);
        sauna.humidity = Some(10.4);
        cache.update(sauna);
        cache.update(reading("870d8621", t0()));

        let out = report(&config, &cache);
        assert!(out.contains("  - a06bd66b: Sauna"));
        assert!(out.contains("  - Total cached tags: 2"));
        assert!(out.contains("  - Configured tags in cache: 1"));
        assert!(out.contains("  - Pending to send: 1"));
        assert!(out.contains("[x] Sauna (a06bd66b)"));
        assert!(out.contains("[ ] Tag 870d8621 (870d8621)"));
        assert!(out.contains("N/A°C, N/A%"));
        assert!(out.contains("Tags to be sent next cycle: 1"));
        assert!(out.contains("  - Sauna: 80.3°C, 10%"));
    }

    #[test]
    fn recent_errors_are_listed() {
        let mut config = Config::default();
        config.ruuvi.error_log_file = temp_path("inspect-errors.log");
        let log = ErrorLog::new(&config.ruuvi.error_log_file);
        log.record_at("Rate limited by TRMNL", Some(429), t0());
        let mut cache = TagCache::in_memory();
        cache.update(reading("a06bd66b", t0()));

        let out = report(&config, &cache);
        assert!(out.contains("Recent webhook errors:"));
        assert!(out.contains("HTTP 429: Rate limited by TRMNL"));
        let _ = std::fs::remove_file(log.path());
    }

    #[test]
    fn sent_tags_are_not_listed_as_pending() {
        let mut config = Config::default();
        config.ruuvi.tags = vec![parse_alias("a06bd66b=Sauna").unwrap()];
        let mut cache = TagCache::in_memory();
        cache.update(reading("a06bd66b", t0()));
        cache.mark_sent_at(&["a06bd66b"], t0());

        let out = report(&config, &cache);
        assert!(out.contains("Tags to be sent next cycle: 0"));
    }
}
