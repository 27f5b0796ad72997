//! Append-only log of failed webhook pushes.
//!
//! Kept separate from the process log so failures can be reviewed after the
//! fact without raising the log level.

use chrono::{DateTime, SecondsFormat, Utc};
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct ErrorLog {
    path: PathBuf,
}

impl ErrorLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        ErrorLog { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one failure. Write errors are logged and otherwise ignored.
    pub fn record(&self, message: &str, status: Option<u16>) {
        self.record_at(message, status, Utc::now());
    }

    pub fn record_at(&self, message: &str, status: Option<u16>, at: DateTime<Utc>) {
        let line = format_entry(message, status, at);
        if let Err(e) = self.append(&line) {
            log::error!("Failed to write to error log {}: {e}", self.path.display());
        }
    }

    fn append(&self, line: &str) -> io::Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        writeln!(file, "{line}")
    }

    /// The last `max_lines` entries, oldest first. A missing file has none.
    pub fn recent(&self, max_lines: usize) -> Vec<String> {
        let Ok(content) = fs::read_to_string(&self.path) else {
            return Vec::new();
        };
        let lines: Vec<&str> = content.lines().filter(|line| !line.is_empty()).collect();
        let skip = lines.len().saturating_sub(max_lines);
        lines[skip..].iter().map(|line| line.to_string()).collect()
    }
}

fn format_entry(message: &str, status: Option<u16>, at: DateTime<Utc>) -> String {
    let timestamp = at.to_rfc3339_opts(SecondsFormat::Millis, true);
    match status {
        Some(code) => format!("[{timestamp}] HTTP {code}: {message}"),
        None => format!("[{timestamp}] {message}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{t0, temp_path};

    #[test]
    fn entry_format() {
        assert_eq!(
            format_entry("Rate limited", Some(429), t0()),
            "[2025-01-15T12:00:00.000Z] HTTP 429: Rate limited"
        );
        assert_eq!(
            format_entry("connection refused", None, t0()),
            "[2025-01-15T12:00:00.000Z] connection refused"
        );
    }

    #[test]
    fn recent_returns_the_tail() {
        let log = ErrorLog::new(temp_path("errors-tail.log"));
        for i in 0..5 {
            log.record_at(&format!("failure {i}"), Some(500), t0());
        }

        let recent = log.recent(2);
        assert_eq!(recent.len(), 2);
        assert!(recent[0].ends_with("failure 3"));
        assert!(recent[1].ends_with("failure 4"));
        assert_eq!(log.recent(10).len(), 5);

        let _ = fs::remove_file(log.path());
    }

    #[test]
    fn missing_file_has_no_entries() {
        let log = ErrorLog::new(temp_path("errors-missing.log"));
        assert!(log.recent(10).is_empty());
    }

    #[test]
    fn unwritable_path_is_not_fatal() {
        let log = ErrorLog::new(temp_path("no-such-dir").join("errors.log"));
        log.record("lost", None);
        assert!(log.recent(1).is_empty());
    }
}
