use crate::mac_address::MacAddress;
use crate::reading::SensorReading;
use chrono::{DateTime, TimeZone, Utc};
use std::path::PathBuf;

/// A stable MAC address for unit tests. Its tag id is `aabbccdd`.
pub const TEST_MAC: MacAddress = MacAddress([0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF]);

/// A fixed point in time tests measure from.
pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 1, 15, 12, 0, 0).unwrap()
}

/// Build an active `SensorReading` named `Tag <id>` with no measurements.
///
/// Tests can override just the fields they care about.
pub fn reading(id: &str, last_updated: DateTime<Utc>) -> SensorReading {
    SensorReading::empty(id, format!("Tag {id}"), last_updated)
}

/// A path in the system temp directory that does not exist yet.
pub fn temp_path(name: &str) -> PathBuf {
    let path = std::env::temp_dir().join(format!("ruuvi-trmnl-{}-{name}", std::process::id()));
    let _ = std::fs::remove_file(&path);
    path
}
