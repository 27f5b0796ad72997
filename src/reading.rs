//! Per-tag sensor readings.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Freshness of a tag as shown on the display.
///
/// Derived from the age of the last observation each time a dataset is
/// built; the value stored in the cache is only what the collector saw.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TagStatus {
    #[default]
    Active,
    Stale,
    Offline,
}

impl fmt::Display for TagStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TagStatus::Active => write!(f, "active"),
            TagStatus::Stale => write!(f, "stale"),
            TagStatus::Offline => write!(f, "offline"),
        }
    }
}

/// Latest known state of one RuuviTag.
///
/// Units:
/// - Temperature in Celsius
/// - Humidity in percent (0-100)
/// - Pressure in hectopascals
/// - Battery voltage in Volts
/// - Signal strength (RSSI) in dBm
/// - Acceleration in g (standard gravity)
///
/// A `None` measurement has not been observed yet. It is never zero.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SensorReading {
    /// Short tag id, see [`crate::mac_address::MacAddress::tag_id`]
    pub id: String,
    /// Display name
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub humidity: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pressure: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub battery: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signal: Option<i16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub acceleration_x: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub acceleration_y: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub acceleration_z: Option<f64>,
    /// Time of the most recent merged advertisement
    pub last_updated: DateTime<Utc>,
    /// Time of the most recent advertisement that carried a temperature
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_temperature_update: Option<DateTime<Utc>>,
    #[serde(default)]
    pub status: TagStatus,
}

impl SensorReading {
    /// A reading with no measurements yet.
    pub fn empty(id: impl Into<String>, name: impl Into<String>, now: DateTime<Utc>) -> Self {
        SensorReading {
            id: id.into(),
            name: name.into(),
            temperature: None,
            humidity: None,
            pressure: None,
            battery: None,
            signal: None,
            acceleration_x: None,
            acceleration_y: None,
            acceleration_z: None,
            last_updated: now,
            last_temperature_update: None,
            status: TagStatus::Active,
        }
    }

    /// Placeholder for a configured tag that has never been seen.
    pub fn offline(id: impl Into<String>, name: impl Into<String>, now: DateTime<Utc>) -> Self {
        SensorReading {
            status: TagStatus::Offline,
            ..SensorReading::empty(id, name, now)
        }
    }

    /// Merge the fields carried by one advertisement.
    ///
    /// Fields absent from `partial` keep their previous value.
    pub fn merge(&mut self, partial: &PartialReading, now: DateTime<Utc>) {
        self.last_updated = now;
        self.status = TagStatus::Active;

        if let Some(t) = partial.temperature {
            self.temperature = Some(t);
            self.last_temperature_update = Some(now);
        }
        if partial.humidity.is_some() {
            self.humidity = partial.humidity;
        }
        if partial.pressure.is_some() {
            self.pressure = partial.pressure;
        }
        if partial.battery.is_some() {
            self.battery = partial.battery;
        }
        if partial.signal.is_some() {
            self.signal = partial.signal;
        }
        if let Some((x, y, z)) = partial.acceleration {
            self.acceleration_x = Some(x);
            self.acceleration_y = Some(y);
            self.acceleration_z = Some(z);
        }
    }
}

/// The subset of measurements carried by a single advertisement.
///
/// Not every advertisement carries every field: an RSSI change alone
/// produces a reading with only `signal` set.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PartialReading {
    pub temperature: Option<f64>,
    pub humidity: Option<f64>,
    /// Pressure in hectopascals
    pub pressure: Option<f64>,
    /// Battery voltage in Volts
    pub battery: Option<f64>,
    pub signal: Option<i16>,
    /// Acceleration vector (x, y, z) in g
    pub acceleration: Option<(f64, f64, f64)>,
}

impl PartialReading {
    pub fn is_empty(&self) -> bool {
        *self == PartialReading::default()
    }
}
