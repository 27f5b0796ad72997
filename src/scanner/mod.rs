//! BLE advertisement sources for RuuviTag devices.
//!
//! The rest of the crate only needs two things from Bluetooth: a stable
//! per-device identifier and a best-effort stream of partial readings. That
//! is the [`AdvertisementSource`] capability; the BlueZ backend implements it
//! and tests substitute their own.

#[cfg(feature = "bluer")]
pub mod bluer;

use crate::mac_address::MacAddress;
use crate::reading::PartialReading;
use ruuvi_decoders::{v5, v6};
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;
use tokio::sync::mpsc;

/// Error types for decoding RuuviTag data.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DecodeError {
    /// Unsupported RuuviTag data format (only V5 and V6 are decoded)
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),
    /// Invalid or corrupted data that cannot be decoded
    #[error("Invalid data: {0}")]
    InvalidData(String),
    /// Decoder library returned an error
    #[error("Decoder error: {0}")]
    DecoderError(String),
}

/// Error type for scanner operations.
#[derive(Error, Debug)]
pub enum ScanError {
    /// Bluetooth/adapter related error
    #[error("Bluetooth error: {0}")]
    Bluetooth(String),
    /// Data decoding error
    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),
    /// No backend compiled in
    #[allow(dead_code)]
    #[error("Backend '{0}' not available (not compiled in)")]
    BackendNotAvailable(String),
}

/// Something a scanner observed.
#[derive(Debug, Clone, PartialEq)]
pub enum ScanEvent {
    /// A RuuviTag was seen for the first time this session.
    Discovered { mac: MacAddress },
    /// A RuuviTag advertised some of its measurements.
    Updated {
        mac: MacAddress,
        reading: PartialReading,
    },
}

impl ScanEvent {
    pub fn mac(&self) -> MacAddress {
        match self {
            ScanEvent::Discovered { mac } | ScanEvent::Updated { mac, .. } => *mac,
        }
    }
}

/// Ruuvi Innovations manufacturer ID (little-endian bytes for pattern matching).
///
/// Bluetooth LE advertisements use little-endian byte order for manufacturer IDs.
/// See: https://github.com/ruuvi/ruuvi-sensor-protocols
#[cfg(feature = "bluer")]
pub const RUUVI_MANUFACTURER_ID_BYTES: [u8; 2] = [0x99, 0x04];

/// Ruuvi Innovations manufacturer ID for data lookup.
pub const RUUVI_MANUFACTURER_ID: u16 = 0x0499;

/// Bluetooth manufacturer-specific data type (AD type 0xFF)
#[cfg(feature = "bluer")]
pub const MANUFACTURER_DATA_TYPE: u8 = 0xff;

/// Channel buffer size for scan events.
pub const EVENT_CHANNEL_BUFFER_SIZE: usize = 100;

/// Source of RuuviTag discovery and update events.
///
/// Implementations start listening when `start` is called and keep sending
/// events until the receiver is dropped.
pub trait AdvertisementSource: Send + Sync {
    fn start(
        &self,
    ) -> Pin<Box<dyn Future<Output = Result<mpsc::Receiver<ScanEvent>, ScanError>> + Send + '_>>;
}

/// Source backed by the compiled-in Bluetooth backend.
#[derive(Debug, Default, Clone, Copy)]
pub struct BluetoothSource;

impl AdvertisementSource for BluetoothSource {
    fn start(
        &self,
    ) -> Pin<Box<dyn Future<Output = Result<mpsc::Receiver<ScanEvent>, ScanError>> + Send + '_>>
    {
        Box::pin(async move {
            #[cfg(feature = "bluer")]
            return bluer::start_scan().await;
            #[cfg(not(feature = "bluer"))]
            return Err(ScanError::BackendNotAvailable("bluer".into()));
        })
    }
}

/// Decode manufacturer data from a RuuviTag into a partial reading.
///
/// `data` is the manufacturer-specific payload without the company ID prefix.
/// Supports RuuviTag V5 and V6 formats.
///
/// # Unit Conversions
/// - Pressure: Pascals → hectopascals
/// - Battery voltage: millivolts → Volts
/// - Acceleration: milli-g → g
pub fn decode_ruuvi_data(data: &[u8]) -> Result<PartialReading, DecodeError> {
    if data.is_empty() {
        return Err(DecodeError::InvalidData("Empty data".into()));
    }

    match data[0] {
        5 => decode_v5(data),
        6 => decode_v6(data),
        _ => Err(DecodeError::UnsupportedFormat(format!(
            "RuuviTag data format {} (only V5 and V6 supported)",
            data[0]
        ))),
    }
}

fn decode_v5(data: &[u8]) -> Result<PartialReading, DecodeError> {
    let tag = v5::decode(data).map_err(|e| {
        DecodeError::DecoderError(format!("Failed to decode RuuviTag data: {e:?}"))
    })?;

    let acceleration = match (tag.acceleration_x, tag.acceleration_y, tag.acceleration_z) {
        (Some(x), Some(y), Some(z)) => Some((
            f64::from(x) / 1000.0,
            f64::from(y) / 1000.0,
            f64::from(z) / 1000.0,
        )),
        _ => None,
    };

    Ok(PartialReading {
        temperature: tag.temperature,
        humidity: tag.humidity,
        pressure: tag.pressure.map(|pa| pa / 100.0),
        battery: tag.battery_voltage.map(|mv| f64::from(mv) / 1000.0),
        signal: None,
        acceleration,
    })
}

fn decode_v6(data: &[u8]) -> Result<PartialReading, DecodeError> {
    let tag = v6::decode(data).map_err(|e| {
        DecodeError::DecoderError(format!("Failed to decode RuuviTag data: {e:?}"))
    })?;

    // The V6 decoder already reports hPa.
    Ok(PartialReading {
        temperature: tag.temperature,
        humidity: tag.humidity,
        pressure: tag.pressure,
        ..Default::default()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::TEST_MAC;

    fn v5_payload() -> Vec<u8> {
        vec![
            0x05, // Format 5
            0x12, 0xFC, // Temperature: 24.30°C (0x12FC = 4860, 4860 * 0.005 = 24.30)
            0x53, 0x94, // Humidity: 53.49% (0x5394 = 21396, 21396 * 0.0025 = 53.49)
            0xC3, 0x7C, // Pressure: 100044 Pa (0xC37C = 50044, 50044 + 50000 = 100044)
            0x00, 0x04, // Acceleration X: 4 mG
            0xFF, 0xFC, // Acceleration Y: -4 mG
            0x04, 0x0C, // Acceleration Z: 1036 mG
            0xAC, 0x36, // Battery: 2977 mV, TX Power: 4 dBm
            0x42, // Movement counter: 66
            0x00, 0xCD, // Sequence: 205
            0xCB, 0xB8, 0x33, 0x4C, 0x88, 0x4F, // MAC address (ignored in decode)
        ]
    }

    fn v6_payload() -> Vec<u8> {
        vec![
            0x06, 0x17, 0x0C, 0x56, 0x68, 0xC7, 0x9E, 0x00, 0x70, 0x00, 0xC9, 0x05, 0x01, 0xD9,
            0xFF, 0xCD, 0x00, 0x4C, 0x88, 0x4F,
        ]
    }

    #[test]
    fn test_decode_v5_converts_units() {
        let reading = decode_ruuvi_data(&v5_payload()).unwrap();
        assert!((reading.temperature.unwrap() - 24.30).abs() < 0.01);
        assert!((reading.humidity.unwrap() - 53.49).abs() < 0.01);
        assert!((reading.pressure.unwrap() - 1000.44).abs() < 0.01);
        assert!((reading.battery.unwrap() - 2.977).abs() < 0.001);
        let (x, _y, z) = reading.acceleration.unwrap();
        assert!((x - 0.004).abs() < 0.001);
        assert!((z - 1.036).abs() < 0.001);
        assert!(reading.signal.is_none());
    }

    #[test]
    fn test_decode_v6_has_no_battery_or_acceleration() {
        let reading = decode_ruuvi_data(&v6_payload()).unwrap();
        assert!(reading.temperature.is_some());
        assert!(reading.humidity.is_some());
        assert!(reading.pressure.is_some());
        assert!(reading.battery.is_none());
        assert!(reading.acceleration.is_none());
    }

    #[test]
    fn test_decode_rejects_empty_and_unknown_formats() {
        assert_eq!(
            decode_ruuvi_data(&[]),
            Err(DecodeError::InvalidData("Empty data".into()))
        );
        assert!(matches!(
            decode_ruuvi_data(&[0x03, 0x01, 0x02]),
            Err(DecodeError::UnsupportedFormat(_))
        ));
    }

    #[test]
    fn test_scan_error_display() {
        let err = ScanError::Decode(DecodeError::InvalidData("test error".to_string()));
        assert_eq!(format!("{}", err), "Decode error: Invalid data: test error");
    }

    #[test]
    fn test_scan_event_mac() {
        let found = ScanEvent::Discovered { mac: TEST_MAC };
        let updated = ScanEvent::Updated {
            mac: TEST_MAC,
            reading: PartialReading::default(),
        };
        assert_eq!(found.mac(), TEST_MAC);
        assert_eq!(updated.mac(), TEST_MAC);
    }
}
