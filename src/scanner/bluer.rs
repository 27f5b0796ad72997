//! BlueZ D-Bus backend for RuuviTag scanning.
//!
//! This backend uses the `bluer` crate to communicate with the BlueZ daemon
//! via D-Bus. It requires the `bluetoothd` daemon to be running.
//!
//! An advertisement monitor reports each RuuviTag once; after that the
//! device's property-change stream delivers new manufacturer data and RSSI.

use super::{
    DecodeError, EVENT_CHANNEL_BUFFER_SIZE, MANUFACTURER_DATA_TYPE, RUUVI_MANUFACTURER_ID,
    RUUVI_MANUFACTURER_ID_BYTES, ScanError, ScanEvent, decode_ruuvi_data,
};
use crate::reading::PartialReading;
use bluer::monitor::{Monitor, MonitorEvent, Pattern};
use bluer::{Adapter, Address, DeviceEvent, DeviceProperty, Session};
use futures::stream::SelectAll;
use futures::{Stream, StreamExt};
use std::collections::{HashMap, HashSet};
use std::pin::Pin;
use tokio::sync::mpsc;

impl From<bluer::Error> for ScanError {
    fn from(err: bluer::Error) -> Self {
        ScanError::Bluetooth(err.to_string())
    }
}

type DeviceEvents = Pin<Box<dyn Stream<Item = (Address, DeviceEvent)> + Send>>;

/// Start scanning for RuuviTag devices using the BlueZ D-Bus backend.
///
/// Initializes the default adapter and registers a passive advertisement
/// monitor for Ruuvi manufacturer data. Events are sent through the
/// returned channel until the receiver is dropped.
pub async fn start_scan() -> Result<mpsc::Receiver<ScanEvent>, ScanError> {
    let session = Session::new().await?;
    let adapter = session.default_adapter().await?;
    adapter.set_powered(true).await?;
    log::info!("Using Bluetooth adapter {}", adapter.name());

    let (tx, rx) = mpsc::channel(EVENT_CHANNEL_BUFFER_SIZE);

    let pattern = Pattern {
        data_type: MANUFACTURER_DATA_TYPE,
        start_position: 0,
        content: RUUVI_MANUFACTURER_ID_BYTES.to_vec(),
    };

    let monitor_manager = adapter.monitor().await?;
    let mut monitor_handle = monitor_manager
        .register(Monitor {
            patterns: Some(vec![pattern]),
            ..Default::default()
        })
        .await?;

    // The task owns all Bluetooth state for the lifetime of the scan.
    tokio::spawn(async move {
        let _session = session;
        let _monitor_manager = monitor_manager;

        let mut known: HashSet<Address> = HashSet::new();
        let mut device_events: SelectAll<DeviceEvents> = SelectAll::new();

        loop {
            tokio::select! {
                Some(event) = monitor_handle.next() => {
                    let MonitorEvent::DeviceFound(device_id) = event else {
                        continue;
                    };
                    let address = device_id.device;
                    if known.insert(address) {
                        if tx.send(ScanEvent::Discovered { mac: address.into() }).await.is_err() {
                            break;
                        }
                        match subscribe(&adapter, address).await {
                            Ok(events) => device_events.push(events),
                            Err(e) => log::warn!("Cannot watch {address}: {e}"),
                        }
                    }
                    if let Err(e) = read_device(&adapter, address, &tx).await {
                        log::debug!("Reading {address} failed: {e}");
                    }
                }
                Some((address, event)) = device_events.next() => {
                    #[allow(irrefutable_let_patterns)]
                    let DeviceEvent::PropertyChanged(property) = event else {
                        continue;
                    };
                    let reading = match property {
                        DeviceProperty::ManufacturerData(data) => {
                            match ruuvi_reading(&data) {
                                Some(Ok(reading)) => reading,
                                Some(Err(e)) => {
                                    log::debug!("{address}: {e}");
                                    continue;
                                }
                                None => continue,
                            }
                        }
                        DeviceProperty::Rssi(rssi) => PartialReading {
                            signal: Some(rssi),
                            ..Default::default()
                        },
                        _ => continue,
                    };
                    if tx.send(ScanEvent::Updated { mac: address.into(), reading }).await.is_err() {
                        break;
                    }
                }
                else => break,
            }
        }
        log::debug!("BlueZ scan task finished");
    });

    Ok(rx)
}

async fn subscribe(adapter: &Adapter, address: Address) -> Result<DeviceEvents, ScanError> {
    let device = adapter.device(address)?;
    let events = device.events().await?;
    Ok(Box::pin(events.map(move |event| (address, event))))
}

/// Read the current advertisement of a device and forward it as an update.
async fn read_device(
    adapter: &Adapter,
    address: Address,
    tx: &mpsc::Sender<ScanEvent>,
) -> Result<(), ScanError> {
    let device = adapter.device(address)?;

    let Some(manufacturer_data) = device.manufacturer_data().await? else {
        return Ok(());
    };

    let mut reading = match ruuvi_reading(&manufacturer_data) {
        Some(result) => result?,
        None => return Ok(()),
    };
    reading.signal = device.rssi().await?;

    let _ = tx
        .send(ScanEvent::Updated {
            mac: address.into(),
            reading,
        })
        .await;
    Ok(())
}

fn ruuvi_reading(data: &HashMap<u16, Vec<u8>>) -> Option<Result<PartialReading, DecodeError>> {
    data.get(&RUUVI_MANUFACTURER_ID)
        .map(|payload| decode_ruuvi_data(payload))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mac_address::MacAddress;

    #[test]
    fn test_address_to_mac_address() {
        let addr = Address([0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF]);
        let mac: MacAddress = addr.into();
        assert_eq!(mac.tag_id(), "aabbccdd");
    }

    #[test]
    fn test_ruuvi_reading_ignores_other_manufacturers() {
        let mut data = HashMap::new();
        data.insert(0x004C_u16, vec![0x02, 0x15]);
        assert!(ruuvi_reading(&data).is_none());
    }

    #[test]
    fn test_ruuvi_reading_reports_decode_errors() {
        let mut data = HashMap::new();
        data.insert(RUUVI_MANUFACTURER_ID, vec![0x03, 0x00]);
        assert!(matches!(
            ruuvi_reading(&data),
            Some(Err(DecodeError::UnsupportedFormat(_)))
        ));
    }
}
