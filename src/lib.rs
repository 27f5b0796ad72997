//! `ruuvi-trmnl` library.
//!
//! The binary (`src/main.rs`) is responsible for CLI dispatch, signals and
//! process exit codes. The core logic lives in [`crate::app`] where it can be
//! tested deterministically with an injected advertisement source and webhook.

pub mod alias;
pub mod app;
pub mod cache;
pub mod collector;
pub mod config;
pub mod error_log;
pub mod gate;
pub mod inspect;
pub mod mac_address;
pub mod oneshot;
pub mod reading;
pub mod scanner;
pub mod trmnl;

#[cfg(test)]
pub(crate) mod test_utils;

// Re-export commonly used types at the crate root
pub use alias::{Alias, AliasMap, parse_alias, to_map};
pub use app::{App, CycleResult, Options, RunError};
pub use cache::{CacheEntry, CacheError, TagCache};
pub use config::{Config, ConfigError, parse_duration};
pub use gate::{Decision, SendGate};
pub use mac_address::MacAddress;
pub use reading::{PartialReading, SensorReading, TagStatus};
pub use scanner::{
    AdvertisementSource, BluetoothSource, DecodeError, ScanError, ScanEvent, decode_ruuvi_data,
};
pub use trmnl::{MergeStrategy, SendOutcome, TrmnlSender, Webhook, WebhookPayload, build_payload};
