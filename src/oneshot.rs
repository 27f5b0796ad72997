//! Collect one reading from each configured tag, push once and return.
//!
//! Meant for cron jobs and other schedulers that prefer a process per push.

use crate::app::{App, CycleResult, RunError};
use crate::cache::TagCache;
use crate::config::{Config, ConfigError};
use crate::scanner::{AdvertisementSource, ScanEvent};
use crate::trmnl::Webhook;
use chrono::Utc;
use std::collections::HashSet;
use std::time::Duration;
use tokio::time::{Instant, timeout_at};

/// Listen until every configured tag has advertised a reading or `timeout`
/// passes, then force a send of the complete dataset.
///
/// Returns the number of tags sent. Fails when nothing was heard from any
/// configured tag or the push failed.
pub async fn send_once(
    config: Config,
    cache: TagCache,
    source: &dyn AdvertisementSource,
    webhook: Box<dyn Webhook>,
    timeout: Duration,
) -> Result<usize, RunError> {
    let mut app = App::new(config, cache, webhook);
    let required: HashSet<String> = app.tag_ids().iter().cloned().collect();
    if required.is_empty() {
        return Err(
            ConfigError::Invalid("no tags configured, add ruuvi.tags or --alias".into()).into(),
        );
    }
    log::info!("Looking for {} configured tags", required.len());

    let mut events = source.start().await?;
    let deadline = Instant::now() + timeout;
    let mut collected: HashSet<String> = HashSet::new();

    while collected.len() < required.len() {
        let event = match timeout_at(deadline, events.recv()).await {
            Ok(Some(event)) => event,
            Ok(None) => {
                log::warn!("Advertisement stream ended");
                break;
            }
            Err(_) => {
                log::info!("Timeout after {}s", timeout.as_secs());
                break;
            }
        };

        let id = event.mac().tag_id();
        let has_reading =
            matches!(&event, ScanEvent::Updated { reading, .. } if !reading.is_empty());
        app.handle_event(event, Utc::now());
        if has_reading && required.contains(&id) && collected.insert(id.clone()) {
            log::debug!("Collected data for tag {id}");
        }
    }

    log::info!("Collected {}/{} tags", collected.len(), required.len());
    if collected.is_empty() {
        return Err(RunError::Send("no tag data collected".into()));
    }

    let result = app.force_send().await;
    app.flush();
    match result {
        CycleResult::Sent { tags } => Ok(tags),
        CycleResult::Skipped(decision) => Err(RunError::Send(decision.to_string())),
        CycleResult::Failed(outcome) => Err(RunError::Send(outcome.to_string())),
    }
}
