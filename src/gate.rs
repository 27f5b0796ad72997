//! Decides when a push to TRMNL is worth making.
//!
//! Checks run in a fixed order: the 429 cool-down first (it also applies to
//! forced sends), then change detection, then the minimum interval between
//! sends. The very first send is always allowed.

use crate::alias::{AliasMap, resolve_name};
use crate::cache::TagCache;
use crate::config::Config;
use crate::reading::{SensorReading, TagStatus};
use crate::trmnl::SendOutcome;
use chrono::{DateTime, TimeDelta, Utc};
use std::fmt;
use std::time::Duration;

/// Outcome of a gate check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Send,
    RateLimited { remaining: Duration },
    NoChanges,
    TooSoon { remaining: Duration },
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Decision::Send => write!(f, "send"),
            Decision::RateLimited { remaining } => {
                write!(f, "rate limited, {}s remaining", remaining.as_secs())
            }
            Decision::NoChanges => write!(f, "no changes since last send"),
            Decision::TooSoon { remaining } => {
                write!(f, "next send allowed in {}s", remaining.as_secs())
            }
        }
    }
}

fn to_delta(duration: Duration) -> TimeDelta {
    TimeDelta::from_std(duration).unwrap_or(TimeDelta::MAX)
}

/// `at + delta`, or the end of time when that overflows.
fn after(at: DateTime<Utc>, delta: TimeDelta) -> DateTime<Utc> {
    at.checked_add_signed(delta).unwrap_or(DateTime::<Utc>::MAX_UTC)
}

fn remaining(until: DateTime<Utc>, now: DateTime<Utc>) -> Duration {
    (until - now).to_std().unwrap_or_default()
}

#[derive(Debug, Clone)]
pub struct SendGate {
    last_sent: Option<DateTime<Utc>>,
    rate_limited_until: Option<DateTime<Utc>>,
    min_send_interval: TimeDelta,
    cooldown: TimeDelta,
    retention: TimeDelta,
}

impl SendGate {
    /// `last_sent` is the most recent send recorded in the cache, if any.
    pub fn new(config: &Config, last_sent: Option<DateTime<Utc>>) -> Self {
        SendGate {
            last_sent,
            rate_limited_until: None,
            min_send_interval: to_delta(config.trmnl.min_send_interval),
            cooldown: to_delta(config.trmnl.rate_limit_cooldown),
            retention: to_delta(config.ruuvi.data_retention),
        }
    }

    pub fn last_sent(&self) -> Option<DateTime<Utc>> {
        self.last_sent
    }

    pub fn rate_limited_until(&self) -> Option<DateTime<Utc>> {
        self.rate_limited_until
    }

    fn check_rate_limit(&self, now: DateTime<Utc>) -> Option<Decision> {
        self.rate_limited_until
            .filter(|until| now < *until)
            .map(|until| Decision::RateLimited {
                remaining: remaining(until, now),
            })
    }

    /// Automatic send check for a refresh tick.
    pub fn decide(&self, now: DateTime<Utc>, has_pending: bool) -> Decision {
        if let Some(limited) = self.check_rate_limit(now) {
            return limited;
        }
        let Some(last_sent) = self.last_sent else {
            return Decision::Send;
        };
        if !has_pending {
            return Decision::NoChanges;
        }
        let next_allowed = after(last_sent, self.min_send_interval);
        if now < next_allowed {
            return Decision::TooSoon {
                remaining: remaining(next_allowed, now),
            };
        }
        Decision::Send
    }

    /// Manual send check. Only the rate-limit cool-down applies.
    pub fn decide_forced(&self, now: DateTime<Utc>) -> Decision {
        self.check_rate_limit(now).unwrap_or(Decision::Send)
    }

    /// Update the gate with the result of a push made at `now`.
    pub fn record(&mut self, outcome: &SendOutcome, now: DateTime<Utc>) {
        match outcome {
            SendOutcome::Delivered { .. } => {
                self.last_sent = Some(now);
                self.rate_limited_until = None;
            }
            SendOutcome::RateLimited => {
                let until = after(now, self.cooldown);
                log::warn!("Rate limited by TRMNL, pausing sends until {until}");
                self.rate_limited_until = Some(until);
            }
            SendOutcome::Failed { .. } => {}
        }
    }

    /// The complete dataset for `ids`, in that order.
    ///
    /// Cached tags are `active`, or `stale` when not heard from within the
    /// retention period. Tags never seen get an `offline` placeholder.
    pub fn build_dataset(
        &self,
        cache: &TagCache,
        ids: &[String],
        aliases: &AliasMap,
        now: DateTime<Utc>,
    ) -> Vec<SensorReading> {
        cache
            .all_for_ids_at(ids, now)
            .into_iter()
            .map(|mut reading| {
                reading.name = resolve_name(&reading.id, aliases);
                if let Some(seen) = cache.last_seen(&reading.id) {
                    reading.status = if now - seen > self.retention {
                        TagStatus::Stale
                    } else {
                        TagStatus::Active
                    };
                }
                reading
            })
            .collect()
    }
}
