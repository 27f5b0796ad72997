//! TRMNL webhook client.
//!
//! TRMNL private plugins accept a JSON body of the form
//! `{ "merge_variables": { ... }, "merge_strategy": "..." }`. Payloads above
//! 2 KB are rejected on standard accounts, so only the fields the display
//! template uses are sent.

use crate::config::TrmnlConfig;
use crate::reading::{SensorReading, TagStatus};
use chrono::{DateTime, Local, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

/// Payload size TRMNL accepts on standard accounts.
pub const PAYLOAD_SIZE_LIMIT: usize = 2048;

const USER_AGENT: &str = concat!("ruuvi-trmnl/", env!("CARGO_PKG_VERSION"));

/// How TRMNL combines pushed variables with what it already stores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeStrategy {
    #[default]
    Replace,
    DeepMerge,
    Stream,
}

impl fmt::Display for MergeStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MergeStrategy::Replace => write!(f, "replace"),
            MergeStrategy::DeepMerge => write!(f, "deep_merge"),
            MergeStrategy::Stream => write!(f, "stream"),
        }
    }
}

/// Body of a webhook POST.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WebhookPayload {
    pub merge_variables: serde_json::Value,
    /// Omitted for `replace`, which is TRMNL's default.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub merge_strategy: Option<MergeStrategy>,
}

impl WebhookPayload {
    /// Serialized size in bytes.
    pub fn size(&self) -> usize {
        serde_json::to_vec(self).map_or(0, |body| body.len())
    }
}

/// One tag as the display template sees it.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TagPayload {
    pub name: String,
    pub status: TagStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub humidity: Option<f64>,
    pub last_updated: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_temperature_update: Option<String>,
}

/// Format a timestamp the way the display shows it: `yy-MM-dd HH:mm`.
pub fn format_display_time<Tz: TimeZone>(time: DateTime<Utc>, tz: &Tz) -> String
where
    Tz::Offset: fmt::Display,
{
    time.with_timezone(tz).format("%y-%m-%d %H:%M").to_string()
}

fn round_tenth(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

impl TagPayload {
    pub fn from_reading<Tz: TimeZone>(reading: &SensorReading, tz: &Tz) -> Self
    where
        Tz::Offset: fmt::Display,
    {
        TagPayload {
            name: reading.name.clone(),
            status: reading.status,
            temperature: reading.temperature.map(round_tenth),
            humidity: reading.humidity,
            last_updated: format_display_time(reading.last_updated, tz),
            last_temperature_update: reading
                .last_temperature_update
                .map(|t| format_display_time(t, tz)),
        }
    }
}

/// Build the payload for `tags` with timestamps in `tz`.
pub fn build_payload_in<Tz: TimeZone>(
    tags: &[SensorReading],
    strategy: MergeStrategy,
    now: DateTime<Utc>,
    tz: &Tz,
) -> WebhookPayload
where
    Tz::Offset: fmt::Display,
{
    let ruuvi_tags: Vec<TagPayload> = tags
        .iter()
        .map(|reading| TagPayload::from_reading(reading, tz))
        .collect();

    WebhookPayload {
        merge_variables: json!({
            "ruuvi_tags": ruuvi_tags,
            "lastRefresh": format_display_time(now, tz),
            "totalTags": tags.len(),
        }),
        merge_strategy: (strategy != MergeStrategy::Replace).then_some(strategy),
    }
}

/// Build the payload for `tags` with timestamps in local time.
pub fn build_payload(
    tags: &[SensorReading],
    strategy: MergeStrategy,
    now: DateTime<Utc>,
) -> WebhookPayload {
    build_payload_in(tags, strategy, now, &Local)
}

/// Result of one webhook POST.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    /// 2xx
    Delivered { status: u16 },
    /// 429: the caller must back off
    RateLimited,
    /// Any other status, a network error or a timeout
    Failed {
        status: Option<u16>,
        message: String,
    },
}

impl SendOutcome {
    /// Classify an HTTP response.
    pub fn from_response(status: u16, body: &str) -> Self {
        match status {
            200..=299 => SendOutcome::Delivered { status },
            429 => SendOutcome::RateLimited,
            _ => {
                let body = body.trim();
                let message = if body.is_empty() {
                    format!("HTTP {status}")
                } else {
                    format!("HTTP {status}: {body}")
                };
                SendOutcome::Failed {
                    status: Some(status),
                    message,
                }
            }
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, SendOutcome::Delivered { .. })
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            SendOutcome::Delivered { status } => Some(*status),
            SendOutcome::RateLimited => Some(429),
            SendOutcome::Failed { status, .. } => *status,
        }
    }
}

impl fmt::Display for SendOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SendOutcome::Delivered { status } => write!(f, "delivered (HTTP {status})"),
            SendOutcome::RateLimited => write!(f, "rate limited - will retry later"),
            SendOutcome::Failed { message, .. } => write!(f, "{message}"),
        }
    }
}

/// Something payloads can be pushed to.
pub trait Webhook: Send + Sync {
    fn post<'a>(
        &'a self,
        payload: &'a WebhookPayload,
    ) -> Pin<Box<dyn Future<Output = SendOutcome> + Send + 'a>>;
}

/// Hide the secret last path segment of a webhook URL for logging.
pub fn masked_url(url: &str) -> String {
    let trimmed = url.trim_end_matches('/');
    match trimmed.rfind('/') {
        Some(pos) if pos + 1 < trimmed.len() && !trimmed[..pos].ends_with('/') => {
            format!("{}/***", &trimmed[..pos])
        }
        _ => url.to_string(),
    }
}

/// Webhook client for the TRMNL HTTP API.
#[derive(Debug, Clone)]
pub struct TrmnlSender {
    client: reqwest::Client,
    url: String,
    timeout: Duration,
}

impl TrmnlSender {
    pub fn new(config: &TrmnlConfig) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(config.request_timeout)
            .build()?;
        Ok(TrmnlSender {
            client,
            url: config.webhook_url.trim().to_string(),
            timeout: config.request_timeout,
        })
    }

    pub fn masked_url(&self) -> String {
        masked_url(&self.url)
    }

    /// Post a small test payload and report whether TRMNL accepted it.
    ///
    /// This counts against the rate limit like any other push.
    pub async fn test_connection(&self) -> SendOutcome {
        log::info!("Testing TRMNL webhook connection to {}", self.masked_url());
        let payload = WebhookPayload {
            merge_variables: json!({
                "test": true,
                "timestamp": Utc::now(),
                "message": "ruuvi-trmnl connection test",
            }),
            merge_strategy: None,
        };
        let outcome = self.send(&payload).await;
        if outcome.is_success() {
            log::info!("TRMNL webhook connection test successful");
        } else {
            log::error!("TRMNL webhook connection test failed: {outcome}");
        }
        outcome
    }

    async fn send(&self, payload: &WebhookPayload) -> SendOutcome {
        let size = payload.size();
        log::debug!("Payload size: {size} bytes (limit: {PAYLOAD_SIZE_LIMIT} bytes)");
        if size > PAYLOAD_SIZE_LIMIT {
            log::warn!(
                "Payload size ({size} B) exceeds the standard TRMNL limit ({PAYLOAD_SIZE_LIMIT} B)"
            );
        }

        let response = match self.client.post(&self.url).json(payload).send().await {
            Ok(response) => response,
            Err(e) if e.is_timeout() => {
                return SendOutcome::Failed {
                    status: None,
                    message: format!("Request timeout after {}ms", self.timeout.as_millis()),
                };
            }
            Err(e) => {
                return SendOutcome::Failed {
                    status: None,
                    message: e.to_string(),
                };
            }
        };

        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        SendOutcome::from_response(status, &body)
    }
}

impl Webhook for TrmnlSender {
    fn post<'a>(
        &'a self,
        payload: &'a WebhookPayload,
    ) -> Pin<Box<dyn Future<Output = SendOutcome> + Send + 'a>> {
        Box::pin(self.send(payload))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{reading, t0};
    use chrono::TimeDelta;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::task::JoinHandle;

    fn config(url: String) -> TrmnlConfig {
        TrmnlConfig {
            webhook_url: url,
            request_timeout: Duration::from_secs(5),
            ..Default::default()
        }
    }

    /// Answer one HTTP request with `status_line` and return the raw request.
    async fn serve_once(status_line: &'static str, body: &'static str) -> (String, JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}/api/custom_plugins/secret-id", listener.local_addr().unwrap());

        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            let mut buf = [0u8; 4096];
            loop {
                let n = socket.read(&mut buf).await.unwrap();
                request.extend_from_slice(&buf[..n]);
                let text = String::from_utf8_lossy(&request).to_string();
                if let Some(end) = text.find("\r\n\r\n") {
                    let length = text[..end]
                        .lines()
                        .find_map(|line| {
                            let (name, value) = line.split_once(':')?;
                            name.eq_ignore_ascii_case("content-length")
                                .then(|| value.trim().parse::<usize>().ok())
                                .flatten()
                        })
                        .unwrap_or(0);
                    if request.len() >= end + 4 + length {
                        break;
                    }
                }
                if n == 0 {
                    break;
                }
            }
            let response = format!(
                "HTTP/1.1 {status_line}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                body.len()
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            String::from_utf8_lossy(&request).to_string()
        });

        (url, handle)
    }

    #[test]
    fn payload_rounds_temperature_and_formats_times() {
        let mut sauna = reading("a1b2c3d4", t0());
        sauna.name = "Sauna".to_string();
        sauna.temperature = Some(80.46);
        sauna.humidity = Some(12.345);
        sauna.last_temperature_update = Some(t0() - TimeDelta::minutes(1));

        let payload = build_payload_in(&[sauna], MergeStrategy::Replace, t0(), &Utc);
        let vars = &payload.merge_variables;
        let tag = &vars["ruuvi_tags"][0];

        assert_eq!(tag["name"], "Sauna");
        assert_eq!(tag["status"], "active");
        assert_eq!(tag["temperature"], 80.5);
        assert_eq!(tag["humidity"], 12.345);
        assert_eq!(tag["lastUpdated"], "25-01-15 12:00");
        assert_eq!(tag["lastTemperatureUpdate"], "25-01-15 11:59");
        assert_eq!(vars["lastRefresh"], "25-01-15 12:00");
        assert_eq!(vars["totalTags"], 1);
        assert!(tag.get("pressure").is_none());
        assert!(tag.get("id").is_none());
    }

    #[test]
    fn payload_omits_replace_strategy() {
        let replace = build_payload_in(&[], MergeStrategy::Replace, t0(), &Utc);
        let json = serde_json::to_value(&replace).unwrap();
        assert!(json.get("merge_strategy").is_none());

        let merge = build_payload_in(&[], MergeStrategy::DeepMerge, t0(), &Utc);
        let json = serde_json::to_value(&merge).unwrap();
        assert_eq!(json["merge_strategy"], "deep_merge");
    }

    #[test]
    fn offline_placeholder_has_no_values_in_payload() {
        let offline = SensorReading::offline("s2", "Porch", t0());
        let payload = build_payload_in(&[offline], MergeStrategy::Replace, t0(), &Utc);
        let tag = &payload.merge_variables["ruuvi_tags"][0];
        assert_eq!(tag["status"], "offline");
        assert!(tag.get("temperature").is_none());
        assert!(tag.get("humidity").is_none());
    }

    #[test]
    fn ten_tags_fit_the_standard_limit() {
        let tags: Vec<SensorReading> = (0..10)
            .map(|i| {
                let mut r = reading(&format!("{i:08x}"), t0());
                r.name = format!("Room number {i}");
                r.temperature = Some(21.37);
                r.humidity = Some(45.125);
                r.last_temperature_update = Some(t0());
                r
            })
            .collect();
        let payload = build_payload_in(&tags, MergeStrategy::Replace, t0(), &Utc);
        assert!(payload.size() < PAYLOAD_SIZE_LIMIT);
    }

    #[test]
    fn outcome_classification() {
        assert_eq!(
            SendOutcome::from_response(200, ""),
            SendOutcome::Delivered { status: 200 }
        );
        assert_eq!(
            SendOutcome::from_response(204, ""),
            SendOutcome::Delivered { status: 204 }
        );
        assert_eq!(SendOutcome::from_response(429, "slow down"), SendOutcome::RateLimited);
        assert_eq!(
            SendOutcome::from_response(500, "boom\n"),
            SendOutcome::Failed {
                status: Some(500),
                message: "HTTP 500: boom".to_string(),
            }
        );
        assert_eq!(SendOutcome::RateLimited.status(), Some(429));
        assert!(!SendOutcome::RateLimited.is_success());
    }

    #[test]
    fn masked_url_hides_last_segment() {
        assert_eq!(
            masked_url("https://usetrmnl.com/api/custom_plugins/abc-123"),
            "https://usetrmnl.com/api/custom_plugins/***"
        );
        assert_eq!(masked_url("https://usetrmnl.com"), "https://usetrmnl.com");
    }

    #[tokio::test]
    async fn sender_posts_json_payload() {
        let (url, server) = serve_once("200 OK", "{}").await;
        let sender = TrmnlSender::new(&config(url)).unwrap();

        let payload = build_payload_in(&[reading("a1b2c3d4", t0())], MergeStrategy::Stream, t0(), &Utc);
        let outcome = sender.post(&payload).await;
        assert_eq!(outcome, SendOutcome::Delivered { status: 200 });

        let request = server.await.unwrap();
        assert!(request.starts_with("POST /api/custom_plugins/secret-id"));
        assert!(request.to_ascii_lowercase().contains("content-type: application/json"));
        assert!(request.contains(USER_AGENT));
        assert!(request.contains("\"merge_strategy\":\"stream\""));
        assert!(request.contains("\"ruuvi_tags\""));
    }

    #[tokio::test]
    async fn sender_reports_rate_limit() {
        let (url, server) = serve_once("429 Too Many Requests", "").await;
        let sender = TrmnlSender::new(&config(url)).unwrap();
        let payload = build_payload_in(&[], MergeStrategy::Replace, t0(), &Utc);

        assert_eq!(sender.post(&payload).await, SendOutcome::RateLimited);
        server.await.unwrap();
    }

    #[tokio::test]
    async fn sender_reports_server_errors() {
        let (url, server) = serve_once("503 Service Unavailable", "maintenance").await;
        let sender = TrmnlSender::new(&config(url)).unwrap();

        let outcome = sender.test_connection().await;
        assert_eq!(
            outcome,
            SendOutcome::Failed {
                status: Some(503),
                message: "HTTP 503: maintenance".to_string(),
            }
        );
        let request = server.await.unwrap();
        assert!(request.contains("connection test"));
    }

    #[tokio::test]
    async fn sender_reports_connection_errors() {
        // Bind and drop to get a port nothing listens on
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let url = format!("http://{}/hook", listener.local_addr().unwrap());
        drop(listener);

        let sender = TrmnlSender::new(&config(url)).unwrap();
        let payload = build_payload_in(&[], MergeStrategy::Replace, t0(), &Utc);
        assert!(matches!(
            sender.post(&payload).await,
            SendOutcome::Failed { status: None, .. }
        ));
    }
}
