//! HTTP client for the LAMP platform API.
//!
//! [`LampClient`] serves as both collaborators of the engine:
//! - GPS readings from a participant's `lamp.gps` sensor events
//! - reduction state from the participant's type attachments
//!
//! Requests authenticate with HTTP Basic (`access_key:secret_key`) and retry
//! with exponential backoff on 429 and transport errors. The synchronous trait
//! methods run on a shared tokio runtime.

use std::collections::HashSet;
use std::time::{Duration, Instant};

use base64::Engine;
use log::{debug, info, warn};
use once_cell::sync::Lazy;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::Value;
use tokio::runtime::{Builder, Runtime};

use crate::{AttachmentStore, GpsReading, GpsSource, LocationError, Result};

const DEFAULT_PAGE_SIZE: usize = 10_000;
const MAX_RETRIES: u32 = 3;
const GPS_SENSOR: &str = "lamp.gps";

/// Runtime backing the blocking trait methods.
static RUNTIME: Lazy<std::io::Result<Runtime>> =
    Lazy::new(|| Builder::new_multi_thread().enable_all().build());

fn block_on<F: std::future::Future>(future: F) -> Result<F::Output> {
    let runtime = RUNTIME.as_ref().map_err(|e| LocationError::Internal {
        message: format!("Failed to create tokio runtime: {}", e),
    })?;
    Ok(runtime.block_on(future))
}

/// One sensor event as returned by the API.
#[derive(Debug, Deserialize)]
struct SensorEvent {
    timestamp: i64,
    #[serde(default)]
    data: Option<GpsData>,
}

#[derive(Debug, Deserialize)]
struct GpsData {
    latitude: Option<f64>,
    longitude: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    data: T,
}

/// Client for one LAMP server.
pub struct LampClient {
    client: Client,
    base_url: String,
    auth_header: String,
    page_size: usize,
    max_retries: u32,
}

impl LampClient {
    /// Create a client for `base_url` (e.g. `https://api.lamp.digital`).
    pub fn new(base_url: &str, access_key: &str, secret_key: &str) -> Result<Self> {
        let auth = base64::engine::general_purpose::STANDARD
            .encode(format!("{}:{}", access_key, secret_key));

        let client = Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|e| LocationError::HttpError {
                message: format!("Failed to create HTTP client: {}", e),
                status_code: None,
            })?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            auth_header: format!("Basic {}", auth),
            page_size: DEFAULT_PAGE_SIZE,
            max_retries: MAX_RETRIES,
        })
    }

    /// Events requested per page when fetching GPS history.
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    // ========================================================================
    // Async API
    // ========================================================================

    /// Fetch GPS readings in `[start, end)`, ascending by timestamp.
    pub async fn fetch_gps(&self, subject_id: &str, start: i64, end: i64) -> Result<Vec<GpsReading>> {
        if start >= end {
            return Ok(Vec::new());
        }

        let started = Instant::now();
        let mut readings = Vec::new();
        let mut to = end;

        // The API returns newest first; walk pages backwards from `end`.
        loop {
            let url = format!(
                "{}/participant/{}/sensor_event?origin={}&from={}&to={}&_limit={}",
                self.base_url, subject_id, GPS_SENSOR, start, to, self.page_size
            );
            let Some(body) = self.get_json(&url).await? else {
                break;
            };
            let page = parse_sensor_events(body)?;
            let page_len = page.len();
            let oldest = page.iter().map(|r| r.timestamp).min();

            readings.extend(page);

            match next_page_end(page_len, self.page_size, oldest, start, to) {
                Some(next) => to = next,
                None => break,
            }
        }

        let mut readings = dedup_events(window_readings(readings, start, end));
        readings.sort_by_key(|r| r.timestamp);

        info!(
            "[LampClient] {} GPS readings for {} in {:.2}s",
            readings.len(),
            subject_id,
            started.elapsed().as_secs_f64()
        );
        Ok(readings)
    }

    /// Read a type attachment, `None` when it does not exist.
    pub async fn get_attachment(&self, subject_id: &str, key: &str) -> Result<Option<Value>> {
        let url = format!("{}/type/{}/attachment/{}", self.base_url, subject_id, key);
        match self.get_json(&url).await? {
            Some(body) => {
                let envelope: Envelope<Value> = serde_json::from_value(body)?;
                Ok(match envelope.data {
                    Value::Null => None,
                    value => Some(value),
                })
            }
            None => Ok(None),
        }
    }

    /// Replace a type attachment.
    pub async fn set_attachment(&self, subject_id: &str, key: &str, value: &Value) -> Result<()> {
        let url = format!("{}/type/{}/attachment/{}/me", self.base_url, subject_id, key);
        let mut retries = 0;

        loop {
            let response = self
                .client
                .put(&url)
                .header("Authorization", &self.auth_header)
                .json(value)
                .send()
                .await;

            match response {
                Ok(resp) if resp.status() == StatusCode::TOO_MANY_REQUESTS => {
                    retries += 1;
                    self.retry_or_fail(retries, &url, StatusCode::TOO_MANY_REQUESTS.to_string(), Some(429))
                        .await?;
                }
                Ok(resp) if !resp.status().is_success() => {
                    return Err(status_error(resp.status()));
                }
                Ok(_) => {
                    debug!("[LampClient] Stored {} for {}", key, subject_id);
                    return Ok(());
                }
                Err(e) => {
                    retries += 1;
                    self.retry_or_fail(retries, &url, e.to_string(), None).await?;
                }
            }
        }
    }

    /// GET a JSON body. `Ok(None)` on 404.
    async fn get_json(&self, url: &str) -> Result<Option<Value>> {
        let mut retries = 0;

        loop {
            let response = self
                .client
                .get(url)
                .header("Authorization", &self.auth_header)
                .send()
                .await;

            match response {
                Ok(resp) => {
                    let status = resp.status();
                    if status == StatusCode::NOT_FOUND {
                        return Ok(None);
                    }
                    if status == StatusCode::TOO_MANY_REQUESTS {
                        retries += 1;
                        self.retry_or_fail(retries, url, status.to_string(), Some(429))
                            .await?;
                        continue;
                    }
                    if !status.is_success() {
                        return Err(status_error(status));
                    }

                    return resp.json::<Value>().await.map(Some).map_err(|e| {
                        LocationError::Serialization {
                            message: format!("Parse error: {}", e),
                        }
                    });
                }
                Err(e) => {
                    retries += 1;
                    self.retry_or_fail(retries, url, e.to_string(), None).await?;
                }
            }
        }
    }

    /// Sleep before the next attempt, or fail once retries are exhausted.
    async fn retry_or_fail(
        &self,
        retries: u32,
        url: &str,
        message: String,
        status_code: Option<u16>,
    ) -> Result<()> {
        if retries > self.max_retries {
            return Err(LocationError::HttpError {
                message: format!("Max retries exceeded: {}", message),
                status_code,
            });
        }
        let backoff = backoff_delay(retries);
        warn!(
            "[LampClient] {} for {}, retry {} after {:?}",
            message, url, retries, backoff
        );
        tokio::time::sleep(backoff).await;
        Ok(())
    }
}

impl GpsSource for LampClient {
    fn fetch(&self, subject_id: &str, start: i64, end: i64) -> Result<Vec<GpsReading>> {
        block_on(self.fetch_gps(subject_id, start, end))?.map_err(|e| LocationError::GpsSource {
            subject_id: subject_id.to_string(),
            message: e.to_string(),
        })
    }
}

impl AttachmentStore for LampClient {
    fn get(&self, subject_id: &str, key: &str) -> Result<Option<Value>> {
        block_on(self.get_attachment(subject_id, key))?.map_err(|e| match e {
            LocationError::Serialization { .. } => e,
            other => attachment_error(subject_id, key, other),
        })
    }

    fn set(&self, subject_id: &str, key: &str, value: &Value) -> Result<()> {
        block_on(self.set_attachment(subject_id, key, value))?
            .map_err(|e| attachment_error(subject_id, key, e))
    }
}

// ============================================================================
// Helpers
// ============================================================================

/// Exponential backoff: 1s, 2s, 4s, 8s, capped at 16s.
fn backoff_delay(retry: u32) -> Duration {
    Duration::from_millis(500 * (1u64 << retry.min(5)))
}

fn status_error(status: StatusCode) -> LocationError {
    LocationError::HttpError {
        message: format!("HTTP {}", status),
        status_code: Some(status.as_u16()),
    }
}

fn attachment_error(subject_id: &str, key: &str, e: LocationError) -> LocationError {
    LocationError::AttachmentStore {
        subject_id: subject_id.to_string(),
        key: key.to_string(),
        message: e.to_string(),
    }
}

/// Decode a `{"data": [...]}` sensor-event page into readings.
///
/// Events without both coordinates are skipped.
fn parse_sensor_events(body: Value) -> Result<Vec<GpsReading>> {
    let envelope: Envelope<Vec<SensorEvent>> = serde_json::from_value(body)?;
    Ok(envelope
        .data
        .into_iter()
        .filter_map(|event| {
            let data = event.data?;
            Some(GpsReading::new(event.timestamp, data.latitude?, data.longitude?))
        })
        .collect())
}

/// Upper bound of the next (older) page, `None` when paging is done.
///
/// Readings at the page's oldest timestamp may straddle the boundary, so the
/// next page repeats that timestamp. A page whose oldest reading is not below
/// `to` moves the bound down by one so every page ends strictly earlier.
fn next_page_end(
    page_len: usize,
    page_size: usize,
    oldest: Option<i64>,
    start: i64,
    to: i64,
) -> Option<i64> {
    let oldest = oldest?;
    if page_len < page_size || oldest <= start {
        return None;
    }
    let next = if oldest < to { oldest } else { to - 1 };
    (next > start).then_some(next)
}

/// Drop events repeated across page boundaries (same timestamp and coordinate),
/// keeping the first occurrence.
fn dedup_events(mut readings: Vec<GpsReading>) -> Vec<GpsReading> {
    let mut seen = HashSet::with_capacity(readings.len());
    let before = readings.len();
    readings.retain(|r| seen.insert((r.timestamp, r.latitude.to_bits(), r.longitude.to_bits())));
    if readings.len() < before {
        debug!(
            "[LampClient] Dropped {} duplicate events",
            before - readings.len()
        );
    }
    readings
}

fn window_readings(readings: Vec<GpsReading>, start: i64, end: i64) -> Vec<GpsReading> {
    readings
        .into_iter()
        .filter(|r| r.timestamp >= start && r.timestamp < end)
        .collect()
}
