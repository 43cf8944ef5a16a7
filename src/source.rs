//! External collaborators: where GPS readings come from and where reduction
//! state is kept between invocations.
//!
//! The engine only talks to these traits. In-memory implementations are
//! provided here; SQLite and HTTP implementations live behind the
//! `persistence` and `http` features.

use std::collections::HashMap;
use std::sync::Mutex;

use log::warn;
use serde_json::Value;

use crate::{GpsReading, LocationError, Result};

/// A source of raw GPS readings.
pub trait GpsSource {
    /// Fetch readings for `subject_id` with `start <= timestamp < end`,
    /// sorted ascending by timestamp. `start == end` yields an empty list.
    fn fetch(&self, subject_id: &str, start: i64, end: i64) -> Result<Vec<GpsReading>>;
}

/// A per-subject key/value store for opaque structured documents.
pub trait AttachmentStore {
    /// Read the document stored under `key`, or `None` if nothing was stored yet.
    fn get(&self, subject_id: &str, key: &str) -> Result<Option<Value>>;

    /// Replace the document stored under `key`.
    fn set(&self, subject_id: &str, key: &str, value: &Value) -> Result<()>;
}

impl<T: GpsSource + ?Sized> GpsSource for &T {
    fn fetch(&self, subject_id: &str, start: i64, end: i64) -> Result<Vec<GpsReading>> {
        (**self).fetch(subject_id, start, end)
    }
}

impl<T: AttachmentStore + ?Sized> AttachmentStore for &T {
    fn get(&self, subject_id: &str, key: &str) -> Result<Option<Value>> {
        (**self).get(subject_id, key)
    }

    fn set(&self, subject_id: &str, key: &str, value: &Value) -> Result<()> {
        (**self).set(subject_id, key, value)
    }
}

/// Fetch readings and drop any with non-finite or out-of-range coordinates.
pub(crate) fn fetch_valid<G: GpsSource + ?Sized>(
    gps: &G,
    subject_id: &str,
    start: i64,
    end: i64,
) -> Result<Vec<GpsReading>> {
    let mut readings = gps.fetch(subject_id, start, end)?;
    let before = readings.len();
    readings.retain(|r| r.point().is_valid());

    let dropped = before - readings.len();
    if dropped > 0 {
        warn!(
            "[GpsSource] Dropped {} invalid readings for {} in [{}, {})",
            dropped, subject_id, start, end
        );
    }
    Ok(readings)
}

// ============================================================================
// In-memory implementations
// ============================================================================

/// GPS readings held in memory, keyed by subject.
#[derive(Debug, Clone, Default)]
pub struct MemoryGpsSource {
    readings: HashMap<String, Vec<GpsReading>>,
}

impl MemoryGpsSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add readings for a subject. Readings are kept sorted by timestamp;
    /// readings sharing a timestamp keep their insertion order.
    pub fn insert<I>(&mut self, subject_id: &str, readings: I)
    where
        I: IntoIterator<Item = GpsReading>,
    {
        let entry = self.readings.entry(subject_id.to_string()).or_default();
        entry.extend(readings);
        entry.sort_by_key(|r| r.timestamp);
    }

    /// Number of readings stored for a subject.
    pub fn len(&self, subject_id: &str) -> usize {
        self.readings.get(subject_id).map_or(0, Vec::len)
    }

    pub fn is_empty(&self, subject_id: &str) -> bool {
        self.len(subject_id) == 0
    }
}

impl GpsSource for MemoryGpsSource {
    fn fetch(&self, subject_id: &str, start: i64, end: i64) -> Result<Vec<GpsReading>> {
        let Some(readings) = self.readings.get(subject_id) else {
            return Ok(Vec::new());
        };
        if start >= end {
            return Ok(Vec::new());
        }

        let lo = readings.partition_point(|r| r.timestamp < start);
        let hi = readings.partition_point(|r| r.timestamp < end);
        Ok(readings[lo..hi].to_vec())
    }
}

/// Attachments held in memory, keyed by `(subject, key)`.
#[derive(Debug, Default)]
pub struct MemoryAttachmentStore {
    attachments: Mutex<HashMap<(String, String), Value>>,
}

impl MemoryAttachmentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored attachments across all subjects.
    pub fn len(&self) -> usize {
        self.attachments.lock().map(|a| a.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl AttachmentStore for MemoryAttachmentStore {
    fn get(&self, subject_id: &str, key: &str) -> Result<Option<Value>> {
        let attachments = self
            .attachments
            .lock()
            .map_err(|e| LocationError::AttachmentStore {
                subject_id: subject_id.to_string(),
                key: key.to_string(),
                message: e.to_string(),
            })?;
        Ok(attachments
            .get(&(subject_id.to_string(), key.to_string()))
            .cloned())
    }

    fn set(&self, subject_id: &str, key: &str, value: &Value) -> Result<()> {
        let mut attachments =
            self.attachments
                .lock()
                .map_err(|e| LocationError::AttachmentStore {
                    subject_id: subject_id.to_string(),
                    key: key.to_string(),
                    message: e.to_string(),
                })?;
        attachments.insert((subject_id.to_string(), key.to_string()), value.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_source() -> MemoryGpsSource {
        let mut source = MemoryGpsSource::new();
        source.insert(
            "U1",
            vec![
                GpsReading::new(3000, 1.0, 1.0),
                GpsReading::new(1000, 1.0, 1.0),
                GpsReading::new(2000, 1.0, 1.0),
            ],
        );
        source
    }

    #[test]
    fn test_fetch_is_sorted_and_half_open() {
        let source = sample_source();
        let readings = source.fetch("U1", 1000, 3000).unwrap();
        let timestamps: Vec<i64> = readings.iter().map(|r| r.timestamp).collect();
        assert_eq!(timestamps, vec![1000, 2000]);
    }

    #[test]
    fn test_fetch_empty_range() {
        let source = sample_source();
        assert!(source.fetch("U1", 2000, 2000).unwrap().is_empty());
        assert!(source.fetch("U1", 5000, 1000).unwrap().is_empty());
        assert!(source.fetch("unknown", 0, i64::MAX).unwrap().is_empty());
    }

    #[test]
    fn test_fetch_valid_drops_bad_coordinates() {
        let mut source = MemoryGpsSource::new();
        source.insert(
            "U1",
            vec![
                GpsReading::new(0, 1.0, 1.0),
                GpsReading::new(1, f64::NAN, 1.0),
                GpsReading::new(2, 95.0, 1.0),
                GpsReading::new(3, 2.0, 2.0),
            ],
        );
        let readings = fetch_valid(&source, "U1", 0, 10).unwrap();
        assert_eq!(readings.len(), 2);
        assert_eq!(readings[1].timestamp, 3);
    }

    #[test]
    fn test_attachment_roundtrip() {
        let store = MemoryAttachmentStore::new();
        assert!(store.get("U1", "key").unwrap().is_none());

        store.set("U1", "key", &json!({"end": 5})).unwrap();
        assert_eq!(store.get("U1", "key").unwrap(), Some(json!({"end": 5})));
        assert!(store.get("U2", "key").unwrap().is_none());
        assert_eq!(store.len(), 1);
    }
}
