//! Event corpus loading and timeline statistics
//!
//! Accepted shapes:
//! - a bare JSON array of event objects
//! - an object with a `tweets` array
//!
//! Each item: `{id?, text, timestamp, location?: {latitude, longitude} | latitude/longitude}`.
//! Everything else on the item is carried along as metadata.

use super::error::{PipelineError, PipelineResult};
use super::types::{RawEvent, MAX_TEXT_CHARS};
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, TimeZone, Utc};
use serde_json::{Map, Value};
use std::fs;
use std::path::Path;
use std::time::Duration;

const RESERVED_KEYS: [&str; 6] = ["id", "text", "latitude", "longitude", "timestamp", "location"];

/// One corpus item after normalization
#[derive(Debug, Clone, PartialEq)]
pub struct CorpusEvent {
    pub id: Option<String>,
    pub text: String,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    /// Epoch seconds; `None` when the timestamp was missing or unparseable
    pub timestamp: Option<f64>,
    pub raw_timestamp: Value,
    pub raw_location: Value,
    pub extra: Map<String, Value>,
}

impl CorpusEvent {
    fn from_value(item: &Value) -> Self {
        let obj = item.as_object().cloned().unwrap_or_default();

        let id = match obj.get("id") {
            Some(Value::String(s)) => Some(s.clone()),
            Some(Value::Number(n)) => Some(n.to_string()),
            _ => None,
        };

        let text = obj
            .get("text")
            .and_then(Value::as_str)
            .map(|t| t.chars().take(MAX_TEXT_CHARS).collect())
            .unwrap_or_default();

        let mut latitude = obj.get("latitude").and_then(Value::as_f64);
        let mut longitude = obj.get("longitude").and_then(Value::as_f64);
        let raw_location = obj.get("location").cloned().unwrap_or(Value::Null);
        if let Value::Object(loc) = &raw_location {
            if let Some(lat) = loc.get("latitude") {
                latitude = lat.as_f64();
            }
            if let Some(lon) = loc.get("longitude") {
                longitude = lon.as_f64();
            }
        }

        let raw_timestamp = obj.get("timestamp").cloned().unwrap_or(Value::Null);
        let timestamp = parse_timestamp(&raw_timestamp);

        let extra = obj
            .into_iter()
            .filter(|(k, _)| !RESERVED_KEYS.contains(&k.as_str()))
            .collect();

        Self {
            id,
            text,
            latitude,
            longitude,
            timestamp,
            raw_timestamp,
            raw_location,
            extra,
        }
    }

    /// Build the queue item for this event
    ///
    /// `position` is the index in replay order, used to synthesize missing ids.
    pub fn to_raw_event(&self, position: usize, source: &str, enqueued_at: DateTime<Utc>) -> RawEvent {
        let mut metadata = Map::new();
        metadata.insert("original_timestamp".to_string(), self.raw_timestamp.clone());
        metadata.insert("location".to_string(), self.raw_location.clone());
        for (k, v) in &self.extra {
            metadata.insert(k.clone(), v.clone());
        }

        RawEvent {
            id: self
                .id
                .clone()
                .unwrap_or_else(|| format!("syn_{}", position)),
            text: self.text.clone(),
            latitude: self.latitude,
            longitude: self.longitude,
            original_timestamp: self.timestamp.and_then(epoch_to_datetime),
            enqueued_at,
            source: source.to_string(),
            metadata,
        }
    }
}

/// Parse an ISO-8601 string, a numeric string, or a JSON number into epoch seconds
pub fn parse_timestamp(value: &Value) -> Option<f64> {
    let ts = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => {
            let s = s.trim();
            if let Some(dt) = parse_with_offset(s) {
                Some(dt.timestamp_micros() as f64 / 1e6)
            } else if let Some(naive) = parse_naive(s) {
                Some(Utc.from_utc_datetime(&naive).timestamp_micros() as f64 / 1e6)
            } else {
                s.parse::<f64>().ok()
            }
        }
        _ => None,
    };
    ts.filter(|t| t.is_finite())
}

/// RFC 3339, or minute precision with an offset (`Z` read as `+00:00`)
fn parse_with_offset(s: &str) -> Option<DateTime<FixedOffset>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt);
    }
    let s = match s.strip_suffix('Z') {
        Some(base) => format!("{}+00:00", base),
        None => s.to_string(),
    };
    ["%Y-%m-%dT%H:%M%:z", "%Y-%m-%d %H:%M%:z", "%Y-%m-%d %H:%M:%S%.f%:z"]
        .iter()
        .find_map(|fmt| DateTime::parse_from_str(&s, fmt).ok())
}

/// Offset-less forms are taken as UTC; a bare date is midnight
fn parse_naive(s: &str) -> Option<NaiveDateTime> {
    [
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%dT%H:%M",
        "%Y-%m-%d %H:%M",
    ]
    .iter()
    .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
    .or_else(|| {
        NaiveDate::parse_from_str(s, "%Y-%m-%d")
            .ok()
            .and_then(|date| date.and_hms_opt(0, 0, 0))
    })
}

pub fn epoch_to_datetime(secs: f64) -> Option<DateTime<Utc>> {
    if !secs.is_finite() {
        return None;
    }
    let micros = (secs * 1e6).round();
    if micros.abs() > i64::MAX as f64 {
        return None;
    }
    DateTime::from_timestamp_micros(micros as i64)
}

/// Loaded, non-empty corpus
#[derive(Debug, Clone)]
pub struct Corpus {
    events: Vec<CorpusEvent>,
    min_ts: Option<f64>,
    max_ts: Option<f64>,
}

impl Corpus {
    pub fn from_path(path: impl AsRef<Path>) -> PipelineResult<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| {
            PipelineError::CorpusInvalid(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_json_str(&content)
    }

    pub fn from_json_str(content: &str) -> PipelineResult<Self> {
        let value: Value = serde_json::from_str(content)
            .map_err(|e| PipelineError::CorpusInvalid(format!("malformed JSON: {}", e)))?;
        Self::from_value(&value)
    }

    pub fn from_value(value: &Value) -> PipelineResult<Self> {
        let items = match value {
            Value::Array(items) => items.as_slice(),
            Value::Object(obj) => match obj.get("tweets") {
                Some(Value::Array(items)) => items.as_slice(),
                _ => &[],
            },
            _ => &[],
        };

        if items.is_empty() {
            return Err(PipelineError::CorpusInvalid("no events found".to_string()));
        }

        let events: Vec<CorpusEvent> = items.iter().map(CorpusEvent::from_value).collect();
        let parsed = || events.iter().filter_map(|e| e.timestamp);
        let min_ts = parsed().reduce(f64::min);
        let max_ts = parsed().reduce(f64::max);

        Ok(Self {
            events,
            min_ts,
            max_ts,
        })
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn events(&self) -> &[CorpusEvent] {
        &self.events
    }

    /// Seconds between the earliest and latest parsed timestamp
    pub fn span_secs(&self) -> f64 {
        match (self.min_ts, self.max_ts) {
            (Some(min), Some(max)) => (max - min).max(0.0),
            _ => 0.0,
        }
    }

    pub fn timestamped_count(&self) -> usize {
        self.events.iter().filter(|e| e.timestamp.is_some()).count()
    }

    /// Factor by which original gaps are divided to fit `replay_duration`
    pub fn compression_ratio(&self, replay_duration: Duration) -> f64 {
        let span = self.span_secs();
        let target = replay_duration.as_secs_f64();
        if span > 0.0 && target > 0.0 {
            span / target
        } else {
            1.0
        }
    }

    /// Events sorted by timestamp, ties and untimed events keeping corpus order
    ///
    /// Untimed events sort as if stamped with the earliest timestamp.
    pub fn replay_order(&self) -> Vec<&CorpusEvent> {
        let floor = self.min_ts.unwrap_or(0.0);
        let mut ordered: Vec<&CorpusEvent> = self.events.iter().collect();
        ordered.sort_by(|a, b| {
            let ka = a.timestamp.unwrap_or(floor);
            let kb = b.timestamp.unwrap_or(floor);
            ka.total_cmp(&kb)
        });
        ordered
    }
}

/// Delay before pushing an event stamped `current`, given the previous stamp seen
pub fn compressed_delay(previous: Option<f64>, current: Option<f64>, ratio: f64) -> Duration {
    match (previous, current) {
        (Some(prev), Some(cur)) if ratio > 0.0 => {
            let secs = (cur - prev) / ratio;
            if secs.is_finite() && secs > 0.0 {
                Duration::from_secs_f64(secs)
            } else {
                Duration::ZERO
            }
        }
        _ => Duration::ZERO,
    }
}
