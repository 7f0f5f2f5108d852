//! Core event and record types flowing through the pipeline
//!
//! ```text
//! RawEvent ──(enrichment)──▶ EnrichedEvent ──(aggregation)──▶ StoredRecord
//! ```
//!
//! All three are immutable once built. Ownership moves stage to stage
//! through the queues; nothing is shared mutably.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Maximum text length kept from a corpus item
pub const MAX_TEXT_CHARS: usize = 4000;

/// Event replayed from the corpus, as it sits in Queue A
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawEvent {
    pub id: String,
    pub text: String,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    /// Timestamp parsed from the corpus; `None` when it failed to parse
    pub original_timestamp: Option<DateTime<Utc>>,
    /// Instant the event entered Queue A
    pub enqueued_at: DateTime<Utc>,
    pub source: String,
    pub metadata: Map<String, Value>,
}

impl RawEvent {
    /// Location pair, present only when both coordinates are
    pub fn location(&self) -> Option<GeoPoint> {
        match (self.latitude, self.longitude) {
            (Some(lat), Some(lon)) => Some(GeoPoint { lat, lon }),
            _ => None,
        }
    }
}

/// Raw event plus its sentiment score
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichedEvent {
    #[serde(flatten)]
    pub raw: RawEvent,
    /// Always defined; clamped to [-1.0, 1.0] and rounded to 3 decimals
    pub sentiment_score: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scoring_error: Option<String>,
}

impl EnrichedEvent {
    pub fn neutral(raw: RawEvent, scoring_error: Option<String>) -> Self {
        Self {
            raw,
            sentiment_score: 0.0,
            scoring_error,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lon: f64,
}

/// Coarse quadrant of the continental bounding box
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Region {
    Northwest,
    Northeast,
    Southwest,
    Southeast,
}

impl Region {
    pub fn as_str(&self) -> &'static str {
        match self {
            Region::Northwest => "NORTHWEST",
            Region::Northeast => "NORTHEAST",
            Region::Southwest => "SOUTHWEST",
            Region::Southeast => "SOUTHEAST",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "NORTHWEST" => Some(Region::Northwest),
            "NORTHEAST" => Some(Region::Northeast),
            "SOUTHWEST" => Some(Region::Southwest),
            "SOUTHEAST" => Some(Region::Southeast),
            _ => None,
        }
    }
}

/// Row written to the persistence sink
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredRecord {
    pub event_id: String,
    pub text: String,
    pub location: Option<GeoPoint>,
    pub region: Option<Region>,
    pub observed_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub sentiment_score: f64,
}

/// Expiry instant for a record observed at `observed_at`
pub fn expiry_for(observed_at: DateTime<Utc>, ttl: std::time::Duration) -> DateTime<Utc> {
    Duration::from_std(ttl)
        .ok()
        .and_then(|ttl| observed_at.checked_add_signed(ttl))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn raw(lat: Option<f64>, lon: Option<f64>) -> RawEvent {
        RawEvent {
            id: "e1".to_string(),
            text: "hello".to_string(),
            latitude: lat,
            longitude: lon,
            original_timestamp: None,
            enqueued_at: Utc::now(),
            source: "synthetic".to_string(),
            metadata: Map::new(),
        }
    }

    #[test]
    fn test_location_requires_both_coordinates() {
        assert!(raw(Some(1.0), None).location().is_none());
        assert!(raw(None, Some(1.0)).location().is_none());
        assert_eq!(
            raw(Some(41.0), Some(-80.0)).location(),
            Some(GeoPoint { lat: 41.0, lon: -80.0 })
        );
    }

    #[test]
    fn test_enriched_event_flattens_raw_fields() {
        let event = EnrichedEvent {
            raw: raw(Some(30.0), Some(-80.0)),
            sentiment_score: 0.25,
            scoring_error: None,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["id"], "e1");
        assert_eq!(json["sentiment_score"], 0.25);
        assert!(json.get("scoring_error").is_none());
    }

    #[test]
    fn test_expiry_adds_ttl() {
        let t = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let expires = expiry_for(t, std::time::Duration::from_secs(90));
        assert_eq!(expires, t + Duration::seconds(90));
    }

    #[test]
    fn test_region_string_roundtrip() {
        for region in [
            Region::Northwest,
            Region::Northeast,
            Region::Southwest,
            Region::Southeast,
        ] {
            assert_eq!(Region::parse(region.as_str()), Some(region));
        }
        assert_eq!(Region::parse("MIDWEST"), None);
    }
}
