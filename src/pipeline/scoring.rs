//! Sentiment scoring capability
//!
//! The enrichment stage only sees `SentimentScorer`. Calls are blocking and
//! are always run on the blocking worker pool, never on the scheduler.
//!
//! Implementations:
//! - `HttpSentimentScorer` - Google Cloud Natural Language `analyzeSentiment`
//!   (external ceiling ~600 calls/minute; the local call gate stays under it)
//! - `LexiconScorer` - offline word-list scorer for runs without credentials

use super::error::ScoringError;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Duration;

/// Documented external rate ceiling of the hosted scoring API
pub const EXTERNAL_CALLS_PER_MINUTE: u32 = 600;

/// Whether a call gate spaced by `min_interval` stays under the external ceiling
pub fn within_external_ceiling(min_interval: Duration) -> bool {
    min_interval.as_secs_f64() * f64::from(EXTERNAL_CALLS_PER_MINUTE) >= 60.0
}

pub trait SentimentScorer: Send + Sync {
    /// Raw sentiment in roughly [-1.0, 1.0]
    fn score(&self, text: &str) -> Result<f64, ScoringError>;

    fn name(&self) -> &'static str;
}

/// Clamp to [-1.0, 1.0] and round to 3 decimals
pub fn normalize_score(raw: f64) -> f64 {
    (raw.clamp(-1.0, 1.0) * 1000.0).round() / 1000.0
}

#[derive(Debug, Serialize)]
struct AnalyzeRequest<'a> {
    document: Document<'a>,
    #[serde(rename = "encodingType")]
    encoding_type: &'static str,
}

#[derive(Debug, Serialize)]
struct Document<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct AnalyzeResponse {
    #[serde(rename = "documentSentiment")]
    document_sentiment: Option<DocumentSentiment>,
}

#[derive(Debug, Deserialize)]
struct DocumentSentiment {
    score: Option<f64>,
}

/// Client for a hosted `analyzeSentiment` endpoint
pub struct HttpSentimentScorer {
    client: reqwest::blocking::Client,
    endpoint: String,
    api_key: String,
}

impl HttpSentimentScorer {
    pub fn new(endpoint: &str, api_key: &str) -> Result<Self, ScoringError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;

        log::info!("✅ Sentiment API client initialized ({})", endpoint);

        Ok(Self {
            client,
            endpoint: endpoint.to_string(),
            api_key: api_key.to_string(),
        })
    }
}

impl SentimentScorer for HttpSentimentScorer {
    fn score(&self, text: &str) -> Result<f64, ScoringError> {
        let request = AnalyzeRequest {
            document: Document {
                kind: "PLAIN_TEXT",
                content: text,
            },
            encoding_type: "UTF8",
        };

        let response = self
            .client
            .post(&self.endpoint)
            .query(&[("key", self.api_key.as_str())])
            .json(&request)
            .send()?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(ScoringError::Status(status.as_u16(), body));
        }

        let parsed: AnalyzeResponse = response
            .json()
            .map_err(|e| ScoringError::MalformedResponse(e.to_string()))?;

        parsed
            .document_sentiment
            .and_then(|s| s.score)
            .ok_or_else(|| ScoringError::MalformedResponse("missing documentSentiment.score".to_string()))
    }

    fn name(&self) -> &'static str {
        "http"
    }
}

const POSITIVE_WORDS: &[&str] = &[
    "love", "loving", "great", "good", "happy", "awesome", "amazing", "excellent", "fantastic",
    "best", "fast", "reliable", "thanks", "thank", "wonderful", "nice", "enjoy", "glad", "perfect",
    "fixed", "smooth", "improved",
];

const NEGATIVE_WORDS: &[&str] = &[
    "hate", "bad", "terrible", "awful", "worst", "slow", "broken", "down", "outage", "angry",
    "sad", "horrible", "poor", "dropped", "fail", "failed", "failing", "annoyed", "frustrated",
    "disappointed", "expensive", "useless",
];

/// Word-list scorer: (positive - negative) / matched words
pub struct LexiconScorer {
    positive: HashSet<&'static str>,
    negative: HashSet<&'static str>,
}

impl Default for LexiconScorer {
    fn default() -> Self {
        Self {
            positive: POSITIVE_WORDS.iter().copied().collect(),
            negative: NEGATIVE_WORDS.iter().copied().collect(),
        }
    }
}

impl LexiconScorer {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SentimentScorer for LexiconScorer {
    fn score(&self, text: &str) -> Result<f64, ScoringError> {
        let mut pos = 0i32;
        let mut neg = 0i32;
        for word in text
            .split(|c: char| !c.is_alphanumeric() && c != '\'')
            .filter(|w| !w.is_empty())
        {
            let word = word.to_lowercase();
            if self.positive.contains(word.as_str()) {
                pos += 1;
            } else if self.negative.contains(word.as_str()) {
                neg += 1;
            }
        }

        if pos + neg == 0 {
            return Ok(0.0);
        }
        Ok(f64::from(pos - neg) / f64::from(pos + neg))
    }

    fn name(&self) -> &'static str {
        "lexicon"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_clamps_and_rounds() {
        assert_eq!(normalize_score(1.7), 1.0);
        assert_eq!(normalize_score(-3.0), -1.0);
        assert_eq!(normalize_score(0.12345), 0.123);
        assert_eq!(normalize_score(-0.4567), -0.457);
        assert_eq!(normalize_score(0.0), 0.0);
    }

    #[test]
    fn test_external_ceiling() {
        assert!(within_external_ceiling(Duration::from_millis(100)));
        assert!(within_external_ceiling(Duration::from_millis(250)));
        assert!(!within_external_ceiling(Duration::from_millis(50)));
        assert!(!within_external_ceiling(Duration::ZERO));
    }

    #[test]
    fn test_lexicon_scores() {
        let scorer = LexiconScorer::new();
        assert_eq!(scorer.score("I love this, great coverage").unwrap(), 1.0);
        assert_eq!(scorer.score("Network is down and SLOW").unwrap(), -1.0);
        assert_eq!(scorer.score("good but slow").unwrap(), 0.0);
        assert_eq!(scorer.score("nothing to see").unwrap(), 0.0);
        let mixed = scorer.score("great great bad").unwrap();
        assert!((mixed - 1.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_request_shape() {
        let request = AnalyzeRequest {
            document: Document {
                kind: "PLAIN_TEXT",
                content: "hello",
            },
            encoding_type: "UTF8",
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["document"]["type"], "PLAIN_TEXT");
        assert_eq!(json["document"]["content"], "hello");
        assert_eq!(json["encodingType"], "UTF8");
    }

    #[test]
    fn test_response_parsing() {
        let parsed: AnalyzeResponse = serde_json::from_str(
            r#"{"documentSentiment": {"magnitude": 0.9, "score": -0.4}, "language": "en"}"#,
        )
        .unwrap();
        assert_eq!(parsed.document_sentiment.and_then(|s| s.score), Some(-0.4));
    }
}
