//! Pipeline configuration from environment variables

use super::error::{PipelineError, PipelineResult};
use std::env;
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_SENTIMENT_API_URL: &str =
    "https://language.googleapis.com/v1/documents:analyzeSentiment";

/// Configuration for pipeline runtime
///
/// Loaded from environment variables with sensible defaults.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Path to the JSON corpus replayed by the source
    pub corpus_path: String,

    /// Path to SQLite database file
    pub db_path: String,

    /// Wall-clock time the whole corpus replay should take
    pub replay_duration: Duration,

    /// Ceiling on events pushed into Queue A per second
    pub replay_rate_limit: f64,

    /// Capacity of Queue A (events) and Queue B (batches)
    pub queue_capacity: usize,

    /// Max events drained from Queue A per enrichment round
    pub enrich_prefetch: usize,

    pub enrich_batch_size: usize,
    pub enrich_flush_interval: Duration,
    pub enrich_idle_backoff: Duration,

    /// Scoring calls allowed in flight at once
    pub scoring_max_concurrent: usize,

    /// Minimum spacing between the starts of two scoring calls
    pub scoring_min_interval: Duration,

    pub aggregate_batch_size: usize,
    pub aggregate_pull_timeout: Duration,

    pub record_ttl: Duration,
    pub sweep_interval: Duration,

    /// Outbound buffer per broadcast subscriber
    pub subscriber_buffer: usize,

    /// How long stop() waits for each stage before aborting it
    pub shutdown_grace: Duration,

    pub sentiment_api_key: Option<String>,
    pub sentiment_api_url: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            corpus_path: "data/synthetic_tweets.json".to_string(),
            db_path: "pulse.db".to_string(),
            replay_duration: Duration::from_secs(600),
            replay_rate_limit: 50.0,
            queue_capacity: 10_000,
            enrich_prefetch: 50,
            enrich_batch_size: 16,
            enrich_flush_interval: Duration::from_millis(5_000),
            enrich_idle_backoff: Duration::from_millis(10),
            scoring_max_concurrent: 5,
            scoring_min_interval: Duration::from_millis(100),
            aggregate_batch_size: 20,
            aggregate_pull_timeout: Duration::from_millis(2_000),
            record_ttl: Duration::from_secs(90),
            sweep_interval: Duration::from_secs(10),
            subscriber_buffer: 64,
            shutdown_grace: Duration::from_millis(5_000),
            sentiment_api_key: None,
            sentiment_api_url: DEFAULT_SENTIMENT_API_URL.to_string(),
        }
    }
}

fn parsed<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(default)
}

fn millis(key: &str, default: Duration) -> Duration {
    Duration::from_millis(parsed(key, default.as_millis() as u64))
}

fn secs(key: &str, default: Duration) -> Duration {
    Duration::from_secs_f64(parsed(key, default.as_secs_f64()).max(0.0))
}

impl PipelineConfig {
    /// Load configuration from environment variables
    ///
    /// Environment variables:
    /// - `PULSE_CORPUS_PATH` (default: data/synthetic_tweets.json)
    /// - `PULSE_DB_PATH` (default: pulse.db)
    /// - `REPLAY_DURATION_SECS` (default: 600)
    /// - `REPLAY_RATE_LIMIT` (default: 50)
    /// - `QUEUE_CAPACITY` (default: 10000)
    /// - `ENRICH_PREFETCH` (default: 50)
    /// - `ENRICH_BATCH_SIZE` (default: 16)
    /// - `ENRICH_FLUSH_INTERVAL_MS` (default: 5000)
    /// - `ENRICH_IDLE_BACKOFF_MS` (default: 10)
    /// - `SCORING_MAX_CONCURRENT` (default: 5)
    /// - `SCORING_MIN_INTERVAL_MS` (default: 100)
    /// - `AGGREGATE_BATCH_SIZE` (default: 20)
    /// - `AGGREGATE_PULL_TIMEOUT_MS` (default: 2000)
    /// - `RECORD_TTL_SECS` (default: 90)
    /// - `SWEEP_INTERVAL_SECS` (default: 10)
    /// - `SUBSCRIBER_BUFFER` (default: 64)
    /// - `SHUTDOWN_GRACE_MS` (default: 5000)
    /// - `SENTIMENT_API_KEY` (default: unset, offline lexicon scorer)
    /// - `SENTIMENT_API_URL` (default: Google Natural Language analyzeSentiment)
    pub fn from_env() -> PipelineResult<Self> {
        let d = Self::default();

        let config = Self {
            corpus_path: env::var("PULSE_CORPUS_PATH").unwrap_or(d.corpus_path),
            db_path: env::var("PULSE_DB_PATH").unwrap_or(d.db_path),
            replay_duration: secs("REPLAY_DURATION_SECS", d.replay_duration),
            replay_rate_limit: parsed("REPLAY_RATE_LIMIT", d.replay_rate_limit),
            queue_capacity: parsed("QUEUE_CAPACITY", d.queue_capacity),
            enrich_prefetch: parsed("ENRICH_PREFETCH", d.enrich_prefetch),
            enrich_batch_size: parsed("ENRICH_BATCH_SIZE", d.enrich_batch_size),
            enrich_flush_interval: millis("ENRICH_FLUSH_INTERVAL_MS", d.enrich_flush_interval),
            enrich_idle_backoff: millis("ENRICH_IDLE_BACKOFF_MS", d.enrich_idle_backoff),
            scoring_max_concurrent: parsed("SCORING_MAX_CONCURRENT", d.scoring_max_concurrent),
            scoring_min_interval: millis("SCORING_MIN_INTERVAL_MS", d.scoring_min_interval),
            aggregate_batch_size: parsed("AGGREGATE_BATCH_SIZE", d.aggregate_batch_size),
            aggregate_pull_timeout: millis("AGGREGATE_PULL_TIMEOUT_MS", d.aggregate_pull_timeout),
            record_ttl: secs("RECORD_TTL_SECS", d.record_ttl),
            sweep_interval: secs("SWEEP_INTERVAL_SECS", d.sweep_interval),
            subscriber_buffer: parsed("SUBSCRIBER_BUFFER", d.subscriber_buffer),
            shutdown_grace: millis("SHUTDOWN_GRACE_MS", d.shutdown_grace),
            sentiment_api_key: env::var("SENTIMENT_API_KEY")
                .ok()
                .filter(|k| !k.trim().is_empty()),
            sentiment_api_url: env::var("SENTIMENT_API_URL").unwrap_or(d.sentiment_api_url),
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> PipelineResult<()> {
        let positive = [
            ("queue_capacity", self.queue_capacity),
            ("enrich_prefetch", self.enrich_prefetch),
            ("enrich_batch_size", self.enrich_batch_size),
            ("scoring_max_concurrent", self.scoring_max_concurrent),
            ("aggregate_batch_size", self.aggregate_batch_size),
            ("subscriber_buffer", self.subscriber_buffer),
        ];
        for (name, value) in positive {
            if value == 0 {
                return Err(PipelineError::Config(format!("{} must be > 0", name)));
            }
        }

        let durations = [
            ("replay_duration", self.replay_duration),
            ("enrich_flush_interval", self.enrich_flush_interval),
            ("enrich_idle_backoff", self.enrich_idle_backoff),
            ("aggregate_pull_timeout", self.aggregate_pull_timeout),
            ("sweep_interval", self.sweep_interval),
        ];
        for (name, value) in durations {
            if value.is_zero() {
                return Err(PipelineError::Config(format!("{} must be > 0", name)));
            }
        }

        if !(self.replay_rate_limit > 0.0) || !self.replay_rate_limit.is_finite() {
            return Err(PipelineError::Config(format!(
                "replay_rate_limit must be a positive number, got {}",
                self.replay_rate_limit
            )));
        }

        Ok(())
    }
}
