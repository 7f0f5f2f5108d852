//! Replay source - pushes a recorded corpus into Queue A as if it were live
//!
//! Original inter-arrival gaps are divided by the compression ratio so the
//! whole corpus takes roughly `replay_duration`. A push-rate ceiling adds
//! extra delay whenever the compressed schedule would run faster.

use super::control::StageControl;
use super::corpus::{compressed_delay, Corpus};
use super::error::{PipelineError, PipelineResult};
use super::queue::WorkQueue;
use super::stats::PipelineStats;
use super::types::RawEvent;
use chrono::Utc;
use std::path::Path;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
pub struct ReplayConfig {
    pub replay_duration: Duration,
    /// Max events per second pushed into Queue A
    pub rate_limit: f64,
    pub source_tag: String,
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            replay_duration: Duration::from_secs(600),
            rate_limit: 50.0,
            source_tag: "synthetic".to_string(),
        }
    }
}

/// Summary logged and returned after a successful load
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CorpusSummary {
    pub events: usize,
    pub timestamped: usize,
    pub span_secs: f64,
    pub compression_ratio: f64,
}

pub struct ReplaySource {
    config: ReplayConfig,
    corpus: RwLock<Option<Arc<Corpus>>>,
    queue: Arc<WorkQueue<RawEvent>>,
    control: StageControl,
    stats: Arc<PipelineStats>,
}

impl ReplaySource {
    pub fn new(
        config: ReplayConfig,
        queue: Arc<WorkQueue<RawEvent>>,
        stats: Arc<PipelineStats>,
    ) -> Self {
        Self {
            config,
            corpus: RwLock::new(None),
            queue,
            control: StageControl::new(),
            stats,
        }
    }

    /// Load and validate the corpus file
    pub fn load(&self, corpus_path: impl AsRef<Path>) -> PipelineResult<CorpusSummary> {
        let corpus = Corpus::from_path(corpus_path.as_ref()).map_err(|e| {
            log::error!("❌ Failed to load corpus {}: {}", corpus_path.as_ref().display(), e);
            e
        })?;
        Ok(self.set_corpus(corpus))
    }

    /// Install an already-parsed corpus
    pub fn set_corpus(&self, corpus: Corpus) -> CorpusSummary {
        let summary = CorpusSummary {
            events: corpus.len(),
            timestamped: corpus.timestamped_count(),
            span_secs: corpus.span_secs(),
            compression_ratio: corpus.compression_ratio(self.config.replay_duration),
        };

        if summary.timestamped == 0 {
            log::warn!("⚠️  No timestamps found in corpus, replaying without compression");
        }
        log::info!(
            "📂 Loaded {} events (span: {:.0}s, replay: {:.1}s, compression: {:.2}x)",
            summary.events,
            summary.span_secs,
            self.config.replay_duration.as_secs_f64(),
            summary.compression_ratio
        );

        *self.corpus.write().unwrap_or_else(PoisonError::into_inner) = Some(Arc::new(corpus));
        summary
    }

    fn loaded_corpus(&self) -> Option<Arc<Corpus>> {
        self.corpus
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Replay the loaded corpus into Queue A
    ///
    /// Single cooperative producer: suspends for each compressed gap, then
    /// pushes. Returns the number of events pushed, which equals the corpus
    /// size unless stopped early.
    pub async fn feed(&self) -> PipelineResult<usize> {
        let corpus = self.loaded_corpus().ok_or_else(|| {
            PipelineError::CorpusInvalid("no corpus loaded, call load() first".to_string())
        })?;

        let min_gap = Duration::try_from_secs_f64(1.0 / self.config.rate_limit).map_err(|_| {
            PipelineError::Config(format!(
                "replay rate_limit must be a positive number, got {}",
                self.config.rate_limit
            ))
        })?;

        if !self.control.start() {
            log::warn!("⚠️  Replay stopped before it started");
            return Ok(0);
        }

        let ratio = corpus.compression_ratio(self.config.replay_duration);
        let ordered = corpus.replay_order();
        let total = ordered.len();

        log::info!("▶️  Starting replay of {} events", total);

        let mut previous_ts: Option<f64> = None;
        let mut last_push: Option<Instant> = None;
        let mut pushed = 0usize;

        for (position, event) in ordered.into_iter().enumerate() {
            if !self.control.is_running() {
                break;
            }

            let mut wait = compressed_delay(previous_ts, event.timestamp, ratio);
            if event.timestamp.is_some() {
                previous_ts = event.timestamp;
            }

            // Rate ceiling: never push closer than 1/rate_limit apart
            if let Some(last) = last_push {
                wait = wait.max(min_gap.saturating_sub(last.elapsed()));
            }

            if !wait.is_zero() && !self.control.sleep(wait).await {
                break;
            }

            let raw = event.to_raw_event(position, &self.config.source_tag, Utc::now());
            self.queue.push(raw).await;
            last_push = Some(Instant::now());
            pushed += 1;
            PipelineStats::incr(&self.stats.events_replayed);

            if position % 100 == 0 {
                log::debug!("Queued {}/{} events", position, total);
            }
        }

        let completed = pushed == total;
        self.control.stop();
        if completed {
            log::info!("✅ Replay complete: {} events pushed", pushed);
        } else {
            log::info!("⏹️  Replay stopped after {}/{} events", pushed, total);
        }

        Ok(pushed)
    }

    /// Next event from Queue A, never waits
    pub fn get_next(&self) -> Option<RawEvent> {
        self.queue.try_pop()
    }

    /// Drain up to `max` events from Queue A, never waits
    pub fn take_available(&self, max: usize) -> Vec<RawEvent> {
        self.queue.drain_up_to(max)
    }

    pub fn queue_size(&self) -> usize {
        self.queue.len()
    }

    pub fn is_running(&self) -> bool {
        self.control.is_running()
    }

    /// Re-arm after a stop or completed replay so `feed` can run again
    pub fn reset(&self) {
        self.control.reset();
    }

    /// Stop feeding and clear Queue A
    pub fn stop(&self) {
        self.control.stop();
        let dropped = self.queue.clear();
        log::info!("⏹️  Replay source stopped, queue cleared ({} dropped)", dropped);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn source(duration: Duration, rate_limit: f64) -> ReplaySource {
        ReplaySource::new(
            ReplayConfig {
                replay_duration: duration,
                rate_limit,
                source_tag: "synthetic".to_string(),
            },
            Arc::new(WorkQueue::new(1_000)),
            Arc::new(PipelineStats::new()),
        )
    }

    #[test]
    fn test_load_reports_compression() {
        let mut file = NamedTempFile::new().unwrap();
        write!(
            file,
            "{}",
            json!({"tweets": [
                {"text": "a", "timestamp": 0},
                {"text": "b", "timestamp": 1200}
            ]})
        )
        .unwrap();

        let replay = source(Duration::from_secs(600), 50.0);
        let summary = replay.load(file.path()).unwrap();
        assert_eq!(summary.events, 2);
        assert_eq!(summary.compression_ratio, 2.0);
    }

    #[test]
    fn test_load_missing_file_is_corpus_invalid() {
        let replay = source(Duration::from_secs(1), 50.0);
        assert!(matches!(
            replay.load("/nonexistent/corpus.json"),
            Err(PipelineError::CorpusInvalid(_))
        ));
    }

    #[tokio::test]
    async fn test_feed_without_corpus_fails() {
        let replay = source(Duration::from_secs(1), 50.0);
        assert!(matches!(
            replay.feed().await,
            Err(PipelineError::CorpusInvalid(_))
        ));
    }

    #[tokio::test]
    async fn test_feed_rejects_invalid_rate_limit() {
        for rate_limit in [0.0, -5.0, f64::NAN] {
            let replay = source(Duration::from_secs(1), rate_limit);
            replay.set_corpus(Corpus::from_value(&json!([{"text": "a", "timestamp": 0}])).unwrap());

            assert!(matches!(
                replay.feed().await,
                Err(PipelineError::Config(_))
            ));
            assert_eq!(replay.queue_size(), 0);
            assert!(!replay.is_running());
        }
    }

    #[tokio::test]
    async fn test_feed_pushes_every_event_in_order() {
        // Span 20s compressed into 0.2s: 100ms per original 10s gap
        let corpus = Corpus::from_value(&json!([
            {"id": "c", "text": "third", "timestamp": 20},
            {"id": "a", "text": "first", "timestamp": 0},
            {"id": "b", "text": "second", "timestamp": 10}
        ]))
        .unwrap();
        let replay = source(Duration::from_millis(200), 1_000.0);
        replay.set_corpus(corpus);

        let start = Instant::now();
        let pushed = replay.feed().await.unwrap();
        let elapsed = start.elapsed();

        assert_eq!(pushed, 3);
        assert!(elapsed >= Duration::from_millis(190), "elapsed {:?}", elapsed);
        assert!(elapsed < Duration::from_secs(2), "elapsed {:?}", elapsed);
        assert!(!replay.is_running());

        let events: Vec<RawEvent> = std::iter::from_fn(|| replay.get_next()).collect();
        let ids: Vec<_> = events.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
        assert!(events
            .windows(2)
            .all(|w| w[0].enqueued_at <= w[1].enqueued_at));

        let gap = events[1].enqueued_at - events[0].enqueued_at;
        assert!(gap >= chrono::Duration::milliseconds(90), "gap {:?}", gap);
    }

    #[tokio::test]
    async fn test_rate_limit_spaces_simultaneous_events() {
        // Identical timestamps would push instantly; 20/s forces 50ms spacing
        let items: Vec<_> = (0..5)
            .map(|i| json!({"id": format!("e{}", i), "text": "x", "timestamp": 100}))
            .collect();
        let replay = source(Duration::from_secs(1), 20.0);
        replay.set_corpus(Corpus::from_value(&json!(items)).unwrap());

        let start = Instant::now();
        assert_eq!(replay.feed().await.unwrap(), 5);
        assert!(start.elapsed() >= Duration::from_millis(195));
        assert_eq!(replay.queue_size(), 5);
    }

    #[tokio::test]
    async fn test_stop_interrupts_feed_and_clears_queue() {
        let corpus = Corpus::from_value(&json!([
            {"text": "a", "timestamp": 0},
            {"text": "b", "timestamp": 1},
            {"text": "c", "timestamp": 1000}
        ]))
        .unwrap();
        let replay = Arc::new(source(Duration::from_secs(60), 1_000.0));
        replay.set_corpus(corpus);

        let feeder = replay.clone();
        let handle = tokio::spawn(async move { feeder.feed().await });

        tokio::time::sleep(Duration::from_millis(100)).await;
        replay.stop();

        let pushed = handle.await.unwrap().unwrap();
        assert!(pushed < 3);
        assert_eq!(replay.queue_size(), 0);
        assert!(replay.get_next().is_none());
    }
}
