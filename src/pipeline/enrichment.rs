//! Enrichment stage - scores replayed events and batches them into Queue B
//!
//! Main loop:
//! 1. Drain up to `prefetch` events from Queue A without waiting
//! 2. Score them concurrently through the call gate (results kept in submission order)
//! 3. Emit every full `batch_size` slice to Queue B, keeping the overflow buffered
//! 4. On an empty pull, yield briefly and flush the partial buffer if Queue A
//!    is confirmed empty or `flush_interval` has passed since the last pull
//!
//! On stop, whatever is still buffered goes to Queue B before the loop exits.

use super::control::StageControl;
use super::error::ScoringError;
use super::queue::WorkQueue;
use super::rate_limit::CallGate;
use super::replay::ReplaySource;
use super::scoring::{
    normalize_score, within_external_ceiling, SentimentScorer, EXTERNAL_CALLS_PER_MINUTE,
};
use super::stats::PipelineStats;
use super::types::{EnrichedEvent, RawEvent};
use futures::future::join_all;
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
pub struct EnrichmentConfig {
    pub prefetch: usize,
    pub batch_size: usize,
    pub flush_interval: Duration,
    pub idle_backoff: Duration,
    pub max_concurrent: usize,
    pub min_interval: Duration,
}

impl Default for EnrichmentConfig {
    fn default() -> Self {
        Self {
            prefetch: 50,
            batch_size: 16,
            flush_interval: Duration::from_secs(5),
            idle_backoff: Duration::from_millis(10),
            max_concurrent: 5,
            min_interval: Duration::from_millis(100),
        }
    }
}

pub struct EnrichmentStage {
    config: EnrichmentConfig,
    scorer: Arc<dyn SentimentScorer>,
    gate: CallGate,
    output: Arc<WorkQueue<Vec<EnrichedEvent>>>,
    control: StageControl,
    stats: Arc<PipelineStats>,
}

impl EnrichmentStage {
    pub fn new(
        config: EnrichmentConfig,
        scorer: Arc<dyn SentimentScorer>,
        output: Arc<WorkQueue<Vec<EnrichedEvent>>>,
        stats: Arc<PipelineStats>,
    ) -> Self {
        let gate = CallGate::new(config.max_concurrent, config.min_interval);
        log::info!(
            "🧠 Enrichment stage ready (scorer: {}, batch_size: {}, max_concurrent: {}, min_interval: {}ms)",
            scorer.name(),
            config.batch_size,
            gate.max_concurrent(),
            config.min_interval.as_millis()
        );
        if !within_external_ceiling(config.min_interval) {
            log::warn!(
                "⚠️  min_interval {}ms allows more than {} scoring calls/minute",
                config.min_interval.as_millis(),
                EXTERNAL_CALLS_PER_MINUTE
            );
        }
        Self {
            config,
            scorer,
            gate,
            output,
            control: StageControl::new(),
            stats,
        }
    }

    /// Consume Queue A from `source` until stopped
    pub async fn run(&self, source: &ReplaySource) {
        if !self.control.start() {
            log::warn!("⚠️  Enrichment stage stopped before it started");
        }
        let batch_size = self.config.batch_size.max(1);
        let mut buffer: Vec<EnrichedEvent> = Vec::new();
        let mut last_pull = Instant::now();

        log::info!("🚀 Enrichment stage started");

        while self.control.is_running() {
            let pulled = source.take_available(self.config.prefetch.max(1));

            if !pulled.is_empty() {
                let enriched = self.enrich_batch(pulled).await;
                buffer.extend(enriched);
                last_pull = Instant::now();

                while buffer.len() >= batch_size {
                    let batch: Vec<EnrichedEvent> = buffer.drain(..batch_size).collect();
                    self.emit(batch).await;
                    log::debug!("Emitted batch: {} events scored", batch_size);
                }
            } else {
                if !self.control.sleep(self.config.idle_backoff).await {
                    break;
                }

                if !buffer.is_empty() {
                    let queue_empty = source.queue_size() == 0;
                    let timed_out = last_pull.elapsed() >= self.config.flush_interval;
                    if queue_empty || timed_out {
                        let count = buffer.len();
                        self.emit(std::mem::take(&mut buffer)).await;
                        last_pull = Instant::now();
                        log::debug!(
                            "Flushed batch: {} events (empty={}, timeout={})",
                            count,
                            queue_empty,
                            timed_out
                        );
                    }
                }
            }
        }

        if !buffer.is_empty() {
            let count = buffer.len();
            self.emit(buffer).await;
            log::info!("🔄 Flushed {} buffered events on stop", count);
        }

        self.control.stop();
        log::info!("✅ Enrichment stage stopped");
    }

    async fn emit(&self, batch: Vec<EnrichedEvent>) {
        self.output.push(batch).await;
        PipelineStats::incr(&self.stats.batches_emitted);
    }

    /// Score a group of events concurrently; output order matches input order
    pub async fn enrich_batch(&self, events: Vec<RawEvent>) -> Vec<EnrichedEvent> {
        let enriched = join_all(events.into_iter().map(|event| self.enrich_one(event))).await;
        PipelineStats::add(&self.stats.events_enriched, enriched.len());
        enriched
    }

    /// Score one event; failures yield a neutral score with the error recorded
    pub async fn enrich_one(&self, event: RawEvent) -> EnrichedEvent {
        if event.text.is_empty() {
            return EnrichedEvent::neutral(event, None);
        }

        match self.call_scorer(&event.text).await {
            Ok(raw) => EnrichedEvent {
                raw: event,
                sentiment_score: normalize_score(raw),
                scoring_error: None,
            },
            Err(e) => {
                log::error!("❌ Error scoring event {}: {}", event.id, e);
                PipelineStats::incr(&self.stats.scoring_failures);
                EnrichedEvent::neutral(event, Some(e.to_string()))
            }
        }
    }

    async fn call_scorer(&self, text: &str) -> Result<f64, ScoringError> {
        let scorer = self.scorer.clone();
        let stats = self.stats.clone();
        let text = text.to_string();
        let score = self
            .gate
            .call(move || {
                PipelineStats::incr(&stats.scoring_calls);
                scorer.score(&text)
            })
            .await??;

        if score.is_nan() {
            return Err(ScoringError::MalformedResponse("score is NaN".to_string()));
        }
        Ok(score)
    }

    /// Next batch from Queue B, or `None` after waiting `timeout`
    pub async fn get_batch(&self, timeout: Duration) -> Option<Vec<EnrichedEvent>> {
        self.output.pop_timeout(timeout).await
    }

    /// Everything still sitting in Queue B, without waiting
    pub fn take_pending(&self) -> Vec<Vec<EnrichedEvent>> {
        self.output.drain_up_to(usize::MAX)
    }

    pub fn queue_size(&self) -> usize {
        self.output.len()
    }

    pub fn is_running(&self) -> bool {
        self.control.is_running()
    }

    pub fn stop(&self) {
        self.control.stop();
        log::info!("⏹️  Enrichment stage stop requested");
    }

    /// Re-arm after a stop so `run` can be called again
    pub fn reset(&self) {
        self.control.reset();
    }
}
