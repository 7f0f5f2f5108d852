//! Aggregation stage - accumulates enriched batches, persists and broadcasts
//!
//! Main loop:
//! 1. Pull the next batch from Queue B, waiting at most `pull_timeout`
//! 2. Append it to the accumulator
//! 3. While the accumulator holds `batch_size` events, flush exactly that many (oldest first)
//! 4. On a pull timeout, flush whatever is accumulated
//!
//! On stop, batches still sitting in Queue B are drained and the remainder is
//! flushed before the loop exits.
//!
//! A flush persists first, then broadcasts the same slice. A persistence
//! failure is logged and counted; the slice is still broadcast.

use super::broadcast::BroadcastSink;
use super::control::StageControl;
use super::db::RecordStore;
use super::enrichment::EnrichmentStage;
use super::stats::PipelineStats;
use super::types::{expiry_for, EnrichedEvent, GeoPoint, Region, StoredRecord};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;

/// Continental bounding box (exclusive) and the quadrant split lines
const LAT_MIN: f64 = 25.0;
const LAT_MAX: f64 = 49.0;
const LON_MIN: f64 = -125.0;
const LON_MAX: f64 = -65.0;
const LAT_SPLIT: f64 = 40.0;
const LON_SPLIT: f64 = -100.0;

#[derive(Debug, Clone)]
pub struct AggregationConfig {
    pub batch_size: usize,
    pub ttl: Duration,
    pub pull_timeout: Duration,
}

impl Default for AggregationConfig {
    fn default() -> Self {
        Self {
            batch_size: 20,
            ttl: Duration::from_secs(90),
            pull_timeout: Duration::from_secs(2),
        }
    }
}

/// Coarse quadrant for a point, `None` outside the bounding box
pub fn classify_region(lat: f64, lon: f64) -> Option<Region> {
    let inside = lat > LAT_MIN && lat < LAT_MAX && lon > LON_MIN && lon < LON_MAX;
    if !inside {
        return None;
    }

    let north = lat > LAT_SPLIT;
    let west = lon < LON_SPLIT;
    Some(match (north, west) {
        (true, true) => Region::Northwest,
        (true, false) => Region::Northeast,
        (false, true) => Region::Southwest,
        (false, false) => Region::Southeast,
    })
}

/// Map an enriched event to the row persisted for it
pub fn to_record(event: &EnrichedEvent, now: DateTime<Utc>, ttl: Duration) -> StoredRecord {
    let location: Option<GeoPoint> = event.raw.location();
    let observed_at = event.raw.original_timestamp.unwrap_or(now);

    StoredRecord {
        event_id: event.raw.id.clone(),
        text: event.raw.text.clone(),
        location,
        region: location.and_then(|p| classify_region(p.lat, p.lon)),
        observed_at,
        expires_at: expiry_for(observed_at, ttl),
        sentiment_score: event.sentiment_score,
    }
}

pub struct AggregationStage {
    config: AggregationConfig,
    store: Arc<dyn RecordStore>,
    sink: Arc<dyn BroadcastSink>,
    control: StageControl,
    stats: Arc<PipelineStats>,
}

impl AggregationStage {
    pub fn new(
        config: AggregationConfig,
        store: Arc<dyn RecordStore>,
        sink: Arc<dyn BroadcastSink>,
        stats: Arc<PipelineStats>,
    ) -> Self {
        Self {
            config,
            store,
            sink,
            control: StageControl::new(),
            stats,
        }
    }

    /// Consume Queue B from `upstream` until stopped
    pub async fn run(&self, upstream: &EnrichmentStage) {
        if !self.control.start() {
            log::warn!("⚠️  Aggregation stage stopped before it started");
        }
        let batch_size = self.config.batch_size.max(1);
        let mut accumulator: Vec<EnrichedEvent> = Vec::new();

        log::info!("🚀 Aggregation stage started");
        log::info!("   ├─ Batch size: {}", batch_size);
        log::info!("   ├─ TTL: {}s", self.config.ttl.as_secs());
        log::info!("   └─ Pull timeout: {}ms", self.config.pull_timeout.as_millis());

        while self.control.is_running() {
            let pulled = tokio::select! {
                batch = upstream.get_batch(self.config.pull_timeout) => batch,
                _ = self.control.stopped() => break,
            };

            match pulled {
                Some(batch) => {
                    accumulator.extend(batch);
                    while accumulator.len() >= batch_size {
                        let slice: Vec<EnrichedEvent> = accumulator.drain(..batch_size).collect();
                        self.flush(&slice).await;
                    }
                }
                None => {
                    if !accumulator.is_empty() {
                        log::debug!("Pull timed out, flushing {} accumulated events", accumulator.len());
                        self.flush(&std::mem::take(&mut accumulator)).await;
                    }
                }
            }
        }

        for batch in upstream.take_pending() {
            accumulator.extend(batch);
        }
        if !accumulator.is_empty() {
            log::info!("🔄 Performing final flush of {} events...", accumulator.len());
            self.flush(&accumulator).await;
        }

        self.control.stop();
        log::info!("✅ Aggregation stage stopped");
    }

    /// Persist then broadcast one slice
    ///
    /// Returns the number of records persisted (0 on persistence failure).
    pub async fn flush(&self, events: &[EnrichedEvent]) -> usize {
        if events.is_empty() {
            return 0;
        }

        let now = Utc::now();
        let records: Vec<StoredRecord> = events
            .iter()
            .map(|event| to_record(event, now, self.config.ttl))
            .collect();

        let persisted = match self.store.insert_batch(&records).await {
            Ok(written) => {
                PipelineStats::add(&self.stats.records_persisted, written);
                log::info!("💾 Saved {} events to database", written);
                written
            }
            Err(e) => {
                PipelineStats::incr(&self.stats.persistence_failures);
                log::error!("❌ Failed to persist batch of {} events: {}", records.len(), e);
                0
            }
        };

        self.sink.publish(events).await;
        persisted
    }

    pub fn is_running(&self) -> bool {
        self.control.is_running()
    }

    pub fn stop(&self) {
        self.control.stop();
        log::info!("⏹️  Aggregation stage stop requested");
    }

    pub fn reset(&self) {
        self.control.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::broadcast::{BroadcastHub, FeedMessage};
    use crate::pipeline::db::SqliteRecordStore;
    use crate::pipeline::enrichment::EnrichmentConfig;
    use crate::pipeline::error::{ScoringError, StoreError};
    use crate::pipeline::queue::WorkQueue;
    use crate::pipeline::scoring::SentimentScorer;
    use crate::pipeline::types::RawEvent;
    use async_trait::async_trait;
    use chrono::TimeZone;
    use serde_json::Map;
    use tempfile::tempdir;

    struct ConstScorer;

    impl SentimentScorer for ConstScorer {
        fn score(&self, _text: &str) -> Result<f64, ScoringError> {
            Ok(0.5)
        }

        fn name(&self) -> &'static str {
            "const"
        }
    }

    struct FailingStore;

    #[async_trait]
    impl RecordStore for FailingStore {
        async fn insert_batch(&self, _records: &[StoredRecord]) -> Result<usize, StoreError> {
            Err(StoreError::Unavailable("disk on fire".to_string()))
        }

        async fn delete_expired(&self, _now: DateTime<Utc>) -> Result<usize, StoreError> {
            Ok(0)
        }

        async fn recent(&self, _limit: usize) -> Result<Vec<StoredRecord>, StoreError> {
            Ok(Vec::new())
        }
    }

    fn event(id: &str, lat: Option<f64>, lon: Option<f64>) -> EnrichedEvent {
        EnrichedEvent {
            raw: RawEvent {
                id: id.to_string(),
                text: format!("event {}", id),
                latitude: lat,
                longitude: lon,
                original_timestamp: None,
                enqueued_at: Utc::now(),
                source: "synthetic".to_string(),
                metadata: Map::new(),
            },
            sentiment_score: 0.5,
            scoring_error: None,
        }
    }

    fn upstream(output: Arc<WorkQueue<Vec<EnrichedEvent>>>) -> EnrichmentStage {
        EnrichmentStage::new(
            EnrichmentConfig::default(),
            Arc::new(ConstScorer),
            output,
            Arc::new(PipelineStats::new()),
        )
    }

    #[test]
    fn test_region_quadrants() {
        assert_eq!(classify_region(41.0, -105.0), Some(Region::Northwest));
        assert_eq!(classify_region(41.0, -80.0), Some(Region::Northeast));
        assert_eq!(classify_region(30.0, -105.0), Some(Region::Southwest));
        assert_eq!(classify_region(30.0, -80.0), Some(Region::Southeast));
        assert_eq!(classify_region(10.0, -80.0), None);
        assert_eq!(classify_region(49.0, -80.0), None);
        assert_eq!(classify_region(30.0, -130.0), None);
    }

    #[test]
    fn test_record_expiry_from_original_timestamp() {
        let t = Utc.with_ymd_and_hms(2024, 3, 1, 8, 0, 0).unwrap();
        let mut e = event("a", Some(41.0), Some(-105.0));
        e.raw.original_timestamp = Some(t);

        let record = to_record(&e, Utc::now(), Duration::from_secs(90));
        assert_eq!(record.observed_at, t);
        assert_eq!(record.expires_at, t + chrono::Duration::seconds(90));
        assert_eq!(record.region, Some(Region::Northwest));
    }

    #[test]
    fn test_record_without_timestamp_or_location() {
        let now = Utc::now();
        let record = to_record(&event("b", Some(41.0), None), now, Duration::from_secs(90));
        assert_eq!(record.observed_at, now);
        assert!(record.location.is_none());
        assert!(record.region.is_none());
    }

    #[tokio::test]
    async fn test_run_persists_every_event() {
        let dir = tempdir().unwrap();
        let store = Arc::new(SqliteRecordStore::open(dir.path().join("agg.db")).unwrap());
        let stats = Arc::new(PipelineStats::new());
        let hub = Arc::new(BroadcastHub::new(64, stats.clone()));
        let mut rx = hub.connect("watcher");

        let queue = Arc::new(WorkQueue::new(100));
        let enrichment = Arc::new(upstream(queue.clone()));
        let stage = Arc::new(AggregationStage::new(
            AggregationConfig {
                batch_size: 5,
                ttl: Duration::from_secs(90),
                pull_timeout: Duration::from_millis(50),
            },
            store.clone(),
            hub.clone(),
            stats.clone(),
        ));

        // 3 + 4 + 6 = 13 events: two size-triggered flushes, one timeout flush
        for (b, size) in [3usize, 4, 6].iter().enumerate() {
            let batch = (0..*size)
                .map(|i| event(&format!("b{}-{}", b, i), Some(30.0), Some(-80.0)))
                .collect();
            queue.push(batch).await;
        }

        let runner = stage.clone();
        let up = enrichment.clone();
        let handle = tokio::spawn(async move { runner.run(&up).await });

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(store.count().unwrap(), 13);

        stage.stop();
        handle.await.unwrap();
        assert!(!stage.is_running());

        assert_eq!(stats.snapshot().records_persisted, 13);
        let mut broadcast = 0;
        while let Ok(msg) = rx.try_recv() {
            if let FeedMessage::Tweets { count, .. } = msg.as_ref() {
                broadcast += count;
            }
        }
        assert_eq!(broadcast, 13);
    }

    #[tokio::test]
    async fn test_stop_drains_queue_b() {
        let dir = tempdir().unwrap();
        let store = Arc::new(SqliteRecordStore::open(dir.path().join("agg.db")).unwrap());
        let stats = Arc::new(PipelineStats::new());
        let hub = Arc::new(BroadcastHub::new(64, stats.clone()));

        let queue = Arc::new(WorkQueue::new(100));
        let enrichment = upstream(queue.clone());
        let stage = AggregationStage::new(
            AggregationConfig {
                batch_size: 50,
                ttl: Duration::from_secs(90),
                pull_timeout: Duration::from_secs(10),
            },
            store.clone(),
            hub,
            stats,
        );

        queue.push(vec![event("a", None, None), event("b", None, None)]).await;
        queue.push(vec![event("c", None, None)]).await;

        // Stopped before running: loop body skipped, pending batches still flushed
        stage.stop();
        stage.run(&enrichment).await;

        assert_eq!(store.count().unwrap(), 3);
        assert_eq!(queue.len(), 0);
    }

    #[tokio::test]
    async fn test_persistence_failure_still_broadcasts() {
        let stats = Arc::new(PipelineStats::new());
        let hub = Arc::new(BroadcastHub::new(8, stats.clone()));
        let mut rx = hub.connect("watcher");
        rx.recv().await.unwrap();

        let stage = AggregationStage::new(
            AggregationConfig::default(),
            Arc::new(FailingStore),
            hub,
            stats.clone(),
        );

        let persisted = stage.flush(&[event("a", None, None), event("b", None, None)]).await;
        assert_eq!(persisted, 0);

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.persistence_failures, 1);
        assert_eq!(snapshot.records_persisted, 0);
        assert_eq!(snapshot.batches_broadcast, 1);
        assert!(rx.try_recv().is_ok());
    }
}
