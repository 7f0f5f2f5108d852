//! Expiry sweeper - periodically deletes records past their TTL
//!
//! Runs on a fixed period independent of the TTL. A failed sweep is logged,
//! counted, and simply retried on the next tick.

use super::control::StageControl;
use super::db::RecordStore;
use super::stats::PipelineStats;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;

pub struct ExpirySweeper {
    store: Arc<dyn RecordStore>,
    interval: Duration,
    control: StageControl,
    stats: Arc<PipelineStats>,
}

impl ExpirySweeper {
    pub fn new(store: Arc<dyn RecordStore>, interval: Duration, stats: Arc<PipelineStats>) -> Self {
        Self {
            store,
            interval,
            control: StageControl::new(),
            stats,
        }
    }

    /// Sweep every `interval` until stopped
    ///
    /// The first sweep happens one full interval after start.
    pub async fn run(&self) {
        if !self.control.start() {
            log::warn!("⚠️  Expiry sweeper stopped before it started");
        }
        log::info!("⏰ Starting expiry sweeper (interval: {}s)", self.interval.as_secs());

        while self.control.sleep(self.interval).await {
            self.sweep_once(Utc::now()).await;
        }

        log::info!("✅ Expiry sweeper stopped");
    }

    /// Delete everything expired as of `now`; `None` when the delete failed
    pub async fn sweep_once(&self, now: DateTime<Utc>) -> Option<usize> {
        match self.store.delete_expired(now).await {
            Ok(deleted) => {
                PipelineStats::add(&self.stats.records_expired, deleted);
                if deleted > 0 {
                    log::info!("🧹 Deleted {} expired records", deleted);
                }
                Some(deleted)
            }
            Err(e) => {
                PipelineStats::incr(&self.stats.sweep_failures);
                log::error!("❌ Expiry sweep failed, retrying next tick: {}", e);
                None
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.control.is_running()
    }

    pub fn stop(&self) {
        self.control.stop();
        log::info!("⏹️  Expiry sweeper stop requested");
    }

    pub fn reset(&self) {
        self.control.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::db::SqliteRecordStore;
    use crate::pipeline::error::StoreError;
    use crate::pipeline::types::{expiry_for, StoredRecord};
    use async_trait::async_trait;
    use chrono::TimeZone;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::tempdir;

    fn record(id: &str, observed_at: DateTime<Utc>) -> StoredRecord {
        StoredRecord {
            event_id: id.to_string(),
            text: "t".to_string(),
            location: None,
            region: None,
            observed_at,
            expires_at: expiry_for(observed_at, Duration::from_secs(90)),
            sentiment_score: 0.0,
        }
    }

    /// Fails the first delete, then succeeds
    #[derive(Default)]
    struct FlakyStore {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl RecordStore for FlakyStore {
        async fn insert_batch(&self, records: &[StoredRecord]) -> Result<usize, StoreError> {
            Ok(records.len())
        }

        async fn delete_expired(&self, _now: DateTime<Utc>) -> Result<usize, StoreError> {
            if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                return Err(StoreError::Unavailable("locked".to_string()));
            }
            Ok(2)
        }

        async fn recent(&self, _limit: usize) -> Result<Vec<StoredRecord>, StoreError> {
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn test_sweep_respects_ttl_boundary() {
        let dir = tempdir().unwrap();
        let store = Arc::new(SqliteRecordStore::open(dir.path().join("sweep.db")).unwrap());
        let t = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();
        store.insert(&record("a", t)).await.unwrap();
        store
            .insert(&record("b", t + chrono::Duration::seconds(30)))
            .await
            .unwrap();

        let stats = Arc::new(PipelineStats::new());
        let sweeper = ExpirySweeper::new(store.clone(), Duration::from_secs(10), stats.clone());

        assert_eq!(sweeper.sweep_once(t + chrono::Duration::seconds(89)).await, Some(0));
        assert_eq!(sweeper.sweep_once(t + chrono::Duration::seconds(91)).await, Some(1));
        assert_eq!(store.count().unwrap(), 1);
        assert_eq!(stats.snapshot().records_expired, 1);
    }

    #[tokio::test]
    async fn test_failed_sweep_is_retried_next_tick() {
        let stats = Arc::new(PipelineStats::new());
        let sweeper = Arc::new(ExpirySweeper::new(
            Arc::new(FlakyStore::default()),
            Duration::from_millis(20),
            stats.clone(),
        ));

        let runner = sweeper.clone();
        let handle = tokio::spawn(async move { runner.run().await });
        tokio::time::sleep(Duration::from_millis(110)).await;
        sweeper.stop();
        handle.await.unwrap();

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.sweep_failures, 1);
        assert!(snapshot.records_expired >= 2);
        assert!(!sweeper.is_running());
    }
}
