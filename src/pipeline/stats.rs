//! Pipeline counters
//!
//! Every recovered failure increments a counter here in addition to being
//! logged, so degraded operation shows up in `status()` even when the
//! pipeline keeps flowing.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct PipelineStats {
    pub events_replayed: AtomicU64,
    pub events_enriched: AtomicU64,
    pub scoring_calls: AtomicU64,
    pub scoring_failures: AtomicU64,
    pub batches_emitted: AtomicU64,
    pub records_persisted: AtomicU64,
    pub persistence_failures: AtomicU64,
    pub batches_broadcast: AtomicU64,
    pub subscribers_dropped: AtomicU64,
    pub records_expired: AtomicU64,
    pub sweep_failures: AtomicU64,
}

/// Point-in-time copy of `PipelineStats`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub events_replayed: u64,
    pub events_enriched: u64,
    pub scoring_calls: u64,
    pub scoring_failures: u64,
    pub batches_emitted: u64,
    pub records_persisted: u64,
    pub persistence_failures: u64,
    pub batches_broadcast: u64,
    pub subscribers_dropped: u64,
    pub records_expired: u64,
    pub sweep_failures: u64,
}

impl PipelineStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add(counter: &AtomicU64, n: usize) {
        counter.fetch_add(n as u64, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        StatsSnapshot {
            events_replayed: load(&self.events_replayed),
            events_enriched: load(&self.events_enriched),
            scoring_calls: load(&self.scoring_calls),
            scoring_failures: load(&self.scoring_failures),
            batches_emitted: load(&self.batches_emitted),
            records_persisted: load(&self.records_persisted),
            persistence_failures: load(&self.persistence_failures),
            batches_broadcast: load(&self.batches_broadcast),
            subscribers_dropped: load(&self.subscribers_dropped),
            records_expired: load(&self.records_expired),
            sweep_failures: load(&self.sweep_failures),
        }
    }
}
