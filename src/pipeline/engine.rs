//! Pipeline orchestrator - owns the stages and their lifecycle
//!
//! ```text
//! Idle ──initialize──▶ Initialized ──start──▶ Running ──stop──▶ Stopped
//!                                                ▲                 │
//!                                                └──────start──────┘
//! ```
//!
//! `initialize` wires Queue A/B, the stages and the sinks without spawning
//! anything. `start` loads the corpus and spawns the four stage tasks.
//! `stop` stops stages upstream-first, waiting for each to flush before
//! signalling the next one.

use super::aggregation::{AggregationConfig, AggregationStage};
use super::broadcast::BroadcastSink;
use super::config::PipelineConfig;
use super::db::RecordStore;
use super::enrichment::{EnrichmentConfig, EnrichmentStage};
use super::error::{PipelineError, PipelineResult};
use super::queue::WorkQueue;
use super::replay::{CorpusSummary, ReplayConfig, ReplaySource};
use super::scoring::SentimentScorer;
use super::stats::{PipelineStats, StatsSnapshot};
use super::sweeper::ExpirySweeper;
use super::types::StoredRecord;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Default number of records returned by `recent`
pub const DEFAULT_RECENT_LIMIT: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PipelineState {
    Idle,
    Initialized,
    Running,
    Stopped,
}

/// External collaborators the stages are wired to
#[derive(Clone)]
pub struct PipelineComponents {
    pub scorer: Arc<dyn SentimentScorer>,
    pub store: Arc<dyn RecordStore>,
    pub sink: Arc<dyn BroadcastSink>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct QueueSizes {
    /// Events waiting in Queue A
    pub replay: usize,
    /// Batches waiting in Queue B
    pub enrichment: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ComponentFlags {
    pub replay: bool,
    pub enrichment: bool,
    pub aggregation: bool,
    pub sweeper: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PipelineStatus {
    pub state: PipelineState,
    pub running: bool,
    pub queue_sizes: QueueSizes,
    pub components: ComponentFlags,
    pub subscribers: usize,
    pub stats: StatsSnapshot,
}

struct Stages {
    replay: Arc<ReplaySource>,
    enrichment: Arc<EnrichmentStage>,
    aggregation: Arc<AggregationStage>,
    sweeper: Arc<ExpirySweeper>,
    store: Arc<dyn RecordStore>,
    sink: Arc<dyn BroadcastSink>,
}

struct StageTasks {
    replay: JoinHandle<()>,
    enrichment: JoinHandle<()>,
    aggregation: JoinHandle<()>,
    sweeper: JoinHandle<()>,
}

pub struct PipelineOrchestrator {
    config: PipelineConfig,
    state: PipelineState,
    stats: Arc<PipelineStats>,
    stages: Option<Stages>,
    tasks: Option<StageTasks>,
}

impl PipelineOrchestrator {
    pub fn new(config: PipelineConfig) -> Self {
        Self {
            config,
            state: PipelineState::Idle,
            stats: Arc::new(PipelineStats::new()),
            stages: None,
            tasks: None,
        }
    }

    /// Counters shared with every stage (and with sinks built by the caller)
    pub fn stats(&self) -> Arc<PipelineStats> {
        self.stats.clone()
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    pub fn is_running(&self) -> bool {
        self.state == PipelineState::Running
    }

    /// Build queues and stages; nothing is spawned yet
    pub fn initialize(&mut self, components: PipelineComponents) -> PipelineResult<()> {
        if self.state == PipelineState::Running {
            log::warn!("⚠️  Cannot re-initialize a running pipeline");
            return Err(PipelineError::AlreadyRunning);
        }
        self.config.validate()?;

        let config = &self.config;
        let queue_a = Arc::new(WorkQueue::new(config.queue_capacity));
        let queue_b = Arc::new(WorkQueue::new(config.queue_capacity));

        let replay = Arc::new(ReplaySource::new(
            ReplayConfig {
                replay_duration: config.replay_duration,
                rate_limit: config.replay_rate_limit,
                ..ReplayConfig::default()
            },
            queue_a,
            self.stats.clone(),
        ));
        let enrichment = Arc::new(EnrichmentStage::new(
            EnrichmentConfig {
                prefetch: config.enrich_prefetch,
                batch_size: config.enrich_batch_size,
                flush_interval: config.enrich_flush_interval,
                idle_backoff: config.enrich_idle_backoff,
                max_concurrent: config.scoring_max_concurrent,
                min_interval: config.scoring_min_interval,
            },
            components.scorer,
            queue_b,
            self.stats.clone(),
        ));
        let aggregation = Arc::new(AggregationStage::new(
            AggregationConfig {
                batch_size: config.aggregate_batch_size,
                ttl: config.record_ttl,
                pull_timeout: config.aggregate_pull_timeout,
            },
            components.store.clone(),
            components.sink.clone(),
            self.stats.clone(),
        ));
        let sweeper = Arc::new(ExpirySweeper::new(
            components.store.clone(),
            config.sweep_interval,
            self.stats.clone(),
        ));

        self.stages = Some(Stages {
            replay,
            enrichment,
            aggregation,
            sweeper,
            store: components.store,
            sink: components.sink,
        });
        self.state = PipelineState::Initialized;

        log::info!("✅ Pipeline initialized");
        log::info!("   ├─ Queue capacity: {}", self.config.queue_capacity);
        log::info!("   ├─ Enrichment batch: {}", self.config.enrich_batch_size);
        log::info!("   └─ Aggregation batch: {}", self.config.aggregate_batch_size);
        Ok(())
    }

    /// Load the corpus and spawn every stage
    ///
    /// A corpus that fails to load leaves the state unchanged.
    pub fn start(&mut self) -> PipelineResult<CorpusSummary> {
        if self.state == PipelineState::Running {
            log::warn!("⚠️  Pipeline already running, start ignored");
            return Err(PipelineError::AlreadyRunning);
        }
        let stages = self.stages.as_ref().ok_or_else(|| {
            log::warn!("⚠️  Pipeline not initialized, start ignored");
            PipelineError::NotInitialized
        })?;

        let summary = stages.replay.load(&self.config.corpus_path)?;

        stages.replay.reset();
        stages.enrichment.reset();
        stages.aggregation.reset();
        stages.sweeper.reset();

        log::info!("🚀 Spawning pipeline tasks...");

        let replay = stages.replay.clone();
        let replay_task = tokio::spawn(async move {
            if let Err(e) = replay.feed().await {
                log::error!("❌ Replay failed: {}", e);
            }
        });

        let (enrichment, source) = (stages.enrichment.clone(), stages.replay.clone());
        let enrichment_task = tokio::spawn(async move { enrichment.run(&source).await });

        let (aggregation, upstream) = (stages.aggregation.clone(), stages.enrichment.clone());
        let aggregation_task = tokio::spawn(async move { aggregation.run(&upstream).await });

        let sweeper = stages.sweeper.clone();
        let sweeper_task = tokio::spawn(async move { sweeper.run().await });

        self.tasks = Some(StageTasks {
            replay: replay_task,
            enrichment: enrichment_task,
            aggregation: aggregation_task,
            sweeper: sweeper_task,
        });
        self.state = PipelineState::Running;

        log::info!("✅ Pipeline started ({} events to replay)", summary.events);
        Ok(summary)
    }

    /// Stop every stage, upstream first, and wait for their final flushes
    pub async fn stop(&mut self) -> PipelineResult<()> {
        if self.state != PipelineState::Running {
            log::warn!("⚠️  Pipeline not running, stop ignored");
            return Err(PipelineError::NotRunning);
        }
        let grace = self.config.shutdown_grace;

        log::info!("⏹️  Stopping pipeline...");
        if let (Some(stages), Some(tasks)) = (self.stages.as_ref(), self.tasks.take()) {
            stages.replay.stop();
            join_stage("replay", tasks.replay, grace).await;

            stages.enrichment.stop();
            join_stage("enrichment", tasks.enrichment, grace).await;

            stages.aggregation.stop();
            join_stage("aggregation", tasks.aggregation, grace).await;

            stages.sweeper.stop();
            join_stage("sweeper", tasks.sweeper, grace).await;
        }

        self.state = PipelineState::Stopped;
        log::info!("✅ Pipeline stopped");
        Ok(())
    }

    /// Stop if running; safe to call in any state
    pub async fn shutdown(&mut self) {
        if self.state == PipelineState::Running {
            if let Err(e) = self.stop().await {
                log::error!("❌ Error during shutdown: {}", e);
            }
        }
        if let Some(tasks) = self.tasks.take() {
            for handle in [tasks.replay, tasks.enrichment, tasks.aggregation, tasks.sweeper] {
                handle.abort();
            }
        }
    }

    /// Most recent stored records, newest first
    pub async fn recent(&self, limit: Option<usize>) -> PipelineResult<Vec<StoredRecord>> {
        let stages = self.stages.as_ref().ok_or(PipelineError::NotInitialized)?;
        let records = stages
            .store
            .recent(limit.unwrap_or(DEFAULT_RECENT_LIMIT))
            .await?;
        Ok(records)
    }

    pub fn status(&self) -> PipelineStatus {
        let (queue_sizes, components, subscribers) = match self.stages.as_ref() {
            Some(s) => (
                QueueSizes {
                    replay: s.replay.queue_size(),
                    enrichment: s.enrichment.queue_size(),
                },
                ComponentFlags {
                    replay: s.replay.is_running(),
                    enrichment: s.enrichment.is_running(),
                    aggregation: s.aggregation.is_running(),
                    sweeper: s.sweeper.is_running(),
                },
                s.sink.subscriber_count(),
            ),
            None => (
                QueueSizes {
                    replay: 0,
                    enrichment: 0,
                },
                ComponentFlags {
                    replay: false,
                    enrichment: false,
                    aggregation: false,
                    sweeper: false,
                },
                0,
            ),
        };

        PipelineStatus {
            state: self.state,
            running: self.is_running(),
            queue_sizes,
            components,
            subscribers,
            stats: self.stats.snapshot(),
        }
    }
}

/// Wait up to `grace` for a stage task, aborting it past that
///
/// Cancellation is expected termination and only logged at debug.
async fn join_stage(name: &str, mut handle: JoinHandle<()>, grace: Duration) {
    match tokio::time::timeout(grace, &mut handle).await {
        Ok(Ok(())) => log::debug!("Stage {} finished", name),
        Ok(Err(e)) if e.is_cancelled() => log::debug!("Stage {} cancelled", name),
        Ok(Err(e)) => log::error!("❌ Stage {} panicked: {}", name, e),
        Err(_) => {
            log::warn!(
                "⚠️  Stage {} did not stop within {}ms, aborting",
                name,
                grace.as_millis()
            );
            handle.abort();
        }
    }
}
