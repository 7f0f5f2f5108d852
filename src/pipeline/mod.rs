//! # Replay → Enrichment → Aggregation Pipeline
//!
//! Replays a recorded corpus of social posts as if it were a live stream,
//! scores each post's sentiment, and keeps a short-lived store of scored
//! records while fanning every batch out to live subscribers.
//!
//! ## Architecture
//!
//! ```text
//! ReplaySource ──▶ Queue A ──▶ EnrichmentStage ──▶ Queue B ──▶ AggregationStage ──┬──▶ RecordStore
//!   (compressed       (events)   (rate-limited      (batches)   (rolling batch)    └──▶ BroadcastSink
//!    timing)                      scoring)
//!
//! ExpirySweeper ──(every sweep_interval)──▶ RecordStore.delete_expired(now)
//! ```
//!
//! **Key Principle:** no recovered failure stops a stage. Scoring, persistence,
//! broadcast and sweep failures are logged and counted in `PipelineStats`; only
//! a corpus that fails to load prevents the pipeline from starting.
//!
//! Delivery is best-effort: Queue A and in-flight batches live in memory and
//! are lost if the process dies.
//!
//! ## Module Organization
//!
//! - `types` - RawEvent, EnrichedEvent, StoredRecord, Region
//! - `queue` - In-memory bounded FIFO used for both queues
//! - `control` - Per-stage cooperative stop flag
//! - `corpus` - Corpus parsing and time compression
//! - `replay` - Replay source (Queue A producer)
//! - `scoring` - Sentiment scorer trait and implementations
//! - `rate_limit` - Concurrency cap + call spacing gate
//! - `enrichment` - Enrichment stage (Queue A → Queue B)
//! - `aggregation` - Aggregation stage (Queue B → sinks)
//! - `db` - Record store trait and SQLite writer
//! - `broadcast` - Subscriber fan-out
//! - `sweeper` - TTL expiry task
//! - `engine` - Orchestrator state machine and status surface
//! - `stats` - Counters
//! - `config` - Environment configuration
//! - `error` - Error types

pub mod aggregation;
pub mod broadcast;
pub mod config;
pub mod control;
pub mod corpus;
pub mod db;
pub mod engine;
pub mod enrichment;
pub mod error;
pub mod queue;
pub mod rate_limit;
pub mod replay;
pub mod scoring;
pub mod stats;
pub mod sweeper;
pub mod types;

// Re-export commonly used types
pub use aggregation::{classify_region, AggregationStage};
pub use broadcast::{BroadcastHub, BroadcastSink, FeedMessage};
pub use config::PipelineConfig;
pub use db::{RecordStore, SqliteRecordStore};
pub use engine::{PipelineComponents, PipelineOrchestrator, PipelineState, PipelineStatus};
pub use enrichment::EnrichmentStage;
pub use error::{PipelineError, PipelineResult, ScoringError, StoreError};
pub use replay::ReplaySource;
pub use scoring::{HttpSentimentScorer, LexiconScorer, SentimentScorer};
pub use stats::{PipelineStats, StatsSnapshot};
pub use sweeper::ExpirySweeper;
pub use types::{EnrichedEvent, GeoPoint, RawEvent, Region, StoredRecord};
