//! Pipeline Runtime
//!
//! Wires the replay pipeline to its production collaborators:
//! - SQLite record store (WAL)
//! - Broadcast hub for live subscribers
//! - HTTP sentiment scorer when `SENTIMENT_API_KEY` is set, offline lexicon scorer otherwise
//!
//! Then starts the pipeline, logs a status line periodically and shuts down
//! cleanly on CTRL+C.
//!
//! Usage:
//!   cargo run --release --bin pipeline_runtime
//!
//! Environment variables: see `PipelineConfig::from_env`.

use dotenv::dotenv;
use log::{error, info, warn};
use pulseflow::pipeline::{
    BroadcastHub, HttpSentimentScorer, LexiconScorer, PipelineComponents, PipelineConfig,
    PipelineOrchestrator, SentimentScorer, SqliteRecordStore,
};
use std::sync::Arc;
use std::time::Duration;

const STATUS_LOG_INTERVAL: Duration = Duration::from_secs(10);

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    info!("🚀 Pulse Pipeline Runtime");

    let config = PipelineConfig::from_env()?;
    info!("   ├─ Corpus: {}", config.corpus_path);
    info!("   ├─ Database: {}", config.db_path);
    info!("   ├─ Replay duration: {:.0}s", config.replay_duration.as_secs_f64());
    info!("   ├─ Rate limit: {} events/s", config.replay_rate_limit);
    info!("   └─ TTL: {}s (sweep every {}s)", config.record_ttl.as_secs(), config.sweep_interval.as_secs());

    let mut orchestrator = PipelineOrchestrator::new(config.clone());

    info!("🔧 Initializing database...");
    let store = Arc::new(SqliteRecordStore::open(&config.db_path)?);
    let hub = Arc::new(BroadcastHub::new(config.subscriber_buffer, orchestrator.stats()));

    let scorer: Arc<dyn SentimentScorer> = match config.sentiment_api_key.clone() {
        Some(key) => {
            // Blocking client is built on the blocking pool, where its calls also run
            let url = config.sentiment_api_url.clone();
            let scorer =
                tokio::task::spawn_blocking(move || HttpSentimentScorer::new(&url, &key)).await??;
            Arc::new(scorer)
        }
        None => {
            warn!("⚠️  SENTIMENT_API_KEY not set, using offline lexicon scorer");
            Arc::new(LexiconScorer::new())
        }
    };
    info!("✅ Scorer: {}", scorer.name());

    orchestrator.initialize(PipelineComponents {
        scorer,
        store,
        sink: hub,
    })?;
    orchestrator.start()?;

    info!("🔄 Press CTRL+C to shutdown gracefully");

    let mut status_timer = tokio::time::interval(STATUS_LOG_INTERVAL);
    status_timer.tick().await;

    loop {
        tokio::select! {
            _ = status_timer.tick() => {
                let status = orchestrator.status();
                info!(
                    "📊 Queue A: {} | Queue B: {} | replayed: {} | persisted: {} | scoring failures: {} | subscribers: {}",
                    status.queue_sizes.replay,
                    status.queue_sizes.enrichment,
                    status.stats.events_replayed,
                    status.stats.records_persisted,
                    status.stats.scoring_failures,
                    status.subscribers
                );
            }
            signal = tokio::signal::ctrl_c() => {
                match signal {
                    Ok(()) => warn!("⚠️  Received CTRL+C, shutting down..."),
                    Err(err) => error!("❌ Failed to listen for CTRL+C: {}", err),
                }
                break;
            }
        }
    }

    orchestrator.shutdown().await;

    let stats = orchestrator.status().stats;
    info!("✅ Pipeline runtime stopped");
    info!("   ├─ Events replayed: {}", stats.events_replayed);
    info!("   ├─ Records persisted: {}", stats.records_persisted);
    info!("   └─ Records expired: {}", stats.records_expired);
    Ok(())
}
