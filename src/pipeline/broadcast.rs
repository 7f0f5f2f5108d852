//! Broadcast sink - fans enriched batches out to live subscribers
//!
//! Each subscriber owns a bounded mpsc receiver. Publishing never waits:
//! a subscriber whose buffer is full or whose receiver was dropped is
//! treated as disconnected and removed. Other subscribers are unaffected.

use super::stats::PipelineStats;
use super::types::EnrichedEvent;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc::{self, error::TrySendError};

/// Message pushed to subscribers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FeedMessage {
    Connection { message: String, client_id: String },
    Tweets { data: Vec<EnrichedEvent>, count: usize },
}

impl FeedMessage {
    pub fn batch(events: &[EnrichedEvent]) -> Self {
        FeedMessage::Tweets {
            data: events.to_vec(),
            count: events.len(),
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// Sink the aggregation stage forwards flushed batches to
#[async_trait]
pub trait BroadcastSink: Send + Sync {
    /// Best-effort push to every subscriber; returns how many received it
    async fn publish(&self, batch: &[EnrichedEvent]) -> usize;

    fn subscriber_count(&self) -> usize;
}

pub struct BroadcastHub {
    subscribers: Mutex<HashMap<String, mpsc::Sender<Arc<FeedMessage>>>>,
    buffer: usize,
    stats: Arc<PipelineStats>,
}

impl BroadcastHub {
    pub fn new(buffer: usize, stats: Arc<PipelineStats>) -> Self {
        Self {
            subscribers: Mutex::new(HashMap::new()),
            buffer: buffer.max(1),
            stats,
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, mpsc::Sender<Arc<FeedMessage>>>> {
        self.subscribers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a subscriber; the first message it receives is the welcome
    ///
    /// Reconnecting with an existing id replaces the previous channel.
    pub fn connect(&self, client_id: impl Into<String>) -> mpsc::Receiver<Arc<FeedMessage>> {
        let client_id = client_id.into();
        let (tx, rx) = mpsc::channel(self.buffer);

        let welcome = FeedMessage::Connection {
            message: "Connected to tweet stream".to_string(),
            client_id: client_id.clone(),
        };
        // Fresh channel with capacity >= 1, cannot be full
        let _ = tx.try_send(Arc::new(welcome));

        let total = {
            let mut subs = self.lock();
            subs.insert(client_id.clone(), tx);
            subs.len()
        };
        log::info!("🔌 Subscriber connected: {} (total: {})", client_id, total);
        rx
    }

    pub fn disconnect(&self, client_id: &str) -> bool {
        let removed = self.lock().remove(client_id).is_some();
        if removed {
            log::info!("🔌 Subscriber disconnected: {}", client_id);
        }
        removed
    }
}

#[async_trait]
impl BroadcastSink for BroadcastHub {
    async fn publish(&self, batch: &[EnrichedEvent]) -> usize {
        if batch.is_empty() {
            return 0;
        }

        let message = Arc::new(FeedMessage::batch(batch));
        let mut delivered = 0usize;
        let mut failed = Vec::new();

        {
            let subs = self.lock();
            for (client_id, tx) in subs.iter() {
                match tx.try_send(message.clone()) {
                    Ok(()) => delivered += 1,
                    Err(TrySendError::Full(_)) => {
                        log::error!("❌ Subscriber {} is not keeping up, dropping", client_id);
                        failed.push(client_id.clone());
                    }
                    Err(TrySendError::Closed(_)) => {
                        log::error!("❌ Subscriber {} is gone, dropping", client_id);
                        failed.push(client_id.clone());
                    }
                }
            }
        }

        if !failed.is_empty() {
            let mut subs = self.lock();
            for client_id in &failed {
                subs.remove(client_id);
            }
            PipelineStats::add(&self.stats.subscribers_dropped, failed.len());
        }

        PipelineStats::incr(&self.stats.batches_broadcast);
        log::debug!("Broadcast {} events to {} subscribers", batch.len(), delivered);
        delivered
    }

    fn subscriber_count(&self) -> usize {
        self.lock().len()
    }
}
