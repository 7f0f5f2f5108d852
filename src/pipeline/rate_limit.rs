//! Call gate for the scoring capability
//!
//! Two limits combined:
//! - at most `max_concurrent` calls in flight (semaphore slots)
//! - consecutive call starts at least `min_interval` apart, across all slots
//!
//! The spacing gate is a shared last-start timestamp behind an async mutex.
//! The mutex is held while waiting out the interval and until the blocking
//! worker reports that the call has started; that report is the stamp.

use super::error::ScoringError;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{oneshot, Mutex, Semaphore};

pub struct CallGate {
    slots: Arc<Semaphore>,
    max_concurrent: usize,
    min_interval: Duration,
    last_start: Mutex<Option<Instant>>,
}

impl CallGate {
    pub fn new(max_concurrent: usize, min_interval: Duration) -> Self {
        let max_concurrent = max_concurrent.max(1);
        Self {
            slots: Arc::new(Semaphore::new(max_concurrent)),
            max_concurrent,
            min_interval,
            last_start: Mutex::new(None),
        }
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    /// Calls currently holding a slot
    pub fn in_flight(&self) -> usize {
        self.max_concurrent - self.slots.available_permits()
    }

    /// Run `f` on the blocking pool once a slot is free and the spacing
    /// interval since the previous start has passed
    pub async fn call<F, T>(&self, f: F) -> Result<T, ScoringError>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let _slot = self
            .slots
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| ScoringError::GateClosed)?;

        let mut last = self.last_start.lock().await;
        if let Some(prev) = *last {
            let elapsed = prev.elapsed();
            if elapsed < self.min_interval {
                tokio::time::sleep(self.min_interval - elapsed).await;
            }
        }

        let (started_tx, started_rx) = oneshot::channel();
        let handle = tokio::task::spawn_blocking(move || {
            let _ = started_tx.send(Instant::now());
            f()
        });

        let started = started_rx
            .await
            .map_err(|e| ScoringError::WorkerFailed(e.to_string()))?;
        *last = Some(started);
        drop(last);

        handle
            .await
            .map_err(|e| ScoringError::WorkerFailed(e.to_string()))
    }
}
