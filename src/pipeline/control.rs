//! Cooperative stop flag owned by each stage
//!
//! Stages check `is_running()` once per loop iteration. Their suspension
//! points go through `sleep()` so a stop request cuts a long wait short
//! instead of waiting out the full period.
//!
//! `start()` only moves Idle → Running. A stop that lands before the stage
//! task is first polled therefore sticks; `reset()` re-arms for a new run.

use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Duration;
use tokio::sync::Notify;

const IDLE: u8 = 0;
const RUNNING: u8 = 1;
const STOPPED: u8 = 2;

pub struct StageControl {
    state: AtomicU8,
    wake: Notify,
}

impl Default for StageControl {
    fn default() -> Self {
        Self {
            state: AtomicU8::new(IDLE),
            wake: Notify::new(),
        }
    }
}

impl StageControl {
    pub fn new() -> Self {
        Self::default()
    }

    /// Idle → Running; returns whether the stage is now running
    pub fn start(&self) -> bool {
        match self
            .state
            .compare_exchange(IDLE, RUNNING, Ordering::SeqCst, Ordering::SeqCst)
        {
            Ok(_) => true,
            Err(current) => current == RUNNING,
        }
    }

    /// Back to Idle so the next `start()` succeeds
    pub fn reset(&self) {
        self.state.store(IDLE, Ordering::SeqCst);
    }

    /// Request a cooperative stop and wake any pending `sleep`
    pub fn stop(&self) {
        self.state.store(STOPPED, Ordering::SeqCst);
        self.wake.notify_waiters();
    }

    pub fn is_running(&self) -> bool {
        self.state.load(Ordering::SeqCst) == RUNNING
    }

    /// Sleep for `duration`; returns `false` if a stop arrived first
    pub async fn sleep(&self, duration: Duration) -> bool {
        let stopped = self.wake.notified();
        if !self.is_running() {
            return false;
        }
        tokio::select! {
            _ = tokio::time::sleep(duration) => self.is_running(),
            _ = stopped => false,
        }
    }

    /// Resolves once the stage is no longer running
    pub async fn stopped(&self) {
        loop {
            let stopped = self.wake.notified();
            if !self.is_running() {
                return;
            }
            stopped.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Instant;

    #[tokio::test]
    async fn test_sleep_completes_while_running() {
        let control = StageControl::new();
        assert!(control.start());
        assert!(control.sleep(Duration::from_millis(10)).await);
    }

    #[tokio::test]
    async fn test_stop_interrupts_sleep() {
        let control = Arc::new(StageControl::new());
        control.start();

        let stopper = control.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            stopper.stop();
        });

        let start = Instant::now();
        assert!(!control.sleep(Duration::from_secs(10)).await);
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_sleep_when_stopped_returns_immediately() {
        let control = StageControl::new();
        assert!(!control.sleep(Duration::from_secs(10)).await);
        control.stopped().await;
    }

    #[test]
    fn test_stop_before_start_sticks_until_reset() {
        let control = StageControl::new();
        control.stop();
        assert!(!control.start());
        assert!(!control.is_running());

        control.reset();
        assert!(control.start());
        assert!(control.start());
        assert!(control.is_running());
    }
}
