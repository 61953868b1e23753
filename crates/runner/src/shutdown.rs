//! Cooperative shutdown and bounded waits

use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tokio::sync::watch;

/// How a stop request ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopOutcome {
    /// Every loop drained within the limit
    Completed,
    /// The limit passed first; loops finish on their own afterwards
    TimedOut,
    NotRunning,
}

/// Sending half, owned by whoever started the loops
#[derive(Debug)]
pub struct ShutdownTrigger {
    tx: watch::Sender<bool>,
}

impl ShutdownTrigger {
    pub fn trigger(&self) {
        let _ = self.tx.send(true);
    }

    pub fn signal(&self) -> ShutdownSignal {
        ShutdownSignal {
            rx: self.tx.subscribe(),
        }
    }
}

/// Receiving half, cloned into every loop
#[derive(Debug, Clone)]
pub struct ShutdownSignal {
    rx: watch::Receiver<bool>,
}

impl ShutdownSignal {
    pub fn is_shutdown(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once shutdown is triggered or the trigger is dropped
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        while !*rx.borrow_and_update() {
            if rx.changed().await.is_err() {
                return;
            }
        }
    }
}

pub fn shutdown_channel() -> (ShutdownTrigger, ShutdownSignal) {
    let (tx, rx) = watch::channel(false);
    (ShutdownTrigger { tx }, ShutdownSignal { rx })
}

/// Wait for `work` at most `limit`
pub async fn bounded_wait<F>(limit: Duration, work: F) -> StopOutcome
where
    F: Future<Output = ()>,
{
    match tokio::time::timeout(limit, work).await {
        Ok(()) => StopOutcome::Completed,
        Err(_) => StopOutcome::TimedOut,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_bounded_wait_outcomes() {
        let done = bounded_wait(Duration::from_secs(1), async {}).await;
        assert_eq!(done, StopOutcome::Completed);

        let slow = bounded_wait(
            Duration::from_secs(1),
            tokio::time::sleep(Duration::from_secs(5)),
        )
        .await;
        assert_eq!(slow, StopOutcome::TimedOut);
    }

    #[tokio::test]
    async fn test_signal_resolves_after_trigger() {
        let (trigger, signal) = shutdown_channel();
        assert!(!signal.is_shutdown());

        let waiter = tokio::spawn({
            let signal = signal.clone();
            async move { signal.cancelled().await }
        });
        trigger.trigger();
        waiter.await.unwrap();
        assert!(signal.is_shutdown());

        // Late subscribers see the shutdown immediately
        trigger.signal().cancelled().await;
    }

    #[tokio::test]
    async fn test_dropped_trigger_counts_as_shutdown() {
        let (trigger, signal) = shutdown_channel();
        drop(trigger);
        signal.cancelled().await;
    }
}
