//! Retry tracking with exponential backoff for failed reconciles.
//!
//! Errors are classified as transient or permanent. Transient errors are
//! retried with a growing delay; permanent errors wait until the record changes.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::controller::Action;

/// Maximum number of retries before giving up until the record changes.
const MAX_RETRIES: u32 = 10;

/// Base delay for exponential backoff (seconds).
const BASE_DELAY_SECS: u64 = 5;

/// Maximum delay between retries (1 hour).
const MAX_DELAY_SECS: u64 = 3600;

/// Tracks retry attempts per record identity.
#[derive(Debug, Default)]
pub struct RetryTracker {
    attempts: Mutex<HashMap<String, u32>>,
}

impl RetryTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Increment the retry count for a record and return the new count.
    pub async fn increment(&self, key: &str) -> u32 {
        let mut attempts = self.attempts.lock().await;
        let count = attempts.entry(key.to_string()).or_insert(0);
        *count += 1;
        *count
    }

    /// Reset the retry count (call on a successful reconcile).
    pub async fn reset(&self, key: &str) {
        self.attempts.lock().await.remove(key);
    }

    pub async fn get(&self, key: &str) -> u32 {
        self.attempts.lock().await.get(key).copied().unwrap_or(0)
    }

    /// Forget records that no longer exist.
    pub async fn cleanup(&self, active: &HashSet<String>) {
        let mut attempts = self.attempts.lock().await;
        let before = attempts.len();
        attempts.retain(|key, _| active.contains(key));
        let pruned = before - attempts.len();
        if pruned > 0 {
            debug!(pruned, "Pruned retry state of removed records");
        }
    }
}

/// Error classification for retry behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Network issues, throttling, records that may appear later.
    Transient,
    /// Wiring bugs and requests that cannot succeed without a spec change.
    Permanent,
}

/// Action to take after the given failed attempt.
pub fn compute_backoff(attempt: u32, kind: ErrorKind) -> Action {
    match kind {
        ErrorKind::Transient => {
            if attempt >= MAX_RETRIES {
                warn!(
                    attempt,
                    max_retries = MAX_RETRIES,
                    "Max retries exceeded, waiting for record change"
                );
                Action::await_change()
            } else {
                // 5s, 10s, 20s, 40s, ... up to 1 hour
                let delay_secs = BASE_DELAY_SECS.saturating_mul(2u64.saturating_pow(attempt.saturating_sub(1)));
                let capped = delay_secs.min(MAX_DELAY_SECS);
                debug!(attempt, delay_secs = capped, "Scheduling retry with backoff");
                Action::requeue(Duration::from_secs(capped))
            }
        }
        ErrorKind::Permanent => {
            warn!("Permanent error, waiting for record change");
            Action::await_change()
        }
    }
}
