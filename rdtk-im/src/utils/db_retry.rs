//! Database Retry Logic
//!
//! Exponential backoff for transient "database is locked" errors, bounded by
//! `im_database_max_lock_wait_ms`.
//!
//! **Backoff Strategy:**
//! - Initial delay: 10ms
//! - Max delay: 1000ms
//! - Multiplier: 2.0 (exponential)

use rdtk_common::{Error, Result};
use std::time::{Duration, Instant};

const INITIAL_BACKOFF_MS: u64 = 10;
const MAX_BACKOFF_MS: u64 = 1000;

/// Backoff state for one logical operation
pub struct LockRetry {
    operation_name: &'static str,
    max_duration: Duration,
    start_time: Instant,
    attempt: u32,
    backoff_ms: u64,
}

impl LockRetry {
    pub fn new(operation_name: &'static str, max_wait_ms: u64) -> Self {
        Self {
            operation_name,
            max_duration: Duration::from_millis(max_wait_ms),
            start_time: Instant::now(),
            attempt: 1,
            backoff_ms: INITIAL_BACKOFF_MS,
        }
    }

    /// Attempts made so far (1-based)
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Decide what to do with a failed attempt
    ///
    /// Non-lock errors are returned unchanged. Lock errors sleep and return
    /// `Ok(())` so the caller retries, until the wait budget is spent.
    pub async fn on_error(&mut self, err: Error) -> Result<()> {
        if !err.is_database_locked() {
            return Err(err);
        }

        let elapsed = self.start_time.elapsed();
        if elapsed >= self.max_duration {
            tracing::error!(
                operation = self.operation_name,
                attempt = self.attempt,
                elapsed_ms = elapsed.as_millis(),
                max_wait_ms = self.max_duration.as_millis(),
                "Database operation failed: max retry time exceeded"
            );
            return Err(Error::Internal(format!(
                "Database locked after {} attempts ({} ms elapsed, max {} ms)",
                self.attempt,
                elapsed.as_millis(),
                self.max_duration.as_millis()
            )));
        }

        let sleep_ms = self.backoff_ms.min(MAX_BACKOFF_MS);
        tracing::warn!(
            operation = self.operation_name,
            attempt = self.attempt,
            elapsed_ms = elapsed.as_millis(),
            backoff_ms = sleep_ms,
            remaining_ms = self.max_duration.saturating_sub(elapsed).as_millis(),
            "Database locked, will retry after backoff"
        );

        tokio::time::sleep(Duration::from_millis(sleep_ms)).await;

        self.backoff_ms = (self.backoff_ms * 2).min(MAX_BACKOFF_MS);
        self.attempt += 1;
        Ok(())
    }

    /// Log the outcome of an operation that needed more than one attempt
    pub fn log_success(&self) {
        if self.attempt <= 1 {
            return;
        }
        let elapsed_ms = self.start_time.elapsed().as_millis();
        if elapsed_ms > 2000 {
            tracing::warn!(
                operation = self.operation_name,
                attempt = self.attempt,
                elapsed_ms,
                "Database operation succeeded after significant retry period (>2s)"
            );
        } else {
            tracing::debug!(
                operation = self.operation_name,
                attempt = self.attempt,
                elapsed_ms,
                "Database operation succeeded after retry"
            );
        }
    }
}

/// Retry a database operation with exponential backoff until max_wait_ms elapses
///
/// Only lock contention is retried; any other error is returned immediately.
pub async fn retry_on_lock<F, Fut, T>(
    operation_name: &'static str,
    max_wait_ms: u64,
    mut operation: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    let mut retry = LockRetry::new(operation_name, max_wait_ms);

    loop {
        match operation().await {
            Ok(result) => {
                retry.log_success();
                return Ok(result);
            }
            Err(err) => retry.on_error(err).await?,
        }
    }
}
