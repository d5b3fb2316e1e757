use std::{
    sync::Arc,
    time::Duration,
};

use crate::{
    error::GradeResult,
    executor::{
        ExecutionBackend,
        ExecutionHandle,
        ExecutionResult,
    },
    metrics::MetricsRegistry,
};

pub const DEFAULT_MAX_RETRIES: u32 = 20;
pub const DEFAULT_INTERVAL: Duration = Duration::from_millis(500);

/// Bounded wait for an asynchronous execution to reach a terminal status.
#[derive(Debug, Clone)]
pub struct Poller {
    max_retries: u32,
    interval: Duration,
    metrics: Option<Arc<MetricsRegistry>>,
}

impl Default for Poller {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_RETRIES, DEFAULT_INTERVAL)
    }
}

impl Poller {
    pub fn new(max_retries: u32, interval: Duration) -> Self {
        Self {
            max_retries: max_retries.max(1),
            interval,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<MetricsRegistry>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Fetches until the status is terminal or `max_retries` fetches were made.
    ///
    /// Running out of retries is not an error: the last result is returned
    /// as-is and callers check `status.is_terminal()`. Fetch errors end the
    /// loop immediately.
    pub async fn poll_until_terminal(
        &self,
        backend: &dyn ExecutionBackend,
        handle: &ExecutionHandle,
    ) -> GradeResult<ExecutionResult> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            if let Some(metrics) = &self.metrics {
                metrics.poll_iteration();
            }
            let result = backend.fetch(handle).await?;

            if result.status.is_terminal() {
                tracing::debug!(token = %handle, attempt, status = result.status.id, "execution finished");
                return Ok(result);
            }
            if attempt >= self.max_retries {
                tracing::warn!(
                    token = %handle,
                    attempts = attempt,
                    status = result.status.id,
                    "poll budget exhausted before execution finished"
                );
                return Ok(result);
            }

            tracing::debug!(token = %handle, attempt, status = result.status.id, "execution pending");
            tokio::time::sleep(self.interval).await;
        }
    }
}
