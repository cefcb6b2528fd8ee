//! Bounded-concurrency batch processing with retry
//!
//! Items are split into consecutive batches of `max_concurrent`. Items in a
//! batch run concurrently; batches run one after another with a delay in
//! between. An item that exhausts its retries becomes an error placeholder
//! so the output always has one entry per input, in input order.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use crate::chunker::DocumentChunk;
use crate::constants::defaults;
use crate::error::{PipelineError, Result};
use crate::retry::{RetryPolicy, Sleeper, TokioSleeper};
use crate::streaming::{BatchUpdate, StreamHub, StreamUpdate};

/// Runtime batch configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchConfig {
    /// Items run concurrently within one batch
    pub max_concurrent: usize,
    /// Pause between consecutive batches
    pub delay_between_batches: Duration,
    pub retry: RetryPolicy,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_concurrent: defaults::MAX_CONCURRENT,
            delay_between_batches: Duration::from_millis(defaults::DELAY_BETWEEN_BATCHES_MS),
            retry: RetryPolicy::default(),
        }
    }
}

/// Progress after each finished batch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchProgress {
    /// Items finished so far, successful or not
    pub completed: usize,
    pub total: usize,
    /// Findings produced so far (or successful items for non-findings output)
    pub output_generated: usize,
}

/// Progress listener
pub type ProgressCallback = Arc<dyn Fn(BatchProgress) + Send + Sync>;

/// Something the batch processor can run
pub trait BatchItem {
    /// Identifier used in error placeholders
    fn item_id(&self) -> Option<String>;
}

impl BatchItem for DocumentChunk {
    fn item_id(&self) -> Option<String> {
        Some(self.id.clone())
    }
}

impl BatchItem for Value {
    fn item_id(&self) -> Option<String> {
        self.get("id").and_then(Value::as_str).map(str::to_string)
    }
}

/// Result entry standing in for an item that failed every attempt
pub fn error_placeholder(item_id: &str, error: &str) -> Value {
    json!({
        "error": error,
        "itemId": item_id,
        "failed": true,
    })
}

/// Whether a result entry is an error placeholder
pub fn is_error_result(value: &Value) -> bool {
    value.get("failed").and_then(Value::as_bool) == Some(true)
}

struct StreamTarget {
    hub: Arc<StreamHub>,
    node_id: String,
    module_type: String,
    findings_key: Option<String>,
}

/// Runs items through an async function in bounded batches
pub struct BatchProcessor {
    config: BatchConfig,
    sleeper: Arc<dyn Sleeper>,
    stream: Option<StreamTarget>,
    progress: Option<ProgressCallback>,
    cancel: CancellationToken,
}

impl BatchProcessor {
    pub fn new(config: BatchConfig) -> Self {
        Self {
            config,
            sleeper: Arc::new(TokioSleeper),
            stream: None,
            progress: None,
            cancel: CancellationToken::new(),
        }
    }

    /// Replace the timer used for retry and inter-batch delays
    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    /// Publish each batch's results to `hub`
    pub fn with_stream(
        mut self,
        hub: Arc<StreamHub>,
        node_id: impl Into<String>,
        module_type: impl Into<String>,
        findings_key: Option<String>,
    ) -> Self {
        self.stream = Some(StreamTarget {
            hub,
            node_id: node_id.into(),
            module_type: module_type.into(),
            findings_key,
        });
        self
    }

    pub fn on_progress(mut self, callback: ProgressCallback) -> Self {
        self.progress = Some(callback);
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn config(&self) -> &BatchConfig {
        &self.config
    }

    /// Process `items` with `exec`, returning one result per item in input order
    ///
    /// Item failures never fail the call; only cancellation does.
    pub async fn process<T, F, Fut>(&self, items: &[T], exec: F) -> Result<Vec<Value>>
    where
        T: BatchItem + Clone,
        F: Fn(T) -> Fut,
        Fut: Future<Output = Result<Value>>,
    {
        let batch_size = self.config.max_concurrent.max(1);
        let total_batches = items.len().div_ceil(batch_size);
        let mut results: Vec<Value> = Vec::with_capacity(items.len());
        let mut output_generated = 0;

        for (batch_index, batch) in items.chunks(batch_size).enumerate() {
            if self.cancel.is_cancelled() {
                return Err(PipelineError::Cancelled);
            }

            log::debug!(
                "Processing batch {}/{} ({} items)",
                batch_index + 1,
                total_batches,
                batch.len()
            );

            let offset = batch_index * batch_size;
            let pending = batch
                .iter()
                .enumerate()
                .map(|(i, item)| self.run_item(item.clone(), offset + i, &exec));

            let batch_results = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(PipelineError::Cancelled),
                batch_results = join_all(pending) => batch_results,
            };

            output_generated += self.count_output(&batch_results);
            results.extend(batch_results.iter().cloned());

            if let Some(callback) = &self.progress {
                callback(BatchProgress {
                    completed: results.len(),
                    total: items.len(),
                    output_generated,
                });
            }

            if let Some(stream) = &self.stream {
                stream.hub.publish(&StreamUpdate::Batch(BatchUpdate {
                    node_id: stream.node_id.clone(),
                    module_type: stream.module_type.clone(),
                    findings_key: stream.findings_key.clone(),
                    batch_results,
                    batch_index,
                    total_batches,
                }));
            }

            let is_last = batch_index + 1 == total_batches;
            if !is_last && !self.config.delay_between_batches.is_zero() {
                tokio::select! {
                    biased;
                    _ = self.cancel.cancelled() => return Err(PipelineError::Cancelled),
                    _ = self.sleeper.sleep(self.config.delay_between_batches) => {}
                }
            }
        }

        Ok(results)
    }

    async fn run_item<T, F, Fut>(&self, item: T, index: usize, exec: &F) -> Value
    where
        T: BatchItem + Clone,
        F: Fn(T) -> Fut,
        Fut: Future<Output = Result<Value>>,
    {
        let id = item.item_id().unwrap_or_else(|| format!("item-{}", index));
        let policy = &self.config.retry;
        let mut attempt = 0;

        loop {
            attempt += 1;
            let error = match exec(item.clone()).await {
                Ok(value) => return value,
                Err(e) => e,
            };

            if error.is_cancelled() || !policy.should_retry(attempt) {
                log::warn!("Item '{}' failed after {} attempt(s): {}", id, attempt, error);
                return error_placeholder(&id, &error.to_string());
            }

            let delay = policy.delay_for(attempt);
            log::debug!(
                "Item '{}' attempt {} failed ({}), retrying in {:?}",
                id,
                attempt,
                error,
                delay
            );
            self.sleeper.sleep(delay).await;
        }
    }

    fn count_output(&self, batch_results: &[Value]) -> usize {
        let findings_key = self.stream.as_ref().and_then(|s| s.findings_key.as_deref());
        batch_results
            .iter()
            .filter(|r| !is_error_result(r))
            .map(|r| match findings_key {
                Some(key) => r.get(key).and_then(Value::as_array).map_or(0, Vec::len),
                None => 1,
            })
            .sum()
    }
}
