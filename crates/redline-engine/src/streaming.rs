//! Streaming of partial module results
//!
//! The batch processor publishes a [`BatchUpdate`] to a [`StreamHub`] after
//! every batch, and the executor publishes a [`NodeCompletion`] when a node
//! finishes. Any number of listeners can subscribe; each subscription is
//! removed when its [`Subscription`] handle is dropped or unsubscribed.
//!
//! [`StreamingAggregator`] is the listener that turns the cumulative finding
//! set into a [`DisplayDocument`] for progressive display, and swaps in the
//! final document once the owning node completes.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::batch::is_error_result;
use crate::constants::layout::PARAGRAPH_SEPARATOR;

/// Results of one finished batch
#[derive(Debug, Clone, PartialEq)]
pub struct BatchUpdate {
    pub node_id: String,
    pub module_type: String,
    /// Key of the findings array inside each result, for findings-shaped modules
    pub findings_key: Option<String>,
    /// Per-item results of this batch, in input order
    pub batch_results: Vec<Value>,
    /// Zero-based index of the batch
    pub batch_index: usize,
    pub total_batches: usize,
}

/// Final result of a node, published once the node completes
#[derive(Debug, Clone, PartialEq)]
pub struct NodeCompletion {
    pub node_id: String,
    pub module_type: String,
    pub findings_key: Option<String>,
    pub result: Value,
}

/// Message delivered to stream listeners
#[derive(Debug, Clone, PartialEq)]
pub enum StreamUpdate {
    Batch(BatchUpdate),
    Completed(NodeCompletion),
}

impl StreamUpdate {
    pub fn node_id(&self) -> &str {
        match self {
            Self::Batch(update) => &update.node_id,
            Self::Completed(completion) => &completion.node_id,
        }
    }
}

/// Listener callback
pub type StreamHandler = Arc<dyn Fn(&StreamUpdate) + Send + Sync>;

/// Fan-out point for batch updates
#[derive(Default)]
pub struct StreamHub {
    handlers: RwLock<Vec<(u64, StreamHandler)>>,
    next_id: AtomicU64,
}

impl StreamHub {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Register a listener; it stays registered while the returned handle lives
    #[must_use = "dropping the Subscription unsubscribes the handler"]
    pub fn subscribe<F>(self: &Arc<Self>, handler: F) -> Subscription
    where
        F: Fn(&StreamUpdate) + Send + Sync + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.handlers.write().push((id, Arc::new(handler)));
        Subscription {
            hub: Arc::downgrade(self),
            id,
        }
    }

    /// Deliver an update to every current listener
    pub fn publish(&self, update: &StreamUpdate) {
        // Snapshot so handlers may subscribe or unsubscribe while running
        let handlers: Vec<StreamHandler> = self
            .handlers
            .read()
            .iter()
            .map(|(_, handler)| handler.clone())
            .collect();

        for handler in handlers {
            handler(update);
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.handlers.read().len()
    }

    fn remove(&self, id: u64) {
        self.handlers.write().retain(|(handler_id, _)| *handler_id != id);
    }
}

/// Handle to a registered listener
pub struct Subscription {
    hub: Weak<StreamHub>,
    id: u64,
}

impl Subscription {
    /// Remove the listener now
    pub fn unsubscribe(self) {
        // Drop does the work
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(hub) = self.hub.upgrade() {
            hub.remove(self.id);
        }
    }
}

/// One displayable finding
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DisplayEntry {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub paragraph_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revised: Option<String>,
    #[serde(default)]
    pub suggestions: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
}

impl DisplayEntry {
    fn from_finding(index: usize, finding: &Value) -> Self {
        let text = |keys: &[&str]| {
            keys.iter()
                .find_map(|k| finding.get(*k).and_then(Value::as_str))
                .map(str::to_string)
        };

        let suggestions = finding
            .get("suggestions")
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .map(|s| match s {
                        Value::String(text) => text.clone(),
                        other => ["message", "explanation", "suggestion"]
                            .iter()
                            .find_map(|k| other.get(*k).and_then(Value::as_str))
                            .map(str::to_string)
                            .or_else(|| {
                                let original = other.get("original").and_then(Value::as_str)?;
                                let revised = ["corrected", "revised"]
                                    .iter()
                                    .find_map(|k| other.get(*k).and_then(Value::as_str))?;
                                Some(format!("{} -> {}", original, revised))
                            })
                            .unwrap_or_else(|| other.to_string()),
                    })
                    .collect()
            })
            .unwrap_or_default();

        Self {
            id: text(&["id"]).unwrap_or_else(|| format!("entry-{}", index)),
            paragraph_id: text(&["paragraphId"]),
            original: text(&["original", "originalText", "text"]),
            revised: text(&["corrected", "revised"]),
            suggestions,
            score: finding.get("score").and_then(Value::as_f64),
        }
    }
}

/// Composite document built from a module's findings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DisplayDocument {
    pub entries: Vec<DisplayEntry>,
    pub completed_batches: usize,
    pub total_batches: usize,
    /// True once built from the node's final result
    pub is_final: bool,
}

impl DisplayDocument {
    pub fn from_findings(findings: &[Value], completed_batches: usize, total_batches: usize, is_final: bool) -> Self {
        Self {
            entries: findings
                .iter()
                .enumerate()
                .map(|(i, f)| DisplayEntry::from_finding(i, f))
                .collect(),
            completed_batches,
            total_batches,
            is_final,
        }
    }

    /// Revised text where available, otherwise the original, one entry per paragraph
    pub fn render_text(&self) -> String {
        self.entries
            .iter()
            .filter_map(|e| e.revised.as_deref().or(e.original.as_deref()))
            .filter(|t| !t.trim().is_empty())
            .collect::<Vec<_>>()
            .join(PARAGRAPH_SEPARATOR)
    }
}

#[derive(Default)]
struct AggregatorState {
    node_id: Option<String>,
    findings_key: Option<String>,
    completed_batches: usize,
    total_batches: usize,
    findings: Vec<Value>,
    partial_document: Option<DisplayDocument>,
    final_document: Option<DisplayDocument>,
}

/// Builds a displayable document while a module runs
#[derive(Default)]
pub struct StreamingAggregator {
    node_filter: Option<String>,
    state: Mutex<AggregatorState>,
}

impl StreamingAggregator {
    /// Aggregate updates from every node
    ///
    /// Partial state restarts when batches of another node arrive. A final
    /// document stays current until the next node it follows completes.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Aggregate updates from a single node only
    pub fn for_node(node_id: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            node_filter: Some(node_id.into()),
            state: Mutex::new(AggregatorState::default()),
        })
    }

    /// Subscribe this aggregator to a hub
    pub fn attach(self: &Arc<Self>, hub: &Arc<StreamHub>) -> Subscription {
        let aggregator = Arc::clone(self);
        hub.subscribe(move |update| aggregator.on_update(update))
    }

    /// Route one hub message
    pub fn on_update(&self, update: &StreamUpdate) {
        match update {
            StreamUpdate::Batch(batch) => self.on_batch(batch),
            StreamUpdate::Completed(completion) => self.on_completed(completion),
        }
    }

    fn follows(&self, node_id: &str) -> bool {
        self.node_filter.as_deref().map_or(true, |filter| filter == node_id)
    }

    /// Fold one batch into the partial document
    pub fn on_batch(&self, update: &BatchUpdate) {
        if !self.follows(&update.node_id) {
            return;
        }

        let mut state = self.state.lock();
        if state.node_id.as_deref() != Some(update.node_id.as_str()) {
            let final_document = state.final_document.take();
            *state = AggregatorState {
                node_id: Some(update.node_id.clone()),
                final_document,
                ..AggregatorState::default()
            };
        }

        state.findings_key = update.findings_key.clone();
        state.completed_batches = update.batch_index + 1;
        state.total_batches = update.total_batches;

        if let Some(key) = &update.findings_key {
            for result in update.batch_results.iter().filter(|r| !is_error_result(r)) {
                if let Some(items) = result.get(key).and_then(Value::as_array) {
                    state.findings.extend(items.iter().cloned());
                }
            }
        }

        let document = DisplayDocument::from_findings(
            &state.findings,
            state.completed_batches,
            state.total_batches,
            false,
        );
        state.partial_document = Some(document);
    }

    /// Finalize when the node being aggregated completes
    fn on_completed(&self, completion: &NodeCompletion) {
        if !self.follows(&completion.node_id) {
            return;
        }

        let mut state = self.state.lock();
        match state.node_id.as_deref() {
            Some(current) if current != completion.node_id => return,
            // Unfiltered aggregators only finalize the node they were streaming
            None if self.node_filter.is_none() => return,
            _ => {}
        }
        state.node_id = Some(completion.node_id.clone());
        if completion.findings_key.is_some() {
            state.findings_key = completion.findings_key.clone();
        }
        Self::finalize_state(&mut state, &completion.result);
    }

    /// Build the final document from the node's result
    ///
    /// Looks for the findings array at the top level, then under `result`, then
    /// under `output`; the first non-empty array wins. Returns whether a
    /// final document was built.
    pub fn finalize(&self, result: &Value) -> bool {
        Self::finalize_state(&mut self.state.lock(), result)
    }

    fn finalize_state(state: &mut AggregatorState, result: &Value) -> bool {
        let key = state.findings_key.clone().unwrap_or_else(|| "analysis".to_string());

        let candidates = [
            format!("/{}", key),
            format!("/result/{}", key),
            format!("/output/{}", key),
        ];

        let findings = candidates.iter().find_map(|pointer| {
            result
                .pointer(pointer)
                .and_then(Value::as_array)
                .filter(|items| !items.is_empty())
        });

        match findings {
            Some(items) => {
                let total = state.total_batches;
                state.final_document = Some(DisplayDocument::from_findings(items, total, total, true));
                true
            }
            None => {
                log::debug!("No findings under '{}' in final result", key);
                false
            }
        }
    }

    /// Final document if set, otherwise the latest partial document
    pub fn current_document(&self) -> Option<DisplayDocument> {
        let state = self.state.lock();
        state
            .final_document
            .clone()
            .or_else(|| state.partial_document.clone())
    }

    pub fn partial_document(&self) -> Option<DisplayDocument> {
        self.state.lock().partial_document.clone()
    }

    pub fn final_document(&self) -> Option<DisplayDocument> {
        self.state.lock().final_document.clone()
    }

    /// `(completed_batches, total_batches)` of the node being aggregated
    pub fn progress(&self) -> (usize, usize) {
        let state = self.state.lock();
        (state.completed_batches, state.total_batches)
    }

    pub fn reset(&self) {
        *self.state.lock() = AggregatorState::default();
    }
}
