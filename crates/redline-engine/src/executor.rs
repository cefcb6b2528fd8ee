//! Pipeline executor
//!
//! Resolves the execution order from a start node, then runs each node in
//! turn: the document input yields the document, every processing module
//! consumes the output of its first upstream node that already produced one.
//! The first node failure aborts the run.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::{Mutex, RwLock};
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::envelope::InputEnvelope;
use crate::error::{PipelineError, Result};
use crate::events::{EventSink, NullEventSink, PipelineEvent};
use crate::modules::ModuleCatalog;
use crate::order::resolve_execution_order;
use crate::processor::{ModuleProcessor, ModuleProgressCallback};
use crate::retry::Sleeper;
use crate::state::{ExecutionTracker, StateSnapshot};
use crate::streaming::{NodeCompletion, StreamHub, StreamUpdate};
use crate::transform::Transformer;
use crate::types::{ModuleProgress, NodeId, PipelineGraph, PipelineResult, DOCUMENT_INPUT};

/// Runs pipeline graphs, one run at a time
pub struct PipelineExecutor {
    graph: PipelineGraph,
    processor: ModuleProcessor,
    tracker: Arc<ExecutionTracker>,
    event_sink: Arc<dyn EventSink>,
    stream_hub: Arc<StreamHub>,
    final_output: RwLock<Vec<PipelineResult>>,
    cancel: Mutex<CancellationToken>,
}

impl PipelineExecutor {
    pub fn new(graph: PipelineGraph, transformer: Arc<dyn Transformer>, config: &EngineConfig) -> Self {
        let stream_hub = StreamHub::new();
        Self {
            graph,
            processor: ModuleProcessor::new(transformer, config).with_stream(stream_hub.clone()),
            tracker: Arc::new(ExecutionTracker::new()),
            event_sink: Arc::new(NullEventSink),
            stream_hub,
            final_output: RwLock::new(Vec::new()),
            cancel: Mutex::new(CancellationToken::new()),
        }
    }

    /// Send lifecycle and progress events to `sink`
    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.event_sink = sink;
        self
    }

    /// Replace the timer behind retry and batch delays
    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.processor = self.processor.with_sleeper(sleeper);
        self
    }

    pub fn with_catalog(mut self, catalog: ModuleCatalog) -> Self {
        self.processor = self.processor.with_catalog(catalog);
        self
    }

    pub fn graph(&self) -> &PipelineGraph {
        &self.graph
    }

    /// Hub receiving every batch of every module
    pub fn stream_hub(&self) -> &Arc<StreamHub> {
        &self.stream_hub
    }

    /// Read access to the state table
    pub fn tracker(&self) -> &Arc<ExecutionTracker> {
        &self.tracker
    }

    pub fn is_executing(&self) -> bool {
        self.tracker.is_executing()
    }

    pub fn state_snapshot(&self) -> StateSnapshot {
        self.tracker.snapshot()
    }

    /// Results of the last run, in execution order
    pub fn final_output(&self) -> Vec<PipelineResult> {
        self.final_output.read().clone()
    }

    /// Results of nodes without outgoing edges
    pub fn endpoint_results(&self) -> Vec<PipelineResult> {
        self.final_output.read().iter().filter(|r| r.is_endpoint).cloned().collect()
    }

    /// Cancel the current run and discard all state
    pub fn reset(&self) {
        self.cancel.lock().cancel();
        self.tracker.clear();
        self.final_output.write().clear();
        log::info!("Pipeline state reset");
    }

    /// Run from the first document-input node in the graph
    pub async fn execute_first_pipeline(&self) -> Result<()> {
        let start = self
            .graph
            .first_document_input()
            .ok_or(PipelineError::NoDocumentInput)?
            .id
            .clone();

        let others = self.graph.document_inputs().count() - 1;
        if others > 0 {
            log::warn!("Graph has {} more document input(s); running from '{}' only", others, start);
        }

        self.execute_pipeline(&start).await
    }

    /// Run every node reachable from `start_node_id`
    pub async fn execute_pipeline(&self, start_node_id: &str) -> Result<()> {
        if self.graph.find_node(start_node_id).is_none() {
            return Err(PipelineError::NodeNotFound(start_node_id.to_string()));
        }
        if !self.tracker.try_start() {
            return Err(PipelineError::AlreadyExecuting);
        }

        let run_id = format!("run-{}", Uuid::new_v4());
        let token = CancellationToken::new();
        *self.cancel.lock() = token.clone();

        let order = resolve_execution_order(start_node_id, &self.graph.edges);
        self.tracker.begin_run(&order);
        self.final_output.write().clear();

        log::info!("Starting {} with {} node(s)", run_id, order.len());
        self.emit(PipelineEvent::RunStarted {
            run_id: run_id.clone(),
            start_node_id: start_node_id.to_string(),
            order: order.clone(),
        });

        let started = Instant::now();
        let outcome = self.run_nodes(&run_id, &order, &token).await;
        self.tracker.set_executing(false);

        match &outcome {
            Ok(()) => {
                let execution_time_ms = started.elapsed().as_millis() as u64;
                log::info!("{} completed in {}ms", run_id, execution_time_ms);
                self.emit(PipelineEvent::RunCompleted {
                    run_id,
                    nodes_executed: order.len(),
                    execution_time_ms,
                });
            }
            Err(PipelineError::Cancelled) => {
                log::info!("{} cancelled", run_id);
                self.emit(PipelineEvent::RunCancelled { run_id });
            }
            Err(e) => {
                self.emit(PipelineEvent::RunFailed {
                    run_id,
                    error: e.to_string(),
                });
            }
        }

        outcome
    }

    async fn run_nodes(&self, run_id: &str, order: &[NodeId], token: &CancellationToken) -> Result<()> {
        let mut outputs: HashMap<NodeId, Value> = HashMap::new();

        for node_id in order {
            if token.is_cancelled() {
                return Err(PipelineError::Cancelled);
            }

            self.tracker
                .mark_processing(node_id)
                .map_err(|e| cancelled_or(token, e))?;
            let module_type = self
                .graph
                .find_node(node_id)
                .map(|n| n.module_type().to_string())
                .unwrap_or_default();
            self.emit(PipelineEvent::NodeStarted {
                run_id: run_id.to_string(),
                node_id: node_id.clone(),
                module_type: module_type.clone(),
            });

            let node_started = Instant::now();
            let outcome = match self.run_node(run_id, node_id, &outputs, token).await {
                Ok(_) if token.is_cancelled() => Err(PipelineError::Cancelled),
                other => other,
            };

            match outcome {
                Ok(value) => {
                    let processing_time_ms = node_started.elapsed().as_millis() as u64;
                    let is_endpoint = self.graph.is_endpoint(node_id);

                    self.tracker
                        .mark_completed(node_id, value.clone(), processing_time_ms)
                        .map_err(|e| cancelled_or(token, e))?;
                    self.final_output.write().push(PipelineResult {
                        node_id: node_id.clone(),
                        module_type: module_type.clone(),
                        result: value.clone(),
                        is_endpoint,
                    });
                    self.stream_hub.publish(&StreamUpdate::Completed(NodeCompletion {
                        node_id: node_id.clone(),
                        module_type,
                        findings_key: self.findings_key_of(node_id),
                        result: value.clone(),
                    }));
                    self.emit(PipelineEvent::NodeCompleted {
                        run_id: run_id.to_string(),
                        node_id: node_id.clone(),
                        processing_time_ms,
                        is_endpoint,
                    });

                    outputs.insert(node_id.clone(), value);
                }
                Err(e) => {
                    let message = e.to_string();
                    if !e.is_cancelled() {
                        log::error!("Node '{}' failed: {}", node_id, message);
                    }
                    // The table may already be cleared by a reset
                    if let Err(state_err) = self.tracker.mark_error(node_id, &message) {
                        log::debug!("Could not record failure of '{}': {}", node_id, state_err);
                    }
                    self.emit(PipelineEvent::node_failed(run_id, node_id, message));
                    return Err(e);
                }
            }
        }

        Ok(())
    }

    async fn run_node(
        &self,
        run_id: &str,
        node_id: &str,
        outputs: &HashMap<NodeId, Value>,
        token: &CancellationToken,
    ) -> Result<Value> {
        let node = self
            .graph
            .find_node(node_id)
            .ok_or_else(|| PipelineError::NodeNotFound(node_id.to_string()))?;

        if node.is_document_input() {
            let file = node
                .data
                .file
                .as_ref()
                .ok_or_else(|| PipelineError::invalid_input(node_id, "document input has no file"))?;
            InputEnvelope::document(file.content.clone(), None).validate(node_id)?;

            return Ok(json!({
                "text": file.content,
                "name": file.name,
                "moduleType": DOCUMENT_INPUT,
            }));
        }

        let input = self.resolve_input(node_id, outputs)?;
        self.processor
            .process(node, &input, token, Some(self.progress_callback(run_id, node_id)))
            .await
    }

    /// Envelope built from the first upstream node that produced output
    fn resolve_input(&self, node_id: &str, outputs: &HashMap<NodeId, Value>) -> Result<InputEnvelope> {
        let (source, output) = self
            .graph
            .incoming_edges(node_id)
            .find_map(|edge| outputs.get(&edge.source).map(|o| (edge.source.as_str(), o)))
            .ok_or_else(|| PipelineError::invalid_input(node_id, "no upstream node produced output"))?;

        let source_node = self
            .graph
            .find_node(source)
            .ok_or_else(|| PipelineError::NodeNotFound(source.to_string()))?;

        if source_node.is_document_input() {
            let text = output.get("text").and_then(Value::as_str).unwrap_or_default();
            let name = output.get("name").and_then(Value::as_str).map(str::to_string);
            return Ok(InputEnvelope::document(text, name));
        }

        let spec = self.processor.spec_for(source_node)?;
        InputEnvelope::from_module_output(node_id, &spec.shape, output)
    }

    /// Key of the findings array in a node's result, if its module has one
    fn findings_key_of(&self, node_id: &str) -> Option<String> {
        let node = self.graph.find_node(node_id)?;
        if node.is_document_input() {
            return None;
        }
        let spec = self.processor.spec_for(node).ok()?;
        spec.shape.findings_key().map(str::to_string)
    }

    fn progress_callback(&self, run_id: &str, node_id: &str) -> ModuleProgressCallback {
        let tracker = self.tracker.clone();
        let sink = self.event_sink.clone();
        let run_id = run_id.to_string();
        let node_id = node_id.to_string();

        Arc::new(move |progress: ModuleProgress| {
            tracker.update_progress(&node_id, progress.clone());
            if let Err(e) = sink.send(PipelineEvent::module_progress(&run_id, &node_id, progress)) {
                log::debug!("Progress event dropped: {}", e);
            }
        })
    }

    fn emit(&self, event: PipelineEvent) {
        if let Err(e) = self.event_sink.send(event) {
            log::debug!("Event dropped: {}", e);
        }
    }
}

/// State table errors after a reset are reported as the cancellation they are
fn cancelled_or(token: &CancellationToken, error: PipelineError) -> PipelineError {
    if token.is_cancelled() {
        PipelineError::Cancelled
    } else {
        error
    }
}
