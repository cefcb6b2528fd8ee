//! Event types for streaming pipeline progress
//!
//! Events are sent from the executor to any consumer (a CLI progress line,
//! a UI bridge) to report node lifecycle changes and module progress.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::types::ModuleProgress;

/// Trait for sending pipeline events
///
/// This abstracts over the transport mechanism (mpsc, UI channel, log line)
/// so the engine can be embedded in different hosts.
pub trait EventSink: Send + Sync {
    /// Send an event
    ///
    /// Returns an error if the event could not be sent (e.g., channel closed)
    fn send(&self, event: PipelineEvent) -> Result<(), EventError>;
}

/// Error when sending events fails
#[derive(Debug, Clone)]
pub struct EventError {
    pub message: String,
}

impl std::fmt::Display for EventError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Event error: {}", self.message)
    }
}

impl std::error::Error for EventError {}

/// Events emitted during a pipeline run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum PipelineEvent {
    /// Run started with the resolved execution order
    #[serde(rename_all = "camelCase")]
    RunStarted {
        run_id: String,
        start_node_id: String,
        order: Vec<String>,
    },

    /// A node moved to `processing`
    #[serde(rename_all = "camelCase")]
    NodeStarted {
        run_id: String,
        node_id: String,
        module_type: String,
    },

    /// A batch of a module finished
    #[serde(rename_all = "camelCase")]
    ModuleProgress {
        run_id: String,
        node_id: String,
        progress: ModuleProgress,
    },

    /// A node completed
    #[serde(rename_all = "camelCase")]
    NodeCompleted {
        run_id: String,
        node_id: String,
        processing_time_ms: u64,
        is_endpoint: bool,
    },

    /// A node failed; the run aborts after this event
    #[serde(rename_all = "camelCase")]
    NodeFailed {
        run_id: String,
        node_id: String,
        error: String,
    },

    /// Every node in the order completed
    #[serde(rename_all = "camelCase")]
    RunCompleted {
        run_id: String,
        nodes_executed: usize,
        execution_time_ms: u64,
    },

    /// The run aborted on a node failure
    #[serde(rename_all = "camelCase")]
    RunFailed { run_id: String, error: String },

    /// The run was cancelled by a reset
    #[serde(rename_all = "camelCase")]
    RunCancelled { run_id: String },
}

impl PipelineEvent {
    /// Create a module progress event
    pub fn module_progress(run_id: &str, node_id: &str, progress: ModuleProgress) -> Self {
        Self::ModuleProgress {
            run_id: run_id.to_string(),
            node_id: node_id.to_string(),
            progress,
        }
    }

    /// Create a node failed event
    pub fn node_failed(run_id: &str, node_id: &str, error: impl Into<String>) -> Self {
        Self::NodeFailed {
            run_id: run_id.to_string(),
            node_id: node_id.to_string(),
            error: error.into(),
        }
    }

    /// Run this event belongs to
    pub fn run_id(&self) -> &str {
        match self {
            Self::RunStarted { run_id, .. }
            | Self::NodeStarted { run_id, .. }
            | Self::ModuleProgress { run_id, .. }
            | Self::NodeCompleted { run_id, .. }
            | Self::NodeFailed { run_id, .. }
            | Self::RunCompleted { run_id, .. }
            | Self::RunFailed { run_id, .. }
            | Self::RunCancelled { run_id } => run_id,
        }
    }
}

/// A no-op event sink that discards all events
///
/// Useful for testing or when events aren't needed.
pub struct NullEventSink;

impl EventSink for NullEventSink {
    fn send(&self, _event: PipelineEvent) -> Result<(), EventError> {
        Ok(())
    }
}

/// A vector-based event sink that collects events
///
/// Useful for testing to verify events were emitted correctly.
pub struct VecEventSink {
    events: Mutex<Vec<PipelineEvent>>,
}

impl VecEventSink {
    pub fn new() -> Self {
        Self {
            events: Mutex::new(Vec::new()),
        }
    }

    /// Get all collected events
    pub fn events(&self) -> Vec<PipelineEvent> {
        self.events.lock().clone()
    }

    /// Clear all collected events
    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

impl Default for VecEventSink {
    fn default() -> Self {
        Self::new()
    }
}

impl EventSink for VecEventSink {
    fn send(&self, event: PipelineEvent) -> Result<(), EventError> {
        self.events.lock().push(event);
        Ok(())
    }
}

/// Event sink that writes each event to the `log` facade
pub struct LogEventSink;

impl EventSink for LogEventSink {
    fn send(&self, event: PipelineEvent) -> Result<(), EventError> {
        match &event {
            PipelineEvent::NodeFailed { node_id, error, .. } => {
                log::error!("Node '{}' failed: {}", node_id, error);
            }
            PipelineEvent::ModuleProgress { node_id, progress, .. } => {
                log::info!(
                    "{} [{}]: {}/{} items",
                    node_id,
                    progress.module_type,
                    progress.completed,
                    progress.total
                );
            }
            other => log::debug!("{:?}", other),
        }
        Ok(())
    }
}
