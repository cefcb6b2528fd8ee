//! Error types for the pipeline engine

use thiserror::Error;

use crate::state::NodeStatus;

/// Result type alias using PipelineError
pub type Result<T> = std::result::Result<T, PipelineError>;

/// Errors that abort a pipeline run
///
/// Item-level failures (a chunk or paragraph exhausting its retries) and
/// response parse failures never surface as a `PipelineError`; they are
/// recovered inside the batch processor and the response parser.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Node referenced by id does not exist in the graph
    #[error("Node not found: {0}")]
    NodeNotFound(String),

    /// The graph has no document-input node to start from
    #[error("Graph has no document-input node")]
    NoDocumentInput,

    /// Node declares a module type the catalog does not know
    #[error("Unknown module type: {0}")]
    UnknownModule(String),

    /// Node input is missing or has the wrong shape
    #[error("Invalid input for '{node}': {reason}")]
    InvalidInput { node: String, reason: String },

    /// Execution state machine was asked to move backward or skip a step
    #[error("Invalid state transition for '{node}': {from} -> {to}")]
    InvalidTransition {
        node: String,
        from: NodeStatus,
        to: NodeStatus,
    },

    /// Module processing failed
    #[error("Module execution failed: {0}")]
    ModuleFailed(String),

    /// A run is already in progress
    #[error("A pipeline run is already executing")]
    AlreadyExecuting,

    /// Run was cancelled by a reset
    #[error("Pipeline cancelled")]
    Cancelled,

    /// Configuration could not be loaded or is invalid
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl PipelineError {
    /// Create a module failed error with a message
    pub fn failed(msg: impl Into<String>) -> Self {
        Self::ModuleFailed(msg.into())
    }

    /// Create an invalid input error for a node
    pub fn invalid_input(node: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidInput {
            node: node.into(),
            reason: reason.into(),
        }
    }

    /// Whether this error came from a cancelled run
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}
