//! Redline Engine - Graph-based document-processing pipelines
//!
//! This crate executes a directed graph of document-processing stages
//! against an external text-transformation service. It supports:
//!
//! - Breadth-first execution order from a document-input node
//! - Token-bounded chunking of oversized documents
//! - Bounded-concurrency batches with retry and backoff
//! - Reassembly of chunked and per-paragraph results
//! - Per-node execution state and lifecycle events
//! - Streaming of partial results for progressive display
//! - Absolute positions for paragraph-relative citations
//!
//! # Architecture
//!
//! - `PipelineExecutor`: resolves the order, runs nodes, owns the state table
//! - `ModuleProcessor`: turns a node's input into work items and merges results
//! - `BatchProcessor`: runs work items through the `Transformer` in batches
//! - `StreamHub`: fan-out of batch results and node completions to any number of listeners
//!
//! # Example
//!
//! ```ignore
//! use redline_engine::{EngineConfig, PipelineExecutor, PipelineGraph};
//!
//! let graph: PipelineGraph = serde_json::from_str(&graph_json)?;
//! let executor = PipelineExecutor::new(graph, transformer, &EngineConfig::default());
//! executor.execute_first_pipeline().await?;
//! for result in executor.endpoint_results() {
//!     println!("{}: {}", result.node_id, result.result);
//! }
//! ```

pub mod batch;
pub mod chunker;
pub mod citations;
pub mod config;
pub mod constants;
pub mod envelope;
pub mod error;
pub mod events;
pub mod executor;
pub mod modules;
pub mod order;
pub mod parse;
pub mod processor;
pub mod reassemble;
pub mod retry;
pub mod state;
pub mod streaming;
pub mod transform;
pub mod types;

// Re-export key types
pub use batch::{BatchConfig, BatchProcessor, BatchProgress, ProgressCallback};
pub use chunker::{chunk_document, estimate_tokens, ChunkConfig, DocumentChunk};
pub use citations::{CandidateFinding, Citation, CitationPositionMapper};
pub use config::{EngineConfig, TransformBackend, TransformConfig};
pub use envelope::{join_paragraphs, split_paragraphs, InputEnvelope, Paragraph, Payload};
pub use error::{PipelineError, Result};
pub use events::{EventSink, LogEventSink, NullEventSink, PipelineEvent, VecEventSink};
pub use executor::PipelineExecutor;
pub use modules::{InputMode, ModuleCatalog, ModuleSpec, OutputShape};
pub use order::resolve_execution_order;
pub use processor::ModuleProcessor;
pub use reassemble::reassemble;
pub use retry::{Backoff, RecordingSleeper, RetryPolicy, Sleeper, TokioSleeper};
pub use state::{ExecutionTracker, NodeExecutionState, NodeStatus, StateSnapshot};
pub use streaming::{
    BatchUpdate, DisplayDocument, NodeCompletion, StreamHub, StreamUpdate, StreamingAggregator, Subscription,
};
pub use transform::{TransformError, Transformer};
pub use types::{ModuleProgress, NodeId, NodeKind, PipelineEdge, PipelineGraph, PipelineNode, PipelineResult};

pub use tokio_util::sync::CancellationToken;
