//! Core types for pipeline graphs
//!
//! These types mirror what the authoring UI hands to the engine: nodes with
//! a kind and a small config blob, and `(source, target)` edges. The engine
//! treats the graph as read-only for the duration of a run.

use serde::{Deserialize, Serialize};

/// Unique identifier for a node
pub type NodeId = String;

/// Module type reported for document-input nodes
pub const DOCUMENT_INPUT: &str = "document-input";

/// Kind of a pipeline node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NodeKind {
    /// Supplies the document text for a run
    DocumentInput,
    /// Runs one module against its upstream output
    ProcessingModule,
}

/// An uploaded document attached to a document-input node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentFile {
    /// File name shown in the UI
    #[serde(default)]
    pub name: String,
    /// Extracted plain text
    pub content: String,
}

/// Per-node configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeData {
    /// Module type (e.g. "grammar-checker"); unused for document inputs
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub module_type: Option<String>,
    /// Document attached to a document-input node
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<DocumentFile>,
    /// Replaces the module's default system prompt
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_override: Option<String>,
    /// Display label
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

/// A node instance in a pipeline graph
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineNode {
    /// Unique identifier for this node instance
    pub id: NodeId,
    /// Node kind
    #[serde(alias = "type")]
    pub kind: NodeKind,
    /// Configuration for this instance
    #[serde(default)]
    pub data: NodeData,
}

impl PipelineNode {
    /// Create a document-input node holding `content`
    pub fn document_input(id: impl Into<String>, name: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: NodeKind::DocumentInput,
            data: NodeData {
                file: Some(DocumentFile {
                    name: name.into(),
                    content: content.into(),
                }),
                ..NodeData::default()
            },
        }
    }

    /// Create a processing-module node
    pub fn module(id: impl Into<String>, module_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: NodeKind::ProcessingModule,
            data: NodeData {
                module_type: Some(module_type.into()),
                ..NodeData::default()
            },
        }
    }

    /// Set the prompt override
    pub fn with_prompt_override(mut self, prompt: impl Into<String>) -> Self {
        self.data.prompt_override = Some(prompt.into());
        self
    }

    /// Module type of this node; document inputs report `document-input`
    pub fn module_type(&self) -> &str {
        match self.kind {
            NodeKind::DocumentInput => DOCUMENT_INPUT,
            NodeKind::ProcessingModule => self.data.module_type.as_deref().unwrap_or(""),
        }
    }

    pub fn is_document_input(&self) -> bool {
        self.kind == NodeKind::DocumentInput
    }
}

/// An edge: `target` consumes `source`'s output
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineEdge {
    /// Optional edge id from the authoring layer
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,
    /// Source node ID
    pub source: NodeId,
    /// Target node ID
    pub target: NodeId,
}

impl PipelineEdge {
    pub fn new(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            id: String::new(),
            source: source.into(),
            target: target.into(),
        }
    }
}

/// A complete pipeline graph
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineGraph {
    /// Nodes in authoring order
    pub nodes: Vec<PipelineNode>,
    /// Edges connecting nodes
    pub edges: Vec<PipelineEdge>,
}

impl PipelineGraph {
    /// Create a graph from nodes and edges
    pub fn new(nodes: Vec<PipelineNode>, edges: Vec<PipelineEdge>) -> Self {
        Self { nodes, edges }
    }

    /// Find a node by ID
    pub fn find_node(&self, id: &str) -> Option<&PipelineNode> {
        self.nodes.iter().find(|n| n.id == id)
    }

    /// Get edges coming into a node
    pub fn incoming_edges<'a>(&'a self, node_id: &'a str) -> impl Iterator<Item = &'a PipelineEdge> + 'a {
        self.edges.iter().filter(move |e| e.target == node_id)
    }

    /// Get edges going out of a node
    pub fn outgoing_edges<'a>(&'a self, node_id: &'a str) -> impl Iterator<Item = &'a PipelineEdge> + 'a {
        self.edges.iter().filter(move |e| e.source == node_id)
    }

    /// A node with no outgoing edges is a terminal output of its branch
    pub fn is_endpoint(&self, node_id: &str) -> bool {
        self.outgoing_edges(node_id).next().is_none()
    }

    /// All document-input nodes in array order
    pub fn document_inputs(&self) -> impl Iterator<Item = &PipelineNode> {
        self.nodes.iter().filter(|n| n.is_document_input())
    }

    /// The document-input node that a run starts from when none is chosen
    pub fn first_document_input(&self) -> Option<&PipelineNode> {
        self.document_inputs().next()
    }
}

/// Progress of the module currently being processed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModuleProgress {
    /// Work items finished so far (chunks, paragraphs or findings)
    pub completed: usize,
    /// Total work items for this module
    pub total: usize,
    pub module_type: String,
    /// Input envelope kind ("document", "paragraphs", ...)
    pub input_type: String,
    /// Items that produced a usable (non-error) result
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_generated: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_type: Option<String>,
}

/// Output of one executed node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineResult {
    pub node_id: NodeId,
    pub module_type: String,
    pub result: serde_json::Value,
    /// True when the node has no outgoing edges
    #[serde(default)]
    pub is_endpoint: bool,
}
