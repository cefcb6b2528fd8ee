//! Subcommand handlers
//!
//! Each handler returns the text to print so `main` owns stdout.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use redline_engine::types::DocumentFile;
use redline_engine::{
    chunk_document, estimate_tokens, resolve_execution_order, ChunkConfig, EngineConfig, LogEventSink,
    PipelineError, PipelineExecutor, PipelineGraph, PipelineResult, StreamingAggregator,
};
use thiserror::Error;
use tokio::fs;
use transform_client::{build_transformer, ClientError};

#[derive(Debug, Error)]
pub enum CliError {
    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Invalid graph {path}: {source}")]
    Graph {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("Node '{0}' is not a document input")]
    NotDocumentInput(String),

    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    #[error(transparent)]
    Client(#[from] ClientError),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, CliError>;

pub struct RunOptions {
    pub graph: PathBuf,
    pub document: PathBuf,
    pub config: Option<PathBuf>,
    pub start: Option<String>,
    pub output: Option<PathBuf>,
    pub follow: Option<String>,
}

async fn read_text(path: &Path) -> Result<String> {
    fs::read_to_string(path).await.map_err(|source| CliError::Read {
        path: path.to_path_buf(),
        source,
    })
}

async fn load_graph(path: &Path) -> Result<PipelineGraph> {
    let json = read_text(path).await?;
    serde_json::from_str(&json).map_err(|source| CliError::Graph {
        path: path.to_path_buf(),
        source,
    })
}

/// The start node: the one named, or the first document input
fn start_node(graph: &PipelineGraph, start: Option<&str>) -> Result<String> {
    match start {
        Some(id) => graph
            .find_node(id)
            .map(|n| n.id.clone())
            .ok_or_else(|| PipelineError::NodeNotFound(id.to_string()).into()),
        None => graph
            .first_document_input()
            .map(|n| n.id.clone())
            .ok_or_else(|| PipelineError::NoDocumentInput.into()),
    }
}

/// Put the document text on the start node
fn attach_document(graph: &mut PipelineGraph, node_id: &str, name: String, content: String) -> Result<()> {
    let node = graph
        .nodes
        .iter_mut()
        .find(|n| n.id == node_id)
        .ok_or_else(|| PipelineError::NodeNotFound(node_id.to_string()))?;
    if !node.is_document_input() {
        return Err(CliError::NotDocumentInput(node_id.to_string()));
    }
    node.data.file = Some(DocumentFile { name, content });
    Ok(())
}

fn render_results(results: &[PipelineResult]) -> Result<String> {
    let mut out = Vec::with_capacity(results.len());
    for result in results {
        out.push(format!(
            "== {} ({}) ==\n{}",
            result.node_id,
            result.module_type,
            serde_json::to_string_pretty(&result.result)?
        ));
    }
    Ok(out.join("\n\n"))
}

pub async fn run(options: RunOptions) -> Result<String> {
    let config = match &options.config {
        Some(path) => EngineConfig::load(path).await?,
        None => EngineConfig::default(),
    };

    let mut graph = load_graph(&options.graph).await?;
    let start = start_node(&graph, options.start.as_deref())?;
    let content = read_text(&options.document).await?;
    let name = options
        .document
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    attach_document(&mut graph, &start, name, content)?;

    let transformer = build_transformer(&config.transform)?;
    let executor = PipelineExecutor::new(graph, transformer, &config).with_event_sink(Arc::new(LogEventSink));

    let follower = options.follow.as_ref().map(|node_id| {
        let aggregator = StreamingAggregator::for_node(node_id.clone());
        let subscription = aggregator.attach(executor.stream_hub());
        (aggregator, subscription)
    });

    log::info!("Running pipeline from '{}'", start);
    executor.execute_pipeline(&start).await?;

    let results = executor.final_output();
    log::info!("Pipeline finished: {} node results", results.len());

    let mut text = match &options.output {
        Some(path) => {
            let json = serde_json::to_string_pretty(&results)?;
            fs::write(path, json).await.map_err(|source| CliError::Write {
                path: path.clone(),
                source,
            })?;
            log::info!("Wrote results to {}", path.display());
            String::new()
        }
        None => render_results(&executor.endpoint_results())?,
    };

    if let Some((aggregator, subscription)) = follower {
        subscription.unsubscribe();
        if let Some(document) = aggregator.current_document() {
            if !text.is_empty() {
                text.push_str("\n\n");
            }
            text.push_str(&document.render_text());
        }
    }

    Ok(text)
}

pub async fn order(graph_path: &Path, start: Option<&str>) -> Result<String> {
    let graph = load_graph(graph_path).await?;
    let start = start_node(&graph, start)?;
    let order = resolve_execution_order(&start, &graph.edges);

    let lines: Vec<String> = order
        .iter()
        .enumerate()
        .map(|(i, id)| {
            let module_type = graph.find_node(id).map(|n| n.module_type()).unwrap_or("?");
            format!("{}. {} ({})", i + 1, id, module_type)
        })
        .collect();
    Ok(lines.join("\n"))
}

pub async fn chunk(path: &Path, max_tokens: Option<usize>) -> Result<String> {
    let text = read_text(path).await?;
    let mut config = ChunkConfig::default();
    if let Some(max) = max_tokens {
        config.max_tokens = max.max(1);
    }

    let chunks = chunk_document(&text, &config);
    let mut lines = vec![format!(
        "{} bytes, ~{} tokens, {} chunk(s) at {} tokens",
        text.len(),
        estimate_tokens(&text),
        chunks.len(),
        config.max_tokens
    )];
    for chunk in &chunks {
        lines.push(format!(
            "{}: bytes {}..{}, ~{} tokens{}",
            chunk.id,
            chunk.start_position,
            chunk.end_position,
            estimate_tokens(&chunk.content),
            if chunk.overlap.is_some() { " (with overlap)" } else { "" }
        ));
    }
    Ok(lines.join("\n"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use redline_engine::{PipelineEdge, PipelineNode};
    use std::io::Write;

    fn graph() -> PipelineGraph {
        PipelineGraph::new(
            vec![
                PipelineNode::module("grammar", "grammar-checker"),
                PipelineNode::document_input("doc", "", ""),
                PipelineNode::module("split", "paragraph-splitter"),
            ],
            vec![PipelineEdge::new("doc", "split"), PipelineEdge::new("split", "grammar")],
        )
    }

    fn temp_file(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_start_node_defaults_to_document_input() {
        let graph = graph();
        assert_eq!(start_node(&graph, None).unwrap(), "doc");
        assert_eq!(start_node(&graph, Some("split")).unwrap(), "split");
        assert!(matches!(
            start_node(&graph, Some("missing")),
            Err(CliError::Pipeline(PipelineError::NodeNotFound(_)))
        ));
        assert!(matches!(
            start_node(&PipelineGraph::default(), None),
            Err(CliError::Pipeline(PipelineError::NoDocumentInput))
        ));
    }

    #[test]
    fn test_attach_document() {
        let mut graph = graph();
        attach_document(&mut graph, "doc", "brief.txt".into(), "Body text.".into()).unwrap();
        let file = graph.find_node("doc").unwrap().data.file.clone().unwrap();
        assert_eq!(file.name, "brief.txt");
        assert_eq!(file.content, "Body text.");

        let err = attach_document(&mut graph, "grammar", String::new(), String::new()).unwrap_err();
        assert!(matches!(err, CliError::NotDocumentInput(id) if id == "grammar"));
    }

    #[test]
    fn test_order_command() {
        let file = temp_file(&serde_json::to_string(&graph()).unwrap());
        let text = tokio_test::block_on(order(file.path(), None)).unwrap();
        assert_eq!(
            text,
            "1. doc (document-input)\n2. split (paragraph-splitter)\n3. grammar (grammar-checker)"
        );
    }

    #[test]
    fn test_order_rejects_bad_graph() {
        let file = temp_file("{\"nodes\": 3}");
        let err = tokio_test::block_on(order(file.path(), None)).unwrap_err();
        assert!(matches!(err, CliError::Graph { .. }));
    }

    #[test]
    fn test_chunk_command() {
        let file = temp_file(&"word ".repeat(50));
        let text = tokio_test::block_on(chunk(file.path(), Some(25))).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert!(lines[0].starts_with("250 bytes, ~63 tokens"));
        assert!(lines[1].starts_with("chunk-0: bytes 0.."));
        assert!(lines.len() >= 4);
    }

    #[test]
    fn test_render_results() {
        let results = vec![PipelineResult {
            node_id: "grammar".into(),
            module_type: "grammar-checker".into(),
            result: serde_json::json!({"analysis": []}),
            is_endpoint: true,
        }];
        let text = render_results(&results).unwrap();
        assert!(text.starts_with("== grammar (grammar-checker) =="));
        assert!(text.contains("\"analysis\": []"));
    }
}
