//! End-to-end pipeline runs against scripted transformers

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};

use redline_engine::{
    join_paragraphs, split_paragraphs, EngineConfig, NodeStatus, PipelineEdge, PipelineError, PipelineEvent,
    PipelineExecutor, PipelineGraph, PipelineNode, RecordingSleeper, StreamingAggregator, TransformError,
    Transformer, VecEventSink,
};

const DOCUMENT: &str = "The defendant were present at the hearing.\n\nNoted.\n\nCounsel have filed the motion late.";

/// Echoes each paragraph or chunk back as one scored grammar finding
struct EchoGrammar {
    calls: Mutex<usize>,
}

impl EchoGrammar {
    fn new() -> Arc<Self> {
        Arc::new(Self { calls: Mutex::new(0) })
    }

    fn calls(&self) -> usize {
        *self.calls.lock()
    }
}

#[async_trait]
impl Transformer for EchoGrammar {
    async fn transform(&self, prompt_data: &str, _system_prompt: &str) -> Result<String, TransformError> {
        *self.calls.lock() += 1;
        let data: Value = serde_json::from_str(prompt_data).map_err(|e| TransformError::Service(e.to_string()))?;
        let text = data["text"].as_str().unwrap_or_default();
        Ok(json!({
            "analysis": [{"id": "a1", "original": text, "corrected": text, "score": 80}]
        })
        .to_string())
    }
}

/// Never answers
struct Stalled;

#[async_trait]
impl Transformer for Stalled {
    async fn transform(&self, _prompt_data: &str, _system_prompt: &str) -> Result<String, TransformError> {
        futures_util::future::pending::<()>().await;
        Err(TransformError::Service("unreachable".into()))
    }
}

fn grammar_graph(document: &str) -> PipelineGraph {
    PipelineGraph::new(
        vec![
            PipelineNode::document_input("doc", "brief.txt", document),
            PipelineNode::module("split", "paragraph-splitter"),
            PipelineNode::module("grammar", "grammar-checker"),
        ],
        vec![PipelineEdge::new("doc", "split"), PipelineEdge::new("split", "grammar")],
    )
}

fn executor(graph: PipelineGraph, transformer: Arc<dyn Transformer>, config: &EngineConfig) -> PipelineExecutor {
    PipelineExecutor::new(graph, transformer, config).with_sleeper(Arc::new(RecordingSleeper::new()))
}

#[tokio::test]
async fn test_document_splitter_grammar_scenario() {
    let transformer = EchoGrammar::new();
    let events = Arc::new(VecEventSink::new());
    let executor = executor(grammar_graph(DOCUMENT), transformer.clone(), &EngineConfig::default())
        .with_event_sink(events.clone());

    executor.execute_first_pipeline().await.unwrap();

    let results = executor.final_output();
    let order: Vec<&str> = results.iter().map(|r| r.node_id.as_str()).collect();
    assert_eq!(order, vec!["doc", "split", "grammar"]);

    let long_paragraphs = split_paragraphs(DOCUMENT)
        .iter()
        .filter(|p| p.content.chars().count() > 10)
        .count();
    let grammar = &results[2];
    assert!(grammar.is_endpoint);
    assert_eq!(grammar.result["analysis"].as_array().unwrap().len(), long_paragraphs);
    assert_eq!(transformer.calls(), long_paragraphs);

    let snapshot = executor.state_snapshot();
    assert!(!snapshot.is_executing);
    assert_eq!(snapshot.with_status(NodeStatus::Completed).len(), 3);
    assert_eq!(snapshot.get("grammar").unwrap().progress.as_ref().unwrap().completed, 2);

    let events = events.events();
    assert!(matches!(events.first(), Some(PipelineEvent::RunStarted { order, .. }) if order.len() == 3));
    assert!(matches!(events.last(), Some(PipelineEvent::RunCompleted { nodes_executed: 3, .. })));
    assert!(events.iter().any(|e| matches!(e, PipelineEvent::ModuleProgress { node_id, .. } if node_id == "grammar")));
}

#[tokio::test]
async fn test_three_chunk_grammar_run() {
    let mut config = EngineConfig::default();
    config.chunking.max_tokens = 25;
    config.chunking.overlap_size = 0;

    let document = "word ".repeat(50);
    let graph = PipelineGraph::new(
        vec![
            PipelineNode::document_input("doc", "long.txt", document.as_str()),
            PipelineNode::module("grammar", "grammar-checker"),
        ],
        vec![PipelineEdge::new("doc", "grammar")],
    );
    let transformer = EchoGrammar::new();
    let executor = executor(graph, transformer.clone(), &config);

    executor.execute_pipeline("doc").await.unwrap();

    assert_eq!(transformer.calls(), 3);
    let grammar = &executor.final_output()[1].result;
    let analysis = grammar["analysis"].as_array().unwrap();
    assert_eq!(analysis.len(), 3);

    let mut ids: Vec<&str> = analysis.iter().map(|f| f["id"].as_str().unwrap()).collect();
    ids.sort_unstable();
    ids.dedup();
    assert_eq!(ids, vec!["chunk0-a1", "chunk1-a1", "chunk2-a1"]);
    assert_eq!(grammar["totalChunks"], 3);
    assert_eq!(grammar["inputType"], "document");
}

#[tokio::test]
async fn test_node_failure_aborts_run() {
    let graph = PipelineGraph::new(
        vec![
            PipelineNode::document_input("doc", "a.txt", DOCUMENT),
            PipelineNode::module("translate", "translator"),
            PipelineNode::module("grammar", "grammar-checker"),
        ],
        vec![PipelineEdge::new("doc", "translate"), PipelineEdge::new("translate", "grammar")],
    );
    let events = Arc::new(VecEventSink::new());
    let executor = executor(graph, EchoGrammar::new(), &EngineConfig::default()).with_event_sink(events.clone());

    let err = executor.execute_pipeline("doc").await.unwrap_err();
    assert!(matches!(err, PipelineError::UnknownModule(ref m) if m == "translator"));

    let snapshot = executor.state_snapshot();
    assert!(!executor.is_executing());
    assert_eq!(snapshot.status("doc"), Some(NodeStatus::Completed));
    assert_eq!(snapshot.status("translate"), Some(NodeStatus::Error));
    assert_eq!(snapshot.status("grammar"), Some(NodeStatus::Queued));
    assert!(snapshot.with_status(NodeStatus::Processing).is_empty());

    let events = events.events();
    assert!(events.iter().any(|e| matches!(e, PipelineEvent::NodeFailed { node_id, .. } if node_id == "translate")));
    assert!(matches!(events.last(), Some(PipelineEvent::RunFailed { .. })));
}

#[tokio::test]
async fn test_item_failures_do_not_fail_the_node() {
    struct Broken;

    #[async_trait]
    impl Transformer for Broken {
        async fn transform(&self, _prompt_data: &str, _system_prompt: &str) -> Result<String, TransformError> {
            Err(TransformError::Connection("refused".into()))
        }
    }

    let executor = executor(grammar_graph(DOCUMENT), Arc::new(Broken), &EngineConfig::default());
    executor.execute_first_pipeline().await.unwrap();

    let grammar = &executor.final_output()[2].result;
    assert_eq!(grammar["analysis"].as_array().unwrap().len(), 0);
    assert_eq!(grammar["failedItems"], 2);
    assert_eq!(grammar["errors"][0]["itemId"], "p1");
}

#[tokio::test]
async fn test_reset_cancels_running_pipeline() {
    let executor = Arc::new(executor(grammar_graph(DOCUMENT), Arc::new(Stalled), &EngineConfig::default()));

    let running = executor.clone();
    let handle = tokio::spawn(async move { running.execute_first_pipeline().await });

    let mut waited = 0;
    while executor.state_snapshot().status("grammar") != Some(NodeStatus::Processing) {
        tokio::time::sleep(Duration::from_millis(5)).await;
        waited += 1;
        assert!(waited < 400, "grammar node never started");
    }

    assert!(executor.is_executing());
    assert!(matches!(
        executor.execute_first_pipeline().await,
        Err(PipelineError::AlreadyExecuting)
    ));

    executor.reset();
    let outcome = tokio::time::timeout(Duration::from_secs(2), handle)
        .await
        .expect("run should stop after reset")
        .unwrap();

    assert!(matches!(outcome, Err(PipelineError::Cancelled)));
    assert!(!executor.is_executing());
    assert!(executor.state_snapshot().with_status(NodeStatus::Processing).is_empty());
    assert!(executor.final_output().is_empty());
}

#[tokio::test]
async fn test_aggregator_follows_grammar_node() {
    let executor = executor(grammar_graph(DOCUMENT), EchoGrammar::new(), &EngineConfig::default());
    let aggregator = StreamingAggregator::for_node("grammar");
    let _subscription = aggregator.attach(executor.stream_hub());

    executor.execute_first_pipeline().await.unwrap();

    let partial = aggregator.partial_document().unwrap();
    assert_eq!(partial.entries.len(), 2);
    assert_eq!(aggregator.progress(), (1, 1));

    // The executor's completion notice finalizes the document
    let document = aggregator.current_document().unwrap();
    assert!(document.is_final);
    assert_eq!(document.entries[0].paragraph_id.as_deref(), Some("p1"));
    assert!(document.render_text().starts_with("The defendant were present"));
}

/// Reports two findings for every paragraph it sees
struct TwoFindingGrammar;

#[async_trait]
impl Transformer for TwoFindingGrammar {
    async fn transform(&self, prompt_data: &str, _system_prompt: &str) -> Result<String, TransformError> {
        let data: Value = serde_json::from_str(prompt_data).map_err(|e| TransformError::Service(e.to_string()))?;
        let text = data["text"].as_str().unwrap_or_default();
        let first_word = text.split_whitespace().next().unwrap_or_default();
        Ok(json!({
            "analysis": [
                {"id": "a1", "original": first_word, "corrected": first_word.to_uppercase(), "score": 70},
                {"id": "a2", "original": "were", "corrected": "was", "score": 90}
            ]
        })
        .to_string())
    }
}

#[tokio::test]
async fn test_grammar_result_has_one_entry_per_paragraph() {
    let executor = executor(grammar_graph(DOCUMENT), Arc::new(TwoFindingGrammar), &EngineConfig::default());
    let aggregator = StreamingAggregator::new();
    let _subscription = aggregator.attach(executor.stream_hub());

    executor.execute_first_pipeline().await.unwrap();

    let long_paragraphs: Vec<_> = split_paragraphs(DOCUMENT)
        .into_iter()
        .filter(|p| p.content.chars().count() > 10)
        .collect();
    let grammar = &executor.final_output()[2].result;
    let analysis = grammar["analysis"].as_array().unwrap();
    assert_eq!(analysis.len(), long_paragraphs.len());

    for (entry, paragraph) in analysis.iter().zip(&long_paragraphs) {
        assert_eq!(entry["paragraphId"], paragraph.id.as_str());
        assert_eq!(entry["original"], paragraph.content.as_str());
        assert_eq!(entry["suggestions"].as_array().unwrap().len(), 2);
        assert_eq!(entry["score"], 80.0);
    }
    assert_eq!(analysis[0]["corrected"], "THE defendant was present at the hearing.");
    assert_eq!(analysis[1]["corrected"], "COUNSEL have filed the motion late.");

    let document = aggregator.current_document().unwrap();
    assert!(document.is_final);
    assert_eq!(document.entries.len(), long_paragraphs.len());
    assert_eq!(
        document.render_text(),
        "THE defendant was present at the hearing.\n\nCOUNSEL have filed the motion late."
    );
}

/// Finds "v." style citations and approves every one
struct CitationDesk;

#[async_trait]
impl Transformer for CitationDesk {
    async fn transform(&self, prompt_data: &str, system_prompt: &str) -> Result<String, TransformError> {
        let data: Value = serde_json::from_str(prompt_data).map_err(|e| TransformError::Service(e.to_string()))?;

        if system_prompt.contains("identify legal citations") {
            let text = data["text"].as_str().unwrap_or_default();
            let citations: Vec<Value> = ["Roe v. Wade", "Brown v. Board"]
                .iter()
                .filter(|c| text.contains(*c))
                .enumerate()
                .map(|(i, c)| json!({"id": format!("c{}", i + 1), "type": "case", "originalText": c, "startPos": 0}))
                .collect();
            return Ok(format!("```json\n{}\n```", json!({ "citations": citations })));
        }

        let original = data["finding"]["originalText"].clone();
        Ok(json!({"verifications": [{"originalText": original, "valid": true, "score": 95}]}).to_string())
    }
}

#[tokio::test]
async fn test_citation_find_and_verify() {
    let document = "The holding in Roe v. Wade was revisited.\n\nUnrelated paragraph text.\n\nSee also Brown v. Board for context.";
    let graph = PipelineGraph::new(
        vec![
            PipelineNode::document_input("doc", "brief.txt", document),
            PipelineNode::module("split", "paragraph-splitter"),
            PipelineNode::module("find", "citation-finder"),
            PipelineNode::module("verify", "citation-verifier"),
        ],
        vec![
            PipelineEdge::new("doc", "split"),
            PipelineEdge::new("split", "find"),
            PipelineEdge::new("find", "verify"),
        ],
    );
    let executor = executor(graph, Arc::new(CitationDesk), &EngineConfig::default());
    executor.execute_first_pipeline().await.unwrap();

    let results = executor.final_output();
    let joined = join_paragraphs(&split_paragraphs(document));

    let citations = results[2].result["citations"].as_array().unwrap();
    assert_eq!(citations.len(), 2);
    for citation in citations {
        let start = citation["startPos"].as_u64().unwrap() as usize;
        let end = citation["endPos"].as_u64().unwrap() as usize;
        assert_eq!(&joined[start..end], citation["originalText"].as_str().unwrap());
    }

    let verify = &results[3].result;
    assert!(results[3].is_endpoint);
    let verifications = verify["verifications"].as_array().unwrap();
    assert_eq!(verifications.len(), 2);
    assert_eq!(verifications[0]["findingId"], citations[0]["id"]);
    assert_eq!(verify["summary"]["qualityLabel"], "excellent");
}

#[tokio::test]
async fn test_missing_start_node() {
    let executor = executor(grammar_graph(DOCUMENT), EchoGrammar::new(), &EngineConfig::default());
    assert!(matches!(
        executor.execute_pipeline("nope").await,
        Err(PipelineError::NodeNotFound(_))
    ));
    assert!(!executor.is_executing());

    let empty = PipelineExecutor::new(PipelineGraph::default(), EchoGrammar::new(), &EngineConfig::default());
    assert!(matches!(
        empty.execute_first_pipeline().await,
        Err(PipelineError::NoDocumentInput)
    ));
}
