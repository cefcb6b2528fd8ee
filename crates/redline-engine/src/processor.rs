//! Runs one processing module against its input
//!
//! The processor turns the input envelope into work items according to the
//! module's [`InputMode`], runs them through the batch processor with one
//! transform call each, and merges the per-item results into the module
//! output.

use std::sync::Arc;
use std::time::Instant;

use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use crate::batch::{BatchConfig, BatchItem, BatchProcessor, BatchProgress};
use crate::chunker::{chunk_document, ChunkConfig, DocumentChunk};
use crate::citations::{CandidateFinding, CitationPositionMapper};
use crate::config::EngineConfig;
use crate::envelope::{join_paragraphs, split_paragraphs, InputEnvelope, Paragraph, Payload};
use crate::error::{PipelineError, Result};
use crate::modules::{module_types, InputMode, ModuleCatalog, ModuleSpec, OutputShape};
use crate::parse::parse_response;
use crate::reassemble::{assemble_paragraph_results, assemble_tagged_results, paragraph_entry, reassemble};
use crate::retry::{Sleeper, TokioSleeper};
use crate::streaming::StreamHub;
use crate::transform::{TransformError, Transformer};
use crate::types::{ModuleProgress, PipelineNode};

/// Listener for module progress
pub type ModuleProgressCallback = Arc<dyn Fn(ModuleProgress) + Send + Sync>;

/// Post-processing applied to each item's parsed result before it is merged
type FinishFn<T> = fn(&T, Value, &ModuleSpec) -> Value;

/// Work items derived from an input envelope
enum WorkList {
    Chunks(Vec<DocumentChunk>),
    Paragraphs {
        /// Every paragraph of the document, for position mapping
        all: Vec<Paragraph>,
        /// Paragraphs long enough to analyze
        selected: Vec<Paragraph>,
    },
    Findings(Vec<Value>),
}

/// Executes processing modules
pub struct ModuleProcessor {
    catalog: ModuleCatalog,
    transformer: Arc<dyn Transformer>,
    chunking: ChunkConfig,
    batch: BatchConfig,
    min_paragraph_chars: usize,
    sleeper: Arc<dyn Sleeper>,
    stream: Option<Arc<StreamHub>>,
}

impl ModuleProcessor {
    pub fn new(transformer: Arc<dyn Transformer>, config: &EngineConfig) -> Self {
        Self {
            catalog: ModuleCatalog::builtins(),
            transformer,
            chunking: config.chunking.clone(),
            batch: config.batch.to_batch_config(),
            min_paragraph_chars: config.paragraphs.min_chars,
            sleeper: Arc::new(TokioSleeper),
            stream: None,
        }
    }

    pub fn with_catalog(mut self, catalog: ModuleCatalog) -> Self {
        self.catalog = catalog;
        self
    }

    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    /// Publish batch results of every module to `hub`
    pub fn with_stream(mut self, hub: Arc<StreamHub>) -> Self {
        self.stream = Some(hub);
        self
    }

    pub fn catalog(&self) -> &ModuleCatalog {
        &self.catalog
    }

    /// Module definition a node runs
    pub fn spec_for(&self, node: &PipelineNode) -> Result<&ModuleSpec> {
        let module_type = node.module_type();
        self.catalog
            .get(module_type)
            .ok_or_else(|| PipelineError::UnknownModule(module_type.to_string()))
    }

    /// Run `node`'s module against `input`
    ///
    /// The result is an object carrying the merged module output plus
    /// `moduleType`, `inputType` and `processingTime`.
    pub async fn process(
        &self,
        node: &PipelineNode,
        input: &InputEnvelope,
        cancel: &CancellationToken,
        on_progress: Option<ModuleProgressCallback>,
    ) -> Result<Value> {
        let started = Instant::now();
        let spec = self.spec_for(node)?;
        input.validate(&node.id)?;

        log::debug!(
            "Processing node '{}' ({}) with {} input",
            node.id,
            spec.module_type,
            input.input_type()
        );

        let mut output = if spec.is_local() {
            self.run_local(spec, &node.id, input)?
        } else {
            let system_prompt = node
                .data
                .prompt_override
                .as_deref()
                .filter(|p| !p.trim().is_empty())
                .unwrap_or(&spec.system_prompt);

            let run = ItemRun {
                processor: self,
                spec,
                node_id: &node.id,
                input_type: input.input_type(),
                system_prompt,
                cancel,
                on_progress,
            };

            match self.build_work_list(spec, &node.id, input)? {
                WorkList::Chunks(chunks) => {
                    let results = run.execute(&chunks, chunk_prompt, keep_result).await?;
                    reassemble(&results, &spec.shape)
                }
                WorkList::Paragraphs { all, selected } => {
                    let finish: FinishFn<Paragraph> = if spec.paragraph_entries {
                        paragraph_result
                    } else {
                        keep_result
                    };
                    let results = run.execute(&selected, paragraph_prompt, finish).await?;
                    match &spec.shape {
                        OutputShape::Findings { key } => {
                            let mut output = assemble_paragraph_results(&selected, &results, key);
                            if spec.map_positions {
                                map_positions(&mut output, key, &all);
                            }
                            output
                        }
                        shape => reassemble(&results, shape),
                    }
                }
                WorkList::Findings(findings) => {
                    let results = run.execute(&findings, finding_prompt, keep_result).await?;
                    match &spec.shape {
                        OutputShape::Findings { key } => {
                            let tags: Vec<String> = findings
                                .iter()
                                .enumerate()
                                .map(|(i, f)| f.item_id().unwrap_or_else(|| format!("f{}", i + 1)))
                                .collect();
                            assemble_tagged_results(&tags, "findingId", &results, key)
                        }
                        shape => reassemble(&results, shape),
                    }
                }
            }
        };

        if let Some(obj) = output.as_object_mut() {
            obj.insert("moduleType".into(), json!(spec.module_type));
            obj.insert("inputType".into(), json!(input.input_type()));
            obj.insert("processingTime".into(), json!(started.elapsed().as_millis() as u64));
        }

        Ok(output)
    }

    fn run_local(&self, spec: &ModuleSpec, node_id: &str, input: &InputEnvelope) -> Result<Value> {
        match spec.module_type.as_str() {
            module_types::PARAGRAPH_SPLITTER => {
                let paragraphs = match &input.payload {
                    Payload::Document { text, .. } | Payload::Text { text } => split_paragraphs(text),
                    Payload::Paragraphs { paragraphs } => paragraphs.clone(),
                    Payload::Findings { .. } => {
                        return Err(PipelineError::invalid_input(node_id, "cannot split findings into paragraphs"))
                    }
                };
                log::debug!("Split document into {} paragraphs", paragraphs.len());
                Ok(json!({
                    "totalParagraphs": paragraphs.len(),
                    "paragraphs": paragraphs,
                }))
            }
            other => Err(PipelineError::UnknownModule(other.to_string())),
        }
    }

    fn build_work_list(&self, spec: &ModuleSpec, node_id: &str, input: &InputEnvelope) -> Result<WorkList> {
        let work = match (spec.mode, &input.payload) {
            (InputMode::Adaptive | InputMode::Chunked, Payload::Document { text, .. } | Payload::Text { text }) => {
                WorkList::Chunks(chunk_document(text, &self.chunking))
            }
            (InputMode::Chunked, Payload::Paragraphs { paragraphs }) => {
                WorkList::Chunks(chunk_document(&join_paragraphs(paragraphs), &self.chunking))
            }
            (InputMode::Adaptive | InputMode::Paragraphs, Payload::Paragraphs { paragraphs }) => {
                self.paragraph_work(paragraphs.clone())
            }
            (InputMode::Paragraphs, Payload::Document { text, .. } | Payload::Text { text }) => {
                self.paragraph_work(split_paragraphs(text))
            }
            (InputMode::PerFinding, Payload::Findings { findings, .. }) => WorkList::Findings(findings.clone()),
            (InputMode::PerFinding, _) => {
                return Err(PipelineError::invalid_input(
                    node_id,
                    format!("{} expects findings, got {}", spec.module_type, input.input_type()),
                ))
            }
            (_, Payload::Findings { .. }) => {
                return Err(PipelineError::invalid_input(
                    node_id,
                    format!("{} cannot consume findings", spec.module_type),
                ))
            }
            (InputMode::Local, _) => {
                return Err(PipelineError::failed(format!(
                    "{} runs locally and has no work items",
                    spec.module_type
                )))
            }
        };
        Ok(work)
    }

    fn paragraph_work(&self, all: Vec<Paragraph>) -> WorkList {
        let selected: Vec<Paragraph> = all
            .iter()
            .filter(|p| p.char_len() > self.min_paragraph_chars)
            .cloned()
            .collect();

        if selected.len() < all.len() {
            log::debug!(
                "Skipping {} paragraph(s) of {} chars or fewer",
                all.len() - selected.len(),
                self.min_paragraph_chars
            );
        }

        WorkList::Paragraphs { all, selected }
    }

    async fn call(
        &self,
        prompt_data: &str,
        system_prompt: &str,
        shape: &OutputShape,
        cancel: &CancellationToken,
    ) -> Result<Value> {
        let started = Instant::now();

        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(PipelineError::Cancelled),
            response = self.transformer.transform(prompt_data, system_prompt) => response,
        };

        let raw = response.map_err(|e| match e {
            TransformError::Cancelled => PipelineError::Cancelled,
            other => PipelineError::failed(other.to_string()),
        })?;

        let parsed = parse_response(&raw, shape);
        let mut value = parsed.value;
        if let Some(obj) = value.as_object_mut() {
            obj.insert("processingTime".into(), json!(started.elapsed().as_millis() as u64));
        }
        Ok(value)
    }
}

/// Everything one module invocation shares across its work items
struct ItemRun<'a> {
    processor: &'a ModuleProcessor,
    spec: &'a ModuleSpec,
    node_id: &'a str,
    input_type: &'static str,
    system_prompt: &'a str,
    cancel: &'a CancellationToken,
    on_progress: Option<ModuleProgressCallback>,
}

impl ItemRun<'_> {
    async fn execute<T>(&self, items: &[T], prompt_of: fn(&T) -> String, finish: FinishFn<T>) -> Result<Vec<Value>>
    where
        T: BatchItem + Clone,
    {
        let mut batch = BatchProcessor::new(self.processor.batch.clone())
            .with_sleeper(self.processor.sleeper.clone())
            .with_cancellation(self.cancel.clone());

        if let Some(hub) = &self.processor.stream {
            batch = batch.with_stream(
                hub.clone(),
                self.node_id,
                self.spec.module_type.clone(),
                self.spec.shape.findings_key().map(str::to_string),
            );
        }

        if let Some(callback) = &self.on_progress {
            let callback = callback.clone();
            let module_type = self.spec.module_type.clone();
            let input_type = self.input_type.to_string();
            let output_type = self.spec.shape.type_name().to_string();
            batch = batch.on_progress(Arc::new(move |p: BatchProgress| {
                callback(ModuleProgress {
                    completed: p.completed,
                    total: p.total,
                    module_type: module_type.clone(),
                    input_type: input_type.clone(),
                    output_generated: Some(p.output_generated),
                    output_type: Some(output_type.clone()),
                })
            }));
        }

        log::info!(
            "{} '{}': {} item(s) in batches of {}",
            self.spec.module_type,
            self.node_id,
            items.len(),
            self.processor.batch.max_concurrent
        );

        batch
            .process(items, |item: T| {
                let prompt = prompt_of(&item);
                async move {
                    let result = self
                        .processor
                        .call(&prompt, self.system_prompt, &self.spec.shape, self.cancel)
                        .await?;
                    Ok(finish(&item, result, self.spec))
                }
            })
            .await
    }
}

fn chunk_prompt(chunk: &DocumentChunk) -> String {
    json!({
        "chunkId": chunk.id,
        "chunkIndex": chunk.chunk_index,
        "totalChunks": chunk.total_chunks,
        "text": chunk.content,
    })
    .to_string()
}

fn paragraph_prompt(paragraph: &Paragraph) -> String {
    json!({
        "paragraphId": paragraph.id,
        "text": paragraph.content,
    })
    .to_string()
}

fn finding_prompt(finding: &Value) -> String {
    json!({ "finding": finding }).to_string()
}

fn keep_result<T>(_item: &T, result: Value, _spec: &ModuleSpec) -> Value {
    result
}

fn paragraph_result(paragraph: &Paragraph, result: Value, spec: &ModuleSpec) -> Value {
    match spec.shape.findings_key() {
        Some(key) => paragraph_entry(paragraph, &result, key),
        None => result,
    }
}

/// Replace paragraph-relative findings under `key` with mapped citations
fn map_positions(output: &mut Value, key: &str, paragraphs: &[Paragraph]) {
    let Some(findings) = output.get(key).and_then(Value::as_array) else {
        return;
    };

    let mut candidates = Vec::with_capacity(findings.len());
    for finding in findings {
        match CandidateFinding::from_value(finding) {
            Some(candidate) => candidates.push(candidate),
            None => log::warn!("Citation finding is not an object, dropping: {}", finding),
        }
    }
    let citations = CitationPositionMapper::new(paragraphs).map(&candidates);
    let dropped = findings.len() - citations.len();

    if let Some(obj) = output.as_object_mut() {
        obj.insert(key.to_string(), json!(citations));
        obj.insert("unmappedFindings".into(), json!(dropped));
        if let Some(summary) = obj.get_mut("summary").and_then(Value::as_object_mut) {
            summary.insert("total".into(), json!(citations.len()));
        }
    }
}
