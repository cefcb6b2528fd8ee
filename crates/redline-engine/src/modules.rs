//! Built-in processing modules
//!
//! A [`ModuleSpec`] says how a module consumes its input ([`InputMode`]),
//! what its merged output looks like ([`OutputShape`]) and which system
//! prompt it sends to the transform service.

use std::collections::HashMap;

/// How a module turns its input envelope into work items
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputMode {
    /// Runs in-process with no transform call
    Local,
    /// Paragraph input runs per paragraph; document or text input is chunked
    Adaptive,
    /// Always per paragraph; document or text input is split first
    Paragraphs,
    /// Always chunked; paragraph input is joined back into one document first
    Chunked,
    /// One item per finding of the upstream module
    PerFinding,
}

/// Shape of a module's merged output
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputShape {
    /// Object carrying an array of findings under `key`
    Findings { key: String },
    /// Free text under `text`
    Text,
    /// Flat list
    List,
    /// Arbitrary object
    Object,
}

impl OutputShape {
    pub fn findings(key: impl Into<String>) -> Self {
        Self::Findings { key: key.into() }
    }

    /// Findings key, when the shape has one
    pub fn findings_key(&self) -> Option<&str> {
        match self {
            Self::Findings { key } => Some(key),
            _ => None,
        }
    }

    /// Name reported as `outputType` in progress
    pub fn type_name(&self) -> &str {
        match self {
            Self::Findings { key } => key,
            Self::Text => "text",
            Self::List => "list",
            Self::Object => "object",
        }
    }
}

/// Static description of a module
#[derive(Debug, Clone, PartialEq)]
pub struct ModuleSpec {
    pub module_type: String,
    pub mode: InputMode,
    pub shape: OutputShape,
    pub system_prompt: String,
    /// Re-derive absolute positions of paragraph-relative findings
    pub map_positions: bool,
    /// Fold each paragraph's findings into one entry for that paragraph
    pub paragraph_entries: bool,
}

impl ModuleSpec {
    pub fn new(module_type: impl Into<String>, mode: InputMode, shape: OutputShape) -> Self {
        Self {
            module_type: module_type.into(),
            mode,
            shape,
            system_prompt: String::new(),
            map_positions: false,
            paragraph_entries: false,
        }
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    pub fn with_position_mapping(mut self) -> Self {
        self.map_positions = true;
        self
    }

    pub fn with_paragraph_entries(mut self) -> Self {
        self.paragraph_entries = true;
        self
    }

    pub fn is_local(&self) -> bool {
        self.mode == InputMode::Local
    }
}

pub mod module_types {
    pub const PARAGRAPH_SPLITTER: &str = "paragraph-splitter";
    pub const GRAMMAR_CHECKER: &str = "grammar-checker";
    pub const STYLE_CHECKER: &str = "style-checker";
    pub const CITATION_FINDER: &str = "citation-finder";
    pub const CITATION_VERIFIER: &str = "citation-verifier";
    pub const SUMMARIZER: &str = "summarizer";
}

const GRAMMAR_PROMPT: &str = "You are a meticulous copy editor. Review the text for grammar, \
spelling and punctuation errors. Respond with JSON only: {\"analysis\": [{\"id\": string, \
\"original\": string, \"corrected\": string, \"score\": number 0-100, \"suggestions\": [string]}]}.";

const STYLE_PROMPT: &str = "You are a legal writing style reviewer. Flag wordiness, passive voice, \
legalese and unclear phrasing. Respond with JSON only: {\"issues\": [{\"id\": string, \
\"original\": string, \"revised\": string, \"score\": number 0-100, \"suggestions\": [string]}]}.";

const CITATION_FINDER_PROMPT: &str = "You identify legal citations. Copy each citation exactly as it \
appears in the text. Respond with JSON only: {\"citations\": [{\"id\": string, \"type\": string, \
\"originalText\": string, \"startPos\": number, \"isComplete\": boolean, \"needsVerification\": boolean}]}.";

const CITATION_VERIFIER_PROMPT: &str = "You check legal citations for correct form and completeness. \
Respond with JSON only: {\"verifications\": [{\"id\": string, \"originalText\": string, \
\"valid\": boolean, \"corrected\": string, \"score\": number 0-100, \"suggestions\": [string]}]}.";

const SUMMARIZER_PROMPT: &str = "Summarize the text in a few plain sentences. Respond with the summary text only.";

/// Registry of module specs keyed by module type
#[derive(Debug, Clone, Default)]
pub struct ModuleCatalog {
    specs: HashMap<String, ModuleSpec>,
}

impl ModuleCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Catalog with every built-in module
    pub fn builtins() -> Self {
        use module_types::*;

        let mut catalog = Self::new();
        catalog.register(ModuleSpec::new(PARAGRAPH_SPLITTER, InputMode::Local, OutputShape::Object));
        catalog.register(
            ModuleSpec::new(GRAMMAR_CHECKER, InputMode::Adaptive, OutputShape::findings("analysis"))
                .with_system_prompt(GRAMMAR_PROMPT)
                .with_paragraph_entries(),
        );
        catalog.register(
            ModuleSpec::new(STYLE_CHECKER, InputMode::Adaptive, OutputShape::findings("issues"))
                .with_system_prompt(STYLE_PROMPT)
                .with_paragraph_entries(),
        );
        catalog.register(
            ModuleSpec::new(CITATION_FINDER, InputMode::Paragraphs, OutputShape::findings("citations"))
                .with_system_prompt(CITATION_FINDER_PROMPT)
                .with_position_mapping(),
        );
        catalog.register(
            ModuleSpec::new(CITATION_VERIFIER, InputMode::PerFinding, OutputShape::findings("verifications"))
                .with_system_prompt(CITATION_VERIFIER_PROMPT),
        );
        catalog.register(
            ModuleSpec::new(SUMMARIZER, InputMode::Chunked, OutputShape::Text).with_system_prompt(SUMMARIZER_PROMPT),
        );
        catalog
    }

    /// Add or replace a module
    pub fn register(&mut self, spec: ModuleSpec) {
        self.specs.insert(spec.module_type.clone(), spec);
    }

    pub fn get(&self, module_type: &str) -> Option<&ModuleSpec> {
        self.specs.get(module_type)
    }

    pub fn contains(&self, module_type: &str) -> bool {
        self.specs.contains_key(module_type)
    }

    /// Registered module types, sorted
    pub fn module_types(&self) -> Vec<&str> {
        let mut types: Vec<&str> = self.specs.keys().map(String::as_str).collect();
        types.sort_unstable();
        types
    }
}
