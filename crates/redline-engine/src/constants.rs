//! Engine-wide constants
//!
//! Single source of truth for tunables and the separators shared between
//! components that must agree on document layout.

/// Default values for engine configuration
pub mod defaults {
    /// Token ceiling per chunk sent to the transform service
    pub const MAX_TOKENS: usize = 3000;
    /// Characters of the previous chunk prepended to the next one
    pub const OVERLAP_SIZE: usize = 200;
    /// In-flight transform calls per batch
    pub const MAX_CONCURRENT: usize = 2;
    /// Pause between consecutive batches
    pub const DELAY_BETWEEN_BATCHES_MS: u64 = 1000;
    /// Retries per item after the first attempt
    pub const RETRY_ATTEMPTS: u32 = 2;
    /// Wait before each retry
    pub const RETRY_DELAY_MS: u64 = 1000;
    /// Paragraphs of this many characters or fewer are not sent for analysis
    pub const MIN_PARAGRAPH_CHARS: usize = 10;
}

/// Text layout shared across components
pub mod layout {
    /// Approximate characters per token used by the chunker
    pub const CHARS_PER_TOKEN: usize = 4;
    /// Separator used to flatten a paragraph list back into one document.
    /// Citation offsets are computed against this width.
    pub const PARAGRAPH_SEPARATOR: &str = "\n\n";
    /// Separator used when reassembling text outputs of several chunks
    pub const CHUNK_TEXT_SEPARATOR: &str = "\n\n---\n\n";
}

/// Transform service defaults
pub mod transform {
    pub const OLLAMA_URL: &str = "http://localhost:11434";
    pub const OPENAI_URL: &str = "http://localhost:8080";
    pub const MODEL: &str = "llama3.1";
    pub const TIMEOUT_SECS: u64 = 120;
}
