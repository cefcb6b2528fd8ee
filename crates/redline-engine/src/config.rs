//! Engine configuration
//!
//! Loaded from a JSON file; every field has a default so partial files work.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::fs;

use crate::batch::BatchConfig;
use crate::chunker::ChunkConfig;
use crate::constants::{defaults, transform};
use crate::error::{PipelineError, Result};
use crate::retry::{Backoff, RetryPolicy};

/// Batch processing settings as they appear in the config file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchSettings {
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
    #[serde(default = "default_delay_between_batches")]
    pub delay_between_batches_ms: u64,
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,
    #[serde(default = "default_retry_delay")]
    pub retry_delay_ms: u64,
    /// Double the retry delay on each attempt instead of keeping it fixed
    #[serde(default)]
    pub exponential_backoff: bool,
}

fn default_max_concurrent() -> usize {
    defaults::MAX_CONCURRENT
}

fn default_delay_between_batches() -> u64 {
    defaults::DELAY_BETWEEN_BATCHES_MS
}

fn default_retry_attempts() -> u32 {
    defaults::RETRY_ATTEMPTS
}

fn default_retry_delay() -> u64 {
    defaults::RETRY_DELAY_MS
}

impl Default for BatchSettings {
    fn default() -> Self {
        Self {
            max_concurrent: default_max_concurrent(),
            delay_between_batches_ms: default_delay_between_batches(),
            retry_attempts: default_retry_attempts(),
            retry_delay_ms: default_retry_delay(),
            exponential_backoff: false,
        }
    }
}

impl BatchSettings {
    /// Convert to the runtime batch configuration
    pub fn to_batch_config(&self) -> BatchConfig {
        let delay = Duration::from_millis(self.retry_delay_ms);
        let backoff = if self.exponential_backoff {
            Backoff::Exponential {
                base: delay,
                max: delay.saturating_mul(16),
            }
        } else {
            Backoff::Fixed(delay)
        };

        BatchConfig {
            max_concurrent: self.max_concurrent.max(1),
            delay_between_batches: Duration::from_millis(self.delay_between_batches_ms),
            retry: RetryPolicy::with_retries(self.retry_attempts, backoff),
        }
    }
}

/// Paragraph handling settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParagraphSettings {
    /// Paragraphs must be longer than this to be analyzed
    #[serde(default = "default_min_chars")]
    pub min_chars: usize,
}

fn default_min_chars() -> usize {
    defaults::MIN_PARAGRAPH_CHARS
}

impl Default for ParagraphSettings {
    fn default() -> Self {
        Self {
            min_chars: default_min_chars(),
        }
    }
}

/// Which transform service protocol to speak
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransformBackend {
    /// Ollama `/api/generate`
    #[default]
    Ollama,
    /// OpenAI-compatible `/v1/chat/completions` (llama.cpp server, LM Studio, hosted APIs)
    OpenAi,
}

/// Connection settings for the transform service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransformConfig {
    #[serde(default)]
    pub backend: TransformBackend,
    /// Base URL; falls back to the backend's usual local address
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    /// Bearer token for hosted OpenAI-compatible services
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

fn default_model() -> String {
    transform::MODEL.to_string()
}

fn default_timeout() -> u64 {
    transform::TIMEOUT_SECS
}

impl Default for TransformConfig {
    fn default() -> Self {
        Self {
            backend: TransformBackend::default(),
            base_url: None,
            model: default_model(),
            temperature: None,
            max_tokens: None,
            api_key: None,
            timeout_secs: default_timeout(),
        }
    }
}

impl TransformConfig {
    /// Base URL with the backend default applied and trailing slashes removed
    pub fn resolved_base_url(&self) -> String {
        let url = self.base_url.clone().unwrap_or_else(|| match self.backend {
            TransformBackend::Ollama => transform::OLLAMA_URL.to_string(),
            TransformBackend::OpenAi => transform::OPENAI_URL.to_string(),
        });
        url.trim_end_matches('/').to_string()
    }
}

/// Full engine configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineConfig {
    #[serde(default)]
    pub chunking: ChunkConfig,
    #[serde(default)]
    pub batch: BatchSettings,
    #[serde(default)]
    pub paragraphs: ParagraphSettings,
    #[serde(default)]
    pub transform: TransformConfig,
}

impl EngineConfig {
    /// Parse a config from JSON text
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a config file
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = fs::read_to_string(path).await.map_err(|e| {
            PipelineError::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        let config = Self::from_json_str(&json)?;
        log::debug!("Loaded engine config from {}", path.display());
        Ok(config)
    }

    /// Write the config as pretty JSON
    pub async fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json).await?;
        Ok(())
    }

    /// Reject values the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.chunking.max_tokens == 0 {
            return Err(PipelineError::Config("chunking.maxTokens must be > 0".into()));
        }
        if self.batch.max_concurrent == 0 {
            return Err(PipelineError::Config("batch.maxConcurrent must be > 0".into()));
        }
        if self.transform.model.trim().is_empty() {
            return Err(PipelineError::Config("transform.model must not be empty".into()));
        }
        Ok(())
    }
}
