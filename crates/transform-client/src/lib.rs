//! HTTP clients for the Redline transform service
//!
//! This library implements the engine's `Transformer` trait over HTTP:
//! - **Ollama**: `/api/generate` on a local Ollama daemon (default)
//! - **OpenAI-compatible**: `/v1/chat/completions` (llama.cpp server, LM Studio, hosted APIs)
//!
//! # Example
//!
//! ```rust,ignore
//! use redline_engine::EngineConfig;
//! use transform_client::build_transformer;
//!
//! let config = EngineConfig::load("redline.json").await?;
//! let transformer = build_transformer(&config.transform)?;
//! let raw = transformer.transform(prompt_data, system_prompt).await?;
//! ```

pub mod backend;

// Re-exports for convenience
pub use backend::{build_transformer, ClientError, OllamaTransformer, OpenAiTransformer};
