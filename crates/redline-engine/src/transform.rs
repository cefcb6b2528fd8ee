//! Call contract of the external text-transformation service
//!
//! The engine only ever sees this trait. Concrete HTTP clients live in the
//! `transform-client` crate; tests plug in scripted fakes.

use async_trait::async_trait;
use thiserror::Error;

/// Failure reported by a transform call
///
/// Every variant is treated as an item-level failure and retried by the
/// batch processor.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransformError {
    /// The service answered with an error payload
    #[error("Transform service error: {0}")]
    Service(String),

    /// The service could not be reached
    #[error("Transform connection failed: {0}")]
    Connection(String),

    /// The call was abandoned because the run was cancelled
    #[error("Transform cancelled")]
    Cancelled,
}

/// The external text-transformation service
#[async_trait]
pub trait Transformer: Send + Sync {
    /// Transform `prompt_data` under `system_prompt`, returning the raw
    /// response text
    async fn transform(&self, prompt_data: &str, system_prompt: &str) -> Result<String, TransformError>;

    /// Human-readable name for logs
    fn name(&self) -> &str {
        "transformer"
    }
}
