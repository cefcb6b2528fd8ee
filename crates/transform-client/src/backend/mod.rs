//! Transform service backends
//!
//! Each backend speaks one HTTP protocol and implements the engine's
//! [`Transformer`] trait. [`build_transformer`] picks one from config.

mod ollama;
mod openai;

use std::sync::Arc;
use std::time::Duration;

use redline_engine::{TransformBackend, TransformConfig, TransformError, Transformer};
use thiserror::Error;

pub use ollama::OllamaTransformer;
pub use openai::OpenAiTransformer;

/// Errors from a backend request
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("API error {status}: {body}")]
    Api { status: u16, body: String },

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

impl From<ClientError> for TransformError {
    fn from(err: ClientError) -> Self {
        match err {
            ClientError::Http(e) if e.is_connect() || e.is_timeout() => TransformError::Connection(e.to_string()),
            other => TransformError::Service(other.to_string()),
        }
    }
}

/// Shared HTTP client with the configured request timeout
pub(crate) fn http_client(config: &TransformConfig) -> Result<reqwest::Client, ClientError> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(config.timeout_secs.max(1)))
        .build()
        .map_err(ClientError::Http)
}

/// Read the body of a non-2xx response into an error
pub(crate) async fn api_error(response: reqwest::Response) -> ClientError {
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    ClientError::Api { status, body }
}

/// Build the transformer selected by `config.backend`
pub fn build_transformer(config: &TransformConfig) -> Result<Arc<dyn Transformer>, ClientError> {
    if config.model.trim().is_empty() {
        return Err(ClientError::Config("model must not be empty".into()));
    }

    let transformer: Arc<dyn Transformer> = match config.backend {
        TransformBackend::Ollama => Arc::new(OllamaTransformer::from_config(config)?),
        TransformBackend::OpenAi => Arc::new(OpenAiTransformer::from_config(config)?),
    };

    log::info!(
        "Using {} at {} with model '{}'",
        transformer.name(),
        config.resolved_base_url(),
        config.model
    );
    Ok(transformer)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_selects_backend() {
        let ollama = build_transformer(&TransformConfig::default()).unwrap();
        assert_eq!(ollama.name(), "ollama");

        let config = TransformConfig {
            backend: TransformBackend::OpenAi,
            ..TransformConfig::default()
        };
        assert_eq!(build_transformer(&config).unwrap().name(), "openai");
    }

    #[test]
    fn test_empty_model_rejected() {
        let config = TransformConfig {
            model: " ".into(),
            ..TransformConfig::default()
        };
        assert!(matches!(build_transformer(&config), Err(ClientError::Config(_))));
    }

    #[test]
    fn test_api_error_maps_to_service() {
        let err: TransformError = ClientError::Api {
            status: 500,
            body: "model not loaded".into(),
        }
        .into();
        assert_eq!(
            err,
            TransformError::Service("API error 500: model not loaded".into())
        );
    }
}
