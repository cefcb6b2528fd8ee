//! Ollama backend
//!
//! Sends one non-streaming `/api/generate` request per transform call.

use async_trait::async_trait;
use redline_engine::{TransformConfig, TransformError, Transformer};
use serde::Deserialize;
use serde_json::{json, Map, Value};

use super::{api_error, http_client, ClientError};

/// Response body of `/api/generate` with `stream: false`
#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    response: String,
    #[serde(default)]
    model: String,
    #[serde(default)]
    error: Option<String>,
}

/// Transformer backed by an Ollama server
pub struct OllamaTransformer {
    http_client: reqwest::Client,
    base_url: String,
    model: String,
    temperature: Option<f32>,
    max_tokens: Option<u32>,
}

impl OllamaTransformer {
    pub fn from_config(config: &TransformConfig) -> Result<Self, ClientError> {
        Ok(Self {
            http_client: http_client(config)?,
            base_url: config.resolved_base_url(),
            model: config.model.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
        })
    }

    fn request_body(&self, prompt_data: &str, system_prompt: &str) -> Value {
        let mut body = json!({
            "model": self.model,
            "prompt": prompt_data,
            "stream": false,
        });

        if !system_prompt.is_empty() {
            body["system"] = json!(system_prompt);
        }

        let mut options = Map::new();
        if let Some(temp) = self.temperature {
            options.insert("temperature".to_string(), json!(temp));
        }
        if let Some(max) = self.max_tokens {
            options.insert("num_predict".to_string(), json!(max));
        }
        if !options.is_empty() {
            body["options"] = Value::Object(options);
        }

        body
    }

    async fn generate(&self, prompt_data: &str, system_prompt: &str) -> Result<String, ClientError> {
        let url = format!("{}/api/generate", self.base_url);
        log::debug!("Ollama request to {} with model '{}'", url, self.model);

        let response = self
            .http_client
            .post(&url)
            .json(&self.request_body(prompt_data, system_prompt))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(api_error(response).await);
        }

        let data: GenerateResponse = response.json().await?;
        if let Some(error) = data.error {
            return Err(ClientError::InvalidResponse(error));
        }

        log::debug!("Ollama returned {} chars from '{}'", data.response.len(), data.model);
        Ok(data.response)
    }
}

#[async_trait]
impl Transformer for OllamaTransformer {
    async fn transform(&self, prompt_data: &str, system_prompt: &str) -> Result<String, TransformError> {
        self.generate(prompt_data, system_prompt).await.map_err(TransformError::from)
    }

    fn name(&self) -> &str {
        "ollama"
    }
}
