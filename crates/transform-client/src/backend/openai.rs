//! OpenAI-compatible backend
//!
//! Works with llama.cpp's server, LM Studio and hosted APIs that accept
//! `/v1/chat/completions`.

use async_trait::async_trait;
use redline_engine::{TransformConfig, TransformError, Transformer};
use serde::Deserialize;
use serde_json::{json, Value};

use super::{api_error, http_client, ClientError};

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: Message,
}

#[derive(Debug, Deserialize)]
struct Message {
    #[serde(default)]
    content: Option<String>,
}

impl ChatResponse {
    fn into_content(self) -> Result<String, ClientError> {
        self.choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| ClientError::InvalidResponse("no choices in completion".into()))
    }
}

/// Transformer backed by an OpenAI-compatible chat endpoint
pub struct OpenAiTransformer {
    http_client: reqwest::Client,
    base_url: String,
    model: String,
    temperature: Option<f32>,
    max_tokens: Option<u32>,
    api_key: Option<String>,
}

impl OpenAiTransformer {
    pub fn from_config(config: &TransformConfig) -> Result<Self, ClientError> {
        Ok(Self {
            http_client: http_client(config)?,
            base_url: config.resolved_base_url(),
            model: config.model.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            api_key: config.api_key.clone().filter(|k| !k.is_empty()),
        })
    }

    fn request_body(&self, prompt_data: &str, system_prompt: &str) -> Value {
        let mut messages = Vec::with_capacity(2);
        if !system_prompt.is_empty() {
            messages.push(json!({"role": "system", "content": system_prompt}));
        }
        messages.push(json!({"role": "user", "content": prompt_data}));

        let mut body = json!({
            "model": self.model,
            "messages": messages,
            "stream": false,
        });
        if let Some(temp) = self.temperature {
            body["temperature"] = json!(temp);
        }
        if let Some(max) = self.max_tokens {
            body["max_tokens"] = json!(max);
        }
        body
    }

    async fn complete(&self, prompt_data: &str, system_prompt: &str) -> Result<String, ClientError> {
        let url = format!("{}/v1/chat/completions", self.base_url);
        log::debug!("Chat completion request to {} with model '{}'", url, self.model);

        let mut request = self
            .http_client
            .post(&url)
            .json(&self.request_body(prompt_data, system_prompt));
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await?;
        if !response.status().is_success() {
            return Err(api_error(response).await);
        }

        let data: ChatResponse = response.json().await?;
        data.into_content()
    }
}

#[async_trait]
impl Transformer for OpenAiTransformer {
    async fn transform(&self, prompt_data: &str, system_prompt: &str) -> Result<String, TransformError> {
        self.complete(prompt_data, system_prompt).await.map_err(TransformError::from)
    }

    fn name(&self) -> &str {
        "openai"
    }
}
