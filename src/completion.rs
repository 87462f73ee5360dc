//! Language-model completion interface.
//!
//! The chat pipeline only needs "prompt in, text out", so [`CompletionModel`]
//! is that narrow. Providers make a single attempt per call; a non-2xx
//! status, a timeout, a malformed body or an empty answer are all errors.
//!
//! | Config Value | Provider | Endpoint |
//! |-------------|----------|----------|
//! | `"disabled"` | [`DisabledModel`] | none |
//! | `"openai"` | [`OpenAIChatModel`] | `POST {url}/chat/completions` |
//! | `"ollama"` | [`OllamaChatModel`] | `POST {url}/api/chat` |

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use std::sync::Arc;

use crate::config::ModelConfig;
use crate::embedding::{http_client, post_json};

const OPENAI_DEFAULT_URL: &str = "https://api.openai.com/v1";
const OLLAMA_DEFAULT_URL: &str = "http://localhost:11434";

#[async_trait]
pub trait CompletionModel: Send + Sync {
    fn model_name(&self) -> &str;
    /// Send a rendered prompt and return the generated text.
    async fn complete(&self, prompt: &str) -> Result<String>;
}

pub fn create_model(config: &ModelConfig) -> Result<Arc<dyn CompletionModel>> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledModel)),
        "openai" => Ok(Arc::new(OpenAIChatModel::new(config)?)),
        "ollama" => Ok(Arc::new(OllamaChatModel::new(config)?)),
        other => bail!("Unknown model provider: {}", other),
    }
}

pub struct DisabledModel;

#[async_trait]
impl CompletionModel for DisabledModel {
    fn model_name(&self) -> &str {
        "disabled"
    }
    async fn complete(&self, _prompt: &str) -> Result<String> {
        bail!("Model provider is disabled. Set [model] provider in config.")
    }
}

/// Chat completions against the OpenAI API (or a compatible gateway).
pub struct OpenAIChatModel {
    model: String,
    url: String,
    api_key: String,
    temperature: Option<f32>,
    client: reqwest::Client,
}

impl OpenAIChatModel {
    pub fn new(config: &ModelConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("model.model required for OpenAI provider"))?;
        let api_key = std::env::var(&config.api_key_env)
            .with_context(|| format!("{} environment variable not set", config.api_key_env))?;
        let url = config
            .url
            .clone()
            .unwrap_or_else(|| OPENAI_DEFAULT_URL.to_string());

        Ok(Self {
            model,
            url: url.trim_end_matches('/').to_string(),
            api_key,
            temperature: config.temperature,
            client: http_client(config.timeout_secs)?,
        })
    }
}

#[async_trait]
impl CompletionModel for OpenAIChatModel {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, prompt: &str) -> Result<String> {
        let mut body = serde_json::json!({
            "model": self.model,
            "messages": [{ "role": "user", "content": prompt }],
        });
        if let Some(t) = self.temperature {
            body["temperature"] = serde_json::json!(t);
        }

        let json = post_json(
            &self.client,
            &format!("{}/chat/completions", self.url),
            Some(&self.api_key),
            &body,
            0,
            "OpenAI",
        )
        .await?;

        let text = json
            .pointer("/choices/0/message/content")
            .and_then(|c| c.as_str())
            .ok_or_else(|| {
                anyhow::anyhow!("Invalid OpenAI response: missing choices[0].message.content")
            })?;
        non_empty(text)
    }
}

/// Chat against a local Ollama instance, non-streaming.
pub struct OllamaChatModel {
    model: String,
    url: String,
    temperature: Option<f32>,
    client: reqwest::Client,
}

impl OllamaChatModel {
    pub fn new(config: &ModelConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("model.model required for Ollama provider"))?;
        let url = config
            .url
            .clone()
            .unwrap_or_else(|| OLLAMA_DEFAULT_URL.to_string());

        Ok(Self {
            model,
            url: url.trim_end_matches('/').to_string(),
            temperature: config.temperature,
            client: http_client(config.timeout_secs)?,
        })
    }
}

#[async_trait]
impl CompletionModel for OllamaChatModel {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, prompt: &str) -> Result<String> {
        let mut body = serde_json::json!({
            "model": self.model,
            "messages": [{ "role": "user", "content": prompt }],
            "stream": false,
        });
        if let Some(t) = self.temperature {
            body["options"] = serde_json::json!({ "temperature": t });
        }

        let json = post_json(
            &self.client,
            &format!("{}/api/chat", self.url),
            None,
            &body,
            0,
            "Ollama",
        )
        .await?;

        let text = json
            .pointer("/message/content")
            .and_then(|c| c.as_str())
            .ok_or_else(|| anyhow::anyhow!("Invalid Ollama response: missing message.content"))?;
        non_empty(text)
    }
}

fn non_empty(text: &str) -> Result<String> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        bail!("model returned an empty answer");
    }
    Ok(trimmed.to_string())
}
