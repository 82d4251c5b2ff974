//! Language model clients.
//!
//! [`LanguageModel`] is the seam between the pipeline and whatever serves
//! completions. Two HTTP backends are provided:
//!
//! | `llm.provider` | Endpoint | Answer field |
//! |----------------|----------|--------------|
//! | `ollama` | `POST {url}/api/generate` | `response` |
//! | `openai` | `POST {url}/v1/chat/completions` | `choices[0].message.content` |
//!
//! Both send the configured sampling options and retry transient failures
//! through [`crate::http::post_json`].

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, info};

use crate::config::LlmConfig;
use crate::http;

/// Anything that turns a prompt into text.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Provider name (`"ollama"`, `"openai"`).
    fn provider(&self) -> &str;

    /// Model identifier sent to the provider.
    fn model_name(&self) -> &str;

    /// Send one prompt and return the raw completion text.
    async fn complete(&self, prompt: &str) -> Result<String>;
}

/// Build the client named by `config.provider`.
pub fn create_model(config: &LlmConfig) -> Result<Arc<dyn LanguageModel>> {
    match config.provider.as_str() {
        "ollama" => Ok(Arc::new(OllamaModel::new(config.clone())?)),
        "openai" => Ok(Arc::new(OpenAiModel::new(config.clone())?)),
        other => bail!("Unknown llm provider: {}", other),
    }
}

// ============ Ollama ============

pub struct OllamaModel {
    config: LlmConfig,
    client: reqwest::Client,
}

impl OllamaModel {
    pub fn new(config: LlmConfig) -> Result<Self> {
        let client = http::client(config.timeout_secs)?;
        Ok(Self { config, client })
    }

    fn request_body(&self, prompt: &str) -> Value {
        let c = &self.config;
        let mut body = json!({
            "model": c.model,
            "prompt": prompt,
            "stream": false,
            "options": {
                "temperature": c.temperature,
                "top_p": c.top_p,
                "top_k": c.top_k,
                "num_ctx": c.num_ctx,
                "repeat_penalty": c.repeat_penalty,
                "num_predict": c.num_predict,
                "seed": c.seed,
            }
        });
        if c.json_format {
            body["format"] = json!("json");
        }
        body
    }
}

#[async_trait]
impl LanguageModel for OllamaModel {
    fn provider(&self) -> &str {
        "ollama"
    }

    fn model_name(&self) -> &str {
        &self.config.model
    }

    async fn complete(&self, prompt: &str) -> Result<String> {
        let url = format!("{}/api/generate", self.config.url.trim_end_matches('/'));
        info!(model = %self.config.model, %url, prompt_chars = prompt.len(), "calling ollama");

        let json = http::post_json(
            &self.client,
            "Ollama",
            &url,
            None,
            &self.request_body(prompt),
            self.config.max_retries,
        )
        .await?;

        let text = json
            .get("response")
            .and_then(|r| r.as_str())
            .ok_or_else(|| anyhow!("Invalid Ollama response: missing response field"))?;
        debug!(chars = text.len(), "ollama answered");
        Ok(text.to_string())
    }
}

// ============ OpenAI-compatible ============

/// Any chat-completions endpoint. `OPENAI_API_KEY` is sent as a bearer
/// token when set; local proxies often need none.
pub struct OpenAiModel {
    config: LlmConfig,
    client: reqwest::Client,
    api_key: Option<String>,
}

impl OpenAiModel {
    pub fn new(config: LlmConfig) -> Result<Self> {
        let client = http::client(config.timeout_secs)?;
        let api_key = std::env::var("OPENAI_API_KEY").ok().filter(|k| !k.is_empty());
        Ok(Self {
            config,
            client,
            api_key,
        })
    }

    fn request_body(&self, prompt: &str) -> Value {
        let c = &self.config;
        let mut body = json!({
            "model": c.model,
            "messages": [{ "role": "user", "content": prompt }],
            "temperature": c.temperature,
            "top_p": c.top_p,
            "max_tokens": c.num_predict,
            "seed": c.seed,
        });
        if c.json_format {
            body["response_format"] = json!({ "type": "json_object" });
        }
        body
    }
}

#[async_trait]
impl LanguageModel for OpenAiModel {
    fn provider(&self) -> &str {
        "openai"
    }

    fn model_name(&self) -> &str {
        &self.config.model
    }

    async fn complete(&self, prompt: &str) -> Result<String> {
        let url = format!(
            "{}/v1/chat/completions",
            self.config.url.trim_end_matches('/')
        );
        info!(model = %self.config.model, %url, prompt_chars = prompt.len(), "calling chat completions");

        let json = http::post_json(
            &self.client,
            "OpenAI",
            &url,
            self.api_key.as_deref(),
            &self.request_body(prompt),
            self.config.max_retries,
        )
        .await?;

        json.pointer("/choices/0/message/content")
            .and_then(|c| c.as_str())
            .map(str::to_string)
            .ok_or_else(|| anyhow!("Invalid chat completion response: missing choices[0].message.content"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{routing::post, Json, Router};

    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{}", addr)
    }

    #[test]
    fn test_ollama_body_carries_options_and_format() {
        let model = OllamaModel::new(LlmConfig::default()).unwrap();
        let body = model.request_body("hi");
        assert_eq!(body["model"], "mistral");
        assert_eq!(body["stream"], false);
        assert_eq!(body["format"], "json");
        assert_eq!(body["options"]["num_ctx"], 4096);
        assert_eq!(body["options"]["seed"], 1);
    }

    #[test]
    fn test_ollama_body_without_json_format() {
        let config = LlmConfig {
            json_format: false,
            ..Default::default()
        };
        let body = OllamaModel::new(config).unwrap().request_body("hi");
        assert!(body.get("format").is_none());
    }

    #[test]
    fn test_unknown_provider() {
        let config = LlmConfig {
            provider: "bard".to_string(),
            ..Default::default()
        };
        assert!(create_model(&config).is_err());
    }

    #[tokio::test]
    async fn test_ollama_complete_reads_response_field() {
        let router = Router::new().route(
            "/api/generate",
            post(|Json(body): Json<Value>| async move {
                Json(json!({ "response": format!("echo:{}", body["prompt"].as_str().unwrap_or("")) }))
            }),
        );
        let url = serve(router).await;
        let model = OllamaModel::new(LlmConfig {
            url,
            ..Default::default()
        })
        .unwrap();
        assert_eq!(model.complete("ping").await.unwrap(), "echo:ping");
    }

    #[tokio::test]
    async fn test_openai_complete_reads_first_choice() {
        let router = Router::new().route(
            "/v1/chat/completions",
            post(|| async {
                Json(json!({ "choices": [{ "message": { "role": "assistant", "content": "{}" } }] }))
            }),
        );
        let url = serve(router).await;
        let model = OpenAiModel::new(LlmConfig {
            provider: "openai".to_string(),
            url,
            ..Default::default()
        })
        .unwrap();
        assert_eq!(model.complete("ping").await.unwrap(), "{}");
    }
}
