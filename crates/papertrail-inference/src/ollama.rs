//! Ollama chat client for summary generation.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use papertrail_core::{defaults, Error, ModelClient, Result};

use crate::prompts::PromptTemplates;

/// Generation slower than this is logged as a slow operation.
const SLOW_GENERATION_MS: u64 = 60_000;

/// Timeout for the `/api/tags` health probe.
const HEALTH_CHECK_TIMEOUT_SECS: u64 = 5;

/// Connection settings for an Ollama server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OllamaConfig {
    /// Base URL without a trailing slash.
    pub base_url: String,
    /// Generation model name.
    pub model: String,
    /// Per-request timeout for generation, in seconds.
    pub timeout_secs: u64,
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            base_url: defaults::OLLAMA_URL.to_string(),
            model: defaults::GEN_MODEL.to_string(),
            timeout_secs: defaults::GEN_TIMEOUT_SECS,
        }
    }
}

impl OllamaConfig {
    /// Create config from environment variables (with defaults).
    ///
    /// | Variable | Default | Description |
    /// |----------|---------|-------------|
    /// | `OLLAMA_BASE_URL` | `http://localhost:11434` | Ollama server |
    /// | `OLLAMA_MODEL` | `llama3.1:8b` | Generation model |
    /// | `OLLAMA_TIMEOUT_SECS` | `300` | Generation request timeout |
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(url) = std::env::var("OLLAMA_BASE_URL") {
            if !url.is_empty() {
                config.base_url = url;
            }
        }
        if let Ok(model) = std::env::var("OLLAMA_MODEL") {
            if !model.is_empty() {
                config.model = model;
            }
        }
        if let Some(secs) = std::env::var("OLLAMA_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
        {
            config.timeout_secs = secs.max(1);
        }

        config.base_url = config.base_url.trim_end_matches('/').to_string();
        config
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }
}

/// Summary generator backed by the Ollama `/api/chat` endpoint.
pub struct OllamaClient {
    client: Client,
    config: OllamaConfig,
    prompts: PromptTemplates,
}

impl OllamaClient {
    /// Create a client for the given server and prompt templates.
    pub fn new(config: OllamaConfig, prompts: PromptTemplates) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| Error::Config(format!("Failed to create HTTP client: {}", e)))?;

        info!(
            subsystem = "inference",
            component = "ollama",
            url = %config.base_url,
            model = %config.model,
            timeout_secs = config.timeout_secs,
            "Initializing Ollama client"
        );

        Ok(Self {
            client,
            config,
            prompts,
        })
    }

    /// Client configuration.
    pub fn config(&self) -> &OllamaConfig {
        &self.config
    }

    /// Send one non-streaming chat exchange and return the reply content.
    async fn chat(&self, system: &str, user: &str) -> Result<String> {
        let start = Instant::now();

        let mut messages = Vec::with_capacity(2);
        if !system.is_empty() {
            messages.push(ChatMessage {
                role: "system".to_string(),
                content: system.to_string(),
            });
        }
        messages.push(ChatMessage {
            role: "user".to_string(),
            content: user.to_string(),
        });

        let request = ChatRequest {
            model: self.config.model.clone(),
            messages,
            stream: false,
        };

        let response = self
            .client
            .post(format!("{}/api/chat", self.config.base_url))
            .json(&request)
            .send()
            .await
            .map_err(|e| Error::Inference(format!("Request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Inference(format!(
                "Ollama returned {}: {}",
                status, body
            )));
        }

        let result: ChatResponse = response
            .json()
            .await
            .map_err(|e| Error::Inference(format!("Failed to parse response: {}", e)))?;

        let content = result.message.content;
        let elapsed = start.elapsed().as_millis() as u64;
        debug!(
            response_len = content.len(),
            duration_ms = elapsed,
            "Generation complete"
        );
        if elapsed > SLOW_GENERATION_MS {
            warn!(
                duration_ms = elapsed,
                prompt_len = user.len(),
                slow = true,
                "Slow generation operation"
            );
        }
        Ok(content)
    }

    /// Whether the server answers `GET /api/tags`.
    ///
    /// Never fails; connection problems are logged and reported as `false`.
    pub async fn health_check(&self) -> bool {
        let response = self
            .client
            .get(format!("{}/api/tags", self.config.base_url))
            .timeout(Duration::from_secs(HEALTH_CHECK_TIMEOUT_SECS))
            .send()
            .await;

        match response {
            Ok(resp) if resp.status().is_success() => {
                info!(subsystem = "inference", component = "ollama", "Ollama health check passed");
                true
            }
            Ok(resp) => {
                warn!(
                    subsystem = "inference",
                    component = "ollama",
                    status = %resp.status(),
                    "Ollama health check failed"
                );
                false
            }
            Err(e) => {
                warn!(
                    subsystem = "inference",
                    component = "ollama",
                    error = %e,
                    "Ollama health check error"
                );
                false
            }
        }
    }
}

/// Chat API message for `/api/chat`.
#[derive(Serialize, Deserialize, Clone)]
struct ChatMessage {
    role: String,
    content: String,
}

/// Request payload for the Ollama `/api/chat` endpoint.
#[derive(Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    stream: bool,
}

/// Response from the Ollama `/api/chat` endpoint.
#[derive(Deserialize)]
struct ChatResponse {
    message: ChatMessage,
}

#[async_trait]
impl ModelClient for OllamaClient {
    #[instrument(skip(self, text), fields(subsystem = "inference", component = "ollama", op = "summarize", model = %self.config.model, text_len = text.len()))]
    async fn summarize(&self, text: &str) -> Result<String> {
        let user = self.prompts.render_summary_user(text);
        self.chat(&self.prompts.summary.system, &user).await
    }

    fn model_name(&self) -> &str {
        &self.config.model
    }
}
