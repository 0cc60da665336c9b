//! Model backend clients
//!
//! One OpenAI-compatible local endpoint serves the four local backend kinds
//! (each bound to its own model name); the hosted backend speaks the Anthropic
//! messages API. Both clients perform a single attempt per call; retry,
//! backoff, and fallback policy live in the router.

use crate::types::{BackendKind, LlmResponse, LlmTask};
use crate::LlmError;
use bugbot_core::redaction::redact_error_message;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tracing::debug;

/// Default per-call timeout for model requests
const CALL_TIMEOUT: Duration = Duration::from_secs(120);

fn classify_status(status: reqwest::StatusCode, body: &str) -> LlmError {
    let message = redact_error_message(body);
    if status.as_u16() == 408 || status.as_u16() == 429 || status.is_server_error() {
        LlmError::Transient(format!("http {status}: {message}"))
    } else {
        LlmError::Rejected {
            status: status.as_u16(),
            message,
        }
    }
}

fn classify_transport(err: reqwest::Error) -> LlmError {
    LlmError::Transient(redact_error_message(&err.to_string()))
}

/// Model names for the local backend kinds
#[derive(Debug, Clone)]
pub struct LocalModels {
    /// Deep reasoning model
    pub deep_reasoning: String,
    /// Code analysis model
    pub code_analysis: String,
    /// Fast triage model
    pub fast_triage: String,
    /// Embedding model
    pub embeddings: String,
}

impl Default for LocalModels {
    fn default() -> Self {
        Self {
            deep_reasoning: "qwen2.5-coder:32b".to_string(),
            code_analysis: "codellama:13b".to_string(),
            fast_triage: "llama3.1:8b".to_string(),
            embeddings: "nomic-embed-text".to_string(),
        }
    }
}

impl LocalModels {
    /// Model names from `LLM_MODEL_*` overrides, with defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            deep_reasoning: bugbot_core::config::env_opt("LLM_MODEL_DEEP")
                .unwrap_or(defaults.deep_reasoning),
            code_analysis: bugbot_core::config::env_opt("LLM_MODEL_CODE")
                .unwrap_or(defaults.code_analysis),
            fast_triage: bugbot_core::config::env_opt("LLM_MODEL_FAST")
                .unwrap_or(defaults.fast_triage),
            embeddings: bugbot_core::config::env_opt("LLM_MODEL_EMBED")
                .unwrap_or(defaults.embeddings),
        }
    }

    /// The model bound to a local backend kind.
    pub fn for_kind(&self, kind: BackendKind) -> &str {
        match kind {
            BackendKind::DeepReasoning => &self.deep_reasoning,
            BackendKind::CodeAnalysis => &self.code_analysis,
            BackendKind::FastTriage => &self.fast_triage,
            BackendKind::Embeddings => &self.embeddings,
            BackendKind::CloudFinalReasoning => &self.fast_triage,
        }
    }
}

/// OpenAI-compatible client for the local model endpoint
#[derive(Debug, Clone)]
pub struct LocalBackend {
    base_url: String,
    models: LocalModels,
    http: reqwest::Client,
}

#[derive(Deserialize)]
struct ChatCompletion {
    choices: Vec<ChatChoice>,
    usage: Option<ChatUsage>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatMessage {
    content: String,
}

#[derive(Deserialize)]
struct ChatUsage {
    total_tokens: u32,
}

#[derive(Deserialize)]
struct EmbeddingList {
    data: Vec<EmbeddingRow>,
}

#[derive(Deserialize)]
struct EmbeddingRow {
    embedding: Vec<f32>,
}

impl LocalBackend {
    /// Create a client for the endpoint at `base_url`.
    pub fn new(base_url: String, models: LocalModels) -> Self {
        let http = reqwest::Client::builder()
            .timeout(CALL_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            models,
            http,
        }
    }

    /// One chat-completion attempt against the model for `kind`.
    pub async fn generate_once(
        &self,
        kind: BackendKind,
        task: &LlmTask,
    ) -> Result<LlmResponse, LlmError> {
        let model = self.models.for_kind(kind).to_string();
        let mut messages = Vec::new();
        if let Some(system) = &task.system_prompt {
            messages.push(json!({"role": "system", "content": system}));
        }
        messages.push(json!({"role": "user", "content": task.prompt}));

        debug!("local generate with {} for '{}'", model, task.task_type);
        let response = self
            .http
            .post(format!("{}/v1/chat/completions", self.base_url))
            .json(&json!({
                "model": model,
                "messages": messages,
                "max_tokens": task.max_tokens,
                "temperature": task.temperature,
            }))
            .send()
            .await
            .map_err(classify_transport)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status, &body));
        }

        let completion: ChatCompletion = response
            .json()
            .await
            .map_err(|e| LlmError::Malformed(e.to_string()))?;
        let text = completion
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| LlmError::Malformed("completion has no choices".to_string()))?;

        Ok(LlmResponse {
            text,
            model_used: model,
            model_type: kind,
            tokens_used: completion.usage.map(|u| u.total_tokens),
        })
    }

    /// One embedding attempt; every returned vector has the same dimension.
    pub async fn embed_once(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, LlmError> {
        let response = self
            .http
            .post(format!("{}/v1/embeddings", self.base_url))
            .json(&json!({
                "model": self.models.embeddings,
                "input": texts,
            }))
            .send()
            .await
            .map_err(classify_transport)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status, &body));
        }

        let list: EmbeddingList = response
            .json()
            .await
            .map_err(|e| LlmError::Malformed(e.to_string()))?;
        let vectors: Vec<Vec<f32>> = list.data.into_iter().map(|r| r.embedding).collect();

        if let Some(first) = vectors.first() {
            let dim = first.len();
            if vectors.iter().any(|v| v.len() != dim) {
                return Err(LlmError::Malformed(
                    "embedding dimensions are not uniform".to_string(),
                ));
            }
        }
        Ok(vectors)
    }

    /// Probe the endpoint for the health surface.
    pub async fn probe(&self) -> bool {
        let probe = self
            .http
            .get(format!("{}/v1/models", self.base_url))
            .timeout(Duration::from_secs(3))
            .send()
            .await;
        matches!(probe, Ok(resp) if resp.status().is_success())
    }

    /// Configured model names, for `GET /models`.
    pub fn models(&self) -> &LocalModels {
        &self.models
    }
}

/// Hosted-model client speaking the Anthropic messages API
#[derive(Debug, Clone)]
pub struct CloudBackend {
    base_url: String,
    api_key: SecretString,
    model: String,
    http: reqwest::Client,
}

#[derive(Deserialize)]
struct CloudMessage {
    content: Vec<CloudContent>,
    usage: Option<CloudUsage>,
}

#[derive(Deserialize)]
struct CloudContent {
    #[serde(default)]
    text: String,
}

#[derive(Deserialize)]
struct CloudUsage {
    input_tokens: u32,
    output_tokens: u32,
}

impl CloudBackend {
    /// Create a client; `base_url` defaults to the public API host.
    pub fn new(api_key: SecretString, base_url: Option<String>, model: Option<String>) -> Self {
        let http = reqwest::Client::builder()
            .timeout(CALL_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self {
            base_url: base_url
                .unwrap_or_else(|| "https://api.anthropic.com".to_string())
                .trim_end_matches('/')
                .to_string(),
            api_key,
            model: model.unwrap_or_else(|| "claude-3-5-sonnet-latest".to_string()),
            http,
        }
    }

    /// One attempt against the hosted model.
    pub async fn generate_once(&self, task: &LlmTask) -> Result<LlmResponse, LlmError> {
        let mut body = json!({
            "model": self.model,
            "max_tokens": task.max_tokens,
            "temperature": task.temperature,
            "messages": [{"role": "user", "content": task.prompt}],
        });
        if let Some(system) = &task.system_prompt {
            body["system"] = json!(system);
        }

        debug!("cloud generate with {} for '{}'", self.model, task.task_type);
        let response = self
            .http
            .post(format!("{}/v1/messages", self.base_url))
            .header("x-api-key", self.api_key.expose_secret())
            .header("anthropic-version", "2023-06-01")
            .json(&body)
            .send()
            .await
            .map_err(classify_transport)?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(classify_status(status, &text));
        }

        let message: CloudMessage = response
            .json()
            .await
            .map_err(|e| LlmError::Malformed(e.to_string()))?;
        let text = message
            .content
            .iter()
            .map(|c| c.text.as_str())
            .collect::<Vec<_>>()
            .join("");

        Ok(LlmResponse {
            text,
            model_used: self.model.clone(),
            model_type: BackendKind::CloudFinalReasoning,
            tokens_used: message
                .usage
                .map(|u| u.input_tokens + u.output_tokens),
        })
    }

    /// Configured model name, for `GET /models`.
    pub fn model(&self) -> &str {
        &self.model
    }
}

/// Exponential backoff with jitter: base 500ms, factor 2, ±25%.
pub fn retry_backoff(attempt: u32) -> Duration {
    use rand::Rng;
    let base_ms = 500u64.saturating_mul(2u64.saturating_pow(attempt.min(6)));
    let jitter = rand::thread_rng().gen_range(0.75..=1.25);
    Duration::from_millis((base_ms as f64 * jitter) as u64)
}
