//! Task and response types for the LLM router

use serde::{Deserialize, Serialize};

/// Default completion budget when a task does not set one
pub const DEFAULT_MAX_TOKENS: u32 = 2048;

/// A typed LLM task
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmTask {
    /// Free-form task type matched against the routing table
    pub task_type: String,
    /// User prompt
    pub prompt: String,
    /// Optional system prompt
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
    /// Completion token budget
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    /// Sampling temperature
    #[serde(default = "default_temperature")]
    pub temperature: f32,
}

fn default_max_tokens() -> u32 {
    DEFAULT_MAX_TOKENS
}

fn default_temperature() -> f32 {
    0.2
}

impl LlmTask {
    /// Convenience constructor with default sampling parameters.
    pub fn new(task_type: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            task_type: task_type.into(),
            prompt: prompt.into(),
            system_prompt: None,
            max_tokens: DEFAULT_MAX_TOKENS,
            temperature: 0.2,
        }
    }

    /// Attach a system prompt.
    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system_prompt = Some(system.into());
        self
    }
}

/// The backend a task can be routed to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// Slow, high-quality local code analysis model
    DeepReasoning,
    /// Mid-weight local code model
    CodeAnalysis,
    /// Small local instruct model
    FastTriage,
    /// Local embedding model
    Embeddings,
    /// Hosted model, single provider
    CloudFinalReasoning,
}

impl BackendKind {
    /// The `model_type` label reported in responses.
    pub fn model_type(&self) -> &'static str {
        match self {
            BackendKind::DeepReasoning => "local/deep_reasoning",
            BackendKind::CodeAnalysis => "local/code_analysis",
            BackendKind::FastTriage => "local/fast_triage",
            BackendKind::Embeddings => "local/embeddings",
            BackendKind::CloudFinalReasoning => "cloud/final_reasoning",
        }
    }

    /// Whether the backend is served by the local endpoint.
    pub fn is_local(&self) -> bool {
        !matches!(self, BackendKind::CloudFinalReasoning)
    }
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.model_type())
    }
}

/// A completion from a backend
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmResponse {
    /// Completion text
    pub text: String,
    /// Concrete model that produced it
    pub model_used: String,
    /// Backend class
    pub model_type: BackendKind,
    /// Total tokens reported by the backend, when available
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tokens_used: Option<u32>,
}

/// Router health surface
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterHealth {
    /// Local endpoint reachability
    pub ollama: LocalHealth,
    /// Hosted backend key presence
    pub claude: CloudHealth,
    /// Rolled-up status
    pub status: String,
}

/// Local endpoint reachability
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LocalHealth {
    /// The local endpoint answered a probe
    Connected,
    /// The local endpoint is unreachable or unconfigured
    Disconnected,
}

/// Hosted backend configuration state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CloudHealth {
    /// An API key is configured
    Configured,
    /// No API key present
    Missing,
}

/// Secret-free snapshot of the routing configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelsSnapshot {
    /// Routing rules, in match order
    pub rules: Vec<RuleSnapshot>,
    /// Backend used when no rule matches
    pub default_backend: BackendKind,
    /// Concrete model name per backend
    pub models: Vec<ModelBinding>,
}

/// One routing rule as exposed by `GET /models`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleSnapshot {
    /// Pattern text
    pub pattern: String,
    /// Target backend
    pub backend: BackendKind,
}

/// A backend's concrete model binding
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelBinding {
    /// Backend class
    pub backend: BackendKind,
    /// Model name sent to the endpoint
    pub model: String,
    /// Whether the backend is currently usable
    pub available: bool,
}
