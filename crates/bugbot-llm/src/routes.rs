//! Routing rules as data
//!
//! The routing table is an ordered list of `{pattern, backend}` rules matched
//! against a task's `task_type`; the first match wins and an unmatched task
//! falls through to the configured default. The table loads from TOML at
//! process start (`LLM_ROUTES_PATH`), with a built-in default.

use crate::types::{BackendKind, RuleSnapshot};
use crate::LlmError;
use regex::Regex;
use serde::Deserialize;
use tracing::debug;

/// Built-in routing table used when no override file is configured.
const DEFAULT_ROUTES: &str = r#"
default = "fast_triage"

[[rule]]
pattern = "smart_contract_analysis|deep_analysis|exploit"
backend = "deep_reasoning"

[[rule]]
pattern = "code_review|code_analysis|patch"
backend = "code_analysis"

[[rule]]
pattern = "final_report|final_reasoning"
backend = "cloud_final_reasoning"

[[rule]]
pattern = "embed"
backend = "embeddings"

[[rule]]
pattern = "fast_triage|classify|filter"
backend = "fast_triage"
"#;

#[derive(Debug, Deserialize)]
struct RawTable {
    default: BackendKind,
    #[serde(default, rename = "rule")]
    rules: Vec<RawRule>,
}

#[derive(Debug, Deserialize)]
struct RawRule {
    pattern: String,
    backend: BackendKind,
}

/// A compiled routing rule
#[derive(Debug, Clone)]
pub struct RouteRule {
    /// Pattern source text
    pub pattern: String,
    regex: Regex,
    /// Target backend
    pub backend: BackendKind,
}

/// Ordered routing table
#[derive(Debug, Clone)]
pub struct RoutingTable {
    rules: Vec<RouteRule>,
    default_backend: BackendKind,
}

impl RoutingTable {
    /// The built-in table.
    pub fn builtin() -> Self {
        // The embedded table is known-good; a parse failure here is a bug.
        Self::from_toml(DEFAULT_ROUTES).unwrap_or(Self {
            rules: Vec::new(),
            default_backend: BackendKind::FastTriage,
        })
    }

    /// Parse a table from TOML text.
    pub fn from_toml(text: &str) -> Result<Self, LlmError> {
        let raw: RawTable = toml::from_str(text)
            .map_err(|e| LlmError::Config(format!("routing table: {e}")))?;
        let mut rules = Vec::with_capacity(raw.rules.len());
        for rule in raw.rules {
            let regex = Regex::new(&rule.pattern)
                .map_err(|e| LlmError::Config(format!("pattern '{}': {e}", rule.pattern)))?;
            rules.push(RouteRule {
                pattern: rule.pattern,
                regex,
                backend: rule.backend,
            });
        }
        Ok(Self {
            rules,
            default_backend: raw.default,
        })
    }

    /// Load from `LLM_ROUTES_PATH` when set, else the built-in table.
    pub fn from_env() -> Result<Self, LlmError> {
        match bugbot_core::config::env_opt("LLM_ROUTES_PATH") {
            Some(path) => {
                let text = std::fs::read_to_string(&path)
                    .map_err(|e| LlmError::Config(format!("reading {path}: {e}")))?;
                Self::from_toml(&text)
            }
            None => Ok(Self::builtin()),
        }
    }

    /// Select a backend for a task type. First matching rule wins.
    pub fn route(&self, task_type: &str) -> BackendKind {
        for rule in &self.rules {
            if rule.regex.is_match(task_type) {
                debug!(
                    "task_type '{}' matched '{}' -> {}",
                    task_type, rule.pattern, rule.backend
                );
                return rule.backend;
            }
        }
        debug!(
            "task_type '{}' unmatched, defaulting to {}",
            task_type, self.default_backend
        );
        self.default_backend
    }

    /// Backend used when no rule matches.
    pub fn default_backend(&self) -> BackendKind {
        self.default_backend
    }

    /// Secret-free rule listing for `GET /models`.
    pub fn snapshot(&self) -> Vec<RuleSnapshot> {
        self.rules
            .iter()
            .map(|r| RuleSnapshot {
                pattern: r.pattern.clone(),
                backend: r.backend,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn builtin_table_routes_the_standard_task_types() {
        let table = RoutingTable::builtin();
        assert_eq!(
            table.route("smart_contract_analysis"),
            BackendKind::DeepReasoning
        );
        assert_eq!(table.route("code_review"), BackendKind::CodeAnalysis);
        assert_eq!(table.route("fast_triage"), BackendKind::FastTriage);
        assert_eq!(
            table.route("final_report"),
            BackendKind::CloudFinalReasoning
        );
        assert_eq!(table.route("embed_sources"), BackendKind::Embeddings);
    }

    #[test]
    fn unmatched_task_types_fall_through_to_default() {
        let table = RoutingTable::builtin();
        assert_eq!(table.route("something_else"), BackendKind::FastTriage);
    }

    #[test]
    fn first_match_wins_and_selection_is_deterministic() {
        let table = RoutingTable::from_toml(
            r#"
default = "fast_triage"

[[rule]]
pattern = "analysis"
backend = "deep_reasoning"

[[rule]]
pattern = "smart_contract_analysis"
backend = "code_analysis"
"#,
        )
        .unwrap();

        for _ in 0..10 {
            // "smart_contract_analysis" contains "analysis"; the first rule wins.
            assert_eq!(
                table.route("smart_contract_analysis"),
                BackendKind::DeepReasoning
            );
        }
    }

    #[test]
    fn invalid_patterns_are_rejected_at_load() {
        let result = RoutingTable::from_toml(
            r#"
default = "fast_triage"

[[rule]]
pattern = "(unclosed"
backend = "deep_reasoning"
"#,
        );
        assert!(result.is_err());
    }
}
