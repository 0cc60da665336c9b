//! Black-box analyzer adapters
//!
//! Static analyzers are external collaborators invoked as subprocesses. The
//! adapter contract: the analyzer runs against a directory of contract
//! sources and prints a JSON array of `{title, severity, location,
//! description}` objects on stdout. Anything else is an analyzer failure,
//! which degrades the stage rather than failing it.

use bugbot_core::models::{RawFinding, Severity};
use bugbot_core::{Error, Result};
use serde::Deserialize;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, warn};

/// One configured analyzer
#[derive(Debug, Clone)]
pub struct AnalyzerConfig {
    /// Short name used in findings and metrics
    pub name: String,
    /// Program to execute
    pub program: String,
    /// Arguments; the source directory is appended last
    pub args: Vec<String>,
    /// Individual timeout
    pub timeout: Duration,
}

impl AnalyzerConfig {
    /// The default analyzer set.
    pub fn defaults() -> Vec<Self> {
        vec![
            Self {
                name: "slither".to_string(),
                program: "slither".to_string(),
                args: vec!["--json".to_string(), "-".to_string()],
                timeout: Duration::from_secs(120),
            },
            Self {
                name: "mythril".to_string(),
                program: "myth".to_string(),
                args: vec!["analyze".to_string(), "-o".to_string(), "json".to_string()],
                timeout: Duration::from_secs(180),
            },
        ]
    }

    /// Analyzer set from `STATIC_ANALYZERS` (`name=program args;...`),
    /// falling back to the defaults.
    pub fn from_env() -> Vec<Self> {
        let Some(raw) = bugbot_core::config::env_opt("STATIC_ANALYZERS") else {
            return Self::defaults();
        };
        let mut configs = Vec::new();
        for spec in raw.split(';').filter(|s| !s.trim().is_empty()) {
            let Some((name, command)) = spec.split_once('=') else {
                warn!("ignoring malformed analyzer spec '{}'", spec);
                continue;
            };
            let mut parts = command.split_whitespace().map(str::to_string);
            let Some(program) = parts.next() else {
                continue;
            };
            configs.push(Self {
                name: name.trim().to_string(),
                program,
                args: parts.collect(),
                timeout: Duration::from_secs(120),
            });
        }
        if configs.is_empty() {
            Self::defaults()
        } else {
            configs
        }
    }
}

#[derive(Deserialize)]
struct AnalyzerRow {
    title: String,
    #[serde(default)]
    severity: String,
    #[serde(default)]
    location: Option<String>,
    #[serde(default)]
    description: String,
}

/// Run one analyzer over a source directory and normalize its output.
pub async fn run_analyzer(config: &AnalyzerConfig, sources: &Path) -> Result<Vec<RawFinding>> {
    debug!("running analyzer {} on {}", config.name, sources.display());

    let child = Command::new(&config.program)
        .args(&config.args)
        .arg(sources)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| Error::internal(format!("spawning {}: {e}", config.name)))?;

    let output = tokio::time::timeout(config.timeout, child.wait_with_output())
        .await
        .map_err(|_| Error::Timeout(config.name.clone()))??;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(Error::internal(format!(
            "{} exited with {}: {}",
            config.name,
            output.status,
            stderr.lines().next().unwrap_or("")
        )));
    }

    let rows: Vec<AnalyzerRow> = serde_json::from_slice(&output.stdout)
        .map_err(|e| Error::internal(format!("{} output: {e}", config.name)))?;

    Ok(rows
        .into_iter()
        .map(|row| RawFinding {
            analyzer: config.name.clone(),
            title: row.title,
            severity: parse_severity(&row.severity),
            location: row.location,
            description: row.description,
        })
        .collect())
}

/// Map an analyzer's severity string onto the platform scale.
pub fn parse_severity(raw: &str) -> Severity {
    match raw.to_lowercase().as_str() {
        "critical" => Severity::Critical,
        "high" => Severity::High,
        "medium" | "moderate" => Severity::Medium,
        "low" | "minor" => Severity::Low,
        _ => Severity::Info,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn severity_strings_normalize() {
        assert_eq!(parse_severity("High"), Severity::High);
        assert_eq!(parse_severity("moderate"), Severity::Medium);
        assert_eq!(parse_severity("informational"), Severity::Info);
        assert_eq!(parse_severity(""), Severity::Info);
    }

    #[tokio::test]
    async fn analyzer_output_is_normalized() -> anyhow::Result<()> {
        let temp = tempfile::TempDir::new()?;
        // A shell one-liner stands in for an analyzer printing its findings;
        // the appended source directory lands in $0 and is ignored.
        let config = AnalyzerConfig {
            name: "echo-analyzer".to_string(),
            program: "sh".to_string(),
            args: vec![
                "-c".to_string(),
                r#"echo '[{"title":"Reentrancy in withdraw","severity":"high","location":"Vault.sol:42","description":"external call before state update"}]'"#
                    .to_string(),
            ],
            timeout: Duration::from_secs(5),
        };

        let findings = run_analyzer(&config, temp.path()).await?;
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].analyzer, "echo-analyzer");
        assert_eq!(findings[0].severity, Severity::High);
        Ok(())
    }

    #[tokio::test]
    async fn missing_analyzer_binary_is_an_error() {
        let temp = tempfile::TempDir::new().unwrap();
        let config = AnalyzerConfig {
            name: "ghost".to_string(),
            program: "definitely-not-installed-analyzer".to_string(),
            args: vec![],
            timeout: Duration::from_secs(5),
        };
        assert!(run_analyzer(&config, temp.path()).await.is_err());
    }
}
