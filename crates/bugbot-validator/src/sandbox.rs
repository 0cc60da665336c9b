//! Sandbox runners
//!
//! Executing a PoC is an external collaborator: a command invoked inside the
//! job's sandbox directory, selected by sandbox type. The runner prints a
//! [`RunOutcome`] as JSON on stdout.

use async_trait::async_trait;
use bugbot_core::models::SandboxType;
use bugbot_core::{Error, Result};
use serde::Deserialize;
use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;
use tracing::debug;

/// Verdict produced by a sandbox run
#[derive(Debug, Clone, Deserialize)]
pub struct RunOutcome {
    /// Whether the PoC reproduced the finding
    pub is_valid: bool,
    /// Runner confidence in 0.0..=1.0
    pub confidence: f64,
    /// Captured execution trace
    #[serde(default)]
    pub execution_trace: Option<String>,
    /// Captured state diff
    #[serde(default)]
    pub state_diff: Option<String>,
}

/// Executes a prepared sandbox
#[async_trait]
pub trait SandboxRunner: Send + Sync {
    /// Run the PoC already written into `sandbox`; the wall-clock timeout is
    /// enforced by the caller.
    async fn execute(
        &self,
        sandbox: &Path,
        sandbox_type: SandboxType,
        rpc_url: Option<&str>,
    ) -> Result<RunOutcome>;
}

/// Subprocess runner invoking the sandbox-type's toolchain
pub struct CommandRunner;

impl CommandRunner {
    fn command_for(sandbox_type: SandboxType) -> (&'static str, Vec<&'static str>) {
        match sandbox_type {
            SandboxType::Foundry => ("forge", vec!["test", "--json"]),
            SandboxType::Hardhat => ("npx", vec!["hardhat", "test", "--json"]),
            SandboxType::Docker => ("docker", vec!["run", "--rm", "--network=none"]),
        }
    }
}

#[async_trait]
impl SandboxRunner for CommandRunner {
    async fn execute(
        &self,
        sandbox: &Path,
        sandbox_type: SandboxType,
        rpc_url: Option<&str>,
    ) -> Result<RunOutcome> {
        let (program, args) = Self::command_for(sandbox_type);
        debug!("running {} in {}", program, sandbox.display());

        let mut command = Command::new(program);
        command
            .args(&args)
            .current_dir(sandbox)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(url) = rpc_url {
            command.env("ETH_RPC_URL", url);
        }

        let output = command
            .output()
            .await
            .map_err(|e| Error::internal(format!("spawning {program}: {e}")))?;

        if !output.status.success() {
            // A failing test run still carries a verdict when the toolchain
            // emits one; otherwise treat the exit status as job failure.
            if let Ok(outcome) = serde_json::from_slice::<RunOutcome>(&output.stdout) {
                return Ok(outcome);
            }
            return Err(Error::internal(format!(
                "{program} exited with {}",
                output.status
            )));
        }

        serde_json::from_slice(&output.stdout)
            .map_err(|e| Error::internal(format!("runner output: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outcome_parses_with_optional_fields() {
        let outcome: RunOutcome =
            serde_json::from_str(r#"{"is_valid": true, "confidence": 0.8}"#).unwrap();
        assert!(outcome.is_valid);
        assert_eq!(outcome.execution_trace, None);
    }
}
