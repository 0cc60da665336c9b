//! Decompiler adapter
//!
//! Decompilation is an external collaborator: a configured command receives
//! bytecode on stdin and emits pseudo-Solidity on stdout. Services without a
//! decompiler use [`NoDecompiler`], which reports the capability as absent.

use async_trait::async_trait;
use bugbot_core::models::Chain;
use bugbot_core::{Error, Result};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{info, instrument};

/// Decompiler capability used when an address has no verified source
#[async_trait]
pub trait Decompiler: Send + Sync {
    /// Decompile bytecode to approximate source.
    async fn decompile(&self, chain: Chain, address: &str, bytecode: &str) -> Result<String>;
}

/// Absent decompiler; every call fails with a clear message.
pub struct NoDecompiler;

#[async_trait]
impl Decompiler for NoDecompiler {
    async fn decompile(&self, _chain: Chain, address: &str, _bytecode: &str) -> Result<String> {
        Err(Error::BackendUnavailable(format!(
            "no decompiler configured for {address}"
        )))
    }
}

/// Subprocess decompiler adapter
pub struct CommandDecompiler {
    program: String,
    args: Vec<String>,
    timeout: Duration,
}

impl CommandDecompiler {
    /// Adapter for `program args...`, bytecode on stdin, source on stdout.
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            timeout: Duration::from_secs(120),
        }
    }

    /// From `DECOMPILER_CMD`, e.g. `heimdall decompile -`.
    pub fn from_env() -> Option<Self> {
        let cmd = bugbot_core::config::env_opt("DECOMPILER_CMD")?;
        let mut parts = cmd.split_whitespace().map(str::to_string);
        let program = parts.next()?;
        Some(Self::new(program, parts.collect()))
    }
}

#[async_trait]
impl Decompiler for CommandDecompiler {
    #[instrument(skip(self, bytecode), fields(chain = %chain))]
    async fn decompile(&self, chain: Chain, address: &str, bytecode: &str) -> Result<String> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| Error::internal(format!("spawning decompiler: {e}")))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(bytecode.as_bytes()).await?;
        }

        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| Error::Timeout("decompiler".to_string()))??;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::internal(format!("decompiler failed: {stderr}")));
        }

        let source = String::from_utf8_lossy(&output.stdout).to_string();
        info!("decompiled {} ({} bytes)", address, source.len());
        Ok(source)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn absent_decompiler_reports_unavailable() {
        let err = NoDecompiler
            .decompile(Chain::Ethereum, "0xdead", "0x6080")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::BackendUnavailable(_)));
    }

    #[tokio::test]
    async fn command_decompiler_captures_stdout() -> anyhow::Result<()> {
        let decompiler = CommandDecompiler::new("cat", vec![]);
        let source = decompiler
            .decompile(Chain::Ethereum, "0xdead", "contract Decompiled {}")
            .await?;
        assert_eq!(source, "contract Decompiled {}");
        Ok(())
    }
}
