//! Git operations for recon
//!
//! Thin wrapper over the git CLI. Recon only ever clones shallowly and reads
//! the current commit; nothing here writes to a remote.

use std::path::Path;
use std::process::Stdio;
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, info};

/// Errors from git operations
#[derive(Debug, Error)]
pub enum GitError {
    /// IO operation failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Clone operation failed
    #[error("clone failed: {0}")]
    CloneFailed(String),

    /// Git command failed
    #[error("git command failed: {stderr}")]
    CommandFailed {
        /// Standard error
        stderr: String,
    },
}

/// Shallow-clone a repository: depth 1, single ref (`HEAD` by default).
pub async fn clone_shallow(
    url: &str,
    target: impl AsRef<Path>,
    reference: Option<&str>,
) -> Result<(), GitError> {
    let target = target.as_ref();
    let mut args = vec!["clone", "--depth", "1", "--single-branch"];
    if let Some(reference) = reference {
        args.push("--branch");
        args.push(reference);
    }
    let target_str = target.to_string_lossy().to_string();
    args.push(url);
    args.push(&target_str);

    info!("shallow cloning {} into {}", url, target.display());
    debug!("running: git {}", args.join(" "));

    let output = Command::new("git")
        .args(&args)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await?;

    if output.status.success() {
        Ok(())
    } else {
        Err(GitError::CloneFailed(
            String::from_utf8_lossy(&output.stderr).to_string(),
        ))
    }
}

/// The checked-out commit hash of a repository, when available.
pub async fn current_commit(repo: impl AsRef<Path>) -> Result<Option<String>, GitError> {
    let output = Command::new("git")
        .current_dir(repo.as_ref())
        .args(["rev-parse", "HEAD"])
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await?;

    if output.status.success() {
        Ok(Some(
            String::from_utf8_lossy(&output.stdout).trim().to_string(),
        ))
    } else {
        Ok(None)
    }
}
