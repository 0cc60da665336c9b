//! Environment-driven service configuration
//!
//! Every BugBot service configures itself from the environment at boot and
//! exits non-zero when a required variable is missing. Secrets are held as
//! [`secrecy::SecretString`] and never serialized.

use crate::models::Chain;
use secrecy::SecretString;
use thiserror::Error;

/// Boot-time configuration failures
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A required environment variable is absent or empty
    #[error("required environment variable {0} is not set")]
    Missing(String),

    /// An environment variable holds an unparseable value
    #[error("environment variable {name} has invalid value '{value}'")]
    Invalid {
        /// Variable name
        name: String,
        /// Offending value
        value: String,
    },
}

/// How RPC calls reach chains
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanMode {
    /// All RPC traffic targets a forked copy; nothing reaches mainnet
    Fork,
    /// Live endpoints permitted for reads; writes still need ALLOW_LIVE=1
    Live,
}

/// Read a required environment variable.
pub fn require_env(name: &str) -> Result<String, ConfigError> {
    match std::env::var(name) {
        Ok(value) if !value.trim().is_empty() => Ok(value),
        _ => Err(ConfigError::Missing(name.to_string())),
    }
}

/// Read an optional environment variable.
pub fn env_opt(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

/// Read an optional numeric environment variable, falling back to a default.
pub fn env_parse_or<T: std::str::FromStr>(name: &str, default: T) -> Result<T, ConfigError> {
    match env_opt(name) {
        Some(value) => value.parse().map_err(|_| ConfigError::Invalid {
            name: name.to_string(),
            value,
        }),
        None => Ok(default),
    }
}

/// The admin token guarding pause approvals and PR creation.
pub fn admin_token() -> Result<SecretString, ConfigError> {
    require_env("ADMIN_TOKEN").map(|t| SecretString::new(t.into()))
}

/// `SCAN_MODE`, defaulting to fork.
pub fn scan_mode() -> Result<ScanMode, ConfigError> {
    match env_opt("SCAN_MODE").as_deref() {
        None | Some("fork") => Ok(ScanMode::Fork),
        Some("live") => Ok(ScanMode::Live),
        Some(other) => Err(ConfigError::Invalid {
            name: "SCAN_MODE".to_string(),
            value: other.to_string(),
        }),
    }
}

/// `ALLOW_LIVE=1` permits state-changing RPC methods; anything else forbids.
pub fn allow_live() -> bool {
    matches!(env_opt("ALLOW_LIVE").as_deref(), Some("1"))
}

/// RPC endpoints for a chain: `<CHAIN>_RPC_URL` plus optional `_BACKUP`.
///
/// At least the primary is required for any chain a service uses.
pub fn rpc_urls_for(chain: Chain) -> Result<Vec<String>, ConfigError> {
    let prefix = chain.as_str().to_uppercase();
    let primary = require_env(&format!("{prefix}_RPC_URL"))?;
    let mut urls = vec![primary];
    if let Some(backup) = env_opt(&format!("{prefix}_RPC_URL_BACKUP")) {
        urls.push(backup);
    }
    Ok(urls)
}

/// Dashboard origins allowed by CORS, comma-separated.
pub fn dashboard_origins() -> Vec<String> {
    env_opt("DASHBOARD_ORIGINS")
        .map(|v| {
            v.split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect()
        })
        .unwrap_or_else(|| vec!["http://localhost:3000".to_string()])
}

#[cfg(test)]
mod tests {
    use super::*;

    // Env-var tests mutate process state; each test uses a distinct name.

    #[test]
    fn require_env_rejects_missing_and_blank() {
        assert!(require_env("BUGBOT_TEST_UNSET_VAR").is_err());
        std::env::set_var("BUGBOT_TEST_BLANK_VAR", "   ");
        assert!(require_env("BUGBOT_TEST_BLANK_VAR").is_err());
    }

    #[test]
    fn env_parse_or_falls_back_and_validates() {
        assert_eq!(env_parse_or("BUGBOT_TEST_NUM_UNSET", 8usize).ok(), Some(8));
        std::env::set_var("BUGBOT_TEST_NUM_BAD", "eight");
        assert!(env_parse_or("BUGBOT_TEST_NUM_BAD", 8usize).is_err());
        std::env::set_var("BUGBOT_TEST_NUM_GOOD", "64");
        assert_eq!(env_parse_or("BUGBOT_TEST_NUM_GOOD", 8usize).ok(), Some(64));
    }

    #[test]
    fn rpc_urls_include_backup_when_present() {
        std::env::set_var("BSC_RPC_URL", "https://bsc.example.test");
        std::env::set_var("BSC_RPC_URL_BACKUP", "https://bsc-backup.example.test");
        let urls = rpc_urls_for(Chain::Bsc).unwrap();
        assert_eq!(urls.len(), 2);
        assert_eq!(urls[0], "https://bsc.example.test");
    }
}
