//! Recon stage worker
//!
//! Discovers source code for the scan target: shallow-clones git URLs, walks
//! local paths, or fetches verified source from the chain's explorer for
//! address targets. Produces the surface map and candidate entry contracts
//! every later stage builds on. Recon performs no network writes.

use crate::git;
use crate::worker::{StageRequest, StageWorker};
use async_trait::async_trait;
use bugbot_chains::detect::detect_chain;
use bugbot_chains::explorer::ExplorerClient;
use bugbot_core::models::{
    ContractSource, ReconOutput, ScanTarget, SourceLanguage, Stage, StageResult, StageStatus,
    SurfaceEntry,
};
use bugbot_core::{Error, Result};
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Enumeration caps; a repo beyond these is truncated, not failed.
const MAX_SOURCE_FILES: usize = 200;
const MAX_FILE_BYTES: u64 = 256 * 1024;

/// The recon stage worker
pub struct ReconWorker {
    explorer: Arc<dyn ExplorerClient>,
    import_patterns: ImportPatterns,
}

struct ImportPatterns {
    solidity: Regex,
    vyper: Regex,
    rust: Regex,
    contract: Regex,
}

fn static_regex(pattern: &str) -> Regex {
    #[allow(clippy::expect_used)]
    Regex::new(pattern).expect("static pattern compiles")
}

impl ImportPatterns {
    fn new() -> Self {
        Self {
            solidity: static_regex(r#"import\s+(?:\{[^}]*\}\s+from\s+)?["']([^"']+)["']"#),
            vyper: static_regex(r"(?m)^\s*(?:from\s+(\S+)\s+import|import\s+(\S+))"),
            rust: static_regex(r"(?m)^\s*use\s+([A-Za-z0-9_]+)"),
            contract: static_regex(r"(?m)^\s*(?:abstract\s+)?contract\s+([A-Za-z0-9_]+)"),
        }
    }
}

/// Language of a file, when recon cares about it.
fn language_for(path: &Path, repo_has_cargo: bool) -> Option<SourceLanguage> {
    match path.extension().and_then(|e| e.to_str()) {
        Some("sol") => Some(SourceLanguage::Solidity),
        Some("vy") => Some(SourceLanguage::Vyper),
        // Rust sources only matter inside a Cargo workspace (Solana programs).
        Some("rs") if repo_has_cargo => Some(SourceLanguage::Rust),
        _ => None,
    }
}

impl ReconWorker {
    /// Create a worker backed by the given explorer client.
    pub fn new(explorer: Arc<dyn ExplorerClient>) -> Self {
        Self {
            explorer,
            import_patterns: ImportPatterns::new(),
        }
    }

    async fn recon_repository(&self, root: &Path) -> Result<ReconOutput> {
        let has_cargo = root.join("Cargo.toml").exists();
        let mut surface_map = Vec::new();
        let mut contracts = Vec::new();
        let mut truncated = false;

        for entry in WalkDir::new(root)
            .follow_links(false)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
        {
            let path = entry.path();
            let Some(language) = language_for(path, has_cargo) else {
                continue;
            };
            if surface_map.len() >= MAX_SOURCE_FILES {
                truncated = true;
                break;
            }
            if entry.metadata().map(|m| m.len() > MAX_FILE_BYTES).unwrap_or(true) {
                debug!("skipping oversized file {}", path.display());
                continue;
            }

            let source = match tokio::fs::read_to_string(path).await {
                Ok(source) => source,
                Err(e) => {
                    debug!("unreadable file {}: {}", path.display(), e);
                    continue;
                }
            };

            let rel = path
                .strip_prefix(root)
                .unwrap_or(path)
                .to_string_lossy()
                .to_string();
            let file = path
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_else(|| rel.clone());

            surface_map.push(SurfaceEntry {
                file,
                path: rel.clone(),
                language,
                imports: self.imports_of(&source, language),
            });
            contracts.push(ContractSource {
                name: self.contract_name(&source, &rel, language),
                path: rel,
                language,
                source,
                abi: None,
            });
        }

        if surface_map.is_empty() {
            return Err(Error::StageFailure {
                stage: Stage::Recon.to_string(),
                cause: "no contract sources found".to_string(),
            });
        }
        if truncated {
            warn!("surface map truncated at {} files", MAX_SOURCE_FILES);
        }

        let entry_contracts = self.entry_contracts(&surface_map, &contracts);
        info!(
            "recon mapped {} files, {} entry candidate(s)",
            surface_map.len(),
            entry_contracts.len()
        );

        Ok(ReconOutput {
            surface_map,
            entry_contracts,
            contracts,
            stage_status: if truncated {
                StageStatus::Partial
            } else {
                StageStatus::Complete
            },
        })
    }

    async fn recon_address(&self, request: &StageRequest, address: &str) -> Result<ReconOutput> {
        let hint = request.chain.or(request.chain_hint_from_target());
        let chain = detect_chain(address, hint)?;

        let verified = self.explorer.fetch_verified_source(chain, address).await?;
        let Some(verified) = verified else {
            return Err(Error::StageFailure {
                stage: Stage::Recon.to_string(),
                cause: "source_not_found".to_string(),
            });
        };

        let path = format!("{}.sol", verified.contract_name);
        Ok(ReconOutput {
            surface_map: vec![SurfaceEntry {
                file: path.clone(),
                path: path.clone(),
                language: SourceLanguage::Solidity,
                imports: self
                    .imports_of(&verified.source, SourceLanguage::Solidity),
            }],
            entry_contracts: vec![verified.contract_name.clone()],
            contracts: vec![ContractSource {
                name: verified.contract_name,
                path,
                language: SourceLanguage::Solidity,
                source: verified.source,
                abi: verified.abi,
            }],
            stage_status: StageStatus::Complete,
        })
    }

    fn imports_of(&self, source: &str, language: SourceLanguage) -> Vec<String> {
        match language {
            SourceLanguage::Solidity => self
                .import_patterns
                .solidity
                .captures_iter(source)
                .filter_map(|c| c.get(1).map(|m| m.as_str().to_string()))
                .collect(),
            SourceLanguage::Vyper => self
                .import_patterns
                .vyper
                .captures_iter(source)
                .filter_map(|c| {
                    c.get(1)
                        .or_else(|| c.get(2))
                        .map(|m| m.as_str().to_string())
                })
                .collect(),
            SourceLanguage::Rust => self
                .import_patterns
                .rust
                .captures_iter(source)
                .filter_map(|c| c.get(1).map(|m| m.as_str().to_string()))
                .filter(|name| !matches!(name.as_str(), "crate" | "super" | "self" | "std"))
                .collect(),
        }
    }

    fn contract_name(&self, source: &str, rel: &str, language: SourceLanguage) -> String {
        if language == SourceLanguage::Solidity {
            if let Some(captures) = self.import_patterns.contract.captures(source) {
                if let Some(name) = captures.get(1) {
                    return name.as_str().to_string();
                }
            }
        }
        PathBuf::from(rel)
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| rel.to_string())
    }

    /// Entry candidates: files no other enumerated file imports.
    fn entry_contracts(
        &self,
        surface_map: &[SurfaceEntry],
        contracts: &[ContractSource],
    ) -> Vec<String> {
        let imported: Vec<String> = surface_map
            .iter()
            .flat_map(|e| e.imports.iter().cloned())
            .collect();
        contracts
            .iter()
            .filter(|c| {
                !imported.iter().any(|import| {
                    import.ends_with(&c.path)
                        || import
                            .rsplit('/')
                            .next()
                            .map(|tail| c.path.ends_with(tail))
                            .unwrap_or(false)
                })
            })
            .map(|c| c.name.clone())
            .collect()
    }
}

impl StageRequest {
    fn chain_hint_from_target(&self) -> Option<bugbot_core::models::Chain> {
        match &self.target {
            ScanTarget::Address { chain, .. } => *chain,
            _ => None,
        }
    }
}

#[async_trait]
impl StageWorker for ReconWorker {
    fn stage(&self) -> Stage {
        Stage::Recon
    }

    async fn run(&self, request: StageRequest) -> Result<StageResult> {
        let output = match &request.target {
            ScanTarget::GitUrl { url } => {
                let checkout = tempfile::tempdir()?;
                git::clone_shallow(url, checkout.path(), None)
                    .await
                    .map_err(|e| Error::StageFailure {
                        stage: Stage::Recon.to_string(),
                        cause: e.to_string(),
                    })?;
                self.recon_repository(checkout.path()).await?
            }
            ScanTarget::LocalPath { path } => {
                if !path.exists() {
                    return Err(Error::StageFailure {
                        stage: Stage::Recon.to_string(),
                        cause: format!("path {} does not exist", path.display()),
                    });
                }
                self.recon_repository(path).await?
            }
            ScanTarget::Address { address, .. } => {
                let address = address.clone();
                self.recon_address(&request, &address).await?
            }
        };
        Ok(StageResult::Recon(output))
    }
}
