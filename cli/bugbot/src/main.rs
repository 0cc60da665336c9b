//! BugBot service launcher
//!
//! One binary, one long-running HTTP daemon per subcommand. Every service
//! validates its required environment at boot and exits non-zero with a
//! clear message when something is missing.

use anyhow::Context;
use bugbot_chains::{AddressScanState, HttpExplorerClient, NoDecompiler};
use bugbot_guardrail::api::{guardrail_router, GuardrailState};
use bugbot_guardrail::{GuardrailService, RecordedIntentAdapter};
use bugbot_llm::api::{llm_router_api, LlmApiState};
use bugbot_llm::LlmRouter;
use bugbot_orchestrator::api::orchestrator_router;
use bugbot_orchestrator::{HttpDispatcher, Orchestrator};
use bugbot_service::ServiceMetrics;
use bugbot_signals::indexer::{indexer_router, IndexerService};
use bugbot_signals::mlops::{mlops_router, MlOpsService};
use bugbot_signals::remediator::{remediator_router, Remediator, RemediatorState};
use bugbot_signals::signatures::{signatures_router, SignatureState};
use bugbot_stages::fuzzing::FuzzingWorker;
use bugbot_stages::monitoring::MonitoringWorker;
use bugbot_stages::notify::WebhookNotifier;
use bugbot_stages::recon::ReconWorker;
use bugbot_stages::reporting::ReportingWorker;
use bugbot_stages::static_analysis::StaticWorker;
use bugbot_stages::triage::TriageWorker;
use bugbot_stages::worker::{stage_router, StageWorker};
use bugbot_validator::api::{validator_router, ValidatorState};
use bugbot_validator::{CommandRunner, ValidatorService};
use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "bugbot")]
#[command(about = "BugBot - automated smart-contract security analysis platform")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Scan pipeline coordinator
    Orchestrator {
        /// Port to listen on
        #[arg(long, default_value_t = 8100)]
        port: u16,
    },
    /// LLM task router
    LlmRouter {
        /// Port to listen on
        #[arg(long, default_value_t = 8090)]
        port: u16,
    },
    /// Recon stage worker
    Recon {
        /// Port to listen on
        #[arg(long, default_value_t = 8101)]
        port: u16,
    },
    /// Static analysis stage worker
    Static {
        /// Port to listen on
        #[arg(long, default_value_t = 8102)]
        port: u16,
    },
    /// Fuzzing stage worker
    Fuzzing {
        /// Port to listen on
        #[arg(long, default_value_t = 8103)]
        port: u16,
    },
    /// Monitoring stage worker
    Monitoring {
        /// Port to listen on
        #[arg(long, default_value_t = 8104)]
        port: u16,
    },
    /// Triage stage worker
    Triage {
        /// Port to listen on
        #[arg(long, default_value_t = 8105)]
        port: u16,
    },
    /// Reporting stage worker
    Reporting {
        /// Port to listen on
        #[arg(long, default_value_t = 8106)]
        port: u16,
    },
    /// Monitor registry and pause workflow
    Guardrail {
        /// Port to listen on
        #[arg(long, default_value_t = 8110)]
        port: u16,
    },
    /// Validation job queue
    Validator {
        /// Port to listen on
        #[arg(long, default_value_t = 8111)]
        port: u16,
    },
    /// Address-only scan ingress
    AddressScanner {
        /// Port to listen on
        #[arg(long, default_value_t = 8112)]
        port: u16,
    },
    /// Detection signature generator
    Signatures {
        /// Port to listen on
        #[arg(long, default_value_t = 8113)]
        port: u16,
    },
    /// Remediation drafts and draft PRs
    Remediator {
        /// Port to listen on
        #[arg(long, default_value_t = 8114)]
        port: u16,
    },
    /// Event-log indexer
    Indexer {
        /// Port to listen on
        #[arg(long, default_value_t = 8115)]
        port: u16,
    },
    /// Training loop shells
    Mlops {
        /// Port to listen on
        #[arg(long, default_value_t = 8116)]
        port: u16,
    },
}

fn addr(port: u16) -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], port))
}

fn llm_router() -> anyhow::Result<Arc<LlmRouter>> {
    Ok(Arc::new(
        LlmRouter::from_env().context("building LLM router")?,
    ))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    // Misconfigured SCAN_MODE is a boot error for every service.
    bugbot_core::config::scan_mode().context("validating SCAN_MODE")?;

    let (router, port) = match cli.command {
        Commands::Orchestrator { port } => {
            let (max_concurrent, queue_size) = Orchestrator::limits_from_env();
            let orchestrator = Arc::new(Orchestrator::new(
                Arc::new(bugbot_core::store::MemoryScanStore::new()),
                Arc::new(HttpDispatcher::from_env()),
                max_concurrent,
                queue_size,
            ));
            (orchestrator_router(orchestrator), port)
        }
        Commands::LlmRouter { port } => {
            let state = Arc::new(LlmApiState::new(llm_router()?));
            (llm_router_api(state), port)
        }
        Commands::Recon { port } => {
            let worker: Arc<dyn StageWorker> =
                Arc::new(ReconWorker::new(Arc::new(HttpExplorerClient::new())));
            let metrics = Arc::new(ServiceMetrics::new("recon-worker"));
            (stage_router(worker, metrics), port)
        }
        Commands::Static { port } => {
            let worker: Arc<dyn StageWorker> = Arc::new(StaticWorker::from_env(llm_router()?));
            let metrics = Arc::new(ServiceMetrics::new("static-worker"));
            (stage_router(worker, metrics), port)
        }
        Commands::Fuzzing { port } => {
            let worker: Arc<dyn StageWorker> = Arc::new(FuzzingWorker::from_env(llm_router()?));
            let metrics = Arc::new(ServiceMetrics::new("fuzzing-worker"));
            (stage_router(worker, metrics), port)
        }
        Commands::Monitoring { port } => {
            let worker: Arc<dyn StageWorker> = Arc::new(MonitoringWorker::new());
            let metrics = Arc::new(ServiceMetrics::new("monitoring-worker"));
            (stage_router(worker, metrics), port)
        }
        Commands::Triage { port } => {
            let metrics = Arc::new(ServiceMetrics::new("triage-worker"));
            let worker: Arc<dyn StageWorker> =
                Arc::new(TriageWorker::new(llm_router()?, Arc::clone(&metrics)));
            (stage_router(worker, metrics), port)
        }
        Commands::Reporting { port } => {
            let notifier = Arc::new(WebhookNotifier::from_env());
            let worker: Arc<dyn StageWorker> = Arc::new(ReportingWorker::from_env(notifier));
            let metrics = Arc::new(ServiceMetrics::new("reporting-worker"));
            (stage_router(worker, metrics), port)
        }
        Commands::Guardrail { port } => {
            let admin_token =
                bugbot_core::config::admin_token().context("guardrail requires ADMIN_TOKEN")?;
            let state = Arc::new(GuardrailState {
                service: GuardrailService::new(Arc::new(RecordedIntentAdapter::new())),
                admin_token,
                metrics: Arc::new(ServiceMetrics::new("guardrail")),
                reported_failovers: std::sync::atomic::AtomicU64::new(0),
            });
            let sweeper = Arc::clone(&state);
            tokio::spawn(async move {
                let mut interval = tokio::time::interval(std::time::Duration::from_secs(15));
                loop {
                    interval.tick().await;
                    let emitted = sweeper.service.run_detection_sweep().await;
                    if emitted > 0 {
                        tracing::info!("detection sweep emitted {} pause request(s)", emitted);
                    }
                }
            });
            (guardrail_router(state), port)
        }
        Commands::Validator { port } => {
            let admin_token =
                bugbot_core::config::admin_token().context("validator requires ADMIN_TOKEN")?;
            let state = Arc::new(ValidatorState {
                service: ValidatorService::from_env(Arc::new(CommandRunner)),
                admin_token,
            });
            (validator_router(state), port)
        }
        Commands::AddressScanner { port } => {
            let static_url = bugbot_core::config::env_opt("STATIC_WORKER_URL")
                .unwrap_or_else(|| "http://127.0.0.1:8102".to_string());
            let decompiler: Arc<dyn bugbot_chains::Decompiler> =
                match bugbot_chains::CommandDecompiler::from_env() {
                    Some(decompiler) => Arc::new(decompiler),
                    None => Arc::new(NoDecompiler),
                };
            let state = Arc::new(AddressScanState::new(
                Arc::new(HttpExplorerClient::new()),
                decompiler,
                static_url,
            ));
            (bugbot_chains::address_scan_router(state), port)
        }
        Commands::Signatures { port } => {
            (signatures_router(Arc::new(SignatureState::new())), port)
        }
        Commands::Remediator { port } => {
            let admin_token =
                bugbot_core::config::admin_token().context("remediator requires ADMIN_TOKEN")?;
            let state = Arc::new(RemediatorState {
                service: Remediator::new(llm_router()?, None),
                admin_token,
                metrics: Arc::new(ServiceMetrics::new("remediator")),
            });
            (remediator_router(state), port)
        }
        Commands::Indexer { port } => (indexer_router(IndexerService::new()), port),
        Commands::Mlops { port } => (mlops_router(MlOpsService::new()), port),
    };

    bugbot_service::serve(router, addr(port))
        .await
        .context("serving HTTP")?;
    Ok(())
}
