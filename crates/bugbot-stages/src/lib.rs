//! BugBot stage workers
//!
//! Each of the six pipeline stages is an independent HTTP worker satisfying
//! the shared stage-worker contract: one `POST /<stage>` work endpoint plus
//! `GET /health` and `GET /metrics`. Workers are plain structs implementing
//! [`StageWorker`], so the orchestrator's tests can also drive them
//! in-process.
//!
//! # Modules
//!
//! - [`worker`] - The uniform request/response contract and router assembly
//! - [`recon`] - Source discovery and surface mapping
//! - [`static_analysis`] - Black-box analyzer aggregation
//! - [`fuzzing`] - Property testing through the fuzz harness adapter
//! - [`monitoring`] - Bounded on-chain observation
//! - [`triage`] - Three-tier LLM classification
//! - [`reporting`] - Report rendering and notification dispatch

#![warn(missing_docs)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

pub mod analyzers;
pub mod fuzzing;
pub mod git;
pub mod monitoring;
pub mod notify;
pub mod recon;
pub mod reporting;
pub mod static_analysis;
pub mod triage;
pub mod worker;

pub use worker::{stage_router, StageRequest, StageWorker};
