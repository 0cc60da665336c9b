//! Thin domain services over the BugBot core
//!
//! # Modules
//!
//! - [`signatures`] - Detection signature generation (YARA, Sigma, Suricata, JSON)
//! - [`remediator`] - LLM-drafted patches and optional draft PRs
//! - [`indexer`] - Event-log ingestion with a WebSocket stream
//! - [`mlops`] - Black-box training loop shells

#![warn(missing_docs)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

pub mod indexer;
pub mod mlops;
pub mod remediator;
pub mod signatures;
