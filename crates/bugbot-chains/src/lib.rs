//! Chain detection, explorer access, and the address-scan flow
//!
//! Binds the static analysis stage to an address-only input: detect the chain
//! from the address format, fetch verified source from the chain's explorer,
//! optionally decompile when no source exists, and hand the result to the
//! static stage worker.

#![warn(missing_docs)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

pub mod decompile;
pub mod detect;
pub mod explorer;
pub mod service;

pub use decompile::{CommandDecompiler, Decompiler, NoDecompiler};
pub use detect::detect_chain;
pub use explorer::{ExplorerClient, HttpExplorerClient, VerifiedSource};
pub use service::{address_scan_router, AddressScanState};
