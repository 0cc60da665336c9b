//! Shared HTTP scaffolding for BugBot services
//!
//! Every stage worker and domain service satisfies the same contract: a
//! `GET /health` report, a Prometheus `GET /metrics` exposition, CORS
//! restricted to the configured dashboard origins, and admin mutations guarded
//! by a constant-time bearer-token check. This crate provides those pieces so
//! each service only writes its work endpoints.

#![warn(missing_docs)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

pub mod auth;
pub mod error;
pub mod health;
pub mod metrics;

pub use auth::{constant_time_eq, require_admin};
pub use error::ApiError;
pub use health::{HealthReport, HealthStatus};
pub use metrics::ServiceMetrics;

use axum::http::{HeaderValue, Method};
use axum::Router;
use std::net::SocketAddr;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing::info;

/// CORS layer permitting the configured dashboard origins.
///
/// Origins that fail header-value parsing are skipped rather than aborting
/// boot; a service with zero valid origins simply refuses cross-origin calls.
pub fn cors_layer(origins: &[String]) -> CorsLayer {
    let parsed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|o| o.parse::<HeaderValue>().ok())
        .collect();
    CorsLayer::new()
        .allow_origin(AllowOrigin::list(parsed))
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([
            axum::http::header::CONTENT_TYPE,
            axum::http::header::AUTHORIZATION,
        ])
}

/// Bind and serve a router until the process exits.
pub async fn serve(router: Router, addr: SocketAddr) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("listening on {}", addr);
    axum::serve(listener, router).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cors_layer_tolerates_bad_origins() {
        // One valid and one invalid origin; construction must not panic.
        let _ = cors_layer(&[
            "http://localhost:3000".to_string(),
            "not a header value\u{0}".to_string(),
        ]);
    }
}
