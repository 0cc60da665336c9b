//! Admin bearer-token guard
//!
//! Admin mutations (pause approval, operator verdicts, PR creation) require a
//! bearer token equal to `ADMIN_TOKEN`. The comparison runs in constant time
//! over the presented bytes.

use axum::http::HeaderMap;
use bugbot_core::{Error, Result};
use secrecy::{ExposeSecret, SecretString};

/// Constant-time byte comparison.
///
/// Length mismatch short-circuits; the presented token's length is not a
/// secret, only its content is.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

/// Verify the `Authorization: Bearer` header against the admin token.
pub fn require_admin(headers: &HeaderMap, token: &SecretString) -> Result<()> {
    let presented = headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .ok_or(Error::Unauthorized)?;

    if constant_time_eq(presented.as_bytes(), token.expose_secret().as_bytes()) {
        Ok(())
    } else {
        Err(Error::Unauthorized)
    }
}
