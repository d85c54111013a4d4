// ABOUTME: Process-wide TLS certificate policy
// ABOUTME: Set once at startup and read by the PostgreSQL and ClickHouse connectors

use std::sync::OnceLock;

static ALLOW_SELF_SIGNED: OnceLock<bool> = OnceLock::new();

/// Record whether self-signed certificates are accepted.
///
/// Only the first call has an effect; the policy cannot change once any
/// connection has been made.
pub fn init_tls_policy(allow_self_signed_certs: bool) {
    if ALLOW_SELF_SIGNED.set(allow_self_signed_certs).is_err() {
        tracing::debug!("TLS policy already initialised, ignoring");
    }
}

/// Whether self-signed certificates are accepted (default: no).
pub fn allow_self_signed_certs() -> bool {
    ALLOW_SELF_SIGNED.get().copied().unwrap_or(false)
}
