// ABOUTME: PostgreSQL connection setup with native TLS
// ABOUTME: Spawns the connection driver task and maps failures to connection errors

use postgres_native_tls::MakeTlsConnector;
use tokio_postgres::Client;

use crate::error::{EtlError, Result};
use crate::utils::{strip_password_from_url, validate_connection_string};

/// Connect to PostgreSQL
///
/// TLS is negotiated according to the URL's `sslmode` (default `prefer`).
/// Certificate checks are relaxed only when the process-wide policy allows
/// self-signed certificates.
///
/// # Errors
///
/// Returns [`EtlError::Validation`] for a malformed URL and
/// [`EtlError::Connection`] if the server cannot be reached.
pub async fn connect(url: &str) -> Result<Client> {
    validate_connection_string(url)?;

    let mut builder = native_tls::TlsConnector::builder();
    if crate::tls::allow_self_signed_certs() {
        builder.danger_accept_invalid_certs(true);
        builder.danger_accept_invalid_hostnames(true);
    }
    let connector = builder
        .build()
        .map_err(|e| EtlError::Connection(format!("failed to build TLS connector: {}", e)))?;
    let tls = MakeTlsConnector::new(connector);

    let (client, connection) = tokio_postgres::connect(url, tls).await.map_err(|e| {
        EtlError::Connection(format!(
            "failed to connect to {}: {}",
            strip_password_from_url(url),
            e
        ))
    })?;

    tokio::spawn(async move {
        if let Err(e) = connection.await {
            tracing::error!("PostgreSQL connection error: {}", e);
        }
    });

    tracing::debug!("Connected to {}", strip_password_from_url(url));
    Ok(client)
}
