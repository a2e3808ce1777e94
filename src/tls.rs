//! Mutual-TLS material.

use std::path::Path;

use tonic::transport::{Certificate, ClientTlsConfig, Identity, ServerTlsConfig};

use crate::config::TlsConfig;
use crate::{AppError, Result};

/// Build the server TLS configuration, requiring client certificates.
///
/// # Errors
///
/// Returns `AppError::Tls` if any file is missing or is not PEM.
pub async fn load_server_tls(config: &TlsConfig) -> Result<ServerTlsConfig> {
    let cert = read_pem("server certificate", &config.cert_file).await?;
    let key = read_pem("server private key", &config.key_file).await?;
    let ca = read_pem("CA certificate", &config.ca_cert_file).await?;

    Ok(ServerTlsConfig::new()
        .identity(Identity::from_pem(cert, key))
        .client_ca_root(Certificate::from_pem(ca)))
}

/// Build a client TLS configuration presenting `cert`/`key` and trusting `ca`.
///
/// # Errors
///
/// Returns `AppError::Tls` if any file is missing or is not PEM.
pub async fn load_client_tls(
    cert_file: &Path,
    key_file: &Path,
    ca_file: &Path,
    domain: &str,
) -> Result<ClientTlsConfig> {
    let cert = read_pem("client certificate", cert_file).await?;
    let key = read_pem("client private key", key_file).await?;
    let ca = read_pem("CA certificate", ca_file).await?;

    Ok(ClientTlsConfig::new()
        .domain_name(domain)
        .identity(Identity::from_pem(cert, key))
        .ca_certificate(Certificate::from_pem(ca)))
}

async fn read_pem(what: &str, path: &Path) -> Result<Vec<u8>> {
    let bytes = tokio::fs::read(path).await.map_err(|err| {
        AppError::Tls(format!("failed to load {what} {}: {err}", path.display()))
    })?;
    if !bytes.windows(11).any(|w| w == b"-----BEGIN ") {
        return Err(AppError::Tls(format!(
            "{what} {} is not PEM encoded",
            path.display()
        )));
    }
    Ok(bytes)
}
