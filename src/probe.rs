//! SSH jump-host connectivity probe.
//!
//! Logs in to the gateway with the caller's password and/or private key and
//! reports the server's SSH identification line on success. The gateway
//! host key is not verified.

use std::io;
use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError};
use std::task::{Context, Poll};
use std::time::Duration;

use russh::client;
use russh::keys::{decode_secret_key, PrivateKey, PrivateKeyWithHashAlg, PublicKeyOrCertificate};
use russh::Disconnect;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

use crate::config::ProbeConfig;
use crate::proto;

/// Upper bound on bytes kept while looking for the identification line.
const MAX_IDENTIFICATION_BYTES: usize = 8192;

/// Gateway connection details supplied by the caller.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProbeTarget {
    /// Gateway host name or address.
    pub address: String,
    /// Login user.
    pub username: String,
    /// Login password.
    pub password: Option<String>,
    /// PEM-encoded private key.
    pub private_key: Option<String>,
}

impl From<proto::SshGateway> for ProbeTarget {
    fn from(gw: proto::SshGateway) -> Self {
        Self {
            address: gw.gateway_ip,
            username: gw.gateway_username,
            password: crate::models::non_empty(gw.gateway_password),
            private_key: crate::models::non_empty(gw.gateway_private_key),
        }
    }
}

/// Outcome of a probe; failures are results too, not errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeReport {
    /// Whether the gateway accepted the supplied credentials.
    pub can_connect: bool,
    /// The server identification line, or why the probe failed.
    pub result: String,
}

impl ProbeReport {
    fn failed(reason: impl Into<String>) -> Self {
        Self {
            can_connect: false,
            result: reason.into(),
        }
    }
}

impl From<ProbeReport> for proto::SshGatewayTestResponse {
    fn from(report: ProbeReport) -> Self {
        Self {
            ssh_test_result: report.result,
            ssh_can_connect: report.can_connect,
        }
    }
}

/// Probes SSH gateways.
#[derive(Debug, Clone)]
pub struct GatewayProber {
    port: u16,
    timeout: Duration,
}

impl GatewayProber {
    /// Create a prober from configuration.
    #[must_use]
    pub fn new(config: &ProbeConfig) -> Self {
        Self {
            port: config.port,
            timeout: Duration::from_secs(config.timeout_seconds),
        }
    }

    /// Probe `target`.
    pub async fn probe(&self, target: &ProbeTarget) -> ProbeReport {
        let login = match Login::from_target(target) {
            Ok(login) => login,
            Err(reason) => {
                warn!(address = %target.address, reason, "gateway probe rejected");
                return ProbeReport::failed(reason);
            }
        };

        let address = target.address.trim();
        let attempt =
            tokio::time::timeout(self.timeout, self.log_in(address, &login)).await;
        let report = match attempt {
            Ok(Ok(version)) => ProbeReport {
                can_connect: true,
                result: version,
            },
            Ok(Err(reason)) => ProbeReport::failed(reason),
            Err(_elapsed) => ProbeReport::failed(format!(
                "timed out after {}s connecting to {address}:{}",
                self.timeout.as_secs(),
                self.port
            )),
        };

        info!(
            address,
            port = self.port,
            can_connect = report.can_connect,
            result = %report.result,
            "gateway probe finished"
        );
        report
    }

    async fn log_in(&self, address: &str, login: &Login) -> Result<String, String> {
        let port = self.port;
        let stream = TcpStream::connect((address, port))
            .await
            .map_err(|err| format!("failed to connect to {address}:{port}: {err}"))?;

        let seen = Arc::new(Mutex::new(Vec::new()));
        let tap = IdentificationTap {
            inner: stream,
            seen: Arc::clone(&seen),
        };
        let config = Arc::new(client::Config {
            inactivity_timeout: Some(self.timeout),
            ..client::Config::default()
        });
        let mut session = client::connect_stream(config, tap, AnyHostKey)
            .await
            .map_err(|err| format!("ssh: handshake with {address}:{port} failed: {err}"))?;

        let (authenticated, attempted) = login.authenticate(&mut session).await?;
        if let Err(err) = session
            .disconnect(Disconnect::ByApplication, "", "en")
            .await
        {
            debug!(%err, "gateway disconnect failed");
        }

        if !authenticated {
            return Err(format!(
                "ssh: unable to authenticate as {} on {address}:{port}, attempted methods [{}]",
                login.username,
                attempted.join(" ")
            ));
        }

        let seen = seen.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(identification_line(&seen).unwrap_or_else(|| "SSH server".to_owned()))
    }
}

/// Credentials checked and decoded before any connection is made.
struct Login {
    username: String,
    password: Option<String>,
    key: Option<Arc<PrivateKey>>,
}

impl Login {
    fn from_target(target: &ProbeTarget) -> Result<Self, String> {
        if target.address.trim().is_empty() {
            return Err("gateway address is required".into());
        }
        if target.username.trim().is_empty() {
            return Err("gateway username is required".into());
        }
        if target.password.is_none() && target.private_key.is_none() {
            return Err(
                "no authentication method supplied: password or private key required".into(),
            );
        }
        let key = target
            .private_key
            .as_deref()
            .map(|pem| {
                decode_secret_key(pem, None)
                    .map(Arc::new)
                    .map_err(|err| format!("ssh: no key found in supplied private key: {err}"))
            })
            .transpose()?;

        Ok(Self {
            username: target.username.clone(),
            password: target.password.clone(),
            key,
        })
    }

    /// Try password first, then the key; stops at the first success.
    async fn authenticate(
        &self,
        session: &mut client::Handle<AnyHostKey>,
    ) -> Result<(bool, Vec<&'static str>), String> {
        let mut attempted = Vec::new();

        if let Some(password) = &self.password {
            attempted.push("password");
            let result = session
                .authenticate_password(self.username.as_str(), password.as_str())
                .await
                .map_err(|err| format!("ssh: password authentication failed: {err}"))?;
            if result.success() {
                return Ok((true, attempted));
            }
        }

        if let Some(key) = &self.key {
            attempted.push("publickey");
            let hash = if key.algorithm().is_rsa() {
                session
                    .best_supported_rsa_hash()
                    .await
                    .map_err(|err| format!("ssh: public key negotiation failed: {err}"))?
                    .flatten()
            } else {
                None
            };
            let result = session
                .authenticate_publickey(
                    self.username.as_str(),
                    PrivateKeyWithHashAlg::new(Arc::clone(key), hash),
                )
                .await
                .map_err(|err| format!("ssh: public key authentication failed: {err}"))?;
            if result.success() {
                return Ok((true, attempted));
            }
        }

        Ok((false, attempted))
    }
}

struct AnyHostKey;

impl client::Handler for AnyHostKey {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        _server_public_key: &PublicKeyOrCertificate,
    ) -> Result<bool, Self::Error> {
        Ok(true)
    }
}

/// Passes the connection through, keeping the first bytes the server sends.
struct IdentificationTap {
    inner: TcpStream,
    seen: Arc<Mutex<Vec<u8>>>,
}

impl IdentificationTap {
    fn record(&self, bytes: &[u8]) {
        let mut seen = self.seen.lock().unwrap_or_else(PoisonError::into_inner);
        let room = MAX_IDENTIFICATION_BYTES.saturating_sub(seen.len());
        seen.extend_from_slice(&bytes[..bytes.len().min(room)]);
    }
}

impl AsyncRead for IdentificationTap {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let before = buf.filled().len();
        let polled = Pin::new(&mut self.inner).poll_read(cx, buf);
        if matches!(polled, Poll::Ready(Ok(()))) {
            self.record(&buf.filled()[before..]);
        }
        polled
    }
}

impl AsyncWrite for IdentificationTap {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.inner).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }
}

/// First line starting with `SSH-`; servers may send other lines before it.
fn identification_line(received: &[u8]) -> Option<String> {
    received
        .split(|&b| b == b'\n')
        .map(|line| String::from_utf8_lossy(line).trim_end_matches('\r').to_owned())
        .find(|line| line.starts_with("SSH-"))
}
