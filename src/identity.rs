//! Process-wide agent identity.
//!
//! The hostname stamps every report and every terminal error so a fleet of
//! agents can attribute failures. It is resolved once at startup and passed
//! by value into the components that need it.

use std::fmt::{Display, Formatter};
use std::sync::Arc;

use crate::{AppError, Result};

/// Immutable identity of this agent instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentIdentity {
    hostname: Arc<str>,
}

impl AgentIdentity {
    /// Build an identity from an explicit hostname.
    #[must_use]
    pub fn new(hostname: impl Into<Arc<str>>) -> Self {
        Self {
            hostname: hostname.into(),
        }
    }

    /// Resolve the local hostname.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the hostname cannot be read or is not
    /// valid UTF-8.
    pub fn resolve() -> Result<Self> {
        let hostname = local_hostname()?;
        if hostname.trim().is_empty() {
            return Err(AppError::Config("local hostname is empty".into()));
        }
        Ok(Self::new(hostname))
    }

    /// Hostname reported to callers.
    #[must_use]
    pub fn hostname(&self) -> &str {
        &self.hostname
    }
}

impl Display for AgentIdentity {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.hostname)
    }
}

#[cfg(unix)]
fn local_hostname() -> Result<String> {
    nix::unistd::gethostname()
        .map_err(|err| AppError::Config(format!("failed to read hostname: {err}")))?
        .into_string()
        .map_err(|_| AppError::Config("hostname is not valid UTF-8".into()))
}

#[cfg(not(unix))]
fn local_hostname() -> Result<String> {
    sysinfo::System::host_name()
        .ok_or_else(|| AppError::Config("failed to read hostname".into()))
}
