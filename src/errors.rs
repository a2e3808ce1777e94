//! Error types shared across the application.

use std::fmt::{Display, Formatter};

use tonic::{Code, Status};

use crate::identity::AgentIdentity;

/// Shared application result type.
pub type Result<T> = std::result::Result<T, AppError>;

/// Application error enumeration covering all domain failure modes.
#[derive(Debug)]
pub enum AppError {
    /// Configuration parsing or validation failure.
    Config(String),
    /// Inbound scan request is malformed or incomplete.
    InvalidArgument(String),
    /// The engine job description could not be generated.
    JobFile(String),
    /// The engine process could not be started.
    Launch(String),
    /// The engine finished without producing a result directory.
    NoResults(String),
    /// The engine was killed because it exceeded the job deadline.
    DeadlineExceeded(String),
    /// Result directory walk, artifact read, or artifact streaming failure.
    Collect(String),
    /// The admission policy rejected the request.
    Rejected(String),
    /// Transport security material could not be loaded.
    Tls(String),
    /// RPC transport failure (listener, client channel).
    Transport(String),
    /// File-system or I/O operation failure.
    Io(String),
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "config: {msg}"),
            Self::InvalidArgument(msg) => write!(f, "invalid argument: {msg}"),
            Self::JobFile(msg) => write!(f, "job file: {msg}"),
            Self::Launch(msg) => write!(f, "launch: {msg}"),
            Self::NoResults(msg) => write!(f, "no results: {msg}"),
            Self::DeadlineExceeded(msg) => write!(f, "deadline exceeded: {msg}"),
            Self::Collect(msg) => write!(f, "collect: {msg}"),
            Self::Rejected(msg) => write!(f, "rejected: {msg}"),
            Self::Tls(msg) => write!(f, "tls: {msg}"),
            Self::Transport(msg) => write!(f, "transport: {msg}"),
            Self::Io(msg) => write!(f, "io: {msg}"),
        }
    }
}

impl std::error::Error for AppError {}

impl AppError {
    /// RPC status code this error is reported with.
    ///
    /// Input and job-file problems are the caller's fault; admission
    /// rejections are resource exhaustion; everything that happens once the
    /// engine is involved is internal.
    #[must_use]
    pub fn code(&self) -> Code {
        match self {
            Self::InvalidArgument(_) | Self::JobFile(_) => Code::InvalidArgument,
            Self::Rejected(_) => Code::ResourceExhausted,
            Self::Config(_)
            | Self::Launch(_)
            | Self::NoResults(_)
            | Self::DeadlineExceeded(_)
            | Self::Collect(_)
            | Self::Tls(_)
            | Self::Transport(_)
            | Self::Io(_) => Code::Internal,
        }
    }

    /// Convert into a terminal RPC status attributed to this agent.
    #[must_use]
    pub fn into_status(self, identity: &AgentIdentity) -> Status {
        Status::new(self.code(), format!("agent {} - {self}", identity.hostname()))
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(format!("invalid config: {err}"))
    }
}

impl From<tonic::transport::Error> for AppError {
    fn from(err: tonic::transport::Error) -> Self {
        Self::Transport(err.to_string())
    }
}
