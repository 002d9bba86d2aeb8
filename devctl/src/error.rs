use common::CommonError;
use std::time::Duration;
use thiserror::Error;

pub type DevctlResult<T> = Result<T, DevctlError>;

#[derive(Error, Debug)]
pub enum DevctlError {
    #[error(
        "{url} not ready after {attempts} attempts in {:.1}s (last status: {})",
        .elapsed.as_secs_f64(),
        .last_status.map_or_else(|| "none".to_string(), |s| s.to_string())
    )]
    Timeout {
        url: String,
        attempts: u32,
        last_status: Option<u16>,
        elapsed: Duration,
    },

    #[error("Protocol check failed: {0}")]
    ProtocolCheckFailed(String),

    #[error("Route check failed: {0}")]
    RouteCheckFailed(String),

    #[error("Request failed: {0}")]
    Request(String),

    #[error("Invalid target: {0}")]
    InvalidTarget(String),

    #[error("Process error: {0}")]
    Process(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl DevctlError {
    /// Process exit code for this condition. 0 is reserved for success.
    pub fn exit_code(&self) -> u8 {
        match self {
            DevctlError::Timeout { .. } => 1,
            DevctlError::ProtocolCheckFailed(_) => 2,
            DevctlError::RouteCheckFailed(_) => 3,
            _ => 4,
        }
    }
}

impl From<reqwest::Error> for DevctlError {
    fn from(err: reqwest::Error) -> Self {
        DevctlError::Request(err.to_string())
    }
}

impl From<CommonError> for DevctlError {
    fn from(err: CommonError) -> Self {
        DevctlError::InvalidTarget(err.to_string())
    }
}

impl From<nix::Error> for DevctlError {
    fn from(err: nix::Error) -> Self {
        DevctlError::Process(format!("signal failed: {}", err))
    }
}
