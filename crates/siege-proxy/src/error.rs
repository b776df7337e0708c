use std::time::Duration;

use hyper::StatusCode;
use thiserror::Error;

pub type Result<T, E = ProxyError> = std::result::Result<T, E>;

/// Top level error type for the proxy.
///
/// Every variant past startup is scoped to a single inbound request and is
/// turned into a local error response by [`ProxyError::status`] and
/// [`ProxyError::diagnostic`].
#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("bind or socket error: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to build upstream client: {0}")]
    Client(#[source] reqwest::Error),
    #[error("failed to read request: {0}")]
    ReadBody(String),
    #[error("failed to parse request: {0}")]
    ParseEnvelope(#[from] serde_json::Error),
    #[error("failed to complete upstream request: {0}")]
    UpstreamRequest(#[source] reqwest::Error),
    #[error(transparent)]
    Verification(#[from] VerificationError),
}

/// Reasons a verifier run rejects the block.
#[derive(Debug, Error)]
pub enum VerificationError {
    #[error("failed to start verifier: {0}")]
    FailedToStart(#[source] std::io::Error),
    #[error("verifier exited with code {0}")]
    ExitCode(i32),
    #[error("failed to wait for verifier: {0}")]
    FailedToComplete(#[source] std::io::Error),
    #[error("verifier timed out after {}s", .0.as_secs())]
    TimedOut(Duration),
}

impl ProxyError {
    /// HTTP status returned to the caller for this failure.
    pub fn status(&self) -> StatusCode {
        match self {
            ProxyError::ReadBody(_) | ProxyError::ParseEnvelope(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Short plain-text body returned to the caller. Internal error details
    /// stay in the logs.
    pub fn diagnostic(&self) -> String {
        match self {
            ProxyError::ReadBody(_) => "failed to read request".to_string(),
            ProxyError::ParseEnvelope(_) => "failed to parse request".to_string(),
            ProxyError::UpstreamRequest(_) => "failed to complete upstream request".to_string(),
            ProxyError::Verification(VerificationError::FailedToStart(_)) => {
                "failed to start verifier".to_string()
            }
            ProxyError::Verification(VerificationError::FailedToComplete(_)) => {
                "failed to wait for verifier".to_string()
            }
            ProxyError::Verification(err) => err.to_string(),
            _ => "internal proxy error".to_string(),
        }
    }

    /// Label used for the local error counter.
    pub fn kind(&self) -> &'static str {
        match self {
            ProxyError::ReadBody(_) => "read_body",
            ProxyError::ParseEnvelope(_) => "parse_envelope",
            ProxyError::UpstreamRequest(_) => "upstream",
            ProxyError::Verification(_) => "verification",
            _ => "internal",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        let parse = serde_json::from_slice::<serde_json::Value>(b"{").unwrap_err();
        assert_eq!(
            ProxyError::ParseEnvelope(parse).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ProxyError::ReadBody("closed".into()).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ProxyError::Verification(VerificationError::ExitCode(7)).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_exit_code_in_diagnostic() {
        let err = ProxyError::Verification(VerificationError::ExitCode(7));
        assert_eq!(err.diagnostic(), "verifier exited with code 7");
    }

    #[test]
    fn test_diagnostic_hides_io_details() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "/opt/verifier missing");
        let err = ProxyError::Verification(VerificationError::FailedToStart(io));
        assert_eq!(err.diagnostic(), "failed to start verifier");
        assert!(err.to_string().contains("/opt/verifier missing"));
    }

    #[test]
    fn test_timeout_diagnostic() {
        let err = ProxyError::Verification(VerificationError::TimedOut(Duration::from_secs(30)));
        assert_eq!(err.diagnostic(), "verifier timed out after 30s");
    }
}
