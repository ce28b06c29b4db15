use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable result codes carried across every entry point.
///
/// Callers branch on these to decide retry vs. re-login vs. surface-to-user.
/// The terminal/transient split is the load-bearing contract: terminal codes
/// must never be retried automatically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// Unknown or expired session id.
    InvalidSession,
    /// OAuth callback state missing or matching no pending session.
    InvalidState,
    /// Bridge token endpoint rejected the authorization code.
    TokenExchangeFailed,
    /// Vendor sid dead or refresh exhausted. Terminal: re-login from scratch.
    SessionExpired,
    /// 401 unresolved after the single refresh attempt.
    AuthenticationFailed,
    /// Browser login not finished yet; call `complete` again later.
    InfoRetrievalFailed,
    /// Upload ledger miss: expired or already consumed id.
    UploadNotFound,
    /// Poll exceeded its wait budget. Non-fatal, resumable out-of-band.
    JobTimeout,
    /// The remote job itself reported failure.
    JobFailed,
    /// Unexpected internal failure.
    ServerError,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::InvalidSession => "invalid_session",
            ErrorCode::InvalidState => "invalid_state",
            ErrorCode::TokenExchangeFailed => "token_exchange_failed",
            ErrorCode::SessionExpired => "session_expired",
            ErrorCode::AuthenticationFailed => "authentication_failed",
            ErrorCode::InfoRetrievalFailed => "info_retrieval_failed",
            ErrorCode::UploadNotFound => "upload_not_found",
            ErrorCode::JobTimeout => "job_timeout",
            ErrorCode::JobFailed => "job_failed",
            ErrorCode::ServerError => "server_error",
        }
    }

    /// Terminal codes require an externally re-initiated flow; nothing in
    /// this crate retries past them.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ErrorCode::SessionExpired | ErrorCode::JobFailed)
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured boundary error: a taxonomy code plus a human-readable detail.
#[derive(Debug, Clone, thiserror::Error, Serialize)]
#[error("{code}: {description}")]
pub struct OpError {
    pub code: ErrorCode,
    pub description: String,
}

impl OpError {
    pub fn new(code: ErrorCode, description: impl Into<String>) -> Self {
        Self {
            code,
            description: description.into(),
        }
    }

    pub fn server(description: impl fmt::Display) -> Self {
        Self::new(ErrorCode::ServerError, description.to_string())
    }
}

impl From<anyhow::Error> for OpError {
    fn from(err: anyhow::Error) -> Self {
        OpError::server(format!("{err:#}"))
    }
}

impl From<reqwest::Error> for OpError {
    fn from(err: reqwest::Error) -> Self {
        OpError::server(err)
    }
}
