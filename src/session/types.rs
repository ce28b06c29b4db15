use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Coarse session status, one per `SessionState` variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Pending,
    BrowserPending,
    Completed,
    Error,
}

/// PKCE material held while an OAuth login is in flight.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingAuth {
    pub code_verifier: String,
    pub state: String,
    pub client_id: String,
    pub redirect_uri: String,
}

/// Vendor login token held while a human finishes the browser login.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrowserLogin {
    pub platform_url: String,
    pub login_token: String,
}

/// The OAuth half of a completed session. Refreshable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OAuthTokens {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    pub token_type: String,
    #[serde(default)]
    pub expires_in: Option<u64>,
}

/// The vendor half of a completed session. The sid is immutable for the
/// life of the session; token refresh never touches this set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VendorCredentials {
    pub sid: String,
    pub client_id: String,
    pub api_base_url: String,
    #[serde(default)]
    pub login_timeout_hours: Option<u64>,
    #[serde(default)]
    pub sid_created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub sid_expiry: Option<DateTime<Utc>>,
}

impl VendorCredentials {
    /// Unknown expiry counts as unexpired; the vendor enforces its own cutoff.
    pub fn sid_expired(&self, now: DateTime<Utc>) -> bool {
        self.sid_expiry.map(|at| at <= now).unwrap_or(false)
    }
}

/// Profile snapshot taken at login time. Informational only.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UserProfile {
    #[serde(default)]
    pub sub: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
}

/// Everything a finished login carries. Vendor set absent means the session
/// is OAuth-complete but cannot drive direct vendor calls.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletedSession {
    pub oauth: OAuthTokens,
    #[serde(default)]
    pub vendor: Option<VendorCredentials>,
    #[serde(default)]
    pub profile: Option<UserProfile>,
}

/// Tagged session state: each status exposes only the fields valid for it,
/// so tokens cannot be read off a session that has not completed.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SessionState {
    Pending(PendingAuth),
    BrowserPending(BrowserLogin),
    Completed(CompletedSession),
    Error { code: String, description: String },
}

impl SessionState {
    pub fn status(&self) -> SessionStatus {
        match self {
            SessionState::Pending(_) => SessionStatus::Pending,
            SessionState::BrowserPending(_) => SessionStatus::BrowserPending,
            SessionState::Completed(_) => SessionStatus::Completed,
            SessionState::Error { .. } => SessionStatus::Error,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub state: SessionState,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Session {
    pub fn status(&self) -> SessionStatus {
        self.state.status()
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at < now
    }

    pub fn pending_auth(&self) -> Option<&PendingAuth> {
        match &self.state {
            SessionState::Pending(p) => Some(p),
            _ => None,
        }
    }

    pub fn browser_login(&self) -> Option<&BrowserLogin> {
        match &self.state {
            SessionState::BrowserPending(b) => Some(b),
            _ => None,
        }
    }

    pub fn completed(&self) -> Option<&CompletedSession> {
        match &self.state {
            SessionState::Completed(c) => Some(c),
            _ => None,
        }
    }

    /// Forward transition into `Completed`. Only legal from `Pending` or
    /// `BrowserPending`; returns false without mutating otherwise.
    pub fn complete(&mut self, done: CompletedSession) -> bool {
        match self.state {
            SessionState::Pending(_) | SessionState::BrowserPending(_) => {
                self.state = SessionState::Completed(done);
                true
            }
            _ => false,
        }
    }

    /// Forward transition into `Error`, same legality as [`Session::complete`],
    /// except a completed session may still die terminally (expired sid).
    pub fn fail(&mut self, code: impl Into<String>, description: impl Into<String>) -> bool {
        match self.state {
            SessionState::Error { .. } => false,
            _ => {
                self.state = SessionState::Error {
                    code: code.into(),
                    description: description.into(),
                };
                true
            }
        }
    }

    /// Swap the OAuth token set after a successful refresh. The vendor set
    /// and profile are untouched; a missing reissued refresh token keeps the
    /// previous one.
    pub fn apply_refreshed_tokens(&mut self, fresh: OAuthTokens) -> bool {
        match &mut self.state {
            SessionState::Completed(done) => {
                let previous_refresh = done.oauth.refresh_token.take();
                done.oauth = OAuthTokens {
                    refresh_token: fresh.refresh_token.or(previous_refresh),
                    ..fresh
                };
                true
            }
            _ => false,
        }
    }

    /// Explicit lifetime extension; the only way `expires_at` moves.
    pub fn extend(&mut self, ttl: Duration) {
        self.expires_at = Utc::now() + ttl;
    }
}
