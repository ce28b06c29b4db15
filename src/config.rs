use anyhow::{Context, Result};
use url::Url;

/// How long a login session may sit before the sweeper reclaims it.
pub const SESSION_TTL_SECS: u64 = 300;
/// How long a registered upload stays retrievable before reclaim.
pub const UPLOAD_TTL_SECS: u64 = 300;
/// Fixed cadence of the background sweep tasks.
pub const SWEEP_INTERVAL_SECS: u64 = 60;

/// Endpoints and knobs for talking to the bridge authorization server.
///
/// Required fields are constructor parameters; optional overrides chain.
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    pub client_id: String,
    pub redirect_uri: Url,
    pub authorize_url: Url,
    pub token_url: Url,
    pub userinfo_url: Url,
    pub scopes: Vec<String>,
    pub session_ttl_secs: u64,
    pub upload_ttl_secs: u64,
    pub review_max_wait_secs: u64,
    pub review_interval_secs: u64,
}

impl BridgeConfig {
    /// Build a config against a bridge base URL; endpoints derive from it.
    pub fn new(client_id: impl Into<String>, base_url: &Url, redirect_uri: Url) -> Result<Self> {
        Ok(Self {
            client_id: client_id.into(),
            redirect_uri,
            authorize_url: base_url
                .join("oauth/authorize")
                .context("deriving authorize url")?,
            token_url: base_url.join("oauth/token").context("deriving token url")?,
            userinfo_url: base_url
                .join("oauth/userinfo")
                .context("deriving userinfo url")?,
            scopes: vec!["openid".into(), "profile".into()],
            session_ttl_secs: SESSION_TTL_SECS,
            upload_ttl_secs: UPLOAD_TTL_SECS,
            review_max_wait_secs: 120,
            review_interval_secs: 2,
        })
    }

    /// Read configuration from the environment with working defaults.
    pub fn from_env() -> Result<Self> {
        let client_id =
            std::env::var("BRIDGE_CLIENT_ID").unwrap_or_else(|_| "review-bridge".to_string());
        let base = std::env::var("BRIDGE_BASE_URL")
            .unwrap_or_else(|_| "https://bridge.example.com/".to_string());
        let base: Url = base.parse().context("parsing BRIDGE_BASE_URL")?;
        let redirect = std::env::var("BRIDGE_REDIRECT_URI")
            .unwrap_or_else(|_| "http://localhost:8085/callback".to_string());
        let redirect: Url = redirect.parse().context("parsing BRIDGE_REDIRECT_URI")?;
        Self::new(client_id, &base, redirect)
    }

    pub fn with_authorize_url(mut self, url: Url) -> Self {
        self.authorize_url = url;
        self
    }

    pub fn with_token_url(mut self, url: Url) -> Self {
        self.token_url = url;
        self
    }

    pub fn with_userinfo_url(mut self, url: Url) -> Self {
        self.userinfo_url = url;
        self
    }

    pub fn with_scopes(mut self, scopes: Vec<String>) -> Self {
        self.scopes = scopes;
        self
    }

    pub fn with_review_timing(mut self, max_wait_secs: u64, interval_secs: u64) -> Self {
        self.review_max_wait_secs = max_wait_secs;
        self.review_interval_secs = interval_secs;
        self
    }
}
