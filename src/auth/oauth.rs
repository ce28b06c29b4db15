use chrono::{DateTime, TimeZone, Utc};
use serde::Deserialize;
use tracing::debug;

use crate::config::BridgeConfig;
use crate::session::types::{UserProfile, VendorCredentials};

/// Failure talking to the bridge authorization server.
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error("bridge rejected request ({status}): {error:?} {error_description:?}")]
    Rejected {
        status: u16,
        error: Option<String>,
        error_description: Option<String>,
    },
    #[error("bridge transport error: {0}")]
    Http(#[from] reqwest::Error),
}

impl BridgeError {
    /// True when the bridge signals that the vendor session behind this
    /// token set is dead for good: the refresh grant is `invalid_grant`, or
    /// the bridge names the expiry/ceiling explicitly.
    pub fn is_session_expired(&self) -> bool {
        match self {
            BridgeError::Rejected { error: Some(e), .. } => {
                matches!(e.as_str(), "invalid_grant" | "session_expired" | "refresh_exhausted")
            }
            _ => false,
        }
    }
}

/// Vendor credential fields the bridge embeds in token and userinfo
/// responses. A non-standard extension this core depends on: without these
/// a session is OAuth-complete but cannot drive direct vendor calls.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct VendorFields {
    #[serde(default)]
    pub sid: Option<String>,
    #[serde(default)]
    pub vendor_client_id: Option<String>,
    #[serde(default)]
    pub api_base_url: Option<String>,
    #[serde(default)]
    pub login_timeout_hours: Option<u64>,
    #[serde(default)]
    pub sid_created_at: Option<i64>,
    #[serde(default)]
    pub sid_expiry: Option<i64>,
}

impl VendorFields {
    /// Build the vendor credential set when the mandatory fields are all
    /// present. Expiry prefers the explicit epoch; otherwise it derives from
    /// creation time plus the login timeout.
    pub fn into_credentials(self) -> Option<VendorCredentials> {
        let sid = self.sid?;
        let client_id = self.vendor_client_id?;
        let api_base_url = self.api_base_url?;

        let created_at = self
            .sid_created_at
            .and_then(|secs| Utc.timestamp_opt(secs, 0).single());
        let expiry = self
            .sid_expiry
            .and_then(|secs| Utc.timestamp_opt(secs, 0).single())
            .or_else(|| derive_expiry(created_at, self.login_timeout_hours));

        Some(VendorCredentials {
            sid,
            client_id,
            api_base_url,
            login_timeout_hours: self.login_timeout_hours,
            sid_created_at: created_at,
            sid_expiry: expiry,
        })
    }
}

pub(crate) fn derive_expiry(
    created_at: Option<DateTime<Utc>>,
    timeout_hours: Option<u64>,
) -> Option<DateTime<Utc>> {
    let created = created_at?;
    let hours = timeout_hours?;
    Some(created + chrono::Duration::seconds(hours as i64 * 3600))
}

#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub token_type: String,
    #[serde(default)]
    pub expires_in: Option<u64>,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(flatten)]
    pub vendor: VendorFields,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UserInfoResponse {
    #[serde(default)]
    pub sub: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(flatten)]
    pub vendor: VendorFields,
}

impl UserInfoResponse {
    pub fn profile(&self) -> UserProfile {
        UserProfile {
            sub: self.sub.clone(),
            name: self.name.clone(),
            email: self.email.clone(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct OAuthErrorBody {
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    error_description: Option<String>,
}

/// HTTP client for the bridge's `authorize`/`token`/`userinfo` endpoints.
#[derive(Debug, Clone)]
pub struct BridgeClient {
    config: BridgeConfig,
    http: reqwest::Client,
}

impl BridgeClient {
    pub fn new(config: BridgeConfig) -> Self {
        Self {
            config,
            http: reqwest::Client::new(),
        }
    }

    pub fn with_http_client(mut self, client: reqwest::Client) -> Self {
        self.http = client;
        self
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    /// Build the authorization URL; no network call happens here.
    pub fn authorization_url(
        &self,
        code_challenge: &str,
        state: &str,
        platform_hint: Option<&str>,
    ) -> String {
        let scope = self.config.scopes.join(" ");
        let mut url = self.config.authorize_url.clone();
        {
            let mut pairs = url.query_pairs_mut();
            pairs
                .append_pair("response_type", "code")
                .append_pair("client_id", &self.config.client_id)
                .append_pair("redirect_uri", self.config.redirect_uri.as_str())
                .append_pair("state", state)
                .append_pair("code_challenge", code_challenge)
                .append_pair("code_challenge_method", "S256")
                .append_pair("scope", &scope);
            if let Some(platform) = platform_hint {
                pairs.append_pair("platform", platform);
            }
        }
        url.into()
    }

    /// Exchange an authorization code plus PKCE verifier for tokens.
    pub async fn exchange_code(
        &self,
        code: &str,
        code_verifier: &str,
    ) -> Result<TokenResponse, BridgeError> {
        let params = [
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", self.config.redirect_uri.as_str()),
            ("client_id", self.config.client_id.as_str()),
            ("code_verifier", code_verifier),
        ];
        let response = self
            .http
            .post(self.config.token_url.clone())
            .form(&params)
            .send()
            .await?;
        let response = Self::ensure_success(response).await?;
        Ok(response.json::<TokenResponse>().await?)
    }

    /// Post a refresh-token grant.
    pub async fn refresh_token(&self, refresh_token: &str) -> Result<TokenResponse, BridgeError> {
        let params = [
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
            ("client_id", self.config.client_id.as_str()),
        ];
        let response = self
            .http
            .post(self.config.token_url.clone())
            .form(&params)
            .send()
            .await?;
        let response = Self::ensure_success(response).await?;
        Ok(response.json::<TokenResponse>().await?)
    }

    /// Validate a bearer token and fetch the profile (plus any embedded
    /// vendor fields).
    pub async fn userinfo(&self, access_token: &str) -> Result<UserInfoResponse, BridgeError> {
        let response = self
            .http
            .get(self.config.userinfo_url.clone())
            .bearer_auth(access_token)
            .send()
            .await?;
        let response = Self::ensure_success(response).await?;
        Ok(response.json::<UserInfoResponse>().await?)
    }

    async fn ensure_success(response: reqwest::Response) -> Result<reqwest::Response, BridgeError> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        let parsed: OAuthErrorBody = serde_json::from_str(&body).unwrap_or_default();
        debug!(status, error = ?parsed.error, "bridge rejected request");
        Err(BridgeError::Rejected {
            status,
            error: parsed.error,
            error_description: parsed.error_description,
        })
    }
}
