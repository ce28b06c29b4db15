use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;
use tokio::task::JoinHandle;

use crate::auth::bearer::BearerResolver;
use crate::auth::exchange::{BrowserLoginStart, CallbackOutcome, CredentialExchange, LoginStart};
use crate::auth::oauth::BridgeClient;
use crate::auth::refresh::TokenRefreshPolicy;
use crate::config::BridgeConfig;
use crate::error::{ErrorCode, OpError};
use crate::jobs::review::{ReviewOptions, ReviewRunResult, ReviewWorkflow};
use crate::proxy::{ProxyInvoker, ProxyResponse};
use crate::session::store::SessionStore;
use crate::session::types::{SessionState, SessionStatus, UserProfile};
use crate::uploads::UploadLedger;
use crate::vendor::{ReviewCategory, VendorClient};

/// Status report for a session, safe to hand back over the wire: it never
/// carries tokens, only status and advisory metadata.
#[derive(Debug, Clone, Serialize)]
pub struct SessionStatusReport {
    pub session_id: String,
    pub status: SessionStatus,
    pub vendor_usable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sid_expiry: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub profile: Option<UserProfile>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_description: Option<String>,
}

/// Receipt for a registered upload.
#[derive(Debug, Clone, Serialize)]
pub struct UploadReceipt {
    pub upload_id: String,
    pub size: u64,
    pub expires_at: DateTime<Utc>,
}

/// The crate's entry-point surface: every inbound operation the outer
/// transport exposes routes through here. All methods catch internally and
/// return structured results; nothing panics or leaks raw errors past this
/// boundary.
#[derive(Debug, Clone)]
pub struct BridgeService {
    config: BridgeConfig,
    sessions: SessionStore,
    uploads: UploadLedger,
    exchange: CredentialExchange,
    bearer: BearerResolver,
    proxy: ProxyInvoker,
    review: ReviewWorkflow,
    vendor: VendorClient,
}

impl BridgeService {
    pub fn new(config: BridgeConfig) -> Self {
        let sessions = SessionStore::with_ttl(chrono::Duration::seconds(
            config.session_ttl_secs as i64,
        ));
        let uploads =
            UploadLedger::with_ttl(chrono::Duration::seconds(config.upload_ttl_secs as i64));
        let bridge = BridgeClient::new(config.clone());
        let vendor = VendorClient::new();
        let refresh = TokenRefreshPolicy::new(sessions.clone(), bridge.clone());

        Self {
            exchange: CredentialExchange::new(sessions.clone(), bridge.clone(), vendor.clone()),
            bearer: BearerResolver::new(sessions.clone(), bridge.clone()),
            proxy: ProxyInvoker::new(sessions.clone(), refresh),
            review: ReviewWorkflow::new(uploads.clone(), vendor.clone()),
            config,
            sessions,
            uploads,
            vendor,
        }
    }

    /// Start the background TTL sweepers. Call once at process startup.
    pub fn spawn_sweepers(&self) -> (JoinHandle<()>, JoinHandle<()>) {
        (
            crate::session::store::spawn_sweeper(self.sessions.clone()),
            crate::uploads::spawn_sweeper(self.uploads.clone()),
        )
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    pub fn uploads(&self) -> &UploadLedger {
        &self.uploads
    }

    // --- login operations -------------------------------------------------

    pub async fn login(&self, platform_hint: Option<&str>) -> LoginStart {
        self.exchange.login(platform_hint).await
    }

    pub async fn oauth_callback(
        &self,
        code: Option<&str>,
        state: Option<&str>,
        provider_error: Option<(&str, Option<&str>)>,
    ) -> CallbackOutcome {
        self.exchange.callback(code, state, provider_error).await
    }

    pub async fn browser_login(&self, platform_url: &str) -> Result<BrowserLoginStart, OpError> {
        self.exchange.start_browser_login(platform_url).await
    }

    pub async fn browser_login_complete(&self, session_id: &str) -> Result<String, OpError> {
        self.exchange.complete_browser_login(session_id).await
    }

    // --- status-check ------------------------------------------------------

    pub async fn session_status(&self, session_id: &str) -> Result<SessionStatusReport, OpError> {
        let session = self
            .sessions
            .get(session_id)
            .await
            .ok_or_else(|| OpError::new(ErrorCode::InvalidSession, "unknown session id"))?;

        let mut report = SessionStatusReport {
            session_id: session.id.clone(),
            status: session.status(),
            vendor_usable: false,
            sid_expiry: None,
            profile: None,
            error_code: None,
            error_description: None,
        };
        match &session.state {
            SessionState::Completed(done) => {
                report.vendor_usable = done.vendor.is_some();
                report.sid_expiry = done.vendor.as_ref().and_then(|v| v.sid_expiry);
                report.profile = done.profile.clone();
            }
            SessionState::Error { code, description } => {
                report.error_code = Some(code.clone());
                report.error_description = Some(description.clone());
            }
            _ => {}
        }
        Ok(report)
    }

    // --- authenticated-call -----------------------------------------------

    pub async fn authenticated_call(
        &self,
        authorization: &str,
        method: &str,
        path: &str,
        body: Option<Value>,
        headers: Option<HashMap<String, String>>,
    ) -> Result<ProxyResponse, OpError> {
        let session = self.resolve(authorization).await?;
        self.proxy.call(&session, method, path, body, headers).await
    }

    // --- upload ------------------------------------------------------------

    pub async fn register_upload(
        &self,
        filename: &str,
        bytes: Vec<u8>,
    ) -> Result<UploadReceipt, OpError> {
        let size = bytes.len() as u64;
        let upload_id = self.uploads.register(filename, bytes).await;
        let expires_at = self
            .uploads
            .get(&upload_id)
            .await
            .map(|f| f.expires_at)
            .ok_or_else(|| OpError::server("upload vanished immediately after registration"))?;
        Ok(UploadReceipt {
            upload_id,
            size,
            expires_at,
        })
    }

    // --- review-run ---------------------------------------------------------

    pub async fn run_review(
        &self,
        authorization: &str,
        upload_id: &str,
        categories: Vec<String>,
    ) -> Result<ReviewRunResult, OpError> {
        let session = self.resolve(authorization).await?;
        let opts = ReviewOptions {
            categories,
            max_wait: Duration::from_secs(self.config.review_max_wait_secs),
            interval: Duration::from_secs(self.config.review_interval_secs),
        };
        self.review.run(&session, upload_id, opts).await
    }

    // --- filter-lookup ------------------------------------------------------

    pub async fn list_review_categories(
        &self,
        authorization: &str,
    ) -> Result<Vec<ReviewCategory>, OpError> {
        let session = self.resolve(authorization).await?;
        let vendor = session
            .completed()
            .and_then(|c| c.vendor.clone())
            .ok_or_else(|| {
                OpError::new(
                    ErrorCode::InvalidSession,
                    "session carries no vendor credentials",
                )
            })?;
        let base = vendor.api_base_url.trim_end_matches('/').to_string();
        self.vendor
            .list_categories(&base, &vendor.sid)
            .await
            .map_err(OpError::from)
    }

    async fn resolve(&self, authorization: &str) -> Result<crate::session::types::Session, OpError> {
        self.bearer
            .find_or_create(authorization)
            .await
            .ok_or_else(|| {
                OpError::new(
                    ErrorCode::InvalidSession,
                    "bearer token matches no usable session",
                )
            })
    }
}
