use reqwest::Method;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::str::FromStr;
use tracing::{debug, warn};

use crate::auth::refresh::{RefreshOutcome, TokenRefreshPolicy};
use crate::error::{ErrorCode, OpError};
use crate::session::store::SessionStore;
use crate::session::types::Session;

/// Result of a proxied vendor call. Non-2xx statuses other than the
/// refresh-worthy 401 come back here too, with `success = false`.
#[derive(Debug, Clone, Serialize)]
pub struct ProxyResponse {
    pub success: bool,
    pub status: u16,
    pub data: Value,
}

/// Executes one vendor call with a session's credentials. On 401 it runs
/// exactly one token refresh and, if that succeeds, one retry; the budget
/// is hard-capped so a dead session cannot loop.
#[derive(Debug, Clone)]
pub struct ProxyInvoker {
    http: reqwest::Client,
    store: SessionStore,
    refresh: TokenRefreshPolicy,
}

impl ProxyInvoker {
    pub fn new(store: SessionStore, refresh: TokenRefreshPolicy) -> Self {
        Self {
            http: reqwest::Client::new(),
            store,
            refresh,
        }
    }

    pub fn with_http_client(mut self, client: reqwest::Client) -> Self {
        self.http = client;
        self
    }

    pub async fn call(
        &self,
        session: &Session,
        method: &str,
        path: &str,
        body: Option<Value>,
        headers: Option<HashMap<String, String>>,
    ) -> Result<ProxyResponse, OpError> {
        let completed = session
            .completed()
            .ok_or_else(|| OpError::new(ErrorCode::InvalidSession, "session is not completed"))?;
        let vendor = completed.vendor.as_ref().ok_or_else(|| {
            OpError::new(
                ErrorCode::InvalidSession,
                "session carries no vendor credentials",
            )
        })?;

        let method = Method::from_str(&method.to_uppercase())
            .map_err(|_| OpError::server(format!("invalid http method: {method}")))?;
        let base = vendor.api_base_url.trim_end_matches('/').to_string();
        let sid = vendor.sid.clone();

        let first = self
            .attempt(
                &method,
                &base,
                path,
                &completed.oauth.access_token,
                &sid,
                body.as_ref(),
                headers.as_ref(),
            )
            .await?;

        if first.status().as_u16() != 401 {
            return Self::into_response(first).await;
        }
        debug!(session_id = %session.id, path, "vendor call returned 401; refreshing once");

        match self.refresh.refresh(&session.id).await {
            RefreshOutcome::Refreshed => {}
            RefreshOutcome::Expired => {
                return Err(OpError::new(
                    ErrorCode::SessionExpired,
                    "vendor session expired; re-authentication required",
                ));
            }
            RefreshOutcome::Transient => {
                return Err(OpError::new(
                    ErrorCode::AuthenticationFailed,
                    "401 unresolved: token refresh failed",
                ));
            }
        }

        // Re-read the session to pick up the swapped access token.
        let refreshed = self
            .store
            .get(&session.id)
            .await
            .and_then(|s| s.completed().map(|c| c.oauth.access_token.clone()))
            .ok_or_else(|| {
                OpError::new(ErrorCode::AuthenticationFailed, "session lost during refresh")
            })?;

        let second = self
            .attempt(
                &method,
                &base,
                path,
                &refreshed,
                &sid,
                body.as_ref(),
                headers.as_ref(),
            )
            .await?;
        if second.status().as_u16() == 401 {
            warn!(session_id = %session.id, path, "401 persisted after refresh");
            return Err(OpError::new(
                ErrorCode::AuthenticationFailed,
                "401 unresolved after token refresh",
            ));
        }
        Self::into_response(second).await
    }

    #[allow(clippy::too_many_arguments)]
    async fn attempt(
        &self,
        method: &Method,
        base: &str,
        path: &str,
        access_token: &str,
        sid: &str,
        body: Option<&Value>,
        headers: Option<&HashMap<String, String>>,
    ) -> Result<reqwest::Response, OpError> {
        let url = format!("{base}/{}", path.trim_start_matches('/'));
        let mut req = self
            .http
            .request(method.clone(), &url)
            .bearer_auth(access_token)
            .header("sid", sid);
        if let Some(extra) = headers {
            for (name, value) in extra {
                req = req.header(name.as_str(), value.as_str());
            }
        }
        if let Some(json) = body {
            req = req.json(json);
        }
        Ok(req.send().await?)
    }

    async fn into_response(resp: reqwest::Response) -> Result<ProxyResponse, OpError> {
        let status = resp.status().as_u16();
        let success = (200..300).contains(&status);
        let text = resp.text().await.unwrap_or_default();
        let data = serde_json::from_str(&text).unwrap_or(Value::String(text));
        Ok(ProxyResponse {
            success,
            status,
            data,
        })
    }
}
