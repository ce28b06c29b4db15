use serde::Serialize;
use tracing::{debug, info, warn};

use crate::auth::oauth::{derive_expiry, BridgeClient};
use crate::auth::pkce;
use crate::error::{ErrorCode, OpError};
use crate::jobs::poller::{poll_until_terminal, PollOptions};
use crate::session::store::SessionStore;
use crate::session::types::{
    BrowserLogin, CompletedSession, OAuthTokens, PendingAuth, SessionState, VendorCredentials,
};
use crate::vendor::{SessionInfoStatus, VendorClient};

/// Drives the two credential flows that populate sessions: the OAuth/PKCE
/// callback flow against the bridge, and the direct vendor browser login.
#[derive(Debug, Clone)]
pub struct CredentialExchange {
    store: SessionStore,
    bridge: BridgeClient,
    vendor: VendorClient,
}

/// What `login` hands the caller: where to send the human, and which
/// session to watch.
#[derive(Debug, Clone, Serialize)]
pub struct LoginStart {
    pub session_id: String,
    pub authorization_url: String,
}

/// Structured callback result. The error code is freeform here because the
/// provider's own code (e.g. `access_denied`) passes through unchanged.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum CallbackOutcome {
    Completed {
        session_id: String,
        vendor_usable: bool,
    },
    Error {
        session_id: Option<String>,
        code: String,
        description: String,
    },
}

/// What the browser-login start hands the caller.
#[derive(Debug, Clone, Serialize)]
pub struct BrowserLoginStart {
    pub session_id: String,
    pub browser_url: String,
}

impl CredentialExchange {
    pub fn new(store: SessionStore, bridge: BridgeClient, vendor: VendorClient) -> Self {
        Self {
            store,
            bridge,
            vendor,
        }
    }

    /// Begin an OAuth/PKCE login: generate the PKCE material, park it in a
    /// pending session, and build the authorization URL. No network call.
    pub async fn login(&self, platform_hint: Option<&str>) -> LoginStart {
        let code_verifier = pkce::generate_code_verifier();
        let code_challenge = pkce::generate_code_challenge(&code_verifier);
        let state = pkce::generate_state();

        let config = self.bridge.config();
        let session = self
            .store
            .create(SessionState::Pending(PendingAuth {
                code_verifier,
                state: state.clone(),
                client_id: config.client_id.clone(),
                redirect_uri: config.redirect_uri.to_string(),
            }))
            .await;

        let authorization_url = self
            .bridge
            .authorization_url(&code_challenge, &state, platform_hint);
        info!(session_id = %session.id, "oauth login started");

        LoginStart {
            session_id: session.id,
            authorization_url,
        }
    }

    /// Handle the authorization callback. The state parameter is single-use:
    /// once a session has moved past `pending`, a replayed state matches no
    /// pending session and reports `invalid_state`.
    pub async fn callback(
        &self,
        code: Option<&str>,
        state: Option<&str>,
        provider_error: Option<(&str, Option<&str>)>,
    ) -> CallbackOutcome {
        let session = match state {
            Some(s) if !s.is_empty() => self.store.find_by_state(s).await,
            _ => None,
        };

        // Provider-reported errors take precedence: the session dies with
        // the provider's own code, distinct from a state mismatch.
        if let Some((err_code, err_desc)) = provider_error {
            let description = err_desc.unwrap_or("authorization provider reported an error");
            let session_id = match &session {
                Some(s) => {
                    self.store
                        .update(&s.id, |sess| {
                            sess.fail(err_code, description);
                        })
                        .await;
                    Some(s.id.clone())
                }
                None => None,
            };
            warn!(code = %err_code, "oauth callback carried provider error");
            return CallbackOutcome::Error {
                session_id,
                code: err_code.to_string(),
                description: description.to_string(),
            };
        }

        let session = match session {
            Some(s) => s,
            None => {
                return CallbackOutcome::Error {
                    session_id: None,
                    code: ErrorCode::InvalidState.as_str().to_string(),
                    description: "callback state missing or unknown".to_string(),
                };
            }
        };

        let code = match code {
            Some(c) if !c.is_empty() => c,
            _ => {
                return CallbackOutcome::Error {
                    session_id: Some(session.id),
                    code: ErrorCode::InvalidState.as_str().to_string(),
                    description: "callback is missing the authorization code".to_string(),
                };
            }
        };

        let verifier = match session.pending_auth() {
            Some(p) => p.code_verifier.clone(),
            None => {
                return CallbackOutcome::Error {
                    session_id: Some(session.id),
                    code: ErrorCode::InvalidState.as_str().to_string(),
                    description: "session is not awaiting a callback".to_string(),
                };
            }
        };

        let tokens = match self.bridge.exchange_code(code, &verifier).await {
            Ok(t) => t,
            Err(err) => {
                let description = format!("token exchange rejected: {err}");
                self.store
                    .update(&session.id, |sess| {
                        sess.fail(ErrorCode::TokenExchangeFailed.as_str(), &description);
                    })
                    .await;
                warn!(session_id = %session.id, error = %err, "token exchange failed");
                return CallbackOutcome::Error {
                    session_id: Some(session.id),
                    code: ErrorCode::TokenExchangeFailed.as_str().to_string(),
                    description,
                };
            }
        };

        // Profile fetch is best-effort; a completed login does not depend
        // on it.
        let profile = match self.bridge.userinfo(&tokens.access_token).await {
            Ok(info) => Some(info.profile()),
            Err(err) => {
                debug!(session_id = %session.id, error = %err, "userinfo fetch failed");
                None
            }
        };

        let vendor = tokens.vendor.clone().into_credentials();
        let vendor_usable = vendor.is_some();
        if !vendor_usable {
            debug!(session_id = %session.id, "token response carried no vendor fields");
        }

        let done = CompletedSession {
            oauth: OAuthTokens {
                access_token: tokens.access_token,
                refresh_token: tokens.refresh_token,
                token_type: tokens.token_type,
                expires_in: tokens.expires_in,
            },
            vendor,
            profile,
        };
        self.store
            .update(&session.id, |sess| {
                sess.complete(done);
            })
            .await;
        info!(session_id = %session.id, vendor_usable, "oauth login completed");

        CallbackOutcome::Completed {
            session_id: session.id,
            vendor_usable,
        }
    }

    /// Begin a direct vendor browser login: issue a login token and build
    /// the URL a human visits to finish it.
    pub async fn start_browser_login(
        &self,
        platform_url: &str,
    ) -> Result<BrowserLoginStart, OpError> {
        let platform_url = platform_url.trim_end_matches('/').to_string();
        let login_token = self
            .vendor
            .issue_login_token(&platform_url)
            .await
            .map_err(|err| OpError::server(format!("login token issue failed: {err:#}")))?;

        let browser_url = format!("{platform_url}/login?token={login_token}");
        let session = self
            .store
            .create(SessionState::BrowserPending(BrowserLogin {
                platform_url,
                login_token,
            }))
            .await;
        info!(session_id = %session.id, "browser login started");

        Ok(BrowserLoginStart {
            session_id: session.id,
            browser_url,
        })
    }

    /// One readiness check for a browser login. Completion is driven by a
    /// human of unknown speed, so the wait budget is zero and the caller
    /// re-invokes on `info_retrieval_failed`. A second call after success
    /// returns the completed session id again.
    pub async fn complete_browser_login(&self, session_id: &str) -> Result<String, OpError> {
        let session = self
            .store
            .get(session_id)
            .await
            .ok_or_else(|| OpError::new(ErrorCode::InvalidSession, "unknown session id"))?;

        let login = match &session.state {
            SessionState::Completed(_) => return Ok(session.id), // idempotent replay
            SessionState::BrowserPending(login) => login.clone(),
            SessionState::Error { .. } => {
                return Err(OpError::new(
                    ErrorCode::InvalidSession,
                    "session already failed",
                ));
            }
            SessionState::Pending(_) => {
                return Err(OpError::new(
                    ErrorCode::InvalidSession,
                    "session belongs to the oauth flow",
                ));
            }
        };

        let outcome = poll_until_terminal(
            || self.vendor.session_info(&login.platform_url, &login.login_token),
            PollOptions::single_check(),
        )
        .await
        .map_err(|err| {
            OpError::new(
                ErrorCode::InfoRetrievalFailed,
                format!("session info lookup failed: {err:#}"),
            )
        })?;

        let info = match outcome.state {
            SessionInfoStatus::Ready(info) => info,
            SessionInfoStatus::NotReady => {
                return Err(OpError::new(
                    ErrorCode::InfoRetrievalFailed,
                    "login not finished yet; call complete again later",
                ));
            }
        };

        let created_at = info
            .created_at
            .and_then(|secs| chrono::TimeZone::timestamp_opt(&chrono::Utc, secs, 0).single())
            .or_else(|| Some(chrono::Utc::now()));
        let sid_expiry = derive_expiry(created_at, info.login_timeout_hours);

        let done = CompletedSession {
            // This flow never touches the bridge: the vendor login token
            // doubles as the bearer token for downstream callers.
            oauth: OAuthTokens {
                access_token: login.login_token.clone(),
                refresh_token: None,
                token_type: "Bearer".to_string(),
                expires_in: info.login_timeout_hours.map(|h| h * 3600),
            },
            vendor: Some(VendorCredentials {
                sid: info.sid,
                client_id: info.client_id,
                api_base_url: info.api_base_url,
                login_timeout_hours: info.login_timeout_hours,
                sid_created_at: created_at,
                sid_expiry,
            }),
            profile: None,
        };

        self.store
            .update(&session.id, |sess| {
                sess.complete(done);
            })
            .await;
        info!(session_id = %session.id, "browser login completed");
        Ok(session.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BridgeConfig;
    use crate::session::types::SessionStatus;
    use serde_json::json;
    use url::Url;

    fn exchange_against(server_url: &str) -> (CredentialExchange, SessionStore) {
        let base: Url = format!("{server_url}/").parse().unwrap();
        let config =
            BridgeConfig::new("test-client", &base, "http://localhost/cb".parse().unwrap())
                .unwrap();
        let store = SessionStore::new();
        let exchange = CredentialExchange::new(
            store.clone(),
            BridgeClient::new(config),
            VendorClient::new(),
        );
        (exchange, store)
    }

    #[tokio::test]
    async fn test_login_creates_pending_session() {
        let (exchange, store) = exchange_against("https://auth.example.net");
        let start = exchange.login(None).await;

        assert!(start.authorization_url.contains("code_challenge_method=S256"));
        let session = store.get(&start.session_id).await.unwrap();
        assert_eq!(session.status(), SessionStatus::Pending);
        let pending = session.pending_auth().unwrap();
        assert!(start.authorization_url.contains(&pending.state));
    }

    #[tokio::test]
    async fn test_callback_unknown_state() {
        let (exchange, _) = exchange_against("https://auth.example.net");
        let outcome = exchange.callback(Some("code"), Some("never-issued"), None).await;
        match outcome {
            CallbackOutcome::Error { code, session_id, .. } => {
                assert_eq!(code, "invalid_state");
                assert!(session_id.is_none());
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_callback_provider_error_marks_session() {
        let (exchange, store) = exchange_against("https://auth.example.net");
        let start = exchange.login(None).await;
        let state = store
            .get(&start.session_id)
            .await
            .unwrap()
            .pending_auth()
            .unwrap()
            .state
            .clone();

        let outcome = exchange
            .callback(None, Some(&state), Some(("access_denied", Some("user said no"))))
            .await;
        match outcome {
            CallbackOutcome::Error { code, session_id, .. } => {
                assert_eq!(code, "access_denied");
                assert_eq!(session_id.as_deref(), Some(start.session_id.as_str()));
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
        let session = store.get(&start.session_id).await.unwrap();
        assert_eq!(session.status(), SessionStatus::Error);
    }

    #[tokio::test]
    async fn test_callback_exchange_rejection() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/oauth/token")
            .with_status(400)
            .with_body(json!({"error": "invalid_request"}).to_string())
            .create_async()
            .await;

        let (exchange, store) = exchange_against(&server.url());
        let start = exchange.login(None).await;
        let state = store
            .get(&start.session_id)
            .await
            .unwrap()
            .pending_auth()
            .unwrap()
            .state
            .clone();

        let outcome = exchange.callback(Some("bad-code"), Some(&state), None).await;
        match outcome {
            CallbackOutcome::Error { code, .. } => assert_eq!(code, "token_exchange_failed"),
            other => panic!("unexpected outcome: {other:?}"),
        }
        let session = store.get(&start.session_id).await.unwrap();
        assert_eq!(session.status(), SessionStatus::Error);

        // The consumed state no longer matches a pending session.
        let replay = exchange.callback(Some("bad-code"), Some(&state), None).await;
        match replay {
            CallbackOutcome::Error { code, .. } => assert_eq!(code, "invalid_state"),
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_browser_login_not_ready_then_complete() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/api/auth/token")
            .with_status(200)
            .with_body(r#"{"token": "lt-1"}"#)
            .create_async()
            .await;

        let (exchange, store) = exchange_against("https://auth.example.net");
        // Vendor endpoints live on the mock server for this test.
        let start = exchange.start_browser_login(&server.url()).await.unwrap();
        assert!(start.browser_url.ends_with("/login?token=lt-1"));
        assert_eq!(
            store.get(&start.session_id).await.unwrap().status(),
            SessionStatus::BrowserPending
        );

        let not_ready = server
            .mock("GET", "/api/auth/session")
            .match_query(mockito::Matcher::Any)
            .with_status(404)
            .expect(1)
            .create_async()
            .await;
        let err = exchange
            .complete_browser_login(&start.session_id)
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::InfoRetrievalFailed);
        not_ready.assert_async().await;
        not_ready.remove_async().await;

        server
            .mock("GET", "/api/auth/session")
            .match_query(mockito::Matcher::Any)
            .with_status(200)
            .with_body(
                json!({
                    "sid": "sid-5",
                    "client_id": "vc-5",
                    "api_base_url": "https://api.vendor.example",
                    "login_timeout_hours": 6
                })
                .to_string(),
            )
            .create_async()
            .await;

        let completed_id = exchange
            .complete_browser_login(&start.session_id)
            .await
            .unwrap();
        assert_eq!(completed_id, start.session_id);

        let session = store.get(&start.session_id).await.unwrap();
        let done = session.completed().unwrap();
        let vendor = done.vendor.as_ref().unwrap();
        assert_eq!(vendor.sid, "sid-5");
        assert_eq!(
            vendor.sid_expiry.unwrap(),
            vendor.sid_created_at.unwrap() + chrono::Duration::hours(6)
        );
        assert_eq!(done.oauth.access_token, "lt-1");

        // Idempotent replay after completion.
        let again = exchange
            .complete_browser_login(&start.session_id)
            .await
            .unwrap();
        assert_eq!(again, start.session_id);
    }

    #[tokio::test]
    async fn test_complete_unknown_session() {
        let (exchange, _) = exchange_against("https://auth.example.net");
        let err = exchange.complete_browser_login("nope").await.unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidSession);
    }
}
