use chrono::Utc;
use tracing::{debug, info};

use crate::auth::oauth::BridgeClient;
use crate::session::store::SessionStore;
use crate::session::types::{CompletedSession, OAuthTokens, Session, SessionState, SessionStatus};

/// Maps inbound bearer tokens to sessions. The transport is stateless —
/// every request may arrive on a fresh connection — so when no local
/// session matches, the resolver validates the token against the bridge's
/// userinfo endpoint and synthesizes a completed session around the result.
#[derive(Debug, Clone)]
pub struct BearerResolver {
    store: SessionStore,
    bridge: BridgeClient,
}

/// Parse a `Bearer <token>` authorization header value.
pub fn extract_bearer(header: &str) -> Option<&str> {
    header
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

impl BearerResolver {
    pub fn new(store: SessionStore, bridge: BridgeClient) -> Self {
        Self { store, bridge }
    }

    /// Scan live sessions for a completed one holding this access token and
    /// an unexpired vendor sid.
    pub async fn find_existing(&self, token: &str) -> Option<Session> {
        let session = self.store.find_by_access_token(token).await?;
        if session.status() != SessionStatus::Completed {
            return None;
        }
        let now = Utc::now();
        if session.is_expired(now) {
            return None;
        }
        let usable = session
            .completed()
            .and_then(|c| c.vendor.as_ref())
            .map(|v| !v.sid_expired(now))
            .unwrap_or(false);
        usable.then_some(session)
    }

    /// Resolve a bearer header to a session, synthesizing one when needed.
    /// The external lookup completes before this returns: every downstream
    /// handler assumes a session already exists.
    pub async fn find_or_create(&self, header: &str) -> Option<Session> {
        let token = extract_bearer(header)?;

        if let Some(session) = self.find_existing(token).await {
            // A live re-use keeps the session from expiring mid-workload.
            self.store.extend(&session.id).await;
            return Some(session);
        }

        let info = match self.bridge.userinfo(token).await {
            Ok(info) => info,
            Err(err) => {
                debug!(error = %err, "bearer token failed userinfo validation");
                return None;
            }
        };

        let profile = info.profile();
        let vendor = match info.vendor.into_credentials() {
            Some(v) => v,
            None => {
                debug!("userinfo response carried no vendor fields; cannot synthesize session");
                return None;
            }
        };

        let session = self
            .store
            .create(SessionState::Completed(CompletedSession {
                oauth: OAuthTokens {
                    access_token: token.to_string(),
                    // Unknown from this path; refresh is unavailable until
                    // the client re-runs a credential flow.
                    refresh_token: None,
                    token_type: "Bearer".to_string(),
                    expires_in: None,
                },
                vendor: Some(vendor),
                profile: Some(profile),
            }))
            .await;
        info!(session_id = %session.id, "session synthesized from bearer token");
        Some(session)
    }
}
