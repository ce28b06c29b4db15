use tracing::{debug, info, warn};

use crate::auth::oauth::BridgeClient;
use crate::error::ErrorCode;
use crate::session::store::SessionStore;
use crate::session::types::OAuthTokens;

/// How a refresh attempt ended. `Expired` is terminal: the session is dead
/// and the caller must restart a credential flow from scratch. `Transient`
/// leaves the session untouched so a later attempt may still succeed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshOutcome {
    Refreshed,
    Transient,
    Expired,
}

/// Refreshes the OAuth half of a session. The vendor credential set is
/// never written here: a refreshed OAuth token does not renew or rotate the
/// vendor session, whose expiry runs on its own clock.
#[derive(Debug, Clone)]
pub struct TokenRefreshPolicy {
    store: SessionStore,
    bridge: BridgeClient,
}

impl TokenRefreshPolicy {
    pub fn new(store: SessionStore, bridge: BridgeClient) -> Self {
        Self { store, bridge }
    }

    pub async fn refresh(&self, session_id: &str) -> RefreshOutcome {
        let session = match self.store.get(session_id).await {
            Some(s) => s,
            None => {
                debug!(session_id, "refresh requested for unknown session");
                return RefreshOutcome::Transient;
            }
        };

        let refresh_token = match session
            .completed()
            .and_then(|c| c.oauth.refresh_token.clone())
        {
            Some(rt) => rt,
            None => {
                // Browser-login and synthesized sessions carry no refresh
                // token; nothing to post.
                debug!(session_id, "session has no refresh token");
                return RefreshOutcome::Transient;
            }
        };

        match self.bridge.refresh_token(&refresh_token).await {
            Ok(tokens) => {
                // Deliberately drop any vendor fields the bridge re-emits;
                // the stored sid set stays exactly as issued at login.
                let fresh = OAuthTokens {
                    access_token: tokens.access_token,
                    refresh_token: tokens.refresh_token,
                    token_type: tokens.token_type,
                    expires_in: tokens.expires_in,
                };
                self.store
                    .update(session_id, |sess| {
                        sess.apply_refreshed_tokens(fresh);
                    })
                    .await;
                info!(session_id, "oauth tokens refreshed");
                RefreshOutcome::Refreshed
            }
            Err(err) if err.is_session_expired() => {
                self.store
                    .update(session_id, |sess| {
                        sess.fail(
                            ErrorCode::SessionExpired.as_str(),
                            "vendor session expired; re-login required",
                        );
                    })
                    .await;
                warn!(session_id, error = %err, "refresh hit terminal expiry");
                RefreshOutcome::Expired
            }
            Err(err) => {
                warn!(session_id, error = %err, "refresh failed transiently");
                RefreshOutcome::Transient
            }
        }
    }
}
