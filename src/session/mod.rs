pub mod store;
pub mod types;

pub use store::{spawn_sweeper, SessionStore};
pub use types::{
    BrowserLogin, CompletedSession, OAuthTokens, PendingAuth, Session, SessionState,
    SessionStatus, UserProfile, VendorCredentials,
};
