pub mod bearer;
pub mod exchange;
pub mod oauth;
pub mod pkce;
pub mod refresh;

pub use bearer::{extract_bearer, BearerResolver};
pub use exchange::{BrowserLoginStart, CallbackOutcome, CredentialExchange, LoginStart};
pub use oauth::{BridgeClient, BridgeError, TokenResponse, UserInfoResponse, VendorFields};
pub use refresh::{RefreshOutcome, TokenRefreshPolicy};
