pub mod auth;
pub mod config;
pub mod error;
pub mod jobs;
pub mod ops;
pub mod proxy;
pub mod session;
pub mod uploads;
pub mod utils;
pub mod vendor;

pub use auth::{
    BearerResolver, BridgeClient, CredentialExchange, RefreshOutcome, TokenRefreshPolicy,
};
pub use config::BridgeConfig;
pub use error::{ErrorCode, OpError};
pub use jobs::{JobState, PollOptions, ReviewOptions, ReviewRunResult, ReviewWorkflow};
pub use ops::BridgeService;
pub use proxy::{ProxyInvoker, ProxyResponse};
pub use session::{Session, SessionStatus, SessionStore};
pub use uploads::UploadLedger;
pub use vendor::VendorClient;

// Crate version exposed for runtime queries
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
