use tracing_subscriber::{fmt, EnvFilter};
use tracing_subscriber::prelude::*;

/// Install the global subscriber. Safe to call more than once: later calls
/// are no-ops, so test binaries can invoke it freely.
pub fn init() {
    let fmt_layer = fmt::layer().with_target(false);
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,review_bridge=debug"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .try_init()
        .ok();
}

#[cfg(test)]
mod tests {
    #[test]
    fn test_init_is_idempotent() {
        super::init();
        super::init();
        tracing::debug!("subscriber installed");
    }
}
