use std::sync::Once;
use tracing_subscriber::{EnvFilter, fmt};

static INIT: Once = Once::new();

/// Install the fmt subscriber once per process.
///
/// `RUST_LOG` wins over `default_filter`; an unparsable filter falls back to
/// `info`. Later calls, and calls made after another subscriber was installed,
/// are no-ops.
pub fn init_tracing(default_filter: &str) {
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_default_env()
            .or_else(|_| EnvFilter::try_new(default_filter))
            .unwrap_or_else(|_| EnvFilter::new("info"));
        let _ = fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_level(true)
            .try_init();
    });
}

pub fn is_initialized() -> bool {
    INIT.is_completed()
}
