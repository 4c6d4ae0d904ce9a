//! Tracing subscriber setup for binaries built on this crate.

use tracing_subscriber::EnvFilter;

/// Filter directive used when neither `RUST_LOG` nor a flag sets one
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Build the filter: `RUST_LOG` wins, then `level`.
#[must_use]
pub fn env_filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_LEVEL))
}

/// Install the global compact subscriber. Call once at startup.
///
/// Returns false when a subscriber was already installed.
pub fn init_logging(level: &str) -> bool {
    tracing_subscriber::fmt()
        .with_env_filter(env_filter(level))
        .with_target(true)
        .compact()
        .try_init()
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_init_is_rejected() {
        let _ = init_logging("debug");
        assert!(!init_logging("debug"));
    }

    #[test]
    fn test_invalid_level_falls_back() {
        let filter = env_filter("not a [valid directive");
        assert!(!filter.to_string().is_empty());
    }
}
