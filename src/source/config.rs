/**
 * Configuration constants and application-wide settings for data sources
 */
use std::time::Duration;

/// Buffered refresh events per source before slow subscribers start lagging
pub const SUBSCRIBER_CHANNEL_CAPACITY: usize = 64;

/// Interval of the application's periodic refresh cycle in seconds
pub const DEFAULT_AUTO_REFRESH_SECONDS: u64 = 30;

/// Shortest auto-refresh interval accepted; shorter requests are clamped
pub const MIN_AUTO_REFRESH_MILLIS: u64 = 1000;

/// Settings shared by every data source registered on one application
#[derive(Debug, Clone)]
pub struct AppSettings {
    /// Capacity of each source's refresh event channel
    pub subscriber_capacity: usize,
    /// Bound applied to a fetch chain when its source does not configure one.
    /// `None` lets a hung loader keep the source in `FETCHING` indefinitely.
    pub default_fetch_timeout: Option<Duration>,
    /// Period used by `Application::enable_auto_refresh` callers that have no preference
    pub auto_refresh_interval: Duration,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            subscriber_capacity: SUBSCRIBER_CHANNEL_CAPACITY,
            default_fetch_timeout: None,
            auto_refresh_interval: Duration::from_secs(DEFAULT_AUTO_REFRESH_SECONDS),
        }
    }
}

impl AppSettings {
    #[must_use]
    pub const fn with_fetch_timeout(mut self, timeout: Duration) -> Self {
        self.default_fetch_timeout = Some(timeout);
        self
    }

    #[must_use]
    pub const fn with_auto_refresh_interval(mut self, interval: Duration) -> Self {
        self.auto_refresh_interval = interval;
        self
    }

    /// Channel capacity actually used; broadcast channels reject zero
    pub(crate) fn effective_capacity(&self) -> usize {
        self.subscriber_capacity.max(1)
    }
}

/// Clamp a requested auto-refresh period to the supported minimum
#[must_use]
pub fn clamp_refresh_interval(requested: Duration) -> Duration {
    requested.max(Duration::from_millis(MIN_AUTO_REFRESH_MILLIS))
}

/// Validate configuration constants at compile time
const _: () = {
    assert!(SUBSCRIBER_CHANNEL_CAPACITY > 0, "SUBSCRIBER_CHANNEL_CAPACITY must be greater than 0");
    assert!(DEFAULT_AUTO_REFRESH_SECONDS > 0, "DEFAULT_AUTO_REFRESH_SECONDS must be greater than 0");
    assert!(
        DEFAULT_AUTO_REFRESH_SECONDS * 1000 >= MIN_AUTO_REFRESH_MILLIS,
        "default auto-refresh interval must not be below the minimum"
    );
};
