use crate::error::Error;
use chrono::{DateTime, Utc};
use serde::Serialize;

/// Lifecycle position of a data source.
///
/// `Fetched` and `Error` are not terminal: a new fetch moves either back to `Fetching`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Status {
    NotInitialized,
    Fetching,
    Fetched,
    Error,
}

impl Status {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::NotInitialized => "NOT_INITIALIZED",
            Self::Fetching => "FETCHING",
            Self::Fetched => "FETCHED",
            Self::Error => "ERROR",
        }
    }

    /// `Fetched` and `Error` close out one request
    #[must_use]
    pub const fn is_settled(self) -> bool {
        matches!(self, Self::Fetched | Self::Error)
    }
}

impl core::fmt::Display for Status {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Snapshot of a data source, published on every transition.
///
/// `data` always holds a usable value: the default before the first load, and the
/// last loaded value afterwards, including while `status` is `Error`.
#[derive(Debug, Clone)]
pub struct FetchStatus<T> {
    pub status: Status,
    pub data: T,
    pub error: Option<Error>,
    /// Sticky: set by the first successful load, cleared only when the source is reset
    pub loaded: bool,
    /// Time of the last successful load
    pub last_refresh: Option<DateTime<Utc>>,
}

impl<T: Clone> FetchStatus<T> {
    pub fn new(data: T) -> Self {
        Self {
            status: Status::NotInitialized,
            data,
            error: None,
            loaded: false,
            last_refresh: None,
        }
    }

    #[must_use]
    pub fn is_loading(&self) -> bool {
        self.status == Status::Fetching
    }

    #[must_use]
    pub fn is_failure(&self) -> bool {
        self.status == Status::Error
    }

    /// A fetch started; previous data, error and refresh time stay visible.
    #[must_use]
    pub fn fetching(&self) -> Self {
        Self {
            status: Status::Fetching,
            ..self.clone()
        }
    }

    /// A fetch succeeded. `None` keeps the previous data.
    #[must_use]
    pub fn fetched(&self, data: Option<T>, at: DateTime<Utc>) -> Self {
        Self {
            status: Status::Fetched,
            data: data.unwrap_or_else(|| self.data.clone()),
            error: None,
            loaded: true,
            last_refresh: Some(at),
        }
    }

    /// A fetch failed; data and refresh time are left as they were.
    #[must_use]
    pub fn failed(&self, error: Error) -> Self {
        Self {
            status: Status::Error,
            error: Some(error),
            ..self.clone()
        }
    }

    /// Out-of-band data mutation; status is unchanged.
    #[must_use]
    pub fn with_data(&self, data: T) -> Self {
        Self {
            data,
            ..self.clone()
        }
    }

    /// Back to defaults for a source that may not fetch (disabled, inactive, no loader).
    /// An interrupted fetch falls back to `NotInitialized`.
    #[must_use]
    pub fn reset(&self, default_data: T) -> Self {
        let status = match self.status {
            Status::Fetching => Status::NotInitialized,
            settled => settled,
        };
        Self {
            status,
            data: default_data,
            loaded: false,
            ..self.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_status() {
        let status = FetchStatus::new(Vec::<u32>::new());
        assert_eq!(status.status, Status::NotInitialized);
        assert!(!status.loaded);
        assert!(status.last_refresh.is_none());
        assert!(status.data.is_empty());
    }

    #[test]
    fn test_fetch_status_transitions() {
        let now = Utc::now();
        let status = FetchStatus::new(vec![0]).fetched(Some(vec![1, 2]), now);
        assert_eq!(status.status, Status::Fetched);
        assert!(status.loaded);

        let fetching = status.fetching();
        assert!(fetching.is_loading());
        assert_eq!(fetching.data, vec![1, 2]);
        assert_eq!(fetching.last_refresh, Some(now));

        let failed = fetching.failed(Error::Custom("API error".to_string()));
        assert!(failed.is_failure());
        assert_eq!(failed.data, vec![1, 2]);
        assert_eq!(failed.last_refresh, Some(now));
        assert!(failed.loaded);

        let refetching = failed.fetching();
        assert!(refetching.error.is_some());
    }

    #[test]
    fn test_fetched_without_data_keeps_previous() {
        let status = FetchStatus::new(vec![7]).fetched(None, Utc::now());
        assert_eq!(status.data, vec![7]);
        assert!(status.error.is_none());
    }

    #[test]
    fn test_reset_clears_loaded_only() {
        let status = FetchStatus::new(vec![0]).fetched(Some(vec![3]), Utc::now());
        let reset = status.reset(vec![0]);
        assert_eq!(reset.status, Status::Fetched);
        assert_eq!(reset.data, vec![0]);
        assert!(!reset.loaded);
    }

    #[test]
    fn test_reset_interrupts_fetch() {
        let fetching = FetchStatus::new(vec![0]).fetched(Some(vec![3]), Utc::now()).fetching();
        let reset = fetching.reset(vec![0]);
        assert_eq!(reset.status, Status::NotInitialized);
        assert!(!reset.is_loading());
        assert_eq!(reset.data, vec![0]);
    }

    #[test]
    fn test_status_labels() {
        assert_eq!(Status::NotInitialized.to_string(), "NOT_INITIALIZED");
        assert_eq!(serde_json::to_value(Status::Fetching).unwrap(), "FETCHING");
        assert!(Status::Error.is_settled());
        assert!(!Status::Fetching.is_settled());
    }
}
