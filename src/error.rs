use derive_more::From;
use std::sync::Arc;
use std::time::Duration;

pub type Result<T> = core::result::Result<T, Error>;

#[derive(Debug, Clone, From)]
pub enum Error {
    #[from]
    Config(ConfigError),

    #[from]
    Load(LoadError),

    /// The fetch chain did not complete within the configured bound
    Timeout { key: String, after: Duration },

    /// No data source is registered under this key
    UnknownDataSource(String),

    /// The data source exists but holds a different data type
    TypeMismatch { key: String, expected: &'static str },

    /// The owning application was torn down
    Destroyed(String),

    /// Custom error message
    Custom(String),
}

impl core::fmt::Display for Error {
    fn fmt(&self, fmt: &mut core::fmt::Formatter) -> core::result::Result<(), core::fmt::Error> {
        match self {
            Self::Config(e) => write!(fmt, "configuration error: {e}"),
            Self::Load(e) => write!(fmt, "{e}"),
            Self::Timeout { key, after } => {
                write!(fmt, "{key}: fetch timed out after {}ms", after.as_millis())
            }
            Self::UnknownDataSource(key) => write!(fmt, "no data source registered as '{key}'"),
            Self::TypeMismatch { key, expected } => {
                write!(fmt, "data source '{key}' does not hold {expected}")
            }
            Self::Destroyed(key) => write!(fmt, "data source '{key}' was destroyed"),
            Self::Custom(message) => write!(fmt, "{message}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Config(e) => Some(e),
            Self::Load(e) => Some(e),
            _ => None,
        }
    }
}

impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Self::Load(LoadError::from(err))
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::Load(LoadError::from(anyhow::Error::from(err)))
    }
}

/// A loader or transform failure, shared so every subscriber sees the same value.
#[derive(Debug, Clone)]
pub struct LoadError(Arc<anyhow::Error>);

impl LoadError {
    #[must_use]
    pub fn inner(&self) -> &anyhow::Error {
        &self.0
    }
}

impl From<anyhow::Error> for LoadError {
    fn from(err: anyhow::Error) -> Self {
        Self(Arc::new(err))
    }
}

impl core::fmt::Display for LoadError {
    fn fmt(&self, fmt: &mut core::fmt::Formatter) -> core::fmt::Result {
        write!(fmt, "{}", self.0)
    }
}

impl std::error::Error for LoadError {}

/// Programmer errors caught while registering data sources
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error(
        "data source '{key}': default data is required when registering a data source; \
         it is the initial value used before data has been fetched (e.g. an empty list)"
    )]
    MissingDefaultData { key: String },

    #[error("data source key must not be empty")]
    EmptyKey,

    #[error("a data source is already registered as '{0}'")]
    DuplicateKey(String),
}
