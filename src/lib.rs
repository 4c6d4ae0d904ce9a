//! Reactive, cached application data sources.
//!
//! An [`Application`] owns a set of named [`DataSource`]s. Each source runs its
//! loader on demand, tracks the fetch lifecycle, and tells subscribers about new
//! data. When fetches overlap, only the most recently requested one may apply
//! its result.

pub mod application;
pub mod error;
pub mod logging;
pub mod source;

pub use application::{Application, ApplicationBuilder};
pub use error::{ConfigError, Error, LoadError, Result};
pub use source::{
    AnyDataSource, AppSettings, DataSource, DataSourceConfig, EntityTags, FetchStatus, Loader, OnLoad, RefreshEvent,
    SourceData, SourceMetadata, Status, Subscription, loader_fn, on_load_fn,
};
pub use tokio_util::sync::CancellationToken;
