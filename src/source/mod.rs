pub mod alerts;
pub mod config;
pub mod data_source;
pub mod definition;
pub mod erased;
pub mod loader;
pub mod status;
pub mod subscription;
pub mod trigger;

pub use alerts::{EntityTags, derive_alerts};
pub use config::AppSettings;
pub use data_source::DataSource;
pub use definition::{DataSourceConfig, DataSourceConfigBuilder, SourceData, SourceMetadata, robot_to_human};
pub use erased::AnyDataSource;
pub use loader::{AfterLoad, DeserializeOnLoad, Loader, OnLoad, loader_fn, on_load_fn};
pub use status::{FetchStatus, Status};
pub use subscription::{ErrorCallback, OnceErrorCallback, RefreshEvent, Subscription};
pub use trigger::{RegistrationBarrier, RequestToken};
