use super::alerts::EntityTags;
use super::data_source::DataSource;
use super::definition::{SourceData, SourceMetadata};
use super::status::Status;
use crate::error::Result;
use futures::FutureExt;
use futures::future::BoxFuture;
use serde_json::Value;
use std::any::Any;

/// Data-type independent view of a data source, as listed by the application
pub trait AnyDataSource: Send + Sync {
    fn key(&self) -> &str;

    fn metadata(&self) -> &SourceMetadata;

    fn status(&self) -> Status;

    fn is_lazy(&self) -> bool;

    fn is_active(&self) -> bool;

    fn is_disabled(&self) -> bool;

    fn is_loaded(&self) -> bool;

    fn alerts(&self) -> Vec<EntityTags>;

    /// Current data as JSON
    fn data_json(&self) -> Option<Value>;

    fn refresh_erased(&self, force: bool) -> BoxFuture<'static, ()>;

    fn ready_erased(&self) -> BoxFuture<'static, Result<()>>;

    fn as_any(&self) -> &dyn Any;
}

impl<T: SourceData> AnyDataSource for DataSource<T> {
    fn key(&self) -> &str {
        Self::key(self)
    }

    fn metadata(&self) -> &SourceMetadata {
        Self::metadata(self)
    }

    fn status(&self) -> Status {
        Self::status(self)
    }

    fn is_lazy(&self) -> bool {
        self.lazy()
    }

    fn is_active(&self) -> bool {
        self.active()
    }

    fn is_disabled(&self) -> bool {
        self.disabled()
    }

    fn is_loaded(&self) -> bool {
        self.loaded()
    }

    fn alerts(&self) -> Vec<EntityTags> {
        Self::alerts(self)
    }

    fn data_json(&self) -> Option<Value> {
        serde_json::to_value(self.data()).ok()
    }

    fn refresh_erased(&self, force: bool) -> BoxFuture<'static, ()> {
        self.refresh(force).map(|_| ()).boxed()
    }

    fn ready_erased(&self) -> BoxFuture<'static, Result<()>> {
        self.ready().map(|result| result.map(|_| ())).boxed()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
