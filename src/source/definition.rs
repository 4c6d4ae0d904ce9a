use super::loader::{AfterLoad, DeserializeOnLoad, Loader, OnLoad};
use crate::application::Application;
use crate::error::ConfigError;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Bounds every data source value must meet: cheap to hand out, shareable
/// across tasks, and representable as JSON for the derived projections.
pub trait SourceData: Clone + Send + Sync + Serialize + DeserializeOwned + 'static {}

impl<T> SourceData for T where T: Clone + Send + Sync + Serialize + DeserializeOwned + 'static {}

/// Static description of a data source. None of these fields affect fetching.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceMetadata {
    pub label: String,
    pub description: Option<String>,
    pub icon: Option<String>,
    pub icon_name: Option<String>,
    pub category: Option<String>,
    /// Key of another source whose item count is displayed next to this one
    pub badge: Option<String>,
    pub sref: Option<String>,
    pub active_state: Option<String>,
    pub visible: bool,
    pub hidden: bool,
    pub primary: bool,
    pub optional: bool,
    pub opt_in: bool,
    pub require_configured_app: bool,
    pub requires_data_source: Option<String>,
    pub credentials_field: Option<String>,
    pub region_field: Option<String>,
    pub provider_field: Option<String>,
}

impl SourceMetadata {
    fn for_key(key: &str) -> Self {
        Self {
            label: robot_to_human(key),
            description: None,
            icon: None,
            icon_name: None,
            category: None,
            badge: None,
            sref: None,
            active_state: None,
            visible: true,
            hidden: false,
            primary: false,
            optional: false,
            opt_in: false,
            require_configured_app: false,
            requires_data_source: None,
            credentials_field: None,
            region_field: None,
            provider_field: None,
        }
    }
}

/// Declarative configuration of one data source, immutable once registered.
pub struct DataSourceConfig<T: SourceData> {
    pub(crate) key: String,
    pub(crate) default_data: T,
    pub(crate) loader: Option<Arc<dyn Loader>>,
    pub(crate) on_load: Arc<dyn OnLoad<T>>,
    pub(crate) after_load: Option<AfterLoad>,
    pub(crate) lazy: bool,
    pub(crate) fetch_timeout: Option<Duration>,
    pub(crate) metadata: SourceMetadata,
}

impl<T: SourceData> DataSourceConfig<T> {
    #[must_use]
    pub fn builder(key: impl Into<String>) -> DataSourceConfigBuilder<T> {
        DataSourceConfigBuilder::new(key)
    }

    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    #[must_use]
    pub const fn metadata(&self) -> &SourceMetadata {
        &self.metadata
    }

    #[must_use]
    pub const fn is_lazy(&self) -> bool {
        self.lazy
    }

    #[must_use]
    pub fn has_loader(&self) -> bool {
        self.loader.is_some()
    }
}

impl<T: SourceData> core::fmt::Debug for DataSourceConfig<T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("DataSourceConfig")
            .field("key", &self.key)
            .field("lazy", &self.lazy)
            .field("has_loader", &self.loader.is_some())
            .field("fetch_timeout", &self.fetch_timeout)
            .field("metadata", &self.metadata)
            .finish_non_exhaustive()
    }
}

pub struct DataSourceConfigBuilder<T: SourceData> {
    key: String,
    default_data: Option<T>,
    loader: Option<Arc<dyn Loader>>,
    on_load: Option<Arc<dyn OnLoad<T>>>,
    after_load: Option<AfterLoad>,
    lazy: bool,
    fetch_timeout: Option<Duration>,
    label: Option<String>,
    metadata: SourceMetadata,
}

impl<T: SourceData> DataSourceConfigBuilder<T> {
    fn new(key: impl Into<String>) -> Self {
        let key = key.into();
        let metadata = SourceMetadata::for_key(&key);
        Self {
            key,
            default_data: None,
            loader: None,
            on_load: None,
            after_load: None,
            lazy: false,
            fetch_timeout: None,
            label: None,
            metadata,
        }
    }

    /// Initial value, and the fallback whenever the source is disabled or reset
    #[must_use]
    pub fn default_data(mut self, data: T) -> Self {
        self.default_data = Some(data);
        self
    }

    #[must_use]
    pub fn loader(mut self, loader: impl Loader + 'static) -> Self {
        self.loader = Some(Arc::new(loader));
        self
    }

    #[must_use]
    pub fn loader_fn<F, Fut>(self, f: F) -> Self
    where
        F: Fn(Application) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
    {
        self.loader(super::loader::loader_fn(f))
    }

    #[must_use]
    pub fn on_load(mut self, on_load: impl OnLoad<T> + 'static) -> Self {
        self.on_load = Some(Arc::new(on_load));
        self
    }

    #[must_use]
    pub fn on_load_fn<F, Fut>(self, f: F) -> Self
    where
        F: Fn(Application, Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Option<T>>> + Send + 'static,
    {
        self.on_load(super::loader::on_load_fn::<T, F, Fut>(f))
    }

    #[must_use]
    pub fn after_load<F>(mut self, f: F) -> Self
    where
        F: Fn(&Application) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.after_load = Some(Arc::new(f));
        self
    }

    /// Lazy sources do not fetch until activated
    #[must_use]
    pub fn lazy(mut self, lazy: bool) -> Self {
        self.lazy = lazy;
        self
    }

    #[must_use]
    pub fn fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout = Some(timeout);
        self
    }

    #[must_use]
    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    #[must_use]
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.metadata.description = Some(description.into());
        self
    }

    #[must_use]
    pub fn icon(mut self, icon: impl Into<String>) -> Self {
        self.metadata.icon = Some(icon.into());
        self
    }

    #[must_use]
    pub fn icon_name(mut self, icon_name: impl Into<String>) -> Self {
        self.metadata.icon_name = Some(icon_name.into());
        self
    }

    #[must_use]
    pub fn category(mut self, category: impl Into<String>) -> Self {
        self.metadata.category = Some(category.into());
        self
    }

    #[must_use]
    pub fn badge(mut self, badge: impl Into<String>) -> Self {
        self.metadata.badge = Some(badge.into());
        self
    }

    #[must_use]
    pub fn sref(mut self, sref: impl Into<String>) -> Self {
        self.metadata.sref = Some(sref.into());
        self
    }

    #[must_use]
    pub fn active_state(mut self, active_state: impl Into<String>) -> Self {
        self.metadata.active_state = Some(active_state.into());
        self
    }

    #[must_use]
    pub fn visible(mut self, visible: bool) -> Self {
        self.metadata.visible = visible;
        self
    }

    #[must_use]
    pub fn hidden(mut self, hidden: bool) -> Self {
        self.metadata.hidden = hidden;
        self
    }

    #[must_use]
    pub fn primary(mut self, primary: bool) -> Self {
        self.metadata.primary = primary;
        self
    }

    #[must_use]
    pub fn optional(mut self, optional: bool) -> Self {
        self.metadata.optional = optional;
        self
    }

    #[must_use]
    pub fn opt_in(mut self, opt_in: bool) -> Self {
        self.metadata.opt_in = opt_in;
        self
    }

    #[must_use]
    pub fn require_configured_app(mut self, required: bool) -> Self {
        self.metadata.require_configured_app = required;
        self
    }

    #[must_use]
    pub fn requires_data_source(mut self, key: impl Into<String>) -> Self {
        self.metadata.requires_data_source = Some(key.into());
        self
    }

    #[must_use]
    pub fn credentials_field(mut self, field: impl Into<String>) -> Self {
        self.metadata.credentials_field = Some(field.into());
        self
    }

    #[must_use]
    pub fn region_field(mut self, field: impl Into<String>) -> Self {
        self.metadata.region_field = Some(field.into());
        self
    }

    #[must_use]
    pub fn provider_field(mut self, field: impl Into<String>) -> Self {
        self.metadata.provider_field = Some(field.into());
        self
    }

    /// Finish the configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::MissingDefaultData` when no default data was supplied and
    /// `ConfigError::EmptyKey` when the key is blank.
    pub fn build(self) -> Result<DataSourceConfig<T>, ConfigError> {
        if self.key.trim().is_empty() {
            return Err(ConfigError::EmptyKey);
        }
        let Some(default_data) = self.default_data else {
            return Err(ConfigError::MissingDefaultData { key: self.key });
        };

        let mut metadata = self.metadata;
        if let Some(label) = self.label {
            metadata.label = label;
        }
        if metadata.active_state.is_none() {
            metadata.active_state = metadata.sref.as_ref().map(|sref| format!("**{sref}.**"));
        }

        Ok(DataSourceConfig {
            key: self.key,
            default_data,
            loader: self.loader,
            on_load: self.on_load.unwrap_or_else(|| Arc::new(DeserializeOnLoad)),
            after_load: self.after_load,
            lazy: self.lazy,
            fetch_timeout: self.fetch_timeout,
            metadata,
        })
    }
}

/// `serverGroups` -> `Server Groups`, `load_balancers` -> `Load Balancers`
#[must_use]
pub fn robot_to_human(key: &str) -> String {
    let mut spaced = String::with_capacity(key.len() + 4);
    let mut prev: Option<char> = None;
    for c in key.chars() {
        if c == '_' || c == '-' {
            spaced.push(' ');
        } else {
            if c.is_uppercase() && prev.is_some_and(|p| p.is_lowercase() || p.is_ascii_digit()) {
                spaced.push(' ');
            }
            spaced.push(c);
        }
        prev = Some(c);
    }

    spaced
        .split_whitespace()
        .map(|word| {
            let mut chars = word.chars();
            chars.next().map_or_else(String::new, |first| {
                first.to_uppercase().chain(chars).collect()
            })
        })
        .collect::<Vec<_>>()
        .join(" ")
}
