/*!
The application aggregate: owns every data source registered for one application.

Sources are registered through [`ApplicationBuilder`]. Fetches requested while
the builder is still registering sources are held back until [`ApplicationBuilder::build`]
opens the registration barrier, so a loader can always look up its siblings.
*/
use crate::error::{ConfigError, Error, Result};
use crate::source::config::clamp_refresh_interval;
use crate::source::{AnyDataSource, AppSettings, DataSource, DataSourceConfig, RegistrationBarrier, SourceData, SourceMetadata};
use futures::FutureExt;
use futures::future::{BoxFuture, join_all, try_join_all};
use itertools::Itertools;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak};
use std::time::Duration;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Handle to an application and its data sources. Clones share state.
#[derive(Clone)]
pub struct Application {
    inner: Arc<ApplicationInner>,
}

pub(crate) struct ApplicationInner {
    name: String,
    settings: AppSettings,
    registry: RwLock<Vec<Registered>>,
    barrier: RegistrationBarrier,
    shutdown: CancellationToken,
    auto_refresh: Mutex<Option<CancellationToken>>,
}

struct Registered {
    source: Arc<dyn AnyDataSource>,
    set_disabled: Box<dyn Fn(bool) + Send + Sync>,
}

impl Drop for ApplicationInner {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

impl ApplicationInner {
    fn registry(&self) -> RwLockReadGuard<'_, Vec<Registered>> {
        self.registry.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn registry_mut(&self) -> RwLockWriteGuard<'_, Vec<Registered>> {
        self.registry.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn auto_refresh(&self) -> MutexGuard<'_, Option<CancellationToken>> {
        self.auto_refresh.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Registers data sources, then hands out the finished [`Application`]
pub struct ApplicationBuilder {
    inner: Arc<ApplicationInner>,
}

impl ApplicationBuilder {
    #[must_use]
    pub fn new(name: impl Into<String>, settings: AppSettings) -> Self {
        Self {
            inner: Arc::new(ApplicationInner {
                name: name.into(),
                settings,
                registry: RwLock::new(Vec::new()),
                barrier: RegistrationBarrier::new(),
                shutdown: CancellationToken::new(),
                auto_refresh: Mutex::new(None),
            }),
        }
    }

    /// Register a data source and return its handle.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::DuplicateKey` when the key is already registered.
    pub fn data_source<T: SourceData>(&mut self, config: DataSourceConfig<T>) -> Result<DataSource<T>> {
        let mut registry = self.inner.registry_mut();
        if registry.iter().any(|entry| entry.source.key() == config.key()) {
            return Err(ConfigError::DuplicateKey(config.key().to_string()).into());
        }

        let source = DataSource::new(
            config,
            Arc::downgrade(&self.inner),
            self.inner.barrier.clone(),
            self.inner.shutdown.child_token(),
            &self.inner.settings,
        );
        let control = source.clone();
        registry.push(Registered {
            source: Arc::new(source.clone()),
            set_disabled: Box::new(move |disabled| control.set_disabled(disabled)),
        });
        drop(registry);

        debug!(app = %self.inner.name, key = %source.key(), "data source registered");
        Ok(source)
    }

    /// Mark a registered source as disabled for this application.
    ///
    /// # Errors
    ///
    /// Returns `Error::UnknownDataSource` for an unregistered key.
    pub fn disable(&mut self, key: &str) -> Result<()> {
        set_disabled(&self.inner, key, true)
    }

    /// Finish registration and release any fetch that was waiting for it
    #[must_use]
    pub fn build(self) -> Application {
        self.inner.barrier.open();
        info!(
            app = %self.inner.name,
            sources = self.inner.registry().len(),
            "application data sources registered"
        );
        Application { inner: self.inner }
    }
}

fn set_disabled(inner: &ApplicationInner, key: &str, disabled: bool) -> Result<()> {
    let registry = inner.registry();
    let entry = registry
        .iter()
        .find(|entry| entry.source.key() == key)
        .ok_or_else(|| Error::UnknownDataSource(key.to_string()))?;
    (entry.set_disabled)(disabled);
    Ok(())
}

impl Application {
    #[must_use]
    pub fn builder(name: impl Into<String>) -> ApplicationBuilder {
        ApplicationBuilder::new(name, AppSettings::default())
    }

    #[must_use]
    pub fn builder_with_settings(name: impl Into<String>, settings: AppSettings) -> ApplicationBuilder {
        ApplicationBuilder::new(name, settings)
    }

    pub(crate) fn from_weak(inner: &Weak<ApplicationInner>) -> Option<Self> {
        inner.upgrade().map(|inner| Self { inner })
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    #[must_use]
    pub fn settings(&self) -> &AppSettings {
        &self.inner.settings
    }

    /// Typed handle to the source registered as `key`.
    ///
    /// # Errors
    ///
    /// Returns `Error::UnknownDataSource` for an unregistered key and
    /// `Error::TypeMismatch` when the source holds another data type.
    pub fn data_source<T: SourceData>(&self, key: &str) -> Result<DataSource<T>> {
        let registry = self.inner.registry();
        let entry = registry
            .iter()
            .find(|entry| entry.source.key() == key)
            .ok_or_else(|| Error::UnknownDataSource(key.to_string()))?;

        entry
            .source
            .as_any()
            .downcast_ref::<DataSource<T>>()
            .cloned()
            .ok_or_else(|| Error::TypeMismatch {
                key: key.to_string(),
                expected: std::any::type_name::<T>(),
            })
    }

    /// All sources, in registration order
    #[must_use]
    pub fn data_sources(&self) -> Vec<Arc<dyn AnyDataSource>> {
        self.inner.registry().iter().map(|entry| Arc::clone(&entry.source)).collect()
    }

    #[must_use]
    pub fn keys(&self) -> Vec<String> {
        self.inner.registry().iter().map(|entry| entry.source.key().to_string()).collect()
    }

    /// Flip the disabled flag of a source. Disabling resets it to its default data
    /// at once and discards any fetch in flight.
    ///
    /// # Errors
    ///
    /// Returns `Error::UnknownDataSource` for an unregistered key.
    pub fn set_disabled(&self, key: &str, disabled: bool) -> Result<()> {
        set_disabled(&self.inner, key, disabled)
    }

    /// Refresh every source that takes part in the refresh cycle (non-lazy, or lazy
    /// and active). Fetches start when this is called; the future waits for all of them.
    pub fn refresh(&self, force: bool) -> BoxFuture<'static, ()> {
        let refreshes: Vec<_> = self
            .data_sources()
            .into_iter()
            .filter(|source| !source.is_lazy() || source.is_active())
            .map(|source| source.refresh_erased(force))
            .collect();

        debug!(app = %self.inner.name, sources = refreshes.len(), force, "refreshing application");
        join_all(refreshes).map(|_| ()).boxed()
    }

    /// Wait until every visible, enabled, non-lazy source holds data.
    ///
    /// The set of sources and their readiness is captured when this is called.
    /// The future fails with the first load failure among those sources.
    pub fn ready(&self) -> BoxFuture<'static, Result<()>> {
        let pending: Vec<_> = self
            .data_sources()
            .into_iter()
            .filter(|source| source.metadata().visible && !source.is_disabled() && !source.is_lazy())
            .map(|source| source.ready_erased())
            .collect();

        try_join_all(pending).map(|result| result.map(|_| ())).boxed()
    }

    /// Refresh the application every `interval` until disabled or destroyed.
    /// Replaces a previously enabled cycle.
    pub fn enable_auto_refresh(&self, interval: Duration) {
        let interval = clamp_refresh_interval(interval);
        let stop = self.inner.shutdown.child_token();
        if let Some(previous) = self.inner.auto_refresh().replace(stop.clone()) {
            previous.cancel();
        }

        let weak = Arc::downgrade(&self.inner);
        let name = self.inner.name.clone();
        info!(app = %name, ?interval, "auto refresh enabled");

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    biased;
                    () = stop.cancelled() => break,
                    _ = ticker.tick() => {
                        let Some(app) = Self::from_weak(&weak) else {
                            break;
                        };
                        let refresh = app.refresh(false);
                        drop(app);

                        tokio::select! {
                            biased;
                            () = stop.cancelled() => break,
                            () = refresh => {}
                        }
                    }
                }
            }
            info!(app = %name, "auto refresh stopped");
        });
    }

    /// [`Application::enable_auto_refresh`] with `AppSettings::auto_refresh_interval`
    pub fn enable_auto_refresh_default(&self) {
        self.enable_auto_refresh(self.inner.settings.auto_refresh_interval);
    }

    pub fn disable_auto_refresh(&self) {
        if let Some(stop) = self.inner.auto_refresh().take() {
            stop.cancel();
        }
    }

    #[must_use]
    pub fn auto_refresh_enabled(&self) -> bool {
        self.inner
            .auto_refresh()
            .as_ref()
            .is_some_and(|stop| !stop.is_cancelled())
    }

    /// Per provider, the single credentials value found across loaded sources that
    /// declare `credentials_field` and `provider_field`. Ambiguous providers are left out.
    #[must_use]
    pub fn default_credentials(&self) -> BTreeMap<String, String> {
        self.unique_defaults(|metadata| metadata.credentials_field.as_ref())
    }

    /// Same as [`Application::default_credentials`] for `region_field`
    #[must_use]
    pub fn default_regions(&self) -> BTreeMap<String, String> {
        self.unique_defaults(|metadata| metadata.region_field.as_ref())
    }

    fn unique_defaults(&self, field: impl Fn(&SourceMetadata) -> Option<&String>) -> BTreeMap<String, String> {
        let mut seen: BTreeMap<String, Vec<String>> = BTreeMap::new();

        for source in self.data_sources() {
            if !source.is_loaded() || source.is_disabled() {
                continue;
            }
            let metadata = source.metadata();
            let (Some(value_field), Some(provider_field)) = (field(metadata), metadata.provider_field.as_ref())
            else {
                continue;
            };
            let Some(Value::Array(items)) = source.data_json() else {
                continue;
            };

            for item in &items {
                let provider = item.get(provider_field).and_then(Value::as_str);
                let value = item.get(value_field).and_then(Value::as_str);
                if let (Some(provider), Some(value)) = (provider, value) {
                    seen.entry(provider.to_string()).or_default().push(value.to_string());
                }
            }
        }

        seen.into_iter()
            .filter_map(|(provider, values)| {
                values
                    .into_iter()
                    .unique()
                    .exactly_one()
                    .ok()
                    .map(|value| (provider, value))
            })
            .collect()
    }

    /// Tear down every data source: pending fetches are dropped, listeners stop,
    /// and no further status transitions are applied.
    pub fn destroy(&self) {
        info!(app = %self.inner.name, "destroying application");
        self.inner.shutdown.cancel();
    }

    #[must_use]
    pub fn is_destroyed(&self) -> bool {
        self.inner.shutdown.is_cancelled()
    }
}

impl core::fmt::Debug for Application {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Application")
            .field("name", &self.inner.name)
            .field("sources", &self.keys())
            .field("destroyed", &self.is_destroyed())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::Status;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::time::sleep;

    fn counting(key: &str, calls: &Arc<AtomicUsize>) -> DataSourceConfig<Vec<u32>> {
        let counter = Arc::clone(calls);
        DataSourceConfig::builder(key)
            .default_data(Vec::new())
            .loader_fn(move |_app| {
                let call = counter.fetch_add(1, Ordering::SeqCst);
                async move {
                    sleep(Duration::from_millis(10)).await;
                    Ok(json!([call]))
                }
            })
            .build()
            .unwrap()
    }

    #[test]
    fn test_duplicate_key_rejected() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut builder = Application::builder("test");
        builder.data_source(counting("instances", &calls)).unwrap();

        let err = builder.data_source(counting("instances", &calls)).unwrap_err();
        assert!(matches!(err, Error::Config(ConfigError::DuplicateKey(key)) if key == "instances"));
    }

    #[tokio::test]
    async fn test_lookup_by_key_and_type() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut builder = Application::builder("test");
        builder.data_source(counting("instances", &calls)).unwrap();
        builder.data_source(counting("images", &calls)).unwrap();
        let app = builder.build();

        assert_eq!(app.keys(), vec!["instances".to_string(), "images".to_string()]);
        assert_eq!(app.data_sources().len(), 2);
        assert_eq!(app.data_source::<Vec<u32>>("images").unwrap().key(), "images");
        assert!(matches!(
            app.data_source::<Vec<u32>>("clusters"),
            Err(Error::UnknownDataSource(key)) if key == "clusters"
        ));
        assert!(matches!(
            app.data_source::<String>("images"),
            Err(Error::TypeMismatch { key, .. }) if key == "images"
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_fetch_waits_for_registration() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let mut builder = Application::builder("test");
        let first = builder
            .data_source(
                DataSourceConfig::builder("first")
                    .default_data(String::new())
                    .loader_fn(move |app: Application| {
                        counter.fetch_add(1, Ordering::SeqCst);
                        async move {
                            let sibling = app.data_source::<Vec<u32>>("second")?;
                            Ok::<_, anyhow::Error>(json!(format!("found {}", sibling.key())))
                        }
                    })
                    .build()
                    .unwrap(),
            )
            .unwrap();

        let pending = first.refresh(false);
        sleep(Duration::from_millis(10)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(first.status(), Status::Fetching);

        builder.data_source(counting("second", &Arc::new(AtomicUsize::new(0)))).unwrap();
        let _app = builder.build();

        assert_eq!(pending.await, "found second");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_skips_inactive_lazy_sources() {
        let eager_calls = Arc::new(AtomicUsize::new(0));
        let lazy_calls = Arc::new(AtomicUsize::new(0));
        let mut builder = Application::builder("test");
        builder.data_source(counting("eager", &eager_calls)).unwrap();
        let lazy = builder
            .data_source(
                DataSourceConfig::builder("lazy")
                    .default_data(Vec::<u32>::new())
                    .loader_fn({
                        let counter = Arc::clone(&lazy_calls);
                        move |_app| {
                            counter.fetch_add(1, Ordering::SeqCst);
                            async { Ok(json!([9])) }
                        }
                    })
                    .lazy(true)
                    .build()
                    .unwrap(),
            )
            .unwrap();
        let app = builder.build();

        app.refresh(false).await;
        assert_eq!(eager_calls.load(Ordering::SeqCst), 1);
        assert_eq!(lazy_calls.load(Ordering::SeqCst), 0);

        lazy.activate();
        lazy.ready().await.unwrap();
        app.refresh(true).await;
        assert_eq!(eager_calls.load(Ordering::SeqCst), 2);
        assert_eq!(lazy_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ready_covers_enabled_visible_sources() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut builder = Application::builder("test");
        let instances = builder.data_source(counting("instances", &calls)).unwrap();
        builder
            .data_source(
                DataSourceConfig::builder("broken")
                    .default_data(Vec::<u32>::new())
                    .loader_fn(|_app| async { Err(anyhow::anyhow!("boom")) })
                    .build()
                    .unwrap(),
            )
            .unwrap();
        builder.disable("broken").unwrap();
        let app = builder.build();

        let ready = app.ready();
        app.refresh(false).await;
        ready.await.unwrap();
        assert!(instances.loaded());
    }

    #[tokio::test(start_paused = true)]
    async fn test_ready_fails_with_load_error() {
        let mut builder = Application::builder("test");
        builder
            .data_source(
                DataSourceConfig::builder("broken")
                    .default_data(Vec::<u32>::new())
                    .loader_fn(|_app| async {
                        sleep(Duration::from_millis(10)).await;
                        Err(anyhow::anyhow!("boom"))
                    })
                    .build()
                    .unwrap(),
            )
            .unwrap();
        let app = builder.build();

        let refresh = app.refresh(false);
        let err = app.ready().await.unwrap_err();
        assert_eq!(err.to_string(), "boom");
        refresh.await;
    }

    #[tokio::test]
    async fn test_set_disabled_unknown_key() {
        let app = Application::builder("test").build();
        assert!(matches!(app.set_disabled("missing", true), Err(Error::UnknownDataSource(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_default_credentials_and_regions() {
        let mut builder = Application::builder("test");
        builder
            .data_source(
                DataSourceConfig::builder("serverGroups")
                    .default_data(Vec::<Value>::new())
                    .loader_fn(|_app| async {
                        Ok(json!([
                            { "account": "prod", "region": "us-east-1", "cloudProvider": "aws" },
                            { "account": "prod", "region": "us-west-2", "cloudProvider": "aws" },
                            { "account": "dev", "region": "us-central1", "cloudProvider": "gcp" },
                            { "account": "test", "region": "us-central1", "cloudProvider": "gcp" },
                        ]))
                    })
                    .credentials_field("account")
                    .region_field("region")
                    .provider_field("cloudProvider")
                    .build()
                    .unwrap(),
            )
            .unwrap();
        let app = builder.build();
        assert!(app.default_credentials().is_empty());

        app.refresh(false).await;

        let credentials = app.default_credentials();
        assert_eq!(credentials.get("aws").map(String::as_str), Some("prod"));
        assert!(!credentials.contains_key("gcp"));

        let regions = app.default_regions();
        assert_eq!(regions.get("gcp").map(String::as_str), Some("us-central1"));
        assert!(!regions.contains_key("aws"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_auto_refresh_until_disabled() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut builder = Application::builder("test");
        builder.data_source(counting("instances", &calls)).unwrap();
        let app = builder.build();

        app.enable_auto_refresh(Duration::from_secs(1));
        assert!(app.auto_refresh_enabled());
        sleep(Duration::from_millis(3500)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 3);

        app.disable_auto_refresh();
        assert!(!app.auto_refresh_enabled());
        sleep(Duration::from_secs(5)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_auto_refresh_uses_settings_interval() {
        let calls = Arc::new(AtomicUsize::new(0));
        let settings = AppSettings::default().with_auto_refresh_interval(Duration::from_secs(2));
        let mut builder = Application::builder_with_settings("test", settings);
        builder.data_source(counting("instances", &calls)).unwrap();
        let app = builder.build();

        app.enable_auto_refresh_default();
        sleep(Duration::from_millis(1500)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        sleep(Duration::from_secs(3)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        app.destroy();
        assert!(!app.auto_refresh_enabled());
    }

    #[tokio::test(start_paused = true)]
    async fn test_auto_refresh_interval_is_clamped() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut builder = Application::builder("test");
        builder.data_source(counting("instances", &calls)).unwrap();
        let app = builder.build();

        app.enable_auto_refresh(Duration::from_millis(10));
        sleep(Duration::from_millis(500)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        app.destroy();
    }

    #[tokio::test]
    async fn test_dropping_last_handle_tears_down_sources() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut builder = Application::builder("test");
        let source = builder.data_source(counting("instances", &calls)).unwrap();
        let app = builder.build();
        assert!(!source.is_destroyed());

        drop(app);
        assert!(source.is_destroyed());
    }
}
