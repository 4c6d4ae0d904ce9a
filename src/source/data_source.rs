use super::alerts::{EntityTags, derive_alerts};
use super::config::AppSettings;
use super::definition::{DataSourceConfig, SourceData, SourceMetadata};
use super::loader::{AfterLoad, Loader, OnLoad};
use super::status::{FetchStatus, Status};
use super::subscription::{ErrorCallback, Notifier, OnceErrorCallback, RefreshEvent, Subscription};
use super::trigger::{FetchTrigger, RegistrationBarrier, RequestToken, TokenCounter};
use crate::application::{Application, ApplicationInner};
use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use futures::FutureExt;
use futures::future::{self, BoxFuture};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// One named, cached slice of application data.
///
/// Handles are cheap to clone and all refer to the same source. The owning
/// [`Application`] creates the source and tears it down; consumers read its
/// state and issue refresh/activate commands.
pub struct DataSource<T: SourceData> {
    inner: Arc<SourceInner<T>>,
}

impl<T: SourceData> Clone for DataSource<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct SourceState<T> {
    status: FetchStatus<T>,
    tokens: TokenCounter,
    active: bool,
    disabled: bool,
    alerts: Vec<EntityTags>,
}

struct SourceInner<T: SourceData> {
    key: String,
    default_data: T,
    loader: Option<Arc<dyn Loader>>,
    on_load: Arc<dyn OnLoad<T>>,
    after_load: Option<AfterLoad>,
    lazy: bool,
    fetch_timeout: Option<Duration>,
    metadata: SourceMetadata,
    state: Mutex<SourceState<T>>,
    status_tx: watch::Sender<FetchStatus<T>>,
    notifier: Notifier<T>,
    trigger: FetchTrigger,
    app: Weak<ApplicationInner>,
}

impl<T: SourceData> DataSource<T> {
    pub(crate) fn new(
        config: DataSourceConfig<T>,
        app: Weak<ApplicationInner>,
        barrier: RegistrationBarrier,
        shutdown: CancellationToken,
        settings: &AppSettings,
    ) -> Self {
        let DataSourceConfig {
            key,
            default_data,
            loader,
            on_load,
            after_load,
            lazy,
            fetch_timeout,
            metadata,
        } = config;

        let status = FetchStatus::new(default_data.clone());
        let (status_tx, _rx) = watch::channel(status.clone());

        Self {
            inner: Arc::new(SourceInner {
                notifier: Notifier::new(key.clone(), settings.effective_capacity(), shutdown.clone()),
                trigger: FetchTrigger::new(key.clone(), barrier, shutdown),
                key,
                default_data,
                loader,
                on_load,
                after_load,
                lazy,
                fetch_timeout: fetch_timeout.or(settings.default_fetch_timeout),
                metadata,
                state: Mutex::new(SourceState {
                    status,
                    tokens: TokenCounter::default(),
                    active: false,
                    disabled: false,
                    alerts: Vec::new(),
                }),
                status_tx,
                app,
            }),
        }
    }

    #[must_use]
    pub fn key(&self) -> &str {
        &self.inner.key
    }

    #[must_use]
    pub fn metadata(&self) -> &SourceMetadata {
        &self.inner.metadata
    }

    #[must_use]
    pub fn lazy(&self) -> bool {
        self.inner.lazy
    }

    #[must_use]
    pub fn default_data(&self) -> &T {
        &self.inner.default_data
    }

    /// Current data; the default until the first successful load
    #[must_use]
    pub fn data(&self) -> T {
        self.inner.data()
    }

    #[must_use]
    pub fn fetch_status(&self) -> FetchStatus<T> {
        self.inner.lock().status.clone()
    }

    #[must_use]
    pub fn status(&self) -> Status {
        self.inner.lock().status.status
    }

    /// The failure of the most recent settled fetch, if it failed
    #[must_use]
    pub fn error(&self) -> Option<Error> {
        self.inner.lock().status.error.clone()
    }

    #[must_use]
    pub fn loaded(&self) -> bool {
        self.inner.lock().status.loaded
    }

    #[must_use]
    pub fn loading(&self) -> bool {
        self.inner.lock().status.is_loading()
    }

    #[must_use]
    pub fn load_failure(&self) -> bool {
        self.inner.lock().status.is_failure()
    }

    #[must_use]
    pub fn active(&self) -> bool {
        self.inner.lock().active
    }

    #[must_use]
    pub fn disabled(&self) -> bool {
        self.inner.lock().disabled
    }

    #[must_use]
    pub fn last_refresh(&self) -> Option<DateTime<Utc>> {
        self.inner.lock().status.last_refresh
    }

    /// Entity tags with alerts among the loaded items, recomputed on every successful load
    #[must_use]
    pub fn alerts(&self) -> Vec<EntityTags> {
        self.inner.lock().alerts.clone()
    }

    #[must_use]
    pub fn is_destroyed(&self) -> bool {
        self.inner.trigger.is_shut_down()
    }

    /// Number of live listeners, including pending `next_refresh` futures
    #[must_use]
    pub fn listener_count(&self) -> usize {
        self.inner.notifier.receiver_count()
    }

    /// Load, or reload, the source.
    ///
    /// The state change happens when this is called; the returned future only
    /// waits for the outcome and yields the data held afterwards. It never fails:
    /// after a failed fetch it yields the unchanged data.
    ///
    /// A source without a loader, a disabled source, and a lazy source that is not
    /// active are reset to their default data and resolve immediately. After the
    /// application is destroyed nothing changes and the current data is returned.
    ///
    /// While a fetch is already running, a non-forced call starts nothing and
    /// resolves with that fetch's outcome. Callers that need data requested after
    /// this call must pass `force = true`.
    pub fn refresh(&self, force: bool) -> BoxFuture<'static, T> {
        let inner = &self.inner;
        debug!(key = %inner.key, force, "refresh requested");

        let mut state = inner.lock();
        if inner.trigger.is_shut_down() {
            return future::ready(state.status.data.clone()).boxed();
        }
        if inner.loader.is_none() || state.disabled || (inner.lazy && !state.active) {
            let data = inner.reset(&mut state);
            return future::ready(data).boxed();
        }

        let next = inner.notifier.next();
        let token = if state.status.is_loading() && !force {
            info!(key = %inner.key, "still loading, skipping refresh");
            None
        } else {
            let token = state.tokens.next();
            let fetching = state.status.fetching();
            inner.publish(&mut state, fetching);
            Some(token)
        };
        drop(state);

        if let Some(token) = token {
            SourceInner::fire(inner, token);
        }

        let inner = Arc::clone(&self.inner);
        async move { next.await.unwrap_or_else(|_| inner.data()) }.boxed()
    }

    /// Mark a lazy source as in use, loading it if it has never loaded
    pub fn activate(&self) {
        let needs_load = {
            let mut state = self.inner.lock();
            if state.active {
                return;
            }
            state.active = true;
            !state.status.loaded
        };
        debug!(key = %self.inner.key, "activated");
        if needs_load {
            drop(self.refresh(false));
        }
    }

    /// Stop participating in refresh cycles. Data is kept.
    pub fn deactivate(&self) {
        self.inner.lock().active = false;
        debug!(key = %self.inner.key, "deactivated");
    }

    /// Wait until the source holds data.
    ///
    /// Resolves at once when the source is disabled, already loaded, or lazy and
    /// inactive. Otherwise waits for the next settled fetch without starting one.
    ///
    /// # Errors
    ///
    /// Fails with the load error when that fetch fails, or with `Error::Destroyed`
    /// when the application is torn down first.
    pub fn ready(&self) -> BoxFuture<'static, Result<T>> {
        {
            let state = self.inner.lock();
            if state.disabled || state.status.loaded || (self.inner.lazy && !state.active) {
                return future::ready(Ok(state.status.data.clone())).boxed();
            }
        }
        self.next_refresh()
    }

    /// Record an out-of-band change to the loaded data.
    ///
    /// `None` re-publishes the current data. Ignored until the first successful load.
    pub fn data_updated(&self, data: Option<T>) {
        let inner = &self.inner;
        let mut state = inner.lock();
        if !state.status.loaded || inner.trigger.is_shut_down() {
            debug!(key = %inner.key, "data update ignored");
            return;
        }

        let data = data.unwrap_or_else(|| state.status.data.clone());
        let updated = state.status.with_data(data.clone());
        inner.publish(&mut state, updated);
        inner.notifier.notify(RefreshEvent::Data(data));
    }

    /// Call `on_next` on every data change and `on_error` on every failed fetch
    /// from now on, until unsubscribed, until `owner` is cancelled, or until the
    /// source is destroyed.
    pub fn on_refresh<F>(
        &self,
        owner: Option<&CancellationToken>,
        on_next: F,
        on_error: Option<ErrorCallback>,
    ) -> Subscription
    where
        F: FnMut(T) + Send + 'static,
    {
        self.inner.notifier.continuous(owner, on_next, on_error)
    }

    /// Call `on_next` or `on_error` once, for the next settled fetch, then detach
    pub fn on_next_refresh<F>(
        &self,
        owner: Option<&CancellationToken>,
        on_next: F,
        on_error: Option<OnceErrorCallback>,
    ) -> Subscription
    where
        F: FnOnce(T) + Send + 'static,
    {
        self.inner.notifier.one_shot(owner, on_next, on_error)
    }

    /// Resolve with the data of the next change after this call.
    ///
    /// # Errors
    ///
    /// Fails with the load error of a failed fetch, or `Error::Destroyed`.
    pub fn next_refresh(&self) -> BoxFuture<'static, Result<T>> {
        self.inner.notifier.next()
    }

    /// Every status snapshot, starting with the current one
    #[must_use]
    pub fn status_stream(&self) -> WatchStream<FetchStatus<T>> {
        WatchStream::new(self.inner.status_tx.subscribe())
    }

    #[must_use]
    pub fn watch_status(&self) -> watch::Receiver<FetchStatus<T>> {
        self.inner.status_tx.subscribe()
    }

    /// Disabling resets the source to its default data and supersedes any fetch in flight
    pub(crate) fn set_disabled(&self, disabled: bool) {
        let inner = &self.inner;
        let mut state = inner.lock();
        if state.disabled == disabled {
            return;
        }
        state.disabled = disabled;
        if disabled && !inner.trigger.is_shut_down() {
            inner.reset(&mut state);
        }
        drop(state);
        debug!(key = %inner.key, disabled, "disabled flag changed");
    }
}

impl<T: SourceData> SourceInner<T> {
    fn lock(&self) -> MutexGuard<'_, SourceState<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn data(&self) -> T {
        self.lock().status.data.clone()
    }

    fn publish(&self, state: &mut SourceState<T>, next: FetchStatus<T>) {
        debug!(key = %self.key, status = %next.status, loaded = next.loaded, "status");
        state.status = next;
        self.status_tx.send_replace(state.status.clone());
    }

    /// Back to default data. A fetch still in flight loses its token and is discarded.
    fn reset(&self, state: &mut SourceState<T>) -> T {
        debug!(key = %self.key, "source may not fetch, resetting to default data");
        state.tokens.next();
        let reset = state.status.reset(self.default_data.clone());
        self.publish(state, reset);
        self.notifier.notify(RefreshEvent::Data(self.default_data.clone()));
        self.default_data.clone()
    }

    /// The result of `token` may still be applied
    fn accepts(&self, state: &SourceState<T>, token: RequestToken) -> bool {
        state.tokens.is_current(token) && !self.trigger.is_shut_down()
    }

    fn fire(self: &Arc<Self>, token: RequestToken) {
        let inner = Arc::clone(self);
        self.trigger.fire(token, async move {
            let outcome = inner.run_chain().await;
            inner.complete(token, outcome);
        });
    }

    async fn run_chain(&self) -> Result<Option<T>> {
        let Some(loader) = self.loader.clone() else {
            return Ok(None);
        };
        let Some(app) = Application::from_weak(&self.app) else {
            return Err(Error::Destroyed(self.key.clone()));
        };
        let on_load = Arc::clone(&self.on_load);

        let chain = async move {
            let raw = loader.load(app.clone()).await?;
            let data = on_load.on_load(app, raw).await?;
            Ok::<_, Error>(data)
        };

        match self.fetch_timeout {
            Some(after) => tokio::time::timeout(after, chain).await.map_err(|_| Error::Timeout {
                key: self.key.clone(),
                after,
            })?,
            None => chain.await,
        }
    }

    fn complete(&self, token: RequestToken, outcome: Result<Option<T>>) {
        match outcome {
            Ok(data) => {
                {
                    let mut state = self.lock();
                    if !self.accepts(&state, token) {
                        debug!(key = %self.key, token = token.get(), "discarding superseded fetch result");
                        return;
                    }
                    let fetched = state.status.fetched(data, Utc::now());
                    state.alerts = derive_alerts(&fetched.data);
                    self.publish(&mut state, fetched);
                }

                self.run_after_load();

                // A request issued since the publish above now owns the notification
                let state = self.lock();
                if self.accepts(&state, token) {
                    self.notifier.notify(RefreshEvent::Data(state.status.data.clone()));
                } else {
                    debug!(key = %self.key, token = token.get(), "fetch superseded before notification");
                }
            }
            Err(error) => {
                let mut state = self.lock();
                if !self.accepts(&state, token) {
                    debug!(key = %self.key, token = token.get(), "discarding superseded fetch failure");
                    return;
                }
                debug!(key = %self.key, error = %error, "fetch failed");
                let failed = state.status.failed(error.clone());
                self.publish(&mut state, failed);
                self.notifier.notify(RefreshEvent::Failed(error));
            }
        }
    }

    fn run_after_load(&self) {
        let Some(hook) = &self.after_load else {
            return;
        };
        let Some(app) = Application::from_weak(&self.app) else {
            return;
        };
        if let Err(e) = hook(&app) {
            warn!(key = %self.key, error = %e, "after load hook failed");
        }
    }
}

impl<T: SourceData> core::fmt::Debug for DataSource<T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let state = self.inner.lock();
        f.debug_struct("DataSource")
            .field("key", &self.inner.key)
            .field("status", &state.status.status)
            .field("loaded", &state.status.loaded)
            .field("active", &state.active)
            .field("disabled", &state.disabled)
            .finish_non_exhaustive()
    }
}
