use crate::error::{Error, Result};
use futures::FutureExt;
use futures::future::BoxFuture;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

/// Outcome of one settled fetch, or an out-of-band data change
#[derive(Debug, Clone)]
pub enum RefreshEvent<T> {
    Data(T),
    Failed(Error),
}

pub type ErrorCallback = Box<dyn FnMut(Error) + Send + 'static>;
pub type OnceErrorCallback = Box<dyn FnOnce(Error) + Send + 'static>;

/// Handle to a registered refresh listener.
///
/// Dropping the handle leaves the listener running; call [`Subscription::unsubscribe`]
/// or cancel the owner token to stop it.
#[derive(Debug, Clone)]
pub struct Subscription {
    id: String,
    cancel: CancellationToken,
}

impl Subscription {
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn unsubscribe(&self) {
        self.cancel.cancel();
    }

    /// False once unsubscribed, once the owner is gone, or once a one-shot listener fired
    #[must_use]
    pub fn is_active(&self) -> bool {
        !self.cancel.is_cancelled()
    }
}

/// Fans refresh events out to continuous and one-shot listeners
#[derive(Debug)]
pub(crate) struct Notifier<T> {
    key: String,
    events: broadcast::Sender<RefreshEvent<T>>,
    shutdown: CancellationToken,
}

impl<T: Clone + Send + 'static> Notifier<T> {
    pub(crate) fn new(key: String, capacity: usize, shutdown: CancellationToken) -> Self {
        let (events, _rx) = broadcast::channel(capacity);
        Self {
            key,
            events,
            shutdown,
        }
    }

    pub(crate) fn notify(&self, event: RefreshEvent<T>) {
        // No receivers is fine: nobody is listening yet
        let _ = self.events.send(event);
    }

    pub(crate) fn receiver_count(&self) -> usize {
        self.events.receiver_count()
    }

    fn subscription(owner: Option<&CancellationToken>) -> Subscription {
        Subscription {
            id: Uuid::new_v4().to_string(),
            cancel: owner.map_or_else(CancellationToken::new, CancellationToken::child_token),
        }
    }

    /// Resolves with the next data change or failure after this call
    pub(crate) fn next(&self) -> BoxFuture<'static, Result<T>> {
        let mut rx = self.events.subscribe();
        let shutdown = self.shutdown.clone();
        let key = self.key.clone();

        async move {
            loop {
                tokio::select! {
                    biased;
                    () = shutdown.cancelled() => return Err(Error::Destroyed(key.clone())),
                    event = rx.recv() => match event {
                        Ok(RefreshEvent::Data(data)) => return Ok(data),
                        Ok(RefreshEvent::Failed(error)) => return Err(error),
                        Err(RecvError::Lagged(skipped)) => {
                            warn!(key = %key, skipped, "next refresh listener lagged");
                        }
                        Err(RecvError::Closed) => return Err(Error::Destroyed(key.clone())),
                    },
                }
            }
        }
        .boxed()
    }

    pub(crate) fn continuous<F>(
        &self,
        owner: Option<&CancellationToken>,
        mut on_next: F,
        mut on_error: Option<ErrorCallback>,
    ) -> Subscription
    where
        F: FnMut(T) + Send + 'static,
    {
        let subscription = Self::subscription(owner);
        let mut rx = self.events.subscribe();
        let cancel = subscription.cancel.clone();
        let shutdown = self.shutdown.clone();
        let key = self.key.clone();
        let id = subscription.id.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => break,
                    () = shutdown.cancelled() => break,
                    event = rx.recv() => match event {
                        Ok(RefreshEvent::Data(data)) => on_next(data),
                        Ok(RefreshEvent::Failed(error)) => {
                            if let Some(callback) = on_error.as_mut() {
                                callback(error);
                            }
                        }
                        Err(RecvError::Lagged(skipped)) => {
                            warn!(key = %key, subscription = %id, skipped, "refresh listener lagged");
                        }
                        Err(RecvError::Closed) => break,
                    },
                }
            }
            cancel.cancel();
            debug!(key = %key, subscription = %id, "refresh listener stopped");
        });

        subscription
    }

    pub(crate) fn one_shot<F>(
        &self,
        owner: Option<&CancellationToken>,
        on_next: F,
        on_error: Option<OnceErrorCallback>,
    ) -> Subscription
    where
        F: FnOnce(T) + Send + 'static,
    {
        let subscription = Self::subscription(owner);
        let next = self.next();
        let cancel = subscription.cancel.clone();

        tokio::spawn(async move {
            tokio::select! {
                biased;
                () = cancel.cancelled() => {}
                result = next => {
                    cancel.cancel();
                    match result {
                        Ok(data) => on_next(data),
                        Err(Error::Destroyed(_)) => {}
                        Err(error) => {
                            if let Some(callback) = on_error {
                                callback(error);
                            }
                        }
                    }
                }
            }
        });

        subscription
    }
}
