/**
 * Request coalescing for data source fetches
 *
 * Every fetch request takes a fresh token. A fetch chain may only apply its
 * result while its token is still the latest one issued for the source, so a
 * newer request silently supersedes any chain still in flight.
 */
use std::future::Future;
use std::sync::Arc;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Identifies one fetch request on one data source
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RequestToken(u64);

impl RequestToken {
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

/// Issues tokens and remembers the latest one. Lives inside the source's state cell.
#[derive(Debug, Default)]
pub(crate) struct TokenCounter {
    latest: u64,
}

impl TokenCounter {
    pub(crate) fn next(&mut self) -> RequestToken {
        self.latest += 1;
        RequestToken(self.latest)
    }

    pub(crate) fn is_current(&self, token: RequestToken) -> bool {
        token.0 == self.latest
    }
}

/// Opened once the owning application has registered all of its data sources.
///
/// Fetch chains wait on it before invoking their loader, so a loader can always
/// find its sibling sources on the application.
#[derive(Debug, Clone)]
pub struct RegistrationBarrier {
    tx: Arc<watch::Sender<bool>>,
}

impl Default for RegistrationBarrier {
    fn default() -> Self {
        Self::new()
    }
}

impl RegistrationBarrier {
    #[must_use]
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    pub fn open(&self) {
        self.tx.send_replace(true);
    }

    #[must_use]
    pub fn is_open(&self) -> bool {
        *self.tx.borrow()
    }

    pub async fn wait(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives as long as `self`, so this cannot observe a closed channel
        let _ = rx.wait_for(|open| *open).await;
    }
}

/// Starts fetch chains for one data source
#[derive(Debug, Clone)]
pub(crate) struct FetchTrigger {
    key: String,
    barrier: RegistrationBarrier,
    shutdown: CancellationToken,
}

impl FetchTrigger {
    pub(crate) const fn new(key: String, barrier: RegistrationBarrier, shutdown: CancellationToken) -> Self {
        Self {
            key,
            barrier,
            shutdown,
        }
    }

    pub(crate) fn is_shut_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Run `chain` in the background once registration has finished.
    /// The chain is dropped if the source is torn down first.
    pub(crate) fn fire<F>(&self, token: RequestToken, chain: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let key = self.key.clone();
        let barrier = self.barrier.clone();
        let shutdown = self.shutdown.clone();

        debug!(key = %key, token = token.get(), "fetch requested");
        tokio::spawn(async move {
            tokio::select! {
                biased;
                () = shutdown.cancelled() => {
                    debug!(key = %key, token = token.get(), "fetch dropped, source destroyed");
                }
                () = async {
                    barrier.wait().await;
                    chain.await;
                } => {}
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    #[test]
    fn test_token_supersedes_previous() {
        let mut counter = TokenCounter::default();
        let first = counter.next();
        assert!(counter.is_current(first));

        let second = counter.next();
        assert!(!counter.is_current(first));
        assert!(counter.is_current(second));
        assert!(second > first);
    }

    #[tokio::test]
    async fn test_barrier_releases_waiters() {
        let barrier = RegistrationBarrier::new();
        assert!(!barrier.is_open());

        let waiter = barrier.clone();
        let handle = tokio::spawn(async move { waiter.wait().await });

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!handle.is_finished());

        barrier.open();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
        assert!(barrier.is_open());
    }

    #[tokio::test]
    async fn test_fire_waits_for_barrier() {
        let barrier = RegistrationBarrier::new();
        let trigger = FetchTrigger::new("test".to_string(), barrier.clone(), CancellationToken::new());
        let ran = Arc::new(AtomicBool::new(false));

        let flag = ran.clone();
        let mut counter = TokenCounter::default();
        trigger.fire(counter.next(), async move {
            flag.store(true, Ordering::SeqCst);
        });

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!ran.load(Ordering::SeqCst));

        barrier.open();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(ran.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_fire_dropped_on_shutdown() {
        let barrier = RegistrationBarrier::new();
        let shutdown = CancellationToken::new();
        let trigger = FetchTrigger::new("test".to_string(), barrier.clone(), shutdown.clone());
        let ran = Arc::new(AtomicBool::new(false));

        let flag = ran.clone();
        let mut counter = TokenCounter::default();
        trigger.fire(counter.next(), async move {
            flag.store(true, Ordering::SeqCst);
        });

        shutdown.cancel();
        barrier.open();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!ran.load(Ordering::SeqCst));
        assert!(trigger.is_shut_down());
    }
}
