//! Periodic purge of abandoned provider upload sessions.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use stowaway_storage::StorageAdapter;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Runs [`StorageAdapter::purge_stale_sessions`] for a set of adapters on a
/// fixed interval until stopped.
pub struct MaintenanceSweeper {
    adapters: Arc<Vec<Arc<dyn StorageAdapter>>>,
    max_age: Duration,
    interval: Duration,
    purged: Arc<AtomicUsize>,
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl MaintenanceSweeper {
    pub fn new(
        adapters: Vec<Arc<dyn StorageAdapter>>,
        max_age: Duration,
        interval: Duration,
    ) -> Self {
        Self {
            adapters: Arc::new(adapters),
            max_age,
            interval,
            purged: Arc::new(AtomicUsize::new(0)),
            cancel: CancellationToken::new(),
            task: Mutex::new(None),
        }
    }

    /// Purges every adapter once. Failures are logged and skipped.
    pub async fn sweep_once(&self) -> usize {
        let n = sweep(&self.adapters, self.max_age).await;
        self.purged.fetch_add(n, Ordering::Relaxed);
        n
    }

    /// Starts the background sweep; the first pass runs immediately.
    ///
    /// Must be called inside a Tokio runtime. Calling it again while the
    /// sweep is running has no effect.
    pub fn start(&self) {
        let mut task = self.task.lock().unwrap_or_else(|e| e.into_inner());
        if task.as_ref().is_some_and(|t| !t.is_finished()) {
            return;
        }
        let adapters = Arc::clone(&self.adapters);
        let purged = Arc::clone(&self.purged);
        let cancel = self.cancel.clone();
        let (max_age, interval) = (self.max_age, self.interval);
        *task = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let n = sweep(&adapters, max_age).await;
                        purged.fetch_add(n, Ordering::Relaxed);
                    }
                    _ = cancel.cancelled() => break,
                }
            }
            debug!("maintenance sweeper stopped");
        }));
    }

    /// Stops the background sweep. A pass already in flight finishes first.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    pub fn is_running(&self) -> bool {
        self.task
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .is_some_and(|t| !t.is_finished())
    }

    /// Total sessions purged since creation.
    pub fn purged(&self) -> usize {
        self.purged.load(Ordering::Relaxed)
    }
}

async fn sweep(adapters: &[Arc<dyn StorageAdapter>], max_age: Duration) -> usize {
    let mut total = 0;
    for adapter in adapters {
        match adapter.purge_stale_sessions(max_age).await {
            Ok(0) => {}
            Ok(n) => {
                info!(provider = adapter.name(), purged = n, "purged stale upload sessions");
                total += n;
            }
            Err(e) => warn!(provider = adapter.name(), error = %e, "stale session purge failed"),
        }
    }
    total
}
