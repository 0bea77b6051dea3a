//! The configuration client: creates watchers, keeps track of them, and
//! writes configuration back.
//!
//! [`ConfigClient`] is the entry point most applications need. It owns a
//! registry of the watchers it created. A watcher leaves the registry on its
//! own when stopped, and [`ConfigClient::stop_watchers`] tears all of them
//! down at once.

mod write;

use crate::bus::BusClient;
use crate::settings::WatchSettings;
use crate::watcher::{ListenerId, SnapshotCallback, Watcher};
use parking_lot::Mutex;
use std::sync::{Arc, Weak};
use tracing::{debug, trace, warn};

#[cfg(feature = "metrics")]
use crate::metrics::WatcherMetrics;

struct Entry {
    watcher: Watcher,
    removal: ListenerId,
}

type Registry = Arc<Mutex<Vec<Entry>>>;

/// Client for remote property-bag configuration.
///
/// Clones share the same bus and the same watcher registry.
///
/// # Examples
///
/// ```rust,no_run
/// use propbag_config::prelude::*;
/// use propbag_config::bus::memory::MemoryBus;
/// use std::sync::Arc;
///
/// # async fn example() -> propbag_config::error::Result<()> {
/// let client = ConfigClient::new(Arc::new(MemoryBus::new()));
///
/// let watcher = client
///     .watch(
///         "board",
///         Some(Arc::new(|snapshot: &Snapshot| {
///             println!("board: {}", snapshot.to_json());
///         })),
///     )
///     .expect("callback provided");
///
/// let mut properties = serde_json::Map::new();
/// properties.insert("Volume".to_string(), serde_json::json!(7));
/// client.set("board", properties).await?;
///
/// client.stop_watchers();
/// assert!(watcher.is_stopped());
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct ConfigClient {
    bus: Arc<dyn BusClient>,
    settings: WatchSettings,
    watchers: Registry,
    #[cfg(feature = "metrics")]
    metrics: Option<WatcherMetrics>,
}

impl ConfigClient {
    /// Create a client with default settings.
    pub fn new(bus: Arc<dyn BusClient>) -> Self {
        Self {
            bus,
            settings: WatchSettings::default(),
            watchers: Arc::new(Mutex::new(Vec::new())),
            #[cfg(feature = "metrics")]
            metrics: None,
        }
    }

    /// Use `settings` for every watcher and write created from now on.
    pub fn with_settings(mut self, settings: WatchSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Record activity of every watcher created from now on.
    #[cfg(feature = "metrics")]
    pub fn with_metrics(mut self, metrics: WatcherMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Settings in use.
    pub fn settings(&self) -> &WatchSettings {
        &self.settings
    }

    /// Start watching `key`.
    ///
    /// `on_data` receives the full snapshot after the initial read and after
    /// every change. Without a callback nothing is created and `None` is
    /// returned. The watcher stays registered until it is stopped.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    pub fn watch(&self, key: &str, on_data: Option<SnapshotCallback>) -> Option<Watcher> {
        let Some(on_data) = on_data else {
            debug!(key, "refusing to watch without a data callback");
            return None;
        };

        let builder = Watcher::builder(Arc::clone(&self.bus), key)
            .with_settings(self.settings.clone())
            .on_snapshot_shared(on_data);
        #[cfg(feature = "metrics")]
        let builder = match &self.metrics {
            Some(metrics) => builder.with_metrics(metrics.clone()),
            None => builder,
        };
        let watcher = builder.start();

        let registry = self.removal_handle();
        let removal = watcher.on_stopped(move |stopped| registry.remove(stopped));
        self.watchers.lock().push(Entry {
            watcher: watcher.clone(),
            removal,
        });

        // A listener may have stopped the watcher before the removal hook
        // was attached.
        if watcher.is_stopped() {
            self.remove_watcher(&watcher);
        }
        self.record_count();
        Some(watcher)
    }

    /// Forget `watcher` without stopping it. Unknown watchers are ignored.
    pub fn remove_watcher(&self, watcher: &Watcher) {
        self.removal_handle().remove(watcher);
    }

    /// Stop every registered watcher and empty the registry.
    pub fn stop_watchers(&self) {
        let drained: Vec<Entry> = std::mem::take(&mut *self.watchers.lock());
        debug!(count = drained.len(), "stopping all watchers");
        for entry in drained {
            entry.watcher.remove_stopped_listener(entry.removal);
            entry.watcher.stop();
        }
        self.record_count();
    }

    /// Former name of [`stop_watchers`](Self::stop_watchers).
    #[deprecated(since = "0.1.0", note = "use `stop_watchers` instead")]
    pub fn close_subscriptions(&self) {
        warn!("close_subscriptions is deprecated, use stop_watchers");
        self.stop_watchers();
    }

    /// Number of registered watchers.
    pub fn watcher_count(&self) -> usize {
        self.watchers.lock().len()
    }

    fn removal_handle(&self) -> RemovalHandle {
        RemovalHandle {
            watchers: Arc::downgrade(&self.watchers),
            #[cfg(feature = "metrics")]
            metrics: self.metrics.clone(),
        }
    }

    fn record_count(&self) {
        #[cfg(feature = "metrics")]
        if let Some(metrics) = &self.metrics {
            metrics.update_active_watchers(self.watcher_count());
        }
    }
}

/// Removes a watcher from a registry that may already be gone, keeping the
/// active-watcher gauge current.
struct RemovalHandle {
    watchers: Weak<Mutex<Vec<Entry>>>,
    #[cfg(feature = "metrics")]
    metrics: Option<WatcherMetrics>,
}

impl RemovalHandle {
    fn remove(&self, watcher: &Watcher) {
        let Some(watchers) = self.watchers.upgrade() else {
            return;
        };
        let remaining = {
            let mut entries = watchers.lock();
            if let Some(index) = entries.iter().position(|e| &e.watcher == watcher) {
                entries.remove(index);
            }
            entries.len()
        };
        trace!(address = %watcher.address(), remaining, "watcher left the registry");
        #[cfg(feature = "metrics")]
        if let Some(metrics) = &self.metrics {
            metrics.update_active_watchers(remaining);
        }
    }
}
