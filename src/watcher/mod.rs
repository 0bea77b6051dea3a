//! Subscription watcher: a live local copy of one remote property bag.
//!
//! A watcher reads every property of its object, emits the resulting
//! snapshot, then subscribes to change signals and emits the updated
//! snapshot after each one. Any failure of that sequence closes the
//! subscription and schedules a fresh read-then-subscribe after a delay that
//! grows by [`WatchSettings::backoff_step_ms`] up to
//! [`WatchSettings::max_backoff_ms`]. The delay falls back to zero after a
//! successful read or a merged change signal.
//!
//! [`Watcher::stop`] is terminal. It cancels a pending retry and closes the
//! subscription in the same critical section that marks the watcher stopped,
//! so nothing is scheduled once it returns. Listeners are invoked without any
//! lock held; a listener call already under way when `stop()` returns may
//! still finish, but no further listener is called.

mod backoff;
mod listeners;
mod task;

pub use backoff::Backoff;
pub use listeners::ListenerId;

use crate::bus::{Address, BusClient, BusSubscription, SignalResult, SubscriptionCloser};
use crate::error::{ConfigError, Result};
use crate::settings::WatchSettings;
use crate::snapshot::Snapshot;
use arc_swap::ArcSwapOption;
use listeners::ListenerSet;
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

#[cfg(feature = "metrics")]
use crate::metrics::WatcherMetrics;

/// Callback receiving the full current snapshot after every update.
pub type SnapshotCallback = Arc<dyn Fn(&Snapshot) + Send + Sync>;

/// Callback invoked once when a watcher stops.
pub type StoppedCallback = Arc<dyn Fn(&Watcher) + Send + Sync>;

/// Lifecycle of a watcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatcherState {
    /// Reading the object, subscribing, or waiting to retry
    Connecting,
    /// Subscribed and listening for change signals
    Subscribed,
    /// Stopped for good
    Stopped,
}

impl fmt::Display for WatcherState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Connecting => "connecting",
            Self::Subscribed => "subscribed",
            Self::Stopped => "stopped",
        })
    }
}

struct Control {
    state: WatcherState,
    backoff: Backoff,
    retry_pending: bool,
    subscription: Option<SubscriptionCloser>,
    snapshot_listeners: ListenerSet<dyn Fn(&Snapshot) + Send + Sync>,
    stopped_listeners: ListenerSet<dyn Fn(&Watcher) + Send + Sync>,
}

/// State shared between a watcher handle and its driving task.
///
/// Every transition goes through `control`. The lock is never held while a
/// listener runs, so listeners may call back into any watcher. `stopped`
/// mirrors the terminal state for checks between listener calls.
pub(crate) struct Shared {
    address: Address,
    bus: Arc<dyn BusClient>,
    control: Mutex<Control>,
    stopped: AtomicBool,
    current: ArcSwapOption<Snapshot>,
    cancel: CancellationToken,
    #[cfg(feature = "metrics")]
    metrics: Option<WatcherMetrics>,
}

impl Shared {
    fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    fn ensure_running(&self) -> Result<()> {
        if self.is_stopped() {
            return Err(ConfigError::Stopped);
        }
        Ok(())
    }

    /// Publish `snapshot`, reset the backoff and hand the snapshot to every
    /// snapshot listener.
    fn emit(&self, snapshot: &Snapshot) -> Result<()> {
        let listeners = {
            let mut control = self.control.lock();
            if control.state == WatcherState::Stopped {
                return Err(ConfigError::Stopped);
            }
            control.backoff.reset();
            control.snapshot_listeners.callbacks()
        };

        self.current.store(Some(Arc::new(snapshot.clone())));
        #[cfg(feature = "metrics")]
        if let Some(metrics) = &self.metrics {
            metrics.record_snapshot(&self.address.service);
        }

        for callback in listeners {
            if self.is_stopped() {
                break;
            }
            callback(snapshot);
        }

        // A listener may have stopped the watcher.
        self.ensure_running()
    }

    /// Keep the subscription's closer so `stop()` can release it, unless the
    /// watcher stopped while registration was in flight.
    fn attach_subscription(
        &self,
        subscription: BusSubscription,
    ) -> Result<mpsc::UnboundedReceiver<SignalResult>> {
        let (signals, mut closer) = subscription.into_parts();
        let previous = {
            let mut control = self.control.lock();
            if control.state == WatcherState::Stopped {
                drop(control);
                closer.close();
                return Err(ConfigError::Stopped);
            }
            control.state = WatcherState::Subscribed;
            control.subscription.replace(closer)
        };
        drop(previous);
        Ok(signals)
    }

    /// Failure path: release the subscription, grow the delay and mark a
    /// retry as pending. Returns `None` when the watcher is stopped.
    fn schedule_retry(&self, error: &ConfigError) -> Option<Duration> {
        let (closer, delay) = {
            let mut control = self.control.lock();
            if control.state == WatcherState::Stopped || error.is_stopped() {
                trace!(address = %self.address, "watch abandoned after stop");
                return None;
            }
            control.state = WatcherState::Connecting;
            control.retry_pending = true;
            (control.subscription.take(), control.backoff.next_delay())
        };
        if let Some(mut closer) = closer {
            closer.close();
        }

        warn!(
            address = %self.address,
            error = %error,
            delay_ms = delay.as_millis() as u64,
            "watch failed, retrying"
        );
        #[cfg(feature = "metrics")]
        if let Some(metrics) = &self.metrics {
            metrics.record_reconnect(&self.address.service, delay);
        }
        Some(delay)
    }

    /// Clear the pending retry. Returns `false` if the watcher stopped while
    /// the delay elapsed.
    fn begin_attempt(&self) -> bool {
        let mut control = self.control.lock();
        control.retry_pending = false;
        control.state != WatcherState::Stopped
    }
}

/// Handle to a running watcher.
///
/// Handles are cheap to clone; clones refer to the same watcher and compare
/// equal.
///
/// # Examples
///
/// ```rust,no_run
/// use propbag_config::bus::memory::MemoryBus;
/// use propbag_config::watcher::Watcher;
/// use std::sync::Arc;
///
/// # async fn example() {
/// let bus = Arc::new(MemoryBus::new());
/// let watcher = Watcher::builder(bus, "board")
///     .on_snapshot(|snapshot| println!("board is now {}", snapshot.to_json()))
///     .start();
///
/// // Later
/// watcher.stop();
/// # }
/// ```
#[derive(Clone)]
pub struct Watcher {
    shared: Arc<Shared>,
}

impl Watcher {
    /// Create a builder for a watcher on `key`.
    pub fn builder(bus: Arc<dyn BusClient>, key: &str) -> WatcherBuilder {
        WatcherBuilder::new(bus, key)
    }

    /// Address of the watched object.
    pub fn address(&self) -> &Address {
        &self.shared.address
    }

    /// Current lifecycle state.
    pub fn state(&self) -> WatcherState {
        self.shared.control.lock().state
    }

    /// Whether `stop()` has been called.
    pub fn is_stopped(&self) -> bool {
        self.state() == WatcherState::Stopped
    }

    /// The last emitted snapshot, if any. Lock-free.
    pub fn snapshot(&self) -> Option<Arc<Snapshot>> {
        self.shared.current.load_full()
    }

    /// Delay used for the most recent retry, zero once healthy again.
    pub fn current_delay(&self) -> Duration {
        self.shared.control.lock().backoff.current()
    }

    /// Whether a reconnection attempt is waiting for its delay to elapse.
    pub fn has_pending_retry(&self) -> bool {
        self.shared.control.lock().retry_pending
    }

    /// Register a snapshot listener. Ignored once stopped.
    pub fn on_snapshot<F>(&self, callback: F) -> ListenerId
    where
        F: Fn(&Snapshot) + Send + Sync + 'static,
    {
        let mut control = self.shared.control.lock();
        let id = control.snapshot_listeners.add(Arc::new(callback));
        if control.state == WatcherState::Stopped {
            control.snapshot_listeners.remove(id);
        }
        id
    }

    /// Remove a snapshot listener. Returns whether it was registered.
    pub fn remove_snapshot_listener(&self, id: ListenerId) -> bool {
        self.shared.control.lock().snapshot_listeners.remove(id)
    }

    /// Register a listener for the stop signal. Ignored once stopped.
    pub fn on_stopped<F>(&self, callback: F) -> ListenerId
    where
        F: Fn(&Watcher) + Send + Sync + 'static,
    {
        let mut control = self.shared.control.lock();
        let id = control.stopped_listeners.add(Arc::new(callback));
        if control.state == WatcherState::Stopped {
            control.stopped_listeners.remove(id);
        }
        id
    }

    /// Remove a stop listener. Returns whether it was registered.
    pub fn remove_stopped_listener(&self, id: ListenerId) -> bool {
        self.shared.control.lock().stopped_listeners.remove(id)
    }

    /// Stop the watcher.
    ///
    /// Cancels any pending retry, closes the subscription, fires the stop
    /// listeners once and detaches every listener. Calls after the first are
    /// no-ops. Reads or registrations still in flight are ignored when they
    /// complete.
    pub fn stop(&self) {
        let (closer, snapshot_listeners, stopped_listeners) = {
            let mut control = self.shared.control.lock();
            if control.state == WatcherState::Stopped {
                return;
            }
            control.state = WatcherState::Stopped;
            self.shared.stopped.store(true, Ordering::Release);
            self.shared.cancel.cancel();
            control.retry_pending = false;
            (
                control.subscription.take(),
                control.snapshot_listeners.drain(),
                control.stopped_listeners.drain(),
            )
        };
        if let Some(mut closer) = closer {
            closer.close();
        }
        drop(snapshot_listeners);

        debug!(address = %self.shared.address, "watcher stopped");
        #[cfg(feature = "metrics")]
        if let Some(metrics) = &self.shared.metrics {
            metrics.record_stop(&self.shared.address.service);
        }

        for callback in stopped_listeners {
            callback(self);
        }
    }
}

impl PartialEq for Watcher {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }
}

impl Eq for Watcher {}

impl fmt::Debug for Watcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Watcher")
            .field("address", &self.shared.address)
            .field("state", &self.state())
            .finish()
    }
}

/// Builder wiring listeners before a watcher issues its first read.
pub struct WatcherBuilder {
    bus: Arc<dyn BusClient>,
    key: String,
    settings: WatchSettings,
    snapshot_listeners: Vec<SnapshotCallback>,
    stopped_listeners: Vec<StoppedCallback>,
    #[cfg(feature = "metrics")]
    metrics: Option<WatcherMetrics>,
}

impl WatcherBuilder {
    fn new(bus: Arc<dyn BusClient>, key: &str) -> Self {
        Self {
            bus,
            key: key.to_string(),
            settings: WatchSettings::default(),
            snapshot_listeners: Vec::new(),
            stopped_listeners: Vec::new(),
            #[cfg(feature = "metrics")]
            metrics: None,
        }
    }

    /// Use `settings` for addressing and backoff instead of the defaults.
    pub fn with_settings(mut self, settings: WatchSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Register a snapshot listener before the first read.
    pub fn on_snapshot<F>(mut self, callback: F) -> Self
    where
        F: Fn(&Snapshot) + Send + Sync + 'static,
    {
        self.snapshot_listeners.push(Arc::new(callback));
        self
    }

    /// Register a shared snapshot listener before the first read.
    pub fn on_snapshot_shared(mut self, callback: SnapshotCallback) -> Self {
        self.snapshot_listeners.push(callback);
        self
    }

    /// Register a stop listener.
    pub fn on_stopped<F>(mut self, callback: F) -> Self
    where
        F: Fn(&Watcher) + Send + Sync + 'static,
    {
        self.stopped_listeners.push(Arc::new(callback));
        self
    }

    /// Record watcher activity in `metrics`.
    #[cfg(feature = "metrics")]
    pub fn with_metrics(mut self, metrics: WatcherMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Spawn the watcher on the current Tokio runtime and issue its first
    /// read.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    pub fn start(self) -> Watcher {
        let address = Address::with_settings(&self.key, &self.settings);
        debug!(address = %address, "starting watcher");

        let mut snapshot_listeners = ListenerSet::new();
        for callback in self.snapshot_listeners {
            snapshot_listeners.add(callback);
        }
        let mut stopped_listeners = ListenerSet::new();
        for callback in self.stopped_listeners {
            stopped_listeners.add(callback);
        }

        let shared = Arc::new(Shared {
            address,
            bus: self.bus,
            control: Mutex::new(Control {
                state: WatcherState::Connecting,
                backoff: Backoff::from_settings(&self.settings),
                retry_pending: false,
                subscription: None,
                snapshot_listeners,
                stopped_listeners,
            }),
            stopped: AtomicBool::new(false),
            current: ArcSwapOption::empty(),
            cancel: CancellationToken::new(),
            #[cfg(feature = "metrics")]
            metrics: self.metrics,
        });

        tokio::spawn(task::run(Arc::clone(&shared)));
        Watcher { shared }
    }
}
