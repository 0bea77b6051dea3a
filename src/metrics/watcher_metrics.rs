//! Watcher metrics tracking using OpenTelemetry.

use opentelemetry::KeyValue;
use opentelemetry::metrics::{Counter, Gauge, Meter};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

/// Metrics collector for watcher activity.
///
/// Every measurement carries a `service` attribute naming the watched key.
///
/// # Examples
///
/// ```rust,no_run
/// use propbag_config::metrics::WatcherMetrics;
/// use opentelemetry::global;
///
/// let meter = global::meter("propbag-config");
/// let metrics = WatcherMetrics::new(meter);
///
/// metrics.record_read("board");
/// metrics.record_snapshot("board");
/// ```
#[derive(Clone)]
pub struct WatcherMetrics {
    reads: Counter<u64>,
    snapshots: Counter<u64>,
    notifications: Counter<u64>,
    reconnects: Counter<u64>,
    stops: Counter<u64>,
    reconnect_delay: Gauge<u64>,
    snapshot_age_seconds: Gauge<i64>,
    active_watchers: Gauge<i64>,
    last_snapshot: Arc<parking_lot::Mutex<Instant>>,
    last_active: Arc<AtomicUsize>,
}

impl WatcherMetrics {
    /// Create a new metrics collector with the provided meter.
    pub fn new(meter: Meter) -> Self {
        let reads = meter
            .u64_counter("propbag_config.watcher.reads")
            .with_description("Number of full property reads issued")
            .build();

        let snapshots = meter
            .u64_counter("propbag_config.watcher.snapshots")
            .with_description("Number of snapshots emitted to listeners")
            .build();

        let notifications = meter
            .u64_counter("propbag_config.watcher.notifications")
            .with_description("Number of change signals merged")
            .build();

        let reconnects = meter
            .u64_counter("propbag_config.watcher.reconnects")
            .with_description("Number of reconnection attempts scheduled")
            .build();

        let stops = meter
            .u64_counter("propbag_config.watcher.stops")
            .with_description("Number of watchers stopped")
            .build();

        let reconnect_delay = meter
            .u64_gauge("propbag_config.watcher.reconnect_delay")
            .with_description("Delay before the most recently scheduled reconnection")
            .with_unit("ms")
            .build();

        let snapshot_age_seconds = meter
            .i64_gauge("propbag_config.watcher.snapshot_age")
            .with_description("Time since the last emitted snapshot in seconds")
            .with_unit("s")
            .build();

        let active_watchers = meter
            .i64_gauge("propbag_config.watchers.active")
            .with_description("Number of watchers registered with a client")
            .build();

        Self {
            reads,
            snapshots,
            notifications,
            reconnects,
            stops,
            reconnect_delay,
            snapshot_age_seconds,
            active_watchers,
            last_snapshot: Arc::new(parking_lot::Mutex::new(Instant::now())),
            last_active: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Record a full property read.
    pub fn record_read(&self, service: &str) {
        self.reads.add(1, &[service_attr(service)]);
    }

    /// Record a snapshot emission.
    pub fn record_snapshot(&self, service: &str) {
        self.snapshots.add(1, &[service_attr(service)]);
        *self.last_snapshot.lock() = Instant::now();
    }

    /// Record a merged change signal.
    pub fn record_notification(&self, service: &str) {
        self.notifications.add(1, &[service_attr(service)]);
    }

    /// Record a scheduled reconnection and its delay.
    pub fn record_reconnect(&self, service: &str, delay: Duration) {
        let attrs = [service_attr(service)];
        self.reconnects.add(1, &attrs);
        self.reconnect_delay.record(delay.as_millis() as u64, &attrs);
    }

    /// Record a watcher stop.
    pub fn record_stop(&self, service: &str) {
        self.stops.add(1, &[service_attr(service)]);
    }

    /// Update the number of watchers held by a client.
    pub fn update_active_watchers(&self, count: usize) {
        self.last_active.store(count, Ordering::Relaxed);
        self.active_watchers.record(count as i64, &[]);
    }

    /// The watcher count most recently recorded.
    pub fn active_watchers(&self) -> usize {
        self.last_active.load(Ordering::Relaxed)
    }

    /// Update the snapshot age metric.
    ///
    /// This should be called periodically to track how stale the snapshots are.
    pub fn update_snapshot_age(&self) {
        let age_secs = self.last_snapshot.lock().elapsed().as_secs() as i64;
        self.snapshot_age_seconds.record(age_secs, &[]);
    }
}

fn service_attr(service: &str) -> KeyValue {
    KeyValue::new("service", service.to_string())
}
