//! Built-in metrics for watcher activity.
//!
//! Provides OpenTelemetry metrics tracking:
//! - Full reads, emitted snapshots and merged change signals
//! - Scheduled reconnections and their delay
//! - Stopped and active watchers
//! - Snapshot age
//!
//! # Examples
//!
//! ```rust,no_run
//! use propbag_config::prelude::*;
//! use propbag_config::bus::memory::MemoryBus;
//! use propbag_config::metrics::WatcherMetrics;
//! use opentelemetry::global;
//! use std::sync::Arc;
//!
//! let metrics = WatcherMetrics::new(global::meter("my-app"));
//! let client = ConfigClient::new(Arc::new(MemoryBus::new())).with_metrics(metrics);
//! ```

mod watcher_metrics;

pub use watcher_metrics::WatcherMetrics;
