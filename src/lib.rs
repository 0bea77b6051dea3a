//! # propbag-config
//!
//! Live local copies of remote property-bag configuration objects.
//!
//! ## Overview
//!
//! Configuration objects live on services reachable over a message bus. Each
//! object exposes a bag of named properties, answers `GetAll`, `Set` and
//! `Save`, and emits `PropertiesChanged` signals. `propbag-config` keeps a
//! local [`Snapshot`](snapshot::Snapshot) of such an object up to date:
//! - Full read first, then a standing subscription to change signals
//! - Changes merged into the snapshot, the whole snapshot delivered each time
//! - Automatic reconnection with a linear, capped backoff
//! - Race-free `stop()`: nothing is emitted or scheduled once it returns
//! - Lock-free access to the latest snapshot using `arc-swap`
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use propbag_config::prelude::*;
//! use propbag_config::bus::memory::MemoryBus;
//! use std::sync::Arc;
//!
//! # async fn example() -> propbag_config::error::Result<()> {
//! let settings = WatchSettings::builder()
//!     .with_file("config/watch.yaml")
//!     .with_env_overrides("PROPBAG", "__")
//!     .build()?;
//!
//! // Any `BusClient` works; `MemoryBus` runs in-process.
//! let client = ConfigClient::new(Arc::new(MemoryBus::new())).with_settings(settings);
//!
//! let watcher = client
//!     .watch(
//!         "board",
//!         Some(Arc::new(|snapshot: &Snapshot| {
//!             println!("board is now {}", snapshot.to_json());
//!         })),
//!     )
//!     .expect("callback provided");
//!
//! // Latest snapshot, no locks
//! if let Some(snapshot) = watcher.snapshot() {
//!     println!("name: {:?}", snapshot.get("name"));
//! }
//!
//! client.stop_watchers();
//! # Ok(())
//! # }
//! ```
//!
//! ## Feature Flags
//!
//! - `metrics`: OpenTelemetry counters and gauges for watcher activity
//!
//! ```toml
//! [dependencies]
//! propbag-config = { version = "0.1", features = ["metrics"] }
//! ```

#![warn(missing_docs, rust_2024_compatibility)]
#![deny(unsafe_code)]

pub mod bus;
pub mod client;
pub mod error;
pub mod settings;
pub mod snapshot;
pub mod watcher;

#[cfg(feature = "metrics")]
pub mod metrics;

/// Convenient re-exports for common usage patterns.
pub mod prelude {
    pub use crate::bus::{Address, BusClient, BusRequest, BusSubscription};
    pub use crate::client::ConfigClient;
    pub use crate::error::{BusError, ConfigError, Result, ValidationError};
    pub use crate::settings::{Validate, WatchSettings};
    pub use crate::snapshot::Snapshot;
    pub use crate::watcher::{SnapshotCallback, Watcher, WatcherState};

    #[cfg(feature = "metrics")]
    pub use crate::metrics::WatcherMetrics;
}
