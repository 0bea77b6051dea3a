//! Watcher settings: the bus addressing scheme and the reconnection policy.

mod builder;
mod validation;

pub use builder::WatchSettingsBuilder;
pub use validation::Validate;

use crate::error::ValidationError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default namespace prepended to the capitalized key to form an interface name.
pub const DEFAULT_INTERFACE_PREFIX: &str = "fr.partnering.";

/// Default prefix prepended to the capitalized key to form an object path.
pub const DEFAULT_PATH_PREFIX: &str = "/fr/partnering/";

/// Well-known interface serving `GetAll`, `Set` and `PropertiesChanged`.
pub const DEFAULT_PROPERTIES_INTERFACE: &str = "org.freedesktop.DBus.Properties";

/// Default increment added to the reconnection delay after each failure.
pub const DEFAULT_BACKOFF_STEP_MS: u64 = 1_000;

/// Default ceiling for the reconnection delay (5 minutes).
pub const DEFAULT_MAX_BACKOFF_MS: u64 = 300_000;

/// Settings shared by every watcher and write issued from a
/// [`ConfigClient`](crate::client::ConfigClient).
///
/// `WatchSettings::default()` matches the fixed constants used by the remote
/// configuration services; load overrides with [`WatchSettings::builder`].
///
/// # Examples
///
/// ```rust
/// use propbag_config::settings::WatchSettings;
/// use std::time::Duration;
///
/// let settings = WatchSettings::default();
/// assert_eq!(settings.backoff_step(), Duration::from_secs(1));
/// assert_eq!(settings.max_backoff(), Duration::from_secs(300));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchSettings {
    /// Namespace used to build per-key interface names
    pub interface_prefix: String,
    /// Prefix used to build per-key object paths
    pub path_prefix: String,
    /// Interface serving property reads, writes and change signals
    pub properties_interface: String,
    /// Increment added to the reconnection delay after each failure
    pub backoff_step_ms: u64,
    /// Ceiling for the reconnection delay
    pub max_backoff_ms: u64,
}

impl WatchSettings {
    /// Create a new builder for layered settings loading.
    pub fn builder() -> WatchSettingsBuilder {
        WatchSettingsBuilder::new()
    }

    /// Reconnection delay increment.
    pub fn backoff_step(&self) -> Duration {
        Duration::from_millis(self.backoff_step_ms)
    }

    /// Reconnection delay ceiling.
    pub fn max_backoff(&self) -> Duration {
        Duration::from_millis(self.max_backoff_ms)
    }
}

impl Default for WatchSettings {
    fn default() -> Self {
        Self {
            interface_prefix: DEFAULT_INTERFACE_PREFIX.to_string(),
            path_prefix: DEFAULT_PATH_PREFIX.to_string(),
            properties_interface: DEFAULT_PROPERTIES_INTERFACE.to_string(),
            backoff_step_ms: DEFAULT_BACKOFF_STEP_MS,
            max_backoff_ms: DEFAULT_MAX_BACKOFF_MS,
        }
    }
}

impl Validate for WatchSettings {
    fn validate(&self) -> Result<(), ValidationError> {
        let mut errors = Vec::new();

        if self.interface_prefix.is_empty() {
            errors.push(ValidationError::invalid_field(
                "interface_prefix",
                "must not be empty",
            ));
        }
        if !self.path_prefix.starts_with('/') {
            errors.push(ValidationError::invalid_field(
                "path_prefix",
                "must start with '/'",
            ));
        }
        if self.properties_interface.is_empty() {
            errors.push(ValidationError::invalid_field(
                "properties_interface",
                "must not be empty",
            ));
        }
        if self.backoff_step_ms == 0 {
            errors.push(ValidationError::invalid_field(
                "backoff_step_ms",
                "must be greater than 0",
            ));
        }
        if self.max_backoff_ms < self.backoff_step_ms {
            errors.push(ValidationError::invalid_field(
                "max_backoff_ms",
                "must be >= backoff_step_ms",
            ));
        }

        match errors.len() {
            0 => Ok(()),
            1 => Err(errors.remove(0)),
            _ => Err(ValidationError::Multiple(errors)),
        }
    }
}
