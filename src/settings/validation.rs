//! Settings validation support.

use crate::error::ValidationError;

/// Trait for settings validation.
///
/// Settings are validated once, after all layers are merged and before any
/// watcher uses them.
///
/// # Examples
///
/// ```rust
/// use propbag_config::settings::{Validate, WatchSettings};
///
/// let settings = WatchSettings {
///     backoff_step_ms: 0,
///     ..WatchSettings::default()
/// };
/// assert!(settings.validate().is_err());
/// ```
pub trait Validate {
    /// Validate the settings.
    ///
    /// # Errors
    ///
    /// Should return a `ValidationError` describing what validation failed.
    fn validate(&self) -> Result<(), ValidationError>;
}
