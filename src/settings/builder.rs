//! Layered loading of [`WatchSettings`].

use super::{
    DEFAULT_BACKOFF_STEP_MS, DEFAULT_INTERFACE_PREFIX, DEFAULT_MAX_BACKOFF_MS,
    DEFAULT_PATH_PREFIX, DEFAULT_PROPERTIES_INTERFACE, Validate, WatchSettings,
};
use crate::error::{ConfigError, Result};
use std::collections::HashMap;
use std::path::PathBuf;

/// Builder for loading `WatchSettings` from files and the environment.
///
/// Layers are merged in this order, later layers overriding earlier ones:
/// built-in defaults, files (in the order given), environment variables,
/// explicit overrides. The merged result is validated before it is returned.
///
/// # Examples
///
/// ```rust,no_run
/// use propbag_config::settings::WatchSettings;
///
/// # fn example() -> propbag_config::error::Result<()> {
/// // PROPBAG_MAX_BACKOFF_MS=60000 -> max_backoff_ms = 60000
/// let settings = WatchSettings::builder()
///     .with_file("config/watch.yaml")
///     .with_env_overrides("PROPBAG", "__")
///     .build()?;
/// # Ok(())
/// # }
/// ```
pub struct WatchSettingsBuilder {
    file_paths: Vec<PathBuf>,
    env_prefix: Option<String>,
    env_separator: Option<String>,
    env_source: Option<HashMap<String, String>>,
    overrides: Vec<(String, config::Value)>,
}

impl WatchSettingsBuilder {
    /// Create a new builder with no layers beyond the defaults.
    pub fn new() -> Self {
        Self {
            file_paths: Vec::new(),
            env_prefix: None,
            env_separator: None,
            env_source: None,
            overrides: Vec::new(),
        }
    }

    /// Add a settings file. The format is detected from the extension
    /// (`.yaml`, `.yml`, `.toml`, `.json`). The file must exist.
    pub fn with_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.file_paths.push(path.into());
        self
    }

    /// Read overrides from environment variables named `{prefix}_{FIELD}`.
    pub fn with_env_overrides(mut self, prefix: &str, separator: &str) -> Self {
        self.env_prefix = Some(prefix.to_string());
        self.env_separator = Some(separator.to_string());
        self
    }

    /// Set a single field, overriding every other layer.
    pub fn with_override(mut self, key: &str, value: impl Into<config::Value>) -> Self {
        self.overrides.push((key.to_string(), value.into()));
        self
    }

    #[cfg(test)]
    fn with_env_source(mut self, vars: HashMap<String, String>) -> Self {
        self.env_source = Some(vars);
        self
    }

    /// Merge all layers and validate the result.
    ///
    /// # Errors
    ///
    /// Returns an error if a file is missing or unparsable, a value has the
    /// wrong type, or validation fails.
    pub fn build(self) -> Result<WatchSettings> {
        let mut builder = config::Config::builder()
            .set_default("interface_prefix", DEFAULT_INTERFACE_PREFIX)
            .and_then(|b| b.set_default("path_prefix", DEFAULT_PATH_PREFIX))
            .and_then(|b| b.set_default("properties_interface", DEFAULT_PROPERTIES_INTERFACE))
            .and_then(|b| b.set_default("backoff_step_ms", DEFAULT_BACKOFF_STEP_MS as i64))
            .and_then(|b| b.set_default("max_backoff_ms", DEFAULT_MAX_BACKOFF_MS as i64))
            .map_err(|e| ConfigError::SettingsError(format!("Failed to set defaults: {}", e)))?;

        for path in &self.file_paths {
            builder = builder.add_source(config::File::from(path.as_path()).required(true));
        }

        if let (Some(prefix), Some(separator)) = (&self.env_prefix, &self.env_separator) {
            let mut env = config::Environment::with_prefix(prefix)
                .prefix_separator("_")
                .separator(separator)
                .try_parsing(true);
            if let Some(vars) = &self.env_source {
                env = env.source(Some(vars.clone().into_iter().collect()));
            }
            builder = builder.add_source(env);
        }

        for (key, value) in self.overrides {
            builder = builder.set_override(&key, value).map_err(|e| {
                ConfigError::SettingsError(format!("Failed to apply override '{}': {}", key, e))
            })?;
        }

        let settings: WatchSettings = builder
            .build()
            .map_err(|e| ConfigError::SettingsError(format!("Failed to build settings: {}", e)))?
            .try_deserialize()
            .map_err(|e| {
                ConfigError::SettingsError(format!("Failed to deserialize settings: {}", e))
            })?;

        settings.validate()?;
        Ok(settings)
    }
}

impl Default for WatchSettingsBuilder {
    fn default() -> Self {
        Self::new()
    }
}
