//! Error types for propbag-config.

use std::fmt;

/// Result type alias for propbag-config operations.
pub type Result<T> = std::result::Result<T, ConfigError>;

/// Failures reported by a [`BusClient`](crate::bus::BusClient).
///
/// A watcher treats every one of these as transient and reconnects.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BusError {
    /// A request/response call failed.
    #[error("Bus request failed: {0}")]
    Request(String),

    /// A standing subscription reported an error.
    #[error("Subscription failed: {0}")]
    Subscription(String),

    /// The subscription stream ended without being closed by its owner.
    #[error("Subscription closed by the bus")]
    SubscriptionClosed,

    /// No object is registered at the requested service and path.
    #[error("Unknown object {service} at {path}")]
    UnknownObject {
        /// Service name the request targeted
        service: String,
        /// Object path the request targeted
        path: String,
    },

    /// The bus answered with a body the client cannot interpret.
    #[error("Malformed reply: {0}")]
    MalformedReply(String),
}

/// Errors that can occur when working with remote configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The bus reported a failure.
    #[error(transparent)]
    Bus(#[from] BusError),

    /// The watcher was stopped while an operation was in flight.
    #[error("Watcher stopped")]
    Stopped,

    /// A set-configuration flow failed partway through.
    #[error("Configuration '{key}' was not fully updated ({} step(s) failed)", .failed.len())]
    IncompleteWrite {
        /// Configuration key that was being written
        key: String,
        /// Descriptions of the steps that failed
        failed: Vec<String>,
    },

    /// Failed to load watcher settings.
    #[error("Failed to load settings: {0}")]
    SettingsError(String),

    /// Settings validation failed.
    #[error("Settings validation failed: {0}")]
    ValidationError(String),
}

impl ConfigError {
    /// Whether this error only reflects a watcher that was already stopped.
    pub fn is_stopped(&self) -> bool {
        matches!(self, Self::Stopped)
    }
}

/// Validation error for settings validation.
#[derive(Debug)]
pub enum ValidationError {
    /// Custom validation error with a message.
    Custom(String),

    /// A specific field has an invalid value.
    InvalidField {
        /// The field name
        field: String,
        /// The reason why it's invalid
        reason: String,
    },

    /// Multiple validation errors occurred.
    Multiple(Vec<ValidationError>),
}

impl ValidationError {
    /// Create a custom validation error.
    pub fn custom(msg: impl Into<String>) -> Self {
        Self::Custom(msg.into())
    }

    /// Create an invalid field error.
    pub fn invalid_field(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidField {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Custom(msg) => write!(f, "{}", msg),
            Self::InvalidField { field, reason } => {
                write!(f, "Field '{}' is invalid: {}", field, reason)
            }
            Self::Multiple(errors) => {
                writeln!(f, "Multiple validation errors:")?;
                for (i, err) in errors.iter().enumerate() {
                    writeln!(f, "  {}. {}", i + 1, err)?;
                }
                Ok(())
            }
        }
    }
}

impl std::error::Error for ValidationError {}

impl From<ValidationError> for ConfigError {
    fn from(err: ValidationError) -> Self {
        ConfigError::ValidationError(err.to_string())
    }
}
