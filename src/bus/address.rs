//! Address derivation from configuration keys.

use crate::settings::WatchSettings;
use std::fmt;

/// The (service, interface, path) triple identifying a remote configuration
/// object.
///
/// Derivation is a pure function of the key and the settings' prefixes: two
/// watchers on the same key always compute the same address.
///
/// # Examples
///
/// ```rust
/// use propbag_config::bus::Address;
///
/// let address = Address::for_key("board");
/// assert_eq!(address.service, "board");
/// assert_eq!(address.interface, "fr.partnering.Board");
/// assert_eq!(address.path, "/fr/partnering/Board");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Address {
    /// Service name (the key as given)
    pub service: String,
    /// Per-key interface name
    pub interface: String,
    /// Object path
    pub path: String,
    /// Interface serving property reads, writes and change signals
    pub properties_interface: String,
}

impl Address {
    /// Derive the address of `key` with the default addressing scheme.
    pub fn for_key(key: &str) -> Self {
        Self::with_settings(key, &WatchSettings::default())
    }

    /// Derive the address of `key` using the prefixes from `settings`.
    pub fn with_settings(key: &str, settings: &WatchSettings) -> Self {
        let name = capitalize(key);
        Self {
            service: key.to_string(),
            interface: format!("{}{}", settings.interface_prefix, name),
            path: format!("{}{}", settings.path_prefix, name),
            properties_interface: settings.properties_interface.clone(),
        }
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}#{}", self.service, self.path, self.interface)
    }
}

/// Upper-case the first character, leaving the rest untouched.
fn capitalize(key: &str) -> String {
    let mut chars = key.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
