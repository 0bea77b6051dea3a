//! Local snapshots of remote property bags and the rules for keeping them
//! in sync.
//!
//! Remote services capitalize property names (`Volume`); snapshots use the
//! local convention with a lower-cased first character (`volume`).
//! Invalidated properties stay in the snapshot as *absent* rather than being
//! removed, so consumers can still enumerate every key they have seen.

mod merge;
mod notification;

pub use merge::{apply_delta, build_snapshot, to_local_name};
pub use notification::ChangeNotification;

use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;

/// The current local copy of a remote object's properties.
///
/// Each key maps either to a value or to the absent marker (`None`).
///
/// # Examples
///
/// ```rust
/// use propbag_config::snapshot::{apply_delta, build_snapshot};
/// use serde_json::json;
///
/// let remote = json!({ "Foo": 1, "Bar": 2 });
/// let mut snapshot = build_snapshot(remote.as_object().unwrap().clone());
/// assert_eq!(snapshot.get("foo"), Some(&json!(1)));
///
/// let changed = json!({ "Bar": 5 });
/// apply_delta(&mut snapshot, changed.as_object().unwrap().clone(), &["Foo".to_string()]);
/// assert!(snapshot.is_absent("foo"));
/// assert_eq!(snapshot.get("bar"), Some(&json!(5)));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Snapshot {
    properties: BTreeMap<String, Option<Value>>,
}

impl Snapshot {
    /// Create an empty snapshot.
    pub fn new() -> Self {
        Self::default()
    }

    /// Value of `name`, or `None` if the key is unknown or absent.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.properties.get(name).and_then(Option::as_ref)
    }

    /// Whether `name` was seen and later invalidated.
    pub fn is_absent(&self, name: &str) -> bool {
        matches!(self.properties.get(name), Some(None))
    }

    /// Whether `name` was ever seen, absent or not.
    pub fn contains_key(&self, name: &str) -> bool {
        self.properties.contains_key(name)
    }

    /// Number of keys, absent ones included.
    pub fn len(&self) -> usize {
        self.properties.len()
    }

    /// Whether the snapshot has no keys at all.
    pub fn is_empty(&self) -> bool {
        self.properties.is_empty()
    }

    /// Iterate keys in order together with their value or absent marker.
    pub fn iter(&self) -> impl Iterator<Item = (&str, Option<&Value>)> {
        self.properties
            .iter()
            .map(|(name, value)| (name.as_str(), value.as_ref()))
    }

    /// Render as a JSON object; absent properties become `null`.
    pub fn to_json(&self) -> Value {
        Value::Object(
            self.properties
                .iter()
                .map(|(name, value)| (name.clone(), value.clone().unwrap_or(Value::Null)))
                .collect(),
        )
    }

    pub(crate) fn set(&mut self, name: String, value: Value) {
        self.properties.insert(name, Some(value));
    }

    pub(crate) fn mark_absent(&mut self, name: String) {
        self.properties.insert(name, None);
    }
}

impl<K: Into<String>> FromIterator<(K, Option<Value>)> for Snapshot {
    fn from_iter<I: IntoIterator<Item = (K, Option<Value>)>>(iter: I) -> Self {
        Self {
            properties: iter
                .into_iter()
                .map(|(name, value)| (name.into(), value))
                .collect(),
        }
    }
}
