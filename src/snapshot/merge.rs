//! Folding remote property sets and deltas into snapshots.

use super::Snapshot;
use serde_json::{Map, Value};

/// Convert a remote property name to the local convention by lower-casing
/// its first character. The rest of the name is kept as is.
///
/// ```rust
/// use propbag_config::snapshot::to_local_name;
///
/// assert_eq!(to_local_name("WifiSsid"), "wifiSsid");
/// assert_eq!(to_local_name("volume"), "volume");
/// ```
pub fn to_local_name(remote: &str) -> String {
    let mut chars = remote.chars();
    match chars.next() {
        Some(first) => first.to_lowercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Build a fresh snapshot from a full remote read.
pub fn build_snapshot(remote: Map<String, Value>) -> Snapshot {
    let mut snapshot = Snapshot::new();
    for (name, value) in remote {
        snapshot.set(to_local_name(&name), value);
    }
    snapshot
}

/// Apply a change notification's payload to `snapshot` in place.
///
/// Changed values overwrite existing keys, invalidated keys become absent,
/// keys not mentioned are left untouched.
pub fn apply_delta(snapshot: &mut Snapshot, changed: Map<String, Value>, invalidated: &[String]) {
    for (name, value) in changed {
        snapshot.set(to_local_name(&name), value);
    }
    for name in invalidated {
        snapshot.mark_absent(to_local_name(name));
    }
}
