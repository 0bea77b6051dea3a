//! Decoding of `PropertiesChanged` signal bodies.

use super::{Snapshot, apply_delta};
use crate::error::BusError;
use serde_json::{Map, Value};

/// A push message carrying changed and invalidated properties for one
/// interface.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeNotification {
    /// Interface whose properties changed
    pub interface: String,
    /// Changed properties and their new values (remote names)
    pub changed: Map<String, Value>,
    /// Properties whose value is no longer known (remote names)
    pub invalidated: Vec<String>,
}

impl ChangeNotification {
    /// Fold this notification into `snapshot`.
    pub fn apply_to(self, snapshot: &mut Snapshot) {
        apply_delta(snapshot, self.changed, &self.invalidated);
    }
}

impl TryFrom<Value> for ChangeNotification {
    type Error = BusError;

    /// Decode a signal body of the form
    /// `[interface, {changed}, [invalidated]]`. A missing third element
    /// means nothing was invalidated.
    fn try_from(body: Value) -> Result<Self, Self::Error> {
        let Value::Array(args) = body else {
            return Err(BusError::MalformedReply(
                "PropertiesChanged body is not an array".to_string(),
            ));
        };
        let mut args = args.into_iter();

        let interface = match args.next() {
            Some(Value::String(interface)) => interface,
            _ => {
                return Err(BusError::MalformedReply(
                    "PropertiesChanged is missing its interface name".to_string(),
                ));
            }
        };

        let changed = match args.next() {
            Some(Value::Object(changed)) => changed,
            _ => {
                return Err(BusError::MalformedReply(
                    "PropertiesChanged is missing its changed properties".to_string(),
                ));
            }
        };

        let invalidated = match args.next() {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::Array(names)) => names
                .into_iter()
                .map(|name| match name {
                    Value::String(name) => Ok(name),
                    other => Err(BusError::MalformedReply(format!(
                        "invalidated property name is not a string: {}",
                        other
                    ))),
                })
                .collect::<Result<Vec<_>, _>>()?,
            Some(other) => {
                return Err(BusError::MalformedReply(format!(
                    "invalidated properties are not a list: {}",
                    other
                )));
            }
        };

        Ok(Self {
            interface,
            changed,
            invalidated,
        })
    }
}
