//! The message-bus boundary.
//!
//! The crate never talks to a transport directly. Everything goes through a
//! [`BusClient`]: one-shot requests (`GetAll`, `Set`, `Save`) and standing
//! subscriptions (`PropertiesChanged`). [`memory::MemoryBus`] is an
//! in-process implementation for tests and demos.

mod address;
pub mod memory;

pub use address::Address;

use crate::error::BusError;
use async_trait::async_trait;
use serde_json::{Value, json};
use std::fmt;
use tokio::sync::mpsc;

/// Operation names understood by the remote configuration services.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BusOperation {
    /// Read every property of an interface
    GetAll,
    /// Write one property
    Set,
    /// Persist the current property values
    Save,
    /// Change-notification signal
    PropertiesChanged,
}

impl BusOperation {
    /// Wire name of the operation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::GetAll => "GetAll",
            Self::Set => "Set",
            Self::Save => "Save",
            Self::PropertiesChanged => "PropertiesChanged",
        }
    }
}

impl fmt::Display for BusOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Target object of a request: object path plus the interface to call.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ObjectLocator {
    /// Object path
    pub path: String,
    /// Interface the operation is invoked on
    pub interface: String,
}

/// A request or subscription descriptor.
#[derive(Debug, Clone, PartialEq)]
pub struct BusRequest {
    /// Service the object lives on
    pub service: String,
    /// Operation to perform
    pub operation: BusOperation,
    /// Operation arguments
    pub payload: Value,
    /// Target object
    pub object: ObjectLocator,
}

impl BusRequest {
    /// Read every property of the address's interface.
    pub fn read_all(address: &Address) -> Self {
        Self {
            service: address.service.clone(),
            operation: BusOperation::GetAll,
            payload: json!({ "interface_name": address.interface }),
            object: ObjectLocator {
                path: address.path.clone(),
                interface: address.properties_interface.clone(),
            },
        }
    }

    /// Subscribe to change signals for the address's object.
    pub fn properties_changed(address: &Address) -> Self {
        Self {
            service: address.service.clone(),
            operation: BusOperation::PropertiesChanged,
            payload: Value::Null,
            object: ObjectLocator {
                path: address.path.clone(),
                interface: address.properties_interface.clone(),
            },
        }
    }

    /// Write a single property.
    pub fn set_property(address: &Address, property: &str, value: Value) -> Self {
        Self {
            service: address.service.clone(),
            operation: BusOperation::Set,
            payload: json!({
                "interface_name": address.interface,
                "property_name": property,
                "value": value,
            }),
            object: ObjectLocator {
                path: address.path.clone(),
                interface: address.properties_interface.clone(),
            },
        }
    }

    /// Persist the object's current values.
    pub fn save(address: &Address) -> Self {
        Self {
            service: address.service.clone(),
            operation: BusOperation::Save,
            payload: json!({}),
            object: ObjectLocator {
                path: address.path.clone(),
                interface: address.interface.clone(),
            },
        }
    }
}

/// One delivery on a subscription: a raw signal body or an error.
pub type SignalResult = std::result::Result<Value, BusError>;

/// Client side of the message bus.
///
/// Implementations decide how requests are physically sent. Each `request`
/// completes exactly once. A subscription delivers zero or more signals until
/// it is closed or yields an error.
#[async_trait]
pub trait BusClient: Send + Sync {
    /// Perform a request/response call.
    ///
    /// # Errors
    ///
    /// Returns a `BusError` if the call fails or the object is unknown.
    async fn request(&self, request: BusRequest) -> std::result::Result<Value, BusError>;

    /// Register a standing subscription.
    ///
    /// # Errors
    ///
    /// Returns a `BusError` if registration fails.
    async fn subscribe(&self, request: BusRequest)
    -> std::result::Result<BusSubscription, BusError>;
}

/// A standing subscription returned by [`BusClient::subscribe`].
///
/// Dropping the subscription closes it.
pub struct BusSubscription {
    signals: mpsc::UnboundedReceiver<SignalResult>,
    closer: SubscriptionCloser,
}

impl BusSubscription {
    /// Wrap a signal channel. `on_close` runs once, on the first `close()`
    /// or when the subscription is dropped.
    pub fn new<F>(signals: mpsc::UnboundedReceiver<SignalResult>, on_close: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self {
            signals,
            closer: SubscriptionCloser {
                on_close: Some(Box::new(on_close)),
            },
        }
    }

    /// Wait for the next delivery. `None` means the bus ended the stream.
    pub async fn next(&mut self) -> Option<SignalResult> {
        self.signals.recv().await
    }

    /// Close the subscription. Safe to call more than once.
    pub fn close(&mut self) {
        self.closer.close();
    }

    /// Split into the signal receiver and a handle that can close the
    /// subscription from elsewhere.
    pub fn into_parts(self) -> (mpsc::UnboundedReceiver<SignalResult>, SubscriptionCloser) {
        (self.signals, self.closer)
    }
}

/// Closes a subscription once, explicitly or on drop.
pub struct SubscriptionCloser {
    on_close: Option<Box<dyn FnOnce() + Send>>,
}

impl SubscriptionCloser {
    /// Close the subscription. Safe to call more than once.
    pub fn close(&mut self) {
        if let Some(on_close) = self.on_close.take() {
            on_close();
        }
    }

    /// Whether `close` has already run.
    pub fn is_closed(&self) -> bool {
        self.on_close.is_none()
    }
}

impl Drop for SubscriptionCloser {
    fn drop(&mut self) {
        self.close();
    }
}
