//! In-process bus hosting property bags.
//!
//! `MemoryBus` answers `GetAll`, `Set` and `Save`, pushes `PropertiesChanged`
//! signals to live subscriptions, and can be told to fail. It keeps a log of
//! every call so tests can assert on what a watcher actually did.

use super::{Address, BusClient, BusOperation, BusRequest, BusSubscription, SignalResult};
use crate::error::BusError;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{Map, Value, json};
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;

/// A call observed by the bus.
#[derive(Debug, Clone)]
pub struct RequestRecord {
    /// When the call arrived
    pub at: Instant,
    /// Target service
    pub service: String,
    /// Operation performed
    pub operation: BusOperation,
    /// Call arguments
    pub payload: Value,
}

struct HostedObject {
    interface: String,
    properties: Map<String, Value>,
    saves: usize,
}

struct Subscriber {
    id: u64,
    service: String,
    path: String,
    sender: mpsc::UnboundedSender<SignalResult>,
}

#[derive(Default)]
struct MemoryBusInner {
    objects: HashMap<(String, String), HostedObject>,
    subscribers: Vec<Subscriber>,
    next_subscriber_id: u64,
    failing_requests: usize,
    failing_subscriptions: usize,
    latency: Duration,
    log: Vec<RequestRecord>,
}

impl MemoryBusInner {
    fn push_signal(&mut self, service: &str, path: &str, body: SignalResult) {
        self.subscribers.retain(|s| {
            !(s.service == service && s.path == path) || s.sender.send(body.clone()).is_ok()
        });
    }
}

/// In-process [`BusClient`] for tests and demos.
///
/// # Examples
///
/// ```rust
/// use propbag_config::bus::{Address, memory::MemoryBus};
/// use serde_json::json;
///
/// let bus = MemoryBus::new();
/// let address = Address::for_key("board");
/// bus.host(&address, json!({ "Name": "alpha", "Volume": 3 }));
/// assert_eq!(bus.properties(&address).unwrap()["Name"], "alpha");
/// ```
#[derive(Clone, Default)]
pub struct MemoryBus {
    inner: Arc<Mutex<MemoryBusInner>>,
}

impl MemoryBus {
    /// Create an empty bus.
    pub fn new() -> Self {
        Self::default()
    }

    /// Host an object at `address`. Non-object `properties` host an empty bag.
    pub fn host(&self, address: &Address, properties: Value) {
        let properties = match properties {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        self.inner.lock().objects.insert(
            (address.service.clone(), address.path.clone()),
            HostedObject {
                interface: address.interface.clone(),
                properties,
                saves: 0,
            },
        );
    }

    /// Change a hosted property and signal the change.
    pub fn set_property(&self, address: &Address, name: &str, value: Value) {
        let mut inner = self.inner.lock();
        if let Some(object) = inner
            .objects
            .get_mut(&(address.service.clone(), address.path.clone()))
        {
            object.properties.insert(name.to_string(), value.clone());
        }
        let body = json!([address.interface, { name: value }, []]);
        inner.push_signal(&address.service, &address.path, Ok(body));
    }

    /// Drop a hosted property and signal it as invalidated.
    pub fn invalidate(&self, address: &Address, name: &str) {
        let mut inner = self.inner.lock();
        if let Some(object) = inner
            .objects
            .get_mut(&(address.service.clone(), address.path.clone()))
        {
            object.properties.remove(name);
        }
        let body = json!([address.interface, {}, [name]]);
        inner.push_signal(&address.service, &address.path, Ok(body));
    }

    /// Push a raw signal body to every subscription on `address`.
    pub fn emit_signal(&self, address: &Address, body: Value) {
        self.inner
            .lock()
            .push_signal(&address.service, &address.path, Ok(body));
    }

    /// Deliver an error to every subscription on `address` and forget them.
    pub fn break_subscriptions(&self, address: &Address) {
        let mut inner = self.inner.lock();
        inner.subscribers.retain(|s| {
            if s.service == address.service && s.path == address.path {
                let _ = s
                    .sender
                    .send(Err(BusError::Subscription("connection lost".to_string())));
                false
            } else {
                true
            }
        });
    }

    /// Fail the next `count` requests with `BusError::Request`.
    pub fn fail_next_requests(&self, count: usize) {
        self.inner.lock().failing_requests = count;
    }

    /// Fail the next `count` subscription registrations.
    pub fn fail_next_subscriptions(&self, count: usize) {
        self.inner.lock().failing_subscriptions = count;
    }

    /// Delay every request and registration by `latency`.
    pub fn set_latency(&self, latency: Duration) {
        self.inner.lock().latency = latency;
    }

    /// Current properties of the object at `address`.
    pub fn properties(&self, address: &Address) -> Option<Map<String, Value>> {
        self.inner
            .lock()
            .objects
            .get(&(address.service.clone(), address.path.clone()))
            .map(|o| o.properties.clone())
    }

    /// Number of `Save` calls the object at `address` has received.
    pub fn save_count(&self, address: &Address) -> usize {
        self.inner
            .lock()
            .objects
            .get(&(address.service.clone(), address.path.clone()))
            .map_or(0, |o| o.saves)
    }

    /// Every call seen so far, in arrival order.
    pub fn requests(&self) -> Vec<RequestRecord> {
        self.inner.lock().log.clone()
    }

    /// Number of calls seen for `operation`.
    pub fn request_count(&self, operation: BusOperation) -> usize {
        self.inner
            .lock()
            .log
            .iter()
            .filter(|r| r.operation == operation)
            .count()
    }

    /// Number of subscriptions currently open.
    pub fn active_subscriptions(&self) -> usize {
        self.inner.lock().subscribers.len()
    }

    async fn admit(&self, request: &BusRequest) {
        let latency = {
            let mut inner = self.inner.lock();
            inner.log.push(RequestRecord {
                at: Instant::now(),
                service: request.service.clone(),
                operation: request.operation,
                payload: request.payload.clone(),
            });
            inner.latency
        };
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
    }
}

fn remove_subscriber(inner: &Weak<Mutex<MemoryBusInner>>, id: u64) {
    if let Some(inner) = inner.upgrade() {
        inner.lock().subscribers.retain(|s| s.id != id);
    }
}

#[async_trait]
impl BusClient for MemoryBus {
    async fn request(&self, request: BusRequest) -> std::result::Result<Value, BusError> {
        self.admit(&request).await;

        let mut inner = self.inner.lock();
        if inner.failing_requests > 0 {
            inner.failing_requests -= 1;
            return Err(BusError::Request(format!(
                "{} on {} failed",
                request.operation, request.service
            )));
        }

        let key = (request.service.clone(), request.object.path.clone());
        let Some(object) = inner.objects.get_mut(&key) else {
            return Err(BusError::UnknownObject {
                service: request.service,
                path: request.object.path,
            });
        };

        match request.operation {
            BusOperation::GetAll => Ok(Value::Object(object.properties.clone())),
            BusOperation::Set => {
                let name = request
                    .payload
                    .get("property_name")
                    .and_then(Value::as_str)
                    .ok_or_else(|| BusError::Request("Set without property_name".to_string()))?
                    .to_string();
                let value = request.payload.get("value").cloned().unwrap_or(Value::Null);
                object.properties.insert(name.clone(), value.clone());
                let body = json!([object.interface, { name: value }, []]);
                inner.push_signal(&key.0, &key.1, Ok(body));
                Ok(Value::Null)
            }
            BusOperation::Save => {
                object.saves += 1;
                Ok(Value::Null)
            }
            BusOperation::PropertiesChanged => Err(BusError::Request(
                "PropertiesChanged is a signal, not a method".to_string(),
            )),
        }
    }

    async fn subscribe(
        &self,
        request: BusRequest,
    ) -> std::result::Result<BusSubscription, BusError> {
        self.admit(&request).await;

        let mut inner = self.inner.lock();
        if inner.failing_subscriptions > 0 {
            inner.failing_subscriptions -= 1;
            return Err(BusError::Subscription(format!(
                "cannot subscribe to {}",
                request.service
            )));
        }

        let (sender, receiver) = mpsc::unbounded_channel();
        let id = inner.next_subscriber_id;
        inner.next_subscriber_id += 1;
        inner.subscribers.push(Subscriber {
            id,
            service: request.service,
            path: request.object.path,
            sender,
        });

        let weak = Arc::downgrade(&self.inner);
        Ok(BusSubscription::new(receiver, move || {
            remove_subscriber(&weak, id)
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn board() -> Address {
        Address::for_key("board")
    }

    #[tokio::test]
    async fn test_get_all_returns_hosted_properties() {
        let bus = MemoryBus::new();
        bus.host(&board(), json!({ "Name": "alpha" }));

        let reply = bus.request(BusRequest::read_all(&board())).await.unwrap();
        assert_eq!(reply, json!({ "Name": "alpha" }));
        assert_eq!(bus.request_count(BusOperation::GetAll), 1);
    }

    #[tokio::test]
    async fn test_unknown_object() {
        let bus = MemoryBus::new();
        let result = bus.request(BusRequest::read_all(&board())).await;
        assert!(matches!(result, Err(BusError::UnknownObject { .. })));
    }

    #[tokio::test]
    async fn test_injected_failures_are_consumed() {
        let bus = MemoryBus::new();
        bus.host(&board(), json!({}));
        bus.fail_next_requests(1);

        assert!(bus.request(BusRequest::read_all(&board())).await.is_err());
        assert!(bus.request(BusRequest::read_all(&board())).await.is_ok());
    }

    #[tokio::test]
    async fn test_set_signals_subscribers() {
        let bus = MemoryBus::new();
        bus.host(&board(), json!({ "Name": "alpha" }));
        let mut subscription = bus
            .subscribe(BusRequest::properties_changed(&board()))
            .await
            .unwrap();

        bus.request(BusRequest::set_property(&board(), "Name", json!("beta")))
            .await
            .unwrap();

        let signal = subscription.next().await.unwrap().unwrap();
        assert_eq!(signal, json!(["fr.partnering.Board", { "Name": "beta" }, []]));
        assert_eq!(bus.properties(&board()).unwrap()["Name"], "beta");
    }

    #[tokio::test]
    async fn test_close_removes_subscriber() {
        let bus = MemoryBus::new();
        let mut subscription = bus
            .subscribe(BusRequest::properties_changed(&board()))
            .await
            .unwrap();
        assert_eq!(bus.active_subscriptions(), 1);

        subscription.close();
        assert_eq!(bus.active_subscriptions(), 0);
    }

    #[tokio::test]
    async fn test_break_subscriptions_delivers_error() {
        let bus = MemoryBus::new();
        let mut subscription = bus
            .subscribe(BusRequest::properties_changed(&board()))
            .await
            .unwrap();

        bus.break_subscriptions(&board());
        assert!(matches!(
            subscription.next().await,
            Some(Err(BusError::Subscription(_)))
        ));
        assert_eq!(subscription.next().await, None);
    }
}
