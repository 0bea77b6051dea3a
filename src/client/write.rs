//! Writing configuration back to a remote object.

use super::ConfigClient;
use crate::bus::{Address, BusRequest};
use crate::error::{ConfigError, Result};
use futures::future::join_all;
use serde_json::{Map, Value};
use tracing::{debug, warn};

impl ConfigClient {
    /// Write `properties` to the object behind `key`, then save it.
    ///
    /// One `Set` request is issued per property, all at once. `Save` follows
    /// only when every `Set` succeeded. Nothing is retried or rolled back.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::IncompleteWrite`] naming every step that
    /// failed (property names, or `Save`).
    pub async fn set(&self, key: &str, properties: Map<String, Value>) -> Result<()> {
        let address = Address::with_settings(key, &self.settings);
        debug!(address = %address, properties = properties.len(), "writing configuration");

        let writes = properties.into_iter().map(|(name, value)| {
            let request = BusRequest::set_property(&address, &name, value);
            async move { (name, self.bus.request(request).await) }
        });

        let mut failed = Vec::new();
        for (name, outcome) in join_all(writes).await {
            if let Err(error) = outcome {
                debug!(address = %address, property = %name, error = %error, "set failed");
                failed.push(name);
            }
        }

        if failed.is_empty() {
            match self.bus.request(BusRequest::save(&address)).await {
                Ok(_) => {
                    debug!(address = %address, "configuration saved");
                    return Ok(());
                }
                Err(error) => {
                    debug!(address = %address, error = %error, "save failed");
                    failed.push("Save".to_string());
                }
            }
        }

        warn!(address = %address, failed = ?failed, "Config was not fully updated");
        Err(ConfigError::IncompleteWrite {
            key: key.to_string(),
            failed,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::BusOperation;
    use crate::bus::memory::MemoryBus;
    use serde_json::json;
    use std::sync::Arc;

    fn properties(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => Map::new(),
        }
    }

    #[tokio::test]
    async fn test_set_writes_then_saves() {
        let bus = Arc::new(MemoryBus::new());
        let address = Address::for_key("wifi");
        bus.host(&address, json!({ "Ssid": "home", "Channel": 1 }));
        let client = ConfigClient::new(bus.clone());

        client
            .set("wifi", properties(json!({ "Ssid": "office", "Channel": 6 })))
            .await
            .unwrap();

        let stored = bus.properties(&address).unwrap();
        assert_eq!(stored["Ssid"], "office");
        assert_eq!(stored["Channel"], 6);
        assert_eq!(bus.save_count(&address), 1);

        let operations: Vec<_> = bus.requests().iter().map(|r| r.operation).collect();
        assert_eq!(operations.last(), Some(&BusOperation::Save));
        assert_eq!(bus.request_count(BusOperation::Set), 2);
    }

    #[tokio::test]
    async fn test_empty_write_only_saves() {
        let bus = Arc::new(MemoryBus::new());
        let address = Address::for_key("wifi");
        bus.host(&address, json!({}));
        let client = ConfigClient::new(bus.clone());

        client.set("wifi", Map::new()).await.unwrap();
        assert_eq!(bus.save_count(&address), 1);
        assert_eq!(bus.request_count(BusOperation::Set), 0);
    }

    #[tokio::test]
    async fn test_failed_set_skips_save() {
        let bus = Arc::new(MemoryBus::new());
        let address = Address::for_key("wifi");
        bus.host(&address, json!({ "Ssid": "home" }));
        bus.fail_next_requests(1);
        let client = ConfigClient::new(bus.clone());

        let error = client
            .set("wifi", properties(json!({ "Ssid": "office" })))
            .await
            .unwrap_err();

        match error {
            ConfigError::IncompleteWrite { key, failed } => {
                assert_eq!(key, "wifi");
                assert_eq!(failed, vec!["Ssid".to_string()]);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(bus.save_count(&address), 0);
        assert_eq!(bus.request_count(BusOperation::Save), 0);
    }

    #[tokio::test]
    async fn test_unknown_object_is_incomplete() {
        let bus = Arc::new(MemoryBus::new());
        let client = ConfigClient::new(bus.clone());

        let result = client.set("missing", Map::new()).await;
        assert!(matches!(
            result,
            Err(ConfigError::IncompleteWrite { ref failed, .. }) if failed == &["Save".to_string()]
        ));
    }
}
