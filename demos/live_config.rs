//! Example watching a remote configuration object and writing to it.
//!
//! This example shows how to:
//! - Watch a key and receive full snapshots on every change
//! - Read the latest snapshot without waiting for a callback
//! - Write properties back and save them
//! - Survive a dropped subscription
//! - Stop every watcher at shutdown
//!
//! Run with: cargo run --example live_config

use propbag_config::bus::memory::MemoryBus;
use propbag_config::prelude::*;
use serde_json::{Map, json};
use std::sync::Arc;
use std::time::Duration;

#[tokio::main]
async fn main() -> Result<()> {
    println!("=== Live Configuration Example ===\n");

    // Stand-in for the real bus
    let bus = Arc::new(MemoryBus::new());
    let address = Address::for_key("board");
    bus.host(&address, json!({ "Name": "alpha", "Volume": 3 }));
    println!("Hosting {}\n", address);

    let client = ConfigClient::new(bus.clone());
    let watcher = client
        .watch(
            "board",
            Some(Arc::new(|snapshot: &Snapshot| {
                println!("  snapshot: {}", snapshot.to_json());
            })),
        )
        .expect("callback provided");
    tokio::time::sleep(Duration::from_millis(50)).await;

    println!("\n--- Remote change ---");
    bus.set_property(&address, "Volume", json!(5));
    tokio::time::sleep(Duration::from_millis(50)).await;

    println!("\n--- Writing configuration ---");
    let mut properties = Map::new();
    properties.insert("Name".to_string(), json!("beta"));
    client.set("board", properties).await?;
    tokio::time::sleep(Duration::from_millis(50)).await;
    println!("  saves: {}", bus.save_count(&address));

    println!("\n--- Dropped subscription ---");
    bus.break_subscriptions(&address);
    tokio::time::sleep(Duration::from_millis(1_500)).await;
    println!("  state: {}", watcher.state());

    if let Some(snapshot) = watcher.snapshot() {
        println!("\nLatest name: {:?}", snapshot.get("name"));
    }

    client.stop_watchers();
    println!("\nWatcher stopped: {}", watcher.is_stopped());
    Ok(())
}
