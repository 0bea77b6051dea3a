//! Watcher lifecycle against an in-process bus: reads, change signals,
//! reconnection delays and stopping.

use propbag_config::bus::memory::MemoryBus;
use propbag_config::bus::{Address, BusOperation};
use propbag_config::prelude::*;
use serde_json::json;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::mpsc::{UnboundedReceiver, unbounded_channel};
use tokio::time::sleep;

fn hosted(key: &str, properties: serde_json::Value) -> (Arc<MemoryBus>, Address) {
    let bus = Arc::new(MemoryBus::new());
    let address = Address::for_key(key);
    bus.host(&address, properties);
    (bus, address)
}

fn start(
    bus: &Arc<MemoryBus>,
    key: &str,
    settings: WatchSettings,
) -> (Watcher, UnboundedReceiver<Snapshot>) {
    let (tx, rx) = unbounded_channel();
    let watcher = Watcher::builder(bus.clone(), key)
        .with_settings(settings)
        .on_snapshot(move |snapshot| {
            let _ = tx.send(snapshot.clone());
        })
        .start();
    (watcher, rx)
}

fn read_gaps(bus: &MemoryBus) -> Vec<u64> {
    let reads: Vec<_> = bus
        .requests()
        .into_iter()
        .filter(|r| r.operation == BusOperation::GetAll)
        .map(|r| r.at)
        .collect();
    reads
        .windows(2)
        .map(|pair| (pair[1] - pair[0]).as_millis() as u64)
        .collect()
}

fn counter() -> (Arc<AtomicUsize>, impl Fn(&Watcher) + Send + Sync + 'static) {
    let count = Arc::new(AtomicUsize::new(0));
    let count_clone = Arc::clone(&count);
    (count, move |_: &Watcher| {
        count_clone.fetch_add(1, Ordering::SeqCst);
    })
}

#[tokio::test(start_paused = true)]
async fn test_failed_reads_back_off_linearly() {
    let (bus, _) = hosted("board", json!({ "Name": "alpha" }));
    bus.fail_next_requests(3);

    let (watcher, mut snapshots) = start(&bus, "board", WatchSettings::default());
    let snapshot = snapshots.recv().await.unwrap();

    assert_eq!(snapshot.get("name"), Some(&json!("alpha")));
    assert_eq!(read_gaps(&bus), vec![1_000, 2_000, 3_000]);
    assert_eq!(watcher.current_delay(), Duration::ZERO);
    assert!(!watcher.has_pending_retry());
    watcher.stop();
}

#[tokio::test(start_paused = true)]
async fn test_delay_is_capped() {
    let (bus, _) = hosted("board", json!({}));
    bus.fail_next_requests(5);
    let settings = WatchSettings {
        backoff_step_ms: 1_000,
        max_backoff_ms: 2_500,
        ..WatchSettings::default()
    };

    let (watcher, mut snapshots) = start(&bus, "board", settings);
    snapshots.recv().await.unwrap();

    assert_eq!(read_gaps(&bus), vec![1_000, 2_000, 2_500, 2_500, 2_500]);
    watcher.stop();
}

#[tokio::test(start_paused = true)]
async fn test_retry_is_pending_between_attempts() {
    let (bus, _) = hosted("board", json!({}));
    bus.fail_next_requests(1);

    let (watcher, _snapshots) = start(&bus, "board", WatchSettings::default());
    sleep(Duration::from_millis(100)).await;

    assert_eq!(watcher.state(), WatcherState::Connecting);
    assert!(watcher.has_pending_retry());
    assert_eq!(watcher.current_delay(), Duration::from_secs(1));

    sleep(Duration::from_secs(1)).await;
    assert_eq!(watcher.state(), WatcherState::Subscribed);
    assert!(!watcher.has_pending_retry());
    watcher.stop();
}

#[tokio::test(start_paused = true)]
async fn test_successful_read_resets_delay() {
    let (bus, _) = hosted("board", json!({ "Name": "alpha" }));
    bus.fail_next_subscriptions(2);

    let (watcher, mut snapshots) = start(&bus, "board", WatchSettings::default());
    for _ in 0..3 {
        snapshots.recv().await.unwrap();
    }
    sleep(Duration::from_millis(10)).await;

    assert_eq!(read_gaps(&bus), vec![1_000, 1_000]);
    assert_eq!(watcher.state(), WatcherState::Subscribed);
    watcher.stop();
}

#[tokio::test(start_paused = true)]
async fn test_changes_are_merged_into_full_snapshot() {
    let (bus, address) = hosted("board", json!({ "Foo": 1, "Bar": 2 }));
    let (watcher, mut snapshots) = start(&bus, "board", WatchSettings::default());
    snapshots.recv().await.unwrap();
    sleep(Duration::from_millis(10)).await;

    bus.emit_signal(
        &address,
        json!([address.interface, { "Bar": 5 }, ["Foo"]]),
    );
    let snapshot = snapshots.recv().await.unwrap();

    let expected: Snapshot = [("foo", None), ("bar", Some(json!(5)))]
        .into_iter()
        .collect();
    assert_eq!(snapshot, expected);
    assert!(snapshot.is_absent("foo"));
    assert_eq!(watcher.snapshot().as_deref(), Some(&expected));
    watcher.stop();
}

#[tokio::test(start_paused = true)]
async fn test_other_interfaces_are_ignored() {
    let (bus, address) = hosted("board", json!({ "Foo": 1 }));
    let (watcher, mut snapshots) = start(&bus, "board", WatchSettings::default());
    snapshots.recv().await.unwrap();
    sleep(Duration::from_millis(10)).await;

    bus.emit_signal(&address, json!(["org.example.Other", { "Foo": 99 }, []]));
    bus.set_property(&address, "Foo", json!(2));

    let snapshot = snapshots.recv().await.unwrap();
    assert_eq!(snapshot.get("foo"), Some(&json!(2)));
    assert_eq!(bus.request_count(BusOperation::GetAll), 1);
    watcher.stop();
}

#[tokio::test(start_paused = true)]
async fn test_broken_subscription_reconnects_with_fresh_read() {
    let (bus, address) = hosted("board", json!({ "Name": "alpha" }));
    let (watcher, mut snapshots) = start(&bus, "board", WatchSettings::default());
    snapshots.recv().await.unwrap();
    sleep(Duration::from_millis(10)).await;

    bus.set_property(&address, "Name", json!("beta"));
    assert_eq!(
        snapshots.recv().await.unwrap().get("name"),
        Some(&json!("beta"))
    );

    bus.break_subscriptions(&address);
    // Not delivered: nobody is subscribed until the watcher reconnects.
    bus.set_property(&address, "Name", json!("gamma"));

    let snapshot = snapshots.recv().await.unwrap();
    assert_eq!(snapshot.get("name"), Some(&json!("gamma")));
    assert_eq!(read_gaps(&bus), vec![1_000 + 10]);
    sleep(Duration::from_millis(10)).await;
    assert_eq!(bus.active_subscriptions(), 1);
    watcher.stop();
}

#[tokio::test(start_paused = true)]
async fn test_malformed_signal_triggers_reconnect() {
    let (bus, address) = hosted("board", json!({ "Name": "alpha" }));
    let (watcher, mut snapshots) = start(&bus, "board", WatchSettings::default());
    snapshots.recv().await.unwrap();
    sleep(Duration::from_millis(10)).await;

    bus.emit_signal(&address, json!("not a change signal"));
    snapshots.recv().await.unwrap();

    assert_eq!(bus.request_count(BusOperation::GetAll), 2);
    assert_eq!(bus.request_count(BusOperation::PropertiesChanged), 2);
    watcher.stop();
}

#[tokio::test(start_paused = true)]
async fn test_stop_during_outstanding_read() {
    let (bus, _) = hosted("board", json!({ "Name": "alpha" }));
    bus.set_latency(Duration::from_secs(5));
    let (stops, on_stopped) = counter();

    let (watcher, mut snapshots) = start(&bus, "board", WatchSettings::default());
    watcher.on_stopped(on_stopped);
    sleep(Duration::from_secs(1)).await;
    assert_eq!(bus.request_count(BusOperation::GetAll), 1);

    watcher.stop();
    sleep(Duration::from_secs(30)).await;

    // Listeners are detached on stop, so the channel closes without data.
    assert!(snapshots.recv().await.is_none());
    assert!(watcher.snapshot().is_none());
    assert_eq!(bus.request_count(BusOperation::GetAll), 1);
    assert_eq!(bus.request_count(BusOperation::PropertiesChanged), 0);
    assert_eq!(bus.active_subscriptions(), 0);
    assert!(!watcher.has_pending_retry());
    assert_eq!(stops.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_stop_during_outstanding_subscription() {
    let (bus, _) = hosted("board", json!({ "Name": "alpha" }));
    bus.set_latency(Duration::from_secs(5));

    let (watcher, mut snapshots) = start(&bus, "board", WatchSettings::default());
    sleep(Duration::from_secs(7)).await;
    assert!(snapshots.recv().await.is_some());
    assert_eq!(bus.request_count(BusOperation::PropertiesChanged), 1);

    watcher.stop();
    sleep(Duration::from_secs(30)).await;

    assert!(snapshots.recv().await.is_none());
    assert_eq!(bus.active_subscriptions(), 0);
    assert_eq!(bus.request_count(BusOperation::GetAll), 1);
}

#[tokio::test(start_paused = true)]
async fn test_stop_cancels_pending_retry() {
    let (bus, _) = hosted("board", json!({}));
    bus.fail_next_requests(1);

    let (watcher, _snapshots) = start(&bus, "board", WatchSettings::default());
    sleep(Duration::from_millis(100)).await;
    assert!(watcher.has_pending_retry());

    watcher.stop();
    assert!(!watcher.has_pending_retry());
    sleep(Duration::from_secs(60)).await;
    assert_eq!(bus.request_count(BusOperation::GetAll), 1);
}

#[tokio::test(start_paused = true)]
async fn test_stop_twice_signals_once() {
    let (bus, address) = hosted("board", json!({ "Name": "alpha" }));
    let (stops, on_stopped) = counter();

    let (watcher, mut snapshots) = start(&bus, "board", WatchSettings::default());
    watcher.on_stopped(on_stopped);
    snapshots.recv().await.unwrap();
    sleep(Duration::from_millis(10)).await;

    watcher.stop();
    watcher.stop();
    assert_eq!(stops.load(Ordering::SeqCst), 1);
    assert_eq!(watcher.state(), WatcherState::Stopped);

    // Late signals and late listeners are ignored.
    bus.set_property(&address, "Name", json!("beta"));
    let late = Arc::new(AtomicUsize::new(0));
    let late_clone = Arc::clone(&late);
    watcher.on_snapshot(move |_| {
        late_clone.fetch_add(1, Ordering::SeqCst);
    });
    sleep(Duration::from_secs(10)).await;

    assert!(snapshots.recv().await.is_none());
    assert_eq!(late.load(Ordering::SeqCst), 0);
    assert_eq!(
        watcher.snapshot().unwrap().get("name"),
        Some(&json!("alpha"))
    );
}

#[tokio::test(start_paused = true)]
async fn test_custom_addressing() {
    let settings = WatchSettings {
        interface_prefix: "org.example.".to_string(),
        path_prefix: "/org/example/".to_string(),
        ..WatchSettings::default()
    };
    let bus = Arc::new(MemoryBus::new());
    let address = Address::with_settings("network", &settings);
    assert_eq!(address.interface, "org.example.Network");
    assert_eq!(address.path, "/org/example/Network");
    bus.host(&address, json!({ "Mode": "dhcp" }));

    let (watcher, mut snapshots) = start(&bus, "network", settings);
    let snapshot = snapshots.recv().await.unwrap();
    assert_eq!(snapshot.get("mode"), Some(&json!("dhcp")));
    assert_eq!(watcher.address(), &address);
    watcher.stop();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_listeners_stopping_each_other_do_not_deadlock() {
    let bus = Arc::new(MemoryBus::new());
    bus.host(&Address::for_key("board"), json!({ "Name": "alpha" }));
    bus.host(&Address::for_key("wifi"), json!({ "Ssid": "home" }));

    let arrived = Arc::new(AtomicUsize::new(0));
    let board_slot: Arc<parking_lot::Mutex<Option<Watcher>>> = Arc::default();
    let wifi_slot: Arc<parking_lot::Mutex<Option<Watcher>>> = Arc::default();
    let (stops, on_stopped) = counter();
    let on_stopped = Arc::new(on_stopped);

    // Each listener waits until both watchers are emitting, then stops the other.
    let listener = |other: Arc<parking_lot::Mutex<Option<Watcher>>>| {
        let arrived = Arc::clone(&arrived);
        move |_: &Snapshot| {
            arrived.fetch_add(1, Ordering::SeqCst);
            let deadline = std::time::Instant::now() + Duration::from_secs(2);
            while (arrived.load(Ordering::SeqCst) < 2 || other.lock().is_none())
                && std::time::Instant::now() < deadline
            {
                std::thread::yield_now();
            }
            if let Some(watcher) = other.lock().clone() {
                watcher.stop();
            }
        }
    };

    let stopped = Arc::clone(&on_stopped);
    let board = Watcher::builder(bus.clone(), "board")
        .on_snapshot(listener(Arc::clone(&wifi_slot)))
        .on_stopped(move |w| stopped(w))
        .start();
    let stopped = Arc::clone(&on_stopped);
    let wifi = Watcher::builder(bus.clone(), "wifi")
        .on_snapshot(listener(Arc::clone(&board_slot)))
        .on_stopped(move |w| stopped(w))
        .start();
    *board_slot.lock() = Some(board.clone());
    *wifi_slot.lock() = Some(wifi.clone());

    let settled = tokio::time::timeout(Duration::from_secs(5), async {
        while stops.load(Ordering::SeqCst) < 2 {
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await;

    assert!(settled.is_ok(), "stop listeners fired: {}", stops.load(Ordering::SeqCst));
    assert!(board.is_stopped() && wifi.is_stopped());
    assert_eq!(board.state(), WatcherState::Stopped);
    assert_eq!(bus.active_subscriptions(), 0);
}
