#![allow(clippy::unwrap_used)]
// ── Device watcher integration tests ──
//
// Runs the watcher against the in-memory backend with paused time so the
// debounce window is deterministic.

use std::sync::Arc;
use std::time::Duration;

use pretty_assertions::assert_eq;
use qubes_admin::{AdminClient, DevClass, DeviceInfo, Domain, DomainClass, MemoryQubes, Port};
use qubes_config_core::{DEFAULT_DEBOUNCE, DeviceStore, DeviceWatcher};
use tokio_util::sync::CancellationToken;

fn usb(port: &str) -> DeviceInfo {
    DeviceInfo::new(Port::new("sys-usb", port, DevClass::Usb), format!("1234:{port}"))
        .with_product(format!("stick {port}"))
}

fn setup() -> (Arc<MemoryQubes>, Arc<DeviceStore>, DeviceWatcher) {
    let qubes = Arc::new(MemoryQubes::new());
    qubes.insert_domain(Domain::new("sys-usb", DomainClass::AppVM));
    let store = Arc::new(DeviceStore::new());
    let watcher = DeviceWatcher::spawn(
        Arc::clone(&qubes) as Arc<dyn AdminClient>,
        Arc::clone(&store),
        DEFAULT_DEBOUNCE,
        CancellationToken::new(),
    )
    .unwrap();
    (qubes, store, watcher)
}

// ── Debouncing ──────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn test_burst_of_events_refreshes_once() {
    let (qubes, store, watcher) = setup();
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(store.refresh_count(), 1);
    assert!(store.is_empty());

    for port in ["2-1", "2-2", "2-3", "2-4", "2-5"] {
        qubes.expose(usb(port)).unwrap();
    }
    tokio::time::sleep(Duration::from_secs(1)).await;

    assert_eq!(store.refresh_count(), 2);
    assert_eq!(store.devices_of(DevClass::Usb).len(), 5);
    watcher.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_events_spread_apart_refresh_separately() {
    let (qubes, store, watcher) = setup();
    tokio::time::sleep(Duration::from_millis(10)).await;

    qubes.expose(usb("2-1")).unwrap();
    tokio::time::sleep(Duration::from_secs(1)).await;
    qubes.unplug(&Port::new("sys-usb", "2-1", DevClass::Usb)).unwrap();
    tokio::time::sleep(Duration::from_secs(1)).await;

    assert_eq!(store.refresh_count(), 3);
    assert!(store.is_empty());
    watcher.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_refresh_waits_for_debounce_window() {
    let (qubes, store, watcher) = setup();
    tokio::time::sleep(Duration::from_millis(10)).await;

    qubes.expose(usb("2-1")).unwrap();
    tokio::time::sleep(DEFAULT_DEBOUNCE / 2).await;
    assert_eq!(store.refresh_count(), 1);

    qubes.expose(usb("2-2")).unwrap();
    tokio::time::sleep(DEFAULT_DEBOUNCE).await;
    assert_eq!(store.refresh_count(), 2);
    assert_eq!(store.len(), 2);
    watcher.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_refresh_notifies_subscribers() {
    let (qubes, store, watcher) = setup();
    let mut refreshes = store.subscribe_refreshes();
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(*refreshes.borrow_and_update(), 1);

    qubes.expose(usb("2-1")).unwrap();
    tokio::time::timeout(Duration::from_secs(1), refreshes.changed())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(*refreshes.borrow(), 2);
    watcher.shutdown().await;
}
