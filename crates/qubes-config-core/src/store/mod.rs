// ── Reactive data store ──
//
// Concurrent entity storage with push-based change notification.

mod collection;
mod device_store;

pub use device_store::{DeviceStore, device_key};
