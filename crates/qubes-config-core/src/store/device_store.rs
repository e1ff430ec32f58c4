// ── Reactive device store ──
//
// Devices exposed across all qubes, kept current by the device watcher.
// Readers take cheap snapshots or subscribe for changes.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use qubes_admin::{AdminClient, DevClass, DeviceInfo};
use tokio::sync::watch;
use tracing::debug;

use super::collection::EntityCollection;
use crate::error::CoreError;

/// Store key of a device: class, backend and port.
pub fn device_key(device: &DeviceInfo) -> String {
    format!("{}:{}", device.devclass(), device.port)
}

pub struct DeviceStore {
    devices: EntityCollection<DeviceInfo>,
    refreshes: watch::Sender<u64>,
    refreshed_at: watch::Sender<Option<DateTime<Utc>>>,
}

impl Default for DeviceStore {
    fn default() -> Self {
        Self::new()
    }
}

impl DeviceStore {
    pub fn new() -> Self {
        let (refreshes, _) = watch::channel(0);
        let (refreshed_at, _) = watch::channel(None);
        Self {
            devices: EntityCollection::new(),
            refreshes,
            refreshed_at,
        }
    }

    /// Re-read the exposed devices of the given classes from every qube.
    ///
    /// Devices of other classes are left untouched.
    pub fn refresh(&self, client: &dyn AdminClient, classes: &[DevClass]) -> Result<(), CoreError> {
        let mut items = Vec::new();
        for vm in client.domains()? {
            for class in classes {
                for device in client.exposed_devices(&vm.name, *class)? {
                    items.push((device_key(&device), device));
                }
            }
        }
        debug!(classes = ?classes, devices = items.len(), "device store refresh");

        let prefixes: Vec<String> = classes.iter().map(|c| format!("{c}:")).collect();
        self.devices
            .upsert_and_prune(items, |key| prefixes.iter().any(|p| key.starts_with(p)));
        self.refreshes.send_modify(|n| *n += 1);
        self.refreshed_at.send_replace(Some(Utc::now()));
        Ok(())
    }

    pub fn devices(&self) -> Arc<Vec<Arc<DeviceInfo>>> {
        self.devices.snapshot()
    }

    pub fn devices_of(&self, class: DevClass) -> Vec<Arc<DeviceInfo>> {
        self.devices
            .snapshot()
            .iter()
            .filter(|d| d.devclass() == class)
            .cloned()
            .collect()
    }

    pub fn get(&self, key: &str) -> Option<Arc<DeviceInfo>> {
        self.devices.get(key)
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.len() == 0
    }

    /// Number of completed refreshes.
    pub fn refresh_count(&self) -> u64 {
        *self.refreshes.borrow()
    }

    pub fn refreshed_at(&self) -> Option<DateTime<Utc>> {
        *self.refreshed_at.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<Arc<Vec<Arc<DeviceInfo>>>> {
        self.devices.subscribe()
    }

    /// Fires after every refresh with the refresh count.
    pub fn subscribe_refreshes(&self) -> watch::Receiver<u64> {
        self.refreshes.subscribe()
    }

    /// Mutation counter of the underlying collection.
    pub fn version(&self) -> u64 {
        self.devices.version()
    }
}
