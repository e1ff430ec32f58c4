// ── Admin client surface ──
//
// Synchronous view of the admin daemon: every method is one remote call
// with no transaction boundary. Implementations must be shareable with
// the restart worker thread, hence `Send + Sync`.

use std::fmt;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::device::{DevClass, DeviceAssignment, DeviceInfo, DeviceInterface, Port};
use crate::domain::Domain;
use crate::error::{Error, Result};

/// Method names used on the wire.
pub mod method {
    pub const FEATURE_SET: &str = "admin.vm.feature.Set";
    pub const FEATURE_REMOVE: &str = "admin.vm.feature.Remove";
    pub const DENIED_ADD: &str = "admin.vm.device.denied.Add";
    pub const DENIED_REMOVE: &str = "admin.vm.device.denied.Remove";
    pub const SHUTDOWN: &str = "admin.vm.Shutdown";
    pub const START: &str = "admin.vm.Start";
}

/// One recorded admin call: destination qube, method, argument, payload.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Call {
    pub dest: String,
    pub method: String,
    pub arg: Option<String>,
    pub payload: Option<String>,
}

impl Call {
    pub fn new(dest: impl Into<String>, method: impl Into<String>) -> Self {
        Self {
            dest: dest.into(),
            method: method.into(),
            arg: None,
            payload: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.arg = Some(arg.into());
        self
    }

    pub fn payload(mut self, payload: impl Into<String>) -> Self {
        self.payload = Some(payload.into());
        self
    }
}

impl fmt::Display for Call {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.dest, self.method)?;
        if let Some(arg) = &self.arg {
            write!(f, " {arg}")?;
        }
        if let Some(payload) = &self.payload {
            write!(f, " {payload}")?;
        }
        Ok(())
    }
}

/// Change notifications pushed by the admin daemon.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdminEvent {
    DeviceAdded { port: Port },
    DeviceRemoved { port: Port },
    DeviceAttached { frontend: String, port: Port },
    DeviceDetached { frontend: String, port: Port },
    AssignmentChanged { frontend: String, devclass: DevClass },
    DomainStarted { name: String },
    DomainStopped { name: String },
    FeatureChanged { vm: String, feature: String },
}

impl AdminEvent {
    /// Device class touched by this event, if it is a device event.
    pub fn devclass(&self) -> Option<DevClass> {
        match self {
            Self::DeviceAdded { port }
            | Self::DeviceRemoved { port }
            | Self::DeviceAttached { port, .. }
            | Self::DeviceDetached { port, .. } => Some(port.devclass),
            Self::AssignmentChanged { devclass, .. } => Some(*devclass),
            Self::DomainStarted { .. } | Self::DomainStopped { .. } | Self::FeatureChanged { .. } => {
                None
            }
        }
    }
}

/// Remote object store of qubes, their features and devices.
pub trait AdminClient: Send + Sync {
    /// All qubes, sorted by name.
    fn domains(&self) -> Result<Vec<Domain>>;

    fn domain(&self, name: &str) -> Result<Domain> {
        self.domains()?
            .into_iter()
            .find(|d| d.name == name)
            .ok_or_else(|| Error::DomainNotFound { name: name.into() })
    }

    /// Qubes based on `template`.
    fn derived_vms(&self, template: &str) -> Result<Vec<Domain>> {
        Ok(self
            .domains()?
            .into_iter()
            .filter(|d| d.template.as_deref() == Some(template))
            .collect())
    }

    fn feature_get(&self, vm: &str, feature: &str) -> Result<Option<String>>;
    fn feature_set(&self, vm: &str, feature: &str, value: &str) -> Result<()>;
    fn feature_delete(&self, vm: &str, feature: &str) -> Result<()>;

    /// Devices of one class exposed by a backend qube.
    fn exposed_devices(&self, backend: &str, class: DevClass) -> Result<Vec<DeviceInfo>>;
    /// Persistent assignments held by a frontend qube.
    fn assigned_devices(&self, frontend: &str, class: DevClass) -> Result<Vec<DeviceAssignment>>;
    /// Ports currently attached to a frontend qube.
    fn attached_devices(&self, frontend: &str, class: DevClass) -> Result<Vec<Port>>;

    fn assign(&self, assignment: &DeviceAssignment) -> Result<()>;
    fn unassign(&self, assignment: &DeviceAssignment) -> Result<()>;
    fn attach(&self, frontend: &str, port: &Port) -> Result<()>;
    fn detach(&self, frontend: &str, port: &Port) -> Result<()>;

    /// Interfaces a qube may never receive.
    fn denied(&self, vm: &str) -> Result<Vec<DeviceInterface>>;
    fn deny(&self, vm: &str, interface: &DeviceInterface) -> Result<()>;
    fn allow(&self, vm: &str, interface: &DeviceInterface) -> Result<()>;

    fn shutdown(&self, vm: &str, force: bool) -> Result<()>;
    fn start(&self, vm: &str) -> Result<()>;

    /// Drop any cached properties so the next read hits the daemon.
    fn clear_cache(&self) {}

    /// Event stream, if this client can push notifications.
    fn subscribe(&self) -> Option<broadcast::Receiver<AdminEvent>> {
        None
    }
}

/// Read a feature as a boolean: absent → `default`, `""` → false.
pub fn feature_bool(client: &dyn AdminClient, vm: &str, feature: &str, default: bool) -> Result<bool> {
    Ok(client
        .feature_get(vm, feature)?
        .map_or(default, |v| !v.is_empty()))
}

/// Apply a boolean feature change: `None` removes the feature if present.
pub fn apply_feature_change(
    client: &dyn AdminClient,
    vm: &str,
    feature: &str,
    value: Option<bool>,
) -> Result<()> {
    match value {
        None => {
            if client.feature_get(vm, feature)?.is_some() {
                client.feature_delete(vm, feature)?;
            }
            Ok(())
        }
        Some(v) => client.feature_set(vm, feature, if v { "1" } else { "" }),
    }
}
