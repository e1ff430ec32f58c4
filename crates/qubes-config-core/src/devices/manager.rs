// ── System device state ──
//
// One snapshot of exposed devices, assignments and block lists, shared
// by every handler on the devices page so they do not re-query qubesd.

use std::sync::Arc;

use qubes_admin::{AdminClient, DevClass, DeviceAssignment, DeviceInfo, DeviceInterface, Domain};
use strum::IntoEnumIterator;
use tracing::debug;

use crate::error::CoreError;

pub struct DeviceManager {
    client: Arc<dyn AdminClient>,
    domains: Vec<Domain>,
    devices: Vec<DeviceInfo>,
    assignments: Vec<DeviceAssignment>,
    denied: Vec<(String, Vec<DeviceInterface>)>,
}

impl DeviceManager {
    pub fn new(client: Arc<dyn AdminClient>) -> Self {
        Self {
            client,
            domains: Vec::new(),
            devices: Vec::new(),
            assignments: Vec::new(),
            denied: Vec::new(),
        }
    }

    /// Build a manager and load the current system state.
    pub fn load(client: Arc<dyn AdminClient>) -> Result<Self, CoreError> {
        let mut manager = Self::new(client);
        manager.load_data()?;
        Ok(manager)
    }

    pub fn client(&self) -> &Arc<dyn AdminClient> {
        &self.client
    }

    pub fn load_data(&mut self) -> Result<(), CoreError> {
        let domains = self.client.domains()?;
        let mut devices = Vec::new();
        let mut assignments = Vec::new();
        let mut denied = Vec::new();

        for vm in &domains {
            for class in DevClass::iter() {
                devices.extend(self.client.exposed_devices(&vm.name, class)?);
                assignments.extend(self.client.assigned_devices(&vm.name, class)?);
            }
            let blocks = self.client.denied(&vm.name)?;
            if !blocks.is_empty() {
                denied.push((vm.name.clone(), blocks));
            }
        }

        debug!(
            domains = domains.len(),
            devices = devices.len(),
            assignments = assignments.len(),
            "device state loaded"
        );
        self.domains = domains;
        self.devices = devices;
        self.assignments = assignments;
        self.denied = denied;
        Ok(())
    }

    pub fn domains(&self) -> &[Domain] {
        &self.domains
    }

    pub fn domain(&self, name: &str) -> Option<&Domain> {
        self.domains.iter().find(|d| d.name == name)
    }

    pub fn available_devices<'a>(
        &'a self,
        classes: &'a [DevClass],
    ) -> impl Iterator<Item = &'a DeviceInfo> + 'a {
        self.devices
            .iter()
            .filter(move |d| classes.contains(&d.devclass()))
    }

    pub fn assignments<'a>(
        &'a self,
        classes: &'a [DevClass],
    ) -> impl Iterator<Item = &'a DeviceAssignment> + 'a {
        self.assignments
            .iter()
            .filter(move |a| classes.contains(&a.devclass))
    }

    /// Qubes with a non-empty block list.
    pub fn denied(&self) -> &[(String, Vec<DeviceInterface>)] {
        &self.denied
    }

    /// The exposed device an assignment points at, if it is present.
    pub fn find_device(&self, assignment: &DeviceAssignment) -> Option<&DeviceInfo> {
        self.devices.iter().find(|d| assignment.matches(d))
    }
}
