// ── In-process admin backend ──
//
// Implements `AdminClient` over a `Snapshot` held in memory. Every call
// is recorded in order (destination, method, argument, payload) so tests
// and the CLI's dry runs can inspect exactly what would reach qubesd.
// Failures can be injected per (destination, method).

use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use dashmap::DashMap;
use tokio::sync::broadcast;
use tracing::{debug, trace};

use crate::client::{AdminClient, AdminEvent, Call, method};
use crate::device::{DevClass, DeviceAssignment, DeviceInfo, DeviceInterface, Port};
use crate::domain::Domain;
use crate::error::{Error, Result};
use crate::snapshot::{DomainState, Snapshot};

const EVENT_CAPACITY: usize = 256;

pub struct MemoryQubes {
    domains: DashMap<String, DomainState>,
    calls: Mutex<Vec<Call>>,
    failures: DashMap<(String, String), String>,
    events: broadcast::Sender<AdminEvent>,
    autosave: Option<PathBuf>,
}

impl Default for MemoryQubes {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryQubes {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            domains: DashMap::new(),
            calls: Mutex::new(Vec::new()),
            failures: DashMap::new(),
            events,
            autosave: None,
        }
    }

    pub fn from_snapshot(snapshot: Snapshot) -> Self {
        let qubes = Self::new();
        for state in snapshot.domains {
            qubes.domains.insert(state.domain.name.clone(), state);
        }
        qubes
    }

    /// Load a snapshot file and write every mutation back to it.
    pub fn open(path: &Path) -> Result<Self> {
        let snapshot = if path.exists() {
            Snapshot::load(path)?
        } else {
            Snapshot::default()
        };
        let mut qubes = Self::from_snapshot(snapshot);
        qubes.autosave = Some(path.to_path_buf());
        debug!(path = %path.display(), domains = qubes.domains.len(), "loaded qube state");
        Ok(qubes)
    }

    /// Current state, domains sorted by name.
    pub fn snapshot(&self) -> Snapshot {
        let mut domains: Vec<DomainState> = self.domains.iter().map(|r| r.value().clone()).collect();
        domains.sort_by(|a, b| a.domain.name.cmp(&b.domain.name));
        Snapshot { domains }
    }

    pub fn insert_domain(&self, state: impl Into<DomainState>) {
        let state = state.into();
        self.domains.insert(state.domain.name.clone(), state);
    }

    /// Expose a new device on its backend and announce it.
    pub fn expose(&self, device: DeviceInfo) -> Result<()> {
        let port = device.port.clone();
        self.with_domain_mut(&port.backend_domain, |state| {
            state.exposed.retain(|d| d.port != device.port);
            state.exposed.push(device);
            Ok(())
        })?;
        self.emit(AdminEvent::DeviceAdded { port });
        Ok(())
    }

    /// Remove an exposed device from its backend and announce it.
    pub fn unplug(&self, port: &Port) -> Result<()> {
        self.with_domain_mut(&port.backend_domain, |state| {
            state.exposed.retain(|d| &d.port != port);
            Ok(())
        })?;
        self.emit(AdminEvent::DeviceRemoved { port: port.clone() });
        Ok(())
    }

    /// Make every future `(dest, method)` call fail with `message`.
    pub fn fail_on(&self, dest: &str, method: &str, message: &str) {
        self.failures
            .insert((dest.to_owned(), method.to_owned()), message.to_owned());
    }

    /// Calls recorded so far, oldest first.
    pub fn calls(&self) -> Vec<Call> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn clear_calls(&self) {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    /// Publish an event to subscribers. Having no subscriber is fine.
    pub fn emit(&self, event: AdminEvent) {
        let _ = self.events.send(event);
    }

    // ── Private helpers ──────────────────────────────────────────────

    /// Record the call, then fail it if a failure was injected.
    fn issue(&self, call: Call) -> Result<()> {
        trace!(%call, "admin call");
        let failure = self
            .failures
            .get(&(call.dest.clone(), call.method.clone()))
            .map(|m| m.value().clone());
        let (dest, method) = (call.dest.clone(), call.method.clone());
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(call);
        match failure {
            Some(message) => Err(Error::Qubesd {
                dest,
                method,
                message,
            }),
            None => Ok(()),
        }
    }

    fn with_domain<R>(&self, name: &str, f: impl FnOnce(&DomainState) -> R) -> Result<R> {
        self.domains
            .get(name)
            .map(|r| f(r.value()))
            .ok_or_else(|| Error::DomainNotFound { name: name.into() })
    }

    fn with_domain_mut<R>(
        &self,
        name: &str,
        f: impl FnOnce(&mut DomainState) -> Result<R>,
    ) -> Result<R> {
        let result = {
            let mut entry = self
                .domains
                .get_mut(name)
                .ok_or_else(|| Error::DomainNotFound { name: name.into() })?;
            f(entry.value_mut())?
        };
        self.save_if_autosave()?;
        Ok(result)
    }

    fn save_if_autosave(&self) -> Result<()> {
        match &self.autosave {
            Some(path) => self.snapshot().save(path),
            None => Ok(()),
        }
    }

    fn find_exposed(&self, port: &Port) -> Result<DeviceInfo> {
        self.with_domain(&port.backend_domain, |state| {
            state.exposed.iter().find(|d| &d.port == port).cloned()
        })?
        .ok_or_else(|| Error::DeviceNotFound {
            port: port.to_string(),
        })
    }
}

impl AdminClient for MemoryQubes {
    fn domains(&self) -> Result<Vec<Domain>> {
        let mut domains: Vec<Domain> = self.domains.iter().map(|r| r.domain.clone()).collect();
        domains.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(domains)
    }

    fn domain(&self, name: &str) -> Result<Domain> {
        self.with_domain(name, |state| state.domain.clone())
    }

    fn feature_get(&self, vm: &str, feature: &str) -> Result<Option<String>> {
        self.with_domain(vm, |state| state.domain.features.get(feature).cloned())
    }

    fn feature_set(&self, vm: &str, feature: &str, value: &str) -> Result<()> {
        self.issue(Call::new(vm, method::FEATURE_SET).arg(feature).payload(value))?;
        self.with_domain_mut(vm, |state| {
            state.domain.features.insert(feature.to_owned(), value.to_owned());
            Ok(())
        })?;
        self.emit(AdminEvent::FeatureChanged {
            vm: vm.into(),
            feature: feature.into(),
        });
        Ok(())
    }

    fn feature_delete(&self, vm: &str, feature: &str) -> Result<()> {
        self.issue(Call::new(vm, method::FEATURE_REMOVE).arg(feature))?;
        self.with_domain_mut(vm, |state| {
            state.domain.features.shift_remove(feature);
            Ok(())
        })?;
        self.emit(AdminEvent::FeatureChanged {
            vm: vm.into(),
            feature: feature.into(),
        });
        Ok(())
    }

    fn exposed_devices(&self, backend: &str, class: DevClass) -> Result<Vec<DeviceInfo>> {
        self.with_domain(backend, |state| {
            state
                .exposed
                .iter()
                .filter(|d| d.devclass() == class)
                .cloned()
                .collect()
        })
    }

    fn assigned_devices(&self, frontend: &str, class: DevClass) -> Result<Vec<DeviceAssignment>> {
        self.with_domain(frontend, |state| {
            state
                .assigned
                .iter()
                .filter(|a| a.devclass == class)
                .cloned()
                .collect()
        })
    }

    fn attached_devices(&self, frontend: &str, class: DevClass) -> Result<Vec<Port>> {
        self.with_domain(frontend, |state| {
            state
                .attached
                .iter()
                .filter(|p| p.devclass == class)
                .cloned()
                .collect()
        })
    }

    fn assign(&self, assignment: &DeviceAssignment) -> Result<()> {
        let frontend = assignment.frontend_domain.as_str();
        self.issue(
            Call::new(frontend, assignment.devclass.method("Assign"))
                .arg(assignment.encode_arg())
                .payload(assignment.encode_payload()),
        )?;
        self.with_domain_mut(frontend, |state| {
            if state.assigned.iter().any(|a| a.same_reference(assignment)) {
                return Err(Error::AlreadyAssigned {
                    frontend: frontend.into(),
                    device: assignment.encode_arg(),
                });
            }
            state.assigned.push(assignment.clone());
            Ok(())
        })?;
        self.emit(AdminEvent::AssignmentChanged {
            frontend: frontend.into(),
            devclass: assignment.devclass,
        });
        Ok(())
    }

    fn unassign(&self, assignment: &DeviceAssignment) -> Result<()> {
        let frontend = assignment.frontend_domain.as_str();
        self.issue(
            Call::new(frontend, assignment.devclass.method("Unassign")).arg(assignment.encode_arg()),
        )?;
        self.with_domain_mut(frontend, |state| {
            let before = state.assigned.len();
            state.assigned.retain(|a| !a.same_reference(assignment));
            if state.assigned.len() == before {
                return Err(Error::AssignmentNotFound {
                    frontend: frontend.into(),
                    device: assignment.encode_arg(),
                });
            }
            Ok(())
        })?;
        self.emit(AdminEvent::AssignmentChanged {
            frontend: frontend.into(),
            devclass: assignment.devclass,
        });
        Ok(())
    }

    fn attach(&self, frontend: &str, port: &Port) -> Result<()> {
        self.issue(
            Call::new(frontend, port.devclass.method("Attach"))
                .arg(format!("{}+{}", port.backend_domain, port.port_id)),
        )?;
        self.find_exposed(port)?;
        self.with_domain_mut(frontend, |state| {
            if !state.attached.contains(port) {
                state.attached.push(port.clone());
            }
            Ok(())
        })?;
        self.emit(AdminEvent::DeviceAttached {
            frontend: frontend.into(),
            port: port.clone(),
        });
        Ok(())
    }

    fn detach(&self, frontend: &str, port: &Port) -> Result<()> {
        self.issue(
            Call::new(frontend, port.devclass.method("Detach"))
                .arg(format!("{}+{}", port.backend_domain, port.port_id)),
        )?;
        self.with_domain_mut(frontend, |state| {
            state.attached.retain(|p| p != port);
            Ok(())
        })?;
        self.emit(AdminEvent::DeviceDetached {
            frontend: frontend.into(),
            port: port.clone(),
        });
        Ok(())
    }

    fn denied(&self, vm: &str) -> Result<Vec<DeviceInterface>> {
        self.with_domain(vm, |state| state.denied.clone())
    }

    fn deny(&self, vm: &str, interface: &DeviceInterface) -> Result<()> {
        self.issue(Call::new(vm, method::DENIED_ADD).payload(interface.as_str()))?;
        self.with_domain_mut(vm, |state| {
            if !state.denied.contains(interface) {
                state.denied.push(interface.clone());
            }
            Ok(())
        })
    }

    fn allow(&self, vm: &str, interface: &DeviceInterface) -> Result<()> {
        self.issue(Call::new(vm, method::DENIED_REMOVE).payload(interface.as_str()))?;
        self.with_domain_mut(vm, |state| {
            state.denied.retain(|i| i != interface);
            Ok(())
        })
    }

    fn shutdown(&self, vm: &str, force: bool) -> Result<()> {
        let mut call = Call::new(vm, method::SHUTDOWN);
        if force {
            call = call.arg("force");
        }
        self.issue(call)?;
        self.with_domain_mut(vm, |state| {
            state.domain.running = false;
            Ok(())
        })?;
        self.emit(AdminEvent::DomainStopped { name: vm.into() });
        Ok(())
    }

    fn start(&self, vm: &str) -> Result<()> {
        self.issue(Call::new(vm, method::START))?;
        self.with_domain_mut(vm, |state| {
            state.domain.running = true;
            Ok(())
        })?;
        self.emit(AdminEvent::DomainStarted { name: vm.into() });
        Ok(())
    }

    fn subscribe(&self) -> Option<broadcast::Receiver<AdminEvent>> {
        Some(self.events.subscribe())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::device::{AssignmentMode, WILDCARD};
    use crate::domain::DomainClass;

    fn qubes() -> MemoryQubes {
        let qubes = MemoryQubes::new();
        qubes.insert_domain(Domain::new("dom0", DomainClass::AdminVM));
        qubes.insert_domain(Domain::new("sys-usb", DomainClass::AppVM).running(true));
        qubes.insert_domain(Domain::new("work", DomainClass::AppVM));
        qubes
    }

    fn assignment() -> DeviceAssignment {
        DeviceAssignment {
            backend_domain: "sys-usb".into(),
            port_id: WILDCARD.into(),
            device_id: "1:2:u011010".into(),
            devclass: DevClass::Usb,
            frontend_domain: "work".into(),
            mode: AssignmentMode::AutoAttach,
            options: std::collections::BTreeMap::new(),
        }
    }

    #[test]
    fn assign_records_wire_call() {
        let qubes = qubes();
        qubes.assign(&assignment()).unwrap();

        let calls = qubes.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].dest, "work");
        assert_eq!(calls[0].method, "admin.vm.device.usb.Assign");
        assert_eq!(calls[0].arg.as_deref(), Some("sys-usb+_+1+2+u011010"));
        assert_eq!(
            qubes.assigned_devices("work", DevClass::Usb).unwrap(),
            vec![assignment()]
        );
    }

    #[test]
    fn duplicate_assign_is_rejected() {
        let qubes = qubes();
        qubes.assign(&assignment()).unwrap();
        let err = qubes.assign(&assignment()).unwrap_err();
        assert!(matches!(err, Error::AlreadyAssigned { .. }));
    }

    #[test]
    fn unassign_missing_reports_not_found() {
        let qubes = qubes();
        let err = qubes.unassign(&assignment()).unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn injected_failure_is_recorded_and_returned() {
        let qubes = qubes();
        qubes.fail_on("work", "admin.vm.Start", "out of memory");
        let err = qubes.start("work").unwrap_err();
        assert!(err.to_string().contains("out of memory"));
        assert_eq!(qubes.calls().len(), 1);
        assert!(!qubes.domain("work").unwrap().running);
    }

    #[test]
    fn subscribers_see_device_events() {
        let qubes = qubes();
        let mut rx = qubes.subscribe().unwrap();
        let port = Port::new("sys-usb", "2-1", DevClass::Usb);
        qubes.expose(DeviceInfo::new(port.clone(), "1:2")).unwrap();
        assert_eq!(rx.try_recv().unwrap(), AdminEvent::DeviceAdded { port });
    }
}
