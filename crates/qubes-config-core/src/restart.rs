// ── Restart after update ──
//
// Once templates are updated, qubes still running on the old root image
// need a restart. The plan lists them and marks which ones the selection
// policy picks; the restarter carries it out on a worker thread while the
// caller polls `is_finished`.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use qubes_admin::{AdminClient, Domain, DomainClass};
use serde::Serialize;
use strum::Display;
use tracing::{error, info};

use crate::error::CoreError;

pub const SERVICEVM_FEATURE: &str = "servicevm";
pub const RESTART_AFTER_UPDATE_FEATURE: &str = "restart-after-update";

/// Which kinds of qubes are selected for restart by default.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RestartSelection {
    pub service_vms: bool,
    pub other_vms: bool,
    /// Also pick qubes that opted out of restarts.
    pub excluded: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RestartCandidate {
    pub name: String,
    pub service: bool,
    pub excluded: bool,
    pub selected: bool,
}

impl RestartCandidate {
    fn from_domain(vm: &Domain, selection: RestartSelection) -> Self {
        let service = vm.feature_bool(SERVICEVM_FEATURE, false);
        let excluded = !vm.feature_bool(RESTART_AFTER_UPDATE_FEATURE, true);
        let selected = selection.excluded
            || (!excluded && if service { selection.service_vms } else { selection.other_vms });
        Self {
            name: vm.name.clone(),
            service,
            excluded,
            selected,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RestartPlan {
    /// Updated templates that are running and will be shut down.
    templates: Vec<String>,
    candidates: Vec<RestartCandidate>,
}

impl RestartPlan {
    /// Collect running qubes based on the updated templates. Disposables
    /// that clean up after themselves are left alone.
    pub fn from_updated(
        client: &dyn AdminClient,
        updated_templates: &[String],
        selection: RestartSelection,
    ) -> Result<Self, CoreError> {
        let mut templates = Vec::new();
        let mut derived: BTreeMap<String, RestartCandidate> = BTreeMap::new();

        for name in updated_templates {
            let template = client.domain(name)?;
            if template.klass != DomainClass::TemplateVM {
                continue;
            }
            if template.running {
                templates.push(template.name.clone());
            }
            for vm in client.derived_vms(name)? {
                let auto_disposable = vm.klass == DomainClass::DispVM && vm.auto_cleanup;
                if vm.running && !auto_disposable {
                    derived
                        .entry(vm.name.clone())
                        .or_insert_with(|| RestartCandidate::from_domain(&vm, selection));
                }
            }
        }

        Ok(Self {
            templates,
            candidates: derived.into_values().collect(),
        })
    }

    pub fn templates(&self) -> &[String] {
        &self.templates
    }

    pub fn candidates(&self) -> &[RestartCandidate] {
        &self.candidates
    }

    pub fn set_selected(&mut self, name: &str, selected: bool) -> Result<(), CoreError> {
        let candidate = self
            .candidates
            .iter_mut()
            .find(|c| c.name == name)
            .ok_or_else(|| CoreError::QubeNotFound { name: name.into() })?;
        candidate.selected = selected;
        Ok(())
    }

    /// Selected service qubes: shut down, then started again.
    pub fn to_restart(&self) -> Vec<String> {
        self.selected(true)
    }

    /// Selected non-service qubes: shut down only.
    pub fn to_shutdown(&self) -> Vec<String> {
        self.selected(false)
    }

    fn selected(&self, service: bool) -> Vec<String> {
        self.candidates
            .iter()
            .filter(|c| c.selected && c.service == service)
            .map(|c| c.name.clone())
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty() && !self.candidates.iter().any(|c| c.selected)
    }
}

// ── Execution ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum RestartStatus {
    NothingToDo,
    Ok,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RestartReport {
    pub status: RestartStatus,
    pub errors: Vec<String>,
}

impl fmt::Display for RestartReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.status {
            RestartStatus::NothingToDo => f.write_str("No qubes need to be restarted."),
            RestartStatus::Ok => f.write_str("All qubes were restarted/shutdown successfully."),
            RestartStatus::Error => {
                writeln!(f, "The following qubes were not restarted/shutdown:")?;
                for line in &self.errors {
                    writeln!(f, "{line}")?;
                }
                Ok(())
            }
        }
    }
}

fn shutdown_all(client: &dyn AdminClient, names: &[String], errors: &mut Vec<String>) -> Vec<String> {
    let mut stopped = Vec::new();
    for name in names {
        match client.shutdown(name, true) {
            Ok(()) => {
                info!(vm = %name, "shut down");
                stopped.push(name.clone());
            }
            Err(err) => {
                error!(vm = %name, %err, "cannot shut down");
                errors.push(format!("{name} cannot shutdown: {err}"));
            }
        }
    }
    stopped
}

/// Run the plan on the calling thread: templates first, then service
/// qubes are restarted, then the other selected qubes are shut down.
/// Failures do not stop the run; they end up in the report.
pub fn perform_restart(client: &dyn AdminClient, plan: &RestartPlan) -> RestartReport {
    if plan.is_empty() {
        return RestartReport {
            status: RestartStatus::NothingToDo,
            errors: Vec::new(),
        };
    }

    let mut errors = Vec::new();
    shutdown_all(client, &plan.templates, &mut errors);

    for name in shutdown_all(client, &plan.to_restart(), &mut errors) {
        match client.start(&name) {
            Ok(()) => info!(vm = %name, "restarted"),
            Err(err) => {
                error!(vm = %name, %err, "cannot start");
                errors.push(format!("{name} cannot start: {err}"));
            }
        }
    }

    shutdown_all(client, &plan.to_shutdown(), &mut errors);

    RestartReport {
        status: if errors.is_empty() {
            RestartStatus::Ok
        } else {
            RestartStatus::Error
        },
        errors,
    }
}

/// A restart running on its own thread.
pub struct Restarter {
    handle: JoinHandle<RestartReport>,
}

impl Restarter {
    pub fn spawn(client: Arc<dyn AdminClient>, plan: RestartPlan) -> Result<Self, CoreError> {
        let handle = thread::Builder::new()
            .name("qubes-restart".into())
            .spawn(move || perform_restart(client.as_ref(), &plan))
            .map_err(|e| CoreError::Internal(format!("cannot start restart worker: {e}")))?;
        Ok(Self { handle })
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Wait for the worker and take its report.
    pub fn join(self) -> Result<RestartReport, CoreError> {
        self.handle
            .join()
            .map_err(|_| CoreError::Internal("restart worker panicked".into()))
    }
}
