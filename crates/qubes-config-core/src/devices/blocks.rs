// ── Device block lists ──
//
// Each row is one qube with the interface codes it may never receive,
// shown as categories plus leftover codes. Saving diffs the stored codes
// against the edited ones and issues allow/deny calls accordingly.

use std::fmt;
use std::sync::Arc;

use qubes_admin::{AdminClient, DeviceInterface, Domain};
use tracing::debug;

use super::category::{CategoryId, CategorySelection, category_interfaces, parse_interfaces};
use super::manager::DeviceManager;
use super::rule_list::{DeviceRule, DeviceRuleList};
use crate::context::Locale;
use crate::error::CoreError;

// ── BlockPolicy ─────────────────────────────────────────────────────

/// A qube plus its denied interfaces.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockPolicy {
    /// Qube the stored blocks belong to; `None` for a new rule.
    original_vm: Option<String>,
    vm: Option<String>,
    /// Codes currently stored on the system.
    interfaces: Vec<DeviceInterface>,
    categories: Vec<CategoryId>,
    other_interfaces: Vec<DeviceInterface>,
    changed: bool,
}

impl BlockPolicy {
    pub fn new(vm: impl Into<String>, interfaces: Vec<DeviceInterface>) -> Self {
        let vm = vm.into();
        let (categories, other_interfaces) = parse_interfaces(&interfaces);
        Self {
            original_vm: Some(vm.clone()),
            vm: Some(vm),
            interfaces,
            categories,
            other_interfaces,
            changed: false,
        }
    }

    pub fn blank() -> Self {
        Self {
            original_vm: None,
            vm: None,
            interfaces: Vec::new(),
            categories: Vec::new(),
            other_interfaces: Vec::new(),
            changed: false,
        }
    }

    pub fn vm(&self) -> Option<&str> {
        self.vm.as_deref()
    }

    pub fn original_vm(&self) -> Option<&str> {
        self.original_vm.as_deref()
    }

    pub fn interfaces(&self) -> &[DeviceInterface] {
        &self.interfaces
    }

    pub fn categories(&self) -> &[CategoryId] {
        &self.categories
    }

    pub fn other_interfaces(&self) -> &[DeviceInterface] {
        &self.other_interfaces
    }

    pub fn set_vm(&mut self, vm: impl Into<String>) {
        self.vm = Some(vm.into());
        self.changed = true;
    }

    pub fn set_categories(&mut self, categories: Vec<CategoryId>) {
        self.categories = categories;
        self.changed = true;
    }

    /// Codes the row will hold after save.
    pub fn new_interfaces(&self) -> Vec<DeviceInterface> {
        let mut codes = category_interfaces(&self.categories);
        codes.extend(self.other_interfaces.iter().cloned());
        codes
    }

    /// Markup listing what is blocked, without the qube name.
    pub fn description(&self) -> String {
        let names = self
            .categories
            .iter()
            .map(|c| c.name().to_owned())
            .chain(self.other_interfaces.iter().map(ToString::to_string))
            .collect::<Vec<_>>()
            .join(", ");
        format!("<b>{names}</b> cannot be attached to ")
    }

    fn apply(&mut self, client: &dyn AdminClient) -> Result<(), CoreError> {
        let vm = self
            .vm
            .clone()
            .ok_or_else(|| CoreError::validation("Select a qube"))?;
        let new = self.new_interfaces();
        let same_vm = self.original_vm.as_deref() == Some(vm.as_str());

        if let Some(original) = &self.original_vm {
            if same_vm {
                for interface in self.interfaces.iter().filter(|i| !new.contains(i)) {
                    client.allow(original, interface)?;
                }
            } else {
                self.allow_all(client)?;
            }
        }

        for interface in &new {
            let already = self.interfaces.contains(interface) || self.other_interfaces.contains(interface);
            if !same_vm || !already {
                client.deny(&vm, interface)?;
            }
        }

        debug!(vm = %vm, blocked = new.len(), "block list saved");
        self.interfaces = new;
        self.original_vm = Some(vm);
        self.changed = false;
        Ok(())
    }

    fn allow_all(&self, client: &dyn AdminClient) -> Result<(), CoreError> {
        let Some(original) = &self.original_vm else {
            return Ok(());
        };
        for interface in &self.interfaces {
            client.allow(original, interface)?;
        }
        Ok(())
    }
}

impl fmt::Display for BlockPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.description(), self.vm.as_deref().unwrap_or_default())
    }
}

impl DeviceRule for BlockPolicy {
    fn is_changed(&self) -> bool {
        self.changed
    }

    fn save(&mut self, client: &dyn AdminClient) -> Result<(), CoreError> {
        if !self.changed {
            return Ok(());
        }
        self.apply(client)
    }

    fn remove(&self, client: &dyn AdminClient) -> Result<(), CoreError> {
        self.allow_all(client)
    }

    fn describe(&self) -> String {
        self.to_string()
    }
}

// ── BlockDraft ──────────────────────────────────────────────────────

/// Buffered edit of one block rule.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BlockDraft {
    pub vm: Option<String>,
    pub selection: CategorySelection,
    /// Codes set outside these tools; shown but not editable.
    pub other_interfaces: Vec<DeviceInterface>,
}

impl BlockDraft {
    pub fn for_new() -> Self {
        Self::default()
    }

    pub fn from_policy(policy: &BlockPolicy) -> Self {
        Self {
            vm: policy.vm.clone(),
            selection: CategorySelection::from_categories(&policy.categories),
            other_interfaces: policy.other_interfaces.clone(),
        }
    }

    pub fn validity_error(&self) -> Option<String> {
        if self.vm.is_none() {
            return Some("Select a qube".into());
        }
        if !self.selection.any_checked() && self.other_interfaces.is_empty() {
            return Some("Select at least one device category".into());
        }
        None
    }

    pub fn is_valid(&self) -> bool {
        self.validity_error().is_none()
    }

    pub fn apply_to(&self, policy: &mut BlockPolicy) {
        if let Some(vm) = &self.vm {
            if policy.vm.as_ref() != Some(vm) {
                policy.set_vm(vm.clone());
            }
        }
        let categories = self.selection.compressed();
        if policy.categories != categories {
            policy.set_categories(categories);
        }
    }
}

// ── BlockHandler ────────────────────────────────────────────────────

pub struct BlockHandler {
    client: Arc<dyn AdminClient>,
    locale: Arc<Locale>,
    domains: Vec<Domain>,
    rules: DeviceRuleList<BlockPolicy>,
}

impl BlockHandler {
    pub fn new(manager: &DeviceManager, locale: Arc<Locale>) -> Self {
        let mut handler = Self {
            client: Arc::clone(manager.client()),
            locale,
            domains: Vec::new(),
            rules: DeviceRuleList::default(),
        };
        handler.reset(manager);
        handler
    }

    pub fn rows(&self) -> &[BlockPolicy] {
        self.rules.rows()
    }

    pub fn removed(&self) -> &[BlockPolicy] {
        self.rules.removed()
    }

    /// Qubes a block can be set on: everything but the admin qube.
    pub fn selectable_vms(&self) -> impl Iterator<Item = &str> {
        self.domains
            .iter()
            .filter(|d| !d.is_admin())
            .map(|d| d.name.as_str())
    }

    fn check(&self, draft: &BlockDraft) -> Result<(), CoreError> {
        if let Some(message) = draft.validity_error() {
            return Err(CoreError::validation(self.locale.tr(&message).to_owned()));
        }
        if let Some(vm) = &draft.vm {
            if !self.selectable_vms().any(|name| name == vm) {
                return Err(CoreError::QubeNotFound { name: vm.clone() });
            }
        }
        Ok(())
    }

    pub fn new_draft(&self) -> BlockDraft {
        BlockDraft::for_new()
    }

    pub fn commit_new(&mut self, draft: &BlockDraft) -> Result<String, CoreError> {
        self.check(draft)?;
        let mut policy = BlockPolicy::blank();
        draft.apply_to(&mut policy);
        policy.changed = true;
        let text = policy.to_string();
        self.rules.push(policy);
        Ok(text)
    }

    pub fn edit_draft(&self, index: usize) -> Result<BlockDraft, CoreError> {
        self.rules
            .rows()
            .get(index)
            .map(BlockDraft::from_policy)
            .ok_or_else(|| row_not_found(index))
    }

    pub fn commit_edit(&mut self, index: usize, draft: &BlockDraft) -> Result<String, CoreError> {
        self.check(draft)?;
        let policy = self.rules.row_mut(index).ok_or_else(|| row_not_found(index))?;
        draft.apply_to(policy);
        Ok(policy.to_string())
    }

    pub fn remove_rule(&mut self, index: usize) -> Result<String, CoreError> {
        self.rules
            .remove(index)
            .map(ToString::to_string)
            .ok_or_else(|| row_not_found(index))
    }

    pub fn save(&mut self) -> Result<(), CoreError> {
        debug!(rows = self.rules.len(), removed = self.rules.removed().len(), "saving block lists");
        self.rules.save(self.client.as_ref())
    }

    pub fn reset(&mut self, manager: &DeviceManager) {
        self.domains = manager.domains().to_vec();
        let rows = manager
            .denied()
            .iter()
            .map(|(vm, interfaces)| BlockPolicy::new(vm.clone(), interfaces.clone()))
            .collect();
        self.rules.replace(rows);
    }

    pub fn get_unsaved(&self) -> String {
        self.rules
            .unsaved_lines(
                self.locale.tr("Blocked devices changed: "),
                self.locale.tr("Removed block list: "),
            )
            .join("\n")
    }
}

fn row_not_found(index: usize) -> CoreError {
    CoreError::NotFound {
        entity_type: "row".into(),
        identifier: index.to_string(),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use pretty_assertions::assert_eq;
    use qubes_admin::client::method;
    use qubes_admin::{Domain, DomainClass, MemoryQubes};

    use super::*;

    fn codes(list: &[&str]) -> Vec<DeviceInterface> {
        list.iter().map(|c| DeviceInterface::new(*c).unwrap()).collect()
    }

    fn client_with(vms: &[&str]) -> MemoryQubes {
        let client = MemoryQubes::new();
        for vm in vms {
            client.insert_domain(Domain::new(*vm, DomainClass::AppVM));
        }
        client
    }

    #[test]
    fn description_lists_categories_then_codes() {
        let policy = BlockPolicy::new("work", codes(&["u07****", "uff0000"]));
        assert_eq!(
            policy.to_string(),
            "<b>Printers, uff0000</b> cannot be attached to work"
        );
    }

    #[test]
    fn same_vm_save_only_touches_the_difference() {
        let client = client_with(&["work"]);
        let mut policy = BlockPolicy::new("work", codes(&["u07****", "u0b****"]));
        policy.set_categories(vec![CategoryId::Printer, CategoryId::BlockStorage]);
        policy.save(&client).unwrap();

        let calls: Vec<_> = client
            .calls()
            .into_iter()
            .map(|c| (c.method, c.payload.unwrap_or_default()))
            .collect();
        assert_eq!(
            calls,
            vec![
                (method::DENIED_REMOVE.to_owned(), "u0b****".to_owned()),
                (method::DENIED_ADD.to_owned(), "b******".to_owned()),
            ]
        );
        assert!(!policy.is_changed());
    }

    #[test]
    fn moving_to_another_vm_allows_everything_first() {
        let client = client_with(&["work", "personal"]);
        let mut policy = BlockPolicy::new("work", codes(&["u07****"]));
        policy.set_vm("personal");
        policy.save(&client).unwrap();

        let calls = client.calls();
        assert_eq!(calls.len(), 2);
        assert_eq!((calls[0].dest.as_str(), calls[0].method.as_str()), ("work", method::DENIED_REMOVE));
        assert_eq!((calls[1].dest.as_str(), calls[1].method.as_str()), ("personal", method::DENIED_ADD));
        assert_eq!(policy.original_vm(), Some("personal"));
    }

    #[test]
    fn draft_needs_vm_and_category() {
        let mut draft = BlockDraft::for_new();
        assert!(!draft.is_valid());
        draft.vm = Some("work".into());
        assert!(!draft.is_valid());
        draft.selection.set(CategoryId::Printer, true);
        assert!(draft.is_valid());
    }
}
