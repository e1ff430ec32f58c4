// ── Devices page ──
//
// Ties the block list and both attachment lists to one shared
// `DeviceManager`. Saving pushes every list, reloads the system state
// once and rebuilds all rows from it.

use std::sync::Arc;

use qubes_admin::AdminClient;
use tracing::{debug, info_span};

use super::attachments::{AttachmentDraft, AttachmentHandler, AttachmentKind, duplicate_rows};
use super::blocks::{BlockDraft, BlockHandler};
use super::manager::DeviceManager;
use crate::context::Locale;
use crate::error::CoreError;
use crate::events::{ChangeKind, EventBus, RowChanged, RowList};

pub struct DevicesHandler {
    manager: DeviceManager,
    blocks: BlockHandler,
    auto: AttachmentHandler,
    required: AttachmentHandler,
    bus: EventBus<RowChanged>,
}

fn list_of(kind: AttachmentKind) -> RowList {
    match kind {
        AttachmentKind::Auto => RowList::AutoAttach,
        AttachmentKind::Required => RowList::Required,
    }
}

impl DevicesHandler {
    /// Load the device state and build all three lists from it.
    pub fn new(client: Arc<dyn AdminClient>, locale: Arc<Locale>) -> Result<Self, CoreError> {
        let manager = DeviceManager::load(client)?;
        Ok(Self {
            blocks: BlockHandler::new(&manager, Arc::clone(&locale)),
            auto: AttachmentHandler::new(AttachmentKind::Auto, &manager, Arc::clone(&locale)),
            required: AttachmentHandler::new(AttachmentKind::Required, &manager, locale),
            manager,
            bus: EventBus::new(),
        })
    }

    pub fn manager(&self) -> &DeviceManager {
        &self.manager
    }

    pub fn blocks(&self) -> &BlockHandler {
        &self.blocks
    }

    pub fn attachments(&self, kind: AttachmentKind) -> &AttachmentHandler {
        match kind {
            AttachmentKind::Auto => &self.auto,
            AttachmentKind::Required => &self.required,
        }
    }

    fn attachments_mut(&mut self, kind: AttachmentKind) -> &mut AttachmentHandler {
        match kind {
            AttachmentKind::Auto => &mut self.auto,
            AttachmentKind::Required => &mut self.required,
        }
    }

    pub fn event_bus(&mut self) -> &mut EventBus<RowChanged> {
        &mut self.bus
    }

    // ── Attachments ──────────────────────────────────────────────────

    pub fn new_attachment(&self, kind: AttachmentKind) -> AttachmentDraft {
        self.attachments(kind).new_draft()
    }

    pub fn edit_attachment(&self, kind: AttachmentKind, index: usize) -> Result<AttachmentDraft, CoreError> {
        self.attachments(kind).edit_draft(index)
    }

    pub fn add_attachment(&mut self, draft: &AttachmentDraft) -> Result<String, CoreError> {
        let text = self.attachments_mut(draft.kind).commit_new(draft)?;
        self.bus
            .emit(&RowChanged::new(list_of(draft.kind), ChangeKind::Added, text.clone()));
        Ok(text)
    }

    pub fn update_attachment(&mut self, index: usize, draft: &AttachmentDraft) -> Result<String, CoreError> {
        let text = self.attachments_mut(draft.kind).commit_edit(index, draft)?;
        self.bus
            .emit(&RowChanged::new(list_of(draft.kind), ChangeKind::Edited, text.clone()));
        Ok(text)
    }

    pub fn remove_attachment(&mut self, kind: AttachmentKind, index: usize) -> Result<String, CoreError> {
        let text = self.attachments_mut(kind).remove_rule(index)?;
        self.bus
            .emit(&RowChanged::new(list_of(kind), ChangeKind::Removed, text.clone()));
        Ok(text)
    }

    // ── Blocks ───────────────────────────────────────────────────────

    pub fn new_block(&self) -> BlockDraft {
        self.blocks.new_draft()
    }

    pub fn edit_block(&self, index: usize) -> Result<BlockDraft, CoreError> {
        self.blocks.edit_draft(index)
    }

    pub fn add_block(&mut self, draft: &BlockDraft) -> Result<String, CoreError> {
        let text = self.blocks.commit_new(draft)?;
        self.bus
            .emit(&RowChanged::new(RowList::Blocks, ChangeKind::Added, text.clone()));
        Ok(text)
    }

    pub fn update_block(&mut self, index: usize, draft: &BlockDraft) -> Result<String, CoreError> {
        let text = self.blocks.commit_edit(index, draft)?;
        self.bus
            .emit(&RowChanged::new(RowList::Blocks, ChangeKind::Edited, text.clone()));
        Ok(text)
    }

    pub fn remove_block(&mut self, index: usize) -> Result<String, CoreError> {
        let text = self.blocks.remove_rule(index)?;
        self.bus
            .emit(&RowChanged::new(RowList::Blocks, ChangeKind::Removed, text.clone()));
        Ok(text)
    }

    /// Warnings about rules that say the same thing twice.
    pub fn validate_all_rows(&self) -> Vec<String> {
        duplicate_rows(&[&self.auto, &self.required])
    }

    // ── Page contract ────────────────────────────────────────────────

    /// Rebuild every list from the cached system state.
    pub fn reset(&mut self) {
        self.blocks.reset(&self.manager);
        self.auto.reset(&self.manager);
        self.required.reset(&self.manager);
    }

    pub fn save(&mut self) -> Result<(), CoreError> {
        let _span = info_span!("save", page = "devices").entered();
        self.blocks.save()?;
        self.auto.save()?;
        self.required.save()?;
        self.manager.load_data()?;
        debug!("device lists saved and reloaded");
        self.reset();
        Ok(())
    }

    pub fn get_unsaved(&self) -> String {
        [
            self.blocks.get_unsaved(),
            self.auto.get_unsaved(),
            self.required.get_unsaved(),
        ]
        .into_iter()
        .filter(|text| !text.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
    }
}
