// ── Pages ──
//
// Every settings page answers the same three questions: reset, save and
// "what is unsaved". A page is a list of parts (policy editors, feature
// choices, device lists) and delegates to each in order. `GlobalConfig`
// owns the loaded pages and runs the save/verify flow around them.

use std::collections::BTreeMap;
use std::str::FromStr;
use std::sync::Arc;

use qubes_admin::{AdminClient, PolicyStore};
use serde::Serialize;
use strum::{Display, EnumIter, EnumString, IntoEnumIterator};
use thiserror::Error;
use tracing::{debug, warn};

use crate::context::Locale;
use crate::devices::DevicesHandler;
use crate::error::CoreError;
use crate::features::{COPY_SHORTCUT, FeatureChoiceHandler, PASTE_SHORTCUT};
use crate::policy::{
    CLIPBOARD_POLICY, EditDecision, FILECOPY_POLICY, OPENINVM_POLICY, OPENURL_POLICY,
    PolicyHandler, SPLITGPG_POLICY,
};
use crate::updates::UpdateCheckHandler;

const ADMIN_VM: &str = "dom0";

/// Uniform contract of a settings page.
pub trait PageHandler {
    /// Drop in-memory edits.
    fn reset(&mut self);

    /// Push in-memory edits to the system.
    fn save(&mut self) -> Result<(), CoreError>;

    /// Description of pending changes, empty when the page is clean.
    /// Rows still open for editing are accepted if they validate.
    fn get_unsaved(&mut self) -> String;
}

impl PageHandler for PolicyHandler {
    fn reset(&mut self) {
        PolicyHandler::reset(self);
    }

    fn save(&mut self) -> Result<(), CoreError> {
        PolicyHandler::save(self)
    }

    fn get_unsaved(&mut self) -> String {
        PolicyHandler::get_unsaved(self, |_| EditDecision::Save)
    }
}

impl PageHandler for FeatureChoiceHandler {
    fn reset(&mut self) {
        FeatureChoiceHandler::reset(self);
    }

    fn save(&mut self) -> Result<(), CoreError> {
        FeatureChoiceHandler::save(self)
    }

    fn get_unsaved(&mut self) -> String {
        FeatureChoiceHandler::get_unsaved(self)
    }
}

impl PageHandler for DevicesHandler {
    fn reset(&mut self) {
        DevicesHandler::reset(self);
    }

    fn save(&mut self) -> Result<(), CoreError> {
        DevicesHandler::save(self)
    }

    fn get_unsaved(&mut self) -> String {
        DevicesHandler::get_unsaved(self)
    }
}

impl PageHandler for UpdateCheckHandler {
    fn reset(&mut self) {
        UpdateCheckHandler::reset(self);
    }

    fn save(&mut self) -> Result<(), CoreError> {
        UpdateCheckHandler::save(self)
    }

    fn get_unsaved(&mut self) -> String {
        UpdateCheckHandler::get_unsaved(self)
    }
}

// ── Page registry ───────────────────────────────────────────────────

#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Display,
    EnumString,
    EnumIter,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum PageId {
    #[default]
    Basics,
    Usb,
    Updates,
    Splitgpg,
    Clipboard,
    File,
    Url,
    Thisdevice,
    Devices,
}

impl PageId {
    /// Focus targets `--open-at` may name on this page.
    pub fn locations(self) -> &'static [&'static str] {
        match self {
            Self::Basics => &[
                "default_qubes",
                "window_management",
                "memory_balancing",
                "linux_kernel",
            ],
            Self::Usb => &["usb_input", "u2f"],
            Self::Updates => &[
                "dom0_updates",
                "check_for_updates",
                "update_proxy",
                "template_repositories",
            ],
            Self::Clipboard => &["clipboard_shortcut", "clipboard_policy"],
            Self::File => &["filecopy_policy", "open_in_vm"],
            Self::Devices => &["attachments", "required_devices", "blocks"],
            Self::Splitgpg | Self::Url | Self::Thisdevice => &[],
        }
    }
}

/// Where the window opens, parsed from `page[#location]`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct OpenAt {
    pub page: PageId,
    pub location: Option<&'static str>,
    /// What could not be resolved. The window opens anyway.
    pub warning: Option<String>,
}

impl OpenAt {
    pub fn parse(text: &str) -> Self {
        let (page_name, location) = match text.split_once('#') {
            Some((page, location)) => (page, Some(location)),
            None => (text, None),
        };

        let Ok(page) = PageId::from_str(page_name) else {
            return Self {
                warning: Some(format!("Page not found: {page_name}")),
                ..Self::default()
            };
        };

        match location {
            None => Self {
                page,
                ..Self::default()
            },
            Some(name) => match page.locations().iter().find(|l| **l == name) {
                Some(found) => Self {
                    page,
                    location: Some(*found),
                    warning: None,
                },
                None => Self {
                    page,
                    location: None,
                    warning: Some(format!("Location {name} not found on page {page}")),
                },
            },
        }
    }
}

// ── Pages ───────────────────────────────────────────────────────────

pub enum PagePart {
    Policy(PolicyHandler),
    Feature(FeatureChoiceHandler),
    Devices(DevicesHandler),
    UpdateCheck(UpdateCheckHandler),
}

impl PagePart {
    fn handler(&mut self) -> &mut dyn PageHandler {
        match self {
            Self::Policy(h) => h,
            Self::Feature(h) => h,
            Self::Devices(h) => h,
            Self::UpdateCheck(h) => h,
        }
    }
}

/// Everything a page needs to load.
#[derive(Clone)]
pub struct PageContext {
    pub client: Arc<dyn AdminClient>,
    pub policies: Arc<dyn PolicyStore>,
    pub locale: Arc<Locale>,
}

pub struct Page {
    id: PageId,
    parts: Vec<PagePart>,
}

impl Page {
    pub fn load(id: PageId, ctx: &PageContext) -> Result<Self, CoreError> {
        let policy = |def| {
            PolicyHandler::new(
                def,
                Arc::clone(&ctx.policies),
                ctx.client.as_ref(),
                Arc::clone(&ctx.locale),
            )
            .map(PagePart::Policy)
        };
        let feature = |def| {
            FeatureChoiceHandler::new(def, Arc::clone(&ctx.client), ADMIN_VM, Arc::clone(&ctx.locale))
                .map(PagePart::Feature)
        };

        let parts = match id {
            PageId::Basics | PageId::Usb | PageId::Thisdevice => Vec::new(),
            PageId::Updates => vec![PagePart::UpdateCheck(UpdateCheckHandler::new(
                Arc::clone(&ctx.client),
                Arc::clone(&ctx.locale),
            )?)],
            PageId::Splitgpg => vec![policy(SPLITGPG_POLICY)?],
            PageId::Clipboard => vec![
                policy(CLIPBOARD_POLICY)?,
                feature(COPY_SHORTCUT)?,
                feature(PASTE_SHORTCUT)?,
            ],
            PageId::File => vec![policy(FILECOPY_POLICY)?, policy(OPENINVM_POLICY)?],
            PageId::Url => vec![policy(OPENURL_POLICY)?],
            PageId::Devices => vec![PagePart::Devices(DevicesHandler::new(
                Arc::clone(&ctx.client),
                Arc::clone(&ctx.locale),
            )?)],
        };
        debug!(page = %id, parts = parts.len(), "page loaded");
        Ok(Self { id, parts })
    }

    pub fn id(&self) -> PageId {
        self.id
    }

    pub fn parts(&self) -> &[PagePart] {
        &self.parts
    }

    pub fn parts_mut(&mut self) -> &mut [PagePart] {
        &mut self.parts
    }

    pub fn policy_mut(&mut self, file_name: &str) -> Option<&mut PolicyHandler> {
        self.parts.iter_mut().find_map(|p| match p {
            PagePart::Policy(h) if h.def().file_name == file_name => Some(h),
            _ => None,
        })
    }

    pub fn devices_mut(&mut self) -> Option<&mut DevicesHandler> {
        self.parts.iter_mut().find_map(|p| match p {
            PagePart::Devices(h) => Some(h),
            _ => None,
        })
    }

    pub fn update_check_mut(&mut self) -> Option<&mut UpdateCheckHandler> {
        self.parts.iter_mut().find_map(|p| match p {
            PagePart::UpdateCheck(h) => Some(h),
            _ => None,
        })
    }
}

impl PageHandler for Page {
    fn reset(&mut self) {
        for part in &mut self.parts {
            part.handler().reset();
        }
    }

    fn save(&mut self) -> Result<(), CoreError> {
        for part in &mut self.parts {
            part.handler().save()?;
        }
        Ok(())
    }

    fn get_unsaved(&mut self) -> String {
        self.parts
            .iter_mut()
            .map(|p| p.handler().get_unsaved())
            .filter(|text| !text.is_empty())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

// ── GlobalConfig ────────────────────────────────────────────────────

/// Answer to "this page has unsaved changes".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnsavedDecision {
    Save,
    Discard,
    Cancel,
}

/// A failed page save, with the cause escaped for markup display.
#[derive(Debug, Error)]
#[error("The following error occurred: {escaped}")]
pub struct PageSaveError {
    pub page: PageId,
    pub escaped: String,
    #[source]
    pub source: CoreError,
}

/// Escape text for Pango-style markup.
pub fn escape_markup(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#x27;"),
            c => out.push(c),
        }
    }
    out
}

pub struct GlobalConfig {
    ctx: PageContext,
    pages: BTreeMap<PageId, Page>,
}

impl GlobalConfig {
    pub fn new(ctx: PageContext) -> Self {
        Self {
            ctx,
            pages: BTreeMap::new(),
        }
    }

    pub fn context(&self) -> &PageContext {
        &self.ctx
    }

    /// The page, loading it on first use.
    pub fn page(&mut self, id: PageId) -> Result<&mut Page, CoreError> {
        if !self.pages.contains_key(&id) {
            let page = Page::load(id, &self.ctx)?;
            self.pages.insert(id, page);
        }
        self.pages
            .get_mut(&id)
            .ok_or_else(|| CoreError::UnknownPage { name: id.to_string() })
    }

    /// Load every page up front.
    pub fn load_all(&mut self) -> Result<(), CoreError> {
        for id in PageId::iter() {
            self.page(id)?;
        }
        Ok(())
    }

    /// Save one page. The backend cache is dropped before and after the
    /// attempt; on failure the page keeps its edits.
    pub fn save_page(&mut self, id: PageId) -> Result<(), PageSaveError> {
        let client = Arc::clone(&self.ctx.client);
        let page = self.page(id).map_err(|source| save_error(id, source))?;

        client.clear_cache();
        let result = page.save();
        client.clear_cache();
        match result {
            Ok(()) => {
                page.reset();
                Ok(())
            }
            Err(source) => {
                warn!(page = %id, error = %source, "page save failed");
                Err(save_error(id, source))
            }
        }
    }

    /// Whether the user may leave the page. A dirty page asks `decide`.
    pub fn verify_changes(
        &mut self,
        id: PageId,
        decide: impl FnOnce(&str) -> UnsavedDecision,
    ) -> Result<bool, PageSaveError> {
        let Some(page) = self.pages.get_mut(&id) else {
            return Ok(true);
        };
        let unsaved = page.get_unsaved();
        if unsaved.is_empty() {
            return Ok(true);
        }
        match decide(&unsaved) {
            UnsavedDecision::Save => self.save_page(id).map(|()| true),
            UnsavedDecision::Discard => {
                page.reset();
                Ok(true)
            }
            UnsavedDecision::Cancel => Ok(false),
        }
    }
}

fn save_error(page: PageId, source: CoreError) -> PageSaveError {
    PageSaveError {
        page,
        escaped: escape_markup(&source.to_string()),
        source,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn open_at_page_and_location() {
        let target = OpenAt::parse("clipboard#clipboard_policy");
        assert_eq!(target.page, PageId::Clipboard);
        assert_eq!(target.location, Some("clipboard_policy"));
        assert_eq!(target.warning, None);
    }

    #[test]
    fn open_at_unknown_page_falls_back_to_default() {
        let target = OpenAt::parse("nosuchpage#u2f");
        assert_eq!(target.page, PageId::Basics);
        assert_eq!(target.location, None);
        assert_eq!(target.warning.as_deref(), Some("Page not found: nosuchpage"));
    }

    #[test]
    fn open_at_unknown_location_keeps_page() {
        let target = OpenAt::parse("usb#blocks");
        assert_eq!(target.page, PageId::Usb);
        assert_eq!(target.location, None);
        assert_eq!(
            target.warning.as_deref(),
            Some("Location blocks not found on page usb")
        );
    }

    #[test]
    fn markup_is_escaped() {
        assert_eq!(escape_markup("<b>a & b</b>"), "&lt;b&gt;a &amp; b&lt;/b&gt;");
    }

    #[test]
    fn every_page_parses_back() {
        for id in PageId::iter() {
            assert_eq!(OpenAt::parse(&id.to_string()).page, id);
        }
    }
}
