//! Actions flowing through the app's channel.
//!
//! Screens never touch page handlers directly: they emit [`PageEdit`]s and
//! the app applies them to the loaded page, then re-syncs the screen.

use std::fmt;
use std::sync::Arc;

use qubes_admin::DeviceInfo;
use qubes_config_core::{
    AttachmentKind, CategoryId, PageId, RowChanged, RowList, RuleEdit, UnsavedDecision,
};

#[derive(Debug, Clone)]
pub enum Action {
    // ── Lifecycle ──
    Quit,
    Tick,
    Render,
    Resize(u16, u16),

    // ── Navigation ──
    /// Leave the current page; gated by the unsaved-changes check.
    SwitchPage(PageId),
    NextPage,
    PrevPage,
    ToggleHelp,

    // ── Page contract ──
    Apply,
    Reset,
    Edit(PageEdit),
    /// Answer to the unsaved-changes overlay.
    Unsaved(UnsavedDecision),

    // ── Data ──
    RowChanged(RowChanged),
    DevicesRefreshed(Arc<Vec<Arc<DeviceInfo>>>),

    Notify(Notification),
}

/// A change to the loaded page, applied by the app.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageEdit {
    // ── Devices ──
    NewAttachment {
        kind: AttachmentKind,
        /// `BACKEND:PORT` of an exposed device.
        device: String,
        frontends: Vec<String>,
    },
    SetFrontends {
        kind: AttachmentKind,
        index: usize,
        frontends: Vec<String>,
    },
    /// Flip an auto rule between attach and ask.
    ToggleAsk {
        index: usize,
    },
    RemoveAttachment {
        kind: AttachmentKind,
        index: usize,
    },
    SaveBlock {
        index: Option<usize>,
        vm: String,
        categories: Vec<CategoryId>,
    },
    RemoveBlock {
        index: usize,
    },

    // ── Policies (keyed by policy file name) ──
    SetUseDefault {
        policy: &'static str,
        value: bool,
    },
    SaveRule {
        policy: &'static str,
        list: RowList,
        index: Option<usize>,
        edit: RuleEdit,
    },
    RemoveRule {
        policy: &'static str,
        list: RowList,
        index: usize,
    },
    AddKeyQube {
        policy: &'static str,
        qube: String,
    },
    SelectFeature {
        feature: &'static str,
        value: Option<String>,
    },

    // ── Updates ──
    SetDom0Check(bool),
    SetDefaultCheck(bool),
    ToggleException(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub message: String,
    pub level: NotificationLevel,
}

impl Notification {
    pub fn new(level: NotificationLevel, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            level,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationLevel {
    Info,
    Success,
    Warning,
    Error,
}

/// Where the user is headed when a dirty page asks what to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Leave {
    Page(PageId),
    Quit,
}

impl fmt::Display for Leave {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Page(page) => write!(f, "switching to {page}"),
            Self::Quit => f.write_str("quitting"),
        }
    }
}
