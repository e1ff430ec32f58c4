//! Page handlers and rule models between `qubes-admin` and the front-ends
//! (CLI / TUI).
//!
//! - **Device pages** ([`devices`]) group raw assignments into editable
//!   rows ([`AssignmentWrapper`]), decode block lists into device
//!   categories and push edits back as remove-then-recreate calls.
//!
//! - **Policy pages** ([`policy`]) wrap the rules of one policy file in
//!   per-page rule kinds, run the display/edit row state machine and write
//!   the file back with the token it was read with.
//!
//! - **Pages** ([`page`]) share the reset / save / get-unsaved contract.
//!   [`GlobalConfig`] loads them, saves them with cache invalidation and
//!   gates navigation away from a dirty page.
//!
//! - **Background work**: [`DeviceWatcher`] debounces admin device events
//!   into one [`DeviceStore`] refresh; [`Restarter`] restarts qubes after a
//!   template update on a worker thread.

pub mod context;
pub mod devices;
pub mod error;
pub mod events;
pub mod features;
pub mod page;
pub mod policy;
pub mod restart;
pub mod store;
pub mod updates;
pub mod watcher;

// ── Primary re-exports ──────────────────────────────────────────────
pub use context::{Locale, Theme};
pub use devices::{
    AssignmentWrapper, AttachmentDraft, AttachmentHandler, AttachmentKind, BlockDraft,
    BlockHandler, BlockPolicy, CategoryId, DeviceManager, DevicesHandler,
};
pub use error::CoreError;
pub use events::{ChangeKind, EventBus, RowChanged, RowList};
pub use features::FeatureChoiceHandler;
pub use page::{
    GlobalConfig, OpenAt, Page, PageContext, PageHandler, PageId, PagePart, PageSaveError,
    UnsavedDecision,
};
pub use policy::{EditDecision, PolicyHandler, Rule, RuleEdit, RuleRow};
pub use restart::{RestartPlan, RestartReport, RestartSelection, RestartStatus, Restarter};
pub use store::DeviceStore;
pub use updates::UpdateCheckHandler;
pub use watcher::{DEFAULT_DEBOUNCE, DeviceWatcher};
