// Device assignment and block-list model for the devices page.

mod assignment;
mod attachments;
mod blocks;
mod category;
mod handler;
mod manager;
mod rule_list;

pub use assignment::{AssignmentWrapper, GroupKey};
pub use attachments::{
    AttachmentDraft, AttachmentHandler, AttachmentKind, AttachmentRow, duplicate_rows,
    offered_options,
};
pub use blocks::{BlockDraft, BlockHandler, BlockPolicy};
pub use category::{CategoryId, CategorySelection, category_interfaces, parse_interfaces};
pub use handler::DevicesHandler;
pub use manager::DeviceManager;
pub use rule_list::{DeviceRule, DeviceRuleList};
