//! Page tabs: numbering, labels and cycling over the settings pages.

use qubes_config_core::PageId;

/// Tab order, matching the page list of the settings window.
pub const PAGES: [PageId; 9] = [
    PageId::Basics,
    PageId::Usb,
    PageId::Updates,
    PageId::Splitgpg,
    PageId::Clipboard,
    PageId::File,
    PageId::Url,
    PageId::Thisdevice,
    PageId::Devices,
];

fn position(page: PageId) -> usize {
    PAGES.iter().position(|&p| p == page).unwrap_or(0)
}

/// 1-based tab number.
pub fn number(page: PageId) -> usize {
    position(page) + 1
}

pub fn from_number(n: usize) -> Option<PageId> {
    n.checked_sub(1).and_then(|i| PAGES.get(i).copied())
}

pub fn next(page: PageId) -> PageId {
    PAGES[(position(page) + 1) % PAGES.len()]
}

pub fn prev(page: PageId) -> PageId {
    PAGES[(position(page) + PAGES.len() - 1) % PAGES.len()]
}

pub fn label(page: PageId) -> &'static str {
    match page {
        PageId::Basics => "Basics",
        PageId::Usb => "USB",
        PageId::Updates => "Updates",
        PageId::Splitgpg => "Split GPG",
        PageId::Clipboard => "Clipboard",
        PageId::File => "File Access",
        PageId::Url => "URLs",
        PageId::Thisdevice => "This Device",
        PageId::Devices => "Devices",
    }
}
