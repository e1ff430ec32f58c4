// ── Device categories ──
//
// Human-readable grouping of interface codes for the block list. A
// category matches when all of its codes are present; matched codes are
// consumed so a later category cannot claim them again. The walk is
// top-down and stops descending below a category that matched.

use std::collections::BTreeSet;

use qubes_admin::DeviceInterface;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString, IntoEnumIterator};

/// Node of the category tree. Variant order is the depth-first tree order
/// used for display and matching.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    EnumIter,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum CategoryId {
    All,
    Network,
    Input,
    Keyboard,
    Mouse,
    Printer,
    ImageInput,
    MultimediaOutput,
    Audio,
    Microphone,
    AudioOutput,
    Storage,
    BlockStorage,
    UsbStorage,
    Bluetooth,
    SmartCardReaders,
}

impl CategoryId {
    pub fn name(self) -> &'static str {
        match self {
            Self::All => "All devices",
            Self::Network => "Network devices",
            Self::Input => "Human interface devices",
            Self::Keyboard => "Keyboards",
            Self::Mouse => "Mice",
            Self::Printer => "Printers",
            Self::ImageInput => "Image input devices",
            Self::MultimediaOutput => "Multimedia output devices",
            Self::Audio => "Audio devices",
            Self::Microphone => "Microphones",
            Self::AudioOutput => "Audio output devices",
            Self::Storage => "Storage devices",
            Self::BlockStorage => "Block devices",
            Self::UsbStorage => "USB storage devices",
            Self::Bluetooth => "Bluetooth",
            Self::SmartCardReaders => "Smart card readers",
        }
    }

    /// Secondary line shown under the name, if any.
    pub fn description(self) -> Option<&'static str> {
        match self {
            Self::Network => Some("modems, WiFi and Ethernet adapters"),
            Self::Input => Some("all input devices, such as mice, keyboards, tablets etc."),
            Self::ImageInput => Some("Scanners and cameras"),
            Self::MultimediaOutput => Some("Displays and audio output devices"),
            Self::UsbStorage => Some(
                "USB storage devices may offer more capabilities than block storage \
                 devices.\nMost storage devices can be attached as either block device \
                 or USB device",
            ),
            _ => None,
        }
    }

    pub fn codes(self) -> &'static [&'static str] {
        match self {
            Self::All => &["*******"],
            Self::Network => &["p02****", "u02****", "p0703**", "ue0****"],
            Self::Input => &["u03****", "p09****"],
            Self::Keyboard => &["u03**01", "p0900**"],
            Self::Mouse => &["u03**02", "p0902**"],
            Self::Printer => &["u07****"],
            Self::ImageInput => &["u06****", "u0e****", "p0903**"],
            Self::MultimediaOutput => &["p03****", "u10****"],
            Self::Audio => &["u01****", "p0403**", "m******"],
            Self::Microphone => &["m******"],
            Self::AudioOutput => &["u01****", "p0403**"],
            Self::Storage => &["b******", "u08****", "p01****"],
            Self::BlockStorage => &["b******"],
            Self::UsbStorage => &["u08****"],
            Self::Bluetooth => &["ue00101", "p0d11**"],
            Self::SmartCardReaders => &["u0b****"],
        }
    }

    pub fn interfaces(self) -> Vec<DeviceInterface> {
        self.codes()
            .iter()
            .filter_map(|c| DeviceInterface::new(*c).ok())
            .collect()
    }

    pub fn parent(self) -> Option<Self> {
        match self {
            Self::All => None,
            Self::Keyboard | Self::Mouse => Some(Self::Input),
            Self::Microphone | Self::AudioOutput => Some(Self::Audio),
            Self::BlockStorage | Self::UsbStorage => Some(Self::Storage),
            _ => Some(Self::All),
        }
    }

    pub fn children(self) -> Vec<Self> {
        Self::iter().filter(|c| c.parent() == Some(self)).collect()
    }

    pub fn depth(self) -> usize {
        self.parent().map_or(0, |p| p.depth() + 1)
    }

    /// Name plus the optional description on a `<small>` line.
    pub fn readable_description(self) -> String {
        match self.description() {
            Some(d) => format!("{}\n<small>{d}</small>", self.name()),
            None => self.name().to_owned(),
        }
    }

    /// Whether every code of this category appears in `interfaces`.
    pub fn matches(self, interfaces: &[DeviceInterface]) -> bool {
        let present: BTreeSet<&DeviceInterface> = interfaces.iter().collect();
        self.interfaces().iter().all(|i| present.contains(i))
    }
}

/// Split interface codes into matching categories and leftover codes.
pub fn parse_interfaces(interfaces: &[DeviceInterface]) -> (Vec<CategoryId>, Vec<DeviceInterface>) {
    let mut remaining = interfaces.to_vec();
    let mut categories = Vec::new();
    parse_node(CategoryId::All, &mut remaining, &mut categories);
    (categories, remaining)
}

fn parse_node(node: CategoryId, remaining: &mut Vec<DeviceInterface>, found: &mut Vec<CategoryId>) {
    if node.matches(remaining) {
        for code in node.interfaces() {
            if let Some(pos) = remaining.iter().position(|i| *i == code) {
                remaining.remove(pos);
            }
        }
        found.push(node);
        return;
    }
    for child in node.children() {
        parse_node(child, remaining, found);
    }
}

/// Interface codes stored for a list of categories, in order.
pub fn category_interfaces(categories: &[CategoryId]) -> Vec<DeviceInterface> {
    categories.iter().flat_map(|c| c.interfaces()).collect()
}

// ── Checkbox state ──────────────────────────────────────────────────

/// Checked categories in the block edit dialog.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CategorySelection {
    checked: BTreeSet<CategoryId>,
}

impl CategorySelection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Selection with the given categories (and their subtrees) checked.
    pub fn from_categories(categories: &[CategoryId]) -> Self {
        let mut selection = Self::new();
        for category in categories {
            selection.set(*category, true);
        }
        selection
    }

    pub fn is_checked(&self, category: CategoryId) -> bool {
        self.checked.contains(&category)
    }

    pub fn any_checked(&self) -> bool {
        !self.checked.is_empty()
    }

    /// Check or uncheck a category.
    ///
    /// Checking covers the whole subtree. Unchecking clears the subtree
    /// and every ancestor.
    pub fn set(&mut self, category: CategoryId, checked: bool) {
        self.set_subtree(category, checked);
        if !checked {
            let mut parent = category.parent();
            while let Some(p) = parent {
                self.checked.remove(&p);
                parent = p.parent();
            }
        }
    }

    pub fn toggle(&mut self, category: CategoryId) {
        let checked = self.is_checked(category);
        self.set(category, !checked);
    }

    fn set_subtree(&mut self, category: CategoryId, checked: bool) {
        if checked {
            self.checked.insert(category);
        } else {
            self.checked.remove(&category);
        }
        for child in category.children() {
            self.set_subtree(child, checked);
        }
    }

    /// Checked categories whose parent is not checked, in tree order.
    pub fn compressed(&self) -> Vec<CategoryId> {
        CategoryId::iter()
            .filter(|c| self.is_checked(*c))
            .filter(|c| c.parent().is_none_or(|p| !self.is_checked(p)))
            .collect()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn codes(list: &[&str]) -> Vec<DeviceInterface> {
        list.iter().map(|c| DeviceInterface::new(*c).unwrap()).collect()
    }

    #[test]
    fn every_category_code_parses() {
        for category in CategoryId::iter() {
            assert_eq!(category.interfaces().len(), category.codes().len(), "{category}");
        }
    }

    #[test]
    fn tree_shape() {
        assert_eq!(
            CategoryId::All.children(),
            vec![
                CategoryId::Network,
                CategoryId::Input,
                CategoryId::Printer,
                CategoryId::ImageInput,
                CategoryId::MultimediaOutput,
                CategoryId::Audio,
                CategoryId::Storage,
                CategoryId::Bluetooth,
                CategoryId::SmartCardReaders,
            ]
        );
        assert_eq!(CategoryId::Input.children(), vec![CategoryId::Keyboard, CategoryId::Mouse]);
        assert_eq!(CategoryId::Mouse.depth(), 2);
    }

    #[test]
    fn keyboard_mouse_printer_decode_to_leaves() {
        let interfaces = codes(&["u03**01", "p0900**", "u03**02", "p0902**", "u07****"]);
        let (categories, other) = parse_interfaces(&interfaces);
        assert_eq!(
            categories,
            vec![CategoryId::Keyboard, CategoryId::Mouse, CategoryId::Printer]
        );
        assert!(other.is_empty());
    }

    #[test]
    fn parent_match_stops_descent() {
        let interfaces = codes(&["u03****", "p09****", "u03**01", "p0900**"]);
        let (categories, other) = parse_interfaces(&interfaces);
        assert_eq!(categories, vec![CategoryId::Input]);
        assert_eq!(other, codes(&["u03**01", "p0900**"]));
    }

    #[test]
    fn consumed_codes_are_not_shared_between_siblings() {
        // Audio output and microphones both sit under audio; with the
        // audio codes present the parent claims them all.
        let interfaces = codes(&["u01****", "p0403**", "m******"]);
        let (categories, other) = parse_interfaces(&interfaces);
        assert_eq!(categories, vec![CategoryId::Audio]);
        assert!(other.is_empty());
    }

    #[test]
    fn everything_block() {
        let (categories, other) = parse_interfaces(&codes(&["*******", "u0b****"]));
        assert_eq!(categories, vec![CategoryId::All]);
        assert_eq!(other, codes(&["u0b****"]));
    }

    #[test]
    fn unknown_codes_are_left_over() {
        let (categories, other) = parse_interfaces(&codes(&["u0b****", "uff0000"]));
        assert_eq!(categories, vec![CategoryId::SmartCardReaders]);
        assert_eq!(other, codes(&["uff0000"]));
    }

    #[test]
    fn checking_parent_checks_children_and_compresses() {
        let mut selection = CategorySelection::new();
        selection.set(CategoryId::Storage, true);
        assert!(selection.is_checked(CategoryId::UsbStorage));
        assert_eq!(selection.compressed(), vec![CategoryId::Storage]);

        selection.set(CategoryId::UsbStorage, false);
        assert!(!selection.is_checked(CategoryId::Storage));
        assert!(selection.is_checked(CategoryId::BlockStorage));
        assert_eq!(selection.compressed(), vec![CategoryId::BlockStorage]);
    }

    #[test]
    fn unchecking_child_of_all_clears_root() {
        let mut selection = CategorySelection::from_categories(&[CategoryId::All]);
        selection.toggle(CategoryId::Mouse);
        assert!(!selection.is_checked(CategoryId::All));
        assert!(!selection.is_checked(CategoryId::Input));
        assert!(selection.is_checked(CategoryId::Keyboard));
        assert_eq!(
            selection.compressed().first(),
            Some(&CategoryId::Network)
        );
    }
}
