//! One screen per settings page.

pub mod devices;
pub mod info;
pub mod policy;
pub mod updates;

use qubes_config_core::PageId;

use crate::component::Component;
use crate::screen::PAGES;
use crate::theme::Palette;

use self::devices::DevicesScreen;
use self::info::InfoScreen;
use self::policy::PolicyScreen;
use self::updates::UpdatesScreen;

pub fn screen_for(page: PageId, palette: Palette) -> Box<dyn Component> {
    match page {
        PageId::Devices => Box::new(DevicesScreen::new(palette)),
        PageId::Updates => Box::new(UpdatesScreen::new(palette)),
        PageId::Splitgpg | PageId::Clipboard | PageId::File | PageId::Url => {
            Box::new(PolicyScreen::new(page, palette))
        }
        PageId::Basics | PageId::Usb | PageId::Thisdevice => Box::new(InfoScreen::new(page, palette)),
    }
}

pub fn create_screens(palette: Palette) -> Vec<Box<dyn Component>> {
    PAGES.iter().map(|&page| screen_for(page, palette)).collect()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
pub mod test_support {
    use std::sync::Arc;

    use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};
    use qubes_admin::{
        AdminClient, AssignmentMode, DevClass, DeviceAssignment, DeviceInfo, Domain, DomainClass, DomainState,
        MemoryPolicyStore, MemoryQubes, Port,
    };
    use qubes_config_core::{CategoryId, GlobalConfig, Locale, Page, PageContext, PageId};

    pub fn key(code: KeyCode) -> KeyEvent {
        KeyEvent::new(code, KeyModifiers::NONE)
    }

    pub fn stick() -> DeviceInfo {
        DeviceInfo::new(Port::new("sys-usb", "2-1", DevClass::Usb), "0951:1666")
            .with_vendor("Kingston")
            .with_product("DataTraveler")
    }

    /// dom0, a USB qube exposing one stick, and `work` with an auto-attach
    /// rule for the stick and a printer block list.
    pub fn test_qubes() -> Arc<MemoryQubes> {
        let qubes = Arc::new(MemoryQubes::new());
        qubes.insert_domain(Domain::new("dom0", DomainClass::AdminVM).running(true));
        qubes.insert_domain(Domain::new("sys-usb", DomainClass::AppVM).running(true));
        qubes.insert_domain(Domain::new("personal", DomainClass::AppVM));

        let mut work = DomainState::from(Domain::new("work", DomainClass::AppVM));
        work.assigned = vec![DeviceAssignment::for_device(&stick(), "work", AssignmentMode::AutoAttach)];
        work.denied = CategoryId::Printer.interfaces();
        qubes.insert_domain(work);

        qubes.expose(stick()).unwrap();
        qubes
    }

    pub fn test_context(qubes: &Arc<MemoryQubes>) -> PageContext {
        PageContext {
            client: Arc::clone(qubes) as Arc<dyn AdminClient>,
            policies: Arc::new(MemoryPolicyStore::new()),
            locale: Locale::identity(),
        }
    }

    pub fn test_config() -> GlobalConfig {
        GlobalConfig::new(test_context(&test_qubes()))
    }

    pub fn page_with_devices() -> Page {
        Page::load(PageId::Devices, &test_context(&test_qubes())).unwrap()
    }
}
