//! Contract every page screen implements.

use color_eyre::eyre::Result;
use crossterm::event::KeyEvent;
use qubes_config_core::{Page, PageId};
use ratatui::Frame;
use ratatui::layout::Rect;

use crate::action::Action;

pub trait Component {
    /// Page keys. Keys the screen ignores fall through to the app.
    fn handle_key_event(&mut self, key: KeyEvent) -> Result<Option<Action>> {
        let _ = key;
        Ok(None)
    }

    /// React to an action broadcast by the app.
    fn update(&mut self, action: &Action) -> Result<Option<Action>> {
        let _ = action;
        Ok(None)
    }

    /// Rebuild the view from the loaded page.
    fn sync(&mut self, page: &mut Page);

    fn render(&self, frame: &mut Frame, area: Rect);

    /// Move focus to an `--open-at` location.
    fn focus(&mut self, location: &str) {
        let _ = location;
    }

    /// Whether a form is open and wants every key.
    fn capturing_input(&self) -> bool {
        false
    }

    fn id(&self) -> PageId;
}
