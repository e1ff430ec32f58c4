//! Pages with nothing editable from the terminal.

use qubes_config_core::{Page, PageId};
use ratatui::Frame;
use ratatui::layout::Rect;
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, BorderType, Borders, Paragraph, Wrap};

use crate::component::Component;
use crate::screen;
use crate::theme::Palette;

pub struct InfoScreen {
    page: PageId,
    palette: Palette,
    focused: Option<String>,
}

impl InfoScreen {
    pub fn new(page: PageId, palette: Palette) -> Self {
        Self {
            page,
            palette,
            focused: None,
        }
    }
}

impl Component for InfoScreen {
    fn sync(&mut self, _page: &mut Page) {}

    fn render(&self, frame: &mut Frame, area: Rect) {
        let p = &self.palette;
        let block = Block::default()
            .title(format!(" {} ", screen::label(self.page)))
            .title_style(p.title_style())
            .borders(Borders::ALL)
            .border_type(BorderType::Rounded)
            .border_style(p.border_focused());

        let mut lines = vec![
            Line::from(""),
            Line::from(Span::styled(
                "  The settings on this page are not editable here.",
                p.table_row(),
            )),
        ];
        let locations = self.page.locations();
        if !locations.is_empty() {
            lines.push(Line::from(""));
            lines.push(Line::from(Span::styled("  Sections:", p.key_hint())));
            for location in locations {
                let style = if self.focused.as_deref() == Some(*location) {
                    p.tab_active()
                } else {
                    p.key_hint()
                };
                lines.push(Line::from(Span::styled(format!("    {location}"), style)));
            }
        }
        frame.render_widget(Paragraph::new(lines).block(block).wrap(Wrap { trim: false }), area);
    }

    fn focus(&mut self, location: &str) {
        self.focused = Some(location.to_owned());
    }

    fn id(&self) -> PageId {
        self.page
    }
}
