//! Updates page: update checks for dom0, the default for qubes and the
//! qubes that differ from it.

use color_eyre::eyre::Result;
use crossterm::event::{KeyCode, KeyEvent};
use qubes_config_core::updates::UpdateCheckState;
use qubes_config_core::{Page, PageId};
use ratatui::Frame;
use ratatui::layout::{Constraint, Layout, Rect};
use ratatui::style::Style;
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, BorderType, Borders, Cell, Paragraph, Row, Table, TableState};

use crate::action::{Action, PageEdit};
use crate::component::Component;
use crate::theme::Palette;
use crate::widgets::selection;

/// Rows above the per-qube list.
const FIXED_ROWS: usize = 2;

pub struct UpdatesScreen {
    palette: Palette,
    state: Option<UpdateCheckState>,
    candidates: Vec<String>,
    table: TableState,
}

impl UpdatesScreen {
    pub fn new(palette: Palette) -> Self {
        Self {
            palette,
            state: None,
            candidates: Vec::new(),
            table: TableState::default().with_selected(Some(0)),
        }
    }

    fn len(&self) -> usize {
        FIXED_ROWS + self.candidates.len()
    }

    fn toggle(&self) -> Option<Action> {
        let state = self.state.as_ref()?;
        let edit = match selection::selected(&self.table) {
            0 => PageEdit::SetDom0Check(!state.dom0),
            1 => PageEdit::SetDefaultCheck(!state.default),
            n => PageEdit::ToggleException(self.candidates.get(n - FIXED_ROWS)?.clone()),
        };
        Some(Action::Edit(edit))
    }

    fn checkbox(&self, checked: bool) -> Span<'static> {
        if checked {
            Span::styled("[x]", Style::default().fg(self.palette.success))
        } else {
            Span::styled("[ ]", self.palette.key_hint())
        }
    }
}

impl Component for UpdatesScreen {
    fn handle_key_event(&mut self, key: KeyEvent) -> Result<Option<Action>> {
        let action = match key.code {
            KeyCode::Char('j') | KeyCode::Down => {
                let len = self.len();
                selection::move_by(&mut self.table, len, 1);
                None
            }
            KeyCode::Char('k') | KeyCode::Up => {
                let len = self.len();
                selection::move_by(&mut self.table, len, -1);
                None
            }
            KeyCode::Char(' ' | 'e') | KeyCode::Enter => self.toggle(),
            _ => None,
        };
        Ok(action)
    }

    fn sync(&mut self, page: &mut Page) {
        if let Some(handler) = page.update_check_mut() {
            self.state = Some(handler.state().clone());
            self.candidates = handler.candidates().to_vec();
        }
        let len = self.len();
        selection::clamp(&mut self.table, len);
    }

    fn render(&self, frame: &mut Frame, area: Rect) {
        let p = &self.palette;
        let block = Block::default()
            .title(" Updates ")
            .title_style(p.title_style())
            .borders(Borders::ALL)
            .border_type(BorderType::Rounded)
            .border_style(p.border_focused());
        let inner = block.inner(area);
        frame.render_widget(block, area);

        let [table_area, hints_area] =
            Layout::vertical([Constraint::Min(1), Constraint::Length(1)]).areas(inner);

        let Some(state) = &self.state else {
            return;
        };
        let exception_label = if state.default { "do not check" } else { "check" };
        let mut rows = vec![
            Row::new(vec![
                Cell::from(self.checkbox(state.dom0)),
                Cell::from("Check for dom0 updates"),
            ]),
            Row::new(vec![
                Cell::from(self.checkbox(state.default)),
                Cell::from("Check for qube updates by default"),
            ]),
        ];
        for vm in &self.candidates {
            let is_exception = state.exceptions_enabled && state.exceptions.contains(vm);
            rows.push(Row::new(vec![
                Cell::from(self.checkbox(is_exception)),
                Cell::from(Line::from(vec![
                    Span::raw(format!("  {vm}")),
                    Span::styled(format!("  ({exception_label})"), p.key_hint()),
                ])),
            ]));
        }
        let table = Table::new(
            rows.into_iter().map(|r| r.style(p.table_row())),
            [Constraint::Length(3), Constraint::Min(20)],
        )
        .row_highlight_style(p.table_selected());
        let mut table_state = self.table;
        frame.render_stateful_widget(table, table_area, &mut table_state);

        let hints = Line::from(vec![
            Span::styled("  j/k ", p.key_hint_key()),
            Span::styled("navigate", p.key_hint()),
            Span::styled("  Space ", p.key_hint_key()),
            Span::styled("toggle", p.key_hint()),
            Span::styled("  a ", p.key_hint_key()),
            Span::styled("apply", p.key_hint()),
            Span::styled("  r ", p.key_hint_key()),
            Span::styled("reset", p.key_hint()),
        ]);
        frame.render_widget(Paragraph::new(hints), hints_area);
    }

    fn focus(&mut self, location: &str) {
        if location == "check_for_updates" {
            self.table.select(Some(1));
        }
    }

    fn id(&self) -> PageId {
        PageId::Updates
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use pretty_assertions::assert_eq;
    use qubes_config_core::Theme;

    use super::*;
    use crate::screens::test_support::{key, test_config};

    fn screen() -> UpdatesScreen {
        let mut config = test_config();
        let mut screen = UpdatesScreen::new(Palette::for_theme(Theme::Dark));
        screen.sync(config.page(PageId::Updates).unwrap());
        screen
    }

    #[test]
    fn toggles_follow_selection() {
        let mut screen = screen();
        let first = screen.handle_key_event(key(KeyCode::Char(' '))).unwrap();
        assert!(matches!(first, Some(Action::Edit(PageEdit::SetDom0Check(false)))));

        screen.handle_key_event(key(KeyCode::Down)).unwrap();
        screen.handle_key_event(key(KeyCode::Down)).unwrap();
        let action = screen.handle_key_event(key(KeyCode::Enter)).unwrap();
        let Some(Action::Edit(PageEdit::ToggleException(vm))) = action else {
            panic!("expected an exception toggle, got {action:?}");
        };
        assert_eq!(vm, screen.candidates[0]);
    }

    #[test]
    fn selection_stays_in_rows() {
        let mut screen = screen();
        for _ in 0..20 {
            screen.handle_key_event(key(KeyCode::Char('j'))).unwrap();
        }
        assert_eq!(selection::selected(&screen.table), screen.len() - 1);
    }
}
