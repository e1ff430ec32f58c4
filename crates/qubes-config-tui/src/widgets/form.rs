//! Single-line edit form drawn over a page.
//!
//! Screens open a form with a prompt and an initial value; the form owns
//! the text and reports when the user submits or cancels it.

use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};
use ratatui::Frame;
use ratatui::layout::Rect;
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, BorderType, Borders, Clear, Paragraph};
use tui_input::{Input, InputRequest};

use crate::theme::Palette;

/// Outcome of one key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FormEvent {
    Pending,
    Submit(String),
    Cancel,
}

pub struct Form<T> {
    pub target: T,
    title: String,
    hint: String,
    input: Input,
}

impl<T> Form<T> {
    pub fn new(target: T, title: impl Into<String>, hint: impl Into<String>, value: &str) -> Self {
        Self {
            target,
            title: title.into(),
            hint: hint.into(),
            input: Input::default().with_value(value.to_owned()),
        }
    }

    pub fn value(&self) -> &str {
        self.input.value()
    }

    pub fn handle_key(&mut self, key: KeyEvent) -> FormEvent {
        let ctrl = key.modifiers.contains(KeyModifiers::CONTROL);
        let request = match key.code {
            KeyCode::Enter => return FormEvent::Submit(self.input.value().trim().to_owned()),
            KeyCode::Esc => return FormEvent::Cancel,
            KeyCode::Char('u') if ctrl => InputRequest::DeleteLine,
            KeyCode::Char('w') if ctrl => InputRequest::DeletePrevWord,
            KeyCode::Char(c) => InputRequest::InsertChar(c),
            KeyCode::Backspace => InputRequest::DeletePrevChar,
            KeyCode::Delete => InputRequest::DeleteNextChar,
            KeyCode::Left => InputRequest::GoToPrevChar,
            KeyCode::Right => InputRequest::GoToNextChar,
            KeyCode::Home => InputRequest::GoToStart,
            KeyCode::End => InputRequest::GoToEnd,
            _ => return FormEvent::Pending,
        };
        self.input.handle(request);
        FormEvent::Pending
    }

    pub fn render(&self, frame: &mut Frame, area: Rect, palette: &Palette) {
        let width = 64u16.min(area.width.saturating_sub(4));
        let height = 4u16.min(area.height);
        let x = area.x + area.width.saturating_sub(width) / 2;
        let y = area.y + area.height.saturating_sub(height) / 2;
        let form_area = Rect::new(x, y, width, height);

        frame.render_widget(Clear, form_area);
        let block = Block::default()
            .title(format!(" {} ", self.title))
            .title_style(palette.title_style())
            .borders(Borders::ALL)
            .border_type(BorderType::Rounded)
            .border_style(palette.border_focused())
            .style(palette.overlay());
        let inner = block.inner(form_area);
        frame.render_widget(block, form_area);

        let field_width = usize::from(inner.width.saturating_sub(1));
        let scroll = self.input.visual_scroll(field_width);
        let text = vec![
            Line::from(Span::styled(self.input.value(), palette.table_row())),
            Line::from(Span::styled(self.hint.as_str(), palette.key_hint())),
        ];
        frame.render_widget(
            Paragraph::new(text).scroll((0, u16::try_from(scroll).unwrap_or(0))),
            inner,
        );

        let cursor = self.input.visual_cursor().saturating_sub(scroll);
        frame.set_cursor_position((
            inner.x + u16::try_from(cursor).unwrap_or(0),
            inner.y,
        ));
    }
}

/// Split `a, b c` into names, dropping empties.
pub fn split_names(text: &str) -> Vec<String> {
    text.split([',', ' '])
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_owned)
        .collect()
}
