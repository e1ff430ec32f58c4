//! One-line section switcher used inside a page.

use ratatui::text::{Line, Span};

use crate::theme::Palette;

/// The active label is bracketed and highlighted.
pub fn render_sub_tabs<'a>(labels: &[&'a str], active: usize, palette: &Palette) -> Line<'a> {
    let mut spans = Vec::with_capacity(labels.len() * 2);
    for (i, label) in labels.iter().enumerate() {
        if i > 0 {
            spans.push(Span::styled("  ", palette.key_hint()));
        }
        if i == active {
            spans.push(Span::styled(format!("[{label}]"), palette.tab_active()));
        } else {
            spans.push(Span::styled(*label, palette.tab_inactive()));
        }
    }
    Line::from(spans)
}

#[cfg(test)]
mod tests {
    use qubes_config_core::Theme;

    use super::*;

    #[test]
    fn active_label_is_bracketed() {
        let palette = Palette::for_theme(Theme::Dark);
        let line = render_sub_tabs(&["Attach", "Required", "Blocks"], 1, &palette);
        let text: String = line.spans.iter().map(|s| s.content.as_ref()).collect();
        assert_eq!(text, "Attach  [Required]  Blocks");
    }
}
