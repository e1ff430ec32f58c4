//! Colour palettes for the light and dark themes, and the semantic styles
//! screens draw with.

use qubes_config_core::Theme;
use ratatui::style::{Color, Modifier, Style};

// ── Dark palette ──────────────────────────────────────────────────────

const DARK: Palette = Palette {
    accent: Color::Rgb(99, 164, 255),   // #63a4ff
    title: Color::Rgb(128, 255, 234),   // #80ffea
    text: Color::Rgb(189, 193, 207),    // #bdc1cf
    muted: Color::Rgb(98, 114, 164),    // #6272a4
    highlight: Color::Rgb(40, 42, 54),  // #282a36
    overlay: Color::Rgb(30, 31, 41),    // #1e1f29
    success: Color::Rgb(80, 250, 123),  // #50fa7b
    warning: Color::Rgb(241, 250, 140), // #f1fa8c
    error: Color::Rgb(255, 99, 99),     // #ff6363
};

// ── Light palette ─────────────────────────────────────────────────────

const LIGHT: Palette = Palette {
    accent: Color::Rgb(0, 94, 184),      // #005eb8
    title: Color::Rgb(0, 120, 110),      // #00786e
    text: Color::Rgb(40, 42, 54),        // #282a36
    muted: Color::Rgb(110, 115, 130),    // #6e7382
    highlight: Color::Rgb(220, 228, 240), // #dce4f0
    overlay: Color::Rgb(246, 246, 246),  // #f6f6f6
    success: Color::Rgb(26, 127, 55),    // #1a7f37
    warning: Color::Rgb(154, 103, 0),    // #9a6700
    error: Color::Rgb(207, 34, 46),      // #cf222e
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Palette {
    pub accent: Color,
    pub title: Color,
    pub text: Color,
    pub muted: Color,
    pub highlight: Color,
    pub overlay: Color,
    pub success: Color,
    pub warning: Color,
    pub error: Color,
}

impl Palette {
    pub fn for_theme(theme: Theme) -> Self {
        match theme {
            Theme::Light => LIGHT,
            Theme::Dark => DARK,
        }
    }

    // ── Semantic styles ───────────────────────────────────────────────

    pub fn title_style(&self) -> Style {
        Style::default().fg(self.title).add_modifier(Modifier::BOLD)
    }

    pub fn border_focused(&self) -> Style {
        Style::default().fg(self.accent)
    }

    pub fn border_default(&self) -> Style {
        Style::default().fg(self.muted)
    }

    pub fn table_header(&self) -> Style {
        Style::default()
            .fg(self.title)
            .add_modifier(Modifier::BOLD | Modifier::UNDERLINED)
    }

    pub fn table_row(&self) -> Style {
        Style::default().fg(self.text)
    }

    pub fn table_selected(&self) -> Style {
        Style::default()
            .fg(self.accent)
            .bg(self.highlight)
            .add_modifier(Modifier::BOLD)
    }

    /// Rows that cannot be edited here.
    pub fn table_readonly(&self) -> Style {
        Style::default().fg(self.muted).add_modifier(Modifier::ITALIC)
    }

    pub fn tab_active(&self) -> Style {
        Style::default().fg(self.accent).add_modifier(Modifier::BOLD)
    }

    pub fn tab_inactive(&self) -> Style {
        Style::default().fg(self.text)
    }

    pub fn key_hint(&self) -> Style {
        Style::default().fg(self.muted)
    }

    pub fn key_hint_key(&self) -> Style {
        Style::default().fg(self.title).add_modifier(Modifier::BOLD)
    }

    pub fn overlay(&self) -> Style {
        Style::default().bg(self.overlay)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn themes_map_to_distinct_palettes() {
        assert_eq!(Palette::for_theme(Theme::Dark), DARK);
        assert_eq!(Palette::for_theme(Theme::Light), LIGHT);
        assert_ne!(DARK.text, LIGHT.text);
    }
}
