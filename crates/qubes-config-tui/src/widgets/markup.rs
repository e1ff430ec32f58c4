//! Render the small markup subset row descriptions carry (`<b>` plus
//! escaped entities) as styled spans.

use ratatui::style::{Modifier, Style};
use ratatui::text::{Line, Span};

fn unescape(text: &str) -> String {
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#x27;", "'")
        .replace("&amp;", "&")
}

/// Bold runs get `base` plus bold; other tags are dropped.
pub fn to_line(markup: &str, base: Style) -> Line<'static> {
    let mut spans = Vec::new();
    let mut bold = false;
    let mut rest = markup;
    while !rest.is_empty() {
        let (text, tail) = match rest.find('<') {
            Some(start) => rest.split_at(start),
            None => (rest, ""),
        };
        if !text.is_empty() {
            let style = if bold { base.add_modifier(Modifier::BOLD) } else { base };
            spans.push(Span::styled(unescape(text), style));
        }
        let Some(end) = tail.find('>') else {
            break;
        };
        match &tail[..=end] {
            "<b>" => bold = true,
            "</b>" => bold = false,
            _ => {}
        }
        rest = &tail[end + 1..];
    }
    Line::from(spans)
}

/// Plain text of a markup string.
pub fn plain(markup: &str) -> String {
    to_line(markup, Style::default())
        .spans
        .iter()
        .map(|s| s.content.as_ref())
        .collect()
}
