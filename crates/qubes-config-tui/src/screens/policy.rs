//! Policy pages: the main rules and exceptions of each policy file on the
//! page, plus feature choices where the page has them.

use std::str::FromStr;

use color_eyre::eyre::Result;
use crossterm::event::{KeyCode, KeyEvent};
use qubes_config_core::policy::{Action as RuleAction, PolicyLayout, RuleKind};
use qubes_config_core::{Page, PageId, PagePart, PolicyHandler, RowList, RuleEdit};
use ratatui::Frame;
use ratatui::layout::{Constraint, Layout, Rect};
use ratatui::style::Style;
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, BorderType, Borders, Cell, Paragraph, Row, Table, TableState, Wrap};

use crate::action::{Action, Notification, NotificationLevel, PageEdit};
use crate::component::Component;
use crate::screen;
use crate::theme::Palette;
use crate::widgets::form::{Form, FormEvent};
use crate::widgets::{selection, sub_tabs};

// ── Views ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
struct RuleLine {
    list: RowList,
    /// Index in the handler's list.
    index: usize,
    source: String,
    target: String,
    action: RuleAction,
    label: &'static str,
    deletable: bool,
}

#[derive(Debug, Clone)]
struct PolicyView {
    file: &'static str,
    key: &'static str,
    layout: PolicyLayout,
    exception_kind: RuleKind,
    new_rule: (&'static str, &'static str, &'static str),
    use_default: bool,
    rows: Vec<RuleLine>,
    errors: Vec<String>,
    raw: String,
}

impl PolicyView {
    fn from_handler(handler: &PolicyHandler) -> Self {
        let def = handler.def();
        let mut rows = Vec::new();
        for list in [RowList::PolicyMain, RowList::PolicyExceptions] {
            for (index, row) in handler.rows(list).iter().enumerate() {
                if row.is_new() {
                    continue;
                }
                let rule = row.rule();
                rows.push(RuleLine {
                    list,
                    index,
                    source: rule.source().to_owned(),
                    target: rule.target(),
                    action: rule.action(),
                    label: rule.kind().action_label(rule.action()),
                    deletable: row.deletable(),
                });
            }
        }
        Self {
            file: def.file_name,
            key: def.key,
            layout: def.layout,
            exception_kind: def.exception_kind,
            new_rule: def.new_rule,
            use_default: handler.use_default(),
            rows,
            errors: handler.errors().iter().map(ToString::to_string).collect(),
            raw: handler.raw_text(),
        }
    }
}

#[derive(Debug, Clone)]
struct FeatureView {
    feature: &'static str,
    name: String,
    selected: Option<String>,
    selected_label: String,
    choices: Vec<Option<String>>,
}

impl FeatureView {
    /// Value after the current one, wrapping.
    fn next_value(&self) -> Option<String> {
        let current = self.choices.iter().position(|c| *c == self.selected).unwrap_or(0);
        self.choices
            .get((current + 1) % self.choices.len().max(1))
            .cloned()
            .flatten()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PolicyForm {
    Rule { list: RowList, index: Option<usize> },
    KeyQube,
}

/// Parse an action by name (`allow`) or by its label on this page (`always`).
fn parse_action(kind: RuleKind, word: &str) -> Option<RuleAction> {
    RuleAction::from_str(word).ok().or_else(|| {
        kind.action_choices()
            .iter()
            .find(|(_, label)| label.eq_ignore_ascii_case(word))
            .map(|(action, _)| *action)
    })
}

fn parse_rule(kind: RuleKind, text: &str) -> Result<RuleEdit, String> {
    let words: Vec<&str> = text.split_whitespace().collect();
    let [source, target, action] = words.as_slice() else {
        return Err("Enter SOURCE TARGET ACTION".into());
    };
    let action = parse_action(kind, action).ok_or_else(|| format!("Unknown action '{action}'"))?;
    Ok(RuleEdit {
        source: (*source).to_owned(),
        target: (*target).to_owned(),
        action,
    })
}

pub struct PolicyScreen {
    page: PageId,
    palette: Palette,
    policies: Vec<PolicyView>,
    features: Vec<FeatureView>,
    active: usize,
    table: TableState,
    show_raw: bool,
    form: Option<Form<PolicyForm>>,
}

impl PolicyScreen {
    pub fn new(page: PageId, palette: Palette) -> Self {
        Self {
            page,
            palette,
            policies: Vec::new(),
            features: Vec::new(),
            active: 0,
            table: TableState::default(),
            show_raw: false,
            form: None,
        }
    }

    fn current(&self) -> Option<&PolicyView> {
        self.policies.get(self.active)
    }

    fn selected_row(&self) -> Option<&RuleLine> {
        self.current()?.rows.get(selection::selected(&self.table))
    }

    fn row_count(&self) -> usize {
        self.current().map_or(0, |p| p.rows.len())
    }

    fn switch_policy(&mut self, delta: isize) {
        if self.policies.is_empty() {
            return;
        }
        let len = self.policies.len();
        self.active = (self.active + len).saturating_add_signed(delta) % len;
        self.table.select(Some(0));
        let len = self.row_count();
        selection::clamp(&mut self.table, len);
    }

    fn open_rule_form(&mut self, list: RowList, index: Option<usize>, value: String) {
        self.form = Some(Form::new(
            PolicyForm::Rule { list, index },
            if index.is_some() { "Edit rule" } else { "New exception" },
            "SOURCE TARGET ACTION  (e.g. work @anyvm deny)",
            &value,
        ));
    }

    fn submit(&self, target: PolicyForm, text: &str) -> Option<Action> {
        let policy = self.current()?;
        let edit = match target {
            PolicyForm::Rule { list, index } => match parse_rule(policy.exception_kind, text) {
                Ok(edit) => PageEdit::SaveRule {
                    policy: policy.file,
                    list,
                    index,
                    edit,
                },
                Err(message) => {
                    return Some(Action::Notify(Notification::new(NotificationLevel::Error, message)));
                }
            },
            PolicyForm::KeyQube => PageEdit::AddKeyQube {
                policy: policy.file,
                qube: text.to_owned(),
            },
        };
        Some(Action::Edit(edit))
    }

    fn select_feature(&self, index: usize) -> Option<Action> {
        let feature = self.features.get(index)?;
        Some(Action::Edit(PageEdit::SelectFeature {
            feature: feature.feature,
            value: feature.next_value(),
        }))
    }

    // ── Rendering ─────────────────────────────────────────────────────

    fn render_rules(&self, frame: &mut Frame, area: Rect, policy: &PolicyView) {
        let p = &self.palette;
        let header = Row::new(
            ["", "From", "To", "Action"].map(|h| Cell::from(h).style(p.table_header())),
        );
        let rows: Vec<Row> = policy
            .rows
            .iter()
            .map(|rule| {
                let marker = if rule.list == RowList::PolicyMain { "*" } else { " " };
                let action_color = match rule.action {
                    RuleAction::Allow => p.success,
                    RuleAction::Ask => p.warning,
                    RuleAction::Deny => p.error,
                };
                let style = if rule.deletable { p.table_row() } else { p.table_readonly() };
                Row::new(vec![
                    Cell::from(marker),
                    Cell::from(rule.source.clone()),
                    Cell::from(rule.target.clone()),
                    Cell::from(rule.label).style(Style::default().fg(action_color)),
                ])
                .style(style)
            })
            .collect();
        let widths = [
            Constraint::Length(1),
            Constraint::Min(16),
            Constraint::Min(16),
            Constraint::Length(14),
        ];
        let table = Table::new(rows, widths)
            .header(header)
            .row_highlight_style(p.table_selected());
        let mut state = self.table;
        frame.render_stateful_widget(table, area, &mut state);
    }

    fn status_line(&self, policy: &PolicyView) -> Line<'static> {
        let p = &self.palette;
        let mut spans = Vec::new();
        if policy.layout != PolicyLayout::ExceptionsOnly {
            let (mark, text) = if policy.use_default {
                ("●", "using the default policy")
            } else {
                ("○", "custom policy")
            };
            spans.push(Span::styled(format!("{mark} {text}"), p.table_row()));
        }
        if !policy.errors.is_empty() {
            spans.push(Span::styled(
                format!("  {} rule(s) could not be shown and are kept as is", policy.errors.len()),
                Style::default().fg(p.warning),
            ));
        }
        Line::from(spans)
    }

    fn hints(&self) -> Line<'static> {
        let p = &self.palette;
        let mut keys = vec![("j/k", "navigate"), ("n", "new"), ("e", "edit"), ("d", "remove")];
        if self.policies.len() > 1 {
            keys.push(("h/l", "policy"));
        }
        match self.current().map(|c| c.layout) {
            Some(PolicyLayout::KeyQubes) => keys.push(("K", "key qube")),
            Some(PolicyLayout::Standard) => keys.push(("D", "default")),
            _ => {}
        }
        if !self.features.is_empty() {
            keys.push(("c/p", "shortcuts"));
        }
        keys.extend([("v", "raw"), ("a", "apply"), ("r", "reset")]);
        let mut spans = Vec::new();
        for (key, label) in keys {
            spans.push(Span::styled(format!("  {key} "), p.key_hint_key()));
            spans.push(Span::styled(label, p.key_hint()));
        }
        Line::from(spans)
    }
}

impl Component for PolicyScreen {
    fn handle_key_event(&mut self, key: KeyEvent) -> Result<Option<Action>> {
        if let Some(form) = &mut self.form {
            return Ok(match form.handle_key(key) {
                FormEvent::Pending => None,
                FormEvent::Cancel => {
                    self.form = None;
                    None
                }
                FormEvent::Submit(text) => {
                    let target = form.target;
                    self.form = None;
                    self.submit(target, &text)
                }
            });
        }

        let action = match key.code {
            KeyCode::Char('j') | KeyCode::Down => {
                let len = self.row_count();
                selection::move_by(&mut self.table, len, 1);
                None
            }
            KeyCode::Char('k') | KeyCode::Up => {
                let len = self.row_count();
                selection::move_by(&mut self.table, len, -1);
                None
            }
            KeyCode::Char('l') | KeyCode::Right => {
                self.switch_policy(1);
                None
            }
            KeyCode::Char('h') | KeyCode::Left => {
                self.switch_policy(-1);
                None
            }
            KeyCode::Char('v') => {
                self.show_raw = !self.show_raw;
                None
            }
            KeyCode::Char('n') => {
                if let Some(policy) = self.current() {
                    let (source, target, action) = policy.new_rule;
                    // Action text may carry parameters (`allow target=...`)
                    let action = action.split_whitespace().next().unwrap_or("deny");
                    let value = format!("{source} {target} {action}");
                    self.open_rule_form(RowList::PolicyExceptions, None, value);
                }
                None
            }
            KeyCode::Char('e') | KeyCode::Enter => {
                if let Some(row) = self.selected_row().cloned() {
                    let value = format!("{} {} {}", row.source, row.target, row.action);
                    self.open_rule_form(row.list, Some(row.index), value);
                }
                None
            }
            KeyCode::Char('d') => match (self.current(), self.selected_row()) {
                (Some(policy), Some(row)) if row.deletable => Some(Action::Edit(PageEdit::RemoveRule {
                    policy: policy.file,
                    list: row.list,
                    index: row.index,
                })),
                (_, Some(_)) => Some(Action::Notify(Notification::new(
                    NotificationLevel::Warning,
                    "This rule cannot be removed",
                ))),
                _ => None,
            },
            KeyCode::Char('D') => self
                .current()
                .filter(|p| p.layout == PolicyLayout::Standard)
                .map(|p| {
                    Action::Edit(PageEdit::SetUseDefault {
                        policy: p.file,
                        value: !p.use_default,
                    })
                }),
            KeyCode::Char('K') => {
                if self.current().is_some_and(|p| p.layout == PolicyLayout::KeyQubes) {
                    self.form = Some(Form::new(PolicyForm::KeyQube, "Qube with keys", "QUBE", ""));
                }
                None
            }
            KeyCode::Char('c') => self.select_feature(0),
            KeyCode::Char('p') => self.select_feature(1),
            _ => None,
        };
        Ok(action)
    }

    fn sync(&mut self, page: &mut Page) {
        self.policies.clear();
        self.features.clear();
        for part in page.parts() {
            match part {
                PagePart::Policy(handler) => self.policies.push(PolicyView::from_handler(handler)),
                PagePart::Feature(handler) => self.features.push(FeatureView {
                    feature: handler.def().feature,
                    name: handler.readable_name().to_owned(),
                    selected: handler.selected().map(str::to_owned),
                    selected_label: handler.selected_label().to_owned(),
                    choices: handler.choices().iter().map(|c| c.value.clone()).collect(),
                }),
                PagePart::Devices(_) | PagePart::UpdateCheck(_) => {}
            }
        }
        self.active = self.active.min(self.policies.len().saturating_sub(1));
        let len = self.row_count();
        selection::clamp(&mut self.table, len);
    }

    fn render(&self, frame: &mut Frame, area: Rect) {
        let p = &self.palette;
        let block = Block::default()
            .title(format!(" {} ", screen::label(self.page)))
            .title_style(p.title_style())
            .borders(Borders::ALL)
            .border_type(BorderType::Rounded)
            .border_style(p.border_focused());
        let inner = block.inner(area);
        frame.render_widget(block, area);

        let feature_height = u16::try_from(self.features.len()).unwrap_or(0);
        let [tabs_area, features_area, status_area, content_area, hints_area] = Layout::vertical([
            Constraint::Length(1),
            Constraint::Length(feature_height),
            Constraint::Length(1),
            Constraint::Min(1),
            Constraint::Length(1),
        ])
        .areas(inner);

        let labels: Vec<&str> = self.policies.iter().map(|v| v.key).collect();
        frame.render_widget(
            Paragraph::new(sub_tabs::render_sub_tabs(&labels, self.active, p)),
            tabs_area,
        );

        let features: Vec<Line> = self
            .features
            .iter()
            .map(|f| {
                Line::from(vec![
                    Span::styled(format!("{}: ", f.name), p.key_hint()),
                    Span::styled(f.selected_label.clone(), p.table_row()),
                ])
            })
            .collect();
        frame.render_widget(Paragraph::new(features), features_area);

        if let Some(policy) = self.current() {
            frame.render_widget(Paragraph::new(self.status_line(policy)), status_area);
            if self.show_raw {
                frame.render_widget(
                    Paragraph::new(policy.raw.clone())
                        .style(p.table_row())
                        .wrap(Wrap { trim: false }),
                    content_area,
                );
            } else {
                self.render_rules(frame, content_area, policy);
            }
        }
        frame.render_widget(Paragraph::new(self.hints()), hints_area);

        if let Some(form) = &self.form {
            form.render(frame, area, p);
        }
    }

    fn focus(&mut self, location: &str) {
        if let Some(index) = self.policies.iter().position(|v| location.starts_with(v.key)) {
            self.active = index;
        }
        if location == "open_in_vm" {
            if let Some(index) = self.policies.iter().position(|v| v.key == "openinvm") {
                self.active = index;
            }
        }
    }

    fn capturing_input(&self) -> bool {
        self.form.is_some()
    }

    fn id(&self) -> PageId {
        self.page
    }
}
