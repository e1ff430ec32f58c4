//! Devices page: automatic attachments, required devices and block lists,
//! next to the live list of exposed devices.

use std::str::FromStr;

use color_eyre::eyre::Result;
use crossterm::event::{KeyCode, KeyEvent};
use qubes_admin::{AssignmentMode, DevClass, DeviceInfo};
use qubes_config_core::{AttachmentKind, CategoryId, Page, PageId};
use ratatui::Frame;
use ratatui::layout::{Constraint, Layout, Rect};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, BorderType, Borders, Cell, List, ListItem, Paragraph, Row, Table, TableState};
use strum::IntoEnumIterator;

use crate::action::{Action, Notification, NotificationLevel, PageEdit};
use crate::component::Component;
use crate::theme::Palette;
use crate::widgets::form::{Form, FormEvent, split_names};
use crate::widgets::{markup, selection, sub_tabs};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
enum Section {
    #[default]
    Attach,
    Required,
    Blocks,
}

impl Section {
    const ALL: [Self; 3] = [Self::Attach, Self::Required, Self::Blocks];

    fn index(self) -> usize {
        match self {
            Self::Attach => 0,
            Self::Required => 1,
            Self::Blocks => 2,
        }
    }

    fn label(self) -> &'static str {
        match self {
            Self::Attach => "Attach automatically",
            Self::Required => "Required",
            Self::Blocks => "Blocked",
        }
    }

    fn kind(self) -> Option<AttachmentKind> {
        match self {
            Self::Attach => Some(AttachmentKind::Auto),
            Self::Required => Some(AttachmentKind::Required),
            Self::Blocks => None,
        }
    }

    fn from_location(location: &str) -> Option<Self> {
        match location {
            "attachments" => Some(Self::Attach),
            "required_devices" => Some(Self::Required),
            "blocks" => Some(Self::Blocks),
            _ => None,
        }
    }

    fn cycle(self, delta: isize) -> Self {
        let next = (self.index() + Self::ALL.len()).saturating_add_signed(delta) % Self::ALL.len();
        Self::ALL[next]
    }
}

// ── Views ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
struct RuleView {
    device: String,
    action: &'static str,
    qubes: Vec<String>,
    ask: bool,
    editable: bool,
    tooltip: Option<String>,
}

#[derive(Debug, Clone)]
struct BlockView {
    vm: String,
    categories: Vec<CategoryId>,
    blocked: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DeviceForm {
    NewAttachment(AttachmentKind),
    Frontends(AttachmentKind, usize),
    NewBlock,
    EditBlock(usize),
}

fn device_line(device: &DeviceInfo) -> String {
    format!("{}  {}", device.port, device.description())
}

fn error(message: impl Into<String>) -> Option<Action> {
    Some(Action::Notify(Notification::new(NotificationLevel::Error, message)))
}

pub struct DevicesScreen {
    palette: Palette,
    section: Section,
    tables: [TableState; 3],
    attach: Vec<RuleView>,
    required: Vec<RuleView>,
    blocks: Vec<BlockView>,
    /// Exposed devices; replaced by the watcher once it reports.
    available: Vec<String>,
    live: bool,
    warnings: Vec<String>,
    form: Option<Form<DeviceForm>>,
}

impl DevicesScreen {
    pub fn new(palette: Palette) -> Self {
        Self {
            palette,
            section: Section::default(),
            tables: Default::default(),
            attach: Vec::new(),
            required: Vec::new(),
            blocks: Vec::new(),
            available: Vec::new(),
            live: false,
            warnings: Vec::new(),
            form: None,
        }
    }

    fn rules(&self, kind: AttachmentKind) -> &[RuleView] {
        match kind {
            AttachmentKind::Auto => &self.attach,
            AttachmentKind::Required => &self.required,
        }
    }

    fn len(&self, section: Section) -> usize {
        match section.kind() {
            Some(kind) => self.rules(kind).len(),
            None => self.blocks.len(),
        }
    }

    fn state(&mut self) -> &mut TableState {
        &mut self.tables[self.section.index()]
    }

    fn selected(&self) -> Option<usize> {
        let index = selection::selected(&self.tables[self.section.index()]);
        (index < self.len(self.section)).then_some(index)
    }

    fn move_selection(&mut self, delta: isize) {
        let len = self.len(self.section);
        selection::move_by(self.state(), len, delta);
    }

    // ── Forms ─────────────────────────────────────────────────────────

    fn open_new(&mut self) {
        let form = match self.section.kind() {
            Some(kind) => Form::new(
                DeviceForm::NewAttachment(kind),
                "New rule",
                "BACKEND:PORT qube[, qube...]",
                "",
            ),
            None => Form::new(
                DeviceForm::NewBlock,
                "Block devices",
                "QUBE category [category...]  (e.g. work usb_storage)",
                "",
            ),
        };
        self.form = Some(form);
    }

    fn open_edit(&mut self) -> Option<Action> {
        let index = self.selected()?;
        match self.section.kind() {
            Some(kind) => {
                let rule = &self.rules(kind)[index];
                if !rule.editable {
                    let reason = rule.tooltip.clone().unwrap_or_else(|| "This rule is read-only".into());
                    return Some(Action::Notify(Notification::new(NotificationLevel::Warning, reason)));
                }
                self.form = Some(Form::new(
                    DeviceForm::Frontends(kind, index),
                    "Qubes",
                    "qube[, qube...]",
                    &rule.qubes.join(", "),
                ));
            }
            None => {
                let block = &self.blocks[index];
                let value = std::iter::once(block.vm.clone())
                    .chain(block.categories.iter().map(ToString::to_string))
                    .collect::<Vec<_>>()
                    .join(" ");
                self.form = Some(Form::new(
                    DeviceForm::EditBlock(index),
                    "Block devices",
                    "QUBE category [category...]",
                    &value,
                ));
            }
        }
        None
    }

    fn submit(target: DeviceForm, text: &str) -> Option<Action> {
        let edit = match target {
            DeviceForm::NewAttachment(kind) => {
                let (device, qubes) = text.split_once(char::is_whitespace).unwrap_or((text, ""));
                if device.is_empty() {
                    return error("Enter a device as BACKEND:PORT followed by qube names");
                }
                PageEdit::NewAttachment {
                    kind,
                    device: device.to_owned(),
                    frontends: split_names(qubes),
                }
            }
            DeviceForm::Frontends(kind, index) => PageEdit::SetFrontends {
                kind,
                index,
                frontends: split_names(text),
            },
            DeviceForm::NewBlock | DeviceForm::EditBlock(_) => {
                let mut words = split_names(text).into_iter();
                let Some(vm) = words.next() else {
                    return error("Enter a qube followed by device categories");
                };
                let mut categories = Vec::new();
                for word in words {
                    match CategoryId::from_str(&word) {
                        Ok(category) => categories.push(category),
                        Err(_) => return error(format!("Unknown category '{word}'")),
                    }
                }
                let index = match target {
                    DeviceForm::EditBlock(index) => Some(index),
                    _ => None,
                };
                PageEdit::SaveBlock { index, vm, categories }
            }
        };
        Some(Action::Edit(edit))
    }

    // ── Rendering ─────────────────────────────────────────────────────

    fn render_rules(&self, frame: &mut Frame, area: Rect, kind: AttachmentKind) {
        let p = &self.palette;
        let header = Row::new(["Device", "Action", "Qubes"].map(|h| Cell::from(h).style(p.table_header())));
        let rows: Vec<Row> = self
            .rules(kind)
            .iter()
            .map(|rule| {
                let style = if rule.editable { p.table_row() } else { p.table_readonly() };
                let action = if rule.ask { "will ask to be attached to" } else { rule.action };
                Row::new(vec![
                    Cell::from(markup::to_line(&rule.device, style)),
                    Cell::from(action),
                    Cell::from(rule.qubes.join(", ")),
                ])
                .style(style)
            })
            .collect();
        let widths = [Constraint::Min(24), Constraint::Length(28), Constraint::Min(16)];
        let table = Table::new(rows, widths)
            .header(header)
            .row_highlight_style(p.table_selected());
        let mut state = self.tables[self.section.index()];
        frame.render_stateful_widget(table, area, &mut state);
    }

    fn render_blocks(&self, frame: &mut Frame, area: Rect) {
        let p = &self.palette;
        let header = Row::new(["Qube", "Cannot be attached"].map(|h| Cell::from(h).style(p.table_header())));
        let rows: Vec<Row> = self
            .blocks
            .iter()
            .map(|block| {
                let blocked = markup::plain(&block.blocked);
                let blocked = blocked.trim_end_matches(" cannot be attached to ").to_owned();
                Row::new(vec![Cell::from(block.vm.clone()), Cell::from(blocked)]).style(p.table_row())
            })
            .collect();
        let table = Table::new(rows, [Constraint::Length(20), Constraint::Min(20)])
            .header(header)
            .row_highlight_style(p.table_selected());
        let mut state = self.tables[Section::Blocks.index()];
        frame.render_stateful_widget(table, area, &mut state);
    }

    fn render_available(&self, frame: &mut Frame, area: Rect) {
        let p = &self.palette;
        let title = if self.live { " Connected " } else { " Connected (at load) " };
        let block = Block::default()
            .title(title)
            .title_style(p.title_style())
            .borders(Borders::LEFT)
            .border_style(p.border_default());
        let items: Vec<ListItem> = self
            .available
            .iter()
            .map(|line| ListItem::new(Span::styled(line.clone(), p.table_row())))
            .collect();
        frame.render_widget(List::new(items).block(block), area);
    }

    fn hints(&self) -> Line<'static> {
        let p = &self.palette;
        let mut keys = vec![("j/k", "navigate"), ("h/l", "section"), ("n", "new"), ("e", "edit"), ("d", "remove")];
        if self.section == Section::Attach {
            keys.push(("t", "ask/attach"));
        }
        keys.extend([("a", "apply"), ("r", "reset")]);
        let mut spans = Vec::new();
        for (key, label) in keys {
            spans.push(Span::styled(format!("  {key} "), p.key_hint_key()));
            spans.push(Span::styled(label, p.key_hint()));
        }
        Line::from(spans)
    }
}

impl Component for DevicesScreen {
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
                    Self::submit(target, &text)
                }
            });
        }

        let action = match key.code {
            KeyCode::Char('j') | KeyCode::Down => {
                self.move_selection(1);
                None
            }
            KeyCode::Char('k') | KeyCode::Up => {
                self.move_selection(-1);
                None
            }
            KeyCode::Char('g') => {
                self.state().select_first();
                None
            }
            KeyCode::Char('G') => {
                let len = self.len(self.section);
                selection::last(self.state(), len);
                None
            }
            KeyCode::Char('l') | KeyCode::Right => {
                self.section = self.section.cycle(1);
                None
            }
            KeyCode::Char('h') | KeyCode::Left => {
                self.section = self.section.cycle(-1);
                None
            }
            KeyCode::Char('n') => {
                self.open_new();
                None
            }
            KeyCode::Char('e') | KeyCode::Enter => self.open_edit(),
            KeyCode::Char('d') => self.selected().map(|index| {
                Action::Edit(match self.section.kind() {
                    Some(kind) => PageEdit::RemoveAttachment { kind, index },
                    None => PageEdit::RemoveBlock { index },
                })
            }),
            KeyCode::Char('t') if self.section == Section::Attach => self
                .selected()
                .map(|index| Action::Edit(PageEdit::ToggleAsk { index })),
            _ => None,
        };
        Ok(action)
    }

    fn update(&mut self, action: &Action) -> Result<Option<Action>> {
        if let Action::DevicesRefreshed(devices) = action {
            self.available = devices.iter().map(|d| device_line(d)).collect();
            self.live = true;
        }
        Ok(None)
    }

    fn sync(&mut self, page: &mut Page) {
        let Some(handler) = page.devices_mut() else {
            return;
        };
        let views = |kind: AttachmentKind| -> Vec<RuleView> {
            handler
                .attachments(kind)
                .rows()
                .iter()
                .map(|row| RuleView {
                    device: row.wrapper.device_description(),
                    action: row.wrapper.action_description(),
                    qubes: row.wrapper.frontends().to_vec(),
                    ask: row.wrapper.mode() == AssignmentMode::AskToAttach,
                    editable: row.editable,
                    tooltip: row.tooltip.clone(),
                })
                .collect()
        };
        self.attach = views(AttachmentKind::Auto);
        self.required = views(AttachmentKind::Required);
        self.blocks = handler
            .blocks()
            .rows()
            .iter()
            .map(|policy| BlockView {
                vm: policy.vm().unwrap_or_default().to_owned(),
                categories: policy.categories().to_vec(),
                blocked: policy.description(),
            })
            .collect();
        self.warnings = handler.validate_all_rows();
        if !self.live {
            let classes: Vec<DevClass> = DevClass::iter().collect();
            self.available = handler
                .manager()
                .available_devices(&classes)
                .map(device_line)
                .collect();
        }
        for section in Section::ALL {
            let len = self.len(section);
            selection::clamp(&mut self.tables[section.index()], len);
        }
    }

    fn render(&self, frame: &mut Frame, area: Rect) {
        let p = &self.palette;
        let block = Block::default()
            .title(" Devices ")
            .title_style(p.title_style())
            .borders(Borders::ALL)
            .border_type(BorderType::Rounded)
            .border_style(p.border_focused());
        let inner = block.inner(area);
        frame.render_widget(block, area);

        let warning_height = u16::try_from(self.warnings.len().min(2)).unwrap_or(2);
        let [tabs_area, content_area, warning_area, hints_area] = Layout::vertical([
            Constraint::Length(1),
            Constraint::Min(1),
            Constraint::Length(warning_height),
            Constraint::Length(1),
        ])
        .areas(inner);

        let labels = Section::ALL.map(Section::label);
        frame.render_widget(
            Paragraph::new(sub_tabs::render_sub_tabs(&labels, self.section.index(), p)),
            tabs_area,
        );

        match self.section.kind() {
            Some(kind) => {
                let [table_area, side_area] =
                    Layout::horizontal([Constraint::Min(40), Constraint::Length(36)]).areas(content_area);
                self.render_rules(frame, table_area, kind);
                self.render_available(frame, side_area);
            }
            None => self.render_blocks(frame, content_area),
        }

        let warnings: Vec<Line> = self
            .warnings
            .iter()
            .map(|w| Line::from(Span::styled(format!("! duplicate: {}", markup::plain(w)), p.key_hint())))
            .collect();
        frame.render_widget(Paragraph::new(warnings), warning_area);
        frame.render_widget(Paragraph::new(self.hints()), hints_area);

        if let Some(form) = &self.form {
            form.render(frame, area, p);
        }
    }

    fn focus(&mut self, location: &str) {
        if let Some(section) = Section::from_location(location) {
            self.section = section;
        }
    }

    fn capturing_input(&self) -> bool {
        self.form.is_some()
    }

    fn id(&self) -> PageId {
        PageId::Devices
    }
}
