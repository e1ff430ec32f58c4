//! Application core: the event loop, global keys, page edits and overlays.
//!
//! The app owns the [`GlobalConfig`]; screens only see a page while it is
//! being synced into their view. Every change goes through an [`Action`]
//! on the channel, and every edit is followed by a re-sync of the active
//! screen.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use color_eyre::eyre::Result;
use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};
use qubes_admin::AssignmentMode;
use qubes_config_core::{
    AttachmentKind, CoreError, DeviceStore, DeviceWatcher, DevicesHandler, FeatureChoiceHandler,
    GlobalConfig, OpenAt, Page, PageHandler, PageId, PagePart, PolicyHandler, RowList,
    UnsavedDecision, UpdateCheckHandler, devices::CategorySelection,
};
use ratatui::Frame;
use ratatui::layout::{Constraint, Layout, Rect};
use ratatui::style::Style;
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, BorderType, Borders, Clear, Paragraph, Tabs, Wrap};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::action::{Action, Leave, Notification, NotificationLevel, PageEdit};
use crate::bridge;
use crate::component::Component;
use crate::event::{Event, EventReader};
use crate::screen::{self, PAGES};
use crate::screens;
use crate::theme::Palette;
use crate::tui::Tui;
use crate::widgets::markup;

const TICK_RATE: Duration = Duration::from_millis(250);
const RENDER_RATE: Duration = Duration::from_millis(33);
const NOTIFICATION_TTL: Duration = Duration::from_secs(4);

pub struct AppOptions {
    pub open_at: OpenAt,
    pub palette: Palette,
    /// Quiet period before the device watcher refreshes.
    pub debounce: Duration,
}

pub struct App {
    config: GlobalConfig,
    screens: Vec<Box<dyn Component>>,
    active: PageId,
    /// Pages whose row buses already feed the action channel.
    subscribed: HashSet<PageId>,
    /// Pending changes of the active page, empty when clean.
    unsaved: String,
    pending_leave: Option<(Leave, String)>,
    notification: Option<(Notification, Instant)>,
    help_visible: bool,
    running: bool,
    palette: Palette,
    debounce: Duration,
    store: Arc<DeviceStore>,
    cancel: CancellationToken,
    action_tx: mpsc::UnboundedSender<Action>,
    action_rx: mpsc::UnboundedReceiver<Action>,
}

impl App {
    pub fn new(config: GlobalConfig, options: AppOptions) -> Self {
        let (action_tx, action_rx) = mpsc::unbounded_channel();
        let mut app = Self {
            config,
            screens: screens::create_screens(options.palette),
            active: options.open_at.page,
            subscribed: HashSet::new(),
            unsaved: String::new(),
            pending_leave: None,
            notification: None,
            help_visible: false,
            running: true,
            palette: options.palette,
            debounce: options.debounce,
            store: Arc::new(DeviceStore::new()),
            cancel: CancellationToken::new(),
            action_tx,
            action_rx,
        };
        if let Some(warning) = &options.open_at.warning {
            app.notify(NotificationLevel::Warning, warning.clone());
        }
        app.sync_active();
        if let Some(location) = options.open_at.location {
            if let Some(screen) = app.screen_mut(app.active) {
                screen.focus(location);
            }
        }
        app
    }

    /// Run the event loop until the user quits.
    pub async fn run(&mut self) -> Result<()> {
        let mut tui = Tui::new()?;
        tui.enter()?;

        let watcher = self.start_watcher();
        let mut events = EventReader::new(TICK_RATE, RENDER_RATE);
        info!(page = %self.active, "event loop started");

        while self.running {
            let Some(event) = events.next().await else {
                break;
            };
            let action = match event {
                Event::Key(key) => self.handle_key_event(key)?,
                Event::Resize(w, h) => Some(Action::Resize(w, h)),
                Event::Tick => Some(Action::Tick),
                Event::Render => Some(Action::Render),
            };
            if let Some(action) = action {
                self.action_tx.send(action)?;
            }

            while let Ok(action) = self.action_rx.try_recv() {
                self.process_action(&action)?;
                if matches!(action, Action::Render) {
                    tui.draw(|frame| self.render(frame))?;
                }
            }
        }

        self.cancel.cancel();
        events.stop();
        if let Some(watcher) = watcher {
            watcher.shutdown().await;
        }
        tui.exit();
        info!("event loop ended");
        Ok(())
    }

    /// Start the device watcher and its bridge. Without device events the
    /// page still works from the list read at load time.
    fn start_watcher(&self) -> Option<DeviceWatcher> {
        let client = Arc::clone(&self.config.context().client);
        match DeviceWatcher::spawn(client, Arc::clone(&self.store), self.debounce, self.cancel.child_token()) {
            Ok(watcher) => {
                tokio::spawn(bridge::device_bridge(
                    Arc::clone(&self.store),
                    self.action_tx.clone(),
                    self.cancel.child_token(),
                ));
                Some(watcher)
            }
            Err(e) => {
                warn!(error = %e, "device watcher not started");
                None
            }
        }
    }

    fn screen_mut(&mut self, page: PageId) -> Option<&mut Box<dyn Component>> {
        self.screens.iter_mut().find(|s| s.id() == page)
    }

    fn active_screen(&self) -> Option<&dyn Component> {
        self.screens
            .iter()
            .find(|s| s.id() == self.active)
            .map(Box::as_ref)
    }

    fn notify(&mut self, level: NotificationLevel, message: impl Into<String>) {
        self.notification = Some((Notification::new(level, message), Instant::now()));
    }

    /// Load the active page if needed, hook up its row buses and refresh
    /// its screen and the unsaved summary.
    fn sync_active(&mut self) {
        let page = match self.config.page(self.active) {
            Ok(page) => page,
            Err(e) => {
                warn!(page = %self.active, error = %e, "page failed to load");
                let message = format!("Could not load {}: {e}", self.active);
                self.notify(NotificationLevel::Error, message);
                return;
            }
        };
        if self.subscribed.insert(self.active) {
            bridge::subscribe_rows(page, &self.action_tx);
        }
        self.unsaved = page.get_unsaved();
        if let Some(screen) = self.screens.iter_mut().find(|s| s.id() == self.active) {
            screen.sync(page);
        }
    }

    // ── Keys ──────────────────────────────────────────────────────────

    /// Overlays first, then global keys, then the active screen. A screen
    /// with an open form gets every key.
    fn handle_key_event(&mut self, key: KeyEvent) -> Result<Option<Action>> {
        if self.pending_leave.is_some() {
            return Ok(match key.code {
                KeyCode::Char('s') | KeyCode::Enter => Some(Action::Unsaved(UnsavedDecision::Save)),
                KeyCode::Char('d') => Some(Action::Unsaved(UnsavedDecision::Discard)),
                KeyCode::Char('c') | KeyCode::Esc => Some(Action::Unsaved(UnsavedDecision::Cancel)),
                _ => None,
            });
        }
        if self.help_visible {
            return Ok(matches!(key.code, KeyCode::Esc | KeyCode::Char('?' | 'q')).then_some(Action::ToggleHelp));
        }
        if key.code == KeyCode::Char('c') && key.modifiers.contains(KeyModifiers::CONTROL) {
            return Ok(Some(Action::Quit));
        }

        let capturing = self.active_screen().is_some_and(|s| s.capturing_input());
        if !capturing {
            let global = match key.code {
                KeyCode::Char('q') => Some(Action::Quit),
                KeyCode::Char('?') => Some(Action::ToggleHelp),
                KeyCode::Char('a') => Some(Action::Apply),
                KeyCode::Char('r') => Some(Action::Reset),
                KeyCode::Tab => Some(Action::NextPage),
                KeyCode::BackTab => Some(Action::PrevPage),
                KeyCode::Char(c @ '1'..='9') => c
                    .to_digit(10)
                    .and_then(|n| usize::try_from(n).ok())
                    .and_then(screen::from_number)
                    .map(Action::SwitchPage),
                _ => None,
            };
            if global.is_some() {
                return Ok(global);
            }
        }

        match self.screen_mut(self.active) {
            Some(screen) => screen.handle_key_event(key),
            None => Ok(None),
        }
    }

    // ── Actions ───────────────────────────────────────────────────────

    fn process_action(&mut self, action: &Action) -> Result<()> {
        match action {
            Action::Quit => self.request_leave(Leave::Quit),
            Action::SwitchPage(page) if *page != self.active => self.request_leave(Leave::Page(*page)),
            Action::NextPage => self.request_leave(Leave::Page(screen::next(self.active))),
            Action::PrevPage => self.request_leave(Leave::Page(screen::prev(self.active))),
            Action::ToggleHelp => self.help_visible = !self.help_visible,
            Action::Tick => {
                if self
                    .notification
                    .as_ref()
                    .is_some_and(|(_, at)| at.elapsed() > NOTIFICATION_TTL)
                {
                    self.notification = None;
                }
            }
            Action::Apply => self.apply(),
            Action::Reset => {
                if let Ok(page) = self.config.page(self.active) {
                    page.reset();
                    self.notify(NotificationLevel::Info, "Changes discarded");
                }
                self.sync_active();
            }
            Action::Edit(edit) => {
                if let Err(e) = self.apply_edit(edit) {
                    debug!(error = %e, ?edit, "edit rejected");
                    self.notify(NotificationLevel::Error, markup::plain(&e.to_string()));
                }
                self.sync_active();
            }
            Action::Unsaved(decision) => self.resolve_leave(*decision),
            Action::RowChanged(event) => {
                debug!(list = %event.list, kind = %event.kind, "row changed");
                let message = format!("{}: {}", event.kind, markup::plain(&event.row));
                self.notify(NotificationLevel::Info, message);
            }
            Action::DevicesRefreshed(_) => {
                let follow_up = match self.screen_mut(PageId::Devices) {
                    Some(screen) => screen.update(action)?,
                    None => None,
                };
                if let Some(follow_up) = follow_up {
                    self.action_tx.send(follow_up)?;
                }
            }
            Action::Notify(notification) => {
                self.notification = Some((notification.clone(), Instant::now()));
            }
            Action::SwitchPage(_) | Action::Render | Action::Resize(..) => {}
        }
        Ok(())
    }

    fn apply(&mut self) {
        match self.config.save_page(self.active) {
            Ok(()) => {
                info!(page = %self.active, "page saved");
                self.notify(NotificationLevel::Success, "Changes saved");
            }
            Err(e) => self.notify(NotificationLevel::Error, markup::plain(&e.to_string())),
        }
        self.sync_active();
    }

    /// Leaving a dirty page asks first; a clean one is left at once.
    fn request_leave(&mut self, target: Leave) {
        if self.unsaved.is_empty() {
            self.leave(target);
        } else {
            debug!(page = %self.active, %target, "unsaved changes, asking");
            self.pending_leave = Some((target, self.unsaved.clone()));
        }
    }

    fn resolve_leave(&mut self, decision: UnsavedDecision) {
        let Some((target, _)) = self.pending_leave.take() else {
            return;
        };
        match self.config.verify_changes(self.active, |_| decision) {
            Ok(true) => {
                if decision == UnsavedDecision::Save {
                    self.notify(NotificationLevel::Success, "Changes saved");
                }
                self.sync_active();
                self.leave(target);
            }
            Ok(false) => {}
            Err(e) => {
                self.notify(NotificationLevel::Error, markup::plain(&e.to_string()));
                self.sync_active();
            }
        }
    }

    fn leave(&mut self, target: Leave) {
        match target {
            Leave::Quit => self.running = false,
            Leave::Page(page) => {
                self.active = page;
                self.sync_active();
            }
        }
    }

    // ── Page edits ────────────────────────────────────────────────────

    fn apply_edit(&mut self, edit: &PageEdit) -> Result<(), CoreError> {
        let page = self.config.page(self.active)?;
        match edit {
            PageEdit::NewAttachment {
                kind,
                device,
                frontends,
            } => {
                let handler = devices(page)?;
                let (backend, port) = device.split_once(':').ok_or_else(|| CoreError::Validation {
                    message: format!("'{device}' is not BACKEND:PORT"),
                })?;
                let found = handler
                    .manager()
                    .available_devices(kind.classes())
                    .find(|d| d.port.backend_domain == backend && d.port.port_id == port)
                    .cloned()
                    .ok_or(CoreError::DeviceNotFound)?;
                let mut draft = handler.new_attachment(*kind);
                draft.select_device(found);
                draft.frontends.clone_from(frontends);
                handler.add_attachment(&draft)?;
            }
            PageEdit::SetFrontends {
                kind,
                index,
                frontends,
            } => {
                let handler = devices(page)?;
                let mut draft = handler.edit_attachment(*kind, *index)?;
                draft.frontends.clone_from(frontends);
                handler.update_attachment(*index, &draft)?;
            }
            PageEdit::ToggleAsk { index } => {
                let handler = devices(page)?;
                let mut draft = handler.edit_attachment(AttachmentKind::Auto, *index)?;
                draft.mode = if draft.mode == AssignmentMode::AskToAttach {
                    AssignmentMode::AutoAttach
                } else {
                    AssignmentMode::AskToAttach
                };
                handler.update_attachment(*index, &draft)?;
            }
            PageEdit::RemoveAttachment { kind, index } => {
                devices(page)?.remove_attachment(*kind, *index)?;
            }
            PageEdit::SaveBlock {
                index,
                vm,
                categories,
            } => {
                let handler = devices(page)?;
                let mut draft = match index {
                    Some(i) => handler.edit_block(*i)?,
                    None => handler.new_block(),
                };
                draft.vm = Some(vm.clone());
                draft.selection = CategorySelection::from_categories(categories);
                match index {
                    Some(i) => handler.update_block(*i, &draft)?,
                    None => handler.add_block(&draft)?,
                };
            }
            PageEdit::RemoveBlock { index } => {
                devices(page)?.remove_block(*index)?;
            }
            PageEdit::SetUseDefault { policy, value } => {
                policy_handler(page, policy)?.set_use_default(*value);
            }
            PageEdit::SaveRule {
                policy,
                list,
                index,
                edit,
            } => {
                let handler = policy_handler(page, policy)?;
                let (list, index) = match index {
                    Some(i) => {
                        handler.start_edit(*list, *i)?;
                        (*list, *i)
                    }
                    None => (RowList::PolicyExceptions, handler.add_rule()?),
                };
                let accepted = handler
                    .set_edit(list, index, edit.clone())
                    .and_then(|()| handler.accept_edit(list, index));
                if let Err(e) = accepted {
                    handler.cancel_edit(list, index)?;
                    return Err(e);
                }
            }
            PageEdit::RemoveRule {
                policy,
                list,
                index,
            } => {
                policy_handler(page, policy)?.remove_rule(*list, *index)?;
            }
            PageEdit::AddKeyQube { policy, qube } => {
                policy_handler(page, policy)?.add_key_qube(qube)?;
            }
            PageEdit::SelectFeature { feature, value } => {
                feature_handler(page, feature)?.select(value.as_deref())?;
            }
            PageEdit::SetDom0Check(value) => update_check(page)?.set_dom0(*value),
            PageEdit::SetDefaultCheck(value) => update_check(page)?.set_default(*value),
            PageEdit::ToggleException(vm) => {
                let handler = update_check(page)?;
                let listed = handler.state().exceptions_enabled && handler.remove_exception(vm);
                if !listed {
                    handler.add_exception(vm)?;
                }
            }
        }
        Ok(())
    }

    // ── Rendering ─────────────────────────────────────────────────────

    fn render(&self, frame: &mut Frame) {
        let area = frame.area();
        let [content_area, tab_area, status_area] = Layout::vertical([
            Constraint::Min(1),
            Constraint::Length(1),
            Constraint::Length(1),
        ])
        .areas(area);

        if let Some(screen) = self.active_screen() {
            screen.render(frame, content_area);
        }
        self.render_tab_bar(frame, tab_area);
        self.render_status_bar(frame, status_area);

        if let Some((notification, _)) = &self.notification {
            self.render_notification(frame, area, notification);
        }
        if let Some((target, unsaved)) = &self.pending_leave {
            self.render_unsaved_dialog(frame, area, *target, unsaved);
        }
        if self.help_visible {
            self.render_help_overlay(frame, area);
        }
    }

    fn render_tab_bar(&self, frame: &mut Frame, area: Rect) {
        let p = &self.palette;
        let titles: Vec<Line> = PAGES
            .iter()
            .map(|&page| {
                let style = if page == self.active { p.tab_active() } else { p.tab_inactive() };
                Line::from(Span::styled(
                    format!(" {} {} ", screen::number(page), screen::label(page)),
                    style,
                ))
            })
            .collect();
        let tabs = Tabs::new(titles)
            .divider(Span::styled(" ", p.key_hint()))
            .padding("", "")
            .select(screen::number(self.active) - 1);
        frame.render_widget(tabs, area);
    }

    fn render_status_bar(&self, frame: &mut Frame, area: Rect) {
        let p = &self.palette;
        let state = if self.unsaved.is_empty() {
            Span::styled("○ saved", Style::default().fg(p.success))
        } else {
            Span::styled("● unsaved changes", Style::default().fg(p.warning))
        };
        let line = Line::from(vec![
            Span::raw(" "),
            state,
            Span::styled(" │ ? help  a apply  r reset  q quit", p.key_hint()),
        ]);
        frame.render_widget(Paragraph::new(line), area);
    }

    fn render_unsaved_dialog(&self, frame: &mut Frame, area: Rect, target: Leave, unsaved: &str) {
        let p = &self.palette;
        let lines: Vec<&str> = unsaved.lines().collect();
        let width = 60u16.min(area.width.saturating_sub(4));
        let height = u16::try_from(lines.len() + 6).unwrap_or(u16::MAX).min(area.height);
        let dialog_area = centered(area, width, height);

        frame.render_widget(Clear, dialog_area);
        let block = Block::default()
            .title(" Unsaved changes ")
            .title_style(p.title_style())
            .borders(Borders::ALL)
            .border_type(BorderType::Rounded)
            .border_style(Style::default().fg(p.warning))
            .style(p.overlay());
        let inner = block.inner(dialog_area);
        frame.render_widget(block, dialog_area);

        let mut text = vec![Line::from(Span::styled(
            format!("  Before {target}, save these changes?"),
            p.table_row(),
        ))];
        text.push(Line::from(""));
        text.extend(
            lines
                .iter()
                .map(|l| Line::from(Span::styled(format!("  {}", markup::plain(l)), p.key_hint()))),
        );
        text.push(Line::from(""));
        text.push(Line::from(vec![
            Span::styled("  s ", p.key_hint_key()),
            Span::styled("save    ", p.key_hint()),
            Span::styled("d ", p.key_hint_key()),
            Span::styled("discard    ", p.key_hint()),
            Span::styled("c ", p.key_hint_key()),
            Span::styled("cancel", p.key_hint()),
        ]));
        frame.render_widget(Paragraph::new(text).wrap(Wrap { trim: false }), inner);
    }

    fn render_notification(&self, frame: &mut Frame, area: Rect, notification: &Notification) {
        let p = &self.palette;
        let len = u16::try_from(notification.message.chars().count()).unwrap_or(u16::MAX);
        let width = len.saturating_add(6).clamp(20, 70).min(area.width);
        let height = 3u16;
        let x = area.width.saturating_sub(width + 1);
        let y = area.height.saturating_sub(height + 2);
        let toast_area = Rect::new(area.x + x, area.y + y, width, height.min(area.height));

        let (color, icon) = match notification.level {
            NotificationLevel::Success => (p.success, "✓"),
            NotificationLevel::Error => (p.error, "✗"),
            NotificationLevel::Warning => (p.warning, "!"),
            NotificationLevel::Info => (p.title, "·"),
        };
        frame.render_widget(Clear, toast_area);
        let block = Block::default()
            .borders(Borders::ALL)
            .border_type(BorderType::Rounded)
            .border_style(Style::default().fg(color))
            .style(p.overlay());
        let inner = block.inner(toast_area);
        frame.render_widget(block, toast_area);
        let line = Line::from(vec![
            Span::styled(format!(" {icon} "), Style::default().fg(color)),
            Span::styled(notification.message.clone(), p.table_row()),
        ]);
        frame.render_widget(Paragraph::new(line), inner);
    }

    fn render_help_overlay(&self, frame: &mut Frame, area: Rect) {
        let p = &self.palette;
        let help_area = centered(area, 56u16.min(area.width.saturating_sub(4)), 18u16.min(area.height));
        frame.render_widget(Clear, help_area);
        let block = Block::default()
            .title(" Keyboard Shortcuts ")
            .title_style(p.title_style())
            .borders(Borders::ALL)
            .border_type(BorderType::Rounded)
            .border_style(p.border_focused())
            .style(p.overlay());
        let inner = block.inner(help_area);
        frame.render_widget(block, help_area);

        let entry = |key: &'static str, label: &'static str| {
            Line::from(vec![
                Span::styled(format!("  {key:<10}"), p.key_hint_key()),
                Span::styled(label, p.key_hint()),
            ])
        };
        let heading = |text: &'static str| Line::from(Span::styled(format!("  {text}"), p.title_style()));
        let lines = vec![
            heading("Pages"),
            entry("1-9", "Jump to page"),
            entry("Tab", "Next / previous page"),
            Line::from(""),
            heading("Rows"),
            entry("j/k", "Move down / up"),
            entry("h/l", "Switch section"),
            entry("n", "New row"),
            entry("e Enter", "Edit row"),
            entry("d", "Remove row"),
            Line::from(""),
            heading("Page"),
            entry("a", "Apply changes"),
            entry("r", "Reset changes"),
            entry("q", "Quit"),
        ];
        frame.render_widget(Paragraph::new(lines), inner);
    }
}

fn centered(area: Rect, width: u16, height: u16) -> Rect {
    let x = area.x + area.width.saturating_sub(width) / 2;
    let y = area.y + area.height.saturating_sub(height) / 2;
    Rect::new(x, y, width, height)
}

// ── Handler lookup ────────────────────────────────────────────────────

fn missing(what: &str) -> CoreError {
    CoreError::Internal(format!("this page has no {what}"))
}

fn devices(page: &mut Page) -> Result<&mut DevicesHandler, CoreError> {
    page.devices_mut().ok_or_else(|| missing("device lists"))
}

fn policy_handler<'a>(page: &'a mut Page, file_name: &str) -> Result<&'a mut PolicyHandler, CoreError> {
    page.policy_mut(file_name).ok_or_else(|| missing("such policy"))
}

fn update_check(page: &mut Page) -> Result<&mut UpdateCheckHandler, CoreError> {
    page.update_check_mut().ok_or_else(|| missing("update check"))
}

fn feature_handler<'a>(page: &'a mut Page, feature: &str) -> Result<&'a mut FeatureChoiceHandler, CoreError> {
    page.parts_mut()
        .iter_mut()
        .find_map(|part| match part {
            PagePart::Feature(handler) if handler.def().feature == feature => Some(handler),
            _ => None,
        })
        .ok_or_else(|| missing("such feature"))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use pretty_assertions::assert_eq;
    use qubes_admin::{AdminClient, DevClass};
    use qubes_config_core::Theme;
    use ratatui::Terminal;
    use ratatui::backend::TestBackend;

    use super::*;
    use crate::screens::test_support::{key, test_context, test_qubes};

    fn app(open_at: &str) -> (Arc<qubes_admin::MemoryQubes>, App) {
        let qubes = test_qubes();
        let config = GlobalConfig::new(test_context(&qubes));
        let options = AppOptions {
            open_at: OpenAt::parse(open_at),
            palette: Palette::for_theme(Theme::Dark),
            debounce: Duration::from_millis(10),
        };
        (qubes, App::new(config, options))
    }

    /// Feed one key through the app, then drain the channel.
    fn press(app: &mut App, code: KeyCode) {
        if let Some(action) = app.handle_key_event(key(code)).unwrap() {
            app.action_tx.send(action).unwrap();
        }
        while let Ok(action) = app.action_rx.try_recv() {
            app.process_action(&action).unwrap();
        }
    }

    fn screen_text(app: &App) -> String {
        let mut terminal = Terminal::new(TestBackend::new(120, 30)).unwrap();
        terminal.draw(|frame| app.render(frame)).unwrap();
        let buffer = terminal.backend().buffer();
        buffer
            .content()
            .chunks(usize::from(buffer.area.width))
            .map(|row| row.iter().map(|cell| cell.symbol()).collect::<String>())
            .collect::<Vec<_>>()
            .join("\n")
    }

    fn work_assignments(qubes: &qubes_admin::MemoryQubes) -> usize {
        let client: &dyn AdminClient = qubes;
        client.assigned_devices("work", DevClass::Usb).unwrap().len()
    }

    #[test]
    fn opens_at_requested_page() {
        let (_qubes, app) = app("devices#blocks");
        assert_eq!(app.active, PageId::Devices);
        assert!(app.unsaved.is_empty());
        assert!(app.notification.is_none());
    }

    #[test]
    fn unknown_page_falls_back_with_warning() {
        let (_qubes, app) = app("nosuchpage");
        assert_eq!(app.active, PageId::Basics);
        let (notification, _) = app.notification.as_ref().unwrap();
        assert_eq!(notification.level, NotificationLevel::Warning);
    }

    #[test]
    fn number_keys_switch_clean_pages() {
        let (_qubes, mut app) = app("devices");
        press(&mut app, KeyCode::Char('3'));
        assert_eq!(app.active, PageId::Updates);
        press(&mut app, KeyCode::Tab);
        assert_eq!(app.active, PageId::Splitgpg);
    }

    #[test]
    fn removing_a_row_marks_the_page_dirty_and_notifies() {
        let (_qubes, mut app) = app("devices");
        press(&mut app, KeyCode::Char('d'));
        assert!(!app.unsaved.is_empty());
        let (notification, _) = app.notification.as_ref().unwrap();
        assert!(notification.message.starts_with("removed"));
    }

    #[test]
    fn leaving_dirty_page_asks_and_cancel_stays() {
        let (_qubes, mut app) = app("devices");
        press(&mut app, KeyCode::Char('d'));
        press(&mut app, KeyCode::Char('1'));
        assert_eq!(app.active, PageId::Devices);
        assert!(screen_text(&app).contains("Unsaved changes"));

        press(&mut app, KeyCode::Esc);
        assert!(app.pending_leave.is_none());
        assert_eq!(app.active, PageId::Devices);
        assert!(!app.unsaved.is_empty());
    }

    #[test]
    fn discard_resets_and_leaves() {
        let (qubes, mut app) = app("devices");
        press(&mut app, KeyCode::Char('d'));
        press(&mut app, KeyCode::Char('1'));
        press(&mut app, KeyCode::Char('d'));
        assert_eq!(app.active, PageId::Basics);
        assert_eq!(work_assignments(&qubes), 1);
        assert!(app.config.page(PageId::Devices).unwrap().get_unsaved().is_empty());
    }

    #[test]
    fn save_pushes_changes_then_leaves() {
        let (qubes, mut app) = app("devices");
        press(&mut app, KeyCode::Char('d'));
        press(&mut app, KeyCode::Char('q'));
        assert!(app.running);
        press(&mut app, KeyCode::Char('s'));
        assert!(!app.running);
        assert_eq!(work_assignments(&qubes), 0);
    }

    #[test]
    fn apply_and_reset_keys() {
        let (qubes, mut app) = app("devices");
        press(&mut app, KeyCode::Char('d'));
        press(&mut app, KeyCode::Char('r'));
        assert!(app.unsaved.is_empty());
        assert_eq!(work_assignments(&qubes), 1);

        press(&mut app, KeyCode::Char('d'));
        press(&mut app, KeyCode::Char('a'));
        assert!(app.unsaved.is_empty());
        assert_eq!(work_assignments(&qubes), 0);
    }

    #[test]
    fn rejected_edit_becomes_error_notification() {
        let (_qubes, mut app) = app("devices");
        app.action_tx
            .send(Action::Edit(PageEdit::NewAttachment {
                kind: AttachmentKind::Auto,
                device: "sys-usb:9-9".into(),
                frontends: vec!["work".into()],
            }))
            .unwrap();
        press(&mut app, KeyCode::Null);
        let (notification, _) = app.notification.as_ref().unwrap();
        assert_eq!(notification.level, NotificationLevel::Error);
        assert_eq!(notification.message, "Device not found");
    }

    #[test]
    fn updates_toggle_round_trip() {
        let (qubes, mut app) = app("updates");
        press(&mut app, KeyCode::Char(' '));
        assert!(!app.unsaved.is_empty());
        press(&mut app, KeyCode::Char('a'));
        let client: &dyn AdminClient = qubes.as_ref();
        let dom0 = client.domain("dom0").unwrap();
        assert!(!dom0.feature_bool("service.qubes-update-check", true));
    }

    #[test]
    fn render_shows_tabs_rows_and_devices() {
        let (_qubes, app) = app("devices");
        let text = screen_text(&app);
        assert!(text.contains("9 Devices"));
        assert!(text.contains("Kingston DataTraveler"));
        assert!(text.contains("○ saved"));
    }

    #[test]
    fn help_overlay_swallows_keys() {
        let (_qubes, mut app) = app("devices");
        press(&mut app, KeyCode::Char('?'));
        assert!(app.help_visible);
        press(&mut app, KeyCode::Char('3'));
        assert_eq!(app.active, PageId::Devices);
        press(&mut app, KeyCode::Esc);
        assert!(!app.help_visible);
    }
}
