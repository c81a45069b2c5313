use std::io::Stdout;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use crossterm::execute;
use crossterm::terminal::{
    disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen,
};
use ratatui::backend::CrosstermBackend;
use ratatui::widgets::ListState;
use ratatui::Terminal;

use crate::config::AppConfig;
use crate::journaling::{ReconciliationPoller, SubmitError};
use crate::repository::Backend;
use crate::ui;

pub mod router;
pub mod state;

pub use router::{Projection, ProjectionContext, ResultStatus, View, ViewRouter};
pub use state::{AppState, ComposeField, ComposeForm, TextField};

enum Action {
    Quit,
    Show(View),
    Submit,
    Refresh,
    SelectNext,
    SelectPrevious,
    PreviousMonth,
    NextMonth,
    CurrentMonth,
}

pub struct App {
    pub config: Arc<AppConfig>,
    backend: Backend,
    state: AppState,
    router: ViewRouter,
    poller: ReconciliationPoller,
    list_state: ListState,
    should_quit: bool,
    tick_rate: Duration,
}

impl App {
    pub fn new(config: Arc<AppConfig>, backend: Backend) -> Result<Self> {
        let mut state = AppState::new(config.calendar.offset());
        let mut poller = ReconciliationPoller::new(&config.polling, config.entries.list_limit);
        match state.refresh(backend.as_repository(), config.entries.list_limit) {
            Ok(_) => {
                tracing::info!(count = state.entries().len(), "loaded entries");
            }
            Err(err) => {
                tracing::error!(%err, "initial entry load failed");
                state.set_status_message(Some(format!("Could not load entries: {err}")));
            }
        }
        poller.on_snapshot_changed(&state.snapshot, Instant::now());
        Ok(Self {
            config,
            backend,
            state,
            router: ViewRouter::new(),
            poller,
            list_state: ListState::default(),
            should_quit: false,
            tick_rate: Duration::from_millis(250),
        })
    }

    pub fn run(&mut self) -> Result<()> {
        let mut terminal = setup_terminal()?;
        let result = self.event_loop(&mut terminal);
        restore_terminal(&mut terminal)?;
        self.poller.cancel_all();
        result
    }

    fn event_loop(&mut self, terminal: &mut Terminal<CrosstermBackend<Stdout>>) -> Result<()> {
        let mut last_tick = Instant::now();
        loop {
            terminal
                .draw(|frame| {
                    if self.state.entries().is_empty() {
                        self.list_state.select(None);
                    } else {
                        self.list_state.select(Some(self.state.selected));
                    }
                    let projection = self.router.projection(ProjectionContext {
                        controller: &self.state.controller,
                        snapshot: &self.state.snapshot,
                        cursor: self.state.cursor,
                        now: self.state.now(),
                    });
                    ui::draw_app(
                        frame,
                        &self.state,
                        self.router.active(),
                        &projection,
                        &mut self.list_state,
                    );
                })
                .context("rendering frame")?;

            if self.should_quit {
                break;
            }

            let timeout = self
                .tick_rate
                .checked_sub(last_tick.elapsed())
                .unwrap_or_else(|| Duration::from_millis(0));

            if event::poll(timeout).context("polling for terminal events")? {
                if let Event::Key(key) = event::read().context("reading terminal event")? {
                    self.handle_key(key);
                }
            }

            if last_tick.elapsed() >= self.tick_rate {
                self.on_tick();
                last_tick = Instant::now();
            }
        }
        Ok(())
    }

    fn handle_key(&mut self, key: KeyEvent) {
        if key.kind != KeyEventKind::Press {
            return;
        }

        let ctrl = key.modifiers.contains(KeyModifiers::CONTROL);
        let global = match key.code {
            KeyCode::Char('c') | KeyCode::Char('q') if ctrl => Some(Action::Quit),
            KeyCode::Char('s') if ctrl => Some(Action::Submit),
            KeyCode::Char('r') if ctrl => Some(Action::Refresh),
            KeyCode::F(1) => Some(Action::Show(View::Compose)),
            KeyCode::F(2) => Some(Action::Show(View::List)),
            KeyCode::F(3) => Some(Action::Show(View::Calendar)),
            _ => None,
        };
        if let Some(action) = global {
            self.handle_action(action);
            return;
        }

        match self.router.active() {
            View::Compose | View::ComposeWithResult => self.handle_compose_key(key),
            View::List | View::Calendar => {
                if let Some(action) = self.browse_action(key) {
                    self.handle_action(action);
                }
            }
        }
    }

    fn browse_action(&self, key: KeyEvent) -> Option<Action> {
        let on_calendar = self.router.active() == View::Calendar;
        match key.code {
            KeyCode::Char('q') => Some(Action::Quit),
            KeyCode::Char('1') | KeyCode::Char('n') => Some(Action::Show(View::Compose)),
            KeyCode::Char('2') => Some(Action::Show(View::List)),
            KeyCode::Char('3') | KeyCode::Char('c') => Some(Action::Show(View::Calendar)),
            KeyCode::Char('r') => Some(Action::Refresh),
            KeyCode::Char('j') | KeyCode::Down if !on_calendar => Some(Action::SelectNext),
            KeyCode::Char('k') | KeyCode::Up if !on_calendar => Some(Action::SelectPrevious),
            KeyCode::Char('h') | KeyCode::Left if on_calendar => Some(Action::PreviousMonth),
            KeyCode::Char('l') | KeyCode::Right if on_calendar => Some(Action::NextMonth),
            KeyCode::Char('t') if on_calendar => Some(Action::CurrentMonth),
            _ => None,
        }
    }

    fn handle_compose_key(&mut self, key: KeyEvent) {
        if key.code == KeyCode::Esc {
            if self.router.active() == View::ComposeWithResult {
                self.handle_action(Action::Show(View::Compose));
            }
            return;
        }
        let form = &mut self.state.form;
        match key.code {
            KeyCode::Tab | KeyCode::BackTab => form.toggle_focus(),
            KeyCode::Enter => form.insert_newline(),
            KeyCode::Backspace => {
                form.active_mut().backspace();
            }
            KeyCode::Delete => {
                form.active_mut().delete();
            }
            KeyCode::Left => {
                form.active_mut().move_left();
            }
            KeyCode::Right => {
                form.active_mut().move_right();
            }
            KeyCode::Home => form.active_mut().move_home(),
            KeyCode::End => form.active_mut().move_end(),
            KeyCode::Char(ch)
                if !key
                    .modifiers
                    .intersects(KeyModifiers::CONTROL | KeyModifiers::ALT | KeyModifiers::SUPER) =>
            {
                form.active_mut().insert_char(ch);
            }
            _ => {}
        }
    }

    fn handle_action(&mut self, action: Action) {
        match action {
            Action::Quit => self.should_quit = true,
            Action::Show(view) => {
                self.router
                    .select(view, &mut self.state.controller, &mut self.poller);
            }
            Action::Submit => self.submit_entry(),
            Action::Refresh => self.refresh_entries(),
            Action::SelectNext => self.state.move_selection(1),
            Action::SelectPrevious => self.state.move_selection(-1),
            Action::PreviousMonth => self.state.show_previous_month(),
            Action::NextMonth => self.state.show_next_month(),
            Action::CurrentMonth => self.state.show_current_month(),
        }
    }

    fn submit_entry(&mut self) {
        if !matches!(
            self.router.active(),
            View::Compose | View::ComposeWithResult
        ) {
            return;
        }
        let mood = self.state.form.mood.buffer().to_string();
        let body = self.state.form.body.buffer().to_string();
        let result = self
            .state
            .controller
            .submit(self.backend.as_repository(), &mood, &body);
        match result {
            Ok(entry) => {
                let now = Instant::now();
                self.state.form.clear();
                self.state.snapshot.upsert(entry.clone());
                self.poller.track(&entry, now);
                self.poller.on_snapshot_changed(&self.state.snapshot, now);
                self.router.show_result();
                let message = if entry.is_pending() {
                    "Saved. Analysis will appear here when it is ready."
                } else {
                    "Saved."
                };
                self.state.set_status_message(Some(message));
            }
            Err(SubmitError::Validation(err)) => {
                self.state.set_status_message(Some(err.to_string()));
            }
            Err(SubmitError::Request(err)) => {
                self.state
                    .set_status_message(Some(format!("Save failed: {err}. Your text is kept.")));
            }
            Err(err) => {
                tracing::warn!(%err, "submit rejected");
                self.state.set_status_message(Some(err.to_string()));
            }
        }
    }

    fn refresh_entries(&mut self) {
        match self
            .state
            .refresh(self.backend.as_repository(), self.config.entries.list_limit)
        {
            Ok(_) => {
                self.poller
                    .on_snapshot_changed(&self.state.snapshot, Instant::now());
                self.state.set_status_message(Some(format!(
                    "Loaded {} entries.",
                    self.state.entries().len()
                )));
            }
            Err(err) => {
                tracing::error!(%err, "refreshing entries failed");
                self.state
                    .set_status_message(Some(format!("Refresh failed: {err}")));
            }
        }
    }

    fn on_tick(&mut self) {
        let report = self.poller.poll(
            Instant::now(),
            self.backend.as_repository(),
            &mut self.state.controller,
            &mut self.state.snapshot,
        );
        if report.snapshot_changed {
            self.state.clamp_selection();
        }
        if report.resolved.is_some() {
            self.state.set_status_message(Some("Analysis is ready."));
        }
    }
}

fn setup_terminal() -> Result<Terminal<CrosstermBackend<Stdout>>> {
    enable_raw_mode().context("enabling raw mode")?;
    let mut stdout = std::io::stdout();
    execute!(stdout, EnterAlternateScreen).context("switching to alternate screen")?;
    let backend = CrosstermBackend::new(stdout);
    let terminal = Terminal::new(backend).context("creating terminal backend")?;
    Ok(terminal)
}

fn restore_terminal(terminal: &mut Terminal<CrosstermBackend<Stdout>>) -> Result<()> {
    terminal.show_cursor().ok();
    disable_raw_mode().context("disabling raw mode")?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen).context("restoring screen state")?;
    Ok(())
}
