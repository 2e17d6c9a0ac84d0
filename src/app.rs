use crate::api::ApiError;
use crate::chat::ChatSession;
use crate::dashboard::Dashboard;
use crate::market::RefreshOutcome;
use crate::models::{BackendHealth, ChatReply, SimulationSnapshot};
use crossterm::event::{self, Event, KeyCode, KeyEventKind};
use std::time::Duration;
use tokio::sync::mpsc;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Focus {
    Dashboard,
    Chat,
}

/// Results of work spawned off the render loop.
#[derive(Debug)]
pub enum AppEvent {
    Started(Result<SimulationSnapshot, ApiError>),
    Refreshed(RefreshOutcome),
    Health(Result<BackendHealth, ApiError>),
    Chat(Result<ChatReply, ApiError>),
}

pub struct App {
    pub should_quit: bool,
    pub focus: Focus,
    pub input: String,
    pub chat: ChatSession,
    pub status_msg: Option<String>,
    pub starting: bool,
    dashboard: Dashboard,
    events_tx: mpsc::UnboundedSender<AppEvent>,
    events_rx: mpsc::UnboundedReceiver<AppEvent>,
}

impl App {
    pub fn new(dashboard: Dashboard) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            should_quit: false,
            focus: Focus::Dashboard,
            input: String::new(),
            chat: ChatSession::new(),
            status_msg: None,
            starting: false,
            dashboard,
            events_tx,
            events_rx,
        }
    }

    pub fn market_refreshing(&self) -> bool {
        self.dashboard.market().is_refreshing()
    }

    pub async fn run(&mut self, terminal: &mut crate::tui::Tui) -> anyhow::Result<()> {
        let reader = self.dashboard.reader();
        while !self.should_quit {
            self.drain_events();
            let state = reader.current()?;
            terminal.draw(|f| crate::ui::render(f, self, &state))?;

            if event::poll(Duration::from_millis(16))? {
                if let Event::Key(key) = event::read()? {
                    if key.kind == KeyEventKind::Press {
                        self.handle_key(key.code);
                    }
                }
            }
        }
        self.dashboard.simulation().stop();
        Ok(())
    }

    pub fn handle_key(&mut self, code: KeyCode) {
        match self.focus {
            Focus::Dashboard => match code {
                KeyCode::Char('q') | KeyCode::Esc => self.should_quit = true,
                KeyCode::Char('s') => self.start_simulation(),
                KeyCode::Char('x') => {
                    self.dashboard.simulation().stop();
                    self.status_msg = None;
                }
                KeyCode::Char('r') => self.refresh_market(),
                KeyCode::Char('h') => self.check_health(),
                KeyCode::Char('c') | KeyCode::Tab => self.focus = Focus::Chat,
                _ => {}
            },
            Focus::Chat => match code {
                KeyCode::Char(c) => self.input.push(c),
                KeyCode::Backspace => {
                    self.input.pop();
                }
                KeyCode::Enter => self.send_chat(),
                KeyCode::Esc | KeyCode::Tab => self.focus = Focus::Dashboard,
                _ => {}
            },
        }
    }

    fn start_simulation(&mut self) {
        if self.starting {
            return;
        }
        self.starting = true;
        self.status_msg = Some("Starting simulation...".to_string());
        let simulation = self.dashboard.simulation().clone();
        let tx = self.events_tx.clone();
        tokio::spawn(async move {
            let _ = tx.send(AppEvent::Started(simulation.start().await));
        });
    }

    fn refresh_market(&mut self) {
        // Disabled while a refresh (timer or manual) is in flight.
        if self.market_refreshing() {
            return;
        }
        let market = self.dashboard.market().clone();
        let tx = self.events_tx.clone();
        tokio::spawn(async move {
            let _ = tx.send(AppEvent::Refreshed(market.refresh().await));
        });
    }

    fn check_health(&mut self) {
        let market = self.dashboard.market().clone();
        let tx = self.events_tx.clone();
        tokio::spawn(async move {
            let _ = tx.send(AppEvent::Health(market.check_health().await));
        });
    }

    fn send_chat(&mut self) {
        let Some(text) = self.chat.begin(&self.input) else {
            return;
        };
        self.input.clear();
        let client = self.dashboard.client().clone();
        let tx = self.events_tx.clone();
        tokio::spawn(async move {
            let _ = tx.send(AppEvent::Chat(client.send_chat_message(&text).await));
        });
    }

    fn drain_events(&mut self) {
        while let Ok(event) = self.events_rx.try_recv() {
            self.apply_event(event);
        }
    }

    pub fn apply_event(&mut self, event: AppEvent) {
        match event {
            AppEvent::Started(Ok(_)) => {
                self.starting = false;
                self.status_msg = None;
            }
            AppEvent::Started(Err(e)) => {
                self.starting = false;
                self.status_msg = Some(e.to_string());
            }
            AppEvent::Refreshed(RefreshOutcome::KeptPrevious(message)) => {
                self.status_msg = Some(format!("Market refresh failed: {}", message));
            }
            AppEvent::Refreshed(_) => {}
            AppEvent::Health(Ok(_)) => {}
            AppEvent::Health(Err(e)) => self.status_msg = Some(e.to_string()),
            AppEvent::Chat(result) => {
                self.chat.finish(result);
            }
        }
    }
}
