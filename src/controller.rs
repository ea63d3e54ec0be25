use std::time::{Duration, Instant};
use tracing::trace;

use crate::domain::{Message, TableConfig, TableError};
use crate::model::Model;
use ratatui::crossterm::event::{self, Event, KeyCode, KeyModifiers};

pub struct Controller {
    event_poll_time: u64,
}

impl Controller {
    pub fn new(cfg: &TableConfig) -> Self {
        Self {
            event_poll_time: cfg.event_poll_time,
        }
    }

    /// Waits for the next terminal event, but never past a pending write.
    pub fn handle_event(&self, model: &Model) -> Result<Option<Message>, TableError> {
        if event::poll(self.poll_timeout(model.next_deadline(), Instant::now()))? {
            return Ok(match event::read()? {
                Event::Key(key) if key.kind == event::KeyEventKind::Press => {
                    if model.raw_keyevents() {
                        Some(Message::RawKey(key))
                    } else {
                        self.handle_key(key)
                    }
                }
                Event::Resize(width, height) => Some(Message::Resize(width as usize, height as usize)),
                _ => None,
            });
        }
        Ok(None)
    }

    fn poll_timeout(&self, deadline: Option<Instant>, now: Instant) -> Duration {
        let poll = Duration::from_millis(self.event_poll_time);
        match deadline {
            Some(deadline) => poll.min(deadline.saturating_duration_since(now)),
            None => poll,
        }
    }

    fn handle_key(&self, key: event::KeyEvent) -> Option<Message> {
        if key.modifiers.contains(KeyModifiers::CONTROL) {
            return match key.code {
                KeyCode::Char('c') => Some(Message::Quit),
                _ => None,
            };
        }
        let message = match key.code {
            KeyCode::Char('q') => Some(Message::Quit),
            KeyCode::Down | KeyCode::Char('j') => Some(Message::MoveDown),
            KeyCode::Up | KeyCode::Char('k') => Some(Message::MoveUp),
            KeyCode::Left | KeyCode::Char('h') => Some(Message::MoveLeft),
            KeyCode::Right | KeyCode::Char('l') => Some(Message::MoveRight),
            KeyCode::PageDown => Some(Message::MovePageDown),
            KeyCode::PageUp => Some(Message::MovePageUp),
            KeyCode::Home | KeyCode::Char('g') => Some(Message::MoveBeginning),
            KeyCode::End | KeyCode::Char('G') => Some(Message::MoveEnd),
            KeyCode::Char(' ') => Some(Message::ToggleSelection),
            KeyCode::Char('a') => Some(Message::AddRecord),
            KeyCode::Char('e') => Some(Message::EditRecord),
            KeyCode::Char('d') => Some(Message::DeleteRecord),
            KeyCode::Char('m') => Some(Message::RecordMenu),
            KeyCode::Char('f') => Some(Message::Filter),
            KeyCode::Char('c') => Some(Message::ClearFilters),
            KeyCode::Char('?') => Some(Message::Help),
            KeyCode::Enter => Some(Message::Enter),
            KeyCode::Esc => Some(Message::Exit),
            _ => None,
        };
        trace!("Mapped: {key:?} => {message:?}");
        message
    }
}
