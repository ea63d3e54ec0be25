use ratatui::crossterm::event::{KeyCode, KeyEvent};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MenuItem {
    Edit,
    Delete,
}

impl MenuItem {
    pub const ALL: [MenuItem; 2] = [MenuItem::Edit, MenuItem::Delete];

    pub fn label(&self) -> &'static str {
        match self {
            MenuItem::Edit => "Edit",
            MenuItem::Delete => "Delete",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MenuOutcome {
    Open,
    Closed,
    Chosen(MenuItem),
}

/// Row action menu for the record at `record_index`.
#[derive(Debug, Clone)]
pub struct RecordMore {
    record_index: usize,
    cursor: usize,
}

impl RecordMore {
    pub fn new(record_index: usize) -> Self {
        Self {
            record_index,
            cursor: 0,
        }
    }

    pub fn record_index(&self) -> usize {
        self.record_index
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn read(&mut self, key: KeyEvent) -> MenuOutcome {
        match key.code {
            KeyCode::Esc | KeyCode::Char('q') | KeyCode::Char('m') => MenuOutcome::Closed,
            KeyCode::Up | KeyCode::Char('k') => {
                self.cursor = self.cursor.saturating_sub(1);
                MenuOutcome::Open
            }
            KeyCode::Down | KeyCode::Char('j') => {
                self.cursor = (self.cursor + 1).min(MenuItem::ALL.len() - 1);
                MenuOutcome::Open
            }
            KeyCode::Enter | KeyCode::Char(' ') => MenuOutcome::Chosen(MenuItem::ALL[self.cursor]),
            KeyCode::Char('e') => MenuOutcome::Chosen(MenuItem::Edit),
            KeyCode::Char('d') => MenuOutcome::Chosen(MenuItem::Delete),
            _ => MenuOutcome::Open,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ratatui::crossterm::event::KeyModifiers;

    fn press(menu: &mut RecordMore, code: KeyCode) -> MenuOutcome {
        menu.read(KeyEvent::new(code, KeyModifiers::NONE))
    }

    #[test]
    fn navigate_and_choose() {
        let mut menu = RecordMore::new(4);
        assert_eq!(press(&mut menu, KeyCode::Enter), MenuOutcome::Chosen(MenuItem::Edit));
        press(&mut menu, KeyCode::Down);
        press(&mut menu, KeyCode::Down);
        assert_eq!(menu.cursor(), 1);
        assert_eq!(press(&mut menu, KeyCode::Enter), MenuOutcome::Chosen(MenuItem::Delete));
        assert_eq!(menu.record_index(), 4);
    }

    #[test]
    fn shortcuts_and_close() {
        let mut menu = RecordMore::new(0);
        assert_eq!(press(&mut menu, KeyCode::Char('d')), MenuOutcome::Chosen(MenuItem::Delete));
        assert_eq!(press(&mut menu, KeyCode::Esc), MenuOutcome::Closed);
        assert_eq!(press(&mut menu, KeyCode::Char('x')), MenuOutcome::Open);
    }
}
