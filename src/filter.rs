use std::collections::{BTreeMap, BTreeSet};

use ratatui::crossterm::event::{KeyCode, KeyEvent};
use tracing::debug;

use crate::context::{Column, Row};
use crate::field::FieldValue;

pub const CHECKED: &str = "Checked";
pub const UNCHECKED: &str = "Unchecked";

/// The value a cell is filtered by.
pub fn filter_value(cell: Option<&FieldValue>) -> String {
    match cell {
        Some(FieldValue::Checkbox(true)) => CHECKED.to_string(),
        Some(FieldValue::Checkbox(false)) => UNCHECKED.to_string(),
        Some(value) => value.display(),
        None => String::new(),
    }
}

/// Active filters keyed by column title. A column without an entry is not
/// filtered; an entry is never empty.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Filters {
    by_column: BTreeMap<String, BTreeSet<String>>,
}

impl Filters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.by_column.is_empty()
    }

    pub fn len(&self) -> usize {
        self.by_column.len()
    }

    pub fn clear(&mut self) {
        self.by_column.clear();
    }

    pub fn get(&self, column: &str) -> Option<&BTreeSet<String>> {
        self.by_column.get(column)
    }

    pub fn is_active(&self, column: &str) -> bool {
        self.by_column.contains_key(column)
    }

    pub fn set(&mut self, column: &str, values: BTreeSet<String>) {
        if values.is_empty() {
            self.by_column.remove(column);
        } else {
            self.by_column.insert(column.to_string(), values);
        }
    }

    pub fn matches(&self, row: &Row, columns: &[Column]) -> bool {
        self.by_column.iter().all(|(title, allowed)| {
            columns
                .iter()
                .position(|c| &c.title == title)
                .map(|idx| allowed.contains(&filter_value(row.cells.get(idx).and_then(|c| c.as_ref()))))
                // filters on columns that vanished from the schema do not apply
                .unwrap_or(true)
        })
    }

    pub fn visible_rows<'a>(&self, rows: &'a [Row], columns: &[Column]) -> Vec<&'a Row> {
        rows.iter().filter(|r| self.matches(r, columns)).collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOutcome {
    Open,
    Changed,
    Closed,
}

/// Value picker for one column.
#[derive(Debug, Clone)]
pub struct FilterDropdown {
    title: String,
    options: Vec<String>,
    selected: BTreeSet<String>,
    cursor: usize,
}

impl FilterDropdown {
    /// Lists the distinct values of `column` over all rows, preselecting the
    /// active filter if there is one.
    pub fn new(column: usize, columns: &[Column], rows: &[Row], filters: &Filters) -> Option<Self> {
        let title = columns.get(column)?.title.clone();
        let options: BTreeSet<String> = rows
            .iter()
            .map(|r| filter_value(r.cells.get(column).and_then(|c| c.as_ref())))
            .collect();
        let selected = filters.get(&title).cloned().unwrap_or_default();
        Some(Self {
            title,
            options: options.into_iter().collect(),
            selected,
            cursor: 0,
        })
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn options(&self) -> &[String] {
        &self.options
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn is_selected(&self, option: &str) -> bool {
        self.selected.contains(option)
    }

    pub fn read(&mut self, key: KeyEvent) -> FilterOutcome {
        match key.code {
            KeyCode::Esc | KeyCode::Char('q') | KeyCode::Char('f') => FilterOutcome::Closed,
            KeyCode::Up | KeyCode::Char('k') => {
                self.cursor = self.cursor.saturating_sub(1);
                FilterOutcome::Open
            }
            KeyCode::Down | KeyCode::Char('j') => {
                if self.cursor + 1 < self.options.len() {
                    self.cursor += 1;
                }
                FilterOutcome::Open
            }
            KeyCode::Char(' ') | KeyCode::Enter => {
                self.toggle();
                FilterOutcome::Changed
            }
            KeyCode::Char('c') => {
                self.selected.clear();
                FilterOutcome::Changed
            }
            _ => FilterOutcome::Open,
        }
    }

    fn toggle(&mut self) {
        let Some(option) = self.options.get(self.cursor) else {
            return;
        };
        if !self.selected.remove(option) {
            self.selected.insert(option.clone());
        }
    }

    pub fn apply(&self, filters: &mut Filters) {
        debug!("Filter on '{}': {:?}", self.title, self.selected);
        filters.set(&self.title, self.selected.clone());
    }
}
