use std::io::Error;
use std::path::PathBuf;
use std::time::Duration;

use derive_setters::Setters;
use ratatui::crossterm::event::KeyEvent;

use crate::storage::{StorageError, StorageKind};
use crate::table::SchemaError;

pub const DEFAULT_STORAGE_KEY: &str = "tableData";
pub const DEFAULT_DEBOUNCE_MS: u64 = 500;

pub const HELP_TEXT: &str = "
Table
  Up/Down, j/k     Move the cursor
  PgUp/PgDn        Move one page
  Home/End         First / last record
  Left/Right, h/l  Select column
  Space            Toggle row selection
  a                Add a record
  e, Enter         Edit the record
  d                Delete the record
  m                Record menu
  f                Filter the selected column
  c                Clear all filters
  ?                Help
  q                Quit

Form
  Tab/Down         Next field
  Shift-Tab/Up     Previous field
  Space            Toggle checkbox
  Left/Right       Choose option / move curser
  Enter            Submit
  Esc              Cancel

Filter / Menu
  Up/Down          Move
  Space, Enter     Toggle / choose
  Esc              Close
";

#[derive(Debug, thiserror::Error)]
pub enum TableError {
    #[error("io error: {0}")]
    IoError(#[from] Error),
    #[error("invalid json: {0}")]
    JsonError(#[from] serde_json::Error),
    #[error(transparent)]
    SchemaError(#[from] SchemaError),
    #[error(transparent)]
    StorageError(#[from] StorageError),
    #[error("record index {index} is out of range, the table has {len} records")]
    IndexOutOfRange { index: usize, len: usize },
    #[error("the table is not ready yet")]
    NotReady,
    #[error("the table has been unmounted")]
    Unmounted,
    #[error("configuration error: {0}")]
    ConfigError(String),
}

#[derive(Debug, Clone, Setters)]
#[setters(into)]
pub struct TableConfig {
    pub event_poll_time: u64,
    pub storage: StorageKind,
    pub storage_dir: PathBuf,
    pub storage_key: String,
    pub debounce: Duration,
    pub select_options: Vec<String>,
    pub max_column_width: usize,
}

impl Default for TableConfig {
    fn default() -> Self {
        Self {
            event_poll_time: 100,
            storage: StorageKind::InMemory,
            storage_dir: PathBuf::from("."),
            storage_key: DEFAULT_STORAGE_KEY.to_string(),
            debounce: Duration::from_millis(DEFAULT_DEBOUNCE_MS),
            select_options: ["Developer", "Designer", "PM", "PO"]
                .into_iter()
                .map(String::from)
                .collect(),
            max_column_width: 24,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Quit,
    MoveUp,
    MoveDown,
    MoveLeft,
    MoveRight,
    MovePageUp,
    MovePageDown,
    MoveBeginning,
    MoveEnd,
    ToggleSelection,
    AddRecord,
    EditRecord,
    DeleteRecord,
    RecordMenu,
    Filter,
    ClearFilters,
    Help,
    Enter,
    Exit,
    Resize(usize, usize),
    RawKey(KeyEvent),
}
