use std::collections::BTreeSet;
use std::time::Instant;

use ratatui::crossterm::event::KeyEvent;
use tracing::{debug, info, trace, warn};

use crate::context::{Column, Row, TableContext};
use crate::domain::{HELP_TEXT, Message, TableConfig, TableError};
use crate::filter::{FilterDropdown, FilterOutcome, Filters};
use crate::form::{FormOutcome, RecordForm};
use crate::menu::{MenuItem, MenuOutcome, RecordMore};
use crate::table::Record;
use crate::ui::{STATUSLINE_HEIGHT, TABLE_BORDER_HEIGHT, TABLE_HEADER_HEIGHT};

#[derive(Debug, PartialEq)]
pub enum Status {
    LOADING,
    READY,
    QUITTING,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Modus {
    TABLE,
    FORM,
    MENU,
    FILTER,
    POPUP,
}

/// Called with the selected record indices and their rows whenever the row
/// selection changes.
pub type SelectionCallback = Box<dyn FnMut(&[usize], &[Row])>;

#[derive(Default, Clone, Debug)]
pub struct UILayout {
    pub width: usize,
    pub height: usize,
    pub table_height: usize,
}

impl UILayout {
    pub fn from_values(ui_width: usize, ui_height: usize) -> Self {
        let layout = UILayout {
            width: ui_width,
            height: ui_height,
            table_height: ui_height
                .saturating_sub(STATUSLINE_HEIGHT + TABLE_HEADER_HEIGHT + TABLE_BORDER_HEIGHT)
                .max(1),
        };
        trace!("Build UILayout: {:?}", layout);
        layout
    }
}

pub struct Model {
    config: TableConfig,
    pub status: Status,
    modus: Modus,
    context: TableContext,
    filters: Filters,
    visible: Vec<usize>, // Record indices that pass the filters, in table order
    curser_row: usize,   // Position in `visible`
    offset_row: usize,
    curser_column: usize,
    selected: BTreeSet<usize>,
    on_selection_change: Option<SelectionCallback>,
    form: Option<RecordForm>,
    menu: Option<RecordMore>,
    dropdown: Option<FilterDropdown>,
    uilayout: UILayout,
    popup_message: Option<String>,
    status_message: String,
}

impl Model {
    pub fn init(config: &TableConfig, context: TableContext, ui_width: usize, ui_height: usize) -> Self {
        let mut model = Self {
            config: config.clone(),
            status: Status::LOADING,
            modus: Modus::TABLE,
            context,
            filters: Filters::new(),
            visible: Vec::new(),
            curser_row: 0,
            offset_row: 0,
            curser_column: 0,
            selected: BTreeSet::new(),
            on_selection_change: None,
            form: None,
            menu: None,
            dropdown: None,
            uilayout: UILayout::from_values(ui_width, ui_height),
            popup_message: None,
            status_message: String::new(),
        };
        model.set_status_message("Loading ...");
        model
    }

    /// Loads the table from storage. Messages are ignored until this ran.
    pub fn mount(&mut self) {
        self.context.mount();
        self.status = Status::READY;
        self.update_visible_rows();
        let message = format!("Loaded {} records", self.context.len());
        self.set_status_message(message);
    }

    pub fn set_on_selection_change(&mut self, callback: impl FnMut(&[usize], &[Row]) + 'static) {
        self.on_selection_change = Some(Box::new(callback));
    }

    // ------------------------------ Accessors ------------------------------ //

    pub fn context(&self) -> &TableContext {
        &self.context
    }

    pub fn modus(&self) -> Modus {
        self.modus
    }

    pub fn columns(&self) -> &[Column] {
        self.context.columns()
    }

    pub fn visible_rows(&self) -> Vec<&Row> {
        self.visible
            .iter()
            .filter_map(|&idx| self.context.rows().get(idx))
            .collect()
    }

    pub fn filters(&self) -> &Filters {
        &self.filters
    }

    pub fn curser_row(&self) -> usize {
        self.curser_row
    }

    pub fn offset_row(&self) -> usize {
        self.offset_row
    }

    pub fn curser_column(&self) -> usize {
        self.curser_column
    }

    /// Record index under the curser.
    pub fn current_record(&self) -> Option<usize> {
        self.visible.get(self.curser_row).copied()
    }

    pub fn selected_records(&self) -> Vec<usize> {
        self.selected.iter().copied().collect()
    }

    pub fn is_selected(&self, record_idx: usize) -> bool {
        self.selected.contains(&record_idx)
    }

    pub fn form(&self) -> Option<&RecordForm> {
        self.form.as_ref()
    }

    pub fn menu(&self) -> Option<&RecordMore> {
        self.menu.as_ref()
    }

    pub fn dropdown(&self) -> Option<&FilterDropdown> {
        self.dropdown.as_ref()
    }

    pub fn popup_message(&self) -> Option<&str> {
        self.popup_message.as_deref()
    }

    pub fn status_message(&self) -> &str {
        &self.status_message
    }

    pub fn layout(&self) -> &UILayout {
        &self.uilayout
    }

    /// Popups that edit text want every key unmapped.
    pub fn raw_keyevents(&self) -> bool {
        matches!(self.modus, Modus::FORM | Modus::MENU | Modus::FILTER)
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.context.next_deadline()
    }

    pub fn quit(&mut self) {
        self.status = Status::QUITTING;
    }

    /// Writes a pending change through and stops persistence.
    pub fn shutdown(&mut self) {
        if self.context.flush() {
            info!("Flushed pending changes of '{}'", self.context.storage_key());
        }
        self.context.unmount();
    }

    pub fn tick(&mut self) -> bool {
        self.tick_at(Instant::now())
    }

    pub fn tick_at(&mut self, now: Instant) -> bool {
        let written = self.context.tick_at(now);
        if written {
            trace!("Persisted '{}'", self.context.storage_key());
        }
        written
    }

    fn set_status_message(&mut self, message: impl Into<String>) {
        self.status_message = message.into();
    }

    fn ui_resize(&mut self, width: usize, height: usize) {
        trace!(
            "UI was resized! w:{}->{}, h:{}->{}",
            self.uilayout.width, width, self.uilayout.height, height
        );
        self.uilayout = UILayout::from_values(width, height);
        self.scroll_to_curser();
    }

    pub fn update(&mut self, message: Option<Message>) -> Result<(), TableError> {
        let Some(msg) = message else {
            return Ok(());
        };
        if self.status == Status::LOADING {
            match msg {
                Message::Quit => self.quit(),
                Message::Resize(width, height) => self.ui_resize(width, height),
                _ => trace!("Ignoring {msg:?} while loading"),
            }
            return Ok(());
        }

        match self.modus {
            Modus::TABLE => match msg {
                Message::Quit => self.quit(),
                Message::MoveDown => self.move_table_selection_down(1),
                Message::MoveUp => self.move_table_selection_up(1),
                Message::MovePageDown => self.move_table_selection_down(self.uilayout.table_height),
                Message::MovePageUp => self.move_table_selection_up(self.uilayout.table_height),
                Message::MoveBeginning => self.move_table_selection_beginning(),
                Message::MoveEnd => self.move_table_selection_end(),
                Message::MoveLeft => self.move_table_selection_left(),
                Message::MoveRight => self.move_table_selection_right(),
                Message::Resize(width, height) => self.ui_resize(width, height),
                Message::ToggleSelection => self.toggle_selection(),
                Message::AddRecord => self.open_add_form(),
                Message::EditRecord | Message::Enter => self.open_edit_form(),
                Message::DeleteRecord => self.delete_current_record()?,
                Message::RecordMenu => self.open_record_menu(),
                Message::Filter => self.open_filter(),
                Message::ClearFilters => self.clear_filters(),
                Message::Help => self.show_help(),
                Message::Exit | Message::RawKey(_) => (),
            },
            Modus::FORM => match msg {
                Message::RawKey(key) => self.form_input(key)?,
                Message::Resize(width, height) => self.ui_resize(width, height),
                _ => (),
            },
            Modus::MENU => match msg {
                Message::RawKey(key) => self.menu_input(key)?,
                Message::Resize(width, height) => self.ui_resize(width, height),
                _ => (),
            },
            Modus::FILTER => match msg {
                Message::RawKey(key) => self.filter_input(key),
                Message::Resize(width, height) => self.ui_resize(width, height),
                _ => (),
            },
            Modus::POPUP => match msg {
                Message::Quit => self.quit(),
                Message::Resize(width, height) => self.ui_resize(width, height),
                Message::Exit | Message::Help | Message::Enter => self.exit(),
                _ => (),
            },
        }
        Ok(())
    }

    // -------------------- Control handling functions ---------------------- //

    fn enter_modus(&mut self, modus: Modus) {
        trace!("{:?} -> {:?}", self.modus, modus);
        self.modus = modus;
    }

    fn exit(&mut self) {
        match self.modus {
            Modus::TABLE => {}
            Modus::POPUP => {
                trace!("Close popup ...");
                self.popup_message = None;
            }
            Modus::FORM => self.form = None,
            Modus::MENU => self.menu = None,
            Modus::FILTER => self.dropdown = None,
        }
        self.modus = Modus::TABLE;
    }

    fn show_help(&mut self) {
        self.popup_message = Some(HELP_TEXT.to_string());
        self.enter_modus(Modus::POPUP);
    }

    fn open_add_form(&mut self) {
        self.form = Some(RecordForm::new(
            self.context.get_schema(),
            &self.config.select_options,
        ));
        self.enter_modus(Modus::FORM);
    }

    fn open_edit_form(&mut self) {
        let Some(record_idx) = self.current_record() else {
            return;
        };
        let Some(record) = self.context.get_record(record_idx) else {
            return;
        };
        self.form = Some(RecordForm::edit(
            self.context.get_schema(),
            record_idx,
            record,
            &self.config.select_options,
        ));
        self.enter_modus(Modus::FORM);
    }

    fn open_record_menu(&mut self) {
        if let Some(record_idx) = self.current_record() {
            self.menu = Some(RecordMore::new(record_idx));
            self.enter_modus(Modus::MENU);
        }
    }

    fn open_filter(&mut self) {
        self.dropdown = FilterDropdown::new(
            self.curser_column,
            self.context.columns(),
            self.context.rows(),
            &self.filters,
        );
        if self.dropdown.is_some() {
            self.enter_modus(Modus::FILTER);
        }
    }

    fn clear_filters(&mut self) {
        if !self.filters.is_empty() {
            self.filters.clear();
            self.update_visible_rows();
            self.set_status_message("Filters cleared");
        }
    }

    fn form_input(&mut self, key: KeyEvent) -> Result<(), TableError> {
        let Some(form) = self.form.as_mut() else {
            self.exit();
            return Ok(());
        };
        match form.read(key) {
            FormOutcome::Editing => {}
            FormOutcome::Canceled => self.exit(),
            FormOutcome::Rejected(errors) => {
                self.set_status_message(format!("{} fields need attention", errors.len()));
            }
            FormOutcome::Submitted {
                record_index,
                record,
            } => self.submit_record(record_index, record)?,
        }
        Ok(())
    }

    fn submit_record(
        &mut self,
        record_index: Option<usize>,
        record: Record,
    ) -> Result<(), TableError> {
        let result = match record_index {
            Some(idx) => self.context.update_record(idx, record),
            None => self.context.add_record(record),
        };
        if !self.report(result)? {
            return Ok(());
        }
        self.exit();
        self.update_visible_rows();
        match record_index {
            Some(idx) => self.set_status_message(format!("Updated record {}", idx + 1)),
            None => {
                let idx = self.context.len() - 1;
                if let Some(pos) = self.visible.iter().position(|&v| v == idx) {
                    self.curser_row = pos;
                    self.scroll_to_curser();
                }
                self.set_status_message(format!("Added record {}", idx + 1));
            }
        }
        Ok(())
    }

    fn menu_input(&mut self, key: KeyEvent) -> Result<(), TableError> {
        let Some(menu) = self.menu.as_mut() else {
            self.exit();
            return Ok(());
        };
        match menu.read(key) {
            MenuOutcome::Open => {}
            MenuOutcome::Closed => self.exit(),
            MenuOutcome::Chosen(MenuItem::Edit) => {
                self.exit();
                self.open_edit_form();
            }
            MenuOutcome::Chosen(MenuItem::Delete) => {
                let record_idx = menu.record_index();
                self.exit();
                self.delete_record(record_idx)?;
            }
        }
        Ok(())
    }

    fn filter_input(&mut self, key: KeyEvent) {
        let Some(dropdown) = self.dropdown.as_mut() else {
            self.exit();
            return;
        };
        match dropdown.read(key) {
            FilterOutcome::Open => {}
            FilterOutcome::Changed => {
                dropdown.apply(&mut self.filters);
                self.update_visible_rows();
            }
            FilterOutcome::Closed => self.exit(),
        }
    }

    fn delete_current_record(&mut self) -> Result<(), TableError> {
        match self.current_record() {
            Some(record_idx) => self.delete_record(record_idx),
            None => Ok(()),
        }
    }

    fn delete_record(&mut self, record_idx: usize) -> Result<(), TableError> {
        let result = self.context.delete_record(record_idx);
        if !self.report(result)? {
            return Ok(());
        }
        // Later records move up by one.
        let before = self.selected.len();
        let shifted: BTreeSet<usize> = self
            .selected
            .iter()
            .filter(|&&i| i != record_idx)
            .map(|&i| if i > record_idx { i - 1 } else { i })
            .collect();
        let changed = shifted.len() != before || shifted.iter().any(|&i| i >= record_idx);
        self.selected = shifted;
        self.update_visible_rows();
        if changed {
            self.notify_selection();
        }
        self.set_status_message(format!("Deleted record {}", record_idx + 1));
        Ok(())
    }

    /// Shows recoverable failures on the status line. Returns whether the
    /// operation went through.
    fn report(&mut self, result: Result<(), TableError>) -> Result<bool, TableError> {
        match result {
            Ok(()) => Ok(true),
            Err(TableError::NotReady) => Err(TableError::NotReady),
            Err(e) => {
                warn!("Table operation failed: {e}");
                self.set_status_message(format!("Error: {e}"));
                Ok(false)
            }
        }
    }

    fn toggle_selection(&mut self) {
        let Some(record_idx) = self.current_record() else {
            return;
        };
        if !self.selected.remove(&record_idx) {
            self.selected.insert(record_idx);
        }
        debug!("Selection: {:?}", self.selected);
        self.notify_selection();
    }

    fn notify_selection(&mut self) {
        let Some(callback) = self.on_selection_change.as_mut() else {
            return;
        };
        let indices: Vec<usize> = self.selected.iter().copied().collect();
        let rows: Vec<Row> = indices
            .iter()
            .filter_map(|&i| self.context.rows().get(i).cloned())
            .collect();
        callback(&indices, &rows);
    }

    fn update_visible_rows(&mut self) {
        let columns = self.context.columns();
        self.visible = self
            .context
            .rows()
            .iter()
            .filter(|r| self.filters.matches(r, columns))
            .map(|r| r.index)
            .collect();
        self.curser_row = self.curser_row.min(self.visible.len().saturating_sub(1));
        self.curser_column = self
            .curser_column
            .min(self.context.columns().len().saturating_sub(1));
        self.scroll_to_curser();
    }

    fn scroll_to_curser(&mut self) {
        let height = self.uilayout.table_height.max(1);
        if self.curser_row < self.offset_row {
            self.offset_row = self.curser_row;
        } else if self.curser_row >= self.offset_row + height {
            self.offset_row = self.curser_row + 1 - height;
        }
        let max_offset = self.visible.len().saturating_sub(height);
        self.offset_row = self.offset_row.min(max_offset);
    }

    fn move_table_selection_beginning(&mut self) {
        self.curser_row = 0;
        self.scroll_to_curser();
    }

    fn move_table_selection_end(&mut self) {
        self.curser_row = self.visible.len().saturating_sub(1);
        self.scroll_to_curser();
    }

    fn move_table_selection_up(&mut self, size: usize) {
        self.curser_row = self.curser_row.saturating_sub(size);
        self.scroll_to_curser();
    }

    fn move_table_selection_down(&mut self, size: usize) {
        if self.visible.is_empty() {
            return;
        }
        self.curser_row = std::cmp::min(self.curser_row + size, self.visible.len() - 1);
        self.scroll_to_curser();
    }

    fn move_table_selection_left(&mut self) {
        self.curser_column = self.curser_column.saturating_sub(1);
    }

    fn move_table_selection_right(&mut self) {
        if self.curser_column + 1 < self.context.columns().len() {
            self.curser_column += 1;
        }
    }
}
