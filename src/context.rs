use std::time::Instant;

use tracing::{debug, info};

use crate::domain::TableError;
use crate::field::{FieldKind, FieldValue};
use crate::persist::Persisted;
use crate::storage::{StorageError, StorageService};
use crate::table::{Record, Schema, TableData};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Uninitialized,
    Loading,
    Ready,
    Unmounted,
}

/// A render ready column derived from one schema entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    pub title: String,
    pub kind: FieldKind,
    pub required: bool,
}

/// A render ready row. `index` is the record index in the table, `cells`
/// follow the order of [`TableContext::columns`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Row {
    pub key: usize,
    pub index: usize,
    pub cells: Vec<Option<FieldValue>>,
}

impl Row {
    pub fn cell_text(&self, column: usize) -> String {
        self.cells
            .get(column)
            .and_then(|c| c.as_ref())
            .map(FieldValue::display)
            .unwrap_or_default()
    }
}

/// Owns the live [`TableData`] of one table and exposes record level CRUD.
///
/// Every mutation goes through the persistence hook, which validates the
/// whole table before accepting it, and re-derives the column/row projection
/// right away.
pub struct TableContext {
    state: Persisted<TableData>,
    phase: Phase,
    columns: Vec<Column>,
    rows: Vec<Row>,
}

impl TableContext {
    pub fn new(state: Persisted<TableData>) -> Self {
        let mut context = Self {
            state,
            phase: Phase::Uninitialized,
            columns: Vec::new(),
            rows: Vec::new(),
        };
        context.update_projection();
        context
    }

    /// Runs the startup protocol of the persistence hook.
    pub fn mount(&mut self) {
        if self.phase != Phase::Uninitialized {
            return;
        }
        self.phase = Phase::Loading;
        self.state.init();
        self.phase = Phase::Ready;
        self.update_projection();
        info!(
            "Table '{}' ready with {} records",
            self.state.key(),
            self.records().len()
        );
    }

    /// Drops pending writes and rejects later mutations. The context keeps
    /// serving reads.
    pub fn unmount(&mut self) {
        self.state.dispose();
        self.phase = Phase::Unmounted;
        debug!("Table '{}' unmounted", self.state.key());
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn is_initialized(&self) -> bool {
        self.phase == Phase::Ready
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    pub fn records(&self) -> &[Record] {
        &self.state.data().records
    }

    pub fn len(&self) -> usize {
        self.records().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records().is_empty()
    }

    pub fn get_schema(&self) -> &Schema {
        &self.state.data().schema
    }

    pub fn get_record(&self, index: usize) -> Option<&Record> {
        self.records().get(index)
    }

    pub fn add_record(&mut self, record: Record) -> Result<(), TableError> {
        self.add_record_at(record, Instant::now())
    }

    pub fn add_record_at(&mut self, record: Record, now: Instant) -> Result<(), TableError> {
        self.mutate(now, |data| {
            data.records.push(record);
            Ok(())
        })?;
        debug!("Added record {}", self.len() - 1);
        Ok(())
    }

    pub fn update_record(&mut self, index: usize, record: Record) -> Result<(), TableError> {
        self.update_record_at(index, record, Instant::now())
    }

    pub fn update_record_at(
        &mut self,
        index: usize,
        record: Record,
        now: Instant,
    ) -> Result<(), TableError> {
        self.mutate(now, |data| {
            let len = data.records.len();
            let slot = data
                .records
                .get_mut(index)
                .ok_or(TableError::IndexOutOfRange { index, len })?;
            *slot = record;
            Ok(())
        })?;
        debug!("Updated record {index}");
        Ok(())
    }

    pub fn delete_record(&mut self, index: usize) -> Result<(), TableError> {
        self.delete_record_at(index, Instant::now())
    }

    pub fn delete_record_at(&mut self, index: usize, now: Instant) -> Result<(), TableError> {
        self.mutate(now, |data| {
            let len = data.records.len();
            if index >= len {
                return Err(TableError::IndexOutOfRange { index, len });
            }
            data.records.remove(index);
            Ok(())
        })?;
        debug!("Deleted record {index}");
        Ok(())
    }

    fn mutate<F>(&mut self, now: Instant, change: F) -> Result<(), TableError>
    where
        F: FnOnce(&mut TableData) -> Result<(), TableError>,
    {
        match self.phase {
            Phase::Ready => {}
            Phase::Unmounted => return Err(TableError::Unmounted),
            Phase::Uninitialized | Phase::Loading => return Err(TableError::NotReady),
        }
        let mut next = self.state.data().clone();
        change(&mut next)?;
        self.state.set_data_at(next, now)?;
        self.update_projection();
        Ok(())
    }

    pub fn tick_at(&mut self, now: Instant) -> bool {
        self.state.tick_at(now)
    }

    pub fn flush(&mut self) -> bool {
        self.state.flush()
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.state.next_deadline()
    }

    pub fn is_saving(&self) -> bool {
        self.state.is_pending()
    }

    pub fn error(&self) -> Option<&StorageError> {
        self.state.error()
    }

    pub fn storage(&self) -> &dyn StorageService<TableData> {
        self.state.storage()
    }

    pub fn storage_key(&self) -> &str {
        self.state.key()
    }

    fn update_projection(&mut self) {
        let data = self.state.data();
        let ordered = data.ordered_schema();
        self.columns = ordered
            .iter()
            .map(|d| Column {
                title: d.label.clone(),
                kind: d.kind,
                required: d.required,
            })
            .collect();
        self.rows = data
            .records
            .iter()
            .enumerate()
            .map(|(index, record)| Row {
                key: index,
                index,
                cells: ordered
                    .iter()
                    .map(|d| record.field(&d.label).map(|f| f.value().clone()))
                    .collect(),
            })
            .collect();
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::json;

    use super::*;
    use crate::persist::tests::{name_table, table_validator};
    use crate::storage::InMemoryStorage;
    use crate::table::SchemaError;

    const KEY: &str = "tableData";

    fn context(initial: TableData) -> TableContext {
        let storage = InMemoryStorage::new(table_validator());
        let state = Persisted::new(KEY, Box::new(storage), initial, Duration::from_millis(500));
        TableContext::new(state)
    }

    fn name_record(name: &str) -> Record {
        Record::parse(&json!([
            {"type": "text", "label": "Name", "required": true, "schemaOrder": 0, "value": name}
        ]))
        .unwrap()
    }

    fn names(context: &TableContext) -> Vec<String> {
        context.rows().iter().map(|r| r.cell_text(0)).collect()
    }

    #[test]
    fn phases() {
        let mut context = context(name_table(&[]));
        assert_eq!(context.phase(), Phase::Uninitialized);
        assert!(matches!(
            context.add_record(name_record("Ada")),
            Err(TableError::NotReady)
        ));
        context.mount();
        assert_eq!(context.phase(), Phase::Ready);
        context.add_record(name_record("Ada")).unwrap();
        context.mount();
        assert_eq!(context.phase(), Phase::Ready);
        assert_eq!(context.len(), 1);
    }

    #[test]
    fn add_record_is_persisted_after_debounce() {
        let mut context = context(name_table(&[]));
        context.mount();
        let t0 = Instant::now();

        context.add_record_at(name_record("Ada"), t0).unwrap();
        assert_eq!(context.get_record(0), Some(&name_record("Ada")));
        assert_eq!(context.storage().get(KEY).unwrap().records.len(), 0);

        assert!(context.tick_at(t0 + Duration::from_millis(500)));
        let stored = context.storage().get(KEY).unwrap();
        assert_eq!(stored.records, vec![name_record("Ada")]);
    }

    #[test]
    fn crud_sequence_keeps_count_and_shifts_indices() {
        let mut context = context(name_table(&["a", "b"]));
        context.mount();

        context.add_record(name_record("c")).unwrap();
        context.add_record(name_record("d")).unwrap();
        context.update_record(1, name_record("B")).unwrap();
        context.delete_record(0).unwrap();
        assert_eq!(context.len(), 2 + 2 - 1);
        assert_eq!(names(&context), vec!["B", "c", "d"]);
        assert_eq!(context.get_record(0), Some(&name_record("B")));

        context.delete_record(1).unwrap();
        assert_eq!(names(&context), vec!["B", "d"]);
        assert_eq!(context.rows()[1].index, 1);
        assert_eq!(context.get_record(2), None);
    }

    #[test]
    fn out_of_range_indices_fail() {
        let mut context = context(name_table(&["a"]));
        context.mount();
        assert!(matches!(
            context.update_record(3, name_record("x")),
            Err(TableError::IndexOutOfRange { index: 3, len: 1 })
        ));
        assert!(matches!(
            context.delete_record(1),
            Err(TableError::IndexOutOfRange { index: 1, len: 1 })
        ));
        assert_eq!(names(&context), vec!["a"]);
    }

    #[test]
    fn records_not_matching_the_schema_are_rejected() {
        let mut context = context(name_table(&[]));
        context.mount();
        let wrong = Record::parse(&json!([
            {"type": "checkbox", "label": "Name", "required": false, "schemaOrder": 0, "value": true}
        ]))
        .unwrap();
        assert!(matches!(
            context.add_record(wrong),
            Err(TableError::SchemaError(_))
        ));
        assert!(context.is_empty());
        assert!(context.error().is_some());
    }

    #[test]
    fn projection_follows_schema_order() {
        let data = TableData::parse(&json!({
            "schema": [
                {"type": "checkbox", "label": "Active", "required": false, "schemaOrder": 2},
                {"type": "text", "label": "Name", "required": true, "schemaOrder": 1}
            ],
            "records": [[
                {"type": "checkbox", "label": "Active", "required": false, "schemaOrder": 2, "value": true},
                {"type": "text", "label": "Name", "required": true, "schemaOrder": 1, "value": "John"}
            ]]
        }))
        .unwrap();
        let mut context = context(data);
        context.mount();

        let titles: Vec<&str> = context.columns().iter().map(|c| c.title.as_str()).collect();
        assert_eq!(titles, vec!["Name", "Active"]);
        assert_eq!(context.columns()[1].kind, FieldKind::Checkbox);

        let row = &context.rows()[0];
        assert_eq!(row.key, 0);
        assert_eq!(row.cell_text(0), "John");
        assert_eq!(row.cells[1], Some(FieldValue::Checkbox(true)));
    }

    #[test]
    fn unmount_drops_pending_write() {
        let mut context = context(name_table(&[]));
        context.mount();
        let t0 = Instant::now();
        context.add_record_at(name_record("Ada"), t0).unwrap();
        assert!(context.is_saving());
        context.unmount();
        assert!(!context.tick_at(t0 + Duration::from_secs(1)));
        assert!(context.storage().get(KEY).unwrap().records.is_empty());
    }

    #[test]
    fn unmounted_context_rejects_mutations() {
        let mut context = context(name_table(&["a"]));
        context.mount();
        context.unmount();
        assert_eq!(context.phase(), Phase::Unmounted);
        assert!(!context.is_initialized());

        let t0 = Instant::now();
        assert!(matches!(
            context.add_record_at(name_record("Ada"), t0),
            Err(TableError::Unmounted)
        ));
        assert!(matches!(
            context.update_record_at(0, name_record("b"), t0),
            Err(TableError::Unmounted)
        ));
        assert!(matches!(context.delete_record_at(0, t0), Err(TableError::Unmounted)));
        assert!(!context.is_saving());
        assert!(!context.tick_at(t0 + Duration::from_secs(1)));
        assert!(!context.flush());
        assert_eq!(names(&context), vec!["a"]);

        context.mount();
        assert_eq!(context.phase(), Phase::Unmounted);
        assert_eq!(context.storage().get(KEY).unwrap().records.len(), 1);
    }

    #[test]
    fn field_attributes_must_match_the_schema() {
        let mut context = context(name_table(&[]));
        context.mount();
        let t0 = Instant::now();
        let optional_empty = Record::parse(&json!([
            {"type": "text", "label": "Name", "required": false, "schemaOrder": 0, "value": ""}
        ]))
        .unwrap();
        assert!(matches!(
            context.add_record_at(optional_empty, t0),
            Err(TableError::SchemaError(SchemaError::DescriptorMismatch { record: 0, .. }))
        ));
        assert!(context.is_empty());
        assert!(!context.tick_at(t0 + Duration::from_secs(1)));
        assert!(context.storage().load(KEY).unwrap().is_some());
    }
}
