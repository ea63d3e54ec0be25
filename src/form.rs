use chrono::NaiveDate;
use ratatui::crossterm::event::{KeyCode, KeyEvent};
use serde_json::{Map, Value};
use tracing::{debug, trace};

use crate::field::{Field, FieldDescriptor, FieldError, FieldKind, FieldValue, today};
use crate::inputter::Inputter;
use crate::table::Record;

#[derive(Debug, Clone)]
pub enum FormInput {
    Text(Inputter),
    Checkbox(bool),
    Choice {
        options: Vec<String>,
        selected: Option<usize>,
    },
}

impl FormInput {
    fn for_kind(kind: FieldKind, options: &[String]) -> Self {
        match kind {
            FieldKind::Checkbox => FormInput::Checkbox(false),
            FieldKind::Select => FormInput::Choice {
                options: options.to_vec(),
                selected: None,
            },
            _ => FormInput::Text(Inputter::default()),
        }
    }

    fn fill(&mut self, value: &FieldValue) {
        match (self, value) {
            (FormInput::Checkbox(checked), FieldValue::Checkbox(b)) => *checked = *b,
            (FormInput::Choice { options, selected }, FieldValue::Select(s)) => {
                if s.is_empty() {
                    *selected = None;
                } else {
                    let idx = match options.iter().position(|o| o == s) {
                        Some(idx) => idx,
                        None => {
                            options.insert(0, s.clone());
                            0
                        }
                    };
                    *selected = Some(idx);
                }
            }
            (FormInput::Text(inputter), value) => inputter.set(&value.display()),
            _ => {}
        }
    }

    fn to_json(&self) -> Value {
        match self {
            FormInput::Text(inputter) => Value::String(inputter.value().to_string()),
            FormInput::Checkbox(checked) => Value::Bool(*checked),
            FormInput::Choice { options, selected } => selected
                .and_then(|i| options.get(i))
                .map(|o| Value::String(o.clone()))
                .unwrap_or(Value::Null),
        }
    }

    /// Text shown for the input in the form.
    pub fn display(&self) -> String {
        match self {
            FormInput::Text(inputter) => inputter.value().to_string(),
            FormInput::Checkbox(true) => "[x]".to_string(),
            FormInput::Checkbox(false) => "[ ]".to_string(),
            FormInput::Choice { options, selected } => selected
                .and_then(|i| options.get(i))
                .map(|o| format!("< {o} >"))
                .unwrap_or_else(|| "< choose >".to_string()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct FormField {
    pub descriptor: FieldDescriptor,
    pub input: FormInput,
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FormOutcome {
    Editing,
    Canceled,
    /// Fields that failed validation. Their messages are shown in the form.
    Rejected(Vec<FieldError>),
    Submitted {
        record_index: Option<usize>,
        record: Record,
    },
}

/// The add/edit modal. One input per schema field, in `schemaOrder`.
#[derive(Debug, Clone)]
pub struct RecordForm {
    record_index: Option<usize>,
    fields: Vec<FormField>,
    focus: usize,
}

impl RecordForm {
    /// An empty form for a new record.
    pub fn new(schema: &[FieldDescriptor], select_options: &[String]) -> Self {
        let mut ordered: Vec<&FieldDescriptor> = schema.iter().collect();
        ordered.sort_by_key(|d| d.schema_order);
        let fields = ordered
            .into_iter()
            .map(|d| FormField {
                descriptor: d.clone(),
                input: FormInput::for_kind(d.kind, select_options),
                error: None,
            })
            .collect();
        Self {
            record_index: None,
            fields,
            focus: 0,
        }
    }

    /// A form prefilled with the record at `record_index`.
    pub fn edit(
        schema: &[FieldDescriptor],
        record_index: usize,
        record: &Record,
        select_options: &[String],
    ) -> Self {
        let mut form = Self::new(schema, select_options);
        form.record_index = Some(record_index);
        for field in form.fields.iter_mut() {
            if let Some(existing) = record.field(&field.descriptor.label) {
                field.input.fill(existing.value());
            }
        }
        form
    }

    pub fn title(&self) -> &'static str {
        if self.record_index.is_some() {
            "Edit record"
        } else {
            "Add record"
        }
    }

    pub fn record_index(&self) -> Option<usize> {
        self.record_index
    }

    pub fn fields(&self) -> &[FormField] {
        &self.fields
    }

    pub fn focus(&self) -> usize {
        self.focus
    }

    pub fn read(&mut self, key: KeyEvent) -> FormOutcome {
        self.read_with_today(key, today())
    }

    pub fn read_with_today(&mut self, key: KeyEvent, today: NaiveDate) -> FormOutcome {
        match (key.code, key.modifiers) {
            (KeyCode::Esc, _) => return FormOutcome::Canceled,
            (KeyCode::Enter, _) => return self.submit_with_today(today),
            (KeyCode::Tab, _) | (KeyCode::Down, _) => self.move_focus(1),
            (KeyCode::BackTab, _) | (KeyCode::Up, _) => self.move_focus(-1),
            _ => self.edit_focused(key),
        }
        FormOutcome::Editing
    }

    fn move_focus(&mut self, step: i32) {
        if self.fields.is_empty() {
            return;
        }
        let n = self.fields.len() as i32;
        self.focus = ((self.focus as i32 + step).rem_euclid(n)) as usize;
        trace!("Form focus on {}", self.focus);
    }

    fn edit_focused(&mut self, key: KeyEvent) {
        let Some(field) = self.fields.get_mut(self.focus) else {
            return;
        };
        match &mut field.input {
            FormInput::Text(inputter) => {
                inputter.read(key);
            }
            FormInput::Checkbox(checked) => {
                if key.code == KeyCode::Char(' ') {
                    *checked = !*checked;
                }
            }
            FormInput::Choice { options, selected } => {
                if options.is_empty() {
                    return;
                }
                let n = options.len();
                *selected = match (key.code, *selected) {
                    (KeyCode::Right | KeyCode::Char(' '), None) => Some(0),
                    (KeyCode::Right | KeyCode::Char(' '), Some(i)) => Some((i + 1) % n),
                    (KeyCode::Left, None) => Some(n - 1),
                    (KeyCode::Left, Some(i)) => Some((i + n - 1) % n),
                    (KeyCode::Backspace | KeyCode::Delete, _) => None,
                    (_, current) => current,
                };
            }
        }
    }

    /// Parses every input. All failures are reported, not only the first.
    pub fn submit_with_today(&mut self, today: NaiveDate) -> FormOutcome {
        let mut parsed = Vec::with_capacity(self.fields.len());
        let mut errors = Vec::new();
        for field in self.fields.iter_mut() {
            let raw = Self::field_json(&field.descriptor, &field.input);
            match Field::parse_with_today(&raw, today) {
                Ok(f) => {
                    field.error = None;
                    parsed.push(f);
                }
                Err(e) => {
                    field.error = Some(e.reason.to_string());
                    errors.push(e);
                }
            }
        }
        if !errors.is_empty() {
            debug!("Form rejected with {} errors", errors.len());
            if let Some(first) = self.fields.iter().position(|f| f.error.is_some()) {
                self.focus = first;
            }
            return FormOutcome::Rejected(errors);
        }
        FormOutcome::Submitted {
            record_index: self.record_index,
            record: Record::new(parsed),
        }
    }

    fn field_json(desc: &FieldDescriptor, input: &FormInput) -> Value {
        let mut obj = match desc.to_json() {
            Value::Object(obj) => obj,
            _ => Map::new(),
        };
        obj.insert("value".to_string(), input.to_json());
        Value::Object(obj)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ratatui::crossterm::event::KeyModifiers;
    use serde_json::json;

    fn schema() -> Vec<FieldDescriptor> {
        [
            json!({"type": "textarea", "label": "Memo", "required": false, "schemaOrder": 3}),
            json!({"type": "text", "label": "Name", "required": true, "schemaOrder": 0}),
            json!({"type": "checkbox", "label": "Agree", "required": false, "schemaOrder": 1}),
            json!({"type": "select", "label": "Job", "required": true, "schemaOrder": 2}),
            json!({"type": "date", "label": "Joined", "required": false, "schemaOrder": 4}),
        ]
        .iter()
        .map(|raw| FieldDescriptor::parse(raw).unwrap())
        .collect()
    }

    fn options() -> Vec<String> {
        vec!["Developer".to_string(), "PM".to_string()]
    }

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 10, 2).unwrap()
    }

    fn key(code: KeyCode) -> KeyEvent {
        KeyEvent::new(code, KeyModifiers::NONE)
    }

    fn type_str(form: &mut RecordForm, s: &str) {
        for c in s.chars() {
            form.read_with_today(key(KeyCode::Char(c)), day());
        }
    }

    #[test]
    fn fields_follow_schema_order() {
        let form = RecordForm::new(&schema(), &options());
        let labels: Vec<&str> = form
            .fields()
            .iter()
            .map(|f| f.descriptor.label.as_str())
            .collect();
        assert_eq!(labels, vec!["Name", "Agree", "Job", "Memo", "Joined"]);
        assert_eq!(form.title(), "Add record");
    }

    #[test]
    fn empty_submission_reports_required_fields() {
        let mut form = RecordForm::new(&schema(), &options());
        let outcome = form.read_with_today(key(KeyCode::Enter), day());
        let FormOutcome::Rejected(errors) = outcome else {
            panic!("expected rejection, got {outcome:?}");
        };
        let labels: Vec<&str> = errors.iter().map(|e| e.label.as_str()).collect();
        assert_eq!(labels, vec!["Name", "Job"]);
        assert_eq!(form.fields()[0].error.as_deref(), Some("a value is required"));
        assert!(form.fields()[1].error.is_none());
        assert_eq!(form.focus(), 0);
    }

    #[test]
    fn fills_in_and_submits() {
        let mut form = RecordForm::new(&schema(), &options());
        type_str(&mut form, "Ada");
        form.read_with_today(key(KeyCode::Tab), day());
        form.read_with_today(key(KeyCode::Char(' ')), day());
        form.read_with_today(key(KeyCode::Tab), day());
        form.read_with_today(key(KeyCode::Right), day());
        form.read_with_today(key(KeyCode::Right), day());

        let outcome = form.read_with_today(key(KeyCode::Enter), day());
        let FormOutcome::Submitted {
            record_index,
            record,
        } = outcome
        else {
            panic!("expected submission, got {outcome:?}");
        };
        assert_eq!(record_index, None);
        assert_eq!(
            record.field("Name").unwrap().value(),
            &FieldValue::Text("Ada".to_string())
        );
        assert_eq!(record.field("Agree").unwrap().value(), &FieldValue::Checkbox(true));
        assert_eq!(
            record.field("Job").unwrap().value(),
            &FieldValue::Select("PM".to_string())
        );
        assert_eq!(
            record.field("Memo").unwrap().value(),
            &FieldValue::Textarea(String::new())
        );
        assert_eq!(record.field("Joined").unwrap().value(), &FieldValue::Date(day()));
    }

    #[test]
    fn too_long_text_blocks_submission() {
        let mut form = RecordForm::new(&schema(), &options());
        type_str(&mut form, &"x".repeat(21));
        let outcome = form.submit_with_today(day());
        let FormOutcome::Rejected(errors) = outcome else {
            panic!("expected rejection");
        };
        assert_eq!(errors[0].label, "Name");
        assert!(form.fields()[0].error.as_deref().unwrap().contains("at most 20"));
    }

    #[test]
    fn bad_date_is_reported() {
        let mut form = RecordForm::new(&schema(), &options());
        type_str(&mut form, "Ada");
        form.read_with_today(key(KeyCode::Down), day());
        form.read_with_today(key(KeyCode::Down), day());
        form.read_with_today(key(KeyCode::Char(' ')), day());
        form.read_with_today(key(KeyCode::Down), day());
        form.read_with_today(key(KeyCode::Down), day());
        type_str(&mut form, "2024-13-40");
        let FormOutcome::Rejected(errors) = form.submit_with_today(day()) else {
            panic!("expected rejection");
        };
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].label, "Joined");
        assert_eq!(form.focus(), 4);
    }

    #[test]
    fn edit_prefills_values() {
        let record = Record::parse(&json!([
            {"type": "text", "label": "Name", "required": true, "schemaOrder": 0, "value": "Foo"},
            {"type": "checkbox", "label": "Agree", "required": false, "schemaOrder": 1, "value": true},
            {"type": "select", "label": "Job", "required": true, "schemaOrder": 2, "value": "Designer"},
            {"type": "textarea", "label": "Memo", "required": false, "schemaOrder": 3, "value": "note"},
            {"type": "date", "label": "Joined", "required": false, "schemaOrder": 4, "value": "2024-10-01"}
        ]))
        .unwrap();
        let mut form = RecordForm::edit(&schema(), 3, &record, &options());
        assert_eq!(form.title(), "Edit record");
        assert_eq!(form.fields()[0].input.display(), "Foo");
        assert_eq!(form.fields()[1].input.display(), "[x]");
        assert_eq!(form.fields()[2].input.display(), "< Designer >");
        assert_eq!(form.fields()[4].input.display(), "2024-10-01");

        let outcome = form.submit_with_today(day());
        assert_eq!(
            outcome,
            FormOutcome::Submitted {
                record_index: Some(3),
                record: Record::new(
                    ["Name", "Agree", "Job", "Memo", "Joined"]
                        .iter()
                        .map(|l| record.field(l).unwrap().clone())
                        .collect()
                ),
            }
        );
    }

    #[test]
    fn escape_cancels() {
        let mut form = RecordForm::new(&schema(), &options());
        assert_eq!(
            form.read_with_today(key(KeyCode::Esc), day()),
            FormOutcome::Canceled
        );
    }
}
