use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{info, trace};

use crate::domain::TableError;
use crate::field::{Field, FieldDescriptor, FieldError};

pub type Schema = Vec<FieldDescriptor>;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SchemaError {
    #[error(transparent)]
    Field(#[from] FieldError),
    #[error("schema must contain at least one field")]
    EmptySchema,
    #[error("label '{0}' appears more than once")]
    DuplicateLabel(String),
    #[error("record {record} has {found} fields, the schema has {expected}")]
    FieldCount {
        record: usize,
        expected: usize,
        found: usize,
    },
    #[error("record {record}: field '{label}' is not part of the schema")]
    UnknownLabel { record: usize, label: String },
    #[error("record {record}: field '{label}' should be {expected}, found {found}")]
    KindMismatch {
        record: usize,
        label: String,
        expected: &'static str,
        found: &'static str,
    },
    #[error("record {record}: field '{label}' does not match its schema entry")]
    DescriptorMismatch { record: usize, label: String },
    #[error("record {record}: {source}")]
    InvalidValue {
        record: usize,
        #[source]
        source: FieldError,
    },
    #[error("malformed table data: {0}")]
    Malformed(String),
}

/// One schema's worth of fields.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Record(Vec<Field>);

impl Record {
    pub fn new(fields: Vec<Field>) -> Self {
        Record(fields)
    }

    pub fn parse(raw: &Value) -> Result<Self, SchemaError> {
        let items = raw
            .as_array()
            .ok_or_else(|| SchemaError::Malformed("a record must be an array".to_string()))?;
        let fields = items
            .iter()
            .map(Field::parse)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Record(fields))
    }

    pub fn fields(&self) -> &[Field] {
        &self.0
    }

    pub fn field(&self, label: &str) -> Option<&Field> {
        self.0.iter().find(|f| f.label() == label)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// A schema plus every record built from it. This is the value persisted
/// under a storage key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TableData {
    pub schema: Schema,
    pub records: Vec<Record>,
}

impl TableData {
    /// Reads a `{schema, records}` JSON document and validates it.
    pub fn load(path: &Path) -> Result<Self, TableError> {
        let content = fs::read_to_string(path)?;
        let raw: Value = serde_json::from_str(&content)?;
        let data = TableData::parse(&raw)?;
        info!(
            "Loaded table data from {:?}: {} fields, {} records",
            path,
            data.schema.len(),
            data.records.len()
        );
        Ok(data)
    }

    pub fn parse(raw: &Value) -> Result<Self, SchemaError> {
        let obj = raw
            .as_object()
            .ok_or_else(|| SchemaError::Malformed("expected an object".to_string()))?;
        if let Some(extra) = obj.keys().find(|k| *k != "schema" && *k != "records") {
            return Err(SchemaError::Malformed(format!("unknown attribute '{extra}'")));
        }
        let schema = obj
            .get("schema")
            .and_then(Value::as_array)
            .ok_or_else(|| SchemaError::Malformed("'schema' must be an array".to_string()))?
            .iter()
            .map(FieldDescriptor::parse)
            .collect::<Result<Vec<_>, _>>()?;
        let records = obj
            .get("records")
            .and_then(Value::as_array)
            .ok_or_else(|| SchemaError::Malformed("'records' must be an array".to_string()))?
            .iter()
            .map(Record::parse)
            .collect::<Result<Vec<_>, _>>()?;

        let data = TableData { schema, records };
        data.validate()?;
        Ok(data)
    }

    /// Checks the cross field invariants that single field parsing can not
    /// see: a non-empty schema with unique labels, and records whose fields
    /// match the schema entries one to one and hold values those entries
    /// accept.
    pub fn validate(&self) -> Result<(), SchemaError> {
        validate_schema(&self.schema)?;
        let entries: HashMap<&str, &FieldDescriptor> = self
            .schema
            .iter()
            .map(|d| (d.label.as_str(), d))
            .collect();
        for (idx, record) in self.records.iter().enumerate() {
            validate_record(idx, record, &entries)?;
        }
        Ok(())
    }

    /// Schema entries sorted by `schema_order`. Ties keep declaration order.
    pub fn ordered_schema(&self) -> Vec<&FieldDescriptor> {
        let mut ordered: Vec<&FieldDescriptor> = self.schema.iter().collect();
        ordered.sort_by_key(|d| d.schema_order);
        ordered
    }

    pub fn to_json(&self) -> Value {
        json!({
            "schema": self.schema.iter().map(FieldDescriptor::to_json).collect::<Vec<_>>(),
            "records": self
                .records
                .iter()
                .map(|r| r.fields().iter().map(Field::to_json).collect::<Vec<_>>())
                .collect::<Vec<_>>(),
        })
    }
}

pub fn validate_schema(schema: &[FieldDescriptor]) -> Result<(), SchemaError> {
    if schema.is_empty() {
        return Err(SchemaError::EmptySchema);
    }
    let mut seen = HashSet::new();
    for desc in schema {
        if !seen.insert(desc.label.as_str()) {
            return Err(SchemaError::DuplicateLabel(desc.label.clone()));
        }
    }
    Ok(())
}

fn validate_record(
    idx: usize,
    record: &Record,
    entries: &HashMap<&str, &FieldDescriptor>,
) -> Result<(), SchemaError> {
    if record.len() != entries.len() {
        return Err(SchemaError::FieldCount {
            record: idx,
            expected: entries.len(),
            found: record.len(),
        });
    }
    let mut seen = HashSet::new();
    for field in record.fields() {
        let Some(desc) = entries.get(field.label()) else {
            return Err(SchemaError::UnknownLabel {
                record: idx,
                label: field.label().to_string(),
            });
        };
        if desc.kind != field.kind() {
            return Err(SchemaError::KindMismatch {
                record: idx,
                label: field.label().to_string(),
                expected: desc.kind.as_str(),
                found: field.kind().as_str(),
            });
        }
        if field.descriptor() != **desc {
            return Err(SchemaError::DescriptorMismatch {
                record: idx,
                label: field.label().to_string(),
            });
        }
        Field::check_value(desc, field.value())
            .map_err(|source| SchemaError::InvalidValue { record: idx, source })?;
        if !seen.insert(field.label()) {
            return Err(SchemaError::DuplicateLabel(field.label().to_string()));
        }
    }
    trace!("Record {idx} matches the schema");
    Ok(())
}

/// Member table used when no data file is given.
pub fn demo_data() -> Result<TableData, SchemaError> {
    let raw = json!({
        "schema": [
            {"type": "text", "label": "Name", "required": true, "schemaOrder": 0},
            {"type": "text", "label": "Address", "required": true, "schemaOrder": 1},
            {"type": "textarea", "label": "Memo", "required": false, "schemaOrder": 2},
            {"type": "date", "label": "Joined", "required": true, "schemaOrder": 3},
            {"type": "select", "label": "Occupation", "required": true, "schemaOrder": 4},
            {"type": "checkbox", "label": "Email opt-in", "required": false, "schemaOrder": 5}
        ],
        "records": [
            [
                {"type": "text", "label": "Name", "required": true, "schemaOrder": 0, "value": "John Doe"},
                {"type": "text", "label": "Address", "required": true, "schemaOrder": 1, "value": "Seoul Gangnam-gu"},
                {"type": "textarea", "label": "Memo", "required": false, "schemaOrder": 2, "value": "Foreign resident"},
                {"type": "date", "label": "Joined", "required": true, "schemaOrder": 3, "value": "2024-10-02"},
                {"type": "select", "label": "Occupation", "required": true, "schemaOrder": 4, "value": "Developer"},
                {"type": "checkbox", "label": "Email opt-in", "required": false, "schemaOrder": 5, "value": true}
            ],
            [
                {"type": "text", "label": "Name", "required": true, "schemaOrder": 0, "value": "Foo Bar"},
                {"type": "text", "label": "Address", "required": true, "schemaOrder": 1, "value": "Seoul Seocho-gu"},
                {"type": "textarea", "label": "Memo", "required": false, "schemaOrder": 2, "value": ""},
                {"type": "date", "label": "Joined", "required": true, "schemaOrder": 3, "value": "2024-10-01"},
                {"type": "select", "label": "Occupation", "required": true, "schemaOrder": 4, "value": "PO"},
                {"type": "checkbox", "label": "Email opt-in", "required": false, "schemaOrder": 5, "value": false}
            ]
        ]
    });
    TableData::parse(&raw)
}
