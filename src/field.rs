use chrono::{Local, NaiveDate};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value, json};

pub const TEXT_MAX_LEN: usize = 20;
pub const TEXTAREA_MAX_LEN: usize = 50;
pub const DATE_FORMAT: &str = "%Y-%m-%d";

const DESCRIPTOR_KEYS: [&str; 4] = ["type", "label", "required", "schemaOrder"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldKind {
    Text,
    Textarea,
    Checkbox,
    Date,
    Select,
}

impl FieldKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FieldKind::Text => "text",
            FieldKind::Textarea => "textarea",
            FieldKind::Checkbox => "checkbox",
            FieldKind::Date => "date",
            FieldKind::Select => "select",
        }
    }

    fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "text" => Some(FieldKind::Text),
            "textarea" => Some(FieldKind::Textarea),
            "checkbox" => Some(FieldKind::Checkbox),
            "date" => Some(FieldKind::Date),
            "select" => Some(FieldKind::Select),
            _ => None,
        }
    }

    /// Maximum number of characters for string valued kinds.
    pub fn max_len(&self) -> Option<usize> {
        match self {
            FieldKind::Text => Some(TEXT_MAX_LEN),
            FieldKind::Textarea => Some(TEXTAREA_MAX_LEN),
            _ => None,
        }
    }

    /// Value used when a non-required field is submitted empty.
    pub fn default_value(&self, today: NaiveDate) -> FieldValue {
        match self {
            FieldKind::Text => FieldValue::Text(String::new()),
            FieldKind::Textarea => FieldValue::Textarea(String::new()),
            FieldKind::Checkbox => FieldValue::Checkbox(false),
            FieldKind::Date => FieldValue::Date(today),
            FieldKind::Select => FieldValue::Select(String::new()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FieldErrorReason {
    #[error("expected a JSON object")]
    NotAnObject,
    #[error("missing attribute '{0}'")]
    MissingAttribute(&'static str),
    #[error("attribute '{attribute}' must be {expected}")]
    InvalidAttribute {
        attribute: &'static str,
        expected: &'static str,
    },
    #[error("unknown attribute '{0}'")]
    UnknownAttribute(String),
    #[error("unknown field type '{0}'")]
    UnknownType(String),
    #[error("label must not be empty")]
    EmptyLabel,
    #[error("a value is required")]
    MissingValue,
    #[error("value is {len} characters long, at most {max} are allowed")]
    TooLong { len: usize, max: usize },
    #[error("'{0}' is not a date in YYYY-MM-DD form")]
    InvalidDate(String),
    #[error("checkbox value must be true or false")]
    NotBoolean,
    #[error("value must be a string")]
    NotAString,
}

/// A validation failure for a single field, named by its label.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{label}: {reason}")]
pub struct FieldError {
    pub label: String,
    pub reason: FieldErrorReason,
}

impl FieldError {
    pub fn new(label: impl Into<String>, reason: FieldErrorReason) -> Self {
        Self {
            label: label.into(),
            reason,
        }
    }
}

/// The value-less part of a field. A schema is a list of these.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDescriptor {
    pub kind: FieldKind,
    pub label: String,
    pub required: bool,
    pub schema_order: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldValue {
    Text(String),
    Textarea(String),
    Checkbox(bool),
    Date(NaiveDate),
    Select(String),
}

impl FieldValue {
    pub fn kind(&self) -> FieldKind {
        match self {
            FieldValue::Text(_) => FieldKind::Text,
            FieldValue::Textarea(_) => FieldKind::Textarea,
            FieldValue::Checkbox(_) => FieldKind::Checkbox,
            FieldValue::Date(_) => FieldKind::Date,
            FieldValue::Select(_) => FieldKind::Select,
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            FieldValue::Text(s) | FieldValue::Textarea(s) | FieldValue::Select(s) => {
                Value::String(s.clone())
            }
            FieldValue::Checkbox(b) => Value::Bool(*b),
            FieldValue::Date(d) => Value::String(d.format(DATE_FORMAT).to_string()),
        }
    }

    /// Text shown in a table cell or form input.
    pub fn display(&self) -> String {
        match self {
            FieldValue::Text(s) | FieldValue::Textarea(s) | FieldValue::Select(s) => s.clone(),
            FieldValue::Checkbox(true) => "[x]".to_string(),
            FieldValue::Checkbox(false) => "[ ]".to_string(),
            FieldValue::Date(d) => d.format(DATE_FORMAT).to_string(),
        }
    }
}

/// A schema descriptor together with a value of the matching kind.
///
/// The kind of a field is carried by its value, so a field can never hold a
/// value that disagrees with its type tag. Fields are only built through
/// [`Field::parse`], which enforces the per kind constraints.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
    label: String,
    required: bool,
    schema_order: i64,
    value: FieldValue,
}

pub fn today() -> NaiveDate {
    Local::now().date_naive()
}

fn as_object<'a>(raw: &'a Value, label: &str) -> Result<&'a Map<String, Value>, FieldError> {
    raw.as_object()
        .ok_or_else(|| FieldError::new(label, FieldErrorReason::NotAnObject))
}

fn guess_label(raw: &Value) -> String {
    raw.get("label")
        .and_then(Value::as_str)
        .unwrap_or("?")
        .to_string()
}

impl FieldDescriptor {
    /// Parses a value-less schema entry. Any key besides the four descriptor
    /// attributes is rejected.
    pub fn parse(raw: &Value) -> Result<Self, FieldError> {
        Self::parse_with_keys(raw, &DESCRIPTOR_KEYS)
    }

    fn parse_with_keys(raw: &Value, allowed: &[&str]) -> Result<Self, FieldError> {
        let label = guess_label(raw);
        let obj = as_object(raw, &label)?;

        if let Some(extra) = obj.keys().find(|k| !allowed.contains(&k.as_str())) {
            return Err(FieldError::new(
                label,
                FieldErrorReason::UnknownAttribute(extra.clone()),
            ));
        }

        let label = match obj.get("label") {
            None => return Err(FieldError::new(label, FieldErrorReason::MissingAttribute("label"))),
            Some(Value::String(s)) if s.is_empty() => {
                return Err(FieldError::new(label, FieldErrorReason::EmptyLabel));
            }
            Some(Value::String(s)) => s.clone(),
            Some(_) => {
                return Err(FieldError::new(
                    label,
                    FieldErrorReason::InvalidAttribute {
                        attribute: "label",
                        expected: "a string",
                    },
                ));
            }
        };

        let kind = match obj.get("type") {
            None => return Err(FieldError::new(label, FieldErrorReason::MissingAttribute("type"))),
            Some(Value::String(tag)) => FieldKind::from_tag(tag)
                .ok_or_else(|| FieldError::new(&label, FieldErrorReason::UnknownType(tag.clone())))?,
            Some(_) => {
                return Err(FieldError::new(
                    label,
                    FieldErrorReason::InvalidAttribute {
                        attribute: "type",
                        expected: "a string",
                    },
                ));
            }
        };

        let required = match obj.get("required") {
            None => {
                return Err(FieldError::new(label, FieldErrorReason::MissingAttribute("required")));
            }
            Some(v) => v.as_bool().ok_or_else(|| {
                FieldError::new(
                    &label,
                    FieldErrorReason::InvalidAttribute {
                        attribute: "required",
                        expected: "a boolean",
                    },
                )
            })?,
        };

        let schema_order = match obj.get("schemaOrder") {
            None => {
                return Err(FieldError::new(
                    label,
                    FieldErrorReason::MissingAttribute("schemaOrder"),
                ));
            }
            Some(v) => v.as_i64().ok_or_else(|| {
                FieldError::new(
                    &label,
                    FieldErrorReason::InvalidAttribute {
                        attribute: "schemaOrder",
                        expected: "an integer",
                    },
                )
            })?,
        };

        Ok(FieldDescriptor {
            kind,
            label,
            required,
            schema_order,
        })
    }

    pub fn to_json(&self) -> Value {
        json!({
            "type": self.kind.as_str(),
            "label": self.label,
            "required": self.required,
            "schemaOrder": self.schema_order,
        })
    }
}

impl Field {
    /// Parses a field object using the current local date for date defaults.
    pub fn parse(raw: &Value) -> Result<Self, FieldError> {
        Self::parse_with_today(raw, today())
    }

    pub fn parse_with_today(raw: &Value, today: NaiveDate) -> Result<Self, FieldError> {
        let desc = FieldDescriptor::parse_with_keys(
            raw,
            &["type", "label", "required", "schemaOrder", "value"],
        )?;
        let value = Self::parse_value(&desc, raw.get("value"), today)?;
        Ok(Field {
            label: desc.label,
            required: desc.required,
            schema_order: desc.schema_order,
            value,
        })
    }

    fn parse_value(
        desc: &FieldDescriptor,
        raw: Option<&Value>,
        today: NaiveDate,
    ) -> Result<FieldValue, FieldError> {
        let label = desc.label.as_str();
        let raw = match raw {
            None | Some(Value::Null) => None,
            Some(Value::String(s)) if s.is_empty() && desc.kind != FieldKind::Checkbox => None,
            Some(v) => Some(v),
        };
        let Some(raw) = raw else {
            if desc.required {
                return Err(FieldError::new(label, FieldErrorReason::MissingValue));
            }
            return Ok(desc.kind.default_value(today));
        };

        let value = match desc.kind {
            FieldKind::Checkbox => FieldValue::Checkbox(
                raw.as_bool()
                    .ok_or_else(|| FieldError::new(label, FieldErrorReason::NotBoolean))?,
            ),
            kind => {
                let s = raw
                    .as_str()
                    .ok_or_else(|| FieldError::new(label, FieldErrorReason::NotAString))?;
                match kind {
                    FieldKind::Text => FieldValue::Text(s.to_string()),
                    FieldKind::Textarea => FieldValue::Textarea(s.to_string()),
                    FieldKind::Select => FieldValue::Select(s.to_string()),
                    _ => FieldValue::Date(parse_date(s).ok_or_else(|| {
                        FieldError::new(label, FieldErrorReason::InvalidDate(s.to_string()))
                    })?),
                }
            }
        };
        Self::check_value(desc, &value)?;
        Ok(value)
    }

    pub(crate) fn check_value(desc: &FieldDescriptor, value: &FieldValue) -> Result<(), FieldError> {
        let text = match value {
            FieldValue::Text(s) | FieldValue::Textarea(s) | FieldValue::Select(s) => s,
            _ => return Ok(()),
        };
        if desc.required && text.is_empty() {
            return Err(FieldError::new(&desc.label, FieldErrorReason::MissingValue));
        }
        if let Some(max) = desc.kind.max_len() {
            let len = text.chars().count();
            if len > max {
                return Err(FieldError::new(
                    &desc.label,
                    FieldErrorReason::TooLong { len, max },
                ));
            }
        }
        Ok(())
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn required(&self) -> bool {
        self.required
    }

    pub fn schema_order(&self) -> i64 {
        self.schema_order
    }

    pub fn kind(&self) -> FieldKind {
        self.value.kind()
    }

    pub fn value(&self) -> &FieldValue {
        &self.value
    }

    pub fn descriptor(&self) -> FieldDescriptor {
        FieldDescriptor {
            kind: self.kind(),
            label: self.label.clone(),
            required: self.required,
            schema_order: self.schema_order,
        }
    }

    pub fn to_json(&self) -> Value {
        json!({
            "type": self.kind().as_str(),
            "label": self.label,
            "required": self.required,
            "schemaOrder": self.schema_order,
            "value": self.value.to_json(),
        })
    }
}

/// Strict `YYYY-MM-DD`: chrono alone accepts unpadded months and days.
pub fn parse_date(s: &str) -> Option<NaiveDate> {
    let bytes = s.as_bytes();
    let shape_ok = bytes.len() == 10
        && bytes[4] == b'-'
        && bytes[7] == b'-'
        && bytes
            .iter()
            .enumerate()
            .all(|(i, b)| i == 4 || i == 7 || b.is_ascii_digit());
    if !shape_ok {
        return None;
    }
    NaiveDate::parse_from_str(s, DATE_FORMAT).ok()
}

impl Serialize for FieldDescriptor {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for FieldDescriptor {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = Value::deserialize(deserializer)?;
        FieldDescriptor::parse(&raw).map_err(serde::de::Error::custom)
    }
}

impl Serialize for Field {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Field {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = Value::deserialize(deserializer)?;
        Field::parse(&raw).map_err(serde::de::Error::custom)
    }
}
