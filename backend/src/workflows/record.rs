// Record Accessor - Named field access over loosely-typed business records

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};
use std::collections::BTreeSet;
use std::str::FromStr;
use std::sync::Arc;
use uuid::Uuid;

use crate::error::{WorkflowError, WorkflowResult};

/// Declared type of a record field, used to convert literals on write.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "variants", rename_all = "snake_case")]
pub enum FieldKind {
    String,
    Integer,
    Decimal,
    Boolean,
    Timestamp,
    Identifier,
    Enumeration(Vec<String>),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldDescriptor {
    pub name: String,
    pub kind: FieldKind,
    #[serde(default)]
    pub read_only: bool,
}

/// Property table describing the fields of one record type.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RecordSchema {
    pub record_type: String,
    pub fields: Vec<FieldDescriptor>,
}

impl RecordSchema {
    pub fn new(record_type: &str) -> Self {
        Self {
            record_type: record_type.to_string(),
            fields: Vec::new(),
        }
    }

    pub fn field(mut self, name: &str, kind: FieldKind) -> Self {
        self.fields.push(FieldDescriptor {
            name: name.to_string(),
            kind,
            read_only: false,
        });
        self
    }

    pub fn read_only_field(mut self, name: &str, kind: FieldKind) -> Self {
        self.fields.push(FieldDescriptor {
            name: name.to_string(),
            kind,
            read_only: true,
        });
        self
    }

    pub fn descriptor(&self, name: &str) -> Option<&FieldDescriptor> {
        self.fields
            .iter()
            .find(|f| f.name == name)
            .or_else(|| self.fields.iter().find(|f| f.name.eq_ignore_ascii_case(name)))
    }
}

/// A business record of any entity type: type tag, opaque id and a JSON
/// object of field values.
///
/// Mutations made through [`Record::set_literal`] are tracked so the engine
/// can persist them after automation runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Record {
    record_type: String,
    id: String,
    #[serde(default)]
    fields: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    schema: Option<Arc<RecordSchema>>,
    #[serde(skip)]
    dirty: BTreeSet<String>,
}

impl Record {
    pub fn new(record_type: &str, id: impl Into<String>) -> Self {
        Self {
            record_type: record_type.to_string(),
            id: id.into(),
            fields: Map::new(),
            schema: None,
            dirty: BTreeSet::new(),
        }
    }

    /// Build a record from a JSON object; non-object values yield an empty record.
    pub fn from_json(record_type: &str, id: impl Into<String>, fields: Value) -> Self {
        let mut record = Self::new(record_type, id);
        if let Value::Object(map) = fields {
            record.fields = map;
        }
        record
    }

    pub fn with_schema(mut self, schema: Arc<RecordSchema>) -> Self {
        self.schema = Some(schema);
        self
    }

    /// Builder-style field insertion; does not count as a mutation.
    pub fn with_field(mut self, name: &str, value: Value) -> Self {
        self.fields.insert(name.to_string(), value);
        self
    }

    /// Overwrite stored values, as a store does when applying an update.
    /// Not tracked as a mutation.
    pub fn merge_fields(&mut self, fields: &Map<String, Value>) {
        for (name, value) in fields {
            self.fields.insert(name.clone(), value.clone());
        }
    }

    pub fn record_type(&self) -> &str {
        &self.record_type
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    pub fn schema(&self) -> Option<&RecordSchema> {
        self.schema.as_deref()
    }

    fn resolve_key<'a>(map: &'a Map<String, Value>, name: &str) -> Option<&'a str> {
        if let Some((key, _)) = map.get_key_value(name) {
            return Some(key.as_str());
        }
        map.keys()
            .find(|k| k.eq_ignore_ascii_case(name))
            .map(|k| k.as_str())
    }

    /// Resolve a dotted path. Missing segments and JSON null both read as absent.
    pub fn get(&self, path: &str) -> Option<Value> {
        let mut segments = path.split('.');
        let first = segments.next()?.trim();

        let mut current = match Self::resolve_key(&self.fields, first) {
            Some(key) => self.fields.get(key)?,
            None if first.eq_ignore_ascii_case("id") => return Some(Value::String(self.id.clone())),
            None => return None,
        };

        for segment in segments {
            let object = current.as_object()?;
            let key = Self::resolve_key(object, segment.trim())?;
            current = object.get(key)?;
        }

        if current.is_null() {
            None
        } else {
            Some(current.clone())
        }
    }

    /// Natural textual form of a field, or `None` when absent.
    pub fn text(&self, path: &str) -> Option<String> {
        self.get(path).and_then(|v| value_text(&v))
    }

    pub fn has_field(&self, name: &str) -> bool {
        self.schema().and_then(|s| s.descriptor(name)).is_some()
            || Self::resolve_key(&self.fields, name).is_some()
    }

    pub fn is_read_only(&self, name: &str) -> bool {
        name.eq_ignore_ascii_case("id")
            || self
                .schema()
                .and_then(|s| s.descriptor(name))
                .map(|d| d.read_only)
                .unwrap_or(false)
    }

    /// Declared kind from the schema, or one inferred from the current value.
    pub fn field_kind(&self, name: &str) -> Option<FieldKind> {
        if let Some(descriptor) = self.schema().and_then(|s| s.descriptor(name)) {
            return Some(descriptor.kind.clone());
        }

        let key = Self::resolve_key(&self.fields, name)?;
        Some(match self.fields.get(key)? {
            Value::Bool(_) => FieldKind::Boolean,
            Value::Number(n) if n.is_i64() || n.is_u64() => FieldKind::Integer,
            Value::Number(_) => FieldKind::Decimal,
            _ => FieldKind::String,
        })
    }

    /// Convert `literal` to the field's type and write it in place.
    pub fn set_literal(&mut self, name: &str, literal: &str) -> WorkflowResult<Value> {
        if self.is_read_only(name) {
            return Err(WorkflowError::configuration(format!(
                "field '{}' on {} is read-only",
                name, self.record_type
            )));
        }
        if !self.has_field(name) {
            return Err(WorkflowError::resolution(format!(
                "field '{}' does not exist on {}",
                name, self.record_type
            )));
        }

        let kind = self.field_kind(name).unwrap_or(FieldKind::String);
        let value = convert_literal(&kind, literal).map_err(|reason| {
            WorkflowError::configuration(format!("cannot set '{}': {}", name, reason))
        })?;

        let key = Self::resolve_key(&self.fields, name)
            .map(str::to_string)
            .or_else(|| {
                self.schema()
                    .and_then(|s| s.descriptor(name))
                    .map(|d| d.name.clone())
            })
            .unwrap_or_else(|| name.to_string());

        self.fields.insert(key.clone(), value.clone());
        self.dirty.insert(key);
        Ok(value)
    }

    /// Fields mutated since the record was loaded, with their current values.
    pub fn changes(&self) -> Map<String, Value> {
        self.dirty
            .iter()
            .filter_map(|k| self.fields.get(k).map(|v| (k.clone(), v.clone())))
            .collect()
    }

    pub fn is_dirty(&self) -> bool {
        !self.dirty.is_empty()
    }

    pub fn clear_changes(&mut self) {
        self.dirty.clear();
    }

    /// Serialized copy used for delayed re-invocation.
    pub fn snapshot(&self) -> WorkflowResult<Value> {
        Ok(serde_json::to_value(self)?)
    }

    pub fn from_snapshot(snapshot: Value) -> WorkflowResult<Self> {
        Ok(serde_json::from_value(snapshot)?)
    }

    /// Names among `fields` whose textual value differs from `prior`.
    pub fn changed_fields<'a>(&self, prior: &Record, fields: &'a [String]) -> Vec<&'a str> {
        fields
            .iter()
            .filter(|f| self.text(f) != prior.text(f))
            .map(|f| f.as_str())
            .collect()
    }
}

/// Textual form used for comparisons and placeholder substitution.
pub fn value_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => Some(n.to_string()),
        other => Some(other.to_string()),
    }
}

pub fn parse_timestamp(input: &str) -> Option<DateTime<Utc>> {
    let input = input.trim();
    if input.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(input) {
        return Some(dt.with_timezone(&Utc));
    }

    for format in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(input, format) {
            return Some(naive.and_utc());
        }
    }

    NaiveDate::parse_from_str(input, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

pub fn parse_decimal(input: &str) -> Option<Decimal> {
    let input = input.trim();
    Decimal::from_str(input)
        .or_else(|_| Decimal::from_scientific(input))
        .ok()
}

fn parse_bool(input: &str) -> Option<bool> {
    match input.trim().to_ascii_lowercase().as_str() {
        "true" | "yes" | "1" | "on" => Some(true),
        "false" | "no" | "0" | "off" => Some(false),
        _ => None,
    }
}

pub fn convert_literal(kind: &FieldKind, literal: &str) -> Result<Value, String> {
    match kind {
        FieldKind::String => Ok(Value::String(literal.to_string())),
        FieldKind::Integer => literal
            .trim()
            .parse::<i64>()
            .map(Value::from)
            .map_err(|_| format!("'{}' is not a valid integer", literal)),
        FieldKind::Decimal => parse_decimal(literal)
            .and_then(|d| d.to_f64())
            .and_then(Number::from_f64)
            .map(Value::Number)
            .ok_or_else(|| format!("'{}' is not a valid decimal", literal)),
        FieldKind::Boolean => parse_bool(literal)
            .map(Value::Bool)
            .ok_or_else(|| format!("'{}' is not a valid boolean", literal)),
        FieldKind::Timestamp => parse_timestamp(literal)
            .map(|dt| Value::String(dt.to_rfc3339()))
            .ok_or_else(|| format!("'{}' is not a valid timestamp", literal)),
        FieldKind::Identifier => {
            let trimmed = literal.trim();
            if trimmed.is_empty() {
                return Err("identifier cannot be empty".to_string());
            }
            Ok(Value::String(match Uuid::parse_str(trimmed) {
                Ok(uuid) => uuid.hyphenated().to_string(),
                Err(_) => trimmed.to_string(),
            }))
        }
        FieldKind::Enumeration(variants) => {
            let trimmed = literal.trim();
            if variants.is_empty() {
                return Ok(Value::String(trimmed.to_string()));
            }
            variants
                .iter()
                .find(|v| v.eq_ignore_ascii_case(trimmed))
                .map(|v| Value::String(v.clone()))
                .ok_or_else(|| format!("'{}' is not one of {}", literal, variants.join(", ")))
        }
    }
}
