// Workflow Conditions - Predicate evaluation over records and their prior state

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::cmp::Ordering;
use tracing::warn;

use super::record::{parse_decimal, parse_timestamp, value_text, Record};
pub use automation_shared::LogicMode;

/// Closed set of comparison operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ConditionOperator {
    // Equality
    Equals,
    NotEquals,

    // Text
    Contains,
    NotContains,
    StartsWith,
    EndsWith,

    // Ordering (numeric, then timestamp)
    GreaterThan,
    GreaterThanOrEqual,
    LessThan,
    LessThanOrEqual,

    // Nullness
    IsNull,
    IsNotNull,

    // Sets and ranges
    In,
    NotIn,
    Between,

    // Change detection against the prior snapshot
    Changed,
    ChangedTo,
    ChangedFrom,

    /// Anything not in the catalog; always evaluates false
    Unknown,
}

impl ConditionOperator {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Equals => "Equals",
            Self::NotEquals => "NotEquals",
            Self::Contains => "Contains",
            Self::NotContains => "NotContains",
            Self::StartsWith => "StartsWith",
            Self::EndsWith => "EndsWith",
            Self::GreaterThan => "GreaterThan",
            Self::GreaterThanOrEqual => "GreaterThanOrEqual",
            Self::LessThan => "LessThan",
            Self::LessThanOrEqual => "LessThanOrEqual",
            Self::IsNull => "IsNull",
            Self::IsNotNull => "IsNotNull",
            Self::In => "In",
            Self::NotIn => "NotIn",
            Self::Between => "Between",
            Self::Changed => "Changed",
            Self::ChangedTo => "ChangedTo",
            Self::ChangedFrom => "ChangedFrom",
            Self::Unknown => "Unknown",
        }
    }

    /// Operators that only make sense with a prior snapshot.
    pub fn needs_prior(&self) -> bool {
        matches!(self, Self::Changed | Self::ChangedTo | Self::ChangedFrom)
    }
}

impl From<String> for ConditionOperator {
    fn from(raw: String) -> Self {
        let normalized: String = raw
            .trim()
            .chars()
            .filter(|c| *c != '_' && *c != ' ')
            .collect::<String>()
            .to_ascii_lowercase();

        match normalized.as_str() {
            "equals" | "eq" | "==" => Self::Equals,
            "notequals" | "ne" | "!=" => Self::NotEquals,
            "contains" => Self::Contains,
            "notcontains" => Self::NotContains,
            "startswith" => Self::StartsWith,
            "endswith" => Self::EndsWith,
            "greaterthan" | "gt" | ">" => Self::GreaterThan,
            "greaterthanorequal" | "greaterthanorequals" | "gte" | ">=" => Self::GreaterThanOrEqual,
            "lessthan" | "lt" | "<" => Self::LessThan,
            "lessthanorequal" | "lessthanorequals" | "lte" | "<=" => Self::LessThanOrEqual,
            "isnull" => Self::IsNull,
            "isnotnull" => Self::IsNotNull,
            "in" => Self::In,
            "notin" => Self::NotIn,
            "between" => Self::Between,
            "changed" => Self::Changed,
            "changedto" => Self::ChangedTo,
            "changedfrom" => Self::ChangedFrom,
            _ => Self::Unknown,
        }
    }
}

impl From<ConditionOperator> for String {
    fn from(op: ConditionOperator) -> Self {
        op.as_str().to_string()
    }
}

/// A single condition to evaluate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    /// Field name to evaluate (supports dot notation for nested fields)
    #[serde(alias = "Field")]
    pub field: String,
    #[serde(alias = "Operator")]
    pub operator: ConditionOperator,
    /// String-encoded literal; parsing depends on the operator
    #[serde(default, alias = "Value", deserialize_with = "literal")]
    pub value: Option<String>,
}

fn literal<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        None | Some(Value::Null) => None,
        Some(Value::Array(items)) => Some(
            items
                .iter()
                .filter_map(value_text)
                .collect::<Vec<_>>()
                .join(","),
        ),
        Some(other) => value_text(&other),
    })
}

impl Condition {
    pub fn new(field: &str, operator: ConditionOperator, value: Option<&str>) -> Self {
        Self {
            field: field.to_string(),
            operator,
            value: value.map(str::to_string),
        }
    }

    pub fn equals(field: &str, value: &str) -> Self {
        Self::new(field, ConditionOperator::Equals, Some(value))
    }

    pub fn not_equals(field: &str, value: &str) -> Self {
        Self::new(field, ConditionOperator::NotEquals, Some(value))
    }

    pub fn contains(field: &str, value: &str) -> Self {
        Self::new(field, ConditionOperator::Contains, Some(value))
    }

    pub fn greater_than(field: &str, value: &str) -> Self {
        Self::new(field, ConditionOperator::GreaterThan, Some(value))
    }

    pub fn less_than(field: &str, value: &str) -> Self {
        Self::new(field, ConditionOperator::LessThan, Some(value))
    }

    pub fn is_null(field: &str) -> Self {
        Self::new(field, ConditionOperator::IsNull, None)
    }

    pub fn is_not_null(field: &str) -> Self {
        Self::new(field, ConditionOperator::IsNotNull, None)
    }

    pub fn in_list(field: &str, values: &[&str]) -> Self {
        Self::new(field, ConditionOperator::In, Some(&values.join(",")))
    }

    pub fn between(field: &str, min: &str, max: &str) -> Self {
        Self::new(field, ConditionOperator::Between, Some(&format!("{},{}", min, max)))
    }

    pub fn changed(field: &str) -> Self {
        Self::new(field, ConditionOperator::Changed, None)
    }

    pub fn changed_to(field: &str, value: &str) -> Self {
        Self::new(field, ConditionOperator::ChangedTo, Some(value))
    }

    pub fn changed_from(field: &str, value: &str) -> Self {
        Self::new(field, ConditionOperator::ChangedFrom, Some(value))
    }
}

/// Parse a stored condition list. Anything unparsable becomes an empty list,
/// which always matches.
pub fn parse_conditions(raw: &Value) -> Vec<Condition> {
    match raw {
        Value::Null => Vec::new(),
        Value::String(s) if s.trim().is_empty() => Vec::new(),
        Value::String(s) => match serde_json::from_str::<Value>(s) {
            Ok(inner) if !inner.is_string() => parse_conditions(&inner),
            _ => {
                warn!("Ignoring unparsable condition list: {}", s);
                Vec::new()
            }
        },
        other => match serde_json::from_value::<Vec<Condition>>(other.clone()) {
            Ok(conditions) => conditions,
            Err(e) => {
                warn!("Ignoring unparsable condition list ({}): {}", e, other);
                Vec::new()
            }
        },
    }
}

/// Serde adapter for stored rules: malformed lists become empty instead of
/// failing the whole workflow definition.
pub fn deserialize_conditions<'de, D>(deserializer: D) -> Result<Vec<Condition>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Value::deserialize(deserializer)?;
    Ok(parse_conditions(&raw))
}

/// Pure predicate over a record and, for change detection, its prior version.
pub struct ConditionEvaluator;

impl ConditionEvaluator {
    pub fn evaluate(
        conditions: &[Condition],
        logic: LogicMode,
        record: &Record,
        prior: Option<&Record>,
    ) -> bool {
        if conditions.is_empty() {
            return true;
        }

        let mut results = conditions
            .iter()
            .map(|c| Self::evaluate_condition(c, record, prior));

        match logic {
            LogicMode::All => results.all(|r| r),
            LogicMode::Any => results.any(|r| r),
        }
    }

    /// Evaluate a serialized condition list as stored on a rule.
    pub fn evaluate_serialized(
        raw: &str,
        logic: LogicMode,
        record: &Record,
        prior: Option<&Record>,
    ) -> bool {
        let conditions = parse_conditions(&Value::String(raw.to_string()));
        Self::evaluate(&conditions, logic, record, prior)
    }

    pub fn evaluate_condition(condition: &Condition, record: &Record, prior: Option<&Record>) -> bool {
        let actual = record.text(&condition.field);
        let literal = condition.value.as_deref();

        match condition.operator {
            ConditionOperator::Equals => text_equals(actual.as_deref(), literal),
            ConditionOperator::NotEquals => !text_equals(actual.as_deref(), literal),

            ConditionOperator::Contains => {
                text_test(actual.as_deref(), literal, |a, l| a.contains(l))
            }
            ConditionOperator::NotContains => {
                text_test(actual.as_deref(), literal, |a, l| !a.contains(l))
            }
            ConditionOperator::StartsWith => {
                text_test(actual.as_deref(), literal, |a, l| a.starts_with(l))
            }
            ConditionOperator::EndsWith => {
                text_test(actual.as_deref(), literal, |a, l| a.ends_with(l))
            }

            ConditionOperator::GreaterThan => {
                compare(actual.as_deref(), literal) == Some(Ordering::Greater)
            }
            ConditionOperator::GreaterThanOrEqual => matches!(
                compare(actual.as_deref(), literal),
                Some(Ordering::Greater | Ordering::Equal)
            ),
            ConditionOperator::LessThan => compare(actual.as_deref(), literal) == Some(Ordering::Less),
            ConditionOperator::LessThanOrEqual => matches!(
                compare(actual.as_deref(), literal),
                Some(Ordering::Less | Ordering::Equal)
            ),

            ConditionOperator::IsNull => actual.is_none(),
            ConditionOperator::IsNotNull => actual.is_some(),

            ConditionOperator::In => match (actual.as_deref(), literal) {
                (Some(a), Some(l)) => list_contains(l, a),
                _ => false,
            },
            ConditionOperator::NotIn => match (actual.as_deref(), literal) {
                (Some(a), Some(l)) => !list_contains(l, a),
                _ => true,
            },
            ConditionOperator::Between => between(actual.as_deref(), literal).unwrap_or(false),

            ConditionOperator::Changed => prior
                .map(|p| p.text(&condition.field) != actual)
                .unwrap_or(false),
            ConditionOperator::ChangedTo => prior
                .map(|p| {
                    p.text(&condition.field) != actual
                        && literal.is_some()
                        && text_equals(actual.as_deref(), literal)
                })
                .unwrap_or(false),
            ConditionOperator::ChangedFrom => prior
                .map(|p| {
                    let before = p.text(&condition.field);
                    before != actual && literal.is_some() && text_equals(before.as_deref(), literal)
                })
                .unwrap_or(false),

            ConditionOperator::Unknown => false,
        }
    }
}

/// Case-insensitive equality; an absent value only equals an empty literal.
fn text_equals(actual: Option<&str>, literal: Option<&str>) -> bool {
    match (actual, literal) {
        (Some(a), Some(l)) => a.to_lowercase() == l.to_lowercase(),
        (None, Some(l)) => l.is_empty(),
        (Some(a), None) => a.is_empty(),
        (None, None) => true,
    }
}

fn text_test(actual: Option<&str>, literal: Option<&str>, test: impl Fn(&str, &str) -> bool) -> bool {
    match (actual, literal) {
        (Some(a), Some(l)) => test(&a.to_lowercase(), &l.to_lowercase()),
        _ => false,
    }
}

fn compare(actual: Option<&str>, literal: Option<&str>) -> Option<Ordering> {
    let (actual, literal) = (actual?, literal?);

    if let (Some(a), Some(l)) = (parse_decimal(actual), parse_decimal(literal)) {
        return Some(a.cmp(&l));
    }

    match (parse_timestamp(actual), parse_timestamp(literal)) {
        (Some(a), Some(l)) => Some(a.cmp(&l)),
        _ => None,
    }
}

fn list_contains(list: &str, value: &str) -> bool {
    let value = value.trim().to_lowercase();
    list.split(',')
        .map(|item| item.trim().to_lowercase())
        .any(|item| item == value)
}

fn between(actual: Option<&str>, literal: Option<&str>) -> Option<bool> {
    let (min, max) = literal?.split_once(',')?;
    let value = parse_decimal(actual?)?;
    let (min, max) = (parse_decimal(min)?, parse_decimal(max)?);
    Some(value >= min && value <= max)
}
