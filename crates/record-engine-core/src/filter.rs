use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::record::{FieldValue, Record};
use crate::schema::{FieldDescriptor, Schema, ValueKind};

/// Tolerance used when a free-text search is compared against a number field.
const SEARCH_EPSILON: f64 = 1e-4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StringMode {
    Contains,
    Equals,
    StartsWith,
    EndsWith,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Logic {
    And,
    Or,
}

/// Strict comparison against a numeric operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompareOp {
    Greater,
    Less,
}

/// A composable filter over a single candidate value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FilterExpression {
    Text { mode: StringMode, value: String },
    NumberRange { min: Option<f64>, max: Option<f64> },
    Compare { op: CompareOp, operand: f64 },
    Enumeration { selected: Vec<FieldValue> },
    Boolean { expected: bool },
    Group { logic: Logic, children: Vec<FilterExpression> },
}

impl FilterExpression {
    #[must_use]
    pub fn text(mode: StringMode, value: impl Into<String>) -> Self {
        Self::Text { mode, value: value.into() }
    }

    #[must_use]
    pub fn range(min: Option<f64>, max: Option<f64>) -> Self {
        Self::NumberRange { min, max }
    }

    #[must_use]
    pub fn all(children: Vec<Self>) -> Self {
        Self::Group { logic: Logic::And, children }
    }

    #[must_use]
    pub fn any(children: Vec<Self>) -> Self {
        Self::Group { logic: Logic::Or, children }
    }

    /// Evaluate against one candidate value. An empty AND group accepts
    /// everything; an empty OR group accepts nothing.
    #[must_use]
    pub fn check(&self, value: &FieldValue) -> bool {
        match self {
            Self::Text { mode, value: needle } => {
                let haystack = value.display_string().to_lowercase();
                let needle = needle.to_lowercase();
                match mode {
                    StringMode::Contains => haystack.contains(&needle),
                    StringMode::Equals => haystack == needle,
                    StringMode::StartsWith => haystack.starts_with(&needle),
                    StringMode::EndsWith => haystack.ends_with(&needle),
                }
            }
            Self::NumberRange { min, max } => value.as_f64().is_some_and(|number| {
                min.map_or(true, |min| number >= min) && max.map_or(true, |max| number <= max)
            }),
            Self::Compare { op, operand } => value.as_f64().is_some_and(|number| match op {
                CompareOp::Greater => number > *operand,
                CompareOp::Less => number < *operand,
            }),
            Self::Enumeration { selected } => selected.contains(value),
            Self::Boolean { expected } => matches!(value, FieldValue::Bool(actual) if actual == expected),
            Self::Group { logic: Logic::And, children } => {
                children.iter().all(|child| child.check(value))
            }
            Self::Group { logic: Logic::Or, children } => {
                children.iter().any(|child| child.check(value))
            }
        }
    }
}

/// Binds an expression to the named field of a record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldFilter {
    pub field: String,
    pub expression: FilterExpression,
}

impl FieldFilter {
    pub fn matches<R: Record>(&self, record: &R) -> bool {
        let value = record.get(&self.field).unwrap_or(FieldValue::Null);
        self.expression.check(&value)
    }
}

/// Conjunction of field filters. An empty predicate accepts every record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecordPredicate {
    filters: Vec<FieldFilter>,
}

impl RecordPredicate {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn and_field(mut self, field: impl Into<String>, expression: FilterExpression) -> Self {
        self.filters.push(FieldFilter { field: field.into(), expression });
        self
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }

    #[must_use]
    pub fn filters(&self) -> &[FieldFilter] {
        &self.filters
    }

    pub fn matches<R: Record>(&self, record: &R) -> bool {
        self.filters.iter().all(|filter| filter.matches(record))
    }

    #[must_use]
    pub fn filter<R: Record>(&self, records: Vec<R>) -> Vec<R> {
        if self.is_empty() {
            return records;
        }
        records.into_iter().filter(|record| self.matches(record)).collect()
    }

    /// Compile editor rows into a predicate. Rows naming an unknown field,
    /// an operator the field kind does not support, or an unparsable value
    /// are dropped.
    #[must_use]
    pub fn from_rows(schema: &Schema, rows: &[FilterRow]) -> Self {
        let mut predicate = Self::new();
        for row in rows {
            let compiled = schema
                .get(row.field.trim())
                .and_then(|descriptor| row_expression(descriptor, row.op, row.value.trim()));
            match compiled {
                Some(expression) => {
                    predicate = predicate.and_field(row.field.trim(), expression);
                }
                None => debug!(field = %row.field, op = row.op.as_str(), "filter row dropped"),
            }
        }
        predicate
    }
}

/// Operators offered by the filter editor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterOp {
    Equal,
    Greater,
    Less,
    Not,
    Contains,
}

impl FilterOp {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Equal => "=",
            Self::Greater => ">",
            Self::Less => "<",
            Self::Not => "!",
            Self::Contains => "contains",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim() {
            "=" => Some(Self::Equal),
            ">" => Some(Self::Greater),
            "<" => Some(Self::Less),
            "!" => Some(Self::Not),
            op if op.eq_ignore_ascii_case("contains") => Some(Self::Contains),
            _ => None,
        }
    }
}

/// One row of the filter editor: field, operator, raw value text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterRow {
    pub field: String,
    pub op: FilterOp,
    pub value: String,
}

impl FilterRow {
    #[must_use]
    pub fn new(field: impl Into<String>, op: FilterOp, value: impl Into<String>) -> Self {
        Self { field: field.into(), op, value: value.into() }
    }

    /// Parses `Field<op>Value`, e.g. `Price>5`, `InStock!true` or `Name~widget`
    /// (`~` standing in for `contains`).
    #[must_use]
    pub fn parse(input: &str) -> Option<Self> {
        let (at, symbol) = input.char_indices().find(|(_, ch)| matches!(ch, '=' | '>' | '<' | '!' | '~'))?;
        let op = match symbol {
            '=' => FilterOp::Equal,
            '>' => FilterOp::Greater,
            '<' => FilterOp::Less,
            '!' => FilterOp::Not,
            _ => FilterOp::Contains,
        };
        let field = input[..at].trim();
        if field.is_empty() {
            return None;
        }
        Some(Self::new(field, op, input[at + symbol.len_utf8()..].trim()))
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    if value.eq_ignore_ascii_case("true") {
        Some(true)
    } else if value.eq_ignore_ascii_case("false") {
        Some(false)
    } else {
        None
    }
}

fn numeric_expression(op: FilterOp, operand: f64) -> Option<FilterExpression> {
    match op {
        FilterOp::Equal => Some(FilterExpression::range(Some(operand), Some(operand))),
        FilterOp::Greater => Some(FilterExpression::Compare { op: CompareOp::Greater, operand }),
        FilterOp::Less => Some(FilterExpression::Compare { op: CompareOp::Less, operand }),
        FilterOp::Not | FilterOp::Contains => None,
    }
}

#[allow(clippy::cast_precision_loss)]
fn row_expression(descriptor: &FieldDescriptor, op: FilterOp, value: &str) -> Option<FilterExpression> {
    match &descriptor.kind {
        ValueKind::Text
        | ValueKind::FrozenText
        | ValueKind::FileReference
        | ValueKind::ManyToManyReference { .. } => match op {
            FilterOp::Contains => Some(FilterExpression::text(StringMode::Contains, value)),
            FilterOp::Equal => Some(FilterExpression::text(StringMode::Equals, value)),
            _ => None,
        },
        ValueKind::Number => numeric_expression(op, value.parse::<f64>().ok()?),
        ValueKind::Identifier | ValueKind::ForeignReference { .. } => {
            numeric_expression(op, value.parse::<i64>().ok()? as f64)
        }
        ValueKind::Boolean => {
            let expected = parse_bool(value)?;
            match op {
                FilterOp::Equal => Some(FilterExpression::Boolean { expected }),
                FilterOp::Not => Some(FilterExpression::Boolean { expected: !expected }),
                _ => None,
            }
        }
        ValueKind::Enumeration { options } => match op {
            FilterOp::Equal if options.iter().any(|option| option == value) => {
                Some(FilterExpression::Enumeration { selected: vec![FieldValue::Enum(value.to_string())] })
            }
            _ => None,
        },
        ValueKind::Unclassified => None,
    }
}

/// Expression a free-text search term applies to one field, if the field
/// kind can interpret the term at all.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn search_expression(descriptor: &FieldDescriptor, term: &str) -> Option<FilterExpression> {
    let term = term.trim();
    if term.is_empty() {
        return None;
    }
    match &descriptor.kind {
        ValueKind::Text | ValueKind::FrozenText | ValueKind::FileReference => {
            Some(FilterExpression::text(StringMode::Contains, term))
        }
        ValueKind::Number => {
            let target = term.parse::<f64>().ok()?;
            Some(FilterExpression::range(Some(target - SEARCH_EPSILON), Some(target + SEARCH_EPSILON)))
        }
        ValueKind::Boolean => parse_bool(term).map(|expected| FilterExpression::Boolean { expected }),
        ValueKind::Enumeration { options } => options
            .iter()
            .any(|option| option == term)
            .then(|| FilterExpression::Enumeration { selected: vec![FieldValue::Enum(term.to_string())] }),
        ValueKind::Identifier | ValueKind::ForeignReference { .. } => {
            let id = term.parse::<i64>().ok()? as f64;
            Some(FilterExpression::range(Some(id), Some(id)))
        }
        ValueKind::ManyToManyReference { .. } | ValueKind::Unclassified => None,
    }
}
