use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use crate::record::{FieldValue, Record};
use crate::schema::{FieldDescriptor, Schema};
use crate::EngineError;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortDirection {
    #[default]
    Ascending,
    Descending,
}

impl SortDirection {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ascending => "asc",
            Self::Descending => "desc",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        let value = value.trim();
        if value.eq_ignore_ascii_case("asc") || value.eq_ignore_ascii_case("ascending") {
            Some(Self::Ascending)
        } else if value.eq_ignore_ascii_case("desc") || value.eq_ignore_ascii_case("descending") {
            Some(Self::Descending)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortKey {
    pub field: String,
    pub direction: SortDirection,
}

impl SortKey {
    #[must_use]
    pub fn new(field: impl Into<String>, direction: SortDirection) -> Self {
        Self { field: field.into(), direction }
    }

    /// Parses `Field` or `Field:asc|desc`.
    #[must_use]
    pub fn parse(input: &str) -> Option<Self> {
        let (field, direction) = match input.split_once(':') {
            Some((field, direction)) => (field.trim(), SortDirection::parse(direction)?),
            None => (input.trim(), SortDirection::Ascending),
        };
        (!field.is_empty()).then(|| Self::new(field, direction))
    }
}

#[derive(Debug, Clone, PartialEq)]
struct ResolvedKey {
    descriptor: FieldDescriptor,
    direction: SortDirection,
}

/// Ordered list of sort keys, validated against a schema.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SortSpec {
    keys: Vec<ResolvedKey>,
}

impl SortSpec {
    /// The empty spec: leaves input order untouched.
    #[must_use]
    pub fn identity() -> Self {
        Self::default()
    }

    /// # Errors
    /// Returns [`EngineError::Schema`] when a key names a field the schema lacks.
    pub fn new(schema: &Schema, keys: &[SortKey]) -> Result<Self, EngineError> {
        let keys = keys
            .iter()
            .map(|key| {
                Ok(ResolvedKey { descriptor: schema.field(&key.field)?.clone(), direction: key.direction })
            })
            .collect::<Result<Vec<_>, EngineError>>()?;
        Ok(Self { keys })
    }

    #[must_use]
    pub fn is_identity(&self) -> bool {
        self.keys.is_empty()
    }

    /// Lexicographic comparison over the keys; the first non-equal key decides.
    pub fn compare<R: Record>(&self, left: &R, right: &R) -> Ordering {
        for key in &self.keys {
            let name = key.descriptor.name.as_str();
            let a = left.get(name).unwrap_or(FieldValue::Null);
            let b = right.get(name).unwrap_or(FieldValue::Null);
            let ordering = compare_values(&key.descriptor, &a, &b);
            let ordering = match key.direction {
                SortDirection::Ascending => ordering,
                SortDirection::Descending => ordering.reverse(),
            };
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        Ordering::Equal
    }

    /// Stable sort; records equal on every key keep their relative order.
    #[must_use]
    pub fn apply<R: Record>(&self, mut records: Vec<R>) -> Vec<R> {
        if !self.is_identity() {
            records.sort_by(|left, right| self.compare(left, right));
        }
        records
    }
}

fn rank(value: &FieldValue) -> u8 {
    match value {
        FieldValue::Null => 0,
        FieldValue::Bool(_) => 1,
        FieldValue::Integer(_) | FieldValue::Number(_) => 2,
        FieldValue::Text(_) => 3,
        FieldValue::Enum(_) => 4,
    }
}

/// Natural ordering: nulls first, numbers numerically, enumeration members
/// by declaration order, text by code point.
fn compare_values(descriptor: &FieldDescriptor, left: &FieldValue, right: &FieldValue) -> Ordering {
    match (left, right) {
        (FieldValue::Bool(a), FieldValue::Bool(b)) => a.cmp(b),
        (FieldValue::Integer(a), FieldValue::Integer(b)) => a.cmp(b),
        (FieldValue::Integer(_) | FieldValue::Number(_), FieldValue::Integer(_) | FieldValue::Number(_)) => {
            let a = left.as_f64().unwrap_or_default();
            let b = right.as_f64().unwrap_or_default();
            a.total_cmp(&b)
        }
        (FieldValue::Text(a), FieldValue::Text(b)) => a.cmp(b),
        (FieldValue::Enum(a), FieldValue::Enum(b)) => {
            let options = descriptor.enum_options();
            let position = |name: &str| options.iter().position(|option| option == name).unwrap_or(options.len());
            position(a).cmp(&position(b)).then_with(|| a.cmp(b))
        }
        _ => rank(left).cmp(&rank(right)),
    }
}
