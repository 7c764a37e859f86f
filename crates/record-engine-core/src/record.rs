use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use ulid::Ulid;

use crate::schema::FieldDef;
use crate::EngineError;

pub const DEFAULT_DESCRIPTION: &str = "Default Description";

/// Store-assigned primary key. `0` means the record has not been inserted yet.
#[derive(
    Debug, Clone, Copy, Default, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash,
)]
#[serde(transparent)]
pub struct RecordId(pub i64);

impl RecordId {
    pub const UNASSIGNED: Self = Self(0);

    #[must_use]
    pub fn is_assigned(self) -> bool {
        self.0 > 0
    }
}

impl Display for RecordId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One field value as the engine sees it, independent of the owning record type.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum FieldValue {
    Null,
    Integer(i64),
    Number(f64),
    Text(String),
    Bool(bool),
    Enum(String),
}

impl FieldValue {
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Display-string form used by string filters and the CSV codec. Null renders empty.
    #[must_use]
    pub fn display_string(&self) -> String {
        match self {
            Self::Null => String::new(),
            Self::Integer(value) => value.to_string(),
            Self::Number(value) => value.to_string(),
            Self::Text(value) | Self::Enum(value) => value.clone(),
            Self::Bool(value) => value.to_string(),
        }
    }

    /// Numeric coercion used by range filters; `None` when the value is absent or not numeric.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Integer(value) => Some(*value as f64),
            Self::Number(value) => Some(*value),
            Self::Bool(value) => Some(if *value { 1.0 } else { 0.0 }),
            Self::Text(value) => value.trim().parse::<f64>().ok(),
            Self::Null | Self::Enum(_) => None,
        }
    }

    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(value) | Self::Enum(value) => Some(value),
            _ => None,
        }
    }

    /// A positive integer read as a record reference.
    #[must_use]
    pub fn as_record_id(&self) -> Option<RecordId> {
        match self {
            Self::Integer(value) if *value > 0 => Some(RecordId(*value)),
            _ => None,
        }
    }

    /// # Errors
    /// Returns [`EngineError::Coercion`] when the value is not text.
    pub fn into_text(self, field: &str) -> Result<String, EngineError> {
        match self {
            Self::Null => Ok(String::new()),
            Self::Text(value) => Ok(value),
            other => Err(mismatch(field, "text", &other)),
        }
    }

    /// # Errors
    /// Returns [`EngineError::Coercion`] when the value is not numeric.
    #[allow(clippy::cast_precision_loss)]
    pub fn into_number(self, field: &str) -> Result<f64, EngineError> {
        match self {
            Self::Null => Ok(0.0),
            Self::Number(value) => Ok(value),
            Self::Integer(value) => Ok(value as f64),
            other => Err(mismatch(field, "number", &other)),
        }
    }

    /// # Errors
    /// Returns [`EngineError::Coercion`] when the value is not a boolean.
    pub fn into_bool(self, field: &str) -> Result<bool, EngineError> {
        match self {
            Self::Null => Ok(false),
            Self::Bool(value) => Ok(value),
            other => Err(mismatch(field, "boolean", &other)),
        }
    }

    /// # Errors
    /// Returns [`EngineError::Coercion`] when the value is not an integer.
    pub fn into_integer(self, field: &str) -> Result<i64, EngineError> {
        match self {
            Self::Null => Ok(0),
            Self::Integer(value) => Ok(value),
            other => Err(mismatch(field, "integer", &other)),
        }
    }

    /// Reads a foreign-reference slot: null or a non-positive id means "unset".
    ///
    /// # Errors
    /// Returns [`EngineError::Coercion`] when the value is not an integer.
    pub fn into_reference(self, field: &str) -> Result<Option<RecordId>, EngineError> {
        let raw = self.into_integer(field)?;
        Ok((raw > 0).then_some(RecordId(raw)))
    }

    /// # Errors
    /// Returns [`EngineError::Coercion`] when the value is not an enumeration member name.
    pub fn into_enum(self, field: &str) -> Result<String, EngineError> {
        match self {
            Self::Enum(value) => Ok(value),
            other => Err(mismatch(field, "enumeration", &other)),
        }
    }

    fn kind_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Integer(_) => "integer",
            Self::Number(_) => "number",
            Self::Text(_) => "text",
            Self::Bool(_) => "boolean",
            Self::Enum(_) => "enumeration",
        }
    }
}

impl From<Option<RecordId>> for FieldValue {
    fn from(value: Option<RecordId>) -> Self {
        value.map_or(Self::Null, |id| Self::Integer(id.0))
    }
}

fn mismatch(field: &str, expected: &str, got: &FieldValue) -> EngineError {
    EngineError::coercion(field, format!("expected {expected}, got {}", got.kind_name()))
}

pub(crate) fn now_rfc3339() -> String {
    OffsetDateTime::now_utc().format(&Rfc3339).unwrap_or_default()
}

/// Columns every record type carries.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct RecordBase {
    pub id: RecordId,
    pub name: String,
    pub description: String,
    pub created_at: String,
}

impl Default for RecordBase {
    fn default() -> Self {
        Self {
            id: RecordId::UNASSIGNED,
            name: Ulid::new().to_string(),
            description: DEFAULT_DESCRIPTION.to_string(),
            created_at: now_rfc3339(),
        }
    }
}

/// Field definitions for the [`RecordBase`] columns, in declaration order.
#[must_use]
pub fn base_field_defs() -> Vec<FieldDef> {
    vec![
        FieldDef::integer("Id").primary_key(),
        FieldDef::text("Name"),
        FieldDef::text("Description"),
        FieldDef::text("CreatedAt").frozen(),
    ]
}

/// What a lookup hands back for a related record: enough to display and re-link it.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct RecordSummary {
    pub id: RecordId,
    pub name: String,
    pub description: String,
    pub created_at: String,
}

/// Capability bound for every record type the engine manages.
///
/// Implementors register their own columns through [`Record::own_field_defs`]
/// and expose them by name; the base columns (`Id`, `Name`, `Description`,
/// `CreatedAt`) are handled by the provided methods.
pub trait Record: Clone + Default + Send + Sync + 'static {
    const TYPE_NAME: &'static str;

    fn own_field_defs() -> Vec<FieldDef>;

    fn base(&self) -> &RecordBase;

    fn base_mut(&mut self) -> &mut RecordBase;

    /// Read one of this type's own fields. `None` for names it does not declare.
    fn get_field(&self, field: &str) -> Option<FieldValue>;

    /// Assign one of this type's own fields.
    ///
    /// # Errors
    /// Returns [`EngineError::Schema`] for an undeclared field and
    /// [`EngineError::Coercion`] when the value does not fit the field.
    fn set_field(&mut self, field: &str, value: FieldValue) -> Result<(), EngineError>;

    /// Base columns followed by the type's own columns.
    #[must_use]
    fn field_defs() -> Vec<FieldDef> {
        let mut defs = base_field_defs();
        defs.extend(Self::own_field_defs());
        defs
    }

    fn id(&self) -> RecordId {
        self.base().id
    }

    fn name(&self) -> &str {
        &self.base().name
    }

    fn description(&self) -> &str {
        &self.base().description
    }

    fn created_at(&self) -> &str {
        &self.base().created_at
    }

    fn get(&self, field: &str) -> Option<FieldValue> {
        let base = self.base();
        match field {
            "Id" => Some(FieldValue::Integer(base.id.0)),
            "Name" => Some(FieldValue::Text(base.name.clone())),
            "Description" => Some(FieldValue::Text(base.description.clone())),
            "CreatedAt" => Some(FieldValue::Text(base.created_at.clone())),
            other => self.get_field(other),
        }
    }

    /// # Errors
    /// See [`Record::set_field`].
    fn set(&mut self, field: &str, value: FieldValue) -> Result<(), EngineError> {
        match field {
            "Id" => self.base_mut().id = RecordId(value.into_integer(field)?),
            "Name" => self.base_mut().name = value.into_text(field)?,
            "Description" => self.base_mut().description = value.into_text(field)?,
            "CreatedAt" => self.base_mut().created_at = value.into_text(field)?,
            other => self.set_field(other, value)?,
        }
        Ok(())
    }

    /// Persistable snapshot keyed by field name. Read-only fields are not stored.
    fn to_row(&self) -> BTreeMap<String, FieldValue> {
        Self::field_defs()
            .into_iter()
            .filter(|def| def.writable)
            .map(|def| {
                let value = self.get(&def.name).unwrap_or(FieldValue::Null);
                (def.name, value)
            })
            .collect()
    }

    /// Rebuild a record from a [`Record::to_row`] snapshot; missing columns keep their defaults.
    ///
    /// # Errors
    /// Propagates [`Record::set`] failures.
    fn from_row(row: &BTreeMap<String, FieldValue>) -> Result<Self, EngineError> {
        let mut record = Self::default();
        for def in Self::field_defs().into_iter().filter(|def| def.writable) {
            if let Some(value) = row.get(&def.name) {
                record.set(&def.name, value.clone())?;
            }
        }
        Ok(record)
    }

    fn summary(&self) -> RecordSummary {
        let base = self.base();
        RecordSummary {
            id: base.id,
            name: base.name.clone(),
            description: base.description.clone(),
            created_at: base.created_at.clone(),
        }
    }
}
