use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::filter::RecordPredicate;
use crate::record::{now_rfc3339, FieldValue, Record, RecordId, RecordSummary};
use crate::relation::{encode_many_to_many, Lookup, RelationshipResolver};
use crate::schema::{FieldDescriptor, Schema, SchemaRegistry, ValueKind};
use crate::sort::SortSpec;
use crate::EngineError;

pub const UNKNOWN_ACTOR: &str = "Unknown";

/// One line of the mutation audit trail.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AuditEntry {
    pub actor: String,
    pub action: String,
    pub record_type: String,
    pub recorded_at: String,
}

impl AuditEntry {
    #[must_use]
    pub fn new(actor: Option<&str>, action: impl Into<String>, record_type: impl Into<String>) -> Self {
        Self {
            actor: actor.filter(|actor| !actor.trim().is_empty()).unwrap_or(UNKNOWN_ACTOR).to_string(),
            action: action.into(),
            record_type: record_type.into(),
            recorded_at: now_rfc3339(),
        }
    }

    /// Human-readable line, e.g. `alice - Save Widget`.
    #[must_use]
    pub fn summary(&self) -> String {
        format!("{} - {}", self.actor, self.action)
    }
}

/// Persistence capability the engine mutates through.
///
/// Methods take `&self`; implementations own their interior synchronization.
pub trait DataStore {
    /// # Errors
    /// Returns [`EngineError::Store`] on backend failure.
    fn scan<R: Record>(&self) -> Result<Vec<R>, EngineError>;

    /// Persist a new record and write the assigned id back into it.
    ///
    /// # Errors
    /// Returns [`EngineError::Store`] on backend failure.
    fn insert<R: Record>(&self, record: &mut R) -> Result<(), EngineError>;

    /// # Errors
    /// Returns [`EngineError::Store`] when the record is missing or the backend fails.
    fn update<R: Record>(&self, record: &R) -> Result<(), EngineError>;

    /// Removing a record that is already gone is not an error.
    ///
    /// # Errors
    /// Returns [`EngineError::Store`] on backend failure.
    fn delete<R: Record>(&self, record: &R) -> Result<(), EngineError>;

    /// # Errors
    /// Returns [`EngineError::Store`] on backend failure.
    fn delete_all<R: Record>(&self) -> Result<(), EngineError>;

    /// # Errors
    /// Returns [`EngineError::Store`] on backend failure.
    fn insert_audit(&self, entry: &AuditEntry) -> Result<(), EngineError>;

    /// Audit entries, oldest first.
    ///
    /// # Errors
    /// Returns [`EngineError::Store`] on backend failure.
    fn audit_entries(&self) -> Result<Vec<AuditEntry>, EngineError>;

    /// Run `work` as one unit: when it fails, none of its writes survive.
    ///
    /// # Errors
    /// Propagates the error from `work` or from the backend.
    fn atomic<T, F>(&self, work: F) -> Result<T, EngineError>
    where
        F: FnOnce() -> Result<T, EngineError>,
    {
        work()
    }
}

/// A pending edit as collected from a form widget.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum EditValue {
    Text(String),
    Bool(bool),
    Enum(String),
    Foreign(Option<RecordSummary>),
    ManyToMany(Vec<RecordSummary>),
}

impl EditValue {
    fn kind_name(&self) -> &'static str {
        match self {
            Self::Text(_) => "text",
            Self::Bool(_) => "boolean",
            Self::Enum(_) => "enumeration",
            Self::Foreign(_) => "foreign reference",
            Self::ManyToMany(_) => "many-to-many",
        }
    }
}

/// Pending edits keyed by field name.
pub type EditSet = BTreeMap<String, EditValue>;

/// Audited create/update/delete/duplicate/clear and queries over any record type.
pub struct RecordEngine<'a, S: DataStore, L: Lookup + ?Sized> {
    store: &'a S,
    lookup: &'a L,
    actor: Option<String>,
    schemas: SchemaRegistry,
}

impl<'a, S: DataStore, L: Lookup + ?Sized> RecordEngine<'a, S, L> {
    #[must_use]
    pub fn new(store: &'a S, lookup: &'a L) -> Self {
        Self { store, lookup, actor: None, schemas: SchemaRegistry::new() }
    }

    #[must_use]
    pub fn with_actor(mut self, actor: impl Into<String>) -> Self {
        self.actor = Some(actor.into());
        self
    }

    #[must_use]
    pub fn actor(&self) -> &str {
        self.actor.as_deref().filter(|actor| !actor.trim().is_empty()).unwrap_or(UNKNOWN_ACTOR)
    }

    #[must_use]
    pub fn store(&self) -> &'a S {
        self.store
    }

    #[must_use]
    pub fn lookup(&self) -> &'a L {
        self.lookup
    }

    pub fn schema<R: Record>(&self) -> Arc<Schema> {
        self.schemas.schema_for::<R>()
    }

    #[must_use]
    pub fn resolver(&self) -> RelationshipResolver<'a, L> {
        RelationshipResolver::new(self.lookup)
    }

    /// Insert a default-constructed record and audit `Add <name>`.
    ///
    /// # Errors
    /// Store failures; nothing is kept when the audit write fails.
    pub fn create<R: Record>(&self) -> Result<R, EngineError> {
        let mut record = R::default();
        self.store.atomic(|| {
            self.store.insert(&mut record)?;
            self.audit::<R>(format!("Add {}", record.name()))
        })?;
        info!(record_type = R::TYPE_NAME, id = record.id().0, "record created");
        Ok(record)
    }

    /// [`Self::create`] followed by [`Self::update`] with `edits`, as one unit:
    /// a rejected edit leaves neither the record nor its audit entries behind.
    ///
    /// # Errors
    /// Any error from the create or the update.
    pub fn create_with<R: Record>(&self, edits: &EditSet) -> Result<R, EngineError> {
        self.store.atomic(|| {
            let mut record = self.create::<R>()?;
            if !edits.is_empty() {
                self.update(&mut record, edits)?;
            }
            Ok(record)
        })
    }

    /// Apply `edits` and persist, auditing `Save <name>`.
    ///
    /// Identifier, frozen, read-only and unclassified fields in the set are
    /// ignored. On any error the record and the store are left unchanged.
    ///
    /// # Errors
    /// [`EngineError::Schema`] for an undeclared field, [`EngineError::Coercion`]
    /// for a value that does not fit its field, and store failures.
    pub fn update<R: Record>(&self, record: &mut R, edits: &EditSet) -> Result<(), EngineError> {
        let schema = self.schema::<R>();
        let mut staged = record.clone();
        for (name, edit) in edits {
            let descriptor = schema.field(name)?;
            if descriptor.identifier || descriptor.frozen || !descriptor.writable {
                debug!(record_type = R::TYPE_NAME, field = %name, "edit to locked field ignored");
                continue;
            }
            if let Some(value) = coerce_edit(descriptor, edit)? {
                staged.set(name, value)?;
            }
        }

        self.store.atomic(|| {
            self.store.update(&staged)?;
            self.audit::<R>(format!("Save {}", staged.name()))
        })?;
        info!(record_type = R::TYPE_NAME, id = staged.id().0, fields = edits.len(), "record saved");
        *record = staged;
        Ok(())
    }

    /// Remove one record and audit `Delete <name>`.
    ///
    /// # Errors
    /// Store failures.
    pub fn delete<R: Record>(&self, record: &R) -> Result<(), EngineError> {
        self.store.atomic(|| {
            self.store.delete(record)?;
            self.audit::<R>(format!("Delete {}", record.name()))
        })?;
        info!(record_type = R::TYPE_NAME, id = record.id().0, "record deleted");
        Ok(())
    }

    /// Remove every record of `R` and write a single `ClearAll` audit entry.
    ///
    /// # Errors
    /// Store failures.
    pub fn clear_all<R: Record>(&self) -> Result<(), EngineError> {
        self.store.atomic(|| {
            self.store.delete_all::<R>()?;
            self.audit::<R>("ClearAll".to_string())
        })?;
        info!(record_type = R::TYPE_NAME, "all records cleared");
        Ok(())
    }

    /// Insert a copy of `source` without its identifier and unique fields.
    /// Duplication is not audited.
    ///
    /// # Errors
    /// Store failures.
    pub fn duplicate<R: Record>(&self, source: &R) -> Result<R, EngineError> {
        let schema = self.schema::<R>();
        let mut copy = R::default();
        for descriptor in schema.fields() {
            if descriptor.identifier || descriptor.unique || !descriptor.writable {
                continue;
            }
            let value = source.get(&descriptor.name).unwrap_or(FieldValue::Null);
            copy.set(&descriptor.name, value)?;
        }
        self.store.insert(&mut copy)?;
        info!(record_type = R::TYPE_NAME, source = source.id().0, id = copy.id().0, "record duplicated");
        Ok(copy)
    }

    /// Records of `R` passing `predicate`, ordered by `sort`.
    ///
    /// # Errors
    /// Store failures.
    pub fn list<R: Record>(&self, predicate: &RecordPredicate, sort: &SortSpec) -> Result<Vec<R>, EngineError> {
        let records = self.store.scan::<R>()?;
        Ok(sort.apply(predicate.filter(records)))
    }

    /// # Errors
    /// Store failures.
    pub fn find<R: Record>(&self, id: RecordId) -> Result<Option<R>, EngineError> {
        Ok(self.store.scan::<R>()?.into_iter().find(|record| record.id() == id))
    }

    fn audit<R: Record>(&self, action: String) -> Result<(), EngineError> {
        let entry = AuditEntry::new(self.actor.as_deref(), action, R::TYPE_NAME);
        debug!(audit = %entry.summary(), "audit entry written");
        self.store.insert_audit(&entry)
    }
}

/// Converts a widget edit into the stored value. `None` leaves the field untouched.
fn coerce_edit(descriptor: &FieldDescriptor, edit: &EditValue) -> Result<Option<FieldValue>, EngineError> {
    let field = descriptor.name.as_str();
    let value = match (&descriptor.kind, edit) {
        (ValueKind::Text | ValueKind::FileReference, EditValue::Text(text)) => FieldValue::Text(text.clone()),
        (ValueKind::Number, EditValue::Text(text)) => {
            let number = text
                .trim()
                .parse::<f64>()
                .ok()
                .filter(|number| number.is_finite())
                .ok_or_else(|| EngineError::coercion(field, format!("`{text}` is not a finite number")))?;
            FieldValue::Number(number)
        }
        (ValueKind::Boolean, EditValue::Bool(flag)) => FieldValue::Bool(*flag),
        (ValueKind::Enumeration { options }, EditValue::Enum(name)) => {
            if !options.iter().any(|option| option == name) {
                return Err(EngineError::coercion(
                    field,
                    format!("`{name}` is not one of {}", options.join(", ")),
                ));
            }
            FieldValue::Enum(name.clone())
        }
        (ValueKind::ForeignReference { .. }, EditValue::Foreign(choice)) => {
            FieldValue::from(choice.as_ref().map(|summary| summary.id))
        }
        (ValueKind::ManyToManyReference { .. }, EditValue::ManyToMany(chosen)) => {
            FieldValue::Text(encode_many_to_many(chosen))
        }
        (ValueKind::Unclassified | ValueKind::Identifier | ValueKind::FrozenText, _) => return Ok(None),
        (kind, edit) => {
            return Err(EngineError::coercion(
                field,
                format!("{} edit does not fit a {} field", edit.kind_name(), kind.as_str()),
            ));
        }
    };
    Ok(Some(value))
}
