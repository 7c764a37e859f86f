//! Schema-driven record engine.
//!
//! A record type registers a declarative list of [`FieldDef`]s once; the
//! derived [`Schema`] then drives edit forms, filtering, multi-key sorting,
//! relationship resolution, audited mutations and the `;`-delimited CSV codec
//! for every record type alike.
//!
//! Storage, lookups, access policy and confirmation prompts are injected as
//! capabilities ([`DataStore`], [`Lookup`], [`AccessPolicy`], [`Prompt`]); the
//! engine never reaches for process-wide state.

mod access;
mod csv;
mod engine;
mod filter;
mod form;
mod markdown;
mod memory;
mod record;
mod relation;
mod schema;
mod sort;
#[cfg(test)]
mod test_support;

pub use access::{AccessPolicy, AllowAll, Prompt, ReadOnly};
pub use csv::{ImportReport, CSV_DELIMITER, MULTI_VALUE_DELIMITER};
pub use engine::{AuditEntry, DataStore, EditSet, EditValue, RecordEngine, UNKNOWN_ACTOR};
pub use filter::{
    search_expression, CompareOp, FieldFilter, FilterExpression, FilterOp, FilterRow, Logic,
    RecordPredicate, StringMode,
};
pub use form::{build_form, FormChoice, FormField, Widget};
pub use markdown::to_markdown;
pub use memory::InMemoryStore;
pub use record::{
    base_field_defs, FieldValue, Record, RecordBase, RecordId, RecordSummary, DEFAULT_DESCRIPTION,
};
pub use relation::{
    encode_foreign, encode_many_to_many, parse_id_list, Lookup, LookupRegistry, MemoizedLookup,
    RelationshipResolver,
};
pub use schema::{
    humanize_field_name, Cardinality, FieldDef, FieldDescriptor, Marker, Relation, Schema,
    SchemaRegistry, StorageType, ValueKind,
};
pub use sort::{SortDirection, SortKey, SortSpec};

#[derive(Debug, Clone, thiserror::Error, Eq, PartialEq)]
pub enum EngineError {
    #[error("schema error: {0}")]
    Schema(String),
    #[error("validation error: field `{field}`: {reason}")]
    Coercion { field: String, reason: String },
    #[error("nothing to export: {0} has no records")]
    NothingToExport(String),
    #[error("import error: {0}")]
    Import(String),
    #[error("store error: {0}")]
    Store(String),
}

impl EngineError {
    pub(crate) fn coercion(field: &str, reason: impl Into<String>) -> Self {
        Self::Coercion { field: field.to_string(), reason: reason.into() }
    }
}
