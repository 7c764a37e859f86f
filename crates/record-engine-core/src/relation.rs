use std::cell::RefCell;
use std::collections::BTreeMap;

use crate::engine::DataStore;
use crate::record::{FieldValue, Record, RecordId, RecordSummary};
use crate::schema::{Cardinality, FieldDescriptor};
use crate::EngineError;

/// Supplies every record of a named type, in store order.
pub trait Lookup {
    /// # Errors
    /// Returns [`EngineError::Schema`] when no source is registered for `type_name`.
    fn lookup_all(&self, type_name: &str) -> Result<Vec<RecordSummary>, EngineError>;
}

impl<L: Lookup + ?Sized> Lookup for &L {
    fn lookup_all(&self, type_name: &str) -> Result<Vec<RecordSummary>, EngineError> {
        (**self).lookup_all(type_name)
    }
}

type Source<'a> = Box<dyn Fn() -> Result<Vec<RecordSummary>, EngineError> + 'a>;

/// Explicit type-name to source table. Every relationship target must be
/// registered before a lookup reaches it.
#[derive(Default)]
pub struct LookupRegistry<'a> {
    sources: BTreeMap<String, Source<'a>>,
}

impl<'a> LookupRegistry<'a> {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&mut self, type_name: impl Into<String>, source: F) -> &mut Self
    where
        F: Fn() -> Result<Vec<RecordSummary>, EngineError> + 'a,
    {
        self.sources.insert(type_name.into(), Box::new(source));
        self
    }

    /// Registers `R` as served by a full scan of `store`.
    pub fn register_store<R: Record, S: DataStore>(&mut self, store: &'a S) -> &mut Self {
        self.register(R::TYPE_NAME, move || {
            Ok(store.scan::<R>()?.iter().map(Record::summary).collect())
        })
    }

    #[must_use]
    pub fn is_registered(&self, type_name: &str) -> bool {
        self.sources.contains_key(type_name)
    }
}

impl Lookup for LookupRegistry<'_> {
    fn lookup_all(&self, type_name: &str) -> Result<Vec<RecordSummary>, EngineError> {
        let source = self
            .sources
            .get(type_name)
            .ok_or_else(|| EngineError::Schema(format!("schema not registered: {type_name}")))?;
        source()
    }
}

/// Caches each type's lookup result for the lifetime of the wrapper,
/// typically one export or import pass.
pub struct MemoizedLookup<'a, L: Lookup + ?Sized> {
    inner: &'a L,
    cache: RefCell<BTreeMap<String, Vec<RecordSummary>>>,
}

impl<'a, L: Lookup + ?Sized> MemoizedLookup<'a, L> {
    #[must_use]
    pub fn new(inner: &'a L) -> Self {
        Self { inner, cache: RefCell::new(BTreeMap::new()) }
    }

    /// Drop the cached records of `type_name` so the next lookup reads through.
    pub fn forget(&self, type_name: &str) {
        self.cache.borrow_mut().remove(type_name);
    }
}

impl<L: Lookup + ?Sized> Lookup for MemoizedLookup<'_, L> {
    fn lookup_all(&self, type_name: &str) -> Result<Vec<RecordSummary>, EngineError> {
        if let Some(hit) = self.cache.borrow().get(type_name) {
            return Ok(hit.clone());
        }
        let fetched = self.inner.lookup_all(type_name)?;
        self.cache.borrow_mut().insert(type_name.to_string(), fetched.clone());
        Ok(fetched)
    }
}

/// Turns stored reference encodings into related records and back.
pub struct RelationshipResolver<'a, L: Lookup + ?Sized> {
    lookup: &'a L,
}

impl<'a, L: Lookup + ?Sized> RelationshipResolver<'a, L> {
    #[must_use]
    pub fn new(lookup: &'a L) -> Self {
        Self { lookup }
    }

    /// Every record of the field's target type, for pickers and checklists.
    ///
    /// # Errors
    /// Schema error when the field is not relational or its target is unregistered.
    pub fn choices(&self, descriptor: &FieldDescriptor) -> Result<Vec<RecordSummary>, EngineError> {
        let target = relation_target(descriptor, None)?;
        self.lookup.lookup_all(target)
    }

    /// The record a foreign-reference value points at; `None` when unset or dangling.
    ///
    /// # Errors
    /// Schema error when the field is not a foreign reference or its target is unregistered.
    pub fn resolve_foreign(
        &self,
        descriptor: &FieldDescriptor,
        value: &FieldValue,
    ) -> Result<Option<RecordSummary>, EngineError> {
        let target = relation_target(descriptor, Some(Cardinality::One))?;
        let candidates = self.lookup.lookup_all(target)?;
        let Some(id) = value.as_record_id() else {
            return Ok(None);
        };
        Ok(candidates.into_iter().find(|candidate| candidate.id == id))
    }

    /// Records named by a comma-separated id list, in encoded order. Ids with
    /// no matching record are dropped.
    ///
    /// # Errors
    /// Schema error when the field is not many-to-many or its target is unregistered.
    pub fn resolve_many_to_many(
        &self,
        descriptor: &FieldDescriptor,
        encoded: &str,
    ) -> Result<Vec<RecordSummary>, EngineError> {
        let target = relation_target(descriptor, Some(Cardinality::Many))?;
        let candidates = self.lookup.lookup_all(target)?;
        Ok(parse_id_list(encoded)
            .into_iter()
            .filter_map(|id| candidates.iter().find(|candidate| candidate.id == id).cloned())
            .collect())
    }

    /// First target record whose name matches exactly.
    ///
    /// # Errors
    /// Schema error when the field is not relational or its target is unregistered.
    pub fn find_by_name(
        &self,
        descriptor: &FieldDescriptor,
        name: &str,
    ) -> Result<Option<RecordSummary>, EngineError> {
        Ok(self.choices(descriptor)?.into_iter().find(|candidate| candidate.name == name))
    }

    /// Ids for the given names, in input order. Unmatched names are omitted.
    ///
    /// # Errors
    /// Schema error when the field is not relational or its target is unregistered.
    pub fn ids_for_names(
        &self,
        descriptor: &FieldDescriptor,
        names: &[&str],
    ) -> Result<Vec<RecordId>, EngineError> {
        let candidates = self.choices(descriptor)?;
        Ok(names
            .iter()
            .filter_map(|name| {
                candidates.iter().find(|candidate| candidate.name == *name).map(|hit| hit.id)
            })
            .collect())
    }
}

fn relation_target(
    descriptor: &FieldDescriptor,
    expected: Option<Cardinality>,
) -> Result<&str, EngineError> {
    match &descriptor.relation {
        Some(relation) if expected.map_or(true, |cardinality| cardinality == relation.cardinality) => {
            Ok(relation.target.as_str())
        }
        _ => Err(EngineError::Schema(format!(
            "field `{}` is not a {} reference",
            descriptor.name,
            match expected {
                Some(Cardinality::One) => "foreign",
                Some(Cardinality::Many) => "many-to-many",
                None => "relationship",
            }
        ))),
    }
}

#[must_use]
pub fn encode_foreign(record: &RecordSummary) -> RecordId {
    record.id
}

/// Comma-joined ids of the chosen records, in the given order.
#[must_use]
pub fn encode_many_to_many(records: &[RecordSummary]) -> String {
    encode_ids(records.iter().map(|record| record.id))
}

pub(crate) fn encode_ids(ids: impl IntoIterator<Item = RecordId>) -> String {
    ids.into_iter().map(|id| id.0.to_string()).collect::<Vec<_>>().join(",")
}

/// Parses a comma-separated id list. Blank, malformed and non-positive
/// tokens are skipped.
#[must_use]
pub fn parse_id_list(encoded: &str) -> Vec<RecordId> {
    encoded
        .split(',')
        .filter_map(|token| token.trim().parse::<i64>().ok())
        .filter(|raw| *raw > 0)
        .map(RecordId)
        .collect()
}
