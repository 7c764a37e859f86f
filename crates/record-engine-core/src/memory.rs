use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::engine::{AuditEntry, DataStore};
use crate::record::{FieldValue, Record, RecordId};
use crate::EngineError;

type Row = BTreeMap<String, FieldValue>;

#[derive(Debug, Clone, Default)]
struct Tables {
    next_id: i64,
    rows: BTreeMap<String, Vec<(RecordId, Row)>>,
    audit: Vec<AuditEntry>,
}

/// Process-local [`DataStore`] for tests and throwaway sessions.
/// Ids are unique across all record types.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    tables: Mutex<Tables>,
}

impl InMemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl DataStore for InMemoryStore {
    fn scan<R: Record>(&self) -> Result<Vec<R>, EngineError> {
        let tables = self.lock();
        tables
            .rows
            .get(R::TYPE_NAME)
            .map(|rows| rows.iter().map(|(_, row)| R::from_row(row)).collect())
            .unwrap_or_else(|| Ok(Vec::new()))
    }

    fn insert<R: Record>(&self, record: &mut R) -> Result<(), EngineError> {
        let mut tables = self.lock();
        tables.next_id += 1;
        let id = RecordId(tables.next_id);
        record.base_mut().id = id;
        let row = record.to_row();
        tables.rows.entry(R::TYPE_NAME.to_string()).or_default().push((id, row));
        Ok(())
    }

    fn update<R: Record>(&self, record: &R) -> Result<(), EngineError> {
        let mut tables = self.lock();
        let slot = tables
            .rows
            .get_mut(R::TYPE_NAME)
            .and_then(|rows| rows.iter_mut().find(|(id, _)| *id == record.id()))
            .ok_or_else(|| EngineError::Store(format!("no {} record with id {}", R::TYPE_NAME, record.id())))?;
        slot.1 = record.to_row();
        Ok(())
    }

    fn delete<R: Record>(&self, record: &R) -> Result<(), EngineError> {
        if let Some(rows) = self.lock().rows.get_mut(R::TYPE_NAME) {
            rows.retain(|(id, _)| *id != record.id());
        }
        Ok(())
    }

    fn delete_all<R: Record>(&self) -> Result<(), EngineError> {
        self.lock().rows.remove(R::TYPE_NAME);
        Ok(())
    }

    fn insert_audit(&self, entry: &AuditEntry) -> Result<(), EngineError> {
        self.lock().audit.push(entry.clone());
        Ok(())
    }

    fn audit_entries(&self) -> Result<Vec<AuditEntry>, EngineError> {
        Ok(self.lock().audit.clone())
    }

    fn atomic<T, F>(&self, work: F) -> Result<T, EngineError>
    where
        F: FnOnce() -> Result<T, EngineError>,
    {
        let snapshot = self.lock().clone();
        let result = work();
        if result.is_err() {
            *self.lock() = snapshot;
        }
        result
    }
}
