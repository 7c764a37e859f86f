use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use record_engine_core::{AuditEntry, DataStore, EngineError, FieldValue, Record, RecordId};
use rusqlite::{params, Connection, DatabaseName};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tracing::{debug, info};

const LATEST_SCHEMA_VERSION: i64 = 1;

const ATOMIC_SAVEPOINT: &str = "record_engine_atomic";

const CREATE_SCHEMA_MIGRATIONS_SQL: &str = r"
CREATE TABLE IF NOT EXISTS schema_migrations (
  version INTEGER PRIMARY KEY,
  applied_at TEXT NOT NULL
);
";

const MIGRATION_001_SQL: &str = r"
CREATE TABLE IF NOT EXISTS records (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  record_type TEXT NOT NULL,
  name TEXT NOT NULL,
  fields_json TEXT NOT NULL,
  written_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS audit_entries (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  actor TEXT NOT NULL,
  action TEXT NOT NULL,
  record_type TEXT NOT NULL,
  recorded_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_records_type ON records(record_type, id);
CREATE INDEX IF NOT EXISTS idx_audit_entries_type ON audit_entries(record_type);
";

type Row = BTreeMap<String, FieldValue>;

/// [`DataStore`] backed by a single `SQLite` database file.
///
/// Every record type shares the `records` table; a row carries its type name
/// and the record's fields as a JSON object keyed by field name.
pub struct SqliteStore {
    conn: Connection,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SchemaStatus {
    pub current_version: i64,
    pub target_version: i64,
    pub pending_versions: Vec<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IntegrityReport {
    pub quick_check_ok: bool,
    pub quick_check_message: String,
    pub record_counts: BTreeMap<String, i64>,
    pub audit_entries: i64,
    pub schema_status: SchemaStatus,
}

impl SqliteStore {
    /// Open a SQLite-backed record store and configure required runtime pragmas.
    ///
    /// # Errors
    /// Returns an error when the database cannot be opened or pragmas cannot be applied.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open sqlite database at {}", path.display()))?;

        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA foreign_keys = ON;
             PRAGMA busy_timeout = 5000;",
        )
        .context("failed to configure sqlite pragmas")?;

        Ok(Self { conn })
    }

    /// Report current and target schema versions plus pending migrations.
    ///
    /// # Errors
    /// Returns an error when schema metadata cannot be read or initialized.
    pub fn schema_status(&self) -> Result<SchemaStatus> {
        self.conn
            .execute_batch(CREATE_SCHEMA_MIGRATIONS_SQL)
            .context("failed to apply schema_migrations table")?;
        let current_version = current_schema_version(&self.conn)?;
        let pending_versions = if current_version < LATEST_SCHEMA_VERSION {
            ((current_version + 1)..=LATEST_SCHEMA_VERSION).collect::<Vec<_>>()
        } else {
            Vec::new()
        };

        Ok(SchemaStatus { current_version, target_version: LATEST_SCHEMA_VERSION, pending_versions })
    }

    /// Apply all forward migrations up to the latest supported schema version.
    ///
    /// # Errors
    /// Returns an error when migration bootstrapping or any migration step fails,
    /// or when the database was written by a newer schema.
    pub fn migrate(&mut self) -> Result<()> {
        self.conn
            .execute_batch(CREATE_SCHEMA_MIGRATIONS_SQL)
            .context("failed to apply schema_migrations table")?;

        let version = current_schema_version(&self.conn)?;
        if version > LATEST_SCHEMA_VERSION {
            return Err(anyhow!(
                "unsupported schema version {version}; expected {LATEST_SCHEMA_VERSION}"
            ));
        }

        if version < 1 {
            let tx = self.conn.transaction().context("failed to start migration transaction")?;
            tx.execute_batch(MIGRATION_001_SQL).context("failed to apply migration 001")?;
            record_schema_version(&tx, 1)?;
            tx.commit().context("failed to commit migration 001")?;
            info!(version = 1, "schema migration applied");
        }

        Ok(())
    }

    /// Write an online copy of the database to `out_file`.
    ///
    /// # Errors
    /// Returns an error when the parent directory cannot be created or the backup fails.
    pub fn backup_database(&self, out_file: &Path) -> Result<()> {
        if let Some(parent) = out_file.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            fs::create_dir_all(parent).with_context(|| {
                format!("failed to create parent directory for backup file {}", out_file.display())
            })?;
        }

        self.conn
            .backup(DatabaseName::Main, out_file, None)
            .with_context(|| format!("failed to create sqlite backup at {}", out_file.display()))
    }

    /// Run quick-check, per-type row counts and schema status probes.
    ///
    /// # Errors
    /// Returns an error when any integrity probe query fails.
    pub fn integrity_check(&self) -> Result<IntegrityReport> {
        let quick_check_message: String = self
            .conn
            .query_row("PRAGMA quick_check", [], |row| row.get::<_, String>(0))
            .context("failed to run PRAGMA quick_check")?;

        let schema_status = self.schema_status()?;
        let mut record_counts = BTreeMap::new();
        let mut audit_entries = 0;
        if schema_status.current_version >= 1 {
            let mut stmt = self
                .conn
                .prepare("SELECT record_type, COUNT(*) FROM records GROUP BY record_type ORDER BY record_type")
                .context("failed to prepare record count query")?;
            let rows = stmt.query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?;
            for row in rows {
                let (record_type, count) = row?;
                record_counts.insert(record_type, count);
            }

            audit_entries = self
                .conn
                .query_row("SELECT COUNT(*) FROM audit_entries", [], |row| row.get::<_, i64>(0))
                .context("failed to count audit entries")?;
        }

        Ok(IntegrityReport {
            quick_check_ok: quick_check_message == "ok",
            quick_check_message,
            record_counts,
            audit_entries,
            schema_status,
        })
    }

    fn load_rows(&self, record_type: &str) -> Result<Vec<(i64, Row)>> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, fields_json FROM records WHERE record_type = ?1 ORDER BY id")
            .context("failed to prepare record scan")?;
        let rows = stmt.query_map(params![record_type], |row| {
            Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?))
        })?;

        let mut out = Vec::new();
        for row in rows {
            let (id, fields_json) = row?;
            let fields: Row = serde_json::from_str(&fields_json)
                .with_context(|| format!("invalid fields_json for {record_type} record {id}"))?;
            out.push((id, fields));
        }
        Ok(out)
    }

    fn insert_row(&self, record_type: &str, name: &str, row: &Row) -> Result<i64> {
        let fields_json = encode_fields(record_type, row)?;
        self.conn
            .execute(
                "INSERT INTO records(record_type, name, fields_json, written_at) VALUES (?1, ?2, ?3, ?4)",
                params![record_type, name, fields_json, now_rfc3339()?],
            )
            .with_context(|| format!("failed to insert {record_type} record"))?;
        Ok(self.conn.last_insert_rowid())
    }

    fn update_row(&self, record_type: &str, id: RecordId, name: &str, row: &Row) -> Result<()> {
        let fields_json = encode_fields(record_type, row)?;
        let changed = self
            .conn
            .execute(
                "UPDATE records SET name = ?1, fields_json = ?2, written_at = ?3
                 WHERE id = ?4 AND record_type = ?5",
                params![name, fields_json, now_rfc3339()?, id.0, record_type],
            )
            .with_context(|| format!("failed to update {record_type} record {id}"))?;
        if changed == 0 {
            return Err(anyhow!("no {record_type} record with id {id}"));
        }
        Ok(())
    }

    fn with_savepoint<T>(&self, work: impl FnOnce() -> Result<T, EngineError>) -> Result<T, EngineError> {
        self.conn
            .execute_batch(&format!("SAVEPOINT {ATOMIC_SAVEPOINT}"))
            .context("failed to open savepoint")
            .map_err(store_error)?;

        match work() {
            Ok(value) => {
                self.conn
                    .execute_batch(&format!("RELEASE {ATOMIC_SAVEPOINT}"))
                    .context("failed to release savepoint")
                    .map_err(store_error)?;
                Ok(value)
            }
            Err(err) => {
                let rollback = self
                    .conn
                    .execute_batch(&format!(
                        "ROLLBACK TO {ATOMIC_SAVEPOINT}; RELEASE {ATOMIC_SAVEPOINT}"
                    ))
                    .context("failed to roll back savepoint");
                if let Err(rollback_err) = rollback {
                    return Err(store_error(rollback_err.context(err.to_string())));
                }
                debug!(error = %err, "atomic block rolled back");
                Err(err)
            }
        }
    }
}

/// JSON has no encoding for infinities or NaN, so such rows could not be read back.
fn encode_fields(record_type: &str, row: &Row) -> Result<String> {
    if let Some((field, _)) =
        row.iter().find(|(_, value)| matches!(value, FieldValue::Number(number) if !number.is_finite()))
    {
        return Err(anyhow!("{record_type} field `{field}` holds a non-finite number"));
    }
    serde_json::to_string(row).context("failed to serialize record fields")
}

impl DataStore for SqliteStore {
    fn scan<R: Record>(&self) -> Result<Vec<R>, EngineError> {
        let rows = self.load_rows(R::TYPE_NAME).map_err(store_error)?;
        rows.into_iter()
            .map(|(id, mut row)| {
                row.insert("Id".to_string(), FieldValue::Integer(id));
                R::from_row(&row)
            })
            .collect()
    }

    fn insert<R: Record>(&self, record: &mut R) -> Result<(), EngineError> {
        let mut row = record.to_row();
        row.remove("Id");
        let id = self.insert_row(R::TYPE_NAME, record.name(), &row).map_err(store_error)?;
        record.base_mut().id = RecordId(id);
        Ok(())
    }

    fn update<R: Record>(&self, record: &R) -> Result<(), EngineError> {
        let mut row = record.to_row();
        row.remove("Id");
        self.update_row(R::TYPE_NAME, record.id(), record.name(), &row).map_err(store_error)
    }

    fn delete<R: Record>(&self, record: &R) -> Result<(), EngineError> {
        self.conn
            .execute(
                "DELETE FROM records WHERE id = ?1 AND record_type = ?2",
                params![record.id().0, R::TYPE_NAME],
            )
            .with_context(|| format!("failed to delete {} record {}", R::TYPE_NAME, record.id()))
            .map_err(store_error)?;
        Ok(())
    }

    fn delete_all<R: Record>(&self) -> Result<(), EngineError> {
        self.conn
            .execute("DELETE FROM records WHERE record_type = ?1", params![R::TYPE_NAME])
            .with_context(|| format!("failed to delete {} records", R::TYPE_NAME))
            .map_err(store_error)?;
        Ok(())
    }

    fn insert_audit(&self, entry: &AuditEntry) -> Result<(), EngineError> {
        self.conn
            .execute(
                "INSERT INTO audit_entries(actor, action, record_type, recorded_at) VALUES (?1, ?2, ?3, ?4)",
                params![entry.actor, entry.action, entry.record_type, entry.recorded_at],
            )
            .context("failed to insert audit entry")
            .map_err(store_error)?;
        Ok(())
    }

    fn audit_entries(&self) -> Result<Vec<AuditEntry>, EngineError> {
        let load = || -> Result<Vec<AuditEntry>> {
            let mut stmt = self
                .conn
                .prepare("SELECT actor, action, record_type, recorded_at FROM audit_entries ORDER BY id")
                .context("failed to prepare audit query")?;
            let rows = stmt.query_map([], |row| {
                Ok(AuditEntry {
                    actor: row.get(0)?,
                    action: row.get(1)?,
                    record_type: row.get(2)?,
                    recorded_at: row.get(3)?,
                })
            })?;
            let mut out = Vec::new();
            for row in rows {
                out.push(row?);
            }
            Ok(out)
        };
        load().map_err(store_error)
    }

    fn atomic<T, F>(&self, work: F) -> Result<T, EngineError>
    where
        F: FnOnce() -> Result<T, EngineError>,
    {
        self.with_savepoint(work)
    }
}

fn store_error(err: anyhow::Error) -> EngineError {
    EngineError::Store(format!("{err:#}"))
}

fn current_schema_version(conn: &Connection) -> Result<i64> {
    let version = conn
        .query_row("SELECT COALESCE(MAX(version), 0) FROM schema_migrations", [], |row| {
            row.get::<_, i64>(0)
        })
        .context("failed to read current schema version")?;
    Ok(version)
}

fn record_schema_version(conn: &Connection, version: i64) -> Result<()> {
    let now = now_rfc3339()?;
    conn.execute(
        "INSERT OR IGNORE INTO schema_migrations(version, applied_at) VALUES (?1, ?2)",
        params![version, now],
    )
    .with_context(|| format!("failed to record migration version {version}"))?;
    Ok(())
}

fn now_rfc3339() -> Result<String> {
    OffsetDateTime::now_utc()
        .format(&time::format_description::well_known::Rfc3339)
        .context("failed to format RFC3339 timestamp")
}
