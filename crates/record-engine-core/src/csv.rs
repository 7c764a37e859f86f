//! `;`-delimited text export and import driven by the record schema.
//!
//! Export writes a header with every schema field name, then one line per
//! record. Relationship cells carry target record names rather than ids so a
//! file can be re-imported into a store where ids differ. Import replaces
//! every record of the type and is lenient per cell: a value that does not
//! parse leaves the field at its default.

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::engine::{DataStore, RecordEngine};
use crate::record::{FieldValue, Record};
use crate::relation::{encode_ids, Lookup, MemoizedLookup, RelationshipResolver};
use crate::schema::{FieldDescriptor, ValueKind};
use crate::EngineError;

pub const CSV_DELIMITER: char = ';';
pub const MULTI_VALUE_DELIMITER: char = ',';

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ImportReport {
    pub inserted: usize,
    pub skipped_cells: usize,
}

fn sanitize(cell: &str) -> String {
    cell.replace(CSV_DELIMITER, &MULTI_VALUE_DELIMITER.to_string())
}

fn parse_bool(cell: &str) -> Option<bool> {
    if cell.eq_ignore_ascii_case("true") {
        Some(true)
    } else if cell.eq_ignore_ascii_case("false") {
        Some(false)
    } else {
        None
    }
}

impl<S: DataStore, L: Lookup + ?Sized> RecordEngine<'_, S, L> {
    /// Serialize every record of `R`.
    ///
    /// # Errors
    /// [`EngineError::NothingToExport`] when there are no records, schema
    /// errors for unregistered relationship targets, and store failures.
    pub fn export_csv<R: Record>(&self) -> Result<String, EngineError> {
        let records = self.store().scan::<R>()?;
        if records.is_empty() {
            warn!(record_type = R::TYPE_NAME, "export requested with no records");
            return Err(EngineError::NothingToExport(R::TYPE_NAME.to_string()));
        }

        let schema = self.schema::<R>();
        let memo = MemoizedLookup::new(self.lookup());
        let resolver = RelationshipResolver::new(&memo);
        let delimiter = CSV_DELIMITER.to_string();

        let mut out = schema.fields().iter().map(|field| field.name.as_str()).collect::<Vec<_>>().join(&delimiter);
        out.push('\n');
        for record in &records {
            let cells = schema
                .fields()
                .iter()
                .map(|descriptor| {
                    let value = record.get(&descriptor.name).unwrap_or(FieldValue::Null);
                    export_cell(&resolver, descriptor, &value)
                })
                .collect::<Result<Vec<_>, EngineError>>()?;
            out.push_str(&cells.join(&delimiter));
            out.push('\n');
        }

        info!(record_type = R::TYPE_NAME, rows = records.len(), "records exported");
        Ok(out)
    }

    /// Replace every record of `R` with the rows in `text`.
    ///
    /// Columns are matched to fields by header name; unknown, identifier,
    /// frozen, read-only and unclassified columns are ignored. Rows are
    /// inserted one by one and are not audited.
    ///
    /// # Errors
    /// [`EngineError::Import`] when `text` lacks a header and a data row,
    /// schema errors for unregistered relationship targets (raised before
    /// any record is removed), and store failures.
    pub fn import_csv<R: Record>(&self, text: &str) -> Result<ImportReport, EngineError> {
        let lines: Vec<&str> = text.lines().filter(|line| !line.is_empty()).collect();
        if lines.len() < 2 {
            return Err(EngineError::Import(
                "expected a header line and at least one data line".to_string(),
            ));
        }

        let schema = self.schema::<R>();
        let columns: Vec<Option<&FieldDescriptor>> = lines[0]
            .split(CSV_DELIMITER)
            .map(|header| schema.get(header.trim()).filter(|descriptor| descriptor.is_editable()))
            .collect();
        let live = RelationshipResolver::new(self.lookup());
        for descriptor in columns.iter().flatten().filter(|descriptor| descriptor.relation.is_some()) {
            live.choices(descriptor)?;
        }

        self.store().delete_all::<R>()?;

        let memo = MemoizedLookup::new(self.lookup());
        let resolver = RelationshipResolver::new(&memo);

        let mut report = ImportReport::default();
        for (line_number, line) in lines.iter().enumerate().skip(1) {
            let mut record = R::default();
            for (descriptor, cell) in columns.iter().zip(line.split(CSV_DELIMITER)) {
                let Some(descriptor) = descriptor else {
                    continue;
                };
                let cell = cell.trim();
                match import_cell(&resolver, descriptor, cell)? {
                    Some(value) => record.set(&descriptor.name, value)?,
                    None => {
                        report.skipped_cells += 1;
                        debug!(line = line_number + 1, field = %descriptor.name, cell, "unparsable cell skipped");
                    }
                }
            }
            self.store().insert(&mut record)?;
            memo.forget(R::TYPE_NAME);
            report.inserted += 1;
        }

        info!(
            record_type = R::TYPE_NAME,
            inserted = report.inserted,
            skipped_cells = report.skipped_cells,
            "records imported"
        );
        Ok(report)
    }
}

fn export_cell<L: Lookup + ?Sized>(
    resolver: &RelationshipResolver<'_, L>,
    descriptor: &FieldDescriptor,
    value: &FieldValue,
) -> Result<String, EngineError> {
    let cell = match &descriptor.kind {
        ValueKind::ManyToManyReference { .. } => resolver
            .resolve_many_to_many(descriptor, &value.display_string())?
            .iter()
            .map(|related| related.name.as_str())
            .collect::<Vec<_>>()
            .join(&MULTI_VALUE_DELIMITER.to_string()),
        ValueKind::ForeignReference { .. } => {
            resolver.resolve_foreign(descriptor, value)?.map(|related| related.name).unwrap_or_default()
        }
        _ => value.display_string(),
    };
    Ok(sanitize(&cell))
}

/// `Ok(None)` marks a cell that did not parse and is skipped.
fn import_cell<L: Lookup + ?Sized>(
    resolver: &RelationshipResolver<'_, L>,
    descriptor: &FieldDescriptor,
    cell: &str,
) -> Result<Option<FieldValue>, EngineError> {
    let value = match &descriptor.kind {
        ValueKind::Text | ValueKind::FileReference => Some(FieldValue::Text(cell.to_string())),
        ValueKind::Number => {
            cell.parse::<f64>().ok().filter(|number| number.is_finite()).map(FieldValue::Number)
        }
        ValueKind::Boolean => parse_bool(cell).map(FieldValue::Bool),
        ValueKind::Enumeration { options } => {
            options.iter().any(|option| option == cell).then(|| FieldValue::Enum(cell.to_string()))
        }
        ValueKind::ForeignReference { .. } => {
            let found = if cell.is_empty() { None } else { resolver.find_by_name(descriptor, cell)? };
            Some(FieldValue::from(found.map(|related| related.id)))
        }
        ValueKind::ManyToManyReference { .. } => {
            let names: Vec<&str> = cell
                .split(MULTI_VALUE_DELIMITER)
                .map(str::trim)
                .filter(|name| !name.is_empty())
                .collect();
            Some(FieldValue::Text(encode_ids(resolver.ids_for_names(descriptor, &names)?)))
        }
        ValueKind::Identifier | ValueKind::FrozenText | ValueKind::Unclassified => None,
    };
    Ok(value)
}
