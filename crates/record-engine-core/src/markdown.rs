use crate::record::{FieldValue, Record};
use crate::schema::Schema;

/// Renders a record as a Markdown detail sheet: a heading followed by one
/// bold label and value per field. Null values render as `—`.
#[must_use]
pub fn to_markdown<R: Record>(record: &R, schema: &Schema) -> String {
    let mut out = format!("# {} Details\n\n", schema.type_name());
    for descriptor in schema.fields() {
        let value = record.get(&descriptor.name).unwrap_or(FieldValue::Null);
        let text = if value.is_null() { "\u{2014}".to_string() } else { value.display_string() };
        out.push_str(&format!("**{}**: {text}\n\n", descriptor.name));
    }
    out
}
