use serde::Serialize;

use crate::record::{FieldValue, Record, RecordId};
use crate::relation::{parse_id_list, Lookup, RelationshipResolver};
use crate::schema::{FieldDescriptor, Schema, ValueKind};
use crate::EngineError;

const EMPTY_PLACEHOLDER: &str = "--";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FormChoice {
    pub id: RecordId,
    pub name: String,
    pub selected: bool,
}

/// Input control chosen for a field from its value kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "widget", rename_all = "snake_case")]
pub enum Widget {
    ReadOnly { text: String },
    TextEntry { text: String },
    NumericEntry { text: String },
    EnumPicker { options: Vec<String>, selected: Option<String> },
    Checkbox { checked: bool },
    ForeignPicker { target: String, choices: Vec<FormChoice> },
    ManyToManyChecklist { target: String, choices: Vec<FormChoice> },
    FilePath { path: String },
    Opaque { text: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FormField {
    pub name: String,
    pub label: String,
    pub widget: Widget,
}

fn text_or_placeholder(value: &FieldValue) -> String {
    if value.is_null() {
        EMPTY_PLACEHOLDER.to_string()
    } else {
        value.display_string()
    }
}

/// Lay out one labelled widget per writable field of `record`, in schema order.
///
/// # Errors
/// Schema error when a relationship target has no registered lookup.
pub fn build_form<R: Record, L: Lookup + ?Sized>(
    record: &R,
    schema: &Schema,
    lookup: &L,
) -> Result<Vec<FormField>, EngineError> {
    let resolver = RelationshipResolver::new(lookup);
    schema
        .fields()
        .iter()
        .filter(|descriptor| descriptor.writable)
        .map(|descriptor| {
            let value = record.get(&descriptor.name).unwrap_or(FieldValue::Null);
            Ok(FormField {
                name: descriptor.name.clone(),
                label: descriptor.label(),
                widget: widget_for(&resolver, descriptor, &value)?,
            })
        })
        .collect()
}

fn widget_for<L: Lookup + ?Sized>(
    resolver: &RelationshipResolver<'_, L>,
    descriptor: &FieldDescriptor,
    value: &FieldValue,
) -> Result<Widget, EngineError> {
    let widget = match &descriptor.kind {
        ValueKind::Identifier | ValueKind::FrozenText => Widget::ReadOnly { text: text_or_placeholder(value) },
        ValueKind::Text => Widget::TextEntry { text: value.display_string() },
        ValueKind::Number => Widget::NumericEntry { text: value.display_string() },
        ValueKind::Enumeration { options } => Widget::EnumPicker {
            options: options.clone(),
            selected: value.as_text().map(ToString::to_string),
        },
        ValueKind::Boolean => Widget::Checkbox { checked: matches!(value, FieldValue::Bool(true)) },
        ValueKind::ForeignReference { target } => {
            let current = value.as_record_id();
            let choices = resolver
                .choices(descriptor)?
                .into_iter()
                .map(|candidate| FormChoice {
                    selected: Some(candidate.id) == current,
                    id: candidate.id,
                    name: candidate.name,
                })
                .collect();
            Widget::ForeignPicker { target: target.clone(), choices }
        }
        ValueKind::ManyToManyReference { target } => {
            let current = parse_id_list(&value.display_string());
            let choices = resolver
                .choices(descriptor)?
                .into_iter()
                .map(|candidate| FormChoice {
                    selected: current.contains(&candidate.id),
                    id: candidate.id,
                    name: candidate.name,
                })
                .collect();
            Widget::ManyToManyChecklist { target: target.clone(), choices }
        }
        ValueKind::FileReference => Widget::FilePath { path: value.display_string() },
        ValueKind::Unclassified => Widget::Opaque { text: text_or_placeholder(value) },
    };
    Ok(widget)
}
