use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock};

use serde::Serialize;
use tracing::warn;

use crate::record::Record;
use crate::EngineError;

/// Declared storage type of a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageType {
    Integer,
    Text,
    Number,
    Boolean,
    Enumeration,
    Other,
}

/// Declarative annotation attached to a field definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "marker", content = "target", rename_all = "snake_case")]
pub enum Marker {
    PrimaryKey,
    Frozen,
    Unique,
    Foreign(String),
    ManyToMany(String),
    File,
}

/// A field as a record type registers it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldDef {
    pub name: String,
    pub storage: StorageType,
    pub options: Vec<String>,
    pub markers: Vec<Marker>,
    pub writable: bool,
}

impl FieldDef {
    fn new(name: impl Into<String>, storage: StorageType) -> Self {
        Self { name: name.into(), storage, options: Vec::new(), markers: Vec::new(), writable: true }
    }

    #[must_use]
    pub fn integer(name: impl Into<String>) -> Self {
        Self::new(name, StorageType::Integer)
    }

    #[must_use]
    pub fn text(name: impl Into<String>) -> Self {
        Self::new(name, StorageType::Text)
    }

    #[must_use]
    pub fn number(name: impl Into<String>) -> Self {
        Self::new(name, StorageType::Number)
    }

    #[must_use]
    pub fn boolean(name: impl Into<String>) -> Self {
        Self::new(name, StorageType::Boolean)
    }

    /// Enumeration with its member names in declaration order.
    #[must_use]
    pub fn enumeration(name: impl Into<String>, options: &[&str]) -> Self {
        let mut def = Self::new(name, StorageType::Enumeration);
        def.options = options.iter().map(ToString::to_string).collect();
        def
    }

    #[must_use]
    pub fn other(name: impl Into<String>) -> Self {
        Self::new(name, StorageType::Other)
    }

    #[must_use]
    pub fn primary_key(self) -> Self {
        self.marked(Marker::PrimaryKey)
    }

    #[must_use]
    pub fn frozen(self) -> Self {
        self.marked(Marker::Frozen)
    }

    #[must_use]
    pub fn unique(self) -> Self {
        self.marked(Marker::Unique)
    }

    /// Holds the id of one `target` record.
    #[must_use]
    pub fn foreign(self, target: impl Into<String>) -> Self {
        self.marked(Marker::Foreign(target.into()))
    }

    /// Holds a comma-separated id list of `target` records.
    #[must_use]
    pub fn many_to_many(self, target: impl Into<String>) -> Self {
        self.marked(Marker::ManyToMany(target.into()))
    }

    #[must_use]
    pub fn file(self) -> Self {
        self.marked(Marker::File)
    }

    #[must_use]
    pub fn read_only(mut self) -> Self {
        self.writable = false;
        self
    }

    fn marked(mut self, marker: Marker) -> Self {
        self.markers.push(marker);
        self
    }

    fn has(&self, marker: &Marker) -> bool {
        self.markers.contains(marker)
    }

    fn foreign_target(&self) -> Option<&str> {
        self.markers.iter().find_map(|marker| match marker {
            Marker::Foreign(target) => Some(target.as_str()),
            _ => None,
        })
    }

    fn many_to_many_target(&self) -> Option<&str> {
        self.markers.iter().find_map(|marker| match marker {
            Marker::ManyToMany(target) => Some(target.as_str()),
            _ => None,
        })
    }
}

/// How the engine treats a field's value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ValueKind {
    Identifier,
    FrozenText,
    Text,
    Number,
    Boolean,
    Enumeration { options: Vec<String> },
    ForeignReference { target: String },
    ManyToManyReference { target: String },
    FileReference,
    Unclassified,
}

impl ValueKind {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Identifier => "identifier",
            Self::FrozenText => "frozen_text",
            Self::Text => "text",
            Self::Number => "number",
            Self::Boolean => "boolean",
            Self::Enumeration { .. } => "enumeration",
            Self::ForeignReference { .. } => "foreign_reference",
            Self::ManyToManyReference { .. } => "many_to_many_reference",
            Self::FileReference => "file_reference",
            Self::Unclassified => "unclassified",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Cardinality {
    One,
    Many,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Relation {
    pub target: String,
    pub cardinality: Cardinality,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldDescriptor {
    pub name: String,
    pub kind: ValueKind,
    pub identifier: bool,
    pub frozen: bool,
    pub unique: bool,
    pub writable: bool,
    pub relation: Option<Relation>,
}

impl FieldDescriptor {
    /// Classification precedence: identifier, frozen, many-to-many, foreign,
    /// file, then the storage type; anything left over is unclassified.
    #[must_use]
    pub fn from_def(def: &FieldDef) -> Self {
        let identifier = def.has(&Marker::PrimaryKey);
        let frozen = def.has(&Marker::Frozen);
        let many = def.many_to_many_target();
        let foreign = def.foreign_target();

        let kind = if identifier {
            ValueKind::Identifier
        } else if frozen {
            ValueKind::FrozenText
        } else if let Some(target) = many {
            ValueKind::ManyToManyReference { target: target.to_string() }
        } else if let Some(target) = foreign {
            ValueKind::ForeignReference { target: target.to_string() }
        } else if def.has(&Marker::File) {
            ValueKind::FileReference
        } else {
            match def.storage {
                StorageType::Text => ValueKind::Text,
                StorageType::Number => ValueKind::Number,
                StorageType::Enumeration => ValueKind::Enumeration { options: def.options.clone() },
                StorageType::Boolean => ValueKind::Boolean,
                StorageType::Integer | StorageType::Other => ValueKind::Unclassified,
            }
        };

        let relation = match (many, foreign) {
            (Some(target), _) => {
                Some(Relation { target: target.to_string(), cardinality: Cardinality::Many })
            }
            (None, Some(target)) => {
                Some(Relation { target: target.to_string(), cardinality: Cardinality::One })
            }
            (None, None) => None,
        };

        Self {
            name: def.name.clone(),
            kind,
            identifier,
            frozen,
            unique: def.has(&Marker::Unique),
            writable: def.writable,
            relation,
        }
    }

    #[must_use]
    pub fn label(&self) -> String {
        humanize_field_name(&self.name)
    }

    /// Writable, not an identifier, not frozen, and of a kind edits can reach.
    #[must_use]
    pub fn is_editable(&self) -> bool {
        self.writable
            && !self.identifier
            && !self.frozen
            && !matches!(self.kind, ValueKind::Unclassified)
    }

    #[must_use]
    pub fn enum_options(&self) -> &[String] {
        match &self.kind {
            ValueKind::Enumeration { options } => options,
            _ => &[],
        }
    }
}

/// Ordered field descriptors of one record type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Schema {
    type_name: String,
    fields: Vec<FieldDescriptor>,
}

impl Schema {
    #[must_use]
    pub fn derive<R: Record>() -> Self {
        Self::from_defs(R::TYPE_NAME, &R::field_defs())
    }

    /// A repeated field name keeps its first declaration.
    #[must_use]
    pub fn from_defs(type_name: &str, defs: &[FieldDef]) -> Self {
        let mut fields: Vec<FieldDescriptor> = Vec::with_capacity(defs.len());
        for def in defs {
            if fields.iter().any(|field| field.name == def.name) {
                warn!(record_type = type_name, field = %def.name, "duplicate field definition ignored");
                continue;
            }
            fields.push(FieldDescriptor::from_def(def));
        }
        Self { type_name: type_name.to_string(), fields }
    }

    #[must_use]
    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    #[must_use]
    pub fn fields(&self) -> &[FieldDescriptor] {
        &self.fields
    }

    pub fn editable(&self) -> impl Iterator<Item = &FieldDescriptor> {
        self.fields.iter().filter(|field| field.is_editable())
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&FieldDescriptor> {
        self.fields.iter().find(|field| field.name == name)
    }

    /// # Errors
    /// Returns [`EngineError::Schema`] when the type declares no such field.
    pub fn field(&self, name: &str) -> Result<&FieldDescriptor, EngineError> {
        self.get(name).ok_or_else(|| {
            EngineError::Schema(format!("{} has no field named `{name}`", self.type_name))
        })
    }
}

/// Per-engine cache so each record type's schema is derived once.
#[derive(Debug, Default)]
pub struct SchemaRegistry {
    cache: RwLock<BTreeMap<&'static str, Arc<Schema>>>,
}

impl SchemaRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn schema_for<R: Record>(&self) -> Arc<Schema> {
        if let Some(schema) =
            self.cache.read().unwrap_or_else(PoisonError::into_inner).get(R::TYPE_NAME)
        {
            return Arc::clone(schema);
        }

        let mut cache = self.cache.write().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(cache.entry(R::TYPE_NAME).or_insert_with(|| Arc::new(Schema::derive::<R>())))
    }
}

/// Splits a PascalCase identifier into words: `InStock` becomes `In Stock`.
/// Runs of capitals stay together, so `SKUCode` becomes `SKU Code`.
#[must_use]
pub fn humanize_field_name(name: &str) -> String {
    let chars: Vec<char> = name.chars().collect();
    let mut out = String::with_capacity(name.len() + 4);
    for (index, &current) in chars.iter().enumerate() {
        if index > 0 && current.is_uppercase() {
            let previous = chars[index - 1];
            let next_is_lower = chars.get(index + 1).is_some_and(|next| next.is_lowercase());
            if !previous.is_uppercase() || next_is_lower {
                out.push(' ');
            }
        }
        out.push(current);
    }
    out
}
