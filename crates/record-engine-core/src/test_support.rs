//! Record types shared by the unit tests.

use crate::memory::InMemoryStore;
use crate::record::{FieldValue, Record, RecordBase, RecordId};
use crate::relation::LookupRegistry;
use crate::schema::FieldDef;
use crate::EngineError;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Category {
    pub base: RecordBase,
}

impl Record for Category {
    const TYPE_NAME: &'static str = "Category";

    fn own_field_defs() -> Vec<FieldDef> {
        Vec::new()
    }

    fn base(&self) -> &RecordBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut RecordBase {
        &mut self.base
    }

    fn get_field(&self, _field: &str) -> Option<FieldValue> {
        None
    }

    fn set_field(&mut self, field: &str, _value: FieldValue) -> Result<(), EngineError> {
        Err(EngineError::Schema(format!("Category has no field named `{field}`")))
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Tag {
    pub base: RecordBase,
}

impl Record for Tag {
    const TYPE_NAME: &'static str = "Tag";

    fn own_field_defs() -> Vec<FieldDef> {
        Vec::new()
    }

    fn base(&self) -> &RecordBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut RecordBase {
        &mut self.base
    }

    fn get_field(&self, _field: &str) -> Option<FieldValue> {
        None
    }

    fn set_field(&mut self, field: &str, _value: FieldValue) -> Result<(), EngineError> {
        Err(EngineError::Schema(format!("Tag has no field named `{field}`")))
    }
}

/// A tree node whose parent is another node of the same type.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Node {
    pub base: RecordBase,
    pub parent: Option<RecordId>,
}

impl Record for Node {
    const TYPE_NAME: &'static str = "Node";

    fn own_field_defs() -> Vec<FieldDef> {
        vec![FieldDef::integer("Parent").foreign("Node")]
    }

    fn base(&self) -> &RecordBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut RecordBase {
        &mut self.base
    }

    fn get_field(&self, field: &str) -> Option<FieldValue> {
        (field == "Parent").then(|| FieldValue::from(self.parent))
    }

    fn set_field(&mut self, field: &str, value: FieldValue) -> Result<(), EngineError> {
        match field {
            "Parent" => self.parent = value.into_reference(field)?,
            other => return Err(EngineError::Schema(format!("Node has no field named `{other}`"))),
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Status {
    #[default]
    Draft,
    Active,
    Retired,
}

impl Status {
    pub const NAMES: [&'static str; 3] = ["Draft", "Active", "Retired"];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Draft => "Draft",
            Self::Active => "Active",
            Self::Retired => "Retired",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "Draft" => Some(Self::Draft),
            "Active" => Some(Self::Active),
            "Retired" => Some(Self::Retired),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Item {
    pub base: RecordBase,
    pub price: f64,
    pub in_stock: bool,
    pub status: Status,
    pub category: Option<RecordId>,
    pub tags: String,
    pub manual: String,
    pub sku: String,
    pub legacy_code: i64,
}

impl Record for Item {
    const TYPE_NAME: &'static str = "Item";

    fn own_field_defs() -> Vec<FieldDef> {
        vec![
            FieldDef::number("Price"),
            FieldDef::boolean("InStock"),
            FieldDef::enumeration("Status", &Status::NAMES),
            FieldDef::integer("Category").foreign("Category"),
            FieldDef::text("Tags").many_to_many("Tag"),
            FieldDef::text("Manual").file(),
            FieldDef::text("Sku").unique(),
            FieldDef::integer("LegacyCode"),
            FieldDef::text("Label").read_only(),
        ]
    }

    fn base(&self) -> &RecordBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut RecordBase {
        &mut self.base
    }

    fn get_field(&self, field: &str) -> Option<FieldValue> {
        let value = match field {
            "Price" => FieldValue::Number(self.price),
            "InStock" => FieldValue::Bool(self.in_stock),
            "Status" => FieldValue::Enum(self.status.as_str().to_string()),
            "Category" => FieldValue::from(self.category),
            "Tags" => FieldValue::Text(self.tags.clone()),
            "Manual" => FieldValue::Text(self.manual.clone()),
            "Sku" => FieldValue::Text(self.sku.clone()),
            "LegacyCode" => FieldValue::Integer(self.legacy_code),
            "Label" => FieldValue::Text(format!("{} ({})", self.base.name, self.status.as_str())),
            _ => return None,
        };
        Some(value)
    }

    fn set_field(&mut self, field: &str, value: FieldValue) -> Result<(), EngineError> {
        match field {
            "Price" => self.price = value.into_number(field)?,
            "InStock" => self.in_stock = value.into_bool(field)?,
            "Status" => {
                let name = value.into_enum(field)?;
                self.status = Status::parse(&name).ok_or_else(|| {
                    EngineError::Coercion {
                        field: field.to_string(),
                        reason: format!("`{name}` is not a Status"),
                    }
                })?;
            }
            "Category" => self.category = value.into_reference(field)?,
            "Tags" => self.tags = value.into_text(field)?,
            "Manual" => self.manual = value.into_text(field)?,
            "Sku" => self.sku = value.into_text(field)?,
            "LegacyCode" => self.legacy_code = value.into_integer(field)?,
            other => return Err(EngineError::Schema(format!("Item has no field named `{other}`"))),
        }
        Ok(())
    }
}

pub fn named<R: Record>(name: &str) -> R {
    let mut record = R::default();
    record.base_mut().name = name.to_string();
    record
}

pub fn lookups(store: &InMemoryStore) -> LookupRegistry<'_> {
    let mut registry = LookupRegistry::new();
    registry
        .register_store::<Category, _>(store)
        .register_store::<Tag, _>(store)
        .register_store::<Item, _>(store)
        .register_store::<Node, _>(store);
    registry
}
