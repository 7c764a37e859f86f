//! Inventory record types served by the `rk` binary.

use record_engine_core::{
    DataStore, EngineError, FieldDef, FieldValue, LookupRegistry, Record, RecordBase, RecordId,
};

#[derive(Debug, Clone, Default)]
pub struct Category {
    base: RecordBase,
    code: String,
}

impl Record for Category {
    const TYPE_NAME: &'static str = "Category";

    fn own_field_defs() -> Vec<FieldDef> {
        vec![FieldDef::text("Code").unique()]
    }

    fn base(&self) -> &RecordBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut RecordBase {
        &mut self.base
    }

    fn get_field(&self, field: &str) -> Option<FieldValue> {
        (field == "Code").then(|| FieldValue::Text(self.code.clone()))
    }

    fn set_field(&mut self, field: &str, value: FieldValue) -> Result<(), EngineError> {
        match field {
            "Code" => self.code = value.into_text(field)?,
            other => return Err(unknown_field(Self::TYPE_NAME, other)),
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
pub struct Tag {
    base: RecordBase,
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
        Err(unknown_field(Self::TYPE_NAME, field))
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
    const NAMES: [&'static str; 3] = ["Draft", "Active", "Retired"];

    fn as_str(self) -> &'static str {
        match self {
            Self::Draft => "Draft",
            Self::Active => "Active",
            Self::Retired => "Retired",
        }
    }

    fn parse(value: &str) -> Option<Self> {
        match value {
            "Draft" => Some(Self::Draft),
            "Active" => Some(Self::Active),
            "Retired" => Some(Self::Retired),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Item {
    base: RecordBase,
    price: f64,
    in_stock: bool,
    status: Status,
    category: Option<RecordId>,
    tags: String,
    manual: String,
    sku: String,
}

impl Record for Item {
    const TYPE_NAME: &'static str = "Item";

    fn own_field_defs() -> Vec<FieldDef> {
        vec![
            FieldDef::number("Price"),
            FieldDef::boolean("InStock"),
            FieldDef::enumeration("Status", &Status::NAMES),
            FieldDef::integer("Category").foreign(Category::TYPE_NAME),
            FieldDef::text("Tags").many_to_many(Tag::TYPE_NAME),
            FieldDef::text("Manual").file(),
            FieldDef::text("Sku").unique(),
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
                self.status = Status::parse(&name).ok_or_else(|| EngineError::Coercion {
                    field: field.to_string(),
                    reason: format!("`{name}` is not a Status"),
                })?;
            }
            "Category" => self.category = value.into_reference(field)?,
            "Tags" => self.tags = value.into_text(field)?,
            "Manual" => self.manual = value.into_text(field)?,
            "Sku" => self.sku = value.into_text(field)?,
            other => return Err(unknown_field(Self::TYPE_NAME, other)),
        }
        Ok(())
    }
}

fn unknown_field(type_name: &str, field: &str) -> EngineError {
    EngineError::Schema(format!("{type_name} has no field named `{field}`"))
}

/// Every type a relationship can point at, served straight from `store`.
pub fn lookups<S: DataStore>(store: &S) -> LookupRegistry<'_> {
    let mut registry = LookupRegistry::new();
    registry
        .register_store::<Category, S>(store)
        .register_store::<Tag, S>(store)
        .register_store::<Item, S>(store);
    registry
}
