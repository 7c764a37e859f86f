use criterion::{criterion_group, criterion_main, Criterion};
use record_engine_core::{
    EngineError, FieldDef, FieldValue, FilterExpression, FilterOp, FilterRow, Record, RecordBase,
    RecordId, RecordPredicate, Schema, SortDirection, SortKey, SortSpec, StringMode,
};

const GRADES: [&str; 3] = ["Low", "Mid", "High"];

#[derive(Debug, Clone, Default)]
struct Part {
    base: RecordBase,
    weight: f64,
    fragile: bool,
    grade: String,
}

impl Record for Part {
    const TYPE_NAME: &'static str = "Part";

    fn own_field_defs() -> Vec<FieldDef> {
        vec![
            FieldDef::number("Weight"),
            FieldDef::boolean("Fragile"),
            FieldDef::enumeration("Grade", &GRADES),
        ]
    }

    fn base(&self) -> &RecordBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut RecordBase {
        &mut self.base
    }

    fn get_field(&self, field: &str) -> Option<FieldValue> {
        match field {
            "Weight" => Some(FieldValue::Number(self.weight)),
            "Fragile" => Some(FieldValue::Bool(self.fragile)),
            "Grade" => Some(FieldValue::Enum(self.grade.clone())),
            _ => None,
        }
    }

    fn set_field(&mut self, field: &str, value: FieldValue) -> Result<(), EngineError> {
        match field {
            "Weight" => self.weight = value.into_number(field)?,
            "Fragile" => self.fragile = value.into_bool(field)?,
            "Grade" => self.grade = value.into_enum(field)?,
            other => return Err(EngineError::Schema(format!("Part has no field named `{other}`"))),
        }
        Ok(())
    }
}

#[allow(clippy::cast_precision_loss, clippy::cast_possible_wrap)]
fn mk_part(index: usize) -> Part {
    let mut part = Part::default();
    part.base.id = RecordId(index as i64 + 1);
    part.base.name = format!("part-{:05}", (index * 7_919) % 10_000);
    part.weight = ((index * 31) % 500) as f64 / 10.0;
    part.fragile = index % 3 == 0;
    part.grade = GRADES[index % GRADES.len()].to_string();
    part
}

fn bench_filter(c: &mut Criterion) {
    let parts = (0..10_000).map(mk_part).collect::<Vec<_>>();
    let schema = Schema::derive::<Part>();
    let predicate = RecordPredicate::from_rows(
        &schema,
        &[
            FilterRow::new("Weight", FilterOp::Greater, "12.5"),
            FilterRow::new("Fragile", FilterOp::Equal, "false"),
        ],
    )
    .and_field("Name", FilterExpression::text(StringMode::Contains, "PART-0"));

    c.bench_function("filter_10000_records", |b| {
        b.iter(|| {
            let kept = predicate.filter(parts.clone());
            assert!(kept.len() < parts.len());
        });
    });
}

fn bench_sort(c: &mut Criterion) {
    let parts = (0..10_000).map(mk_part).collect::<Vec<_>>();
    let schema = Schema::derive::<Part>();
    let spec = match SortSpec::new(
        &schema,
        &[
            SortKey::new("Grade", SortDirection::Descending),
            SortKey::new("Weight", SortDirection::Ascending),
            SortKey::new("Name", SortDirection::Ascending),
        ],
    ) {
        Ok(spec) => spec,
        Err(err) => panic!("sort benchmark spec failed: {err}"),
    };

    c.bench_function("sort_10000_records_three_keys", |b| {
        b.iter(|| {
            let sorted = spec.apply(parts.clone());
            assert_eq!(sorted.len(), parts.len());
        });
    });
}

criterion_group!(filter_sort_benches, bench_filter, bench_sort);
criterion_main!(filter_sort_benches);
