mod domain;

use std::fs;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;

use anyhow::{anyhow, Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use domain::{Category, Item, Tag};
use record_engine_core::{
    build_form, search_expression, to_markdown, AccessPolicy, AllowAll, DataStore, EditSet,
    EditValue, EngineError, FieldDescriptor, FieldValue, FilterRow, Lookup, Prompt, ReadOnly,
    Record, RecordEngine, RecordId, RecordPredicate, Schema, SortKey, SortSpec, ValueKind,
};
use record_engine_store_sqlite::SqliteStore;
use serde_json::{Map, Value};
use tracing::debug;
use tracing_subscriber::EnvFilter;

const CLI_CONTRACT_VERSION: &str = "cli.v1";

#[derive(Debug, Parser)]
#[command(name = "rk")]
#[command(about = "Record engine CLI")]
struct Cli {
    #[arg(long, env = "RK_DB", default_value = "./records.sqlite3", global = true)]
    db: PathBuf,

    /// Name recorded in audit entries.
    #[arg(long, env = "RK_ACTOR", global = true)]
    actor: Option<String>,

    /// Only allow viewing and filtering.
    #[arg(long, default_value_t = false, global = true)]
    read_only: bool,

    /// Answer yes to every confirmation.
    #[arg(long, default_value_t = false, global = true)]
    yes: bool,

    #[arg(long, short, default_value_t = false, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(flatten)]
    Record(RecordCommand),
    /// Show the mutation audit trail.
    Audit,
    Db {
        #[command(subcommand)]
        command: Box<DbCommand>,
    },
}

#[derive(Debug, Subcommand)]
enum RecordCommand {
    /// Print the derived field schema.
    Schema(TypeArgs),
    /// Create a record, optionally applying `--set Field=Value` edits.
    Add(SetArgs),
    List(ListArgs),
    Show(ShowArgs),
    /// Print the edit form widgets for a record.
    Form(IdArgs),
    Edit(EditArgs),
    Duplicate(IdArgs),
    Delete(IdArgs),
    /// Delete every record of the type.
    Clear(TypeArgs),
    Export(ExportArgs),
    /// Replace every record of the type with the rows of a `;`-delimited file.
    Import(ImportArgs),
    Search(SearchArgs),
}

#[derive(Debug, Subcommand)]
enum DbCommand {
    SchemaVersion,
    Migrate,
    IntegrityCheck,
    Backup(DbBackupArgs),
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum RecordTypeArg {
    Category,
    Tag,
    Item,
}

#[derive(Debug, Args)]
struct TypeArgs {
    #[arg(long = "type", value_enum)]
    record_type: RecordTypeArg,
}

#[derive(Debug, Args)]
struct IdArgs {
    #[arg(long = "type", value_enum)]
    record_type: RecordTypeArg,
    #[arg(long)]
    id: i64,
}

#[derive(Debug, Args)]
struct SetArgs {
    #[arg(long = "type", value_enum)]
    record_type: RecordTypeArg,
    #[arg(long = "set", value_name = "FIELD=VALUE")]
    set: Vec<String>,
}

#[derive(Debug, Args)]
struct EditArgs {
    #[arg(long = "type", value_enum)]
    record_type: RecordTypeArg,
    #[arg(long)]
    id: i64,
    #[arg(long = "set", value_name = "FIELD=VALUE", required = true)]
    set: Vec<String>,
}

#[derive(Debug, Args)]
struct ListArgs {
    #[arg(long = "type", value_enum)]
    record_type: RecordTypeArg,
    /// Filter row such as `Price>5`, `InStock=true` or `Name~widget`.
    #[arg(long = "where", value_name = "FIELD OP VALUE")]
    filters: Vec<String>,
    /// Sort key such as `Price:desc`.
    #[arg(long = "sort", value_name = "FIELD[:asc|desc]")]
    sort: Vec<String>,
}

#[derive(Debug, Args)]
struct ShowArgs {
    #[arg(long = "type", value_enum)]
    record_type: RecordTypeArg,
    #[arg(long)]
    id: i64,
    /// Include a Markdown rendering of the record.
    #[arg(long, default_value_t = false)]
    markdown: bool,
}

#[derive(Debug, Args)]
struct ExportArgs {
    #[arg(long = "type", value_enum)]
    record_type: RecordTypeArg,
    #[arg(long)]
    out: Option<PathBuf>,
}

#[derive(Debug, Args)]
struct ImportArgs {
    #[arg(long = "type", value_enum)]
    record_type: RecordTypeArg,
    #[arg(long = "in")]
    input: PathBuf,
}

#[derive(Debug, Args)]
struct SearchArgs {
    #[arg(long = "type", value_enum)]
    record_type: RecordTypeArg,
    #[arg(long)]
    field: String,
    #[arg(long)]
    value: String,
}

#[derive(Debug, Args)]
struct DbBackupArgs {
    #[arg(long)]
    out: PathBuf,
}

impl RecordCommand {
    fn record_type(&self) -> RecordTypeArg {
        match self {
            Self::Schema(args) | Self::Clear(args) => args.record_type,
            Self::Add(args) => args.record_type,
            Self::List(args) => args.record_type,
            Self::Show(args) => args.record_type,
            Self::Form(args) | Self::Duplicate(args) | Self::Delete(args) => args.record_type,
            Self::Edit(args) => args.record_type,
            Self::Export(args) => args.record_type,
            Self::Import(args) => args.record_type,
            Self::Search(args) => args.record_type,
        }
    }
}

/// Confirmation on stderr/stdin; `--yes` answers every question up front.
struct TerminalPrompt {
    assume_yes: bool,
}

impl Prompt for TerminalPrompt {
    fn confirm(&self, title: &str, message: &str) -> bool {
        if self.assume_yes {
            return true;
        }
        eprint!("{title}: {message} [y/N] ");
        let _ = io::stderr().flush();
        let mut answer = String::new();
        if io::stdin().lock().read_line(&mut answer).is_err() {
            return false;
        }
        matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes")
    }

    fn alert(&self, title: &str, message: &str) {
        eprintln!("{title}: {message}");
    }
}

struct Session<'a> {
    store: &'a SqliteStore,
    actor: Option<&'a str>,
    policy: &'a dyn AccessPolicy,
    prompt: &'a dyn Prompt,
}

fn with_contract_version(value: Value) -> Value {
    match value {
        Value::Object(mut object) => {
            object.insert(
                "contract_version".to_string(),
                Value::String(CLI_CONTRACT_VERSION.to_string()),
            );
            Value::Object(object)
        }
        other => serde_json::json!({
            "contract_version": CLI_CONTRACT_VERSION,
            "payload": other
        }),
    }
}

fn emit_json(value: Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(&with_contract_version(value))?);
    Ok(())
}

fn init_tracing(verbose: bool) {
    let default_directive = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .try_init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let mut store = SqliteStore::open(&cli.db)?;
    match cli.command {
        Command::Db { command } => run_db(*command, &mut store),
        Command::Audit => {
            store.migrate()?;
            run_audit(&store)
        }
        Command::Record(command) => {
            store.migrate()?;
            let policy: &dyn AccessPolicy = if cli.read_only { &ReadOnly } else { &AllowAll };
            let prompt = TerminalPrompt { assume_yes: cli.yes };
            let session =
                Session { store: &store, actor: cli.actor.as_deref(), policy, prompt: &prompt };
            match command.record_type() {
                RecordTypeArg::Category => run_record::<Category>(&session, command),
                RecordTypeArg::Tag => run_record::<Tag>(&session, command),
                RecordTypeArg::Item => run_record::<Item>(&session, command),
            }
        }
    }
}

fn run_db(command: DbCommand, store: &mut SqliteStore) -> Result<()> {
    match command {
        DbCommand::SchemaVersion => {
            let status = store.schema_status()?;
            emit_json(serde_json::json!({
                "current_version": status.current_version,
                "target_version": status.target_version,
                "pending_versions": status.pending_versions,
                "up_to_date": status.pending_versions.is_empty()
            }))
        }
        DbCommand::Migrate => {
            let before = store.schema_status()?;
            store.migrate()?;
            let after = store.schema_status()?;
            emit_json(serde_json::json!({
                "before_version": before.current_version,
                "applied_versions": before.pending_versions,
                "after_version": after.current_version,
                "target_version": after.target_version,
                "up_to_date": after.pending_versions.is_empty()
            }))
        }
        DbCommand::IntegrityCheck => {
            let report = store.integrity_check()?;
            emit_json(serde_json::to_value(&report).context("failed to serialize integrity report")?)
        }
        DbCommand::Backup(args) => {
            store.migrate()?;
            store.backup_database(&args.out)?;
            emit_json(serde_json::json!({
                "backup_path": args.out,
                "status": "ok"
            }))
        }
    }
}

fn run_audit(store: &SqliteStore) -> Result<()> {
    let entries = store.audit_entries()?;
    let rendered: Vec<Value> = entries
        .iter()
        .map(|entry| {
            serde_json::json!({
                "summary": entry.summary(),
                "actor": entry.actor,
                "action": entry.action,
                "record_type": entry.record_type,
                "recorded_at": entry.recorded_at
            })
        })
        .collect();
    emit_json(serde_json::json!({ "entries": rendered }))
}

fn require(allowed: bool, action: &str, type_name: &str) -> Result<()> {
    if allowed {
        Ok(())
    } else {
        Err(anyhow!("permission denied: cannot {action} {type_name} records"))
    }
}

#[allow(clippy::too_many_lines)]
fn run_record<R: Record>(session: &Session<'_>, command: RecordCommand) -> Result<()> {
    let type_name = R::TYPE_NAME;
    let policy = session.policy;
    let registry = domain::lookups(session.store);
    let mut engine = RecordEngine::new(session.store, &registry);
    if let Some(actor) = session.actor {
        engine = engine.with_actor(actor);
    }
    let schema = engine.schema::<R>();

    match command {
        RecordCommand::Schema(_) => {
            require(policy.can_view(type_name), "view", type_name)?;
            emit_json(serde_json::json!({
                "record_type": type_name,
                "fields": schema.fields().iter().map(describe_field).collect::<Vec<_>>()
            }))
        }
        RecordCommand::Add(args) => {
            require(policy.can_create(type_name), "create", type_name)?;
            let edits = parse_edits(&engine, &schema, &args.set)?;
            let record = engine.create_with::<R>(&edits)?;
            emit_json(serde_json::json!({ "created": record_json(&record, &schema) }))
        }
        RecordCommand::List(args) => {
            require(policy.can_view(type_name), "view", type_name)?;
            if !args.filters.is_empty() {
                require(policy.can_filter(type_name), "filter", type_name)?;
            }
            let rows = args
                .filters
                .iter()
                .map(|raw| {
                    let mut row =
                        FilterRow::parse(raw).ok_or_else(|| anyhow!("invalid filter `{raw}`"))?;
                    if let Some(descriptor) = schema.get(&row.field) {
                        row.value = search_term(&engine, descriptor, &row.value)?;
                    }
                    Ok(row)
                })
                .collect::<Result<Vec<_>>>()?;
            let keys = args
                .sort
                .iter()
                .map(|raw| SortKey::parse(raw).ok_or_else(|| anyhow!("invalid sort key `{raw}`")))
                .collect::<Result<Vec<_>>>()?;
            let predicate = RecordPredicate::from_rows(&schema, &rows);
            let sort = SortSpec::new(&schema, &keys)?;
            let records = engine.list::<R>(&predicate, &sort)?;
            emit_json(serde_json::json!({
                "record_type": type_name,
                "applied_filters": predicate.filters().len(),
                "count": records.len(),
                "records": render_records(&records, &schema)
            }))
        }
        RecordCommand::Show(args) => {
            require(policy.can_view(type_name), "view", type_name)?;
            let record = find_record::<R, _, _>(&engine, args.id)?;
            let mut payload = serde_json::json!({ "record": record_json(&record, &schema) });
            if args.markdown {
                payload["markdown"] = Value::String(to_markdown(&record, &schema));
            }
            emit_json(payload)
        }
        RecordCommand::Form(args) => {
            require(policy.can_view(type_name), "view", type_name)?;
            let record = find_record::<R, _, _>(&engine, args.id)?;
            let form = build_form(&record, &schema, &registry)?;
            emit_json(serde_json::json!({
                "record_type": type_name,
                "id": record.id(),
                "fields": serde_json::to_value(&form).context("failed to serialize form")?
            }))
        }
        RecordCommand::Edit(args) => {
            require(policy.can_edit(type_name), "edit", type_name)?;
            let mut record = find_record::<R, _, _>(&engine, args.id)?;
            let edits = parse_edits(&engine, &schema, &args.set)?;
            engine.update(&mut record, &edits)?;
            emit_json(serde_json::json!({ "updated": record_json(&record, &schema) }))
        }
        RecordCommand::Duplicate(args) => {
            require(policy.can_create(type_name), "create", type_name)?;
            let source = find_record::<R, _, _>(&engine, args.id)?;
            let copy = engine.duplicate(&source)?;
            emit_json(serde_json::json!({
                "source_id": source.id(),
                "created": record_json(&copy, &schema)
            }))
        }
        RecordCommand::Delete(args) => {
            require(policy.can_delete(type_name), "delete", type_name)?;
            let record = find_record::<R, _, _>(&engine, args.id)?;
            if !session.prompt.confirm("Delete", "Are you sure you want to delete this record?") {
                return emit_json(serde_json::json!({ "cancelled": true }));
            }
            engine.delete(&record)?;
            emit_json(serde_json::json!({ "deleted_id": record.id(), "name": record.name() }))
        }
        RecordCommand::Clear(_) => {
            require(policy.can_delete(type_name), "delete", type_name)?;
            let message = format!("Delete every {type_name} record?");
            if !session.prompt.confirm("Clear all", &message) {
                return emit_json(serde_json::json!({ "cancelled": true }));
            }
            engine.clear_all::<R>()?;
            emit_json(serde_json::json!({ "record_type": type_name, "cleared": true }))
        }
        RecordCommand::Export(args) => {
            require(policy.can_view(type_name), "view", type_name)?;
            let text = match engine.export_csv::<R>() {
                Ok(text) => text,
                Err(EngineError::NothingToExport(_)) => {
                    session.prompt.alert("Export", "No data to export");
                    return emit_json(serde_json::json!({ "record_type": type_name, "rows": 0 }));
                }
                Err(err) => return Err(err.into()),
            };
            let rows = text.lines().count().saturating_sub(1);
            match args.out {
                Some(path) => {
                    fs::write(&path, &text)
                        .with_context(|| format!("failed to write export file {}", path.display()))?;
                    emit_json(serde_json::json!({
                        "record_type": type_name,
                        "rows": rows,
                        "out": path
                    }))
                }
                None => emit_json(serde_json::json!({
                    "record_type": type_name,
                    "rows": rows,
                    "csv": text
                })),
            }
        }
        RecordCommand::Import(args) => {
            require(policy.can_import(type_name), "import", type_name)?;
            let text = fs::read_to_string(&args.input)
                .with_context(|| format!("failed to read import file {}", args.input.display()))?;
            let message = format!("Importing replaces every {type_name} record. Continue?");
            if !session.prompt.confirm("Import", &message) {
                return emit_json(serde_json::json!({ "cancelled": true }));
            }
            let report = engine.import_csv::<R>(&text)?;
            if report.skipped_cells > 0 {
                let message = format!(
                    "{} cells could not be read and were left at their defaults",
                    report.skipped_cells
                );
                session.prompt.alert("Import", &message);
            }
            emit_json(serde_json::json!({
                "record_type": type_name,
                "in": args.input,
                "report": serde_json::to_value(report).context("failed to serialize import report")?
            }))
        }
        RecordCommand::Search(args) => {
            require(policy.can_filter(type_name), "filter", type_name)?;
            let descriptor = schema.field(&args.field)?;
            let term = search_term(&engine, descriptor, &args.value)?;
            let expression = search_expression(descriptor, &term).ok_or_else(|| {
                anyhow!(
                    "`{}` cannot be matched against {} field `{}`",
                    args.value,
                    descriptor.kind.as_str(),
                    args.field
                )
            })?;
            let predicate = RecordPredicate::new().and_field(descriptor.name.clone(), expression);
            let records = engine.list::<R>(&predicate, &SortSpec::identity())?;
            emit_json(serde_json::json!({
                "record_type": type_name,
                "field": args.field,
                "count": records.len(),
                "records": render_records(&records, &schema)
            }))
        }
    }
}

fn render_records<R: Record>(records: &[R], schema: &Schema) -> Vec<Value> {
    records.iter().map(|record| record_json(record, schema)).collect()
}

fn describe_field(field: &FieldDescriptor) -> Value {
    serde_json::json!({
        "name": field.name,
        "label": field.label(),
        "kind": field.kind,
        "editable": field.is_editable(),
        "unique": field.unique,
        "relation": field.relation
    })
}

fn find_record<R, S, L>(engine: &RecordEngine<'_, S, L>, id: i64) -> Result<R>
where
    R: Record,
    S: DataStore,
    L: Lookup + ?Sized,
{
    engine
        .find::<R>(RecordId(id))?
        .ok_or_else(|| anyhow!("no {} record with id {id}", R::TYPE_NAME))
}

fn field_value_json(value: &FieldValue) -> Value {
    match value {
        FieldValue::Null => Value::Null,
        FieldValue::Integer(number) => Value::from(*number),
        FieldValue::Number(number) => {
            serde_json::Number::from_f64(*number).map_or(Value::Null, Value::Number)
        }
        FieldValue::Text(text) | FieldValue::Enum(text) => Value::String(text.clone()),
        FieldValue::Bool(flag) => Value::Bool(*flag),
    }
}

fn record_json<R: Record>(record: &R, schema: &Schema) -> Value {
    let mut object = Map::new();
    for field in schema.fields() {
        let value = record.get(&field.name).unwrap_or(FieldValue::Null);
        object.insert(field.name.clone(), field_value_json(&value));
    }
    Value::Object(object)
}

/// Turns `Field=Value` pairs into widget edits; relationship values are target names.
fn parse_edits<S, L>(
    engine: &RecordEngine<'_, S, L>,
    schema: &Schema,
    pairs: &[String],
) -> Result<EditSet>
where
    S: DataStore,
    L: Lookup + ?Sized,
{
    let resolver = engine.resolver();
    let mut edits = EditSet::new();
    for pair in pairs {
        let (field, raw) =
            pair.split_once('=').ok_or_else(|| anyhow!("expected FIELD=VALUE, got `{pair}`"))?;
        let descriptor = schema.field(field.trim())?;
        let raw = raw.trim();
        let value = match &descriptor.kind {
            ValueKind::Boolean => EditValue::Bool(
                raw.parse::<bool>()
                    .or_else(|_| raw.to_ascii_lowercase().parse::<bool>())
                    .map_err(|_| anyhow!("field `{field}` expects true or false, got `{raw}`"))?,
            ),
            ValueKind::Enumeration { .. } => EditValue::Enum(raw.to_string()),
            ValueKind::ForeignReference { target } => {
                if raw.is_empty() {
                    EditValue::Foreign(None)
                } else {
                    let found = resolver
                        .find_by_name(descriptor, raw)?
                        .ok_or_else(|| anyhow!("no {target} named `{raw}`"))?;
                    EditValue::Foreign(Some(found))
                }
            }
            ValueKind::ManyToManyReference { target } => {
                let mut chosen = Vec::new();
                for name in raw.split(',').map(str::trim).filter(|name| !name.is_empty()) {
                    let found = resolver
                        .find_by_name(descriptor, name)?
                        .ok_or_else(|| anyhow!("no {target} named `{name}`"))?;
                    chosen.push(found);
                }
                EditValue::ManyToMany(chosen)
            }
            _ => EditValue::Text(raw.to_string()),
        };
        debug!(field = %descriptor.name, "edit parsed");
        edits.insert(descriptor.name.clone(), value);
    }
    Ok(edits)
}

/// Foreign-reference filters and searches accept a target name as well as an id.
fn search_term<S, L>(
    engine: &RecordEngine<'_, S, L>,
    descriptor: &FieldDescriptor,
    value: &str,
) -> Result<String>
where
    S: DataStore,
    L: Lookup + ?Sized,
{
    match &descriptor.kind {
        ValueKind::ForeignReference { target } if value.trim().parse::<i64>().is_err() => {
            let found = engine
                .resolver()
                .find_by_name(descriptor, value.trim())?
                .ok_or_else(|| anyhow!("no {target} named `{}`", value.trim()))?;
            Ok(found.id.to_string())
        }
        _ => Ok(value.to_string()),
    }
}
