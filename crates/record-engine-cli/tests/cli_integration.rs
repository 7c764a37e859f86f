use std::ffi::OsStr;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use std::time::{SystemTime, UNIX_EPOCH};

use serde_json::Value;

fn unique_temp_dir(prefix: &str) -> PathBuf {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_else(|err| panic!("clock should be >= UNIX_EPOCH: {err}"))
        .as_nanos();
    let dir = std::env::temp_dir().join(format!("{prefix}-{now}"));
    fs::create_dir_all(&dir)
        .unwrap_or_else(|err| panic!("failed to create temp dir {}: {err}", dir.display()));
    dir
}

fn run_rk<I, S>(args: I) -> Output
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    Command::new(env!("CARGO_BIN_EXE_rk"))
        .args(args)
        .env_remove("RK_DB")
        .env_remove("RK_ACTOR")
        .env_remove("RUST_LOG")
        .output()
        .unwrap_or_else(|err| panic!("failed to execute rk binary: {err}"))
}

fn run_json<I, S>(args: I) -> Value
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let output = run_rk(args);
    if !output.status.success() {
        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        panic!(
            "rk command failed (status={}):\nstdout:\n{}\nstderr:\n{}",
            output.status, stdout, stderr
        );
    }

    let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
    serde_json::from_str(&stdout)
        .unwrap_or_else(|err| panic!("stdout is not valid JSON: {err}\nstdout:\n{stdout}"))
}

fn as_i64(value: &Value, key: &str) -> i64 {
    value
        .get(key)
        .and_then(Value::as_i64)
        .unwrap_or_else(|| panic!("missing integer field `{key}` in payload: {value}"))
}

fn as_str<'a>(value: &'a Value, key: &str) -> &'a str {
    value
        .get(key)
        .and_then(Value::as_str)
        .unwrap_or_else(|| panic!("missing string field `{key}` in payload: {value}"))
}

fn as_array<'a>(value: &'a Value, key: &str) -> &'a Vec<Value> {
    value
        .get(key)
        .and_then(Value::as_array)
        .unwrap_or_else(|| panic!("missing array field `{key}` in payload: {value}"))
}

fn path_str(path: &Path) -> &str {
    path.to_str().unwrap_or_else(|| panic!("path should be valid UTF-8: {}", path.display()))
}

fn names(records: &[Value]) -> Vec<&str> {
    records.iter().map(|record| as_str(record, "Name")).collect()
}

/// Two categories, two tags and three items with distinct prices.
fn seed_inventory(db: &str) -> i64 {
    run_json(["--db", db, "add", "--type", "category", "--set", "Name=Hardware", "--set", "Code=HW"]);
    run_json(["--db", db, "add", "--type", "category", "--set", "Name=Software", "--set", "Code=SW"]);
    run_json(["--db", db, "add", "--type", "tag", "--set", "Name=red"]);
    run_json(["--db", db, "add", "--type", "tag", "--set", "Name=blue"]);

    let widget = run_json([
        "--db",
        db,
        "add",
        "--type",
        "item",
        "--set",
        "Name=Widget",
        "--set",
        "Price=12.5",
        "--set",
        "InStock=true",
        "--set",
        "Status=Active",
        "--set",
        "Category=Hardware",
        "--set",
        "Tags=red,blue",
    ]);
    run_json([
        "--db", db, "add", "--type", "item", "--set", "Name=Gizmo", "--set", "Price=3",
        "--set", "Category=Software",
    ]);
    run_json([
        "--db", db, "add", "--type", "item", "--set", "Name=Doohickey", "--set", "Price=40",
        "--set", "InStock=true",
    ]);
    as_i64(&widget["created"], "Id")
}

#[test]
fn every_payload_carries_the_contract_version() {
    let root = unique_temp_dir("rk-contract");
    let db = root.join("records.sqlite3");
    let db_str = path_str(&db);

    for payload in [
        run_json(["--db", db_str, "db", "schema-version"]),
        run_json(["--db", db_str, "schema", "--type", "item"]),
        run_json(["--db", db_str, "audit"]),
    ] {
        assert_eq!(as_str(&payload, "contract_version"), "cli.v1");
    }

    let _ = fs::remove_dir_all(root);
}

#[test]
fn db_commands_report_migration_and_integrity() {
    let root = unique_temp_dir("rk-db");
    let db = root.join("records.sqlite3");
    let db_str = path_str(&db);

    let before = run_json(["--db", db_str, "db", "schema-version"]);
    assert_eq!(as_i64(&before, "current_version"), 0);
    assert_eq!(before.get("up_to_date"), Some(&Value::Bool(false)));

    let migrated = run_json(["--db", db_str, "db", "migrate"]);
    assert_eq!(as_i64(&migrated, "after_version"), as_i64(&migrated, "target_version"));
    assert_eq!(migrated.get("up_to_date"), Some(&Value::Bool(true)));

    seed_inventory(db_str);
    let report = run_json(["--db", db_str, "db", "integrity-check"]);
    assert_eq!(report.get("quick_check_ok"), Some(&Value::Bool(true)));
    assert_eq!(report["record_counts"]["Item"].as_i64(), Some(3));
    assert_eq!(report["record_counts"]["Category"].as_i64(), Some(2));

    let backup = root.join("backup.sqlite3");
    let backup_out = run_json(["--db", db_str, "db", "backup", "--out", path_str(&backup)]);
    assert_eq!(as_str(&backup_out, "status"), "ok");
    let restored = run_json(["--db", path_str(&backup), "list", "--type", "item"]);
    assert_eq!(as_i64(&restored, "count"), 3);

    let _ = fs::remove_dir_all(root);
}

#[test]
fn schema_lists_field_kinds_in_declaration_order() {
    let root = unique_temp_dir("rk-schema");
    let db = root.join("records.sqlite3");

    let schema = run_json(["--db", path_str(&db), "schema", "--type", "item"]);
    let fields = as_array(&schema, "fields");
    let described: Vec<(&str, &str)> = fields
        .iter()
        .map(|field| (as_str(field, "name"), as_str(&field["kind"], "kind")))
        .collect();
    assert_eq!(
        described,
        vec![
            ("Id", "identifier"),
            ("Name", "text"),
            ("Description", "text"),
            ("CreatedAt", "frozen_text"),
            ("Price", "number"),
            ("InStock", "boolean"),
            ("Status", "enumeration"),
            ("Category", "foreign_reference"),
            ("Tags", "many_to_many_reference"),
            ("Manual", "file_reference"),
            ("Sku", "text"),
        ]
    );
    assert_eq!(as_str(&fields[5], "label"), "In Stock");

    let _ = fs::remove_dir_all(root);
}

#[test]
fn list_applies_filter_rows_and_sort_keys() {
    let root = unique_temp_dir("rk-list");
    let db = root.join("records.sqlite3");
    let db_str = path_str(&db);
    seed_inventory(db_str);

    let all = run_json(["--db", db_str, "list", "--type", "item"]);
    assert_eq!(names(as_array(&all, "records")), vec!["Widget", "Gizmo", "Doohickey"]);

    let by_price = run_json(["--db", db_str, "list", "--type", "item", "--sort", "Price:desc"]);
    assert_eq!(names(as_array(&by_price, "records")), vec!["Doohickey", "Widget", "Gizmo"]);

    let filtered = run_json([
        "--db",
        db_str,
        "list",
        "--type",
        "item",
        "--where",
        "Price>5",
        "--where",
        "InStock=true",
        "--sort",
        "Name",
    ]);
    assert_eq!(as_i64(&filtered, "applied_filters"), 2);
    assert_eq!(names(as_array(&filtered, "records")), vec!["Doohickey", "Widget"]);

    let contains = run_json(["--db", db_str, "list", "--type", "item", "--where", "Name~IZ"]);
    assert_eq!(names(as_array(&contains, "records")), vec!["Gizmo"]);

    let _ = fs::remove_dir_all(root);
}

#[test]
fn search_matches_foreign_references_by_name() {
    let root = unique_temp_dir("rk-search");
    let db = root.join("records.sqlite3");
    let db_str = path_str(&db);
    seed_inventory(db_str);

    let found = run_json([
        "--db", db_str, "search", "--type", "item", "--field", "Category", "--value", "Software",
    ]);
    assert_eq!(names(as_array(&found, "records")), vec!["Gizmo"]);

    let priced = run_json([
        "--db", db_str, "search", "--type", "item", "--field", "Price", "--value", "12.5",
    ]);
    assert_eq!(names(as_array(&priced, "records")), vec!["Widget"]);

    let output = run_rk([
        "--db", db_str, "search", "--type", "item", "--field", "Tags", "--value", "red",
    ]);
    assert!(!output.status.success(), "many-to-many fields are not searchable");

    let _ = fs::remove_dir_all(root);
}

#[test]
fn failed_edit_leaves_the_stored_record_unchanged() {
    let root = unique_temp_dir("rk-edit");
    let db = root.join("records.sqlite3");
    let db_str = path_str(&db);
    let widget_id = seed_inventory(db_str).to_string();

    let output = run_rk([
        "--db", db_str, "edit", "--type", "item", "--id", &widget_id, "--set", "Name=Renamed",
        "--set", "Price=abc",
    ]);
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("Price"), "stderr should name the failing field: {stderr}");

    let shown = run_json(["--db", db_str, "show", "--type", "item", "--id", &widget_id]);
    assert_eq!(as_str(&shown["record"], "Name"), "Widget");
    assert_eq!(shown["record"]["Price"].as_f64(), Some(12.5));

    let edited = run_json([
        "--db", db_str, "edit", "--type", "item", "--id", &widget_id, "--set", "Price=15",
        "--set", "Category=",
    ]);
    assert_eq!(edited["updated"]["Price"].as_f64(), Some(15.0));
    assert_eq!(edited["updated"]["Category"], Value::Null);

    let _ = fs::remove_dir_all(root);
}

#[test]
fn show_form_and_duplicate_render_one_record() {
    let root = unique_temp_dir("rk-show");
    let db = root.join("records.sqlite3");
    let db_str = path_str(&db);
    let widget_id = seed_inventory(db_str).to_string();

    let shown =
        run_json(["--db", db_str, "show", "--type", "item", "--id", &widget_id, "--markdown"]);
    let markdown = as_str(&shown, "markdown");
    assert!(markdown.starts_with("# Item Details\n\n"));
    assert!(markdown.contains("**Price**: 12.5\n\n"));

    let form = run_json(["--db", db_str, "form", "--type", "item", "--id", &widget_id]);
    let fields = as_array(&form, "fields");
    let category = fields
        .iter()
        .find(|field| as_str(field, "name") == "Category")
        .unwrap_or_else(|| panic!("form should include Category: {form}"));
    assert_eq!(as_str(&category["widget"], "widget"), "foreign_picker");
    let selected: Vec<&str> = as_array(&category["widget"], "choices")
        .iter()
        .filter(|choice| choice.get("selected") == Some(&Value::Bool(true)))
        .map(|choice| as_str(choice, "name"))
        .collect();
    assert_eq!(selected, vec!["Hardware"]);

    let copy = run_json(["--db", db_str, "duplicate", "--type", "item", "--id", &widget_id]);
    assert_ne!(as_i64(&copy["created"], "Id"), as_i64(&copy, "source_id"));
    assert_eq!(as_str(&copy["created"], "Name"), "Widget");
    assert_eq!(as_str(&copy["created"], "Tags"), as_str(&shown["record"], "Tags"));

    let _ = fs::remove_dir_all(root);
}

#[test]
fn export_then_import_round_trips_items() {
    let root = unique_temp_dir("rk-csv");
    let db = root.join("records.sqlite3");
    let db_str = path_str(&db);
    seed_inventory(db_str);
    let csv = root.join("items.csv");

    let exported =
        run_json(["--db", db_str, "export", "--type", "item", "--out", path_str(&csv)]);
    assert_eq!(as_i64(&exported, "rows"), 3);
    let text = fs::read_to_string(&csv)
        .unwrap_or_else(|err| panic!("failed to read export {}: {err}", csv.display()));
    assert!(text.starts_with("Id;Name;Description;CreatedAt;Price;"));
    assert!(text.contains(";Hardware;red,blue;"), "relationships export as names: {text}");

    let imported =
        run_json(["--db", db_str, "--yes", "import", "--type", "item", "--in", path_str(&csv)]);
    assert_eq!(as_i64(&imported["report"], "inserted"), 3);
    assert_eq!(as_i64(&imported["report"], "skipped_cells"), 0);

    let listed =
        run_json(["--db", db_str, "list", "--type", "item", "--where", "Category=Hardware"]);
    let records = as_array(&listed, "records");
    assert_eq!(names(records), vec!["Widget"]);
    assert_eq!(records[0]["Price"].as_f64(), Some(12.5));

    let _ = fs::remove_dir_all(root);
}

#[test]
fn import_leaves_unknown_categories_unset() {
    let root = unique_temp_dir("rk-import");
    let db = root.join("records.sqlite3");
    let db_str = path_str(&db);
    seed_inventory(db_str);
    let csv = root.join("incoming.csv");
    fs::write(&csv, "Name;Price;Category\nBolt;abc;Nowhere\nNut;0.25;Hardware\n")
        .unwrap_or_else(|err| panic!("failed to write {}: {err}", csv.display()));

    let imported =
        run_json(["--db", db_str, "--yes", "import", "--type", "item", "--in", path_str(&csv)]);
    assert_eq!(as_i64(&imported["report"], "inserted"), 2);
    assert_eq!(as_i64(&imported["report"], "skipped_cells"), 1);

    let listed = run_json(["--db", db_str, "list", "--type", "item"]);
    let records = as_array(&listed, "records");
    assert_eq!(names(records), vec!["Bolt", "Nut"]);
    assert_eq!(records[0]["Category"], Value::Null);
    assert_eq!(records[0]["Price"].as_f64(), Some(0.0));
    assert!(records[1]["Category"].as_i64().is_some());

    let _ = fs::remove_dir_all(root);
}

#[test]
fn export_of_empty_type_alerts_instead_of_failing() {
    let root = unique_temp_dir("rk-empty");
    let db = root.join("records.sqlite3");

    let output = run_rk(["--db", path_str(&db), "export", "--type", "tag"]);
    assert!(output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("No data to export"), "stderr: {stderr}");

    let _ = fs::remove_dir_all(root);
}

#[test]
fn mutations_are_audited_with_the_actor() {
    let root = unique_temp_dir("rk-audit");
    let db = root.join("records.sqlite3");
    let db_str = path_str(&db);

    let created = run_json([
        "--db", db_str, "--actor", "alice", "add", "--type", "tag", "--set", "Name=urgent",
    ]);
    let id = as_i64(&created["created"], "Id").to_string();
    run_json(["--db", db_str, "--yes", "delete", "--type", "tag", "--id", &id]);
    run_json(["--db", db_str, "--actor", "bob", "--yes", "clear", "--type", "category"]);

    let audit = run_json(["--db", db_str, "audit"]);
    let summaries: Vec<&str> =
        as_array(&audit, "entries").iter().map(|entry| as_str(entry, "summary")).collect();
    assert_eq!(summaries.len(), 4);
    assert!(summaries[0].starts_with("alice - Add "));
    assert_eq!(summaries[1], "alice - Save urgent");
    assert_eq!(summaries[2], "Unknown - Delete urgent");
    assert_eq!(summaries[3], "bob - ClearAll");

    let _ = fs::remove_dir_all(root);
}

#[test]
fn read_only_mode_denies_mutations_but_allows_listing() {
    let root = unique_temp_dir("rk-readonly");
    let db = root.join("records.sqlite3");
    let db_str = path_str(&db);
    let widget_id = seed_inventory(db_str).to_string();

    let denied = run_rk([
        "--db", db_str, "--read-only", "--yes", "delete", "--type", "item", "--id", &widget_id,
    ]);
    assert!(!denied.status.success());
    let stderr = String::from_utf8_lossy(&denied.stderr);
    assert!(stderr.contains("permission denied"), "stderr: {stderr}");

    let listed = run_json(["--db", db_str, "--read-only", "list", "--type", "item"]);
    assert_eq!(as_i64(&listed, "count"), 3);

    let _ = fs::remove_dir_all(root);
}

#[test]
fn declined_confirmation_cancels_delete() {
    let root = unique_temp_dir("rk-cancel");
    let db = root.join("records.sqlite3");
    let db_str = path_str(&db);
    let widget_id = seed_inventory(db_str).to_string();

    let cancelled = run_json(["--db", db_str, "delete", "--type", "item", "--id", &widget_id]);
    assert_eq!(cancelled.get("cancelled"), Some(&Value::Bool(true)));

    let listed = run_json(["--db", db_str, "list", "--type", "item"]);
    assert_eq!(as_i64(&listed, "count"), 3);

    let _ = fs::remove_dir_all(root);
}

#[test]
fn rejected_add_leaves_no_record_or_audit_entry() {
    let root = unique_temp_dir("rk-add-rejected");
    let db = root.join("records.sqlite3");
    let db_str = path_str(&db);

    let output = run_rk([
        "--db", db_str, "add", "--type", "item", "--set", "Name=Bolt", "--set", "Price=abc",
    ]);
    assert!(!output.status.success());

    let listed = run_json(["--db", db_str, "list", "--type", "item"]);
    assert_eq!(as_i64(&listed, "count"), 0);
    let audit = run_json(["--db", db_str, "audit"]);
    assert!(as_array(&audit, "entries").is_empty());

    let _ = fs::remove_dir_all(root);
}
