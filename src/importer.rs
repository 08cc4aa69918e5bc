use anyhow::Result;
use chrono::Utc;
use serde::Serialize;
use std::collections::HashMap;
use tracing::info;

use crate::db::{Database, ImportOp, Project};

/// One parsed source string from an imported document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceString {
    pub name: String,
    pub value: String,
}

/// Aggregate result of one import.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ImportOutcome {
    pub added: u32,
    pub updated: u32,
    pub skipped: u32,
}

/// Merge parsed source strings into the project's key/value store.
///
/// The whole import commits as one transaction: new names become keys with a
/// base-language value, names whose base content changed are overwritten with
/// an `[Old Value]` remark appended to the key, identical content is skipped.
/// Re-importing the same document is idempotent (everything skips, no new
/// remarks). A failure rolls the entire import back.
///
/// Duplicate names inside one document collapse to the LAST occurrence before
/// diffing; re-importing therefore converges even for ill-formed documents.
pub fn reconcile(
    db: &Database,
    project: &Project,
    pairs: &[SourceString],
    actor: &str,
) -> Result<ImportOutcome> {
    let mut outcome = ImportOutcome::default();
    if pairs.is_empty() {
        return Ok(outcome);
    }

    // Last occurrence wins, first-seen order preserved
    let mut order: Vec<&str> = Vec::with_capacity(pairs.len());
    let mut latest: HashMap<&str, &str> = HashMap::with_capacity(pairs.len());
    for pair in pairs {
        if latest.insert(pair.name.as_str(), pair.value.as_str()).is_none() {
            order.push(pair.name.as_str());
        }
    }

    // One bulk fetch instead of a round trip per imported name
    let names: Vec<String> = order.iter().map(|n| (*n).to_string()).collect();
    let existing = db.keys_by_names(&project.id, &names)?;

    let mut ops: Vec<ImportOp> = Vec::new();
    for name in &order {
        let value = latest[name];
        match existing.get(*name) {
            None => {
                ops.push(ImportOp::CreateKey {
                    string_name: (*name).to_string(),
                    language_code: project.base_language.clone(),
                    content: value.to_string(),
                });
                outcome.added += 1;
            }
            Some(key) => match key.value_for(&project.base_language) {
                // Key exists but was never given a base value
                None => {
                    ops.push(ImportOp::CreateValue {
                        key_id: key.key.id,
                        language_code: project.base_language.clone(),
                        content: value.to_string(),
                    });
                    outcome.updated += 1;
                }
                Some(base) if base.content.as_deref() == Some(value) => {
                    outcome.skipped += 1;
                }
                Some(base) => {
                    let old = base.content.as_deref().unwrap_or("");
                    let remark = format!(
                        "[Old Value]: {} -- Updated at {}",
                        old,
                        Utc::now().to_rfc3339()
                    );
                    let remarks = match key.key.remarks.as_deref() {
                        Some(prior) => format!("{}\n{}", prior, remark),
                        None => remark,
                    };
                    ops.push(ImportOp::UpdateValue {
                        value_id: base.id,
                        key_id: key.key.id,
                        content: value.to_string(),
                        remarks,
                    });
                    outcome.updated += 1;
                }
            },
        }
    }

    db.apply_import(&project.id, &ops, actor)?;

    info!(
        "Imported {} strings into project {}: {} added, {} updated, {} skipped",
        order.len(),
        project.id,
        outcome.added,
        outcome.updated,
        outcome.skipped
    );

    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Visibility;
    use proptest::prelude::*;
    use std::collections::HashSet;
    use tempfile::TempDir;

    // ==================== Helper Functions ====================

    fn create_test_db() -> (Database, TempDir) {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let db_path = temp_dir.path().join("test_import.db");
        let db = Database::new(db_path.to_str().unwrap()).expect("Failed to create database");
        (db, temp_dir)
    }

    fn create_test_project(db: &Database) -> Project {
        db.create_project(
            "demo",
            None,
            "en-US",
            &["zh-CN".to_string()],
            Visibility::Public,
            None,
        )
        .expect("Should create project")
    }

    fn pair(name: &str, value: &str) -> SourceString {
        SourceString {
            name: name.to_string(),
            value: value.to_string(),
        }
    }

    // ==================== Basic Reconciliation Tests ====================

    #[test]
    fn test_reconcile_empty_input() {
        let (db, _temp_dir) = create_test_db();
        let project = create_test_project(&db);

        let outcome = reconcile(&db, &project, &[], "importer").expect("reconcile");

        assert_eq!(outcome, ImportOutcome::default());
        assert!(db.list_keys(&project.id).expect("list").is_empty());
    }

    #[test]
    fn test_reconcile_all_new_keys() {
        let (db, _temp_dir) = create_test_db();
        let project = create_test_project(&db);

        let outcome = reconcile(
            &db,
            &project,
            &[pair("app_name", "Demo"), pair("greeting", "Hello")],
            "importer",
        )
        .expect("reconcile");

        assert_eq!(outcome.added, 2);
        assert_eq!(outcome.updated, 0);
        assert_eq!(outcome.skipped, 0);

        let keys = db.list_keys(&project.id).expect("list");
        assert_eq!(keys.len(), 2);
        assert_eq!(
            keys[0].value_for("en-US").and_then(|v| v.content.as_deref()),
            Some("Demo")
        );
        assert_eq!(keys[0].key.last_modified_by.as_deref(), Some("importer"));
    }

    #[test]
    fn test_reconcile_existing_key_without_base_value() {
        let (db, _temp_dir) = create_test_db();
        let project = create_test_project(&db);

        // Key created manually with only a target-language value
        db.create_key(
            &project.id,
            "greeting",
            &[("zh-CN".to_string(), "你好".to_string())],
            None,
            "editor",
        )
        .expect("create");

        let outcome =
            reconcile(&db, &project, &[pair("greeting", "Hello")], "importer").expect("reconcile");

        assert_eq!(outcome.added, 0);
        assert_eq!(outcome.updated, 1);
        assert_eq!(outcome.skipped, 0);

        let keys = db.list_keys(&project.id).expect("list");
        assert_eq!(
            keys[0].value_for("en-US").and_then(|v| v.content.as_deref()),
            Some("Hello")
        );
        // No conflict remark for filling in a missing base value
        assert!(keys[0].key.remarks.is_none());
    }

    #[test]
    fn test_reconcile_identical_content_skipped() {
        let (db, _temp_dir) = create_test_db();
        let project = create_test_project(&db);

        reconcile(&db, &project, &[pair("app_name", "Demo")], "importer").expect("first");
        let outcome =
            reconcile(&db, &project, &[pair("app_name", "Demo")], "importer").expect("second");

        assert_eq!(outcome.added, 0);
        assert_eq!(outcome.updated, 0);
        assert_eq!(outcome.skipped, 1);
    }

    #[test]
    fn test_reconcile_comparison_is_case_sensitive() {
        let (db, _temp_dir) = create_test_db();
        let project = create_test_project(&db);

        reconcile(&db, &project, &[pair("app_name", "demo")], "importer").expect("first");
        let outcome =
            reconcile(&db, &project, &[pair("app_name", "Demo")], "importer").expect("second");

        assert_eq!(outcome.updated, 1);
        assert_eq!(outcome.skipped, 0);
    }

    // ==================== Conflict / Audit Trail Tests ====================

    #[test]
    fn test_reconcile_changed_content_updates_and_remarks() {
        let (db, _temp_dir) = create_test_db();
        let project = create_test_project(&db);

        reconcile(&db, &project, &[pair("app_name", "Old")], "importer").expect("first");
        let outcome =
            reconcile(&db, &project, &[pair("app_name", "New")], "importer").expect("second");

        assert_eq!(outcome.added, 0);
        assert_eq!(outcome.updated, 1);
        assert_eq!(outcome.skipped, 0);

        let keys = db.list_keys(&project.id).expect("list");
        assert_eq!(
            keys[0].value_for("en-US").and_then(|v| v.content.as_deref()),
            Some("New")
        );
        let remarks = keys[0].key.remarks.as_deref().expect("remark added");
        assert!(remarks.starts_with("[Old Value]: Old -- Updated at "));

        // The remark timestamp parses as RFC3339
        let stamp = remarks
            .rsplit("Updated at ")
            .next()
            .expect("timestamp suffix");
        chrono::DateTime::parse_from_rfc3339(stamp).expect("valid timestamp");
    }

    #[test]
    fn test_reconcile_remark_trail_is_monotonic() {
        let (db, _temp_dir) = create_test_db();
        let project = create_test_project(&db);

        reconcile(&db, &project, &[pair("k", "A")], "importer").expect("import A");
        reconcile(&db, &project, &[pair("k", "B")], "importer").expect("import B");

        let keys = db.list_keys(&project.id).expect("list");
        let after_change = keys[0].key.remarks.clone().expect("one remark");
        assert_eq!(after_change.lines().count(), 1);
        assert!(after_change.contains("[Old Value]: A"));

        // Re-importing the same B must not add another remark line
        let outcome = reconcile(&db, &project, &[pair("k", "B")], "importer").expect("re-import");
        assert_eq!(outcome.skipped, 1);

        let keys = db.list_keys(&project.id).expect("list");
        assert_eq!(keys[0].key.remarks.as_deref(), Some(after_change.as_str()));
    }

    #[test]
    fn test_reconcile_remarks_accumulate_in_order() {
        let (db, _temp_dir) = create_test_db();
        let project = create_test_project(&db);

        reconcile(&db, &project, &[pair("k", "v1")], "importer").expect("v1");
        reconcile(&db, &project, &[pair("k", "v2")], "importer").expect("v2");
        reconcile(&db, &project, &[pair("k", "v3")], "importer").expect("v3");

        let keys = db.list_keys(&project.id).expect("list");
        let remarks = keys[0].key.remarks.clone().expect("remarks");
        let lines: Vec<&str> = remarks.lines().collect();

        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("[Old Value]: v1"), "oldest first: {}", lines[0]);
        assert!(lines[1].contains("[Old Value]: v2"), "newest last: {}", lines[1]);
    }

    #[test]
    fn test_reconcile_preserves_manual_remarks() {
        let (db, _temp_dir) = create_test_db();
        let project = create_test_project(&db);

        db.create_key(
            &project.id,
            "k",
            &[("en-US".to_string(), "Old".to_string())],
            Some("hand-written note"),
            "editor",
        )
        .expect("create");

        reconcile(&db, &project, &[pair("k", "New")], "importer").expect("reconcile");

        let keys = db.list_keys(&project.id).expect("list");
        let remarks = keys[0].key.remarks.clone().expect("remarks");
        let lines: Vec<&str> = remarks.lines().collect();
        assert_eq!(lines[0], "hand-written note");
        assert!(lines[1].starts_with("[Old Value]: Old"));
    }

    // ==================== Duplicate Handling Tests ====================

    #[test]
    fn test_reconcile_duplicate_names_last_wins() {
        let (db, _temp_dir) = create_test_db();
        let project = create_test_project(&db);

        let outcome = reconcile(
            &db,
            &project,
            &[pair("dup", "first"), pair("other", "x"), pair("dup", "second")],
            "importer",
        )
        .expect("reconcile");

        // Two unique names; the duplicate counts once
        assert_eq!(outcome.added, 2);
        assert_eq!(outcome.updated + outcome.skipped, 0);

        let keys = db.list_keys(&project.id).expect("list");
        let dup = keys
            .iter()
            .find(|k| k.key.string_name == "dup")
            .expect("dup exists");
        assert_eq!(
            dup.value_for("en-US").and_then(|v| v.content.as_deref()),
            Some("second")
        );
    }

    // ==================== Mixed Batch Tests ====================

    #[test]
    fn test_reconcile_mixed_batch_counts() {
        let (db, _temp_dir) = create_test_db();
        let project = create_test_project(&db);

        reconcile(
            &db,
            &project,
            &[pair("same", "keep"), pair("changed", "before")],
            "importer",
        )
        .expect("seed");

        let outcome = reconcile(
            &db,
            &project,
            &[
                pair("same", "keep"),
                pair("changed", "after"),
                pair("brand_new", "hello"),
            ],
            "importer",
        )
        .expect("reconcile");

        assert_eq!(outcome.added, 1);
        assert_eq!(outcome.updated, 1);
        assert_eq!(outcome.skipped, 1);
    }

    #[test]
    fn test_reconcile_does_not_touch_target_values() {
        let (db, _temp_dir) = create_test_db();
        let project = create_test_project(&db);

        reconcile(&db, &project, &[pair("k", "Hello")], "importer").expect("seed");
        let keys = db.list_keys(&project.id).expect("list");
        db.upsert_values(
            &[crate::db::ValueUpsert {
                key_id: keys[0].key.id,
                language_code: "zh-CN".to_string(),
                content: "你好".to_string(),
            }],
            "translator",
        )
        .expect("seed translation");

        reconcile(&db, &project, &[pair("k", "Hello again")], "importer").expect("reconcile");

        let keys = db.list_keys(&project.id).expect("list");
        assert_eq!(
            keys[0].value_for("zh-CN").and_then(|v| v.content.as_deref()),
            Some("你好"),
            "Imports only ever write the base language"
        );
    }

    // ==================== Property Tests ====================

    proptest! {
        #[test]
        fn prop_counts_partition_unique_names(
            raw in prop::collection::vec(("[a-e]", "[a-z]{0,4}"), 0..12)
        ) {
            let (db, _temp_dir) = create_test_db();
            let project = create_test_project(&db);
            let pairs: Vec<SourceString> = raw
                .into_iter()
                .map(|(name, value)| SourceString { name, value })
                .collect();
            let unique: HashSet<&str> = pairs.iter().map(|p| p.name.as_str()).collect();

            let first = reconcile(&db, &project, &pairs, "importer").expect("first run");
            prop_assert_eq!(first.added as usize, unique.len());
            prop_assert_eq!(first.updated, 0);
            prop_assert_eq!(first.skipped, 0);

            // Unchanged re-import is idempotent: everything skips
            let second = reconcile(&db, &project, &pairs, "importer").expect("second run");
            prop_assert_eq!(second.added, 0);
            prop_assert_eq!(second.updated, 0);
            prop_assert_eq!(second.skipped as usize, unique.len());
        }
    }
}
